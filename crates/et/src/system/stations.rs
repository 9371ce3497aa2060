// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Station management: create, remove, move, query and reconfigure.

use super::{StationEntry, System};
use crate::attachment::AttachmentId;
use crate::error::{Error, Result};
use crate::event::ControlWords;
use crate::station::topology::{ParallelPosition, Position};
use crate::station::{
    BlockMode, FlowMode, RestoreMode, SelectionPolicy, Station, StationConfig, StationId,
    StationStatus,
};
use std::sync::Arc;

impl System {
    /// Create a station at the end of the main chain.
    pub fn create_station(&self, name: &str, config: StationConfig) -> Result<StationId> {
        self.create_station_at(name, config, Position::End, ParallelPosition::End)
    }

    /// Create a station at a given place.
    ///
    /// A station with the same name and an identical configuration is
    /// returned as is; a different configuration is [`Error::AlreadyExists`].
    pub fn create_station_at(
        &self,
        name: &str,
        config: StationConfig,
        position: Position,
        parallel: ParallelPosition,
    ) -> Result<StationId> {
        self.check_open()?;
        if name.is_empty() {
            return Err(Error::BadArgument("station name is empty".into()));
        }
        if position == Position::At(0) {
            return Err(Error::Generic(
                "position 0 is reserved for GrandCentral".into(),
            ));
        }
        let config = config.validate(&self.config)?;

        let mut registry = self.registry.lock();
        if let Some(&existing) = registry.names.get(name) {
            let entry = registry.entry(existing)?;
            if entry.station.config().same_as(&config) {
                return Ok(existing);
            }
            return Err(Error::AlreadyExists(name.to_string()));
        }
        if registry.stations.len() >= self.config.stations_max {
            return Err(Error::TooMany(format!(
                "no more stations allowed ({} max)",
                self.config.stations_max
            )));
        }

        let id = registry.free_id();
        let station = Arc::new(Station::new(id, name.to_string(), config));
        self.lock_all(&registry, |topology| {
            topology.insert(
                Arc::clone(&station),
                StationStatus::Creating,
                position,
                parallel,
            )
        })?;

        let conductor = match self.spawn_conductor(&station) {
            Ok(conductor) => conductor,
            Err(e) => {
                let _ = self.lock_all(&registry, |topology| topology.remove(id));
                return Err(e);
            }
        };

        registry.names.insert(name.to_string(), id);
        registry.stations.insert(
            id,
            StationEntry {
                station,
                attachments: Vec::new(),
                conductor: Some(conductor),
            },
        );
        self.lock_all(&registry, |topology| {
            topology.set_status(id, StationStatus::Idle)
        })?;

        log::debug!(
            "[System::create_station] {} '{}' created at {:?}/{:?}",
            id,
            name,
            position,
            parallel
        );
        Ok(id)
    }

    /// Remove a station that has no attachments.
    ///
    /// Its conductor is stopped first so the output list drains downstream
    /// while the station is still linked.
    pub fn remove_station(&self, id: StationId) -> Result<()> {
        self.check_open()?;
        if id.is_grand_central() {
            return Err(Error::Generic("GrandCentral cannot be removed".into()));
        }

        let mut registry = self.registry.lock();
        let entry = registry.entry_mut(id)?;
        if !entry.attachments.is_empty() {
            return Err(Error::Generic(format!(
                "{} still has {} attachments",
                id,
                entry.attachments.len()
            )));
        }
        if let Some(conductor) = entry.conductor.take() {
            conductor.stop();
        }

        let station = self.lock_all(&registry, |topology| topology.remove(id))?;
        registry.stations.remove(&id);
        registry.names.remove(station.name());
        drop(registry);

        let mut residual = station.input.take_all();
        residual.extend(station.output.take_all());
        if !residual.is_empty() {
            log::warn!(
                "[System::remove_station] {} left {} events behind, returning them to GrandCentral",
                id,
                residual.len()
            );
            self.release_to_grand_central(residual);
        }

        log::debug!("[System::remove_station] {} '{}' removed", id, station.name());
        Ok(())
    }

    /// Move a station. On failure the station goes back to where it was.
    pub fn set_station_position(
        &self,
        id: StationId,
        position: Position,
        parallel: ParallelPosition,
    ) -> Result<()> {
        self.check_open()?;
        if id.is_grand_central() {
            return Err(Error::Generic("GrandCentral cannot be moved".into()));
        }
        if position == Position::At(0) {
            return Err(Error::BadArgument(
                "position 0 is reserved for GrandCentral".into(),
            ));
        }

        let registry = self.registry.lock();
        registry.entry(id)?;
        self.lock_all(&registry, |topology| {
            let (current, current_parallel) = topology.find(id)?;
            topology.unlink(id)?;
            if let Err(e) = topology.link(id, position, parallel) {
                let back = if current_parallel == 0 {
                    ParallelPosition::NewHead
                } else {
                    ParallelPosition::At(current_parallel)
                };
                if let Err(restore) = topology.link(id, Position::At(current), back) {
                    log::error!(
                        "[System::set_station_position] {} could not be restored: {}",
                        id,
                        restore
                    );
                }
                return Err(e);
            }
            Ok(())
        })
    }

    /// `(position, parallel position)` of a station.
    pub fn station_position(&self, id: StationId) -> Result<(usize, usize)> {
        self.check_open()?;
        self.topology.read().find(id)
    }

    pub fn station_exists(&self, name: &str) -> bool {
        self.registry.lock().names.contains_key(name)
    }

    pub fn station_name_to_id(&self, name: &str) -> Result<StationId> {
        self.registry
            .lock()
            .names
            .get(name)
            .copied()
            .ok_or_else(|| Error::Generic(format!("no station named {:?}", name)))
    }

    pub fn station(&self, id: StationId) -> Result<Arc<Station>> {
        self.registry.lock().entry(id).map(|e| Arc::clone(&e.station))
    }

    pub fn station_status(&self, id: StationId) -> StationStatus {
        self.topology.read().status(id)
    }

    /// Number of attachments to a station.
    pub fn station_attachments(&self, id: StationId) -> Result<usize> {
        self.registry.lock().entry(id).map(|e| e.attachments.len())
    }

    /// Whether `att` is attached to station `id`.
    pub fn station_attached(&self, id: StationId, att: AttachmentId) -> bool {
        self.registry
            .lock()
            .entry(id)
            .map_or(false, |e| e.attachments.contains(&att))
    }

    /// Ids of every live station, GrandCentral first.
    pub fn station_ids(&self) -> Vec<StationId> {
        self.registry.lock().stations.keys().copied().collect()
    }

    pub fn set_block_mode(&self, id: StationId, block: BlockMode) -> Result<()> {
        self.update_station(id, |config| config.block = block)
    }

    pub fn set_cue(&self, id: StationId, cue: usize) -> Result<()> {
        self.update_station(id, |config| config.cue = cue)
    }

    pub fn set_prescale(&self, id: StationId, prescale: u32) -> Result<()> {
        self.update_station(id, |config| config.prescale = prescale)
    }

    pub fn set_restore_mode(&self, id: StationId, restore: RestoreMode) -> Result<()> {
        self.update_station(id, |config| config.restore = restore)
    }

    pub fn set_user_mode(&self, id: StationId, user_mode: usize) -> Result<()> {
        let attached = self.station_attachments(id)?;
        if user_mode > 0 && attached > user_mode {
            return Err(Error::BadArgument(format!(
                "{} attachments already exceed user mode {}",
                attached, user_mode
            )));
        }
        self.update_station(id, |config| config.user_mode = user_mode)
    }

    /// Replace the select words of a MATCH station.
    pub fn set_select_words(&self, id: StationId, words: ControlWords) -> Result<()> {
        let station = self.station(id)?;
        if !matches!(station.config().select, SelectionPolicy::Match(_)) {
            return Err(Error::BadArgument(format!(
                "{} does not select on control words",
                id
            )));
        }
        self.update_station(id, |config| config.select = SelectionPolicy::Match(words))
    }

    /// Apply a change to a station configuration if the result is valid.
    fn update_station<F>(&self, id: StationId, change: F) -> Result<()>
    where
        F: FnOnce(&mut StationConfig),
    {
        self.check_open()?;
        if id.is_grand_central() {
            return Err(Error::Generic(
                "GrandCentral cannot be reconfigured".into(),
            ));
        }
        let registry = self.registry.lock();
        let station = Arc::clone(&registry.entry(id)?.station);
        let mut updated = station.config();
        change(&mut updated);
        let updated = updated.validate(&self.config)?;

        self.lock_all(&registry, |topology| {
            if updated.flow == FlowMode::Parallel {
                let head = topology.head_of(id);
                let group = topology.group(head);
                let head_config = if head == id {
                    updated.clone()
                } else {
                    topology
                        .station(head)
                        .map(|s| s.config())
                        .unwrap_or_else(|| updated.clone())
                };
                let compatible = group.iter().filter(|&&m| m != head).all(|&m| {
                    let member = if m == id {
                        updated.clone()
                    } else {
                        topology.station(m).map(|s| s.config()).unwrap_or_default()
                    };
                    member.compatible_with_group(&head_config)
                });
                if !compatible {
                    return Err(Error::BadArgument(format!(
                        "change would make {} incompatible with its parallel group",
                        id
                    )));
                }
            }
            station.replace_config(updated);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SystemConfig;

    fn system() -> Arc<System> {
        System::create(SystemConfig::default().with_events(20, 32).with_limits(4, 10)).unwrap()
    }

    #[test]
    fn test_create_and_find() {
        let sys = system();
        let a = sys.create_station("a", StationConfig::new()).unwrap();
        let b = sys.create_station("b", StationConfig::new()).unwrap();
        assert_eq!(a, StationId(1));
        assert_eq!(sys.station_position(b).unwrap(), (2, 0));
        assert_eq!(sys.station_status(a), StationStatus::Idle);
        assert!(sys.station_exists("a"));
        assert_eq!(sys.station_name_to_id("b").unwrap(), b);
        assert_eq!(sys.station_ids(), vec![StationId(0), a, b]);
    }

    #[test]
    fn test_same_name_same_config_returns_existing() {
        let sys = system();
        let a = sys.create_station("a", StationConfig::new()).unwrap();
        assert_eq!(sys.create_station("a", StationConfig::new()).unwrap(), a);
        assert!(matches!(
            sys.create_station("a", StationConfig::new().with_prescale(2)),
            Err(Error::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_station_limit() {
        let sys = system();
        for name in ["a", "b", "c"] {
            sys.create_station(name, StationConfig::new()).unwrap();
        }
        assert!(matches!(
            sys.create_station("d", StationConfig::new()),
            Err(Error::TooMany(_))
        ));
    }

    #[test]
    fn test_grand_central_is_fixed() {
        let sys = system();
        assert!(sys.remove_station(StationId::GRAND_CENTRAL).is_err());
        assert!(sys
            .create_station_at("x", StationConfig::new(), Position::At(0), ParallelPosition::End)
            .is_err());
        assert!(!sys.station_exists("x"));
        assert!(sys
            .set_station_position(StationId::GRAND_CENTRAL, Position::End, ParallelPosition::End)
            .is_err());
        assert!(sys
            .set_prescale(StationId::GRAND_CENTRAL, 2)
            .is_err());
        assert_eq!(
            sys.station_position(StationId::GRAND_CENTRAL).unwrap(),
            (0, 0)
        );
    }

    #[test]
    fn test_remove_frees_id_and_name() {
        let sys = system();
        let a = sys.create_station("a", StationConfig::new()).unwrap();
        sys.create_station("b", StationConfig::new()).unwrap();
        sys.remove_station(a).unwrap();
        assert!(!sys.station_exists("a"));
        assert!(sys.station_position(a).is_err());
        let c = sys.create_station("c", StationConfig::new()).unwrap();
        assert_eq!(c, a);
        assert_eq!(sys.station_position(c).unwrap(), (2, 0));
    }

    #[test]
    fn test_set_position_and_fallback() {
        let sys = System::create(SystemConfig::default().with_events(20, 32)).unwrap();
        let a = sys.create_station("a", StationConfig::new()).unwrap();
        let b = sys.create_station("b", StationConfig::new()).unwrap();
        sys.set_station_position(b, Position::At(1), ParallelPosition::End)
            .unwrap();
        assert_eq!(sys.station_position(b).unwrap(), (1, 0));
        assert_eq!(sys.station_position(a).unwrap(), (2, 0));

        assert!(matches!(
            sys.set_station_position(b, Position::At(0), ParallelPosition::End),
            Err(Error::BadArgument(_))
        ));

        // joining an incompatible group fails and leaves b in place
        let rr = StationConfig::new()
            .parallel()
            .with_select(SelectionPolicy::RoundRobin);
        let p = sys.create_station("p", rr).unwrap();
        let plain = sys
            .create_station("q", StationConfig::new().parallel())
            .unwrap();
        assert!(sys
            .set_station_position(plain, Position::At(3), ParallelPosition::End)
            .is_err());
        assert_eq!(sys.station_position(plain).unwrap(), (4, 0));
        assert_eq!(sys.station_position(p).unwrap(), (3, 0));
    }

    #[test]
    fn test_setters_validate() {
        let sys = system();
        let a = sys.create_station("a", StationConfig::new()).unwrap();
        sys.set_prescale(a, 3).unwrap();
        assert_eq!(sys.station(a).unwrap().config().prescale, 3);
        assert!(matches!(sys.set_prescale(a, 0), Err(Error::BadArgument(_))));
        assert_eq!(sys.station(a).unwrap().config().prescale, 3);

        sys.set_block_mode(a, BlockMode::NonBlocking).unwrap();
        sys.set_cue(a, 500).unwrap();
        // clamped to the pool size
        assert_eq!(sys.station(a).unwrap().config().cue, 20);

        assert!(sys.set_select_words(a, [1; 6]).is_err());
        assert!(sys.set_restore_mode(a, RestoreMode::Redistribute).is_err());
        sys.set_restore_mode(a, RestoreMode::GrandCentral).unwrap();
        assert!(sys.set_user_mode(a, 11).is_err());
        sys.set_user_mode(a, 2).unwrap();
    }

    #[test]
    fn test_set_select_words_on_match_station() {
        let sys = system();
        let m = sys
            .create_station("m", StationConfig::new().with_match([1; 6]))
            .unwrap();
        sys.set_select_words(m, [2; 6]).unwrap();
        assert_eq!(
            sys.station(m).unwrap().config().select.select_words(),
            Some(&[2; 6])
        );
    }
}
