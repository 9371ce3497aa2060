// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Station chain and parallel groups.
//!
//! ```text
//!   GC --> A --> P1 --> B            main chain (next/prev)
//!                |
//!                P2 --> P3           parallel group of P1 (next_parallel/prev_parallel)
//! ```
//!
//! Stations live in an arena indexed by [`StationId`]; links are ids. Only a
//! group's head sits in the main chain. Every mutation happens under the
//! topology write lock, which callers take after locking all station
//! transfers.

use super::{FlowMode, Station, StationId, StationStatus};
use crate::error::{Error, Result};
use std::sync::Arc;

/// Wire value of [`Position::End`] and [`ParallelPosition::End`].
pub const END: i32 = -1;
/// Wire value of [`ParallelPosition::NewHead`].
pub const NEWHEAD: i32 = -2;

/// Position in the main chain. GrandCentral holds position 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    At(usize),
    End,
}

impl Position {
    pub fn code(self) -> i32 {
        match self {
            Position::At(p) => p as i32,
            Position::End => END,
        }
    }

    pub fn from_code(code: i32) -> Result<Self> {
        match code {
            END => Ok(Position::End),
            p if p >= 0 => Ok(Position::At(p as usize)),
            other => Err(Error::BadArgument(format!("position {}", other))),
        }
    }
}

/// Position inside a parallel group. The head holds position 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParallelPosition {
    At(usize),
    End,
    /// Start a new group instead of joining the one at the main position.
    NewHead,
}

impl ParallelPosition {
    pub fn code(self) -> i32 {
        match self {
            ParallelPosition::At(p) => p as i32,
            ParallelPosition::End => END,
            ParallelPosition::NewHead => NEWHEAD,
        }
    }

    pub fn from_code(code: i32) -> Result<Self> {
        match code {
            END => Ok(ParallelPosition::End),
            NEWHEAD => Ok(ParallelPosition::NewHead),
            p if p >= 0 => Ok(ParallelPosition::At(p as usize)),
            other => Err(Error::BadArgument(format!("parallel position {}", other))),
        }
    }
}

#[derive(Debug)]
struct Node {
    station: Arc<Station>,
    status: StationStatus,
    next: Option<StationId>,
    prev: Option<StationId>,
    next_parallel: Option<StationId>,
    prev_parallel: Option<StationId>,
}

impl Node {
    fn new(station: Arc<Station>, status: StationStatus) -> Self {
        Self {
            station,
            status,
            next: None,
            prev: None,
            next_parallel: None,
            prev_parallel: None,
        }
    }

    fn clear_links(&mut self) {
        self.next = None;
        self.prev = None;
        self.next_parallel = None;
        self.prev_parallel = None;
    }
}

/// The arena of stations plus their links.
#[derive(Debug)]
pub(crate) struct Topology {
    nodes: Vec<Option<Node>>,
    tail: StationId,
}

impl Topology {
    /// A topology holding only GrandCentral.
    pub(crate) fn new(grand_central: Arc<Station>) -> Self {
        Self {
            nodes: vec![Some(Node::new(grand_central, StationStatus::Active))],
            tail: StationId::GRAND_CENTRAL,
        }
    }

    fn node(&self, id: StationId) -> Result<&Node> {
        self.nodes
            .get(id.0 as usize)
            .and_then(Option::as_ref)
            .ok_or_else(|| Error::Generic(format!("{} is not in the topology", id)))
    }

    fn node_mut(&mut self, id: StationId) -> Result<&mut Node> {
        self.nodes
            .get_mut(id.0 as usize)
            .and_then(Option::as_mut)
            .ok_or_else(|| Error::Generic(format!("{} is not in the topology", id)))
    }

    pub(crate) fn contains(&self, id: StationId) -> bool {
        self.node(id).is_ok()
    }

    pub(crate) fn station(&self, id: StationId) -> Option<&Arc<Station>> {
        self.node(id).ok().map(|n| &n.station)
    }

    pub(crate) fn status(&self, id: StationId) -> StationStatus {
        self.node(id).map_or(StationStatus::Unused, |n| n.status)
    }

    pub(crate) fn set_status(&mut self, id: StationId, status: StationStatus) -> Result<()> {
        self.node_mut(id)?.status = status;
        Ok(())
    }

    pub(crate) fn is_active(&self, id: StationId) -> bool {
        self.status(id) == StationStatus::Active
    }

    /// Register a station and link it at the requested place.
    ///
    /// The arena slot is released again if linking fails.
    pub(crate) fn insert(
        &mut self,
        station: Arc<Station>,
        status: StationStatus,
        position: Position,
        parallel: ParallelPosition,
    ) -> Result<()> {
        let id = station.id();
        if self.contains(id) {
            return Err(Error::AlreadyExists(format!("{} already linked", id)));
        }
        let index = id.0 as usize;
        if self.nodes.len() <= index {
            self.nodes.resize_with(index + 1, || None);
        }
        self.nodes[index] = Some(Node::new(station, status));
        if let Err(e) = self.link(id, position, parallel) {
            self.nodes[index] = None;
            return Err(e);
        }
        Ok(())
    }

    /// Link a registered, unlinked station.
    pub(crate) fn link(
        &mut self,
        id: StationId,
        position: Position,
        parallel: ParallelPosition,
    ) -> Result<()> {
        if id.is_grand_central() {
            return Err(Error::Generic("GrandCentral cannot be moved".into()));
        }
        if position == Position::At(0) {
            return Err(Error::Generic(
                "position 0 is reserved for GrandCentral".into(),
            ));
        }
        let config = self.node(id)?.station.config();

        let chain = self.main_chain();
        let target = match position {
            Position::At(p) if chain.len() > 1 => chain.get(p).copied(),
            _ => None,
        };

        let Some(target) = target else {
            let tail = self.tail;
            self.node_mut(tail)?.next = Some(id);
            self.node_mut(id)?.prev = Some(tail);
            self.tail = id;
            return Ok(());
        };

        let head_config = self.node(target)?.station.config();
        let join_group = config.flow == FlowMode::Parallel
            && head_config.flow == FlowMode::Parallel
            && parallel != ParallelPosition::NewHead;

        if join_group {
            if !config.compatible_with_group(&head_config) {
                return Err(Error::Generic(format!(
                    "{} is incompatible with the parallel group of {}",
                    id, target
                )));
            }
            let members = self.group(target);
            let at = match parallel {
                ParallelPosition::At(0) => {
                    return Err(Error::Generic(
                        "cannot replace the head of an existing parallel group".into(),
                    ))
                }
                ParallelPosition::At(p) => p.min(members.len()),
                _ => members.len(),
            };
            let before = members[at - 1];
            let after = self.node_mut(before)?.next_parallel;
            {
                let node = self.node_mut(id)?;
                node.prev_parallel = Some(before);
                node.next_parallel = after;
            }
            self.node_mut(before)?.next_parallel = Some(id);
            if let Some(after) = after {
                self.node_mut(after)?.prev_parallel = Some(id);
            }
        } else {
            let before = self.node(target)?.prev;
            {
                let node = self.node_mut(id)?;
                node.prev = before;
                node.next = Some(target);
            }
            self.node_mut(target)?.prev = Some(id);
            if let Some(before) = before {
                self.node_mut(before)?.next = Some(id);
            }
        }
        Ok(())
    }

    /// Detach a station from the chain, keeping its arena slot.
    ///
    /// A group head with followers hands its main-chain place to the next
    /// member. A departing member passes its round-robin marker back.
    pub(crate) fn unlink(&mut self, id: StationId) -> Result<()> {
        if id.is_grand_central() {
            return Err(Error::Generic("GrandCentral cannot be removed".into()));
        }
        let node = self.node(id)?;
        let (prev, next, prev_par, next_par) =
            (node.prev, node.next, node.prev_parallel, node.next_parallel);

        if let Some(prev) = prev {
            // in the main chain; a following member takes our place
            if let Some(np) = next_par {
                let promoted = self.node_mut(np)?;
                promoted.prev = Some(prev);
                promoted.next = next;
                promoted.prev_parallel = None;
            }
            let successor = next_par.unwrap_or(prev);
            self.node_mut(prev)?.next = next_par.or(next);
            match next {
                Some(next) => self.node_mut(next)?.prev = Some(successor),
                None => self.tail = successor,
            }
        } else if let Some(prev_par) = prev_par {
            self.node_mut(prev_par)?.next_parallel = next_par;
            if let Some(next_par) = next_par {
                self.node_mut(next_par)?.prev_parallel = Some(prev_par);
            }
            let station = Arc::clone(&self.node(id)?.station);
            if station.is_last() {
                station.set_last(false);
                self.node_mut(prev_par)?.station.set_last(true);
            }
        } else {
            return Err(Error::Generic(format!("{} is not linked", id)));
        }

        self.node_mut(id)?.clear_links();
        Ok(())
    }

    /// Unlink and forget a station.
    pub(crate) fn remove(&mut self, id: StationId) -> Result<Arc<Station>> {
        self.unlink(id)?;
        let node = self.nodes[id.0 as usize].take();
        match node {
            Some(node) => Ok(node.station),
            None => Err(Error::Generic(format!("{} is not in the topology", id))),
        }
    }

    /// `(position, parallel position)` of a linked station.
    pub(crate) fn find(&self, id: StationId) -> Result<(usize, usize)> {
        if id.is_grand_central() {
            return Ok((0, 0));
        }
        for (position, head) in self.main_chain().into_iter().enumerate() {
            if let Some(pp) = self.group(head).iter().position(|&m| m == id) {
                return Ok((position, pp));
            }
        }
        Err(Error::Generic(format!("{} not found in the topology", id)))
    }

    /// Main-chain ids from GrandCentral to the tail.
    pub(crate) fn main_chain(&self) -> Vec<StationId> {
        let mut chain = vec![StationId::GRAND_CENTRAL];
        let mut cursor = self.node(StationId::GRAND_CENTRAL).ok().and_then(|n| n.next);
        while let Some(id) = cursor {
            chain.push(id);
            cursor = self.node(id).ok().and_then(|n| n.next);
        }
        chain
    }

    /// A group's members in order, head first. A serial station is its own group.
    pub(crate) fn group(&self, head: StationId) -> Vec<StationId> {
        let mut members = Vec::new();
        let mut cursor = Some(head);
        while let Some(id) = cursor {
            members.push(id);
            cursor = self.node(id).ok().and_then(|n| n.next_parallel);
        }
        members
    }

    /// The main-chain station whose group contains `id`.
    pub(crate) fn head_of(&self, id: StationId) -> StationId {
        let mut head = id;
        while let Some(prev) = self.node(head).ok().and_then(|n| n.prev_parallel) {
            head = prev;
        }
        head
    }

    /// The main-chain station after the group of `id`, `None` past the tail.
    pub(crate) fn next_main(&self, id: StationId) -> Option<StationId> {
        self.node(self.head_of(id)).ok().and_then(|n| n.next)
    }

    /// The main-chain station before the group of `id`.
    pub(crate) fn previous_main(&self, id: StationId) -> Option<StationId> {
        self.node(self.head_of(id)).ok().and_then(|n| n.prev)
    }

    /// Ids of all registered stations, ascending.
    pub(crate) fn ids(&self) -> Vec<StationId> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.is_some())
            .map(|(i, _)| StationId(i as u32))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::station::{SelectionPolicy, StationConfig};

    fn station(id: u32, config: StationConfig) -> Arc<Station> {
        Arc::new(Station::new(StationId(id), format!("s{}", id), config))
    }

    fn topology() -> Topology {
        Topology::new(station(0, StationConfig::default()))
    }

    fn serial(t: &mut Topology, id: u32, pos: Position) -> Result<()> {
        t.insert(
            station(id, StationConfig::default()),
            StationStatus::Idle,
            pos,
            ParallelPosition::End,
        )
    }

    fn parallel(t: &mut Topology, id: u32, pos: Position, pp: ParallelPosition) -> Result<()> {
        t.insert(
            station(id, StationConfig::new().parallel()),
            StationStatus::Idle,
            pos,
            pp,
        )
    }

    fn chain(t: &Topology) -> Vec<u32> {
        t.main_chain().iter().map(|s| s.0).collect()
    }

    #[test]
    fn test_insert_clamps_to_end() {
        let mut t = topology();
        serial(&mut t, 1, Position::At(5)).unwrap();
        serial(&mut t, 2, Position::End).unwrap();
        serial(&mut t, 3, Position::At(99)).unwrap();
        assert_eq!(chain(&t), vec![0, 1, 2, 3]);
        assert_eq!(t.find(StationId(3)).unwrap(), (3, 0));
    }

    #[test]
    fn test_insert_takes_position() {
        let mut t = topology();
        serial(&mut t, 1, Position::End).unwrap();
        serial(&mut t, 2, Position::End).unwrap();
        serial(&mut t, 3, Position::At(1)).unwrap();
        assert_eq!(chain(&t), vec![0, 3, 1, 2]);
        assert_eq!(t.find(StationId(3)).unwrap(), (1, 0));
        assert_eq!(t.find(StationId(2)).unwrap(), (3, 0));
    }

    #[test]
    fn test_grand_central_rules() {
        let mut t = topology();
        assert_eq!(t.find(StationId::GRAND_CENTRAL).unwrap(), (0, 0));
        assert!(matches!(
            serial(&mut t, 1, Position::At(0)),
            Err(Error::Generic(_))
        ));
        assert!(!t.contains(StationId(1)));
        assert!(t.unlink(StationId::GRAND_CENTRAL).is_err());
    }

    #[test]
    fn test_parallel_group_positions() {
        let mut t = topology();
        serial(&mut t, 1, Position::End).unwrap();
        parallel(&mut t, 2, Position::End, ParallelPosition::NewHead).unwrap();
        parallel(&mut t, 3, Position::At(2), ParallelPosition::End).unwrap();
        parallel(&mut t, 4, Position::At(2), ParallelPosition::At(1)).unwrap();
        parallel(&mut t, 5, Position::At(2), ParallelPosition::At(50)).unwrap();

        assert_eq!(chain(&t), vec![0, 1, 2]);
        let group: Vec<u32> = t.group(StationId(2)).iter().map(|s| s.0).collect();
        assert_eq!(group, vec![2, 4, 3, 5]);
        assert_eq!(t.find(StationId(4)).unwrap(), (2, 1));
        assert_eq!(t.find(StationId(5)).unwrap(), (2, 3));
        assert_eq!(t.head_of(StationId(5)), StationId(2));
        assert_eq!(t.next_main(StationId(3)), None);
        assert_eq!(t.previous_main(StationId(3)), Some(StationId(1)));

        // head slot is taken
        assert!(parallel(&mut t, 6, Position::At(2), ParallelPosition::At(0)).is_err());
        // a new group ahead of the existing one
        parallel(&mut t, 6, Position::At(2), ParallelPosition::NewHead).unwrap();
        assert_eq!(chain(&t), vec![0, 1, 6, 2]);
    }

    #[test]
    fn test_incompatible_member_rejected() {
        let mut t = topology();
        parallel(&mut t, 1, Position::End, ParallelPosition::NewHead).unwrap();
        let rr = station(
            2,
            StationConfig::new()
                .parallel()
                .with_select(SelectionPolicy::RoundRobin),
        );
        let err = t
            .insert(rr, StationStatus::Idle, Position::At(1), ParallelPosition::End)
            .unwrap_err();
        assert!(matches!(err, Error::Generic(_)));
        assert!(!t.contains(StationId(2)));
    }

    #[test]
    fn test_head_removal_promotes_member() {
        let mut t = topology();
        parallel(&mut t, 1, Position::End, ParallelPosition::NewHead).unwrap();
        parallel(&mut t, 2, Position::At(1), ParallelPosition::End).unwrap();
        parallel(&mut t, 3, Position::At(1), ParallelPosition::End).unwrap();
        serial(&mut t, 4, Position::End).unwrap();

        t.remove(StationId(1)).unwrap();
        assert_eq!(chain(&t), vec![0, 2, 4]);
        assert_eq!(t.find(StationId(3)).unwrap(), (1, 1));
        assert_eq!(t.previous_main(StationId(4)), Some(StationId(2)));
        assert!(t.find(StationId(1)).is_err());
    }

    #[test]
    fn test_tail_head_removal_updates_tail() {
        let mut t = topology();
        parallel(&mut t, 1, Position::End, ParallelPosition::NewHead).unwrap();
        parallel(&mut t, 2, Position::At(1), ParallelPosition::End).unwrap();
        t.remove(StationId(1)).unwrap();
        serial(&mut t, 3, Position::End).unwrap();
        assert_eq!(chain(&t), vec![0, 2, 3]);
    }

    #[test]
    fn test_member_removal_moves_was_last() {
        let mut t = topology();
        parallel(&mut t, 1, Position::End, ParallelPosition::NewHead).unwrap();
        parallel(&mut t, 2, Position::At(1), ParallelPosition::End).unwrap();
        parallel(&mut t, 3, Position::At(1), ParallelPosition::End).unwrap();

        t.station(StationId(3)).unwrap().set_last(true);
        t.remove(StationId(3)).unwrap();
        assert!(t.station(StationId(2)).unwrap().is_last());
        let group: Vec<u32> = t.group(StationId(1)).iter().map(|s| s.0).collect();
        assert_eq!(group, vec![1, 2]);
    }

    #[test]
    fn test_serial_removal_and_relink() {
        let mut t = topology();
        for id in 1..=3 {
            serial(&mut t, id, Position::End).unwrap();
        }
        t.unlink(StationId(2)).unwrap();
        assert_eq!(chain(&t), vec![0, 1, 3]);
        assert!(t.find(StationId(2)).is_err());
        t.link(StationId(2), Position::At(1), ParallelPosition::End)
            .unwrap();
        assert_eq!(chain(&t), vec![0, 2, 1, 3]);
        t.unlink(StationId(3)).unwrap();
        serial(&mut t, 4, Position::End).unwrap();
        assert_eq!(chain(&t), vec![0, 2, 1, 4]);
    }

    #[test]
    fn test_position_codes() {
        assert_eq!(Position::from_code(-1).unwrap(), Position::End);
        assert_eq!(Position::from_code(3).unwrap(), Position::At(3));
        assert!(Position::from_code(-2).is_err());
        assert_eq!(
            ParallelPosition::from_code(NEWHEAD).unwrap(),
            ParallelPosition::NewHead
        );
        assert_eq!(ParallelPosition::End.code(), END);
    }
}
