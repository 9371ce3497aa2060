// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Station configuration and its validation rules.

use crate::config::SystemConfig;
use crate::error::{Error, Result};
use crate::event::{ControlWords, EventView, CONTROL_WORDS};
use std::fmt;
use std::sync::Arc;

/// Serial stations sit alone in the main chain; parallel ones form groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlowMode {
    #[default]
    Serial,
    Parallel,
}

/// Whether a station must see every selected event or may drop when full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlockMode {
    #[default]
    Blocking,
    NonBlocking,
}

/// Where events checked out by a departing attachment go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RestoreMode {
    /// The station's own output list.
    #[default]
    Out,
    /// Back into the station's input list.
    In,
    /// Straight back to GrandCentral.
    GrandCentral,
    /// The previous station's output list, for redistribution in a group.
    Redistribute,
}

/// Predicate used by [`SelectionPolicy::User`].
pub type UserSelect = Arc<dyn Fn(&EventView) -> bool + Send + Sync>;

/// How a station picks events.
#[derive(Clone, Default)]
pub enum SelectionPolicy {
    /// Every event.
    #[default]
    All,
    /// Events whose control words match the select words.
    Match(ControlWords),
    /// Events accepted by a caller-supplied predicate.
    User(UserSelect),
    /// Strict rotation across a parallel group.
    RoundRobin,
    /// The group member with the shortest input queue first.
    EqualCue,
}

impl SelectionPolicy {
    /// Wire code of the policy.
    pub fn code(&self) -> u32 {
        match self {
            SelectionPolicy::All => 1,
            SelectionPolicy::Match(_) => 2,
            SelectionPolicy::User(_) => 3,
            SelectionPolicy::RoundRobin => 4,
            SelectionPolicy::EqualCue => 5,
        }
    }

    /// Round-robin and equal-cue distribute across a whole group.
    pub fn is_group_policy(&self) -> bool {
        matches!(self, SelectionPolicy::RoundRobin | SelectionPolicy::EqualCue)
    }

    /// Select words, if this policy has them.
    pub fn select_words(&self) -> Option<&ControlWords> {
        match self {
            SelectionPolicy::Match(words) => Some(words),
            _ => None,
        }
    }
}

impl fmt::Debug for SelectionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectionPolicy::All => write!(f, "All"),
            SelectionPolicy::Match(words) => f.debug_tuple("Match").field(words).finish(),
            SelectionPolicy::User(_) => write!(f, "User(<fn>)"),
            SelectionPolicy::RoundRobin => write!(f, "RoundRobin"),
            SelectionPolicy::EqualCue => write!(f, "EqualCue"),
        }
    }
}

/// Default queue limit of a nonblocking station.
pub const DEFAULT_CUE: usize = 10;

/// Configuration of one station.
#[derive(Debug, Clone)]
pub struct StationConfig {
    pub flow: FlowMode,
    /// Maximum simultaneous attachments, 0 for unlimited.
    pub user_mode: usize,
    pub block: BlockMode,
    pub select: SelectionPolicy,
    pub restore: RestoreMode,
    /// Accept one in `prescale` selected events (blocking only).
    pub prescale: u32,
    /// Queue limit of a nonblocking station.
    pub cue: usize,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            flow: FlowMode::Serial,
            user_mode: 0,
            block: BlockMode::Blocking,
            select: SelectionPolicy::All,
            restore: RestoreMode::Out,
            prescale: 1,
            cue: DEFAULT_CUE,
        }
    }
}

impl StationConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the station a parallel group member.
    pub fn parallel(mut self) -> Self {
        self.flow = FlowMode::Parallel;
        self
    }

    /// Make the station nonblocking with the given queue limit.
    pub fn nonblocking(mut self, cue: usize) -> Self {
        self.block = BlockMode::NonBlocking;
        self.cue = cue;
        self
    }

    pub fn with_select(mut self, select: SelectionPolicy) -> Self {
        self.select = select;
        self
    }

    /// Select on control words.
    pub fn with_match(self, words: ControlWords) -> Self {
        self.with_select(SelectionPolicy::Match(words))
    }

    /// Select with a predicate.
    pub fn with_user<F>(self, predicate: F) -> Self
    where
        F: Fn(&EventView) -> bool + Send + Sync + 'static,
    {
        self.with_select(SelectionPolicy::User(Arc::new(predicate)))
    }

    pub fn with_restore(mut self, restore: RestoreMode) -> Self {
        self.restore = restore;
        self
    }

    pub fn with_prescale(mut self, prescale: u32) -> Self {
        self.prescale = prescale;
        self
    }

    pub fn with_user_mode(mut self, user_mode: usize) -> Self {
        self.user_mode = user_mode;
        self
    }

    /// Check the configuration against the system limits.
    ///
    /// Returns the configuration to store: a cue larger than the pool is
    /// clamped to the pool size.
    pub fn validate(&self, system: &SystemConfig) -> Result<StationConfig> {
        if self.user_mode > system.attachments_max {
            return Err(Error::BadArgument(format!(
                "user mode {} exceeds the attachment limit {}",
                self.user_mode, system.attachments_max
            )));
        }

        if self.select.is_group_policy() {
            if self.flow != FlowMode::Parallel {
                return Err(Error::BadArgument(
                    "round-robin and equal-cue stations must be parallel".into(),
                ));
            }
            if self.block != BlockMode::Blocking {
                return Err(Error::BadArgument(
                    "round-robin and equal-cue stations must be blocking".into(),
                ));
            }
            if self.prescale != 1 {
                return Err(Error::BadArgument(
                    "round-robin and equal-cue stations must have prescale 1".into(),
                ));
            }
            if self.restore == RestoreMode::In {
                return Err(Error::BadArgument(
                    "round-robin and equal-cue stations cannot restore to their input".into(),
                ));
            }
        }

        if self.restore == RestoreMode::Redistribute && self.flow != FlowMode::Parallel {
            return Err(Error::BadArgument(
                "redistribute restore mode requires a parallel station".into(),
            ));
        }

        let mut checked = self.clone();
        match self.block {
            BlockMode::Blocking => {
                if self.prescale < 1 {
                    return Err(Error::BadArgument("prescale must be at least 1".into()));
                }
            }
            BlockMode::NonBlocking => {
                if self.cue < 1 {
                    return Err(Error::BadArgument("cue must be at least 1".into()));
                }
                checked.cue = self.cue.min(system.nevents);
            }
        }
        Ok(checked)
    }

    /// Whether `self` may join the parallel group headed by `group`.
    pub fn compatible_with_group(&self, group: &StationConfig) -> bool {
        if group.flow != FlowMode::Parallel || self.flow != FlowMode::Parallel {
            return false;
        }
        if group.select.is_group_policy() {
            self.select.code() == group.select.code()
                && self.block == group.block
                && self.prescale == group.prescale
        } else {
            !self.select.is_group_policy()
        }
    }

    /// Whether two configurations describe the same station.
    ///
    /// Predicates cannot be compared, so USER stations are never equal.
    pub fn same_as(&self, other: &StationConfig) -> bool {
        let select_equal = match (&self.select, &other.select) {
            (SelectionPolicy::Match(a), SelectionPolicy::Match(b)) => a == b,
            (SelectionPolicy::User(_), _) | (_, SelectionPolicy::User(_)) => false,
            (a, b) => a.code() == b.code(),
        };
        select_equal
            && self.flow == other.flow
            && self.user_mode == other.user_mode
            && self.block == other.block
            && self.restore == other.restore
            && self.prescale == other.prescale
            && self.cue == other.cue
    }
}

/// Select words that disable every comparison.
pub const SELECT_NONE: ControlWords = [-1; CONTROL_WORDS];
