// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-station selection rules applied by conductors.

use super::config::{BlockMode, SelectionPolicy, StationConfig};
use crate::event::{ControlWords, Event, CONTROL_WORDS};

/// MATCH comparison of select words against control words.
///
/// Even indices compare for equality, odd indices for a non-zero bitwise AND.
/// A select word of -1 disables its index. The event matches if any enabled
/// index does.
pub fn matches(select: &ControlWords, control: &ControlWords) -> bool {
    (0..CONTROL_WORDS).any(|i| {
        if select[i] == -1 {
            return false;
        }
        if i % 2 == 0 {
            select[i] == control[i]
        } else {
            select[i] & control[i] != 0
        }
    })
}

/// Whether the station's condition accepts `event`.
pub(crate) fn accepts(policy: &SelectionPolicy, event: &Event) -> bool {
    match policy {
        SelectionPolicy::Match(words) => matches(words, &event.control()),
        SelectionPolicy::User(predicate) => predicate(&event.view()),
        SelectionPolicy::All | SelectionPolicy::RoundRobin | SelectionPolicy::EqualCue => true,
    }
}

/// Move out of `batch` the events one station takes, preserving order.
///
/// `queued` is the station's current input count and `tried` its running
/// prescale counter.
pub(crate) fn select_for(
    config: &StationConfig,
    batch: &mut Vec<Event>,
    queued: usize,
    tried: &mut u64,
) -> Vec<Event> {
    let condition = !matches!(
        config.select,
        SelectionPolicy::All | SelectionPolicy::RoundRobin | SelectionPolicy::EqualCue
    );

    match (condition, config.block) {
        (false, BlockMode::Blocking) => {
            let len = batch.len() as u64;
            let prescale = u64::from(config.prescale.max(1));
            let n = if prescale == 1 {
                len
            } else {
                (*tried + len) / prescale - *tried / prescale
            };
            *tried += len;
            batch.drain(..n as usize).collect()
        }
        (false, BlockMode::NonBlocking) => {
            let room = config.cue.saturating_sub(queued);
            let n = room.min(batch.len());
            batch.drain(..n).collect()
        }
        (true, BlockMode::Blocking) => {
            let prescale = u64::from(config.prescale.max(1));
            extract(batch, usize::MAX, |event| {
                if !accepts(&config.select, event) {
                    return false;
                }
                *tried += 1;
                *tried % prescale == 0
            })
        }
        (true, BlockMode::NonBlocking) => {
            let room = config.cue.saturating_sub(queued);
            extract(batch, room, |event| accepts(&config.select, event))
        }
    }
}

fn extract<F>(batch: &mut Vec<Event>, limit: usize, mut take: F) -> Vec<Event>
where
    F: FnMut(&Event) -> bool,
{
    let mut taken = Vec::new();
    let mut kept = Vec::with_capacity(batch.len());
    for event in batch.drain(..) {
        if taken.len() < limit && take(&event) {
            taken.push(event);
        } else {
            kept.push(event);
        }
    }
    *batch = kept;
    taken
}

/// Deal a batch across `active` group members starting at member `start`.
///
/// Member `(start + i) % active` receives events `i, i + active, ...`.
/// Returns the per-member batches (indexed by active member) and the member
/// that received the final event.
pub(crate) fn round_robin(
    batch: Vec<Event>,
    active: usize,
    start: usize,
) -> (Vec<Vec<Event>>, Option<usize>) {
    let mut shares: Vec<Vec<Event>> = (0..active).map(|_| Vec::new()).collect();
    if active == 0 || batch.is_empty() {
        return (shares, None);
    }
    let n = batch.len();
    for (i, event) in batch.into_iter().enumerate() {
        shares[(start + i % active) % active].push(event);
    }
    let extra = n % active;
    let last_slot = if extra == 0 { active - 1 } else { extra - 1 };
    (shares, Some((start + last_slot) % active))
}

/// How many of `n` events each member gets so queue lengths even out.
///
/// The shortest queues are filled up to the next level until the events run
/// out; whatever cannot level a whole tier is spread evenly across it.
pub(crate) fn equal_cue_shares(counts: &[usize], n: usize) -> Vec<usize> {
    let mut shares = vec![0; counts.len()];
    if counts.is_empty() {
        return shares;
    }
    let mut order: Vec<usize> = (0..counts.len()).collect();
    order.sort_by_key(|&i| counts[i]);

    let mut left = n;
    let mut level = counts[order[0]];
    let mut tier = 1;
    loop {
        while tier < order.len() && counts[order[tier]] == level {
            tier += 1;
        }
        let next = order.get(tier).map(|&i| counts[i]);
        match next {
            Some(next) if left >= (next - level) * tier => {
                let step = next - level;
                for &i in &order[..tier] {
                    shares[i] += step;
                }
                left -= step * tier;
                level = next;
            }
            _ => {
                let per = left / tier;
                let extra = left % tier;
                for (k, &i) in order[..tier].iter().enumerate() {
                    shares[i] += per + usize::from(k < extra);
                }
                return shares;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventCell;
    use crate::station::config::SELECT_NONE;
    use std::sync::Arc;

    fn batch(n: usize) -> Vec<Event> {
        (0..n)
            .map(|i| Event::from_cell(Arc::new(EventCell::new(i as u32, 8, 1))))
            .collect()
    }

    fn ids(events: &[Event]) -> Vec<u32> {
        events.iter().map(Event::id).collect()
    }

    #[test]
    fn test_match_alternates_equality_and_mask() {
        // index 0: equality
        let mut select = SELECT_NONE;
        select[0] = 5;
        assert!(matches(&select, &[5, 0, 0, 0, 0, 0]));
        assert!(!matches(&select, &[4, 0, 0, 0, 0, 0]));

        // index 1: bitwise AND
        let mut select = SELECT_NONE;
        select[1] = 0b0110;
        assert!(matches(&select, &[0, 0b0010, 0, 0, 0, 0]));
        assert!(!matches(&select, &[0, 0b1001, 0, 0, 0, 0]));
        // equality would fail here, the mask does not
        assert_ne!(select[1], 0b0010);

        // -1 disables, even when control is -1 too
        assert!(!matches(&SELECT_NONE, &[-1; 6]));

        // OR across indices
        let select = [9, -1, -1, -1, 3, -1];
        assert!(matches(&select, &[0, 0, 0, 0, 3, 0]));
    }

    #[test]
    fn test_prescale_all_blocking() {
        let config = StationConfig::new().with_prescale(3);
        let mut tried = 0;
        let mut admitted = Vec::new();
        for chunk in [4usize, 1, 5, 3] {
            let mut b = batch(chunk);
            admitted.extend(ids(&select_for(&config, &mut b, 0, &mut tried)));
        }
        // 13 offered, prescale 3
        assert_eq!(admitted.len(), 13 / 3);
        assert_eq!(tried, 13);
    }

    #[test]
    fn test_prescale_match_takes_every_nth() {
        let config = StationConfig::new().with_prescale(2).with_user(|_| true);
        let mut tried = 0;
        let mut b = batch(7);
        let taken = select_for(&config, &mut b, 0, &mut tried);
        assert_eq!(ids(&taken), vec![1, 3, 5]);
        assert_eq!(ids(&b), vec![0, 2, 4, 6]);
        assert_eq!(tried, 7);
    }

    #[test]
    fn test_prescale_admits_same_count_for_all_and_user() {
        let all = StationConfig::new().with_prescale(2);
        let user = StationConfig::new().with_prescale(2).with_user(|_| true);
        for config in [&all, &user] {
            let mut tried = 0;
            let mut admitted = 0;
            for chunk in [3usize, 1, 3] {
                let mut b = batch(chunk);
                admitted += select_for(config, &mut b, 0, &mut tried).len();
            }
            assert_eq!(admitted, 7 / 2);
            assert_eq!(tried, 7);
        }
    }

    #[test]
    fn test_nonblocking_respects_cue() {
        let config = StationConfig::new().nonblocking(4);
        let mut tried = 0;
        let mut b = batch(6);
        let taken = select_for(&config, &mut b, 1, &mut tried);
        assert_eq!(ids(&taken), vec![0, 1, 2]);
        assert_eq!(b.len(), 3);

        let mut b = batch(2);
        assert!(select_for(&config, &mut b, 4, &mut tried).is_empty());
    }

    #[test]
    fn test_user_nonblocking_stops_at_room() {
        let config = StationConfig::new()
            .nonblocking(2)
            .with_user(|v| v.id % 2 == 1);
        let mut tried = 0;
        let mut b = batch(8);
        let taken = select_for(&config, &mut b, 0, &mut tried);
        assert_eq!(ids(&taken), vec![1, 3]);
        assert_eq!(ids(&b), vec![0, 2, 4, 5, 6, 7]);
    }

    #[test]
    fn test_round_robin_deal() {
        let (shares, last) = round_robin(batch(9), 3, 0);
        assert_eq!(ids(&shares[0]), vec![0, 3, 6]);
        assert_eq!(ids(&shares[1]), vec![1, 4, 7]);
        assert_eq!(ids(&shares[2]), vec![2, 5, 8]);
        assert_eq!(last, Some(2));

        let (shares, last) = round_robin(batch(4), 3, 1);
        assert_eq!(ids(&shares[1]), vec![0, 3]);
        assert_eq!(ids(&shares[2]), vec![1]);
        assert_eq!(ids(&shares[0]), vec![2]);
        assert_eq!(last, Some(1));

        let (_, last) = round_robin(batch(1), 3, 2);
        assert_eq!(last, Some(2));
    }

    #[test]
    fn test_equal_cue_levels_queues() {
        assert_eq!(equal_cue_shares(&[0, 0, 0], 9), vec![3, 3, 3]);
        // raise the empty queue to 2, the last event goes to the shortest
        assert_eq!(equal_cue_shares(&[5, 0, 2], 3), vec![0, 3, 0]);
        // level both short queues to 5, then spread 2 over three
        assert_eq!(equal_cue_shares(&[5, 0, 2], 10), vec![0, 6, 4]);
        assert_eq!(equal_cue_shares(&[4, 4], 3), vec![2, 1]);
        assert_eq!(equal_cue_shares(&[], 3), Vec::<usize>::new());
        assert_eq!(equal_cue_shares(&[1, 7], 0), vec![0, 0]);
    }
}
