// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Earliest-fit interval allocator used by every device that models a
//! shared, serialized resource (a bus's wire, a DRAM bank's command queue).
//!
//! Grounded on `original_source/utils.hh`'s `Timeline` class: the timeline
//! tracks free/busy intervals over `[0, +inf)` and, given an arrival tick
//! and a duration, finds the earliest free interval at or after the arrival
//! that can hold the duration, splitting the containing free interval into
//! (possibly empty) left and right remainders around the reservation.

use crate::ident::Tick;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Interval {
    start: Tick,
    /// `None` means "open-ended", the final free interval's extent.
    end: Option<Tick>,
}

/// An earliest-fit free-interval allocator over `[0, +inf)`.
///
/// Starts as a single open-ended free interval. Each call to
/// [`Timeline::transfer_time`] reserves `[start, start + length)` for some
/// `start >= arrive`, choosing the earliest free interval that fits.
#[derive(Debug, Clone)]
pub struct Timeline {
    free: Vec<Interval>,
}

impl Default for Timeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Timeline {
    /// A fresh timeline, entirely free from tick zero.
    #[must_use]
    pub fn new() -> Self {
        Self {
            free: vec![Interval {
                start: 0,
                end: None,
            }],
        }
    }

    /// Reserves `length` ticks at or after `arrive`, returning the tick the
    /// reservation actually starts at.
    ///
    /// Scans free intervals in order (they are kept sorted and
    /// non-overlapping) for the first one that can hold `length` ticks
    /// starting no earlier than `arrive`, then splits it into a left
    /// remainder (if the fit starts after the interval's own start), the
    /// reservation itself (removed from the free list), and a right
    /// remainder (if the interval extends past the reservation's end).
    #[allow(clippy::expect_used)]
    pub fn transfer_time(&mut self, arrive: Tick, length: Tick) -> Tick {
        if length == 0 {
            return arrive;
        }

        // The final free interval is always open-ended, so this always finds
        // a fit; an `expect` here would only fire on an internal bug.
        let idx = self
            .free
            .iter()
            .position(|iv| {
                let candidate_start = arrive.max(iv.start);
                match iv.end {
                    Some(end) => candidate_start + length <= end,
                    None => true,
                }
            })
            .expect("Timeline invariant: the final free interval is always open-ended");

        let iv = self.free[idx];
        let start = arrive.max(iv.start);
        let reservation_end = start + length;

        let mut replacement = Vec::with_capacity(2);
        if start > iv.start {
            replacement.push(Interval {
                start: iv.start,
                end: Some(start),
            });
        }
        match iv.end {
            Some(end) if reservation_end < end => replacement.push(Interval {
                start: reservation_end,
                end: Some(end),
            }),
            None => replacement.push(Interval {
                start: reservation_end,
                end: None,
            }),
            Some(_) => {}
        }

        self.free.splice(idx..=idx, replacement);
        start
    }

    /// True if no interval has ever been reserved.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.free.len() == 1 && self.free[0].start == 0 && self.free[0].end.is_none()
    }

    /// Total busy ticks up to `now`, used for bus/switch utilization
    /// reporting (`original_source/bus.hh`'s `avg_utilization`).
    #[must_use]
    pub fn busy_before(&self, now: Tick) -> Tick {
        let mut free_ticks: Tick = 0;
        for iv in &self.free {
            let end = iv.end.unwrap_or(now).min(now);
            if end > iv.start {
                free_ticks += end - iv.start;
            }
        }
        now.saturating_sub(free_ticks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserves_from_idle_timeline_at_arrival() {
        let mut tl = Timeline::new();
        let start = tl.transfer_time(100, 50);
        assert_eq!(start, 100);
    }

    #[test]
    fn second_reservation_is_pushed_past_the_first() {
        let mut tl = Timeline::new();
        assert_eq!(tl.transfer_time(0, 100), 0);
        // Arrives during the busy window; earliest fit is right after it.
        let start = tl.transfer_time(50, 20);
        assert_eq!(start, 100);
    }

    #[test]
    fn fits_into_a_gap_between_two_reservations() {
        let mut tl = Timeline::new();
        assert_eq!(tl.transfer_time(0, 10), 0); // busy [0, 10)
        assert_eq!(tl.transfer_time(100, 10), 100); // busy [100, 110)
        // A short transfer arriving at 20 fits in the [10, 100) gap.
        let start = tl.transfer_time(20, 30);
        assert_eq!(start, 20);
    }

    #[test]
    fn zero_length_transfers_do_not_reserve() {
        let mut tl = Timeline::new();
        assert_eq!(tl.transfer_time(10, 0), 10);
        assert!(tl.is_idle());
    }

    #[test]
    fn busy_before_accounts_for_all_reservations() {
        let mut tl = Timeline::new();
        tl.transfer_time(0, 10);
        tl.transfer_time(20, 10);
        assert_eq!(tl.busy_before(30), 20);
    }
}
