//! Outbound MIDI clock: 24 pulses per quarter note, drift-free, bounded
//! catch-up after a long pause.

use crate::scheduler::Scheduler;

/// More than this many pulses pending at once means the host stalled (a
/// debugger break, a long blocking call); drop the backlog instead of
/// bursting it all out at once.
const MAX_CATCHUP_PULSES: u32 = 100;

pub fn clock_interval_ms(tempo_bpm: u32) -> u32 {
    (2_500 / tempo_bpm).max(1)
}

/// Maintains the F8 pulse cadence for the current tempo.
pub struct ClockManager {
    interval_ms: u32,
    next_clock_ms: u32,
}

impl ClockManager {
    pub fn new(tempo_bpm: u32) -> ClockManager {
        ClockManager {
            interval_ms: clock_interval_ms(tempo_bpm),
            next_clock_ms: 0,
        }
    }

    /// Re-anchor the cadence to `now` at the new tempo. Does not emit a
    /// pulse itself.
    pub fn set_tempo(&mut self, tempo_bpm: u32, now: u32) {
        self.interval_ms = clock_interval_ms(tempo_bpm);
        self.next_clock_ms = now + self.interval_ms;
    }

    pub fn reset(&mut self, now: u32) {
        self.next_clock_ms = now + self.interval_ms;
    }

    /// Enqueue every due F8 pulse into `scheduler`. Bounded catch-up: if
    /// more than `MAX_CATCHUP_PULSES` are due at once, drop the excess and
    /// re-anchor to `now`.
    pub fn tick(&mut self, now: u32, scheduler: &mut Scheduler) {
        let mut pending = 0u32;
        while now >= self.next_clock_ms {
            pending += 1;
            if pending > MAX_CATCHUP_PULSES {
                self.next_clock_ms = now + self.interval_ms;
                return;
            }
            scheduler.clock(self.next_clock_ms, 0);
            self.next_clock_ms += self.interval_ms;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{MidiSink, SinkBusy};

    struct CountingSink(u32);
    impl MidiSink for CountingSink {
        fn send(&mut self, _payload: &[u8], _timestamp_ms: u32) -> Result<(), SinkBusy> {
            self.0 += 1;
            Ok(())
        }
    }

    #[test]
    fn emits_pulses_at_expected_cadence() {
        let mut clock = ClockManager::new(120);
        clock.reset(0);
        let mut scheduler = Scheduler::new();
        let mut sink = CountingSink(0);

        for ms in 0..=1000u32 {
            clock.tick(ms, &mut scheduler);
            scheduler.update(ms, &mut sink);
        }

        let interval = clock_interval_ms(120);
        let expected = 1000 / interval;
        assert!((sink.0 as i64 - expected as i64).abs() <= 1);
    }

    #[test]
    fn bounded_catchup_drops_excess_pulses() {
        let mut clock = ClockManager::new(1000);
        clock.reset(0);
        let mut scheduler = Scheduler::new();
        // jump far into the future in one go, simulating a long stall
        clock.tick(100_000, &mut scheduler);
        assert!(scheduler.len() <= MAX_CATCHUP_PULSES as usize);
    }
}
