//! Property-based sweeps over the engine's core invariants: event
//! round-tripping, the scheduler's `(delivery_ms, sequence)` total order,
//! drift-free stepping, and the tempo/step-interval relationship.

use alloc::vec::Vec as AllocVec;
use proptest::prelude::*;

use crate::engine::{step_interval_ms, Engine};
use crate::event::Event;
use crate::hardware::HardwareIo;
use crate::scheduler::{MidiSink, Scheduler, SinkBusy};
use crate::song::Song;

struct NullHardware;
impl HardwareIo for NullHardware {
    fn init(&mut self) -> bool {
        true
    }
    fn shutdown(&mut self) {}
    fn read_button(&self, _i: u8) -> bool {
        false
    }
    fn read_rotary(&self, _i: u8) -> u8 {
        0
    }
    fn read_slider(&self, _i: u8) -> u8 {
        0
    }
    fn set_led(&mut self, _on: bool) {}
    fn set_led_brightness(&mut self, _brightness: u8) {}
    fn millis(&self) -> u32 {
        0
    }
    fn update(&mut self) {}
}

#[derive(Default)]
struct CountingSink {
    notes: u32,
    clocks: u32,
}
impl MidiSink for CountingSink {
    fn send(&mut self, payload: &[u8], _timestamp_ms: u32) -> Result<(), SinkBusy> {
        match payload.first() {
            Some(0xF8) => self.clocks += 1,
            Some(b) if b & 0xF0 == 0x90 => self.notes += 1,
            _ => {}
        }
        Ok(())
    }
}

proptest! {
    /// Property 1: `decode(encode(e)) == e`, and writing one field never
    /// disturbs the others.
    #[test]
    fn event_round_trips_and_fields_are_independent(
        switch in any::<bool>(),
        pots in proptest::array::uniform4(0u8..=127u8),
    ) {
        let mut e = Event::new();
        e.set_switch(switch);
        for (i, &p) in pots.iter().enumerate() {
            e.set_pot(i, p);
        }
        let decoded = Event::from_raw(e.raw());
        prop_assert_eq!(decoded, e);
        prop_assert_eq!(decoded.switch(), switch);
        prop_assert_eq!(decoded.pots(), pots);
    }

    /// Property 1 (clamp): any `u8` pot write clamps to 0..=127 and never
    /// touches the switch bit.
    #[test]
    fn set_pot_always_clamps_and_preserves_switch(value in any::<u8>(), switch in any::<bool>()) {
        let mut e = Event::new();
        e.set_switch(switch);
        e.set_pot(2, value);
        prop_assert!(e.pot(2) <= 127);
        prop_assert_eq!(e.switch(), switch);
    }

    /// `step_interval_ms(b) * b * 4` approximates 60_000 (a quarter note at
    /// tempo `b`, times 4 sixteenth-steps per quarter). Millisecond steps
    /// can only approximate real tempo, so the gap is bounded by one
    /// quantized step's worth of error rather than a fixed constant.
    #[test]
    fn step_interval_matches_tempo_within_one_step(bpm in 1u16..=1000u16) {
        let interval = step_interval_ms(bpm) as i64;
        let product = interval * bpm as i64 * 4;
        prop_assert!((product - 60_000).abs() <= 4 * bpm as i64,
            "bpm={bpm} interval={interval} product={product}");
    }

    /// For tempos that divide the sixteenth-note constant evenly, the
    /// approximation above is exact.
    #[test]
    fn step_interval_is_exact_for_tempos_dividing_evenly(
        bpm in proptest::sample::select(vec![
            1u16, 2, 3, 4, 5, 6, 8, 10, 12, 15, 20, 24, 25, 30, 40, 50, 60, 75,
            100, 120, 125, 150, 200, 250, 300, 375, 500, 600, 625, 750, 1000,
        ]),
    ) {
        let interval = step_interval_ms(bpm) as i64;
        prop_assert_eq!(interval * bpm as i64 * 4, 60_000);
    }

    /// Property 3: for any sequence of enqueues, pops come back ordered by
    /// `(delivery_ms, sequence)` lexicographically — sequence breaking ties
    /// within equal delivery times.
    #[test]
    fn scheduler_pops_in_delivery_then_sequence_order(
        deltas in proptest::collection::vec(0u32..50, 1..30),
    ) {
        let mut scheduler = Scheduler::new();
        for (i, delta) in deltas.iter().enumerate() {
            scheduler.note_on(0, 0, (i % 128) as u8, 100, *delta);
        }

        struct RecordingSink { seen: AllocVec<(u32, u8)> }
        impl MidiSink for RecordingSink {
            fn send(&mut self, payload: &[u8], timestamp_ms: u32) -> Result<(), SinkBusy> {
                self.seen.push((timestamp_ms, payload[1]));
                Ok(())
            }
        }
        let mut sink = RecordingSink { seen: AllocVec::new() };
        scheduler.update(u32::MAX, &mut sink);

        let mut prev_ms = 0u32;
        for (ms, _) in &sink.seen {
            prop_assert!(*ms >= prev_ms, "delivery_ms must be non-decreasing across pops");
            prev_ms = *ms;
        }
        prop_assert_eq!(sink.seen.len(), deltas.len());
    }

    /// Property 4: without a tempo change, after `n` steps the cursor is at
    /// `n mod 16`.
    #[test]
    fn cursor_advances_without_drift(n in 1u32..200, bpm in 40u16..300) {
        let mut engine = Engine::new(Song::new());
        engine.set_tempo(bpm);
        let mut hw = NullHardware;
        let mut sink = CountingSink::default();
        engine.start(0);
        // commit the pending tempo at the first step boundary.
        engine.update(0, &mut hw, &mut sink);

        let interval = step_interval_ms(bpm);
        let total_ms = n * interval;
        for ms in 0..=total_ms {
            engine.update(ms, &mut hw, &mut sink);
        }
        prop_assert_eq!(engine.current_step() as u32, n % 16);
    }

    /// Property 6: any channel-voice byte (Note On/Off, CC) emitted for
    /// wire channel `channel` (0..14, i.e. MIDI channel `c - 1` for mode
    /// `c` in 1..14) has its status byte's low nibble equal to `channel`.
    #[test]
    fn channel_voice_status_byte_carries_the_right_channel(
        channel in 0u8..14,
        pitch in 0u8..=127,
        velocity in 0u8..=127,
        controller in 0u8..=127,
        value in 0u8..=127,
    ) {
        let mut scheduler = Scheduler::new();
        scheduler.note_on(0, channel, pitch, velocity, 0);
        scheduler.note_off(0, channel, pitch, 0);
        scheduler.cc(0, channel, controller, value, 0);

        struct RecordingSink { seen: AllocVec<u8> }
        impl MidiSink for RecordingSink {
            fn send(&mut self, payload: &[u8], _timestamp_ms: u32) -> Result<(), SinkBusy> {
                self.seen.push(payload[0]);
                Ok(())
            }
        }
        let mut sink = RecordingSink { seen: AllocVec::new() };
        scheduler.update(0, &mut sink);

        prop_assert_eq!(sink.seen.len(), 3);
        for status in sink.seen {
            prop_assert_eq!(status & 0x0F, channel);
        }
    }

    /// Property 7: between `start()` and a point `elapsed_ms` later, the
    /// count of clock pulses equals `floor(elapsed_ms / clock_interval_ms)`
    /// within +/-1.
    #[test]
    fn clock_pulse_count_matches_elapsed_time(bpm in 40u16..300, elapsed_ms in 10u32..3000) {
        let mut engine = Engine::new(Song::new());
        engine.set_tempo(bpm);
        let mut hw = NullHardware;
        let mut sink = CountingSink::default();
        engine.start(0);
        engine.update(0, &mut hw, &mut sink);
        for ms in 1..=elapsed_ms {
            engine.update(ms, &mut hw, &mut sink);
        }
        let clock_interval = crate::clock::clock_interval_ms(bpm as u32);
        let expected = elapsed_ms / clock_interval;
        prop_assert!((sink.clocks as i64 - expected as i64).abs() <= 1);
    }
}
