//! Delta-timed MIDI scheduler: a priority queue of outgoing packets ordered
//! by `(delivery_ms, sequence)`.

extern crate alloc;

use alloc::collections::BinaryHeap;
use core::cmp::Ordering;

use heapless::Vec as HVec;

/// Emitted MIDI was malformed for its status byte and was dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InvalidMidi;

/// The sink reported it could not accept the packet right now; the
/// scheduler keeps it queued and retries on the next `update`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SinkBusy;

/// Destination for MIDI bytes. Implemented by USB MIDI, a virtual endpoint,
/// or an internal synth. Must be non-blocking: if the call would block, it
/// returns `Err(SinkBusy)` and the scheduler retries next tick.
pub trait MidiSink {
    fn send(&mut self, payload: &[u8], timestamp_ms: u32) -> Result<(), SinkBusy>;
}

const MAX_MIDI_BYTES: usize = 3;

#[derive(Clone, Debug)]
struct QueuedPacket {
    payload: HVec<u8, MAX_MIDI_BYTES>,
    delivery_ms: u32,
    sequence: u64,
}

impl PartialEq for QueuedPacket {
    fn eq(&self, other: &Self) -> bool {
        self.delivery_ms == other.delivery_ms && self.sequence == other.sequence
    }
}
impl Eq for QueuedPacket {}

impl PartialOrd for QueuedPacket {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedPacket {
    // reversed so `BinaryHeap` (a max-heap) pops the smallest
    // `(delivery_ms, sequence)` pair first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .delivery_ms
            .cmp(&self.delivery_ms)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

fn required_len(status: u8) -> Option<usize> {
    match status & 0xF0 {
        0x80 | 0x90 | 0xB0 | 0xE0 => Some(3),
        0xC0 | 0xD0 => Some(2),
        _ if status >= 0xF8 => Some(1),
        _ => None,
    }
}

fn validate(payload: &[u8]) -> Result<(), InvalidMidi> {
    let status = *payload.first().ok_or(InvalidMidi)?;
    let expected = required_len(status).ok_or(InvalidMidi)?;
    if payload.len() != expected {
        return Err(InvalidMidi);
    }
    Ok(())
}

/// Priority queue of outgoing MIDI packets, stable on equal delivery time.
pub struct Scheduler {
    queue: BinaryHeap<QueuedPacket>,
    next_sequence: u64,
    invalid_count: u32,
}

impl Scheduler {
    pub fn new() -> Scheduler {
        Scheduler {
            queue: BinaryHeap::new(),
            next_sequence: 0,
            invalid_count: 0,
        }
    }

    /// Number of `enqueue` calls dropped so far because the payload was
    /// malformed for its status byte.
    pub fn invalid_count(&self) -> u32 {
        self.invalid_count
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Enqueue a raw MIDI packet for delivery at `delivery_ms`. Malformed
    /// payloads are dropped and counted, never propagated as an error out of
    /// the stepper.
    pub fn enqueue(&mut self, payload: &[u8], delivery_ms: u32) {
        if validate(payload).is_err() {
            self.invalid_count += 1;
            return;
        }
        let mut buf = HVec::new();
        // validate() already bounded payload.len() to <= 3
        let _ = buf.extend_from_slice(payload);
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.queue.push(QueuedPacket {
            payload: buf,
            delivery_ms,
            sequence,
        });
    }

    fn enqueue_at(&mut self, now: u32, delta_ms: u32, payload: &[u8]) {
        self.enqueue(payload, now.wrapping_add(delta_ms));
    }

    pub fn note_on(&mut self, now: u32, channel: u8, pitch: u8, velocity: u8, delta_ms: u32) {
        self.enqueue_at(now, delta_ms, &[0x90 | (channel & 0x0F), pitch, velocity]);
    }

    pub fn note_off(&mut self, now: u32, channel: u8, pitch: u8, delta_ms: u32) {
        self.enqueue_at(now, delta_ms, &[0x80 | (channel & 0x0F), pitch, 0x40]);
    }

    pub fn cc(&mut self, now: u32, channel: u8, controller: u8, value: u8, delta_ms: u32) {
        self.enqueue_at(now, delta_ms, &[0xB0 | (channel & 0x0F), controller, value]);
    }

    pub fn all_notes_off(&mut self, now: u32, channel: u8, delta_ms: u32) {
        self.cc(now, channel, 123, 0, delta_ms);
    }

    pub fn clock(&mut self, now: u32, delta_ms: u32) {
        self.enqueue_at(now, delta_ms, &[0xF8]);
    }

    pub fn start(&mut self, now: u32) {
        self.enqueue_at(now, 0, &[0xFA]);
    }

    pub fn stop_realtime(&mut self, now: u32) {
        self.enqueue_at(now, 0, &[0xFC]);
    }

    pub fn continue_(&mut self, now: u32) {
        self.enqueue_at(now, 0, &[0xFB]);
    }

    /// Deliver every packet whose `delivery_ms <= now` to `sink`, in
    /// `(delivery_ms, sequence)` order. A busy sink leaves the packet queued
    /// for the next call.
    pub fn update(&mut self, now: u32, sink: &mut dyn MidiSink) {
        while let Some(packet) = self.queue.peek() {
            if packet.delivery_ms > now {
                break;
            }
            let packet = self.queue.pop().expect("peek just confirmed an item");
            if sink.send(&packet.payload, packet.delivery_ms).is_err() {
                // sink would block: put it back and try again next tick.
                self.queue.push(packet);
                break;
            }
        }
    }

    /// Enqueue All-Notes-Off on every channel 0..16 at `now`, then drain the
    /// whole queue to `sink` (used on `stop()`).
    pub fn drain_all_notes_off(&mut self, now: u32, sink: &mut dyn MidiSink) {
        for channel in 0..16u8 {
            self.all_notes_off(now, channel, 0);
        }
        // drain: keep flushing until nothing is left that's due; packets
        // scheduled further in the future (rare at stop time) stay queued.
        self.update(now, sink);
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Scheduler::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec as AllocVec;

    struct RecordingSink {
        received: AllocVec<(AllocVec<u8>, u32)>,
    }

    impl RecordingSink {
        fn new() -> Self {
            RecordingSink {
                received: AllocVec::new(),
            }
        }
    }

    impl MidiSink for RecordingSink {
        fn send(&mut self, payload: &[u8], timestamp_ms: u32) -> Result<(), SinkBusy> {
            self.received.push((payload.to_vec(), timestamp_ms));
            Ok(())
        }
    }

    #[test]
    fn pops_in_delivery_then_sequence_order() {
        let mut s = Scheduler::new();
        s.note_on(0, 0, 60, 100, 10);
        s.note_on(0, 0, 61, 100, 5);
        s.note_on(0, 0, 62, 100, 5);

        let mut sink = RecordingSink::new();
        s.update(100, &mut sink);

        assert_eq!(sink.received.len(), 3);
        assert_eq!(sink.received[0].0[1], 61);
        assert_eq!(sink.received[1].0[1], 62);
        assert_eq!(sink.received[2].0[1], 60);
    }

    #[test]
    fn only_due_packets_are_flushed() {
        let mut s = Scheduler::new();
        s.note_on(0, 0, 60, 100, 50);
        let mut sink = RecordingSink::new();
        s.update(10, &mut sink);
        assert!(sink.received.is_empty());
        s.update(50, &mut sink);
        assert_eq!(sink.received.len(), 1);
    }

    #[test]
    fn malformed_payload_is_dropped_and_counted() {
        let mut s = Scheduler::new();
        s.enqueue(&[0x90, 60], 0); // note on needs 3 bytes
        assert_eq!(s.invalid_count(), 1);
        assert!(s.is_empty());
    }

    #[test]
    fn busy_sink_keeps_packet_queued() {
        struct BusyOnce(bool);
        impl MidiSink for BusyOnce {
            fn send(&mut self, _payload: &[u8], _timestamp_ms: u32) -> Result<(), SinkBusy> {
                if self.0 {
                    self.0 = false;
                    Err(SinkBusy)
                } else {
                    Ok(())
                }
            }
        }
        let mut s = Scheduler::new();
        s.clock(0, 0);
        let mut sink = BusyOnce(true);
        s.update(0, &mut sink);
        assert_eq!(s.len(), 1);
        s.update(0, &mut sink);
        assert_eq!(s.len(), 0);
    }

    #[test]
    fn stop_drains_all_notes_off_first() {
        let mut s = Scheduler::new();
        s.note_on(0, 2, 60, 100, 0);
        let mut sink = RecordingSink::new();
        s.drain_all_notes_off(0, &mut sink);
        // 16 all-notes-off CCs plus the pending note on
        assert_eq!(sink.received.len(), 17);
        assert!(s.is_empty());
    }
}
