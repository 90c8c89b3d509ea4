//! Error kinds and the bounded error channel the host drains each tick. No
//! error aborts playback.

use heapless::Deque;

use crate::song::OutOfRange;

/// Returned directly to a caller; never crosses into the step loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineError {
    OutOfRange(OutOfRange),
}

impl From<OutOfRange> for EngineError {
    fn from(e: OutOfRange) -> Self {
        EngineError::OutOfRange(e)
    }
}

/// One notable thing that happened during a tick, queued for the host to
/// drain. Never aborts the engine loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineEvent {
    InvalidMidiDropped,
    ScriptLoadFailed { channel: u8 },
    ScriptRuntimeError { channel: u8, step: u8 },
    SinkBusy,
}

const ERROR_CHANNEL_CAPACITY: usize = 32;

/// Bounded ring buffer of `EngineEvent`s. Oldest-first; a full buffer drops
/// the newest event rather than growing or blocking the stepper.
pub struct ErrorChannel {
    events: Deque<EngineEvent, ERROR_CHANNEL_CAPACITY>,
}

impl ErrorChannel {
    pub fn new() -> ErrorChannel {
        ErrorChannel {
            events: Deque::new(),
        }
    }

    pub fn push(&mut self, event: EngineEvent) {
        if self.events.push_back(event).is_err() {
            // channel full: drop the oldest to make room, never block.
            let _ = self.events.pop_front();
            let _ = self.events.push_back(event);
        }
    }

    pub fn drain(&mut self) -> impl Iterator<Item = EngineEvent> + '_ {
        core::iter::from_fn(move || self.events.pop_front())
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl Default for ErrorChannel {
    fn default() -> Self {
        ErrorChannel::new()
    }
}
