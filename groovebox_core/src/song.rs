//! The dense song model: 15 modes x 32 patterns x 8 tracks x 16 steps.

extern crate alloc;

use alloc::boxed::Box;
use alloc::vec::Vec as AllocVec;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::event::Event;

pub const MODE_COUNT: usize = 15;
pub const PATTERN_COUNT: usize = 32;
pub const TRACK_COUNT: usize = 8;
pub const STEP_COUNT: usize = 16;

const TOTAL_EVENTS: usize = MODE_COUNT * PATTERN_COUNT * TRACK_COUNT * STEP_COUNT;

/// An index argument fell outside the model's bounds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutOfRange {
    Mode(u8),
    Pattern(u8),
    Track(u8),
    Step(u8),
}

fn check(value: u8, bound: usize, wrap: fn(u8) -> OutOfRange) -> Result<usize, OutOfRange> {
    let value = value as usize;
    if value < bound {
        Ok(value)
    } else {
        Err(wrap(value as u8))
    }
}

#[inline]
fn flat_index(mode: usize, pattern: usize, track: usize, step: usize) -> usize {
    ((mode * PATTERN_COUNT + pattern) * TRACK_COUNT + track) * STEP_COUNT + step
}

/// The song: a flat, preallocated array of events. Allocated once at
/// construction (or load); never reallocated during playback.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Song {
    #[cfg_attr(feature = "serde", serde(with = "event_box"))]
    events: Box<[Event]>,
}

impl Song {
    pub fn new() -> Song {
        // built via a heap Vec rather than a stack array literal, so the
        // 240KiB dense buffer never lands on the stack at once.
        let mut events: AllocVec<Event> = AllocVec::new();
        events.resize(TOTAL_EVENTS, Event::new());
        Song {
            events: events.into_boxed_slice(),
        }
    }

    /// Reset every event to empty, in place. No reallocation.
    pub fn clear(&mut self) {
        for event in self.events.iter_mut() {
            *event = Event::new();
        }
    }

    pub fn event(&self, mode: u8, pattern: u8, track: u8, step: u8) -> Result<&Event, OutOfRange> {
        let idx = self.index(mode, pattern, track, step)?;
        Ok(&self.events[idx])
    }

    pub fn event_mut(
        &mut self,
        mode: u8,
        pattern: u8,
        track: u8,
        step: u8,
    ) -> Result<&mut Event, OutOfRange> {
        let idx = self.index(mode, pattern, track, step)?;
        Ok(&mut self.events[idx])
    }

    /// Borrow the 16 events of one track, by index only (no iterator).
    pub fn track(&self, mode: u8, pattern: u8, track: u8) -> Result<TrackView<'_>, OutOfRange> {
        let m = check(mode, MODE_COUNT, OutOfRange::Mode)?;
        let p = check(pattern, PATTERN_COUNT, OutOfRange::Pattern)?;
        let t = check(track, TRACK_COUNT, OutOfRange::Track)?;
        let start = flat_index(m, p, t, 0);
        Ok(TrackView {
            steps: &self.events[start..start + STEP_COUNT],
        })
    }

    /// Borrow the 8 tracks of one pattern, by index only.
    pub fn pattern(&self, mode: u8, pattern: u8) -> Result<PatternView<'_>, OutOfRange> {
        let m = check(mode, MODE_COUNT, OutOfRange::Mode)?;
        let p = check(pattern, PATTERN_COUNT, OutOfRange::Pattern)?;
        let start = flat_index(m, p, 0, 0);
        Ok(PatternView {
            events: &self.events[start..start + TRACK_COUNT * STEP_COUNT],
        })
    }

    /// Borrow the 32 patterns of one mode, by index only.
    pub fn mode(&self, mode: u8) -> Result<ModeView<'_>, OutOfRange> {
        let m = check(mode, MODE_COUNT, OutOfRange::Mode)?;
        let start = flat_index(m, 0, 0, 0);
        Ok(ModeView {
            events: &self.events[start..start + PATTERN_COUNT * TRACK_COUNT * STEP_COUNT],
        })
    }

    fn index(&self, mode: u8, pattern: u8, track: u8, step: u8) -> Result<usize, OutOfRange> {
        let m = check(mode, MODE_COUNT, OutOfRange::Mode)?;
        let p = check(pattern, PATTERN_COUNT, OutOfRange::Pattern)?;
        let t = check(track, TRACK_COUNT, OutOfRange::Track)?;
        let s = check(step, STEP_COUNT, OutOfRange::Step)?;
        Ok(flat_index(m, p, t, s))
    }
}

impl Default for Song {
    fn default() -> Self {
        Song::new()
    }
}

/// A read-only view over one track's 16 steps.
pub struct TrackView<'a> {
    steps: &'a [Event],
}

impl<'a> TrackView<'a> {
    pub fn event(&self, step: u8) -> Result<&Event, OutOfRange> {
        let s = check(step, STEP_COUNT, OutOfRange::Step)?;
        Ok(&self.steps[s])
    }
}

/// A read-only view over one pattern's 8 tracks.
pub struct PatternView<'a> {
    events: &'a [Event],
}

impl<'a> PatternView<'a> {
    pub fn track(&self, track: u8) -> Result<TrackView<'a>, OutOfRange> {
        let t = check(track, TRACK_COUNT, OutOfRange::Track)?;
        let start = t * STEP_COUNT;
        Ok(TrackView {
            steps: &self.events[start..start + STEP_COUNT],
        })
    }
}

/// A read-only view over one mode's 32 patterns.
pub struct ModeView<'a> {
    events: &'a [Event],
}

impl<'a> ModeView<'a> {
    pub fn pattern(&self, pattern: u8) -> Result<PatternView<'a>, OutOfRange> {
        let p = check(pattern, PATTERN_COUNT, OutOfRange::Pattern)?;
        let start = p * TRACK_COUNT * STEP_COUNT;
        Ok(PatternView {
            events: &self.events[start..start + TRACK_COUNT * STEP_COUNT],
        })
    }
}

#[cfg(feature = "serde")]
mod event_box {
    extern crate alloc;
    use alloc::boxed::Box;
    use alloc::vec::Vec;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::{Event, TOTAL_EVENTS};

    pub fn serialize<S: Serializer>(events: &Box<[Event]>, s: S) -> Result<S::Ok, S::Error> {
        events.serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Box<[Event]>, D::Error> {
        let v: Vec<Event> = Vec::deserialize(d)?;
        if v.len() != TOTAL_EVENTS {
            return Err(serde::de::Error::custom("song event buffer has wrong length"));
        }
        Ok(v.into_boxed_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_song_is_all_empty() {
        let song = Song::new();
        for m in 0..MODE_COUNT as u8 {
            assert!(!song.event(m, 0, 0, 0).unwrap().switch());
        }
    }

    #[test]
    fn out_of_range_indices_are_rejected() {
        let song = Song::new();
        assert_eq!(
            song.event(15, 0, 0, 0).unwrap_err(),
            OutOfRange::Mode(15)
        );
        assert_eq!(
            song.event(0, 32, 0, 0).unwrap_err(),
            OutOfRange::Pattern(32)
        );
        assert_eq!(song.event(0, 0, 8, 0).unwrap_err(), OutOfRange::Track(8));
        assert_eq!(song.event(0, 0, 0, 16).unwrap_err(), OutOfRange::Step(16));
    }

    #[test]
    fn writes_are_independent_across_cells() {
        let mut song = Song::new();
        song.event_mut(1, 2, 3, 4).unwrap().set_switch(true);
        assert!(song.event(1, 2, 3, 4).unwrap().switch());
        assert!(!song.event(1, 2, 3, 5).unwrap().switch());
        assert!(!song.event(1, 2, 4, 4).unwrap().switch());
    }

    #[test]
    fn clear_resets_every_event() {
        let mut song = Song::new();
        song.event_mut(0, 0, 0, 0).unwrap().set_switch(true);
        song.clear();
        assert!(!song.event(0, 0, 0, 0).unwrap().switch());
    }

    #[test]
    fn views_expose_by_index_access() {
        let mut song = Song::new();
        song.event_mut(2, 1, 0, 5).unwrap().set_switch(true);
        let track_view = song.track(2, 1, 0).unwrap();
        assert!(track_view.event(5).unwrap().switch());
        assert!(!track_view.event(4).unwrap().switch());

        let pattern_view = song.pattern(2, 1).unwrap();
        assert!(pattern_view.track(0).unwrap().event(5).unwrap().switch());

        let mode_view = song.mode(2).unwrap();
        assert!(mode_view
            .pattern(1)
            .unwrap()
            .track(0)
            .unwrap()
            .event(5)
            .unwrap()
            .switch());
    }
}
