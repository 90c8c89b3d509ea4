//! Mode 0: the transport/song channel. Chooses which pattern plays on each
//! other channel and carries scale/velocity globals, re-derived from its own
//! pattern 0 every 16 global step ticks.

use crate::song::{Song, PATTERN_COUNT, STEP_COUNT, TRACK_COUNT};

/// Channels steered by Mode 0: 1..14.
const STEERED_CHANNEL_COUNT: usize = 14;
/// Tracks 1..7 (of Mode-0 pattern 0) each override exactly one channel;
/// track `t` overrides channel `t + 1`. Channels 9..14 have no dedicated
/// override track and always follow the global default from track 0.
const PER_CHANNEL_OVERRIDE_TRACKS: usize = TRACK_COUNT - 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Mode0Params {
    pub scale_root: Option<u8>,
    pub scale_type: Option<u8>,
    pub velocity_offset: i8,
}

/// The song-director cursor and its derived per-channel state.
pub struct Mode0 {
    step: u8,
    loop_length: u8,
    pattern_for_channel: [u8; STEERED_CHANNEL_COUNT],
    params: Mode0Params,
}

impl Mode0 {
    pub fn new() -> Mode0 {
        Mode0 {
            step: 0,
            loop_length: STEP_COUNT as u8,
            pattern_for_channel: [0; STEERED_CHANNEL_COUNT],
            params: Mode0Params {
                scale_root: None,
                scale_type: None,
                velocity_offset: 0,
            },
        }
    }

    pub fn reset(&mut self) {
        self.step = 0;
    }

    pub fn current_step(&self) -> u8 {
        self.step
    }

    pub fn params(&self) -> Mode0Params {
        self.params
    }

    /// Pattern index Mode 0 currently selects for channel `channel`
    /// (1..14). Channels outside that range return pattern 0.
    pub fn pattern_for_channel(&self, channel: u8) -> u8 {
        if (1..=STEERED_CHANNEL_COUNT as u8).contains(&channel) {
            self.pattern_for_channel[(channel - 1) as usize]
        } else {
            0
        }
    }

    /// Loop length: number of leading ON steps in track 0 of pattern 0,
    /// scanned from step 0 until the first gap. If step 0 is OFF, the loop
    /// length is the full 16.
    fn compute_loop_length(song: &Song) -> u8 {
        let track0 = match song.track(0, 0, 0) {
            Ok(t) => t,
            Err(_) => return STEP_COUNT as u8,
        };
        if !track0.event(0).map(|e| e.switch()).unwrap_or(false) {
            return STEP_COUNT as u8;
        }
        let mut len = 0u8;
        for s in 0..STEP_COUNT as u8 {
            match track0.event(s) {
                Ok(e) if e.switch() => len += 1,
                _ => break,
            }
        }
        len.max(1)
    }

    /// Called once per full 16-step global loop (i.e. when the global step
    /// cursor wraps to 0). Re-derives pattern selection and scale/velocity
    /// globals from the current Mode-0 step, then advances the Mode-0
    /// cursor, wrapping at `loop_length`.
    pub fn advance(&mut self, song: &Song) {
        self.loop_length = Self::compute_loop_length(song);

        let pattern_zero = song.pattern(0, 0).expect("mode 0 pattern 0 always exists");
        let song_map_step = pattern_zero
            .track(0)
            .and_then(|t| t.event(self.step))
            .copied()
            .unwrap_or_default();

        let mut global_pattern: Option<u8> = None;
        if song_map_step.switch() {
            let pots = song_map_step.pots();
            self.params = Mode0Params {
                scale_root: Some(pots[0] % 12),
                scale_type: Some(pots[1] % 8),
                velocity_offset: pots[2] as i8 - 64,
            };
            global_pattern = Some(pots[3] % PATTERN_COUNT as u8);
        }

        if let Some(pattern) = global_pattern {
            for slot in self.pattern_for_channel.iter_mut() {
                *slot = pattern;
            }
        }

        for t in 0..PER_CHANNEL_OVERRIDE_TRACKS as u8 {
            let track_index = t + 1;
            let channel = t + 2; // track 1 -> channel 2, ..., track 7 -> channel 8
            let event = pattern_zero
                .track(track_index)
                .and_then(|tr| tr.event(self.step))
                .copied()
                .unwrap_or_default();
            if event.switch() {
                self.pattern_for_channel[(channel - 1) as usize] = event.pots()[3] % PATTERN_COUNT as u8;
            }
        }

        self.step = (self.step + 1) % self.loop_length.max(1);
    }
}

impl Default for Mode0 {
    fn default() -> Self {
        Mode0::new()
    }
}
