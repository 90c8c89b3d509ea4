//! Maps rotary/slider/button changes to selection, tempo, and event edits
//! (parameter-locking). Polled once per tick from `Engine::update`.

use crate::hardware::HardwareIo;
use crate::song::Song;

const ROTARY_COUNT: usize = 4;
const SLIDER_COUNT: usize = 4;
const BUTTON_COUNT: usize = 16;

/// Analog jitter guard: a rotary reading only registers a change when it
/// differs from the last registered value by at least this many LSBs.
const ROTARY_HYSTERESIS: i16 = 2;

const DEBOUNCE_STABLE_MS: u32 = 20;
const DEBOUNCE_LOCKOUT_MS: u32 = 50;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ButtonState {
    Idle,
    Candidate { since: u32 },
    Pressed,
    LockedOut { until: u32 },
}

/// Current UI selector: which cell the 16 buttons edit, and which slider
/// values they would capture. Purely a UI concern — it never affects
/// playback, every channel plays simultaneously regardless of selection.
#[derive(Clone, Copy, Debug, Default)]
pub struct Selection {
    pub mode: u8,
    pub pattern: u8,
    pub track: u8,
}

pub struct InputRouter {
    last_rotary: [u8; ROTARY_COUNT],
    buttons: [ButtonState; BUTTON_COUNT],
}

impl InputRouter {
    pub fn new() -> InputRouter {
        InputRouter {
            last_rotary: [0; ROTARY_COUNT],
            buttons: [ButtonState::Idle; BUTTON_COUNT],
        }
    }

    /// Poll hardware once and apply any resulting mutation to `song` and
    /// `selection`. Sets `dirty` on any song edit. Returns a new tempo
    /// selection when the tempo rotary moved past the hysteresis threshold
    /// — the caller (`Engine`) is responsible for committing it at the next
    /// step boundary rather than applying it immediately.
    pub fn poll(
        &mut self,
        hw: &mut dyn HardwareIo,
        song: &mut Song,
        selection: &mut Selection,
        dirty: &mut bool,
    ) -> Option<u16> {
        hw.update();
        let now = hw.millis();

        let new_tempo = self.poll_rotaries(hw, selection);
        self.poll_buttons(hw, song, selection, dirty, now);
        new_tempo
    }

    fn poll_rotaries(&mut self, hw: &dyn HardwareIo, selection: &mut Selection) -> Option<u16> {
        let mut new_tempo = None;
        for i in 0..ROTARY_COUNT {
            let raw = hw.read_rotary(i as u8);
            let delta = (raw as i16 - self.last_rotary[i] as i16).abs();
            if delta < ROTARY_HYSTERESIS {
                continue;
            }
            self.last_rotary[i] = raw;
            match i {
                0 => selection.mode = (raw as u16 * 15 / 128) as u8,
                1 => new_tempo = Some(60 + (raw as u32 * 180 / 127) as u16),
                2 => selection.pattern = (raw as u32 * 32 / 128) as u8,
                3 => selection.track = (raw as u32 * 8 / 128) as u8,
                _ => unreachable!(),
            }
        }
        new_tempo
    }

    fn poll_buttons(
        &mut self,
        hw: &dyn HardwareIo,
        song: &mut Song,
        selection: &Selection,
        dirty: &mut bool,
        now: u32,
    ) {
        for i in 0..BUTTON_COUNT {
            let raw = hw.read_button(i as u8);
            let state = self.buttons[i];
            self.buttons[i] = match state {
                ButtonState::Idle => {
                    if raw {
                        ButtonState::Candidate { since: now }
                    } else {
                        ButtonState::Idle
                    }
                }
                ButtonState::Candidate { since } => {
                    if !raw {
                        ButtonState::Idle
                    } else if now.wrapping_sub(since) >= DEBOUNCE_STABLE_MS {
                        self.fire_press(song, selection, hw, i as u8, dirty);
                        ButtonState::Pressed
                    } else {
                        state
                    }
                }
                ButtonState::Pressed => {
                    if raw {
                        ButtonState::Pressed
                    } else {
                        ButtonState::LockedOut {
                            until: now.wrapping_add(DEBOUNCE_LOCKOUT_MS),
                        }
                    }
                }
                ButtonState::LockedOut { until } => {
                    if now >= until {
                        ButtonState::Idle
                    } else {
                        state
                    }
                }
            };
        }
    }

    /// A debounced press registered on step `i`: toggle the switch, and on
    /// the OFF->ON transition latch the four current slider values.
    fn fire_press(
        &self,
        song: &mut Song,
        selection: &Selection,
        hw: &dyn HardwareIo,
        step: u8,
        dirty: &mut bool,
    ) {
        let event = match song.event_mut(selection.mode, selection.pattern, selection.track, step) {
            Ok(e) => e,
            Err(_) => return,
        };
        let turning_on = !event.switch();
        event.set_switch(!event.switch());
        if turning_on {
            for i in 0..SLIDER_COUNT {
                event.set_pot(i, hw.read_slider(i as u8));
            }
        }
        *dirty = true;
    }
}

impl Default for InputRouter {
    fn default() -> Self {
        InputRouter::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::RefCell;

    struct FakeHardware {
        buttons: [bool; BUTTON_COUNT],
        rotaries: [u8; ROTARY_COUNT],
        sliders: [u8; SLIDER_COUNT],
        millis: RefCell<u32>,
    }

    impl FakeHardware {
        fn new() -> Self {
            FakeHardware {
                buttons: [false; BUTTON_COUNT],
                rotaries: [0; ROTARY_COUNT],
                sliders: [0; SLIDER_COUNT],
                millis: RefCell::new(0),
            }
        }
    }

    impl HardwareIo for FakeHardware {
        fn init(&mut self) -> bool {
            true
        }
        fn shutdown(&mut self) {}
        fn read_button(&self, i: u8) -> bool {
            self.buttons[i as usize]
        }
        fn read_rotary(&self, i: u8) -> u8 {
            self.rotaries[i as usize]
        }
        fn read_slider(&self, i: u8) -> u8 {
            self.sliders[i as usize]
        }
        fn set_led(&mut self, _on: bool) {}
        fn set_led_brightness(&mut self, _brightness: u8) {}
        fn millis(&self) -> u32 {
            *self.millis.borrow()
        }
        fn update(&mut self) {}
    }

    #[test]
    fn parameter_lock_latches_sliders_on_press() {
        let mut hw = FakeHardware::new();
        let mut song = Song::new();
        let mut selection = Selection {
            mode: 1,
            pattern: 0,
            track: 0,
        };
        let mut dirty = false;
        let mut router = InputRouter::new();

        hw.sliders = [40, 90, 20, 110];
        hw.buttons[2] = true;

        // button must stay stable for DEBOUNCE_STABLE_MS before it registers
        *hw.millis.borrow_mut() = 0;
        router.poll(&mut hw, &mut song, &mut selection, &mut dirty);
        *hw.millis.borrow_mut() = DEBOUNCE_STABLE_MS;
        router.poll(&mut hw, &mut song, &mut selection, &mut dirty);

        let event = song.event(1, 0, 0, 2).unwrap();
        assert!(event.switch());
        assert_eq!(event.pots(), [40, 90, 20, 110]);

        hw.buttons[2] = false;
        hw.sliders = [0, 0, 0, 0];
        *hw.millis.borrow_mut() = DEBOUNCE_STABLE_MS + 1;
        router.poll(&mut hw, &mut song, &mut selection, &mut dirty);

        let event = song.event(1, 0, 0, 2).unwrap();
        assert_eq!(event.pots(), [40, 90, 20, 110]);
    }

    #[test]
    fn rotary_hysteresis_ignores_small_jitter() {
        let mut hw = FakeHardware::new();
        let mut song = Song::new();
        let mut selection = Selection::default();
        let mut dirty = false;
        let mut router = InputRouter::new();

        hw.rotaries[1] = 64;
        let first = router.poll(&mut hw, &mut song, &mut selection, &mut dirty);
        assert!(first.is_some());

        hw.rotaries[1] = 65; // +1 LSB, below hysteresis threshold
        let second = router.poll(&mut hw, &mut song, &mut selection, &mut dirty);
        assert!(second.is_none());

        hw.rotaries[1] = 70; // now +6 vs last *registered* value
        let third = router.poll(&mut hw, &mut song, &mut selection, &mut dirty);
        assert!(third.is_some());
        assert_ne!(third, first);
    }
}
