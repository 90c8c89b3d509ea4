//! A terminal-driven `HardwareIo`: 16 buttons, 4 rotary pots and 4 slider
//! pots as plain in-memory state, mutated by [`crate::commands`] parsed from
//! stdin. Stands in for a physical panel of step buttons and pots.

use std::time::Instant;

use groovebox_core::HardwareIo;

const BUTTON_COUNT: usize = 16;
const ROTARY_COUNT: usize = 4;
const SLIDER_COUNT: usize = 4;

/// How long a simulated button press stays "held" once triggered by a
/// `press <n>` command — long enough to clear the input router's 20ms
/// debounce window.
const PRESS_HOLD_MS: u64 = 30;

pub struct SimHardware {
    start: Instant,
    rotaries: [u8; ROTARY_COUNT],
    sliders: [u8; SLIDER_COUNT],
    button_released_at: [Option<Instant>; BUTTON_COUNT],
    led_on: bool,
    led_brightness: u8,
}

impl SimHardware {
    pub fn new() -> SimHardware {
        SimHardware {
            start: Instant::now(),
            rotaries: [0; ROTARY_COUNT],
            sliders: [0; SLIDER_COUNT],
            button_released_at: [None; BUTTON_COUNT],
            led_on: false,
            led_brightness: 0,
        }
    }

    pub fn press_button(&mut self, i: u8) {
        if let Some(slot) = self.button_released_at.get_mut(i as usize) {
            *slot = Some(Instant::now() + std::time::Duration::from_millis(PRESS_HOLD_MS));
        }
    }

    pub fn set_rotary(&mut self, i: u8, value: u8) {
        if let Some(slot) = self.rotaries.get_mut(i as usize) {
            *slot = value.min(127);
        }
    }

    pub fn set_slider(&mut self, i: u8, value: u8) {
        if let Some(slot) = self.sliders.get_mut(i as usize) {
            *slot = value.min(127);
        }
    }

    pub fn led_state(&self) -> (bool, u8) {
        (self.led_on, self.led_brightness)
    }
}

impl Default for SimHardware {
    fn default() -> Self {
        SimHardware::new()
    }
}

impl HardwareIo for SimHardware {
    fn init(&mut self) -> bool {
        true
    }

    fn shutdown(&mut self) {
        self.led_on = false;
    }

    fn read_button(&self, i: u8) -> bool {
        self.button_released_at
            .get(i as usize)
            .and_then(|slot| *slot)
            .map(|until| Instant::now() < until)
            .unwrap_or(false)
    }

    fn read_rotary(&self, i: u8) -> u8 {
        self.rotaries.get(i as usize).copied().unwrap_or(0)
    }

    fn read_slider(&self, i: u8) -> u8 {
        self.sliders.get(i as usize).copied().unwrap_or(0)
    }

    fn set_led(&mut self, on: bool) {
        self.led_on = on;
    }

    fn set_led_brightness(&mut self, brightness: u8) {
        self.led_brightness = brightness;
        self.led_on = brightness > 0;
    }

    fn millis(&self) -> u32 {
        self.start.elapsed().as_millis() as u32
    }

    /// Nothing to poll: button/pot state is mutated directly by the stdin
    /// command reader between ticks.
    fn update(&mut self) {}
}
