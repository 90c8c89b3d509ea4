//! The physical input abstraction: a poll-style read for 16 buttons and 8
//! pots (4 rotary, 4 slider), a monotonic millisecond clock, and the LED.
//! Deliberately outside the engine's own concerns — this trait is the
//! interface the core consumes; a desktop simulator and an embedded
//! adapter both satisfy it.

/// Eight-operation hardware seam, mirrored as a single trait so one
/// implementation per target (embedded, desktop-with-virtual-MIDI,
/// desktop-with-internal-synth) can be swapped in behind `Box<dyn HardwareIo>`.
pub trait HardwareIo {
    fn init(&mut self) -> bool;
    fn shutdown(&mut self);

    fn read_button(&self, i: u8) -> bool;
    fn read_rotary(&self, i: u8) -> u8;
    fn read_slider(&self, i: u8) -> u8;

    fn set_led(&mut self, on: bool);
    fn set_led_brightness(&mut self, brightness: u8);

    /// Monotonic milliseconds since engine start.
    fn millis(&self) -> u32;

    /// Hardware's own per-tick bookkeeping (debounce, ADC filtering).
    /// Called by the input router at the start of every engine tick.
    fn update(&mut self);
}
