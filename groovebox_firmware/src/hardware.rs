//! `HardwareIo` over the RP2040 GPIO/ADC peripherals, and the `MidiSink`
//! wrapper over the UART MIDI-out half-port.
use embedded_hal::adc::OneShot;
use embedded_hal::digital::v2::{InputPin, OutputPin};
use groovebox_core::{HardwareIo, MidiSink};
use heapless::Vec;
use midi_types::MidiMessage;
use rp2040_hal::gpio::DynPin;

use crate::peripherals::{AnalogMux, BUTTON_COUNT, MidiOut};

/// Converts a 12-bit ADC reading to the 0..127 pot range the core expects.
fn to_pot_value(raw: u16) -> u8 {
    (raw >> 5) as u8
}

pub struct Rp2040Hardware {
    buttons: Vec<DynPin, BUTTON_COUNT>,
    led: DynPin,
    mux: AnalogMux,
    rotary_cache: [u8; 4],
    slider_cache: [u8; 4],
    mux_index: usize,
    start_us: u64,
}

impl Rp2040Hardware {
    pub fn new(buttons: Vec<DynPin, BUTTON_COUNT>, led: DynPin, mux: AnalogMux) -> Self {
        Rp2040Hardware {
            buttons,
            led,
            mux,
            rotary_cache: [0; 4],
            slider_cache: [0; 4],
            mux_index: 0,
            start_us: 0,
        }
    }

    fn select_mux_channel(&mut self, index: usize) {
        for (bit, line) in self.mux.select.iter_mut().enumerate() {
            let level = (index >> bit) & 1 == 1;
            let _ = if level {
                line.set_high()
            } else {
                line.set_low()
            };
        }
    }
}

impl HardwareIo for Rp2040Hardware {
    fn init(&mut self) -> bool {
        true
    }

    fn shutdown(&mut self) {
        let _ = self.led.set_low();
    }

    fn read_button(&self, i: u8) -> bool {
        // buttons are wired active-low with internal pull-ups
        self.buttons
            .get(i as usize)
            .map(|pin| pin.is_low().unwrap_or(false))
            .unwrap_or(false)
    }

    fn read_rotary(&self, i: u8) -> u8 {
        self.rotary_cache.get(i as usize).copied().unwrap_or(0)
    }

    fn read_slider(&self, i: u8) -> u8 {
        self.slider_cache.get(i as usize).copied().unwrap_or(0)
    }

    fn set_led(&mut self, on: bool) {
        let _ = if on {
            self.led.set_high()
        } else {
            self.led.set_low()
        };
    }

    fn set_led_brightness(&mut self, _brightness: u8) {
        // no PWM channel wired to the indicator lamp; on/off only.
    }

    fn millis(&self) -> u32 {
        (self.start_us / 1_000) as u32
    }

    /// Advance the mux by one channel per call and sample both ADC pins.
    /// Called every engine tick, so all 4 channels cycle through well within
    /// one step interval.
    fn update(&mut self) {
        self.select_mux_channel(self.mux_index);
        let rotary_raw: u16 = nb::block!(self.mux.adc.read(&mut self.mux.rotary_common))
            .unwrap_or(self.rotary_cache[self.mux_index] as u16);
        self.rotary_cache[self.mux_index] = to_pot_value(rotary_raw);
        let slider_raw: u16 = nb::block!(self.mux.adc.read(&mut self.mux.slider_common))
            .unwrap_or(self.slider_cache[self.mux_index] as u16);
        self.slider_cache[self.mux_index] = to_pot_value(slider_raw);
        self.mux_index = (self.mux_index + 1) % 4;
    }
}

/// Tracks monotonic microseconds separately from `HardwareIo::millis`
/// because RTIC's monotonic timer is read from task context, not from
/// inside the hardware struct.
pub fn set_now_us(hw: &mut Rp2040Hardware, now_us: u64) {
    hw.start_us = now_us;
}

pub struct UartMidiSink<'a> {
    midi_out: &'a mut MidiOut,
}

impl<'a> UartMidiSink<'a> {
    pub fn new(midi_out: &'a mut MidiOut) -> Self {
        UartMidiSink { midi_out }
    }
}

fn to_midi_message(payload: &[u8]) -> Option<MidiMessage> {
    match payload {
        [status, data1, data2] => midi_types_from_bytes3(*status, *data1, *data2),
        [status, data1] => midi_types_from_bytes2(*status, *data1),
        [0xF8] => Some(MidiMessage::TimingClock),
        [0xFA] => Some(MidiMessage::Start),
        [0xFB] => Some(MidiMessage::Continue),
        [0xFC] => Some(MidiMessage::Stop),
        _ => None,
    }
}

fn midi_types_from_bytes3(status: u8, data1: u8, data2: u8) -> Option<MidiMessage> {
    let channel: midi_types::Channel = (status & 0x0F).into();
    let note: midi_types::Note = data1.into();
    match status & 0xF0 {
        0x90 => Some(MidiMessage::NoteOn(channel, note, data2.into())),
        0x80 => Some(MidiMessage::NoteOff(channel, note, data2.into())),
        0xB0 => Some(MidiMessage::ControlChange(channel, data1.into(), data2.into())),
        _ => None,
    }
}

fn midi_types_from_bytes2(status: u8, data1: u8) -> Option<MidiMessage> {
    let channel: midi_types::Channel = (status & 0x0F).into();
    match status & 0xF0 {
        0xC0 => Some(MidiMessage::ProgramChange(channel, data1.into())),
        _ => None,
    }
}

impl<'a> MidiSink for UartMidiSink<'a> {
    fn send(
        &mut self,
        payload: &[u8],
        _timestamp_ms: u32,
    ) -> Result<(), groovebox_core::scheduler::SinkBusy> {
        let message = match to_midi_message(payload) {
            Some(m) => m,
            None => return Ok(()), // unrecognised payload was already validated upstream
        };
        self.midi_out
            .write(&message)
            .map_err(|_| groovebox_core::scheduler::SinkBusy)
    }
}
