//! Device initialisation: MIDI UART, the monotonic timer, 16 button GPIOs,
//! and an 8-channel analogue mux (a 4051) feeding the RP2040's single ADC
//! pin, selected by three GPIO address lines.
use fugit::HertzU32;
use heapless::Vec;
use rp2040_hal::gpio::{DynPin, FunctionUart};
use rp_pico::{
    hal::{
        adc::Adc,
        clocks::{self, Clock},
        gpio::Pin,
        pac::{self, RESETS, TIMER, UART0},
        sio::Sio,
        timer::{monotonic::Monotonic, Alarm0},
        uart::{DataBits, Reader, StopBits, UartConfig, UartPeripheral, Writer},
        Timer, Watchdog,
    },
    Pins, XOSC_CRYSTAL_FREQ,
};

type MidiOutUartPin = Pin<rp_pico::hal::gpio::bank0::Gpio16, FunctionUart>;
type MidiInUartPin = Pin<rp_pico::hal::gpio::bank0::Gpio17, FunctionUart>;
type MidiUartPins = (MidiOutUartPin, MidiInUartPin);

pub type MidiIn = embedded_midi::MidiIn<Reader<UART0, MidiUartPins>>;
pub type MidiOut = embedded_midi::MidiOut<Writer<UART0, MidiUartPins>>;

pub const BUTTON_COUNT: usize = 16;
/// Two 4051-style muxes share the same 2 select lines: one mux's common
/// output feeds the "rotary" ADC pin, the other's feeds "slider". Index `i`
/// (0..4) on the select lines picks rotary pot `i` and slider pot `i`
/// simultaneously.
pub const MUX_SELECT_LINE_COUNT: usize = 2;

pub struct AnalogMux {
    pub adc: Adc,
    pub rotary_common: rp_pico::hal::gpio::Pin<
        rp_pico::hal::gpio::bank0::Gpio26,
        rp_pico::hal::gpio::FloatingInput,
    >,
    pub slider_common: rp_pico::hal::gpio::Pin<
        rp_pico::hal::gpio::bank0::Gpio27,
        rp_pico::hal::gpio::FloatingInput,
    >,
    pub select: [DynPin; MUX_SELECT_LINE_COUNT],
}

pub struct Peripherals {
    pub midi_in: MidiIn,
    pub midi_out: MidiOut,
    pub buttons: Vec<DynPin, BUTTON_COUNT>,
    pub led: DynPin,
    pub mux: AnalogMux,
    pub monotonic_timer: Monotonic<Alarm0>,
}

pub fn setup(mut pac: pac::Peripherals) -> Peripherals {
    let sio = Sio::new(pac.SIO);
    let pins = Pins::new(
        pac.IO_BANK0,
        pac.PADS_BANK0,
        sio.gpio_bank0,
        &mut pac.RESETS,
    );

    let mut watchdog = Watchdog::new(pac.WATCHDOG);
    let clocks = clocks::init_clocks_and_plls(
        XOSC_CRYSTAL_FREQ,
        pac.XOSC,
        pac.CLOCKS,
        pac.PLL_SYS,
        pac.PLL_USB,
        &mut pac.RESETS,
        &mut watchdog,
    )
    .ok()
    .expect("init_clocks_and_plls(...) should succeed");

    let (midi_in, midi_out) = new_midi_uart(
        pac.UART0,
        pins.gpio16.into_mode::<FunctionUart>(),
        pins.gpio17.into_mode::<FunctionUart>(),
        &mut pac.RESETS,
        clocks.peripheral_clock.freq(),
    );

    // 16 momentary buttons on gpio 0..15, active low with internal pull-ups.
    let mut buttons: Vec<DynPin, BUTTON_COUNT> = Vec::new();
    macro_rules! push_button {
        ($vec:ident, $pins:ident, $field:ident) => {
            $vec.push($pins.$field.into_pull_up_input().into())
                .expect("button vec should have capacity for every gpio");
        };
    }
    push_button!(buttons, pins, gpio0);
    push_button!(buttons, pins, gpio1);
    push_button!(buttons, pins, gpio2);
    push_button!(buttons, pins, gpio3);
    push_button!(buttons, pins, gpio4);
    push_button!(buttons, pins, gpio5);
    push_button!(buttons, pins, gpio6);
    push_button!(buttons, pins, gpio7);
    push_button!(buttons, pins, gpio8);
    push_button!(buttons, pins, gpio9);
    push_button!(buttons, pins, gpio10);
    push_button!(buttons, pins, gpio11);
    push_button!(buttons, pins, gpio12);
    push_button!(buttons, pins, gpio13);
    push_button!(buttons, pins, gpio14);
    push_button!(buttons, pins, gpio15);

    let led: DynPin = pins.led.into_push_pull_output().into();

    let adc = Adc::new(pac.ADC, &mut pac.RESETS);
    let mux = AnalogMux {
        adc,
        rotary_common: pins.gpio26.into_floating_input(),
        slider_common: pins.gpio27.into_floating_input(),
        select: [
            pins.gpio18.into_push_pull_output().into(),
            pins.gpio19.into_push_pull_output().into(),
        ],
    };

    Peripherals {
        midi_in,
        midi_out,
        buttons,
        led,
        mux,
        monotonic_timer: new_monotonic_timer(pac.TIMER, &mut pac.RESETS),
    }
}

fn new_monotonic_timer(timer: TIMER, resets: &mut RESETS) -> Monotonic<Alarm0> {
    let mut timer = Timer::new(timer, resets);
    let monotonic_alarm = timer.alarm_0().expect("should get alarm_0");
    Monotonic::new(timer, monotonic_alarm)
}

fn new_midi_uart(
    uart: UART0,
    out_pin: MidiOutUartPin,
    in_pin: MidiInUartPin,
    resets: &mut RESETS,
    peripheral_clock_freq: HertzU32,
) -> (MidiIn, MidiOut) {
    let midi_uart_pins = (out_pin, in_pin);
    let uart_config = UartConfig::new(
        fugit::RateExtU32::Hz(31_250),
        DataBits::Eight,
        None,
        StopBits::One,
    );
    let mut midi_uart = UartPeripheral::new(uart, midi_uart_pins, resets)
        .enable(uart_config, peripheral_clock_freq)
        .expect("enabling uart for midi should succeed");
    midi_uart.enable_rx_interrupt();
    let (midi_reader, midi_writer) = midi_uart.split();
    (
        embedded_midi::MidiIn::new(midi_reader),
        embedded_midi::MidiOut::new(midi_writer),
    )
}
