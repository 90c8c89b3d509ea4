#![no_std]
#![no_main]

mod hardware;
mod peripherals;

use panic_probe as _;

extern crate alloc;

/// RTIC app module runs the engine as a set of concurrent tasks. This module
/// is responsible for interfacing with the hardware; `groovebox_core` owns
/// everything else.
#[rtic::app(
    device = rp_pico::hal::pac,
    peripherals = true,
    dispatchers = [USBCTRL_IRQ, DMA_IRQ_0, DMA_IRQ_1]
)]
mod app {
    use alloc_cortex_m::CortexMHeap;
    use defmt::{self, error, info, trace};
    use defmt_rtt as _;
    use fugit::MicrosDurationU64;
    use groovebox_core::{song::Song, Engine};
    use rp_pico::hal::timer::{monotonic::Monotonic, Alarm0};

    use crate::hardware::{set_now_us, Rp2040Hardware, UartMidiSink};
    use crate::peripherals::{setup, MidiIn, MidiOut};

    #[global_allocator]
    static ALLOCATOR: CortexMHeap = CortexMHeap::empty();
    const HEAP_SIZE_BYTES: usize = 256 * 1024;

    /// How often the engine is ticked. The stepper, clock and scheduler all
    /// run off this cadence; 1ms keeps MIDI clock jitter well under 1ms.
    const TICK_INTERVAL: MicrosDurationU64 = MicrosDurationU64::millis(1);

    #[monotonic(binds = TIMER_IRQ_0, default = true)]
    type TimerMonotonic = Monotonic<Alarm0>;

    #[shared]
    struct Shared {
        engine: Engine,
    }

    #[local]
    struct Local {
        midi_in: MidiIn,
        midi_out: MidiOut,
        hw: Rp2040Hardware,
    }

    #[init]
    fn init(ctx: init::Context) -> (Shared, Local, init::Monotonics) {
        info!("[init] starting");

        unsafe {
            ALLOCATOR.init(cortex_m_rt::heap_start() as usize, HEAP_SIZE_BYTES);
        }

        defmt::timestamp!("{=u64:us}", {
            monotonics::now().duration_since_epoch().to_micros()
        });

        let devices = setup(ctx.device);
        let hw = Rp2040Hardware::new(devices.buttons, devices.led, devices.mux);

        let mut engine = Engine::new(Song::new());
        engine.start(0);

        tick::spawn().expect("tick::spawn should succeed");

        info!("[init] complete");

        (
            Shared { engine },
            Local {
                midi_in: devices.midi_in,
                midi_out: devices.midi_out,
                hw,
            },
            init::Monotonics(devices.monotonic_timer),
        )
    }

    /// Handle an inbound MIDI byte: an external clock master can replace
    /// our own MIDI-clock generation when Start/Continue/Stop arrive.
    #[task(binds = UART0_IRQ, priority = 4, shared = [engine], local = [midi_in])]
    fn uart0_irq(mut ctx: uart0_irq::Context) {
        use midi_types::MidiMessage;
        use nb::block;

        if let Ok(message) = block!(ctx.local.midi_in.read()) {
            let now_us = monotonics::now().duration_since_epoch().to_micros();
            let now_ms = (now_us / 1_000) as u32;
            ctx.shared.engine.lock(|engine| match message {
                MidiMessage::Start => engine.start(now_ms),
                MidiMessage::Continue => engine.start_continue(now_ms),
                _ => trace!("[midi in] ignored"),
            });
        }
    }

    /// Drive the engine once per `TICK_INTERVAL`: poll input, advance the
    /// clock/stepper, and flush due MIDI to the UART.
    #[task(priority = 2, shared = [engine], local = [midi_out, hw])]
    fn tick(mut ctx: tick::Context) {
        let start = monotonics::now();
        let now_us = start.duration_since_epoch().to_micros();
        let now_ms = (now_us / 1_000) as u32;
        set_now_us(ctx.local.hw, now_us);

        let mut sink = UartMidiSink::new(ctx.local.midi_out);
        ctx.shared.engine.lock(|engine| {
            engine.update(now_ms, ctx.local.hw, &mut sink);
            for event in engine.errors() {
                error!("[engine] {}", defmt::Debug2Format(&event));
            }
        });

        tick::spawn_after(TICK_INTERVAL).expect("tick::spawn_after should succeed");

        trace!(
            "[tick] elapsed_time={}",
            (monotonics::now() - start).to_micros()
        );
    }

    #[idle]
    fn task_main(_: task_main::Context) -> ! {
        loop {
            cortex_m::asm::nop();
        }
    }
}
