//! The scripting contract: what a per-channel script receives, what it may
//! emit, and the isolated runtime seam a concrete interpreter plugs into.

extern crate alloc;

use alloc::boxed::Box;
use alloc::string::String;

use crate::scheduler::Scheduler;

/// Parameters passed to a script's `init` — at load, at reload, and on every
/// Mode-0 advance (reinitialisation is debounced to at most once per
/// channel per 100ms, see `ScriptContext::note_reinit`).
#[derive(Clone, Copy, Debug)]
pub struct InitParams {
    pub tempo_bpm: u16,
    /// Output MIDI channel, 0..15.
    pub channel: u8,
    /// Mode number, 0..14 (mode 0 is the song director and is loaded for
    /// uniformity but never dispatched through `process_event`).
    pub mode: u8,
    pub scale_root: Option<u8>,
    pub scale_type: Option<u8>,
    pub velocity_offset: i8,
}

/// One track's event at the current step, as handed to `process_event`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScriptEvent {
    pub switch: bool,
    pub pots: [u8; 4],
}

impl From<crate::event::Event> for ScriptEvent {
    fn from(e: crate::event::Event) -> Self {
        ScriptEvent {
            switch: e.switch(),
            pots: e.pots(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScriptError {
    /// Syntax error or a required entry point (`init`/`process_event`) is
    /// missing.
    Load,
    /// A runtime exception inside `init` or `process_event`.
    Runtime,
    /// `note`/`off`/`cc`/`stopall` argument outside `0..=127`.
    InvalidArgument,
}

/// The host API a script may call from inside `process_event`. All calls
/// carry the context's output channel implicitly; `delta_ms` is added to
/// *now* at the moment of emission.
pub trait Emit {
    fn note(&mut self, pitch: u8, velocity: u8, delta_ms: u32) -> Result<(), ScriptError>;
    fn off(&mut self, pitch: u8, delta_ms: u32) -> Result<(), ScriptError>;
    fn cc(&mut self, controller: u8, value: u8, delta_ms: u32) -> Result<(), ScriptError>;
    fn stopall(&mut self, delta_ms: u32);
    /// Request a visual-feedback pattern on the indicator lamp. Delegated to
    /// the engine; the host API never touches the lamp directly.
    fn led(&mut self, pattern_name: &str, brightness: u8);
}

fn in_range(v: u8) -> Result<(), ScriptError> {
    if v <= 127 {
        Ok(())
    } else {
        Err(ScriptError::InvalidArgument)
    }
}

/// Concrete `Emit` backed by the scheduler and the context's own channel.
/// Constructed fresh for each `process_event` call so a script can never
/// hold state across steps through this seam.
pub struct SchedulerEmit<'a> {
    scheduler: &'a mut Scheduler,
    now_ms: u32,
    channel: u8,
    pub led_request: Option<(String, u8)>,
}

impl<'a> SchedulerEmit<'a> {
    pub fn new(scheduler: &'a mut Scheduler, now_ms: u32, channel: u8) -> Self {
        SchedulerEmit {
            scheduler,
            now_ms,
            channel,
            led_request: None,
        }
    }
}

impl<'a> Emit for SchedulerEmit<'a> {
    fn note(&mut self, pitch: u8, velocity: u8, delta_ms: u32) -> Result<(), ScriptError> {
        in_range(pitch)?;
        in_range(velocity)?;
        self.scheduler
            .note_on(self.now_ms, self.channel, pitch, velocity, delta_ms);
        Ok(())
    }

    fn off(&mut self, pitch: u8, delta_ms: u32) -> Result<(), ScriptError> {
        in_range(pitch)?;
        self.scheduler
            .note_off(self.now_ms, self.channel, pitch, delta_ms);
        Ok(())
    }

    fn cc(&mut self, controller: u8, value: u8, delta_ms: u32) -> Result<(), ScriptError> {
        in_range(controller)?;
        in_range(value)?;
        self.scheduler
            .cc(self.now_ms, self.channel, controller, value, delta_ms);
        Ok(())
    }

    fn stopall(&mut self, delta_ms: u32) {
        self.scheduler
            .all_notes_off(self.now_ms, self.channel, delta_ms);
    }

    fn led(&mut self, pattern_name: &str, brightness: u8) {
        self.led_request = Some((String::from(pattern_name), brightness));
    }
}

/// Opaque handle to one isolated script interpreter instance. The core
/// holds this by value; the interpreter implementation is a private
/// collaborator behind this trait.
pub trait ScriptRuntime: Send {
    fn load(&mut self, source: &str) -> Result<(), ScriptError>;
    fn call_init(&mut self, params: &InitParams) -> Result<(), ScriptError>;
    fn call_process_event(
        &mut self,
        track_index: u8,
        event: ScriptEvent,
        emit: &mut dyn Emit,
    ) -> Result<(), ScriptError>;
    fn set_channel(&mut self, channel: u8);
    fn close(&mut self);

    /// Optional `MODE_NAME` global, for the GUI collaborator.
    fn mode_name(&self) -> Option<String> {
        None
    }

    /// Optional `SLIDER_LABELS` global (up to 4 entries), for the GUI
    /// collaborator.
    fn slider_labels(&self) -> heapless::Vec<String, 4> {
        heapless::Vec::new()
    }
}

/// One script context per mode: the isolated interpreter, its output
/// channel, and debounce bookkeeping for Mode-0-driven reinitialisation.
pub struct ScriptContext {
    runtime: Box<dyn ScriptRuntime>,
    channel: u8,
    valid: bool,
    last_reinit_ms: Option<u32>,
}

/// Reinitialisation (via Mode-0 advance) is debounced to at most once per
/// channel per 100ms.
const REINIT_DEBOUNCE_MS: u32 = 100;

impl ScriptContext {
    pub fn new(runtime: Box<dyn ScriptRuntime>, channel: u8) -> ScriptContext {
        ScriptContext {
            runtime,
            channel,
            valid: false,
            last_reinit_ms: None,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    /// Load source and call `init`. A missing entry point or syntax error
    /// marks the channel invalid: it produces no MIDI until reloaded.
    pub fn load_and_init(&mut self, source: &str, params: InitParams) -> Result<(), ScriptError> {
        self.runtime.set_channel(self.channel);
        self.runtime.load(source)?;
        self.runtime.call_init(&params)?;
        self.valid = true;
        Ok(())
    }

    /// Re-run `init` with new parameters, honoring the 100ms debounce.
    /// Returns `true` if the reinit actually ran.
    pub fn maybe_reinit(&mut self, params: InitParams, now_ms: u32) -> bool {
        if let Some(last) = self.last_reinit_ms {
            if now_ms.wrapping_sub(last) < REINIT_DEBOUNCE_MS {
                return false;
            }
        }
        self.last_reinit_ms = Some(now_ms);
        if self.runtime.call_init(&params).is_err() {
            self.valid = false;
        }
        true
    }

    /// Run `process_event` for one track. A runtime error disables this
    /// channel's output for the current step only; the context remains
    /// loaded and is retried on the next step.
    pub fn process_event(
        &mut self,
        track_index: u8,
        event: ScriptEvent,
        scheduler: &mut Scheduler,
        now_ms: u32,
    ) -> Result<Option<(String, u8)>, ScriptError> {
        if !self.valid {
            return Err(ScriptError::Load);
        }
        let mut emit = SchedulerEmit::new(scheduler, now_ms, self.channel);
        self.runtime.call_process_event(track_index, event, &mut emit)?;
        Ok(emit.led_request)
    }

    pub fn mark_invalid(&mut self) {
        self.valid = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct StubRuntime {
        loaded: bool,
        fail_at_step: Option<u8>,
    }

    impl ScriptRuntime for StubRuntime {
        fn load(&mut self, _source: &str) -> Result<(), ScriptError> {
            self.loaded = true;
            Ok(())
        }

        fn call_init(&mut self, _params: &InitParams) -> Result<(), ScriptError> {
            Ok(())
        }

        fn call_process_event(
            &mut self,
            track_index: u8,
            event: ScriptEvent,
            emit: &mut dyn Emit,
        ) -> Result<(), ScriptError> {
            if Some(track_index) == self.fail_at_step {
                return Err(ScriptError::Runtime);
            }
            if event.switch && track_index == 0 {
                emit.note(36, 100, 0)?;
                emit.off(36, 50)?;
            }
            Ok(())
        }

        fn set_channel(&mut self, _channel: u8) {}
        fn close(&mut self) {}
    }

    fn params() -> InitParams {
        InitParams {
            tempo_bpm: 120,
            channel: 0,
            mode: 1,
            scale_root: None,
            scale_type: None,
            velocity_offset: 0,
        }
    }

    #[test]
    fn drum_step_emits_note_on_and_delayed_off() {
        let mut ctx = ScriptContext::new(Box::new(StubRuntime::default()), 0);
        ctx.load_and_init("", params()).unwrap();
        let mut scheduler = Scheduler::new();
        ctx.process_event(
            0,
            ScriptEvent {
                switch: true,
                pots: [0; 4],
            },
            &mut scheduler,
            0,
        )
        .unwrap();
        assert_eq!(scheduler.len(), 2);
    }

    #[test]
    fn runtime_error_is_isolated_to_current_step() {
        let mut ctx = ScriptContext::new(
            Box::new(StubRuntime {
                loaded: false,
                fail_at_step: Some(7),
            }),
            1,
        );
        ctx.load_and_init("", params()).unwrap();
        let mut scheduler = Scheduler::new();
        let err = ctx
            .process_event(
                7,
                ScriptEvent {
                    switch: true,
                    pots: [0; 4],
                },
                &mut scheduler,
                0,
            )
            .unwrap_err();
        assert_eq!(err, ScriptError::Runtime);
        assert!(ctx.is_valid(), "channel stays loaded after a runtime error");
        assert!(scheduler.is_empty());

        // subsequent steps still get attempted
        ctx.process_event(
            0,
            ScriptEvent {
                switch: true,
                pots: [0; 4],
            },
            &mut scheduler,
            0,
        )
        .unwrap();
        assert_eq!(scheduler.len(), 2);
    }

    #[test]
    fn reinit_is_debounced() {
        let mut ctx = ScriptContext::new(Box::new(StubRuntime::default()), 0);
        ctx.load_and_init("", params()).unwrap();
        assert!(ctx.maybe_reinit(params(), 0));
        assert!(!ctx.maybe_reinit(params(), 50));
        assert!(ctx.maybe_reinit(params(), 150));
    }
}
