//! Rhai-backed `ScriptRuntime`: one sandboxed interpreter instance per
//! channel. The host API is registered as four plain native functions
//! (`note`/`off`/`cc`/`stopall`, plus optional `led`) rather than exposed
//! through any callback/object embedding. Each call drains into a scratch
//! buffer owned by the runtime, which is validated and forwarded to the
//! engine's `Emit` seam only once the whole step has evaluated cleanly.

use std::cell::RefCell;
use std::rc::Rc;

use groovebox_core::script::{Emit, InitParams, ScriptError, ScriptEvent, ScriptRuntime};
use rhai::{Dynamic, Engine, Map, Scope, AST};

/// One host-API call recorded by a script during `process_event`, queued
/// until the whole step evaluates without error.
#[derive(Clone, Debug)]
enum Emitted {
    Note { pitch: i64, velocity: i64, delta_ms: i64 },
    Off { pitch: i64, delta_ms: i64 },
    Cc { controller: i64, value: i64, delta_ms: i64 },
    StopAll { delta_ms: i64 },
    Led { pattern: String, brightness: i64 },
}

type Scratch = Rc<RefCell<Vec<Emitted>>>;

fn register_host_api(engine: &mut Engine, scratch: &Scratch) {
    let buf = scratch.clone();
    engine.register_fn("note", move |pitch: i64, velocity: i64| {
        buf.borrow_mut().push(Emitted::Note { pitch, velocity, delta_ms: 0 });
    });
    let buf = scratch.clone();
    engine.register_fn("note", move |pitch: i64, velocity: i64, delta_ms: i64| {
        buf.borrow_mut().push(Emitted::Note { pitch, velocity, delta_ms });
    });

    let buf = scratch.clone();
    engine.register_fn("off", move |pitch: i64| {
        buf.borrow_mut().push(Emitted::Off { pitch, delta_ms: 0 });
    });
    let buf = scratch.clone();
    engine.register_fn("off", move |pitch: i64, delta_ms: i64| {
        buf.borrow_mut().push(Emitted::Off { pitch, delta_ms });
    });

    let buf = scratch.clone();
    engine.register_fn("cc", move |controller: i64, value: i64| {
        buf.borrow_mut().push(Emitted::Cc { controller, value, delta_ms: 0 });
    });
    let buf = scratch.clone();
    engine.register_fn("cc", move |controller: i64, value: i64, delta_ms: i64| {
        buf.borrow_mut().push(Emitted::Cc { controller, value, delta_ms });
    });

    let buf = scratch.clone();
    engine.register_fn("stopall", move || {
        buf.borrow_mut().push(Emitted::StopAll { delta_ms: 0 });
    });
    let buf = scratch.clone();
    engine.register_fn("stopall", move |delta_ms: i64| {
        buf.borrow_mut().push(Emitted::StopAll { delta_ms });
    });

    let buf = scratch.clone();
    engine.register_fn("led", move |pattern: &str| {
        buf.borrow_mut().push(Emitted::Led {
            pattern: pattern.to_string(),
            brightness: 255,
        });
    });
    let buf = scratch.clone();
    engine.register_fn("led", move |pattern: &str, brightness: i64| {
        buf.borrow_mut().push(Emitted::Led {
            pattern: pattern.to_string(),
            brightness,
        });
    });
}

/// Build the interpreter's sandbox. `full_std` pulls in Rhai's full default
/// package set (string/array/map/math/time/closures) — fine for
/// `groovebox_sim` on desktop. Without it, only the base, table (array/map),
/// string and math packages are registered: an embedded sandbox with no
/// I/O, no OS, no dynamic code loading.
fn build_engine(full_std: bool) -> Engine {
    if full_std {
        return Engine::new();
    }

    use rhai::packages::{
        ArithmeticPackage, BasicArrayPackage, BasicMapPackage, BasicMathPackage,
        BasicStringPackage, CorePackage, LogicPackage, Package,
    };

    let mut engine = Engine::new_raw();
    engine.register_global_module(CorePackage::new().as_shared_module());
    engine.register_global_module(LogicPackage::new().as_shared_module());
    engine.register_global_module(ArithmeticPackage::new().as_shared_module());
    engine.register_global_module(BasicMathPackage::new().as_shared_module());
    engine.register_global_module(BasicArrayPackage::new().as_shared_module());
    engine.register_global_module(BasicMapPackage::new().as_shared_module());
    engine.register_global_module(BasicStringPackage::new().as_shared_module());
    engine
}

fn event_to_map(event: ScriptEvent) -> Map {
    let mut map = Map::new();
    map.insert("switch".into(), Dynamic::from(event.switch));
    let pots: rhai::Array = event.pots.iter().map(|&p| Dynamic::from(p as i64)).collect();
    map.insert("pots".into(), Dynamic::from(pots));
    map
}

fn init_params_to_map(params: &InitParams) -> Map {
    let mut map = Map::new();
    map.insert("tempo".into(), Dynamic::from(params.tempo_bpm as i64));
    map.insert("channel".into(), Dynamic::from(params.channel as i64));
    map.insert("mode".into(), Dynamic::from(params.mode as i64));
    map.insert(
        "scale_root".into(),
        params.scale_root.map(|v| Dynamic::from(v as i64)).unwrap_or(Dynamic::UNIT),
    );
    map.insert(
        "scale_type".into(),
        params.scale_type.map(|v| Dynamic::from(v as i64)).unwrap_or(Dynamic::UNIT),
    );
    map.insert(
        "velocity_offset".into(),
        Dynamic::from(params.velocity_offset as i64),
    );
    map
}

fn has_entry_point(ast: &AST, name: &str, arity: usize) -> bool {
    ast.iter_functions()
        .any(|f| f.name == name && f.params.len() == arity)
}

/// One isolated Rhai interpreter instance, plus the bits of per-context
/// bookkeeping this binding needs (scope, the shared scratch buffer, cached
/// `MODE_NAME`/`SLIDER_LABELS` globals).
pub struct RhaiScriptRuntime {
    engine: Engine,
    ast: Option<AST>,
    scope: Scope<'static>,
    scratch: Scratch,
    channel: u8,
    mode_name: Option<String>,
    slider_labels: heapless::Vec<String, 4>,
}

impl RhaiScriptRuntime {
    /// `full_std` selects the sandbox tier: `false` for the embedded target
    /// (base/table/string/math only), `true` for desktop hosts.
    pub fn new(full_std: bool) -> RhaiScriptRuntime {
        let scratch: Scratch = Rc::new(RefCell::new(Vec::new()));
        let mut engine = build_engine(full_std);
        register_host_api(&mut engine, &scratch);
        RhaiScriptRuntime {
            engine,
            ast: None,
            scope: Scope::new(),
            scratch,
            channel: 0,
            mode_name: None,
            slider_labels: heapless::Vec::new(),
        }
    }

    fn read_optional_globals(&mut self) {
        self.mode_name = self
            .scope
            .get_value::<String>("MODE_NAME")
            .or_else(|| self.scope.get_value::<rhai::ImmutableString>("MODE_NAME").map(|s| s.to_string()));

        self.slider_labels.clear();
        if let Some(array) = self.scope.get_value::<rhai::Array>("SLIDER_LABELS") {
            for item in array.into_iter().take(4) {
                if let Ok(s) = item.into_string() {
                    let _ = self.slider_labels.push(s);
                }
            }
        }
    }

    /// Validate and forward every buffered call from one `process_event`
    /// evaluation to `emit`. On the first invalid argument, nothing emitted
    /// so far is forwarded — the whole step's output is discarded.
    fn flush_scratch(&self, emit: &mut dyn Emit) -> Result<(), ScriptError> {
        let calls = std::mem::take(&mut *self.scratch.borrow_mut());
        let as_u8 = |v: i64| -> Result<u8, ScriptError> {
            u8::try_from(v).map_err(|_| ScriptError::InvalidArgument)
        };
        let as_delta = |v: i64| -> Result<u32, ScriptError> {
            u32::try_from(v).map_err(|_| ScriptError::InvalidArgument)
        };

        // Pass 1: validate everything before emitting anything.
        for call in &calls {
            match call {
                Emitted::Note { pitch, velocity, delta_ms } => {
                    as_u8(*pitch)?;
                    as_u8(*velocity)?;
                    as_delta(*delta_ms)?;
                }
                Emitted::Off { pitch, delta_ms } => {
                    as_u8(*pitch)?;
                    as_delta(*delta_ms)?;
                }
                Emitted::Cc { controller, value, delta_ms } => {
                    as_u8(*controller)?;
                    as_u8(*value)?;
                    as_delta(*delta_ms)?;
                }
                Emitted::StopAll { delta_ms } => {
                    as_delta(*delta_ms)?;
                }
                Emitted::Led { brightness, .. } => {
                    as_u8(*brightness)?;
                }
            }
        }

        // Pass 2: every call is known-valid, so `Emit`'s own range checks
        // cannot fail here.
        for call in calls {
            match call {
                Emitted::Note { pitch, velocity, delta_ms } => {
                    emit.note(as_u8(pitch)?, as_u8(velocity)?, as_delta(delta_ms)?)?;
                }
                Emitted::Off { pitch, delta_ms } => {
                    emit.off(as_u8(pitch)?, as_delta(delta_ms)?)?;
                }
                Emitted::Cc { controller, value, delta_ms } => {
                    emit.cc(as_u8(controller)?, as_u8(value)?, as_delta(delta_ms)?)?;
                }
                Emitted::StopAll { delta_ms } => {
                    emit.stopall(as_delta(delta_ms)?);
                }
                Emitted::Led { pattern, brightness } => {
                    emit.led(&pattern, as_u8(brightness)?);
                }
            }
        }
        Ok(())
    }
}

impl ScriptRuntime for RhaiScriptRuntime {
    fn load(&mut self, source: &str) -> Result<(), ScriptError> {
        let ast = self.engine.compile(source).map_err(|e| {
            log::warn!("[script] compile error: {e}");
            ScriptError::Load
        })?;
        if !has_entry_point(&ast, "init", 1) || !has_entry_point(&ast, "process_event", 2) {
            log::warn!("[script] missing required entry point (init/process_event)");
            return Err(ScriptError::Load);
        }
        self.scope = Scope::new();
        // run top-level statements once so `const MODE_NAME = ...` and
        // `const SLIDER_LABELS = [...]` land in the persistent scope.
        self.engine
            .run_ast_with_scope(&mut self.scope, &ast)
            .map_err(|e| {
                log::warn!("[script] top-level eval error: {e}");
                ScriptError::Load
            })?;
        self.read_optional_globals();
        self.ast = Some(ast);
        Ok(())
    }

    fn call_init(&mut self, params: &InitParams) -> Result<(), ScriptError> {
        let ast = self.ast.as_ref().ok_or(ScriptError::Load)?;
        let ctx = init_params_to_map(params);
        self.engine
            .call_fn::<()>(&mut self.scope, ast, "init", (ctx,))
            .map_err(|_| ScriptError::Runtime)
    }

    fn call_process_event(
        &mut self,
        track_index: u8,
        event: ScriptEvent,
        emit: &mut dyn Emit,
    ) -> Result<(), ScriptError> {
        let ast = self.ast.as_ref().ok_or(ScriptError::Load)?;
        self.scratch.borrow_mut().clear();
        let event_map = event_to_map(event);
        let result = self.engine.call_fn::<()>(
            &mut self.scope,
            ast,
            "process_event",
            (track_index as i64, event_map),
        );
        if let Err(e) = result {
            log::warn!(
                "[script] process_event error on channel {}, track {}: {e}",
                self.channel,
                track_index,
            );
            self.scratch.borrow_mut().clear();
            return Err(ScriptError::Runtime);
        }
        self.flush_scratch(emit)
    }

    fn set_channel(&mut self, channel: u8) {
        self.channel = channel;
    }

    fn close(&mut self) {
        self.ast = None;
        self.scope = Scope::new();
        self.scratch.borrow_mut().clear();
    }

    fn mode_name(&self) -> Option<String> {
        self.mode_name.clone()
    }

    fn slider_labels(&self) -> heapless::Vec<String, 4> {
        self.slider_labels.clone()
    }
}
