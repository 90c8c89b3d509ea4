//! Desktop host binary for `groovebox_core`: a terminal-driven `HardwareIo`
//! and a `midir` `MidiSink`, wired together to prove the engine runs end to
//! end as an external collaborator, not part of the core. Not a GUI — this
//! is a minimal harness to drive and observe the engine over a text
//! console.

mod commands;
mod hardware;

use std::fs;
use std::path::PathBuf;
use std::sync::mpsc::Receiver;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use midir::{MidiOutput, MidiOutputConnection};

use groovebox_core::scheduler::SinkBusy;
use groovebox_core::song::{Song, MODE_COUNT};
use groovebox_core::{Engine, MidiSink};
use groovebox_script::RhaiScriptRuntime;

use commands::{Command, HELP_TEXT};
use hardware::SimHardware;

#[derive(Parser, Debug)]
#[command(
    name = "groovebox_sim",
    version,
    about = "Desktop simulator host for the groovebox playback engine"
)]
struct Cli {
    /// Song document (JSON) to load at startup.
    #[arg(long)]
    song: Option<PathBuf>,

    /// Directory containing one script per mode, named `mode_0.rhai` ..
    /// `mode_14.rhai`. Modes with no file present run with no script loaded
    /// (silent).
    #[arg(long)]
    scripts: Option<PathBuf>,

    /// Starting tempo in BPM, 1..=1000.
    #[arg(long, default_value_t = 120)]
    tempo: u16,

    /// Name of the MIDI output port to connect to. Defaults to the first
    /// available port.
    #[arg(long)]
    midi_port: Option<String>,

    /// List available MIDI output ports and exit.
    #[arg(long, default_value_t = false)]
    list_midi_ports: bool,
}

struct MidirSink {
    conn: MidiOutputConnection,
}

impl MidiSink for MidirSink {
    fn send(&mut self, payload: &[u8], _timestamp_ms: u32) -> Result<(), SinkBusy> {
        self.conn.send(payload).map_err(|_| SinkBusy)
    }
}

fn open_midi_output(port_name: Option<&str>) -> Result<MidirSink> {
    let midi_out = MidiOutput::new("groovebox_sim")?;
    let ports = midi_out.ports();
    if ports.is_empty() {
        anyhow::bail!("no MIDI output ports available");
    }
    let port = match port_name {
        Some(name) => ports
            .iter()
            .find(|p| midi_out.port_name(p).map(|n| n == name).unwrap_or(false))
            .with_context(|| format!("no MIDI output port named {name:?}"))?,
        None => &ports[0],
    };
    let chosen_name = midi_out.port_name(port).unwrap_or_else(|_| "unknown".to_string());
    log::info!("connected to MIDI output: {chosen_name}");
    let conn = midi_out
        .connect(port, "groovebox_sim")
        .map_err(|e| anyhow::anyhow!("failed to connect to MIDI port: {e}"))?;
    Ok(MidirSink { conn })
}

fn list_midi_ports() -> Result<()> {
    let midi_out = MidiOutput::new("groovebox_sim")?;
    for port in midi_out.ports() {
        println!("{}", midi_out.port_name(&port).unwrap_or_default());
    }
    Ok(())
}

fn script_path(dir: &std::path::Path, mode: u8) -> PathBuf {
    dir.join(format!("mode_{mode}.rhai"))
}

fn load_scripts(engine: &mut Engine, scripts_dir: &std::path::Path) {
    for mode in 0..MODE_COUNT as u8 {
        let path = script_path(scripts_dir, mode);
        let source = match fs::read_to_string(&path) {
            Ok(s) => s,
            Err(_) => continue,
        };
        // Mode 0 (the song director) never emits MIDI; desktop hosts get
        // the full Rhai standard library, unlike the embedded sandbox.
        let runtime = Box::new(RhaiScriptRuntime::new(true));
        if engine.load_script(mode, runtime, &source).is_err() {
            log::warn!("mode {mode} failed to load from {}", path.display());
        }
    }
}

fn handle_command(
    cmd: Command,
    engine: &mut Engine,
    hw: &mut SimHardware,
    sink: &mut MidirSink,
    scripts_dir: &Option<PathBuf>,
    now_ms: u32,
) -> bool {
    match cmd {
        Command::Press(i) => hw.press_button(i),
        Command::Rotary(i, v) => hw.set_rotary(i, v),
        Command::Slider(i, v) => hw.set_slider(i, v),
        Command::Select(mode, pattern, track) => {
            if let Err(e) = engine.set_selection(mode, pattern, track) {
                log::warn!("select rejected: {e:?}");
            }
        }
        Command::Start => engine.start(now_ms),
        Command::Stop => engine.stop(now_ms, sink),
        Command::Save(path) => {
            let doc = groovebox_persist::save(engine.song(), "groovebox_sim song", engine.current_tempo_bpm());
            match fs::write(&path, doc) {
                Ok(()) => log::info!("saved to {path}"),
                Err(e) => log::error!("save failed: {e}"),
            }
        }
        Command::Load(path) => match fs::read_to_string(&path) {
            Ok(text) => match groovebox_persist::load(&text, engine.song_mut()) {
                Ok(outcome) => log::info!(
                    "loaded {path}: name={:?} tempo={} skipped={}",
                    outcome.name,
                    outcome.tempo,
                    outcome.skipped
                ),
                Err(e) => log::error!("load rejected: {e:?}"),
            },
            Err(e) => log::error!("could not read {path}: {e}"),
        },
        Command::ReloadMode(mode) => {
            if let Some(dir) = scripts_dir {
                let path = script_path(dir, mode);
                match fs::read_to_string(&path) {
                    Ok(source) => {
                        let runtime = Box::new(RhaiScriptRuntime::new(true));
                        if engine.reload_mode(mode, runtime, &source).is_err() {
                            log::warn!("mode {mode} failed to reload");
                        } else {
                            log::info!("mode {mode} reloaded from {}", path.display());
                        }
                    }
                    Err(e) => log::error!("could not read {}: {e}", path.display()),
                }
            } else {
                log::warn!("no --scripts directory configured, nothing to reload from");
            }
        }
        Command::Help => println!("{HELP_TEXT}"),
        Command::Quit => return false,
    }
    true
}

fn drain_commands(
    rx: &Receiver<Command>,
    engine: &mut Engine,
    hw: &mut SimHardware,
    sink: &mut MidirSink,
    scripts_dir: &Option<PathBuf>,
    now_ms: u32,
) -> bool {
    let mut keep_running = true;
    while let Ok(cmd) = rx.try_recv() {
        if !handle_command(cmd, engine, hw, sink, scripts_dir, now_ms) {
            keep_running = false;
        }
    }
    keep_running
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    if cli.list_midi_ports {
        return list_midi_ports();
    }

    let mut song = Song::new();
    if let Some(path) = &cli.song {
        let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let outcome = groovebox_persist::load(&text, &mut song)
            .map_err(|e| anyhow::anyhow!("could not load song: {e:?}"))?;
        log::info!(
            "loaded song {:?}: name={:?} skipped={}",
            path,
            outcome.name,
            outcome.skipped
        );
    }

    let mut engine = Engine::new(song);
    engine.set_tempo(cli.tempo);

    if let Some(dir) = &cli.scripts {
        load_scripts(&mut engine, dir);
    }

    let mut hw = SimHardware::new();
    let mut sink = open_midi_output(cli.midi_port.as_deref())?;
    let rx = commands::spawn_stdin_reader();

    println!("{HELP_TEXT}");
    println!("engine running at {} BPM; type `start` to begin playback.", cli.tempo);

    let start = Instant::now();
    loop {
        let now_ms = start.elapsed().as_millis() as u32;
        if !drain_commands(&rx, &mut engine, &mut hw, &mut sink, &cli.scripts, now_ms) {
            break;
        }
        engine.update(now_ms, &mut hw, &mut sink);
        for event in engine.errors() {
            log::warn!("engine event: {event:?}");
        }
        std::thread::sleep(Duration::from_millis(1));
    }

    engine.stop(start.elapsed().as_millis() as u32, &mut sink);
    Ok(())
}
