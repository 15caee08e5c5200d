//! voxmod real-time voice modulation CLI.
//!
//! Captures mono audio from an input device, runs it through the modulation
//! pipeline (phase vocoder, echo, reverb, gain control), and plays the
//! result on an output device. Parameters are changed live from stdin.
//!
//! # Commands
//!
//! | Command        | Description                                  |
//! |----------------|----------------------------------------------|
//! | `pitch <f>`    | Pitch factor, 0.25..4.0                      |
//! | `speed <f>`    | Speed factor, 0.5..2.0                       |
//! | `echo <f> [d]` | Echo intensity 0..1, optional delay samples  |
//! | `reverb <f>`   | Reverb intensity 0..1                        |
//! | `show`         | Print the current parameter snapshot         |
//! | `quit`         | Stop the session and exit                    |

use clap::Parser;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use std::io::BufRead;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use voxmod::audio::{self, list_input_devices, list_output_devices};
use voxmod::params::ModulationParams;
use voxmod::{Session, SessionConfig, VoxmodError};

/// Command-line arguments for the voxmod engine.
#[derive(Parser)]
#[command(name = "voxmod")]
#[command(about = "Real-time voice modulation engine", long_about = None)]
struct Args {
    /// Sample rate in Hz.
    #[arg(long, default_value = "44100")]
    sample_rate: u32,

    /// Analysis frame size in samples (power of two).
    #[arg(long, default_value = "1024")]
    frame_size: usize,

    /// Input device (name or index).
    #[arg(short, long)]
    input_device: Option<String>,

    /// Output device (name or index).
    #[arg(short, long)]
    output_device: Option<String>,

    /// Initial modulation parameters as JSON, e.g.
    /// '{"pitch_factor":2.0,"echo_intensity":0.3}'.
    #[arg(long)]
    params: Option<String>,

    /// List available audio devices and exit.
    #[arg(long)]
    list_devices: bool,
}

fn print_devices() {
    println!("Input devices:");
    for info in list_input_devices() {
        let marker = if info.is_default { " *" } else { "" };
        println!("  {}: {}{}", info.index, info.name, marker);
    }

    println!("\nOutput devices:");
    for info in list_output_devices() {
        let marker = if info.is_default { " *" } else { "" };
        println!("  {}: {}{}", info.index, info.name, marker);
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if args.list_devices {
        print_devices();
        return;
    }

    if let Err(err) = run(args) {
        log::error!("{err}");
        std::process::exit(err.exit_code());
    }
}

fn run(args: Args) -> Result<(), VoxmodError> {
    let config = SessionConfig::new()
        .with_sample_rate(args.sample_rate)
        .with_frame_size(args.frame_size);
    let config = match args.input_device {
        Some(ref dev) => config.with_input_device(dev.clone()),
        None => config,
    };
    let config = match args.output_device {
        Some(ref dev) => config.with_output_device(dev.clone()),
        None => config,
    };
    config.validate()?;

    let initial = match args.params {
        Some(ref json) => serde_json::from_str::<ModulationParams>(json)
            .map_err(|e| VoxmodError::Config(format!("bad --params JSON: {e}")))?,
        None => ModulationParams::defaults_for(config.sample_rate),
    };

    let running = Arc::new(AtomicBool::new(true));
    let (_in_guard, capture) = audio::open_input(
        config.input_device.as_deref(),
        config.sample_rate,
        config.frame_size,
        Arc::clone(&running),
    )?;
    let (_out_guard, playback) = audio::open_output(
        config.output_device.as_deref(),
        config.sample_rate,
        config.frame_size,
        Arc::clone(&running),
    )?;

    println!(
        "voxmod: {} Hz, frame {} ({} ms latency)",
        config.sample_rate,
        config.frame_size,
        config.frame_duration().as_millis()
    );

    let session = Session::start(
        config.clone(),
        Box::new(capture),
        Box::new(playback),
        running,
    )?;
    let channel = session.params();
    channel.publish(initial)?;

    println!("Type 'pitch 2.0', 'echo 0.5', 'show', 'quit'. Ctrl-D exits.");

    let commands = spawn_stdin_reader();
    let mut current = initial.clamped(config.sample_rate);

    loop {
        if !session.is_running() {
            break;
        }
        match commands.recv_timeout(Duration::from_millis(100)) {
            Ok(line) => {
                if !handle_command(&line, &mut current, &channel) {
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            // stdin closed.
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    let metrics = session.metrics();
    let result = session.stop();

    println!(
        "session: {} hops, {} underruns, {} overruns, mean DSP load {:.1}%",
        metrics.hops_processed(),
        metrics.underruns(),
        metrics.overruns(),
        metrics.dsp_load() * 100.0
    );

    result
}

/// Forwards stdin lines over a channel so the main loop can also watch the
/// session for errors. The reader thread exits when stdin closes.
fn spawn_stdin_reader() -> Receiver<String> {
    let (tx, rx) = bounded::<String>(16);
    thread::Builder::new()
        .name("control".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        })
        .expect("failed to spawn control thread");
    rx
}

/// Applies one control command. Returns false when the session should end.
fn handle_command(
    line: &str,
    current: &mut ModulationParams,
    channel: &voxmod::ParamChannel,
) -> bool {
    let mut parts = line.split_whitespace();
    let Some(command) = parts.next() else {
        return true;
    };

    let next = match command {
        "pitch" => match parts.next().and_then(|v| v.parse().ok()) {
            Some(value) => Some(ModulationParams {
                pitch_factor: value,
                ..*current
            }),
            None => {
                println!("usage: pitch <factor>");
                None
            }
        },
        "speed" => match parts.next().and_then(|v| v.parse().ok()) {
            Some(value) => Some(ModulationParams {
                speed_factor: value,
                ..*current
            }),
            None => {
                println!("usage: speed <factor>");
                None
            }
        },
        "echo" => match parts.next().and_then(|v| v.parse().ok()) {
            Some(value) => {
                let delay = parts.next().and_then(|v| v.parse().ok());
                Some(ModulationParams {
                    echo_intensity: value,
                    echo_delay_samples: delay.unwrap_or(current.echo_delay_samples),
                    ..*current
                })
            }
            None => {
                println!("usage: echo <intensity> [delay-samples]");
                None
            }
        },
        "reverb" => match parts.next().and_then(|v| v.parse().ok()) {
            Some(value) => Some(ModulationParams {
                reverb_intensity: value,
                ..*current
            }),
            None => {
                println!("usage: reverb <intensity>");
                None
            }
        },
        "show" => {
            println!(
                "pitch {:.2}  speed {:.2}  echo {:.2} @ {}  reverb {:.2}",
                current.pitch_factor,
                current.speed_factor,
                current.echo_intensity,
                current.echo_delay_samples,
                current.reverb_intensity
            );
            None
        }
        "quit" | "exit" => return false,
        other => {
            println!("unknown command: {other}");
            None
        }
    };

    if let Some(params) = next {
        match channel.publish(params) {
            Ok(version) => {
                *current = params.clamped(channel.sample_rate());
                println!("ok (v{version})");
            }
            Err(err) => println!("rejected: {err}"),
        }
    }
    true
}
