//! aurisd: foreground daemon for the auris microphone-array pipeline
//!
//! Loads the YAML configuration, builds the cpal-backed capture and
//! playback devices, runs the pipeline and prints the live location
//! estimate once per second. Intended to run under a service manager;
//! it shuts down cleanly when stdin closes or `quit` is entered.
//!
//! ## Command line
//!
//! - `--config PATH`  configuration file (default: `auris.yaml`)
//! - `--volume LEVEL` override the configured output volume (0.0-1.0)
//! - `--version`      print the library version and exit

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use auris_core::backend::{CpalCapture, CpalSink};
use auris_core::config::load_config;
use auris_core::{ArrayConfig, Pipeline};

struct Options {
    config_path: PathBuf,
    volume: Option<f32>,
}

fn parse_args() -> Result<Option<Options>> {
    let mut options = Options {
        config_path: PathBuf::from("auris.yaml"),
        volume: None,
    };

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let value = args.next().context("--config requires a path")?;
                options.config_path = PathBuf::from(value);
            }
            "--volume" | "-v" => {
                let value = args.next().context("--volume requires a level")?;
                let volume: f32 = value.parse().context("--volume expects a number")?;
                if !(0.0..=1.0).contains(&volume) {
                    bail!("volume must be between 0.0 and 1.0");
                }
                options.volume = Some(volume);
            }
            "--version" => {
                println!("aurisd {}", auris_core::VERSION);
                return Ok(None);
            }
            "--help" | "-h" => {
                println!("Usage: aurisd [--config PATH] [--volume LEVEL] [--version]");
                return Ok(None);
            }
            other => bail!("unknown argument '{other}'"),
        }
    }
    Ok(Some(options))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let Some(options) = parse_args()? else {
        return Ok(());
    };

    log::info!("aurisd {} starting up", auris_core::VERSION);

    let config: ArrayConfig = load_config(&options.config_path);
    config
        .validate()
        .with_context(|| format!("invalid configuration in {:?}", options.config_path))?;

    let capture = CpalCapture::new(config.input_device.clone());
    let sink = CpalSink::new(config.output_device.clone());
    let mut pipeline = Pipeline::new(config, Box::new(capture), Box::new(sink))
        .context("failed to initialise pipeline")?;

    if let Some(volume) = options.volume {
        pipeline.set_volume(volume)?;
        log::info!("Volume overridden to {volume:.2}");
    }

    pipeline.start().context("failed to start pipeline")?;
    println!("Microphone array running; type 'quit' or close stdin to stop.");

    // Watch stdin so a service manager closing the pipe stops us cleanly
    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = Arc::clone(&shutdown);
        std::thread::spawn(move || {
            let mut line = String::new();
            loop {
                line.clear();
                match std::io::stdin().read_line(&mut line) {
                    Ok(0) => break,
                    Ok(_) if line.trim() == "quit" => break,
                    Ok(_) => {}
                    Err(_) => break,
                }
            }
            shutdown.store(true, Ordering::Release);
        });
    }

    let location_handle = pipeline.location_handle();
    while !shutdown.load(Ordering::Acquire) {
        let location = location_handle.get();
        println!(
            "location: x={:+.3} y={:+.3} z={:+.3} confidence={:.2}",
            location.x, location.y, location.z, location.confidence
        );
        std::thread::sleep(Duration::from_secs(1));
    }

    println!("Shutting down...");
    pipeline.stop().context("failed to stop pipeline")?;
    pipeline.cleanup().context("failed to clean up pipeline")?;
    println!("Shutdown complete.");
    Ok(())
}
