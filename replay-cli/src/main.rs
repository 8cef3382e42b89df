//! Command-line driver for the replay engine.
//!
//! Runs a session against the virtual backend so the whole pipeline can be
//! exercised without capture hardware:
//!
//! ```text
//! replay record --seconds 5 --output-dir ./clips
//! replay inspect ./clips/Replay_2024-03-07_21-30-09.mkv
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use crossbeam_channel::RecvTimeoutError;

use replay_core::storage::atomic_writer::sha256_file;
use replay_core::storage::metadata;
use replay_core::{
    CaptureConfig, ReplayFile, ReplayMuxer, SessionController, SourceBackend, SourceRegistry,
    StatusEvent, VirtualBackend,
};

#[derive(Parser)]
#[command(name = "replay")]
#[command(about = "Replay buffer engine driven by virtual sources")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Record into the replay buffer and save it.
    Record {
        /// JSON configuration file; defaults are used when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Seconds to record before each save
        #[arg(short, long, default_value = "5")]
        seconds: u64,

        /// Number of saves
        #[arg(long, default_value = "1")]
        saves: u32,

        /// Overrides the configured output directory
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Report this application as full-screen (desktop file id or title)
        #[arg(long)]
        app: Option<String>,
    },

    /// List the sources the virtual backend exposes.
    Sources,

    /// Print a saved replay's manifest and verify its checksum.
    Inspect { path: PathBuf },

    /// Print the default configuration as JSON.
    DefaultConfig,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match Args::parse().command {
        Command::Record {
            config,
            seconds,
            saves,
            output_dir,
            app,
        } => record(config, seconds, saves, output_dir, app),
        Command::Sources => list_sources(),
        Command::Inspect { path } => inspect(&path),
        Command::DefaultConfig => {
            println!("{}", CaptureConfig::default().to_json_string()?);
            Ok(())
        }
    }
}

fn record(
    config_path: Option<PathBuf>,
    seconds: u64,
    saves: u32,
    output_dir: Option<PathBuf>,
    app: Option<String>,
) -> Result<()> {
    let mut config = match config_path {
        Some(path) => CaptureConfig::load_json(&path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => CaptureConfig::default(),
    };
    if let Some(dir) = output_dir {
        config.output_directory = dir;
    }

    let backend = Arc::new(VirtualBackend::with_demo_sources());
    let registry = Arc::new(SourceRegistry::new(backend));
    let controller = SessionController::new(registry, Arc::new(ReplayMuxer::new()));
    if let Some(app) = app {
        controller.active_window().set_active_window(&app, &app, true);
    }
    let events = controller.status_events();

    controller.start(config).context("starting session")?;
    log::info!("Recording into {}", controller_output(&controller));

    let mut saved = 0;
    for _ in 0..saves {
        thread::sleep(Duration::from_secs(seconds));
        controller.trigger().context("triggering save")?;

        loop {
            match events.recv_timeout(Duration::from_secs(30)) {
                Ok(StatusEvent::FlushSucceeded(artifact)) => {
                    println!(
                        "{}  {:.1}s  {} tracks  sha256:{}",
                        artifact.path.display(),
                        artifact.duration_secs,
                        artifact.track_manifest.len(),
                        artifact.checksum
                    );
                    saved += 1;
                    break;
                }
                Ok(StatusEvent::FlushFailed(e)) => {
                    log::error!("Save failed: {}", e);
                    break;
                }
                Ok(event) => log::info!("{:?}", event),
                Err(RecvTimeoutError::Timeout) => bail!("timed out waiting for the save"),
                Err(RecvTimeoutError::Disconnected) => bail!("status channel closed"),
            }
        }
    }

    let diagnostics = controller.diagnostics();
    for (id, source) in &diagnostics.sources {
        log::info!(
            "{}: {} units, {} dropped, peak {:.2}{}",
            id,
            source.units,
            source.dropped,
            source.peak_level,
            if source.lost { ", lost" } else { "" }
        );
    }
    controller.stop()?;

    if saved < saves {
        bail!("{} of {} saves failed", saves - saved, saves);
    }
    Ok(())
}

fn controller_output(controller: &SessionController) -> String {
    controller
        .config()
        .map(|c| c.output_directory.display().to_string())
        .unwrap_or_default()
}

fn list_sources() -> Result<()> {
    let backend = VirtualBackend::with_demo_sources();
    for source in backend.enumerate()? {
        println!(
            "{:<10} {:<18} {}{}",
            source.id,
            format!("{:?}", source.kind),
            source.display_name,
            if source.is_default { " (default)" } else { "" }
        );
    }
    Ok(())
}

fn inspect(path: &std::path::Path) -> Result<()> {
    let file = ReplayFile::read(path).with_context(|| format!("reading {}", path.display()))?;
    let manifest = &file.manifest;
    println!(
        "{:?} {:?} {:?} @ {} fps, {:.2}s",
        manifest.container,
        manifest.codec,
        manifest.quality,
        manifest.framerate,
        manifest.duration_us as f64 / 1_000_000.0
    );
    for track in &manifest.tracks {
        println!(
            "  {} {:?} [{}] {} records",
            track.stream_id,
            track.kind,
            track.sources.join(", "),
            file.stream(track.stream_id).count()
        );
    }

    let checksum = sha256_file(path)?;
    match metadata::read_metadata(path) {
        Ok(artifact) if artifact.checksum == checksum => println!("checksum ok"),
        Ok(artifact) => bail!("checksum mismatch: {} != {}", checksum, artifact.checksum),
        Err(_) => println!("sha256:{}", checksum),
    }
    Ok(())
}
