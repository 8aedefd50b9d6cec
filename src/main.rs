//! # Waver
//!
//! Gapless, crossfaded local playback engine (see `lib.rs` for the
//! architecture overview). This binary wires the pieces together: load
//! config, open an output device, build the configured source plugins,
//! run the Coordinator's supervisory loop, and serve the IPC control
//! surface alongside it.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use waver::config::EngineConfig;
use waver::coordinator::Coordinator;
use waver::events::CoordinatorCommand;
use waver::output::AudioOutput;
use waver::plugin::SourcePlugin;
use waver::source::LocalDirectorySource;

#[derive(Parser, Debug)]
#[command(name = "waver")]
#[command(about = "Gapless, crossfaded local playback engine")]
#[command(version)]
struct Args {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory to scan as the local-file source (§4.1 scheduling policy
    /// grants this startup priority over network sources).
    #[arg(short, long)]
    root: Option<PathBuf>,

    /// Output device name override (matches a name from `--list-devices`).
    #[arg(short, long)]
    device: Option<String>,

    /// Print available output devices and exit.
    #[arg(long)]
    list_devices: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "waver=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    if args.list_devices {
        for name in AudioOutput::list_devices()? {
            println!("{name}");
        }
        return Ok(());
    }

    info!("starting waver playback engine");

    let mut config = EngineConfig::load(args.config.as_ref()).await?;
    if let Some(device) = args.device.clone() {
        config.output_device = Some(device);
    }

    let mut sources: Vec<Arc<dyn SourcePlugin>> = Vec::new();
    if let Some(root) = args.root.clone() {
        sources.push(Arc::new(LocalDirectorySource::scan(&root)));
    }

    let output = AudioOutput::open(config.output_device.as_deref(), 44_100 * 2)?;
    info!(device = output.device_name(), "output device opened");

    let control_port = config.control_port;
    let (coordinator, handle) =
        Coordinator::new(config, sources, output, tokio::runtime::Handle::current());

    let ipc_commands = handle.commands.clone();
    let ipc_task = tokio::spawn(waver::ipc::run(control_port, ipc_commands, handle.events));

    // Prime the queue immediately: ask every configured source for its
    // opening playlist rather than waiting for the first empty-queue tick.
    let _ = handle.commands.send(CoordinatorCommand::RequestPlaylistMore { min_count: 4 });

    let coordinator_task = tokio::spawn(coordinator.run());

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
        result = coordinator_task => {
            if let Err(e) = result {
                error!(error = %e, "coordinator task panicked");
            }
        }
        result = ipc_task => {
            match result {
                Err(e) => error!(error = %e, "ipc task panicked"),
                Ok(Err(e)) => error!(error = %e, "ipc control surface failed"),
                Ok(Ok(())) => {}
            }
        }
    }

    info!("waver shutting down");
    Ok(())
}
