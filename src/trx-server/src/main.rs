// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

mod ai_tools;
mod app;
mod error;
mod hrd_server;
mod qso_driver;
mod supervisor;
mod udp_ingest;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tracing::{info, warn};

use trx_app::config::{ConfigFile, RunMode, ServerConfig};
use trx_backend::{BackendEvent, DummyBackend, FlexBackend, RadioBackend};
use trx_core::state::DEBOUNCE_MS;
use trx_core::station::{Continent, StationProfile};
use trx_core::{DynResult, Logbook};

use app::AppState;
use error::ServerError;
use supervisor::{Supervisor, SupervisorConfig};

const PKG_DESCRIPTION: &str = concat!(env!("CARGO_PKG_NAME"), " - multi-slice digital-mode control hub");

#[derive(Debug, Parser)]
#[command(author = env!("CARGO_PKG_AUTHORS"), version = env!("CARGO_PKG_VERSION"), about = PKG_DESCRIPTION)]
struct Cli {
    /// Path to the JSON configuration document.
    #[arg(long = "config", short = 'C', value_name = "FILE")]
    config: Option<PathBuf>,
    /// Print the resolved configuration (defaults merged with the loaded
    /// file, if any) and exit.
    #[arg(long = "print-config")]
    print_config: bool,
    /// Override the configured run mode.
    #[arg(long = "mode", value_enum)]
    mode: Option<ModeArg>,
    /// Override the address the HRD/UDP listeners bind to (default 127.0.0.1).
    #[arg(long = "listen")]
    listen: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ModeArg {
    Flex,
    Standard,
}

fn parse_continent(s: &str) -> Result<Continent, ServerError> {
    match s.to_ascii_lowercase().as_str() {
        "eu" => Ok(Continent::Eu),
        "na" => Ok(Continent::Na),
        "sa" => Ok(Continent::Sa),
        "af" => Ok(Continent::Af),
        "as" => Ok(Continent::As),
        "oc" => Ok(Continent::Oc),
        "an" => Ok(Continent::An),
        other => Err(ServerError::InvalidContinent(other.to_string())),
    }
}

/// Build the radio backend named by `mode`, connect it, and -- for
/// `standard` mode, whose [`DummyBackend`] never emits events on its own --
/// seed the supervisor's event channel with the single hard-coded slice so
/// it starts a channel the same way a real `SliceAdded` would.
async fn build_backend(
    mode: RunMode,
    flex: Option<&trx_app::config::FlexConfig>,
    events_tx: mpsc::UnboundedSender<BackendEvent>,
) -> DynResult<Arc<dyn RadioBackend>> {
    match mode {
        RunMode::Flex => {
            let flex = flex.ok_or("mode=flex requires a [flex] configuration section")?;
            let backend = Arc::new(FlexBackend::new(events_tx));
            backend.connect(&flex.host).await?;
            Ok(backend)
        }
        RunMode::Standard => {
            let backend = Arc::new(DummyBackend::new(1));
            backend.connect("standard").await?;
            let _ = events_tx.send(BackendEvent::Connected);
            for slice in backend.list_slices() {
                let _ = events_tx.send(BackendEvent::SliceAdded(slice));
            }
            Ok(backend)
        }
    }
}

/// The 5 s cadence heartbeat sweep (§4.1) and restart-policy dispatch.
fn spawn_heartbeat_watchdog(app: Arc<AppState>, supervisor: Arc<Supervisor>) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(5));
        loop {
            tick.tick().await;
            let requests = {
                let mut core = app.core.lock().expect("state core mutex never poisoned");
                core.sweep_heartbeats(app::now_ms())
            };
            for req in requests {
                warn!(channel = req.channel_index, restart_count = req.restart_count, "heartbeat timed out, restarting decoder instance");
                supervisor.restart_channel(req.channel_index, &req.instance_name).await;
            }
        }
    });
}

/// Flush the debounced change fan-out at a cadence well under
/// [`DEBOUNCE_MS`] so a pending mutation never waits longer than the
/// debounce window to reach listeners.
fn spawn_debounce_timer(app: Arc<AppState>) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_millis((DEBOUNCE_MS / 2) as u64));
        loop {
            tick.tick().await;
            app.core.lock().expect("state core mutex never poisoned").maybe_emit(app::now_ms());
        }
    });
}

/// §5/§4.7's shutdown sequence: Close frames to every connected channel,
/// a 2 s wait for the decoder to react, then graceful OS termination (with
/// its own 5 s grace + kill) for whatever is still running.
async fn graceful_shutdown(app: &Arc<AppState>, supervisor: &Arc<Supervisor>) {
    info!("shutting down: sending Close frames to connected channels");
    let snapshot = app.latest_snapshot();
    for ch in snapshot.channels.iter().filter(|c| c.connected) {
        app.send_to_channel(ch.index, qso_driver::ChannelCommand::Close);
    }
    tokio::time::sleep(Duration::from_secs(2)).await;
    supervisor.shutdown_all().await;
    info!("shutdown complete");
}

async fn wait_for_shutdown_signal() {
    let mut terminate = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

#[tokio::main]
async fn main() -> DynResult<()> {
    let cli = Cli::parse();

    if cli.print_config {
        let example = ServerConfig::default();
        println!("{}", serde_json::to_string_pretty(&example).expect("ServerConfig always serializes"));
        return Ok(());
    }

    let (mut cfg, config_path) = match &cli.config {
        Some(path) => {
            let cfg = ServerConfig::load_from_file(path)?;
            (cfg, Some(path.clone()))
        }
        None => ServerConfig::load_from_default_paths()?,
    };

    if let Some(mode_arg) = cli.mode {
        cfg.mode = match mode_arg {
            ModeArg::Flex => RunMode::Flex,
            ModeArg::Standard => RunMode::Standard,
        };
    }

    trx_app::init_logging(cfg.log_level.as_deref());

    if let Some(path) = &config_path {
        info!(path = %path.display(), "loaded configuration");
    } else {
        info!("no configuration file found, using defaults");
    }

    let continent = parse_continent(&cfg.station.continent)?;
    let mut station = StationProfile::new(cfg.station.callsign.clone(), continent, cfg.station.dxcc.clone());
    station.known_prefixes = cfg.station.prefixes.clone();
    let my_grid = cfg.station.grid.clone();

    info!(callsign = %station.callsign, mode = ?cfg.mode, "starting trx-server");

    let listen_host = cli.listen.clone().unwrap_or_else(|| "127.0.0.1".to_string());
    let wsjtx_udp_server = format!("{listen_host}:{}", trx_core::channel::UDP_INGEST_BASE_PORT);

    let decoder_path = cfg
        .wsjtx
        .path
        .clone()
        .ok_or_else(|| Box::new(ServerError::DecoderPathMissing(PathBuf::from("<unset>"))) as Box<dyn std::error::Error + Send + Sync>)?;
    if !decoder_path.exists() {
        return Err(Box::new(ServerError::DecoderPathMissing(decoder_path)));
    }

    let logbook = Logbook::open(cfg.logbook.path.clone(), &station.callsign, my_grid.as_deref());

    let (events_tx, events_rx) = mpsc::unbounded_channel::<BackendEvent>();
    let backend = build_backend(cfg.mode, cfg.flex.as_ref(), events_tx).await?;

    let app = AppState::new(backend, station, my_grid, logbook);

    let config_dir = cfg
        .logbook
        .path
        .parent()
        .map(|p| p.join("decoders"))
        .unwrap_or_else(|| PathBuf::from("decoders"));

    let standard_instance_name = matches!(cfg.mode, RunMode::Standard).then(|| "IC-7300".to_string());
    let default_bands = cfg.flex.as_ref().map(|f| f.default_bands.clone()).unwrap_or_default();

    let supervisor = Supervisor::new(
        SupervisorConfig {
            decoder_path,
            config_dir,
            wsjtx_udp_server,
            standard_instance_name,
            default_bands,
        },
        app.clone(),
    );
    supervisor.spawn_event_loop(events_rx);

    if cfg.logbook.enable_hrd_server {
        hrd_server::spawn_listener(cfg.logbook.hrd_port, None, app.clone())
            .await
            .map_err(|source| ServerError::PortBind { kind: "aggregate HRD", addr: ([127, 0, 0, 1], cfg.logbook.hrd_port).into(), source })?;
    }

    spawn_heartbeat_watchdog(app.clone(), supervisor.clone());
    spawn_debounce_timer(app.clone());

    let ai_app = app.clone();
    tokio::spawn(async move {
        ai_tools::run(ai_app).await;
    });

    wait_for_shutdown_signal().await;
    graceful_shutdown(&app, &supervisor).await;

    Ok(())
}
