//! # Horus Relay
//!
//! Relay balloon telemetry from a FSK demodulator to Habitat and local tools.
//!
//! Reads hex-encoded Horus Binary records or UKHAS sentences from a local UDP
//! port (or stdin), uploads validated sentences to Habitat and broadcasts
//! positions to OziMux and Horus UDP payload summary listeners.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::time::{timeout, Duration};
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use horus_relay::config::Config;
use horus_relay::habitat::listener::{ListenerClient, ListenerInfo};
use horus_relay::habitat::{upload_channel, HttpTransport, UploaderSettings};
use horus_relay::ingest::{self, IngestSource, Pipeline};
use horus_relay::payload_list::{self, PayloadIdTable};
use horus_relay::shutdown::Shutdown;
use horus_relay::telemetry::TelemetryLog;
use horus_relay::udp::{OziMuxEmitter, SummaryEmitter};

/// Default configuration file path
const DEFAULT_CONFIG_PATH: &str = "horus_relay.toml";

/// Default path of the validated sentence log
const DEFAULT_TELEMETRY_LOG: &str = "telemetry.log";

/// Default path of the debug log
const DEFAULT_DEBUG_LOG: &str = "horus_relay_debug.log";

/// How long to wait for the upload worker to finish after shutdown
const WORKER_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "horus-relay", version, about = "Horus Binary / UKHAS telemetry relay")]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Disable Habitat uploads
    #[arg(long)]
    noupload: bool,

    /// Read demodulator output from stdin instead of UDP
    #[arg(long)]
    stdin: bool,

    /// Log of validated sentences
    #[arg(long, default_value = DEFAULT_TELEMETRY_LOG)]
    log: PathBuf,

    /// Debug log file
    #[arg(long, default_value = DEFAULT_DEBUG_LOG)]
    debuglog: PathBuf,

    /// Use this payload ID list and skip downloading the latest one
    #[arg(long)]
    payload_list: Option<PathBuf>,

    /// Verbose (debug) logging
    #[arg(short, long)]
    verbose: bool,
}

/// Set up console logging plus a non-blocking debug log file
///
/// The returned guard must live until exit or buffered lines are lost.
fn init_logging(debuglog: &Path, verbose: bool) -> Result<WorkerGuard> {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    let directory = match debuglog.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let file_name = debuglog
        .file_name()
        .context("debug log path has no file name")?
        .to_string_lossy()
        .into_owned();

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(file_name)
        .build(directory)
        .with_context(|| format!("failed to open debug log {}", debuglog.display()))?;
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(level.into()))
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();

    Ok(guard)
}

/// Load the configuration file, falling back to defaults if it is absent
fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let config = Config::load(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    } else {
        warn!(
            "Configuration file {} not found, using defaults.",
            path.display()
        );
        Ok(Config::default())
    }
}

/// Build the payload ID table from an explicit file, or the configured list
async fn load_payload_ids(config: &Config, override_file: Option<&Path>) -> PayloadIdTable {
    let list = &config.payload_list;

    match override_file {
        Some(path) => {
            info!("Using payload ID list {}", path.display());
            PayloadIdTable::load(path)
        }
        None if list.update => {
            payload_list::update_and_load(&list.url, &list.signature, &list.local_file).await
        }
        None => PayloadIdTable::load(&list.local_file),
    }
}

/// Register the station with Habitat, if a position is configured
async fn register_listener(config: &Config) {
    if config.habitat.inhibit || config.user.station_lat == 0.0 {
        return;
    }

    let info = ListenerInfo {
        callsign: config.user.callsign.clone(),
        latitude: config.user.station_lat,
        longitude: config.user.station_lon,
        radio: config.user.radio_comment.clone(),
        antenna: config.user.antenna_comment.clone(),
    };

    let client = ListenerClient::new(&config.habitat.url, config.habitat.upload_timeout());
    match client {
        Ok(mut client) => {
            if let Err(e) = client.upload_listener_position(&info).await {
                error!("Habitat - Listener upload failed: {}", e);
            }
        }
        Err(e) => error!("Habitat - Could not create listener client: {}", e),
    }
}

/// Main entry point for Horus Relay
///
/// # Control Flow
///
/// 1. **Initialization**
///    - Parse arguments, set up console and debug file logging
///    - Load configuration and the payload ID list
///    - Bind the ingest socket (fatal on failure)
///    - Register the listener with Habitat and start the upload worker
///
/// 2. **Main Loop**
///    - Decode, validate and fan out each line of demodulator output
///    - Exit at end of stdin or on Ctrl+C
///
/// 3. **Graceful Shutdown**
///    - Signal the upload worker and wait for it to stop
///
/// # Errors
///
/// Returns error if:
/// - The configuration file exists but is invalid
/// - The ingest socket cannot be bound
/// - The HTTP client cannot be created
#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let _log_guard = init_logging(&args.debuglog, args.verbose)?;

    info!("Horus Relay v{} starting...", env!("CARGO_PKG_VERSION"));

    let mut config = load_config(&args.config)?;
    if args.noupload {
        config.habitat.inhibit = true;
    }
    if config.habitat.inhibit {
        info!("Habitat uploads disabled.");
    }
    info!("Using User Callsign: {}", config.user.callsign);

    let payloads = load_payload_ids(&config, args.payload_list.as_deref()).await;
    payloads.log_known();

    let source = if args.stdin {
        IngestSource::Stdin
    } else {
        let socket = ingest::bind_udp(config.input.bind_address, config.input.udp_port)
            .with_context(|| {
                format!(
                    "failed to bind UDP port {}:{}",
                    config.input.bind_address, config.input.udp_port
                )
            })?;
        IngestSource::Udp(socket)
    };

    register_listener(&config).await;

    let shutdown = Shutdown::new();
    let transport = HttpTransport::new(config.habitat.upload_timeout())
        .context("failed to create Habitat HTTP client")?;
    let (uploads, worker) = upload_channel(
        UploaderSettings::from_config(&config.user, &config.habitat),
        transport,
    );
    let worker = worker.spawn(shutdown.clone());

    let mut pipeline = Pipeline::new(
        Arc::new(payloads),
        uploads,
        OziMuxEmitter::new(config.ozimux.broadcast_address, config.ozimux.ozimux_port),
        SummaryEmitter::new(config.ozimux.broadcast_address, config.ozimux.summary_port()),
    );
    match TelemetryLog::open(&args.log) {
        Ok(log) => pipeline = pipeline.with_sink(Box::new(log)),
        Err(e) => error!("Could not open telemetry log {}: {}", args.log.display(), e),
    }

    info!("Press Ctrl+C to exit");

    tokio::select! {
        result = ingest::run(source, &pipeline, &shutdown) => {
            if let Err(e) = result {
                error!("Ingest stopped: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
    }

    shutdown.trigger();
    if timeout(WORKER_STOP_TIMEOUT, worker).await.is_err() {
        warn!("Habitat uploader did not stop in time.");
    }

    info!("Horus Relay stopped.");
    Ok(())
}
