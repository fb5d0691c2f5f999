use std::path::PathBuf;
use std::sync::atomic::Ordering;

use clap::{Parser, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use padlink::config::{Overrides, RelayConfig};
use padlink::hid::{source, Recorder};
use padlink::relay::Relay;
use padlink::transport::AnyTransport;

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// padlink command line arguments
#[derive(Parser, Debug)]
#[command(name = "padlink")]
#[command(version, about = "Relay controller input to a game console", long_about = None)]
struct CliArgs {
    /// Configuration file (TOML)
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Serial device of the bridge, or one of: functionfs, gadgetfs, null
    #[arg(short = 'p', long, value_name = "DEST")]
    port: Option<String>,

    /// Serial baud rate
    #[arg(short = 'b', long, value_name = "BAUD")]
    baud_rate: Option<u32>,

    /// USB Device Controller to bind the gadget to
    #[arg(long, value_name = "UDC")]
    udc: Option<String>,

    /// configfs gadget name
    #[arg(long, value_name = "NAME")]
    gadget_name: Option<String>,

    /// Record relayed states to FILE
    #[arg(short = 'r', long, value_name = "FILE")]
    record: Option<PathBuf>,

    /// Replay states from FILE
    #[arg(short = 'P', long, value_name = "FILE")]
    playback: Option<PathBuf>,

    /// Keep running with neutral input after playback ends
    #[arg(short = 'd', long)]
    dont_exit: bool,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    init_logging(args.log_level, args.verbose);

    tracing::info!("Starting padlink v{}", env!("CARGO_PKG_VERSION"));

    let mut config = match &args.config {
        Some(path) => RelayConfig::load(path)?,
        None => RelayConfig::default(),
    };
    config.apply(Overrides {
        destination: args.port,
        baud_rate: args.baud_rate,
        udc: args.udc,
        gadget_name: args.gadget_name,
        record: args.record,
        playback: args.playback,
        dont_exit: args.dont_exit,
    })?;
    tracing::debug!("Configuration: {:?}", config);

    let states = source::build(config.replay.playback.as_deref(), config.replay.dont_exit)?;

    let transport = AnyTransport::new(&config.transport, &config.serial, &config.gadget);
    let mut relay = Relay::new(transport);
    if let Some(path) = &config.replay.record {
        relay = relay.with_recorder(Recorder::create(path)?);
    }

    let shutdown = relay.shutdown_handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Shutdown signal received");
                shutdown.store(true, Ordering::SeqCst);
            }
            Err(e) => tracing::warn!("Failed to listen for CTRL+C: {}", e),
        }
    });

    // poll() blocks (bounded), so the relay gets its own thread
    let stats = tokio::task::spawn_blocking(move || relay.run(states)).await??;

    tracing::info!(
        "Relayed {} reports ({} not-ready polls, {} recovered errors)",
        stats.sent,
        stats.not_ready,
        stats.recovered
    );
    Ok(())
}

/// Initialize logging
fn init_logging(level: LogLevel, verbose_count: u8) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "padlink=error",
        LogLevel::Warn => "padlink=warn",
        LogLevel::Info => "padlink=info",
        LogLevel::Verbose => "padlink=debug,serialport=info",
        LogLevel::Debug => "padlink=debug,serialport=debug",
        LogLevel::Trace => "padlink=trace,serialport=debug",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}
