//! RFID Badge Terminal for Raspberry Pi
//!
//! A Rust-based terminal that:
//! - Reads tag ids from a keyboard-wedge RFID reader
//! - Publishes each scan to a message bridge
//! - Shows lookup results on a 16x2 I2C character LCD
//! - Runs as a systemd service with graceful shutdown

mod arbiter;
mod config;
mod display;
mod net;
mod response;
mod scan;

use arbiter::{IdleMessage, MessageArbiter};
use clap::Parser;
use config::Config;
use net::{HttpBridge, MessageServer};
use response::ResponseHandler;
use scan::{ScanHandler, ScanSettings};
use tokio::io::{AsyncBufRead, BufReader};
use tokio::sync::{broadcast, mpsc};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Pending scans between the reader and the handler
const SCAN_QUEUE_DEPTH: usize = 16;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "rfid-terminal")]
#[command(about = "RFID badge terminal with I2C character LCD")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = config::DEFAULT_CONFIG_PATH)]
    config: String,

    /// Listener port for topic messages (overrides config, default: 8888)
    #[arg(long = "http-port")]
    http_port: Option<u16>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Show test pattern and exit
    #[arg(long)]
    test: bool,

    /// Clear display and exit
    #[arg(long)]
    clear: bool,

    /// Write the default configuration to the config path and exit
    #[arg(long = "write-default-config")]
    write_default_config: bool,
}

/// Using current_thread runtime for single-core Pi Zero W
/// This reduces memory overhead and avoids thread synchronization costs
#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.write_default_config {
        Config::default().save(&args.config)?;
        println!("Default configuration written to {}", args.config);
        return Ok(());
    }

    // Load configuration
    let config = Config::load(&args.config);

    // Initialize logging
    let verbose = args.verbose || config.as_ref().map(|c| c.verbose).unwrap_or(false);
    init_logging(verbose);

    tracing::info!("Starting RFID terminal");

    let config = config.unwrap_or_else(|e| {
        tracing::warn!("Failed to load config from {}: {}", args.config, e);
        tracing::info!("Using default configuration");
        Config::default()
    });

    // Display first: nothing else starts if it cannot come up
    let mut lcd = display::open(&config)?;

    // Handle one-shot commands
    if args.test {
        tracing::info!("Running test pattern...");
        lcd.test_pattern()?;
        tracing::info!("Test pattern complete");
        return Ok(());
    }

    if args.clear {
        tracing::info!("Clearing display...");
        lcd.clear()?;
        tracing::info!("Display cleared");
        return Ok(());
    }

    let idle = IdleMessage::new(&config.idle_line1, &config.idle_line2);
    let arbiter = MessageArbiter::start(Box::new(lcd), idle).await?;

    // Setup shutdown signal handling
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    // Inbound messages
    let port = args.http_port.unwrap_or(config.http_port);
    let responses = ResponseHandler::new(arbiter.clone(), config.message_timeout());
    let server = MessageServer::new(&config.response_topic, responses, arbiter.clone());

    let server_shutdown = shutdown_tx.subscribe();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.run_with_shutdown(port, server_shutdown).await {
            tracing::error!("Message server error: {}", e);
        }
    });

    // Scan consumer
    let (scan_tx, scan_rx) = mpsc::channel(SCAN_QUEUE_DEPTH);
    let handler = ScanHandler::new(
        arbiter.clone(),
        HttpBridge::new(&config.broker_url),
        ScanSettings {
            topic: config.scan_topic.clone(),
            reader_id: config.reader_id.clone(),
            debounce: config.debounce_window(),
            message_timeout: config.message_timeout(),
        },
    );
    let handler_shutdown = shutdown_tx.subscribe();
    let handler_handle = tokio::spawn(handler.run(scan_rx, handler_shutdown));

    // Scan source
    let input = open_scan_input(&config.scan_input).await?;
    let reader_shutdown = shutdown_tx.subscribe();
    let reader_handle = tokio::spawn(scan::read_tags(input, scan_tx, reader_shutdown));

    tracing::info!("System started, waiting for tags...");

    // Wait for shutdown signal
    wait_for_shutdown().await?;
    tracing::info!("Shutdown signal received");

    // Send shutdown to all tasks
    let _ = shutdown_tx.send(());

    // Wait for tasks to complete with timeout
    for (name, handle) in [
        ("Tag reader", reader_handle),
        ("Scan handler", handler_handle),
        ("Message server", server_handle),
    ] {
        tokio::select! {
            _ = handle => {},
            _ = tokio::time::sleep(std::time::Duration::from_secs(5)) => {
                tracing::warn!("{} shutdown timeout", name);
            }
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
///
/// Default level is "warn" to minimize SD card wear from log writes.
/// Use --verbose flag for "debug" level during development/troubleshooting.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "warn" };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("rfid_lcd_terminal={}", level).into());

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

/// Open the tag source: "-" is stdin, anything else a file, device or FIFO
async fn open_scan_input(
    path: &str,
) -> std::io::Result<Box<dyn AsyncBufRead + Send + Unpin>> {
    if path == "-" {
        tracing::info!("Reading tags from stdin");
        return Ok(Box::new(BufReader::new(tokio::io::stdin())));
    }

    tracing::info!("Reading tags from {}", path);
    let file = tokio::fs::File::open(path).await?;
    Ok(Box::new(BufReader::new(file)))
}

/// Wait for shutdown signals (SIGTERM, SIGINT)
async fn wait_for_shutdown() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT");
        }
    }

    Ok(())
}
