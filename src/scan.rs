//! Tag scans: reading, debouncing and publishing.
//!
//! Keyboard-wedge readers emit one tag id per line. The reader task only
//! parses, stamps and enqueues; a single consumer owns the debounce record,
//! updates the display and publishes. Debouncing uses the read time, so
//! scans that queue up behind a slow publish are still judged correctly.

use crate::arbiter::MessageArbiter;
use crate::net::Publisher;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;

/// Shown while the backend looks the tag up
pub const READING: (&str, &str) = ("Lendo...", "");

/// Shown when a scan cannot be delivered
pub const CONNECTION_ERROR: (&str, &str) = ("Erro de conexao", "Reinicie");

/// Tag id parse errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseTagError {
    #[error("Empty tag line")]
    Empty,

    #[error("Invalid tag id '{0}'")]
    Invalid(String),
}

/// Parse one reader line into a tag id
///
/// `0x`-prefixed input is hex, all-digit input is decimal, anything else
/// is tried as bare hex.
pub fn parse_tag_id(line: &str) -> Result<u64, ParseTagError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(ParseTagError::Empty);
    }

    let parsed = if let Some(hex) = line.strip_prefix("0x").or_else(|| line.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16)
    } else if line.bytes().all(|b| b.is_ascii_digit()) {
        line.parse::<u64>()
    } else {
        u64::from_str_radix(line, 16)
    };

    parsed.map_err(|_| ParseTagError::Invalid(line.to_string()))
}

/// One tag read, stamped when the reader produced it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagScan {
    pub tag_id: u64,
    pub read_at: Instant,
}

impl TagScan {
    pub fn now(tag_id: u64) -> Self {
        Self {
            tag_id,
            read_at: Instant::now(),
        }
    }
}

/// Last accepted scan
#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    last: Option<(u64, Instant)>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    /// Record `tag_id` at `now` unless it repeats the last tag within the window
    ///
    /// Ignored scans do not extend the window.
    pub fn accept(&mut self, tag_id: u64, now: Instant) -> bool {
        if let Some((last_id, at)) = self.last {
            if last_id == tag_id && now.saturating_duration_since(at) < self.window {
                return false;
            }
        }
        self.last = Some((tag_id, now));
        true
    }
}

/// Payload published for each accepted scan
#[derive(Debug, Serialize)]
pub struct ScanReport<'a> {
    pub uid: String,
    #[serde(rename = "leitorId")]
    pub reader_id: &'a str,
    pub hora_leitura: String,
}

impl<'a> ScanReport<'a> {
    pub fn new(tag_id: u64, reader_id: &'a str) -> Self {
        Self {
            uid: format!("{:X}", tag_id),
            reader_id,
            hora_leitura: chrono::Local::now().format("%H:%M:%S").to_string(),
        }
    }
}

/// Outcome of a scan event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    Published,
    Debounced,
    PublishFailed,
}

/// Scan handler settings
#[derive(Debug, Clone)]
pub struct ScanSettings {
    pub topic: String,
    pub reader_id: String,
    pub debounce: Duration,
    pub message_timeout: Duration,
}

/// Consumes scan events
pub struct ScanHandler<P> {
    arbiter: MessageArbiter,
    publisher: P,
    debouncer: Debouncer,
    settings: ScanSettings,
}

impl<P: Publisher> ScanHandler<P> {
    pub fn new(arbiter: MessageArbiter, publisher: P, settings: ScanSettings) -> Self {
        Self {
            arbiter,
            publisher,
            debouncer: Debouncer::new(settings.debounce),
            settings,
        }
    }

    /// Handle one scan
    pub async fn on_tag_scanned(&mut self, scan: TagScan) -> ScanOutcome {
        let tag_id = scan.tag_id;
        if !self.debouncer.accept(tag_id, scan.read_at) {
            tracing::debug!("Ignoring repeated scan of {:X}", tag_id);
            return ScanOutcome::Debounced;
        }

        tracing::info!("Tag scanned: {} (0x{:X})", tag_id, tag_id);

        let timeout = self.settings.message_timeout;
        if let Err(e) = self
            .arbiter
            .show_transient(READING.0, READING.1, timeout)
            .await
        {
            // Publishing does not depend on the screen
            tracing::debug!("Reading notice not shown: {}", e);
        }

        let report = ScanReport::new(tag_id, &self.settings.reader_id);
        let payload = match serde_json::to_vec(&report) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!("Failed to encode scan report: {}", e);
                return ScanOutcome::PublishFailed;
            }
        };

        tracing::info!(
            "Publishing scan to '{}': {}",
            self.settings.topic,
            String::from_utf8_lossy(&payload)
        );

        match self.publisher.publish(&self.settings.topic, payload).await {
            Ok(()) => ScanOutcome::Published,
            Err(e) => {
                tracing::error!("Failed to publish scan: {}", e);
                if let Err(e) = self
                    .arbiter
                    .show_transient(CONNECTION_ERROR.0, CONNECTION_ERROR.1, timeout)
                    .await
                {
                    tracing::debug!("Connection error not shown: {}", e);
                }
                ScanOutcome::PublishFailed
            }
        }
    }

    /// Consume scans until the queue closes or shutdown is signalled
    pub async fn run(
        mut self,
        mut scans: mpsc::Receiver<TagScan>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        tracing::info!("Scan handler started");

        loop {
            tokio::select! {
                scan = scans.recv() => match scan {
                    Some(scan) => {
                        self.on_tag_scanned(scan).await;
                    }
                    None => {
                        tracing::info!("Scan source closed");
                        break;
                    }
                },
                _ = shutdown.recv() => {
                    tracing::info!("Scan handler shutting down");
                    break;
                }
            }
        }
    }
}

/// Read tag ids line by line and enqueue them without waiting
///
/// A full queue means the consumer is stuck on the display or network;
/// the scan is dropped rather than stalling the reader.
pub async fn read_tags<R>(
    reader: R,
    scans: mpsc::Sender<TagScan>,
    mut shutdown: broadcast::Receiver<()>,
) where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = shutdown.recv() => {
                tracing::info!("Tag reader shutting down");
                return;
            }
        };

        match line {
            Ok(Some(line)) => match parse_tag_id(&line) {
                Ok(tag_id) => match scans.try_send(TagScan::now(tag_id)) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::warn!("Scan queue full, dropping tag {:X}", tag_id);
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => return,
                },
                Err(ParseTagError::Empty) => {}
                Err(e) => tracing::warn!("{}", e),
            },
            Ok(None) => {
                tracing::info!("Tag input reached end of stream");
                return;
            }
            Err(e) => {
                tracing::error!("Failed to read tag input: {}", e);
                return;
            }
        }
    }
}
