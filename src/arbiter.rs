//! Message arbiter for the character display.
//!
//! Owns the display and decides what it shows: a persistent idle greeting,
//! or a transient message that reverts to idle after a timeout. Scan and
//! network handlers call in concurrently; every transition runs under one
//! lock that also guards the bus, so nibble sequences never interleave.
//!
//! Driver delays sleep the calling thread, so writes run on the blocking
//! pool while the runtime keeps serving the listener and the tag reader.

use crate::display::{fit_line, CharDisplay, DriverError};
use serde::Serialize;
use std::sync::{Arc, PoisonError, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Arbiter errors
#[derive(Error, Debug)]
pub enum ArbiterError {
    #[error("Display error: {0}")]
    Driver(#[from] DriverError),

    #[error("Cannot schedule message expiry: no async runtime available")]
    TimeoutScheduling,

    #[error("Display write task failed: {0}")]
    RenderTask(String),
}

/// What the display currently shows
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayMessage {
    Idle,
    Transient {
        line1: String,
        line2: String,
        expires_at: Instant,
    },
}

/// Idle greeting text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdleMessage {
    pub line1: String,
    pub line2: String,
}

impl IdleMessage {
    pub fn new(line1: &str, line2: &str) -> Self {
        Self {
            line1: line1.to_string(),
            line2: line2.to_string(),
        }
    }
}

/// Transition counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ArbiterStats {
    /// Successful state changes, expiries included
    pub transitions: u64,
    /// Transient messages that timed out back to idle
    pub expirations: u64,
    /// Transitions skipped because the display failed
    pub failures: u64,
}

/// Serializable view of the arbiter for the health endpoint
#[derive(Debug, Clone, Serialize)]
pub struct ArbiterStatus {
    pub state: &'static str,
    pub line1: String,
    pub line2: String,
    pub expires_in_ms: Option<u64>,
    pub stats: ArbiterStats,
}

/// The driver is only touched from blocking-pool threads
type SharedDisplay = Arc<std::sync::Mutex<Box<dyn CharDisplay>>>;

struct State {
    display: SharedDisplay,
    columns: u8,
    message: DisplayMessage,
    expiry: Option<JoinHandle<()>>,
    /// Bumped on every transition; an expiry only fires for its own generation
    generation: u64,
    stats: ArbiterStats,
}

struct Inner {
    state: Mutex<State>,
    idle: IdleMessage,
}

/// Thread-safe handle to the arbiter
#[derive(Clone)]
pub struct MessageArbiter {
    inner: Arc<Inner>,
}

impl MessageArbiter {
    /// Take ownership of an initialized display and show the idle greeting
    ///
    /// Fails if the greeting cannot be written or if no runtime is available
    /// to run expiry timers; both are fatal at startup.
    pub async fn start(
        display: Box<dyn CharDisplay>,
        idle: IdleMessage,
    ) -> Result<Self, ArbiterError> {
        Handle::try_current().map_err(|_| ArbiterError::TimeoutScheduling)?;

        let columns = display.columns();
        let arbiter = Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    display: Arc::new(std::sync::Mutex::new(display)),
                    columns,
                    message: DisplayMessage::Idle,
                    expiry: None,
                    generation: 0,
                    stats: ArbiterStats::default(),
                }),
                idle,
            }),
        };

        {
            let mut state = arbiter.inner.state.lock().await;
            arbiter.inner.render_idle(&state).await?;
        }

        tracing::info!("Message arbiter started, showing idle greeting");
        Ok(arbiter)
    }

    /// Show the idle greeting now, cancelling any pending expiry
    pub async fn show_idle(&self) -> Result<(), ArbiterError> {
        let mut state = self.inner.state.lock().await;

        if let Err(e) = self.inner.render_idle(&state).await {
            state.stats.failures += 1;
            tracing::error!("Failed to show idle greeting: {}", e);
            return Err(e);
        }

        if let Some(pending) = state.expiry.take() {
            pending.abort();
        }
        state.generation += 1;
        state.message = DisplayMessage::Idle;
        state.stats.transitions += 1;

        tracing::debug!("Display back to idle");
        Ok(())
    }

    /// Show two lines for `timeout`, replacing whatever is on screen
    ///
    /// The last call wins: a pending expiry from an earlier message is
    /// cancelled and the timer restarts from now.
    pub async fn show_transient(
        &self,
        line1: &str,
        line2: &str,
        timeout: Duration,
    ) -> Result<(), ArbiterError> {
        let runtime = Handle::try_current().map_err(|_| ArbiterError::TimeoutScheduling)?;

        let mut state = self.inner.state.lock().await;

        let line1 = fit_line(line1, state.columns);
        let line2 = fit_line(line2, state.columns);

        if let Err(e) = render(&state.display, line1.clone(), line2.clone()).await {
            state.stats.failures += 1;
            tracing::error!("Failed to show message '{}' / '{}': {}", line1, line2, e);
            return Err(e);
        }

        if let Some(pending) = state.expiry.take() {
            pending.abort();
        }
        state.generation += 1;

        let generation = state.generation;
        let weak = Arc::downgrade(&self.inner);
        state.expiry = Some(runtime.spawn(expire_after(weak, generation, timeout)));

        tracing::debug!("Showing '{}' / '{}' for {:?}", line1, line2, timeout);

        state.message = DisplayMessage::Transient {
            line1,
            line2,
            expires_at: Instant::now() + timeout,
        };
        state.stats.transitions += 1;

        Ok(())
    }

    /// Current logical state
    #[allow(dead_code)]
    pub async fn current(&self) -> DisplayMessage {
        self.inner.state.lock().await.message.clone()
    }

    /// Transition counters
    #[allow(dead_code)]
    pub async fn stats(&self) -> ArbiterStats {
        self.inner.state.lock().await.stats
    }

    /// Snapshot for reporting
    pub async fn status(&self) -> ArbiterStatus {
        let state = self.inner.state.lock().await;
        match &state.message {
            DisplayMessage::Idle => ArbiterStatus {
                state: "idle",
                line1: self.inner.idle.line1.clone(),
                line2: self.inner.idle.line2.clone(),
                expires_in_ms: None,
                stats: state.stats,
            },
            DisplayMessage::Transient {
                line1,
                line2,
                expires_at,
            } => ArbiterStatus {
                state: "transient",
                line1: line1.clone(),
                line2: line2.clone(),
                expires_in_ms: Some(
                    expires_at.saturating_duration_since(Instant::now()).as_millis() as u64,
                ),
                stats: state.stats,
            },
        }
    }
}

impl Inner {
    async fn render_idle(&self, state: &State) -> Result<(), ArbiterError> {
        render(
            &state.display,
            fit_line(&self.idle.line1, state.columns),
            fit_line(&self.idle.line2, state.columns),
        )
        .await
    }

    async fn expire(&self, generation: u64) {
        let mut state = self.state.lock().await;

        if state.generation != generation {
            tracing::debug!("Expiry for generation {} superseded", generation);
            return;
        }

        // This task owns the handle; dropping it detaches, it does not abort
        state.expiry = None;

        match self.render_idle(&state).await {
            Ok(()) => {
                state.message = DisplayMessage::Idle;
                state.stats.expirations += 1;
                state.stats.transitions += 1;
                tracing::debug!("Message expired, display back to idle");
            }
            Err(e) => {
                state.stats.failures += 1;
                tracing::error!("Failed to restore idle greeting after expiry: {}", e);
            }
        }
    }
}

async fn expire_after(inner: Weak<Inner>, generation: u64, timeout: Duration) {
    tokio::time::sleep(timeout).await;
    if let Some(inner) = inner.upgrade() {
        inner.expire(generation).await;
    }
}

/// Write two full rows on the blocking pool
async fn render(display: &SharedDisplay, line1: String, line2: String) -> Result<(), ArbiterError> {
    let display = Arc::clone(display);
    tokio::task::spawn_blocking(move || {
        let mut display = display.lock().unwrap_or_else(PoisonError::into_inner);
        write_rows(display.as_mut(), &line1, &line2)
    })
    .await
    .map_err(|e| ArbiterError::RenderTask(e.to_string()))??;
    Ok(())
}

fn write_rows(display: &mut dyn CharDisplay, line1: &str, line2: &str) -> Result<(), DriverError> {
    display.clear()?;
    display.write_str(line1)?;
    display.set_cursor(1, 0)?;
    display.write_str(line2)
}
