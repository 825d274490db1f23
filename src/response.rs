//! Lookup responses arriving on the response topic.
//!
//! The backend answers each scan with a small JSON record. Whatever arrives,
//! something readable ends up on the display.

use crate::arbiter::MessageArbiter;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Shown when the payload is not a valid record
pub const INVALID_FORMAT: (&str, &str) = ("Erro JSON", "Formato invalido");

/// Response decode errors
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Malformed response payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Lookup result published by the backend
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct LookupResponse {
    #[serde(default, alias = "nome")]
    pub name: Option<String>,

    #[serde(default)]
    pub status: Option<String>,

    #[serde(default, alias = "erro")]
    pub error: Option<String>,
}

impl LookupResponse {
    /// Display lines for this record
    pub fn lines(&self) -> (String, String) {
        let status_line = format!("Sts: {}", self.status.as_deref().unwrap_or("-"));

        if let Some(error) = &self.error {
            ("ERRO".to_string(), error.clone())
        } else if let Some(name) = &self.name {
            (name.clone(), status_line)
        } else {
            ("Sem dados".to_string(), status_line)
        }
    }
}

/// Decode a response payload
pub fn decode(payload: &[u8]) -> Result<LookupResponse, DecodeError> {
    Ok(serde_json::from_slice(payload)?)
}

/// Display lines for a payload, falling back to the invalid-format message
pub fn render(payload: &[u8]) -> (String, String) {
    match decode(payload) {
        Ok(response) => response.lines(),
        Err(e) => {
            tracing::warn!("{}", e);
            (INVALID_FORMAT.0.to_string(), INVALID_FORMAT.1.to_string())
        }
    }
}

/// Turns response-topic messages into display updates
#[derive(Clone)]
pub struct ResponseHandler {
    arbiter: MessageArbiter,
    timeout: Duration,
}

impl ResponseHandler {
    pub fn new(arbiter: MessageArbiter, timeout: Duration) -> Self {
        Self { arbiter, timeout }
    }

    /// Handle one payload from the response topic
    pub async fn on_message(&self, payload: &[u8]) {
        tracing::info!(
            "Response received: {}",
            String::from_utf8_lossy(payload)
        );

        let (line1, line2) = render(payload);

        if let Err(e) = self.arbiter.show_transient(&line1, &line2, self.timeout).await {
            // Screen keeps its previous content; the next message retries
            tracing::debug!("Response not shown: {}", e);
        }
    }
}
