//! Network side of the terminal.
//!
//! Scans go out through a [`Publisher`]; lookup results come back as topic
//! messages posted to the local HTTP listener.

pub mod publish;
pub mod routes;

pub use publish::HttpBridge;

use crate::arbiter::MessageArbiter;
use crate::response::ResponseHandler;
use axum::{
    routing::{get, post},
    Router,
};
use routes::AppState;
use std::future::Future;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::net::TcpListener;

/// Network errors
#[derive(Error, Debug)]
pub enum NetError {
    #[error("HTTP request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("HTTP error: {status}")]
    HttpError { status: u16 },

    #[error("No publish attempt was made")]
    RetriesExhausted,

    #[error("Failed to bind to address: {0}")]
    BindError(#[from] std::io::Error),

    #[error("Server error: {0}")]
    ServerError(String),
}

/// Outbound half of the publish/subscribe channel
pub trait Publisher: Send + Sync {
    /// Publish `payload` on `topic`
    fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
    ) -> impl Future<Output = Result<(), NetError>> + Send;
}

/// Listener for inbound topic messages
pub struct MessageServer {
    state: AppState,
}

impl MessageServer {
    pub fn new(response_topic: &str, responses: ResponseHandler, arbiter: MessageArbiter) -> Self {
        Self {
            state: AppState {
                response_topic: response_topic.trim_matches('/').to_string(),
                responses,
                arbiter,
            },
        }
    }

    /// Build the router with all routes
    fn build_router(&self) -> Router {
        Router::new()
            .route("/topics/*topic", post(routes::on_message))
            .route("/display/idle", post(routes::show_idle))
            .route("/health", get(routes::health))
            .with_state(self.state.clone())
    }

    /// Run the server with graceful shutdown
    pub async fn run_with_shutdown(
        &self,
        port: u16,
        shutdown: tokio::sync::broadcast::Receiver<()>,
    ) -> Result<(), NetError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = TcpListener::bind(addr).await?;

        tracing::info!("Listening for topic messages on http://{}", addr);

        let mut shutdown = shutdown;
        axum::serve(listener, self.build_router())
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Message server shutting down gracefully");
            })
            .await
            .map_err(|e| NetError::ServerError(e.to_string()))
    }
}
