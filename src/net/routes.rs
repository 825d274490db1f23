//! HTTP route handlers for inbound topic messages.

use crate::arbiter::{ArbiterStatus, MessageArbiter};
use crate::response::ResponseHandler;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub response_topic: String,
    pub responses: ResponseHandler,
    pub arbiter: MessageArbiter,
}

/// POST /topics/*topic - Deliver a message published on `topic`
pub async fn on_message(
    State(state): State<AppState>,
    Path(topic): Path<String>,
    body: Bytes,
) -> impl IntoResponse {
    let topic = topic.trim_matches('/');

    if topic != state.response_topic {
        tracing::debug!("Ignoring message on unsubscribed topic '{}'", topic);
        return StatusCode::NOT_FOUND;
    }

    state.responses.on_message(&body).await;
    StatusCode::ACCEPTED
}

/// POST /display/idle - Drop any transient message and show the greeting
pub async fn show_idle(State(state): State<AppState>) -> impl IntoResponse {
    match state.arbiter.show_idle().await {
        Ok(()) => (StatusCode::OK, "OK".to_string()),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// GET /health - Current display state and counters
pub async fn health(State(state): State<AppState>) -> Json<ArbiterStatus> {
    Json(state.arbiter.status().await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arbiter::IdleMessage;
    use crate::display::hd44780::{Hd44780, DEFAULT_ADDRESS};
    use crate::display::sim::SimBus;
    use std::time::Duration;

    async fn state() -> (AppState, SimBus) {
        let bus = SimBus::new(16);
        let mut lcd = Hd44780::new(bus.clone(), bus.delay(), DEFAULT_ADDRESS, 2, 16);
        lcd.initialize().unwrap();
        let arbiter = MessageArbiter::start(Box::new(lcd), IdleMessage::new("Pronto", ""))
            .await
            .unwrap();
        let state = AppState {
            response_topic: "rfid/scanner/response".to_string(),
            responses: ResponseHandler::new(arbiter.clone(), Duration::from_millis(5000)),
            arbiter,
        };
        (state, bus)
    }

    #[tokio::test(start_paused = true)]
    async fn test_response_topic_reaches_display() {
        let (state, bus) = state().await;

        let response = on_message(
            State(state),
            Path("rfid/scanner/response".to_string()),
            Bytes::from_static(br#"{"nome":"ALICE","status":"OK"}"#),
        )
        .await
        .into_response();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(bus.line(0), "ALICE");
        assert_eq!(bus.line(1), "Sts: OK");
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_topics_are_rejected() {
        let (state, bus) = state().await;

        let response = on_message(
            State(state),
            Path("rfid/scanner/uid".to_string()),
            Bytes::from_static(br#"{"uid":"A1"}"#),
        )
        .await
        .into_response();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(bus.line(0), "Pronto");
    }

    #[tokio::test(start_paused = true)]
    async fn test_show_idle_route_drops_transient() {
        let (state, bus) = state().await;
        state
            .arbiter
            .show_transient("ALICE", "Sts: OK", Duration::from_millis(5000))
            .await
            .unwrap();

        let response = show_idle(State(state.clone())).await.into_response();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(bus.line(0), "Pronto");

        bus.set_failing(true);
        let response = show_idle(State(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_reports_idle() {
        let (state, _bus) = state().await;

        let Json(status) = health(State(state)).await;
        assert_eq!(status.state, "idle");
        assert_eq!(status.line1, "Pronto");
        assert_eq!(status.expires_in_ms, None);
    }
}
