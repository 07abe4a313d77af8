use anyhow::Context;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HealthStatus {
    Starting,
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone)]
pub struct HealthState {
    pub liveness: HealthStatus,
    pub readiness: HealthStatus,
    pub last_message_processed: Option<std::time::Instant>,
    pub messages_processed: u64,
    pub messages_failed: u64,
}

impl Default for HealthState {
    fn default() -> Self {
        Self {
            liveness: HealthStatus::Starting,
            readiness: HealthStatus::Starting,
            last_message_processed: None,
            messages_processed: 0,
            messages_failed: 0,
        }
    }
}

impl HealthState {
    pub fn set(&mut self, status: HealthStatus) {
        self.liveness = status;
        self.readiness = status;
    }
}

pub type SharedHealthState = Arc<RwLock<HealthState>>;

pub fn shared_health_state() -> SharedHealthState {
    Arc::new(RwLock::new(HealthState::default()))
}

async fn liveness_probe(State(health_state): State<SharedHealthState>) -> StatusCode {
    let state = health_state.read().await;

    match state.liveness {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Starting => {
            info!("Liveness probe: starting");
            StatusCode::OK // still connecting to the broker
        }
        HealthStatus::Unhealthy => {
            error!("Liveness probe: unhealthy");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

async fn readiness_probe(State(health_state): State<SharedHealthState>) -> StatusCode {
    let state = health_state.read().await;

    match state.readiness {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Starting | HealthStatus::Unhealthy => {
            error!(
                processed = state.messages_processed,
                failed = state.messages_failed,
                "Readiness probe: consumer not subscribed"
            );
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

async fn startup_probe(State(health_state): State<SharedHealthState>) -> StatusCode {
    let state = health_state.read().await;

    match state.liveness {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Starting | HealthStatus::Unhealthy => {
            info!("Startup probe: not started yet");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

pub fn health_router(health_state: SharedHealthState) -> Router {
    Router::new()
        .route("/healthz", get(liveness_probe))
        .route("/ready", get(readiness_probe))
        .route("/startup", get(startup_probe))
        .with_state(health_state)
}

/// Serve the consumer's probe endpoints on `0.0.0.0:{port}`.
///
/// # Errors
/// Returns an error if the port cannot be bound or serving fails.
pub async fn run_health_server(port: u16, health_state: SharedHealthState) -> anyhow::Result<()> {
    let app = health_router(health_state);

    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind health server")?;

    info!(event = "health_server_listening", %addr, "Health check server listening");

    axum::serve(listener, app)
        .await
        .context("Health server error")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn starting_consumer_is_alive_but_not_ready() {
        let state = shared_health_state();

        assert_eq!(liveness_probe(State(state.clone())).await, StatusCode::OK);
        assert_eq!(
            readiness_probe(State(state.clone())).await,
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            startup_probe(State(state)).await,
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn healthy_consumer_passes_all_probes() {
        let state = shared_health_state();
        state.write().await.set(HealthStatus::Healthy);

        assert_eq!(liveness_probe(State(state.clone())).await, StatusCode::OK);
        assert_eq!(readiness_probe(State(state.clone())).await, StatusCode::OK);
        assert_eq!(startup_probe(State(state)).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn unhealthy_consumer_fails_liveness() {
        let state = shared_health_state();
        state.write().await.set(HealthStatus::Unhealthy);

        assert_eq!(
            liveness_probe(State(state.clone())).await,
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            readiness_probe(State(state)).await,
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
