//! HTTP route handlers for the admin API.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

use crate::apps::scheduler::{AppScheduler, SchedulerError};
use crate::config::AppSettings;
use crate::display::DisplayHandle;
use crate::network::wifi::{validate_psk, validate_ssid};
use crate::network::{NetworkCommand, NetworkState};

const SCAN_TIMEOUT: Duration = Duration::from_secs(20);

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<AppScheduler>,
    pub display: DisplayHandle,
    pub network: NetworkState,
    pub network_tx: mpsc::Sender<NetworkCommand>,
}

/// API error with the status code it maps to
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<SchedulerError> for ApiError {
    fn from(err: SchedulerError) -> Self {
        let status = match &err {
            SchedulerError::UnknownApp(_) => StatusCode::NOT_FOUND,
            SchedulerError::Activation { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            SchedulerError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        };
        Self::new(status, err.to_string())
    }
}

/// GET /api/apps - App inventory with schemas and current settings
pub async fn list_apps(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.scheduler.list_apps())
}

/// POST /api/apps/:name/activate
pub async fn activate_app(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.scheduler.activate(&name)?;
    Ok(Json(json!({ "active": name })))
}

/// POST /api/apps/next
pub async fn next_app(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    state.scheduler.next()?;
    Ok(Json(json!({ "active": state.scheduler.active_app() })))
}

/// POST /api/apps/previous
pub async fn previous_app(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    state.scheduler.previous()?;
    Ok(Json(json!({ "active": state.scheduler.active_app() })))
}

/// PUT /api/apps/:name/config
pub async fn set_app_config(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(settings): Json<AppSettings>,
) -> Result<impl IntoResponse, ApiError> {
    state.scheduler.set_config(&name, settings)?;
    Ok(Json(json!({ "saved": name })))
}

#[derive(Deserialize)]
pub struct BrightnessRequest {
    pub brightness: u8,
}

/// POST /api/display/brightness
pub async fn set_brightness(
    State(state): State<AppState>,
    Json(request): Json<BrightnessRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .display
        .set_brightness(request.brightness)
        .map_err(|e| ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, e.to_string()))?;
    Ok(Json(json!({ "brightness": request.brightness })))
}

/// GET /api/display/status
pub async fn display_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.display.status())
}

/// GET /api/network/status
pub async fn network_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.network.snapshot())
}

/// GET /api/network/scan
pub async fn network_scan(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let (reply_tx, reply_rx) = oneshot::channel();
    state
        .network_tx
        .try_send(NetworkCommand::Scan { respond_to: reply_tx })
        .map_err(|_| ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "network loop busy"))?;

    let networks = tokio::time::timeout(SCAN_TIMEOUT, reply_rx)
        .await
        .ok()
        .and_then(Result::ok)
        .ok_or_else(|| ApiError::new(StatusCode::GATEWAY_TIMEOUT, "scan timed out"))?;
    Ok(Json(json!({ "networks": networks })))
}

#[derive(Deserialize)]
pub struct CredentialsRequest {
    pub ssid: String,
    #[serde(default)]
    pub secret: String,
}

/// POST /api/network/credentials
///
/// Only valid while the setup flow is active; outside it the state
/// machine would discard the submission.
pub async fn submit_credentials(
    State(state): State<AppState>,
    Json(request): Json<CredentialsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.network.snapshot().phase.is_setup() {
        return Err(ApiError::new(
            StatusCode::CONFLICT,
            "setup mode is not active",
        ));
    }

    validate_ssid(&request.ssid)
        .and_then(|()| validate_psk(&request.secret))
        .map_err(|e| ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, e.to_string()))?;

    state
        .network_tx
        .try_send(NetworkCommand::SubmitCredentials {
            ssid: request.ssid,
            secret: request.secret,
        })
        .map_err(|_| ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "network loop busy"))?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "status": "connecting" }))))
}

/// POST /api/network/cancel
pub async fn cancel_setup(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .network_tx
        .try_send(NetworkCommand::CancelSetup)
        .map_err(|_| ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "network loop busy"))?;
    Ok(Json(json!({ "status": "cancelled" })))
}

/// Health check endpoint
pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apps::clock::ClockApp;
    use crate::apps::DisplayApp;
    use crate::config::{Config, ConfigStore};
    use crate::display::{MockPanel, RenderPipeline};
    use crate::network::NetworkPhase;

    fn test_state(tag: &str) -> (AppState, mpsc::Receiver<NetworkCommand>) {
        let dir = std::env::temp_dir().join(format!("led-matrix-web-{tag}"));
        std::fs::create_dir_all(&dir).unwrap();
        let store = Arc::new(ConfigStore::new(dir.join("config.json"), Config::default()));

        let (tx, rx) = mpsc::channel(4);
        let apps: Vec<Box<dyn DisplayApp>> =
            vec![Box::new(ClockApp::new(AppSettings::new()))];
        let scheduler = Arc::new(AppScheduler::new(apps, Arc::clone(&store), tx.clone()));
        let network = NetworkState::new();
        let (_pipeline, display) = RenderPipeline::new(
            MockPanel::new(),
            Arc::clone(&scheduler),
            network.clone(),
            store,
        );

        let state = AppState {
            scheduler,
            display,
            network,
            network_tx: tx,
        };
        (state, rx)
    }

    #[tokio::test]
    async fn credentials_rejected_outside_setup_mode() {
        let (state, _rx) = test_state("creds-idle");
        let request = CredentialsRequest {
            ssid: "HomeNet".to_string(),
            secret: "hunter22".to_string(),
        };

        let Err(err) = submit_credentials(State(state), Json(request)).await else {
            panic!("submission outside setup mode must be rejected");
        };
        assert_eq!(err.status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn credentials_forwarded_while_portal_serving() {
        let (state, mut rx) = test_state("creds-portal");
        state.network.set_phase(NetworkPhase::PortalServing);
        let request = CredentialsRequest {
            ssid: "HomeNet".to_string(),
            secret: "hunter22".to_string(),
        };

        assert!(submit_credentials(State(state), Json(request)).await.is_ok());
        assert!(matches!(
            rx.try_recv(),
            Ok(NetworkCommand::SubmitCredentials { .. })
        ));
    }
}
