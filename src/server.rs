//! HTTP control surface.
//!
//! `GET /status` reports the mirrored device state; every command is a `POST` to a single path
//! segment (`/increase-vol`, `/set-volume-40`, `/set-bass--2`, `/set-aux`, ...).

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::configuration::HttpConf;
use crate::error::Error;
use crate::session::DeviceSession;
use crate::settings::{DeviceSettings, MAX_BASS, MAX_VOLUME, MIN_BASS, MIN_VOLUME};

/// Volume change applied by `/increase-vol` and `/decrease-vol`.
pub const VOLUME_STEP: i32 = 5;

const SET_VOLUME_PREFIX: &str = "set-volume-";
const SET_BASS_PREFIX: &str = "set-bass-";
const SET_SOURCE_PREFIX: &str = "set-";

/// Shared application context passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub session: Arc<DeviceSession>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    device: Option<DeviceView>,
}

/// Volume and bass are reported as strings.
#[derive(Debug, Serialize)]
pub struct DeviceView {
    name: String,
    ip: String,
    status: String,
    volume: String,
    bass: String,
}

impl From<DeviceSettings> for DeviceView {
    fn from(settings: DeviceSettings) -> Self {
        Self {
            name: settings.name,
            ip: settings.address,
            status: settings.status.to_string(),
            volume: settings.volume.to_string(),
            bass: settings.bass.to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::Validation(_) | Error::UnsupportedSource(_) => StatusCode::BAD_REQUEST,
            Error::NotConnected => StatusCode::SERVICE_UNAVAILABLE,
            Error::Device(_) | Error::Connection { .. } => StatusCode::BAD_GATEWAY,
            Error::Config { .. } | Error::Persist { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = match self {
            Error::UnsupportedSource(_) => "Unrecognized state".to_string(),
            other => other.to_string(),
        };

        (status, body).into_response()
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/status", get(status))
        // axum cannot capture part of a segment, so `set-volume-<n>` and `set-<state>` share
        // this route and are told apart in `command`.
        .route("/:command", post(command))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Serves the control surface until ctrl-c.
pub async fn serve(conf: &HttpConf, state: AppState) -> Result<()> {
    let addr = SocketAddr::new(conf.address, conf.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Could not bind HTTP listener to {addr}"))?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Could not listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested.");
}

async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let device = state
        .session
        .is_connected()
        .then(|| state.session.store().snapshot().into());

    Json(StatusResponse { device })
}

async fn command(State(state): State<AppState>, Path(command): Path<String>) -> Response {
    let session = &state.session;

    let result = match command.as_str() {
        "increase-vol" => session.change_volume_by(VOLUME_STEP).await.map(drop),
        "decrease-vol" => session.change_volume_by(-VOLUME_STEP).await.map(drop),
        "increase-bass" => session.increase_bass().await.map(drop),
        "decrease-bass" => session.decrease_bass().await.map(drop),
        "toggle-state" => session.toggle().await.map(drop),
        other => {
            if let Some(amount) = other.strip_prefix(SET_VOLUME_PREFIX) {
                match parse_volume(amount) {
                    Ok(volume) => session.set_volume(volume).await,
                    Err(e) => Err(e),
                }
            } else if let Some(amount) = other.strip_prefix(SET_BASS_PREFIX) {
                match parse_bass(amount) {
                    Ok(bass) => session.set_bass(bass).await,
                    Err(e) => Err(e),
                }
            } else if let Some(token) = other.strip_prefix(SET_SOURCE_PREFIX) {
                session.set_source(token).await.map(drop)
            } else {
                return StatusCode::NOT_FOUND.into_response();
            }
        }
    };

    match result {
        Ok(()) => (StatusCode::OK, "OK").into_response(),
        Err(e) => {
            warn!(command, "Command failed: {}", e);
            e.into_response()
        }
    }
}

/// Validates an absolute volume before it reaches the session.
pub fn parse_volume(amount: &str) -> Result<i32, Error> {
    parse_level(amount, MIN_VOLUME, MAX_VOLUME)
}

/// Validates an absolute bass level before it reaches the session.
pub fn parse_bass(amount: &str) -> Result<i32, Error> {
    parse_level(amount, MIN_BASS, MAX_BASS)
}

fn parse_level(amount: &str, min: i32, max: i32) -> Result<i32, Error> {
    let level = amount
        .parse::<i32>()
        .map_err(|_| Error::Validation("amount is not an integer".into()))?;

    if !(min..=max).contains(&level) {
        return Err(Error::Validation(format!(
            "amount is not in range [{min}, {max}]"
        )));
    }

    Ok(level)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::Request;
    use serde_json::{Value, json};
    use tempfile::TempDir;
    use tower::util::ServiceExt;

    use super::*;
    use crate::configuration::SessionConf;
    use crate::device::fake::{Call, FakeConnector, FakeDevice};
    use crate::settings::{DeviceStatus, SettingsFile};
    use crate::store::StateStore;

    struct Fixture {
        _dir: TempDir,
        device: Arc<FakeDevice>,
        session: Arc<DeviceSession>,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(
            DeviceSettings::new("192.168.1.20", "Office"),
            SettingsFile::new(dir.path().join("settings.txt")),
        );
        let device = FakeDevice::new(DeviceStatus::Standby);
        let conf = SessionConf {
            retry_initial: Duration::from_millis(1),
            retry_max: Duration::from_millis(5),
            reacquire_on_failure: true,
        };
        let session = DeviceSession::new(store, FakeConnector::new(device.clone(), 0), conf);
        Fixture {
            _dir: dir,
            device,
            session,
        }
    }

    async fn connected_fixture() -> Fixture {
        let f = fixture();
        f.session.acquire().await;
        f.device.clear_calls();
        f
    }

    async fn send(f: &Fixture, method: &str, uri: &str) -> (StatusCode, String) {
        let app = build_router(AppState {
            session: f.session.clone(),
        });
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn status_is_null_while_disconnected() {
        let f = fixture();

        let (status, body) = send(&f, "GET", "/status").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(serde_json::from_str::<Value>(&body).unwrap(), json!({ "device": null }));
    }

    #[tokio::test]
    async fn status_reports_device_with_string_levels() {
        let f = connected_fixture().await;

        let (status, body) = send(&f, "GET", "/status").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            serde_json::from_str::<Value>(&body).unwrap(),
            json!({
                "device": {
                    "name": "Office",
                    "ip": "192.168.1.20",
                    "status": "STANDBY",
                    "volume": "70",
                    "bass": "0"
                }
            })
        );
    }

    #[tokio::test]
    async fn volume_steps() {
        let f = connected_fixture().await;

        assert_eq!(send(&f, "POST", "/increase-vol").await, (StatusCode::OK, "OK".into()));
        assert_eq!(send(&f, "POST", "/decrease-vol").await.0, StatusCode::OK);
        assert_eq!(send(&f, "POST", "/decrease-vol").await.0, StatusCode::OK);

        assert_eq!(
            f.device.calls(),
            vec![Call::SetVolume(75), Call::SetVolume(70), Call::SetVolume(65)]
        );
    }

    #[tokio::test]
    async fn bass_steps() {
        let f = connected_fixture().await;

        assert_eq!(send(&f, "POST", "/decrease-bass").await.0, StatusCode::OK);
        assert_eq!(send(&f, "POST", "/increase-bass").await.0, StatusCode::OK);
        assert_eq!(send(&f, "POST", "/increase-bass").await.0, StatusCode::OK);

        assert_eq!(
            f.device.calls(),
            vec![Call::SetBass(-1), Call::SetBass(0), Call::SetBass(0)]
        );
    }

    #[tokio::test]
    async fn set_volume_accepts_range() {
        let f = connected_fixture().await;

        assert_eq!(send(&f, "POST", "/set-volume-0").await.0, StatusCode::OK);
        assert_eq!(send(&f, "POST", "/set-volume-100").await.0, StatusCode::OK);

        assert_eq!(f.device.calls(), vec![Call::SetVolume(0), Call::SetVolume(100)]);
        assert_eq!(f.session.store().snapshot().volume, 100);
    }

    #[tokio::test]
    async fn set_volume_rejects_before_touching_the_store() {
        let f = connected_fixture().await;

        assert_eq!(
            send(&f, "POST", "/set-volume--30").await,
            (
                StatusCode::BAD_REQUEST,
                "amount is not in range [0, 100]".into()
            )
        );
        assert_eq!(
            send(&f, "POST", "/set-volume-101").await.0,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            send(&f, "POST", "/set-volume-loud").await,
            (StatusCode::BAD_REQUEST, "amount is not an integer".into())
        );

        assert!(f.device.calls().is_empty());
        assert_eq!(f.session.store().snapshot().volume, 70);
    }

    #[tokio::test]
    async fn set_bass_within_range() {
        let f = connected_fixture().await;

        assert_eq!(send(&f, "POST", "/set-bass--3").await, (StatusCode::OK, "OK".into()));
        assert_eq!(
            send(&f, "POST", "/set-bass-2").await,
            (StatusCode::BAD_REQUEST, "amount is not in range [-5, 0]".into())
        );
        assert_eq!(
            send(&f, "POST", "/set-bass-deep").await,
            (StatusCode::BAD_REQUEST, "amount is not an integer".into())
        );

        assert_eq!(f.device.calls(), vec![Call::SetBass(-3)]);
        assert_eq!(f.session.store().snapshot().bass, -3);
    }

    #[tokio::test]
    async fn set_source_tokens() {
        let f = connected_fixture().await;

        assert_eq!(send(&f, "POST", "/set-AUX").await.0, StatusCode::OK);
        assert_eq!(send(&f, "POST", "/set-bluetooth").await.0, StatusCode::OK);
        assert_eq!(
            send(&f, "POST", "/set-radio").await,
            (StatusCode::BAD_REQUEST, "Unrecognized state".into())
        );

        assert_eq!(f.device.calls(), vec![Call::SelectAux, Call::SelectBluetooth]);
        assert_eq!(f.session.store().status(), DeviceStatus::Bluetooth);
    }

    #[tokio::test]
    async fn toggle_state() {
        let f = connected_fixture().await;

        assert_eq!(send(&f, "POST", "/toggle-state").await.0, StatusCode::OK);

        assert_eq!(f.session.store().status(), DeviceStatus::On);
        assert_eq!(f.device.calls()[0], Call::PowerOn);
    }

    #[tokio::test]
    async fn commands_report_unavailable_while_disconnected() {
        let f = fixture();

        let (status, body) = send(&f, "POST", "/increase-vol").await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body, "No device connected");
        assert_eq!(f.session.store().snapshot().volume, 70);
    }

    #[tokio::test]
    async fn device_failure_maps_to_bad_gateway() {
        let f = connected_fixture().await;
        f.device.fail(true);

        assert_eq!(send(&f, "POST", "/set-aux").await.0, StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn unknown_command_is_not_found() {
        let f = connected_fixture().await;

        assert_eq!(send(&f, "POST", "/reboot").await.0, StatusCode::NOT_FOUND);
        assert_eq!(send(&f, "GET", "/increase-vol").await.0, StatusCode::METHOD_NOT_ALLOWED);
    }

    #[test]
    fn parse_volume_bounds() {
        assert_eq!(parse_volume("0").unwrap(), 0);
        assert_eq!(parse_volume("100").unwrap(), 100);
        assert!(matches!(parse_volume("-1"), Err(Error::Validation(_))));
        assert!(matches!(parse_volume("101"), Err(Error::Validation(_))));
        assert!(matches!(parse_volume("4.5"), Err(Error::Validation(_))));
        assert_eq!(parse_bass("-5").unwrap(), -5);
        assert!(matches!(parse_bass("-6"), Err(Error::Validation(_))));
        assert!(matches!(parse_bass("1"), Err(Error::Validation(_))));
    }
}
