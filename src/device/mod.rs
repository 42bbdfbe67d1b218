//! The device-control boundary.
//!
//! [`Connector`] opens a session to a device at an address and hands back a [`DeviceHandle`].
//! The session layer only talks to these two traits; [`soundtouch`] implements them for Bose
//! SoundTouch speakers.

pub mod observer;
pub mod soundtouch;
pub mod xml;

#[cfg(test)]
pub mod fake;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::settings::DeviceStatus;

/// Changes pushed by the device outside of our control, e.g. from a physical remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// The device reported its actual volume.
    Volume(i32),
    /// The device reported its actual bass level.
    Bass(i32),
    /// The device switched source or power state.
    Status(DeviceStatus),
    /// The notification stream ended; no further events will arrive on this handle.
    StreamClosed,
}

/// Failures of the device transport.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// The HTTP request could not be sent or its response could not be read
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The device answered with a non-success status
    #[error("Device rejected {endpoint}: HTTP {status}")]
    Rejected {
        /// The API endpoint that was called
        endpoint: String,
        /// The HTTP status code returned
        status: u16,
    },

    /// The response body was not the XML we expected
    #[error("Could not parse device response: {0}")]
    Parse(String),

    /// The notification websocket failed
    #[error("Notification stream failed: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The device cannot take calls right now
    #[error("Device unavailable: {0}")]
    Unavailable(String),
}

pub type DeviceResult<T> = std::result::Result<T, DeviceError>;

/// An established session to a physical device.
#[async_trait]
pub trait DeviceHandle: Send + Sync + std::fmt::Debug {
    async fn set_volume(&self, volume: i32) -> DeviceResult<()>;

    async fn set_bass(&self, bass: i32) -> DeviceResult<()>;

    /// Wakes the device from standby. No-op when it is already on.
    async fn power_on(&self) -> DeviceResult<()>;

    /// Puts the device into standby. No-op when it already is.
    async fn power_off(&self) -> DeviceResult<()>;

    async fn select_source_aux(&self) -> DeviceResult<()>;

    async fn select_source_bluetooth(&self) -> DeviceResult<()>;

    /// Queries the current power/source state.
    async fn status(&self) -> DeviceResult<DeviceStatus>;

    /// Subscribes to device-pushed changes.
    ///
    /// Subscribe before calling [`DeviceHandle::start_notification`] so no event is missed.
    fn subscribe(&self) -> broadcast::Receiver<DeviceEvent>;

    /// Starts delivering notifications to subscribers.
    async fn start_notification(&self) -> DeviceResult<()>;
}

/// Opens device sessions.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, address: &str) -> DeviceResult<Arc<dyn DeviceHandle>>;
}
