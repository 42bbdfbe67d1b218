//! Error types shared by the settings store, the device session and the HTTP surface.

use std::path::PathBuf;

use crate::device::DeviceError;

/// Errors surfaced by the control surface.
///
/// None of these are fatal to the process: every path degrades to "report failure, keep the
/// previous state".
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The settings file is missing, unreadable or malformed
    #[error("Settings file '{}' is missing or corrupted: {reason}", path.display())]
    Config {
        /// The file that was read
        path: PathBuf,
        /// What was wrong with it
        reason: String,
    },

    /// The device could not be reached while acquiring a session
    #[error("Could not connect to device at {address}: {source}")]
    Connection {
        /// The configured device address
        address: String,
        /// The underlying transport failure
        #[source]
        source: DeviceError,
    },

    /// A command was issued while no device handle is held
    #[error("No device connected")]
    NotConnected,

    /// The requested source/state token is not one of aux, bluetooth, standby/off or on
    #[error("Unsupported source: {0}")]
    UnsupportedSource(String),

    /// External input failed validation before reaching the store
    #[error("{0}")]
    Validation(String),

    /// A call on an established device session failed
    #[error("Device call failed: {0}")]
    Device(#[from] DeviceError),

    /// The settings file could not be written
    #[error("Could not persist settings to '{}': {source}", path.display())]
    Persist {
        /// The file that was written
        path: PathBuf,
        /// The underlying I/O failure
        #[source]
        source: std::io::Error,
    },
}

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;
