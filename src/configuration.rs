// -- std imports
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::sync::OnceLock;
use std::{fs, time::Duration};

// -- crate imports (conditional)
// for some reason, this is flagged as unused
#[cfg(not(debug_assertions))]
#[allow(unused_imports)]
use anyhow::Context;

// -- crate imports
use anyhow::Result;
use tracing::{info, warn};

// -- module imports
#[cfg(not(debug_assertions))]
use crate::log::APP_NAME;
use crate::serde_ext::humantime_serde_duration;

/// Global singleton instance of [`Conf`].
static CONF: OnceLock<Conf> = OnceLock::new();

/// Returns the path to the configuration file.
///
/// In debug builds this is `./contrib/config.yml` in the current working directory. In release
/// builds this uses the XDG base directory and resolves to a path like
/// `~/.config/soundtouch-remote/config.yml`.
///
/// # Errors
/// - [`anyhow::Error`] if the config file path cannot be determined (release builds only).
pub fn conf_filepath() -> Result<String> {
    #[cfg(debug_assertions)]
    {
        Ok("./contrib/config.yml".into())
    }

    #[cfg(not(debug_assertions))]
    {
        xdg::BaseDirectories::with_prefix(APP_NAME)
            .get_config_file("config.yml")
            .map(|path| path.to_string_lossy().to_string())
            .context("Could not determine config file path")
    }
}

/// Default location of the device settings file.
///
/// Debug builds keep it in the working directory; release builds place it in the XDG data dir.
fn default_settings_filepath() -> PathBuf {
    const SETTINGS_FILE_NAME: &str = "settings.txt";

    #[cfg(debug_assertions)]
    {
        PathBuf::from(SETTINGS_FILE_NAME)
    }

    #[cfg(not(debug_assertions))]
    {
        xdg::BaseDirectories::with_prefix(APP_NAME)
            .place_data_file(SETTINGS_FILE_NAME)
            .unwrap_or_else(|e| {
                warn!(
                    "Could not place settings file in the XDG data dir: {}. Using the working \
                    directory.",
                    e
                );
                PathBuf::from(SETTINGS_FILE_NAME)
            })
    }
}

/// Application configuration.
///
/// This type is deserialized from a YAML config file. Every field is optional and falls back to
/// the built-in default.
#[derive(Debug, PartialEq, Eq, Clone, serde::Deserialize)]
#[serde(default)]
pub struct Conf {
    /// Path of the key=value file holding the device address, name and last-known state.
    ///
    /// Default: `./settings.txt` (debug), `~/.local/share/soundtouch-remote/settings.txt`
    /// (release).
    pub settings_file: PathBuf,

    /// HTTP control surface.
    pub http: HttpConf,

    /// Device transport.
    pub device: DeviceConf,

    /// Connection lifecycle.
    pub session: SessionConf,
}

/// HTTP listener configuration.
#[derive(Debug, PartialEq, Eq, Clone, serde::Deserialize)]
#[serde(default)]
pub struct HttpConf {
    /// Address to bind to.
    ///
    /// Default: `127.0.0.1`.
    pub address: IpAddr,

    /// Port to bind to.
    ///
    /// Default: `9999`.
    pub port: u16,
}

/// SoundTouch transport configuration.
#[derive(Debug, PartialEq, Eq, Clone, serde::Deserialize)]
#[serde(default)]
pub struct DeviceConf {
    /// Port of the device's HTTP API.
    ///
    /// Default: `8090`.
    pub api_port: u16,

    /// Port of the device's notification websocket.
    ///
    /// Default: `8080`.
    pub websocket_port: u16,

    /// Timeout applied to every HTTP request sent to the device.
    ///
    /// Default: `5s`.
    #[serde(deserialize_with = "humantime_serde_duration::deserialize")]
    pub request_timeout: Duration,
}

/// Device session configuration.
#[derive(Debug, PartialEq, Eq, Clone, serde::Deserialize)]
#[serde(default)]
pub struct SessionConf {
    /// First delay between connection attempts.
    ///
    /// Default: `500ms`.
    #[serde(deserialize_with = "humantime_serde_duration::deserialize")]
    pub retry_initial: Duration,

    /// Upper bound for the delay between connection attempts.
    ///
    /// Default: `30s`.
    #[serde(deserialize_with = "humantime_serde_duration::deserialize")]
    pub retry_max: Duration,

    /// Whether a failed device call or a lost notification stream drops the handle and
    /// reconnects. When disabled the session keeps the (possibly stale) handle.
    ///
    /// Default: `true`.
    pub reacquire_on_failure: bool,
}

impl Default for Conf {
    fn default() -> Self {
        Self {
            settings_file: default_settings_filepath(),
            http: HttpConf::default(),
            device: DeviceConf::default(),
            session: SessionConf::default(),
        }
    }
}

impl Default for HttpConf {
    fn default() -> Self {
        Self {
            address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 9999,
        }
    }
}

impl Default for DeviceConf {
    fn default() -> Self {
        Self {
            api_port: 8090,
            websocket_port: 8080,
            request_timeout: Duration::from_secs(5),
        }
    }
}

impl Default for SessionConf {
    fn default() -> Self {
        Self {
            retry_initial: Duration::from_millis(500),
            retry_max: Duration::from_secs(30),
            reacquire_on_failure: true,
        }
    }
}

impl Conf {
    /// Loads the configuration from [`conf_filepath`] into the global instance.
    ///
    /// If the path cannot be determined or the file cannot be read or parsed, falls back to
    /// [`Conf::instance`], which uses the default configuration.
    pub fn load() -> &'static Self {
        match conf_filepath() {
            Ok(p) => Self::from_file(&p),
            Err(e) => {
                warn!(
                    "Could not determine config file path: {}. Falling back to defaults.",
                    e
                );
                Self::instance()
            }
        }
    }

    /// Initializes the global configuration from the YAML file at `path`.
    ///
    /// If the configuration is already initialized, the existing instance is returned and the file
    /// is ignored. On any read or parse error, falls back to [`Conf::default`].
    pub fn from_file(path: &str) -> &'static Self {
        if let Some(conf) = CONF.get() {
            warn!(path, "Configuration already loaded; not reading it again.");
            return conf;
        }

        CONF.get_or_init(|| Self::read(path).unwrap_or_default())
    }

    /// Reads and parses the YAML file at `path` without touching the global instance.
    fn read(path: &str) -> Option<Self> {
        fs::read_to_string(path)
            .map_err(|e| {
                warn!(
                    "Could not read config file '{}': {}. Falling back to defaults.",
                    path, e
                );
            })
            .and_then(|contents| {
                serde_yaml::from_str::<Conf>(&contents).map_err(|e| {
                    warn!(
                        "Could not parse config file '{}': {}. Falling back to defaults.",
                        path, e
                    );
                })
            })
            .map(|conf| {
                info!(path, "Configuration loaded.");
                conf
            })
            .ok()
    }

    /// Returns the global configuration instance.
    ///
    /// If the configuration has not been loaded yet, this initializes it with [`Conf::default`]
    /// and logs a warning.
    pub fn instance() -> &'static Self {
        CONF.get_or_init(|| {
            warn!("No configuration loaded yet; using built-in defaults.");
            Conf::default()
        })
    }
}
