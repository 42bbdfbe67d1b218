// -- std imports
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

// -- crate imports
use tracing::{debug, info, warn};

// -- module imports
use crate::error::{Error, Result};

pub const DEFAULT_VOLUME: i32 = 70;
pub const DEFAULT_BASS: i32 = 0;

pub const MIN_VOLUME: i32 = 0;
pub const MAX_VOLUME: i32 = 100;
pub const MIN_BASS: i32 = -5;
pub const MAX_BASS: i32 = 0;

const KEY_ADDRESS: &str = "DEVICE_IP";
const KEY_NAME: &str = "DEVICE_NAME";
const KEY_VOLUME: &str = "VOLUME";
const KEY_BASS: &str = "BASS";
const KEY_STATUS: &str = "STATUS";

pub fn clamp_volume(volume: i32) -> i32 {
    volume.clamp(MIN_VOLUME, MAX_VOLUME)
}

pub fn clamp_bass(bass: i32) -> i32 {
    bass.clamp(MIN_BASS, MAX_BASS)
}

/// Power/source state of the device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum DeviceStatus {
    #[default]
    Standby,
    On,
    Aux,
    Bluetooth,
}

impl DeviceStatus {
    /// Maps the `source` reported by the device onto a status.
    ///
    /// Anything that is neither standby nor one of the two local inputs means the device is awake
    /// on some other source, which counts as [`DeviceStatus::On`].
    pub fn from_source(source: &str) -> Self {
        match source.to_ascii_uppercase().as_str() {
            "STANDBY" => Self::Standby,
            "AUX" => Self::Aux,
            "BLUETOOTH" => Self::Bluetooth,
            other => {
                debug!(source = other, "Treating device source as ON");
                Self::On
            }
        }
    }

    /// Parses a user-supplied source/state token, case-insensitively.
    ///
    /// `off` is accepted as an alias for `standby`.
    pub fn from_token(token: &str) -> Option<Self> {
        match token.to_ascii_lowercase().as_str() {
            "aux" => Some(Self::Aux),
            "bluetooth" => Some(Self::Bluetooth),
            "standby" | "off" => Some(Self::Standby),
            "on" => Some(Self::On),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standby => "STANDBY",
            Self::On => "ON",
            Self::Aux => "AUX",
            Self::Bluetooth => "BLUETOOTH",
        }
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last-known state of the device, as mirrored in memory and on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSettings {
    /// Network address of the device.
    pub address: String,
    /// Display name of the device.
    pub name: String,
    /// Volume, valid within `0..=100`.
    pub volume: i32,
    /// Bass level, valid within `-5..=0`.
    pub bass: i32,
    pub status: DeviceStatus,
}

impl DeviceSettings {
    /// Settings for a freshly configured device: volume 70, bass 0, standby.
    pub fn new(address: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: name.into(),
            volume: DEFAULT_VOLUME,
            bass: DEFAULT_BASS,
            status: DeviceStatus::Standby,
        }
    }

    /// Renders the fixed key=value layout. Volume and bass are clamped on the way out.
    pub fn to_file_contents(&self) -> String {
        format!(
            "{KEY_ADDRESS}={}\n{KEY_NAME}={}\n{KEY_VOLUME}={}\n{KEY_BASS}={}\n{KEY_STATUS}={}\n",
            self.address,
            self.name,
            clamp_volume(self.volume),
            clamp_bass(self.bass),
            self.status,
        )
    }
}

impl FromStr for DeviceSettings {
    /// The reason the contents were rejected.
    type Err = String;

    fn from_str(contents: &str) -> std::result::Result<Self, Self::Err> {
        let mut address = None;
        let mut name = None;
        let mut volume = DEFAULT_VOLUME;
        let mut bass = DEFAULT_BASS;
        let mut status = DeviceStatus::Standby;

        for (number, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| format!("line {} is not a KEY=VALUE pair", number + 1))?;
            let value = value.trim();

            match key.trim() {
                KEY_ADDRESS => address = Some(value.to_string()),
                KEY_NAME => name = Some(value.to_string()),
                KEY_VOLUME => {
                    volume = value
                        .parse::<i32>()
                        .map_err(|e| format!("{KEY_VOLUME} '{value}' is not an integer: {e}"))?
                }
                KEY_BASS => {
                    bass = value
                        .parse::<i32>()
                        .map_err(|e| format!("{KEY_BASS} '{value}' is not an integer: {e}"))?
                }
                KEY_STATUS => {
                    status = DeviceStatus::from_token(value)
                        .ok_or_else(|| format!("{KEY_STATUS} '{value}' is not a known state"))?
                }
                other => debug!(key = other, "Ignoring unknown settings key"),
            }
        }

        let address = address.ok_or_else(|| format!("{KEY_ADDRESS} is missing"))?;
        let name = name.ok_or_else(|| format!("{KEY_NAME} is missing"))?;

        if clamp_volume(volume) != volume || clamp_bass(bass) != bass {
            warn!(volume, bass, "Clamping out-of-range values from settings file");
        }

        Ok(Self {
            address,
            name,
            volume: clamp_volume(volume),
            bass: clamp_bass(bass),
            status,
        })
    }
}

/// The durable copy of [`DeviceSettings`].
#[derive(Debug, Clone)]
pub struct SettingsFile {
    path: PathBuf,
}

impl SettingsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads and parses the settings file.
    ///
    /// # Errors
    /// - [`Error::Config`] if the file is missing, unreadable or malformed.
    pub fn load(&self) -> Result<DeviceSettings> {
        let contents = fs::read_to_string(&self.path).map_err(|e| self.config_error(e))?;
        let settings = contents
            .parse::<DeviceSettings>()
            .map_err(|reason| self.config_error(reason))?;

        info!(
            "Loaded settings for '{}' ({}) from '{}'.",
            settings.name,
            settings.address,
            self.path.display()
        );
        Ok(settings)
    }

    /// Loads the settings, or builds defaults from the identity returned by `identify`.
    ///
    /// The fallback is written back immediately so the next start finds a valid file.
    pub fn load_or_else<F>(&self, identify: F) -> anyhow::Result<DeviceSettings>
    where
        F: FnOnce() -> anyhow::Result<(String, String)>,
    {
        match self.load() {
            Ok(settings) => Ok(settings),
            Err(e) => {
                warn!("{}. Creating a new settings file.", e);
                let (address, name) = identify()?;
                let settings = DeviceSettings::new(address, name);
                self.save(&settings)?;
                Ok(settings)
            }
        }
    }

    /// Overwrites the settings file with `settings`.
    ///
    /// The contents go to a sibling temp file first and are renamed over the target, so a crash
    /// never leaves a truncated file behind.
    ///
    /// # Errors
    /// - [`Error::Persist`] if any step of the write fails.
    pub fn save(&self, settings: &DeviceSettings) -> Result<()> {
        let mut tmp_path = self.path.clone().into_os_string();
        tmp_path.push(".tmp");
        let tmp_path = PathBuf::from(tmp_path);

        let write = || -> std::io::Result<()> {
            if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
                fs::create_dir_all(dir)?;
            }
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(settings.to_file_contents().as_bytes())?;
            file.sync_all()?;
            fs::rename(&tmp_path, &self.path)
        };

        write().map_err(|source| Error::Persist {
            path: self.path.clone(),
            source,
        })?;

        debug!(
            volume = settings.volume,
            bass = settings.bass,
            status = %settings.status,
            "Settings written to '{}'",
            self.path.display()
        );
        Ok(())
    }

    fn config_error(&self, reason: impl fmt::Display) -> Error {
        Error::Config {
            path: self.path.clone(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn settings_file(dir: &TempDir) -> SettingsFile {
        SettingsFile::new(dir.path().join("settings.txt"))
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let file = settings_file(&dir);
        let settings = DeviceSettings {
            address: "192.168.1.40".into(),
            name: "Living Room".into(),
            volume: 35,
            bass: -3,
            status: DeviceStatus::Bluetooth,
        };

        file.save(&settings).unwrap();

        assert_eq!(file.load().unwrap(), settings);
    }

    #[test]
    fn save_writes_fixed_layout() {
        let dir = TempDir::new().unwrap();
        let file = settings_file(&dir);

        file.save(&DeviceSettings::new("10.0.0.5", "Kitchen")).unwrap();

        let contents = fs::read_to_string(file.path()).unwrap();
        assert_eq!(
            contents,
            "DEVICE_IP=10.0.0.5\nDEVICE_NAME=Kitchen\nVOLUME=70\nBASS=0\nSTATUS=STANDBY\n"
        );
        assert!(!dir.path().join("settings.txt.tmp").exists());
    }

    #[test]
    fn save_clamps_out_of_range_values() {
        let mut settings = DeviceSettings::new("10.0.0.5", "Kitchen");
        settings.volume = -30;
        settings.bass = 4;

        let contents = settings.to_file_contents();

        assert!(contents.contains("VOLUME=0\n"));
        assert!(contents.contains("BASS=0\n"));
    }

    #[test]
    fn parse_accepts_any_key_order_and_defaults_missing_state() {
        let settings: DeviceSettings = "DEVICE_NAME=Office\n\nDEVICE_IP=10.0.0.9\n".parse().unwrap();

        assert_eq!(settings, DeviceSettings::new("10.0.0.9", "Office"));
    }

    #[test]
    fn parse_keeps_equals_signs_in_values() {
        let settings: DeviceSettings = "DEVICE_IP=10.0.0.9\nDEVICE_NAME=A=B\n".parse().unwrap();
        assert_eq!(settings.name, "A=B");
    }

    #[test]
    fn parse_rejects_malformed_contents() {
        let cases = [
            "DEVICE_IP=10.0.0.9\nDEVICE_NAME=Office\njunk\n",
            "DEVICE_NAME=Office\n",
            "DEVICE_IP=10.0.0.9\n",
            "DEVICE_IP=10.0.0.9\nDEVICE_NAME=Office\nVOLUME=loud\n",
            "DEVICE_IP=10.0.0.9\nDEVICE_NAME=Office\nBASS=-x\n",
            "DEVICE_IP=10.0.0.9\nDEVICE_NAME=Office\nSTATUS=RADIO\n",
        ];

        for contents in cases {
            assert!(
                contents.parse::<DeviceSettings>().is_err(),
                "expected rejection of {contents:?}"
            );
        }
    }

    #[test]
    fn load_missing_file_is_config_error() {
        let dir = TempDir::new().unwrap();

        let err = settings_file(&dir).load().unwrap_err();

        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn load_or_else_falls_back_to_defaults_and_persists() {
        let dir = TempDir::new().unwrap();
        let file = settings_file(&dir);
        fs::write(file.path(), "garbage without separator").unwrap();

        let settings = file
            .load_or_else(|| Ok(("10.0.0.7".into(), "Den".into())))
            .unwrap();

        assert_eq!(settings.volume, 70);
        assert_eq!(settings.bass, 0);
        assert_eq!(settings.status, DeviceStatus::Standby);
        assert_eq!(file.load().unwrap(), settings);
    }

    #[test]
    fn load_or_else_skips_prompt_for_valid_file() {
        let dir = TempDir::new().unwrap();
        let file = settings_file(&dir);
        let stored = DeviceSettings::new("10.0.0.7", "Den");
        file.save(&stored).unwrap();

        let settings = file
            .load_or_else(|| panic!("prompt must not run for a valid file"))
            .unwrap();

        assert_eq!(settings, stored);
    }

    #[test]
    fn source_and_token_mapping() {
        assert_eq!(DeviceStatus::from_source("STANDBY"), DeviceStatus::Standby);
        assert_eq!(DeviceStatus::from_source("AUX"), DeviceStatus::Aux);
        assert_eq!(DeviceStatus::from_source("BLUETOOTH"), DeviceStatus::Bluetooth);
        assert_eq!(DeviceStatus::from_source("SPOTIFY"), DeviceStatus::On);

        assert_eq!(DeviceStatus::from_token("AUX"), Some(DeviceStatus::Aux));
        assert_eq!(DeviceStatus::from_token("aux"), Some(DeviceStatus::Aux));
        assert_eq!(DeviceStatus::from_token("off"), Some(DeviceStatus::Standby));
        assert_eq!(DeviceStatus::from_token("STANDBY"), Some(DeviceStatus::Standby));
        assert_eq!(DeviceStatus::from_token("On"), Some(DeviceStatus::On));
        assert_eq!(DeviceStatus::from_token("radio"), None);
    }
}
