// -- std imports
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

// -- crate imports
use tracing::{debug, info};

// -- module imports
use crate::error::Result;
use crate::settings::{
    DeviceSettings, DeviceStatus, MAX_BASS, MIN_BASS, SettingsFile, clamp_bass, clamp_volume,
};

/// A volume change requested by a local command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeChange {
    /// Add to the current volume. Not clamped here; the device call clamps.
    Relative(i32),
    /// Replace the current volume. Callers validate the range first.
    Absolute(i32),
}

/// A bass change requested by a local command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BassChange {
    Increase,
    Decrease,
    Absolute(i32),
}

/// In-memory mirror of the device state, persisted on every mutation.
///
/// Local commands and device notifications both go through the same mutex, and the file write
/// happens while it is held, so concurrent mutations never interleave on disk.
#[derive(Debug, Clone)]
pub struct StateStore {
    settings: Arc<Mutex<DeviceSettings>>,
    file: SettingsFile,
}

impl StateStore {
    pub fn new(settings: DeviceSettings, file: SettingsFile) -> Self {
        Self {
            settings: Arc::new(Mutex::new(settings)),
            file,
        }
    }

    /// Returns a copy of the current settings.
    pub fn snapshot(&self) -> DeviceSettings {
        self.lock().clone()
    }

    pub fn status(&self) -> DeviceStatus {
        self.lock().status
    }

    /// Applies a local volume change and returns the new volume.
    pub fn apply_volume(&self, change: VolumeChange) -> Result<i32> {
        self.mutate(|settings| {
            settings.volume = match change {
                VolumeChange::Relative(delta) => settings.volume + delta,
                VolumeChange::Absolute(volume) => volume,
            };
            debug!(?change, volume = settings.volume, "Volume applied");
            settings.volume
        })
    }

    /// Applies a local bass change and returns the new level, kept within `-5..=0`.
    pub fn apply_bass(&self, change: BassChange) -> Result<i32> {
        self.mutate(|settings| {
            settings.bass = match change {
                BassChange::Increase => (settings.bass + 1).min(MAX_BASS),
                BassChange::Decrease => (settings.bass - 1).max(MIN_BASS),
                BassChange::Absolute(bass) => clamp_bass(bass),
            };
            debug!(?change, bass = settings.bass, "Bass applied");
            settings.bass
        })
    }

    pub fn apply_status(&self, status: DeviceStatus) -> Result<()> {
        self.mutate(|settings| {
            debug!(%status, "Status applied");
            settings.status = status;
        })
    }

    /// Records a volume change reported by the device itself.
    pub fn on_external_volume_update(&self, volume: i32) -> Result<()> {
        self.mutate(|settings| {
            if settings.volume != volume {
                info!(from = settings.volume, to = volume, "Device reported volume change");
            }
            settings.volume = clamp_volume(volume);
        })
    }

    /// Records a bass change reported by the device itself.
    pub fn on_external_bass_update(&self, bass: i32) -> Result<()> {
        self.mutate(|settings| {
            if settings.bass != bass {
                info!(from = settings.bass, to = bass, "Device reported bass change");
            }
            settings.bass = clamp_bass(bass);
        })
    }

    /// Records a status change reported by the device itself.
    pub fn on_external_status_update(&self, status: DeviceStatus) -> Result<()> {
        self.mutate(|settings| {
            if settings.status != status {
                info!(from = %settings.status, to = %status, "Device reported status change");
            }
            settings.status = status;
        })
    }

    /// Applies `apply` to a copy and only keeps it once the copy is on disk.
    ///
    /// The save blocks the calling worker while the lock is held; writes are a few bytes and only
    /// happen on user commands or device notifications.
    fn mutate<T>(&self, apply: impl FnOnce(&mut DeviceSettings) -> T) -> Result<T> {
        let mut settings = self.lock();
        let mut next = settings.clone();
        let out = apply(&mut next);
        self.file.save(&next)?;
        *settings = next;
        Ok(out)
    }

    fn lock(&self) -> MutexGuard<'_, DeviceSettings> {
        // A panic mid-mutation leaves plain data behind; keep serving it.
        self.settings.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
