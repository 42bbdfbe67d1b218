use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use backoff::{ExponentialBackoffBuilder, backoff::Backoff};
use tokio::sync::{Notify, RwLock, broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::configuration::SessionConf;
use crate::device::{Connector, DeviceEvent, DeviceHandle, DeviceResult};
use crate::error::{Error, Result};
use crate::settings::{DeviceSettings, DeviceStatus, clamp_bass, clamp_volume};
use crate::store::{BassChange, StateStore, VolumeChange};

/// Connection state of a [`DeviceSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

/// Owns the connection to the device and turns high-level intents into device calls.
///
/// Local state in the [`StateStore`] is authoritative on (re)connect: the cached volume, bass and
/// source are pushed onto the device before notifications start flowing back.
pub struct DeviceSession {
    store: StateStore,
    connector: Arc<dyn Connector>,
    conf: SessionConf,
    handle: RwLock<Option<Arc<dyn DeviceHandle>>>,
    listener: Mutex<Option<JoinHandle<()>>>,
    state: watch::Sender<ConnectionState>,
    lost: Notify,
}

impl DeviceSession {
    pub fn new(store: StateStore, connector: Arc<dyn Connector>, conf: SessionConf) -> Arc<Self> {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Arc::new(Self {
            store,
            connector,
            conf,
            handle: RwLock::new(None),
            listener: Mutex::new(None),
            state,
            lost: Notify::new(),
        })
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Spawns the supervisor task: acquire, wait until the session is lost, acquire again.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let session = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                session.acquire().await;
                session.lost.notified().await;
                info!("Device session lost. Re-acquiring...");
            }
        })
    }

    /// Retries until a device session is established. Never gives up.
    #[instrument(skip(self))]
    pub async fn acquire(self: &Arc<Self>) {
        let mut backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.conf.retry_initial)
            .with_max_interval(self.conf.retry_max)
            .with_max_elapsed_time(None)
            .build();

        loop {
            self.set_state(ConnectionState::Connecting);

            match self.try_acquire().await {
                Ok((handle, events)) => {
                    *self.handle.write().await = Some(Arc::clone(&handle));
                    self.spawn_listener(&handle, events);
                    self.set_state(ConnectionState::Connected);
                    info!("Device session established.");
                    return;
                }
                Err(e) => {
                    self.set_state(ConnectionState::Disconnected);
                    let wait = backoff.next_backoff().unwrap_or(self.conf.retry_max);
                    warn!("Could not acquire device: {}. Retrying in {:?}.", e, wait);
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    async fn try_acquire(
        &self,
    ) -> Result<(Arc<dyn DeviceHandle>, broadcast::Receiver<DeviceEvent>)> {
        let settings = self.store.snapshot();
        let handle = self
            .connector
            .connect(&settings.address)
            .await
            .map_err(|source| Error::Connection {
                address: settings.address.clone(),
                source,
            })?;

        debug!("Pushing cached state onto device: {:?}", settings);
        handle.set_volume(clamp_volume(settings.volume)).await?;
        handle.set_bass(clamp_bass(settings.bass)).await?;
        push_source(handle.as_ref(), settings.status, &settings).await?;

        let status = handle.status().await?;
        self.store.on_external_status_update(status)?;

        let events = handle.subscribe();
        handle.start_notification().await?;

        Ok((handle, events))
    }

    /// Drains device notifications into the store until the stream closes.
    fn spawn_listener(
        self: &Arc<Self>,
        handle: &Arc<dyn DeviceHandle>,
        mut events: broadcast::Receiver<DeviceEvent>,
    ) {
        let session = Arc::downgrade(self);
        let handle = Arc::clone(handle);
        let store = self.store.clone();

        let task = tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Notification listener fell behind.");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => DeviceEvent::StreamClosed,
                };
                debug!("Device notification: {:?}", event);

                let recorded = match event {
                    DeviceEvent::Volume(volume) => store.on_external_volume_update(volume),
                    DeviceEvent::Bass(bass) => store.on_external_bass_update(bass),
                    DeviceEvent::Status(status) => store.on_external_status_update(status),
                    DeviceEvent::StreamClosed => {
                        if let Some(session) = session.upgrade() {
                            session
                                .invalidate(&handle, "notification stream closed")
                                .await;
                        }
                        break;
                    }
                };

                if let Err(e) = recorded {
                    error!("Could not record device notification: {}", e);
                }
            }
        });

        if let Some(previous) = self.lock_listener().replace(task) {
            previous.abort();
        }
    }

    /// Drops `handle` if it is still the current one and wakes the supervisor.
    async fn invalidate(&self, handle: &Arc<dyn DeviceHandle>, reason: &str) {
        if !self.conf.reacquire_on_failure {
            warn!(
                reason,
                "Device session failed; keeping the possibly stale handle (reacquire disabled)."
            );
            return;
        }

        {
            let mut current = self.handle.write().await;
            let is_current = current
                .as_ref()
                .is_some_and(|current| Arc::ptr_eq(current, handle));
            if !is_current {
                debug!(reason, "Ignoring failure of an already replaced handle.");
                return;
            }
            *current = None;
        }

        // Taken before waking the supervisor, which installs the next listener.
        let listener = self.lock_listener().take();
        self.set_state(ConnectionState::Disconnected);
        warn!(reason, "Dropped device handle.");
        self.lost.notify_one();

        if let Some(listener) = listener {
            listener.abort();
        }
    }

    async fn device(&self) -> Result<Arc<dyn DeviceHandle>> {
        self.handle.read().await.clone().ok_or(Error::NotConnected)
    }

    /// Passes a device call result through, dropping the handle on failure.
    async fn checked<T>(&self, handle: &Arc<dyn DeviceHandle>, result: DeviceResult<T>) -> Result<T> {
        match result {
            Ok(value) => Ok(value),
            Err(e) => {
                self.invalidate(handle, &e.to_string()).await;
                Err(Error::Device(e))
            }
        }
    }

    /// Sets an absolute volume. The store records it once the device accepted it.
    pub async fn set_volume(&self, volume: i32) -> Result<()> {
        let handle = self.device().await?;
        let result = handle.set_volume(clamp_volume(volume)).await;
        self.checked(&handle, result).await?;
        self.store.apply_volume(VolumeChange::Absolute(volume))?;
        Ok(())
    }

    /// Sets an absolute bass level. The store records it once the device accepted it.
    pub async fn set_bass(&self, bass: i32) -> Result<()> {
        let handle = self.device().await?;
        let result = handle.set_bass(clamp_bass(bass)).await;
        self.checked(&handle, result).await?;
        self.store.apply_bass(BassChange::Absolute(bass))?;
        Ok(())
    }

    /// Adjusts the volume relative to the cached value and returns the new cached value.
    pub async fn change_volume_by(&self, delta: i32) -> Result<i32> {
        let handle = self.device().await?;
        let volume = self.store.apply_volume(VolumeChange::Relative(delta))?;
        let result = handle.set_volume(clamp_volume(volume)).await;
        self.checked(&handle, result).await?;
        Ok(volume)
    }

    pub async fn increase_bass(&self) -> Result<i32> {
        self.step_bass(BassChange::Increase).await
    }

    pub async fn decrease_bass(&self) -> Result<i32> {
        self.step_bass(BassChange::Decrease).await
    }

    async fn step_bass(&self, change: BassChange) -> Result<i32> {
        let handle = self.device().await?;
        let bass = self.store.apply_bass(change)?;
        let result = handle.set_bass(bass).await;
        self.checked(&handle, result).await?;
        Ok(bass)
    }

    /// Powers the device on and restores the cached volume and bass, which power-on may reset.
    pub async fn set_power_on(&self) -> Result<DeviceStatus> {
        self.switch_to(DeviceStatus::On).await
    }

    pub async fn power_off(&self) -> Result<()> {
        self.switch_to(DeviceStatus::Standby).await.map(drop)
    }

    /// Switches source or power state from a case-insensitive token
    /// (`aux`, `bluetooth`, `standby`/`off`, `on`). Returns the resulting status.
    pub async fn set_source(&self, token: &str) -> Result<DeviceStatus> {
        let status = DeviceStatus::from_token(token)
            .ok_or_else(|| Error::UnsupportedSource(token.to_string()))?;
        self.switch_to(status).await
    }

    /// Powers on from standby, otherwise powers off. Returns the new status.
    pub async fn toggle(&self) -> Result<DeviceStatus> {
        match self.store.status() {
            DeviceStatus::Standby => self.set_power_on().await,
            _ => self.power_off().await.map(|_| DeviceStatus::Standby),
        }
    }

    /// Puts the device into `status` and returns the status the store now holds.
    ///
    /// Powering on leaves the source to the device (it may already be on aux or bluetooth), so
    /// the resulting status is read back instead of assumed.
    async fn switch_to(&self, status: DeviceStatus) -> Result<DeviceStatus> {
        let handle = self.device().await?;
        let settings = self.store.snapshot();
        let result = push_source(handle.as_ref(), status, &settings).await;
        self.checked(&handle, result).await?;

        let status = match status {
            DeviceStatus::On => {
                let result = handle.status().await;
                let reported = self.checked(&handle, result).await?;
                self.store.on_external_status_update(reported)?;
                reported
            }
            other => {
                self.store.apply_status(other)?;
                other
            }
        };
        info!(%status, "Device switched.");
        Ok(status)
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(%previous, %state, "Connection state changed");
        }
    }

    fn lock_listener(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.listener.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Issues the device calls that put it into `status`.
///
/// Powering on also re-pushes the cached volume and bass.
async fn push_source(
    handle: &dyn DeviceHandle,
    status: DeviceStatus,
    settings: &DeviceSettings,
) -> DeviceResult<()> {
    match status {
        DeviceStatus::Standby => handle.power_off().await,
        DeviceStatus::Aux => handle.select_source_aux().await,
        DeviceStatus::Bluetooth => handle.select_source_bluetooth().await,
        DeviceStatus::On => {
            handle.power_on().await?;
            handle.set_volume(clamp_volume(settings.volume)).await?;
            handle.set_bass(clamp_bass(settings.bass)).await
        }
    }
}
