//! In-memory device used by the session and router tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::device::{Connector, DeviceError, DeviceEvent, DeviceHandle, DeviceResult};
use crate::settings::DeviceStatus;

/// A call received by [`FakeDevice`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    SetVolume(i32),
    SetBass(i32),
    PowerOn,
    PowerOff,
    SelectAux,
    SelectBluetooth,
    Status,
    StartNotification,
}

#[derive(Debug)]
pub struct FakeDevice {
    calls: Mutex<Vec<Call>>,
    status: Mutex<DeviceStatus>,
    failing: AtomicBool,
    events: broadcast::Sender<DeviceEvent>,
}

impl FakeDevice {
    pub fn new(status: DeviceStatus) -> Arc<Self> {
        let (events, _) = broadcast::channel(16);
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            status: Mutex::new(status),
            failing: AtomicBool::new(false),
            events,
        })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    /// Makes every following call fail.
    pub fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Pushes a notification as if the device had sent it.
    pub fn emit(&self, event: DeviceEvent) {
        let _ = self.events.send(event);
    }

    fn record(&self, call: Call) -> DeviceResult<()> {
        self.calls.lock().unwrap().push(call);
        if self.failing.load(Ordering::SeqCst) {
            return Err(DeviceError::Unavailable("fake device is failing".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl DeviceHandle for FakeDevice {
    async fn set_volume(&self, volume: i32) -> DeviceResult<()> {
        self.record(Call::SetVolume(volume))
    }

    async fn set_bass(&self, bass: i32) -> DeviceResult<()> {
        self.record(Call::SetBass(bass))
    }

    async fn power_on(&self) -> DeviceResult<()> {
        self.record(Call::PowerOn)?;
        let mut status = self.status.lock().unwrap();
        if *status == DeviceStatus::Standby {
            *status = DeviceStatus::On;
        }
        Ok(())
    }

    async fn power_off(&self) -> DeviceResult<()> {
        self.record(Call::PowerOff)?;
        *self.status.lock().unwrap() = DeviceStatus::Standby;
        Ok(())
    }

    async fn select_source_aux(&self) -> DeviceResult<()> {
        self.record(Call::SelectAux)?;
        *self.status.lock().unwrap() = DeviceStatus::Aux;
        Ok(())
    }

    async fn select_source_bluetooth(&self) -> DeviceResult<()> {
        self.record(Call::SelectBluetooth)?;
        *self.status.lock().unwrap() = DeviceStatus::Bluetooth;
        Ok(())
    }

    async fn status(&self) -> DeviceResult<DeviceStatus> {
        self.record(Call::Status)?;
        Ok(*self.status.lock().unwrap())
    }

    fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.events.subscribe()
    }

    async fn start_notification(&self) -> DeviceResult<()> {
        self.record(Call::StartNotification)
    }
}

/// Hands out the same [`FakeDevice`] after a configurable number of refused attempts.
pub struct FakeConnector {
    device: Arc<FakeDevice>,
    refusals: AtomicUsize,
    attempts: AtomicUsize,
}

impl FakeConnector {
    pub fn new(device: Arc<FakeDevice>, refusals: usize) -> Arc<Self> {
        Arc::new(Self {
            device,
            refusals: AtomicUsize::new(refusals),
            attempts: AtomicUsize::new(0),
        })
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, _address: &str) -> DeviceResult<Arc<dyn DeviceHandle>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .refusals
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(DeviceError::Unavailable("device not powered".into()));
        }
        Ok(self.device.clone())
    }
}
