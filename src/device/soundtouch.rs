use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::{debug, info, instrument};

use crate::configuration::DeviceConf;
use crate::device::observer::NotificationObserver;
use crate::device::xml::{self, BassResponse, InfoResponse, NowPlayingResponse};
use crate::device::{Connector, DeviceError, DeviceEvent, DeviceHandle, DeviceResult};
use crate::settings::DeviceStatus;

const POWER_KEY: &str = "POWER";

/// Capacity of the per-device notification channel.
const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Thin client for the SoundTouch HTTP API (port 8090 by default).
#[derive(Debug, Clone)]
pub struct SoundTouchClient {
    http: reqwest::Client,
    base_url: String,
}

impl SoundTouchClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    pub async fn info(&self) -> DeviceResult<InfoResponse> {
        xml::parse(&self.get("info").await?)
    }

    pub async fn now_playing(&self) -> DeviceResult<NowPlayingResponse> {
        xml::parse(&self.get("now_playing").await?)
    }

    pub async fn bass(&self) -> DeviceResult<BassResponse> {
        xml::parse(&self.get("bass").await?)
    }

    pub async fn set_volume(&self, volume: i32) -> DeviceResult<()> {
        self.post("volume", xml::volume_body(volume)).await
    }

    pub async fn set_bass(&self, bass: i32) -> DeviceResult<()> {
        self.post("bass", xml::bass_body(bass)).await
    }

    /// Presses and releases `key` on the virtual remote.
    pub async fn press_key(&self, key: &str) -> DeviceResult<()> {
        self.post("key", xml::key_body(key, "press")).await?;
        self.post("key", xml::key_body(key, "release")).await
    }

    pub async fn select(&self, content_item: &str) -> DeviceResult<()> {
        self.post("select", content_item.to_string()).await
    }

    async fn get(&self, endpoint: &str) -> DeviceResult<String> {
        let response = self
            .http
            .get(format!("{}/{endpoint}", self.base_url))
            .send()
            .await?;
        Self::body_of(endpoint, response).await
    }

    async fn post(&self, endpoint: &str, body: String) -> DeviceResult<()> {
        debug!(endpoint, %body, "POST to device");
        let response = self
            .http
            .post(format!("{}/{endpoint}", self.base_url))
            .body(body)
            .send()
            .await?;
        Self::body_of(endpoint, response).await.map(|_| ())
    }

    async fn body_of(endpoint: &str, response: reqwest::Response) -> DeviceResult<String> {
        let status = response.status();
        if !status.is_success() {
            return Err(DeviceError::Rejected {
                endpoint: format!("/{endpoint}"),
                status: status.as_u16(),
            });
        }
        Ok(response.text().await?)
    }
}

/// Opens sessions to SoundTouch speakers.
#[derive(Debug, Clone)]
pub struct SoundTouchConnector {
    http: reqwest::Client,
    api_port: u16,
    websocket_port: u16,
}

impl SoundTouchConnector {
    pub fn new(conf: &DeviceConf) -> DeviceResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(conf.request_timeout)
            .build()?;

        Ok(Self {
            http,
            api_port: conf.api_port,
            websocket_port: conf.websocket_port,
        })
    }
}

#[async_trait]
impl Connector for SoundTouchConnector {
    #[instrument(skip(self))]
    async fn connect(&self, address: &str) -> DeviceResult<Arc<dyn DeviceHandle>> {
        if address.trim().is_empty() {
            return Err(DeviceError::Unavailable("no device address configured".into()));
        }

        let client = SoundTouchClient::new(
            self.http.clone(),
            format!("http://{address}:{}", self.api_port),
        );
        let websocket_url = format!("ws://{address}:{}", self.websocket_port);

        let device = SoundTouchDevice::open(client, websocket_url).await?;
        Ok(Arc::new(device))
    }
}

/// A live session to one SoundTouch speaker.
#[derive(Debug)]
pub struct SoundTouchDevice {
    client: SoundTouchClient,
    info: InfoResponse,
    websocket_url: String,
    events: broadcast::Sender<DeviceEvent>,
    observer: Mutex<Option<JoinHandle<()>>>,
}

impl SoundTouchDevice {
    /// Fetches the device info; fails if the device does not answer.
    pub async fn open(client: SoundTouchClient, websocket_url: String) -> DeviceResult<Self> {
        let info = client.info().await?;
        info!(
            device_id = %info.device_id,
            model = info.model.as_deref().unwrap_or("unknown"),
            "Connected to SoundTouch device '{}'.",
            info.name
        );

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Self {
            client,
            info,
            websocket_url,
            events,
            observer: Mutex::new(None),
        })
    }

    async fn source(&self) -> DeviceResult<DeviceStatus> {
        Ok(DeviceStatus::from_source(
            &self.client.now_playing().await?.source,
        ))
    }
}

#[async_trait]
impl DeviceHandle for SoundTouchDevice {
    #[instrument(skip(self), fields(device = %self.info.name))]
    async fn set_volume(&self, volume: i32) -> DeviceResult<()> {
        self.client.set_volume(volume).await
    }

    #[instrument(skip(self), fields(device = %self.info.name))]
    async fn set_bass(&self, bass: i32) -> DeviceResult<()> {
        self.client.set_bass(bass).await
    }

    #[instrument(skip(self), fields(device = %self.info.name))]
    async fn power_on(&self) -> DeviceResult<()> {
        if self.source().await? == DeviceStatus::Standby {
            self.client.press_key(POWER_KEY).await?;
        }
        Ok(())
    }

    #[instrument(skip(self), fields(device = %self.info.name))]
    async fn power_off(&self) -> DeviceResult<()> {
        if self.source().await? != DeviceStatus::Standby {
            self.client.press_key(POWER_KEY).await?;
        }
        Ok(())
    }

    #[instrument(skip(self), fields(device = %self.info.name))]
    async fn select_source_aux(&self) -> DeviceResult<()> {
        self.client.select(xml::AUX_CONTENT_ITEM).await
    }

    #[instrument(skip(self), fields(device = %self.info.name))]
    async fn select_source_bluetooth(&self) -> DeviceResult<()> {
        self.client.select(xml::BLUETOOTH_CONTENT_ITEM).await
    }

    async fn status(&self) -> DeviceResult<DeviceStatus> {
        self.source().await
    }

    fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.events.subscribe()
    }

    #[instrument(skip(self), fields(device = %self.info.name))]
    async fn start_notification(&self) -> DeviceResult<()> {
        let observer = NotificationObserver::connect(
            &self.websocket_url,
            self.client.clone(),
            self.events.clone(),
        )
        .await?;

        let task = observer.listen();
        let previous = self
            .observer
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
        Ok(())
    }
}

impl Drop for SoundTouchDevice {
    fn drop(&mut self) {
        if let Some(task) = self
            .observer
            .get_mut()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
        {
            debug!("Stopping notification observer for '{}'.", self.info.name);
            task.abort();
        }
    }
}
