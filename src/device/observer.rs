use futures_util::stream::StreamExt;
use tokio::{net::TcpStream, sync::broadcast, task::JoinHandle};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{Message, client::IntoClientRequest, http::HeaderValue},
};
use tracing::{debug, error, info, instrument, warn};

use crate::device::soundtouch::SoundTouchClient;
use crate::device::xml::{self, Update};
use crate::device::{DeviceEvent, DeviceResult};

/// Websocket subprotocol spoken by SoundTouch speakers.
const NOTIFICATION_PROTOCOL: &str = "gabbo";

/// Observes the device's notification websocket and broadcasts the changes it reports.
#[derive(Debug)]
pub struct NotificationObserver {
    /// The open notification socket.
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
    /// Used to fetch values the notifications only announce (bass).
    client: SoundTouchClient,
    /// The sender for broadcasting events to subscribers.
    sender: broadcast::Sender<DeviceEvent>,
}

impl NotificationObserver {
    /// Opens the notification socket at `url`.
    ///
    /// # Errors
    /// - [`crate::device::DeviceError::WebSocket`] if the handshake fails.
    pub async fn connect(
        url: &str,
        client: SoundTouchClient,
        sender: broadcast::Sender<DeviceEvent>,
    ) -> DeviceResult<Self> {
        let mut request = url.into_client_request()?;
        request.headers_mut().insert(
            "Sec-WebSocket-Protocol",
            HeaderValue::from_static(NOTIFICATION_PROTOCOL),
        );

        let (socket, _) = connect_async(request).await?;
        info!(url, "Notification socket opened.");

        Ok(Self {
            socket,
            client,
            sender,
        })
    }

    /// Spawns the observer to run in a background task.
    ///
    /// When the socket closes or fails, subscribers receive [`DeviceEvent::StreamClosed`].
    #[instrument(skip(self))]
    pub fn listen(mut self) -> JoinHandle<()> {
        info!("Spawning notification observer task.");
        tokio::spawn(async move {
            if let Err(e) = self.run().await {
                error!("Notification observer failed: {}", e);
            }
            if self.sender.send(DeviceEvent::StreamClosed).is_err() {
                debug!("No subscribers to notify about the closed stream.");
            }
        })
    }

    /// The private event loop. Reads socket messages and turns them into events.
    #[instrument(skip_all)]
    async fn run(&mut self) -> DeviceResult<()> {
        info!("Listening for device notifications...");

        while let Some(message) = self.socket.next().await {
            let text = match message? {
                Message::Text(text) => text,
                Message::Close(frame) => {
                    info!(?frame, "Device closed the notification socket.");
                    break;
                }
                other => {
                    debug!(?other, "Ignoring non-text notification frame");
                    continue;
                }
            };
            debug!("Received notification: {}", text.as_str());

            let updates = match xml::parse_updates(text.as_str()) {
                Ok(updates) => updates,
                Err(e) => {
                    warn!(error = %e, "Failed to parse notification. skipping...");
                    continue;
                }
            };

            for update in updates {
                let event = match update {
                    Update::Volume(volume) => Some(DeviceEvent::Volume(volume)),
                    Update::NowPlaying(status) => Some(DeviceEvent::Status(status)),
                    Update::BassChanged => match self.client.bass().await {
                        Ok(bass) => {
                            debug!(target_bass = bass.target, actual_bass = bass.actual, "Fetched bass");
                            Some(DeviceEvent::Bass(bass.actual))
                        }
                        Err(e) => {
                            warn!(error = %e, "Could not fetch bass after bass update");
                            None
                        }
                    },
                };

                if let Some(event) = event {
                    if self.sender.send(event).is_err() {
                        debug!("No subscribers to notify about the event.");
                    }
                }
            }
        }

        Ok(())
    }
}
