//! XML payloads of the SoundTouch HTTP API and its notification websocket.

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::device::{DeviceError, DeviceResult};
use crate::settings::DeviceStatus;

/// `GET /info`
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct InfoResponse {
    #[serde(rename = "@deviceID")]
    pub device_id: String,

    pub name: String,

    #[serde(rename = "type", default)]
    pub model: Option<String>,
}

/// `GET /now_playing`
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct NowPlayingResponse {
    #[serde(rename = "@source")]
    pub source: String,
}

/// `GET /bass`
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct BassResponse {
    #[serde(rename = "targetbass")]
    pub target: i32,

    #[serde(rename = "actualbass")]
    pub actual: i32,
}

pub fn parse<T: DeserializeOwned>(xml: &str) -> DeviceResult<T> {
    quick_xml::de::from_str(xml).map_err(|e| DeviceError::Parse(e.to_string()))
}

pub fn volume_body(volume: i32) -> String {
    format!("<volume>{volume}</volume>")
}

pub fn bass_body(bass: i32) -> String {
    format!("<bass>{bass}</bass>")
}

/// Body for `POST /key`. A key press is a `press` followed by a `release`.
pub fn key_body(key: &str, state: &str) -> String {
    format!(r#"<key state="{state}" sender="Gabbo">{key}</key>"#)
}

pub const AUX_CONTENT_ITEM: &str = r#"<ContentItem source="AUX" sourceAccount="AUX"></ContentItem>"#;
pub const BLUETOOTH_CONTENT_ITEM: &str = r#"<ContentItem source="BLUETOOTH"></ContentItem>"#;

/// One change announced inside an `<updates>` websocket message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Update {
    Volume(i32),
    /// The message only says bass changed; the value has to be fetched.
    BassChanged,
    NowPlaying(DeviceStatus),
}

const ACTUAL_VOLUME_PATH: [&str; 3] = ["volumeUpdated", "volume", "actualvolume"];

/// Extracts the updates this crate cares about from a notification message.
///
/// Unrelated updates (presets, recents, user activity, ...) are skipped.
pub fn parse_updates(xml: &str) -> DeviceResult<Vec<Update>> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut path: Vec<String> = Vec::new();
    let mut updates = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = local_name(&e);
                if let Some(update) = element_update(&path, &name, &e)? {
                    updates.push(update);
                }
                path.push(name);
            }
            Ok(Event::Empty(e)) => {
                let name = local_name(&e);
                if let Some(update) = element_update(&path, &name, &e)? {
                    updates.push(update);
                }
            }
            Ok(Event::Text(t)) => {
                if path_ends_with(&path, &ACTUAL_VOLUME_PATH) {
                    let text = t.unescape().map_err(|e| DeviceError::Parse(e.to_string()))?;
                    let volume = text.trim().parse::<i32>().map_err(|e| {
                        DeviceError::Parse(format!("actualvolume '{text}' is not an integer: {e}"))
                    })?;
                    updates.push(Update::Volume(volume));
                }
            }
            Ok(Event::End(_)) => {
                path.pop();
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(DeviceError::Parse(format!(
                    "malformed notification at position {}: {e}",
                    reader.buffer_position()
                )));
            }
            _ => {}
        }
    }

    Ok(updates)
}

fn local_name(element: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(element.local_name().as_ref()).into_owned()
}

fn path_ends_with(path: &[String], suffix: &[&str]) -> bool {
    path.len() >= suffix.len()
        && path[path.len() - suffix.len()..]
            .iter()
            .zip(suffix)
            .all(|(segment, expected)| segment == expected)
}

fn element_update(
    path: &[String],
    name: &str,
    element: &BytesStart<'_>,
) -> DeviceResult<Option<Update>> {
    let parent = path.last().map(String::as_str);

    match (parent, name) {
        (_, "bassUpdated") => Ok(Some(Update::BassChanged)),
        (Some("nowPlayingUpdated"), "nowPlaying") => {
            let source = element
                .try_get_attribute("source")
                .map_err(|e| DeviceError::Parse(e.to_string()))?
                .ok_or_else(|| DeviceError::Parse("nowPlaying without source".into()))?;
            let source = source
                .unescape_value()
                .map_err(|e| DeviceError::Parse(e.to_string()))?;
            Ok(Some(Update::NowPlaying(DeviceStatus::from_source(&source))))
        }
        _ => Ok(None),
    }
}
