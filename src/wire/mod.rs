use base64::{Engine, engine::general_purpose::STANDARD};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use thiserror::Error;

use crate::{
    errors::FrameError,
    inference::Prediction,
    quality::{AdjustmentAction, Framerate, NetworkStats, Resolution},
    transport::Inbound,
};

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8, 0xFF];
const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
const RIFF_MAGIC: &[u8] = b"RIFF";
const WEBP_MAGIC: &[u8] = b"WEBP";

// -----------------------------------------------------------------------------
// ----- Inbound messages ------------------------------------------------------

/// A decoded client message.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Auth { token: String },
    Frame(FramePayload),
    /// Valid JSON of a type the gateway does not handle.
    Ignored,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FramePayload {
    pub body: FrameBody,
    pub stats: Option<NetworkStats>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameBody {
    Raw(Bytes),
    Base64(String),
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type", default)]
    kind: Option<String>,

    #[serde(default)]
    token: Option<String>,

    #[serde(default)]
    data: Option<String>,

    #[serde(default)]
    stats: Option<NetworkStats>,
}

#[derive(Debug, Error)]
pub enum WireError {
    #[error("malformed JSON message: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Classify one inbound message. Binary messages are always raw frames.
pub fn parse_inbound(message: Inbound) -> Result<ClientMessage, WireError> {
    let text = match message {
        Inbound::Binary(data) => {
            return Ok(ClientMessage::Frame(FramePayload {
                body: FrameBody::Raw(data),
                stats: None,
            }));
        }
        Inbound::Text(text) => text,
    };

    let envelope: Envelope = serde_json::from_str(&text)?;

    let message = match envelope.kind.as_deref() {
        Some("auth") => ClientMessage::Auth {
            token: envelope.token.unwrap_or_default(),
        },
        Some("frame") => ClientMessage::Frame(FramePayload {
            // missing data decodes to an empty frame and is rejected there
            body: FrameBody::Base64(envelope.data.unwrap_or_default()),
            stats: envelope.stats,
        }),
        _ => ClientMessage::Ignored,
    };

    Ok(message)
}

impl FrameBody {
    pub fn decode(self) -> Result<Bytes, FrameError> {
        match self {
            FrameBody::Raw(data) => Ok(data),
            FrameBody::Base64(text) => Ok(Bytes::from(STANDARD.decode(text.as_bytes())?)),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Frame validation ------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
    Png,
    Webp,
}

/// Size and signature checks on a decoded frame.
pub fn validate_frame(data: &[u8], max_size: usize) -> Result<ImageFormat, FrameError> {
    if data.is_empty() {
        return Err(FrameError::Empty);
    }

    if data.len() > max_size {
        return Err(FrameError::TooLarge {
            size: data.len(),
            limit: max_size,
        });
    }

    sniff_format(data).ok_or(FrameError::UnsupportedFormat)
}

fn sniff_format(data: &[u8]) -> Option<ImageFormat> {
    if data.starts_with(JPEG_MAGIC) {
        return Some(ImageFormat::Jpeg);
    }
    if data.starts_with(PNG_MAGIC) {
        return Some(ImageFormat::Png);
    }
    if data.len() >= 12 && data.starts_with(RIFF_MAGIC) && &data[8..12] == WEBP_MAGIC {
        return Some(ImageFormat::Webp);
    }
    None
}

// -----------------------------------------------------------------------------
// ----- Outbound messages -----------------------------------------------------

#[derive(Debug, Serialize)]
pub struct AuthSuccess<'a> {
    status: &'static str,
    client_id: &'a str,
}

impl<'a> AuthSuccess<'a> {
    pub fn new(client_id: &'a str) -> Self {
        Self {
            status: "success",
            client_id,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct FrameResult<'a> {
    predictions: &'a [Prediction],
    timestamp: String,
}

impl<'a> FrameResult<'a> {
    pub fn new(predictions: &'a [Prediction]) -> Self {
        Self {
            predictions,
            timestamp: humantime::format_rfc3339_millis(SystemTime::now()).to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorMessage {
    status: &'static str,
    message: String,
}

impl ErrorMessage {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: "error",
            message: message.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct QualityNotice {
    #[serde(rename = "type")]
    kind: &'static str,
    action: &'static str,
    reason: &'static str,
    resolution: Resolution,
    framerate: Framerate,
}

impl From<&AdjustmentAction> for QualityNotice {
    fn from(action: &AdjustmentAction) -> Self {
        Self {
            kind: "quality",
            action: action.kind.as_str(),
            reason: action.reason.as_str(),
            resolution: action.resolution,
            framerate: action.framerate,
        }
    }
}

pub fn encode<T: Serialize>(message: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string(message)
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
