//! # Streaming Wire Protocol
//!
//! Message types exchanged on `/ws/stream`, independent of the socket library.
//!
//! ## Client → Server:
//! - One JSON init message: `{"lat": 60.44, "lon": 22.26, "date": "2024-05-01", "min_conf": 0.25, "timeout": 30.0}`
//! - Then binary frames of raw little-endian PCM
//!
//! ## Server → Client:
//! - `{"detections": [...]}` once per window boundary
//! - `{"error": "..."}` before a policy or internal-error close
//! - `{"timeout": true}` before a normal close

use crate::detection::{parse_recording_date, AnalysisParams, Detection};
use actix_web::web::Bytes;
use actix_web_actors::ws::CloseCode;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Error text sent for any rejected init payload. Clients only ever see this;
/// the specific reason is logged.
pub const INVALID_INIT_PAYLOAD: &str = "Invalid init payload";

/// Session init payload as sent by the client.
///
/// `lat` and `lon` are required; everything else falls back to server defaults.
/// Unknown fields are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientInit {
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub min_conf: Option<f64>,
    #[serde(default)]
    pub timeout: Option<f64>,
}

/// Server-side fallbacks and limits applied while validating `ClientInit`.
#[derive(Debug, Clone, PartialEq)]
pub struct InitDefaults {
    pub min_conf: f64,
    pub timeout: Duration,
    pub min_timeout: Duration,
}

/// Validated session parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionParams {
    pub analysis: AnalysisParams,

    /// Total session budget, measured from init acceptance
    pub timeout: Duration,
}

/// Why an init payload was rejected.
#[derive(Debug, Error, PartialEq)]
pub enum InitError {
    #[error("init payload is not valid JSON: {0}")]
    Malformed(String),

    #[error("latitude {0} is outside [-90, 90]")]
    Latitude(f64),

    #[error("longitude {0} is outside [-180, 180]")]
    Longitude(f64),

    #[error("date '{0}' is not YYYY-MM-DD")]
    Date(String),

    #[error("min_conf {0} is outside [0, 1]")]
    Confidence(f64),

    #[error("timeout {requested}s is below the minimum of {minimum}s")]
    Timeout { requested: f64, minimum: f64 },
}

impl ClientInit {
    /// Parse an init payload from a text or binary frame body.
    pub fn parse(payload: &[u8]) -> Result<Self, InitError> {
        serde_json::from_slice(payload).map_err(|e| InitError::Malformed(e.to_string()))
    }

    /// Validate ranges and fill in defaults.
    ///
    /// `today` is the date used when the client omits one (current UTC date).
    pub fn validate(self, defaults: &InitDefaults, today: NaiveDate) -> Result<SessionParams, InitError> {
        if !(-90.0..=90.0).contains(&self.lat) {
            return Err(InitError::Latitude(self.lat));
        }
        if !(-180.0..=180.0).contains(&self.lon) {
            return Err(InitError::Longitude(self.lon));
        }

        let date = match self.date {
            Some(raw) => parse_recording_date(&raw).ok_or(InitError::Date(raw))?,
            None => today,
        };

        let min_conf = self.min_conf.unwrap_or(defaults.min_conf);
        if !(0.0..=1.0).contains(&min_conf) {
            return Err(InitError::Confidence(min_conf));
        }

        let timeout = match self.timeout {
            None => defaults.timeout,
            Some(requested) => {
                let minimum = defaults.min_timeout.as_secs_f64();
                // Also rejects NaN and values too large for a Duration.
                Duration::try_from_secs_f64(requested)
                    .ok()
                    .filter(|timeout| *timeout >= defaults.min_timeout)
                    .ok_or(InitError::Timeout { requested, minimum })?
            }
        };

        Ok(SessionParams {
            analysis: AnalysisParams {
                lat: self.lat,
                lon: self.lon,
                date,
                min_conf,
            },
            timeout,
        })
    }
}

/// JSON messages the server sends on the stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerMessage {
    /// Detections for one window, highest confidence first
    Detections(Vec<Detection>),

    /// Failure description; always followed by a close
    Error(String),

    /// Session budget exhausted; always `true`
    Timeout(bool),
}

impl ServerMessage {
    pub fn invalid_init() -> Self {
        ServerMessage::Error(INVALID_INIT_PAYLOAD.to_string())
    }

    pub fn to_json(&self) -> String {
        // Serializing these variants cannot fail: no maps with non-string keys,
        // no non-finite floats from the engine once parsed from JSON.
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"error":"serialization failed"}"#.to_string())
    }
}

/// Frames forwarded from the socket to the session task.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Text(String),
    Binary(Bytes),

    /// Client sent a close frame or the transport failed
    Close,
}

/// Instructions from the session task back to the socket.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Message(ServerMessage),
    Close(CloseCode),
}
