//! # Species Detection
//!
//! Boundary between the service and the external species detection engine.
//! The engine itself is opaque: it takes an audio file plus recording metadata
//! and returns a list of detections. Everything here is about feeding it audio
//! and shaping what comes back.
//!
//! ## Key Components:
//! - **Detector**: Trait for the engine (audio file + params → detections)
//! - **CommandDetector**: Runs the engine as an external program
//! - **TempAudioFile**: Scoped temp file that is always removed
//! - **InferenceAdapter**: PCM window → temp WAV → detector, for streaming sessions

pub mod adapter;    // PCM window analysis for streaming sessions
pub mod detector;   // Detector trait and the external-program engine
pub mod temp;       // Scoped temp audio files

pub use adapter::{InferenceAdapter, WindowAnalyzer};
pub use detector::{CommandDetector, Detector};

use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// One species occurrence reported by the engine.
///
/// ## API Contract:
/// Serialized as-is into both the streaming `{"detections": [...]}` message and
/// the one-shot prediction responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Scientific name (e.g. "Melospiza melodia")
    pub scientific_name: String,

    /// Common name (e.g. "Song Sparrow")
    pub common_name: String,

    /// Combined label (scientific + common)
    pub label: String,

    /// Confidence score (0.0 to 1.0)
    pub confidence: f64,

    /// Segment start offset within the analyzed audio (seconds)
    pub start_time: f64,

    /// Segment end offset within the analyzed audio (seconds)
    pub end_time: f64,
}

/// Recording metadata passed to the engine alongside the audio.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisParams {
    /// Latitude of the recording (-90.0 to +90.0)
    pub lat: f64,

    /// Longitude of the recording (-180.0 to +180.0)
    pub lon: f64,

    /// Recording date, used by the engine for seasonal species filtering
    pub date: NaiveDate,

    /// Detections below this confidence are discarded
    pub min_conf: f64,
}

/// Errors produced while running the detection engine.
#[derive(Debug, Error)]
pub enum DetectionError {
    /// Writing or reading the temp audio artifact failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The engine ran but reported a failure.
    #[error("Detection engine failed: {0}")]
    Engine(String),

    /// The engine's output could not be understood.
    #[error("Unreadable detection output: {0}")]
    Output(String),

    /// The audio layout cannot be encoded for the engine.
    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    /// The blocking worker running the engine died.
    #[error("Detection worker failed: {0}")]
    Worker(String),
}

impl DetectionError {
    /// Whether the failure came from the temp artifact rather than the engine.
    pub fn is_io(&self) -> bool {
        matches!(self, DetectionError::Io(_))
    }
}

/// Parse a recording date given as `YYYY-MM-DD` or as a full RFC 3339
/// timestamp, keeping only the calendar date of the latter.
pub fn parse_recording_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.date_naive()))
}

/// Sort detections by confidence, highest first.
pub fn sort_by_confidence(detections: &mut [Detection]) {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
}

/// Keep only the highest-confidence detection of each species.
///
/// ## Process:
/// 1. Sort all raw detections by confidence (descending)
/// 2. Walk the sorted list and keep the first entry per `scientific_name`
///
/// The result stays in descending confidence order.
pub fn best_per_species(mut detections: Vec<Detection>) -> Vec<Detection> {
    sort_by_confidence(&mut detections);

    let mut seen = HashSet::new();
    detections
        .into_iter()
        .filter(|detection| seen.insert(detection.scientific_name.clone()))
        .collect()
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::Detection;

    /// Build a detection with only the fields tests care about.
    pub fn detection(species: &str, confidence: f64) -> Detection {
        Detection {
            scientific_name: species.to_string(),
            common_name: format!("{} common", species),
            label: format!("{}_{} common", species, species),
            confidence,
            start_time: 0.0,
            end_time: 3.0,
        }
    }
}
