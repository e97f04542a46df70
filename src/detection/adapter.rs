//! # Inference Adapter
//!
//! Bridges streaming sessions, which hold raw PCM in memory, and the detection
//! engine, which reads audio files. Each call writes the window to a fresh temp
//! WAV, runs the detector on it and deletes the file again, whatever the outcome.

use crate::audio::format::PcmFormat;
use crate::detection::temp::TempAudioFile;
use crate::detection::{AnalysisParams, Detection, DetectionError, Detector};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Analyzes one window of raw PCM.
///
/// This is the seam the streaming session depends on. It is synchronous and may
/// block for a long time; sessions call it through `spawn_blocking`.
pub trait WindowAnalyzer: Send + Sync {
    fn analyze(
        &self,
        pcm: &[u8],
        format: &PcmFormat,
        params: &AnalysisParams,
    ) -> Result<Vec<Detection>, DetectionError>;
}

/// `WindowAnalyzer` backed by any file-based `Detector`.
pub struct InferenceAdapter {
    detector: Arc<dyn Detector>,
    temp_dir: PathBuf,
}

impl InferenceAdapter {
    /// Create an adapter writing its temp WAV files into `temp_dir`.
    pub fn new(detector: Arc<dyn Detector>, temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            detector,
            temp_dir: temp_dir.into(),
        }
    }
}

impl WindowAnalyzer for InferenceAdapter {
    fn analyze(
        &self,
        pcm: &[u8],
        format: &PcmFormat,
        params: &AnalysisParams,
    ) -> Result<Vec<Detection>, DetectionError> {
        let start = Instant::now();

        // Dropped at the end of this scope on every path, removing the file.
        let wav = TempAudioFile::from_pcm(&self.temp_dir, pcm, format)?;
        let result = self.detector.detect(wav.path(), params);

        debug!(
            engine = self.detector.name(),
            audio_seconds = format.duration_seconds(pcm.len()),
            elapsed_ms = start.elapsed().as_millis() as u64,
            ok = result.is_ok(),
            "Window analysis finished"
        );
        result
    }
}
