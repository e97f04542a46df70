//! # Detection Engine
//!
//! The `Detector` trait is the seam to the external species detection engine.
//! The shipped implementation runs the engine as a separate program so the
//! service never links the model runtime directly.
//!
//! ## Engine Program Contract:
//! ```text
//! <command> <args...> --input <audio.wav> --lat <lat> --lon <lon> --date <YYYY-MM-DD> --min-conf <c>
//! ```
//! The program prints a JSON array on stdout:
//! ```json
//! [{"scientific_name": "Turdus merula", "common_name": "Eurasian Blackbird",
//!   "label": "Turdus merula_Eurasian Blackbird", "confidence": 0.82,
//!   "start_time": 0.0, "end_time": 3.0}]
//! ```
//! `label` may be omitted; it is then built from the two names.

use crate::config::DetectorConfig;
use crate::detection::{AnalysisParams, Detection, DetectionError};
use serde::Deserialize;
use std::path::Path;
use std::process::Command;
use tracing::debug;

/// A species detection engine.
///
/// ## Thread Safety:
/// One detector instance is shared by every session and HTTP request, and
/// `detect` runs on blocking worker threads, so implementations must be
/// `Send + Sync`.
pub trait Detector: Send + Sync {
    /// Analyze an audio file and return every detection above `params.min_conf`.
    ///
    /// Blocking and possibly slow. Call it from a blocking context
    /// (`spawn_blocking` / `web::block`), never directly on the async runtime.
    fn detect(&self, audio_path: &Path, params: &AnalysisParams) -> Result<Vec<Detection>, DetectionError>;

    /// Short engine name for logs and the health endpoint.
    fn name(&self) -> &str;
}

/// Detector that shells out to an external engine program.
#[derive(Debug, Clone)]
pub struct CommandDetector {
    /// Program to execute
    program: String,

    /// Leading arguments placed before the generated ones
    args: Vec<String>,
}

/// Detection as printed by the engine program.
#[derive(Debug, Deserialize)]
struct RawDetection {
    scientific_name: String,
    common_name: String,
    #[serde(default)]
    label: Option<String>,
    confidence: f64,
    start_time: f64,
    end_time: f64,
}

impl From<RawDetection> for Detection {
    fn from(raw: RawDetection) -> Self {
        let label = raw
            .label
            .unwrap_or_else(|| format!("{}_{}", raw.scientific_name, raw.common_name));
        Detection {
            scientific_name: raw.scientific_name,
            common_name: raw.common_name,
            label,
            confidence: raw.confidence,
            start_time: raw.start_time,
            end_time: raw.end_time,
        }
    }
}

impl CommandDetector {
    /// Create a detector running `program` with the given leading arguments.
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Build the detector described by the `[detector]` config section.
    pub fn from_config(config: &DetectorConfig) -> Self {
        Self::new(config.command.clone(), config.args.clone())
    }

    fn command(&self, audio_path: &Path, params: &AnalysisParams) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg("--input")
            .arg(audio_path)
            .arg("--lat")
            .arg(params.lat.to_string())
            .arg("--lon")
            .arg(params.lon.to_string())
            .arg("--date")
            .arg(params.date.format("%Y-%m-%d").to_string())
            .arg("--min-conf")
            .arg(params.min_conf.to_string());
        command
    }
}

impl Detector for CommandDetector {
    fn detect(&self, audio_path: &Path, params: &AnalysisParams) -> Result<Vec<Detection>, DetectionError> {
        debug!(program = %self.program, path = %audio_path.display(), "Running detection engine");

        let output = self.command(audio_path, params).output().map_err(|e| {
            DetectionError::Engine(format!("failed to run '{}': {}", self.program, e))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DetectionError::Engine(format!(
                "'{}' exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        parse_engine_output(&output.stdout, params.min_conf)
    }

    fn name(&self) -> &str {
        &self.program
    }
}

/// Parse the engine's stdout into detections, dropping any below `min_conf`.
pub fn parse_engine_output(stdout: &[u8], min_conf: f64) -> Result<Vec<Detection>, DetectionError> {
    let raw: Vec<RawDetection> =
        serde_json::from_slice(stdout).map_err(|e| DetectionError::Output(e.to_string()))?;

    Ok(raw
        .into_iter()
        .filter(|d| d.confidence >= min_conf)
        .map(Detection::from)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn params(min_conf: f64) -> AnalysisParams {
        AnalysisParams {
            lat: 60.44,
            lon: 22.26,
            date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            min_conf,
        }
    }

    #[test]
    fn test_parse_output_fills_missing_label() {
        let stdout = br#"[{"scientific_name": "Parus major", "common_name": "Great Tit",
            "confidence": 0.7, "start_time": 0.0, "end_time": 3.0}]"#;

        let detections = parse_engine_output(stdout, 0.25).unwrap();

        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].label, "Parus major_Great Tit");
    }

    #[test]
    fn test_parse_output_applies_confidence_floor() {
        let stdout = br#"[
            {"scientific_name": "A", "common_name": "a", "label": "A_a", "confidence": 0.9, "start_time": 0.0, "end_time": 3.0},
            {"scientific_name": "B", "common_name": "b", "label": "B_b", "confidence": 0.1, "start_time": 3.0, "end_time": 6.0}
        ]"#;

        let detections = parse_engine_output(stdout, 0.5).unwrap();

        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].scientific_name, "A");
    }

    #[test]
    fn test_parse_output_rejects_garbage() {
        let err = parse_engine_output(b"not json", 0.25).unwrap_err();
        assert!(matches!(err, DetectionError::Output(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_command_detector_runs_program() {
        // `sh -c <script> <$0> ...` receives the generated flags as positional args.
        let script = r#"case "$*" in
            *"--min-conf 0.3"*) echo '[{"scientific_name":"Erithacus rubecula","common_name":"European Robin","confidence":0.8,"start_time":0.0,"end_time":3.0}]' ;;
            *) echo "unexpected args: $*" >&2; exit 2 ;;
        esac"#;
        let detector = CommandDetector::new("sh", vec!["-c".into(), script.into(), "engine".into()]);

        let detections = detector.detect(Path::new("/tmp/clip.wav"), &params(0.3)).unwrap();

        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].common_name, "European Robin");
        assert_eq!(detector.name(), "sh");
    }

    #[cfg(unix)]
    #[test]
    fn test_command_detector_reports_failure() {
        let detector = CommandDetector::new(
            "sh",
            vec!["-c".into(), "echo 'model missing' >&2; exit 1".into(), "engine".into()],
        );

        let err = detector.detect(Path::new("/tmp/clip.wav"), &params(0.25)).unwrap_err();

        match err {
            DetectionError::Engine(message) => assert!(message.contains("model missing")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_missing_program_is_engine_error() {
        let detector = CommandDetector::new("definitely-not-a-real-engine-binary", Vec::new());
        let err = detector.detect(Path::new("/tmp/clip.wav"), &params(0.25)).unwrap_err();
        assert!(matches!(err, DetectionError::Engine(_)));
    }
}
