//! # Scoped Temp Audio Files
//!
//! The detection engine reads audio from disk, so every analysis materializes a
//! temp file first. `TempAudioFile` owns that file and deletes it when dropped,
//! which covers every exit path: success, engine failure, early return or panic.

use crate::audio::format::{pcm16_to_samples, pcm24_to_samples, PcmFormat};
use crate::detection::DetectionError;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// A uniquely named temp file that is removed on drop.
///
/// Removal failures are logged and otherwise ignored; they never turn a
/// successful analysis into an error.
#[derive(Debug)]
pub struct TempAudioFile {
    file: Option<NamedTempFile>,
    path: PathBuf,
}

impl TempAudioFile {
    /// Create an empty temp file in `dir` (created if missing) with the given suffix.
    pub fn create(dir: &Path, suffix: &str) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let file = tempfile::Builder::new()
            .prefix("birdnet_")
            .suffix(suffix)
            .tempfile_in(dir)?;
        let path = file.path().to_path_buf();
        debug!(path = %path.display(), "Created temp audio file");
        Ok(Self {
            file: Some(file),
            path,
        })
    }

    /// Write raw bytes (an uploaded audio file) to a new temp file.
    pub fn from_bytes(dir: &Path, suffix: &str, data: &[u8]) -> io::Result<Self> {
        let mut temp = Self::create(dir, suffix)?;
        let file = temp.file_mut()?;
        file.write_all(data)?;
        file.flush()?;
        Ok(temp)
    }

    /// Encode raw PCM as a WAV file in a new temp file.
    ///
    /// ## Format:
    /// RIFF/WAVE, PCM, with channel count, sample rate and bit depth taken from
    /// `format`. The PCM must hold whole frames; the scheduler only hands out
    /// windows that are multiples of the frame size.
    pub fn from_pcm(dir: &Path, pcm: &[u8], format: &PcmFormat) -> Result<Self, DetectionError> {
        let track = match format.sample_width {
            1 => wav::BitDepth::Eight(pcm.to_vec()),
            2 => wav::BitDepth::Sixteen(pcm16_to_samples(pcm)),
            3 => wav::BitDepth::TwentyFour(pcm24_to_samples(pcm)),
            other => {
                return Err(DetectionError::UnsupportedFormat(format!(
                    "{}-byte samples cannot be written as PCM WAV",
                    other
                )))
            }
        };
        let header = wav::Header::new(
            wav::header::WAV_FORMAT_PCM,
            format.channels,
            format.sample_rate,
            format.bits_per_sample(),
        );

        let mut temp = Self::create(dir, ".wav")?;
        wav::write(header, &track, temp.file_mut()?)?;
        temp.file_mut()?.flush()?;
        Ok(temp)
    }

    /// Path of the temp file, valid until this guard is dropped.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn file_mut(&mut self) -> io::Result<&mut fs::File> {
        self.file
            .as_mut()
            .map(NamedTempFile::as_file_mut)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "temp file already removed"))
    }
}

impl Drop for TempAudioFile {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            if let Err(e) = file.close() {
                warn!("Failed to remove temporary file {}: {}", self.path.display(), e);
            }
        }
    }
}
