//! # PCM Format Handling
//!
//! Describes the raw PCM layout a streaming client sends and converts between
//! raw bytes and typed samples for the WAV writer.
//!
//! ## Streaming Format:
//! - **Sample Rate**: 48kHz (48,000 Hz)
//! - **Sample Width**: 2 bytes (16-bit PCM)
//! - **Channels**: Mono (1 channel)
//! - **Encoding**: Little-endian signed integers

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

/// Layout of the raw PCM stream.
///
/// ## Byte math:
/// One second of audio is `sample_rate * channels * sample_width` bytes,
/// so 3 seconds of 48kHz mono 16-bit audio is 48000 * 1 * 2 * 3 = 288,000 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PcmFormat {
    /// Samples per second per channel
    pub sample_rate: u32,

    /// Number of interleaved channels
    pub channels: u16,

    /// Bytes per sample (1 = 8-bit unsigned, 2 = 16-bit, 3 = 24-bit)
    pub sample_width: u16,
}

impl Default for PcmFormat {
    fn default() -> Self {
        Self {
            sample_rate: 48000,  // 48kHz
            channels: 1,         // Mono
            sample_width: 2,     // 16-bit
        }
    }
}

impl PcmFormat {
    /// Create a new PCM format description.
    pub fn new(sample_rate: u32, channels: u16, sample_width: u16) -> Self {
        Self {
            sample_rate,
            channels,
            sample_width,
        }
    }

    /// Bytes occupied by one frame (one sample for every channel).
    pub fn frame_bytes(&self) -> usize {
        self.channels as usize * self.sample_width as usize
    }

    /// Bytes of audio per second of wall-clock recording time.
    pub fn bytes_per_second(&self) -> usize {
        self.sample_rate as usize * self.frame_bytes()
    }

    /// Byte length of a window lasting `seconds`.
    pub fn window_bytes(&self, seconds: u32) -> usize {
        self.bytes_per_second() * seconds as usize
    }

    /// Bits per sample, as written into a WAV header.
    pub fn bits_per_sample(&self) -> u16 {
        self.sample_width * 8
    }

    /// Duration in seconds represented by `len` bytes of this format.
    pub fn duration_seconds(&self, len: usize) -> f64 {
        let per_second = self.bytes_per_second();
        if per_second == 0 {
            return 0.0;
        }
        len as f64 / per_second as f64
    }

    /// Check that the format is one we know how to encode.
    ///
    /// ## Returns:
    /// - **Ok(())**: Format is usable
    /// - **Err(String)**: Description of what is wrong
    pub fn validate(&self) -> Result<(), String> {
        if self.sample_rate == 0 {
            return Err("Sample rate must be greater than 0".to_string());
        }
        if self.channels == 0 {
            return Err("Channel count must be greater than 0".to_string());
        }
        if !(1..=3).contains(&self.sample_width) {
            return Err(format!(
                "Unsupported sample width: {} bytes (expected 1, 2 or 3)",
                self.sample_width
            ));
        }
        Ok(())
    }
}

/// Decode little-endian 16-bit PCM bytes into samples.
///
/// A trailing odd byte (half a sample) is ignored.
pub fn pcm16_to_samples(data: &[u8]) -> Vec<i16> {
    let usable = data.len() - data.len() % 2;
    let mut samples = vec![0i16; usable / 2];
    LittleEndian::read_i16_into(&data[..usable], &mut samples);
    samples
}

/// Decode little-endian 24-bit PCM bytes into sign-extended samples.
pub fn pcm24_to_samples(data: &[u8]) -> Vec<i32> {
    data.chunks_exact(3)
        .map(|chunk| LittleEndian::read_i24(chunk))
        .collect()
}

/// Encode 16-bit samples back into little-endian bytes.
#[cfg(test)]
pub fn samples_to_pcm16(samples: &[i16]) -> Vec<u8> {
    let mut bytes = vec![0u8; samples.len() * 2];
    LittleEndian::write_i16_into(samples, &mut bytes);
    bytes
}
