mod ffmpeg;
mod native;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub use ffmpeg::FfmpegAudioLoader;
pub use native::SymphoniaAudioLoader;

/// Decoded clip held fully in memory. Samples are interleaved when
/// `channels > 1`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AudioSignal {
    samples: Vec<f32>,
    sample_rate: u32,
    channels: u16,
}

impl AudioSignal {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Result<Self> {
        if sample_rate == 0 {
            return Err(DecodeError::InvalidSignal("sample rate must be > 0".to_owned()));
        }
        if channels == 0 {
            return Err(DecodeError::InvalidSignal("channel count must be > 0".to_owned()));
        }
        if samples.len() % usize::from(channels) != 0 {
            return Err(DecodeError::InvalidSignal(format!(
                "{} samples do not divide into {channels} channels",
                samples.len()
            )));
        }
        Ok(Self {
            samples,
            sample_rate,
            channels,
        })
    }

    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Result<Self> {
        Self::new(samples, sample_rate, 1)
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Number of sample frames (one sample per channel).
    pub fn frames(&self) -> usize {
        self.samples.len() / usize::from(self.channels)
    }

    pub fn duration(&self) -> Duration {
        duration_from_sample_count(self.sample_rate, self.channels, self.samples.len())
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Channel-averaged copy of the signal.
    pub fn to_mono(&self) -> Vec<f32> {
        let channels = usize::from(self.channels);
        if channels == 1 {
            return self.samples.clone();
        }
        self.samples
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    }
}

#[derive(thiserror::Error, Debug)]
pub enum DecodeError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported audio: {0}")]
    Unsupported(String),

    #[error("corrupt audio stream: {0}")]
    Corrupt(String),

    #[error("ffmpeg unavailable: {0}")]
    FfmpegUnavailable(String),

    #[error("ffmpeg failed: {0}")]
    FfmpegFailed(String),

    #[error("invalid pcm output: {0}")]
    InvalidPcm(String),

    #[error("invalid signal: {0}")]
    InvalidSignal(String),
}

pub type Result<T> = std::result::Result<T, DecodeError>;

pub trait AudioLoader: Send + Sync {
    fn load<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, Result<AudioSignal>>;
}

impl<T: AudioLoader + ?Sized> AudioLoader for Box<T> {
    fn load<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, Result<AudioSignal>> {
        (**self).load(path)
    }
}

pub fn duration_from_sample_count(
    sample_rate_hz: u32,
    channels: u16,
    sample_count: usize,
) -> Duration {
    if sample_rate_hz == 0 || channels == 0 {
        return Duration::from_secs(0);
    }
    let frames = (sample_count / usize::from(channels)) as u128;
    let nanos = frames * 1_000_000_000u128 / u128::from(sample_rate_hz);
    Duration::from_nanos(nanos.min(u128::from(u64::MAX)) as u64)
}
