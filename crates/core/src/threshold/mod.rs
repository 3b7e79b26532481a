//! Voiced/silent decision boundary, resolved once per clip before any frame is
//! classified.

use crate::config::ThresholdConfig;
use crate::envelope::LoudnessFrame;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, PartialOrd)]
pub struct Threshold(f32);

impl Threshold {
    pub fn value(&self) -> f32 {
        self.0
    }

    /// Strictly louder than the threshold means voiced.
    pub fn is_voiced(&self, loudness: f32) -> bool {
        loudness > self.0
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ThresholdError {
    #[error("fixed threshold must be a finite value >= 0, got {0}")]
    InvalidFixed(f32),
    #[error("sensitivity must be a finite value > 1, got {0}")]
    InvalidSensitivity(f32),
    #[error("noise floor must be a finite value >= 0, got {0}")]
    InvalidFloor(f32),
}

pub trait ThresholdPolicy: Send + Sync {
    fn resolve(&self, frames: &[LoudnessFrame]) -> Threshold;

    fn describe(&self) -> String;
}

/// Hardcoded boundary. Cheap, but sensitive to microphone gain.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FixedThreshold {
    value: f32,
}

impl FixedThreshold {
    pub fn new(value: f32) -> Result<Self, ThresholdError> {
        if !value.is_finite() || value < 0.0 {
            return Err(ThresholdError::InvalidFixed(value));
        }
        Ok(Self { value })
    }
}

impl ThresholdPolicy for FixedThreshold {
    fn resolve(&self, _frames: &[LoudnessFrame]) -> Threshold {
        Threshold(self.value)
    }

    fn describe(&self) -> String {
        format!("fixed({})", self.value)
    }
}

/// `max(mean(loudness) * sensitivity, floor)` over the whole clip.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AdaptiveThreshold {
    sensitivity: f32,
    floor: f32,
}

impl AdaptiveThreshold {
    pub fn new(sensitivity: f32, floor: f32) -> Result<Self, ThresholdError> {
        if !sensitivity.is_finite() || sensitivity <= 1.0 {
            return Err(ThresholdError::InvalidSensitivity(sensitivity));
        }
        if !floor.is_finite() || floor < 0.0 {
            return Err(ThresholdError::InvalidFloor(floor));
        }
        Ok(Self { sensitivity, floor })
    }
}

impl ThresholdPolicy for AdaptiveThreshold {
    fn resolve(&self, frames: &[LoudnessFrame]) -> Threshold {
        if frames.is_empty() {
            return Threshold(self.floor);
        }
        // f64 accumulator keeps long clips from drifting.
        let sum: f64 = frames.iter().map(|f| f64::from(f.loudness)).sum();
        let mean = (sum / frames.len() as f64) as f32;
        Threshold((mean * self.sensitivity).max(self.floor))
    }

    fn describe(&self) -> String {
        format!("adaptive(k={}, floor={})", self.sensitivity, self.floor)
    }
}

impl ThresholdConfig {
    pub fn build(&self) -> Result<Box<dyn ThresholdPolicy>, ThresholdError> {
        Ok(match *self {
            ThresholdConfig::Fixed { value } => Box::new(FixedThreshold::new(value)?),
            ThresholdConfig::Adaptive { sensitivity, floor } => {
                Box::new(AdaptiveThreshold::new(sensitivity, floor)?)
            }
        })
    }
}
