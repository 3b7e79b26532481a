use crate::sequence::Smoothing;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_FPS: u32 = 10;
pub const MAX_FPS: u32 = 60;
pub const DEFAULT_ANALYSIS_RATE_HZ: u32 = 4_000;
pub const DEFAULT_FIXED_THRESHOLD: f32 = 0.03;
pub const DEFAULT_SENSITIVITY: f32 = 1.3;
pub const DEFAULT_NOISE_FLOOR: f32 = 0.02;
pub const DEFAULT_SPRITE_EDGE_PX: u32 = 512;
pub const DEFAULT_X264_PRESET: &str = "ultrafast";
pub const DEFAULT_PIXEL_FORMAT: &str = "yuv420p";
pub const DEFAULT_LANGUAGE: &str = "es";
pub const DEFAULT_OUTPUT_FILE: &str = "lipflap.mp4";
pub const ENV_OPENAI_API_KEY: &str = "OPENAI_API_KEY";
pub const ENV_LIPFLAP_LANGUAGE: &str = "LIPFLAP_LANGUAGE";

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct FrameRate(u32);

impl FrameRate {
    pub fn new(fps: u32) -> Result<Self, ConfigError> {
        if fps == 0 || fps > MAX_FPS {
            return Err(ConfigError::FrameRateOutOfRange(fps));
        }
        Ok(Self(fps))
    }

    pub fn get(&self) -> u32 {
        self.0
    }
}

impl Default for FrameRate {
    fn default() -> Self {
        Self(DEFAULT_FPS)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnalysisRate(u32);

impl AnalysisRate {
    pub fn new(hz: u32) -> Result<Self, ConfigError> {
        if hz == 0 {
            return Err(ConfigError::ZeroAnalysisRate);
        }
        Ok(Self(hz))
    }

    pub fn hz(&self) -> u32 {
        self.0
    }
}

impl Default for AnalysisRate {
    fn default() -> Self {
        Self(DEFAULT_ANALYSIS_RATE_HZ)
    }
}

/// How loudness is measured for each animation step.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum EnvelopeStrategy {
    /// Peak of the raw samples inside each `[t, t + step)` window.
    PerStep,
    /// One resampled mono pass over the whole clip, sampled at each step start.
    WholeClip { analysis_rate: AnalysisRate },
}

impl Default for EnvelopeStrategy {
    fn default() -> Self {
        Self::WholeClip {
            analysis_rate: AnalysisRate::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub enum ThresholdConfig {
    Fixed { value: f32 },
    Adaptive { sensitivity: f32, floor: f32 },
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self::Fixed {
            value: DEFAULT_FIXED_THRESHOLD,
        }
    }
}

impl ThresholdConfig {
    pub fn adaptive_default() -> Self {
        Self::Adaptive {
            sensitivity: DEFAULT_SENSITIVITY,
            floor: DEFAULT_NOISE_FLOOR,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct AnalysisConfig {
    pub fps: FrameRate,
    pub envelope: EnvelopeStrategy,
    pub threshold: ThresholdConfig,
    pub smoothing: Smoothing,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RenderSettings {
    pub sprite_edge_px: u32,
    pub x264_preset: String,
    pub pixel_format: String,
}

impl RenderSettings {
    pub fn with_sprite_edge(mut self, px: u32) -> Result<Self, ConfigError> {
        if px == 0 {
            return Err(ConfigError::ZeroSpriteEdge);
        }
        self.sprite_edge_px = px;
        Ok(self)
    }
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            sprite_edge_px: DEFAULT_SPRITE_EDGE_PX,
            x264_preset: DEFAULT_X264_PRESET.to_owned(),
            pixel_format: DEFAULT_PIXEL_FORMAT.to_owned(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Language(String);

impl Language {
    pub fn new<S: Into<String>>(value: S) -> Result<Self, ConfigError> {
        let v = value.into();
        if v.trim().is_empty() {
            return Err(ConfigError::EmptyLanguage);
        }
        Ok(Self(v))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Language {
    fn default() -> Self {
        Self(DEFAULT_LANGUAGE.to_owned())
    }
}

#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new<S: Into<String>>(value: S) -> Result<Self, ConfigError> {
        let v = value.into();
        if v.trim().is_empty() {
            return Err(ConfigError::EmptyApiKey);
        }
        Ok(Self(v))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(**redacted**)")
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiKeys {
    pub openai: Option<ApiKey>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    pub analysis: AnalysisConfig,
    pub render: RenderSettings,
    pub api_keys: ApiKeys,
    pub language: Language,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("frame rate must be between 1 and {MAX_FPS} fps, got {0}")]
    FrameRateOutOfRange(u32),
    #[error("analysis sample rate must be > 0 Hz")]
    ZeroAnalysisRate,
    #[error("sprite edge must be > 0 px")]
    ZeroSpriteEdge,
    #[error("language must not be empty")]
    EmptyLanguage,
    #[error("api key must not be empty")]
    EmptyApiKey,
    #[error("hysteresis needs at least one frame")]
    ZeroHysteresis,
}

pub trait Env {
    fn var(&self, key: &str) -> Option<String>;
}

#[derive(Clone, Debug, Default)]
pub struct StdEnv;

impl Env for StdEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

#[derive(Clone, Debug, Default)]
pub struct MapEnv {
    vars: std::collections::BTreeMap<String, String>,
}

impl MapEnv {
    pub fn with_var(mut self, key: &str, value: &str) -> Self {
        self.vars.insert(key.to_owned(), value.to_owned());
        self
    }
}

impl Env for MapEnv {
    fn var(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned()
    }
}

pub fn resolve_api_key(
    cli_value: Option<String>,
    env_key: &str,
    env: &impl Env,
) -> Result<Option<ApiKey>, ConfigError> {
    match cli_value {
        Some(v) => Ok(Some(ApiKey::new(v)?)),
        None => match env.var(env_key) {
            Some(v) => Ok(Some(ApiKey::new(v)?)),
            None => Ok(None),
        },
    }
}

pub fn resolve_string_with_default(
    cli_value: Option<String>,
    env_key: &str,
    env: &impl Env,
    default: &str,
) -> String {
    match cli_value {
        Some(v) => v,
        None => env.var(env_key).unwrap_or_else(|| default.to_owned()),
    }
}
