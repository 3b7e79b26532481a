use crate::{
    artwork::{ArtworkError, SpriteSource},
    compose::{ComposeError, ComposeJob, ComposeOutput, Compositor},
    config::{AnalysisConfig, AppConfig, RenderSettings},
    decode::{AudioLoader, AudioSignal, DecodeError},
    design::{CharacterBrief, CharacterDescription, CharacterDesigner, DesignError},
    envelope::{EnvelopeExtractor, LoudnessFrame},
    sequence::{FrameSequencer, PoseTimeline},
    sprites::{PoseSprites, SpriteError},
    threshold::{Threshold, ThresholdError},
    transcribe::{AudioUpload, TranscribeError, Transcriber, Transcript},
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("cannot decode input audio: {0}")]
    Decode(#[from] DecodeError),
    #[error("invalid threshold settings: {0}")]
    Threshold(#[from] ThresholdError),
    #[error("cannot read {path}: {source}")]
    ReadAudio {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("transcription failed: {0}")]
    Transcribe(#[from] TranscribeError),
    #[error("character design failed: {0}")]
    Design(#[from] DesignError),
    #[error("character art unavailable: {0}")]
    Artwork(#[from] ArtworkError),
    #[error(transparent)]
    Sprite(#[from] SpriteError),
    #[error(transparent)]
    Compose(#[from] ComposeError),
}

impl PipelineError {
    pub fn is_resource_exhaustion(&self) -> bool {
        matches!(self, PipelineError::Compose(ComposeError::ResourceExhausted { .. }))
    }
}

#[derive(Clone, Debug, Default)]
pub struct PipelineConfig {
    pub analysis: AnalysisConfig,
    pub render: RenderSettings,
}

impl PipelineConfig {
    pub fn from_app(app: &AppConfig) -> Self {
        Self {
            analysis: app.analysis,
            render: app.render.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunRequest {
    pub audio: PathBuf,
    pub output: PathBuf,
    pub hint: Option<String>,
}

/// Result of the mouth-sync decision stages for one clip.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct Analysis {
    pub duration: Duration,
    pub threshold: Threshold,
    pub frames: Vec<LoudnessFrame>,
    pub timeline: PoseTimeline,
}

/// Envelope, threshold and sequencing for a decoded clip. Never touches I/O.
pub fn analyze(signal: &AudioSignal, config: &AnalysisConfig) -> Result<Analysis, PipelineError> {
    let policy = config.threshold.build()?;
    let frames = EnvelopeExtractor::new(config.fps, config.envelope).extract(signal);
    let threshold = policy.resolve(&frames);
    let timeline = FrameSequencer::new(config.smoothing).sequence(&frames, threshold);

    tracing::info!(
        fps = config.fps.get(),
        frames = frames.len(),
        threshold = threshold.value(),
        policy = %policy.describe(),
        open_ratio = timeline.open_ratio(),
        "mouth timeline ready"
    );

    Ok(Analysis {
        duration: signal.duration(),
        threshold,
        frames,
        timeline,
    })
}

#[derive(Clone, Debug, PartialEq)]
pub struct RunReport {
    pub analysis: Analysis,
    pub transcript: Transcript,
    pub character: CharacterDescription,
    pub output: ComposeOutput,
}

#[derive(Clone, Debug, PartialEq)]
pub enum PipelineOutcome {
    /// Zero-length input: nothing is rendered and no file is written. The
    /// (empty) analysis is still reported.
    Skipped { audio: PathBuf, analysis: Analysis },
    Rendered(RunReport),
}

impl PipelineOutcome {
    pub fn analysis(&self) -> &Analysis {
        match self {
            PipelineOutcome::Skipped { analysis, .. } => analysis,
            PipelineOutcome::Rendered(report) => &report.analysis,
        }
    }
}

pub struct Pipeline<L, T, D, S, C> {
    pub loader: L,
    pub transcriber: T,
    pub designer: D,
    pub sprites: S,
    pub compositor: C,
    pub config: PipelineConfig,
}

impl<L, T, D, S, C> Pipeline<L, T, D, S, C>
where
    L: AudioLoader,
    T: Transcriber,
    D: CharacterDesigner,
    S: SpriteSource,
    C: Compositor,
{
    pub async fn load_and_analyze(&self, audio: &Path) -> Result<Analysis, PipelineError> {
        let signal = self.loader.load(audio).await?;
        tracing::info!(
            path = %audio.display(),
            sample_rate = signal.sample_rate(),
            channels = signal.channels(),
            seconds = signal.duration().as_secs_f64(),
            "audio loaded"
        );
        analyze(&signal, &self.config.analysis)
    }

    pub async fn run(&self, request: &RunRequest) -> Result<PipelineOutcome, PipelineError> {
        let analysis = self.load_and_analyze(&request.audio).await?;
        if analysis.timeline.is_empty() {
            tracing::info!(path = %request.audio.display(), "audio has zero duration; nothing to render");
            return Ok(PipelineOutcome::Skipped {
                audio: request.audio.clone(),
                analysis,
            });
        }

        let (transcript, character) = self.character_for(request).await?;
        let images = self.sprites.pose_images(character.clone()).await?;
        let sprites = PoseSprites::from_bytes(&images, self.config.render.sprite_edge_px)?;
        drop(images);

        let output = self
            .compositor
            .compose(ComposeJob {
                timeline: &analysis.timeline,
                sprites: &sprites,
                audio: &request.audio,
                output: &request.output,
                fps: self.config.analysis.fps,
            })
            .await?;

        tracing::info!(
            output = %output.path.display(),
            seconds = output.duration.as_secs_f64(),
            "video written"
        );

        Ok(PipelineOutcome::Rendered(RunReport {
            analysis,
            transcript,
            character,
            output,
        }))
    }

    /// Transcribe, then design the character. Both are skipped when the sprite
    /// source does not use a description.
    async fn character_for(
        &self,
        request: &RunRequest,
    ) -> Result<(Transcript, CharacterDescription), PipelineError> {
        if !self.sprites.needs_transcript() {
            tracing::debug!("sprite source ignores the description; skipping transcription and design");
            return Ok((Transcript::default(), CharacterDescription::default()));
        }
        let transcript = self.transcribe(&request.audio).await?;
        let character = self
            .designer
            .design(CharacterBrief {
                transcript: transcript.text.clone(),
                hint: request.hint.clone(),
            })
            .await?;
        Ok((transcript, character))
    }

    async fn transcribe(&self, audio: &Path) -> Result<Transcript, PipelineError> {
        let bytes = tokio::fs::read(audio)
            .await
            .map_err(|source| PipelineError::ReadAudio {
                path: audio.display().to_string(),
                source,
            })?;
        let file_name = audio
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio".to_owned());
        Ok(self
            .transcriber
            .transcribe(AudioUpload {
                file_name,
                bytes: bytes.into(),
            })
            .await?)
    }
}
