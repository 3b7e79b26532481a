mod files;
mod openai;

use crate::design::CharacterDescription;
use crate::sprites::PoseImageBytes;
use futures::future::BoxFuture;

pub use files::FileSpriteSource;
pub use openai::OpenAiImageGenerator;

pub const DEFAULT_STYLE_PROMPT: &str = "Charming cartoon style, cute friendly character, \
soft colors, clean lines, solid pastel background.";

/// One prompt per pose; both share the style and description so the poses
/// depict the same character.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PosePrompts {
    pub closed: String,
    pub open: String,
}

impl PosePrompts {
    pub fn new(style: &str, description: &CharacterDescription) -> Self {
        let description = description.text.trim();
        Self {
            closed: format!(
                "{style} Description: {description} Pose: neutral listening face. \
                 Mouth: CLOSED and smiling gently."
            ),
            open: format!(
                "{style} Description: {description} Pose: same character talking excitedly. \
                 Mouth: WIDE OPEN."
            ),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ArtworkError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("image api returned HTTP {status}: {body}")]
    Api { status: u16, body: String },
    #[error("invalid image response: {0}")]
    InvalidResponse(String),
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Produces encoded images for both mouth poses.
pub trait SpriteSource: Send + Sync {
    fn pose_images(
        &self,
        description: CharacterDescription,
    ) -> BoxFuture<'_, Result<PoseImageBytes, ArtworkError>>;

    /// Whether this source uses the description at all. Sources that don't let
    /// the pipeline skip transcription and design.
    fn needs_transcript(&self) -> bool {
        true
    }
}

impl<T: SpriteSource + ?Sized> SpriteSource for Box<T> {
    fn pose_images(
        &self,
        description: CharacterDescription,
    ) -> BoxFuture<'_, Result<PoseImageBytes, ArtworkError>> {
        (**self).pose_images(description)
    }

    fn needs_transcript(&self) -> bool {
        (**self).needs_transcript()
    }
}
