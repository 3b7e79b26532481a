mod ffmpeg;

use crate::config::FrameRate;
use crate::sequence::PoseTimeline;
use crate::sprites::{PoseSprites, SpriteError};
use futures::future::BoxFuture;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub use ffmpeg::FfmpegCompositor;

/// Everything needed to render one clip. Borrowed for the duration of the call.
#[derive(Clone, Copy, Debug)]
pub struct ComposeJob<'a> {
    pub timeline: &'a PoseTimeline,
    pub sprites: &'a PoseSprites,
    pub audio: &'a Path,
    pub output: &'a Path,
    pub fps: FrameRate,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComposeOutput {
    pub path: PathBuf,
    pub duration: Duration,
    pub spans: usize,
    pub runs: usize,
}

#[derive(thiserror::Error, Debug)]
pub enum ComposeError {
    #[error("nothing to render: the pose timeline is empty")]
    EmptyTimeline,

    #[error("ffmpeg unavailable: {0}")]
    FfmpegUnavailable(String),

    #[error("ran out of memory or disk space while rendering; retry with a shorter clip ({details})")]
    ResourceExhausted { details: String },

    #[error("encoder failed: {0}")]
    EncodeFailed(String),

    #[error(transparent)]
    Sprite(#[from] SpriteError),
}

impl ComposeError {
    pub(crate) fn from_io(context: &str, e: std::io::Error) -> Self {
        if is_exhaustion(&e) {
            ComposeError::ResourceExhausted {
                details: format!("{context}: {e}"),
            }
        } else {
            ComposeError::EncodeFailed(format!("{context}: {e}"))
        }
    }
}

fn is_exhaustion(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::OutOfMemory | std::io::ErrorKind::StorageFull
    )
}

pub trait Compositor: Send + Sync {
    fn compose<'a>(&'a self, job: ComposeJob<'a>)
        -> BoxFuture<'a, Result<ComposeOutput, ComposeError>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disk_full_is_resource_exhaustion() {
        let e = std::io::Error::from(std::io::ErrorKind::StorageFull);
        let err = ComposeError::from_io("writing concat script", e);
        assert!(matches!(err, ComposeError::ResourceExhausted { .. }));
        assert!(err.to_string().contains("shorter clip"));
    }

    #[test]
    fn other_io_errors_are_encode_failures() {
        let e = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        let err = ComposeError::from_io("spawning ffmpeg", e);
        assert!(matches!(err, ComposeError::EncodeFailed(_)));
    }
}
