use crate::artwork::{ArtworkError, SpriteSource};
use crate::design::CharacterDescription;
use crate::sprites::PoseImageBytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::path::{Path, PathBuf};

/// Character art supplied as two local image files.
#[derive(Clone, Debug)]
pub struct FileSpriteSource {
    open: PathBuf,
    closed: PathBuf,
}

impl FileSpriteSource {
    pub fn new(open: PathBuf, closed: PathBuf) -> Self {
        Self { open, closed }
    }
}

async fn read(path: &Path) -> Result<Vec<u8>, ArtworkError> {
    tokio::fs::read(path).await.map_err(|source| ArtworkError::Io {
        path: path.display().to_string(),
        source,
    })
}

impl SpriteSource for FileSpriteSource {
    fn pose_images(
        &self,
        _description: CharacterDescription,
    ) -> BoxFuture<'_, Result<PoseImageBytes, ArtworkError>> {
        async move {
            Ok(PoseImageBytes {
                open: read(&self.open).await?,
                closed: read(&self.closed).await?,
            })
        }
        .boxed()
    }

    fn needs_transcript(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let open = dir.path().join("open.png");
        let closed = dir.path().join("closed.png");
        std::fs::write(&open, b"open-bytes").unwrap();
        std::fs::write(&closed, b"closed-bytes").unwrap();

        let source = FileSpriteSource::new(open, closed);
        assert!(!source.needs_transcript());
        let images = source.pose_images(CharacterDescription::default()).await.unwrap();
        assert_eq!(images.open, b"open-bytes");
        assert_eq!(images.closed, b"closed-bytes");
    }

    #[tokio::test]
    async fn missing_file_names_the_path() {
        let source = FileSpriteSource::new(PathBuf::from("/no/open.png"), PathBuf::from("/no/closed.png"));
        let err = source.pose_images(CharacterDescription::default()).await.unwrap_err();
        assert!(err.to_string().contains("/no/open.png"));
    }
}
