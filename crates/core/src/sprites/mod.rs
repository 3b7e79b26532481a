//! The two character poses. Each is decoded and scaled exactly once per run and
//! then shared by reference for every span of the timeline.

use crate::sequence::MouthState;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, RgbaImage};
use std::path::{Path, PathBuf};

#[derive(thiserror::Error, Debug)]
pub enum SpriteError {
    #[error("cannot decode {pose} pose image: {details}")]
    Decode { pose: &'static str, details: String },
    #[error("cannot write {pose} pose image: {details}")]
    Write { pose: &'static str, details: String },
}

/// Encoded image bytes for both poses, as delivered by a sprite source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoseImageBytes {
    pub open: Vec<u8>,
    pub closed: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PosePaths {
    pub open: PathBuf,
    pub closed: PathBuf,
}

impl PosePaths {
    pub fn for_state(&self, state: MouthState) -> &Path {
        match state {
            MouthState::Open => &self.open,
            MouthState::Closed => &self.closed,
        }
    }
}

#[derive(Clone, Debug)]
pub struct PoseSprites {
    open: RgbaImage,
    closed: RgbaImage,
}

impl PoseSprites {
    pub fn from_bytes(bytes: &PoseImageBytes, edge_px: u32) -> Result<Self, SpriteError> {
        Ok(Self {
            open: decode_scaled(&bytes.open, MouthState::Open, edge_px)?,
            closed: decode_scaled(&bytes.closed, MouthState::Closed, edge_px)?,
        })
    }

    pub fn image(&self, state: MouthState) -> &RgbaImage {
        match state {
            MouthState::Open => &self.open,
            MouthState::Closed => &self.closed,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.closed.dimensions()
    }

    /// Writes each pose once as PNG into `dir`.
    pub fn write_png(&self, dir: &Path) -> Result<PosePaths, SpriteError> {
        let paths = PosePaths {
            open: dir.join("frame_open.png"),
            closed: dir.join("frame_closed.png"),
        };
        for state in [MouthState::Open, MouthState::Closed] {
            self.image(state)
                .save_with_format(paths.for_state(state), ImageFormat::Png)
                .map_err(|e| SpriteError::Write {
                    pose: state.as_str(),
                    details: e.to_string(),
                })?;
        }
        Ok(paths)
    }
}

fn decode_scaled(bytes: &[u8], state: MouthState, edge_px: u32) -> Result<RgbaImage, SpriteError> {
    let img: DynamicImage = image::load_from_memory(bytes).map_err(|e| SpriteError::Decode {
        pose: state.as_str(),
        details: e.to_string(),
    })?;
    // libx264 with yuv420p needs even dimensions; a square edge keeps both
    // poses aligned on the same canvas.
    let edge = edge_px.max(2) & !1;
    if img.width() == edge && img.height() == edge {
        return Ok(img.into_rgba8());
    }
    Ok(img.resize_exact(edge, edge, FilterType::Triangle).into_rgba8())
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn poses_are_scaled_to_a_common_even_square() {
        let bytes = PoseImageBytes {
            open: png_bytes(20, 10, [255, 0, 0, 255]),
            closed: png_bytes(7, 7, [0, 0, 255, 255]),
        };
        let sprites = PoseSprites::from_bytes(&bytes, 33).unwrap();
        assert_eq!(sprites.image(MouthState::Open).dimensions(), (32, 32));
        assert_eq!(sprites.dimensions(), (32, 32));
    }

    #[test]
    fn each_state_maps_to_its_own_image() {
        let sprites = PoseSprites::from_bytes(&pose_bytes(), 4).unwrap();
        assert_eq!(sprites.image(MouthState::Open).get_pixel(1, 1).0, [255, 0, 0, 255]);
        assert_eq!(sprites.image(MouthState::Closed).get_pixel(1, 1).0, [0, 0, 255, 255]);
    }

    #[test]
    fn undecodable_bytes_name_the_pose() {
        let bytes = PoseImageBytes {
            open: png_bytes(4, 4, [0, 0, 0, 255]),
            closed: b"not an image".to_vec(),
        };
        let err = PoseSprites::from_bytes(&bytes, 4).unwrap_err();
        assert!(err.to_string().contains("closed"));
    }

    #[test]
    fn write_png_produces_one_file_per_pose() {
        let dir = tempfile::tempdir().unwrap();
        let sprites = PoseSprites::from_bytes(&pose_bytes(), 4).unwrap();
        let paths = sprites.write_png(dir.path()).unwrap();
        assert!(paths.open.is_file());
        assert!(paths.closed.is_file());
        assert_ne!(paths.open, paths.closed);
    }
}
