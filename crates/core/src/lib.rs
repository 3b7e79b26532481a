//! Audio-driven lip-flap animation: turns a speech clip into a two-pose
//! mouth timeline and renders it over the original audio.

pub mod artwork;
pub mod compose;
pub mod config;
pub mod decode;
pub mod design;
pub mod envelope;
pub mod pipeline;
pub mod sequence;
pub mod sprites;
pub mod threshold;
pub mod transcribe;
pub mod util;
