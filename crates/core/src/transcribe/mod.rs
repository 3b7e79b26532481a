mod openai;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};

pub use openai::OpenAiTranscriber;

/// Raw audio file contents handed to a speech-to-text service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AudioUpload {
    pub file_name: String,
    pub bytes: Bytes,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transcript {
    pub text: String,
}

#[derive(thiserror::Error, Debug)]
pub enum TranscribeError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("transcription api returned HTTP {status}: {body}")]
    Api { status: u16, body: String },
    #[error("invalid transcription response: {0}")]
    InvalidResponse(String),
}

pub trait Transcriber: Send + Sync {
    fn transcribe(&self, audio: AudioUpload) -> BoxFuture<'_, Result<Transcript, TranscribeError>>;
}

impl<T: Transcriber + ?Sized> Transcriber for Box<T> {
    fn transcribe(&self, audio: AudioUpload) -> BoxFuture<'_, Result<Transcript, TranscribeError>> {
        (**self).transcribe(audio)
    }
}

/// Skips speech-to-text entirely; used when the character art is supplied
/// locally and no description is needed.
#[derive(Clone, Debug, Default)]
pub struct NullTranscriber;

impl Transcriber for NullTranscriber {
    fn transcribe(&self, _audio: AudioUpload) -> BoxFuture<'_, Result<Transcript, TranscribeError>> {
        async { Ok(Transcript::default()) }.boxed()
    }
}
