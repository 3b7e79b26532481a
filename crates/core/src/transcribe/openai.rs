use crate::config::{ApiKey, Language};
use crate::transcribe::{AudioUpload, Transcriber, TranscribeError, Transcript};
use crate::util::{is_http_retryable, RetryPolicy};
use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const TRANSCRIPTION_MODEL: &str = "whisper-1";

#[derive(Clone)]
pub struct OpenAiTranscriber {
    client: Client,
    api_key: ApiKey,
    base_url: String,
    language: Language,
    retry: RetryPolicy,
}

impl OpenAiTranscriber {
    pub fn new(api_key: ApiKey, language: Language) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: DEFAULT_BASE_URL.to_owned(),
            language,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/audio/transcriptions", self.base_url.trim_end_matches('/'))
    }

    async fn request_once(&self, audio: &AudioUpload) -> Result<Transcript, TranscribeError> {
        let file = Part::bytes(audio.bytes.to_vec()).file_name(audio.file_name.clone());
        let form = Form::new()
            .part("file", file)
            .text("model", TRANSCRIPTION_MODEL)
            .text("language", self.language.as_str().to_owned());

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(self.api_key.expose())
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_owned());
            return Err(TranscribeError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| TranscribeError::InvalidResponse(e.to_string()))?;
        Ok(Transcript {
            text: parsed.text.trim().to_owned(),
        })
    }
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
}

fn is_retryable(e: &TranscribeError) -> bool {
    match e {
        TranscribeError::Network(e) => e.is_timeout() || e.is_connect(),
        TranscribeError::Api { status, .. } => is_http_retryable(*status),
        TranscribeError::InvalidResponse(_) => false,
    }
}

impl Transcriber for OpenAiTranscriber {
    fn transcribe(&self, audio: AudioUpload) -> BoxFuture<'_, Result<Transcript, TranscribeError>> {
        async move {
            let transcript = self
                .retry
                .run("transcribe", || self.request_once(&audio), is_retryable)
                .await?;
            tracing::info!(
                chars = transcript.text.len(),
                language = self.language.as_str(),
                "transcribed audio"
            );
            Ok(transcript)
        }
        .boxed()
    }
}
