use crate::artwork::{ArtworkError, PosePrompts, SpriteSource, DEFAULT_STYLE_PROMPT};
use crate::design::CharacterDescription;
use crate::config::ApiKey;
use crate::sprites::PoseImageBytes;
use crate::util::{is_http_retryable, RetryPolicy};
use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const IMAGE_MODEL: &str = "dall-e-3";
const IMAGE_SIZE: &str = "1024x1024";

#[derive(Clone)]
pub struct OpenAiImageGenerator {
    client: Client,
    api_key: ApiKey,
    base_url: String,
    style: String,
    retry: RetryPolicy,
}

impl OpenAiImageGenerator {
    pub fn new(api_key: ApiKey) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: DEFAULT_BASE_URL.to_owned(),
            style: DEFAULT_STYLE_PROMPT.to_owned(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    pub fn with_style(mut self, style: String) -> Self {
        self.style = style;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/images/generations", self.base_url.trim_end_matches('/'))
    }

    async fn generate_once(&self, prompt: &str) -> Result<Vec<u8>, ArtworkError> {
        let request = ImageRequest {
            model: IMAGE_MODEL,
            prompt,
            size: IMAGE_SIZE,
            n: 1,
        };
        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(self.api_key.expose())
            .json(&request)
            .send()
            .await?;
        let response = check_status(response).await?;

        let parsed: ImageResponse = response
            .json()
            .await
            .map_err(|e| ArtworkError::InvalidResponse(e.to_string()))?;
        let url = parsed.first_url()?;

        let image = check_status(self.client.get(url).send().await?).await?;
        Ok(image.bytes().await?.to_vec())
    }

    async fn generate(&self, pose: &str, prompt: &str) -> Result<Vec<u8>, ArtworkError> {
        let bytes = self
            .retry
            .run("generate image", || self.generate_once(prompt), is_retryable)
            .await?;
        tracing::info!(pose, bytes = bytes.len(), "generated pose image");
        Ok(bytes)
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ArtworkError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<unreadable body>".to_owned());
    Err(ArtworkError::Api {
        status: status.as_u16(),
        body,
    })
}

#[derive(Serialize)]
struct ImageRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    size: &'a str,
    n: u8,
}

#[derive(Deserialize)]
struct ImageResponse {
    data: Vec<ImageData>,
}

#[derive(Deserialize)]
struct ImageData {
    url: Option<String>,
}

impl ImageResponse {
    fn first_url(self) -> Result<String, ArtworkError> {
        self.data
            .into_iter()
            .find_map(|d| d.url)
            .ok_or_else(|| ArtworkError::InvalidResponse("no image url in response".to_owned()))
    }
}

fn is_retryable(e: &ArtworkError) -> bool {
    match e {
        ArtworkError::Network(e) => e.is_timeout() || e.is_connect(),
        ArtworkError::Api { status, .. } => is_http_retryable(*status),
        ArtworkError::InvalidResponse(_) | ArtworkError::Io { .. } => false,
    }
}

impl SpriteSource for OpenAiImageGenerator {
    fn pose_images(
        &self,
        description: CharacterDescription,
    ) -> BoxFuture<'_, Result<PoseImageBytes, ArtworkError>> {
        async move {
            let prompts = PosePrompts::new(&self.style, &description);
            let closed = self.generate("closed", &prompts.closed).await?;
            let open = self.generate("open", &prompts.open).await?;
            Ok(PoseImageBytes { open, closed })
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_matches_images_api() {
        let body = serde_json::to_value(ImageRequest {
            model: IMAGE_MODEL,
            prompt: "a parrot",
            size: IMAGE_SIZE,
            n: 1,
        })
        .unwrap();
        assert_eq!(body["model"], "dall-e-3");
        assert_eq!(body["size"], "1024x1024");
        assert_eq!(body["n"], 1);
    }

    #[test]
    fn first_url_skips_entries_without_url() {
        let parsed: ImageResponse = serde_json::from_str(
            r#"{"data":[{"b64_json":"xx"},{"url":"https://img.example/1.png"}]}"#,
        )
        .unwrap();
        assert_eq!(parsed.first_url().unwrap(), "https://img.example/1.png");
    }

    #[test]
    fn empty_data_is_invalid() {
        let parsed: ImageResponse = serde_json::from_str(r#"{"data":[]}"#).unwrap();
        assert!(matches!(
            parsed.first_url(),
            Err(ArtworkError::InvalidResponse(_))
        ));
    }

    #[test]
    fn rate_limits_are_retried() {
        assert!(is_retryable(&ArtworkError::Api {
            status: 429,
            body: String::new()
        }));
        assert!(!is_retryable(&ArtworkError::Api {
            status: 400,
            body: String::new()
        }));
    }

    #[test]
    fn endpoint_uses_base_url() {
        let g = OpenAiImageGenerator::new(ApiKey::new("sk-test").unwrap())
            .with_base_url("http://localhost:1/v1".to_owned());
        assert_eq!(g.endpoint(), "http://localhost:1/v1/images/generations");
    }
}
