use crate::config::ApiKey;
use crate::design::{CharacterBrief, CharacterDescription, CharacterDesigner, DesignError};
use crate::util::{is_http_retryable, RetryPolicy};
use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DESIGN_MODEL: &str = "gpt-4o";

const DESIGNER_PROMPT: &str = "You are the lead character designer of a gentle children's \
animation studio. Write one image-generation prompt for the character who speaks the audio \
below. Style: cute storybook illustration, friendly, soft rounded shapes, warm colors, simple \
clean design, solid pastel background; never grotesque or edgy.";

#[derive(Clone)]
pub struct OpenAiCharacterDesigner {
    client: Client,
    api_key: ApiKey,
    base_url: String,
    retry: RetryPolicy,
}

impl OpenAiCharacterDesigner {
    pub fn new(api_key: ApiKey) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: DEFAULT_BASE_URL.to_owned(),
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
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    async fn request_once(&self, prompt: &str) -> Result<CharacterDescription, DesignError> {
        let request = ChatRequest {
            model: DESIGN_MODEL,
            messages: vec![ChatMessage {
                role: "system",
                content: prompt,
            }],
        };
        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(self.api_key.expose())
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_owned());
            return Err(DesignError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| DesignError::InvalidResponse(e.to_string()))?;
        parsed.into_description()
    }
}

fn designer_prompt(brief: &CharacterBrief) -> String {
    format!(
        "{DESIGNER_PROMPT}\nContext: '{}'. Extra clue: '{}'.\nRespond ONLY with the prompt, in English.",
        brief.transcript.trim(),
        brief.hint_text()
    )
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    content: Option<String>,
}

impl ChatResponse {
    fn into_description(self) -> Result<CharacterDescription, DesignError> {
        let text = self
            .choices
            .into_iter()
            .find_map(|c| c.message.content)
            .map(|t| t.trim().to_owned())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| DesignError::InvalidResponse("empty character description".to_owned()))?;
        Ok(CharacterDescription { text })
    }
}

fn is_retryable(e: &DesignError) -> bool {
    match e {
        DesignError::Network(e) => e.is_timeout() || e.is_connect(),
        DesignError::Api { status, .. } => is_http_retryable(*status),
        DesignError::InvalidResponse(_) => false,
    }
}

impl CharacterDesigner for OpenAiCharacterDesigner {
    fn design(&self, brief: CharacterBrief) -> BoxFuture<'_, Result<CharacterDescription, DesignError>> {
        async move {
            let prompt = designer_prompt(&brief);
            let description = self
                .retry
                .run("design character", || self.request_once(&prompt), is_retryable)
                .await?;
            tracing::info!(chars = description.text.len(), "character designed");
            Ok(description)
        }
        .boxed()
    }
}
