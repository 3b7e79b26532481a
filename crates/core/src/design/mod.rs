//! Character design: turns what the clip says into a visual description of
//! the character that will speak it.

mod openai;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};

pub use openai::OpenAiCharacterDesigner;

/// What is known about the speaker before design.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CharacterBrief {
    pub transcript: String,
    pub hint: Option<String>,
}

impl CharacterBrief {
    pub fn hint_text(&self) -> &str {
        self.hint.as_deref().map(str::trim).unwrap_or("")
    }

    /// Plain-text description used when no designer model is involved.
    pub fn template_description(&self) -> String {
        let mut d = format!("A character saying: '{}'.", self.transcript.trim());
        let hint = self.hint_text();
        if !hint.is_empty() {
            d.push_str(&format!(" Extra clue: '{hint}'."));
        }
        d
    }
}

/// Visual description shared by both pose prompts.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CharacterDescription {
    pub text: String,
}

#[derive(thiserror::Error, Debug)]
pub enum DesignError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("design api returned HTTP {status}: {body}")]
    Api { status: u16, body: String },
    #[error("invalid design response: {0}")]
    InvalidResponse(String),
}

pub trait CharacterDesigner: Send + Sync {
    fn design(&self, brief: CharacterBrief) -> BoxFuture<'_, Result<CharacterDescription, DesignError>>;
}

impl<T: CharacterDesigner + ?Sized> CharacterDesigner for Box<T> {
    fn design(&self, brief: CharacterBrief) -> BoxFuture<'_, Result<CharacterDescription, DesignError>> {
        (**self).design(brief)
    }
}

/// Passes the brief through as a fixed sentence; no remote call.
#[derive(Clone, Debug, Default)]
pub struct TemplateDesigner;

impl CharacterDesigner for TemplateDesigner {
    fn design(&self, brief: CharacterBrief) -> BoxFuture<'_, Result<CharacterDescription, DesignError>> {
        async move {
            Ok(CharacterDescription {
                text: brief.template_description(),
            })
        }
        .boxed()
    }
}
