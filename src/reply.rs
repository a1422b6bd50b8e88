//! Reply generator — turns a message body into persona-voiced reply text.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::DEFAULT_PERSONA;
use crate::llm::provider::{ChatMessage, CompletionRequest, LlmProvider};

/// Replies this short (in characters) are treated as non-answers.
pub const MIN_REPLY_CHARS: usize = 10;

/// Configuration for reply generation.
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// LLM temperature for reply generation.
    pub temperature: f32,
    /// Max tokens for LLM response.
    pub max_tokens: u32,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            temperature: 0.8,
            max_tokens: 1024,
        }
    }
}

/// Generates replies through a remote provider. Never fails outward.
pub struct ReplyGenerator {
    llm: Arc<dyn LlmProvider>,
    persona: Option<String>,
    config: GeneratorConfig,
}

impl ReplyGenerator {
    /// `persona` overrides the built-in persona verbatim when set.
    pub fn new(llm: Arc<dyn LlmProvider>, persona: Option<String>) -> Self {
        Self {
            llm,
            persona,
            config: GeneratorConfig::default(),
        }
    }

    /// The persona text prepended to every request.
    pub fn persona(&self) -> &str {
        match &self.persona {
            Some(custom) => custom.as_str(),
            None => DEFAULT_PERSONA,
        }
    }

    /// Build the single prompt sent to the provider.
    pub fn build_prompt(&self, body: &str) -> String {
        format!("{}\n\n\"{}\"", self.persona(), body)
    }

    /// Generate a reply for `body`.
    ///
    /// Returns an empty string when the provider fails or its answer is too
    /// short to be usable.
    pub async fn generate(&self, body: &str) -> String {
        if self.persona.is_some() {
            debug!("Using custom personality");
        } else {
            debug!("Applying default personality");
        }

        let request = CompletionRequest::new(vec![ChatMessage::user(self.build_prompt(body))])
            .with_temperature(self.config.temperature)
            .with_max_tokens(self.config.max_tokens);

        let response = match self.llm.complete(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(model = self.llm.model_name(), error = %e, "Chatbot returned error");
                return String::new();
            }
        };

        if response.content.chars().count() <= MIN_REPLY_CHARS {
            warn!(reply = %response.content, "Chatbot reply too short, discarding");
            return String::new();
        }

        debug!(
            model = self.llm.model_name(),
            input_tokens = response.input_tokens,
            output_tokens = response.output_tokens,
            "Got a response from the chatbot"
        );
        response.content
    }
}
