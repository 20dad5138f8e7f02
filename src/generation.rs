//! Generative-model abstraction and implementations.
//!
//! [`Generator`] is the single seam the pipeline uses for both query
//! reformulation and grounded answer generation: one prompt in, one text
//! out. Output is treated as non-deterministic; nothing downstream assumes
//! more than shape.
//!
//! Implementations:
//! - **[`DisabledGenerator`]** — returns errors; used when generation is not
//!   configured.
//! - **[`GroqGenerator`]** — calls a Groq (OpenAI-compatible) chat
//!   completions endpoint with timeout and capped exponential backoff,
//!   honoring `max_output_tokens` and `stop_sequences`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::GenerationConfig;
use crate::error::{PipelineError, Result};
use crate::retry;

/// An external prompt-to-text service.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Model identifier (e.g. `"llama3-70b-8192"`).
    fn model_name(&self) -> &str;

    /// Produce a completion for a single prompt.
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// Create the appropriate [`Generator`] for the configuration.
pub fn create_generator(config: &GenerationConfig) -> Result<Box<dyn Generator>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledGenerator)),
        "groq" => Ok(Box::new(GroqGenerator::new(config)?)),
        other => Err(PipelineError::config(format!(
            "unknown generation provider: {}",
            other
        ))),
    }
}

/// A no-op generator that always returns errors. Used when
/// `generation.provider = "disabled"`.
pub struct DisabledGenerator;

#[async_trait]
impl Generator for DisabledGenerator {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn generate(&self, _prompt: &str) -> Result<String> {
        Err(PipelineError::generation(
            "generation provider is disabled; set [generation] provider in config",
            false,
        ))
    }
}

/// Generator backed by a Groq (OpenAI-compatible) chat completions endpoint.
#[derive(Debug)]
pub struct GroqGenerator {
    client: reqwest::Client,
    model: String,
    base_url: String,
    api_key: String,
    max_output_tokens: u32,
    stop_sequences: Vec<String>,
    max_retries: u32,
}

impl GroqGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| PipelineError::config("generation.model required"))?;

        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            PipelineError::config(format!(
                "{} environment variable not set",
                config.api_key_env
            ))
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| PipelineError::generation(e.to_string(), false))?;

        Ok(Self {
            client,
            model,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            max_output_tokens: config.max_output_tokens,
            stop_sequences: config.stop_sequences.clone(),
            max_retries: config.max_retries,
        })
    }

    async fn request_completion(&self, prompt: &str) -> Result<String> {
        #[derive(Serialize)]
        struct Request<'a> {
            model: &'a str,
            messages: [Message<'a>; 2],
            max_tokens: u32,
            #[serde(skip_serializing_if = "Option::is_none")]
            stop: Option<&'a [String]>,
        }

        #[derive(Serialize)]
        struct Message<'a> {
            role: &'a str,
            content: &'a str,
        }

        #[derive(Deserialize)]
        struct Response {
            choices: Vec<Choice>,
        }

        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMessage,
        }

        #[derive(Deserialize)]
        struct ChoiceMessage {
            content: String,
        }

        let request = Request {
            model: &self.model,
            messages: [
                Message {
                    role: "system",
                    content: "You are a helpful assistant.",
                },
                Message {
                    role: "user",
                    content: prompt,
                },
            ],
            max_tokens: self.max_output_tokens,
            stop: if self.stop_sequences.is_empty() {
                None
            } else {
                Some(self.stop_sequences.as_slice())
            },
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| PipelineError::generation(format!("request failed: {}", e), true))?;

        let status = response.status();
        if !status.is_success() {
            let transient = status.as_u16() == 429 || status.is_server_error();
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::generation(
                format!(
                    "chat completions API error {}: {}",
                    status,
                    crate::embedding::api_error_detail(&body)
                ),
                transient,
            ));
        }

        let body: Response = response
            .json()
            .await
            .map_err(|e| PipelineError::generation(format!("invalid response: {}", e), false))?;

        body.choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| PipelineError::generation("response contained no choices", false))
    }
}

#[async_trait]
impl Generator for GroqGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        retry::with_backoff(self.max_retries, || self.request_completion(prompt)).await
    }
}
