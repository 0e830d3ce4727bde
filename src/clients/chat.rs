use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

use crate::data::TransformationService;
use crate::error::GenerationError;

const SYSTEM_PROMPT: &str = "You are a senior Python engineer who applies compliance patches to FastAPI services. Reply only with the requested file sections.";

/// Longest error body kept from a failed HTTP response.
const MAX_ERROR_BODY: usize = 500;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// Client for an OpenAI-compatible `/chat/completions` endpoint.
#[derive(Debug, Clone)]
pub struct ChatCompletionsClient {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl ChatCompletionsClient {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, GenerationError> {
        let endpoint = endpoint.into();
        if endpoint.trim().is_empty() {
            return Err(GenerationError::NotConfigured);
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GenerationError::Unreachable(e.to_string()))?;
        Ok(Self {
            client,
            endpoint,
            model: model.into(),
            api_key,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn url(&self) -> String {
        format!("{}/chat/completions", self.endpoint.trim_end_matches('/'))
    }

    pub async fn complete(&self, prompt: &str) -> Result<Option<String>, GenerationError> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: 0.0,
        };

        let mut request = self.client.post(self.url()).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        debug!(model = %self.model, chars = prompt.len(), "sending transformation request");
        let response = request
            .send()
            .await
            .map_err(|e| GenerationError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let mut text = response.text().await.unwrap_or_default();
            if let Some((idx, _)) = text.char_indices().nth(MAX_ERROR_BODY) {
                text.truncate(idx);
            }
            return Err(GenerationError::Http {
                status: status.as_u16(),
                body: text,
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::MalformedResponse(e.to_string()))?;
        Ok(first_content(parsed))
    }
}

fn first_content(response: ChatResponse) -> Option<String> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .filter(|content| !content.trim().is_empty())
}

/// The configured generation backend.
///
/// `Offline` never produces a transformation, so every patch cycle goes
/// straight to the deterministic templates.
#[derive(Debug, Clone)]
pub enum Generator {
    Remote(ChatCompletionsClient),
    Offline,
}

impl TransformationService for Generator {
    fn transform(
        &self,
        prompt: &str,
    ) -> impl Future<Output = Result<Option<String>, GenerationError>> + Send {
        async move {
            match self {
                Generator::Remote(client) => client.complete(prompt).await,
                Generator::Offline => Ok(None),
            }
        }
    }
}
