//! Client for OpenAI-compatible `/chat/completions` and `/embeddings`
//! endpoints.

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::debug;

use crate::error::ModelError;
use crate::model::{CompletionOptions, EmbeddingModel, LanguageModel};
use crate::prompt::GenerationRequest;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone, PartialEq)]
pub struct OpenAiConfig {
    pub base_url: String,
    pub api_key: String,
    pub chat_model: String,
    pub embedding_model: String,
    /// Upper bound for one HTTP exchange.
    pub timeout: Duration,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: String::new(),
            chat_model: "gpt-4o".to_string(),
            embedding_model: "text-embedding-ada-002".to_string(),
            timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OpenAiClient {
    http: Client,
    config: OpenAiConfig,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl OpenAiClient {
    pub fn new(config: OpenAiConfig) -> Result<Self, ModelError> {
        if config.api_key.trim().is_empty() {
            return Err(ModelError::Unavailable("no API key configured".into()));
        }
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(ModelError::Client)?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &OpenAiConfig {
        &self.config
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.config.base_url.trim_end_matches('/'))
    }

    async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &Value,
    ) -> Result<T, ModelError> {
        let endpoint = self.endpoint(path);
        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(&self.config.api_key)
            .json(body)
            .send()
            .await
            .map_err(|source| ModelError::Transport {
                endpoint: endpoint.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Status {
                endpoint,
                status: status.as_u16(),
                body,
            });
        }

        let text = response
            .text()
            .await
            .map_err(|source| ModelError::Transport {
                endpoint: endpoint.clone(),
                source,
            })?;
        serde_json::from_str(&text).map_err(|err| ModelError::InvalidResponse {
            endpoint,
            message: err.to_string(),
        })
    }
}

/// Builds the `/chat/completions` body for `request`.
pub fn chat_body(model: &str, request: &GenerationRequest, options: &CompletionOptions) -> Value {
    let mut messages = vec![json!({"role": "system", "content": request.system})];
    if let Some(reply) = &request.example_reply {
        messages.push(json!({"role": "assistant", "content": reply}));
    }
    let user = match &request.preview {
        Some(preview) => json!([
            {"type": "text", "text": request.user},
            {"type": "image_url", "image_url": {"url": preview.data_url()}},
        ]),
        None => json!(request.user),
    };
    messages.push(json!({"role": "user", "content": user}));

    json!({
        "model": model,
        "messages": messages,
        "max_tokens": options.max_tokens,
        "temperature": options.temperature,
    })
}

impl LanguageModel for OpenAiClient {
    async fn complete(
        &self,
        request: &GenerationRequest,
        options: &CompletionOptions,
    ) -> Result<String, ModelError> {
        let body = chat_body(&self.config.chat_model, request, options);
        let response: ChatResponse = self.post("chat/completions", &body).await?;
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ModelError::InvalidResponse {
                endpoint: self.endpoint("chat/completions"),
                message: "no choices in response".into(),
            })?;
        let content = choice.message.content.unwrap_or_default();
        debug!(chars = content.len(), "completion received");
        Ok(content)
    }
}

impl EmbeddingModel for OpenAiClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ModelError> {
        let body = json!({"model": self.config.embedding_model, "input": text});
        let response: EmbeddingResponse = self.post("embeddings", &body).await?;
        response
            .data
            .into_iter()
            .next()
            .map(|data| data.embedding)
            .ok_or_else(|| ModelError::InvalidResponse {
                endpoint: self.endpoint("embeddings"),
                message: "no embedding in response".into(),
            })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{OpenAiClient, OpenAiConfig, chat_body};
    use crate::dimensions::BoundingBox;
    use crate::error::ModelError;
    use crate::model::CompletionOptions;
    use crate::prompt::{PreviewImage, compose_error_correction, compose_initial};

    #[test]
    fn initial_body_seeds_an_assistant_turn() {
        let request = compose_initial("a cube", &BoundingBox::default(), &[]);
        let body = chat_body("gpt-4o", &request, &CompletionOptions::default());
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["role"], "assistant");
        assert_eq!(messages[2], json!({"role": "user", "content": "a cube"}));
        assert_eq!(body["max_tokens"], 10_000);
    }

    #[test]
    fn preview_becomes_an_image_part() {
        let request =
            compose_error_correction("x", "boom", Some(PreviewImage::png(vec![0xff])));
        let body = chat_body("gpt-4o", &request, &CompletionOptions::default());
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        let parts = messages[1]["content"].as_array().unwrap();
        assert_eq!(parts[0]["type"], "text");
        assert_eq!(parts[1]["image_url"]["url"], "data:image/png;base64,/w==");
    }

    #[test]
    fn missing_key_is_rejected() {
        let result = OpenAiClient::new(OpenAiConfig::default());
        assert!(matches!(result, Err(ModelError::Unavailable(_))));
    }

    #[test]
    fn endpoints_join_cleanly() {
        let client = OpenAiClient::new(OpenAiConfig {
            base_url: "http://localhost:8080/v1/".into(),
            api_key: "test".into(),
            ..OpenAiConfig::default()
        })
        .unwrap();
        assert_eq!(
            client.endpoint("chat/completions"),
            "http://localhost:8080/v1/chat/completions"
        );
    }
}
