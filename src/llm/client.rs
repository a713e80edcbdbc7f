//! Async HTTP client for language-model APIs
//!
//! Speaks the Anthropic messages format and the OpenAI-compatible chat
//! format (DeepSeek, OpenAI, local servers), picked from the API URL.
//! Embeddings always use the OpenAI-compatible `/embeddings` shape.

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::core::config::LlmSection;
use crate::core::error::{ArlaError, Result};

/// API format type
#[derive(Debug, Clone, PartialEq)]
pub enum ApiFormat {
    Anthropic,
    OpenAI,
}

/// Text of a completion and the tokens it consumed
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub tokens_used: u32,
}

pub struct LlmClient {
    client: Client,
    api_key: String,
    api_url: String,
    embedding_url: String,
    model: String,
    embedding_model: String,
    max_tokens: u32,
    temperature: f32,
    api_format: ApiFormat,
}

impl std::fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmClient")
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .field("api_format", &self.api_format)
            .finish()
    }
}

impl LlmClient {
    pub fn new(api_key: String, api_url: String, model: String) -> Self {
        let api_format = Self::detect_api_format(&api_url);
        Self {
            client: Client::new(),
            api_key,
            api_url,
            embedding_url: "https://api.openai.com/v1/embeddings".into(),
            model,
            embedding_model: "text-embedding-3-small".into(),
            max_tokens: 512,
            temperature: 0.2,
            api_format,
        }
    }

    fn detect_api_format(url: &str) -> ApiFormat {
        if url.contains("anthropic.com") {
            ApiFormat::Anthropic
        } else {
            ApiFormat::OpenAI
        }
    }

    /// Create a client from environment variables, with sampling settings
    /// and model names from the config
    ///
    /// Required: LLM_API_KEY
    /// Optional: LLM_API_URL (defaults to Anthropic API)
    /// Optional: LLM_MODEL (overrides `llm.completion_model`)
    /// Optional: LLM_EMBEDDING_URL (defaults to the OpenAI embeddings endpoint)
    pub fn from_env(settings: &LlmSection) -> Result<Self> {
        let api_key = std::env::var("LLM_API_KEY")
            .map_err(|_| ArlaError::Llm("LLM_API_KEY not set".into()))?;
        let api_url = std::env::var("LLM_API_URL")
            .unwrap_or_else(|_| "https://api.anthropic.com/v1/messages".into());
        let model = std::env::var("LLM_MODEL").unwrap_or_else(|_| settings.completion_model.clone());

        let mut client = Self::new(api_key, api_url, model);
        if let Ok(url) = std::env::var("LLM_EMBEDDING_URL") {
            client.embedding_url = url;
        }
        client.embedding_model = settings.embedding_model.clone();
        client.max_tokens = settings.max_tokens;
        client.temperature = settings.temperature;
        Ok(client)
    }

    pub fn api_format(&self) -> &ApiFormat {
        &self.api_format
    }

    pub async fn complete(&self, system: &str, user: &str) -> Result<Completion> {
        match self.api_format {
            ApiFormat::Anthropic => self.complete_anthropic(system, user).await,
            ApiFormat::OpenAI => self.complete_openai(system, user).await,
        }
    }

    async fn complete_anthropic(&self, system: &str, user: &str) -> Result<Completion> {
        let request = AnthropicRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            system: system.into(),
            messages: vec![Message {
                role: "user".into(),
                content: user.into(),
            }],
        };

        let response = self
            .client
            .post(&self.api_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| ArlaError::Llm(e.to_string()))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(ArlaError::Llm(format!("API error: {}", error_text)));
        }

        let completion: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| ArlaError::Llm(e.to_string()))?;

        let text = completion
            .content
            .first()
            .map(|c| c.text.clone())
            .ok_or_else(|| ArlaError::Llm("Empty response".into()))?;
        let tokens_used = completion
            .usage
            .map_or(0, |u| u.input_tokens + u.output_tokens);
        Ok(Completion { text, tokens_used })
    }

    async fn complete_openai(&self, system: &str, user: &str) -> Result<Completion> {
        let request = OpenAIRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            messages: vec![
                Message {
                    role: "system".into(),
                    content: system.into(),
                },
                Message {
                    role: "user".into(),
                    content: user.into(),
                },
            ],
        };

        let response = self
            .client
            .post(&self.api_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| ArlaError::Llm(e.to_string()))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(ArlaError::Llm(format!("API error: {}", error_text)));
        }

        let completion: OpenAIResponse = response
            .json()
            .await
            .map_err(|e| ArlaError::Llm(e.to_string()))?;

        let text = completion
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .ok_or_else(|| ArlaError::Llm("Empty response".into()))?;
        let tokens_used = completion.usage.map_or(0, |u| u.total_tokens);
        Ok(Completion { text, tokens_used })
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let request = EmbeddingRequest {
            model: self.embedding_model.clone(),
            input: text.into(),
        };

        let response = self
            .client
            .post(&self.embedding_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| ArlaError::Llm(e.to_string()))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(ArlaError::Llm(format!("Embedding API error: {}", error_text)));
        }

        let body: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| ArlaError::Llm(e.to_string()))?;

        body.data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| ArlaError::Llm("Empty embedding response".into()))
    }
}

// Anthropic API format
#[derive(Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    system: String,
    messages: Vec<Message>,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlock>,
    usage: Option<AnthropicUsage>,
}

#[derive(Deserialize)]
struct ContentBlock {
    text: String,
}

#[derive(Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

// OpenAI-compatible API format
#[derive(Serialize)]
struct OpenAIRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<Message>,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    choices: Vec<Choice>,
    usage: Option<OpenAIUsage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: String,
}

#[derive(Deserialize)]
struct OpenAIUsage {
    total_tokens: u32,
}

#[derive(Serialize)]
struct EmbeddingRequest {
    model: String,
    input: String,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

// Shared
#[derive(Serialize)]
struct Message {
    role: String,
    content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_follows_url() {
        let client = LlmClient::new(
            "test-key".into(),
            "https://api.anthropic.com/v1/messages".into(),
            "test-model".into(),
        );
        assert_eq!(client.api_format(), &ApiFormat::Anthropic);

        let client = LlmClient::new("k".into(), "https://api.deepseek.com/chat/completions".into(), "m".into());
        assert_eq!(client.api_format(), &ApiFormat::OpenAI);
    }

    #[test]
    fn test_usage_is_optional_in_responses() {
        let body = r#"{"content": [{"type": "text", "text": "hi"}]}"#;
        let parsed: AnthropicResponse = serde_json::from_str(body).unwrap();
        assert!(parsed.usage.is_none());

        let body = r#"{"choices": [{"message": {"content": "ok"}}], "usage": {"total_tokens": 12}}"#;
        let parsed: OpenAIResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.usage.unwrap().total_tokens, 12);
    }
}
