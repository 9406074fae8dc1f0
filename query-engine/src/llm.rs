//! Language model client.
//!
//! The engine depends only on [`LanguageModel`]; [`GeminiClient`] is the
//! production implementation talking to the Generative Language REST API.

use async_trait::async_trait;
use reqwest::Client as ReqwestClient;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Header carrying the API key; the key never appears in the request URL.
const API_KEY_HEADER: &str = "x-goog-api-key";

use common::config::LlmConfig;

/// Model call failure. Always recovered by the generator's fallback path.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),

    #[error("model request failed: {0}")]
    Request(#[source] reqwest::Error),

    #[error("model API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("failed to decode model response: {0}")]
    Decode(#[source] reqwest::Error),

    #[error("model returned no text")]
    EmptyResponse,

    #[error("model call timed out after {0}s")]
    Timeout(u64),
}

/// A text-completion model.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Sends `prompt` and returns the model's text.
    async fn generate_content(&self, prompt: &str) -> Result<String, ProviderError>;

    /// Model name for logs.
    fn name(&self) -> &str;
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Deserialize, Debug)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize, Debug)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize, Debug)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<PartResponse>,
}

#[derive(Deserialize, Debug)]
struct PartResponse {
    #[serde(default)]
    text: String,
}

/// Gemini `generateContent` client.
#[derive(Clone)]
pub struct GeminiClient {
    client: ReqwestClient,
    api_url: String,
    api_key: String,
    model: String,
}

impl GeminiClient {
    pub fn new(
        api_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        let client = ReqwestClient::builder()
            .build()
            .map_err(ProviderError::ClientBuild)?;
        Ok(Self {
            client,
            api_url: api_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        })
    }

    /// Builds a client from configuration; `Ok(None)` when no key is set.
    pub fn from_config(config: &LlmConfig) -> Result<Option<Self>, ProviderError> {
        match config.api_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => {
                Self::new(config.api_url.clone(), key, config.model.clone()).map(Some)
            }
            _ => Ok(None),
        }
    }
}

impl std::fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiClient")
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl LanguageModel for GeminiClient {
    async fn generate_content(&self, prompt: &str) -> Result<String, ProviderError> {
        let body = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part { text: prompt }],
            }],
        };

        let response = self
            .client
            .post(&self.api_url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Request(e.without_url()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let decoded: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.without_url()))?;
        let text: String = decoded
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().map(|p| p.text).collect())
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(ProviderError::EmptyResponse);
        }
        Ok(text)
    }

    fn name(&self) -> &str {
        &self.model
    }
}
