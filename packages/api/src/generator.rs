// ABOUTME: Client for the code-generation service that writes voice-agent programs
// ABOUTME: CodeGenerator trait plus an HTTP implementation posting JSON to a configured URL

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("Generator error: {0}")]
    Api(String),

    #[error("Generator returned no program text")]
    EmptyResponse,

    #[error("No code generator configured")]
    NotConfigured,
}

pub type GeneratorResult<T> = Result<T, GeneratorError>;

/// Produces program text from natural language
#[async_trait]
pub trait CodeGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> GeneratorResult<String>;

    async fn refine(&self, source: &str, instruction: &str) -> GeneratorResult<String>;
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    prompt: &'a str,
}

#[derive(Debug, Serialize)]
struct RefineRequest<'a> {
    source: &'a str,
    instruction: &'a str,
}

#[derive(Debug, Deserialize)]
struct GeneratedProgram {
    #[serde(alias = "code")]
    source: String,
}

pub struct HttpCodeGenerator {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpCodeGenerator {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    async fn post<B: Serialize>(&self, route: &str, body: &B) -> GeneratorResult<String> {
        let url = format!("{}/{}", self.base_url, route);
        let mut request = self.client.post(&url).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Generator {} answered {}: {}", url, status, body);
            return Err(GeneratorError::Api(format!("{} returned {}", route, status)));
        }

        let program: GeneratedProgram = response.json().await?;
        let source = strip_code_fences(&program.source);
        if source.trim().is_empty() {
            return Err(GeneratorError::EmptyResponse);
        }
        info!("Generator produced {} bytes via {}", source.len(), route);
        Ok(source)
    }
}

#[async_trait]
impl CodeGenerator for HttpCodeGenerator {
    async fn generate(&self, prompt: &str) -> GeneratorResult<String> {
        self.post("generate", &GenerateRequest { prompt }).await
    }

    async fn refine(&self, source: &str, instruction: &str) -> GeneratorResult<String> {
        self.post(
            "refine",
            &RefineRequest {
                source,
                instruction,
            },
        )
        .await
    }
}

/// Drop a surrounding markdown fence (```js ... ```) if the model added one
pub fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    if !trimmed.starts_with("```") {
        return text.to_string();
    }

    let body = match trimmed.find('\n') {
        Some(newline) => &trimmed[newline + 1..],
        None => return String::new(),
    };
    let body = body.trim_end();
    let body = body.strip_suffix("```").unwrap_or(body);
    format!("{}\n", body.trim_end())
}
