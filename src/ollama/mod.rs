
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::answering::LanguageModel;
use crate::config::OllamaConfig;
use crate::embeddings::{Embedder, check_dimension};
use crate::{RagError, Result};

const EXPONENTIAL_BACKOFF_BASE: u64 = 2;

/// Blocking client for the Ollama embedding and generation endpoints
#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: Url,
    embedding_model: String,
    embedding_dimension: usize,
    chat_model: String,
    temperature: f32,
    batch_size: u32,
    agent: ureq::Agent,
    retry_attempts: u32,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Debug, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub size: Option<u64>,
    pub digest: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    models: Vec<ModelInfo>,
}

impl OllamaClient {
    #[inline]
    pub fn new(config: &OllamaConfig) -> Result<Self> {
        let base_url = config.ollama_url()?;

        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(config.timeout_secs)))
            .build()
            .into();

        Ok(Self {
            base_url,
            embedding_model: config.embedding_model.clone(),
            embedding_dimension: config.embedding_dimension as usize,
            chat_model: config.chat_model.clone(),
            temperature: config.temperature,
            batch_size: config.batch_size.max(1),
            agent,
            retry_attempts: config.retry_attempts.max(1),
        })
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        self
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts.max(1);
        self
    }

    /// Test connection to Ollama server and verify both models are available
    #[inline]
    pub fn health_check(&self) -> Result<()> {
        debug!("Performing health check for Ollama at {}", self.base_url);

        let models = self.list_models()?;
        for model in [&self.embedding_model, &self.chat_model] {
            if !models.iter().any(|m| model_matches(&m.name, model)) {
                let available: Vec<&str> = models.iter().map(|m| m.name.as_str()).collect();
                warn!(
                    "Model {} not found. Available models: {:?}",
                    model, available
                );
                return Err(RagError::ModelUnavailable(format!(
                    "Model '{}' is not available. Available models: {:?}",
                    model, available
                )));
            }
        }

        info!(
            "Health check passed for Ollama server at {} with models {} and {}",
            self.base_url, self.embedding_model, self.chat_model
        );
        Ok(())
    }

    /// List all available models
    #[inline]
    pub fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = self.endpoint("/api/tags")?;

        debug!("Fetching available models from {}", url);

        let response_text = self.make_request_with_retry(|| {
            self.agent
                .get(url.as_str())
                .call()
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })?;

        let models_response: ModelsResponse = parse_response(&response_text, "models")?;

        debug!("Found {} models", models_response.models.len());
        Ok(models_response.models)
    }

    /// Embed one request worth of texts with a single `/api/embed` call
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = EmbedRequest {
            model: &self.embedding_model,
            input: texts,
        };
        let url = self.endpoint("/api/embed")?;
        let request_json = serde_json::to_string(&request)
            .map_err(|e| RagError::Other(anyhow::anyhow!("Failed to serialize request: {}", e)))?;

        let response_text = self.make_request_with_retry(|| {
            self.agent
                .post(url.as_str())
                .header("Content-Type", "application/json")
                .send(&request_json)
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })?;

        let response: EmbedResponse = parse_response(&response_text, "embedding")?;

        if response.embeddings.len() != texts.len() {
            return Err(RagError::ModelUnavailable(format!(
                "Mismatch between request and response counts: {} vs {}",
                texts.len(),
                response.embeddings.len()
            )));
        }

        for embedding in &response.embeddings {
            check_dimension(embedding, self.embedding_dimension)?;
        }

        Ok(response.embeddings)
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| RagError::Config(format!("Failed to build Ollama URL {}: {}", path, e)))
    }

    fn make_request_with_retry<F>(&self, mut request_fn: F) -> Result<String>
    where
        F: FnMut() -> Result<String, ureq::Error>,
    {
        let mut last_error = None;

        for attempt in 1..=self.retry_attempts {
            debug!("HTTP request attempt {}/{}", attempt, self.retry_attempts);

            match request_fn() {
                Ok(response_text) => {
                    debug!("Request succeeded on attempt {}", attempt);
                    return Ok(response_text);
                }
                Err(error) => {
                    let should_retry = match &error {
                        ureq::Error::StatusCode(status) => {
                            if *status >= 500 {
                                warn!(
                                    "Server error (status {}), attempt {}/{}",
                                    status, attempt, self.retry_attempts
                                );
                                true
                            } else {
                                warn!("Client error (status {}), not retrying", status);
                                return Err(RagError::ModelUnavailable(format!(
                                    "Ollama rejected the request: HTTP {}",
                                    status
                                )));
                            }
                        }
                        ureq::Error::ConnectionFailed
                        | ureq::Error::HostNotFound
                        | ureq::Error::Timeout(_)
                        | ureq::Error::Io(_) => {
                            warn!(
                                "Transport error: {}, attempt {}/{}",
                                error, attempt, self.retry_attempts
                            );
                            true
                        }
                        _ => {
                            warn!("Non-retryable error: {}", error);
                            false
                        }
                    };

                    if !should_retry {
                        return Err(RagError::ModelUnavailable(format!(
                            "Request to {} failed: {}",
                            self.base_url, error
                        )));
                    }

                    last_error = Some(error);

                    if attempt < self.retry_attempts {
                        let delay_ms = EXPONENTIAL_BACKOFF_BASE.pow(attempt - 1) * 1000;
                        let delay = Duration::from_millis(delay_ms);
                        debug!("Waiting {:?} before retry", delay);
                        std::thread::sleep(delay);
                    }
                }
            }
        }

        error!("All attempts failed for request to {}", self.base_url);

        Err(RagError::ModelUnavailable(match last_error {
            Some(error) => format!("Ollama at {} is unreachable: {}", self.base_url, error),
            None => format!("Ollama at {} is unreachable", self.base_url),
        }))
    }
}

impl Embedder for OllamaClient {
    fn model_name(&self) -> &str {
        &self.embedding_model
    }

    fn dimension(&self) -> usize {
        self.embedding_dimension
    }

    fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        debug!("Generating query embedding (length: {})", text.len());
        self.embed(&[text.to_string()])?
            .pop()
            .ok_or_else(|| RagError::ModelUnavailable("Empty embedding response".to_string()))
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Generating embeddings for {} texts", texts.len());

        let mut results = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size as usize) {
            results.extend(self.embed(batch)?);
        }

        debug!("Generated {} embeddings total", results.len());
        Ok(results)
    }
}

impl LanguageModel for OllamaClient {
    fn model_name(&self) -> &str {
        &self.chat_model
    }

    fn generate(&self, prompt: &str) -> Result<String> {
        let request = GenerateRequest {
            model: &self.chat_model,
            prompt,
            stream: false,
            options: GenerateOptions {
                temperature: self.temperature,
            },
        };
        let url = self.endpoint("/api/generate")?;
        let request_json = serde_json::to_string(&request)
            .map_err(|e| RagError::Other(anyhow::anyhow!("Failed to serialize request: {}", e)))?;

        debug!(
            "Requesting completion from {} (prompt length: {})",
            self.chat_model,
            prompt.len()
        );

        let response_text = self.make_request_with_retry(|| {
            self.agent
                .post(url.as_str())
                .header("Content-Type", "application/json")
                .send(&request_json)
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })?;

        let response: GenerateResponse = parse_response(&response_text, "generation")?;
        Ok(response.response)
    }
}

/// Ollama reports untagged models with an implicit `:latest` suffix
fn model_matches(available: &str, configured: &str) -> bool {
    available == configured
        || (!configured.contains(':') && available == format!("{}:latest", configured))
}

fn parse_response<T: for<'de> Deserialize<'de>>(text: &str, what: &str) -> Result<T> {
    serde_json::from_str(text).map_err(|e| {
        RagError::ModelUnavailable(format!("Failed to parse {} response: {}", what, e))
    })
}
