
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use super::Embedder;
use crate::config::EmbedderConfig;
use crate::{Result, RetrievalError};

const SAMPLE_TEXT: &str = "embedding dimension check";

/// Blocking client for the embedding endpoint of an Ollama server.
///
/// Failed requests are reported as [`RetrievalError::BackendUnavailable`]
/// and never retried here; callers own the retry policy.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: Url,
    model: String,
    batch_size: u32,
    agent: ureq::Agent,
    dimension: usize,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    #[serde(rename = "input")]
    inputs: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
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
    /// Build a client from configuration without contacting the server.
    ///
    /// The dimension starts at the configured value; [`OllamaClient::initialize`]
    /// replaces it with what the model actually returns.
    #[inline]
    pub fn new(config: &EmbedderConfig) -> Result<Self> {
        let base_url = config
            .ollama_url()
            .map_err(|e| RetrievalError::Config(e.to_string()))?;

        Ok(Self {
            base_url,
            model: config.model.clone(),
            batch_size: config.batch_size,
            agent: build_agent(Duration::from_secs(config.timeout_seconds)),
            dimension: config.embedding_dimension as usize,
        })
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = build_agent(timeout);
        self
    }

    #[inline]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Check the server and model, then learn the model's output dimension
    #[inline]
    pub fn initialize(mut self) -> Result<Self> {
        self.health_check()?;

        let sample = self.request_embeddings(&[SAMPLE_TEXT.to_string()])?;
        let measured = sample.first().map(Vec::len).unwrap_or_default();
        if measured == 0 {
            return Err(RetrievalError::BackendUnavailable(format!(
                "model '{}' returned an empty embedding",
                self.model
            )));
        }
        if measured != self.dimension {
            warn!(
                "Model {} produces {}-dimensional embeddings but {} were configured; using {}",
                self.model, measured, self.dimension, measured
            );
        }
        self.dimension = measured;

        Ok(self)
    }

    /// Test connection to the Ollama server and verify model availability
    #[inline]
    pub fn health_check(&self) -> Result<()> {
        debug!("Performing health check for Ollama at {}", self.base_url);

        self.validate_model()?;

        info!(
            "Health check passed for Ollama server at {} with model {}",
            self.base_url, self.model
        );
        Ok(())
    }

    /// Validate that the configured model is available
    #[inline]
    pub fn validate_model(&self) -> Result<()> {
        let models = self.list_models()?;

        if models.iter().any(|m| m.name == self.model) {
            debug!("Model {} is available", self.model);
            Ok(())
        } else {
            let available_models: Vec<&str> = models.iter().map(|m| m.name.as_str()).collect();
            warn!(
                "Model {} not found. Available models: {:?}",
                self.model, available_models
            );
            Err(RetrievalError::BackendUnavailable(format!(
                "model '{}' is not available. Available models: {:?}",
                self.model, available_models
            )))
        }
    }

    /// List all models the server has pulled
    #[inline]
    pub fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = self.endpoint("/api/tags")?;
        debug!("Fetching available models from {}", url);

        let response_text = self
            .agent
            .get(url.as_str())
            .call()
            .and_then(|mut resp| resp.body_mut().read_to_string())
            .map_err(|e| request_error("list models", &e))?;

        let models_response: ModelsResponse = serde_json::from_str(&response_text)
            .map_err(|e| {
                RetrievalError::BackendUnavailable(format!("invalid models response: {}", e))
            })?;

        debug!("Found {} models", models_response.models.len());
        Ok(models_response.models)
    }

    /// Embed `texts`, splitting them into requests of at most `batch_size`
    #[inline]
    pub fn generate_embeddings_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Generating embeddings for {} texts", texts.len());

        let mut results = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size.max(1) as usize) {
            results.extend(self.request_embeddings(batch)?);
        }

        debug!("Generated {} embeddings total", results.len());
        Ok(results)
    }

    fn request_embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = self.endpoint("/api/embed")?;
        let request_json = serde_json::to_string(&EmbedRequest {
            model: &self.model,
            inputs: texts,
        })
        .map_err(|e| RetrievalError::Other(e.into()))?;

        let response_text = self
            .agent
            .post(url.as_str())
            .header("Content-Type", "application/json")
            .send(&request_json)
            .and_then(|mut resp| resp.body_mut().read_to_string())
            .map_err(|e| request_error("embed", &e))?;

        let response: EmbedResponse = serde_json::from_str(&response_text).map_err(|e| {
            RetrievalError::BackendUnavailable(format!("invalid embedding response: {}", e))
        })?;

        if response.embeddings.len() != texts.len() {
            return Err(RetrievalError::BackendUnavailable(format!(
                "Mismatch between request and response counts: {} vs {}",
                texts.len(),
                response.embeddings.len()
            )));
        }

        Ok(response.embeddings)
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| RetrievalError::Config(format!("Failed to build {} URL: {}", path, e)))
    }
}

impl Embedder for OllamaClient {
    #[inline]
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.generate_embeddings_batch(texts)
    }

    #[inline]
    fn dimension(&self) -> usize {
        self.dimension
    }
}

fn build_agent(timeout: Duration) -> ureq::Agent {
    ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .build()
        .into()
}

fn request_error(action: &str, error: &ureq::Error) -> RetrievalError {
    let detail = match error {
        ureq::Error::StatusCode(status) => format!("HTTP {}", status),
        ureq::Error::Timeout(_) => "request timed out".to_string(),
        other => other.to_string(),
    };
    warn!("Ollama {} request failed: {}", action, detail);
    RetrievalError::BackendUnavailable(format!("Ollama {} request failed: {}", action, detail))
}
