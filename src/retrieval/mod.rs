// Retrieval service
// Chunks, embeds and stores tenant documents, and answers questions against them


use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::embeddings::{ChunkingConfig, Embedder, SharedEmbedder, chunk_with_config};
use crate::store::metadata::ChunkRecord;
use crate::store::{SearchHit, TenantIndexStore, validate_tenant_id};
use crate::{Result, RetrievalError};

/// Number of chunks returned when the caller does not ask for a specific count
pub const DEFAULT_K: usize = 5;

const DEFAULT_EMBED_TIMEOUT: Duration = Duration::from_secs(30);

/// Ingest and query entry point shared by the CLI and any embedding host.
///
/// Cloning is cheap; clones share the store, its tenant locks and the
/// embedding backend.
#[derive(Debug, Clone)]
pub struct RetrievalService {
    store: Arc<TenantIndexStore>,
    embedder: SharedEmbedder,
    chunking: ChunkingConfig,
    embed_timeout: Duration,
    default_k: usize,
}

impl RetrievalService {
    #[inline]
    pub fn new(
        store: Arc<TenantIndexStore>,
        embedder: SharedEmbedder,
        chunking: ChunkingConfig,
    ) -> Result<Self> {
        chunking.validate()?;
        Ok(Self {
            store,
            embedder,
            chunking,
            embed_timeout: DEFAULT_EMBED_TIMEOUT,
            default_k: DEFAULT_K,
        })
    }

    /// Service wired from a loaded configuration.
    ///
    /// The embedding backend is not contacted until the first ingest or query.
    #[inline]
    pub fn from_config(config: &Config) -> Result<Self> {
        let store = Arc::new(TenantIndexStore::from_config(config));
        let embedder = SharedEmbedder::from_config(&config.embedder);
        Ok(Self::new(store, embedder, config.chunking)?
            .with_embed_timeout(Duration::from_secs(config.embedder.timeout_seconds))
            .with_default_k(config.retrieval.default_k))
    }

    /// Upper bound on a single embedding call
    #[inline]
    #[must_use]
    pub fn with_embed_timeout(mut self, timeout: Duration) -> Self {
        self.embed_timeout = timeout;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_default_k(mut self, k: usize) -> Self {
        self.default_k = k.max(1);
        self
    }

    #[inline]
    pub fn store(&self) -> &TenantIndexStore {
        &self.store
    }

    #[inline]
    pub fn embedder(&self) -> &SharedEmbedder {
        &self.embedder
    }

    #[inline]
    pub fn default_k(&self) -> usize {
        self.default_k
    }

    /// Chunk, embed and append `raw_text` to the tenant's index.
    ///
    /// Returns the number of chunks added. Text that is empty or only
    /// whitespace adds nothing. Ingestion is additive: the same text ingested
    /// twice is stored twice.
    #[inline]
    pub async fn ingest(&self, tenant: &str, raw_text: &str) -> Result<usize> {
        self.ingest_from_source(tenant, raw_text, None).await
    }

    /// Like [`RetrievalService::ingest`], labelling every chunk with `source`
    #[inline]
    pub async fn ingest_from_source(
        &self,
        tenant: &str,
        raw_text: &str,
        source: Option<&str>,
    ) -> Result<usize> {
        validate_tenant_id(tenant)?;

        if raw_text.trim().is_empty() {
            warn!("Ignoring empty text for tenant {}", tenant);
            return Ok(0);
        }

        let chunks = chunk_with_config(raw_text, &self.chunking)?;
        debug!(
            "Split {} characters into {} chunks for tenant {}",
            raw_text.chars().count(),
            chunks.len(),
            tenant
        );

        let embedder = self.embedder.get().await?;
        let handle = self
            .store
            .open_or_create(tenant, embedder.dimension())
            .await?;

        let vectors = self.embed(embedder, chunks.clone()).await?;
        let records: Vec<ChunkRecord> = chunks
            .into_iter()
            .map(|text| ChunkRecord::new(text, source.map(str::to_string)))
            .collect();
        let added = records.len();

        self.store
            .append_records(tenant, handle, vectors, records)
            .await?;

        info!(
            "Ingested {} chunks for tenant {}{}",
            added,
            tenant,
            source.map_or_else(String::new, |s| format!(" from {}", s))
        );
        Ok(added)
    }

    /// Texts of the `k` chunks closest to `question`, closest first.
    ///
    /// A tenant with no knowledge base yields an empty result.
    #[inline]
    pub async fn query(&self, tenant: &str, question: &str, k: usize) -> Result<Vec<String>> {
        Ok(self
            .query_scored(tenant, question, k)
            .await?
            .into_iter()
            .map(|hit| hit.text)
            .collect())
    }

    /// Like [`RetrievalService::query`], keeping positions and distances
    #[inline]
    pub async fn query_scored(
        &self,
        tenant: &str,
        question: &str,
        k: usize,
    ) -> Result<Vec<SearchHit>> {
        validate_tenant_id(tenant)?;

        if question.trim().is_empty() {
            return Err(RetrievalError::InvalidInput(
                "question must not be empty".to_string(),
            ));
        }

        let embedder = self.embedder.get().await?;
        let mut vectors = self.embed(embedder, vec![question.to_string()]).await?;
        let Some(query_vector) = vectors.pop() else {
            return Err(RetrievalError::BackendUnavailable(
                "embedder returned no vector for the question".to_string(),
            ));
        };

        let hits = self.store.search_scored(tenant, &query_vector, k).await?;
        debug!(
            "Query for tenant {} matched {} chunks",
            tenant,
            hits.len()
        );
        Ok(hits)
    }

    /// Query that reports failures through the log and answers with nothing.
    ///
    /// For callers that prefer "no relevant information" over an error.
    #[inline]
    pub async fn query_or_empty(&self, tenant: &str, question: &str, k: usize) -> Vec<String> {
        match self.query(tenant, question, k).await {
            Ok(results) => results,
            Err(e) => {
                warn!("Query for tenant {} failed: {}", tenant, e);
                Vec::new()
            }
        }
    }

    async fn embed(
        &self,
        embedder: Arc<dyn Embedder>,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>> {
        let expected = texts.len();
        let task = tokio::task::spawn_blocking(move || embedder.embed(&texts));

        let vectors = match tokio::time::timeout(self.embed_timeout, task).await {
            Ok(joined) => joined.map_err(|e| {
                RetrievalError::BackendUnavailable(format!("embedding task failed: {}", e))
            })??,
            Err(_) => {
                return Err(RetrievalError::BackendUnavailable(format!(
                    "embedding {} texts timed out after {:.1}s",
                    expected,
                    self.embed_timeout.as_secs_f64()
                )));
            }
        };

        if vectors.len() != expected {
            return Err(RetrievalError::BackendUnavailable(format!(
                "embedder returned {} vectors for {} texts",
                vectors.len(),
                expected
            )));
        }
        Ok(vectors)
    }
}
