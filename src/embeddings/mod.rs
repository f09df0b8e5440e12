// Embeddings module
// Chunking, the embedder contract, and the backends that implement it

pub mod chunking;
pub mod hashing;
pub mod ollama;


use std::fmt;
use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::config::{EmbedderConfig, EmbedderProvider};
use crate::{Result, RetrievalError};

pub use chunking::{ChunkingConfig, chunk, chunk_with_config};
pub use hashing::HashingEmbedder;
pub use ollama::OllamaClient;

/// Maps texts to fixed-dimension vectors.
///
/// Implementations must be deterministic for a fixed model: the same text
/// always yields the same vector, across calls and across restarts. Calls
/// are blocking and may be made from several threads at once.
pub trait Embedder: Send + Sync {
    /// Embed `texts`, returning exactly one vector per input in the same order
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Length of every vector this embedder produces
    fn dimension(&self) -> usize;
}

type EmbedderFactory = Box<dyn Fn() -> Result<Arc<dyn Embedder>> + Send + Sync>;

struct SharedInner {
    label: String,
    factory: EmbedderFactory,
    cell: OnceCell<Arc<dyn Embedder>>,
}

/// Process-wide handle to a lazily initialized embedder.
///
/// Clones share one backend. The factory runs on the first call to
/// [`SharedEmbedder::get`], on tokio's blocking pool, and concurrent first
/// callers wait for the same initialization. A failed initialization is not
/// remembered, so the next call tries again.
#[derive(Clone)]
pub struct SharedEmbedder {
    inner: Arc<SharedInner>,
}

impl fmt::Debug for SharedEmbedder {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedEmbedder")
            .field("label", &self.inner.label)
            .field("initialized", &self.inner.cell.initialized())
            .finish()
    }
}

impl SharedEmbedder {
    /// Wrap a factory that builds the backend on first use
    #[inline]
    pub fn new<F>(label: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn Embedder>> + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(SharedInner {
                label: label.into(),
                factory: Box::new(factory),
                cell: OnceCell::new(),
            }),
        }
    }

    /// Wrap an already constructed backend
    #[inline]
    pub fn ready(label: impl Into<String>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            inner: Arc::new(SharedInner {
                label: label.into(),
                factory: Box::new(|| {
                    Err(RetrievalError::BackendUnavailable(
                        "embedder factory invoked for a pre-built backend".to_string(),
                    ))
                }),
                cell: OnceCell::new_with(Some(embedder)),
            }),
        }
    }

    /// Build the handle for the backend selected in the configuration
    #[inline]
    pub fn from_config(config: &EmbedderConfig) -> Self {
        let config = config.clone();
        match config.provider {
            EmbedderProvider::Hashing => {
                let dimension = config.embedding_dimension as usize;
                Self::new(format!("hashing/{}", dimension), move || {
                    Ok(Arc::new(HashingEmbedder::new(dimension)?) as Arc<dyn Embedder>)
                })
            }
            EmbedderProvider::Ollama => {
                let label = format!("ollama/{}", config.model);
                Self::new(label, move || {
                    let client = OllamaClient::new(&config)?.initialize()?;
                    Ok(Arc::new(client) as Arc<dyn Embedder>)
                })
            }
        }
    }

    /// Human readable name of the backend
    #[inline]
    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Whether the backend has been initialized yet
    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.inner.cell.initialized()
    }

    /// Get the backend, initializing it on first use
    #[inline]
    pub async fn get(&self) -> Result<Arc<dyn Embedder>> {
        let inner = Arc::clone(&self.inner);
        let embedder = self
            .inner
            .cell
            .get_or_try_init(|| async move {
                debug!("Initializing embedder {}", inner.label);
                let init_inner = Arc::clone(&inner);
                let embedder = tokio::task::spawn_blocking(move || (init_inner.factory)())
                    .await
                    .map_err(|e| {
                        RetrievalError::BackendUnavailable(format!(
                            "embedder initialization task failed: {}",
                            e
                        ))
                    })??;
                info!(
                    "Embedder {} ready ({} dimensions)",
                    inner.label,
                    embedder.dimension()
                );
                Ok::<_, RetrievalError>(embedder)
            })
            .await?;

        Ok(Arc::clone(embedder))
    }
}
