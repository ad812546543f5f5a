//! Vector store backends and the embedding-aware index facade.
//!
//! | Backend | Module | Selected by `index.backend` |
//! |---------|--------|-----------------------------|
//! | local directory | [`local`] | `"local"` |
//! | Qdrant (gRPC) | [`qdrant`] | `"qdrant"` |
//!
//! [`VectorIndex`] pairs a [`VectorStore`] with the embedding provider so
//! callers can search by text.

pub mod local;
pub mod qdrant;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use docqa_core::embedding::EmbeddingProvider;
use docqa_core::models::{IndexHandle, IndexRecord, ScoredPassage};
use docqa_core::store::VectorStore;

use crate::config::IndexConfig;

pub use local::LocalStore;
pub use qdrant::QdrantStore;

/// Open the configured backend. No I/O happens until the first call.
pub fn open_store(config: &IndexConfig) -> Result<Arc<dyn VectorStore>> {
    match config.backend.as_str() {
        "local" => Ok(Arc::new(LocalStore::new(&config.path, &config.collection))),
        "qdrant" => {
            let url = config
                .qdrant_url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("index.qdrant_url required for qdrant backend"))?;
            Ok(Arc::new(QdrantStore::connect(
                url,
                config.qdrant_api_key.clone(),
                Duration::from_secs(config.timeout_secs),
                &config.collection,
            )?))
        }
        other => anyhow::bail!("Unknown index backend: '{}'", other),
    }
}

/// Text query interface consumed by the answering engine.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, query: &str, k: usize) -> docqa_core::Result<Vec<ScoredPassage>>;
}

/// A vector store plus the provider that embeds its queries.
#[derive(Clone)]
pub struct VectorIndex {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl VectorIndex {
    pub fn new(store: Arc<dyn VectorStore>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { store, embedder }
    }

    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    pub fn collection(&self) -> &str {
        self.store.collection()
    }

    /// Replace the collection with `records`.
    pub async fn create(&self, records: Vec<IndexRecord>) -> docqa_core::Result<IndexHandle> {
        self.store.create(records).await
    }

    pub async fn load(&self) -> docqa_core::Result<IndexHandle> {
        self.store.load().await
    }

    /// Embed `query` and return the `k` nearest passages.
    pub async fn search(
        &self,
        handle: &IndexHandle,
        query: &str,
        k: usize,
    ) -> docqa_core::Result<Vec<ScoredPassage>> {
        let vector = self.embedder.embed_query(query).await?;
        self.store.search(handle, &vector, k).await
    }

    /// Bind to `handle` for use as a [`Retriever`].
    pub fn with_handle(self, handle: IndexHandle) -> LoadedIndex {
        LoadedIndex {
            index: self,
            handle,
        }
    }
}

/// A [`VectorIndex`] bound to one opened collection.
#[derive(Clone)]
pub struct LoadedIndex {
    index: VectorIndex,
    handle: IndexHandle,
}

impl LoadedIndex {
    pub fn handle(&self) -> &IndexHandle {
        &self.handle
    }
}

#[async_trait]
impl Retriever for LoadedIndex {
    async fn retrieve(&self, query: &str, k: usize) -> docqa_core::Result<Vec<ScoredPassage>> {
        self.index.search(&self.handle, query, k).await
    }
}
