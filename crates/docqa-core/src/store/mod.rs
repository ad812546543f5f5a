//! Vector storage abstraction.
//!
//! The [`VectorStore`] trait is the unified interface over the local
//! directory backend, the remote Qdrant backend and the in-memory store.
//! Stores hold one named collection each.
//!
//! # Contract
//!
//! - `create` replaces the whole collection. Readers observe either the
//!   previous complete collection or the new complete one.
//! - `load` reopens an existing collection or fails with
//!   [`Error::NotFound`].
//! - `search` returns at most `k` hits by descending cosine similarity,
//!   ties broken by insertion order, and only from the collection the
//!   handle refers to.
//!
//! Concurrent `create` calls on one collection must be serialized by the
//! caller.

pub mod memory;

use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::error::{Error, Result};
use crate::models::{IndexHandle, IndexRecord, Passage, ScoredPassage};

pub const DEFAULT_TOP_K: usize = 5;

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Name of the collection this store manages.
    fn collection(&self) -> &str;

    /// Delete any existing collection and build a fresh one from `records`.
    async fn create(&self, records: Vec<IndexRecord>) -> Result<IndexHandle>;

    /// Reopen a previously created collection.
    async fn load(&self) -> Result<IndexHandle>;

    /// Nearest neighbours of `query` in the collection behind `handle`.
    async fn search(
        &self,
        handle: &IndexHandle,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredPassage>>;
}

/// Check that `records` is non-empty and every vector has the same length.
///
/// Returns the shared dimension.
pub fn check_dimensions(records: &[IndexRecord]) -> Result<usize> {
    let first = records
        .first()
        .ok_or_else(|| Error::Ingestion("no records to index".into()))?;
    let dims = first.vector.len();
    if dims == 0 {
        return Err(Error::Ingestion("embedding vectors are empty".into()));
    }
    for record in records {
        if record.vector.len() != dims {
            return Err(Error::DimensionMismatch {
                expected: dims,
                actual: record.vector.len(),
            });
        }
    }
    Ok(dims)
}

/// Reject handles for other collections and queries of the wrong size.
pub fn check_search(collection: &str, handle: &IndexHandle, query: &[f32]) -> Result<()> {
    if handle.collection != collection {
        return Err(Error::Retrieval(format!(
            "handle refers to collection '{}', store serves '{}'",
            handle.collection, collection
        )));
    }
    if query.len() != handle.dims {
        return Err(Error::DimensionMismatch {
            expected: handle.dims,
            actual: query.len(),
        });
    }
    Ok(())
}

/// Brute-force top-`k` by cosine similarity.
///
/// `candidates` must be in insertion order; the stable sort keeps that
/// order among equal scores.
pub fn rank<'a, I>(candidates: I, query: &[f32], k: usize) -> Vec<ScoredPassage>
where
    I: IntoIterator<Item = (&'a [f32], &'a Passage)>,
{
    let mut scored: Vec<(f32, &Passage)> = candidates
        .into_iter()
        .map(|(vector, passage)| (cosine_similarity(query, vector), passage))
        .collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0));
    scored
        .into_iter()
        .take(k)
        .map(|(score, passage)| ScoredPassage {
            passage: passage.clone(),
            score,
        })
        .collect()
}
