//! Ingestion pipeline orchestration.
//!
//! Coordinates documents → segmenter → embedding provider → vector store:
//!
//! 1. Split every document into passages. Zero passages is an error.
//! 2. Embed passages in fixed-size batches. A batch failing with a
//!    transient (quota) error waits a fixed backoff and is retried up to
//!    the attempt limit; any other failure aborts immediately.
//! 3. Pause between successful batches to stay under burst limits.
//! 4. The first batch locks the vector dimension; a later batch with a
//!    different dimension is fatal.
//! 5. Build the collection in one `create` call, so readers only ever see
//!    a complete index. A transient store failure retries the whole
//!    `create` on the same schedule as embedding.

use std::collections::HashSet;
use std::time::Duration;

use docqa_core::chunk::{split_documents, SplitterConfig};
use docqa_core::models::{Document, IndexHandle, IndexRecord};
use docqa_core::{Error, ProviderError, Result};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::Config;
use crate::retry::{retry_with, Backoff};
use crate::store::VectorIndex;

/// Tunables for one ingestion run.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub splitter: SplitterConfig,
    pub batch_size: usize,
    /// Retry schedule for transient batch failures.
    pub backoff: Backoff,
    /// Pause after each successful batch except the last.
    pub batch_delay: Duration,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            splitter: SplitterConfig::default(),
            batch_size: 10,
            backoff: Backoff::fixed(3, Duration::from_secs(30)),
            batch_delay: Duration::from_secs(3),
        }
    }
}

impl IngestOptions {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        Ok(Self {
            splitter: config.chunking.splitter()?,
            batch_size: config.ingest.batch_size.max(1),
            backoff: Backoff::fixed(
                config.ingest.max_attempts,
                Duration::from_secs(config.ingest.quota_backoff_secs),
            ),
            batch_delay: Duration::from_secs(config.ingest.batch_delay_secs),
        })
    }
}

/// Outcome of a successful run.
#[derive(Debug, Clone)]
pub struct IngestReport {
    pub handle: IndexHandle,
    pub documents: usize,
    pub passages: usize,
    pub batches: usize,
}

/// Split, embed and index `documents`, replacing the collection.
///
/// # Errors
///
/// - [`Error::Ingestion`] when no passages are produced or a batch fails
///   with a non-transient error.
/// - [`Error::QuotaExceeded`] when a batch is still rate limited after
///   every attempt.
/// - [`Error::DimensionMismatch`] when a batch's vectors differ in size
///   from the first batch's.
pub async fn ingest(
    index: &VectorIndex,
    documents: &[Document],
    options: &IngestOptions,
) -> Result<IngestReport> {
    let passages = split_documents(documents, &options.splitter);
    if passages.is_empty() {
        return Err(Error::Ingestion(format!(
            "{} document(s) produced no passages",
            documents.len()
        )));
    }

    let batch_size = options.batch_size.max(1);
    let total_batches = passages.len().div_ceil(batch_size);
    info!(
        documents = documents.len(),
        passages = passages.len(),
        batches = total_batches,
        model = index.embedder().model_name(),
        "ingestion started"
    );

    let mut records = Vec::with_capacity(passages.len());
    let mut seen_ids = HashSet::with_capacity(passages.len());
    let mut dims: Option<usize> = None;

    for (batch_no, batch) in passages.chunks(batch_size).enumerate() {
        if batch_no > 0 && !options.batch_delay.is_zero() {
            tokio::time::sleep(options.batch_delay).await;
        }

        let texts: Vec<String> = batch.iter().map(|p| p.content.clone()).collect();
        let embedder = index.embedder();
        let vectors = retry_with(
            &options.backoff,
            "embed batch",
            ProviderError::is_transient,
            |_| embedder.embed(&texts),
        )
        .await
        .map_err(|e| batch_error(e, batch_no + 1, total_batches, &options.backoff))?;

        if vectors.len() != batch.len() {
            return Err(Error::Ingestion(format!(
                "batch {}/{}: provider returned {} vectors for {} passages",
                batch_no + 1,
                total_batches,
                vectors.len(),
                batch.len()
            )));
        }

        for (passage, vector) in batch.iter().zip(vectors) {
            let expected = *dims.get_or_insert(vector.len());
            if vector.len() != expected {
                return Err(Error::DimensionMismatch {
                    expected,
                    actual: vector.len(),
                });
            }
            let mut record = IndexRecord::new(passage.clone(), vector);
            if !seen_ids.insert(record.id.clone()) {
                record.id = Uuid::new_v4().to_string();
                seen_ids.insert(record.id.clone());
            }
            records.push(record);
        }
        debug!(batch = batch_no + 1, of = total_batches, "batch embedded");
    }

    let passages_indexed = records.len();
    let handle = retry_with(&options.backoff, "index create", Error::is_transient, |_| {
        index.create(records.clone())
    })
    .await
    .map_err(|e| create_error(e, &options.backoff))?;
    info!(
        collection = %handle.collection,
        passages = passages_indexed,
        dims = handle.dims,
        "ingestion complete"
    );
    Ok(IngestReport {
        handle,
        documents: documents.len(),
        passages: passages_indexed,
        batches: total_batches,
    })
}

fn batch_error(err: ProviderError, batch: usize, total: usize, backoff: &Backoff) -> Error {
    if err.is_transient() {
        Error::QuotaExceeded(format!(
            "batch {}/{} still failing after {} attempts: {}",
            batch,
            total,
            backoff.max_attempts(),
            err
        ))
    } else {
        Error::Ingestion(format!("batch {}/{} failed: {}", batch, total, err))
    }
}

fn create_error(err: Error, backoff: &Backoff) -> Error {
    match err {
        Error::DimensionMismatch { .. } => err,
        err if err.is_transient() => Error::QuotaExceeded(format!(
            "indexing still failing after {} attempts: {}",
            backoff.max_attempts(),
            err
        )),
        err => Error::Ingestion(format!("indexing failed: {}", err)),
    }
}
