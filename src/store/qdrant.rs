//! Remote Qdrant backend over gRPC (`qdrant-client`).
//!
//! The configured collection name is a Qdrant alias. `create` uploads
//! into a fresh `<name>-v<uuid>` collection in pages with `wait=true`,
//! then repoints the alias in a single `update_aliases` call and drops
//! the previous target. If any step before the switch fails, the new
//! collection is dropped and the alias is left untouched, so readers in
//! every process see either the old collection or the new one.
//!
//! Each point's payload stores the passage fields plus its insertion
//! sequence number; equal scores are re-ordered by that sequence.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use docqa_core::models::{IndexHandle, IndexRecord, Metadata, Passage, ScoredPassage};
use docqa_core::store::{check_dimensions, check_search, VectorStore};
use docqa_core::{Error, ErrorKind, ProviderError, Result};
use qdrant_client::qdrant::value::Kind;
use qdrant_client::qdrant::{
    alias_operations, vectors_config, AliasOperations, ChangeAliases, CollectionInfo, CreateAlias,
    CreateCollectionBuilder, DeleteAlias, DeleteCollectionBuilder, Distance, PointStruct,
    ScoredPoint, SearchPointsBuilder, UpsertPointsBuilder, Value, VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant, QdrantError};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Points per upsert request.
const UPLOAD_PAGE: usize = 64;

// gRPC status codes, as carried by `tonic::Status`.
const CODE_DEADLINE_EXCEEDED: i32 = 4;
const CODE_NOT_FOUND: i32 = 5;
const CODE_RESOURCE_EXHAUSTED: i32 = 8;
const CODE_ABORTED: i32 = 10;
const CODE_UNAVAILABLE: i32 = 14;

/// Vector size and point count of a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CollectionShape {
    dims: usize,
    count: usize,
}

/// The Qdrant operations the store relies on.
#[async_trait]
trait QdrantApi: Send + Sync {
    async fn make_collection(&self, name: &str, dims: u64) -> Result<()>;

    async fn drop_collection(&self, name: &str) -> Result<()>;

    async fn upsert_wait(&self, name: &str, points: Vec<PointStruct>) -> Result<()>;

    /// Collection the alias currently points at.
    async fn alias_target(&self, alias: &str) -> Result<Option<String>>;

    /// Point `alias` at `target` in one request, first removing the old
    /// alias when `replace_existing` is set.
    async fn repoint_alias(&self, alias: &str, target: &str, replace_existing: bool)
        -> Result<()>;

    /// `None` when neither a collection nor an alias has this name.
    async fn describe(&self, name: &str) -> Result<Option<CollectionShape>>;

    async fn nearest(&self, name: &str, query: Vec<f32>, limit: u64) -> Result<Vec<ScoredPoint>>;
}

#[async_trait]
impl QdrantApi for Qdrant {
    async fn make_collection(&self, name: &str, dims: u64) -> Result<()> {
        self.create_collection(
            CreateCollectionBuilder::new(name)
                .vectors_config(VectorParamsBuilder::new(dims, Distance::Cosine)),
        )
        .await
        .map_err(|e| qdrant_error("create collection", e))?;
        Ok(())
    }

    async fn drop_collection(&self, name: &str) -> Result<()> {
        self.delete_collection(DeleteCollectionBuilder::new(name))
            .await
            .map_err(|e| qdrant_error("delete collection", e))?;
        Ok(())
    }

    async fn upsert_wait(&self, name: &str, points: Vec<PointStruct>) -> Result<()> {
        self.upsert_points(UpsertPointsBuilder::new(name, points).wait(true))
            .await
            .map_err(|e| qdrant_error("upsert points", e))?;
        Ok(())
    }

    async fn alias_target(&self, alias: &str) -> Result<Option<String>> {
        let response = self
            .list_aliases()
            .await
            .map_err(|e| qdrant_error("list aliases", e))?;
        Ok(response
            .aliases
            .into_iter()
            .find(|a| a.alias_name == alias)
            .map(|a| a.collection_name))
    }

    async fn repoint_alias(
        &self,
        alias: &str,
        target: &str,
        replace_existing: bool,
    ) -> Result<()> {
        let mut actions = Vec::with_capacity(2);
        if replace_existing {
            actions.push(AliasOperations {
                action: Some(alias_operations::Action::DeleteAlias(DeleteAlias {
                    alias_name: alias.to_string(),
                })),
            });
        }
        actions.push(AliasOperations {
            action: Some(alias_operations::Action::CreateAlias(CreateAlias {
                collection_name: target.to_string(),
                alias_name: alias.to_string(),
            })),
        });
        self.update_aliases(ChangeAliases {
            actions,
            timeout: None,
        })
        .await
        .map_err(|e| qdrant_error("update aliases", e))?;
        Ok(())
    }

    async fn describe(&self, name: &str) -> Result<Option<CollectionShape>> {
        match self.collection_info(name).await {
            Ok(response) => {
                let info = response
                    .result
                    .ok_or_else(|| malformed("collection info without result"))?;
                collection_shape(info).map(Some)
            }
            Err(err) => match qdrant_error("collection info", err) {
                Error::NotFound(_) => Ok(None),
                other => Err(other),
            },
        }
    }

    async fn nearest(&self, name: &str, query: Vec<f32>, limit: u64) -> Result<Vec<ScoredPoint>> {
        let response = self
            .search_points(SearchPointsBuilder::new(name, query, limit).with_payload(true))
            .await
            .map_err(|e| qdrant_error("search", e))?;
        Ok(response.result)
    }
}

pub struct QdrantStore {
    api: Arc<dyn QdrantApi>,
    name: String,
    rebuild: RwLock<()>,
}

impl QdrantStore {
    /// Configure a client for `url` (the gRPC port, 6334 by default).
    /// No connection is made until the first request.
    pub fn connect(
        url: &str,
        api_key: Option<String>,
        timeout: Duration,
        collection: impl Into<String>,
    ) -> anyhow::Result<Self> {
        let client = Qdrant::from_url(url)
            .api_key(api_key)
            .timeout(timeout)
            .build()
            .with_context(|| format!("Failed to configure Qdrant client for {}", url))?;
        Ok(Self::with_api(Arc::new(client), collection))
    }

    fn with_api(api: Arc<dyn QdrantApi>, collection: impl Into<String>) -> Self {
        Self {
            api,
            name: collection.into(),
            rebuild: RwLock::new(()),
        }
    }

    async fn upload(&self, target: &str, records: &[IndexRecord]) -> Result<()> {
        for (page_no, page) in records.chunks(UPLOAD_PAGE).enumerate() {
            let offset = page_no * UPLOAD_PAGE;
            let points = page
                .iter()
                .enumerate()
                .map(|(i, r)| to_point(r, (offset + i) as u64))
                .collect();
            self.api.upsert_wait(target, points).await?;
            debug!(collection = %target, uploaded = offset + page.len(), "qdrant upload page");
        }
        Ok(())
    }

    /// Upload into `target` and move the alias onto it. Returns the
    /// collection the alias pointed at before.
    async fn fill_and_publish(
        &self,
        target: &str,
        records: &[IndexRecord],
    ) -> Result<Option<String>> {
        self.upload(target, records).await?;
        let previous = self.api.alias_target(&self.name).await?;
        if previous.is_none() && self.api.describe(&self.name).await?.is_some() {
            // A plain collection created before aliases were used holds the name.
            self.api.drop_collection(&self.name).await?;
        }
        self.api
            .repoint_alias(&self.name, target, previous.is_some())
            .await?;
        Ok(previous)
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    fn collection(&self) -> &str {
        &self.name
    }

    async fn create(&self, records: Vec<IndexRecord>) -> Result<IndexHandle> {
        let dims = check_dimensions(&records)?;
        let _guard = self.rebuild.write().await;

        let target = format!("{}-v{}", self.name, Uuid::new_v4().simple());
        self.api.make_collection(&target, dims as u64).await?;

        let previous = match self.fill_and_publish(&target, &records).await {
            Ok(previous) => previous,
            Err(err) => {
                if let Err(cleanup) = self.api.drop_collection(&target).await {
                    warn!(collection = %target, error = %cleanup, "failed to drop incomplete qdrant collection");
                }
                return Err(err);
            }
        };
        if let Some(old) = previous.filter(|old| *old != target) {
            if let Err(err) = self.api.drop_collection(&old).await {
                warn!(collection = %old, error = %err, "failed to drop previous qdrant collection");
            }
        }

        info!(
            collection = %self.name,
            target = %target,
            records = records.len(),
            dims,
            "qdrant collection rebuilt"
        );
        Ok(IndexHandle {
            collection: self.name.clone(),
            dims,
            count: records.len(),
        })
    }

    async fn load(&self) -> Result<IndexHandle> {
        let _guard = self.rebuild.read().await;
        let shape = self
            .api
            .describe(&self.name)
            .await?
            .ok_or_else(|| Error::NotFound(format!("qdrant collection '{}'", self.name)))?;
        Ok(IndexHandle {
            collection: self.name.clone(),
            dims: shape.dims,
            count: shape.count,
        })
    }

    async fn search(
        &self,
        handle: &IndexHandle,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredPassage>> {
        check_search(&self.name, handle, query)?;
        let _guard = self.rebuild.read().await;
        let hits = self.api.nearest(&self.name, query.to_vec(), k as u64).await?;
        rank_hits(hits, k)
    }
}

fn to_point(record: &IndexRecord, seq: u64) -> PointStruct {
    let passage = &record.passage;
    let mut payload = Payload::new();
    payload.insert("seq", seq as i64);
    payload.insert("content", passage.content.clone());
    if let Some(source) = &passage.metadata.source {
        payload.insert("source", source.clone());
    }
    if let Some(page) = passage.metadata.page {
        payload.insert("page", i64::from(page));
    }
    if let Some(content_type) = &passage.metadata.content_type {
        payload.insert("content_type", content_type.clone());
    }
    if let Some(chunk_index) = passage.metadata.chunk_index {
        payload.insert("chunk_index", chunk_index as i64);
    }
    PointStruct::new(record.id.clone(), record.vector.clone(), payload)
}

fn payload_str(payload: &HashMap<String, Value>, key: &str) -> Option<String> {
    match payload.get(key).and_then(|v| v.kind.as_ref()) {
        Some(Kind::StringValue(s)) => Some(s.clone()),
        _ => None,
    }
}

fn payload_int(payload: &HashMap<String, Value>, key: &str) -> Option<i64> {
    match payload.get(key).and_then(|v| v.kind.as_ref()) {
        Some(Kind::IntegerValue(n)) => Some(*n),
        _ => None,
    }
}

fn from_payload(payload: &HashMap<String, Value>) -> Result<(u64, Passage)> {
    let content =
        payload_str(payload, "content").ok_or_else(|| malformed("search hit without content"))?;
    let seq = payload_int(payload, "seq")
        .and_then(|n| u64::try_from(n).ok())
        .ok_or_else(|| malformed("search hit without sequence number"))?;
    let metadata = Metadata {
        source: payload_str(payload, "source"),
        page: payload_int(payload, "page").and_then(|n| u32::try_from(n).ok()),
        content_type: payload_str(payload, "content_type"),
        chunk_index: payload_int(payload, "chunk_index").and_then(|n| usize::try_from(n).ok()),
    };
    Ok((seq, Passage { content, metadata }))
}

fn rank_hits(hits: Vec<ScoredPoint>, k: usize) -> Result<Vec<ScoredPassage>> {
    let mut scored = Vec::with_capacity(hits.len());
    for hit in &hits {
        let (seq, passage) = from_payload(&hit.payload)?;
        scored.push((hit.score, seq, passage));
    }
    scored.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));
    Ok(scored
        .into_iter()
        .take(k)
        .map(|(score, _, passage)| ScoredPassage { passage, score })
        .collect())
}

fn collection_shape(info: CollectionInfo) -> Result<CollectionShape> {
    let vectors = info
        .config
        .and_then(|c| c.params)
        .and_then(|p| p.vectors_config)
        .and_then(|v| v.config);
    let dims = match vectors {
        Some(vectors_config::Config::Params(params)) => params.size,
        Some(_) => return Err(malformed("collection uses named vectors; expected a single vector")),
        None => return Err(malformed("collection info without vector params")),
    };
    Ok(CollectionShape {
        dims: dims as usize,
        count: info.points_count.unwrap_or(0) as usize,
    })
}

fn code_kind(code: i32) -> ErrorKind {
    match code {
        CODE_DEADLINE_EXCEEDED | CODE_RESOURCE_EXHAUSTED | CODE_ABORTED | CODE_UNAVAILABLE => {
            ErrorKind::Transient
        }
        _ => ErrorKind::Fatal,
    }
}

fn qdrant_error(operation: &str, err: QdrantError) -> Error {
    let message = format!("Qdrant {} failed: {}", operation, err);
    let kind = match &err {
        QdrantError::ResponseError { status, .. } => {
            let code = status.code() as i32;
            if code == CODE_NOT_FOUND {
                return Error::NotFound(message);
            }
            code_kind(code)
        }
        _ if message.to_lowercase().contains("resource exhausted") => ErrorKind::Transient,
        _ => ErrorKind::Fatal,
    };
    Error::Provider(ProviderError { kind, message })
}

fn malformed(what: &str) -> Error {
    Error::Provider(ProviderError::fatal(format!("Invalid Qdrant response: {}", what)))
}
