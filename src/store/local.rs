//! Local directory backend.
//!
//! # Layout
//!
//! ```text
//! <root>/<collection>/
//!   CURRENT                 name of the live version directory
//!   v-<uuid>/
//!     manifest.json         dims, count, created_at
//!     vectors.bin           count × dims little-endian f32
//!     payloads.json         position → { id, passage }
//! ```
//!
//! `create` writes a complete new version directory, then atomically
//! replaces `CURRENT` (write to a temp file + rename) and removes older
//! versions. A reader that resolves `CURRENT` always finds a complete
//! collection. In-process readers use the cached copy, which is swapped
//! under a write lock after the rename.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use docqa_core::embedding::{blob_to_vec, vec_to_blob};
use docqa_core::models::{IndexHandle, IndexRecord, Passage, ScoredPassage};
use docqa_core::store::{check_dimensions, check_search, rank, VectorStore};
use docqa_core::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

const CURRENT_FILE: &str = "CURRENT";
const MANIFEST_FILE: &str = "manifest.json";
const VECTORS_FILE: &str = "vectors.bin";
const PAYLOADS_FILE: &str = "payloads.json";
const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    format_version: u32,
    collection: String,
    dims: usize,
    count: usize,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PayloadEntry {
    position: usize,
    id: String,
    passage: Passage,
}

struct Loaded {
    dims: usize,
    vectors: Vec<f32>,
    passages: Vec<Passage>,
}

impl Loaded {
    fn handle(&self, collection: &str) -> IndexHandle {
        IndexHandle {
            collection: collection.to_string(),
            dims: self.dims,
            count: self.passages.len(),
        }
    }
}

pub struct LocalStore {
    root: PathBuf,
    name: String,
    cache: RwLock<Option<Arc<Loaded>>>,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>, collection: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            name: collection.into(),
            cache: RwLock::new(None),
        }
    }

    fn collection_dir(&self) -> PathBuf {
        self.root.join(&self.name)
    }

    fn cached(&self) -> Option<Arc<Loaded>> {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_cache(&self, loaded: Arc<Loaded>) {
        *self.cache.write().unwrap_or_else(PoisonError::into_inner) = Some(loaded);
    }

    async fn read_from_disk(&self) -> Result<Loaded> {
        let dir = self.collection_dir();
        let current = match tokio::fs::read_to_string(dir.join(CURRENT_FILE)).await {
            Ok(name) => name.trim().to_string(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::NotFound(format!(
                    "collection '{}' under {}",
                    self.name,
                    self.root.display()
                )))
            }
            Err(e) => return Err(e.into()),
        };
        let version = dir.join(&current);

        let manifest: Manifest =
            serde_json::from_slice(&tokio::fs::read(version.join(MANIFEST_FILE)).await?)?;
        if manifest.dims == 0 {
            return Err(invalid(format!("zero-dimension index in {}", version.display())));
        }
        if manifest.format_version != FORMAT_VERSION {
            return Err(invalid(format!(
                "unsupported index format {} in {}",
                manifest.format_version,
                version.display()
            )));
        }

        let vectors = blob_to_vec(&tokio::fs::read(version.join(VECTORS_FILE)).await?);
        if vectors.len() != manifest.count * manifest.dims {
            return Err(invalid(format!(
                "{} holds {} floats, manifest expects {} × {}",
                VECTORS_FILE,
                vectors.len(),
                manifest.count,
                manifest.dims
            )));
        }

        let mut payloads: Vec<PayloadEntry> =
            serde_json::from_slice(&tokio::fs::read(version.join(PAYLOADS_FILE)).await?)?;
        payloads.sort_by_key(|p| p.position);
        if payloads.len() != manifest.count
            || payloads.iter().enumerate().any(|(i, p)| p.position != i)
        {
            return Err(invalid(format!(
                "{} does not cover positions 0..{}",
                PAYLOADS_FILE, manifest.count
            )));
        }

        Ok(Loaded {
            dims: manifest.dims,
            vectors,
            passages: payloads.into_iter().map(|p| p.passage).collect(),
        })
    }
}

fn invalid(message: String) -> Error {
    Error::Io(io::Error::new(io::ErrorKind::InvalidData, message))
}

async fn write_version(dir: &Path, manifest: &Manifest, records: &[IndexRecord]) -> Result<()> {
    tokio::fs::create_dir_all(dir).await?;

    let mut blob = Vec::with_capacity(manifest.count * manifest.dims * 4);
    for record in records {
        blob.extend_from_slice(&vec_to_blob(&record.vector));
    }
    tokio::fs::write(dir.join(VECTORS_FILE), blob).await?;

    let payloads: Vec<PayloadEntry> = records
        .iter()
        .enumerate()
        .map(|(position, r)| PayloadEntry {
            position,
            id: r.id.clone(),
            passage: r.passage.clone(),
        })
        .collect();
    tokio::fs::write(dir.join(PAYLOADS_FILE), serde_json::to_vec(&payloads)?).await?;
    tokio::fs::write(dir.join(MANIFEST_FILE), serde_json::to_vec_pretty(manifest)?).await?;
    Ok(())
}

#[async_trait]
impl VectorStore for LocalStore {
    fn collection(&self) -> &str {
        &self.name
    }

    async fn create(&self, records: Vec<IndexRecord>) -> Result<IndexHandle> {
        let dims = check_dimensions(&records)?;
        let dir = self.collection_dir();
        let version_name = format!("v-{}", Uuid::new_v4());
        let manifest = Manifest {
            format_version: FORMAT_VERSION,
            collection: self.name.clone(),
            dims,
            count: records.len(),
            created_at: Utc::now(),
        };

        let version_dir = dir.join(&version_name);
        if let Err(e) = write_version(&version_dir, &manifest, &records).await {
            let _ = tokio::fs::remove_dir_all(&version_dir).await;
            return Err(e);
        }

        let pointer_tmp = dir.join(format!("{}.tmp-{}", CURRENT_FILE, Uuid::new_v4()));
        tokio::fs::write(&pointer_tmp, &version_name).await?;
        tokio::fs::rename(&pointer_tmp, dir.join(CURRENT_FILE)).await?;

        let loaded = Arc::new(Loaded {
            dims,
            vectors: records.iter().flat_map(|r| r.vector.iter().copied()).collect(),
            passages: records.into_iter().map(|r| r.passage).collect(),
        });
        let handle = loaded.handle(&self.name);
        self.set_cache(loaded);

        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with("v-") && name != version_name {
                if let Err(e) = tokio::fs::remove_dir_all(entry.path()).await {
                    warn!(path = %entry.path().display(), error = %e, "failed to remove old index version");
                }
            }
        }

        info!(
            collection = %self.name,
            records = handle.count,
            dims,
            path = %version_dir.display(),
            "local index written"
        );
        Ok(handle)
    }

    async fn load(&self) -> Result<IndexHandle> {
        let loaded = Arc::new(self.read_from_disk().await?);
        let handle = loaded.handle(&self.name);
        self.set_cache(loaded);
        debug!(collection = %self.name, records = handle.count, "local index loaded");
        Ok(handle)
    }

    async fn search(
        &self,
        handle: &IndexHandle,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredPassage>> {
        check_search(&self.name, handle, query)?;
        let loaded = match self.cached() {
            Some(loaded) => loaded,
            None => {
                self.load().await?;
                self.cached()
                    .ok_or_else(|| Error::NotFound(format!("collection '{}'", self.name)))?
            }
        };
        if loaded.dims != handle.dims {
            return Err(Error::DimensionMismatch {
                expected: loaded.dims,
                actual: handle.dims,
            });
        }
        let dims = loaded.dims;
        Ok(rank(
            loaded
                .vectors
                .chunks_exact(dims)
                .zip(loaded.passages.iter()),
            query,
            k,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docqa_core::models::Document;
    use tempfile::TempDir;

    fn record(content: &str, source: &str, vector: Vec<f32>) -> IndexRecord {
        let doc = Document::new(content, source);
        IndexRecord::new(
            Passage {
                content: doc.content,
                metadata: doc.metadata,
            },
            vector,
        )
    }

    #[tokio::test]
    async fn test_load_missing_collection_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path(), "docs");
        assert!(matches!(store.load().await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_create_then_load_from_fresh_instance() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path(), "docs");
        let handle = store
            .create(vec![
                record("alpha", "a.pdf", vec![1.0, 0.0]),
                record("beta", "b.pdf", vec![0.0, 1.0]),
            ])
            .await
            .unwrap();
        assert_eq!(handle.count, 2);

        let reopened = LocalStore::new(tmp.path(), "docs");
        let loaded = reopened.load().await.unwrap();
        assert_eq!(loaded, handle);
        let hits = reopened.search(&loaded, &[0.1, 1.0], 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].passage.content, "beta");
        assert_eq!(hits[0].passage.source(), "b.pdf");
    }

    #[tokio::test]
    async fn test_rebuild_replaces_and_cleans_old_versions() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path(), "docs");
        store
            .create(vec![record("old", "a", vec![1.0, 0.0])])
            .await
            .unwrap();
        let handle = store
            .create(vec![record("new", "b", vec![0.0, 0.0, 1.0])])
            .await
            .unwrap();
        assert_eq!(handle.dims, 3);

        let versions: Vec<_> = std::fs::read_dir(tmp.path().join("docs"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("v-"))
            .collect();
        assert_eq!(versions.len(), 1);

        let reopened = LocalStore::new(tmp.path(), "docs");
        let h = reopened.load().await.unwrap();
        let hits = reopened.search(&h, &[0.0, 0.0, 1.0], 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].passage.content, "new");
    }

    #[tokio::test]
    async fn test_search_lazily_loads_with_handle() {
        let tmp = TempDir::new().unwrap();
        let handle = LocalStore::new(tmp.path(), "docs")
            .create(vec![record("only", "a", vec![1.0, 1.0])])
            .await
            .unwrap();
        let other = LocalStore::new(tmp.path(), "docs");
        let hits = other.search(&handle, &[1.0, 1.0], 3).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn test_create_rejects_mixed_dimensions() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path(), "docs");
        let err = store
            .create(vec![
                record("a", "a", vec![1.0, 0.0]),
                record("b", "b", vec![1.0]),
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { .. }));
        assert!(matches!(store.load().await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_corrupt_vectors_file_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path(), "docs");
        store
            .create(vec![record("a", "a", vec![1.0, 0.0])])
            .await
            .unwrap();
        let current =
            std::fs::read_to_string(tmp.path().join("docs").join(CURRENT_FILE)).unwrap();
        std::fs::write(
            tmp.path().join("docs").join(current.trim()).join(VECTORS_FILE),
            [0u8; 4],
        )
        .unwrap();
        let err = LocalStore::new(tmp.path(), "docs").load().await.unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
