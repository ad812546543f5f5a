//! In-memory [`VectorStore`] for tests and throwaway pipelines.
//!
//! Records live in a `Vec` behind `std::sync::RwLock`; `create` swaps the
//! whole collection under the write lock.

use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::models::{IndexHandle, IndexRecord, ScoredPassage};

use super::{check_dimensions, check_search, rank, VectorStore};

struct Collection {
    dims: usize,
    records: Vec<IndexRecord>,
}

pub struct InMemoryStore {
    name: String,
    collection: RwLock<Option<Collection>>,
}

impl InMemoryStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            collection: RwLock::new(None),
        }
    }

    /// Number of stored records, zero when nothing was created.
    pub fn len(&self) -> usize {
        self.collection
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(0, |c| c.records.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    fn collection(&self) -> &str {
        &self.name
    }

    async fn create(&self, records: Vec<IndexRecord>) -> Result<IndexHandle> {
        let dims = check_dimensions(&records)?;
        let count = records.len();
        *self
            .collection
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Collection { dims, records });
        Ok(IndexHandle {
            collection: self.name.clone(),
            dims,
            count,
        })
    }

    async fn load(&self) -> Result<IndexHandle> {
        let guard = self
            .collection
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let collection = guard
            .as_ref()
            .ok_or_else(|| Error::NotFound(format!("collection '{}'", self.name)))?;
        Ok(IndexHandle {
            collection: self.name.clone(),
            dims: collection.dims,
            count: collection.records.len(),
        })
    }

    async fn search(
        &self,
        handle: &IndexHandle,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredPassage>> {
        check_search(&self.name, handle, query)?;
        let guard = self
            .collection
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let collection = guard
            .as_ref()
            .ok_or_else(|| Error::NotFound(format!("collection '{}'", self.name)))?;
        Ok(rank(
            collection
                .records
                .iter()
                .map(|r| (r.vector.as_slice(), &r.passage)),
            query,
            k,
        ))
    }
}
