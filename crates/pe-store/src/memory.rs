// SPDX-License-Identifier: MIT OR Apache-2.0
use std::collections::BTreeMap;

use async_trait::async_trait;
use pe_core::{RuntimeBody, RuntimeDocument, RuntimeId};
use tokio::sync::RwLock;

use crate::{DocumentStore, StoreError};

#[derive(Debug, Default)]
struct Inner {
    next_id: RuntimeId,
    documents: BTreeMap<RuntimeId, RuntimeDocument>,
}

/// Volatile store for tests and throwaway daemons.
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    inner: RwLock<Inner>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored documents.
    pub async fn len(&self) -> usize {
        self.inner.read().await.documents.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn allocate(&self, body: RuntimeBody) -> Result<RuntimeDocument, StoreError> {
        let mut inner = self.inner.write().await;
        let document = RuntimeDocument {
            id: inner.next_id,
            body,
        };
        inner.next_id += 1;
        inner.documents.insert(document.id, document.clone());
        Ok(document)
    }

    async fn load(&self, id: RuntimeId) -> Result<Option<RuntimeDocument>, StoreError> {
        Ok(self.inner.read().await.documents.get(&id).cloned())
    }

    async fn update(&self, document: &RuntimeDocument) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        match inner.documents.get_mut(&document.id) {
            Some(slot) => {
                *slot = document.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(document.id)),
        }
    }

    async fn delete(&self, id: RuntimeId) -> Result<bool, StoreError> {
        Ok(self.inner.write().await.documents.remove(&id).is_some())
    }
}
