// SPDX-License-Identifier: MIT OR Apache-2.0
//! One JSON file per document inside a directory.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use pe_core::{RuntimeBody, RuntimeDocument, RuntimeId};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, error};

use crate::{DocumentStore, StoreError};

/// Directory-backed store.
///
/// Documents live in `<root>/<id>.json`. Writes go to a temporary file that
/// is renamed into place, so readers never observe a partial document.
/// Allocation, update and deletion are serialized by the id counter lock.
#[derive(Debug)]
pub struct FileDocumentStore {
    root: PathBuf,
    /// Next id to hand out; held by every mutation.
    next_id: Mutex<RuntimeId>,
    scratch: AtomicU64,
}

impl FileDocumentStore {
    /// Open (creating if needed) a store rooted at `root`.
    ///
    /// The id counter resumes after the highest id already on disk. Files that
    /// cannot be parsed are logged and skipped.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)
            .await
            .map_err(|e| StoreError::io(&root, e))?;

        let next_id = hydrate_next_id(&root).await?;
        debug!(root = %root.display(), next_id, "opened document store");
        Ok(Self {
            root,
            next_id: Mutex::new(next_id),
            scratch: AtomicU64::new(0),
        })
    }

    /// Directory holding the documents.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, id: RuntimeId) -> PathBuf {
        self.root.join(format!("{id}.json"))
    }

    async fn write(&self, document: &RuntimeDocument) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(document).map_err(|source| StoreError::Serde {
            id: document.id,
            source,
        })?;
        let scratch = self.scratch.fetch_add(1, Ordering::Relaxed);
        let tmp = self.root.join(format!(".{}.{scratch}.tmp", document.id));
        fs::write(&tmp, bytes)
            .await
            .map_err(|e| StoreError::io(&tmp, e))?;
        let path = self.path_for(document.id);
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| StoreError::io(&path, e))
    }
}

fn document_id(path: &Path) -> Option<RuntimeId> {
    if path.extension().and_then(|s| s.to_str()) != Some("json") {
        return None;
    }
    path.file_stem()?.to_str()?.parse().ok()
}

async fn hydrate_next_id(root: &Path) -> Result<RuntimeId, StoreError> {
    let mut entries = fs::read_dir(root)
        .await
        .map_err(|e| StoreError::io(root, e))?;
    let mut next = 0;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| StoreError::io(root, e))?
    {
        let p = entry.path();
        let Some(id) = document_id(&p) else {
            continue;
        };
        let bytes = match fs::read(&p).await {
            Ok(b) => b,
            Err(err) => {
                error!(path = %p.display(), error = ?err, "failed to read document file");
                continue;
            }
        };
        if let Err(err) = serde_json::from_slice::<RuntimeDocument>(&bytes) {
            error!(path = %p.display(), error = ?err, "failed to parse document file");
        }
        // Even unreadable documents keep their id reserved.
        next = next.max(id + 1);
    }
    Ok(next)
}

#[async_trait]
impl DocumentStore for FileDocumentStore {
    async fn allocate(&self, body: RuntimeBody) -> Result<RuntimeDocument, StoreError> {
        let mut next_id = self.next_id.lock().await;
        let document = RuntimeDocument { id: *next_id, body };
        self.write(&document).await?;
        *next_id += 1;
        Ok(document)
    }

    async fn load(&self, id: RuntimeId) -> Result<Option<RuntimeDocument>, StoreError> {
        let path = self.path_for(id);
        let bytes = match fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(&path, e)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| StoreError::Serde { id, source })
    }

    async fn update(&self, document: &RuntimeDocument) -> Result<(), StoreError> {
        let _guard = self.next_id.lock().await;
        let path = self.path_for(document.id);
        if !fs::try_exists(&path)
            .await
            .map_err(|e| StoreError::io(&path, e))?
        {
            return Err(StoreError::NotFound(document.id));
        }
        self.write(document).await
    }

    async fn delete(&self, id: RuntimeId) -> Result<bool, StoreError> {
        let _guard = self.next_id.lock().await;
        let path = self.path_for(id);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::io(&path, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_numeric_json_files_are_documents() {
        assert_eq!(document_id(Path::new("/s/12.json")), Some(12));
        assert_eq!(document_id(Path::new("/s/.12.0.tmp")), None);
        assert_eq!(document_id(Path::new("/s/notes.json")), None);
        assert_eq!(document_id(Path::new("/s/12.txt")), None);
    }
}
