//! PostStore — redb-backed persistence for posts.
//!
//! Posts are JSON values keyed by a monotonically increasing `u64` id.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{StoreError, StoreResult};

const POSTS: TableDefinition<u64, &[u8]> = TableDefinition::new("posts");

fn storage(e: impl std::fmt::Display) -> StoreError {
    StoreError::Storage(e.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: u64,
    pub title: String,
}

/// Cheaply cloneable handle shared by request handlers.
#[derive(Clone)]
pub struct PostStore {
    db: Arc<Database>,
}

impl PostStore {
    pub fn open(path: &Path) -> StoreResult<Self> {
        let db = Database::create(path).map_err(|e| StoreError::Open(e.to_string()))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_table()?;
        debug!(?path, "post store opened");
        Ok(store)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        let db = Database::builder()
            .create_with_backend(redb::backends::InMemoryBackend::new())
            .map_err(|e| StoreError::Open(e.to_string()))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_table()?;
        Ok(store)
    }

    fn ensure_table(&self) -> StoreResult<()> {
        let txn = self.db.begin_write().map_err(storage)?;
        txn.open_table(POSTS).map_err(storage)?;
        txn.commit().map_err(storage)?;
        Ok(())
    }

    /// Insert a post under the next free id.
    pub fn create(&self, title: &str) -> StoreResult<Post> {
        let txn = self.db.begin_write().map_err(storage)?;
        let post;
        {
            let mut table = txn.open_table(POSTS).map_err(storage)?;
            let next = match table.last().map_err(storage)? {
                Some((key, _)) => key.value() + 1,
                None => 1,
            };
            post = Post {
                id: next,
                title: title.to_string(),
            };
            let value = serde_json::to_vec(&post).map_err(storage)?;
            table.insert(post.id, value.as_slice()).map_err(storage)?;
        }
        txn.commit().map_err(storage)?;
        debug!(id = post.id, "post created");
        Ok(post)
    }

    /// All posts in id order.
    pub fn list(&self) -> StoreResult<Vec<Post>> {
        let txn = self.db.begin_read().map_err(storage)?;
        let table = txn.open_table(POSTS).map_err(storage)?;
        let mut posts = Vec::new();
        for entry in table.iter().map_err(storage)? {
            let (key, value) = entry.map_err(storage)?;
            let post = serde_json::from_slice(value.value()).map_err(|e| StoreError::Corrupt {
                id: key.value(),
                message: e.to_string(),
            })?;
            posts.push(post);
        }
        Ok(posts)
    }
}
