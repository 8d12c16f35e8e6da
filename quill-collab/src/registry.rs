//! Process-wide mapping from document name to the live document handle.
//!
//! At most one handle exists per name at any instant. Creation races are
//! settled under the write lock; a document removes itself with an
//! identity check so a late removal can never evict a successor that
//! reused the name.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::document::DocHandle;

/// The shared-document registry.
#[derive(Default)]
pub struct Registry {
    docs: RwLock<HashMap<String, DocHandle>>,
}

impl Registry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Look up the live handle for a name.
    pub async fn get(&self, name: &str) -> Option<DocHandle> {
        self.docs.read().await.get(name).cloned()
    }

    /// Return the existing handle or install the one produced by
    /// `create`. The closure only runs on a miss, under the write lock.
    pub async fn get_or_create<F>(&self, name: &str, create: F) -> DocHandle
    where
        F: FnOnce() -> DocHandle,
    {
        if let Some(handle) = self.get(name).await {
            return handle;
        }
        let mut docs = self.docs.write().await;
        match docs.get(name) {
            Some(handle) => handle.clone(),
            None => {
                let handle = create();
                docs.insert(name.to_string(), handle.clone());
                handle
            }
        }
    }

    /// Remove the entry for `name` if it is still the given instance.
    pub async fn remove_if(&self, name: &str, id: Uuid) -> bool {
        let mut docs = self.docs.write().await;
        if docs.get(name).is_some_and(|handle| handle.id == id) {
            docs.remove(name);
            true
        } else {
            false
        }
    }

    /// Number of live documents.
    pub async fn len(&self) -> usize {
        self.docs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.docs.read().await.is_empty()
    }

    /// Names of all live documents.
    pub async fn names(&self) -> Vec<String> {
        self.docs.read().await.keys().cloned().collect()
    }
}
