//! In-memory payload store

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use stratasync_domain::{Batch, OperationId, PayloadHandle};

use crate::errors::SyncResult;
use crate::ports::PayloadStore;

/// Payload store backed by a concurrent map
///
/// Batches are shared by reference; nothing survives a restart. Use the
/// file-backed store from the infra crate when recovery must be durable.
#[derive(Debug, Default)]
pub struct InMemoryPayloadStore {
    entries: DashMap<PayloadHandle, Arc<Batch>>,
}

impl InMemoryPayloadStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored payloads
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no payloads are stored
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl PayloadStore for InMemoryPayloadStore {
    async fn put(&self, operation_id: OperationId, batch: Arc<Batch>) -> SyncResult<PayloadHandle> {
        let handle = PayloadHandle::new(operation_id.to_string());
        self.entries.insert(handle.clone(), batch);
        Ok(handle)
    }

    async fn get(&self, handle: &PayloadHandle) -> SyncResult<Option<Arc<Batch>>> {
        Ok(self.entries.get(handle).map(|entry| Arc::clone(entry.value())))
    }

    async fn release(&self, handle: &PayloadHandle) -> SyncResult<()> {
        self.entries.remove(handle);
        Ok(())
    }
}
