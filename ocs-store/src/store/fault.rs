//! Fault injection for the in-memory store.

use std::collections::{HashMap, VecDeque};

use super::error::StoreError;

/// Store operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    GetManagedOcs,
    ListManagedOcs,
    CreateManagedOcs,
    UpdateManagedOcs,
    UpdateManagedOcsStatus,
    DeleteManagedOcs,
    GetStorageCluster,
    ListStorageClusters,
    CreateStorageCluster,
    UpdateStorageCluster,
    DeleteStorageCluster,
}

/// Queued failures per operation. Each injected error fails exactly one call.
#[derive(Debug, Default)]
pub(crate) struct FaultPlan {
    pending: HashMap<Operation, VecDeque<StoreError>>,
}

impl FaultPlan {
    pub(crate) fn push(&mut self, op: Operation, error: StoreError) {
        self.pending.entry(op).or_default().push_back(error);
    }

    pub(crate) fn take(&mut self, op: Operation) -> Option<StoreError> {
        let queue = self.pending.get_mut(&op)?;
        let error = queue.pop_front();
        if queue.is_empty() {
            self.pending.remove(&op);
        }
        error
    }

    pub(crate) fn pending(&self, op: Operation) -> usize {
        self.pending.get(&op).map_or(0, VecDeque::len)
    }
}
