//! The pending-op registry (spec §4.3) and pending-deletion tracker.

use std::collections::HashMap;

use crate::executor::{CancelResult, Executor};
use crate::op::{Verb, op_key};

/// An operation submitted to the executor but not yet completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingOp {
    pub resource_id: String,
    pub call_id: i64,
    pub verb: Verb,
    pub interval_ms: u64,
    pub transition_key: Option<String>,
    /// Set once a cancel has been requested; suppresses the user-visible
    /// ack on the completion that follows (spec §4.3).
    pub cancelled: bool,
    /// Set when the completion should trigger a targeted CIB delete of
    /// this op's entry (spec §4.7 step 5).
    pub remove: bool,
    /// Restart-parameter list and digest computed at dispatch time for a
    /// start operation, carried forward so the completion processor can
    /// attach them to the CIB history entry (spec §4.5, §4.7).
    pub restart_list: Option<String>,
    pub digest: Option<String>,
}

impl PendingOp {
    pub fn stop_id(&self) -> String {
        format!("{}:{}", self.resource_id, self.call_id)
    }

    pub fn op_key(&self) -> String {
        op_key(self.verb, self.interval_ms)
    }
}

/// Keyed by stop-id `"<rsc>:<call_id>"` (spec §4.3).
#[derive(Debug, Default)]
pub struct PendingRegistry {
    ops: HashMap<String, PendingOp>,
}

impl PendingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, pending: PendingOp) {
        self.ops.insert(pending.stop_id(), pending);
    }

    pub fn lookup(&self, stop_id: &str) -> Option<&PendingOp> {
        self.ops.get(stop_id)
    }

    pub fn lookup_mut(&mut self, stop_id: &str) -> Option<&mut PendingOp> {
        self.ops.get_mut(stop_id)
    }

    pub fn remove(&mut self, stop_id: &str) -> Option<PendingOp> {
        self.ops.remove(stop_id)
    }

    /// Request cancellation of every pending op on `resource_id` matching
    /// `op_key`; entries whose cancel succeeds immediately are removed and
    /// their call id returned so the caller can prune the matching CIB
    /// entry, entries reported "pending" are marked `cancelled` and `remove`
    /// and left for the later completion to prune by its own call id
    /// (spec §4.3, §4.7 step 5, §5).
    pub async fn cancel_by_op_key(&mut self, executor: &dyn Executor, resource_id: &str, key: &str) -> Vec<i64> {
        let targets: Vec<String> = self
            .ops
            .values()
            .filter(|p| p.resource_id == resource_id && p.op_key() == key)
            .map(|p| p.stop_id())
            .collect();

        let mut removed_call_ids = Vec::new();
        for stop_id in targets {
            let call_id = match self.ops.get(&stop_id) {
                Some(p) => p.call_id,
                None => continue,
            };
            match executor.cancel_op(resource_id, call_id).await {
                CancelResult::Cancelled | CancelResult::NothingToCancel => {
                    self.ops.remove(&stop_id);
                    removed_call_ids.push(call_id);
                }
                CancelResult::Pending => {
                    if let Some(p) = self.ops.get_mut(&stop_id) {
                        p.cancelled = true;
                        p.remove = true;
                    }
                }
            }
        }
        removed_call_ids
    }

    /// Silence recurring monitors on `resource_id` before a stop/demote/
    /// promote/migrate (spec §4.3, §4.6 step 2).
    pub async fn drain_recurring_for(&mut self, executor: &dyn Executor, resource_id: &str) {
        let targets: Vec<String> = self
            .ops
            .values()
            .filter(|p| p.resource_id == resource_id && p.interval_ms > 0)
            .map(|p| p.stop_id())
            .collect();

        for stop_id in targets {
            let call_id = match self.ops.get(&stop_id) {
                Some(p) => p.call_id,
                None => continue,
            };
            match executor.cancel_op(resource_id, call_id).await {
                CancelResult::Cancelled | CancelResult::NothingToCancel => {
                    self.ops.remove(&stop_id);
                }
                CancelResult::Pending => {
                    if let Some(p) = self.ops.get_mut(&stop_id) {
                        p.cancelled = true;
                    }
                }
            }
        }
    }

    pub fn count_nonrecurring(&self) -> usize {
        self.ops.values().filter(|p| p.interval_ms == 0).count()
    }

    pub fn nonrecurring(&self) -> impl Iterator<Item = &PendingOp> {
        self.ops.values().filter(|p| p.interval_ms == 0)
    }

    /// Distinct resource ids with at least one pending op, recurring or not.
    pub fn resource_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.ops.values().map(|p| p.resource_id.clone()).collect();
        ids.sort();
        ids.dedup();
        ids
    }
}

/// A delete request whose ack is deferred until the executor confirms the
/// resource is gone (spec §4.6 "delete" short-circuit).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDeletion {
    pub resource_id: String,
    pub transition_key: Option<String>,
}

/// Keyed by resource id.
#[derive(Debug, Default)]
pub struct PendingDeletions {
    deletions: HashMap<String, PendingDeletion>,
}

impl PendingDeletions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, deletion: PendingDeletion) {
        self.deletions.insert(deletion.resource_id.clone(), deletion);
    }

    pub fn remove(&mut self, resource_id: &str) -> Option<PendingDeletion> {
        self.deletions.remove(resource_id)
    }

    pub fn contains(&self, resource_id: &str) -> bool {
        self.deletions.contains_key(resource_id)
    }
}
