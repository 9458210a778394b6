//! The CIB capability (spec §6): the cluster information base this bridge
//! writes resource status into. Same swappable-handle shape as
//! [`crate::executor::Executor`].

use async_trait::async_trait;

use crate::history::HistoryEntry;

/// Outcome of a CIB write, delivered to the registered completion callback
/// (spec §4.7 step 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CibUpdateResult {
    Ok,
    Failed,
}

/// The cluster information base, restricted to the local node's status
/// subtree (spec §6 "CIB interface").
#[async_trait]
pub trait Cib: Send + Sync + 'static {
    /// Replace the resource's status-subtree history element.
    async fn update_history(&self, resource_id: &str, entry: &HistoryEntry) -> CibUpdateResult;

    /// Remove a single op entry, addressed by call id, from the resource's
    /// history (spec §4.7 step 5, §4.6 cancel).
    async fn delete_op_entry(&self, resource_id: &str, call_id: i64, quorum_override: bool) -> CibUpdateResult;

    /// Remove the resource's entire status-subtree projection (spec §4.4,
    /// "the resource backend has been purged").
    async fn delete_resource(&self, resource_id: &str, quorum_override: bool) -> CibUpdateResult;

    /// Dry-run an ACL check for a delete without performing it (spec §4.6
    /// "delete" short-circuit).
    async fn can_delete(&self, resource_id: &str) -> bool;

    /// Erase the whole local node's LRM status subtree in one operation,
    /// the second of reprobe's three ordered steps (spec §9).
    async fn erase_lrm_subtree(&self, node: &str) -> CibUpdateResult;

    /// Clear the node's "probed" attribute, reprobe's final step
    /// (spec §9). Must run only after the executor deletions and the
    /// subtree erase have both completed.
    async fn clear_probed_attribute(&self, node: &str) -> CibUpdateResult;
}

pub mod fake {
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use super::*;

    /// An in-memory [`Cib`] double recording the last write per resource.
    #[derive(Default)]
    pub struct FakeCib {
        history: Mutex<BTreeMap<String, HistoryEntry>>,
        deny_delete: Mutex<Vec<String>>,
        fail_updates: std::sync::atomic::AtomicBool,
        probed_cleared: Mutex<Vec<String>>,
        subtree_erased: std::sync::atomic::AtomicBool,
    }

    impl FakeCib {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn deny_delete_for(&self, resource_id: impl Into<String>) {
            self.deny_delete.lock().unwrap().push(resource_id.into());
        }

        pub fn set_fail_updates(&self, fail: bool) {
            self.fail_updates.store(fail, std::sync::atomic::Ordering::SeqCst);
        }

        pub fn history_for(&self, resource_id: &str) -> Option<HistoryEntry> {
            self.history.lock().unwrap().get(resource_id).cloned()
        }

        pub fn probed_cleared_for(&self) -> Vec<String> {
            self.probed_cleared.lock().unwrap().clone()
        }

        pub fn subtree_erased(&self) -> bool {
            self.subtree_erased.load(std::sync::atomic::Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Cib for FakeCib {
        async fn update_history(&self, resource_id: &str, entry: &HistoryEntry) -> CibUpdateResult {
            if self.fail_updates.load(std::sync::atomic::Ordering::SeqCst) {
                return CibUpdateResult::Failed;
            }
            self.history.lock().unwrap().insert(resource_id.to_string(), entry.clone());
            CibUpdateResult::Ok
        }

        async fn delete_op_entry(&self, resource_id: &str, call_id: i64, _quorum_override: bool) -> CibUpdateResult {
            let mut guard = self.history.lock().unwrap();
            if let Some(entry) = guard.get_mut(resource_id) {
                entry.recurring.retain(|op| op.call_id != call_id);
            }
            CibUpdateResult::Ok
        }

        async fn delete_resource(&self, resource_id: &str, _quorum_override: bool) -> CibUpdateResult {
            self.history.lock().unwrap().remove(resource_id);
            CibUpdateResult::Ok
        }

        async fn can_delete(&self, resource_id: &str) -> bool {
            !self.deny_delete.lock().unwrap().iter().any(|id| id == resource_id)
        }

        async fn erase_lrm_subtree(&self, _node: &str) -> CibUpdateResult {
            self.history.lock().unwrap().clear();
            self.subtree_erased.store(true, std::sync::atomic::Ordering::SeqCst);
            CibUpdateResult::Ok
        }

        async fn clear_probed_attribute(&self, node: &str) -> CibUpdateResult {
            self.probed_cleared.lock().unwrap().push(node.to_string());
            CibUpdateResult::Ok
        }
    }
}
