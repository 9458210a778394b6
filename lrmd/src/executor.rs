//! The executor capability (spec §6): the local resource-agent runner the
//! bridge drives. Mirrors the swappable-service pattern of
//! `storage::replication::ShardEngine`, a cloneable trait object the caller
//! never matches on concretely.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::op::{Op, OpStatus, Verb};

/// Result of `perform-op`: a positive call id, or a submission failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitResult {
    Accepted(i64),
    Rejected,
}

/// Result of `cancel-op` (spec §5 "Cancellation and timeouts").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelResult {
    Cancelled,
    NothingToCancel,
    Pending,
}

/// Result of `delete-resource`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteResult {
    Ok,
    Busy,
}

/// A single historical op as replayed by `get-current-ops` during priming
/// (spec §4.8).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoricalOp {
    pub call_id: i64,
    pub verb: Verb,
    pub interval_ms: u64,
    pub status: OpStatus,
    pub rc: i32,
}

/// A completion event delivered asynchronously by the executor (spec §6).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionEvent {
    pub resource_id: String,
    pub verb: Verb,
    pub interval_ms: u64,
    pub timeout_ms: u64,
    pub call_id: i64,
    pub status: OpStatus,
    pub rc: i32,
    pub output: Option<String>,
    pub resource_deleted: bool,
    pub transition_key: Option<String>,
}

/// The local resource-agent runner (spec §6 "Executor capability").
#[async_trait]
pub trait Executor: Send + Sync + 'static {
    async fn signon(&self, system_name: &str) -> bool;

    async fn signoff(&self);

    async fn add_resource(
        &self,
        id: &str,
        class: &str,
        agent_type: &str,
        provider: Option<&str>,
        params: &BTreeMap<String, String>,
    ) -> bool;

    async fn get_resource(&self, id: &str) -> bool;

    async fn perform_op(&self, resource_id: &str, op: &Op) -> SubmitResult;

    async fn cancel_op(&self, resource_id: &str, call_id: i64) -> CancelResult;

    async fn delete_resource(&self, id: &str) -> DeleteResult;

    async fn list_resources(&self) -> Vec<String>;

    async fn get_current_ops(&self, id: &str) -> Vec<HistoricalOp>;

    async fn get_metadata(&self, class: &str, agent_type: &str, provider: Option<&str>) -> Option<String>;

    async fn fail_resource(&self, id: &str, reason: &str) -> bool;
}

pub mod fake {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Mutex;

    use super::*;

    /// An in-memory [`Executor`] double for tests: tracks resources and
    /// hands out monotonically increasing call ids.
    pub struct FakeExecutor {
        next_call_id: AtomicI64,
        resources: Mutex<BTreeMap<String, BTreeMap<String, String>>>,
        metadata: Mutex<BTreeMap<String, String>>,
        reject_submissions: std::sync::atomic::AtomicBool,
        busy_delete: std::sync::atomic::AtomicBool,
    }

    impl Default for FakeExecutor {
        fn default() -> Self {
            Self::new()
        }
    }

    impl FakeExecutor {
        pub fn new() -> Self {
            Self {
                next_call_id: AtomicI64::new(1),
                resources: Mutex::new(BTreeMap::new()),
                metadata: Mutex::new(BTreeMap::new()),
                reject_submissions: std::sync::atomic::AtomicBool::new(false),
                busy_delete: std::sync::atomic::AtomicBool::new(false),
            }
        }

        pub fn set_metadata(&self, class: &str, agent_type: &str, provider: &str, xml: impl Into<String>) {
            self.metadata
                .lock()
                .unwrap()
                .insert(format!("{agent_type}::{class}:{provider}"), xml.into());
        }

        pub fn set_reject_submissions(&self, reject: bool) {
            self.reject_submissions.store(reject, Ordering::SeqCst);
        }

        pub fn set_busy_delete(&self, busy: bool) {
            self.busy_delete.store(busy, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Executor for FakeExecutor {
        async fn signon(&self, _system_name: &str) -> bool {
            true
        }

        async fn signoff(&self) {}

        async fn add_resource(
            &self,
            id: &str,
            _class: &str,
            _agent_type: &str,
            _provider: Option<&str>,
            params: &BTreeMap<String, String>,
        ) -> bool {
            self.resources.lock().unwrap().insert(id.to_string(), params.clone());
            true
        }

        async fn get_resource(&self, id: &str) -> bool {
            self.resources.lock().unwrap().contains_key(id)
        }

        async fn perform_op(&self, _resource_id: &str, _op: &Op) -> SubmitResult {
            if self.reject_submissions.load(Ordering::SeqCst) {
                return SubmitResult::Rejected;
            }
            SubmitResult::Accepted(self.next_call_id.fetch_add(1, Ordering::SeqCst))
        }

        async fn cancel_op(&self, _resource_id: &str, _call_id: i64) -> CancelResult {
            CancelResult::Cancelled
        }

        async fn delete_resource(&self, id: &str) -> DeleteResult {
            if self.busy_delete.load(Ordering::SeqCst) {
                return DeleteResult::Busy;
            }
            self.resources.lock().unwrap().remove(id);
            DeleteResult::Ok
        }

        async fn list_resources(&self) -> Vec<String> {
            self.resources.lock().unwrap().keys().cloned().collect()
        }

        async fn get_current_ops(&self, _id: &str) -> Vec<HistoricalOp> {
            Vec::new()
        }

        async fn get_metadata(&self, class: &str, agent_type: &str, provider: Option<&str>) -> Option<String> {
            let provider = provider.unwrap_or(crate::op::ResourceDescriptor::DEFAULT_PROVIDER);
            self.metadata
                .lock()
                .unwrap()
                .get(&format!("{agent_type}::{class}:{provider}"))
                .cloned()
        }

        async fn fail_resource(&self, _id: &str, _reason: &str) -> bool {
            true
        }
    }
}
