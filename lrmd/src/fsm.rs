//! The control FSM hook (spec §4.8) and verify-stopped / quiescence check
//! (spec §4.9). The bridge's own state machine is intentionally thin: it
//! tracks only what this subsystem needs to decide whether executing is
//! legal and whether shutdown may proceed.

use std::time::Duration;

use tracing::Level;

use crate::error::{LrmError, LrmResult};
use crate::executor::Executor;
use crate::history::{HistoryCache, HistoryRecord};
#[cfg(test)]
use crate::op::Verb;
use crate::pending::PendingRegistry;

/// The subset of the controller's FSM state relevant to this bridge
/// (spec §4.6, §4.8, §4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlState {
    NotDc,
    PolicyEngine,
    TransitionEngine,
    Other,
    Terminate,
}

impl ControlState {
    /// Whether the dispatcher is permitted to run the full verb set in
    /// this state (spec §4.6).
    pub fn executing_is_legal(self) -> bool {
        matches!(self, ControlState::NotDc | ControlState::PolicyEngine | ControlState::TransitionEngine)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ControlState::Terminate)
    }
}

/// Bounded reconnect policy (spec §4.8, spec §9 default ≈30 attempts).
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub max_attempts: usize,
    pub interval: Duration,
}

/// Sign on to the executor, retrying up to `policy.max_attempts` times
/// (spec §4.8 "Bounded reconnect").
pub async fn connect(executor: &dyn Executor, system_name: &str, policy: ReconnectPolicy) -> LrmResult<()> {
    for attempt in 1..=policy.max_attempts {
        if executor.signon(system_name).await {
            return Ok(());
        }
        tracing::warn!(attempt, max_attempts = policy.max_attempts, "executor signon failed, retrying");
        if attempt < policy.max_attempts {
            tokio::time::sleep(policy.interval).await;
        }
    }
    Err(LrmError::ReconnectExhausted(policy.max_attempts))
}

/// Prime the history cache from the executor's current-state enumeration
/// (spec §4.8 "On connect").
pub async fn prime_history(executor: &dyn Executor, history: &mut HistoryCache) {
    for resource_id in executor.list_resources().await {
        let mut ops = executor.get_current_ops(&resource_id).await;
        ops.sort_by_key(|op| op.call_id);

        let mut last_call_id: Option<i64> = None;
        for historical in ops {
            match last_call_id {
                Some(prev) if historical.call_id == prev => {
                    tracing::warn!(resource = %resource_id, call_id = historical.call_id, "duplicate call id during priming");
                    continue;
                }
                Some(prev) if historical.call_id < prev => {
                    tracing::error!(
                        resource = %resource_id,
                        call_id = historical.call_id,
                        previous = prev,
                        "out-of-order call id during priming, discarding"
                    );
                    continue;
                }
                _ => {}
            }
            last_call_id = Some(historical.call_id);

            let record = HistoryRecord {
                call_id: historical.call_id,
                verb: historical.verb,
                interval_ms: historical.interval_ms,
                status: historical.status,
                rc: historical.rc,
                expected_rc: 0,
                output: None,
                restart_list: None,
                digest: None,
            };
            history.record(&resource_id, record, false, false);
        }
    }
}

/// What happened when the executor connection unexpectedly dropped
/// (spec §4.8 "On unexpected loss of the executor connection", §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionLossOutcome {
    /// Previously connected: fence-worthy, the caller must raise a fatal
    /// FSM input.
    Fatal,
    /// Not previously connected: an expected disconnect, logged at info.
    Expected,
}

pub fn on_connection_lost(was_connected: bool) -> ConnectionLossOutcome {
    if was_connected {
        tracing::error!("lost executor connection while connected, raising fatal FSM input");
        ConnectionLossOutcome::Fatal
    } else {
        tracing::info!("executor connection dropped while already disconnected");
        ConnectionLossOutcome::Expected
    }
}

/// Result of [`verify_stopped`] (spec §4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyStopped {
    Stopped,
    NotStopped { remaining_nonrecurring: usize },
}

/// `disconnect` is only legal once this returns [`VerifyStopped::Stopped`]
/// (spec §4.8 "On disconnect").
pub async fn verify_stopped(
    state: ControlState,
    executor_connected: bool,
    executor: Option<&dyn Executor>,
    pending: &mut PendingRegistry,
    history: &HistoryCache,
) -> VerifyStopped {
    let log_level = if state.is_terminal() { Level::ERROR } else { Level::WARN };

    if executor_connected {
        if let Some(executor) = executor {
            for resource_id in pending.resource_ids() {
                pending.drain_recurring_for(executor, &resource_id).await;
            }
        }
    }

    let remaining = pending.count_nonrecurring();
    if remaining > 0 && !state.is_terminal() {
        log_remaining(log_level, remaining);
        return VerifyStopped::NotStopped {
            remaining_nonrecurring: remaining,
        };
    }

    let active: Vec<&str> = history.active_resources().collect();
    if !active.is_empty() {
        tracing::error!(resources = ?active, "resources still active at quiescence");
    }

    if state.is_terminal() {
        return VerifyStopped::Stopped;
    }

    if remaining > 0 {
        VerifyStopped::NotStopped {
            remaining_nonrecurring: remaining,
        }
    } else {
        VerifyStopped::Stopped
    }
}

fn log_remaining(level: Level, remaining: usize) {
    match level {
        Level::ERROR => tracing::error!(remaining, "pending operations outstanding at shutdown"),
        _ => tracing::warn!(remaining, "pending operations outstanding at shutdown"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::fake::FakeExecutor;
    use crate::pending::PendingOp;

    #[tokio::test]
    async fn connect_retries_until_success() {
        struct FlakyOnce {
            inner: FakeExecutor,
            calls: std::sync::atomic::AtomicUsize,
        }

        #[async_trait::async_trait]
        impl Executor for FlakyOnce {
            async fn signon(&self, system_name: &str) -> bool {
                let n = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                if n == 0 { false } else { self.inner.signon(system_name).await }
            }
            async fn signoff(&self) {
                self.inner.signoff().await
            }
            async fn add_resource(
                &self,
                id: &str,
                class: &str,
                agent_type: &str,
                provider: Option<&str>,
                params: &std::collections::BTreeMap<String, String>,
            ) -> bool {
                self.inner.add_resource(id, class, agent_type, provider, params).await
            }
            async fn get_resource(&self, id: &str) -> bool {
                self.inner.get_resource(id).await
            }
            async fn perform_op(&self, resource_id: &str, op: &crate::op::Op) -> crate::executor::SubmitResult {
                self.inner.perform_op(resource_id, op).await
            }
            async fn cancel_op(&self, resource_id: &str, call_id: i64) -> crate::executor::CancelResult {
                self.inner.cancel_op(resource_id, call_id).await
            }
            async fn delete_resource(&self, id: &str) -> crate::executor::DeleteResult {
                self.inner.delete_resource(id).await
            }
            async fn list_resources(&self) -> Vec<String> {
                self.inner.list_resources().await
            }
            async fn get_current_ops(&self, id: &str) -> Vec<crate::executor::HistoricalOp> {
                self.inner.get_current_ops(id).await
            }
            async fn get_metadata(&self, class: &str, agent_type: &str, provider: Option<&str>) -> Option<String> {
                self.inner.get_metadata(class, agent_type, provider).await
            }
            async fn fail_resource(&self, id: &str, reason: &str) -> bool {
                self.inner.fail_resource(id, reason).await
            }
        }

        let exec = FlakyOnce {
            inner: FakeExecutor::new(),
            calls: std::sync::atomic::AtomicUsize::new(0),
        };
        let policy = ReconnectPolicy {
            max_attempts: 3,
            interval: Duration::from_millis(1),
        };
        assert!(connect(&exec, "lrmd", policy).await.is_ok());
    }

    #[test]
    fn on_connection_lost_while_connected_is_fatal() {
        assert_eq!(on_connection_lost(true), ConnectionLossOutcome::Fatal);
        assert_eq!(on_connection_lost(false), ConnectionLossOutcome::Expected);
    }

    #[tokio::test]
    async fn verify_stopped_blocks_on_outstanding_nonrecurring() {
        let exec = FakeExecutor::new();
        let mut pending = PendingRegistry::new();
        pending.insert(PendingOp {
            resource_id: "web1".into(),
            call_id: 1,
            verb: Verb::Start,
            interval_ms: 0,
            transition_key: None,
            cancelled: false,
            remove: false,
            restart_list: None,
            digest: None,
        });
        let history = HistoryCache::new();

        let result = verify_stopped(ControlState::Other, true, Some(&exec), &mut pending, &history).await;
        assert_eq!(result, VerifyStopped::NotStopped { remaining_nonrecurring: 1 });
    }

    #[tokio::test]
    async fn verify_stopped_forces_stopped_in_terminal_state() {
        let mut pending = PendingRegistry::new();
        pending.insert(PendingOp {
            resource_id: "web1".into(),
            call_id: 1,
            verb: Verb::Start,
            interval_ms: 0,
            transition_key: None,
            cancelled: false,
            remove: false,
            restart_list: None,
            digest: None,
        });
        let history = HistoryCache::new();

        let result = verify_stopped(ControlState::Terminate, false, None, &mut pending, &history).await;
        assert_eq!(result, VerifyStopped::Stopped);
    }
}
