//! The completion processor (spec §4.7): turns an executor completion
//! event into history updates, CIB writes, and direct acks.

use crate::cib::{Cib, CibUpdateResult};
use crate::config::BridgeConfig;
use crate::error::LrmError;
use crate::executor::CompletionEvent;
use crate::history::{HistoryCache, HistoryRecord, RC_NOT_RUNNING, RC_RUNNING_MASTER};
use crate::op::{OpStatus, Verb, op_key};
use crate::pending::PendingRegistry;
use crate::te::Ack;

pub struct CompletionContext<'a> {
    pub cib: &'a dyn Cib,
    pub pending: &'a mut PendingRegistry,
    pub history: &'a mut HistoryCache,
    pub config: &'a BridgeConfig,
}

/// Normalise a raw executor status (spec §4.7 step 1). Unknown statuses
/// become `error`; the `(error, rc in {running-as-master, not-running})`
/// combination is remapped to `done` since these are legitimate monitor
/// outcomes, not failures.
fn normalise_status(status: OpStatus, rc: i32) -> OpStatus {
    if status == OpStatus::Error && matches!(rc, RC_NOT_RUNNING | RC_RUNNING_MASTER) {
        return OpStatus::Done;
    }
    status
}

/// Process one completion event, mutating history/pending and issuing
/// whatever CIB write and/or direct ack the event implies (spec §4.7).
pub async fn process(ctx: &mut CompletionContext<'_>, event: CompletionEvent, origin: &str) -> Option<Ack> {
    let status = normalise_status(event.status, event.rc);
    let key = op_key(event.verb, event.interval_ms);
    let stop_id = format!("{}:{}", event.resource_id, event.call_id);

    let pending = ctx.pending.lookup(&stop_id).cloned();
    let was_cancelled = pending.as_ref().map(|p| p.cancelled).unwrap_or(false);
    let should_remove = pending.as_ref().map(|p| p.remove).unwrap_or(false);
    let transition_key = pending
        .as_ref()
        .and_then(|p| p.transition_key.clone())
        .or_else(|| event.transition_key.clone());

    let record = HistoryRecord {
        call_id: event.call_id,
        verb: event.verb,
        interval_ms: event.interval_ms,
        status,
        rc: event.rc,
        expected_rc: expected_rc_for(transition_key.as_deref()),
        output: event.output.clone(),
        restart_list: pending.as_ref().and_then(|p| p.restart_list.clone()),
        digest: pending.as_ref().and_then(|p| p.digest.clone()),
    };

    if record.is_failure() && !was_cancelled {
        let err = LrmError::AgentFailure {
            resource_id: event.resource_id.clone(),
            rc: record.rc,
            expected_rc: record.expected_rc,
        };
        tracing::warn!("{err}");
    }

    let mut ack = None;

    if !was_cancelled {
        if event.verb == Verb::Notify {
            ack = Some(Ack::ok(origin, &event.resource_id, transition_key.clone()));
        } else {
            push_cib_update(ctx, &event, &record).await;
            if event.interval_ms == 0 {
                ack = Some(Ack::ok(origin, &event.resource_id, transition_key.clone()));
            }
        }
    } else if event.interval_ms == 0 {
        // A cancellation completing for a non-recurring op: typically an
        // administrator cleanup mid-flight (spec §4.7 step 4).
        ack = Some(Ack::ok(origin, &event.resource_id, transition_key.clone()));
    }

    if should_remove {
        ctx.cib.delete_op_entry(&event.resource_id, event.call_id, true).await;
    }

    if event.resource_deleted {
        ctx.cib.delete_resource(&event.resource_id, true).await;
    }

    ctx.pending.remove(&stop_id);

    ctx.history.record(&event.resource_id, record, was_cancelled, event.resource_deleted);

    ack
}

/// The DC encodes the predicted return code as the third colon-delimited
/// field of the transition key, `"<action-id>:<transition-id>:<target-rc>:
/// <crm-uuid>"` (spec §3, §4.1). A missing or malformed key (system-
/// initiated stops carry none) defaults to the ordinary success code 0;
/// monitors' extra legitimate non-zero outcomes are handled separately by
/// `HistoryRecord::is_failure`.
fn expected_rc_for(transition_key: Option<&str>) -> i32 {
    transition_key
        .and_then(|key| key.split(':').nth(2))
        .and_then(|field| field.parse().ok())
        .unwrap_or(0)
}

/// The ack already went out (or was withheld for a recurring op) regardless
/// of this write's outcome; a failure here is logged, never retried or
/// allowed to unwind the completion.
async fn push_cib_update(ctx: &mut CompletionContext<'_>, event: &CompletionEvent, record: &HistoryRecord) {
    let mut entry = ctx.history.entry(&event.resource_id).cloned().unwrap_or_default();
    if record.interval_ms > 0 {
        entry.recurring.retain(|r| r.verb != record.verb || r.interval_ms != record.interval_ms);
        entry.recurring.push(record.clone());
    } else {
        entry.last = Some(record.clone());
    }

    let warn_after = ctx.config.cib_update_warn_after();
    match ctx.cib.update_history(&event.resource_id, &entry).await {
        CibUpdateResult::Ok => {}
        CibUpdateResult::Failed => {
            let err = LrmError::CibUpdateFailed {
                resource_id: event.resource_id.clone(),
                reason: "update_history rejected by CIB".into(),
            };
            tracing::warn!(?warn_after, "{err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cib::fake::FakeCib;
    use crate::pending::PendingOp;
    use crate::te::AckStatus;

    fn ctx<'a>(cib: &'a FakeCib, pending: &'a mut PendingRegistry, history: &'a mut HistoryCache, config: &'a BridgeConfig) -> CompletionContext<'a> {
        CompletionContext { cib, pending, history, config }
    }

    fn event(resource_id: &str, verb: Verb, interval_ms: u64, call_id: i64, status: OpStatus, rc: i32) -> CompletionEvent {
        CompletionEvent {
            resource_id: resource_id.to_string(),
            verb,
            interval_ms,
            timeout_ms: 20_000,
            call_id,
            status,
            rc,
            output: None,
            resource_deleted: false,
            transition_key: None,
        }
    }

    #[test]
    fn expected_rc_is_parsed_from_transition_key_third_field() {
        assert_eq!(expected_rc_for(Some("3:4:8:uuid")), 8);
        assert_eq!(expected_rc_for(Some("1:2:0:abc")), 0);
        assert_eq!(expected_rc_for(None), 0);
        assert_eq!(expected_rc_for(Some("malformed")), 0);
    }

    #[tokio::test]
    async fn monitor_expected_rc_is_carried_from_transition_key_not_zeroed() {
        let cib = FakeCib::new();
        let mut pending = PendingRegistry::new();
        pending.insert(PendingOp {
            resource_id: "web1".into(),
            call_id: 9,
            verb: Verb::Monitor,
            interval_ms: 0,
            transition_key: Some("3:4:8:uuid".into()),
            cancelled: false,
            remove: false,
            restart_list: None,
            digest: None,
        });
        let mut history = HistoryCache::new();
        let config = BridgeConfig::default();
        let mut c = ctx(&cib, &mut pending, &mut history, &config);

        process(&mut c, event("web1", Verb::Monitor, 0, 9, OpStatus::Done, 8), "dc1").await;
        let entry = history.entry("web1").unwrap();
        assert_eq!(entry.last.unwrap().expected_rc, 8);
        assert!(entry.failed.is_none());
    }

    #[tokio::test]
    async fn successful_start_acks_and_updates_cib() {
        let cib = FakeCib::new();
        let mut pending = PendingRegistry::new();
        pending.insert(PendingOp {
            resource_id: "web1".into(),
            call_id: 1,
            verb: Verb::Start,
            interval_ms: 0,
            transition_key: Some("1:2:0:abc".into()),
            cancelled: false,
            remove: false,
            restart_list: Some(" configfile ".into()),
            digest: Some("deadbeef".into()),
        });
        let mut history = HistoryCache::new();
        let config = BridgeConfig::default();
        let mut c = ctx(&cib, &mut pending, &mut history, &config);

        let ack = process(&mut c, event("web1", Verb::Start, 0, 1, OpStatus::Done, 0), "dc1").await.unwrap();
        assert_eq!(ack.status, AckStatus::Ok);
        assert!(pending.lookup("web1:1").is_none());
        let cib_entry = cib.history_for("web1").unwrap();
        assert_eq!(cib_entry.last.unwrap().digest.as_deref(), Some("deadbeef"));
    }

    #[tokio::test]
    async fn recurring_completion_does_not_ack() {
        let cib = FakeCib::new();
        let mut pending = PendingRegistry::new();
        pending.insert(PendingOp {
            resource_id: "web1".into(),
            call_id: 2,
            verb: Verb::Monitor,
            interval_ms: 10_000,
            transition_key: None,
            cancelled: false,
            remove: false,
            restart_list: None,
            digest: None,
        });
        let mut history = HistoryCache::new();
        let config = BridgeConfig::default();
        let mut c = ctx(&cib, &mut pending, &mut history, &config);

        let ack = process(&mut c, event("web1", Verb::Monitor, 10_000, 2, OpStatus::Done, 0), "dc1").await;
        assert!(ack.is_none());
    }

    #[tokio::test]
    async fn notify_acks_without_cib_write() {
        let cib = FakeCib::new();
        let mut pending = PendingRegistry::new();
        pending.insert(PendingOp {
            resource_id: "web1".into(),
            call_id: 3,
            verb: Verb::Notify,
            interval_ms: 0,
            transition_key: None,
            cancelled: false,
            remove: false,
            restart_list: None,
            digest: None,
        });
        let mut history = HistoryCache::new();
        let config = BridgeConfig::default();
        let mut c = ctx(&cib, &mut pending, &mut history, &config);

        let ack = process(&mut c, event("web1", Verb::Notify, 0, 3, OpStatus::Done, 0), "dc1").await;
        assert!(ack.is_some());
        assert!(cib.history_for("web1").is_none());
    }

    #[tokio::test]
    async fn monitor_not_running_is_not_treated_as_failure() {
        let cib = FakeCib::new();
        let mut pending = PendingRegistry::new();
        pending.insert(PendingOp {
            resource_id: "web1".into(),
            call_id: 4,
            verb: Verb::Monitor,
            interval_ms: 0,
            transition_key: None,
            cancelled: false,
            remove: false,
            restart_list: None,
            digest: None,
        });
        let mut history = HistoryCache::new();
        let config = BridgeConfig::default();
        let mut c = ctx(&cib, &mut pending, &mut history, &config);

        process(&mut c, event("web1", Verb::Monitor, 0, 4, OpStatus::Error, RC_NOT_RUNNING), "dc1").await;
        let entry = history.entry("web1").unwrap();
        assert!(entry.failed.is_none());
        assert!(!entry.is_active());
    }

    #[tokio::test]
    async fn cancelled_nonrecurring_still_acks() {
        let cib = FakeCib::new();
        let mut pending = PendingRegistry::new();
        pending.insert(PendingOp {
            resource_id: "web1".into(),
            call_id: 5,
            verb: Verb::Monitor,
            interval_ms: 0,
            transition_key: None,
            cancelled: true,
            remove: true,
            restart_list: None,
            digest: None,
        });
        let mut history = HistoryCache::new();
        let config = BridgeConfig::default();
        let mut c = ctx(&cib, &mut pending, &mut history, &config);

        let ack = process(&mut c, event("web1", Verb::Monitor, 0, 5, OpStatus::Cancelled, 0), "dc1").await;
        assert!(ack.is_some());
        assert!(history.entry("web1").is_none());
    }

    #[tokio::test]
    async fn rc_mismatch_is_recorded_as_failure() {
        let cib = FakeCib::new();
        let mut pending = PendingRegistry::new();
        pending.insert(PendingOp {
            resource_id: "web1".into(),
            call_id: 8,
            verb: Verb::Start,
            interval_ms: 0,
            transition_key: Some("1:2:0:abc".into()),
            cancelled: false,
            remove: false,
            restart_list: None,
            digest: None,
        });
        let mut history = HistoryCache::new();
        let config = BridgeConfig::default();
        let mut c = ctx(&cib, &mut pending, &mut history, &config);

        process(&mut c, event("web1", Verb::Start, 0, 8, OpStatus::Done, 1), "dc1").await;
        let entry = history.entry("web1").unwrap();
        assert!(entry.failed.is_some());
    }

    #[tokio::test]
    async fn purge_removes_history_and_cib_projection_unconditionally() {
        let cib = FakeCib::new();
        cib.update_history(
            "web1",
            &crate::history::HistoryEntry {
                last: Some(HistoryRecord {
                    call_id: 1,
                    verb: Verb::Start,
                    interval_ms: 0,
                    status: OpStatus::Done,
                    rc: 0,
                    expected_rc: 0,
                    output: None,
                    restart_list: None,
                    digest: None,
                }),
                failed: None,
                recurring: Vec::new(),
            },
        )
        .await;
        let mut pending = PendingRegistry::new();
        let mut history = HistoryCache::new();
        history.record(
            "web1",
            HistoryRecord {
                call_id: 1,
                verb: Verb::Start,
                interval_ms: 0,
                status: OpStatus::Done,
                rc: 0,
                expected_rc: 0,
                output: None,
                restart_list: None,
                digest: None,
            },
            false,
            false,
        );
        let config = BridgeConfig::default();
        let mut c = ctx(&cib, &mut pending, &mut history, &config);

        let mut deleted_event = event("web1", Verb::Stop, 0, 6, OpStatus::Done, 0);
        deleted_event.resource_deleted = true;
        process(&mut c, deleted_event, "dc1").await;
        assert!(history.entry("web1").is_none());
        assert!(cib.history_for("web1").is_none());
    }
}
