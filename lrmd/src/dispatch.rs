//! The invocation dispatcher (spec §4.6): turns a TE request into executor
//! calls, short-circuiting `cancel` and `delete`.

use std::collections::HashMap;

use crate::cib::Cib;
use crate::config::BridgeConfig;
use crate::digest;
use crate::error::LrmError;
use crate::executor::{DeleteResult, Executor, SubmitResult};
use crate::fsm::ControlState;
use crate::history::HistoryCache;
use crate::op::{Op, ResourceDescriptor, Verb};
use crate::pending::{PendingDeletion, PendingDeletions, PendingOp, PendingRegistry};
use crate::reload_cache::ReloadCache;
use crate::te::{Ack, LrmRequest, RequestVerb};

/// Everything the dispatcher mutates, borrowed for the duration of one
/// `dispatch` call.
pub struct DispatchContext<'a> {
    pub executor: &'a dyn Executor,
    pub cib: &'a dyn Cib,
    pub descriptors: &'a mut HashMap<String, ResourceDescriptor>,
    pub pending: &'a mut PendingRegistry,
    pub deletions: &'a mut PendingDeletions,
    pub reload_cache: &'a mut ReloadCache,
    pub history: &'a mut HistoryCache,
    pub config: &'a BridgeConfig,
    pub peer_feature_set: &'a str,
}

/// Only `stop` and `fail` are legal outside the states where executing is
/// permitted (spec §4.6 "Preconditions").
fn verb_permitted_outside_legal_state(verb: Verb) -> bool {
    matches!(verb, Verb::Stop | Verb::Fail)
}

/// Dispatch a single TE request (spec §4.6). Returns `Some(ack)` when the
/// caller must send an immediate direct ack; `None` means the result will
/// arrive later via the completion processor.
pub async fn dispatch(ctx: &mut DispatchContext<'_>, state: ControlState, request: &LrmRequest) -> Option<Ack> {
    match request.verb {
        RequestVerb::Cancel => Some(dispatch_cancel(ctx, request).await),
        RequestVerb::Delete => dispatch_delete(ctx, request).await,
        RequestVerb::Invoke | RequestVerb::Fail => dispatch_invoke(ctx, state, request).await,
        RequestVerb::Reprobe => Some(dispatch_reprobe(ctx, request).await),
        RequestVerb::Query | RequestVerb::Refresh | RequestVerb::Probed => {
            // No contract beyond acceptance is specified for these (spec
            // §9); reprobe is the only one of the four with mandated
            // ordering.
            None
        }
    }
}

/// Reprobe (spec §9): forget every known resource through the executor,
/// erase the CIB's LRM subtree, then clear the node's "probed" attribute.
/// This ordering is intentional and must be preserved exactly.
async fn dispatch_reprobe(ctx: &mut DispatchContext<'_>, request: &LrmRequest) -> Ack {
    let resource_ids: Vec<String> = ctx.history.active_resources().map(|id| id.to_string()).collect();

    for id in &resource_ids {
        ctx.executor.delete_resource(id).await;
        ctx.descriptors.remove(id);
    }

    ctx.cib.erase_lrm_subtree(&ctx.config.system_name).await;
    ctx.cib.clear_probed_attribute(&ctx.config.system_name).await;

    for id in &resource_ids {
        ctx.history.purge(id);
    }

    Ack::ok(&request.origin, &request.resource_id, request.fragment.transition_key.clone())
}

async fn dispatch_invoke(ctx: &mut DispatchContext<'_>, state: ControlState, request: &LrmRequest) -> Option<Ack> {
    let verb: Verb = match request.fragment.operation.as_deref() {
        Some(op_name) => match op_name.parse() {
            Ok(v) => v,
            Err(err) => return Some(Ack::error(&request.origin, &request.resource_id, None, &err)),
        },
        None => {
            let err = LrmError::InvalidRequest("request carries no operation".into());
            return Some(Ack::error(&request.origin, &request.resource_id, None, &err));
        }
    };

    if !state.executing_is_legal() && !verb_permitted_outside_legal_state(verb) {
        let err = LrmError::IllegalInState {
            verb: verb.to_string(),
            state: format!("{state:?}"),
        };
        return Some(Ack::error(&request.origin, &request.resource_id, request.fragment.transition_key.clone(), &err));
    }

    let op = Op::from_request(&request.resource_id, verb, &request.fragment);

    resolve_or_register(ctx, request).await;

    if verb.drains_recurring() {
        ctx.pending.drain_recurring_for(ctx.executor, &request.resource_id).await;
    }

    let key = op.op_key();
    if op.is_recurring() {
        ctx.pending.cancel_by_op_key(ctx.executor, &request.resource_id, &key).await;
    }

    let restart_digest = if verb == Verb::Start {
        compute_restart_digest(ctx, request, &op).await
    } else {
        None
    };

    match ctx.executor.perform_op(&request.resource_id, &op).await {
        SubmitResult::Accepted(call_id) => {
            ctx.pending.insert(PendingOp {
                resource_id: request.resource_id.clone(),
                call_id,
                verb,
                interval_ms: op.interval_ms,
                transition_key: request.fragment.transition_key.clone(),
                cancelled: false,
                remove: false,
                restart_list: restart_digest.as_ref().map(|d| d.restart_list.clone()),
                digest: restart_digest.as_ref().map(|d| d.digest.clone()),
            });

            if op.is_recurring() && op.start_delay_ms > ctx.config.start_delay_ack_threshold_ms {
                return Some(Ack::ok(&request.origin, &request.resource_id, request.fragment.transition_key.clone()));
            }
            None
        }
        SubmitResult::Rejected => {
            let err = LrmError::SubmissionFailed {
                resource_id: request.resource_id.clone(),
                reason: "executor rejected perform-op".into(),
            };
            tracing::error!(resource = %request.resource_id, "{err}");
            Some(Ack::error(&request.origin, &request.resource_id, request.fragment.transition_key.clone(), &err))
        }
    }
}

async fn resolve_or_register(ctx: &mut DispatchContext<'_>, request: &LrmRequest) {
    if ctx.descriptors.contains_key(&request.resource_id) {
        return;
    }
    if ctx.executor.get_resource(&request.resource_id).await {
        if let Some(descriptor) = &request.fragment.descriptor {
            ctx.descriptors.insert(request.resource_id.clone(), descriptor.clone());
        }
        return;
    }
    let Some(descriptor) = &request.fragment.descriptor else {
        let err = LrmError::UnknownResource(request.resource_id.clone());
        tracing::debug!("{err}");
        return;
    };
    ctx.executor
        .add_resource(
            &descriptor.id,
            &descriptor.class,
            &descriptor.agent_type,
            descriptor.provider.as_deref(),
            &request.fragment.params,
        )
        .await;
    ctx.descriptors.insert(request.resource_id.clone(), descriptor.clone());
}

async fn compute_restart_digest(ctx: &mut DispatchContext<'_>, request: &LrmRequest, op: &Op) -> Option<digest::RestartDigest> {
    let descriptor = ctx.descriptors.get(&request.resource_id)?.clone();
    let restart_params = ctx.reload_cache.lookup(ctx.executor, &descriptor, true).await;
    if restart_params.is_empty() {
        return None;
    }
    digest::build(&op.params, &restart_params, ctx.peer_feature_set, &ctx.config.reload_aware_feature_set)
}

/// Cancel short-circuit (spec §4.6): never touches the executor for
/// submission, only for the cancel call itself. Ops the executor confirms
/// cancelled right away have their CIB entry pruned by actual call id;
/// ops still pending are left marked for removal when their completion
/// arrives (spec §4.7 step 5).
async fn dispatch_cancel(ctx: &mut DispatchContext<'_>, request: &LrmRequest) -> Ack {
    let verb: Result<Verb, _> = request.fragment.operation.as_deref().unwrap_or("").parse();
    let interval_ms = request.fragment.meta_i64("interval").unwrap_or(0).max(0) as u64;

    if let Ok(verb) = verb {
        let key = crate::op::op_key(verb, interval_ms);
        let removed_call_ids = ctx.pending.cancel_by_op_key(ctx.executor, &request.resource_id, &key).await;
        for call_id in removed_call_ids {
            ctx.cib.delete_op_entry(&request.resource_id, call_id, true).await;
        }
    }
    // A cancel for an unknown op is not an error; the graph edge is simply
    // confirmed either way (spec §4.6).
    Ack::ok(&request.origin, &request.resource_id, request.fragment.transition_key.clone())
}

/// Delete short-circuit (spec §4.6). Returns `None` when the executor
/// reports busy: the ack is withheld until the executor's async "resource
/// deleted" signal arrives as a later completion event.
async fn dispatch_delete(ctx: &mut DispatchContext<'_>, request: &LrmRequest) -> Option<Ack> {
    if !ctx.cib.can_delete(&request.resource_id).await {
        let err = LrmError::PermissionDenied {
            resource_id: request.resource_id.clone(),
        };
        return Some(Ack::error(&request.origin, &request.resource_id, request.fragment.transition_key.clone(), &err));
    }

    match ctx.executor.delete_resource(&request.resource_id).await {
        DeleteResult::Ok => {
            ctx.descriptors.remove(&request.resource_id);
            Some(Ack::ok(&request.origin, &request.resource_id, request.fragment.transition_key.clone()))
        }
        DeleteResult::Busy => {
            ctx.deletions.insert(PendingDeletion {
                resource_id: request.resource_id.clone(),
                transition_key: request.fragment.transition_key.clone(),
            });
            None
        }
    }
}
