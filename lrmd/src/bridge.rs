//! `LrmBridge`: the aggregate tying the three registries, the reload cache
//! and the control FSM together (spec §9 "Global mutable state").
//!
//! Owned by a single Tokio task; every method takes `&mut self` and is
//! meant to be called only from that task's event loop (spec §5).

use std::collections::HashMap;
use std::sync::Arc;

use crate::cib::Cib;
use crate::config::BridgeConfig;
use crate::dispatch::{self, DispatchContext};
use crate::error::{LrmError, LrmResult};
use crate::executor::{CompletionEvent, Executor};
use crate::fsm::{self, ConnectionLossOutcome, ControlState, ReconnectPolicy, VerifyStopped};
use crate::history::HistoryCache;
use crate::op::ResourceDescriptor;
use crate::pending::{PendingDeletions, PendingRegistry};
use crate::reload_cache::ReloadCache;
use crate::te::{Ack, LrmRequest};

pub struct LrmBridge {
    executor: Arc<dyn Executor>,
    cib: Arc<dyn Cib>,
    config: BridgeConfig,
    peer_feature_set: String,

    descriptors: HashMap<String, ResourceDescriptor>,
    pending: PendingRegistry,
    history: HistoryCache,
    deletions: PendingDeletions,
    reload_cache: ReloadCache,

    connected: bool,
}

impl LrmBridge {
    pub fn new(executor: Arc<dyn Executor>, cib: Arc<dyn Cib>, config: BridgeConfig) -> Self {
        let reload_cache = ReloadCache::new(config.reload_negative_ttl());
        Self {
            executor,
            cib,
            peer_feature_set: config.reload_aware_feature_set.clone(),
            config,
            descriptors: HashMap::new(),
            pending: PendingRegistry::new(),
            history: HistoryCache::new(),
            deletions: PendingDeletions::new(),
            reload_cache,
            connected: false,
        }
    }

    /// Updates the DC peer's advertised feature-set, used to gate restart
    /// digest attachment (spec §4.5).
    pub fn set_peer_feature_set(&mut self, feature_set: impl Into<String>) {
        self.peer_feature_set = feature_set.into();
    }

    /// Sign on to the executor and prime the history cache (spec §4.8 "On
    /// connect").
    pub async fn connect(&mut self) -> LrmResult<()> {
        let policy = ReconnectPolicy {
            max_attempts: self.config.max_reconnect_attempts,
            interval: self.config.reconnect_interval(),
        };
        fsm::connect(self.executor.as_ref(), &self.config.system_name, policy).await?;
        fsm::prime_history(self.executor.as_ref(), &mut self.history).await;
        self.connected = true;
        Ok(())
    }

    /// Sign off, permitted only once [`Self::verify_stopped`] reports
    /// stopped (spec §4.8 "On disconnect").
    pub async fn disconnect(&mut self, state: ControlState) -> LrmResult<()> {
        match self.verify_stopped(state).await {
            VerifyStopped::Stopped => {
                self.executor.signoff().await;
                self.connected = false;
                Ok(())
            }
            VerifyStopped::NotStopped { remaining_nonrecurring } => Err(LrmError::IllegalInState {
                verb: "disconnect".to_string(),
                state: format!("{remaining_nonrecurring} pending ops outstanding"),
            }),
        }
    }

    /// Handle an unexpected executor connection loss (spec §4.8, §7).
    pub fn on_connection_lost(&mut self) -> ConnectionLossOutcome {
        let outcome = fsm::on_connection_lost(self.connected);
        self.connected = false;
        outcome
    }

    pub async fn verify_stopped(&mut self, state: ControlState) -> VerifyStopped {
        let executor = if self.connected { Some(self.executor.as_ref()) } else { None };
        fsm::verify_stopped(state, self.connected, executor, &mut self.pending, &self.history).await
    }

    /// Dispatch an inbound TE request (spec §4.6).
    pub async fn handle_request(&mut self, state: ControlState, request: &LrmRequest) -> Option<Ack> {
        let mut ctx = DispatchContext {
            executor: self.executor.as_ref(),
            cib: self.cib.as_ref(),
            descriptors: &mut self.descriptors,
            pending: &mut self.pending,
            deletions: &mut self.deletions,
            reload_cache: &mut self.reload_cache,
            history: &mut self.history,
            config: &self.config,
            peer_feature_set: &self.peer_feature_set,
        };
        dispatch::dispatch(&mut ctx, state, request).await
    }

    /// Process an executor completion event (spec §4.7).
    pub async fn handle_completion(&mut self, event: CompletionEvent, origin: &str) -> Option<Ack> {
        if event.resource_deleted && self.deletions.contains(&event.resource_id) {
            self.deletions.remove(&event.resource_id);
        }
        let mut ctx = crate::completion::CompletionContext {
            cib: self.cib.as_ref(),
            pending: &mut self.pending,
            history: &mut self.history,
            config: &self.config,
        };
        crate::completion::process(&mut ctx, event, origin).await
    }

    pub fn history(&self) -> &HistoryCache {
        &self.history
    }

    pub fn pending(&self) -> &PendingRegistry {
        &self.pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cib::fake::FakeCib;
    use crate::executor::fake::FakeExecutor;

    fn bridge() -> LrmBridge {
        LrmBridge::new(Arc::new(FakeExecutor::new()), Arc::new(FakeCib::new()), BridgeConfig::default())
    }

    #[tokio::test]
    async fn connect_primes_history_and_marks_connected() {
        let mut b = bridge();
        assert!(b.connect().await.is_ok());
        assert!(b.connected);
    }

    #[tokio::test]
    async fn disconnect_succeeds_when_nothing_pending() {
        let mut b = bridge();
        b.connect().await.unwrap();
        assert!(b.disconnect(ControlState::Other).await.is_ok());
        assert!(!b.connected);
    }

    #[tokio::test]
    async fn connection_lost_while_connected_is_fatal() {
        let mut b = bridge();
        b.connect().await.unwrap();
        assert_eq!(b.on_connection_lost(), ConnectionLossOutcome::Fatal);
        assert!(!b.connected);
    }
}
