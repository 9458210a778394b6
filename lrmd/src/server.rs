//! The daemon's event loop: a single Tokio task owns the [`bridge::LrmBridge`]
//! and pumps inbound TE requests and executor completions into it, mirroring
//! `storage::server::run_server`'s cancellation-token-driven shutdown.
//!
//! The TE wire protocol and the executor/CIB transport are out of scope
//! (spec §1); this loop is the integration seam a deployment wires a real
//! listener into via `requests_tx`/`completions_tx`.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::bridge::LrmBridge;
use crate::cib::Cib;
use crate::config::BridgeConfig;
use crate::executor::{CompletionEvent, Executor};
use crate::fsm::ControlState;
use crate::te::{AckSink, LrmRequest};

pub struct ServerHandles {
    pub requests_tx: mpsc::Sender<LrmRequest>,
    pub completions_tx: mpsc::Sender<(CompletionEvent, String)>,
    pub join: tokio::task::JoinHandle<()>,
}

/// Construct the bridge, connect it, and run its event loop until either
/// the channels close or `shutdown_signal` fires.
pub async fn run_server(
    executor: Arc<dyn Executor>,
    cib: Arc<dyn Cib>,
    ack_sink: Arc<dyn AckSink>,
    config: BridgeConfig,
) -> Result<ServerHandles> {
    let (requests_tx, requests_rx) = mpsc::channel(256);
    let (completions_tx, completions_rx) = mpsc::channel(256);

    let mut bridge = LrmBridge::new(executor, cib, config);
    bridge.connect().await?;

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        eosin_common::shutdown::shutdown_signal().await;
        signal_cancel.cancel();
    });

    eosin_common::signal_ready();

    let join = tokio::spawn(event_loop(bridge, requests_rx, completions_rx, ack_sink, cancel));

    Ok(ServerHandles {
        requests_tx,
        completions_tx,
        join,
    })
}

async fn event_loop(
    mut bridge: LrmBridge,
    mut requests_rx: mpsc::Receiver<LrmRequest>,
    mut completions_rx: mpsc::Receiver<(CompletionEvent, String)>,
    ack_sink: Arc<dyn AckSink>,
    cancel: CancellationToken,
) {
    // The controller's own FSM state is driven externally in the real
    // daemon; this bridge sees it only as an input to the dispatcher.
    let state = ControlState::TransitionEngine;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("shutdown requested, verifying quiescence");
                match bridge.verify_stopped(ControlState::Terminate).await {
                    crate::fsm::VerifyStopped::Stopped => break,
                    crate::fsm::VerifyStopped::NotStopped { remaining_nonrecurring } => {
                        tracing::warn!(remaining_nonrecurring, "exiting with pending operations outstanding");
                        break;
                    }
                }
            }
            Some(request) = requests_rx.recv() => {
                if let Some(ack) = bridge.handle_request(state, &request).await {
                    ack_sink.send(ack).await;
                }
            }
            Some((event, origin)) = completions_rx.recv() => {
                if let Some(ack) = bridge.handle_completion(event, &origin).await {
                    ack_sink.send(ack).await;
                }
            }
            else => break,
        }
    }

    tracing::info!("lrmd event loop stopped");
}
