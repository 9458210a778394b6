//! Inbound requests from the transition engine / controller, and the
//! direct-ack channel the bridge uses to confirm graph edges without
//! waiting for CIB convergence (spec §6 "TE / controller input").
//!
//! The ack-delivery shape mirrors `common::wait_registry`'s subject-keyed
//! waiter bookkeeping: callers address an ack to the system that asked,
//! rather than blocking on a reply.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::LrmError;
use crate::xml::RequestFragment;

/// The `lrm_invoke` verb family (spec §6), distinct from [`crate::op::Verb`]
/// which only covers verbs actually dispatched to the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestVerb {
    Invoke,
    Cancel,
    Delete,
    Fail,
    Query,
    Refresh,
    Reprobe,
    Probed,
}

impl std::str::FromStr for RequestVerb {
    type Err = LrmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "invoke" => RequestVerb::Invoke,
            "cancel" => RequestVerb::Cancel,
            "delete" => RequestVerb::Delete,
            "fail" => RequestVerb::Fail,
            "query" => RequestVerb::Query,
            "refresh" => RequestVerb::Refresh,
            "reprobe" => RequestVerb::Reprobe,
            "probed" => RequestVerb::Probed,
            other => return Err(LrmError::InvalidRequest(format!("unknown request verb '{other}'"))),
        })
    }
}

/// A request from the TE/controller (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LrmRequest {
    pub verb: RequestVerb,
    pub resource_id: String,
    /// The system/host that sent the request, used to address the ack.
    pub origin: String,
    pub fragment: RequestFragment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckStatus {
    Ok,
    Error,
}

/// A direct acknowledgement addressed back to the requesting system
/// (spec §6, §4.6, §4.7).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub to: String,
    pub resource_id: String,
    pub transition_key: Option<String>,
    pub status: AckStatus,
    pub rc: i32,
    pub message: Option<String>,
}

impl Ack {
    pub fn ok(to: impl Into<String>, resource_id: impl Into<String>, transition_key: Option<String>) -> Self {
        Self {
            to: to.into(),
            resource_id: resource_id.into(),
            transition_key,
            status: AckStatus::Ok,
            rc: 0,
            message: None,
        }
    }

    pub fn error(
        to: impl Into<String>,
        resource_id: impl Into<String>,
        transition_key: Option<String>,
        err: &LrmError,
    ) -> Self {
        Self {
            to: to.into(),
            resource_id: resource_id.into(),
            transition_key,
            status: AckStatus::Error,
            rc: -1,
            message: Some(err.to_string()),
        }
    }
}

/// Where the bridge delivers acks; swappable so tests can assert on what
/// was sent without a real TE connection (spec §6).
#[async_trait]
pub trait AckSink: Send + Sync + 'static {
    async fn send(&self, ack: Ack);
}

pub mod fake {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct FakeAckSink {
        sent: Mutex<Vec<Ack>>,
    }

    impl FakeAckSink {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn sent(&self) -> Vec<Ack> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AckSink for FakeAckSink {
        async fn send(&self, ack: Ack) {
            self.sent.lock().unwrap().push(ack);
        }
    }
}
