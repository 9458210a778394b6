//! The operation model (spec §3, §4.1): an immutable description of a
//! requested or completed action.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::xml::RequestFragment;

/// The closed set of action verbs an [`Op`] may carry (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verb {
    Start,
    Stop,
    Monitor,
    Promote,
    Demote,
    Migrate,
    MigrateFrom,
    MigrateTo,
    Notify,
    Delete,
    MetaData,
    Reload,
    Fail,
}

impl Verb {
    pub fn as_str(self) -> &'static str {
        match self {
            Verb::Start => "start",
            Verb::Stop => "stop",
            Verb::Monitor => "monitor",
            Verb::Promote => "promote",
            Verb::Demote => "demote",
            Verb::Migrate => "migrate",
            Verb::MigrateFrom => "migrate_from",
            Verb::MigrateTo => "migrate_to",
            Verb::Notify => "notify",
            Verb::Delete => "delete",
            Verb::MetaData => "meta-data",
            Verb::Reload => "reload",
            Verb::Fail => "fail",
        }
    }

    /// Verbs that, per spec §4.6 step 2, must drain recurring operations on
    /// the resource before being dispatched.
    pub fn drains_recurring(self) -> bool {
        matches!(
            self,
            Verb::Stop | Verb::Demote | Verb::Promote | Verb::Migrate | Verb::MigrateFrom | Verb::MigrateTo
        )
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Verb {
    type Err = crate::error::LrmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "start" => Verb::Start,
            "stop" => Verb::Stop,
            "monitor" => Verb::Monitor,
            "promote" => Verb::Promote,
            "demote" => Verb::Demote,
            "migrate" => Verb::Migrate,
            "migrate_from" => Verb::MigrateFrom,
            "migrate_to" => Verb::MigrateTo,
            "notify" => Verb::Notify,
            "delete" => Verb::Delete,
            "meta-data" => Verb::MetaData,
            "reload" => Verb::Reload,
            "fail" => Verb::Fail,
            other => {
                return Err(crate::error::LrmError::InvalidRequest(format!(
                    "unknown verb '{other}'"
                )));
            }
        })
    }
}

/// Outcome of a completed [`Op`] (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpStatus {
    Pending,
    Done,
    Cancelled,
    Timeout,
    Error,
    NotSupported,
}

/// The four fields only meaningful once an [`Op`] has completed, grouped so
/// a caller cannot set a return code without a status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpResult {
    pub status: OpStatus,
    pub rc: i32,
    pub output: Option<String>,
}

impl OpResult {
    pub fn new(status: OpStatus, rc: i32) -> Self {
        Self {
            status,
            rc,
            output: None,
        }
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = Some(output.into());
        self
    }
}

/// Immutable triple identifying a resource agent (spec §3).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub id: String,
    pub class: String,
    pub provider: Option<String>,
    pub agent_type: String,
}

impl ResourceDescriptor {
    pub const DEFAULT_PROVIDER: &'static str = "heartbeat";

    pub fn new(
        id: impl Into<String>,
        class: impl Into<String>,
        provider: Option<String>,
        agent_type: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            class: class.into(),
            provider,
            agent_type: agent_type.into(),
        }
    }

    /// Provider with the canonical default substituted, used whenever the
    /// triple is hashed into a cache key (spec §3, §4.2).
    pub fn provider(&self) -> &str {
        self.provider.as_deref().unwrap_or(Self::DEFAULT_PROVIDER)
    }

    /// The reload-cache key `"type::class:provider"` (spec §4.2).
    pub fn reload_cache_key(&self) -> String {
        format!("{}::{}:{}", self.agent_type, self.class, self.provider())
    }
}

/// A single action invocation (spec §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Op {
    pub resource_id: String,
    pub verb: Verb,
    pub interval_ms: u64,
    pub timeout_ms: u64,
    pub start_delay_ms: u64,
    pub params: BTreeMap<String, String>,
    /// Opaque DC graph-edge token; required for TE-originated ops, absent
    /// for system-initiated stops (spec §4.1).
    pub transition_key: Option<String>,
    /// Whether the executor should refresh agent parameters before
    /// invocation (set for start/monitor, cleared for stop, spec §4.1).
    pub copy_params: bool,
    /// Assigned once the executor accepts submission; `0` beforehand.
    pub call_id: i64,
    pub result: Option<OpResult>,
}

/// The CRM-meta parameter names a stop must be reduced to (spec §4.1).
const CRM_META_PREFIX: &str = "CRM_meta_";
const FEATURE_SET_ATTR: &str = "crm_feature_set";

impl Op {
    /// Build an [`Op`] from an inbound request fragment (spec §4.1).
    ///
    /// Applies the sanity defaults: negative interval clamps to 0,
    /// non-positive timeout defaults to the interval, negative start-delay
    /// clamps to 0, and start/stop with a non-zero interval is forced back
    /// to 0 (a configuration error, logged by the caller).
    pub fn from_request(resource_id: impl Into<String>, verb: Verb, req: &RequestFragment) -> Self {
        let resource_id = resource_id.into();

        let mut interval_ms = req.meta_i64("interval").unwrap_or(0).max(0) as u64;
        let mut timeout_ms = {
            let t = req.meta_i64("timeout").unwrap_or(0);
            if t > 0 { t as u64 } else { interval_ms }
        };
        let start_delay_ms = req.meta_i64("start_delay").unwrap_or(0).max(0) as u64;

        if matches!(verb, Verb::Start | Verb::Stop) && interval_ms != 0 {
            tracing::warn!(
                resource = %resource_id,
                verb = %verb,
                interval_ms,
                "start/stop operation requested with non-zero interval; forcing to 0"
            );
            interval_ms = 0;
            timeout_ms = if timeout_ms == 0 { interval_ms } else { timeout_ms };
        }

        let copy_params = matches!(verb, Verb::Start | Verb::Monitor);

        let params = if verb == Verb::Stop {
            reduce_to_stop_params(&req.params)
        } else {
            req.params.clone()
        };

        Op {
            resource_id,
            verb,
            interval_ms,
            timeout_ms,
            start_delay_ms,
            params,
            transition_key: req.transition_key.clone(),
            copy_params,
            call_id: 0,
            result: None,
        }
    }

    pub fn op_key(&self) -> String {
        op_key(self.verb, self.interval_ms)
    }

    pub fn is_recurring(&self) -> bool {
        self.interval_ms > 0
    }

    pub fn stop_id(&self) -> String {
        format!("{}:{}", self.resource_id, self.call_id)
    }
}

/// `"<verb>_<interval_ms>"` (spec §3, Glossary "Op key").
pub fn op_key(verb: Verb, interval_ms: u64) -> String {
    format!("{verb}_{interval_ms}")
}

fn reduce_to_stop_params(params: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    params
        .iter()
        .filter(|(k, _)| k.starts_with(CRM_META_PREFIX) || k.as_str() == FEATURE_SET_ATTR)
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frag(params: &[(&str, &str)]) -> RequestFragment {
        RequestFragment {
            params: params.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            transition_key: Some("tx-1".into()),
            descriptor: None,
            operation: None,
        }
    }

    #[test]
    fn negative_interval_clamped_to_zero() {
        let req = frag(&[("CRM_meta_interval", "-5")]);
        let op = Op::from_request("r1", Verb::Monitor, &req);
        assert_eq!(op.interval_ms, 0);
    }

    #[test]
    fn timeout_defaults_to_interval() {
        let req = frag(&[("CRM_meta_interval", "10000")]);
        let op = Op::from_request("r1", Verb::Monitor, &req);
        assert_eq!(op.timeout_ms, 10_000);
    }

    #[test]
    fn start_with_nonzero_interval_is_forced_to_zero() {
        let req = frag(&[("CRM_meta_interval", "5000")]);
        let op = Op::from_request("r1", Verb::Start, &req);
        assert_eq!(op.interval_ms, 0);
    }

    #[test]
    fn stop_params_reduced_to_crm_meta_subset() {
        let req = frag(&[
            ("configfile", "/etc/a.conf"),
            ("CRM_meta_timeout", "20000"),
            ("crm_feature_set", "3.19.0"),
        ]);
        let op = Op::from_request("r1", Verb::Stop, &req);
        assert_eq!(op.params.len(), 2);
        assert!(op.params.contains_key("CRM_meta_timeout"));
        assert!(op.params.contains_key("crm_feature_set"));
        assert!(!op.params.contains_key("configfile"));
    }

    #[test]
    fn start_copies_params_stop_does_not() {
        let req = frag(&[]);
        assert!(Op::from_request("r1", Verb::Start, &req).copy_params);
        assert!(Op::from_request("r1", Verb::Monitor, &req).copy_params);
        assert!(!Op::from_request("r1", Verb::Stop, &req).copy_params);
    }

    #[test]
    fn reload_cache_key_substitutes_default_provider() {
        let d = ResourceDescriptor::new("web1", "ocf", None, "apache");
        assert_eq!(d.reload_cache_key(), "apache::ocf:heartbeat");
    }
}
