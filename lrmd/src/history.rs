//! The resource-history cache (spec §4.4): the bridge's local mirror of
//! what it has told the CIB about each resource's most recent and
//! currently-recurring operations.

use std::collections::HashMap;

use crate::op::{OpStatus, Verb};

/// OCF return code for "not running" (used by the monitor remap rules).
pub const RC_NOT_RUNNING: i32 = 7;
/// OCF return code for "running as promoted/master".
pub const RC_RUNNING_MASTER: i32 = 8;

/// A single recorded op outcome, as projected into the CIB history
/// (spec §4.4, §4.5).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRecord {
    pub call_id: i64,
    pub verb: Verb,
    pub interval_ms: u64,
    pub status: OpStatus,
    pub rc: i32,
    pub expected_rc: i32,
    pub output: Option<String>,
    /// Restart-parameter list (space-delimited, spec §4.5 format) and
    /// digest, present only for starts whose agent declares unique
    /// parameters.
    pub restart_list: Option<String>,
    pub digest: Option<String>,
}

impl HistoryRecord {
    fn is_successful(&self) -> bool {
        self.status == OpStatus::Done && self.rc == self.expected_rc
    }

    fn is_monitor(&self) -> bool {
        self.verb == Verb::Monitor
    }

    pub(crate) fn is_failure(&self) -> bool {
        if self.status != OpStatus::Done {
            return true;
        }
        if self.rc == self.expected_rc {
            return false;
        }
        // Monitors legitimately report "not running" / "running as master"
        // without matching the expected rc; these are not failures
        // (spec §4.4, mirrored from the completion-processor remap).
        self.is_monitor() && matches!(self.rc, RC_NOT_RUNNING | RC_RUNNING_MASTER)
    }
}

/// Per-resource history: the last non-recurring outcome, the last failure,
/// and the live recurring-monitor list (spec §3, §4.4).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryEntry {
    pub last: Option<HistoryRecord>,
    pub failed: Option<HistoryRecord>,
    pub recurring: Vec<HistoryRecord>,
}

impl HistoryEntry {
    /// Whether this resource is "active": has a `last` entry that is
    /// neither a successful stop, a successful migrate, nor a monitor
    /// reporting "not running" (spec §4.4).
    pub fn is_active(&self) -> bool {
        match &self.last {
            None => false,
            Some(rec) => {
                if rec.verb == Verb::Stop && rec.is_successful() {
                    return false;
                }
                if matches!(rec.verb, Verb::Migrate | Verb::MigrateFrom | Verb::MigrateTo) && rec.is_successful() {
                    return false;
                }
                if rec.is_monitor() && rec.is_successful() && rec.rc == RC_NOT_RUNNING {
                    return false;
                }
                true
            }
        }
    }
}

/// Keyed by resource id (spec §4.4).
#[derive(Debug, Default)]
pub struct HistoryCache {
    entries: HashMap<String, HistoryEntry>,
}

impl HistoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(&self, resource_id: &str) -> Option<&HistoryEntry> {
        self.entries.get(resource_id)
    }

    pub fn purge(&mut self, resource_id: &str) {
        self.entries.remove(resource_id);
    }

    /// Apply a completion record to `resource_id`'s history (spec §4.4).
    ///
    /// `cancelled` and `purged` are decided by the caller from the raw
    /// completion event; `record` carries the already-classified outcome.
    pub fn record(&mut self, resource_id: &str, record: HistoryRecord, cancelled: bool, purged: bool) {
        if purged {
            self.purge(resource_id);
            return;
        }
        if record.verb == Verb::Notify || cancelled {
            return;
        }

        let entry = self.entries.entry(resource_id.to_string()).or_default();

        if record.is_failure() {
            entry.failed = Some(record.clone());
        }

        if record.interval_ms > 0 {
            entry.recurring.retain(|r| r.verb != record.verb || r.interval_ms != record.interval_ms);
            entry.recurring.push(record);
            return;
        }

        if record.is_successful() {
            let flush_recurring = record.verb != Verb::Monitor;
            entry.last = Some(record);
            if flush_recurring {
                entry.recurring.clear();
            }
        } else {
            entry.last = Some(record);
        }
    }

    /// Remove a single recurring entry matching `(verb, interval)`, used
    /// when the pending registry confirms a cancellation (spec §4.3).
    pub fn remove_recurring(&mut self, resource_id: &str, verb: Verb, interval_ms: u64) {
        if let Some(entry) = self.entries.get_mut(resource_id) {
            entry.recurring.retain(|r| !(r.verb == verb && r.interval_ms == interval_ms));
        }
    }

    pub fn active_resources(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(|(_, e)| e.is_active())
            .map(|(id, _)| id.as_str())
    }
}
