//! The reload metadata cache (spec §4.2): remembers, per agent triple,
//! whether it advertises a `reload` action and which parameters force a
//! restart.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::executor::Executor;
use crate::op::ResourceDescriptor;
use crate::xml::AgentMetaData;

#[derive(Debug, Clone)]
struct ReloadRecord {
    can_reload: bool,
    restart_params: Vec<String>,
    queried_at: Instant,
}

impl ReloadRecord {
    fn unreloadable(now: Instant) -> Self {
        Self {
            can_reload: false,
            restart_params: Vec::new(),
            queried_at: now,
        }
    }

    fn from_metadata(meta: &AgentMetaData, now: Instant) -> Self {
        let can_reload = meta.supports_action("reload");
        let restart_params = if can_reload {
            meta.unique_parameters().map(str::to_string).collect()
        } else {
            Vec::new()
        };
        Self {
            can_reload,
            restart_params,
            queried_at: now,
        }
    }
}

/// Keyed by `"type::class:provider"` (spec §4.2).
pub struct ReloadCache {
    records: HashMap<String, ReloadRecord>,
    negative_ttl: Duration,
}

impl ReloadCache {
    pub fn new(negative_ttl: Duration) -> Self {
        Self {
            records: HashMap::new(),
            negative_ttl,
        }
    }

    /// Look up the restart-parameter list for `descriptor`, re-querying the
    /// executor's `meta-data` path when necessary (spec §4.2).
    ///
    /// `is_start` gates the negative-TTL re-query: only start operations
    /// are allowed to refresh a cached "cannot reload" record.
    pub async fn lookup(&mut self, executor: &dyn Executor, descriptor: &ResourceDescriptor, is_start: bool) -> Vec<String> {
        let key = descriptor.reload_cache_key();
        let now = Instant::now();

        if let Some(record) = self.records.get(&key) {
            if record.can_reload {
                return record.restart_params.clone();
            }
            let stale = is_start && now.duration_since(record.queried_at) >= self.negative_ttl;
            if !stale {
                return Vec::new();
            }
        }

        let record = match executor
            .get_metadata(&descriptor.class, &descriptor.agent_type, descriptor.provider.as_deref())
            .await
        {
            Some(xml) => match AgentMetaData::parse(&xml) {
                Ok(meta) => ReloadRecord::from_metadata(&meta, now),
                Err(_) => ReloadRecord::unreloadable(now),
            },
            None => ReloadRecord::unreloadable(now),
        };

        let restart_params = record.restart_params.clone();
        self.records.insert(key, record);
        restart_params
    }
}
