//! The digest / restart-list builder (spec §4.5): attaches a
//! reload-vs-restart decision aid to a start operation's CIB history entry.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

/// Parse a dotted feature-set version (`"3.19.0"`) into a comparable tuple.
/// Malformed components are treated as `0`, matching the builder's "when
/// in doubt, assume unsupported" stance.
fn parse_feature_set(version: &str) -> (u32, u32, u32) {
    let mut parts = version.split('.').map(|p| p.parse().unwrap_or(0));
    (
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
    )
}

/// Whether `peer_feature_set` is at or above the minimum required to
/// understand restart-list/digest attributes (spec §4.5).
pub fn peer_supports_reload(peer_feature_set: &str, minimum: &str) -> bool {
    parse_feature_set(peer_feature_set) >= parse_feature_set(minimum)
}

/// The two CIB attributes a qualifying start operation carries
/// (spec §4.5 step 3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartDigest {
    /// Restart-parameter names, space-delimited and bracketed by spaces:
    /// `" p1  p2  p3 "`.
    pub restart_list: String,
    pub digest: String,
}

/// Build the restart-list/digest pair for a start operation, or `None` if
/// any precondition in spec §4.5 is unmet: the op has no parameters, the
/// peer doesn't support reload, or the agent declares no unique
/// parameters.
pub fn build(
    op_params: &BTreeMap<String, String>,
    unique_params: &[String],
    peer_feature_set: &str,
    reload_aware_minimum: &str,
) -> Option<RestartDigest> {
    if op_params.is_empty() || unique_params.is_empty() {
        return None;
    }
    if !peer_supports_reload(peer_feature_set, reload_aware_minimum) {
        return None;
    }

    let present: Vec<&str> = unique_params
        .iter()
        .map(String::as_str)
        .filter(|name| op_params.contains_key(*name))
        .collect();

    if present.is_empty() {
        return None;
    }

    let digest = compute_digest(&present, op_params, peer_feature_set);
    let restart_list = format!(" {} ", present.join("  "));

    Some(RestartDigest { restart_list, digest })
}

/// A stable digest of the synthetic parameter element: the sorted
/// `name=value` pairs of the restart-list parameters, joined and hashed.
/// Sort order is fixed (lexicographic by name) so two implementations that
/// agree on feature-set produce byte-identical digests (spec §4.5).
fn compute_digest(names: &[&str], params: &BTreeMap<String, String>, feature_set: &str) -> String {
    let mut sorted: Vec<&str> = names.to_vec();
    sorted.sort_unstable();

    let mut hasher = Sha256::new();
    hasher.update(feature_set.as_bytes());
    for name in sorted {
        hasher.update(b"\0");
        hasher.update(name.as_bytes());
        hasher.update(b"=");
        hasher.update(params.get(name).map(String::as_str).unwrap_or("").as_bytes());
    }

    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_unique_params_means_no_digest() {
        let mut params = BTreeMap::new();
        params.insert("configfile".to_string(), "/etc/a.conf".to_string());
        assert!(build(&params, &[], "3.19.0", "3.0.5").is_none());
    }

    #[test]
    fn old_peer_feature_set_skips_digest() {
        let mut params = BTreeMap::new();
        params.insert("configfile".to_string(), "/etc/a.conf".to_string());
        let unique = vec!["configfile".to_string()];
        assert!(build(&params, &unique, "3.0.1", "3.0.5").is_none());
    }

    #[test]
    fn digest_present_and_stable_across_calls() {
        let mut params = BTreeMap::new();
        params.insert("configfile".to_string(), "/etc/a.conf".to_string());
        params.insert("statusurl".to_string(), "/status".to_string());
        let unique = vec!["configfile".to_string()];

        let a = build(&params, &unique, "3.19.0", "3.0.5").unwrap();
        let b = build(&params, &unique, "3.19.0", "3.0.5").unwrap();

        assert_eq!(a, b);
        assert_eq!(a.restart_list, " configfile ");
    }

    #[test]
    fn restart_list_excludes_params_not_present_on_op() {
        let mut params = BTreeMap::new();
        params.insert("statusurl".to_string(), "/status".to_string());
        let unique = vec!["configfile".to_string(), "statusurl".to_string()];

        let built = build(&params, &unique, "3.19.0", "3.0.5").unwrap();
        assert_eq!(built.restart_list, " statusurl ");
    }
}
