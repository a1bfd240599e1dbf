//! Per-IP ordered hit history (C1). Used to enforce `prereq` chains: a
//! protected route only unlocks once the requesting IP's recent history
//! ends with the configured sequence of URIs, in order.
//!
//! No eviction: entries live for process lifetime (spec §3 Lifecycles --
//! "no TTL in the spec"). A long-running process accumulates state
//! unboundedly; this is a known, documented limitation, not a bug (see
//! DESIGN.md).

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;

#[derive(Default)]
pub struct ClientLedger {
    hits: Mutex<HashMap<IpAddr, Vec<String>>>,
}

impl ClientLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `uri` to `ip`'s history. Strict append order, no dedup.
    pub fn hit(&self, ip: IpAddr, uri: &str) {
        let mut hits = self.hits.lock().expect("ledger mutex poisoned");
        hits.entry(ip).or_default().push(uri.to_string());
    }

    /// True iff `ip`'s history ends with `prereqs`, in order. An empty
    /// `prereqs` is trivially true. A missing ledger with a non-empty
    /// `prereqs` is false.
    pub fn matches(&self, ip: &IpAddr, prereqs: &[String]) -> bool {
        if prereqs.is_empty() {
            return true;
        }
        let hits = self.hits.lock().expect("ledger mutex poisoned");
        let Some(history) = hits.get(ip) else {
            return false;
        };
        if prereqs.len() > history.len() {
            return false;
        }
        let tail = &history[history.len() - prereqs.len()..];
        tail == prereqs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn empty_prereq_is_trivially_true() {
        let ledger = ClientLedger::new();
        assert!(ledger.matches(&ip("1.2.3.4"), &[]));
    }

    #[test]
    fn missing_ledger_with_prereq_is_false() {
        let ledger = ClientLedger::new();
        assert!(!ledger.matches(&ip("1.2.3.4"), &["/a".to_string()]));
    }

    #[test]
    fn prereq_is_a_suffix_test_not_a_consume() {
        let ledger = ClientLedger::new();
        let addr = ip("1.2.3.4");
        ledger.hit(addr, "/a");
        let prereq = vec!["/a".to_string()];
        assert!(ledger.matches(&addr, &prereq));
        // Matching again does not consume the prereq.
        assert!(ledger.matches(&addr, &prereq));
    }

    #[test]
    fn prereq_must_match_trailing_subsequence_in_order() {
        let ledger = ClientLedger::new();
        let addr = ip("1.2.3.4");
        ledger.hit(addr, "/x");
        ledger.hit(addr, "/a");
        ledger.hit(addr, "/b");
        assert!(ledger.matches(&addr, &["/a".to_string(), "/b".to_string()]));
        assert!(!ledger.matches(&addr, &["/b".to_string(), "/a".to_string()]));
    }

    #[test]
    fn append_order_has_no_dedup() {
        let ledger = ClientLedger::new();
        let addr = ip("1.2.3.4");
        ledger.hit(addr, "/a");
        ledger.hit(addr, "/a");
        assert!(ledger.matches(&addr, &["/a".to_string(), "/a".to_string()]));
    }
}
