//! Namespace NAT
//!
//! A bijection between home namespace names and their foreign
//! counterparts. Mappings are created lazily on the first translation
//! that allows creation and are never silently re-mapped afterwards.
//! The table is an explicitly owned instance whose lifetime is the
//! peering session, not a process-wide singleton.

use dashmap::DashMap;
use tracing::debug;

use crate::error::{Error, Result};

/// Bidirectional namespace-name mapper consumed by reflectors.
///
/// Law: for every name `n` successfully mapped,
/// `denat_namespace(nat_namespace(n, true)) == n`.
pub trait NamespaceNatting: Send + Sync {
    /// Map a home namespace name to its foreign counterpart.
    ///
    /// With `create_if_absent` the mapping is established on first use;
    /// without it, a missing mapping is a hard failure for that
    /// translation.
    fn nat_namespace(&self, name: &str, create_if_absent: bool) -> Result<String>;

    /// Map a foreign namespace name back to its home original
    fn denat_namespace(&self, name: &str) -> Result<String>;
}

/// In-memory NAT table scoped to one peering session.
///
/// Foreign names are derived as `"{home}-{cluster_id}"`, which keeps the
/// mapping readable in logs on both clusters.
pub struct NattingTable {
    cluster_id: String,
    home_to_foreign: DashMap<String, String>,
    foreign_to_home: DashMap<String, String>,
}

impl NattingTable {
    /// Create an empty table for the peering identified by `cluster_id`
    pub fn new(cluster_id: impl Into<String>) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            home_to_foreign: DashMap::new(),
            foreign_to_home: DashMap::new(),
        }
    }

    /// Record an externally decided mapping (e.g. restored from the
    /// persistence collaborator at peering setup).
    ///
    /// Fails if either name is already mapped to something else: an
    /// established mapping is never re-mapped.
    pub fn insert_mapping(&self, home: &str, foreign: &str) -> Result<()> {
        if let Some(existing) = self.home_to_foreign.get(home) {
            if existing.value() != foreign {
                return Err(Error::config(format!(
                    "namespace {} is already mapped to {}",
                    home,
                    existing.value()
                )));
            }
            return Ok(());
        }
        if self.foreign_to_home.contains_key(foreign) {
            return Err(Error::config(format!(
                "foreign namespace {} is already mapped",
                foreign
            )));
        }
        self.home_to_foreign
            .insert(home.to_string(), foreign.to_string());
        self.foreign_to_home
            .insert(foreign.to_string(), home.to_string());
        Ok(())
    }

    /// Number of established mappings
    pub fn len(&self) -> usize {
        self.home_to_foreign.len()
    }

    /// Whether no mappings are established yet
    pub fn is_empty(&self) -> bool {
        self.home_to_foreign.is_empty()
    }
}

impl NamespaceNatting for NattingTable {
    fn nat_namespace(&self, name: &str, create_if_absent: bool) -> Result<String> {
        if let Some(mapped) = self.home_to_foreign.get(name) {
            return Ok(mapped.value().clone());
        }
        if !create_if_absent {
            return Err(Error::translation(
                name,
                "no NAT mapping for namespace and creation is disallowed",
            ));
        }

        let foreign = format!("{}-{}", name, self.cluster_id);
        // Two reflectors can race to create the same mapping; the entry
        // API makes the first insert win and everyone read it back.
        let mapped = self
            .home_to_foreign
            .entry(name.to_string())
            .or_insert_with(|| foreign.clone())
            .value()
            .clone();
        self.foreign_to_home
            .entry(mapped.clone())
            .or_insert_with(|| name.to_string());

        debug!(home = %name, foreign = %mapped, "Established namespace NAT mapping");
        Ok(mapped)
    }

    fn denat_namespace(&self, name: &str) -> Result<String> {
        self.foreign_to_home
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| {
                Error::translation(name, "no reverse NAT mapping for foreign namespace")
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nat_round_trip() {
        let table = NattingTable::new("peer-1");
        let foreign = table.nat_namespace("ns-a", true).expect("nat succeeds");
        assert_eq!(foreign, "ns-a-peer-1");
        assert_eq!(
            table.denat_namespace(&foreign).expect("denat succeeds"),
            "ns-a"
        );
    }

    #[test]
    fn test_missing_mapping_without_create_fails() {
        let table = NattingTable::new("peer-1");
        let err = table.nat_namespace("ns-a", false).unwrap_err();
        assert!(matches!(err, Error::Translation { .. }));
        assert!(table.is_empty());
    }

    #[test]
    fn test_mapping_is_stable_across_calls() {
        let table = NattingTable::new("peer-1");
        let first = table.nat_namespace("ns-a", true).expect("nat succeeds");
        let second = table.nat_namespace("ns-a", false).expect("lookup succeeds");
        assert_eq!(first, second);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_denat_unknown_namespace_fails() {
        let table = NattingTable::new("peer-1");
        assert!(table.denat_namespace("stranger").is_err());
    }

    #[test]
    fn test_insert_mapping_rejects_remap() {
        let table = NattingTable::new("peer-1");
        table
            .insert_mapping("ns-a", "ns-a-peer")
            .expect("first mapping succeeds");
        // Same pair again is fine.
        table
            .insert_mapping("ns-a", "ns-a-peer")
            .expect("idempotent re-insert succeeds");
        // A different target for an established name is not.
        assert!(table.insert_mapping("ns-a", "elsewhere").is_err());
        assert!(table.insert_mapping("ns-b", "ns-a-peer").is_err());
    }

    #[test]
    fn test_round_trip_for_many_names() {
        let table = NattingTable::new("peer-9");
        for name in ["default", "kube-system", "team-a", "team-b"] {
            let mapped = table.nat_namespace(name, true).expect("nat succeeds");
            assert_eq!(table.denat_namespace(&mapped).expect("denat"), name);
        }
        assert_eq!(table.len(), 4);
    }
}
