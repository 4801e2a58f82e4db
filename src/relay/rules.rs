//! Static rule table: blocked names and locally configured answers.
//!
//! Built once from `(address, name)` pairs and read-only afterwards. The address `0.0.0.0`
//! marks a name as blocked; any other IPv4 address becomes a static `A` record, an IPv6
//! address a static `AAAA` record. Both indices are keyed by [`Name::canonical_key`].

use crate::error::RuleError;
use crate::trie::PrefixIndex;
use crate::types::{Name, ResourceRecord, CLASS_IN, TYPE_A, TYPE_AAAA};
use std::net::{IpAddr, Ipv4Addr};

pub const BLOCKED_SENTINEL: Ipv4Addr = Ipv4Addr::UNSPECIFIED;

/// One entry of the rules input, as produced by the rules-file loader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RulePair {
    pub line: usize,
    pub marker: String,
    pub name: String,
}

#[derive(Default)]
pub struct RuleTable {
    blocked: PrefixIndex<()>,
    configured: PrefixIndex<Vec<ResourceRecord>>,
}

impl RuleTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I>(pairs: I) -> Result<Self, RuleError>
    where
        I: IntoIterator<Item = RulePair>,
    {
        let mut table = Self::new();
        for pair in pairs {
            table.add_rule(&pair)?;
        }
        tracing::info!(
            "[rules] Loaded {} blocked and {} configured name(s)",
            table.blocked_len(),
            table.configured_len()
        );
        Ok(table)
    }

    pub fn add_rule(&mut self, pair: &RulePair) -> Result<(), RuleError> {
        let name: Name = pair
            .name
            .parse()
            .map_err(|source| RuleError::InvalidName { line: pair.line, source })?;
        let addr: IpAddr = pair.marker.parse().map_err(|_| RuleError::InvalidAddress {
            line: pair.line,
            marker: pair.marker.clone(),
        })?;

        match addr {
            IpAddr::V4(v4) if v4 == BLOCKED_SENTINEL => self.block(&name),
            IpAddr::V4(v4) => self.configure(name, TYPE_A, v4.octets().to_vec()),
            IpAddr::V6(v6) => self.configure(name, TYPE_AAAA, v6.octets().to_vec()),
        }
        Ok(())
    }

    pub fn block(&mut self, name: &Name) {
        self.blocked.insert(&name.canonical_key());
    }

    fn configure(&mut self, name: Name, rtype: u16, rdata: Vec<u8>) {
        let id = self.configured.insert(&name.canonical_key());
        let record = ResourceRecord { name, rtype, class: CLASS_IN, ttl: 0, rdata };
        if let Some(list) = self.configured.value_or_insert_with(id, Vec::new) {
            list.push(record);
        }
    }

    pub fn is_blocked(&self, name: &Name) -> bool {
        self.blocked.contains(&name.canonical_key())
    }

    /// Every static record configured for exactly this name; callers filter by type and class.
    pub fn configured_records(&self, name: &Name) -> Vec<ResourceRecord> {
        self.configured
            .get(&name.canonical_key())
            .cloned()
            .unwrap_or_default()
    }

    pub fn blocked_len(&self) -> usize {
        self.blocked.len()
    }

    pub fn configured_len(&self) -> usize {
        self.configured.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(line: usize, marker: &str, name: &str) -> RulePair {
        RulePair { line, marker: marker.to_string(), name: name.to_string() }
    }

    fn name(s: &str) -> Name {
        s.parse().unwrap()
    }

    #[test]
    fn sentinel_address_blocks() {
        let table = RuleTable::from_pairs([pair(1, "0.0.0.0", "blocked.example.")]).unwrap();
        assert!(table.is_blocked(&name("blocked.example")));
        assert!(table.is_blocked(&name("BLOCKED.example.")));
        assert!(table.configured_records(&name("blocked.example")).is_empty());
        assert_eq!(table.blocked_len(), 1);
        assert_eq!(table.configured_len(), 0);
    }

    #[test]
    fn blocking_is_exact_not_by_suffix_or_prefix() {
        let table = RuleTable::from_pairs([pair(1, "0.0.0.0", "ads.example")]).unwrap();
        assert!(!table.is_blocked(&name("example")));
        assert!(!table.is_blocked(&name("x.ads.example")));
        assert!(!table.is_blocked(&name("ads.example.org")));
    }

    #[test]
    fn address_becomes_static_a_record() {
        let table = RuleTable::from_pairs([pair(1, "10.0.0.5", "static.example.")]).unwrap();
        let records = table.configured_records(&name("static.example"));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].rtype, TYPE_A);
        assert_eq!(records[0].class, CLASS_IN);
        assert_eq!(records[0].ttl, 0);
        assert_eq!(records[0].rdata, vec![10, 0, 0, 5]);
        assert!(!table.is_blocked(&name("static.example")));
    }

    #[test]
    fn repeated_names_accumulate_records() {
        let table = RuleTable::from_pairs([
            pair(1, "10.0.0.1", "multi.example"),
            pair(2, "10.0.0.2", "multi.example"),
            pair(3, "2001:db8::1", "multi.example"),
        ])
        .unwrap();
        let records = table.configured_records(&name("multi.example"));
        assert_eq!(records.len(), 3);
        assert_eq!(records[2].rtype, TYPE_AAAA);
        assert_eq!(records[2].rdata.len(), 16);
        assert_eq!(table.configured_len(), 1);
    }

    #[test]
    fn name_in_both_sets_reports_both() {
        let table = RuleTable::from_pairs([
            pair(1, "10.0.0.9", "both.example"),
            pair(2, "0.0.0.0", "both.example"),
        ])
        .unwrap();
        assert!(table.is_blocked(&name("both.example")));
        assert_eq!(table.configured_records(&name("both.example")).len(), 1);
    }

    #[test]
    fn bad_address_reports_its_line() {
        let err = RuleTable::from_pairs([pair(7, "10.0.0.300", "x.example")]).err().unwrap();
        assert_eq!(
            err,
            RuleError::InvalidAddress { line: 7, marker: "10.0.0.300".to_string() }
        );
    }

    #[test]
    fn bad_name_reports_its_line() {
        let err = RuleTable::from_pairs([pair(3, "10.0.0.1", "a..b")]).err().unwrap();
        assert!(matches!(err, RuleError::InvalidName { line: 3, .. }));
    }
}
