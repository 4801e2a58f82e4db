use crate::relay::metrics::{CACHE_FLUSHES_TOTAL, CACHE_ITEMS};
use crate::trie::PrefixIndex;
use crate::types::{DnsQuestion, ResourceRecord};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Clone)]
struct CachedItem {
    record: ResourceRecord,
    expires_at: u64,
}

/// Answer cache keyed by the canonical question name.
///
/// Records are stored with an absolute expiry (unix seconds) and handed out with the TTL
/// rewritten to the seconds remaining. Expired records are never returned but keep occupying the
/// budget until the next flush.
///
/// Eviction is a full flush: once the number of inserted items reaches the limit, the whole
/// index is dropped and rebuilt empty. Callers only observe "present and unexpired" versus
/// "absent", so a finer-grained policy could replace this without changing the contract.
pub struct DnsCache {
    index: PrefixIndex<Vec<CachedItem>>,
    limit: usize,
    items: usize,
    flushes: u64,
}

impl DnsCache {
    /// A limit of zero disables caching: every insert flushes immediately.
    pub fn new(item_limit: usize) -> Self {
        tracing::info!("[cache] Initialized with a limit of {} item(s)", item_limit);
        Self { index: PrefixIndex::new(), limit: item_limit, items: 0, flushes: 0 }
    }

    pub fn insert(&mut self, question: &DnsQuestion, record: &ResourceRecord) {
        self.insert_at(question, record, now_secs());
    }

    /// Stores a copy of `record` under the question's name, expiring `record.ttl` seconds
    /// after `now`.
    pub fn insert_at(&mut self, question: &DnsQuestion, record: &ResourceRecord, now: u64) {
        let id = self.index.insert(&question.name.canonical_key());
        let item = CachedItem {
            record: record.clone(),
            expires_at: now.saturating_add(u64::from(record.ttl)),
        };
        if let Some(list) = self.index.value_or_insert_with(id, Vec::new) {
            list.push(item);
        }
        self.items += 1;

        if self.items >= self.limit {
            tracing::debug!("[cache] Limit of {} reached, flushing {} item(s)", self.limit, self.items);
            self.flush();
            CACHE_FLUSHES_TOTAL.inc();
        }
        CACHE_ITEMS.set(self.items as i64);
    }

    pub fn query(&self, question: &DnsQuestion) -> Vec<ResourceRecord> {
        self.query_at(question, now_secs())
    }

    /// Unexpired records matching the question's type and class, in insertion order, with TTLs
    /// counting down from `now`.
    pub fn query_at(&self, question: &DnsQuestion, now: u64) -> Vec<ResourceRecord> {
        let Some(list) = self.index.get(&question.name.canonical_key()) else {
            return Vec::new();
        };
        list.iter()
            .filter(|item| item.expires_at > now && item.record.matches(question))
            .map(|item| {
                let mut record = item.record.clone();
                record.ttl = u32::try_from(item.expires_at - now).unwrap_or(u32::MAX);
                record
            })
            .collect()
    }

    pub fn flush(&mut self) {
        self.index.clear();
        self.items = 0;
        self.flushes += 1;
    }

    /// Items inserted since the last flush, expired ones included.
    pub fn resident_items(&self) -> usize {
        self.items
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn flushes(&self) -> u64 {
        self.flushes
    }
}

pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Name, CLASS_IN, TYPE_A, TYPE_AAAA};

    fn question(name: &str, qtype: u16) -> DnsQuestion {
        DnsQuestion { name: name.parse().unwrap(), qtype, qclass: CLASS_IN }
    }

    fn a_record(name: &str, ttl: u32, last_octet: u8) -> ResourceRecord {
        ResourceRecord {
            name: name.parse::<Name>().unwrap(),
            rtype: TYPE_A,
            class: CLASS_IN,
            ttl,
            rdata: vec![192, 0, 2, last_octet],
        }
    }

    #[test]
    fn fresh_entry_reports_remaining_ttl() {
        let mut cache = DnsCache::new(100);
        let q = question("example.com", TYPE_A);
        cache.insert_at(&q, &a_record("example.com", 300, 1), 1_000);

        let hit = cache.query_at(&q, 1_000);
        assert_eq!(hit.len(), 1);
        assert_eq!(hit[0].ttl, 300);

        let later = cache.query_at(&q, 1_120);
        assert_eq!(later[0].ttl, 180);
    }

    #[test]
    fn entry_disappears_once_ttl_elapses() {
        let mut cache = DnsCache::new(100);
        let q = question("example.com", TYPE_A);
        cache.insert_at(&q, &a_record("example.com", 60, 1), 1_000);

        assert_eq!(cache.query_at(&q, 1_059).len(), 1);
        assert!(cache.query_at(&q, 1_060).is_empty());
        // still counted until flushed
        assert_eq!(cache.resident_items(), 1);
    }

    #[test]
    fn zero_ttl_is_never_served() {
        let mut cache = DnsCache::new(100);
        let q = question("example.com", TYPE_A);
        cache.insert_at(&q, &a_record("example.com", 0, 1), 1_000);
        assert!(cache.query_at(&q, 1_000).is_empty());
    }

    #[test]
    fn only_matching_type_is_returned() {
        let mut cache = DnsCache::new(100);
        let qa = question("example.com", TYPE_A);
        cache.insert_at(&qa, &a_record("example.com", 60, 1), 0);
        cache.insert_at(&qa, &a_record("example.com", 60, 2), 0);

        let both = cache.query_at(&qa, 0);
        assert_eq!(both.iter().map(|r| r.rdata[3]).collect::<Vec<_>>(), vec![1, 2]);
        assert!(cache.query_at(&question("example.com", TYPE_AAAA), 0).is_empty());
    }

    #[test]
    fn lookup_ignores_name_case() {
        let mut cache = DnsCache::new(100);
        cache.insert_at(&question("Example.COM", TYPE_A), &a_record("Example.COM", 60, 1), 0);
        assert_eq!(cache.query_at(&question("example.com", TYPE_A), 0).len(), 1);
    }

    #[test]
    fn reaching_the_limit_flushes_everything() {
        let limit = 4;
        let mut cache = DnsCache::new(limit);
        assert_eq!(cache.limit(), limit);
        for i in 0..=limit {
            let name = format!("host{i}.example");
            cache.insert_at(&question(&name, TYPE_A), &a_record(&name, 60, i as u8), 0);
            assert!(cache.resident_items() < limit);
        }
        assert_eq!(cache.flushes(), 1);
        assert!(cache.query_at(&question("host0.example", TYPE_A), 0).is_empty());
        assert_eq!(cache.query_at(&question("host4.example", TYPE_A), 0).len(), 1);
    }

    #[test]
    fn zero_limit_disables_caching() {
        let mut cache = DnsCache::new(0);
        let q = question("example.com", TYPE_A);
        cache.insert_at(&q, &a_record("example.com", 60, 1), 0);
        assert!(cache.query_at(&q, 0).is_empty());
        assert_eq!(cache.resident_items(), 0);
    }
}
