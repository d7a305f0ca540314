//! In-memory metadata index over the active backend.

use serde::Serialize;
use std::collections::BTreeMap;

use super::traits::{CacheType, EntryMeta};

/// Summary returned by `HybridCache::list_all`.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheSummary {
  pub total_entries: usize,
  pub total_size_bytes: u64,
  pub counts_by_type: BTreeMap<CacheType, usize>,
  pub entries: Vec<EntryMeta>,
}

/// Metadata of every entry in the backend, keyed by cache key.
#[derive(Debug, Default)]
pub struct MetadataIndex {
  entries: BTreeMap<String, EntryMeta>,
}

impl MetadataIndex {
  pub fn from_entries(entries: Vec<EntryMeta>) -> Self {
    Self {
      entries: entries.into_iter().map(|m| (m.key.clone(), m)).collect(),
    }
  }

  pub fn insert(&mut self, meta: EntryMeta) {
    self.entries.insert(meta.key.clone(), meta);
  }

  pub fn remove(&mut self, key: &str) -> Option<EntryMeta> {
    self.entries.remove(key)
  }

  pub fn clear(&mut self) {
    self.entries.clear();
  }

  pub fn contains(&self, key: &str) -> bool {
    self.entries.contains_key(key)
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  /// Keys matching `predicate`.
  pub fn keys_where<P>(&self, predicate: P) -> Vec<String>
  where
    P: Fn(&EntryMeta) -> bool,
  {
    self
      .entries
      .values()
      .filter(|m| predicate(m))
      .map(|m| m.key.clone())
      .collect()
  }

  /// Entries whose key starts with `prefix`, in key order.
  pub fn with_prefix(&self, prefix: &str) -> Vec<EntryMeta> {
    self
      .entries
      .range(prefix.to_string()..)
      .take_while(|(k, _)| k.starts_with(prefix))
      .map(|(_, m)| m.clone())
      .collect()
  }

  pub fn summary(&self) -> CacheSummary {
    let mut counts_by_type = BTreeMap::new();
    let mut total_size_bytes = 0;
    for meta in self.entries.values() {
      *counts_by_type.entry(meta.cache_type).or_insert(0) += 1;
      total_size_bytes += meta.size_bytes;
    }

    CacheSummary {
      total_entries: self.entries.len(),
      total_size_bytes,
      counts_by_type,
      entries: self.entries.values().cloned().collect(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::key::infer_type;

  fn meta(key: &str, size: usize) -> EntryMeta {
    EntryMeta::describe(key, &vec![b'x'; size], infer_type(key), None)
  }

  #[test]
  fn test_summary_counts_by_type() {
    let mut index = MetadataIndex::default();
    index.insert(meta("sales_l_c_20240101_20240102", 10));
    index.insert(meta("sales_l_c_20240103_20240104", 5));
    index.insert(meta("stockitems_l_c", 3));
    index.insert(meta("stockitems_l_c", 4));

    let summary = index.summary();
    assert_eq!(summary.total_entries, 3);
    assert_eq!(summary.total_size_bytes, 19);
    assert_eq!(summary.counts_by_type[&CacheType::Sales], 2);
    assert_eq!(summary.counts_by_type[&CacheType::Items], 1);
  }

  #[test]
  fn test_with_prefix() {
    let index = MetadataIndex::from_entries(vec![
      meta("sales_l_a_20240101_20240102", 1),
      meta("sales_l_b_20240101_20240102", 1),
      meta("sales_l_a_20240103_20240104", 1),
    ]);
    let found: Vec<String> = index
      .with_prefix("sales_l_a_")
      .into_iter()
      .map(|m| m.key)
      .collect();
    assert_eq!(
      found,
      vec!["sales_l_a_20240101_20240102", "sales_l_a_20240103_20240104"]
    );
  }
}
