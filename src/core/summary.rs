//! Purpose: Aggregate every version of each logical key into one `KeySummary`.
//! Exports: `KeySummary`, `KeySummaryStats`, `Aggregator`, `list_key_summaries`.
//! Role: Backing data for prefix listings (field projection and templates).
//! Invariants: `version_count` counts physical records for the key.
//! Invariants: Latest-version fields follow the highest version seen in one pass, in any arrival order.
//! Invariants: Results are sorted by byte-wise key order with no duplicates.
use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;

use crate::core::encoding::{self, TypeMeta};
use crate::core::error::Error;
use crate::core::record::VersionedRecord;
use crate::core::walk::{Flow, Snapshot};

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct KeySummaryStats {
    pub version_count: u64,
    pub key_size: u64,
    pub value_size: u64,
    pub all_versions_key_size: u64,
    pub all_versions_value_size: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct KeySummary {
    /// Display form of the key; invalid UTF-8 is replaced.
    pub key: String,
    /// The key exactly as stored; identity and sort order follow these bytes.
    #[serde(skip)]
    pub key_bytes: Vec<u8>,
    /// Highest version observed for the key.
    pub version: i64,
    /// Decoded object of the highest version, when it decoded.
    pub value: Option<Value>,
    pub type_meta: Option<TypeMeta>,
    pub stats: KeySummaryStats,
}

impl KeySummary {
    fn first(record: &VersionedRecord) -> Self {
        let decoded = encoding::decode_object(&record.value);
        let key_size = record.key.len() as u64;
        let value_size = record.value.len() as u64;
        Self {
            key: record.key_str(),
            key_bytes: record.key.clone(),
            version: record.version,
            value: decoded.object,
            type_meta: decoded.type_meta,
            stats: KeySummaryStats {
                version_count: 1,
                key_size,
                value_size,
                all_versions_key_size: key_size,
                all_versions_value_size: value_size,
            },
        }
    }

    fn observe(&mut self, record: &VersionedRecord) {
        self.stats.version_count += 1;
        self.stats.all_versions_key_size += record.key.len() as u64;
        self.stats.all_versions_value_size += record.value.len() as u64;
        if record.version > self.version {
            let decoded = encoding::decode_object(&record.value);
            self.version = record.version;
            self.stats.value_size = record.value.len() as u64;
            self.value = decoded.object;
            self.type_meta = decoded.type_meta;
        }
    }

    /// The JSON object templates are evaluated against.
    pub fn template_view(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Working state of one aggregation pass.
#[derive(Debug, Default)]
pub struct Aggregator {
    prefix: Vec<u8>,
    summaries: HashMap<Vec<u8>, KeySummary>,
}

impl Aggregator {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.as_bytes().to_vec(),
            summaries: HashMap::new(),
        }
    }

    pub fn observe(&mut self, record: &VersionedRecord) {
        if !record.key.starts_with(&self.prefix) {
            return;
        }
        match self.summaries.get_mut(&record.key) {
            Some(summary) => summary.observe(record),
            None => {
                self.summaries
                    .insert(record.key.clone(), KeySummary::first(record));
            }
        }
    }

    pub fn finish(self) -> Vec<KeySummary> {
        let mut entries = self.summaries.into_iter().collect::<Vec<_>>();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries.into_iter().map(|(_, summary)| summary).collect()
    }
}

pub fn list_key_summaries(snapshot: &Snapshot, prefix: &str) -> Result<Vec<KeySummary>, Error> {
    let mut aggregator = Aggregator::new(prefix);
    snapshot.walk(|record| {
        aggregator.observe(record);
        Ok(Flow::Continue)
    })?;
    let summaries = aggregator.finish();
    tracing::debug!(prefix, keys = summaries.len(), "aggregated key summaries");
    Ok(summaries)
}
