//! Field-level change detection for polled telemetry
//!
//! Polling the same status queries once a second produces a stream of
//! mostly-identical records. The [`DiffEngine`] keeps the last accepted
//! record per query and reports which field indices (and which named
//! groups) actually changed, so listeners only react to movement.
//!
//! Comparison is exact string equality on the raw fields. A device that
//! reformats a value without changing its meaning (`1.0` to `1.00`) will
//! report a change; schemas carry no type metadata that would allow a
//! numeric comparison, and in practice these firmwares format stably.

use std::collections::HashMap;

use serde::Serialize;
use tracing::trace;

use crate::telemetry::record::{FieldSchema, QueryId, ResponseRecord};

/// The set of field indices and groups that changed in one observation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChangeSet {
    /// Payload field indices whose value differs from the cached record.
    pub indices: Vec<usize>,
    /// Names of schema groups containing at least one changed index.
    pub groups: Vec<&'static str>,
}

impl ChangeSet {
    /// True when nothing changed
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Whether a specific field index changed
    pub fn contains(&self, index: usize) -> bool {
        self.indices.contains(&index)
    }

    /// Whether any index of the named group changed
    pub fn group_changed(&self, name: &str) -> bool {
        self.groups.iter().any(|g| *g == name)
    }
}

/// Per-query cache of the last accepted record, with change reporting.
///
/// The cache only ever sees successfully decoded records; a failed poll
/// leaves the previous snapshot in place so the next success is compared
/// against real data, not against a gap.
#[derive(Debug, Default)]
pub struct DiffEngine {
    cache: HashMap<QueryId, Vec<String>>,
}

impl DiffEngine {
    /// Create an empty diff engine
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare a freshly decoded record against the cached one.
    ///
    /// The first observation of a query reports every field as changed.
    /// Afterwards an index is reported when its value differs from the
    /// cache or when it did not exist in the cached record. The new record
    /// replaces the cache entry.
    pub fn observe(&mut self, schema: &FieldSchema, record: &ResponseRecord) -> ChangeSet {
        let fields = record.fields();
        let previous = self.cache.get(&record.query);

        let mut indices = Vec::new();
        for (i, value) in fields.iter().enumerate() {
            let changed = match previous {
                Some(old) => old.get(i) != Some(value),
                None => true,
            };
            if changed {
                indices.push(i);
            }
        }

        let mut groups = Vec::new();
        for group in schema.groups {
            if group.indices.iter().any(|i| indices.contains(i)) {
                groups.push(group.name);
            }
        }

        if !indices.is_empty() {
            trace!(
                "{}: {} of {} fields changed {:?}",
                record.query,
                indices.len(),
                fields.len(),
                groups
            );
        }

        self.cache.insert(record.query, fields.to_vec());
        ChangeSet { indices, groups }
    }

    /// Last accepted field values for a query, if any
    pub fn cached(&self, query: QueryId) -> Option<&[String]> {
        self.cache.get(&query).map(Vec::as_slice)
    }

    /// Drop every cached record.
    ///
    /// Called on disconnect so a later session starts from a clean
    /// first-observation state.
    pub fn clear(&mut self) {
        self.cache.clear();
    }
}
