//! Delimited telemetry records
//!
//! Instruments in this family answer status queries with a single line of
//! delimiter-separated fields, usually prefixed with an echo of the query
//! name (`PA:1:0:...`). This module turns such a line into a
//! [`ResponseRecord`] validated against the [`FieldSchema`] the device
//! family declares for the query.
//!
//! The decoder is deliberately dumb: it splits, it counts, and it stores
//! raw strings. Interpreting a field as a number or a flag is the caller's
//! job, which keeps unit quirks out of the decode path.

use std::fmt;

use serde::Serialize;

use crate::error::{ProtocolError, Result};

/// Identifier of a telemetry query, the command mnemonic sent on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct QueryId(pub &'static str);

impl QueryId {
    /// The mnemonic as a string slice
    pub fn as_str(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A named subset of a record's field indices.
///
/// Groups let consumers subscribe to coarse-grained change notifications
/// ("environment", "power_ports") without knowing individual field
/// positions. Indices beyond the record's actual length are tolerated and
/// simply never report a change.
#[derive(Debug, Clone, Copy)]
pub struct FieldGroup {
    /// The group name reported in change sets.
    pub name: &'static str,
    /// The record field indices the group covers.
    pub indices: &'static [usize],
}

/// Shape of the response record a query is expected to produce.
///
/// Declared statically per device family. `min_fields` counts the indexed
/// payload fields only; when `labeled` is set the leading echo token is
/// consumed before counting.
#[derive(Debug, Clone, Copy)]
pub struct FieldSchema {
    /// The query this schema describes.
    pub query: QueryId,
    /// The delimiter separating fields on the wire.
    pub delimiter: char,
    /// Whether the first delimited token is an echo of the query name.
    pub labeled: bool,
    /// Minimum number of payload fields for the record to be accepted.
    pub min_fields: usize,
    /// Named field groups for change reporting.
    pub groups: &'static [FieldGroup],
}

/// One decoded device response line.
///
/// Fields are raw strings exactly as received; empty fields are preserved
/// so positions stay stable. For labeled schemas the echo token is kept as
/// `label` and excluded from the indexed fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResponseRecord {
    /// The query that produced this record.
    pub query: QueryId,
    /// The echo token stripped from a labeled response, if any.
    pub label: Option<String>,
    fields: Vec<String>,
}

impl ResponseRecord {
    /// Decode a boundary-stripped response line against a schema.
    ///
    /// Splits on the schema delimiter, preserving empty fields. Returns
    /// `SchemaMismatch` when fewer than `min_fields` payload fields remain;
    /// extra fields are tolerated so firmware revisions can append to a
    /// record without breaking older consumers.
    pub fn decode(line: &str, schema: &FieldSchema) -> Result<Self> {
        let mut fields: Vec<String> = line.split(schema.delimiter).map(str::to_string).collect();

        let label = if schema.labeled && !fields.is_empty() {
            Some(fields.remove(0))
        } else {
            None
        };

        if fields.len() < schema.min_fields {
            return Err(ProtocolError::SchemaMismatch {
                query: schema.query.to_string(),
                expected: schema.min_fields,
                actual: fields.len(),
            }
            .into());
        }

        Ok(Self {
            query: schema.query,
            label,
            fields,
        })
    }

    /// Access a payload field by index
    pub fn field(&self, index: usize) -> Option<&str> {
        self.fields.get(index).map(String::as_str)
    }

    /// All payload fields in wire order
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Number of payload fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True when the record carries no payload fields
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
