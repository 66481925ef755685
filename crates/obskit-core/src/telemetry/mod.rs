//! Telemetry record decoding and change detection

pub mod diff;
pub mod record;

pub use diff::{ChangeSet, DiffEngine};
pub use record::{FieldGroup, FieldSchema, QueryId, ResponseRecord};
