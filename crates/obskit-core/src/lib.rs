//! # ObsKit Core
//!
//! Core types, traits, and telemetry primitives for ObsKit.
//! Provides the error taxonomy, the delimited-record decoder, the
//! field-level diff engine, and the listener interface the higher layers
//! notify.

pub mod error;
pub mod listener;
pub mod telemetry;

pub use error::{Error, ProtocolError, Result, TransportError};
pub use listener::{CycleReport, QueryFailure, TelemetryListener, TelemetryListenerHandle};
pub use telemetry::{ChangeSet, DiffEngine, FieldGroup, FieldSchema, QueryId, ResponseRecord};
