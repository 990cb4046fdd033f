//! Vendor metric event schema
//!
//! This module defines the closed set of metric kinds the pipeline
//! understands. Each kind carries its own typed payload and writes exactly one
//! field of a daily record.

mod metric_event;

pub use metric_event::*;
