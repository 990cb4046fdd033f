//! Vendor payload adapters
//!
//! This module provides adapters that parse raw vendor API responses into
//! typed [`MetricEvent`]s.

mod ultrahuman;

pub use ultrahuman::UltrahumanAdapter;

use crate::error::FetchError;
use crate::schema::MetricEvent;

/// Trait for vendor payload adapters
pub trait VendorPayloadAdapter {
    /// Parse one raw JSON response. `label` names the request (usually its
    /// date) in error messages.
    fn parse(&self, raw_json: &str, label: &str) -> Result<Vec<MetricEvent>, FetchError>;
}
