//! Admission filtering of bucket inserts.

use crate::error::Result;
use crate::object::{MetricData, MetricObject};

/// Gate consulted before every bucket insert.
///
/// Implementations veto an insert by returning a `FilterRejected` error;
/// `Ok(())` admits the object. Filters run before any capacity or duplicate
/// checks, so a rejected object leaves no trace in the bucket.
pub trait AdmissionFilter<T: MetricData>: Send + Sync {
    /// Decide whether `object` may enter the bucket.
    fn check_insert(&self, object: &MetricObject<T>) -> Result<()>;
}
