//! Metric objects: payload contract, keys, filter chains and codecs.
//!
//! Everything stored and searched by this crate is a [`MetricObject`]: a
//! caller-supplied payload implementing [`MetricData`], an [`ObjectKey`]
//! (locator plus optional sort key), a [`FilterChain`] of precomputed
//! distances, and opaque supplemental data. The payload's distance function
//! is expected to respect the metric-space axioms (non-negativity, symmetry,
//! triangle inequality); the framework relies on the triangle inequality for
//! pruning correctness but does not enforce it.

pub mod codec;
pub mod filter;
pub mod impls;
pub mod key;

use std::any::Any;
use std::hash::Hash;
use std::sync::Arc;

pub use filter::{FilterChain, FilterRecord, FilterTag, PivotArrayFilter, PivotMapFilter};
pub use key::ObjectKey;

/// Distance value reserved for "not known".
pub const UNKNOWN_DISTANCE: f32 = f32::NEG_INFINITY;
/// Minimal possible distance.
pub const MIN_DISTANCE: f32 = 0.0;
/// Maximal possible distance, used as the sentinel answer threshold.
pub const MAX_DISTANCE: f32 = f32::MAX;

/// Stable (within one process) hash of a value, used for data-equality
/// indexing in no-duplicate buckets.
pub fn stable_hash<H: Hash + ?Sized>(value: &H) -> u64 {
    // Fixed seeds so that every call site agrees on the hash of equal data.
    ahash::RandomState::with_seeds(
        0x243f_6a88_85a3_08d3,
        0x1319_8a2e_0370_7344,
        0xa409_3822_299f_31d0,
        0x082e_fa98_ec4e_6c89,
    )
    .hash_one(value)
}

/// Contract for the payload of a metric object.
///
/// Implementors provide the distance function and the data-equality notion
/// used for duplicate detection. Data-equality is distinct from the storage
/// identity a bucket assigns internally: two data-equal objects are still
/// two separate stored entries unless the bucket is a no-duplicate variant.
pub trait MetricData: Clone + Send + Sync + 'static {
    /// Metric distance between `self` and `other`.
    ///
    /// `threshold` is a hint: when the implementation can tell that the
    /// distance exceeds it, any value greater than `threshold` may be
    /// returned instead of the exact distance (early abort). Callers that
    /// need the exact value pass [`MAX_DISTANCE`].
    fn distance(&self, other: &Self, threshold: f32) -> f32;

    /// Data-equality used for duplicate detection.
    fn data_eq(&self, other: &Self) -> bool;

    /// Hash consistent with [`MetricData::data_eq`], stable within a
    /// process. Used by the no-duplicate index for O(log n) lookups.
    fn data_hash(&self) -> u64;
}

/// A data item stored in a bucket and ranked by queries.
#[derive(Clone)]
pub struct MetricObject<T: MetricData> {
    key: ObjectKey,
    data: T,
    filters: FilterChain,
    supp: Option<Arc<dyn Any + Send + Sync>>,
}

impl<T: MetricData + std::fmt::Debug> std::fmt::Debug for MetricObject<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Supplemental data is opaque and skipped.
        f.debug_struct("MetricObject")
            .field("key", &self.key)
            .field("data", &self.data)
            .field("filters", &self.filters)
            .finish_non_exhaustive()
    }
}

impl<T: MetricData> MetricObject<T> {
    /// Create an object with the given locator and payload.
    pub fn new<S: Into<String>>(locator: S, data: T) -> Self {
        MetricObject {
            key: ObjectKey::new(locator),
            data,
            filters: FilterChain::new(),
            supp: None,
        }
    }

    /// Create an object with an explicit key.
    pub fn with_key(key: ObjectKey, data: T) -> Self {
        MetricObject {
            key,
            data,
            filters: FilterChain::new(),
            supp: None,
        }
    }

    /// The key of this object.
    pub fn key(&self) -> &ObjectKey {
        &self.key
    }

    /// The locator URI of this object.
    pub fn locator(&self) -> &str {
        self.key.locator()
    }

    /// The payload of this object.
    pub fn data(&self) -> &T {
        &self.data
    }

    /// The filter chain of this object.
    pub fn filters(&self) -> &FilterChain {
        &self.filters
    }

    /// Mutable access to the filter chain of this object.
    pub fn filters_mut(&mut self) -> &mut FilterChain {
        &mut self.filters
    }

    /// Attach opaque supplemental data. The framework never interprets it.
    pub fn set_supp_data(&mut self, supp: Arc<dyn Any + Send + Sync>) {
        self.supp = Some(supp);
    }

    /// The supplemental data attached to this object, if any.
    pub fn supp_data(&self) -> Option<&Arc<dyn Any + Send + Sync>> {
        self.supp.as_ref()
    }

    /// Exact metric distance to `other` with a threshold hint.
    ///
    /// A directly precomputed distance from the filter chain is used when
    /// available, skipping the payload distance function entirely.
    pub fn distance_to(&self, other: &MetricObject<T>, threshold: f32) -> f32 {
        if let Some(d) = self.filters.precomputed_distance(other.locator()) {
            return d;
        }
        self.data.distance(&other.data, threshold)
    }

    /// Exact metric distance to `other` without a threshold hint.
    pub fn distance(&self, other: &MetricObject<T>) -> f32 {
        self.distance_to(other, MAX_DISTANCE)
    }

    /// Proof that `other` lies farther than `radius`, using precomputed
    /// distances only. `false` proves nothing.
    pub fn exclude_by_filter(&self, other: &MetricObject<T>, radius: f32) -> bool {
        if self.filters.is_empty() || other.filters.is_empty() {
            return false;
        }
        self.filters.exclude(&other.filters, radius)
    }

    /// Proof that `other` lies within `radius`, using precomputed distances
    /// only. `false` proves nothing.
    pub fn include_by_filter(&self, other: &MetricObject<T>, radius: f32) -> bool {
        if self.filters.is_empty() || other.filters.is_empty() {
            return false;
        }
        self.filters.include(&other.filters, radius)
    }

    /// Data-equality with another object.
    pub fn data_eq(&self, other: &MetricObject<T>) -> bool {
        self.data.data_eq(&other.data)
    }

    /// Strip supplemental data and the filter chain.
    ///
    /// Called before an object crosses a trust boundary, so that locally
    /// precomputed state does not leak out with it.
    pub fn clear_surplus_data(&mut self) {
        self.supp = None;
        self.filters = FilterChain::new();
    }

    /// Compute and append distances to `pivots` as a [`PivotArrayFilter`]
    /// record, replacing an existing record of that type.
    pub fn attach_pivot_distances(&mut self, pivots: &[MetricObject<T>]) {
        let mut filter = PivotArrayFilter::new();
        for pivot in pivots {
            filter.push_distance(self.data.distance(&pivot.data, MAX_DISTANCE));
        }
        self.filters
            .chain(FilterRecord::PivotArray(filter), true);
    }
}

#[cfg(test)]
mod tests {
    use super::impls::FloatVector;
    use super::*;

    fn obj(locator: &str, values: &[f32]) -> MetricObject<FloatVector> {
        MetricObject::new(locator, FloatVector::new(values.to_vec()))
    }

    #[test]
    fn test_distance_uses_precomputed_getter() {
        let mut a = obj("a", &[0.0]);
        let b = obj("b", &[10.0]);

        let mut map = PivotMapFilter::new();
        map.insert_distance("b", 42.0);
        a.filters_mut().chain(FilterRecord::PivotMap(map), false);

        assert_eq!(a.distance(&b), 42.0);
        // No precomputed entry for "c": the real distance is computed.
        let c = obj("c", &[3.0]);
        assert_eq!(a.distance(&c), 3.0);
    }

    #[test]
    fn test_attach_pivot_distances() {
        let mut a = obj("a", &[0.0]);
        let pivots = vec![obj("p1", &[1.0]), obj("p2", &[5.0])];
        a.attach_pivot_distances(&pivots);

        match a.filters().get(FilterTag::PivotArray) {
            Some(FilterRecord::PivotArray(f)) => assert_eq!(f.distances(), &[1.0, 5.0]),
            _ => panic!("expected pivot array record"),
        }
    }

    #[test]
    fn test_clear_surplus_data() {
        let mut a = obj("a", &[0.0]);
        a.attach_pivot_distances(&[obj("p", &[1.0])]);
        a.set_supp_data(Arc::new(7u32));

        a.clear_surplus_data();
        assert!(a.filters().is_empty());
        assert!(a.supp_data().is_none());
    }

    #[test]
    fn test_stable_hash_is_stable() {
        assert_eq!(stable_hash("abc"), stable_hash("abc"));
        assert_ne!(stable_hash("abc"), stable_hash("abd"));
    }
}
