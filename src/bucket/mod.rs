//! Capacity-managed object buckets.
//!
//! A [`Bucket`] is the unit of object storage: a set of metric objects with
//! a hard capacity that is never exceeded, a soft capacity marking the
//! bucket as overloaded, and a low-occupation limit deletes will not drop
//! below. Occupation is counted either in objects or in serialized bytes
//! (see [`OccupationUnit`]); byte-counted buckets need an object codec for
//! the per-object size estimate.
//!
//! Buckets are safe to share across threads. Structural mutation goes
//! through one internal lock around the index; occupation counters, the
//! bucket id and the overloaded flag are atomics readable without locking,
//! so aggregate statistics may lag in-flight mutations.

pub mod admission;
pub mod dispatcher;
pub mod index;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};

use crate::error::{ProximaError, Result};
use crate::object::codec::ObjectCodec;
use crate::object::{MetricData, MetricObject};
use crate::query::RankingOperation;

pub use admission::AdmissionFilter;
pub use dispatcher::{BucketDispatcher, DispatcherConfig};
pub use index::{BucketIndex, BucketVariant};

/// Bucket id of a bucket not registered with any dispatcher.
pub const UNASSIGNED_BUCKET_ID: u32 = 0;

/// Unit in which bucket occupation is counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OccupationUnit {
    /// Every stored object counts as one.
    Objects,
    /// Every stored object counts as its estimated serialized size.
    Bytes,
}

/// Capacity parameters of a bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketConfig {
    /// Hard capacity. Inserts that would exceed it fail.
    pub capacity: u64,
    /// Soft capacity. Occupation above it marks the bucket overloaded.
    pub soft_capacity: u64,
    /// Low-occupation limit. Deletes stop rather than drop below it.
    pub low_occupation: u64,
    /// Unit of the three limits and of the occupation counter.
    pub unit: OccupationUnit,
    /// Storage strategy of the bucket.
    pub variant: BucketVariant,
}

impl Default for BucketConfig {
    fn default() -> Self {
        BucketConfig {
            capacity: u64::MAX,
            soft_capacity: u64::MAX,
            low_occupation: 0,
            unit: OccupationUnit::Objects,
            variant: BucketVariant::Memory,
        }
    }
}

/// Object-matching criterion for [`Bucket::delete`].
#[derive(Debug)]
pub enum DeleteMatch<'a, T> {
    /// Objects data-equal to the given payload.
    DataEqual(&'a T),
    /// Objects stored under the given locator.
    Locator(&'a str),
}

// The variants hold references only, so the criterion is copyable for any
// payload type.
impl<T> Clone for DeleteMatch<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for DeleteMatch<'_, T> {}

struct IndexState<T: MetricData> {
    index: Box<dyn BucketIndex<T>>,
    next_seq: u64,
}

/// A capacity-managed set of metric objects.
pub struct Bucket<T: MetricData> {
    id: AtomicU32,
    variant: BucketVariant,
    unit: OccupationUnit,
    capacity: u64,
    soft_capacity: AtomicU64,
    low_occupation: AtomicU64,
    codec: Option<Arc<dyn ObjectCodec<T>>>,
    occupation: AtomicU64,
    object_count: AtomicU64,
    overloaded: AtomicBool,
    admission: Mutex<Option<Arc<dyn AdmissionFilter<T>>>>,
    state: Mutex<IndexState<T>>,
    access_counter: AtomicU64,
    swept_counter: AtomicU64,
}

impl<T: MetricData> std::fmt::Debug for Bucket<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bucket")
            .field("id", &self.id())
            .field("variant", &self.variant)
            .field("capacity", &self.capacity)
            .field("occupation", &self.occupation())
            .field("object_count", &self.object_count())
            .finish_non_exhaustive()
    }
}

impl<T: MetricData> Bucket<T> {
    /// Create a standalone bucket counted in objects.
    ///
    /// Fails with `InvalidArgument` when the configuration asks for
    /// byte-counted occupation; use [`Bucket::with_codec`] for that.
    pub fn new(config: BucketConfig) -> Result<Self> {
        if config.unit == OccupationUnit::Bytes {
            return Err(ProximaError::invalid_argument(
                "byte-counted occupation requires an object codec",
            ));
        }
        Ok(Self::build(config, None))
    }

    /// Create a standalone bucket with a codec, enabling byte-counted
    /// occupation.
    pub fn with_codec(config: BucketConfig, codec: Arc<dyn ObjectCodec<T>>) -> Self {
        Self::build(config, Some(codec))
    }

    #[cfg(test)]
    pub(crate) fn with_index(config: BucketConfig, index: Box<dyn BucketIndex<T>>) -> Self {
        let bucket = Self::build(config, None);
        bucket.state.lock().index = index;
        bucket
    }

    fn build(config: BucketConfig, codec: Option<Arc<dyn ObjectCodec<T>>>) -> Self {
        // Hard capacity is kept at or above the soft capacity.
        let capacity = config.capacity.max(config.soft_capacity);
        Bucket {
            id: AtomicU32::new(UNASSIGNED_BUCKET_ID),
            variant: config.variant,
            unit: config.unit,
            capacity,
            soft_capacity: AtomicU64::new(config.soft_capacity),
            low_occupation: AtomicU64::new(config.low_occupation),
            codec,
            occupation: AtomicU64::new(0),
            object_count: AtomicU64::new(0),
            overloaded: AtomicBool::new(false),
            admission: Mutex::new(None),
            state: Mutex::new(IndexState {
                index: config.variant.create_index(),
                next_seq: 1,
            }),
            access_counter: AtomicU64::new(0),
            swept_counter: AtomicU64::new(0),
        }
    }

    /// The dispatcher-assigned bucket id, or [`UNASSIGNED_BUCKET_ID`] for a
    /// standalone bucket.
    pub fn id(&self) -> u32 {
        self.id.load(Ordering::Acquire)
    }

    pub(crate) fn set_id(&self, id: u32) {
        self.id.store(id, Ordering::Release);
    }

    /// Whether this bucket is registered with a dispatcher.
    pub fn is_standalone(&self) -> bool {
        self.id() == UNASSIGNED_BUCKET_ID
    }

    /// The storage strategy of this bucket.
    pub fn variant(&self) -> BucketVariant {
        self.variant
    }

    /// The unit occupation is counted in.
    pub fn occupation_unit(&self) -> OccupationUnit {
        self.unit
    }

    /// Hard capacity of this bucket.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Soft capacity of this bucket.
    pub fn soft_capacity(&self) -> u64 {
        self.soft_capacity.load(Ordering::Acquire)
    }

    /// Adjust the soft capacity. Values above the hard capacity are clamped
    /// to it; the overloaded flag is re-derived from the current occupation.
    pub fn set_soft_capacity(&self, soft_capacity: u64) {
        let clamped = soft_capacity.min(self.capacity);
        self.soft_capacity.store(clamped, Ordering::Release);
        self.overloaded
            .store(self.occupation() > clamped, Ordering::Release);
    }

    /// Low-occupation limit of this bucket.
    pub fn low_occupation(&self) -> u64 {
        self.low_occupation.load(Ordering::Acquire)
    }

    /// Adjust the low-occupation limit.
    pub fn set_low_occupation(&self, low_occupation: u64) {
        self.low_occupation.store(low_occupation, Ordering::Release);
    }

    /// Current occupation in this bucket's unit.
    pub fn occupation(&self) -> u64 {
        self.occupation.load(Ordering::Acquire)
    }

    /// Number of stored objects.
    pub fn object_count(&self) -> u64 {
        self.object_count.load(Ordering::Acquire)
    }

    /// Whether the occupation currently exceeds the soft capacity.
    pub fn is_overloaded(&self) -> bool {
        self.overloaded.load(Ordering::Acquire)
    }

    /// Attach an admission filter consulted before every insert.
    pub fn set_admission_filter(&self, filter: Arc<dyn AdmissionFilter<T>>) {
        *self.admission.lock() = Some(filter);
    }

    /// Detach the admission filter, if any.
    pub fn clear_admission_filter(&self) {
        *self.admission.lock() = None;
    }

    fn cost_of(&self, object: &MetricObject<T>) -> Result<u64> {
        match self.unit {
            OccupationUnit::Objects => Ok(1),
            OccupationUnit::Bytes => match &self.codec {
                Some(codec) => codec.size_of(object),
                None => Err(ProximaError::illegal_state(
                    "byte-counted bucket has no object codec",
                )),
            },
        }
    }

    fn record_removal(&self, cost: u64) {
        let occupation = self.occupation.fetch_sub(cost, Ordering::AcqRel) - cost;
        self.object_count.fetch_sub(1, Ordering::AcqRel);
        self.overloaded
            .store(occupation > self.soft_capacity(), Ordering::Release);
    }

    /// Insert an object.
    ///
    /// The admission filter runs first, then the hard-capacity check, then
    /// the strategy's own checks (duplicate detection in the no-duplicate
    /// variant). A failed insert leaves the bucket unchanged.
    pub fn insert(&self, object: MetricObject<T>) -> Result<()> {
        self.touch();
        if let Some(filter) = self.admission.lock().clone() {
            filter.check_insert(&object)?;
        }

        let cost = self.cost_of(&object)?;
        let mut state = self.state.lock();

        let occupation = self.occupation();
        if occupation.saturating_add(cost) > self.capacity {
            return Err(ProximaError::capacity_exceeded(format!(
                "insert of '{}' would exceed capacity {}",
                object.locator(),
                self.capacity
            )));
        }

        let seq = state.next_seq;
        state.index.insert(seq, object)?;
        state.next_seq += 1;

        let occupation = self.occupation.fetch_add(cost, Ordering::AcqRel) + cost;
        self.object_count.fetch_add(1, Ordering::AcqRel);
        self.overloaded
            .store(occupation > self.soft_capacity(), Ordering::Release);
        Ok(())
    }

    /// Insert a sequence of objects, stopping at the first failure.
    ///
    /// Objects inserted before the failure stay in the bucket.
    pub fn insert_all<I>(&self, objects: I) -> Result<usize>
    where
        I: IntoIterator<Item = MetricObject<T>>,
    {
        let mut inserted = 0;
        for object in objects {
            self.insert(object)?;
            inserted += 1;
        }
        Ok(inserted)
    }

    /// Delete objects matching the criterion.
    ///
    /// At most `limit` objects are removed; `limit == 0` means no limit.
    /// Removal stops early when another removal would drop the occupation
    /// below the low-occupation limit; in that case the count of objects
    /// actually removed is returned, or `OccupationLow` when the limit
    /// blocked the very first removal. With no matching object at all the
    /// delete fails with `ObjectNotFound`.
    pub fn delete(&self, matcher: DeleteMatch<'_, T>, limit: usize) -> Result<usize> {
        self.remove_matching(
            |object| match matcher {
                DeleteMatch::DataEqual(data) => object.data().data_eq(data),
                DeleteMatch::Locator(locator) => object.locator() == locator,
            },
            limit,
        )
    }

    /// Delete objects satisfying an arbitrary predicate, with the same
    /// limit and low-occupation semantics as [`Bucket::delete`].
    pub fn remove_matching<F>(&self, mut matches: F, limit: usize) -> Result<usize>
    where
        F: FnMut(&MetricObject<T>) -> bool,
    {
        self.touch();
        let mut state = self.state.lock();

        let matched: Vec<u64> = state
            .index
            .iter()
            .filter(|(_, object)| matches(object))
            .map(|(seq, _)| seq)
            .collect();
        if matched.is_empty() {
            return Err(ProximaError::object_not_found(
                "no stored object matches the delete criterion",
            ));
        }

        let low = self.low_occupation();
        let mut removed = 0;
        for seq in matched {
            if limit != 0 && removed == limit {
                break;
            }
            let cost = match state.index.get(seq) {
                Some(object) => self.cost_of(object)?,
                None => continue,
            };
            if self.occupation() < low.saturating_add(cost) {
                if removed == 0 {
                    return Err(ProximaError::occupation_low(format!(
                        "delete blocked by low-occupation limit {low}"
                    )));
                }
                break;
            }
            state.index.remove(seq);
            self.record_removal(cost);
            removed += 1;
        }
        Ok(removed)
    }

    /// Visit every stored object in the strategy's iteration order.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&MetricObject<T>),
    {
        self.touch();
        let state = self.state.lock();
        for (_, object) in state.index.iter() {
            f(object);
        }
    }

    /// Snapshot of all stored objects in the strategy's iteration order.
    pub fn objects(&self) -> Vec<MetricObject<T>> {
        self.touch();
        let state = self.state.lock();
        state.index.iter().map(|(_, object)| object.clone()).collect()
    }

    /// The first stored object with the given locator, if any.
    pub fn get_by_locator(&self, locator: &str) -> Option<MetricObject<T>> {
        self.touch();
        let state = self.state.lock();
        state
            .index
            .iter()
            .find(|(_, object)| object.locator() == locator)
            .map(|(_, object)| object.clone())
    }

    /// Open a cursor over the stored objects, allowing in-place removal.
    ///
    /// The cursor holds the bucket's index lock for its whole lifetime, so
    /// concurrent mutation waits until it is dropped.
    pub fn cursor(&self) -> BucketCursor<'_, T> {
        self.touch();
        let state = self.state.lock();
        let order: Vec<u64> = state.index.iter().map(|(seq, _)| seq).collect();
        BucketCursor {
            bucket: self,
            state,
            order,
            pos: 0,
            current: None,
        }
    }

    /// Evaluate a ranking operation against every stored object.
    ///
    /// Objects provably outside the operation's acceptance radius are
    /// pruned through their filter chains without computing a distance; the
    /// radius also serves as the distance-computation threshold hint.
    /// Returns the number of candidates that entered the answer.
    pub fn evaluate<Q: RankingOperation<T>>(&self, operation: &mut Q) -> usize {
        self.touch();
        let state = self.state.lock();
        let mut accepted = 0;
        for (_, object) in state.index.iter() {
            let radius = operation.accept_radius();
            if operation.query_object().exclude_by_filter(object, radius) {
                continue;
            }
            let distance = operation.query_object().distance_to(object, radius);
            if operation.add_candidate(object, distance) {
                accepted += 1;
            }
        }
        accepted
    }

    /// Remove all stored objects, returning how many were released.
    pub fn destroy(&self) -> usize {
        let mut state = self.state.lock();
        let released = state.index.clear();
        self.occupation.store(0, Ordering::Release);
        self.object_count.store(0, Ordering::Release);
        self.overloaded.store(false, Ordering::Release);
        released
    }

    fn touch(&self) {
        self.access_counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Release idle backing resources when the bucket has not been accessed
    /// since the previous call with `record_access = true`.
    ///
    /// Returns whether resources were actually released. A bucket whose
    /// index is currently locked is skipped.
    pub fn close_temporarily_if_idle(&self, record_access: bool) -> bool {
        let current = self.access_counter.load(Ordering::Relaxed);
        let last = if record_access {
            self.swept_counter.swap(current, Ordering::Relaxed)
        } else {
            self.swept_counter.load(Ordering::Relaxed)
        };
        if current != last {
            return false;
        }
        match self.state.try_lock() {
            Some(state) => state.index.release_idle(),
            None => false,
        }
    }
}

/// Cursor over a bucket's objects supporting removal at the current
/// position. See [`Bucket::cursor`].
pub struct BucketCursor<'a, T: MetricData> {
    bucket: &'a Bucket<T>,
    state: MutexGuard<'a, IndexState<T>>,
    order: Vec<u64>,
    pos: usize,
    current: Option<u64>,
}

impl<'a, T: MetricData> BucketCursor<'a, T> {
    /// Advance to the next object, returning a reference valid until the
    /// cursor moves again.
    pub fn next(&mut self) -> Option<&MetricObject<T>> {
        while self.pos < self.order.len() {
            let seq = self.order[self.pos];
            self.pos += 1;
            if self.state.index.get(seq).is_some() {
                self.current = Some(seq);
                return self.state.index.get(seq);
            }
        }
        self.current = None;
        None
    }

    /// Remove the object the cursor currently points at.
    ///
    /// Honors the bucket's low-occupation limit the same way
    /// [`Bucket::delete`] does.
    pub fn remove_current(&mut self) -> Result<MetricObject<T>> {
        let seq = self.current.take().ok_or_else(|| {
            ProximaError::illegal_state("cursor does not point at an object")
        })?;
        let cost = match self.state.index.get(seq) {
            Some(object) => self.bucket.cost_of(object)?,
            None => {
                return Err(ProximaError::object_not_found(
                    "object already removed under the cursor",
                ));
            }
        };
        let low = self.bucket.low_occupation();
        if self.bucket.occupation() < low.saturating_add(cost) {
            return Err(ProximaError::occupation_low(format!(
                "removal blocked by low-occupation limit {low}"
            )));
        }
        let object = self.state.index.remove(seq).ok_or_else(|| {
            ProximaError::object_not_found("object already removed under the cursor")
        })?;
        self.bucket.record_removal(cost);
        Ok(object)
    }
}
