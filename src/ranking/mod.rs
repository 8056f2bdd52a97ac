//! Capacity-bounded ranked answer collections.
//!
//! A [`RankingCollection`] is the answer structure of every ranking query:
//! a sequence of [`RankedCandidate`]s kept sorted ascending by distance and
//! never exceeding its capacity. Insertion locates the position by binary
//! search and evicts the worst entry when the bound is exceeded; the
//! distance of the worst kept entry doubles as the *answer threshold* — a
//! safe upper bound no unseen candidate can beat once the collection is
//! full.
//!
//! Collections are owned by a single in-flight query evaluation and are not
//! safe for concurrent mutation; partial answers from parallel sub-scans are
//! combined with [`RankingCollection::merge`] under the owning query's
//! exclusive context.

use std::sync::Arc;

use crate::error::{ProximaError, Result};
use crate::object::{MAX_DISTANCE, MetricData, MetricObject};

/// One ranked answer entry: an object reference with its query distance.
#[derive(Debug, Clone)]
pub struct RankedCandidate<T: MetricData> {
    object: Arc<MetricObject<T>>,
    distance: f32,
    sub_distances: Option<Box<[f32]>>,
}

impl<T: MetricData> RankedCandidate<T> {
    /// Create a ranked candidate.
    pub fn new(object: Arc<MetricObject<T>>, distance: f32) -> Self {
        RankedCandidate {
            object,
            distance,
            sub_distances: None,
        }
    }

    /// Create a ranked candidate carrying per-sub-object distances
    /// (for composite objects).
    pub fn with_sub_distances(
        object: Arc<MetricObject<T>>,
        distance: f32,
        sub_distances: Box<[f32]>,
    ) -> Self {
        RankedCandidate {
            object,
            distance,
            sub_distances: Some(sub_distances),
        }
    }

    /// The ranked object.
    pub fn object(&self) -> &Arc<MetricObject<T>> {
        &self.object
    }

    /// The distance of this candidate to the query object.
    pub fn distance(&self) -> f32 {
        self.distance
    }

    /// Distances of the respective sub-objects, if tracked.
    pub fn sub_distances(&self) -> Option<&[f32]> {
        self.sub_distances.as_deref()
    }
}

/// Answer-threshold derivation mode.
///
/// The default [`ThresholdMode::Collection`] derives the threshold from the
/// worst kept entry. [`ThresholdMode::FirstN`] instead tracks a fixed-size
/// insertion-sorted array of the smallest distances seen so far, independent
/// of the collection size — used when the canonical threshold would be too
/// conservative or too expensive to maintain. [`ThresholdMode::Ignore`]
/// disables threshold pruning entirely.
#[derive(Debug, Clone)]
enum ThresholdState {
    Collection,
    FirstN(Vec<f32>),
    Ignore,
}

/// Capacity-bounded, ascending-sorted collection of ranked candidates.
#[derive(Debug, Clone)]
pub struct RankingCollection<T: MetricData> {
    entries: Vec<RankedCandidate<T>>,
    capacity: usize,
    ignore_duplicates: bool,
    threshold: ThresholdState,
}

impl<T: MetricData> RankingCollection<T> {
    /// Create a collection bounded to `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        RankingCollection {
            entries: Vec::new(),
            capacity,
            ignore_duplicates: false,
            threshold: ThresholdState::Collection,
        }
    }

    /// Create an unbounded collection.
    pub fn unbounded() -> Self {
        Self::new(usize::MAX)
    }

    /// Enable or disable duplicate suppression: with the flag set, a
    /// candidate data-equal to an existing entry is rejected regardless of
    /// its distance.
    pub fn set_ignore_duplicates(&mut self, ignore: bool) {
        self.ignore_duplicates = ignore;
    }

    /// Whether duplicate suppression is enabled.
    pub fn is_ignoring_duplicates(&self) -> bool {
        self.ignore_duplicates
    }

    /// The capacity bound of this collection.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Switch to the fixed-size first-N threshold tracking mode.
    ///
    /// Fails with `IllegalState` when the collection already holds entries.
    pub fn set_threshold_first_n(&mut self, n: usize) -> Result<()> {
        self.check_threshold_mutable()?;
        self.threshold = ThresholdState::FirstN(vec![MAX_DISTANCE; n]);
        Ok(())
    }

    /// Disable threshold derivation: [`RankingCollection::threshold`]
    /// always returns [`MAX_DISTANCE`].
    ///
    /// Fails with `IllegalState` when the collection already holds entries.
    pub fn set_threshold_ignored(&mut self) -> Result<()> {
        self.check_threshold_mutable()?;
        self.threshold = ThresholdState::Ignore;
        Ok(())
    }

    fn check_threshold_mutable(&self) -> Result<()> {
        if self.entries.is_empty() {
            Ok(())
        } else {
            Err(ProximaError::illegal_state(
                "cannot change threshold computation when answer is already computed",
            ))
        }
    }

    /// Number of kept entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the collection holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether the collection has reached its capacity bound.
    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    /// The best (smallest-distance) kept entry.
    pub fn first(&self) -> Option<&RankedCandidate<T>> {
        self.entries.first()
    }

    /// The worst (largest-distance) kept entry.
    pub fn last(&self) -> Option<&RankedCandidate<T>> {
        self.entries.last()
    }

    /// Remove all entries. Threshold-tracking state is reset as well.
    pub fn clear(&mut self) {
        self.entries.clear();
        if let ThresholdState::FirstN(arr) = &mut self.threshold {
            arr.fill(MAX_DISTANCE);
        }
    }

    /// Add a candidate.
    ///
    /// Returns a reference to the kept entry, or `None` when the candidate
    /// was rejected: at capacity with a distance not strictly better than
    /// the current worst, or data-equal to an existing entry under
    /// duplicate suppression.
    pub fn add(
        &mut self,
        object: Arc<MetricObject<T>>,
        distance: f32,
        sub_distances: Option<Box<[f32]>>,
    ) -> Option<&RankedCandidate<T>> {
        let candidate = match sub_distances {
            Some(subs) => RankedCandidate::with_sub_distances(object, distance, subs),
            None => RankedCandidate::new(object, distance),
        };
        self.add_candidate(candidate)
    }

    fn add_candidate(&mut self, candidate: RankedCandidate<T>) -> Option<&RankedCandidate<T>> {
        // The first-N tracker observes every presented distance, accepted
        // or not.
        if let ThresholdState::FirstN(arr) = &mut self.threshold {
            insert_sorted_fixed(arr, candidate.distance);
        }

        if self.capacity == 0 {
            return None;
        }
        if self.ignore_duplicates
            && self
                .entries
                .iter()
                .any(|e| e.object.data_eq(&candidate.object))
        {
            return None;
        }
        if self.entries.len() >= self.capacity
            && let Some(last) = self.entries.last()
            && candidate.distance >= last.distance
        {
            return None;
        }

        let pos = self
            .entries
            .partition_point(|e| e.distance.total_cmp(&candidate.distance).is_le());
        self.entries.insert(pos, candidate);
        if self.entries.len() > self.capacity {
            self.entries.pop();
        }
        self.entries.get(pos)
    }

    /// The answer threshold: the distance of the current worst kept entry,
    /// or [`MAX_DISTANCE`] while the collection is not full.
    ///
    /// Any unseen candidate farther than this value cannot improve the
    /// answer, so callers use it as a pruning radius.
    pub fn threshold(&self) -> f32 {
        match &self.threshold {
            ThresholdState::Collection => {
                if self.entries.len() >= self.capacity {
                    self.entries.last().map_or(MAX_DISTANCE, |e| e.distance)
                } else {
                    MAX_DISTANCE
                }
            }
            ThresholdState::FirstN(arr) => arr.last().copied().unwrap_or(MAX_DISTANCE),
            ThresholdState::Ignore => MAX_DISTANCE,
        }
    }

    /// Union another collection into this one, preserving sort order, the
    /// capacity bound and the duplicate-suppression flag.
    ///
    /// First-N threshold arrays are merged by insertion sort; the length of
    /// this collection's array is authoritative and donor values pushed past
    /// its end are dropped.
    pub fn merge(&mut self, other: RankingCollection<T>) {
        let RankingCollection {
            entries, threshold, ..
        } = other;
        for candidate in entries {
            self.add_candidate(candidate);
        }
        if let (ThresholdState::FirstN(arr), ThresholdState::FirstN(donor)) =
            (&mut self.threshold, &threshold)
        {
            for value in donor {
                if *value < MAX_DISTANCE {
                    insert_sorted_fixed(arr, *value);
                }
            }
        }
    }

    /// Iterate over all kept entries, best first.
    pub fn iter(&self) -> impl Iterator<Item = &RankedCandidate<T>> {
        self.entries.iter()
    }

    /// Iterate over a skip/count window of the kept entries.
    pub fn iter_window(&self, skip: usize, count: usize) -> impl Iterator<Item = &RankedCandidate<T>> {
        self.entries.iter().skip(skip).take(count)
    }

    /// Iterate over the kept entries whose distance lies in
    /// `[min_distance, max_distance)`.
    pub fn iter_distance_restricted(
        &self,
        min_distance: f32,
        max_distance: f32,
    ) -> impl Iterator<Item = &RankedCandidate<T>> {
        let start = self
            .entries
            .partition_point(|e| e.distance.total_cmp(&min_distance).is_lt());
        let end = self
            .entries
            .partition_point(|e| e.distance.total_cmp(&max_distance).is_lt());
        self.entries[start..end].iter()
    }
}

/// Insert `value` into a fixed-length ascending array, shifting the tail
/// right and dropping the overflow. Values past the end are ignored.
fn insert_sorted_fixed(array: &mut [f32], value: f32) {
    let pos = array.partition_point(|v| v.total_cmp(&value).is_lt());
    if pos < array.len() {
        array.copy_within(pos..array.len() - 1, pos + 1);
        array[pos] = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::impls::FloatVector;

    fn candidate(locator: &str, value: f32) -> Arc<MetricObject<FloatVector>> {
        Arc::new(MetricObject::new(locator, FloatVector::new(vec![value])))
    }

    #[test]
    fn test_keeps_k_smallest_sorted() {
        let mut collection = RankingCollection::new(3);
        for (i, d) in [5.0, 1.0, 4.0, 2.0, 3.0].iter().enumerate() {
            collection.add(candidate(&format!("o{i}"), *d), *d, None);
        }

        let distances: Vec<f32> = collection.iter().map(|e| e.distance()).collect();
        assert_eq!(distances, vec![1.0, 2.0, 3.0]);
        assert_eq!(collection.threshold(), 3.0);
    }

    #[test]
    fn test_threshold_before_full() {
        let mut collection = RankingCollection::new(3);
        collection.add(candidate("a", 1.0), 1.0, None);
        assert_eq!(collection.threshold(), MAX_DISTANCE);
        assert!(!collection.is_full());
    }

    #[test]
    fn test_rejects_not_strictly_better() {
        let mut collection = RankingCollection::new(2);
        collection.add(candidate("a", 1.0), 1.0, None);
        collection.add(candidate("b", 2.0), 2.0, None);

        assert!(collection.add(candidate("c", 2.0), 2.0, None).is_none());
        assert!(collection.add(candidate("d", 1.5), 1.5, None).is_some());
        let distances: Vec<f32> = collection.iter().map(|e| e.distance()).collect();
        assert_eq!(distances, vec![1.0, 1.5]);
    }

    #[test]
    fn test_duplicate_suppression() {
        let mut collection = RankingCollection::new(10);
        collection.set_ignore_duplicates(true);
        collection.add(candidate("a", 1.0), 1.0, None);

        // Same data under a different locator: rejected regardless of
        // distance.
        assert!(collection.add(candidate("b", 0.5), 0.5, None).is_none());
        assert_eq!(collection.len(), 1);
    }

    #[test]
    fn test_zero_capacity_rejects_everything() {
        let mut collection = RankingCollection::new(0);
        assert!(collection.add(candidate("a", 1.0), 1.0, None).is_none());
        assert!(collection.is_empty());
    }

    #[test]
    fn test_merge_idempotent_at_capacity() {
        let mut collection = RankingCollection::new(3);
        for (i, d) in [1.0, 2.0, 3.0, 4.0].iter().enumerate() {
            collection.add(candidate(&format!("o{i}"), *d), *d, None);
        }
        let copy = collection.clone();
        collection.merge(copy);

        let distances: Vec<f32> = collection.iter().map(|e| e.distance()).collect();
        assert_eq!(distances, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_first_n_threshold_tracks_seen_distances() {
        let mut collection = RankingCollection::new(100);
        collection.set_threshold_first_n(2).unwrap();
        assert_eq!(collection.threshold(), MAX_DISTANCE);

        collection.add(candidate("a", 5.0), 5.0, None);
        assert_eq!(collection.threshold(), MAX_DISTANCE);
        collection.add(candidate("b", 3.0), 3.0, None);
        assert_eq!(collection.threshold(), 5.0);
        collection.add(candidate("c", 1.0), 1.0, None);
        assert_eq!(collection.threshold(), 3.0);
    }

    #[test]
    fn test_threshold_mode_frozen_once_answered() {
        let mut collection = RankingCollection::new(10);
        collection.add(candidate("a", 1.0), 1.0, None);
        assert!(collection.set_threshold_first_n(4).is_err());
        assert!(collection.set_threshold_ignored().is_err());
    }

    #[test]
    fn test_merge_first_n_arrays_of_unequal_length() {
        let mut left = RankingCollection::new(100);
        left.set_threshold_first_n(2).unwrap();
        left.add(candidate("a", 4.0), 4.0, None);
        left.add(candidate("b", 6.0), 6.0, None);

        let mut right = RankingCollection::new(100);
        right.set_threshold_first_n(4).unwrap();
        right.add(candidate("c", 1.0), 1.0, None);
        right.add(candidate("d", 2.0), 2.0, None);
        right.add(candidate("e", 3.0), 3.0, None);

        left.merge(right);
        // Receiver keeps its own length (2); the two smallest distances
        // seen anywhere win.
        assert_eq!(left.threshold(), 2.0);
    }

    #[test]
    fn test_window_and_range_iteration() {
        let mut collection = RankingCollection::new(10);
        for (i, d) in [1.0, 2.0, 3.0, 4.0, 5.0].iter().enumerate() {
            collection.add(candidate(&format!("o{i}"), *d), *d, None);
        }

        let window: Vec<f32> = collection.iter_window(1, 2).map(|e| e.distance()).collect();
        assert_eq!(window, vec![2.0, 3.0]);

        let range: Vec<f32> = collection
            .iter_distance_restricted(2.0, 4.0)
            .map(|e| e.distance())
            .collect();
        assert_eq!(range, vec![2.0, 3.0]);
    }
}
