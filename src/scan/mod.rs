//! Sequential-scan search engines.
//!
//! [`SequentialScan`] answers ranking queries by presenting every stored
//! object to the operation, accelerated by pivot-based filter chains: each
//! inserted object carries its distances to a fixed pivot list, and a query
//! seeded with the same distances can prove objects outside its radius
//! without computing their distance. [`ParallelSequentialScan`] partitions
//! the data over several buckets and evaluates them on the rayon thread
//! pool.

use std::sync::Arc;

use rayon::prelude::*;

use crate::bucket::{
    Bucket, BucketConfig, BucketDispatcher, DeleteMatch, DispatcherConfig,
};
use crate::error::{ProximaError, Result};
use crate::object::{FilterRecord, FilterTag, MetricData, MetricObject};
use crate::query::RankingOperation;

/// Single-bucket sequential scan with pivot filtering.
pub struct SequentialScan<T: MetricData> {
    bucket: Bucket<T>,
    pivots: Vec<MetricObject<T>>,
    pivot_dists_valid_if_given: bool,
}

impl<T: MetricData> std::fmt::Debug for SequentialScan<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequentialScan")
            .field("pivots", &self.pivots.len())
            .field("object_count", &self.object_count())
            .finish_non_exhaustive()
    }
}

impl<T: MetricData> SequentialScan<T> {
    /// Create a scan over a fresh bucket.
    ///
    /// With `pivot_dists_valid_if_given` set, an inserted object already
    /// carrying a pivot-distance array of the right length is trusted;
    /// otherwise every insert recomputes the distances to `pivots`.
    pub fn new(
        config: BucketConfig,
        pivots: Vec<MetricObject<T>>,
        pivot_dists_valid_if_given: bool,
    ) -> Result<Self> {
        Ok(SequentialScan {
            bucket: Bucket::new(config)?,
            pivots,
            pivot_dists_valid_if_given,
        })
    }

    /// The pivots driving this scan's filters.
    pub fn pivots(&self) -> &[MetricObject<T>] {
        &self.pivots
    }

    /// The underlying bucket.
    pub fn bucket(&self) -> &Bucket<T> {
        &self.bucket
    }

    /// Number of stored objects.
    pub fn object_count(&self) -> u64 {
        self.bucket.object_count()
    }

    fn has_trusted_pivot_distances(&self, object: &MetricObject<T>) -> bool {
        if !self.pivot_dists_valid_if_given {
            return false;
        }
        match object.filters().get(FilterTag::PivotArray) {
            Some(FilterRecord::PivotArray(filter)) => {
                filter.distances().len() == self.pivots.len()
            }
            _ => false,
        }
    }

    /// Insert an object, attaching its pivot distances.
    pub fn insert(&self, mut object: MetricObject<T>) -> Result<()> {
        if !self.pivots.is_empty() && !self.has_trusted_pivot_distances(&object) {
            object.attach_pivot_distances(&self.pivots);
        }
        self.bucket.insert(object)
    }

    /// Delete all objects stored under the given locator.
    pub fn delete_by_locator(&self, locator: &str) -> Result<usize> {
        self.bucket.delete(DeleteMatch::Locator(locator), 0)
    }

    /// Delete all objects data-equal to the given payload.
    pub fn delete_data(&self, data: &T) -> Result<usize> {
        self.bucket.delete(DeleteMatch::DataEqual(data), 0)
    }

    /// Evaluate a ranking operation over all stored objects.
    ///
    /// The query object is seeded with its distances to the scan's pivots
    /// first, so stored objects can be pruned through their filter chains.
    /// Returns the number of candidates that entered the answer.
    pub fn search<Q: RankingOperation<T>>(&self, operation: &mut Q) -> usize {
        if !self.pivots.is_empty() {
            operation.query_object_mut().attach_pivot_distances(&self.pivots);
        }
        self.bucket.evaluate(operation)
    }
}

/// Multi-bucket sequential scan evaluated on the rayon thread pool.
///
/// Objects are spread over a fixed number of partitions; a search evaluates
/// every partition in parallel into a private partial answer and merges the
/// partials into the operation's answer afterwards.
pub struct ParallelSequentialScan<T: MetricData> {
    dispatcher: BucketDispatcher<T>,
    bucket_ids: Vec<u32>,
    pivots: Vec<MetricObject<T>>,
    pivot_dists_valid_if_given: bool,
}

impl<T: MetricData> std::fmt::Debug for ParallelSequentialScan<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelSequentialScan")
            .field("partitions", &self.partitions())
            .field("pivots", &self.pivots.len())
            .field("object_count", &self.object_count())
            .finish_non_exhaustive()
    }
}

impl<T: MetricData> ParallelSequentialScan<T> {
    /// Create a scan with `partitions` buckets, each configured by
    /// `config`.
    pub fn new(
        partitions: usize,
        config: BucketConfig,
        pivots: Vec<MetricObject<T>>,
        pivot_dists_valid_if_given: bool,
    ) -> Result<Self> {
        if partitions == 0 {
            return Err(ProximaError::invalid_argument(
                "at least one partition is required",
            ));
        }
        let dispatcher = BucketDispatcher::new(DispatcherConfig {
            max_buckets: partitions,
            defaults: config,
        });
        let mut bucket_ids = Vec::with_capacity(partitions);
        for _ in 0..partitions {
            bucket_ids.push(dispatcher.create_bucket()?.id());
        }
        Ok(ParallelSequentialScan {
            dispatcher,
            bucket_ids,
            pivots,
            pivot_dists_valid_if_given,
        })
    }

    /// Create a scan with one partition per available CPU.
    pub fn with_cpu_partitions(
        config: BucketConfig,
        pivots: Vec<MetricObject<T>>,
        pivot_dists_valid_if_given: bool,
    ) -> Result<Self> {
        Self::new(num_cpus::get(), config, pivots, pivot_dists_valid_if_given)
    }

    /// Number of partitions.
    pub fn partitions(&self) -> usize {
        self.bucket_ids.len()
    }

    /// The pivots driving this scan's filters.
    pub fn pivots(&self) -> &[MetricObject<T>] {
        &self.pivots
    }

    /// Total number of stored objects.
    pub fn object_count(&self) -> u64 {
        self.dispatcher.object_count()
    }

    fn partition_buckets(&self) -> Result<Vec<Arc<Bucket<T>>>> {
        self.bucket_ids
            .iter()
            .map(|id| self.dispatcher.get_bucket(*id))
            .collect()
    }

    fn has_trusted_pivot_distances(&self, object: &MetricObject<T>) -> bool {
        if !self.pivot_dists_valid_if_given {
            return false;
        }
        match object.filters().get(FilterTag::PivotArray) {
            Some(FilterRecord::PivotArray(filter)) => {
                filter.distances().len() == self.pivots.len()
            }
            _ => false,
        }
    }

    /// Insert an object into the least-occupied partition.
    pub fn insert(&self, mut object: MetricObject<T>) -> Result<()> {
        if !self.pivots.is_empty() && !self.has_trusted_pivot_distances(&object) {
            object.attach_pivot_distances(&self.pivots);
        }
        let buckets = self.partition_buckets()?;
        let target = buckets
            .iter()
            .min_by_key(|bucket| bucket.object_count())
            .ok_or_else(|| ProximaError::illegal_state("scan has no partitions"))?;
        target.insert(object)
    }

    /// Delete all objects stored under the given locator, across all
    /// partitions.
    pub fn delete_by_locator(&self, locator: &str) -> Result<usize> {
        let mut removed = 0;
        for bucket in self.partition_buckets()? {
            match bucket.delete(DeleteMatch::Locator(locator), 0) {
                Ok(count) => removed += count,
                Err(ProximaError::ObjectNotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        if removed == 0 {
            return Err(ProximaError::object_not_found(format!(
                "no stored object has locator '{locator}'"
            )));
        }
        Ok(removed)
    }

    /// Evaluate a ranking operation over all partitions in parallel.
    ///
    /// Every partition works on a private clone of the operation whose
    /// answer starts empty; the partial answers are merged into the
    /// operation's answer afterwards. Returns the number of candidates that
    /// entered the partial answers.
    pub fn search<Q>(&self, operation: &mut Q) -> Result<usize>
    where
        Q: RankingOperation<T> + Clone + Sync,
    {
        if !self.pivots.is_empty() {
            operation.query_object_mut().attach_pivot_distances(&self.pivots);
        }
        let buckets = self.partition_buckets()?;

        let mut prototype = operation.clone();
        prototype.answer_mut().clear();
        let partials: Vec<(Q, usize)> = buckets
            .par_iter()
            .map(|bucket| {
                let mut partial = prototype.clone();
                let accepted = bucket.evaluate(&mut partial);
                (partial, accepted)
            })
            .collect();

        let mut accepted = 0;
        for (partial, count) in partials {
            accepted += count;
            operation.answer_mut().merge(partial.into_answer());
        }
        Ok(accepted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::impls::FloatVector;
    use crate::pivot::{IdistanceChooser, IdistanceConfig, PivotChooser};
    use crate::query::{KnnQuery, RangeQuery};

    fn obj(locator: &str, value: f32) -> MetricObject<FloatVector> {
        MetricObject::new(locator, FloatVector::new(vec![value]))
    }

    fn dataset() -> Vec<MetricObject<FloatVector>> {
        (0..40).map(|i| obj(&format!("o{i}"), i as f32)).collect()
    }

    #[test]
    fn test_sequential_knn() {
        let scan = SequentialScan::new(BucketConfig::default(), Vec::new(), false).unwrap();
        for object in dataset() {
            scan.insert(object).unwrap();
        }

        let mut query = KnnQuery::new(obj("q", 10.2), 3);
        scan.search(&mut query);
        let locators: Vec<&str> = query.answer().iter().map(|e| e.object().locator()).collect();
        assert_eq!(locators, vec!["o10", "o11", "o9"]);
    }

    #[test]
    fn test_sequential_range_with_pivots() {
        let chooser = IdistanceChooser::new(IdistanceConfig {
            sample_set_size: 64,
            sample_pivot_size: 8,
            seed: Some(3),
        });
        let pivots: Vec<MetricObject<FloatVector>> = chooser
            .select_from(&mut dataset().into_iter(), 2)
            .unwrap()
            .iter()
            .map(|p| p.as_ref().clone())
            .collect();

        let scan = SequentialScan::new(BucketConfig::default(), pivots, false).unwrap();
        for object in dataset() {
            scan.insert(object).unwrap();
        }

        let mut query = RangeQuery::new(obj("q", 5.0), 2.0);
        scan.search(&mut query);
        let mut locators: Vec<&str> =
            query.answer().iter().map(|e| e.object().locator()).collect();
        locators.sort_unstable();
        assert_eq!(locators, vec!["o3", "o4", "o5", "o6", "o7"]);
    }

    #[test]
    fn test_sequential_delete() {
        let scan = SequentialScan::new(BucketConfig::default(), Vec::new(), false).unwrap();
        for object in dataset() {
            scan.insert(object).unwrap();
        }
        assert_eq!(scan.delete_by_locator("o5").unwrap(), 1);
        assert_eq!(scan.object_count(), 39);
        assert!(scan.delete_by_locator("o5").is_err());
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let sequential =
            SequentialScan::new(BucketConfig::default(), Vec::new(), false).unwrap();
        let parallel =
            ParallelSequentialScan::new(4, BucketConfig::default(), Vec::new(), false).unwrap();
        for object in dataset() {
            sequential.insert(object.clone()).unwrap();
            parallel.insert(object).unwrap();
        }
        assert_eq!(parallel.object_count(), 40);

        let mut seq_query = KnnQuery::new(obj("q", 20.3), 5);
        sequential.search(&mut seq_query);
        let mut par_query = KnnQuery::new(obj("q", 20.3), 5);
        parallel.search(&mut par_query).unwrap();

        let seq: Vec<f32> = seq_query.answer().iter().map(|e| e.distance()).collect();
        let par: Vec<f32> = par_query.answer().iter().map(|e| e.distance()).collect();
        assert_eq!(seq, par);
    }

    #[test]
    fn test_parallel_delete_across_partitions() {
        let parallel =
            ParallelSequentialScan::new(3, BucketConfig::default(), Vec::new(), false).unwrap();
        for object in dataset() {
            parallel.insert(object).unwrap();
        }
        assert_eq!(parallel.delete_by_locator("o7").unwrap(), 1);
        assert!(parallel.delete_by_locator("o7").is_err());
    }

    #[test]
    fn test_zero_partitions_rejected() {
        let err = ParallelSequentialScan::<FloatVector>::new(
            0,
            BucketConfig::default(),
            Vec::new(),
            false,
        )
        .unwrap_err();
        assert!(matches!(err, ProximaError::InvalidArgument(_)));
    }
}
