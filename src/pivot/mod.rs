//! Pivot selection.
//!
//! A [`PivotChooser`] picks distinguished objects (pivots) from a sample of
//! stored data; pivots drive the precomputed-distance filters attached to
//! objects and queries. The provided [`IdistanceChooser`] implements the
//! incremental iDistance strategy: pivots are chosen one at a time, each
//! maximizing the mean difference of closest-pivot distances over paired
//! object samples, given all previously chosen pivots.

use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::bucket::{AdmissionFilter, Bucket};
use crate::error::{ProximaError, Result};
use crate::object::{MAX_DISTANCE, MetricData, MetricObject};

/// Strategy for selecting pivots from sampled objects.
pub trait PivotChooser<T: MetricData>: Send + Sync {
    /// Register a bucket whose contents feed future [`PivotChooser::select`]
    /// calls.
    fn register_sample_provider(&self, bucket: Arc<Bucket<T>>);

    /// The pivots selected so far.
    fn selected_pivots(&self) -> Vec<Arc<MetricObject<T>>>;

    /// Select `count` additional pivots from the registered sample
    /// providers, returning the full selected-pivot list.
    fn select(&self, count: usize) -> Result<Vec<Arc<MetricObject<T>>>>;

    /// Select `count` additional pivots from an explicit object pool,
    /// returning the full selected-pivot list.
    fn select_from(
        &self,
        pool: &mut dyn Iterator<Item = MetricObject<T>>,
        count: usize,
    ) -> Result<Vec<Arc<MetricObject<T>>>>;

    /// The chooser's admission-filter facet, for choosers that also want to
    /// veto inserts into the buckets they sample.
    fn as_admission_filter(self: Arc<Self>) -> Option<Arc<dyn AdmissionFilter<T>>> {
        None
    }
}

/// Parameters of the incremental iDistance chooser.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdistanceConfig {
    /// Number of left/right sample pairs evaluated per candidate.
    pub sample_set_size: usize,
    /// Number of candidate pivots examined per selection round.
    pub sample_pivot_size: usize,
    /// Fixed RNG seed for reproducible selection; `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl Default for IdistanceConfig {
    fn default() -> Self {
        IdistanceConfig {
            sample_set_size: 10_000,
            sample_pivot_size: 100,
            seed: None,
        }
    }
}

/// Incremental iDistance pivot chooser.
///
/// Each selection round scores candidate pivots by the mean
/// |d(left, closest) - d(right, closest)| over sampled object pairs, where
/// "closest" considers the already-selected pivots plus the candidate, and
/// takes the candidate with the strictly largest mean. Selected pivots are
/// cached, so successive calls extend the same pivot list.
pub struct IdistanceChooser<T: MetricData> {
    config: IdistanceConfig,
    selected: Mutex<Vec<Arc<MetricObject<T>>>>,
    providers: Mutex<Vec<Arc<Bucket<T>>>>,
}

impl<T: MetricData> IdistanceChooser<T> {
    /// Create a chooser with the given parameters.
    pub fn new(config: IdistanceConfig) -> Self {
        IdistanceChooser {
            config,
            selected: Mutex::new(Vec::new()),
            providers: Mutex::new(Vec::new()),
        }
    }

    fn rng(&self) -> StdRng {
        match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        }
    }

    fn select_into(
        &self,
        pool: Vec<Arc<MetricObject<T>>>,
        count: usize,
    ) -> Result<Vec<Arc<MetricObject<T>>>> {
        let mut selected = self.selected.lock();
        if count == 0 {
            return Ok(selected.clone());
        }
        let n = pool.len();
        if n == 0 {
            return Err(ProximaError::invalid_argument(
                "cannot select pivots from an empty sample pool",
            ));
        }

        // With a small pool the full n-squared pairing beats sampling.
        let sample_size = if (self.config.sample_set_size as f64).sqrt() > n as f64 {
            n * n
        } else {
            self.config.sample_set_size
        }
        .max(1);

        let mut rng = self.rng();
        let left: Vec<usize> = (0..sample_size).map(|_| rng.random_range(0..n)).collect();
        let right: Vec<usize> = (0..sample_size).map(|_| rng.random_range(0..n)).collect();

        // Closest-pivot distances under the already-selected pivots.
        let mut left_closest = vec![MAX_DISTANCE; sample_size];
        let mut right_closest = vec![MAX_DISTANCE; sample_size];
        for pivot in selected.iter() {
            for i in 0..sample_size {
                left_closest[i] = left_closest[i].min(pool[left[i]].distance(pivot));
                right_closest[i] = right_closest[i].min(pool[right[i]].distance(pivot));
            }
        }

        for _ in 0..count {
            let candidate_count = self.config.sample_pivot_size.min(n);
            let candidates = rand::seq::index::sample(&mut rng, n, candidate_count);

            let mut best: Option<(f32, usize, Vec<f32>, Vec<f32>)> = None;
            let mut fallback: Option<usize> = None;
            let mut first_candidate: Option<usize> = None;

            for candidate in candidates.iter() {
                if first_candidate.is_none() {
                    first_candidate = Some(candidate);
                }
                // An already-selected pivot scores a baseline mu without
                // adding any discrimination; skip it so the returned pivots
                // stay distinct whenever the pool allows.
                if selected
                    .iter()
                    .any(|p| p.data().data_eq(pool[candidate].data()))
                {
                    continue;
                }
                if fallback.is_none() {
                    fallback = Some(candidate);
                }
                let mut sum = 0.0f32;
                let mut cand_left = vec![0.0f32; sample_size];
                let mut cand_right = vec![0.0f32; sample_size];
                for i in 0..sample_size {
                    // Each sample point adopts the candidate when it is
                    // closer than its best-known pivot.
                    let a = left_closest[i].min(pool[left[i]].distance(&pool[candidate]));
                    let b = right_closest[i].min(pool[right[i]].distance(&pool[candidate]));
                    cand_left[i] = a;
                    cand_right[i] = b;
                    sum += (a - b).abs();
                }
                let mean = sum / sample_size as f32;
                if best.as_ref().is_none_or(|(m, ..)| mean > *m) && mean > 0.0 {
                    best = Some((mean, candidate, cand_left, cand_right));
                }
            }

            // A round where no candidate separates any pair still delivers
            // a pivot, so the requested count is always met.
            let winner = match &best {
                Some((_, winner, _, _)) => *winner,
                None => match fallback.or(first_candidate) {
                    Some(candidate) => candidate,
                    None => {
                        return Err(ProximaError::invalid_argument(
                            "candidate sample is empty",
                        ));
                    }
                },
            };
            let (winner_left, winner_right) = match best {
                Some((_, _, wl, wr)) => (wl, wr),
                None => {
                    let mut wl = vec![0.0f32; sample_size];
                    let mut wr = vec![0.0f32; sample_size];
                    for i in 0..sample_size {
                        wl[i] =
                            left_closest[i].min(pool[left[i]].distance(&pool[winner]));
                        wr[i] =
                            right_closest[i].min(pool[right[i]].distance(&pool[winner]));
                    }
                    (wl, wr)
                }
            };

            selected.push(pool[winner].clone());
            left_closest = winner_left;
            right_closest = winner_right;
        }

        Ok(selected.clone())
    }
}

impl<T: MetricData> PivotChooser<T> for IdistanceChooser<T> {
    fn register_sample_provider(&self, bucket: Arc<Bucket<T>>) {
        self.providers.lock().push(bucket);
    }

    fn selected_pivots(&self) -> Vec<Arc<MetricObject<T>>> {
        self.selected.lock().clone()
    }

    fn select(&self, count: usize) -> Result<Vec<Arc<MetricObject<T>>>> {
        let providers = self.providers.lock().clone();
        let pool: Vec<Arc<MetricObject<T>>> = providers
            .iter()
            .flat_map(|bucket| bucket.objects())
            .map(Arc::new)
            .collect();
        self.select_into(pool, count)
    }

    fn select_from(
        &self,
        pool: &mut dyn Iterator<Item = MetricObject<T>>,
        count: usize,
    ) -> Result<Vec<Arc<MetricObject<T>>>> {
        let pool: Vec<Arc<MetricObject<T>>> = pool.map(Arc::new).collect();
        self.select_into(pool, count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::BucketConfig;
    use crate::object::impls::FloatVector;

    fn obj(locator: &str, values: &[f32]) -> MetricObject<FloatVector> {
        MetricObject::new(locator, FloatVector::new(values.to_vec()))
    }

    fn seeded(seed: u64) -> IdistanceChooser<FloatVector> {
        IdistanceChooser::new(IdistanceConfig {
            sample_set_size: 64,
            sample_pivot_size: 8,
            seed: Some(seed),
        })
    }

    fn pool() -> Vec<MetricObject<FloatVector>> {
        (0..32)
            .map(|i| {
                let x = (i % 8) as f32;
                let y = (i / 8) as f32 * 10.0;
                obj(&format!("o{i}"), &[x, y])
            })
            .collect()
    }

    #[test]
    fn test_selects_requested_count() {
        let chooser = seeded(7);
        let pivots = chooser.select_from(&mut pool().into_iter(), 3).unwrap();
        assert_eq!(pivots.len(), 3);
        assert_eq!(chooser.selected_pivots().len(), 3);
    }

    #[test]
    fn test_selection_is_incremental() {
        let chooser = seeded(7);
        chooser.select_from(&mut pool().into_iter(), 2).unwrap();
        let pivots = chooser.select_from(&mut pool().into_iter(), 1).unwrap();
        assert_eq!(pivots.len(), 3);
    }

    #[test]
    fn test_seeded_selection_is_deterministic() {
        let first = seeded(42).select_from(&mut pool().into_iter(), 3).unwrap();
        let second = seeded(42).select_from(&mut pool().into_iter(), 3).unwrap();

        let locators = |pivots: &[Arc<MetricObject<FloatVector>>]| {
            pivots
                .iter()
                .map(|p| p.locator().to_string())
                .collect::<Vec<_>>()
        };
        assert_eq!(locators(&first), locators(&second));
    }

    #[test]
    fn test_empty_pool_fails() {
        let chooser = seeded(7);
        let err = chooser
            .select_from(&mut Vec::<MetricObject<FloatVector>>::new().into_iter(), 1)
            .unwrap_err();
        assert!(matches!(err, ProximaError::InvalidArgument(_)));
    }

    #[test]
    fn test_degenerate_pool_still_delivers() {
        // All objects identical: no candidate separates any pair.
        let chooser = seeded(7);
        let identical: Vec<_> = (0..4).map(|i| obj(&format!("o{i}"), &[1.0])).collect();
        let pivots = chooser.select_from(&mut identical.into_iter(), 2).unwrap();
        assert_eq!(pivots.len(), 2);
    }

    #[test]
    fn test_select_from_registered_providers() {
        let bucket = Arc::new(Bucket::new(BucketConfig::default()).unwrap());
        for object in pool() {
            bucket.insert(object).unwrap();
        }
        let chooser = seeded(7);
        chooser.register_sample_provider(bucket);
        let pivots = chooser.select(2).unwrap();
        assert_eq!(pivots.len(), 2);
    }
}
