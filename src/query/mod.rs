//! Ranking query operations.
//!
//! A ranking operation binds a query object to the [`RankingCollection`]
//! accumulating its answer. Buckets evaluate an operation by presenting
//! every stored object to it; the operation decides acceptance and feeds the
//! answer collection. The two basic metric queries are provided: range
//! ([`RangeQuery`]) and k-nearest-neighbor ([`KnnQuery`]).

use std::sync::Arc;

use crate::object::{MetricData, MetricObject};
use crate::ranking::RankingCollection;

/// Candidate-acceptance contract consumed by `Bucket::evaluate`.
pub trait RankingOperation<T: MetricData>: Send {
    /// The query object candidates are ranked against.
    fn query_object(&self) -> &MetricObject<T>;

    /// Mutable access to the query object (e.g. to seed its filter chain
    /// with pivot distances before evaluation).
    fn query_object_mut(&mut self) -> &mut MetricObject<T>;

    /// The current acceptance radius: candidates provably farther than this
    /// cannot enter the answer, so evaluators use it both as the
    /// filter-chain pruning radius and the distance-computation threshold
    /// hint.
    fn accept_radius(&self) -> f32;

    /// Present a candidate with its computed distance. Returns `true` when
    /// the candidate entered the answer.
    fn add_candidate(&mut self, object: &MetricObject<T>, distance: f32) -> bool;

    /// The answer accumulated so far.
    fn answer(&self) -> &RankingCollection<T>;

    /// Mutable access to the answer (used for merging partial results).
    fn answer_mut(&mut self) -> &mut RankingCollection<T>;

    /// Consume the operation, returning its answer.
    fn into_answer(self) -> RankingCollection<T>
    where
        Self: Sized;
}

/// Range query: all objects within `radius` of the query object.
#[derive(Debug, Clone)]
pub struct RangeQuery<T: MetricData> {
    query: MetricObject<T>,
    radius: f32,
    answer: RankingCollection<T>,
}

impl<T: MetricData> RangeQuery<T> {
    /// Create a range query with an unbounded answer.
    pub fn new(query: MetricObject<T>, radius: f32) -> Self {
        RangeQuery {
            query,
            radius,
            answer: RankingCollection::unbounded(),
        }
    }

    /// Create a range query whose answer is additionally bounded to
    /// `max_answer_size` entries.
    pub fn with_max_answer(query: MetricObject<T>, radius: f32, max_answer_size: usize) -> Self {
        RangeQuery {
            query,
            radius,
            answer: RankingCollection::new(max_answer_size),
        }
    }

    /// The query radius.
    pub fn radius(&self) -> f32 {
        self.radius
    }
}

impl<T: MetricData> RankingOperation<T> for RangeQuery<T> {
    fn query_object(&self) -> &MetricObject<T> {
        &self.query
    }

    fn query_object_mut(&mut self) -> &mut MetricObject<T> {
        &mut self.query
    }

    fn accept_radius(&self) -> f32 {
        // A bounded answer can shrink the effective radius below the query
        // radius once it fills up.
        self.radius.min(self.answer.threshold())
    }

    fn add_candidate(&mut self, object: &MetricObject<T>, distance: f32) -> bool {
        if distance > self.radius {
            return false;
        }
        self.answer
            .add(Arc::new(object.clone()), distance, None)
            .is_some()
    }

    fn answer(&self) -> &RankingCollection<T> {
        &self.answer
    }

    fn answer_mut(&mut self) -> &mut RankingCollection<T> {
        &mut self.answer
    }

    fn into_answer(self) -> RankingCollection<T> {
        self.answer
    }
}

/// k-nearest-neighbor query: the `k` objects closest to the query object.
#[derive(Debug, Clone)]
pub struct KnnQuery<T: MetricData> {
    query: MetricObject<T>,
    k: usize,
    answer: RankingCollection<T>,
}

impl<T: MetricData> KnnQuery<T> {
    /// Create a k-nearest-neighbor query.
    pub fn new(query: MetricObject<T>, k: usize) -> Self {
        KnnQuery {
            query,
            k,
            answer: RankingCollection::new(k),
        }
    }

    /// The number of neighbors requested.
    pub fn k(&self) -> usize {
        self.k
    }
}

impl<T: MetricData> RankingOperation<T> for KnnQuery<T> {
    fn query_object(&self) -> &MetricObject<T> {
        &self.query
    }

    fn query_object_mut(&mut self) -> &mut MetricObject<T> {
        &mut self.query
    }

    fn accept_radius(&self) -> f32 {
        self.answer.threshold()
    }

    fn add_candidate(&mut self, object: &MetricObject<T>, distance: f32) -> bool {
        self.answer
            .add(Arc::new(object.clone()), distance, None)
            .is_some()
    }

    fn answer(&self) -> &RankingCollection<T> {
        &self.answer
    }

    fn answer_mut(&mut self) -> &mut RankingCollection<T> {
        &mut self.answer
    }

    fn into_answer(self) -> RankingCollection<T> {
        self.answer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::MAX_DISTANCE;
    use crate::object::impls::FloatVector;

    fn obj(locator: &str, value: f32) -> MetricObject<FloatVector> {
        MetricObject::new(locator, FloatVector::new(vec![value]))
    }

    #[test]
    fn test_range_query_accepts_within_radius() {
        let mut query = RangeQuery::new(obj("q", 0.0), 2.0);
        assert!(query.add_candidate(&obj("a", 1.0), 1.0));
        assert!(!query.add_candidate(&obj("b", 5.0), 5.0));
        assert_eq!(query.answer().len(), 1);
        assert_eq!(query.accept_radius(), 2.0);
    }

    #[test]
    fn test_knn_radius_tightens_as_answer_fills() {
        let mut query = KnnQuery::new(obj("q", 0.0), 2);
        assert_eq!(query.accept_radius(), MAX_DISTANCE);

        query.add_candidate(&obj("a", 1.0), 1.0);
        query.add_candidate(&obj("b", 3.0), 3.0);
        assert_eq!(query.accept_radius(), 3.0);

        query.add_candidate(&obj("c", 2.0), 2.0);
        assert_eq!(query.accept_radius(), 2.0);
    }
}
