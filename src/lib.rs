//! # Proxima
//!
//! A metric-space similarity search framework.
//!
//! Proxima stores caller-defined objects in capacity-managed buckets and
//! answers ranking queries (range, k-nearest-neighbor) over them by metric
//! distance. The only assumption about the data is a distance function
//! respecting the metric-space axioms; pivot-based precomputed-distance
//! filters prune candidates through the triangle inequality without
//! computing their distance.
//!
//! ## Features
//!
//! - Pure Rust implementation, generic over the stored payload
//! - Object buckets with hard/soft capacities and occupation accounting
//! - Bucket dispatcher with unique ids and lifecycle management
//! - Precomputed-distance filter chains on objects and queries
//! - Capacity-bounded ranked answer collections
//! - Incremental iDistance pivot selection
//! - Sequential and rayon-parallel scan engines

pub mod bucket;
pub mod error;
pub mod object;
pub mod pivot;
pub mod query;
pub mod ranking;
pub mod scan;

pub mod prelude {
    pub use crate::bucket::{
        AdmissionFilter, Bucket, BucketConfig, BucketDispatcher, BucketVariant, DeleteMatch,
        DispatcherConfig, OccupationUnit,
    };
    pub use crate::error::{ProximaError, Result};
    pub use crate::object::{
        FilterChain, FilterRecord, FilterTag, MetricData, MetricObject, ObjectKey,
    };
    pub use crate::pivot::{IdistanceChooser, IdistanceConfig, PivotChooser};
    pub use crate::query::{KnnQuery, RangeQuery, RankingOperation};
    pub use crate::ranking::{RankedCandidate, RankingCollection};
    pub use crate::scan::{ParallelSequentialScan, SequentialScan};
}

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
