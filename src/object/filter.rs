//! Precomputed-distance filters and per-object filter chains.
//!
//! A [`FilterChain`] holds an ordered set of precomputed-distance records for
//! one metric object. During query evaluation the chain is consulted before
//! the real distance function: using only stored distances and the triangle
//! inequality (`|d(o,p) - d(q,p)| <= d(o,q)`) it can *prove* that an object
//! lies outside ([`FilterChain::exclude`]) or inside
//! ([`FilterChain::include`]) a query radius. Whenever no proof is possible
//! the chain abstains and the caller falls back to the exact distance; a
//! `false` answer never implies anything about the real distance.

use ahash::AHashMap;

/// Tag identifying the type of a [`FilterRecord`] within a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterTag {
    /// Distances to a fixed, shared, ordered pivot list.
    PivotArray,
    /// Distances keyed by pivot locator.
    PivotMap,
}

/// A typed, ordered entry in an object's filter chain.
#[derive(Debug, Clone)]
pub enum FilterRecord {
    /// Distances to a fixed, shared, ordered pivot list.
    PivotArray(PivotArrayFilter),
    /// Distances keyed by pivot locator.
    PivotMap(PivotMapFilter),
}

impl FilterRecord {
    /// The tag of this record.
    pub fn tag(&self) -> FilterTag {
        match self {
            FilterRecord::PivotArray(_) => FilterTag::PivotArray,
            FilterRecord::PivotMap(_) => FilterTag::PivotMap,
        }
    }

    /// Exclusion proof between two records of the same type.
    fn exclude(&self, other: &FilterRecord, radius: f32) -> bool {
        match (self, other) {
            (FilterRecord::PivotArray(a), FilterRecord::PivotArray(b)) => a.exclude(b, radius),
            (FilterRecord::PivotMap(a), FilterRecord::PivotMap(b)) => a.exclude(b, radius),
            _ => false,
        }
    }

    /// Inclusion proof between two records of the same type.
    fn include(&self, other: &FilterRecord, radius: f32) -> bool {
        match (self, other) {
            (FilterRecord::PivotArray(a), FilterRecord::PivotArray(b)) => a.include(b, radius),
            (FilterRecord::PivotMap(a), FilterRecord::PivotMap(b)) => a.include(b, radius),
            _ => false,
        }
    }
}

/// The canonical filter: distances from the object to a fixed, shared,
/// ordered list of pivots.
///
/// Two objects carrying this filter against the same pivot list can be
/// compared position by position. Only the common prefix of the two arrays
/// is used, so an object filtered against fewer pivots still prunes.
#[derive(Debug, Clone, Default)]
pub struct PivotArrayFilter {
    distances: Vec<f32>,
}

impl PivotArrayFilter {
    /// Create an empty filter.
    pub fn new() -> Self {
        PivotArrayFilter::default()
    }

    /// Create a filter from precomputed pivot distances.
    pub fn from_distances(distances: Vec<f32>) -> Self {
        PivotArrayFilter { distances }
    }

    /// Append the distance to the next pivot of the shared list.
    pub fn push_distance(&mut self, distance: f32) {
        self.distances.push(distance);
    }

    /// The stored pivot distances, in pivot-list order.
    pub fn distances(&self) -> &[f32] {
        &self.distances
    }

    /// Number of pivots this object has been filtered against.
    pub fn len(&self) -> usize {
        self.distances.len()
    }

    /// Whether no pivot distances are stored.
    pub fn is_empty(&self) -> bool {
        self.distances.is_empty()
    }

    fn exclude(&self, other: &PivotArrayFilter, radius: f32) -> bool {
        self.distances
            .iter()
            .zip(other.distances.iter())
            .any(|(a, b)| (a - b).abs() > radius)
    }

    fn include(&self, other: &PivotArrayFilter, radius: f32) -> bool {
        self.distances
            .iter()
            .zip(other.distances.iter())
            .any(|(a, b)| a + b <= radius)
    }
}

/// Precomputed distances keyed by pivot locator.
///
/// Unlike [`PivotArrayFilter`] this record does not require the two objects
/// to share a pivot list: pruning uses the intersection of the stored
/// locator sets. It also serves as a direct distance getter — when the
/// other object itself is among the stored keys, its exact distance is known
/// without any computation.
#[derive(Debug, Clone, Default)]
pub struct PivotMapFilter {
    distances: AHashMap<String, f32>,
}

impl PivotMapFilter {
    /// Create an empty filter.
    pub fn new() -> Self {
        PivotMapFilter::default()
    }

    /// Store the distance to the pivot identified by `locator`.
    pub fn insert_distance<S: Into<String>>(&mut self, locator: S, distance: f32) {
        self.distances.insert(locator.into(), distance);
    }

    /// The stored distance to the pivot identified by `locator`, if any.
    pub fn distance_to(&self, locator: &str) -> Option<f32> {
        self.distances.get(locator).copied()
    }

    /// Number of stored pivot distances.
    pub fn len(&self) -> usize {
        self.distances.len()
    }

    /// Whether no pivot distances are stored.
    pub fn is_empty(&self) -> bool {
        self.distances.is_empty()
    }

    fn exclude(&self, other: &PivotMapFilter, radius: f32) -> bool {
        self.distances.iter().any(|(locator, a)| {
            other
                .distances
                .get(locator)
                .is_some_and(|b| (a - b).abs() > radius)
        })
    }

    fn include(&self, other: &PivotMapFilter, radius: f32) -> bool {
        self.distances.iter().any(|(locator, a)| {
            other
                .distances
                .get(locator)
                .is_some_and(|b| a + b <= radius)
        })
    }
}

/// Ordered set of precomputed-distance records owned by one metric object.
///
/// Records are appended at the tail; lookup is by [`FilterTag`] and returns
/// the first matching record.
#[derive(Debug, Clone, Default)]
pub struct FilterChain {
    records: Vec<FilterRecord>,
}

impl FilterChain {
    /// Create an empty chain.
    pub fn new() -> Self {
        FilterChain::default()
    }

    /// Whether the chain holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of records in the chain.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// The first record with the given tag, if any.
    pub fn get(&self, tag: FilterTag) -> Option<&FilterRecord> {
        self.records.iter().find(|r| r.tag() == tag)
    }

    /// Mutable access to the first record with the given tag, if any.
    pub fn get_mut(&mut self, tag: FilterTag) -> Option<&mut FilterRecord> {
        self.records.iter_mut().find(|r| r.tag() == tag)
    }

    /// Append a record at the tail of the chain.
    ///
    /// With `replace_if_exists` the first record of the same tag is replaced
    /// instead and the previous record is returned; otherwise an existing
    /// record of the same tag is left in place and the new record is still
    /// appended after it.
    pub fn chain(&mut self, record: FilterRecord, replace_if_exists: bool) -> Option<FilterRecord> {
        if replace_if_exists {
            if let Some(slot) = self.records.iter_mut().find(|r| r.tag() == record.tag()) {
                return Some(std::mem::replace(slot, record));
            }
        }
        self.records.push(record);
        None
    }

    /// Remove the first record with the given tag and return it.
    pub fn unchain(&mut self, tag: FilterTag) -> Option<FilterRecord> {
        let pos = self.records.iter().position(|r| r.tag() == tag)?;
        Some(self.records.remove(pos))
    }

    /// Destroy the chain, returning ownership of all records to the caller.
    pub fn destroy(&mut self) -> Vec<FilterRecord> {
        std::mem::take(&mut self.records)
    }

    /// Iterate over the records in chain order.
    pub fn iter(&self) -> impl Iterator<Item = &FilterRecord> {
        self.records.iter()
    }

    /// A directly precomputed distance to the object identified by
    /// `locator`, if any record stores one.
    pub fn precomputed_distance(&self, locator: &str) -> Option<f32> {
        self.records.iter().find_map(|r| match r {
            FilterRecord::PivotMap(m) => m.distance_to(locator),
            _ => None,
        })
    }

    /// Returns `true` only if some pair of compatible records proves that
    /// the distance between the two owning objects exceeds `radius`.
    ///
    /// A `false` result means "no proof", not "within radius".
    pub fn exclude(&self, other: &FilterChain, radius: f32) -> bool {
        self.records.iter().any(|a| {
            other
                .records
                .iter()
                .any(|b| a.tag() == b.tag() && a.exclude(b, radius))
        })
    }

    /// Returns `true` only if some pair of compatible records proves that
    /// the distance between the two owning objects is at most `radius`.
    ///
    /// A `false` result means "no proof", not "outside radius".
    pub fn include(&self, other: &FilterChain, radius: f32) -> bool {
        self.records.iter().any(|a| {
            other
                .records
                .iter()
                .any(|b| a.tag() == b.tag() && a.include(b, radius))
        })
    }
}
