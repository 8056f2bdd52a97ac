//! Pluggable bucket index strategies.
//!
//! A bucket delegates object storage to a [`BucketIndex`] strategy. The
//! closed set of strategies is enumerated by [`BucketVariant`]; new buckets
//! are created through the variant's factory rather than by naming a
//! concrete index type. Every strategy keys objects by the storage sequence
//! number the bucket assigns on insert — that number is the storage
//! identity, deliberately distinct from locator and data-equality.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{ProximaError, Result};
use crate::object::{MetricData, MetricObject, ObjectKey};

/// The closed set of bucket index strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BucketVariant {
    /// Objects kept in insertion order.
    Memory,
    /// Objects iterated in object-key order.
    Ordered,
    /// Insertion-ordered, rejecting data-equal duplicates.
    NoDup,
}

impl BucketVariant {
    /// Create an empty index of this variant.
    pub(crate) fn create_index<T: MetricData>(self) -> Box<dyn BucketIndex<T>> {
        match self {
            BucketVariant::Memory => Box::new(MemoryIndex::default()),
            BucketVariant::Ordered => Box::new(OrderedIndex::default()),
            BucketVariant::NoDup => Box::new(NoDupIndex::default()),
        }
    }
}

/// Storage strategy contract.
///
/// Structural mutation is serialized by the owning bucket; implementations
/// need no internal locking.
pub trait BucketIndex<T: MetricData>: Send {
    /// Insert an object under the given storage sequence number.
    ///
    /// The no-duplicate strategy fails with `DuplicateObject` when a
    /// data-equal object is already present.
    fn insert(&mut self, seq: u64, object: MetricObject<T>) -> Result<()>;

    /// The object stored under `seq`, if any.
    fn get(&self, seq: u64) -> Option<&MetricObject<T>>;

    /// Remove and return the object stored under `seq`.
    fn remove(&mut self, seq: u64) -> Option<MetricObject<T>>;

    /// Number of stored objects.
    fn len(&self) -> usize;

    /// Iterate over `(seq, object)` pairs in the strategy's order.
    fn iter<'a>(&'a self) -> Box<dyn Iterator<Item = (u64, &'a MetricObject<T>)> + 'a>;

    /// Remove all objects, returning how many were released.
    fn clear(&mut self) -> usize;

    /// Release idle backing resources without discarding logical contents.
    /// Memory-backed strategies have nothing to release.
    fn release_idle(&self) -> bool {
        false
    }
}

/// Insertion-ordered in-memory index.
#[derive(Debug)]
pub struct MemoryIndex<T: MetricData> {
    objects: BTreeMap<u64, MetricObject<T>>,
}

impl<T: MetricData> Default for MemoryIndex<T> {
    fn default() -> Self {
        MemoryIndex {
            objects: BTreeMap::new(),
        }
    }
}

impl<T: MetricData> BucketIndex<T> for MemoryIndex<T> {
    fn insert(&mut self, seq: u64, object: MetricObject<T>) -> Result<()> {
        self.objects.insert(seq, object);
        Ok(())
    }

    fn get(&self, seq: u64) -> Option<&MetricObject<T>> {
        self.objects.get(&seq)
    }

    fn remove(&mut self, seq: u64) -> Option<MetricObject<T>> {
        self.objects.remove(&seq)
    }

    fn len(&self) -> usize {
        self.objects.len()
    }

    fn iter<'a>(&'a self) -> Box<dyn Iterator<Item = (u64, &'a MetricObject<T>)> + 'a> {
        Box::new(self.objects.iter().map(|(seq, obj)| (*seq, obj)))
    }

    fn clear(&mut self) -> usize {
        let released = self.objects.len();
        self.objects.clear();
        released
    }
}

/// Object-key wrapper giving a total order for the ordered index.
#[derive(Debug, Clone)]
struct OrdKey(ObjectKey);

impl PartialEq for OrdKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.cmp_sortable(&other.0).is_eq()
    }
}

impl Eq for OrdKey {}

impl PartialOrd for OrdKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrdKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp_sortable(&other.0)
    }
}

/// Index iterating objects in object-key order.
#[derive(Debug)]
pub struct OrderedIndex<T: MetricData> {
    objects: BTreeMap<u64, MetricObject<T>>,
    order: BTreeMap<(OrdKey, u64), ()>,
}

impl<T: MetricData> Default for OrderedIndex<T> {
    fn default() -> Self {
        OrderedIndex {
            objects: BTreeMap::new(),
            order: BTreeMap::new(),
        }
    }
}

impl<T: MetricData> BucketIndex<T> for OrderedIndex<T> {
    fn insert(&mut self, seq: u64, object: MetricObject<T>) -> Result<()> {
        self.order.insert((OrdKey(object.key().clone()), seq), ());
        self.objects.insert(seq, object);
        Ok(())
    }

    fn get(&self, seq: u64) -> Option<&MetricObject<T>> {
        self.objects.get(&seq)
    }

    fn remove(&mut self, seq: u64) -> Option<MetricObject<T>> {
        let object = self.objects.remove(&seq)?;
        self.order.remove(&(OrdKey(object.key().clone()), seq));
        Some(object)
    }

    fn len(&self) -> usize {
        self.objects.len()
    }

    fn iter<'a>(&'a self) -> Box<dyn Iterator<Item = (u64, &'a MetricObject<T>)> + 'a> {
        Box::new(
            self.order
                .keys()
                .map(|(_, seq)| (*seq, &self.objects[seq])),
        )
    }

    fn clear(&mut self) -> usize {
        let released = self.objects.len();
        self.objects.clear();
        self.order.clear();
        released
    }
}

/// Insertion-ordered index rejecting data-equal duplicates.
///
/// Duplicate detection goes through an ordered index on the objects' data
/// hashes, so an insert costs O(log n) plus one data-equality comparison
/// per hash collision.
#[derive(Debug)]
pub struct NoDupIndex<T: MetricData> {
    objects: BTreeMap<u64, MetricObject<T>>,
    hashes: BTreeMap<(u64, u64), ()>,
}

impl<T: MetricData> Default for NoDupIndex<T> {
    fn default() -> Self {
        NoDupIndex {
            objects: BTreeMap::new(),
            hashes: BTreeMap::new(),
        }
    }
}

impl<T: MetricData> BucketIndex<T> for NoDupIndex<T> {
    fn insert(&mut self, seq: u64, object: MetricObject<T>) -> Result<()> {
        let hash = object.data().data_hash();
        let colliding = self
            .hashes
            .range((hash, 0)..=(hash, u64::MAX))
            .map(|((_, seq), _)| *seq);
        for existing_seq in colliding {
            if self.objects[&existing_seq].data_eq(&object) {
                return Err(ProximaError::duplicate_object(format!(
                    "object '{}' is data-equal to a stored object",
                    object.locator()
                )));
            }
        }
        self.hashes.insert((hash, seq), ());
        self.objects.insert(seq, object);
        Ok(())
    }

    fn get(&self, seq: u64) -> Option<&MetricObject<T>> {
        self.objects.get(&seq)
    }

    fn remove(&mut self, seq: u64) -> Option<MetricObject<T>> {
        let object = self.objects.remove(&seq)?;
        self.hashes.remove(&(object.data().data_hash(), seq));
        Some(object)
    }

    fn len(&self) -> usize {
        self.objects.len()
    }

    fn iter<'a>(&'a self) -> Box<dyn Iterator<Item = (u64, &'a MetricObject<T>)> + 'a> {
        Box::new(self.objects.iter().map(|(seq, obj)| (*seq, obj)))
    }

    fn clear(&mut self) -> usize {
        let released = self.objects.len();
        self.objects.clear();
        self.hashes.clear();
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::impls::FloatVector;

    fn obj(locator: &str, value: f32) -> MetricObject<FloatVector> {
        MetricObject::new(locator, FloatVector::new(vec![value]))
    }

    #[test]
    fn test_no_dup_rejects_data_equal() {
        let mut index = NoDupIndex::default();
        index.insert(1, obj("a", 1.0)).unwrap();

        let err = index.insert(2, obj("b", 1.0)).unwrap_err();
        assert!(matches!(err, ProximaError::DuplicateObject(_)));
        assert_eq!(index.len(), 1);

        // Different data under the same locator is fine.
        index.insert(3, obj("a", 2.0)).unwrap();
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_no_dup_allows_reinsert_after_removal() {
        let mut index = NoDupIndex::default();
        index.insert(1, obj("a", 1.0)).unwrap();
        index.remove(1).unwrap();
        index.insert(2, obj("a", 1.0)).unwrap();
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_ordered_iterates_in_key_order() {
        let mut index = OrderedIndex::default();
        index
            .insert(
                1,
                MetricObject::with_key(
                    ObjectKey::with_sort_key("b", 2.0),
                    FloatVector::new(vec![0.0]),
                ),
            )
            .unwrap();
        index
            .insert(
                2,
                MetricObject::with_key(
                    ObjectKey::with_sort_key("a", 1.0),
                    FloatVector::new(vec![0.0]),
                ),
            )
            .unwrap();

        let locators: Vec<&str> = index.iter().map(|(_, o)| o.locator()).collect();
        assert_eq!(locators, vec!["a", "b"]);

        index.remove(2).unwrap();
        let locators: Vec<&str> = index.iter().map(|(_, o)| o.locator()).collect();
        assert_eq!(locators, vec!["b"]);
    }

    #[test]
    fn test_memory_keeps_insertion_order() {
        let mut index = MemoryIndex::default();
        index.insert(5, obj("x", 1.0)).unwrap();
        index.insert(7, obj("y", 2.0)).unwrap();
        let locators: Vec<&str> = index.iter().map(|(_, o)| o.locator()).collect();
        assert_eq!(locators, vec!["x", "y"]);
    }
}
