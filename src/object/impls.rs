//! Reference payload implementations.
//!
//! These are the two payloads used throughout the tests and benchmarks:
//! a float vector under the L2 metric and a string under edit distance.
//! They double as templates for implementing [`MetricData`] on caller types.

use serde::{Deserialize, Serialize};

use crate::object::{MetricData, stable_hash};

/// Float vector compared by Euclidean (L2) distance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FloatVector {
    data: Vec<f32>,
}

impl FloatVector {
    /// Create a vector payload.
    pub fn new(data: Vec<f32>) -> Self {
        FloatVector { data }
    }

    /// The vector components.
    pub fn values(&self) -> &[f32] {
        &self.data
    }

    /// Vector dimensionality.
    pub fn dimension(&self) -> usize {
        self.data.len()
    }
}

impl MetricData for FloatVector {
    fn distance(&self, other: &Self, threshold: f32) -> f32 {
        let threshold_sq = if threshold < f32::MAX {
            threshold * threshold
        } else {
            f32::MAX
        };
        let mut sum = 0.0f32;
        for (a, b) in self.data.iter().zip(other.data.iter()) {
            let diff = a - b;
            sum += diff * diff;
            // Monotone partial sum allows an early abort past the threshold.
            if sum > threshold_sq {
                return sum.sqrt();
            }
        }
        sum.sqrt()
    }

    fn data_eq(&self, other: &Self) -> bool {
        self.data == other.data
    }

    fn data_hash(&self) -> u64 {
        let bits: Vec<u32> = self.data.iter().map(|v| v.to_bits()).collect();
        stable_hash(&bits)
    }
}

/// String compared by Levenshtein edit distance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditString {
    text: String,
}

impl EditString {
    /// Create a string payload.
    pub fn new<S: Into<String>>(text: S) -> Self {
        EditString { text: text.into() }
    }

    /// The underlying text.
    pub fn text(&self) -> &str {
        &self.text
    }
}

impl MetricData for EditString {
    fn distance(&self, other: &Self, threshold: f32) -> f32 {
        let a: Vec<char> = self.text.chars().collect();
        let b: Vec<char> = other.text.chars().collect();
        if a.is_empty() {
            return b.len() as f32;
        }
        if b.is_empty() {
            return a.len() as f32;
        }

        let mut prev: Vec<usize> = (0..=b.len()).collect();
        let mut curr = vec![0usize; b.len() + 1];

        for (i, ca) in a.iter().enumerate() {
            curr[0] = i + 1;
            let mut row_min = curr[0];
            for (j, cb) in b.iter().enumerate() {
                let cost = usize::from(ca != cb);
                curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
                row_min = row_min.min(curr[j + 1]);
            }
            // Every remaining row can only grow, so once the row minimum
            // passes the threshold the exact value no longer matters.
            if threshold < f32::MAX && row_min as f32 > threshold {
                return row_min as f32;
            }
            std::mem::swap(&mut prev, &mut curr);
        }
        prev[b.len()] as f32
    }

    fn data_eq(&self, other: &Self) -> bool {
        self.text == other.text
    }

    fn data_hash(&self) -> u64 {
        stable_hash(self.text.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_l2_distance() {
        let a = FloatVector::new(vec![0.0, 0.0]);
        let b = FloatVector::new(vec![3.0, 4.0]);
        assert_eq!(a.distance(&b, f32::MAX), 5.0);
        assert_eq!(a.distance(&a, f32::MAX), 0.0);
    }

    #[test]
    fn test_l2_early_abort_exceeds_threshold() {
        let a = FloatVector::new(vec![0.0; 64]);
        let b = FloatVector::new(vec![10.0; 64]);
        // The exact distance is 80; anything above the threshold satisfies
        // the contract.
        assert!(a.distance(&b, 1.0) > 1.0);
    }

    #[test]
    fn test_edit_distance() {
        let a = EditString::new("kitten");
        let b = EditString::new("sitting");
        assert_eq!(a.distance(&b, f32::MAX), 3.0);
        assert_eq!(a.distance(&a, f32::MAX), 0.0);
        assert_eq!(EditString::new("").distance(&b, f32::MAX), 7.0);
    }

    #[test]
    fn test_edit_distance_threshold_cutoff() {
        let a = EditString::new("aaaaaaaaaa");
        let b = EditString::new("bbbbbbbbbb");
        assert!(a.distance(&b, 2.0) > 2.0);
    }

    #[test]
    fn test_data_hash_agrees_with_eq() {
        let a = FloatVector::new(vec![1.0, 2.0]);
        let b = FloatVector::new(vec![1.0, 2.0]);
        assert!(a.data_eq(&b));
        assert_eq!(a.data_hash(), b.data_hash());
    }
}
