//! Object keys: locator URIs with an optional sortable component.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// Key attached to every stored metric object.
///
/// The locator is a caller-assigned identifier string. It is meaningful to
/// the caller (typically a URI) but is *not* guaranteed to be unique and is
/// distinct from the storage-internal identity a bucket assigns on insert.
/// The optional sort key is used by ordered bucket indexes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectKey {
    /// Caller-assigned locator URI.
    locator: String,
    /// Optional sortable component for ordered indexes.
    sort_key: Option<f64>,
}

impl ObjectKey {
    /// Create a key with a locator only.
    pub fn new<S: Into<String>>(locator: S) -> Self {
        ObjectKey {
            locator: locator.into(),
            sort_key: None,
        }
    }

    /// Create a key with a locator and a sortable component.
    pub fn with_sort_key<S: Into<String>>(locator: S, sort_key: f64) -> Self {
        ObjectKey {
            locator: locator.into(),
            sort_key: Some(sort_key),
        }
    }

    /// The locator URI of this key.
    pub fn locator(&self) -> &str {
        &self.locator
    }

    /// The sortable component of this key, if any.
    pub fn sort_key(&self) -> Option<f64> {
        self.sort_key
    }

    /// Total order used by ordered bucket indexes.
    ///
    /// Keys without a sort key order before keyed ones; ties are broken by
    /// the locator so that the order is deterministic.
    pub fn cmp_sortable(&self, other: &Self) -> Ordering {
        match (self.sort_key, other.sort_key) {
            (None, None) => self.locator.cmp(&other.locator),
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(a), Some(b)) => a
                .total_cmp(&b)
                .then_with(|| self.locator.cmp(&other.locator)),
        }
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.sort_key {
            Some(k) => write!(f, "{} ({k})", self.locator),
            None => write!(f, "{}", self.locator),
        }
    }
}
