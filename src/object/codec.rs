//! Object serialization seam used by byte-counted buckets.
//!
//! The wire format itself is a collaborator concern; this module only
//! defines the contract a persistence collaborator must satisfy and a
//! default bincode-backed implementation for serde payloads.

use std::marker::PhantomData;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{ProximaError, Result};
use crate::object::{MetricData, MetricObject, ObjectKey};

/// Serialization contract for metric-object payloads.
///
/// Buckets whose occupation is counted in bytes use [`ObjectCodec::size_of`]
/// as the per-object occupation estimate.
pub trait ObjectCodec<T: MetricData>: Send + Sync {
    /// Serialize an object's key and payload.
    fn serialize(&self, object: &MetricObject<T>) -> Result<Vec<u8>>;

    /// Deserialize an object previously produced by
    /// [`ObjectCodec::serialize`]. Filter chains and supplemental data are
    /// surplus and are not round-tripped.
    fn deserialize(&self, bytes: &[u8]) -> Result<MetricObject<T>>;

    /// Estimated serialized size of the object in bytes.
    fn size_of(&self, object: &MetricObject<T>) -> Result<u64>;
}

/// Default codec for payloads that are serde-serializable.
#[derive(Debug, Default)]
pub struct BincodeCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> BincodeCodec<T> {
    /// Create a new bincode codec.
    pub fn new() -> Self {
        BincodeCodec {
            _marker: PhantomData,
        }
    }
}

impl<T> ObjectCodec<T> for BincodeCodec<T>
where
    T: MetricData + Serialize + DeserializeOwned,
{
    fn serialize(&self, object: &MetricObject<T>) -> Result<Vec<u8>> {
        bincode::serialize(&(object.key(), object.data()))
            .map_err(|e| ProximaError::serialization(e.to_string()))
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<MetricObject<T>> {
        let (key, data): (ObjectKey, T) = bincode::deserialize(bytes)
            .map_err(|e| ProximaError::serialization(e.to_string()))?;
        Ok(MetricObject::with_key(key, data))
    }

    fn size_of(&self, object: &MetricObject<T>) -> Result<u64> {
        bincode::serialized_size(&(object.key(), object.data()))
            .map_err(|e| ProximaError::serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::impls::FloatVector;

    #[test]
    fn test_bincode_roundtrip() {
        let codec = BincodeCodec::new();
        let object = MetricObject::new("o1", FloatVector::new(vec![1.0, 2.0, 3.0]));

        let bytes = codec.serialize(&object).unwrap();
        assert_eq!(bytes.len() as u64, codec.size_of(&object).unwrap());

        let restored = codec.deserialize(&bytes).unwrap();
        assert_eq!(restored.locator(), "o1");
        assert!(restored.data().data_eq(object.data()));
    }
}
