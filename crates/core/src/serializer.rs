//! # Typed Persistence
//!
//! Layers and blocks persist themselves as *typed records*: a type tag plus an
//! opaque payload. A [`Registry`] maps type tags back to decoders, so a
//! composite can reload members whose concrete types it never names:
//!
//! ```text
//!   serialize_typed(obj)  ──►  (type tag, obj.serialize())  ──►  bytes
//!   registry.decode_typed(bytes)  ──►  lookup(tag)(payload)  ──►  Box<T>
//! ```
//!
//! Payloads themselves are usually *field records*: any serde value encoded
//! with [`serialize_fields`] and read back with [`deserialize_fields`].
//!
//! ## Example
//!
//! ```rust
//! use seqnet_core::serializer::{deserialize_fields, serialize_fields};
//!
//! let bytes = serialize_fields(&vec![2u64, 2, 4, 4, 1]).unwrap();
//! let fields: Vec<u64> = deserialize_fields(&bytes).unwrap();
//! assert_eq!(fields, vec![2, 2, 4, 4, 1]);
//! ```

use std::collections::HashMap;

use bincode::Options;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::SerializeError;

/// Something that can persist itself as a typed record.
pub trait Serializer: Send + Sync {
    /// The unique type tag stored alongside the payload.
    fn serializer_type(&self) -> &'static str;

    /// Encode the payload.
    fn serialize(&self) -> Result<Vec<u8>, SerializeError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct TypedRecord {
    type_name: String,
    payload: Vec<u8>,
}

fn options() -> impl Options {
    bincode::DefaultOptions::new()
}

/// Encode a serde value as a field record.
pub fn serialize_fields<T: Serialize + ?Sized>(fields: &T) -> Result<Vec<u8>, SerializeError> {
    options()
        .serialize(fields)
        .map_err(|e| SerializeError::Encode(e.to_string()))
}

/// Decode a field record. Trailing bytes are rejected.
pub fn deserialize_fields<T: DeserializeOwned>(data: &[u8]) -> Result<T, SerializeError> {
    Ok(options().deserialize(data)?)
}

/// Encode an object together with its type tag.
pub fn serialize_typed(obj: &dyn Serializer) -> Result<Vec<u8>, SerializeError> {
    let record = TypedRecord {
        type_name: obj.serializer_type().to_string(),
        payload: obj.serialize()?,
    };
    serialize_fields(&record)
}

/// Encode an ordered list of objects, each with its type tag.
pub fn serialize_slice(objs: &[&dyn Serializer]) -> Result<Vec<u8>, SerializeError> {
    let records = objs
        .iter()
        .map(|obj| {
            Ok(TypedRecord {
                type_name: obj.serializer_type().to_string(),
                payload: obj.serialize()?,
            })
        })
        .collect::<Result<Vec<_>, SerializeError>>()?;
    serialize_fields(&records)
}

/// Decoder from a payload to a boxed `T`.
pub type Decoder<T> = fn(&[u8]) -> Result<Box<T>, SerializeError>;

/// Type-tag → decoder table for one family of trait objects.
///
/// Registries are usually process-wide statics (one for blocks, one for
/// layers). Registering the same tag twice replaces the earlier decoder.
pub struct Registry<T: ?Sized> {
    family: &'static str,
    decoders: RwLock<HashMap<&'static str, Decoder<T>>>,
}

impl<T: ?Sized> Registry<T> {
    /// Create an empty registry. `family` names what it decodes in panics.
    pub fn new(family: &'static str) -> Self {
        Self {
            family,
            decoders: RwLock::new(HashMap::new()),
        }
    }

    /// Register a decoder for `type_name`.
    pub fn register(&self, type_name: &'static str, decoder: Decoder<T>) {
        tracing::debug!(family = self.family, type_name, "registered decoder");
        self.decoders.write().insert(type_name, decoder);
    }

    /// Whether a decoder exists for `type_name`.
    pub fn is_registered(&self, type_name: &str) -> bool {
        self.decoders.read().contains_key(type_name)
    }

    /// Number of registered decoders.
    pub fn len(&self) -> usize {
        self.decoders.read().len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.decoders.read().is_empty()
    }

    /// Decode one typed record.
    ///
    /// Panics if the record's type tag was never registered.
    pub fn decode_typed(&self, data: &[u8]) -> Result<Box<T>, SerializeError> {
        let record: TypedRecord = deserialize_fields(data)?;
        self.decode_record(&record)
    }

    /// Decode an ordered list of typed records.
    pub fn decode_slice(&self, data: &[u8]) -> Result<Vec<Box<T>>, SerializeError> {
        let records: Vec<TypedRecord> = deserialize_fields(data)?;
        records
            .iter()
            .map(|record| self.decode_record(record))
            .collect()
    }

    fn decode_record(&self, record: &TypedRecord) -> Result<Box<T>, SerializeError> {
        let decoder = self
            .decoders
            .read()
            .get(record.type_name.as_str())
            .copied();
        match decoder {
            Some(decode) => decode(&record.payload),
            None => panic!(
                "unknown {} type: {}",
                self.family, record.type_name
            ),
        }
    }
}

impl<T: ?Sized> std::fmt::Debug for Registry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.decoders.read().keys().copied().collect();
        names.sort_unstable();
        f.debug_struct("Registry")
            .field("family", &self.family)
            .field("types", &names)
            .finish()
    }
}
