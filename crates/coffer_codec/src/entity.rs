//! Generic entity serializer (the L0 layer: entity <-> opaque byte buffer).
//!
//! Providers never interpret the bytes they store; they only need a
//! deterministic, round-trip-safe mapping from a caller's entity type to
//! `Vec<u8>` and back. This module is that mapping, built directly on
//! `ciborium`'s `serde` support rather than on [`crate::Value`] — callers
//! bring ordinary `#[derive(Serialize, Deserialize)]` structs, not `Value`
//! trees.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{CodecError, CodecResult};

/// Serializes an entity to its opaque byte representation.
///
/// # Errors
///
/// Returns [`CodecError::EncodingFailed`] if the value cannot be represented
/// in CBOR (this can only happen for types whose `Serialize` impl produces
/// a float `NaN`/`Infinity` or an unsupported construct).
pub fn encode_entity<T: Serialize>(value: &T) -> CodecResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(value, &mut buf)
        .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
    Ok(buf)
}

/// Deserializes an entity from its opaque byte representation.
///
/// # Errors
///
/// Returns [`CodecError::DecodingFailed`] if `bytes` is not valid CBOR or
/// does not match the shape `T` expects.
pub fn decode_entity<T: DeserializeOwned>(bytes: &[u8]) -> CodecResult<T> {
    ciborium::de::from_reader(bytes).map_err(|e| CodecError::decoding_failed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Product {
        name: String,
        qty: u32,
    }

    #[test]
    fn roundtrip_struct() {
        let p = Product {
            name: "X".to_string(),
            qty: 1,
        };
        let bytes = encode_entity(&p).unwrap();
        let decoded: Product = decode_entity(&bytes).unwrap();
        assert_eq!(p, decoded);
    }

    #[test]
    fn deterministic_encoding() {
        let p = Product {
            name: "widget".to_string(),
            qty: 7,
        };
        let a = encode_entity(&p).unwrap();
        let b = encode_entity(&p).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn decode_garbage_fails() {
        let result: CodecResult<Product> = decode_entity(&[0xff, 0x00, 0x01]);
        assert!(result.is_err());
    }
}
