//! Cross-binding test vectors for canonical CBOR encoding.
//!
//! These exist for any non-Rust binding built against the same wire
//! format to check itself against, via [`all_vectors_json`].

use serde::{Deserialize, Serialize};

use crate::golden::{hex_decode, hex_encode};

/// A test vector that can be shared across languages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestVector {
    /// Unique identifier for this vector.
    pub id: String,
    /// Human-readable description.
    pub description: String,
    /// Input data (hex-encoded).
    pub input_hex: String,
    /// Expected output data (hex-encoded).
    pub expected_hex: String,
}

/// Canonical CBOR encoding vectors, covering the integer shortest-encoding
/// boundaries, text/byte strings, arrays, and canonical map key ordering
/// that `coffer_codec` promises.
#[must_use]
pub fn cbor_encoding_vectors() -> Vec<TestVector> {
    vec![
        vector("cbor_null", "CBOR null value", "f6"),
        vector("cbor_true", "CBOR true value", "f5"),
        vector("cbor_false", "CBOR false value", "f4"),
        vector("cbor_int_0", "CBOR integer 0", "00"),
        vector("cbor_int_23", "CBOR integer 23 (largest 1-byte)", "17"),
        vector("cbor_int_24", "CBOR integer 24 (smallest 2-byte)", "1818"),
        vector("cbor_int_255", "CBOR integer 255", "18ff"),
        vector("cbor_int_256", "CBOR integer 256", "190100"),
        vector("cbor_int_neg1", "CBOR integer -1", "20"),
        vector("cbor_int_neg100", "CBOR integer -100", "3863"),
        vector("cbor_text_empty", "CBOR empty text string", "60"),
        vector("cbor_text_hello", "CBOR text string 'hello'", "6568656c6c6f"),
        vector("cbor_bytes_empty", "CBOR empty byte string", "40"),
        vector(
            "cbor_bytes_data",
            "CBOR byte string [0x01, 0x02, 0x03]",
            "43010203",
        ),
        vector("cbor_array_empty", "CBOR empty array", "80"),
        vector("cbor_array_123", "CBOR array [1, 2, 3]", "83010203"),
        vector("cbor_map_empty", "CBOR empty map", "a0"),
        vector(
            "cbor_map_simple",
            "CBOR map {'a': 1, 'b': 2} (canonical order)",
            "a2616101616202",
        ),
    ]
}

fn vector(id: &str, description: &str, hex: &str) -> TestVector {
    TestVector {
        id: id.to_string(),
        description: description.to_string(),
        input_hex: hex.to_string(),
        expected_hex: hex.to_string(),
    }
}

/// Renders [`cbor_encoding_vectors`] as pretty JSON for a non-Rust binding
/// to load and replay.
#[must_use]
pub fn all_vectors_json() -> String {
    serde_json::to_string_pretty(&cbor_encoding_vectors())
        .expect("test vectors are always serializable")
}

#[cfg(test)]
mod tests {
    use super::*;
    use coffer_codec::{from_cbor, to_canonical_cbor, Value};

    #[test]
    fn every_vector_round_trips_through_coffer_codec() {
        for vector in cbor_encoding_vectors() {
            let input = hex_decode(&vector.input_hex);
            let value: Value = from_cbor(&input)
                .unwrap_or_else(|e| panic!("{} failed to decode: {e}", vector.id));
            let encoded = to_canonical_cbor(&value)
                .unwrap_or_else(|e| panic!("{} failed to re-encode: {e}", vector.id));
            assert_eq!(
                hex_encode(&encoded),
                vector.expected_hex,
                "{} ({}) did not round-trip canonically",
                vector.id,
                vector.description
            );
        }
    }

    #[test]
    fn json_rendering_is_nonempty_and_contains_known_vector_ids() {
        let json = all_vectors_json();
        assert!(json.contains("cbor_int_256"));
        assert!(json.contains("cbor_map_simple"));
    }
}
