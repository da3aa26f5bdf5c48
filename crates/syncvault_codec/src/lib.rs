//! # SyncVault Codec
//!
//! Canonical CBOR encoding for record payloads.
//!
//! Every payload stored by SyncVault goes through this crate so that two
//! logically equal records always produce identical bytes:
//! - Maps are sorted by key (length of the encoded key, then bytewise)
//! - Integers use shortest encoding
//! - No floats
//! - No indefinite-length items
//!
//! ## Usage
//!
//! ```
//! use syncvault_codec::{Decode, Encode};
//! use std::collections::BTreeMap;
//!
//! let mut labels = BTreeMap::new();
//! labels.insert("team".to_string(), "infra".to_string());
//!
//! let bytes = labels.encode().unwrap();
//! let back = BTreeMap::<String, String>::decode(&bytes).unwrap();
//! assert_eq!(back, labels);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod canonical;
mod error;

pub use canonical::{canonicalize, from_cbor, to_canonical_cbor};
pub use ciborium::Value;
pub use error::{CodecError, CodecResult};

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Trait for types that can be encoded to canonical CBOR.
pub trait Encode {
    /// Encode this value to canonical CBOR bytes.
    fn encode(&self) -> CodecResult<Vec<u8>>;
}

/// Trait for types that can be decoded from CBOR.
pub trait Decode: Sized {
    /// Decode this value from CBOR bytes.
    fn decode(bytes: &[u8]) -> CodecResult<Self>;
}

impl<T: Serialize> Encode for T {
    fn encode(&self) -> CodecResult<Vec<u8>> {
        to_canonical_cbor(self)
    }
}

impl<T: DeserializeOwned> Decode for T {
    fn decode(bytes: &[u8]) -> CodecResult<Self> {
        from_cbor(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashMap;

    proptest! {
        #[test]
        fn encoding_ignores_insertion_order(
            entries in proptest::collection::btree_map("[a-z]{1,12}", any::<i64>(), 0..24)
        ) {
            let forward: HashMap<String, i64> = entries.clone().into_iter().collect();
            let mut reversed = HashMap::new();
            for (k, v) in entries.iter().rev() {
                reversed.insert(k.clone(), *v);
            }
            prop_assert_eq!(forward.encode().unwrap(), reversed.encode().unwrap());
            prop_assert_eq!(forward.encode().unwrap(), entries.encode().unwrap());
        }
    }

    #[test]
    fn decode_matches_encode() {
        let value = vec![Some(1u32), None, Some(3)];
        let bytes = value.encode().unwrap();
        assert_eq!(Vec::<Option<u32>>::decode(&bytes).unwrap(), value);
    }
}
