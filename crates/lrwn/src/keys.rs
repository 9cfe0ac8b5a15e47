// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! AES-128 key material.

use crate::{Error, Result};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// 128-bit AES key (session keys, KEKs, the Class B all-zero ping key).
///
/// Debug output is redacted; keys only render in full via `to_string()`
/// on an explicit call site.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct AES128Key(pub [u8; 16]);

impl AES128Key {
    pub const fn new(bytes: [u8; 16]) -> Self {
        AES128Key(bytes)
    }

    pub const fn null() -> Self {
        AES128Key([0; 16])
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Debug for AES128Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AES128Key(..{:02x}{:02x})", self.0[14], self.0[15])
    }
}

impl fmt::Display for AES128Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for AES128Key {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let b = hex::decode(s).map_err(|_| Error::InvalidHex(s.to_string()))?;
        let arr: [u8; 16] = b
            .try_into()
            .map_err(|_| Error::InvalidHex(s.to_string()))?;
        Ok(AES128Key(arr))
    }
}

impl Serialize for AES128Key {
    fn serialize<S: Serializer>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for AES128Key {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> core::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_hex_roundtrip() {
        let key = AES128Key([1, 2, 3, 4, 5, 6, 7, 8, 1, 2, 3, 4, 5, 6, 7, 8]);
        let s = key.to_string();
        assert_eq!(s, "01020304050607080102030405060708");
        assert_eq!(s.parse::<AES128Key>().unwrap(), key);
    }

    #[test]
    fn test_debug_is_redacted() {
        let key = AES128Key([0xff; 16]);
        let dbg = format!("{:?}", key);
        assert!(!dbg.contains("ffffffffffffffffffffffffffffffff"));
    }
}
