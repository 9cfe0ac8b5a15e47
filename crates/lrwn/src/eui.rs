// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! 64-bit EUIs and 32-bit device addresses.
//!
//! Both render as lowercase hex and serialize as hex strings so they can be
//! embedded in cache keys and JSON payloads without further conversion.

use crate::{Error, Result};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// 64-bit extended unique identifier (devices, gateways, join servers).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EUI64(pub [u8; 8]);

impl EUI64 {
    pub const fn new(bytes: [u8; 8]) -> Self {
        EUI64(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; 8]
    }
}

impl fmt::Display for EUI64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for EUI64 {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let b = hex::decode(s).map_err(|_| Error::InvalidHex(s.to_string()))?;
        let arr: [u8; 8] = b
            .try_into()
            .map_err(|_| Error::InvalidHex(s.to_string()))?;
        Ok(EUI64(arr))
    }
}

impl Serialize for EUI64 {
    fn serialize<S: Serializer>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for EUI64 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> core::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

/// 32-bit network address assigned at join time.
///
/// The wire representation is little-endian inside the FHDR; the in-memory
/// representation keeps the bytes in big-endian (display) order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct DevAddr(pub [u8; 4]);

impl DevAddr {
    pub const fn new(bytes: [u8; 4]) -> Self {
        DevAddr(bytes)
    }

    pub fn from_u32(v: u32) -> Self {
        DevAddr(v.to_be_bytes())
    }

    pub fn to_u32(self) -> u32 {
        u32::from_be_bytes(self.0)
    }

    /// Wire order (little-endian) as used inside the FHDR and MIC blocks.
    pub fn to_le_bytes(self) -> [u8; 4] {
        let mut b = self.0;
        b.reverse();
        b
    }

    pub fn from_le_bytes(mut b: [u8; 4]) -> Self {
        b.reverse();
        DevAddr(b)
    }
}

impl fmt::Display for DevAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for DevAddr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let b = hex::decode(s).map_err(|_| Error::InvalidHex(s.to_string()))?;
        let arr: [u8; 4] = b
            .try_into()
            .map_err(|_| Error::InvalidHex(s.to_string()))?;
        Ok(DevAddr(arr))
    }
}

impl Serialize for DevAddr {
    fn serialize<S: Serializer>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for DevAddr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> core::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eui64_hex_roundtrip() {
        let eui = EUI64([1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(eui.to_string(), "0102030405060708");
        assert_eq!("0102030405060708".parse::<EUI64>().unwrap(), eui);
    }

    #[test]
    fn test_eui64_rejects_bad_hex() {
        assert!("zz".parse::<EUI64>().is_err());
        assert!("010203".parse::<EUI64>().is_err());
    }

    #[test]
    fn test_devaddr_le_roundtrip() {
        let addr = DevAddr([1, 2, 3, 4]);
        assert_eq!(addr.to_le_bytes(), [4, 3, 2, 1]);
        assert_eq!(DevAddr::from_le_bytes([4, 3, 2, 1]), addr);
        assert_eq!(addr.to_u32(), 0x0102_0304);
    }

    #[test]
    fn test_devaddr_serde_as_hex_string() {
        let addr = DevAddr([0x01, 0xab, 0xcd, 0xef]);
        let js = serde_json::to_string(&addr).unwrap();
        assert_eq!(js, "\"01abcdef\"");
        let back: DevAddr = serde_json::from_str(&js).unwrap();
        assert_eq!(back, addr);
    }
}
