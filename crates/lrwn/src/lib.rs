// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # LRWN - LoRaWAN wire layer
//!
//! Encoding, decoding and cryptographic validation of LoRaWAN frames,
//! shared by the network-server core and its tests.
//!
//! ## Layers
//!
//! ```text
//! +---------------------------------------------------------------+
//! |                        PHYPayload                             |
//! |        MHDR | MACPayload / JoinRequest / JoinAccept | MIC     |
//! +---------------------------------------------------------------+
//! |                        MACPayload                             |
//! |        FHDR (DevAddr, FCtrl, FCnt, FOpts) | FPort | FRM       |
//! +---------------------------------------------------------------+
//! |                       MAC commands                            |
//! |        CID-tagged request/answer payloads (FOpts or FPort 0)  |
//! +---------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`EUI64`] | 64-bit device/gateway identifier |
//! | [`DevAddr`] | 32-bit network address assigned at join |
//! | [`AES128Key`] | Session/root key material |
//! | [`PhyPayload`] | Top-level frame with MIC validation |
//! | [`MacCommand`] | Typed MAC-command variants keyed by [`Cid`] |
//!
//! MIC computation covers both LoRaWAN 1.0 (single network session key)
//! and 1.1 (split SNwkSIntKey/FNwkSIntKey). Join-server key envelopes are
//! unwrapped with [`keywrap::unwrap`] (RFC 3394).

pub mod classb;
pub mod crypto;
pub mod eui;
pub mod keys;
pub mod keywrap;
pub mod maccommand;
pub mod phy;

pub use eui::{DevAddr, EUI64};
pub use keys::AES128Key;
pub use maccommand::{Cid, MacCommand};
pub use phy::{FCtrl, Fhdr, MType, MacPayload, Major, Mhdr, Payload, PhyPayload};

use thiserror::Error;

/// Errors produced while encoding or decoding LoRaWAN structures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("buffer too short: need {need} bytes, got {got}")]
    BufferTooShort { need: usize, got: usize },

    #[error("invalid MHDR major version: {0}")]
    InvalidMajor(u8),

    #[error("unknown MAC command CID {cid:#04x} (uplink: {uplink})")]
    UnknownCid { cid: u8, uplink: bool },

    #[error("MAC command payload for {cid:?} truncated")]
    TruncatedMacCommand { cid: Cid },

    #[error("FOpts exceed 15 bytes: {0}")]
    FOptsTooLong(usize),

    #[error("frequency {0} Hz is not a multiple of 100")]
    InvalidFrequency(u32),

    #[error("invalid key-wrap input length: {0}")]
    InvalidKeyWrapLength(usize),

    #[error("key-wrap integrity check failed")]
    KeyWrapIntegrity,

    #[error("invalid hex identifier: {0}")]
    InvalidHex(String),

    #[error("ping-slot parameters out of range: ping_nb {0}")]
    InvalidPingNb(usize),
}

/// Convenient alias for wire-layer results.
pub type Result<T> = core::result::Result<T, Error>;
