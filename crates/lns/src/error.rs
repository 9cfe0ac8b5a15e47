// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error taxonomy for the network-server core.
//!
//! Kinds map to distinct handling policies: `NotFound` surfaces as a
//! 404-equivalent, `Validation`-class errors abort the current frame or
//! queue item without retry, `Conflict` is retried once after a re-read,
//! protocol violations drop the offending block and bump the per-CID error
//! counter, and `Config` aborts startup.

use lrwn::Cid;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // -- not found -------------------------------------------------------
    #[error("object does not exist")]
    NotFound,

    // -- validation ------------------------------------------------------
    #[error("invalid frame counter")]
    InvalidFCnt,

    #[error("invalid MIC")]
    InvalidMic,

    #[error("no device session matching the frame")]
    NoDeviceSession,

    #[error("payload of {size} bytes exceeds max {max} for data-rate {dr}")]
    MaxPayloadSize { size: usize, max: usize, dr: u8 },

    #[error("frequency {0} Hz not part of the channel plan")]
    UnknownFrequency(u32),

    #[error("data-rate for modulation not found in band table")]
    UnknownDataRate,

    #[error("zero items in deduplication collect set")]
    EmptyCollectSet,

    #[error("uplink frame has no rx-info")]
    NoRxInfo,

    #[error("validation: {0}")]
    Validation(String),

    // -- transmission ----------------------------------------------------
    #[error("no gateway available for transmission")]
    NoGateway,

    // -- stateful conflict -----------------------------------------------
    #[error("concurrent device-session update")]
    Conflict,

    // -- protocol violation ----------------------------------------------
    #[error("expected pending mac-command for {0:?}")]
    NoPendingMacCommand(Cid),

    #[error("received {got} mac-command answers for {cid:?}, requested {want}")]
    PendingMacCommandCount { cid: Cid, got: usize, want: usize },

    #[error("unexpected mac-command payload for {0:?}")]
    UnexpectedMacCommandPayload(Cid),

    // -- configuration ---------------------------------------------------
    #[error("unknown KEK label: {0}")]
    UnknownKekLabel(String),

    #[error("configuration: {0}")]
    Config(String),

    // -- wrapped ---------------------------------------------------------
    #[error("wire layer: {0}")]
    Lrwn(#[from] lrwn::Error),

    #[error("database: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("encoding: {0}")]
    Json(#[from] serde_json::Error),

    #[error("gateway backend: {0}")]
    GatewayBackend(String),

    #[error("application server: {0}")]
    ApplicationServer(String),

    #[error("join server: {0}")]
    JoinServer(String),
}

impl Error {
    /// True for errors a caller may retry after a backoff (transient I/O
    /// and write conflicts).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Conflict
                | Error::GatewayBackend(_)
                | Error::ApplicationServer(_)
                | Error::JoinServer(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
