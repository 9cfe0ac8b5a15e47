// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Join-server contract.
//!
//! The join server validates join/rejoin MICs, derives the session keys
//! and returns them wrapped in [`KeyEnvelope`]s together with the fully
//! encrypted join-accept frame.

use crate::Result;
use lrwn::{DevAddr, EUI64};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Session key, possibly wrapped under a named KEK (RFC 3394). An empty
/// label means the key is carried in the clear.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyEnvelope {
    pub kek_label: String,
    pub aes_key: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinRequest {
    /// Raw join-request frame as received.
    pub phy_payload: Vec<u8>,
    pub dev_eui: EUI64,
    pub join_eui: EUI64,
    /// Address the network server assigned for this activation.
    pub dev_addr: DevAddr,
    pub dl_settings_rx1_dr_offset: u8,
    pub dl_settings_rx2_dr: u8,
    pub rx_delay: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JoinAnswer {
    /// Complete encrypted join-accept, ready for transmission.
    pub phy_payload: Vec<u8>,

    /// LoRaWAN 1.0: the single network session key.
    pub nwk_s_key: Option<KeyEnvelope>,
    /// LoRaWAN 1.1 split keys.
    pub s_nwk_s_int_key: Option<KeyEnvelope>,
    pub f_nwk_s_int_key: Option<KeyEnvelope>,
    pub nwk_s_enc_key: Option<KeyEnvelope>,
}

pub trait JoinServer: Send + Sync {
    fn join_req(&self, req: JoinRequest) -> Result<JoinAnswer>;

    fn rejoin_req(&self, req: JoinRequest) -> Result<JoinAnswer>;
}

/// Returns a canned answer and records requests.
#[derive(Default)]
pub struct MockJoinServer {
    pub join_requests: Mutex<Vec<JoinRequest>>,
    pub answer: Mutex<JoinAnswer>,
}

impl MockJoinServer {
    pub fn new() -> Self {
        MockJoinServer::default()
    }
}

impl JoinServer for MockJoinServer {
    fn join_req(&self, req: JoinRequest) -> Result<JoinAnswer> {
        self.join_requests.lock().push(req);
        Ok(self.answer.lock().clone())
    }

    fn rejoin_req(&self, req: JoinRequest) -> Result<JoinAnswer> {
        self.join_requests.lock().push(req);
        Ok(self.answer.lock().clone())
    }
}
