// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Application-server RPC contract.

use crate::gateway::{UplinkRxInfo, UplinkTxInfo};
use crate::Result;
use chrono::{DateTime, Utc};
use lrwn::EUI64;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Decrypted (FPort > 0) application payload plus reception metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UplinkDataRequest {
    pub dev_eui: EUI64,
    pub join_eui: EUI64,
    pub f_port: u8,
    pub f_cnt: u32,
    pub adr: bool,
    pub dr: u8,
    pub confirmed: bool,
    pub data: Vec<u8>,
    pub tx_info: UplinkTxInfo,
    /// Present only when the service profile shares gateway metadata.
    pub rx_info: Vec<UplinkRxInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownlinkAckRequest {
    pub dev_eui: EUI64,
    pub f_cnt: u32,
    pub acknowledged: bool,
}

/// Gateway statistics after the per-modulation counters were translated
/// into per-DR counters via the band table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GatewayStatsRequest {
    pub gateway_id: EUI64,
    pub time: Option<DateTime<Utc>>,

    pub rx_packets_received: u32,
    pub rx_packets_received_ok: u32,
    pub tx_packets_received: u32,
    pub tx_packets_emitted: u32,

    pub tx_packets_per_frequency: HashMap<u32, u32>,
    pub rx_packets_per_frequency: HashMap<u32, u32>,
    pub tx_packets_per_dr: HashMap<u32, u32>,
    pub rx_packets_per_dr: HashMap<u32, u32>,
    pub tx_packets_per_status: HashMap<String, u32>,

    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProprietaryUpRequest {
    pub mac_payload: Vec<u8>,
    pub mic: [u8; 4],
    pub tx_info: UplinkTxInfo,
    pub rx_info: Vec<UplinkRxInfo>,
}

pub trait ApplicationServer: Send + Sync {
    fn handle_uplink_data(&self, req: UplinkDataRequest) -> Result<()>;

    fn handle_downlink_ack(&self, req: DownlinkAckRequest) -> Result<()>;

    fn handle_gateway_stats(&self, req: GatewayStatsRequest) -> Result<()>;

    fn handle_proprietary_up(&self, req: ProprietaryUpRequest) -> Result<()>;
}

/// Records every request for assertions.
#[derive(Default)]
pub struct MockApplicationServer {
    pub uplink_data: Mutex<Vec<UplinkDataRequest>>,
    pub downlink_acks: Mutex<Vec<DownlinkAckRequest>>,
    pub gateway_stats: Mutex<Vec<GatewayStatsRequest>>,
    pub proprietary_up: Mutex<Vec<ProprietaryUpRequest>>,
}

impl MockApplicationServer {
    pub fn new() -> Self {
        MockApplicationServer::default()
    }
}

impl ApplicationServer for MockApplicationServer {
    fn handle_uplink_data(&self, req: UplinkDataRequest) -> Result<()> {
        self.uplink_data.lock().push(req);
        Ok(())
    }

    fn handle_downlink_ack(&self, req: DownlinkAckRequest) -> Result<()> {
        self.downlink_acks.lock().push(req);
        Ok(())
    }

    fn handle_gateway_stats(&self, req: GatewayStatsRequest) -> Result<()> {
        self.gateway_stats.lock().push(req);
        Ok(())
    }

    fn handle_proprietary_up(&self, req: ProprietaryUpRequest) -> Result<()> {
        self.proprietary_up.lock().push(req);
        Ok(())
    }
}
