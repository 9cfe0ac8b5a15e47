// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Gateway bus contract.
//!
//! The transport itself (MQTT, ZeroMQ, ...) is out of scope; the core sees
//! a [`GatewayBackend`] it pushes downlink frames and configuration to,
//! and a stream of inbound [`GatewayEvent`]s wired up by the composition
//! root. [`MockGatewayBackend`] records outbound traffic for tests.

pub mod bridge;
pub mod stats;

use crate::region::DataRate;
use crate::Result;
use chrono::{DateTime, Utc};
use lrwn::EUI64;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Modulation parameters as reported or commanded on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ModulationInfo {
    Lora {
        bandwidth_khz: u32,
        spreading_factor: u8,
        code_rate: String,
    },
    Fsk {
        bitrate: u32,
    },
}

impl ModulationInfo {
    /// Band-table shape of this modulation (drops the code rate).
    pub fn data_rate(&self) -> DataRate {
        match self {
            ModulationInfo::Lora {
                bandwidth_khz,
                spreading_factor,
                ..
            } => DataRate::Lora {
                bandwidth_khz: *bandwidth_khz,
                spreading_factor: *spreading_factor,
            },
            ModulationInfo::Fsk { bitrate } => DataRate::Fsk { bitrate: *bitrate },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UplinkTxInfo {
    pub frequency: u32,
    pub modulation: ModulationInfo,
}

impl UplinkTxInfo {
    /// Canonical bytes used in the deduplication fingerprint. Identical
    /// transmissions yield identical bytes regardless of which gateway
    /// heard them.
    pub fn fingerprint_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("tx-info serializes")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UplinkRxInfo {
    pub gateway_id: EUI64,
    pub rssi: i32,
    pub lora_snr: f64,
    pub time: Option<DateTime<Utc>>,
    /// Opaque token the gateway resolves back to its reception timestamp.
    pub context: Vec<u8>,
}

/// One reception of one frame by one gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UplinkFrame {
    pub phy_payload: Vec<u8>,
    pub tx_info: UplinkTxInfo,
    pub rx_info: UplinkRxInfo,
}

/// Downlink emit timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DownlinkTiming {
    /// Class C.
    Immediately,
    /// Class A: delay relative to the uplink in `context`.
    Delay { delay: Duration },
    /// Class B: beacon-aligned.
    GpsEpoch { time_since_gps_epoch: Duration },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownlinkTxInfo {
    pub frequency: u32,
    /// EIRP in dBm.
    pub power: i32,
    pub modulation: ModulationInfo,
    pub timing: DownlinkTiming,
    /// Echo of the uplink context for Delay timing.
    pub context: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownlinkFrameItem {
    pub phy_payload: Vec<u8>,
    pub tx_info: DownlinkTxInfo,
}

/// Frame with fallback items (RX1 first, then RX2); the gateway transmits
/// the first item it can honor and reports back by token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownlinkFrame {
    pub downlink_id: u32,
    pub gateway_id: EUI64,
    pub items: Vec<DownlinkFrameItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerModulationCount {
    pub modulation: ModulationInfo,
    pub count: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GatewayStats {
    pub gateway_id: EUI64,
    pub time: Option<DateTime<Utc>>,

    pub rx_packets_received: u32,
    pub rx_packets_received_ok: u32,
    pub tx_packets_received: u32,
    pub tx_packets_emitted: u32,

    pub tx_packets_per_frequency: HashMap<u32, u32>,
    pub rx_packets_per_frequency: HashMap<u32, u32>,
    pub tx_packets_per_modulation: Vec<PerModulationCount>,
    pub rx_packets_per_modulation: Vec<PerModulationCount>,
    pub tx_packets_per_status: HashMap<String, u32>,

    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChannelModulationConfig {
    Lora {
        bandwidth_khz: u32,
        spreading_factors: Vec<u8>,
    },
    Fsk {
        bandwidth_khz: u32,
        bitrate: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfiguration {
    pub frequency: u32,
    pub modulation: ChannelModulationConfig,
}

/// Channel plan pushed to concentratord-managed gateways.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfiguration {
    pub gateway_id: EUI64,
    pub version: String,
    pub stats_interval: Duration,
    pub channels: Vec<ChannelConfiguration>,
}

/// Inbound bus traffic.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    Uplink(UplinkFrame),
    Stats(GatewayStats),
}

/// Outbound side of the bus.
pub trait GatewayBackend: Send + Sync {
    fn send_downlink_frame(&self, frame: DownlinkFrame) -> Result<()>;

    fn send_gateway_configuration(&self, config: GatewayConfiguration) -> Result<()>;
}

/// Test backend recording everything it is asked to send.
#[derive(Default)]
pub struct MockGatewayBackend {
    pub downlink_frames: Mutex<Vec<DownlinkFrame>>,
    pub gateway_configurations: Mutex<Vec<GatewayConfiguration>>,
    /// When set, sends to these gateways fail (duty-cycle / offline
    /// simulation).
    pub refuse_gateways: Mutex<Vec<EUI64>>,
}

impl MockGatewayBackend {
    pub fn new() -> Self {
        MockGatewayBackend::default()
    }
}

impl GatewayBackend for MockGatewayBackend {
    fn send_downlink_frame(&self, frame: DownlinkFrame) -> Result<()> {
        if self.refuse_gateways.lock().contains(&frame.gateway_id) {
            return Err(crate::Error::GatewayBackend(format!(
                "gateway {} refused transmission",
                frame.gateway_id
            )));
        }
        self.downlink_frames.lock().push(frame);
        Ok(())
    }

    fn send_gateway_configuration(&self, config: GatewayConfiguration) -> Result<()> {
        self.gateway_configurations.lock().push(config);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lora_tx_info() -> UplinkTxInfo {
        UplinkTxInfo {
            frequency: 868_300_000,
            modulation: ModulationInfo::Lora {
                bandwidth_khz: 125,
                spreading_factor: 10,
                code_rate: "4/5".into(),
            },
        }
    }

    #[test]
    fn test_fingerprint_is_stable() {
        assert_eq!(
            lora_tx_info().fingerprint_bytes(),
            lora_tx_info().fingerprint_bytes()
        );

        let mut other = lora_tx_info();
        other.frequency = 868_100_000;
        assert_ne!(lora_tx_info().fingerprint_bytes(), other.fingerprint_bytes());
    }

    #[test]
    fn test_mock_backend_refusal() {
        let backend = MockGatewayBackend::new();
        let gw = EUI64([1; 8]);
        backend.refuse_gateways.lock().push(gw);

        let frame = DownlinkFrame {
            downlink_id: 1,
            gateway_id: gw,
            items: vec![],
        };
        assert!(backend.send_downlink_frame(frame.clone()).is_err());

        backend.refuse_gateways.lock().clear();
        backend.send_downlink_frame(frame).unwrap();
        assert_eq!(backend.downlink_frames.lock().len(), 1);
    }
}
