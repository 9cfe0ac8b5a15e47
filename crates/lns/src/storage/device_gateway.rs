// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Last-known signal quality per device.
//!
//! Written on every accepted uplink, read by the downlink scheduler to
//! pick the strongest gateway. TTL-bound to the device session.

use super::{device_gateway_rx_info_key, Storage};
use crate::{Error, Result};
use lrwn::EUI64;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceGatewayRxInfo {
    pub gateway_id: EUI64,
    pub rssi: i32,
    pub lora_snr: f64,
    /// Opaque gateway context token, echoed back on Class A downlinks so
    /// the gateway can resolve the reception timestamp.
    pub context: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceGatewayRxInfoSet {
    pub dev_eui: EUI64,
    pub dr: u8,
    /// Sorted by RSSI descending (strongest first).
    pub items: Vec<DeviceGatewayRxInfo>,
}

impl Storage {
    pub fn save_device_gateway_rx_info_set(&self, set: &DeviceGatewayRxInfoSet) -> Result<()> {
        self.cache().set(
            &device_gateway_rx_info_key(set.dev_eui),
            serde_json::to_vec(set)?,
            self.session_ttl(),
        );
        Ok(())
    }

    pub fn get_device_gateway_rx_info_set(&self, dev_eui: EUI64) -> Result<DeviceGatewayRxInfoSet> {
        let raw = self
            .cache()
            .get(&device_gateway_rx_info_key(dev_eui))
            .ok_or(Error::NotFound)?;
        Ok(serde_json::from_slice(&raw)?)
    }

    pub fn delete_device_gateway_rx_info_set(&self, dev_eui: EUI64) -> Result<()> {
        self.cache().del(&device_gateway_rx_info_key(dev_eui));
        Ok(())
    }
}
