// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Device sessions: the hot per-device state.
//!
//! Sessions are authoritative in the cache only, refreshed on every
//! accepted uplink and evicted on TTL. A cold device re-activates through
//! join. A DevAddr index set supports the lookup-by-address path of the
//! uplink pipeline; since addresses are not unique, the caller selects the
//! matching session by MIC.

use super::{dev_addr_key, device_session_key, Storage};
use crate::region::Channel;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use lrwn::{AES128Key, Cid, DevAddr, EUI64};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceSession {
    pub dev_eui: EUI64,
    pub dev_addr: DevAddr,
    pub join_eui: EUI64,

    /// Example: "1.0.2". For 1.0.x all three session keys hold the same
    /// NwkSKey.
    pub mac_version: String,
    pub f_nwk_s_int_key: AES128Key,
    pub s_nwk_s_int_key: AES128Key,
    pub nwk_s_enc_key: AES128Key,

    /// Next expected uplink counter.
    pub f_cnt_up: u32,
    pub n_f_cnt_down: u32,
    pub a_f_cnt_down: u32,
    /// Uplink counter to acknowledge in the next downlink MIC (1.1).
    pub conf_f_cnt: u32,
    /// A confirmed downlink is in flight, awaiting the device's ACK.
    pub confirmed_downlink_pending: bool,
    /// Counter of that in-flight confirmed downlink, checked when the
    /// device sets the ACK bit (1.1 uplink MIC).
    pub conf_f_cnt_down: u32,

    pub skip_fcnt_check: bool,

    // ADR state
    pub dr: u8,
    pub tx_power_index: u8,
    pub nb_trans: u8,
    pub enabled_uplink_channels: Vec<usize>,
    pub extra_uplink_channels: BTreeMap<usize, Channel>,

    // RX parameters
    pub rx_delay: u8,
    pub rx1_dr_offset: u8,
    pub rx2_dr: u8,
    pub rx2_frequency: u32,

    // Class B
    pub ping_slot_nb: usize,
    pub ping_slot_dr: u8,
    pub ping_slot_frequency: u32,
    pub beacon_locked: bool,
    pub beacon_locked_at: Option<DateTime<Utc>>,

    pub mac_command_error_count: BTreeMap<Cid, u32>,
    pub last_device_status_request: Option<DateTime<Utc>>,
}

impl DeviceSession {
    pub fn lorawan_11(&self) -> bool {
        self.mac_version.starts_with("1.1")
    }

    /// Enabled channel indices must come from the band table or the
    /// session's extra channels.
    pub fn channels_are_valid(&self, band_channel_count: usize) -> bool {
        self.enabled_uplink_channels.iter().all(|i| {
            *i < band_channel_count || self.extra_uplink_channels.contains_key(i)
        })
    }
}

/// Reconstruct the full uplink counter from the 16 bits on the wire.
///
/// `next_expected` is the session counter; a frame is accepted when the
/// reconstructed value does not jump forward by more than `tolerance`.
/// Anything behind the expected counter fails reconstruction (strictly
/// monotonic counters; retransmissions are not replayed into the stack).
pub fn get_full_f_cnt_up(
    next_expected: u32,
    truncated: u32,
    supports_32bit: bool,
    tolerance: u32,
) -> Option<u32> {
    if !supports_32bit {
        let delta = truncated.wrapping_sub(next_expected) & 0xffff;
        if delta < tolerance {
            return Some(truncated & 0xffff);
        }
        return None;
    }

    let mut candidate = (next_expected & 0xffff_0000) | (truncated & 0xffff);
    if candidate < next_expected {
        // low 16 bits rolled over since the last uplink
        candidate = candidate.wrapping_add(0x1_0000);
    }
    let delta = candidate.wrapping_sub(next_expected);
    if delta < tolerance {
        Some(candidate)
    } else {
        None
    }
}

impl Storage {
    /// Persist the session and refresh the DevAddr index, both on the
    /// session TTL.
    pub fn save_device_session(&self, ds: &DeviceSession) -> Result<()> {
        let ttl = self.session_ttl();
        self.cache().set(
            &device_session_key(ds.dev_eui),
            serde_json::to_vec(ds)?,
            ttl,
        );
        self.cache().sadd_expire(
            &dev_addr_key(ds.dev_addr),
            ds.dev_eui.as_bytes().to_vec(),
            ttl,
        );
        Ok(())
    }

    pub fn get_device_session(&self, dev_eui: EUI64) -> Result<DeviceSession> {
        let raw = self
            .cache()
            .get(&device_session_key(dev_eui))
            .ok_or(Error::NotFound)?;
        Ok(serde_json::from_slice(&raw)?)
    }

    pub fn delete_device_session(&self, dev_eui: EUI64) -> Result<()> {
        self.get_device_session(dev_eui)?;
        // the devaddr index member is left to expire; lookups skip dead EUIs
        self.cache().del(&device_session_key(dev_eui));
        Ok(())
    }

    /// All live sessions whose DevAddr matches. Multiple devices can share
    /// an address; the caller disambiguates by MIC.
    pub fn get_device_sessions_for_dev_addr(
        &self,
        dev_addr: DevAddr,
    ) -> Result<Vec<DeviceSession>> {
        let mut out = Vec::new();
        for member in self.cache().smembers(&dev_addr_key(dev_addr)) {
            let arr: [u8; 8] = match member.as_slice().try_into() {
                Ok(a) => a,
                Err(_) => {
                    warn!(dev_addr = %dev_addr, "malformed devaddr index member");
                    continue;
                }
            };
            match self.get_device_session(EUI64(arr)) {
                Ok(ds) if ds.dev_addr == dev_addr => out.push(ds),
                Ok(_) | Err(Error::NotFound) => {} // stale index entry
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn storage() -> Storage {
        Storage::open_in_memory(Duration::from_secs(60)).unwrap()
    }

    fn session(dev_eui: [u8; 8], dev_addr: [u8; 4]) -> DeviceSession {
        DeviceSession {
            dev_eui: EUI64(dev_eui),
            dev_addr: DevAddr(dev_addr),
            mac_version: "1.0.2".into(),
            f_cnt_up: 10,
            nb_trans: 1,
            enabled_uplink_channels: vec![0, 1, 2],
            ..Default::default()
        }
    }

    #[test]
    fn test_save_get_roundtrip() {
        let s = storage();
        let ds = session([1; 8], [1, 2, 3, 4]);
        s.save_device_session(&ds).unwrap();
        assert_eq!(s.get_device_session(ds.dev_eui).unwrap(), ds);
    }

    #[test]
    fn test_lookup_by_dev_addr_returns_all_matches() {
        let s = storage();
        let a = session([1; 8], [1, 2, 3, 4]);
        let b = session([2; 8], [1, 2, 3, 4]);
        let other = session([3; 8], [9, 9, 9, 9]);
        s.save_device_session(&a).unwrap();
        s.save_device_session(&b).unwrap();
        s.save_device_session(&other).unwrap();

        let found = s
            .get_device_sessions_for_dev_addr(DevAddr([1, 2, 3, 4]))
            .unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.iter().any(|ds| ds.dev_eui == a.dev_eui));
        assert!(found.iter().any(|ds| ds.dev_eui == b.dev_eui));
    }

    #[test]
    fn test_full_fcnt_same_window() {
        assert_eq!(get_full_f_cnt_up(10, 10, true, 16_384), Some(10));
        assert_eq!(get_full_f_cnt_up(10, 11, true, 16_384), Some(11));
    }

    #[test]
    fn test_full_fcnt_rollover() {
        // expected 0x1FFFE, wire counter shows 2 -> 0x20002
        assert_eq!(
            get_full_f_cnt_up(0x1fffe, 2, true, 16_384),
            Some(0x20002)
        );
    }

    #[test]
    fn test_full_fcnt_rejects_backward() {
        assert_eq!(get_full_f_cnt_up(10, 9, true, 16_384), None);
    }

    #[test]
    fn test_full_fcnt_rejects_jump_beyond_tolerance() {
        assert_eq!(get_full_f_cnt_up(0, 16_384, true, 16_384), None);
        assert_eq!(get_full_f_cnt_up(0, 16_383, true, 16_384), Some(16_383));
    }

    #[test]
    fn test_full_fcnt_16bit_device() {
        assert_eq!(get_full_f_cnt_up(0xfffe, 2, false, 16_384), Some(2));
        assert_eq!(get_full_f_cnt_up(10, 9, false, 16_384), None);
    }

    #[test]
    fn test_channel_validity() {
        let mut ds = session([1; 8], [1, 2, 3, 4]);
        assert!(ds.channels_are_valid(3));

        ds.enabled_uplink_channels.push(5);
        assert!(!ds.channels_are_valid(3));

        ds.extra_uplink_channels.insert(
            5,
            Channel {
                frequency: 867_100_000,
                min_dr: 0,
                max_dr: 5,
            },
        );
        assert!(ds.channels_are_valid(3));
    }
}
