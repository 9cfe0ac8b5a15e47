// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Regional band parameters.
//!
//! A [`Band`] is a pure function table: channel plans, data-rate
//! definitions, payload-size caps and RX defaults for one region. The rest
//! of the core never hard-codes RF numbers; it asks the band.

mod eu868;

pub use eu868::eu868;

use crate::{Error, Result};
use lrwn::maccommand::LinkAdrReqPayload;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One uplink or downlink channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub frequency: u32,
    pub min_dr: u8,
    pub max_dr: u8,
}

/// Physical parameters of a data-rate index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataRate {
    Lora {
        bandwidth_khz: u32,
        spreading_factor: u8,
    },
    Fsk {
        bitrate: u32,
    },
}

/// Regional parameter table.
#[derive(Debug, Clone)]
pub struct Band {
    pub name: &'static str,

    /// Band-defined uplink channels; the vector index is the channel index.
    uplink_channels: Vec<Channel>,
    downlink_channels: Vec<Channel>,

    data_rates: BTreeMap<u8, DataRate>,
    /// Max application payload bytes (N) per data-rate.
    max_payload: BTreeMap<u8, usize>,

    /// TX power index -> EIRP in dBm.
    tx_powers: Vec<i32>,

    pub rx2_frequency: u32,
    pub rx2_dr: u8,
    pub max_eirp: i32,

    pub ping_slot_frequency: u32,
    pub ping_slot_dr: u8,
}

impl Band {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        name: &'static str,
        uplink_channels: Vec<Channel>,
        downlink_channels: Vec<Channel>,
        data_rates: BTreeMap<u8, DataRate>,
        max_payload: BTreeMap<u8, usize>,
        tx_powers: Vec<i32>,
        rx2_frequency: u32,
        rx2_dr: u8,
        max_eirp: i32,
        ping_slot_frequency: u32,
        ping_slot_dr: u8,
    ) -> Self {
        Band {
            name,
            uplink_channels,
            downlink_channels,
            data_rates,
            max_payload,
            tx_powers,
            rx2_frequency,
            rx2_dr,
            max_eirp,
            ping_slot_frequency,
            ping_slot_dr,
        }
    }

    /// Band-defined uplink channels (index position = channel index).
    pub fn uplink_channels(&self) -> &[Channel] {
        &self.uplink_channels
    }

    pub fn downlink_channels(&self) -> &[Channel] {
        &self.downlink_channels
    }

    /// Channel indices a fresh device has enabled.
    pub fn default_enabled_uplink_channels(&self) -> Vec<usize> {
        (0..self.uplink_channels.len()).collect()
    }

    pub fn data_rate(&self, dr: u8) -> Result<DataRate> {
        self.data_rates.get(&dr).copied().ok_or(Error::UnknownDataRate)
    }

    /// Reverse lookup used for gateway metadata: physical modulation
    /// parameters to data-rate index. The `uplink` flag is part of the
    /// contract for regions with asymmetric tables.
    pub fn get_data_rate_index(&self, _uplink: bool, modulation: &DataRate) -> Result<u8> {
        self.data_rates
            .iter()
            .find(|(_, dr)| *dr == modulation)
            .map(|(idx, _)| *idx)
            .ok_or(Error::UnknownDataRate)
    }

    /// Max application payload (N) for the data-rate.
    pub fn max_payload_size(&self, dr: u8) -> Result<usize> {
        self.max_payload.get(&dr).copied().ok_or(Error::UnknownDataRate)
    }

    /// EIRP in dBm for a TX power index.
    pub fn tx_power_dbm(&self, index: u8) -> Result<i32> {
        self.tx_powers
            .get(index as usize)
            .copied()
            .ok_or_else(|| Error::Validation(format!("tx-power index {index} out of range")))
    }

    /// RX1 data-rate for an uplink data-rate and RX1 DR offset.
    pub fn rx1_data_rate(&self, uplink_dr: u8, rx1_dr_offset: u8) -> u8 {
        uplink_dr.saturating_sub(rx1_dr_offset)
    }

    /// Demodulation-floor SNR in dB for the data-rate (LinkCheck margin).
    pub fn required_snr(&self, dr: u8) -> Result<f64> {
        match self.data_rate(dr)? {
            DataRate::Lora {
                spreading_factor, ..
            } => Ok(match spreading_factor {
                7 => -7.5,
                8 => -10.0,
                9 => -12.5,
                10 => -15.0,
                11 => -17.5,
                12 => -20.0,
                _ => return Err(Error::UnknownDataRate),
            }),
            DataRate::Fsk { .. } => Ok(0.0),
        }
    }

    /// RX1 downlink frequency for the uplink channel used.
    pub fn rx1_frequency(
        &self,
        uplink_frequency: u32,
        extra: &BTreeMap<usize, Channel>,
    ) -> Result<u32> {
        // symmetric plan: downlink on the uplink frequency
        let _ = self.uplink_channel_index(uplink_frequency, extra)?;
        Ok(uplink_frequency)
    }

    /// Index of the uplink channel matching `frequency`, searching
    /// band-defined channels first and session extras after.
    pub fn uplink_channel_index(
        &self,
        frequency: u32,
        extra: &BTreeMap<usize, Channel>,
    ) -> Result<usize> {
        if let Some(i) = self
            .uplink_channels
            .iter()
            .position(|c| c.frequency == frequency)
        {
            return Ok(i);
        }
        extra
            .iter()
            .find(|(_, c)| c.frequency == frequency)
            .map(|(i, _)| *i)
            .ok_or(Error::UnknownFrequency(frequency))
    }

    /// LinkADRReq payloads that enable exactly the given channel indices.
    ///
    /// Channels are grouped into 16-bit mask banks; one payload per bank
    /// containing an enabled index, ascending. An empty input yields no
    /// payloads.
    pub fn link_adr_payloads_for_enabled_channels(
        &self,
        enabled: &[usize],
    ) -> Vec<LinkAdrReqPayload> {
        let mut banks: BTreeMap<usize, [bool; 16]> = BTreeMap::new();
        for idx in enabled {
            banks.entry(idx / 16).or_insert([false; 16])[idx % 16] = true;
        }

        banks
            .into_iter()
            .map(|(bank, ch_mask)| LinkAdrReqPayload {
                ch_mask,
                ch_mask_cntl: bank as u8,
                ..Default::default()
            })
            .collect()
    }
}

/// Look up a band constructor by configured name.
pub fn by_name(name: &str) -> Result<Band> {
    match name {
        "EU868" => Ok(eu868()),
        other => Err(Error::Config(format!("unknown band: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modulation_to_dr_lookup() {
        let band = eu868();

        let dr = band
            .get_data_rate_index(
                true,
                &DataRate::Lora {
                    bandwidth_khz: 125,
                    spreading_factor: 8,
                },
            )
            .unwrap();
        assert_eq!(dr, 4);

        let dr = band
            .get_data_rate_index(
                true,
                &DataRate::Lora {
                    bandwidth_khz: 125,
                    spreading_factor: 10,
                },
            )
            .unwrap();
        assert_eq!(dr, 2);
    }

    #[test]
    fn test_unknown_modulation_is_an_error() {
        let band = eu868();
        assert!(matches!(
            band.get_data_rate_index(
                true,
                &DataRate::Lora {
                    bandwidth_khz: 500,
                    spreading_factor: 5
                }
            ),
            Err(Error::UnknownDataRate)
        ));
    }

    #[test]
    fn test_link_adr_payloads_single_bank() {
        let band = eu868();
        let payloads = band.link_adr_payloads_for_enabled_channels(&[0, 1, 2]);
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0].ch_mask_cntl, 0);
        assert_eq!(&payloads[0].ch_mask[..3], &[true, true, true]);
        assert!(!payloads[0].ch_mask[3]);
    }

    #[test]
    fn test_link_adr_payloads_empty_input() {
        let band = eu868();
        assert!(band.link_adr_payloads_for_enabled_channels(&[]).is_empty());
    }

    #[test]
    fn test_link_adr_payloads_two_banks() {
        let band = eu868();
        let payloads = band.link_adr_payloads_for_enabled_channels(&[1, 17]);
        assert_eq!(payloads.len(), 2);
        assert_eq!(payloads[0].ch_mask_cntl, 0);
        assert!(payloads[0].ch_mask[1]);
        assert_eq!(payloads[1].ch_mask_cntl, 1);
        assert!(payloads[1].ch_mask[1]);
    }

    #[test]
    fn test_rx1_data_rate_clamps_at_zero() {
        let band = eu868();
        assert_eq!(band.rx1_data_rate(5, 2), 3);
        assert_eq!(band.rx1_data_rate(1, 5), 0);
    }

    #[test]
    fn test_uplink_channel_index_with_extras() {
        let band = eu868();
        let mut extra = BTreeMap::new();
        extra.insert(
            3,
            Channel {
                frequency: 867_100_000,
                min_dr: 0,
                max_dr: 5,
            },
        );

        assert_eq!(band.uplink_channel_index(868_100_000, &extra).unwrap(), 0);
        assert_eq!(band.uplink_channel_index(867_100_000, &extra).unwrap(), 3);
        assert!(matches!(
            band.uplink_channel_index(903_900_000, &extra),
            Err(Error::UnknownFrequency(_))
        ));
    }
}
