// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Channel-mask reconfiguration requests.

use crate::region::Band;
use crate::storage::{DeviceSession, MacCommandBlock};
use lrwn::{Cid, MacCommand};

/// Build the LinkADRReq block that re-activates the session's enabled
/// uplink channels, e.g. after the device fell back to defaults or when
/// only a sub-set of the band is in use.
///
/// The band returns one payload per 16-channel mask bank; the last payload
/// carries the session's current DR, TX power and redundancy so the device
/// does not regress while the mask changes. No payloads means nothing to
/// reconfigure.
pub fn request_channel_reconfigure(band: &Band, ds: &DeviceSession) -> Option<MacCommandBlock> {
    let mut payloads = band.link_adr_payloads_for_enabled_channels(&ds.enabled_uplink_channels);
    if payloads.is_empty() {
        return None;
    }

    if let Some(last) = payloads.last_mut() {
        last.tx_power = ds.tx_power_index;
        last.data_rate = ds.dr;
        last.nb_rep = ds.nb_trans;
    }

    Some(MacCommandBlock::new(
        Cid::LinkAdr,
        payloads.into_iter().map(MacCommand::LinkAdrReq).collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::eu868;

    #[test]
    fn test_reconfigure_carries_session_parameters() {
        let band = eu868();
        let ds = DeviceSession {
            dr: 5,
            tx_power_index: 2,
            nb_trans: 3,
            enabled_uplink_channels: vec![0, 1, 2],
            ..Default::default()
        };

        let block = request_channel_reconfigure(&band, &ds).unwrap();
        assert_eq!(block.cid, Cid::LinkAdr);
        assert_eq!(block.commands.len(), 1);

        match &block.commands[0] {
            MacCommand::LinkAdrReq(p) => {
                assert_eq!(p.data_rate, 5);
                assert_eq!(p.tx_power, 2);
                assert_eq!(p.nb_rep, 3);
                assert_eq!(&p.ch_mask[..3], &[true, true, true]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_reconfigure_without_channels_is_none() {
        let band = eu868();
        let ds = DeviceSession::default();
        assert!(request_channel_reconfigure(&band, &ds).is_none());
    }

    #[test]
    fn test_reconfigure_two_banks_sets_params_on_last_only() {
        let band = eu868();
        let ds = DeviceSession {
            dr: 4,
            tx_power_index: 1,
            nb_trans: 1,
            enabled_uplink_channels: vec![0, 16],
            ..Default::default()
        };

        let block = request_channel_reconfigure(&band, &ds).unwrap();
        assert_eq!(block.commands.len(), 2);
        match (&block.commands[0], &block.commands[1]) {
            (MacCommand::LinkAdrReq(first), MacCommand::LinkAdrReq(last)) => {
                assert_eq!(first.data_rate, 0);
                assert_eq!(last.data_rate, 4);
                assert_eq!(last.tx_power, 1);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
