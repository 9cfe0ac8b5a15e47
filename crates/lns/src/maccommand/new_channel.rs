// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! NewChannelReq generation and NewChannelAns handling.

use super::{increment_error_count, require_pending, reset_error_count};
use crate::region::Channel;
use crate::storage::{DeviceSession, MacCommandBlock};
use crate::{Error, Result};
use lrwn::maccommand::NewChannelReqPayload;
use lrwn::{Cid, MacCommand};
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Diff `wanted` against `current` and build the NewChannelReq block that
/// creates or modifies the out-of-band channels. At most `max` commands
/// are emitted so the block stays sendable; the remainder goes out in a
/// later batch. No changes, no block.
pub fn request_new_channels(
    max: usize,
    current: &BTreeMap<usize, Channel>,
    wanted: &BTreeMap<usize, Channel>,
) -> Option<MacCommandBlock> {
    let mut out = Vec::new();

    // BTreeMap iteration is ascending by channel index
    for (index, wanted_ch) in wanted {
        let differs = match current.get(index) {
            None => true,
            Some(cur) => {
                cur.frequency != wanted_ch.frequency
                    || cur.min_dr != wanted_ch.min_dr
                    || cur.max_dr != wanted_ch.max_dr
            }
        };
        if differs {
            out.push(MacCommand::NewChannelReq(NewChannelReqPayload {
                ch_index: *index as u8,
                frequency: wanted_ch.frequency,
                min_dr: wanted_ch.min_dr,
                max_dr: wanted_ch.max_dr,
            }));
        }
    }

    out.truncate(max);
    if out.is_empty() {
        return None;
    }
    Some(MacCommandBlock::new(Cid::NewChannel, out))
}

/// Pair each NewChannelAns with its pending request; acknowledged channels
/// are installed as session extras and enabled.
pub fn handle_new_channel_ans(
    ds: &mut DeviceSession,
    block: &MacCommandBlock,
    pending: Option<&MacCommandBlock>,
) -> Result<Vec<MacCommandBlock>> {
    let pending = require_pending(Cid::NewChannel, block.commands.len(), pending)?;

    for (ans, req) in block.commands.iter().zip(pending.commands.iter()) {
        let ans = match ans {
            MacCommand::NewChannelAns(p) => p,
            _ => return Err(Error::UnexpectedMacCommandPayload(Cid::NewChannel)),
        };
        let req = match req {
            MacCommand::NewChannelReq(p) => p,
            _ => return Err(Error::UnexpectedMacCommandPayload(Cid::NewChannel)),
        };

        if ans.channel_frequency_ok && ans.data_rate_range_ok {
            reset_error_count(ds, Cid::NewChannel);

            ds.extra_uplink_channels.insert(
                req.ch_index as usize,
                Channel {
                    frequency: req.frequency,
                    min_dr: req.min_dr,
                    max_dr: req.max_dr,
                },
            );
            if !ds
                .enabled_uplink_channels
                .contains(&(req.ch_index as usize))
            {
                ds.enabled_uplink_channels.push(req.ch_index as usize);
            }

            info!(
                dev_eui = %ds.dev_eui,
                channel = req.ch_index,
                frequency = req.frequency,
                min_dr = req.min_dr,
                max_dr = req.max_dr,
                "new_channel request acknowledged"
            );
        } else {
            increment_error_count(ds, Cid::NewChannel);

            warn!(
                dev_eui = %ds.dev_eui,
                channel = req.ch_index,
                frequency = req.frequency,
                channel_frequency_ok = ans.channel_frequency_ok,
                data_rate_range_ok = ans.data_rate_range_ok,
                "new_channel request not acknowledged"
            );
        }
    }

    Ok(Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lrwn::maccommand::NewChannelAnsPayload;

    fn ch(frequency: u32, min_dr: u8, max_dr: u8) -> Channel {
        Channel {
            frequency,
            min_dr,
            max_dr,
        }
    }

    #[test]
    fn test_no_diff_no_block() {
        let current = BTreeMap::from([(3, ch(867_100_000, 0, 5))]);
        assert!(request_new_channels(3, &current, &current.clone()).is_none());
    }

    #[test]
    fn test_new_and_modified_channels() {
        let current = BTreeMap::from([(3, ch(867_100_000, 0, 5)), (4, ch(867_300_000, 0, 5))]);
        let wanted = BTreeMap::from([
            (3, ch(867_100_000, 0, 5)),  // unchanged
            (4, ch(867_300_000, 1, 5)),  // min_dr changed
            (5, ch(867_500_000, 0, 5)),  // new
        ]);

        let block = request_new_channels(3, &current, &wanted).unwrap();
        assert_eq!(block.commands.len(), 2);
        match &block.commands[0] {
            MacCommand::NewChannelReq(p) => assert_eq!((p.ch_index, p.min_dr), (4, 1)),
            other => panic!("unexpected {other:?}"),
        }
        match &block.commands[1] {
            MacCommand::NewChannelReq(p) => assert_eq!(p.ch_index, 5),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_truncates_to_max() {
        let current = BTreeMap::new();
        let wanted = BTreeMap::from([
            (3, ch(867_100_000, 0, 5)),
            (4, ch(867_300_000, 0, 5)),
            (5, ch(867_500_000, 0, 5)),
        ]);

        let block = request_new_channels(2, &current, &wanted).unwrap();
        assert_eq!(block.commands.len(), 2);
        // ascending order: truncation keeps the lowest indices
        match &block.commands[0] {
            MacCommand::NewChannelReq(p) => assert_eq!(p.ch_index, 3),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_ack_installs_channel() {
        let mut ds = DeviceSession {
            enabled_uplink_channels: vec![0, 1, 2],
            ..Default::default()
        };

        let pending = MacCommandBlock::new(
            Cid::NewChannel,
            vec![MacCommand::NewChannelReq(NewChannelReqPayload {
                ch_index: 3,
                frequency: 867_100_000,
                min_dr: 0,
                max_dr: 5,
            })],
        );
        let ans = MacCommandBlock::new(
            Cid::NewChannel,
            vec![MacCommand::NewChannelAns(NewChannelAnsPayload {
                channel_frequency_ok: true,
                data_rate_range_ok: true,
            })],
        );

        handle_new_channel_ans(&mut ds, &ans, Some(&pending)).unwrap();
        assert_eq!(ds.extra_uplink_channels[&3], ch(867_100_000, 0, 5));
        assert_eq!(ds.enabled_uplink_channels, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_nack_increments_error_count() {
        let mut ds = DeviceSession::default();
        let pending = MacCommandBlock::new(
            Cid::NewChannel,
            vec![MacCommand::NewChannelReq(NewChannelReqPayload {
                ch_index: 3,
                frequency: 867_100_000,
                min_dr: 0,
                max_dr: 5,
            })],
        );
        let ans = MacCommandBlock::new(
            Cid::NewChannel,
            vec![MacCommand::NewChannelAns(NewChannelAnsPayload {
                channel_frequency_ok: false,
                data_rate_range_ok: true,
            })],
        );

        handle_new_channel_ans(&mut ds, &ans, Some(&pending)).unwrap();
        assert!(ds.extra_uplink_channels.is_empty());
        assert_eq!(ds.mac_command_error_count[&Cid::NewChannel], 1);
    }

    #[test]
    fn test_count_mismatch_is_protocol_error() {
        let mut ds = DeviceSession::default();
        let pending = MacCommandBlock::new(
            Cid::NewChannel,
            vec![
                MacCommand::NewChannelReq(NewChannelReqPayload::default()),
                MacCommand::NewChannelReq(NewChannelReqPayload::default()),
            ],
        );
        let ans = MacCommandBlock::new(
            Cid::NewChannel,
            vec![MacCommand::NewChannelAns(NewChannelAnsPayload::default())],
        );
        assert!(matches!(
            handle_new_channel_ans(&mut ds, &ans, Some(&pending)),
            Err(Error::PendingMacCommandCount { .. })
        ));
    }
}
