// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RekeyInd handling (LoRaWAN 1.1 key confirmation).

use crate::storage::{DeviceSession, MacCommandBlock};
use crate::{Error, Result};
use lrwn::maccommand::Version;
use lrwn::{Cid, MacCommand};
use tracing::info;

/// Highest LoRaWAN 1.x minor version this server speaks.
const SERVER_LORAWAN_MINOR: u8 = 1;

/// Answer a RekeyInd with a RekeyConf carrying the negotiated minor
/// version: the server's, clamped to what the device advertises.
pub fn handle_rekey_ind(
    ds: &mut DeviceSession,
    block: &MacCommandBlock,
) -> Result<Vec<MacCommandBlock>> {
    if block.commands.len() != 1 {
        return Err(Error::Validation(format!(
            "exactly one rekey_ind expected, got {}",
            block.commands.len()
        )));
    }

    let dev_version = match &block.commands[0] {
        MacCommand::RekeyInd(v) => *v,
        _ => return Err(Error::UnexpectedMacCommandPayload(Cid::Rekey)),
    };

    let minor = SERVER_LORAWAN_MINOR.min(dev_version.minor);

    info!(
        dev_eui = %ds.dev_eui,
        dev_lorawan_version_minor = dev_version.minor,
        serv_lorawan_version_minor = SERVER_LORAWAN_MINOR,
        "rekey_ind received"
    );

    Ok(vec![MacCommandBlock::new(
        Cid::Rekey,
        vec![MacCommand::RekeyConf(Version { minor })],
    )])
}
