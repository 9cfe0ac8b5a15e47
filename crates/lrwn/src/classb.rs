// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Class B beacon and ping-slot timing.
//!
//! All instants are durations since the GPS epoch. The ping offset is
//! randomized per beacon period by encrypting the beacon time and device
//! (or multicast) address under the all-zero AES key.

use crate::{crypto, AES128Key, DevAddr, Error, Result};
use std::time::Duration;

/// Beacon interval.
pub const BEACON_PERIOD: Duration = Duration::from_secs(128);
/// Guard at the start of each beacon period during which no ping slot opens.
pub const BEACON_RESERVED: Duration = Duration::from_millis(2_120);
/// Number of 30 ms slots in one beacon period.
pub const PING_PERIOD_BASE: usize = 1 << 12;
/// Ping-slot unit length.
pub const SLOT_LEN: Duration = Duration::from_millis(30);

/// Pseudo-random ping offset for the beacon period starting at
/// `beacon_start`. `ping_period` is the distance between consecutive ping
/// slots (4096 / pings-per-beacon-period).
pub fn get_ping_offset(
    beacon_start: Duration,
    dev_addr: DevAddr,
    ping_period: usize,
) -> Result<usize> {
    if ping_period == 0 || ping_period > PING_PERIOD_BASE {
        return Err(Error::InvalidPingNb(ping_period));
    }

    let beacon_time = (beacon_start.as_secs() % (1 << 32)) as u32;
    let mut block = [0u8; 16];
    block[0..4].copy_from_slice(&beacon_time.to_le_bytes());
    block[4..8].copy_from_slice(&dev_addr.to_le_bytes());
    let rand = crypto::encrypt_block(&AES128Key::null(), block);

    Ok((rand[0] as usize + rand[1] as usize * 256) % ping_period)
}

/// First ping slot strictly after `after` for the given address and ping
/// period, as a duration since the GPS epoch.
pub fn next_ping_slot_after(
    after: Duration,
    dev_addr: DevAddr,
    ping_period: usize,
) -> Result<Duration> {
    let mut beacon_start_secs =
        after.as_secs() - after.as_secs() % BEACON_PERIOD.as_secs();

    loop {
        let beacon_start = Duration::from_secs(beacon_start_secs);
        let offset = get_ping_offset(beacon_start, dev_addr, ping_period)?;

        let ping_nb = PING_PERIOD_BASE / ping_period;
        for n in 0..ping_nb {
            let slot = offset + n * ping_period;
            let t = beacon_start + BEACON_RESERVED + SLOT_LEN * slot as u32;
            if t > after {
                return Ok(t);
            }
        }

        beacon_start_secs += BEACON_PERIOD.as_secs();
    }
}
