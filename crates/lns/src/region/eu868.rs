// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! EU863-870 band parameters (RP002 revision A values).

use super::{Band, Channel, DataRate};
use std::collections::BTreeMap;

pub fn eu868() -> Band {
    let base_channels = vec![
        Channel {
            frequency: 868_100_000,
            min_dr: 0,
            max_dr: 5,
        },
        Channel {
            frequency: 868_300_000,
            min_dr: 0,
            max_dr: 5,
        },
        Channel {
            frequency: 868_500_000,
            min_dr: 0,
            max_dr: 5,
        },
    ];

    let mut data_rates = BTreeMap::new();
    for (idx, sf) in [(0u8, 12u8), (1, 11), (2, 10), (3, 9), (4, 8), (5, 7)] {
        data_rates.insert(
            idx,
            DataRate::Lora {
                bandwidth_khz: 125,
                spreading_factor: sf,
            },
        );
    }
    data_rates.insert(
        6,
        DataRate::Lora {
            bandwidth_khz: 250,
            spreading_factor: 7,
        },
    );
    data_rates.insert(7, DataRate::Fsk { bitrate: 50_000 });

    let max_payload = BTreeMap::from([
        (0u8, 51usize),
        (1, 51),
        (2, 51),
        (3, 115),
        (4, 222),
        (5, 222),
        (6, 222),
        (7, 222),
    ]);

    Band::new(
        "EU868",
        base_channels.clone(),
        base_channels,
        data_rates,
        max_payload,
        vec![16, 14, 12, 10, 8, 6, 4, 2],
        869_525_000,
        0,
        16,
        869_525_000,
        3,
    )
}
