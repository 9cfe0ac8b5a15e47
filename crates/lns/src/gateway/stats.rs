// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Gateway statistics handling.
//!
//! Stamps the gateway's last-seen, translates per-modulation packet
//! counters into per-DR counters via the band table, forwards the result
//! to the application server, and pushes a fresh channel-plan
//! configuration to gateways that report a concentratord version.

use super::{
    ChannelConfiguration, ChannelModulationConfig, GatewayBackend, GatewayConfiguration,
    GatewayStats, PerModulationCount,
};
use crate::backend::{ApplicationServer, GatewayStatsRequest};
use crate::region::{Band, DataRate};
use crate::storage::{GatewayProfile, Storage};
use crate::Result;
use chrono::Utc;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, warn};

/// Metadata key a concentratord-managed gateway reports; only those
/// gateways accept pushed configuration.
const CONCENTRATORD_VERSION_KEY: &str = "concentratord_version";

pub fn handle_gateway_stats(
    storage: &Storage,
    band: &Band,
    as_client: &dyn ApplicationServer,
    gw_backend: &dyn GatewayBackend,
    stats: GatewayStats,
) -> Result<()> {
    let gw = storage.get_gateway(stats.gateway_id)?;
    storage.update_gateway_seen(stats.gateway_id, stats.time.unwrap_or_else(Utc::now))?;

    let req = GatewayStatsRequest {
        gateway_id: stats.gateway_id,
        time: stats.time,
        rx_packets_received: stats.rx_packets_received,
        rx_packets_received_ok: stats.rx_packets_received_ok,
        tx_packets_received: stats.tx_packets_received,
        tx_packets_emitted: stats.tx_packets_emitted,
        tx_packets_per_frequency: stats.tx_packets_per_frequency.clone(),
        rx_packets_per_frequency: stats.rx_packets_per_frequency.clone(),
        tx_packets_per_dr: per_modulation_to_per_dr(band, false, &stats.tx_packets_per_modulation),
        rx_packets_per_dr: per_modulation_to_per_dr(band, true, &stats.rx_packets_per_modulation),
        tx_packets_per_status: stats.tx_packets_per_status.clone(),
        metadata: stats.metadata.clone(),
    };
    as_client.handle_gateway_stats(req)?;

    // configuration push, gated on concentratord + an assigned profile
    if !stats.metadata.contains_key(CONCENTRATORD_VERSION_KEY) {
        return Ok(());
    }
    let Some(gp_id) = gw.gateway_profile_id else {
        return Ok(());
    };
    let gp = storage.get_gateway_profile(gp_id)?;

    let config = GatewayConfiguration {
        gateway_id: stats.gateway_id,
        version: gp.version(),
        stats_interval: Duration::from_secs(gp.stats_interval_secs as u64),
        channels: build_channels(band, &gp),
    };
    gw_backend.send_gateway_configuration(config)?;

    info!(gateway_id = %stats.gateway_id, "gateway configuration sent");
    Ok(())
}

fn per_modulation_to_per_dr(
    band: &Band,
    uplink: bool,
    counts: &[PerModulationCount],
) -> HashMap<u32, u32> {
    let mut out = HashMap::new();
    for pm in counts {
        match band.get_data_rate_index(uplink, &pm.modulation.data_rate()) {
            Ok(dr) => {
                *out.entry(dr as u32).or_insert(0) += pm.count;
            }
            Err(_) => {
                warn!(modulation = ?pm.modulation, "modulation without data-rate, count dropped");
            }
        }
    }
    out
}

/// Band-required channels referenced by the profile, ascending by
/// frequency, followed by the profile's extra channels in declared order.
fn build_channels(band: &Band, gp: &GatewayProfile) -> Vec<ChannelConfiguration> {
    let mut out = Vec::new();

    let mut base: Vec<_> = gp
        .channels
        .iter()
        .filter_map(|i| band.uplink_channels().get(*i))
        .collect();
    base.sort_by_key(|c| c.frequency);

    for ch in base {
        let mut spreading_factors = Vec::new();
        let mut bandwidth_khz = 125;
        for dr in ch.min_dr..=ch.max_dr {
            if let Ok(DataRate::Lora {
                bandwidth_khz: bw,
                spreading_factor,
            }) = band.data_rate(dr)
            {
                spreading_factors.push(spreading_factor);
                bandwidth_khz = bw;
            }
        }
        spreading_factors.sort_unstable();

        out.push(ChannelConfiguration {
            frequency: ch.frequency,
            modulation: ChannelModulationConfig::Lora {
                bandwidth_khz,
                spreading_factors,
            },
        });
    }

    for extra in &gp.extra_channels {
        let modulation = match extra.modulation.as_str() {
            "FSK" => ChannelModulationConfig::Fsk {
                bandwidth_khz: extra.bandwidth_khz,
                bitrate: extra.bitrate,
            },
            _ => ChannelModulationConfig::Lora {
                bandwidth_khz: extra.bandwidth_khz,
                spreading_factors: extra.spreading_factors.clone(),
            },
        };
        out.push(ChannelConfiguration {
            frequency: extra.frequency,
            modulation,
        });
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockApplicationServer;
    use crate::gateway::{MockGatewayBackend, ModulationInfo};
    use crate::region::eu868;
    use crate::storage::{ExtraChannel, Gateway, RoutingProfile};
    use lrwn::EUI64;

    fn setup() -> (Storage, Gateway) {
        let s = Storage::open_in_memory(Duration::from_secs(60)).unwrap();
        let mut rp = RoutingProfile::default();
        s.create_routing_profile(&mut rp).unwrap();
        let mut gw = Gateway {
            gateway_id: EUI64([1, 2, 3, 4, 5, 6, 7, 8]),
            routing_profile_id: rp.id,
            ..Default::default()
        };
        s.create_gateway(&mut gw).unwrap();
        (s, gw)
    }

    fn lora_count(sf: u8, count: u32) -> PerModulationCount {
        PerModulationCount {
            modulation: ModulationInfo::Lora {
                bandwidth_khz: 125,
                spreading_factor: sf,
                code_rate: "4/5".into(),
            },
            count,
        }
    }

    #[test]
    fn test_stats_modulation_translated_to_dr() {
        let (s, gw) = setup();
        let band = eu868();
        let as_client = MockApplicationServer::new();
        let gw_backend = MockGatewayBackend::new();

        let stats = GatewayStats {
            gateway_id: gw.gateway_id,
            rx_packets_received: 11,
            rx_packets_received_ok: 9,
            tx_packets_received: 13,
            tx_packets_emitted: 10,
            tx_packets_per_modulation: vec![lora_count(8, 10)],
            rx_packets_per_modulation: vec![lora_count(10, 9)],
            ..Default::default()
        };

        handle_gateway_stats(&s, &band, &as_client, &gw_backend, stats).unwrap();

        let reqs = as_client.gateway_stats.lock();
        assert_eq!(reqs.len(), 1);
        assert_eq!(reqs[0].tx_packets_per_dr, HashMap::from([(4, 10)]));
        assert_eq!(reqs[0].rx_packets_per_dr, HashMap::from([(2, 9)]));

        // no concentratord metadata: no configuration push
        assert!(gw_backend.gateway_configurations.lock().is_empty());

        // last-seen was stamped
        assert!(s.get_gateway(gw.gateway_id).unwrap().last_seen_at.is_some());
    }

    #[test]
    fn test_configuration_pushed_for_concentratord() {
        let (s, mut gw) = setup();
        let band = eu868();
        let as_client = MockApplicationServer::new();
        let gw_backend = MockGatewayBackend::new();

        let mut gp = GatewayProfile {
            channels: vec![0, 1, 2],
            stats_interval_secs: 30,
            extra_channels: vec![
                ExtraChannel {
                    modulation: "LORA".into(),
                    frequency: 867_100_000,
                    bandwidth_khz: 125,
                    bitrate: 0,
                    spreading_factors: vec![7, 8, 9, 10, 11, 12],
                },
                ExtraChannel {
                    modulation: "FSK".into(),
                    frequency: 868_800_000,
                    bandwidth_khz: 125,
                    bitrate: 50_000,
                    spreading_factors: vec![],
                },
            ],
            ..Default::default()
        };
        s.create_gateway_profile(&mut gp).unwrap();
        gw.gateway_profile_id = Some(gp.id);
        s.update_gateway(&mut gw).unwrap();

        let stats = GatewayStats {
            gateway_id: gw.gateway_id,
            metadata: HashMap::from([(
                "concentratord_version".to_string(),
                "3.3.0".to_string(),
            )]),
            ..Default::default()
        };
        handle_gateway_stats(&s, &band, &as_client, &gw_backend, stats).unwrap();

        let configs = gw_backend.gateway_configurations.lock();
        assert_eq!(configs.len(), 1);
        let config = &configs[0];
        assert_eq!(config.stats_interval, Duration::from_secs(30));

        let freqs: Vec<u32> = config.channels.iter().map(|c| c.frequency).collect();
        assert_eq!(
            freqs,
            vec![868_100_000, 868_300_000, 868_500_000, 867_100_000, 868_800_000]
        );

        match &config.channels[0].modulation {
            ChannelModulationConfig::Lora {
                bandwidth_khz,
                spreading_factors,
            } => {
                assert_eq!(*bandwidth_khz, 125);
                assert_eq!(spreading_factors, &vec![7, 8, 9, 10, 11, 12]);
            }
            other => panic!("unexpected {other:?}"),
        }
        match &config.channels[4].modulation {
            ChannelModulationConfig::Fsk { bitrate, .. } => assert_eq!(*bitrate, 50_000),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_unknown_gateway_is_not_found() {
        let (s, _) = setup();
        let band = eu868();
        let as_client = MockApplicationServer::new();
        let gw_backend = MockGatewayBackend::new();

        let stats = GatewayStats {
            gateway_id: EUI64([9; 8]),
            ..Default::default()
        };
        assert!(matches!(
            handle_gateway_stats(&s, &band, &as_client, &gw_backend, stats),
            Err(crate::Error::NotFound)
        ));
    }
}
