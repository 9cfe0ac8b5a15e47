// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Gateways and gateway profiles.
//!
//! A gateway profile pins the channel plan pushed to concentratord-managed
//! gateways: indices into the band's channel table plus free-form extra
//! channels.

use super::db::{from_millis, opt_from_millis, opt_to_millis, row_error, to_millis};
use super::Storage;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use lrwn::EUI64;
use rusqlite::params;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Gateway {
    pub gateway_id: EUI64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub first_seen_at: Option<DateTime<Utc>>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub routing_profile_id: Uuid,
    pub gateway_profile_id: Option<Uuid>,
}

/// Channel outside the band's required set, pushed via gateway
/// configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtraChannel {
    /// "LORA" or "FSK".
    pub modulation: String,
    pub frequency: u32,
    pub bandwidth_khz: u32,
    pub bitrate: u32,
    pub spreading_factors: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GatewayProfile {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Indices into the band's uplink channel table.
    pub channels: Vec<usize>,
    pub stats_interval_secs: u32,
    pub extra_channels: Vec<ExtraChannel>,
}

impl GatewayProfile {
    /// Configuration version pushed to gateways; derived from the update
    /// timestamp so every profile change invalidates the gateway's view.
    pub fn version(&self) -> String {
        format!("{}", self.updated_at.timestamp())
    }
}

impl Storage {
    pub fn create_gateway(&self, gw: &mut Gateway) -> Result<()> {
        let now = super::db::now_millis();
        gw.created_at = now;
        gw.updated_at = now;

        self.db().with_conn(|conn| {
            conn.execute(
                "insert into gateway (
                    gateway_id, created_at, updated_at, first_seen_at,
                    last_seen_at, routing_profile_id, gateway_profile_id
                ) values (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    gw.gateway_id.to_string(),
                    to_millis(gw.created_at),
                    to_millis(gw.updated_at),
                    opt_to_millis(gw.first_seen_at),
                    opt_to_millis(gw.last_seen_at),
                    gw.routing_profile_id.to_string(),
                    gw.gateway_profile_id.map(|id| id.to_string()),
                ],
            )?;
            Ok(())
        })?;

        info!(gateway_id = %gw.gateway_id, "gateway created");
        Ok(())
    }

    pub fn get_gateway(&self, gateway_id: EUI64) -> Result<Gateway> {
        self.db().with_conn(|conn| {
            conn.query_row(
                "select gateway_id, created_at, updated_at, first_seen_at,
                        last_seen_at, routing_profile_id, gateway_profile_id
                 from gateway where gateway_id = ?1",
                params![gateway_id.to_string()],
                |row| {
                    Ok(Gateway {
                        gateway_id: row.get::<_, String>(0)?.parse().unwrap_or_default(),
                        created_at: from_millis(row.get(1)?),
                        updated_at: from_millis(row.get(2)?),
                        first_seen_at: opt_from_millis(row.get(3)?),
                        last_seen_at: opt_from_millis(row.get(4)?),
                        routing_profile_id: row
                            .get::<_, String>(5)?
                            .parse()
                            .unwrap_or_default(),
                        gateway_profile_id: row
                            .get::<_, Option<String>>(6)?
                            .and_then(|s| s.parse().ok()),
                    })
                },
            )
            .map_err(row_error)
        })
    }

    pub fn update_gateway(&self, gw: &mut Gateway) -> Result<()> {
        gw.updated_at = super::db::now_millis();
        let affected = self.db().with_conn(|conn| {
            Ok(conn.execute(
                "update gateway set
                    updated_at = ?2, first_seen_at = ?3, last_seen_at = ?4,
                    routing_profile_id = ?5, gateway_profile_id = ?6
                 where gateway_id = ?1",
                params![
                    gw.gateway_id.to_string(),
                    to_millis(gw.updated_at),
                    opt_to_millis(gw.first_seen_at),
                    opt_to_millis(gw.last_seen_at),
                    gw.routing_profile_id.to_string(),
                    gw.gateway_profile_id.map(|id| id.to_string()),
                ],
            )?)
        })?;
        if affected == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    /// Stamp first/last-seen from a stats message.
    pub fn update_gateway_seen(&self, gateway_id: EUI64, at: DateTime<Utc>) -> Result<()> {
        let mut gw = self.get_gateway(gateway_id)?;
        if gw.first_seen_at.is_none() {
            gw.first_seen_at = Some(at);
        }
        gw.last_seen_at = Some(at);
        self.update_gateway(&mut gw)
    }

    pub fn delete_gateway(&self, gateway_id: EUI64) -> Result<()> {
        let affected = self.db().with_conn(|conn| {
            Ok(conn.execute(
                "delete from gateway where gateway_id = ?1",
                params![gateway_id.to_string()],
            )?)
        })?;
        if affected == 0 {
            return Err(Error::NotFound);
        }
        info!(gateway_id = %gateway_id, "gateway deleted");
        Ok(())
    }

    pub fn create_gateway_profile(&self, gp: &mut GatewayProfile) -> Result<()> {
        if gp.id.is_nil() {
            gp.id = Uuid::new_v4();
        }
        let now = super::db::now_millis();
        gp.created_at = now;
        gp.updated_at = now;

        self.db().with_conn(|conn| {
            conn.execute(
                "insert into gateway_profile (
                    id, created_at, updated_at, channels, stats_interval_secs,
                    extra_channels
                ) values (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    gp.id.to_string(),
                    to_millis(gp.created_at),
                    to_millis(gp.updated_at),
                    serde_json::to_string(&gp.channels)?,
                    gp.stats_interval_secs,
                    serde_json::to_string(&gp.extra_channels)?,
                ],
            )?;
            Ok(())
        })?;

        info!(id = %gp.id, "gateway-profile created");
        Ok(())
    }

    pub fn get_gateway_profile(&self, id: Uuid) -> Result<GatewayProfile> {
        self.db().with_conn(|conn| {
            conn.query_row(
                "select id, created_at, updated_at, channels,
                        stats_interval_secs, extra_channels
                 from gateway_profile where id = ?1",
                params![id.to_string()],
                |row| {
                    Ok(GatewayProfile {
                        id: row.get::<_, String>(0)?.parse().unwrap_or_default(),
                        created_at: from_millis(row.get(1)?),
                        updated_at: from_millis(row.get(2)?),
                        channels: serde_json::from_str(&row.get::<_, String>(3)?)
                            .unwrap_or_default(),
                        stats_interval_secs: row.get(4)?,
                        extra_channels: serde_json::from_str(&row.get::<_, String>(5)?)
                            .unwrap_or_default(),
                    })
                },
            )
            .map_err(row_error)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::RoutingProfile;
    use std::time::Duration;

    #[test]
    fn test_gateway_crud_and_seen_stamps() {
        let s = Storage::open_in_memory(Duration::from_secs(60)).unwrap();
        let mut rp = RoutingProfile::default();
        s.create_routing_profile(&mut rp).unwrap();

        let mut gw = Gateway {
            gateway_id: EUI64([1, 2, 3, 4, 5, 6, 7, 8]),
            routing_profile_id: rp.id,
            ..Default::default()
        };
        s.create_gateway(&mut gw).unwrap();
        assert_eq!(s.get_gateway(gw.gateway_id).unwrap(), gw);

        let t = Utc::now();
        s.update_gateway_seen(gw.gateway_id, t).unwrap();
        let got = s.get_gateway(gw.gateway_id).unwrap();
        assert!(got.first_seen_at.is_some());
        assert_eq!(
            got.last_seen_at.unwrap().timestamp_millis(),
            t.timestamp_millis()
        );
    }

    #[test]
    fn test_gateway_profile_roundtrip() {
        let s = Storage::open_in_memory(Duration::from_secs(60)).unwrap();
        let mut gp = GatewayProfile {
            channels: vec![0, 1, 2],
            stats_interval_secs: 30,
            extra_channels: vec![ExtraChannel {
                modulation: "LORA".into(),
                frequency: 867_100_000,
                bandwidth_khz: 125,
                bitrate: 0,
                spreading_factors: vec![7, 8, 9, 10, 11, 12],
            }],
            ..Default::default()
        };
        s.create_gateway_profile(&mut gp).unwrap();
        assert_eq!(s.get_gateway_profile(gp.id).unwrap(), gp);
    }
}
