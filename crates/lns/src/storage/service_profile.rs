// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Service profiles: operator policy attached to devices.

use super::db::{from_millis, row_error, to_millis};
use super::Storage;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceProfile {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Uplink rate cap, messages per day (0 = unlimited).
    pub ul_rate: u32,
    /// Downlink rate cap, messages per day (0 = unlimited).
    pub dl_rate: u32,

    pub dr_min: u8,
    pub dr_max: u8,
    pub channel_mask: Vec<u8>,
    pub adr: bool,

    /// Device-status request period, requests per day (0 = disabled).
    pub dev_status_req_freq: u32,
    pub report_dev_status_battery: bool,
    pub report_dev_status_margin: bool,

    /// Share gateway metadata (RSSI, SNR, location) with the app server.
    pub add_gw_metadata: bool,
}

impl Storage {
    pub fn create_service_profile(&self, sp: &mut ServiceProfile) -> Result<()> {
        if sp.id.is_nil() {
            sp.id = Uuid::new_v4();
        }
        let now = super::db::now_millis();
        sp.created_at = now;
        sp.updated_at = now;

        self.db().with_conn(|conn| {
            conn.execute(
                "insert into service_profile (
                    id, created_at, updated_at, ul_rate, dl_rate, dr_min,
                    dr_max, channel_mask, adr, dev_status_req_freq,
                    report_dev_status_battery, report_dev_status_margin,
                    add_gw_metadata
                ) values (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    sp.id.to_string(),
                    to_millis(sp.created_at),
                    to_millis(sp.updated_at),
                    sp.ul_rate,
                    sp.dl_rate,
                    sp.dr_min,
                    sp.dr_max,
                    serde_json::to_string(&sp.channel_mask)?,
                    sp.adr,
                    sp.dev_status_req_freq,
                    sp.report_dev_status_battery,
                    sp.report_dev_status_margin,
                    sp.add_gw_metadata,
                ],
            )?;
            Ok(())
        })?;

        info!(id = %sp.id, "service-profile created");
        Ok(())
    }

    pub fn get_service_profile(&self, id: Uuid) -> Result<ServiceProfile> {
        self.db().with_conn(|conn| {
            conn.query_row(
                "select id, created_at, updated_at, ul_rate, dl_rate, dr_min,
                        dr_max, channel_mask, adr, dev_status_req_freq,
                        report_dev_status_battery, report_dev_status_margin,
                        add_gw_metadata
                 from service_profile where id = ?1",
                params![id.to_string()],
                |row| {
                    Ok(ServiceProfile {
                        id: row.get::<_, String>(0)?.parse().unwrap_or_default(),
                        created_at: from_millis(row.get(1)?),
                        updated_at: from_millis(row.get(2)?),
                        ul_rate: row.get(3)?,
                        dl_rate: row.get(4)?,
                        dr_min: row.get(5)?,
                        dr_max: row.get(6)?,
                        channel_mask: serde_json::from_str(&row.get::<_, String>(7)?)
                            .unwrap_or_default(),
                        adr: row.get(8)?,
                        dev_status_req_freq: row.get(9)?,
                        report_dev_status_battery: row.get(10)?,
                        report_dev_status_margin: row.get(11)?,
                        add_gw_metadata: row.get(12)?,
                    })
                },
            )
            .map_err(row_error)
        })
    }

    pub fn update_service_profile(&self, sp: &mut ServiceProfile) -> Result<()> {
        sp.updated_at = super::db::now_millis();
        let affected = self.db().with_conn(|conn| {
            Ok(conn.execute(
                "update service_profile set
                    updated_at = ?2, ul_rate = ?3, dl_rate = ?4, dr_min = ?5,
                    dr_max = ?6, channel_mask = ?7, adr = ?8,
                    dev_status_req_freq = ?9, report_dev_status_battery = ?10,
                    report_dev_status_margin = ?11, add_gw_metadata = ?12
                 where id = ?1",
                params![
                    sp.id.to_string(),
                    to_millis(sp.updated_at),
                    sp.ul_rate,
                    sp.dl_rate,
                    sp.dr_min,
                    sp.dr_max,
                    serde_json::to_string(&sp.channel_mask)?,
                    sp.adr,
                    sp.dev_status_req_freq,
                    sp.report_dev_status_battery,
                    sp.report_dev_status_margin,
                    sp.add_gw_metadata,
                ],
            )?)
        })?;
        if affected == 0 {
            return Err(Error::NotFound);
        }
        info!(id = %sp.id, "service-profile updated");
        Ok(())
    }

    pub fn delete_service_profile(&self, id: Uuid) -> Result<()> {
        let affected = self.db().with_conn(|conn| {
            Ok(conn.execute(
                "delete from service_profile where id = ?1",
                params![id.to_string()],
            )?)
        })?;
        if affected == 0 {
            return Err(Error::NotFound);
        }
        info!(id = %id, "service-profile deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_crud_roundtrip() {
        let s = Storage::open_in_memory(Duration::from_secs(60)).unwrap();
        let mut sp = ServiceProfile {
            dr_min: 0,
            dr_max: 5,
            adr: true,
            add_gw_metadata: true,
            ..Default::default()
        };
        s.create_service_profile(&mut sp).unwrap();
        assert_eq!(s.get_service_profile(sp.id).unwrap(), sp);

        sp.dr_max = 7;
        s.update_service_profile(&mut sp).unwrap();
        assert_eq!(s.get_service_profile(sp.id).unwrap().dr_max, 7);

        s.delete_service_profile(sp.id).unwrap();
        assert!(matches!(s.get_service_profile(sp.id), Err(Error::NotFound)));
    }
}
