// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Device profiles: capability descriptors referenced by devices.
//!
//! Profiles live in the catalog and are additionally cached with the
//! device-session TTL, because the uplink path reads them per frame.

use super::db::{from_millis, row_error, to_millis};
use super::{device_profile_key, Storage};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    pub supports_class_b: bool,
    pub class_b_timeout_secs: u32,
    /// Distance between ping slots, in slots (4096 = one per beacon period).
    pub ping_slot_period: usize,
    pub ping_slot_dr: u8,
    pub ping_slot_freq: u32,

    pub supports_class_c: bool,
    pub class_c_timeout_secs: u32,

    /// Example: "1.0.2".
    pub mac_version: String,
    /// Example: "B".
    pub reg_params_revision: String,

    pub rx_delay_1: u8,
    pub rx_dr_offset_1: u8,
    pub rx_data_rate_2: u8,
    pub rx_freq_2: u32,

    pub factory_preset_freqs: Vec<u32>,
    pub max_eirp: i32,
    /// Example: 10 meaning 10%.
    pub max_duty_cycle: u32,

    pub supports_join: bool,
    pub rf_region: String,
    pub supports_32bit_fcnt: bool,
    pub adr_algorithm_id: String,
}

impl DeviceProfile {
    /// LoRaWAN 1.1 and newer split the network session key.
    pub fn lorawan_11(&self) -> bool {
        self.mac_version.starts_with("1.1")
    }
}

impl Storage {
    pub fn create_device_profile(&self, dp: &mut DeviceProfile) -> Result<()> {
        if dp.id.is_nil() {
            dp.id = Uuid::new_v4();
        }
        let now = super::db::now_millis();
        dp.created_at = now;
        dp.updated_at = now;

        self.db().with_conn(|conn| {
            conn.execute(
                "insert into device_profile (
                    id, created_at, updated_at,
                    supports_class_b, class_b_timeout_secs, ping_slot_period,
                    ping_slot_dr, ping_slot_freq, supports_class_c,
                    class_c_timeout_secs, mac_version, reg_params_revision,
                    rx_delay_1, rx_dr_offset_1, rx_data_rate_2, rx_freq_2,
                    factory_preset_freqs, max_eirp, max_duty_cycle,
                    supports_join, rf_region, supports_32bit_fcnt,
                    adr_algorithm_id
                ) values (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12,
                          ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23)",
                params![
                    dp.id.to_string(),
                    to_millis(dp.created_at),
                    to_millis(dp.updated_at),
                    dp.supports_class_b,
                    dp.class_b_timeout_secs,
                    dp.ping_slot_period as i64,
                    dp.ping_slot_dr,
                    dp.ping_slot_freq,
                    dp.supports_class_c,
                    dp.class_c_timeout_secs,
                    dp.mac_version,
                    dp.reg_params_revision,
                    dp.rx_delay_1,
                    dp.rx_dr_offset_1,
                    dp.rx_data_rate_2,
                    dp.rx_freq_2,
                    serde_json::to_string(&dp.factory_preset_freqs)?,
                    dp.max_eirp,
                    dp.max_duty_cycle,
                    dp.supports_join,
                    dp.rf_region,
                    dp.supports_32bit_fcnt,
                    dp.adr_algorithm_id,
                ],
            )?;
            Ok(())
        })?;

        info!(id = %dp.id, "device-profile created");
        Ok(())
    }

    pub fn get_device_profile(&self, id: Uuid) -> Result<DeviceProfile> {
        self.db().with_conn(|conn| {
            conn.query_row(
                "select id, created_at, updated_at, supports_class_b,
                        class_b_timeout_secs, ping_slot_period, ping_slot_dr,
                        ping_slot_freq, supports_class_c, class_c_timeout_secs,
                        mac_version, reg_params_revision, rx_delay_1,
                        rx_dr_offset_1, rx_data_rate_2, rx_freq_2,
                        factory_preset_freqs, max_eirp, max_duty_cycle,
                        supports_join, rf_region, supports_32bit_fcnt,
                        adr_algorithm_id
                 from device_profile where id = ?1",
                params![id.to_string()],
                |row| {
                    Ok(DeviceProfile {
                        id: row
                            .get::<_, String>(0)?
                            .parse()
                            .unwrap_or_default(),
                        created_at: from_millis(row.get(1)?),
                        updated_at: from_millis(row.get(2)?),
                        supports_class_b: row.get(3)?,
                        class_b_timeout_secs: row.get(4)?,
                        ping_slot_period: row.get::<_, i64>(5)? as usize,
                        ping_slot_dr: row.get(6)?,
                        ping_slot_freq: row.get(7)?,
                        supports_class_c: row.get(8)?,
                        class_c_timeout_secs: row.get(9)?,
                        mac_version: row.get(10)?,
                        reg_params_revision: row.get(11)?,
                        rx_delay_1: row.get(12)?,
                        rx_dr_offset_1: row.get(13)?,
                        rx_data_rate_2: row.get(14)?,
                        rx_freq_2: row.get(15)?,
                        factory_preset_freqs: serde_json::from_str(
                            &row.get::<_, String>(16)?,
                        )
                        .unwrap_or_default(),
                        max_eirp: row.get(17)?,
                        max_duty_cycle: row.get(18)?,
                        supports_join: row.get(19)?,
                        rf_region: row.get(20)?,
                        supports_32bit_fcnt: row.get(21)?,
                        adr_algorithm_id: row.get(22)?,
                    })
                },
            )
            .map_err(row_error)
        })
    }

    pub fn update_device_profile(&self, dp: &mut DeviceProfile) -> Result<()> {
        dp.updated_at = super::db::now_millis();

        let affected = self.db().with_conn(|conn| {
            Ok(conn.execute(
                "update device_profile set
                    updated_at = ?2, supports_class_b = ?3,
                    class_b_timeout_secs = ?4, ping_slot_period = ?5,
                    ping_slot_dr = ?6, ping_slot_freq = ?7,
                    supports_class_c = ?8, class_c_timeout_secs = ?9,
                    mac_version = ?10, reg_params_revision = ?11,
                    rx_delay_1 = ?12, rx_dr_offset_1 = ?13,
                    rx_data_rate_2 = ?14, rx_freq_2 = ?15,
                    factory_preset_freqs = ?16, max_eirp = ?17,
                    max_duty_cycle = ?18, supports_join = ?19,
                    rf_region = ?20, supports_32bit_fcnt = ?21,
                    adr_algorithm_id = ?22
                 where id = ?1",
                params![
                    dp.id.to_string(),
                    to_millis(dp.updated_at),
                    dp.supports_class_b,
                    dp.class_b_timeout_secs,
                    dp.ping_slot_period as i64,
                    dp.ping_slot_dr,
                    dp.ping_slot_freq,
                    dp.supports_class_c,
                    dp.class_c_timeout_secs,
                    dp.mac_version,
                    dp.reg_params_revision,
                    dp.rx_delay_1,
                    dp.rx_dr_offset_1,
                    dp.rx_data_rate_2,
                    dp.rx_freq_2,
                    serde_json::to_string(&dp.factory_preset_freqs)?,
                    dp.max_eirp,
                    dp.max_duty_cycle,
                    dp.supports_join,
                    dp.rf_region,
                    dp.supports_32bit_fcnt,
                    dp.adr_algorithm_id,
                ],
            )?)
        })?;
        if affected == 0 {
            return Err(Error::NotFound);
        }

        self.flush_device_profile_cache(dp.id);
        info!(id = %dp.id, "device-profile updated");
        Ok(())
    }

    pub fn delete_device_profile(&self, id: Uuid) -> Result<()> {
        let affected = self.db().with_conn(|conn| {
            Ok(conn.execute(
                "delete from device_profile where id = ?1",
                params![id.to_string()],
            )?)
        })?;
        if affected == 0 {
            return Err(Error::NotFound);
        }
        self.flush_device_profile_cache(id);
        info!(id = %id, "device-profile deleted");
        Ok(())
    }

    /// Cached read, falling back to the catalog and repopulating the cache.
    pub fn get_and_cache_device_profile(&self, id: Uuid) -> Result<DeviceProfile> {
        let key = device_profile_key(id);
        if let Some(raw) = self.cache().get(&key) {
            match serde_json::from_slice(&raw) {
                Ok(dp) => return Ok(dp),
                Err(e) => {
                    // fall back onto db retrieval
                    error!(id = %id, error = %e, "decode cached device-profile error");
                }
            }
        }

        let dp = self.get_device_profile(id)?;
        self.cache()
            .set(&key, serde_json::to_vec(&dp)?, self.session_ttl());
        Ok(dp)
    }

    pub fn flush_device_profile_cache(&self, id: Uuid) {
        self.cache().del(&device_profile_key(id));
    }
}
