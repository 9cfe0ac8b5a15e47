// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Devices and their multicast-group membership.

use super::db::{from_millis, row_error, to_millis};
use super::Storage;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use lrwn::EUI64;
use rusqlite::params;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

/// Operating class the device is currently in. Class B is only entered
/// after the device reports beacon lock via PingSlotInfoReq.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceMode {
    A,
    B,
    C,
}

impl Default for DeviceMode {
    fn default() -> Self {
        DeviceMode::A
    }
}

impl DeviceMode {
    fn as_str(self) -> &'static str {
        match self {
            DeviceMode::A => "A",
            DeviceMode::B => "B",
            DeviceMode::C => "C",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "B" => DeviceMode::B,
            "C" => DeviceMode::C,
            _ => DeviceMode::A,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub dev_eui: EUI64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    pub device_profile_id: Uuid,
    pub service_profile_id: Uuid,
    pub routing_profile_id: Uuid,

    pub skip_fcnt_check: bool,
    pub is_disabled: bool,
    pub mode: DeviceMode,
}

impl Storage {
    pub fn create_device(&self, d: &mut Device) -> Result<()> {
        let now = super::db::now_millis();
        d.created_at = now;
        d.updated_at = now;

        self.db().with_conn(|conn| {
            conn.execute(
                "insert into device (
                    dev_eui, created_at, updated_at, device_profile_id,
                    service_profile_id, routing_profile_id, skip_fcnt_check,
                    is_disabled, mode
                ) values (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    d.dev_eui.to_string(),
                    to_millis(d.created_at),
                    to_millis(d.updated_at),
                    d.device_profile_id.to_string(),
                    d.service_profile_id.to_string(),
                    d.routing_profile_id.to_string(),
                    d.skip_fcnt_check,
                    d.is_disabled,
                    d.mode.as_str(),
                ],
            )?;
            Ok(())
        })?;

        info!(dev_eui = %d.dev_eui, "device created");
        Ok(())
    }

    pub fn get_device(&self, dev_eui: EUI64) -> Result<Device> {
        self.db().with_conn(|conn| {
            conn.query_row(
                "select dev_eui, created_at, updated_at, device_profile_id,
                        service_profile_id, routing_profile_id,
                        skip_fcnt_check, is_disabled, mode
                 from device where dev_eui = ?1",
                params![dev_eui.to_string()],
                |row| {
                    Ok(Device {
                        dev_eui: row.get::<_, String>(0)?.parse().unwrap_or_default(),
                        created_at: from_millis(row.get(1)?),
                        updated_at: from_millis(row.get(2)?),
                        device_profile_id: row
                            .get::<_, String>(3)?
                            .parse()
                            .unwrap_or_default(),
                        service_profile_id: row
                            .get::<_, String>(4)?
                            .parse()
                            .unwrap_or_default(),
                        routing_profile_id: row
                            .get::<_, String>(5)?
                            .parse()
                            .unwrap_or_default(),
                        skip_fcnt_check: row.get(6)?,
                        is_disabled: row.get(7)?,
                        mode: DeviceMode::parse(&row.get::<_, String>(8)?),
                    })
                },
            )
            .map_err(row_error)
        })
    }

    pub fn update_device(&self, d: &mut Device) -> Result<()> {
        d.updated_at = super::db::now_millis();
        let affected = self.db().with_conn(|conn| {
            Ok(conn.execute(
                "update device set
                    updated_at = ?2, device_profile_id = ?3,
                    service_profile_id = ?4, routing_profile_id = ?5,
                    skip_fcnt_check = ?6, is_disabled = ?7, mode = ?8
                 where dev_eui = ?1",
                params![
                    d.dev_eui.to_string(),
                    to_millis(d.updated_at),
                    d.device_profile_id.to_string(),
                    d.service_profile_id.to_string(),
                    d.routing_profile_id.to_string(),
                    d.skip_fcnt_check,
                    d.is_disabled,
                    d.mode.as_str(),
                ],
            )?)
        })?;
        if affected == 0 {
            return Err(Error::NotFound);
        }
        info!(dev_eui = %d.dev_eui, "device updated");
        Ok(())
    }

    pub fn delete_device(&self, dev_eui: EUI64) -> Result<()> {
        let affected = self.db().with_conn(|conn| {
            Ok(conn.execute(
                "delete from device where dev_eui = ?1",
                params![dev_eui.to_string()],
            )?)
        })?;
        if affected == 0 {
            return Err(Error::NotFound);
        }
        info!(dev_eui = %dev_eui, "device deleted");
        Ok(())
    }

    pub fn add_device_to_multicast_group(
        &self,
        dev_eui: EUI64,
        multicast_group_id: Uuid,
    ) -> Result<()> {
        self.db().with_conn(|conn| {
            conn.execute(
                "insert into device_multicast_group
                    (dev_eui, multicast_group_id, created_at)
                 values (?1, ?2, ?3)",
                params![
                    dev_eui.to_string(),
                    multicast_group_id.to_string(),
                    to_millis(Utc::now()),
                ],
            )?;
            Ok(())
        })?;
        info!(dev_eui = %dev_eui, multicast_group_id = %multicast_group_id,
            "device added to multicast-group");
        Ok(())
    }

    pub fn remove_device_from_multicast_group(
        &self,
        dev_eui: EUI64,
        multicast_group_id: Uuid,
    ) -> Result<()> {
        let affected = self.db().with_conn(|conn| {
            Ok(conn.execute(
                "delete from device_multicast_group
                 where dev_eui = ?1 and multicast_group_id = ?2",
                params![dev_eui.to_string(), multicast_group_id.to_string()],
            )?)
        })?;
        if affected == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    /// DevEUIs of all members of the given multicast group.
    pub fn get_multicast_group_dev_euis(&self, multicast_group_id: Uuid) -> Result<Vec<EUI64>> {
        self.db().with_conn(|conn| {
            let mut stmt = conn.prepare(
                "select dev_eui from device_multicast_group
                 where multicast_group_id = ?1 order by dev_eui",
            )?;
            let rows = stmt.query_map(params![multicast_group_id.to_string()], |row| {
                row.get::<_, String>(0)
            })?;

            let mut out = Vec::new();
            for row in rows {
                out.push(
                    row?.parse()
                        .map_err(|e: lrwn::Error| Error::Validation(e.to_string()))?,
                );
            }
            Ok(out)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{DeviceProfile, RoutingProfile, ServiceProfile};
    use std::time::Duration;

    fn storage_with_profiles() -> (Storage, Uuid, Uuid, Uuid) {
        let s = Storage::open_in_memory(Duration::from_secs(60)).unwrap();
        let mut dp = DeviceProfile::default();
        let mut sp = ServiceProfile::default();
        let mut rp = RoutingProfile::default();
        s.create_device_profile(&mut dp).unwrap();
        s.create_service_profile(&mut sp).unwrap();
        s.create_routing_profile(&mut rp).unwrap();
        (s, dp.id, sp.id, rp.id)
    }

    #[test]
    fn test_device_crud() {
        let (s, dp, sp, rp) = storage_with_profiles();
        let mut d = Device {
            dev_eui: EUI64([1, 2, 3, 4, 5, 6, 7, 8]),
            device_profile_id: dp,
            service_profile_id: sp,
            routing_profile_id: rp,
            ..Default::default()
        };
        s.create_device(&mut d).unwrap();
        assert_eq!(s.get_device(d.dev_eui).unwrap(), d);

        d.mode = DeviceMode::C;
        s.update_device(&mut d).unwrap();
        assert_eq!(s.get_device(d.dev_eui).unwrap().mode, DeviceMode::C);

        s.delete_device(d.dev_eui).unwrap();
        assert!(matches!(s.get_device(d.dev_eui), Err(Error::NotFound)));
    }
}
