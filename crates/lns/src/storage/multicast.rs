// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Multicast groups and their downlink queue.

use super::db::{from_millis, row_error, to_millis};
use super::Storage;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use lrwn::{AES128Key, DevAddr, EUI64};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MulticastGroupType {
    B,
    C,
}

impl Default for MulticastGroupType {
    fn default() -> Self {
        MulticastGroupType::C
    }
}

impl MulticastGroupType {
    fn as_str(self) -> &'static str {
        match self {
            MulticastGroupType::B => "B",
            MulticastGroupType::C => "C",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "B" => MulticastGroupType::B,
            _ => MulticastGroupType::C,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MulticastGroup {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    pub mc_addr: DevAddr,
    pub mc_nwk_s_key: AES128Key,
    /// Next downlink counter for the group.
    pub f_cnt: u32,
    pub group_type: MulticastGroupType,
    pub dr: u8,
    pub frequency: u32,
    /// Class B only: distance between ping slots, in slots.
    pub ping_slot_period: usize,

    pub service_profile_id: Uuid,
    pub routing_profile_id: Uuid,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MulticastQueueItem {
    pub id: i64,
    pub created_at: DateTime<Utc>,

    pub multicast_group_id: Uuid,
    /// Gateway selected to carry this transmission.
    pub gateway_id: EUI64,

    pub f_cnt: u32,
    pub f_port: u8,
    pub frm_payload: Vec<u8>,

    /// Wall-clock time at which the scheduler picks the item up.
    pub schedule_at: DateTime<Utc>,
    /// Class B only: GPS-epoch-aligned emit time for the gateway.
    pub emit_at_gps_epoch: Option<Duration>,
}

impl Storage {
    pub fn create_multicast_group(&self, mg: &mut MulticastGroup) -> Result<()> {
        if mg.id.is_nil() {
            mg.id = Uuid::new_v4();
        }
        let now = super::db::now_millis();
        mg.created_at = now;
        mg.updated_at = now;

        self.db().with_conn(|conn| {
            conn.execute(
                "insert into multicast_group (
                    id, created_at, updated_at, mc_addr, mc_nwk_s_key, f_cnt,
                    group_type, dr, frequency, ping_slot_period,
                    service_profile_id, routing_profile_id
                ) values (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    mg.id.to_string(),
                    to_millis(mg.created_at),
                    to_millis(mg.updated_at),
                    mg.mc_addr.to_string(),
                    mg.mc_nwk_s_key.to_string(),
                    mg.f_cnt,
                    mg.group_type.as_str(),
                    mg.dr,
                    mg.frequency,
                    mg.ping_slot_period as i64,
                    mg.service_profile_id.to_string(),
                    mg.routing_profile_id.to_string(),
                ],
            )?;
            Ok(())
        })?;

        info!(id = %mg.id, "multicast-group created");
        Ok(())
    }

    pub fn get_multicast_group(&self, id: Uuid) -> Result<MulticastGroup> {
        self.db().with_conn(|conn| {
            conn.query_row(
                "select id, created_at, updated_at, mc_addr, mc_nwk_s_key,
                        f_cnt, group_type, dr, frequency, ping_slot_period,
                        service_profile_id, routing_profile_id
                 from multicast_group where id = ?1",
                params![id.to_string()],
                map_group_row,
            )
            .map_err(row_error)
        })
    }

    pub fn update_multicast_group(&self, mg: &mut MulticastGroup) -> Result<()> {
        mg.updated_at = super::db::now_millis();
        let affected = self.db().with_conn(|conn| {
            Ok(conn.execute(
                "update multicast_group set
                    updated_at = ?2, mc_addr = ?3, mc_nwk_s_key = ?4,
                    f_cnt = ?5, group_type = ?6, dr = ?7, frequency = ?8,
                    ping_slot_period = ?9
                 where id = ?1",
                params![
                    mg.id.to_string(),
                    to_millis(mg.updated_at),
                    mg.mc_addr.to_string(),
                    mg.mc_nwk_s_key.to_string(),
                    mg.f_cnt,
                    mg.group_type.as_str(),
                    mg.dr,
                    mg.frequency,
                    mg.ping_slot_period as i64,
                ],
            )?)
        })?;
        if affected == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    pub fn delete_multicast_group(&self, id: Uuid) -> Result<()> {
        let affected = self.db().with_conn(|conn| {
            Ok(conn.execute(
                "delete from multicast_group where id = ?1",
                params![id.to_string()],
            )?)
        })?;
        if affected == 0 {
            return Err(Error::NotFound);
        }
        info!(id = %id, "multicast-group deleted");
        Ok(())
    }

    /// Insert the fan-out items and advance the group counter in one
    /// transaction.
    pub fn commit_multicast_enqueue(
        &self,
        group_id: Uuid,
        new_f_cnt: u32,
        items: &mut [MulticastQueueItem],
    ) -> Result<()> {
        let now = super::db::now_millis();
        self.db().with_tx(|tx| {
            for qi in items.iter_mut() {
                qi.created_at = now;
                tx.execute(
                    "insert into multicast_queue (
                        created_at, schedule_at, emit_at_gps_epoch_ms,
                        multicast_group_id, gateway_id, f_cnt, f_port,
                        frm_payload
                    ) values (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        to_millis(qi.created_at),
                        to_millis(qi.schedule_at),
                        qi.emit_at_gps_epoch.map(|d| d.as_millis() as i64),
                        qi.multicast_group_id.to_string(),
                        qi.gateway_id.to_string(),
                        qi.f_cnt,
                        qi.f_port,
                        qi.frm_payload,
                    ],
                )?;
                qi.id = tx.last_insert_rowid();
            }

            let affected = tx.execute(
                "update multicast_group set f_cnt = ?2, updated_at = ?3
                 where id = ?1",
                params![group_id.to_string(), new_f_cnt, to_millis(now)],
            )?;
            if affected == 0 {
                return Err(Error::NotFound);
            }
            Ok(())
        })
    }

    /// Queue items of a group ordered by schedule time.
    pub fn get_multicast_queue_items_for_group(
        &self,
        group_id: Uuid,
    ) -> Result<Vec<MulticastQueueItem>> {
        self.db().with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{SELECT} where multicast_group_id = ?1 order by schedule_at, id"
            ))?;
            let rows = stmt.query_map(params![group_id.to_string()], map_queue_row)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
    }

    /// Due items for one scheduler pass, oldest first.
    pub fn get_schedulable_multicast_queue_items(
        &self,
        limit: usize,
    ) -> Result<Vec<MulticastQueueItem>> {
        let now = to_millis(Utc::now());
        self.db().with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{SELECT} where schedule_at <= ?1 order by schedule_at, id limit ?2"
            ))?;
            let rows = stmt.query_map(params![now, limit as i64], map_queue_row)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
    }

    pub fn delete_multicast_queue_item(&self, id: i64) -> Result<()> {
        let affected = self.db().with_conn(|conn| {
            Ok(conn.execute("delete from multicast_queue where id = ?1", params![id])?)
        })?;
        if affected == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }
}

const SELECT: &str = "select id, created_at, schedule_at, emit_at_gps_epoch_ms,
    multicast_group_id, gateway_id, f_cnt, f_port, frm_payload
    from multicast_queue";

fn map_group_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MulticastGroup> {
    Ok(MulticastGroup {
        id: row.get::<_, String>(0)?.parse().unwrap_or_default(),
        created_at: from_millis(row.get(1)?),
        updated_at: from_millis(row.get(2)?),
        mc_addr: row.get::<_, String>(3)?.parse().unwrap_or_default(),
        mc_nwk_s_key: row.get::<_, String>(4)?.parse().unwrap_or_default(),
        f_cnt: row.get(5)?,
        group_type: MulticastGroupType::parse(&row.get::<_, String>(6)?),
        dr: row.get(7)?,
        frequency: row.get(8)?,
        ping_slot_period: row.get::<_, i64>(9)? as usize,
        service_profile_id: row.get::<_, String>(10)?.parse().unwrap_or_default(),
        routing_profile_id: row.get::<_, String>(11)?.parse().unwrap_or_default(),
    })
}

fn map_queue_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MulticastQueueItem> {
    Ok(MulticastQueueItem {
        id: row.get(0)?,
        created_at: from_millis(row.get(1)?),
        schedule_at: from_millis(row.get(2)?),
        emit_at_gps_epoch: row
            .get::<_, Option<i64>>(3)?
            .map(|ms| Duration::from_millis(ms as u64)),
        multicast_group_id: row.get::<_, String>(4)?.parse().unwrap_or_default(),
        gateway_id: row.get::<_, String>(5)?.parse().unwrap_or_default(),
        f_cnt: row.get(6)?,
        f_port: row.get(7)?,
        frm_payload: row.get(8)?,
    })
}
