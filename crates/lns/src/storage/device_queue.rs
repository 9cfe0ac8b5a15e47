// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-device application downlink queue.
//!
//! Items are consumed head-first by the downlink assembler. A confirmed
//! item stays queued with `is_pending` set until the device acknowledges
//! or `retry_after` passes.

use super::db::{from_millis, opt_from_millis, opt_to_millis, row_error, to_millis};
use super::Storage;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use lrwn::EUI64;
use rusqlite::params;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceQueueItem {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    pub dev_eui: EUI64,
    /// Already encrypted by the application server (AppSKey never reaches
    /// the network server).
    pub frm_payload: Vec<u8>,
    pub f_cnt: u32,
    pub f_port: u8,
    pub confirmed: bool,

    /// Sent as confirmed, awaiting device ACK.
    pub is_pending: bool,
    /// Class B: GPS-epoch emit time.
    pub emit_at_gps_epoch: Option<Duration>,
    /// Pending items expire here and are retried or dropped.
    pub timeout_after: Option<DateTime<Utc>>,
    pub retry_after: Option<DateTime<Utc>>,
}

impl Storage {
    pub fn create_device_queue_item(&self, qi: &mut DeviceQueueItem) -> Result<()> {
        let now = super::db::now_millis();
        qi.created_at = now;
        qi.updated_at = now;

        let id = self.db().with_conn(|conn| {
            conn.execute(
                "insert into device_queue (
                    created_at, updated_at, dev_eui, frm_payload, f_cnt,
                    f_port, confirmed, is_pending, emit_at_gps_epoch_ms,
                    timeout_after, retry_after
                ) values (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    to_millis(qi.created_at),
                    to_millis(qi.updated_at),
                    qi.dev_eui.to_string(),
                    qi.frm_payload,
                    qi.f_cnt,
                    qi.f_port,
                    qi.confirmed,
                    qi.is_pending,
                    qi.emit_at_gps_epoch.map(|d| d.as_millis() as i64),
                    opt_to_millis(qi.timeout_after),
                    opt_to_millis(qi.retry_after),
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })?;
        qi.id = id;

        info!(dev_eui = %qi.dev_eui, f_cnt = qi.f_cnt, "device-queue item created");
        Ok(())
    }

    pub fn update_device_queue_item(&self, qi: &mut DeviceQueueItem) -> Result<()> {
        qi.updated_at = super::db::now_millis();
        let affected = self.db().with_conn(|conn| {
            Ok(conn.execute(
                "update device_queue set
                    updated_at = ?2, is_pending = ?3, f_cnt = ?4,
                    timeout_after = ?5, retry_after = ?6
                 where id = ?1",
                params![
                    qi.id,
                    to_millis(qi.updated_at),
                    qi.is_pending,
                    qi.f_cnt,
                    opt_to_millis(qi.timeout_after),
                    opt_to_millis(qi.retry_after),
                ],
            )?)
        })?;
        if affected == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    /// Head of the queue (lowest id).
    pub fn get_next_device_queue_item(&self, dev_eui: EUI64) -> Result<DeviceQueueItem> {
        self.db().with_conn(|conn| {
            conn.query_row(
                &format!("{SELECT} where dev_eui = ?1 order by id limit 1"),
                params![dev_eui.to_string()],
                map_row,
            )
            .map_err(row_error)
        })
    }

    pub fn get_device_queue_items(&self, dev_eui: EUI64) -> Result<Vec<DeviceQueueItem>> {
        self.db().with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("{SELECT} where dev_eui = ?1 order by id"))?;
            let rows = stmt.query_map(params![dev_eui.to_string()], map_row)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
    }

    pub fn delete_device_queue_item(&self, id: i64) -> Result<()> {
        let affected = self.db().with_conn(|conn| {
            Ok(conn.execute("delete from device_queue where id = ?1", params![id])?)
        })?;
        if affected == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    pub fn flush_device_queue(&self, dev_eui: EUI64) -> Result<()> {
        self.db().with_conn(|conn| {
            conn.execute(
                "delete from device_queue where dev_eui = ?1",
                params![dev_eui.to_string()],
            )?;
            Ok(())
        })?;
        info!(dev_eui = %dev_eui, "device-queue flushed");
        Ok(())
    }

    /// DevEUIs of Class B/C devices with schedulable queue items, oldest
    /// item first. Pending confirmed items are only retried after
    /// `retry_after`.
    pub fn get_schedulable_device_queue_dev_euis(&self, limit: usize) -> Result<Vec<EUI64>> {
        let now = to_millis(Utc::now());
        self.db().with_conn(|conn| {
            let mut stmt = conn.prepare(
                "select distinct dq.dev_eui
                 from device_queue dq
                 join device d on d.dev_eui = dq.dev_eui
                 where d.mode in ('B', 'C')
                   and (dq.is_pending = 0 or dq.retry_after <= ?1)
                 order by dq.id
                 limit ?2",
            )?;
            let rows = stmt.query_map(params![now, limit as i64], |row| {
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

const SELECT: &str = "select id, created_at, updated_at, dev_eui, frm_payload,
    f_cnt, f_port, confirmed, is_pending, emit_at_gps_epoch_ms, timeout_after,
    retry_after from device_queue";

fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DeviceQueueItem> {
    Ok(DeviceQueueItem {
        id: row.get(0)?,
        created_at: from_millis(row.get(1)?),
        updated_at: from_millis(row.get(2)?),
        dev_eui: row.get::<_, String>(3)?.parse().unwrap_or_default(),
        frm_payload: row.get(4)?,
        f_cnt: row.get(5)?,
        f_port: row.get(6)?,
        confirmed: row.get(7)?,
        is_pending: row.get(8)?,
        emit_at_gps_epoch: row
            .get::<_, Option<i64>>(9)?
            .map(|ms| Duration::from_millis(ms as u64)),
        timeout_after: opt_from_millis(row.get(10)?),
        retry_after: opt_from_millis(row.get(11)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    fn storage() -> Storage {
        Storage::open_in_memory(StdDuration::from_secs(60)).unwrap()
    }

    #[test]
    fn test_fifo_order_and_flush() {
        let s = storage();
        let dev_eui = EUI64([1; 8]);

        for f_cnt in [5u32, 6, 7] {
            let mut qi = DeviceQueueItem {
                dev_eui,
                f_cnt,
                f_port: 2,
                frm_payload: vec![1, 2, 3],
                ..Default::default()
            };
            s.create_device_queue_item(&mut qi).unwrap();
        }

        let head = s.get_next_device_queue_item(dev_eui).unwrap();
        assert_eq!(head.f_cnt, 5);

        let items = s.get_device_queue_items(dev_eui).unwrap();
        assert_eq!(items.len(), 3);
        assert!(items.windows(2).all(|w| w[0].id < w[1].id));

        s.flush_device_queue(dev_eui).unwrap();
        assert!(matches!(
            s.get_next_device_queue_item(dev_eui),
            Err(Error::NotFound)
        ));
    }

    #[test]
    fn test_delete_single_item() {
        let s = storage();
        let mut qi = DeviceQueueItem {
            dev_eui: EUI64([1; 8]),
            f_port: 1,
            ..Default::default()
        };
        s.create_device_queue_item(&mut qi).unwrap();
        s.delete_device_queue_item(qi.id).unwrap();
        assert!(matches!(
            s.delete_device_queue_item(qi.id),
            Err(Error::NotFound)
        ));
    }

    #[test]
    fn test_emit_at_roundtrip() {
        let s = storage();
        let mut qi = DeviceQueueItem {
            dev_eui: EUI64([2; 8]),
            f_port: 1,
            emit_at_gps_epoch: Some(StdDuration::from_millis(1_234_567)),
            ..Default::default()
        };
        s.create_device_queue_item(&mut qi).unwrap();
        let got = s.get_next_device_queue_item(qi.dev_eui).unwrap();
        assert_eq!(got.emit_at_gps_epoch, qi.emit_at_gps_epoch);
    }
}
