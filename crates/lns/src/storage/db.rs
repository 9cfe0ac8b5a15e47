// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! SQLite catalog store.
//!
//! One connection behind a mutex (SQLite connections are not Sync); the
//! schema is created at startup. Timestamps are unix milliseconds, UUIDs
//! and EUIs are hex TEXT, list-shaped columns are JSON TEXT.

use crate::{Error, Result};
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, Transaction};

pub struct Db {
    conn: Mutex<Connection>,
}

impl Db {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        let db = Db {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        Ok(db)
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Db {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        Ok(db)
    }

    /// Run `f` with the connection.
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Run `f` inside a transaction; commit on Ok, roll back on Err.
    pub fn with_tx<T>(&self, f: impl FnOnce(&Transaction) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    fn init_schema(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute_batch(
                "
                CREATE TABLE IF NOT EXISTS device_profile (
                    id TEXT PRIMARY KEY,
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL,
                    supports_class_b INTEGER NOT NULL,
                    class_b_timeout_secs INTEGER NOT NULL,
                    ping_slot_period INTEGER NOT NULL,
                    ping_slot_dr INTEGER NOT NULL,
                    ping_slot_freq INTEGER NOT NULL,
                    supports_class_c INTEGER NOT NULL,
                    class_c_timeout_secs INTEGER NOT NULL,
                    mac_version TEXT NOT NULL,
                    reg_params_revision TEXT NOT NULL,
                    rx_delay_1 INTEGER NOT NULL,
                    rx_dr_offset_1 INTEGER NOT NULL,
                    rx_data_rate_2 INTEGER NOT NULL,
                    rx_freq_2 INTEGER NOT NULL,
                    factory_preset_freqs TEXT NOT NULL,
                    max_eirp INTEGER NOT NULL,
                    max_duty_cycle INTEGER NOT NULL,
                    supports_join INTEGER NOT NULL,
                    rf_region TEXT NOT NULL,
                    supports_32bit_fcnt INTEGER NOT NULL,
                    adr_algorithm_id TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS service_profile (
                    id TEXT PRIMARY KEY,
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL,
                    ul_rate INTEGER NOT NULL,
                    dl_rate INTEGER NOT NULL,
                    dr_min INTEGER NOT NULL,
                    dr_max INTEGER NOT NULL,
                    channel_mask TEXT NOT NULL,
                    adr INTEGER NOT NULL,
                    dev_status_req_freq INTEGER NOT NULL,
                    report_dev_status_battery INTEGER NOT NULL,
                    report_dev_status_margin INTEGER NOT NULL,
                    add_gw_metadata INTEGER NOT NULL
                );

                CREATE TABLE IF NOT EXISTS routing_profile (
                    id TEXT PRIMARY KEY,
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL,
                    as_id TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS device (
                    dev_eui TEXT PRIMARY KEY,
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL,
                    device_profile_id TEXT NOT NULL REFERENCES device_profile(id),
                    service_profile_id TEXT NOT NULL REFERENCES service_profile(id),
                    routing_profile_id TEXT NOT NULL REFERENCES routing_profile(id),
                    skip_fcnt_check INTEGER NOT NULL,
                    is_disabled INTEGER NOT NULL,
                    mode TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS gateway_profile (
                    id TEXT PRIMARY KEY,
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL,
                    channels TEXT NOT NULL,
                    stats_interval_secs INTEGER NOT NULL,
                    extra_channels TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS gateway (
                    gateway_id TEXT PRIMARY KEY,
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL,
                    first_seen_at INTEGER,
                    last_seen_at INTEGER,
                    routing_profile_id TEXT NOT NULL REFERENCES routing_profile(id),
                    gateway_profile_id TEXT REFERENCES gateway_profile(id)
                );

                CREATE TABLE IF NOT EXISTS multicast_group (
                    id TEXT PRIMARY KEY,
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL,
                    mc_addr TEXT NOT NULL,
                    mc_nwk_s_key TEXT NOT NULL,
                    f_cnt INTEGER NOT NULL,
                    group_type TEXT NOT NULL,
                    dr INTEGER NOT NULL,
                    frequency INTEGER NOT NULL,
                    ping_slot_period INTEGER NOT NULL,
                    service_profile_id TEXT NOT NULL REFERENCES service_profile(id),
                    routing_profile_id TEXT NOT NULL REFERENCES routing_profile(id)
                );

                CREATE TABLE IF NOT EXISTS device_multicast_group (
                    dev_eui TEXT NOT NULL REFERENCES device(dev_eui) ON DELETE CASCADE,
                    multicast_group_id TEXT NOT NULL
                        REFERENCES multicast_group(id) ON DELETE CASCADE,
                    created_at INTEGER NOT NULL,
                    PRIMARY KEY (dev_eui, multicast_group_id)
                );

                CREATE TABLE IF NOT EXISTS device_queue (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL,
                    dev_eui TEXT NOT NULL,
                    frm_payload BLOB NOT NULL,
                    f_cnt INTEGER NOT NULL,
                    f_port INTEGER NOT NULL,
                    confirmed INTEGER NOT NULL,
                    is_pending INTEGER NOT NULL,
                    emit_at_gps_epoch_ms INTEGER,
                    timeout_after INTEGER,
                    retry_after INTEGER
                );
                CREATE INDEX IF NOT EXISTS idx_device_queue_dev_eui
                    ON device_queue(dev_eui);

                CREATE TABLE IF NOT EXISTS multicast_queue (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    created_at INTEGER NOT NULL,
                    schedule_at INTEGER NOT NULL,
                    emit_at_gps_epoch_ms INTEGER,
                    multicast_group_id TEXT NOT NULL
                        REFERENCES multicast_group(id) ON DELETE CASCADE,
                    gateway_id TEXT NOT NULL,
                    f_cnt INTEGER NOT NULL,
                    f_port INTEGER NOT NULL,
                    frm_payload BLOB NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_multicast_queue_schedule_at
                    ON multicast_queue(schedule_at);
                ",
            )?;
            Ok(())
        })
    }
}

/// NotFound mapping for single-row lookups.
pub(crate) fn row_error(e: rusqlite::Error) -> Error {
    match e {
        rusqlite::Error::QueryReturnedNoRows => Error::NotFound,
        other => Error::Db(other),
    }
}

/// Current time at the storage resolution, so a row read back compares
/// equal to the struct that created it.
pub(crate) fn now_millis() -> DateTime<Utc> {
    from_millis(to_millis(Utc::now()))
}

pub(crate) fn to_millis(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

pub(crate) fn opt_to_millis(t: Option<DateTime<Utc>>) -> Option<i64> {
    t.map(to_millis)
}

pub(crate) fn opt_from_millis(ms: Option<i64>) -> Option<DateTime<Utc>> {
    ms.map(from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_initializes_twice() {
        let db = Db::open_in_memory().unwrap();
        // idempotent re-init
        db.init_schema().unwrap();
    }

    #[test]
    fn test_tx_rolls_back_on_error() {
        let db = Db::open_in_memory().unwrap();
        let res: Result<()> = db.with_tx(|tx| {
            tx.execute(
                "insert into routing_profile (id, created_at, updated_at, as_id)
                 values ('a', 0, 0, 'as')",
                [],
            )?;
            Err(Error::NotFound)
        });
        assert!(res.is_err());

        let count: i64 = db
            .with_conn(|conn| {
                Ok(conn.query_row("select count(*) from routing_profile", [], |r| r.get(0))?)
            })
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_millis_roundtrip() {
        let now = Utc::now();
        let back = from_millis(to_millis(now));
        assert_eq!(back.timestamp_millis(), now.timestamp_millis());
    }
}
