// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Routing profiles: which application server a device or gateway
//! reports to.

use super::db::{from_millis, row_error, to_millis};
use super::Storage;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoutingProfile {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Application-server identifier (host:port for the RPC client).
    pub as_id: String,
}

impl Storage {
    pub fn create_routing_profile(&self, rp: &mut RoutingProfile) -> Result<()> {
        if rp.id.is_nil() {
            rp.id = Uuid::new_v4();
        }
        let now = super::db::now_millis();
        rp.created_at = now;
        rp.updated_at = now;

        self.db().with_conn(|conn| {
            conn.execute(
                "insert into routing_profile (id, created_at, updated_at, as_id)
                 values (?1, ?2, ?3, ?4)",
                params![
                    rp.id.to_string(),
                    to_millis(rp.created_at),
                    to_millis(rp.updated_at),
                    rp.as_id,
                ],
            )?;
            Ok(())
        })?;

        info!(id = %rp.id, "routing-profile created");
        Ok(())
    }

    pub fn get_routing_profile(&self, id: Uuid) -> Result<RoutingProfile> {
        self.db().with_conn(|conn| {
            conn.query_row(
                "select id, created_at, updated_at, as_id
                 from routing_profile where id = ?1",
                params![id.to_string()],
                |row| {
                    Ok(RoutingProfile {
                        id: row.get::<_, String>(0)?.parse().unwrap_or_default(),
                        created_at: from_millis(row.get(1)?),
                        updated_at: from_millis(row.get(2)?),
                        as_id: row.get(3)?,
                    })
                },
            )
            .map_err(row_error)
        })
    }

    pub fn delete_routing_profile(&self, id: Uuid) -> Result<()> {
        let affected = self.db().with_conn(|conn| {
            Ok(conn.execute(
                "delete from routing_profile where id = ?1",
                params![id.to_string()],
            )?)
        })?;
        if affected == 0 {
            return Err(Error::NotFound);
        }
        info!(id = %id, "routing-profile deleted");
        Ok(())
    }
}
