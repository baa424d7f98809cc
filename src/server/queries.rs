//! Read-only observation queries: GTID/variable reads, slave-status
//! decoding, enabled-events listing.
//!
//! Row decoding follows `mariadb_exporter::collectors::replication::
//! replica_status`'s pattern of `row.try_get` with graceful fallback
//! across MariaDB's unsigned/signed/NULL representations for the same
//! logical column.

use std::collections::HashSet;
use std::time::Instant;

use sqlx::mysql::MySqlRow;
use sqlx::{MySqlConnection, Row};

use crate::error::{Error, Result};
use crate::gtid::GtidList;
use crate::slave_status::{IoState, SlaveStatus, UNDEFINED_SECONDS_BEHIND, UNKNOWN_SERVER_ID};

use super::capabilities::{decode_version, Capabilities, ServerType};
use super::connection::classify;

pub async fn probe_server_type_and_capabilities(
    conn: &mut MySqlConnection,
) -> Result<(ServerType, Capabilities)> {
    let is_router: Option<String> = sqlx::query_scalar("SELECT @@maxscale_version")
        .fetch_optional(&mut *conn)
        .await
        .unwrap_or(None);

    if is_router.is_some() {
        // A binlog router reports a version string but doesn't speak the
        // same capability surface as a real MariaDB server.
        return Ok((
            ServerType::BinlogRouter,
            Capabilities {
                basic_support: true,
                gtid: true,
                max_statement_time: false,
            },
        ));
    }

    let version: String = sqlx::query_scalar("SELECT VERSION()")
        .fetch_one(&mut *conn)
        .await
        .map_err(classify)?;

    Ok((ServerType::Normal, decode_version(&version)))
}

pub struct ServerVariables {
    pub server_id: i64,
    pub read_only: bool,
    pub gtid_domain_id: i64,
}

pub async fn read_server_variables(conn: &mut MySqlConnection) -> Result<ServerVariables> {
    let row = sqlx::query("SELECT @@global.server_id, @@read_only, @@global.gtid_domain_id")
        .fetch_one(&mut *conn)
        .await
        .map_err(classify)?;

    Ok(ServerVariables {
        server_id: row.try_get::<i64, _>(0).unwrap_or(UNKNOWN_SERVER_ID),
        read_only: row.try_get::<i8, _>(1).unwrap_or(0) != 0,
        gtid_domain_id: row.try_get::<i64, _>(2).unwrap_or(0),
    })
}

#[derive(Debug, Clone, Copy)]
pub struct ReplicationSettings {
    pub gtid_strict_mode: bool,
    pub log_bin: bool,
    pub log_slave_updates: bool,
}

pub async fn update_replication_settings(
    conn: &mut MySqlConnection,
) -> Result<ReplicationSettings> {
    let row = sqlx::query("SELECT @@gtid_strict_mode, @@log_bin, @@log_slave_updates")
        .fetch_one(&mut *conn)
        .await?;

    Ok(ReplicationSettings {
        gtid_strict_mode: row.try_get::<i8, _>(0).unwrap_or(0) != 0,
        log_bin: row.try_get::<i8, _>(1).unwrap_or(0) != 0,
        log_slave_updates: row.try_get::<i8, _>(2).unwrap_or(0) != 0,
    })
}

pub struct Gtids {
    pub current_pos: GtidList,
    pub binlog_pos: GtidList,
}

pub async fn update_gtids(conn: &mut MySqlConnection) -> Result<Gtids> {
    let row = sqlx::query("SELECT @@gtid_current_pos, @@gtid_binlog_pos")
        .fetch_one(&mut *conn)
        .await?;

    let current: Option<String> = row.try_get(0).unwrap_or(None);
    let binlog: Option<String> = row.try_get(1).unwrap_or(None);

    Ok(Gtids {
        current_pos: GtidList::parse(current.as_deref().unwrap_or("")),
        binlog_pos: GtidList::parse(binlog.as_deref().unwrap_or("")),
    })
}

const ALL_SLAVES_STATUS_COLUMNS: usize = 42;
const SLAVE_STATUS_COLUMNS: usize = 40;

/// `do_show_slave_status`: issues `SHOW ALL SLAVES STATUS` when the backend
/// supports GTID or is a binlog router, else `SHOW SLAVE STATUS`. Rejects
/// results with fewer than the expected column count.
pub async fn do_show_slave_status(
    conn: &mut MySqlConnection,
    caps: Capabilities,
    server_type: ServerType,
) -> Result<Vec<SlaveStatus>> {
    let use_all = caps.gtid || server_type == ServerType::BinlogRouter;
    let (sql, expected) = if use_all {
        ("SHOW ALL SLAVES STATUS", ALL_SLAVES_STATUS_COLUMNS)
    } else {
        ("SHOW SLAVE STATUS", SLAVE_STATUS_COLUMNS)
    };

    let rows = sqlx::query(sql).fetch_all(&mut *conn).await.map_err(classify)?;

    rows.iter()
        .map(|row| parse_slave_status_row(row, expected))
        .collect()
}

fn parse_slave_status_row(row: &MySqlRow, expected: usize) -> Result<SlaveStatus> {
    let got = row.columns().len();
    if got < expected {
        return Err(Error::UnexpectedColumnCount { got, expected });
    }

    let name: Option<String> = row.try_get("Connection_name").ok();
    let master_host: String = row.try_get("Master_Host").unwrap_or_default();
    let master_port: i64 = row
        .try_get::<i64, _>("Master_Port")
        .or_else(|_| row.try_get::<u32, _>("Master_Port").map(i64::from))
        .unwrap_or_default();
    let master_server_id = parse_master_server_id(row).unwrap_or(UNKNOWN_SERVER_ID);

    let io_running: Option<String> = row.try_get("Slave_IO_Running").ok();
    let io_state = match io_running.as_deref() {
        Some("Yes") => IoState::Yes,
        Some("Connecting") => IoState::Connecting,
        _ => IoState::No,
    };
    let sql_running: Option<String> = row.try_get("Slave_SQL_Running").ok();
    let sql_running = sql_running.as_deref() == Some("Yes");

    let seconds_behind_master: Option<i64> = row
        .try_get::<Option<u64>, _>("Seconds_Behind_Master")
        .ok()
        .flatten()
        .and_then(|v| i64::try_from(v).ok())
        .or_else(|| {
            row.try_get::<Option<i64>, _>("Seconds_Behind_Master")
                .ok()
                .flatten()
        });
    let seconds_behind_master = seconds_behind_master
        .and_then(|v| i32::try_from(v).ok())
        .unwrap_or(UNDEFINED_SECONDS_BEHIND);

    let gtid_io_pos: Option<String> = row.try_get("Gtid_IO_Pos").ok();
    let last_error: String = row.try_get("Last_IO_Error").ok().unwrap_or_default();
    let received_heartbeats: u64 = row
        .try_get::<Option<u64>, _>("Slave_received_heartbeats")
        .ok()
        .flatten()
        .or_else(|| {
            row.try_get::<Option<i64>, _>("Slave_received_heartbeats")
                .ok()
                .flatten()
                .and_then(|v| u64::try_from(v).ok())
        })
        .unwrap_or(0);

    Ok(SlaveStatus {
        name: name.unwrap_or_default(),
        master_host,
        master_port: master_port as u16,
        master_server_id,
        io_state,
        sql_running,
        seconds_behind_master,
        gtid_io_pos: GtidList::parse(gtid_io_pos.as_deref().unwrap_or("")),
        received_heartbeats,
        last_data_time: Instant::now(),
        seen_connected: false,
        last_error,
    })
}

fn parse_master_server_id(row: &MySqlRow) -> Option<i64> {
    let unsigned: Option<u64> = row.try_get::<Option<u64>, _>("Master_Server_Id").ok().flatten();
    let signed: Option<i64> = row.try_get::<Option<i64>, _>("Master_Server_Id").ok().flatten();
    unsigned.and_then(|v| i64::try_from(v).ok()).or(signed)
}

/// True iff any disk reported by the `information_schema.disks` plugin
/// table is at or above `threshold_pct` used capacity.
pub async fn check_disk_space(conn: &mut MySqlConnection, threshold_pct: u8) -> Result<bool> {
    let rows = sqlx::query("SELECT Total, Available FROM information_schema.disks")
        .fetch_all(&mut *conn)
        .await?;

    for row in &rows {
        let total: Option<i64> = row.try_get(0).ok();
        let available: Option<i64> = row.try_get(1).ok();
        if let (Some(total), Some(available)) = (total, available) {
            if total > 0 {
                let used_pct = (total - available) as f64 / total as f64 * 100.0;
                if used_pct >= threshold_pct as f64 {
                    return Ok(true);
                }
            }
        }
    }
    Ok(false)
}

/// `information_schema.EVENTS`, schema-qualified.
pub async fn update_enabled_events(conn: &mut MySqlConnection) -> Result<HashSet<String>> {
    let rows = sqlx::query(
        "SELECT EVENT_SCHEMA, EVENT_NAME FROM information_schema.EVENTS WHERE STATUS = 'ENABLED'",
    )
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows
        .iter()
        .filter_map(|row| {
            let schema: String = row.try_get("EVENT_SCHEMA").ok()?;
            let name: String = row.try_get("EVENT_NAME").ok()?;
            Some(format!("{schema}.{name}"))
        })
        .collect())
}
