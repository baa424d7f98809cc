//! One backend connection: query, mutate, and cache state for a single
//! MariaDB/MySQL server.

pub mod capabilities;
pub mod commands;
pub mod connection;
pub mod gate;
pub mod queries;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;
use sqlx::MySqlConnection;
use tokio::sync::Mutex as AsyncMutex;
use tracing::error;

use crate::error::{Error, Result};
use crate::gtid::GtidList;
use crate::slave_status::{arrays_topology_equal, merge_slave_status_arrays, SlaveStatus};
use crate::status_word::{StatusBits, StatusWord};

use capabilities::{Capabilities, ServerType};
use queries::ReplicationSettings;

/// Fields mutated every tick, read under `array_lock` by diagnostics and
/// the topology analyzer.
#[derive(Debug, Default)]
pub struct AgentCache {
    pub server_id: i64,
    pub read_only: bool,
    pub gtid_domain_id: i64,
    pub gtid_current_pos: GtidList,
    pub gtid_binlog_pos: GtidList,
    pub slave_status: Vec<SlaveStatus>,
    pub replication_settings: Option<ReplicationSettings>,
    pub capabilities: Capabilities,
    pub server_type: ServerType,
    pub enabled_events: HashSet<String>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AgentStats {
    pub ticks: u64,
    pub query_failures: u64,
}

pub struct ServerAgent {
    pub name: String,
    pub host: String,
    pub port: u16,
    conn: AsyncMutex<Option<MySqlConnection>>,
    cache: Mutex<AgentCache>,
    pub status: StatusWord,
    /// "emit [the error] at most once per continuous failure run (suppress
    /// until one success resets the latch).
    failure_latch: AtomicBool,
    topology_changed: AtomicBool,
    ticks: AtomicU64,
    query_failures: AtomicU64,
    /// A core read (variables/slave-status/GTIDs) failed with an
    /// access-denied error on the most recent tick.
    auth_error: AtomicBool,
    /// `information_schema.disks` reported a disk at or above the
    /// configured threshold on the most recent tick.
    disk_low: AtomicBool,
}

impl ServerAgent {
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
            conn: AsyncMutex::new(None),
            cache: Mutex::new(AgentCache::default()),
            status: StatusWord::new(),
            failure_latch: AtomicBool::new(false),
            topology_changed: AtomicBool::new(false),
            ticks: AtomicU64::new(0),
            query_failures: AtomicU64::new(0),
            auth_error: AtomicBool::new(false),
            disk_low: AtomicBool::new(false),
        }
    }

    pub fn stats(&self) -> AgentStats {
        AgentStats {
            ticks: self.ticks.load(Ordering::Relaxed),
            query_failures: self.query_failures.load(Ordering::Relaxed),
        }
    }

    pub fn topology_changed(&self) -> bool {
        self.topology_changed.load(Ordering::Relaxed)
    }

    /// A read-locked snapshot of the fields the topology analyzer,
    /// orchestrator gates, and JSON export all need. Taken under
    /// `array_lock` so the caller observes one consistent tick.
    pub fn snapshot(&self) -> AgentSnapshot {
        let cache = self.cache.lock();
        AgentSnapshot {
            server_id: cache.server_id,
            read_only: cache.read_only,
            gtid_current_pos: cache.gtid_current_pos.clone(),
            gtid_binlog_pos: cache.gtid_binlog_pos.clone(),
            slave_status: cache.slave_status.clone(),
            log_bin: cache
                .replication_settings
                .as_ref()
                .map(|r| r.log_bin)
                .unwrap_or(false),
            log_slave_updates: cache
                .replication_settings
                .as_ref()
                .map(|r| r.log_slave_updates)
                .unwrap_or(false),
            enabled_events: cache.enabled_events.clone(),
            status_bits: self.status.load(),
            usable: !self.failure_latch.load(Ordering::Relaxed),
            auth_error: self.auth_error.load(Ordering::Relaxed),
            disk_low: self.disk_low.load(Ordering::Relaxed),
        }
    }

    pub async fn get_connection(
        &self,
        user: &str,
        password: &str,
        ssl: bool,
    ) -> Result<tokio::sync::MutexGuard<'_, Option<MySqlConnection>>> {
        let mut guard = self.conn.lock().await;
        if guard.is_none() {
            *guard = Some(connection::connect(&self.host, self.port, user, password, ssl).await?);
        }
        Ok(guard)
    }

    fn max_statement_time_secs(&self, budget: Duration) -> Option<u64> {
        if self.cache.lock().capabilities.max_statement_time {
            Some(budget.as_secs().max(1))
        } else {
            None
        }
    }

    pub async fn execute_cmd_time_limit(
        &self,
        user: &str,
        password: &str,
        ssl: bool,
        sql: &str,
        budget: &mut Duration,
    ) -> Result<()> {
        let mut guard = self.get_connection(user, password, ssl).await?;
        let conn = guard.as_mut().expect("connection just established");
        let max_stmt = self.max_statement_time_secs(*budget);
        connection::execute_cmd_time_limit(conn, sql, budget, max_stmt).await
    }

    /// `monitor_tick`: probe capabilities if unknown, then refresh
    /// variables, slave status, GTIDs, enabled events, and (if configured)
    /// disk space. `disk_space_threshold_pct` disables the disk check when
    /// `None`.
    pub async fn monitor_tick(
        &self,
        user: &str,
        password: &str,
        ssl: bool,
        disk_space_threshold_pct: Option<u8>,
    ) -> Result<()> {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        match self.monitor_tick_inner(user, password, ssl, disk_space_threshold_pct).await {
            Ok(()) => {
                self.failure_latch.store(false, Ordering::Relaxed);
                self.auth_error.store(false, Ordering::Relaxed);
                Ok(())
            }
            Err(err) => {
                self.query_failures.fetch_add(1, Ordering::Relaxed);
                if !self.failure_latch.swap(true, Ordering::Relaxed) {
                    error!("{}: {}", self.name, err);
                }
                self.auth_error.store(matches!(err, Error::AccessDenied(_)), Ordering::Relaxed);
                Err(err)
            }
        }
    }

    async fn monitor_tick_inner(
        &self,
        user: &str,
        password: &str,
        ssl: bool,
        disk_space_threshold_pct: Option<u8>,
    ) -> Result<()> {
        let mut guard = self.get_connection(user, password, ssl).await?;
        let conn = guard.as_mut().expect("connection just established");

        let known_caps = self.cache.lock().capabilities;
        let (server_type, caps) = if known_caps == Capabilities::default() {
            queries::probe_server_type_and_capabilities(conn).await?
        } else {
            (self.cache.lock().server_type, known_caps)
        };

        let vars = queries::read_server_variables(conn).await?;
        let settings = queries::update_replication_settings(conn).await.ok();
        let new_rows = queries::do_show_slave_status(conn, caps, server_type).await?;

        let gtids = if caps.gtid {
            queries::update_gtids(conn).await.ok()
        } else {
            None
        };

        let events = queries::update_enabled_events(conn).await.unwrap_or_default();

        if let Some(threshold) = disk_space_threshold_pct {
            if let Ok(low) = queries::check_disk_space(conn, threshold).await {
                self.disk_low.store(low, Ordering::Relaxed);
            }
        }

        let mut cache = self.cache.lock();
        let merged = merge_slave_status_arrays(&cache.slave_status, new_rows);
        let topology_changed = !arrays_topology_equal(&cache.slave_status, &merged);
        self.topology_changed.store(topology_changed, Ordering::Relaxed);

        cache.server_id = vars.server_id;
        cache.read_only = vars.read_only;
        cache.gtid_domain_id = vars.gtid_domain_id;
        cache.server_type = server_type;
        cache.capabilities = caps;
        cache.slave_status = merged;
        if let Some(settings) = settings {
            cache.replication_settings = Some(settings);
        }
        if let Some(gtids) = gtids {
            cache.gtid_current_pos = gtids.current_pos;
            cache.gtid_binlog_pos = gtids.binlog_pos;
        }
        cache.enabled_events = events;

        Ok(())
    }

    pub fn to_json(&self) -> serde_json::Value {
        let snap = self.snapshot();
        json!({
            "name": self.name,
            "server_id": snap.server_id,
            "read_only": snap.read_only,
            "gtid_current_pos": none_if_empty(&snap.gtid_current_pos),
            "gtid_binlog_pos": none_if_empty(&snap.gtid_binlog_pos),
            "master_group": snap
                .slave_status
                .iter()
                .find(|s| s.is_live_link())
                .map(|s| format!("{}:{}", s.master_host, s.master_port)),
            "slave_connections": snap.slave_status.iter().map(|s| json!({
                "name": s.name,
                "master_host": s.master_host,
                "master_port": s.master_port,
                "io_running": format!("{:?}", s.io_state),
                "sql_running": s.sql_running,
                "seconds_behind_master": s.seconds_behind_master,
            })).collect::<Vec<_>>(),
        })
    }
}

#[cfg(test)]
impl ServerAgent {
    /// Test-only seam: inject slave status rows without a live connection,
    /// for topology-analyzer and gate fixtures.
    pub fn test_set_slave_status(&self, rows: Vec<SlaveStatus>) {
        self.cache.lock().slave_status = rows;
    }

    pub fn test_set_server_id(&self, server_id: i64) {
        self.cache.lock().server_id = server_id;
    }

    pub fn test_set_auth_error(&self, on: bool) {
        self.auth_error.store(on, Ordering::Relaxed);
    }

    pub fn test_set_disk_low(&self, on: bool) {
        self.disk_low.store(on, Ordering::Relaxed);
    }
}

fn none_if_empty(list: &GtidList) -> Option<String> {
    if list.is_empty() {
        None
    } else {
        Some(list.to_string_sorted())
    }
}

/// Cheap, consistent-under-`array_lock` copy of the fields consumers need
/// without holding the agent's mutex.
#[derive(Debug, Clone)]
pub struct AgentSnapshot {
    pub server_id: i64,
    pub read_only: bool,
    pub gtid_current_pos: GtidList,
    pub gtid_binlog_pos: GtidList,
    pub slave_status: Vec<SlaveStatus>,
    pub log_bin: bool,
    pub log_slave_updates: bool,
    pub enabled_events: HashSet<String>,
    pub status_bits: StatusBits,
    /// Last tick succeeded (the failure latch is clear).
    pub usable: bool,
    /// A core read failed with access-denied on the last tick.
    pub auth_error: bool,
    /// A disk reported by `information_schema.disks` is over threshold.
    pub disk_low: bool,
}

impl AgentSnapshot {
    pub fn is_master(&self) -> bool {
        self.status_bits.contains(StatusBits::MASTER)
    }

    pub fn is_low_on_disk(&self) -> bool {
        self.status_bits.contains(StatusBits::DISK_SPACE_EXHAUSTED)
    }

    /// The slave channel targeting `(host, port)`, if any.
    pub fn channel_to(&self, host: &str, port: u16) -> Option<&SlaveStatus> {
        self.slave_status
            .iter()
            .find(|s| s.master_host == host && s.master_port == port)
    }
}
