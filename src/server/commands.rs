//! Mutating operations: promote/demote, slave-channel redirection, event
//! toggling, super-user eviction, and catch-up polling.
//!
//! `CHANGE MASTER` generation follows §4.4.1 exactly; the password is built
//! into the executed statement but never into anything passed to `tracing`.

use std::collections::HashSet;
use std::fs;
use std::time::Duration;

use secrecy::ExposeSecret;
use sqlx::Row;
use tokio::time::sleep;
use tracing::warn;

use crate::error::{Error, Result};
use crate::gtid::{GtidList, MissingDomainPolicy};
use crate::op_context::{OperationContext, ServerOperation};
use crate::slave_status::SlaveStatus;
use crate::status_word::StatusBits;

use super::gate::OpKind;
use super::{queries, ServerAgent};

fn quote_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

fn quote_ident(s: &str) -> String {
    format!("`{}`", s.replace('`', "``"))
}

fn conn_clause(name: &str) -> String {
    if name.is_empty() {
        String::new()
    } else {
        format!(" {}", quote_literal(name))
    }
}

/// Builds a `CHANGE MASTER` statement for one replication channel.
fn change_master_sql(name: &str, host: &str, port: u16, user: &str, password: &str, ssl: bool) -> String {
    let mut sql = format!(
        "CHANGE MASTER{} TO MASTER_HOST={}, MASTER_PORT={}, MASTER_USE_GTID=current_pos, ",
        conn_clause(name),
        quote_literal(host),
        port
    );
    if ssl {
        sql.push_str("MASTER_SSL=1, ");
    }
    sql.push_str(&format!(
        "MASTER_USER={}, MASTER_PASSWORD={};",
        quote_literal(user),
        quote_literal(password)
    ));
    sql
}

/// Re-quote an `information_schema.EVENTS` `user@host` definer as
/// `` `user`@'host' `` so the event keeps its privileges across the monitor
/// user alteration.
fn quote_definer(definer: &str) -> String {
    match definer.rsplit_once('@') {
        Some((user, host)) => format!("{}@{}", quote_ident(user), quote_literal(host)),
        None => quote_literal(definer),
    }
}

fn is_access_denied(err: &Error) -> bool {
    matches!(err, Error::AccessDenied(_))
}

impl ServerAgent {
    /// Run each statement in sequence against this agent's own connection,
    /// under the shared budget. Aborts on the first failure.
    async fn run_steps(&self, steps: &[&str], budget: &mut Duration) -> Result<()> {
        let mut guard = self.conn.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| Error::NotUsable(self.name.clone(), "no connection established".into()))?;
        let max_stmt = self.max_statement_time_secs(*budget);
        for sql in steps {
            super::connection::execute_cmd_time_limit(conn, sql, budget, max_stmt).await?;
        }
        Ok(())
    }

    async fn run_sql_file(&self, path: &std::path::Path, budget: &mut Duration) -> Result<()> {
        let contents = fs::read_to_string(path).map_err(Error::Io)?;
        for stmt in contents.split(';') {
            let stmt = stmt.trim();
            if stmt.is_empty() {
                continue;
            }
            let sql = format!("{stmt};");
            self.run_steps(&[&sql], budget).await?;
        }
        Ok(())
    }

    pub async fn redirect_existing_slave_conn(
        &self,
        op_ctx: &mut OperationContext,
        old_conn: &SlaveStatus,
        new_master: &ServerAgent,
    ) -> Result<()> {
        self.start_slave_conn(op_ctx, old_conn, &new_master.host, new_master.port)
            .await
            .map_err(|err| {
                op_ctx
                    .error_sink
                    .push_for(&self.name, format!("redirect channel {:?}: {err}", old_conn.name));
                err
            })
    }

    async fn start_slave_conn(
        &self,
        op_ctx: &mut OperationContext,
        template: &SlaveStatus,
        host: &str,
        port: u16,
    ) -> Result<()> {
        let password = op_ctx.replication_password.expose_secret();
        let stop = format!("STOP SLAVE{};", conn_clause(&template.name));
        let change = change_master_sql(
            &template.name,
            host,
            port,
            &op_ctx.replication_user,
            password,
            op_ctx.replication_ssl,
        );
        let start = format!("START SLAVE{};", conn_clause(&template.name));
        self.run_steps(&[&stop, &change, &start], &mut op_ctx.deadline_remaining)
            .await
    }

    /// Stop and reset a single named channel (used by failover, which must
    /// touch only the channel pointing at the unreachable master).
    pub async fn reset_slave_conn(&self, name: &str, budget: &mut Duration) -> Result<()> {
        let stop = format!("STOP SLAVE{};", conn_clause(name));
        let reset = format!("RESET SLAVE{} ALL;", conn_clause(name));
        self.run_steps(&[&stop, &reset], budget).await
    }

    pub async fn reset_all_slave_conns(&self, budget: &mut Duration) -> Result<()> {
        let channels: Vec<String> = self
            .cache
            .lock()
            .slave_status
            .iter()
            .map(|s| s.name.clone())
            .collect();

        for name in &channels {
            let stop = format!("STOP SLAVE{};", conn_clause(name));
            let reset = format!("RESET SLAVE{} ALL;", conn_clause(name));
            self.run_steps(&[&stop, &reset], budget).await?;
        }
        Ok(())
    }

    async fn fetch_event_definer(&self, schema: &str, name: &str) -> Result<String> {
        let mut guard = self.conn.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| Error::NotUsable(self.name.clone(), "no connection established".into()))?;
        let definer: String = sqlx::query_scalar(
            "SELECT DEFINER FROM information_schema.EVENTS WHERE EVENT_SCHEMA = ? AND EVENT_NAME = ?",
        )
        .bind(schema)
        .bind(name)
        .fetch_one(&mut *conn)
        .await?;
        Ok(definer)
    }

    async fn set_events(&self, events: &HashSet<String>, enable: bool, budget: &mut Duration) -> Result<()> {
        for qualified in events {
            let Some((schema, name)) = qualified.split_once('.') else {
                continue;
            };
            let definer = self.fetch_event_definer(schema, name).await?;
            let action = if enable { "ENABLE" } else { "DISABLE ON SLAVE" };
            let sql = format!(
                "ALTER DEFINER = {} EVENT {}.{} {};",
                quote_definer(&definer),
                quote_ident(schema),
                quote_ident(name),
                action
            );
            self.run_steps(&[&sql], budget).await?;
        }
        Ok(())
    }

    pub async fn enable_events(&self, events: &HashSet<String>, budget: &mut Duration) -> Result<()> {
        self.set_events(events, true, budget).await
    }

    /// Disables under `sql_log_bin=0` so disablement does not itself
    /// generate a binlog event during rejoin. The session
    /// variable restore runs best-effort and ignores its own failure.
    pub async fn disable_events(&self, events: &HashSet<String>, budget: &mut Duration) -> Result<()> {
        {
            let mut guard = self.conn.lock().await;
            if let Some(conn) = guard.as_mut() {
                let _ = sqlx::query("SET @@session.sql_log_bin=0").execute(&mut *conn).await;
            }
        }

        let result = self.set_events(events, false, budget).await;

        {
            let mut guard = self.conn.lock().await;
            if let Some(conn) = guard.as_mut() {
                let _ = sqlx::query("SET @@session.sql_log_bin=1").execute(&mut *conn).await;
            }
        }

        result
    }

    async fn connection_id(&self) -> Result<i64> {
        let mut guard = self.conn.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| Error::NotUsable(self.name.clone(), "no connection established".into()))?;
        let id: i64 = sqlx::query_scalar("SELECT CONNECTION_ID()").fetch_one(&mut *conn).await?;
        Ok(id)
    }

    async fn fetch_super_user_connections(&self) -> Result<Vec<(i64, String, String)>> {
        let mut guard = self.conn.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| Error::NotUsable(self.name.clone(), "no connection established".into()))?;
        let rows = sqlx::query(
            "SELECT pl.ID, pl.USER, pl.HOST FROM information_schema.PROCESSLIST pl \
             JOIN mysql.user u ON u.User = pl.USER \
             WHERE u.Super_priv = 'Y' AND pl.COMMAND <> 'Binlog Dump'",
        )
        .fetch_all(&mut *conn)
        .await?;

        Ok(rows
            .iter()
            .filter_map(|row| {
                let id: i64 = row
                    .try_get::<i64, _>(0)
                    .or_else(|_| row.try_get::<u64, _>(0).map(|v| v as i64))
                    .ok()?;
                let user: String = row.try_get(1).ok()?;
                let host: String = row.try_get(2).ok()?;
                Some((id, user, host))
            })
            .collect())
    }

    /// Access-denied (insufficient monitor privilege) is downgraded to a
    /// warning; any other failure is an error.
    pub async fn kick_out_super_users(&self, op_ctx: &mut OperationContext) -> Result<()> {
        let own_id = self.connection_id().await?;

        let rows = match self.fetch_super_user_connections().await {
            Ok(rows) => rows,
            Err(err) if is_access_denied(&err) => {
                warn!("{}: kick_out_super_users: insufficient privilege: {}", self.name, err);
                return Ok(());
            }
            Err(err) => return Err(err),
        };

        for (id, user, host) in rows {
            if id == own_id {
                continue;
            }
            let sql = format!("KILL SOFT CONNECTION {id};");
            if let Err(err) = self.run_steps(&[&sql], &mut op_ctx.deadline_remaining).await {
                op_ctx
                    .error_sink
                    .push_for(&self.name, format!("kill connection {id} ({user}@{host}): {err}"));
            }
        }
        Ok(())
    }

    async fn poll_catchup_position(&self) -> Result<GtidList> {
        let prefer_binlog = {
            let cache = self.cache.lock();
            cache
                .replication_settings
                .as_ref()
                .map(|r| r.log_bin && r.log_slave_updates)
                .unwrap_or(false)
        };

        let gtids = {
            let mut guard = self.conn.lock().await;
            let conn = guard
                .as_mut()
                .ok_or_else(|| Error::NotUsable(self.name.clone(), "no connection established".into()))?;
            queries::update_gtids(conn).await?
        };

        {
            let mut cache = self.cache.lock();
            cache.gtid_current_pos = gtids.current_pos.clone();
            cache.gtid_binlog_pos = gtids.binlog_pos.clone();
        }

        Ok(if prefer_binlog { gtids.binlog_pos } else { gtids.current_pos })
    }

    /// Poll until caught up to `target`, sleeping 200ms + 100ms per
    /// unsuccessful iteration, clamped to the remaining budget. Always
    /// polls at least once.
    pub async fn catchup_to_master(&self, op_ctx: &mut OperationContext, target: &GtidList) -> Result<()> {
        let mut sleep_ms: u64 = 200;
        loop {
            let current = self.poll_catchup_position().await?;
            if target.events_ahead(&current, MissingDomainPolicy::Ignore) == 0 {
                return Ok(());
            }
            if op_ctx.deadline_remaining.is_zero() {
                return Err(Error::DeadlineExceeded);
            }

            let wait = Duration::from_millis(sleep_ms).min(op_ctx.deadline_remaining);
            sleep(wait).await;
            op_ctx.deadline_remaining = op_ctx.deadline_remaining.saturating_sub(wait);
            sleep_ms += 100;
        }
    }

    fn has_channel_name(&self, name: &str) -> bool {
        self.cache.lock().slave_status.iter().any(|s| s.name == name)
    }

    /// `copy_slave_conns` (switchover) / `merge_slave_conns` (failover):
    /// adopts the demoted master's slave channels onto the newly promoted one.
    async fn copy_slave_conns(
        &self,
        op_ctx: &mut OperationContext,
        conns: &[SlaveStatus],
        demotion_target: &ServerAgent,
        kind: OpKind,
    ) -> Result<()> {
        let self_id = self.cache.lock().server_id;
        let existing: Vec<(String, u16, i64)> = self
            .cache
            .lock()
            .slave_status
            .iter()
            .map(|s| (s.master_host.clone(), s.master_port, s.master_server_id))
            .collect();

        for conn in conns {
            if kind == OpKind::Failover {
                let duplicate = existing
                    .iter()
                    .any(|(h, p, id)| (*h == conn.master_host && *p == conn.master_port) || *id == conn.master_server_id);
                let targets_self =
                    conn.master_server_id == self_id || (conn.master_host == self.host && conn.master_port == self.port);
                if duplicate || targets_self {
                    continue;
                }
            }

            let (host, port) = if conn.master_server_id == self_id {
                (demotion_target.host.clone(), demotion_target.port)
            } else {
                (conn.master_host.clone(), conn.master_port)
            };

            let mut retargeted = conn.clone();
            if kind == OpKind::Failover && self.has_channel_name(&conn.name) {
                retargeted.name = format!("To [{host}]:{port}");
            }

            self.start_slave_conn(op_ctx, &retargeted, &host, port).await?;
        }
        Ok(())
    }

    /// Stop & reset all channels, then (if crossing the master boundary)
    /// flip read-only, enable events, run the promotion SQL file, and
    /// finally adopt the demoted master's channels.
    pub async fn promote(
        &self,
        op_ctx: &mut OperationContext,
        plan: &ServerOperation,
        kind: OpKind,
        demotion_target: &ServerAgent,
    ) -> Result<()> {
        self.reset_all_slave_conns(&mut op_ctx.deadline_remaining).await?;

        if plan.to_from_master {
            self.run_steps(&["SET GLOBAL read_only=0;"], &mut op_ctx.deadline_remaining)
                .await?;
            if plan.handle_events {
                self.enable_events(&plan.events_to_enable, &mut op_ctx.deadline_remaining)
                    .await?;
            }
            if let Some(path) = &plan.sql_file {
                self.run_sql_file(path, &mut op_ctx.deadline_remaining).await?;
            }
        }

        self.copy_slave_conns(op_ctx, &plan.conns_to_copy, demotion_target, kind)
            .await?;
        self.status.set_role_bits(StatusBits::MASTER | StatusBits::RUNNING);
        Ok(())
    }

    /// Reset channels, then (if crossing the master boundary) clear the
    /// MASTER bit, evict super-users, set read-only,
    /// disable events, run the demotion SQL file, flush logs, and re-read
    /// GTID positions so the post-flush `gtid_binlog_pos` becomes the
    /// catchup target. `read_only=1` is ordered first among the risky
    /// steps so a later failure can attempt a best-effort restore.
    pub async fn demote(&self, op_ctx: &mut OperationContext, plan: &ServerOperation) -> Result<()> {
        self.reset_all_slave_conns(&mut op_ctx.deadline_remaining).await?;

        if !plan.to_from_master {
            return Ok(());
        }

        self.status.clear(StatusBits::MASTER);
        self.kick_out_super_users(op_ctx).await?;

        self.run_steps(&["SET GLOBAL read_only=1;"], &mut op_ctx.deadline_remaining)
            .await?;

        if let Err(err) = self.demote_after_read_only(op_ctx, plan).await {
            warn!(
                "{}: demote step failed after read_only=1, attempting best-effort restore: {}",
                self.name, err
            );
            let mut restore_budget = Duration::ZERO;
            let _ = self.run_steps(&["SET GLOBAL read_only=0;"], &mut restore_budget).await;
            return Err(err);
        }
        Ok(())
    }

    async fn demote_after_read_only(&self, op_ctx: &mut OperationContext, plan: &ServerOperation) -> Result<()> {
        let events = self.cache.lock().enabled_events.clone();
        self.disable_events(&events, &mut op_ctx.deadline_remaining).await?;

        if let Some(path) = &plan.sql_file {
            self.run_sql_file(path, &mut op_ctx.deadline_remaining).await?;
        }

        self.run_steps(&["FLUSH LOGS;"], &mut op_ctx.deadline_remaining).await?;

        let gtids = {
            let mut guard = self.conn.lock().await;
            let conn = guard
                .as_mut()
                .ok_or_else(|| Error::NotUsable(self.name.clone(), "no connection established".into()))?;
            queries::update_gtids(conn).await?
        };

        let mut cache = self.cache.lock();
        cache.gtid_current_pos = gtids.current_pos;
        cache.gtid_binlog_pos = gtids.binlog_pos;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_master_sql_quotes_name_host_and_credentials() {
        let sql = change_master_sql("to_p", "10.0.0.2", 3306, "repl", "s3cret", true);
        assert!(sql.contains("CHANGE MASTER 'to_p' TO"));
        assert!(sql.contains("MASTER_HOST='10.0.0.2'"));
        assert!(sql.contains("MASTER_SSL=1"));
        assert!(sql.contains("MASTER_PASSWORD='s3cret'"));
    }

    #[test]
    fn change_master_sql_omits_name_clause_for_default_connection() {
        let sql = change_master_sql("", "10.0.0.2", 3306, "repl", "pw", false);
        assert!(sql.starts_with("CHANGE MASTER TO"));
        assert!(!sql.contains("MASTER_SSL"));
    }

    #[test]
    fn quote_definer_reuses_single_quoted_host() {
        assert_eq!(quote_definer("root@localhost"), "`root`@'localhost'");
    }

    #[test]
    fn quote_literal_escapes_embedded_quotes() {
        assert_eq!(quote_literal("o'brien"), "'o''brien'");
    }
}
