//! One MariaDB connection per agent, and the retryable, time-limited
//! command primitive (`execute_cmd_time_limit`).
//!
//! Grounded on `mariadb_exporter::collectors::util`'s
//! `MySqlConnectOptions`-based connect, adapted to a single long-lived
//! connection instead of a pool.

use std::time::{Duration, Instant};

use sqlx::mysql::MySqlConnectOptions;
use sqlx::{Connection, MySqlConnection};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::{is_access_denied_code, Error, Result};

pub async fn connect(
    host: &str,
    port: u16,
    user: &str,
    password: &str,
    ssl: bool,
) -> Result<MySqlConnection> {
    let mut opts = MySqlConnectOptions::new()
        .host(host)
        .port(port)
        .username(user)
        .password(password);

    if !ssl {
        opts = opts.ssl_mode(sqlx::mysql::MySqlSslMode::Disabled);
    }

    debug!("connecting to {}:{}", host, port);
    MySqlConnection::connect_with(&opts).await.map_err(Error::Network)
}

/// Run `sql` against `conn`, retrying under `budget`:
///
/// - if `statement_timeout_secs` and `max_statement_time` capability are
///   both present, the command is self-aborting server-side via a
///   `SET STATEMENT ... FOR` prefix;
/// - an attempt that finishes in under a second sleeps out the remainder,
///   so retries are rate-limited to at most once per second;
/// - retried iff the error is retryable (network or statement-timeout) and
///   budget remains;
/// - always attempted at least once, even with an already-exhausted
///   budget.
pub async fn execute_cmd_time_limit(
    conn: &mut MySqlConnection,
    sql: &str,
    budget: &mut Duration,
    max_statement_time_secs: Option<u64>,
) -> Result<()> {
    let command = match max_statement_time_secs {
        Some(secs) => format!("SET STATEMENT max_statement_time={secs} FOR {sql}"),
        None => sql.to_string(),
    };

    loop {
        let started = Instant::now();
        let result = sqlx::query(&command).execute(&mut *conn).await;
        let elapsed = started.elapsed();

        match result {
            Ok(_) => return Ok(()),
            Err(err) => {
                let classified = classify(err);
                let retryable = classified.is_retryable();

                if elapsed < Duration::from_secs(1) {
                    sleep(Duration::from_secs(1) - elapsed).await;
                }

                *budget = budget.saturating_sub(elapsed.max(Duration::from_secs(1)));

                if retryable && !budget.is_zero() {
                    warn!("retrying {:?} after {}", sql, classified);
                    continue;
                }

                return Err(classified);
            }
        }
    }
}

/// `ER_STATEMENT_TIMEOUT` / interruption-by-`max_statement_time` are
/// retried as transient, same as a network error. Any other database-level
/// error (syntax error, access-denied, ...) is fatal for the current
/// attempt: only the connection layer itself (`sqlx::Error` variants other
/// than `Database`) is treated as a retryable network error.
pub(crate) fn classify(err: sqlx::Error) -> Error {
    if let sqlx::Error::Database(ref db_err) = err {
        return match db_err.code().as_deref() {
            // MariaDB error 1969: ER_STATEMENT_TIMEOUT.
            Some("1969") => Error::StatementTimeout,
            Some(code) if is_access_denied_code(code) => Error::AccessDenied(db_err.message().to_string()),
            _ => Error::Database(db_err.message().to_string()),
        };
    }
    Error::Network(err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statement_timeout_is_retryable() {
        assert!(Error::StatementTimeout.is_retryable());
    }
}
