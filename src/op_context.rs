//! Context threaded through an orchestration: deadline, credentials, and
//! an error-accumulating sink shared by every step.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use serde_json::{json, Value};

use crate::slave_status::SlaveStatus;

/// JSON error accumulator: "operations accept a JSON error accumulator;
/// each failure appends one object with a human message.
#[derive(Debug, Default)]
pub struct ErrorSink {
    errors: Vec<Value>,
}

impl ErrorSink {
    pub fn push_for(&mut self, target: &str, message: impl Into<String>) {
        self.errors
            .push(json!({ "target": target, "error": message.into() }));
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn to_json(&self) -> Value {
        Value::Array(self.errors.clone())
    }
}

pub struct OperationContext {
    pub deadline_remaining: Duration,
    pub error_sink: ErrorSink,
    pub replication_user: String,
    pub replication_password: SecretString,
    pub replication_ssl: bool,
}

impl OperationContext {
    pub fn new(
        budget: Duration,
        replication_user: impl Into<String>,
        replication_password: SecretString,
        replication_ssl: bool,
    ) -> Self {
        Self {
            deadline_remaining: budget,
            error_sink: ErrorSink::default(),
            replication_user: replication_user.into(),
            replication_password,
            replication_ssl,
        }
    }
}

/// Plan for one side of a switchover/failover swap.
#[derive(Debug, Clone, Default)]
pub struct ServerOperation {
    pub to_from_master: bool,
    pub handle_events: bool,
    pub events_to_enable: HashSet<String>,
    pub conns_to_copy: Vec<SlaveStatus>,
    pub sql_file: Option<PathBuf>,
}
