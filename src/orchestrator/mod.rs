//! Orchestrates switchover and failover as deterministic two-actor scripts.

pub mod failover;
pub mod switchover;

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use crate::config::MonitorConfig;
use crate::error::Result;
use crate::op_context::OperationContext;
use crate::server::ServerAgent;

pub struct Orchestrator<'a> {
    agents: &'a [ServerAgent],
    config: &'a MonitorConfig,
}

impl<'a> Orchestrator<'a> {
    pub fn new(agents: &'a [ServerAgent], config: &'a MonitorConfig) -> Self {
        Self { agents, config }
    }

    fn find(&self, name: &str) -> Option<&ServerAgent> {
        self.agents.iter().find(|a| a.name == name)
    }

    fn new_op_ctx(&self, budget: Duration) -> OperationContext {
        OperationContext::new(
            budget,
            self.config.replication_user.clone(),
            SecretString::from(self.config.replication_password.expose_secret().to_string()),
            self.config.replication_ssl,
        )
    }

    /// `D` (old master) hands off to `P` (new master); `D` stays alive and
    /// reachable throughout.
    pub async fn switchover(&self, demote_name: &str, promote_name: &str) -> Result<()> {
        switchover::run(self, demote_name, promote_name).await
    }

    /// `D` is unreachable; `P` is promoted using `D`'s last-observed state.
    pub async fn failover(&self, demote_name: &str, promote_name: &str) -> Result<()> {
        failover::run(self, demote_name, promote_name).await
    }
}
