//! Tick driver: periodic invocation of the monitor pass.
//!
//! Follows `pgdog`'s `backend::pool::replicas::Monitor` shape: a
//! `tokio::time::interval` loop guarded by `select!` against a shutdown
//! signal. Per-agent updates are safe to run concurrently, since each
//! agent owns its own backend connection and its own cache, so one
//! tick spawns all `ServerAgent::monitor_tick` calls and joins them before
//! running the `TopologyAnalyzer` pass.

use std::sync::Arc;

use arc_swap::ArcSwap;
use futures::future::join_all;
use secrecy::ExposeSecret;
use tokio::select;
use tokio::sync::Notify;
use tokio::time::interval;
use tracing::{debug, info};

use crate::config::MonitorConfig;
use crate::json_export;
use crate::server::ServerAgent;
use crate::topology::TopologyAnalyzer;

pub struct Monitor {
    agents: Vec<ServerAgent>,
    config: ArcSwap<MonitorConfig>,
    shutdown: Notify,
}

impl Monitor {
    pub fn new(config: MonitorConfig) -> Self {
        let agents = config
            .servers
            .iter()
            .map(|s| ServerAgent::new(s.name.clone(), s.host.clone(), s.port))
            .collect();

        Self {
            agents,
            config: ArcSwap::from_pointee(config),
            shutdown: Notify::new(),
        }
    }

    pub fn agents(&self) -> &[ServerAgent] {
        &self.agents
    }

    pub fn config(&self) -> Arc<MonitorConfig> {
        self.config.load_full()
    }

    /// Re-parse the configuration file and swap it in, the
    /// `pgdog::config` global-`ArcSwap` pattern applied to this monitor's
    /// own config. The server list itself is fixed for the process
    /// lifetime; only timing and credentials are reloadable.
    pub fn reload(&self, path: &str) -> crate::error::Result<()> {
        let fresh = MonitorConfig::from_file(path)?;
        info!("reloaded configuration from {}", path);
        self.config.store(Arc::new(fresh));
        Ok(())
    }

    pub fn request_shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// One monitor pass: refresh every agent's cache in parallel, then run
    /// the topology analyzer over the resulting snapshots.
    pub async fn tick(&self) {
        let config = self.config.load();
        let user = config.monitor_user.clone();
        let password = config.monitor_password.expose_secret().to_string();
        let ssl = config.replication_ssl;

        let disk_threshold = config.disk_space_threshold_pct;
        let updates = self
            .agents
            .iter()
            .map(|agent| agent.monitor_tick(&user, &password, ssl, disk_threshold));
        let results = join_all(updates).await;

        for (agent, result) in self.agents.iter().zip(results) {
            if let Err(err) = result {
                debug!("{}: tick failed: {}", agent.name, err);
            }
        }

        TopologyAnalyzer::new(config.assume_unique_hostnames).analyze(&self.agents);
    }

    /// The tick loop: runs [`Monitor::tick`] on the configured interval
    /// until `request_shutdown` is called. The orchestrator and this loop
    /// share the process but never run a tick concurrently with an
    /// orchestration, since both are driven from the same CLI invocation
    /// in this crate's scope.
    pub async fn run(&self) {
        let tick_interval = self.config.load().tick_interval;
        let mut ticker = interval(tick_interval);
        info!("monitor tick loop starting, interval {:?}", tick_interval);

        loop {
            select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                _ = self.shutdown.notified() => {
                    break;
                }
            }
        }

        info!("monitor tick loop shut down");
    }

    pub fn to_json(&self) -> serde_json::Value {
        json_export::export_all(&self.agents)
    }
}

/// Unix `SIGHUP` listener that triggers a configuration reload, modeled on
/// `pgdog`'s `sighup.rs`.
#[cfg(target_family = "unix")]
pub struct Sighup {
    sig: tokio::signal::unix::Signal,
}

#[cfg(target_family = "unix")]
impl Sighup {
    pub fn new() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        Ok(Self {
            sig: signal(SignalKind::hangup())?,
        })
    }

    pub async fn listen(&mut self) {
        self.sig.recv().await;
    }
}

#[cfg(not(target_family = "unix"))]
pub struct Sighup;

#[cfg(not(target_family = "unix"))]
impl Sighup {
    pub fn new() -> std::io::Result<Self> {
        Ok(Self)
    }

    pub async fn listen(&mut self) {
        std::future::pending::<()>().await;
    }
}

/// Drive the tick loop with `SIGHUP`-triggered reload, bounded by `budget`
/// ticks under test (`None` runs until shutdown).
pub async fn run_with_reload(monitor: Arc<Monitor>, config_path: String) {
    let mut sighup = match Sighup::new() {
        Ok(s) => s,
        Err(err) => {
            tracing::warn!("could not install SIGHUP handler: {}", err);
            monitor.run().await;
            return;
        }
    };

    let mut tick_loop = Box::pin({
        let monitor = monitor.clone();
        async move { monitor.run().await }
    });

    loop {
        select! {
            _ = sighup.listen() => {
                if let Err(err) = monitor.reload(&config_path) {
                    tracing::warn!("config reload failed: {}", err);
                }
            }
            _ = &mut tick_loop => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_config() -> MonitorConfig {
        MonitorConfig::from_toml_str(
            r#"
            monitor_user = "monitor"
            monitor_password = "secret"
            tick_interval_ms = 10

            [[servers]]
            name = "node1"
            host = "127.0.0.1"
            port = 1
            "#,
        )
        .unwrap()
    }

    #[test]
    fn new_creates_one_agent_per_configured_server() {
        let monitor = Monitor::new(test_config());
        assert_eq!(monitor.agents().len(), 1);
        assert_eq!(monitor.agents()[0].name, "node1");
    }

    #[tokio::test]
    async fn tick_against_unreachable_backend_does_not_panic() {
        let monitor = Monitor::new(test_config());
        monitor.tick().await;
        assert_eq!(monitor.agents()[0].stats().ticks, 1);
    }

    #[test]
    fn reload_replaces_config_without_changing_agent_list() {
        let monitor = Monitor::new(test_config());
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(
            tmp.path(),
            r#"
            monitor_user = "monitor"
            monitor_password = "secret"
            tick_interval_ms = 5000

            [[servers]]
            name = "node1"
            host = "127.0.0.1"
            port = 1
            "#,
        )
        .unwrap();

        monitor.reload(tmp.path().to_str().unwrap()).unwrap();
        assert_eq!(monitor.config().tick_interval, Duration::from_millis(5000));
        assert_eq!(monitor.agents().len(), 1);
    }
}
