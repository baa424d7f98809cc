//! Gate predicates deciding whether an agent may be demoted or promoted.
//! Each returns a human reason alongside the bool so the
//! orchestrator can report why a plan was refused.

use super::AgentSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Switchover,
    Failover,
}

/// Switchover-demote: the old master must still be reachable and sane.
pub fn can_be_demoted_switchover(snapshot: &AgentSnapshot) -> (bool, String) {
    if !snapshot.usable {
        return (false, "server is not usable".into());
    }
    if !snapshot.log_bin {
        return (false, "binary logging is off".into());
    }
    let is_slave_with_log_slave_updates = !snapshot.is_master() && snapshot.log_slave_updates;
    if !(snapshot.is_master() || is_slave_with_log_slave_updates) {
        return (
            false,
            "server is neither the master nor a slave with log_slave_updates".into(),
        );
    }
    if snapshot.gtid_binlog_pos.is_empty() {
        return (false, "gtid_binlog_pos is empty".into());
    }
    (true, String::new())
}

/// Failover-demote: the old master is unreachable by definition — this
/// checks we have a usable last-known binlog position to catch up to.
pub fn can_be_demoted_failover(snapshot: &AgentSnapshot) -> (bool, String) {
    if snapshot.usable {
        return (
            false,
            "server is still reachable, this is not a failover".into(),
        );
    }
    if snapshot.gtid_binlog_pos.is_empty() {
        return (false, "no last-known gtid_binlog_pos to catch up to".into());
    }
    (true, String::new())
}

/// Promotion gate. `counterpart` is the demotion target's `(host, port)`.
pub fn can_be_promoted(
    snapshot: &AgentSnapshot,
    op_kind: OpKind,
    counterpart_host: &str,
    counterpart_port: u16,
) -> (bool, String) {
    if !snapshot.usable {
        return (false, "server is not usable".into());
    }
    if snapshot.is_master() {
        return (false, "server is already the master".into());
    }
    if !snapshot.log_bin {
        return (false, "binary logging is off".into());
    }

    let Some(channel) = snapshot.channel_to(counterpart_host, counterpart_port) else {
        return (
            false,
            format!("no slave channel to {counterpart_host}:{counterpart_port}"),
        );
    };
    if channel.gtid_io_pos.is_empty() {
        return (false, "slave channel is not using GTID".into());
    }

    if op_kind == OpKind::Switchover {
        if !matches!(channel.io_state, crate::slave_status::IoState::Yes) {
            return (false, "slave channel IO thread is not running".into());
        }
        if snapshot.is_low_on_disk() {
            return (false, "server is low on disk space".into());
        }
    }

    (true, String::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gtid::GtidList;
    use crate::slave_status::{IoState, SlaveStatus};
    use crate::status_word::StatusBits;
    use std::time::Instant;

    fn base_snapshot() -> AgentSnapshot {
        AgentSnapshot {
            server_id: 1,
            read_only: false,
            gtid_current_pos: GtidList::parse("0-1-10"),
            gtid_binlog_pos: GtidList::parse("0-1-10"),
            slave_status: vec![],
            log_bin: true,
            log_slave_updates: false,
            enabled_events: Default::default(),
            status_bits: StatusBits::MASTER,
            usable: true,
            auth_error: false,
            disk_low: false,
        }
    }

    #[test]
    fn master_with_binlog_can_be_demoted_for_switchover() {
        let snap = base_snapshot();
        let (ok, _) = can_be_demoted_switchover(&snap);
        assert!(ok);
    }

    #[test]
    fn switchover_demote_rejects_empty_gtid_binlog_pos() {
        let mut snap = base_snapshot();
        snap.gtid_binlog_pos = GtidList::new();
        let (ok, reason) = can_be_demoted_switchover(&snap);
        assert!(!ok);
        assert!(reason.contains("gtid_binlog_pos"));
    }

    #[test]
    fn failover_demote_requires_unreachable_server() {
        let snap = base_snapshot();
        let (ok, _) = can_be_demoted_failover(&snap);
        assert!(!ok);
    }

    #[test]
    fn failover_demote_accepts_unreachable_with_known_position() {
        let mut snap = base_snapshot();
        snap.usable = false;
        let (ok, _) = can_be_demoted_failover(&snap);
        assert!(ok);
    }

    fn channel(host: &str, port: u16, io: IoState) -> SlaveStatus {
        SlaveStatus {
            name: String::new(),
            master_host: host.into(),
            master_port: port,
            master_server_id: 2,
            io_state: io,
            sql_running: true,
            seconds_behind_master: 0,
            gtid_io_pos: GtidList::parse("0-1-10"),
            received_heartbeats: 0,
            last_data_time: Instant::now(),
            seen_connected: true,
            last_error: String::new(),
        }
    }

    #[test]
    fn promote_requires_running_channel_for_switchover() {
        let mut snap = base_snapshot();
        snap.status_bits = StatusBits::SLAVE;
        snap.slave_status = vec![channel("master", 3306, IoState::Connecting)];

        let (ok, reason) = can_be_promoted(&snap, OpKind::Switchover, "master", 3306);
        assert!(!ok);
        assert!(reason.contains("IO thread"));
    }

    #[test]
    fn promote_allows_connecting_channel_for_failover() {
        let mut snap = base_snapshot();
        snap.status_bits = StatusBits::SLAVE;
        snap.slave_status = vec![channel("master", 3306, IoState::Connecting)];

        let (ok, _) = can_be_promoted(&snap, OpKind::Failover, "master", 3306);
        assert!(ok);
    }

    #[test]
    fn promote_rejects_already_master() {
        let snap = base_snapshot();
        let (ok, reason) = can_be_promoted(&snap, OpKind::Failover, "master", 3306);
        assert!(!ok);
        assert!(reason.contains("already"));
    }
}
