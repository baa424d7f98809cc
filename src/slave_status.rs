//! One replica-side replication channel snapshot.

use std::time::Instant;

use crate::gtid::GtidList;

pub const UNKNOWN_SERVER_ID: i64 = -1;
pub const UNDEFINED_SECONDS_BEHIND: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoState {
    No,
    Connecting,
    Yes,
}

#[derive(Debug, Clone)]
pub struct SlaveStatus {
    pub name: String,
    pub master_host: String,
    pub master_port: u16,
    pub master_server_id: i64,
    pub io_state: IoState,
    pub sql_running: bool,
    pub seconds_behind_master: i32,
    pub gtid_io_pos: GtidList,
    pub received_heartbeats: u64,
    pub last_data_time: Instant,
    pub seen_connected: bool,
    pub last_error: String,
}

impl SlaveStatus {
    /// Two rows are topology-equal iff these five fields match.
    pub fn topology_equal(&self, other: &SlaveStatus) -> bool {
        self.io_state == other.io_state
            && self.sql_running == other.sql_running
            && self.master_host == other.master_host
            && self.master_port == other.master_port
            && self.master_server_id == other.master_server_id
    }

    /// A slave channel is "live" for topology graph purposes iff IO is
    /// connecting-or-up and the SQL thread is running.
    pub fn is_live_link(&self) -> bool {
        matches!(self.io_state, IoState::Connecting | IoState::Yes) && self.sql_running
    }

    /// Identity used across ticks to merge the previous row forward:
    /// `(master_host, master_port)`.
    pub fn identity(&self) -> (&str, u16) {
        (&self.master_host, self.master_port)
    }
}

/// Merge the array of SlaveStatus rows observed this tick with the array
/// from the previous tick:
///
/// - identity is `(master_host, master_port)`, located first by positional
///   hint (same index in both arrays), then by linear scan;
/// - `last_data_time` carries forward unless `(received_heartbeats,
///   gtid_io_pos)` changed;
/// - `seen_connected` latches true on `io_state = Yes` with a known master
///   server id, and survives a `Connecting` observation only if the prior
///   row already had it set and `master_server_id` is unchanged (does not
///   latch across an id change while reconnecting).
pub fn merge_slave_status_arrays(
    previous: &[SlaveStatus],
    mut new_rows: Vec<SlaveStatus>,
) -> Vec<SlaveStatus> {
    for (idx, row) in new_rows.iter_mut().enumerate() {
        let prior = previous
            .get(idx)
            .filter(|p| p.identity() == row.identity())
            .or_else(|| previous.iter().find(|p| p.identity() == row.identity()));

        let Some(prior) = prior else {
            continue;
        };

        let unchanged = prior.received_heartbeats == row.received_heartbeats
            && prior.gtid_io_pos == row.gtid_io_pos;
        if unchanged {
            row.last_data_time = prior.last_data_time;
        }

        row.seen_connected = match row.io_state {
            IoState::Yes if row.master_server_id > 0 => true,
            IoState::Connecting => {
                prior.seen_connected && prior.master_server_id == row.master_server_id
            }
            _ => prior.seen_connected && row.io_state != IoState::No,
        };
    }

    new_rows
}

/// Arrays differ in length, or any row at the same position is not
/// topology-equal to its predecessor.
pub fn arrays_topology_equal(previous: &[SlaveStatus], new_rows: &[SlaveStatus]) -> bool {
    previous.len() == new_rows.len()
        && previous
            .iter()
            .zip(new_rows.iter())
            .all(|(a, b)| a.topology_equal(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(host: &str, port: u16, io: IoState, server_id: i64) -> SlaveStatus {
        SlaveStatus {
            name: String::new(),
            master_host: host.into(),
            master_port: port,
            master_server_id: server_id,
            io_state: io,
            sql_running: true,
            seconds_behind_master: 0,
            gtid_io_pos: GtidList::new(),
            received_heartbeats: 0,
            last_data_time: Instant::now(),
            seen_connected: false,
            last_error: String::new(),
        }
    }

    #[test]
    fn unchanged_tick_preserves_last_data_time_and_seen_connected() {
        let mut prior = row("host", 3306, IoState::Yes, 5);
        prior.seen_connected = true;
        let t0 = prior.last_data_time;

        let new_row = row("host", 3306, IoState::Yes, 5);
        let merged = merge_slave_status_arrays(&[prior], vec![new_row]);

        assert_eq!(merged[0].last_data_time, t0);
        assert!(merged[0].seen_connected);
        assert!(arrays_topology_equal(
            &[row("host", 3306, IoState::Yes, 5)],
            &merged
        ));
    }

    #[test]
    fn heartbeat_only_tick_still_advances_last_data_time() {
        let prior = row("host", 3306, IoState::Yes, 5);
        let t0 = prior.last_data_time;

        let mut heartbeat_tick = row("host", 3306, IoState::Yes, 5);
        heartbeat_tick.received_heartbeats = prior.received_heartbeats + 1;

        let merged = merge_slave_status_arrays(&[prior], vec![heartbeat_tick]);
        assert_ne!(merged[0].last_data_time, t0);
    }

    #[test]
    fn seen_connected_does_not_latch_across_reconnect_id_change() {
        let mut prior = row("host", 3306, IoState::Yes, 5);
        prior.seen_connected = true;

        let mut reconnecting = row("host", 3306, IoState::Connecting, 6);
        reconnecting.seen_connected = false;

        let merged = merge_slave_status_arrays(&[prior], vec![reconnecting]);
        assert!(!merged[0].seen_connected);
    }

    #[test]
    fn connecting_preserves_seen_connected_when_id_unchanged() {
        let mut prior = row("host", 3306, IoState::Yes, 5);
        prior.seen_connected = true;

        let reconnecting = row("host", 3306, IoState::Connecting, 5);
        let merged = merge_slave_status_arrays(&[prior], vec![reconnecting]);
        assert!(merged[0].seen_connected);
    }
}
