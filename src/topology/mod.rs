//! Topology discovery: builds the replication graph across all agents and
//! writes role bits into each agent's status word.

pub mod tarjan;

use std::collections::{HashMap, HashSet};

use crate::server::ServerAgent;
use crate::status_word::StatusBits;

pub use tarjan::CYCLE_NONE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reach {
    Reached,
    Unknown,
    Unreached,
}

pub struct TopologyAnalyzer {
    assume_unique_hostnames: bool,
}

impl TopologyAnalyzer {
    pub fn new(assume_unique_hostnames: bool) -> Self {
        Self {
            assume_unique_hostnames,
        }
    }

    /// Runs the full graph-build / SCC / reachability / role-assignment
    /// pipeline and publishes the result into each agent's status word.
    pub fn analyze(&self, agents: &[ServerAgent]) {
        let snapshots: Vec<_> = agents.iter().map(|a| a.snapshot()).collect();
        let (parent, external_masters) = self.build_graph(agents, &snapshots);

        let adjacency: Vec<Vec<usize>> = parent
            .iter()
            .map(|p| p.iter().copied().collect::<Vec<_>>())
            .collect();
        let cycle_ids = tarjan::strongly_connected_components(&adjacency);
        let reach = label_reachability(parent.len(), &parent, &cycle_ids);

        let has_child: Vec<bool> = {
            let mut flags = vec![false; agents.len()];
            for p in parent.iter().flatten() {
                flags[*p] = true;
            }
            flags
        };

        for (idx, agent) in agents.iter().enumerate() {
            let mut bits = StatusBits::RUNNING;

            if external_masters.contains(&idx) {
                bits |= StatusBits::SLAVE_OF_EXT_MASTER;
            } else if parent[idx].is_none() {
                if matches!(reach[idx], Reach::Reached) {
                    bits |= StatusBits::MASTER;
                }
            } else {
                bits |= StatusBits::SLAVE;
                if has_child[idx] {
                    bits |= StatusBits::RELAY_MASTER;
                }
            }

            if snapshots[idx].auth_error {
                bits |= StatusBits::AUTH_ERROR;
            }
            if snapshots[idx].disk_low {
                bits |= StatusBits::DISK_SPACE_EXHAUSTED;
            }

            agent.status.set_role_bits(bits);
        }
    }

    /// Step 1: for each agent, for each live slave channel, resolve the
    /// parent agent by `(host, port)` or by `server_id` depending on
    /// `assume_unique_hostnames`. A live channel with no match in the
    /// monitored set is recorded in `external_masters`.
    fn build_graph(
        &self,
        agents: &[ServerAgent],
        snapshots: &[crate::server::AgentSnapshot],
    ) -> (Vec<Option<usize>>, HashSet<usize>) {
        let by_host_port: HashMap<(&str, u16), usize> = agents
            .iter()
            .enumerate()
            .map(|(i, a)| ((a.host.as_str(), a.port), i))
            .collect();
        let by_server_id: HashMap<i64, usize> = snapshots
            .iter()
            .enumerate()
            .map(|(i, s)| (s.server_id, i))
            .collect();

        let mut parent = vec![None; agents.len()];
        let mut external_masters = HashSet::new();

        for (idx, snapshot) in snapshots.iter().enumerate() {
            for row in &snapshot.slave_status {
                if !row.is_live_link() {
                    continue;
                }

                let found = if self.assume_unique_hostnames {
                    by_host_port.get(&(row.master_host.as_str(), row.master_port)).copied()
                } else {
                    by_server_id.get(&row.master_server_id).copied()
                };

                match found {
                    Some(parent_idx) if parent_idx != idx => {
                        parent[idx].get_or_insert(parent_idx);
                    }
                    _ => {
                        external_masters.insert(idx);
                    }
                }
            }
        }

        (parent, external_masters)
    }
}

/// Step 3: from every node with no internal parent, propagate `REACHED`
/// down children. Anything left over is `UNKNOWN` (part of a rootless
/// cycle) or `UNREACHED`.
fn label_reachability(n: usize, parent: &[Option<usize>], cycle_ids: &[i64]) -> Vec<Reach> {
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (i, p) in parent.iter().enumerate() {
        if let Some(p) = p {
            children[*p].push(i);
        }
    }

    let mut reach = vec![Reach::Unreached; n];
    let mut stack: Vec<usize> = (0..n).filter(|&i| parent[i].is_none()).collect();
    for &root in &stack {
        reach[root] = Reach::Reached;
    }

    while let Some(node) = stack.pop() {
        for &child in &children[node] {
            if !matches!(reach[child], Reach::Reached) {
                reach[child] = Reach::Reached;
                stack.push(child);
            }
        }
    }

    for i in 0..n {
        if !matches!(reach[i], Reach::Reached) {
            reach[i] = if cycle_ids[i] != CYCLE_NONE {
                Reach::Unknown
            } else {
                Reach::Unreached
            };
        }
    }
    reach
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gtid::GtidList;
    use crate::slave_status::{IoState, SlaveStatus};
    use std::time::Instant;

    fn agent_with_parent(name: &str, host: &str, port: u16, parent_host: &str, parent_port: u16) -> ServerAgent {
        let agent = ServerAgent::new(name, host, port);
        agent.test_set_slave_status(vec![SlaveStatus {
            name: String::new(),
            master_host: parent_host.into(),
            master_port: parent_port,
            master_server_id: 0,
            io_state: IoState::Yes,
            sql_running: true,
            seconds_behind_master: 0,
            gtid_io_pos: GtidList::new(),
            received_heartbeats: 0,
            last_data_time: Instant::now(),
            seen_connected: true,
            last_error: String::new(),
        }]);
        agent
    }

    #[test]
    fn simple_chain_assigns_master_and_slave() {
        let master = ServerAgent::new("m", "10.0.0.1", 3306);
        let slave = agent_with_parent("s", "10.0.0.2", 3306, "10.0.0.1", 3306);

        let agents = vec![master, slave];
        TopologyAnalyzer::new(true).analyze(&agents);

        assert!(agents[0].status.load().contains(StatusBits::MASTER));
        assert!(agents[1].status.load().contains(StatusBits::SLAVE));
    }

    #[test]
    fn unmonitored_parent_sets_slave_of_ext_master() {
        let slave = agent_with_parent("s", "10.0.0.2", 3306, "10.9.9.9", 3306);
        let agents = vec![slave];
        TopologyAnalyzer::new(true).analyze(&agents);

        assert!(agents[0]
            .status
            .load()
            .contains(StatusBits::SLAVE_OF_EXT_MASTER));
    }

    #[test]
    fn two_node_cycle_has_no_master() {
        let a = agent_with_parent("a", "10.0.0.1", 3306, "10.0.0.2", 3306);
        let b = agent_with_parent("b", "10.0.0.2", 3306, "10.0.0.1", 3306);
        let agents = vec![a, b];
        TopologyAnalyzer::new(true).analyze(&agents);

        assert!(!agents[0].status.load().contains(StatusBits::MASTER));
        assert!(!agents[1].status.load().contains(StatusBits::MASTER));
    }

    #[test]
    fn relay_master_gets_both_slave_and_relay_bits() {
        let master = ServerAgent::new("m", "10.0.0.1", 3306);
        let relay = agent_with_parent("r", "10.0.0.2", 3306, "10.0.0.1", 3306);
        let leaf = agent_with_parent("l", "10.0.0.3", 3306, "10.0.0.2", 3306);

        let agents = vec![master, relay, leaf];
        TopologyAnalyzer::new(true).analyze(&agents);

        let relay_bits = agents[1].status.load();
        assert!(relay_bits.contains(StatusBits::SLAVE));
        assert!(relay_bits.contains(StatusBits::RELAY_MASTER));
        assert!(agents[2].status.load().contains(StatusBits::SLAVE));
    }

    #[test]
    fn auth_error_and_disk_low_are_carried_into_role_bits() {
        let master = ServerAgent::new("m", "10.0.0.1", 3306);
        master.test_set_auth_error(true);
        master.test_set_disk_low(true);

        let agents = vec![master];
        TopologyAnalyzer::new(true).analyze(&agents);

        let bits = agents[0].status.load();
        assert!(bits.contains(StatusBits::AUTH_ERROR));
        assert!(bits.contains(StatusBits::DISK_SPACE_EXHAUSTED));
    }
}
