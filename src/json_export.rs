//! JSON diagnostic export.
//!
//! Each agent already knows how to snapshot itself
//! ([`crate::server::ServerAgent::to_json`]) under its own `array_lock`;
//! this module only does the monitor-wide fan-out, read-lock only, never
//! blocking a tick.

use serde_json::{json, Value};

use crate::server::ServerAgent;

/// One JSON object per agent, keyed by server name.
pub fn export_all(agents: &[ServerAgent]) -> Value {
    let servers: Vec<Value> = agents.iter().map(|a| a.to_json()).collect();
    json!({ "servers": servers })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_all_includes_every_agent_by_name() {
        let agents = vec![
            ServerAgent::new("a", "10.0.0.1", 3306),
            ServerAgent::new("b", "10.0.0.2", 3306),
        ];
        let exported = export_all(&agents);
        let names: Vec<&str> = exported["servers"]
            .as_array()
            .unwrap()
            .iter()
            .map(|s| s["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
