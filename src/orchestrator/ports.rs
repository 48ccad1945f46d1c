use std::net::TcpListener;

use crate::config::model::{ComponentKind, StackConfig};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortConflict {
    pub component: String,
    pub port: u16,
    pub owner: Option<String>,
}

impl std::fmt::Display for PortConflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.owner {
            Some(owner) => write!(
                f,
                "Port {} required by '{}' is already in use by {}",
                self.port, self.component, owner
            ),
            None => write!(
                f,
                "Port {} required by '{}' is already in use",
                self.port, self.component
            ),
        }
    }
}

pub fn check_port_available(port: u16) -> bool {
    TcpListener::bind(("127.0.0.1", port)).is_ok()
}

/// Identify which process owns a given port.
pub fn identify_port_owner(port: u16) -> Option<String> {
    crate::platform::identify_port_owner(port)
}

/// Every port the enabled components will listen on, in display order.
pub fn planned_ports(config: &StackConfig) -> Vec<(String, u16)> {
    let mut ports = Vec::new();
    for kind in config.enabled_components() {
        ports.push((kind.name().to_string(), config.port(kind)));
        if kind == ComponentKind::L2 {
            ports.push(("l2 (ws)".to_string(), config.l2_ws_port()));
        }
    }
    ports
}

/// Check the fixed ports of every enabled component against ports already
/// bound on this machine.
pub fn check_all_ports(config: &StackConfig) -> Vec<PortConflict> {
    planned_ports(config)
        .into_iter()
        .filter(|(_, port)| !check_port_available(*port))
        .map(|(component, port)| PortConflict {
            component,
            port,
            owner: identify_port_owner(port),
        })
        .collect()
}

pub fn format_port_conflicts(conflicts: &[PortConflict]) -> String {
    let mut msg = String::from("Port conflicts detected:\n");
    for conflict in conflicts {
        msg.push_str(&format!("  - {}\n", conflict));
    }
    msg.push_str(
        "\nFree the ports, run `stackrig stop` to clean up a previous run, \
         or change the ports in stackrig.toml.",
    );
    msg
}
