//! Port allocation for every node and service launched in a run.

use std::collections::BTreeSet;
use std::net::TcpListener;

use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, Result};

/// Default lower bound of the port range handed out to a run.
pub const DEFAULT_PORT_MIN: u16 = 11000;

/// Hands out unique, currently-unbound TCP ports from a monotonically
/// increasing counter.
///
/// One allocator is created per run and passed by `&mut` to whatever needs a
/// port, so two nodes of the same run can never receive the same number.
#[derive(Debug)]
pub struct PortAllocator {
    next: u16,
    issued: BTreeSet<u16>,
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new(DEFAULT_PORT_MIN)
    }
}

impl PortAllocator {
    /// Create an allocator whose first candidate port is `port_min`.
    pub fn new(port_min: u16) -> Self {
        Self {
            next: port_min,
            issued: BTreeSet::new(),
        }
    }

    /// Allocate the next free port.
    ///
    /// Ports that some other process already holds are skipped rather than
    /// handed out.
    pub fn allocate(&mut self) -> Result<u16> {
        loop {
            let candidate = self.next;
            self.next = self.next.checked_add(1).ok_or_else(|| {
                HarnessError::Config("port range exhausted (reached 65535)".to_string())
            })?;

            if is_port_free(candidate) {
                self.issued.insert(candidate);
                return Ok(candidate);
            }

            tracing::debug!(port = candidate, "skipping port held by another process");
        }
    }

    /// Allocate the ports a single node needs.
    pub fn allocate_node(&mut self) -> Result<NodePorts> {
        Ok(NodePorts {
            rpc: self.allocate()?,
            p2p: self.allocate()?,
        })
    }

    /// All ports issued so far, in ascending order.
    pub fn issued(&self) -> impl Iterator<Item = u16> + '_ {
        self.issued.iter().copied()
    }
}

/// Ports allocated to a single node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodePorts {
    /// JSON-RPC endpoint.
    pub rpc: u16,
    /// Peer-to-peer listener.
    pub p2p: u16,
}

impl NodePorts {
    /// The ports as (port, description) pairs, for preflight checks.
    pub fn describe(&self, name: &str) -> Vec<(u16, String)> {
        vec![
            (self.rpc, format!("{name} RPC")),
            (self.p2p, format!("{name} P2P")),
        ]
    }
}

/// Returns true if nothing is listening on `port` on localhost.
pub fn is_port_free(port: u16) -> bool {
    TcpListener::bind(("127.0.0.1", port)).is_ok()
}

/// Check that every listed port can be bound, failing on the first that
/// cannot.
pub fn ensure_ports_free(name: &str, ports: &[(u16, String)]) -> Result<()> {
    for (port, description) in ports {
        if !is_port_free(*port) {
            tracing::error!(%description, port, "port unavailable");
            return Err(HarnessError::PortInUse {
                name: name.to_string(),
                port: *port,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocations_are_unique_and_increasing() {
        let mut ports = PortAllocator::new(21000);

        let a = ports.allocate().unwrap();
        let node = ports.allocate_node().unwrap();
        let b = ports.allocate().unwrap();

        assert!(a >= 21000);
        assert!(a < node.rpc);
        assert!(node.rpc < node.p2p);
        assert!(node.p2p < b);
        assert_eq!(ports.issued().count(), 4);
    }

    #[test]
    fn test_skips_bound_port() {
        let held = TcpListener::bind("127.0.0.1:0").unwrap();
        let held_port = held.local_addr().unwrap().port();

        let mut ports = PortAllocator::new(held_port);
        let port = ports.allocate().unwrap();

        assert_ne!(port, held_port);
        assert!(port > held_port);
    }

    #[test]
    fn test_range_exhaustion_is_an_error() {
        let mut ports = PortAllocator::new(u16::MAX);
        assert!(matches!(ports.allocate(), Err(HarnessError::Config(_))));
    }

    #[test]
    fn test_ensure_ports_free_reports_holder() {
        let held = TcpListener::bind("127.0.0.1:0").unwrap();
        let held_port = held.local_addr().unwrap().port();

        let err = ensure_ports_free("zgs_node_0", &[(held_port, "zgs_node_0 RPC".to_string())])
            .unwrap_err();
        assert!(matches!(err, HarnessError::PortInUse { port, .. } if port == held_port));
    }
}
