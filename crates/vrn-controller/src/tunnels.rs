//! Host-to-host tunnel ports.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use tracing::{debug, warn};
use vrn_types::{PortId, PortNumber};

/// Lookup of the tunnel ports of the managed datapath.
pub trait TunnelPorts {
    fn is_tunnel_port(&self, number: PortNumber) -> bool;

    /// Tunnel port leading to the host with control address `peer`.
    fn port_for_peer(&self, peer: Ipv4Addr) -> Option<PortNumber>;

    /// Tunnel port leading to the host where virtual port `port` lives.
    fn port_for_vport(&self, port: &PortId) -> Option<PortNumber>;
}

/// In-memory tunnel port registry.
#[derive(Debug, Default)]
pub struct TunnelPortTable {
    by_number: HashMap<PortNumber, Ipv4Addr>,
    by_peer: HashMap<Ipv4Addr, PortNumber>,
    locations: HashMap<PortId, Ipv4Addr>,
}

impl TunnelPortTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers tunnel port `number` towards `peer`, replacing any previous
    /// tunnel to the same peer or on the same number.
    pub fn add_tunnel_port(&mut self, number: PortNumber, peer: Ipv4Addr) {
        if let Some(old_peer) = self.by_number.insert(number, peer) {
            if old_peer != peer {
                self.by_peer.remove(&old_peer);
            }
        }
        if let Some(old_number) = self.by_peer.insert(peer, number) {
            if old_number != number {
                warn!(peer = %peer, old = %old_number, new = %number, "tunnel port for peer replaced");
                self.by_number.remove(&old_number);
            }
        }
        debug!(port = %number, peer = %peer, "tunnel port added");
    }

    pub fn remove_tunnel_port(&mut self, number: PortNumber) -> Option<Ipv4Addr> {
        let peer = self.by_number.remove(&number)?;
        self.by_peer.remove(&peer);
        debug!(port = %number, peer = %peer, "tunnel port removed");
        Some(peer)
    }

    /// Records the host where a remote virtual port lives.
    pub fn set_port_location(&mut self, port: PortId, host: Ipv4Addr) {
        self.locations.insert(port, host);
    }

    pub fn clear_port_location(&mut self, port: &PortId) -> Option<Ipv4Addr> {
        self.locations.remove(port)
    }

    pub fn len(&self) -> usize {
        self.by_number.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_number.is_empty()
    }
}

impl TunnelPorts for TunnelPortTable {
    fn is_tunnel_port(&self, number: PortNumber) -> bool {
        self.by_number.contains_key(&number)
    }

    fn port_for_peer(&self, peer: Ipv4Addr) -> Option<PortNumber> {
        self.by_peer.get(&peer).copied()
    }

    fn port_for_vport(&self, port: &PortId) -> Option<PortNumber> {
        self.locations
            .get(port)
            .and_then(|host| self.port_for_peer(*host))
    }
}
