//! Portset fan-out.
//!
//! A portset is a multi-destination group. Its members on this host are
//! datapath ports (the local slice); its members elsewhere are reached
//! through the tunnel to each participating host.

use crate::tunnels::TunnelPorts;
use std::collections::{BTreeSet, HashMap};
use std::net::Ipv4Addr;
use tracing::{debug, error, warn};
use vrn_datapath::FlowMatch;
use vrn_types::{PortId, PortNumber};

/// Registry of the hosts participating in each portset.
pub trait PortSetMembership: Send {
    /// Control addresses of the participating hosts, or `None` if `portset`
    /// is not a portset.
    fn participants(&self, portset: &PortId) -> Option<Vec<Ipv4Addr>>;

    /// Adds `host` to `portset`, declaring the portset if needed.
    fn add_participant(&mut self, portset: PortId, host: Ipv4Addr);

    /// Returns `false` if `host` was not participating.
    fn remove_participant(&mut self, portset: &PortId, host: &Ipv4Addr) -> bool;
}

/// In-memory portset membership.
#[derive(Debug, Default, Clone)]
pub struct PortSetMap {
    sets: HashMap<PortId, BTreeSet<Ipv4Addr>>,
}

impl PortSetMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares `portset`, with no participants yet.
    pub fn create(&mut self, portset: PortId) {
        self.sets.entry(portset).or_default();
    }

    pub fn remove(&mut self, portset: &PortId) -> bool {
        self.sets.remove(portset).is_some()
    }
}

impl PortSetMembership for PortSetMap {
    fn participants(&self, portset: &PortId) -> Option<Vec<Ipv4Addr>> {
        self.sets.get(portset).map(|hosts| hosts.iter().copied().collect())
    }

    fn add_participant(&mut self, portset: PortId, host: Ipv4Addr) {
        self.sets.entry(portset).or_default().insert(host);
    }

    fn remove_participant(&mut self, portset: &PortId, host: &Ipv4Addr) -> bool {
        self.sets
            .get_mut(portset)
            .is_some_and(|hosts| hosts.remove(host))
    }
}

/// The datapath ports of this host that belong to each portset.
#[derive(Debug, Default)]
pub struct LocalPortSets {
    slices: HashMap<PortId, BTreeSet<PortNumber>>,
}

impl LocalPortSets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(&mut self, portset: PortId, port: PortNumber) -> bool {
        self.slices.entry(portset).or_default().insert(port)
    }

    pub fn leave(&mut self, portset: &PortId, port: PortNumber) -> bool {
        let Some(slice) = self.slices.get_mut(portset) else {
            return false;
        };
        let removed = slice.remove(&port);
        if slice.is_empty() {
            self.slices.remove(portset);
        }
        removed
    }

    /// Removes `port` from every slice. Returns how many slices it left.
    pub fn leave_all(&mut self, port: PortNumber) -> usize {
        let mut count = 0;
        self.slices.retain(|_, slice| {
            if slice.remove(&port) {
                count += 1;
            }
            !slice.is_empty()
        });
        count
    }

    pub fn slice(&self, portset: &PortId) -> Option<&BTreeSet<PortNumber>> {
        self.slices.get(portset)
    }
}

/// Expands a portset into the datapath ports a packet must be sent out of.
pub struct PortSetResolver<'a> {
    pub local_address: Ipv4Addr,
    pub local_slices: &'a LocalPortSets,
    pub membership: &'a dyn PortSetMembership,
    pub tunnels: &'a dyn TunnelPorts,
}

impl PortSetResolver<'_> {
    /// Returns `None` if `portset` is not a portset, otherwise the local
    /// slice plus one tunnel port per remote participant that has a tunnel.
    pub fn resolve(&self, portset: &PortId, flow_match: &FlowMatch) -> Option<BTreeSet<PortNumber>> {
        let participants = self.membership.participants(portset)?;

        let mut out_ports = self
            .local_slices
            .slice(portset)
            .cloned()
            .unwrap_or_default();

        for host in participants {
            if host == self.local_address {
                continue;
            }
            match self.tunnels.port_for_peer(host) {
                Some(port) => {
                    out_ports.insert(port);
                }
                None => {
                    warn!(portset = %portset, peer = %host, "no tunnel port for portset participant");
                }
            }
        }

        if out_ports.is_empty() {
            error!(portset = %portset, flow = %flow_match, "portset has no reachable ports");
        } else {
            debug!(portset = %portset, ports = ?out_ports, "portset resolved");
        }
        Some(out_ports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tunnels::TunnelPortTable;
    use pretty_assertions::assert_eq;

    const LOCAL: Ipv4Addr = Ipv4Addr::new(192, 168, 0, 1);
    const PEER_A: Ipv4Addr = Ipv4Addr::new(192, 168, 0, 2);
    const PEER_B: Ipv4Addr = Ipv4Addr::new(192, 168, 0, 3);

    struct Fixture {
        slices: LocalPortSets,
        membership: PortSetMap,
        tunnels: TunnelPortTable,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                slices: LocalPortSets::new(),
                membership: PortSetMap::new(),
                tunnels: TunnelPortTable::new(),
            }
        }

        fn resolve(&self, portset: &PortId) -> Option<BTreeSet<PortNumber>> {
            PortSetResolver {
                local_address: LOCAL,
                local_slices: &self.slices,
                membership: &self.membership,
                tunnels: &self.tunnels,
            }
            .resolve(portset, &FlowMatch::new())
        }
    }

    fn ports(numbers: &[u16]) -> BTreeSet<PortNumber> {
        numbers.iter().copied().map(PortNumber::new).collect()
    }

    #[test]
    fn test_not_a_portset() {
        let fx = Fixture::new();
        assert_eq!(fx.resolve(&PortId::from_short_id(1)), None);
    }

    #[test]
    fn test_local_and_remote_members() {
        let mut fx = Fixture::new();
        let portset = PortId::from_short_id(0x5e7);
        fx.slices.join(portset, PortNumber::new(1));
        fx.slices.join(portset, PortNumber::new(2));
        fx.membership.add_participant(portset, LOCAL);
        fx.membership.add_participant(portset, PEER_A);
        fx.membership.add_participant(portset, PEER_B);
        fx.tunnels.add_tunnel_port(PortNumber::new(100), PEER_A);
        fx.tunnels.add_tunnel_port(PortNumber::new(101), PEER_B);

        assert_eq!(fx.resolve(&portset), Some(ports(&[1, 2, 100, 101])));
    }

    #[test]
    fn test_missing_tunnel_is_skipped() {
        let mut fx = Fixture::new();
        let portset = PortId::from_short_id(0x5e7);
        fx.membership.add_participant(portset, PEER_A);
        fx.membership.add_participant(portset, PEER_B);
        fx.tunnels.add_tunnel_port(PortNumber::new(101), PEER_B);

        assert_eq!(fx.resolve(&portset), Some(ports(&[101])));
    }

    #[test]
    fn test_local_address_excluded() {
        let mut fx = Fixture::new();
        let portset = PortId::from_short_id(0x5e7);
        fx.membership.add_participant(portset, LOCAL);
        // A tunnel to ourselves must never be used.
        fx.tunnels.add_tunnel_port(PortNumber::new(99), LOCAL);

        assert_eq!(fx.resolve(&portset), Some(BTreeSet::new()));
    }

    #[test]
    fn test_empty_portset() {
        let mut fx = Fixture::new();
        let portset = PortId::from_short_id(0x5e7);
        fx.membership.create(portset);

        assert_eq!(fx.resolve(&portset), Some(BTreeSet::new()));
    }

    #[test]
    fn test_local_slice_leave() {
        let mut slices = LocalPortSets::new();
        let a = PortId::from_short_id(1);
        let b = PortId::from_short_id(2);
        slices.join(a, PortNumber::new(5));
        slices.join(b, PortNumber::new(5));
        slices.join(b, PortNumber::new(6));

        assert!(slices.leave(&a, PortNumber::new(5)));
        assert!(slices.slice(&a).is_none());
        assert_eq!(slices.leave_all(PortNumber::new(5)), 1);
        assert_eq!(slices.slice(&b), Some(&ports(&[6])));
    }

    #[test]
    fn test_membership_removal() {
        let mut membership = PortSetMap::new();
        let portset = PortId::from_short_id(1);
        membership.add_participant(portset, PEER_A);

        assert!(membership.remove_participant(&portset, &PEER_A));
        assert!(!membership.remove_participant(&portset, &PEER_A));
        assert_eq!(membership.participants(&portset), Some(vec![]));
        assert!(membership.remove(&portset));
        assert_eq!(membership.participants(&portset), None);
    }
}
