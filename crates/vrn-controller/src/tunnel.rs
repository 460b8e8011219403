//! Tunnel header codec.
//!
//! Packets crossing a host-to-host tunnel carry their routing context in the
//! Ethernet addresses instead of real MACs:
//!
//! ```text
//!            0      1      2      3      4      5
//! dl_src  | ingress port id (32 bits)  | nh[0]  nh[1] |
//! dl_dst  | nh[2]  nh[3] | egress port id (32 bits)    |
//! ```
//!
//! Port ids are truncated to their low 32 bits; `nh` is the next-hop IPv4
//! address in network byte order.

use std::fmt;
use std::net::Ipv4Addr;
use vrn_types::{MacAddress, PortId};

/// Ingress id used by peers relaying an ICMP error for one of our flows.
pub const ICMP_TUNNEL_ID: u32 = 0x05;

/// Routing context decoded from a tunnelled packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TunnelHeader {
    pub ingress: PortId,
    pub egress: PortId,
    pub next_hop: Ipv4Addr,
}

impl TunnelHeader {
    /// True if a peer relayed this packet as an ICMP error.
    pub fn is_icmp_relay(&self) -> bool {
        self.ingress.short_id() == ICMP_TUNNEL_ID
    }
}

impl fmt::Display for TunnelHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ingress {:#010x} egress {:#010x} next-hop {}",
            self.ingress.short_id(),
            self.egress.short_id(),
            self.next_hop
        )
    }
}

/// Encodes `(ingress, egress, next_hop)` as a `(dl_src, dl_dst)` pair.
pub fn encode_tunnel_macs(
    ingress: PortId,
    egress: PortId,
    next_hop: Ipv4Addr,
) -> (MacAddress, MacAddress) {
    let ingress = ingress.short_id().to_be_bytes();
    let egress = egress.short_id().to_be_bytes();
    let nh = next_hop.octets();

    let src = [ingress[0], ingress[1], ingress[2], ingress[3], nh[0], nh[1]];
    let dst = [nh[2], nh[3], egress[0], egress[1], egress[2], egress[3]];
    (MacAddress::new(src), MacAddress::new(dst))
}

/// Inverse of [`encode_tunnel_macs`].
///
/// The returned port ids carry only the 32 bits that crossed the tunnel.
pub fn decode_tunnel_macs(dl_src: MacAddress, dl_dst: MacAddress) -> TunnelHeader {
    let src = dl_src.octets();
    let dst = dl_dst.octets();

    TunnelHeader {
        ingress: PortId::from_short_id(u32::from_be_bytes([src[0], src[1], src[2], src[3]])),
        egress: PortId::from_short_id(u32::from_be_bytes([dst[2], dst[3], dst[4], dst[5]])),
        next_hop: Ipv4Addr::new(src[4], src[5], dst[0], dst[1]),
    }
}
