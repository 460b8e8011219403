//! Packet-in deserialization.
//!
//! Headers are read with `smoltcp::wire` into a [`ParsedPacket`], which is
//! what the dispatcher and the simulation engine work from, and from which
//! the packet's exact [`FlowMatch`] is derived.

use smoltcp::wire::{
    DhcpPacket, EthernetFrame, EthernetProtocol, Icmpv4Packet, IpProtocol, Ipv4Packet, TcpPacket,
    UdpPacket, DHCP_CLIENT_PORT, DHCP_SERVER_PORT,
};
use std::net::Ipv4Addr;
use thiserror::Error;
use vrn_datapath::FlowMatch;
use vrn_types::{MacAddress, PortNumber};

pub const ETHERTYPE_IPV4: u16 = 0x0800;
pub const IP_PROTO_ICMP: u8 = 1;
pub const IP_PROTO_TCP: u8 = 6;
pub const IP_PROTO_UDP: u8 = 17;

const DHCP_OP_BOOTREQUEST: u8 = 1;

/// Why a packet could not be deserialized.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PacketError {
    #[error("empty packet")]
    Empty,

    #[error("malformed {layer} header")]
    Malformed { layer: &'static str },
}

impl PacketError {
    fn malformed(layer: &'static str) -> impl FnOnce(smoltcp::wire::Error) -> PacketError {
        move |_| PacketError::Malformed { layer }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Header {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub protocol: u8,
}

/// Transport ports, or ICMP type and code for ICMP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportPorts {
    pub src: u16,
    pub dst: u16,
}

/// A DHCP message carried from a client to a server port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpMessage {
    pub opcode: u8,
    /// UDP payload, starting at the BOOTP header.
    pub payload: Vec<u8>,
}

impl DhcpMessage {
    pub fn is_bootrequest(&self) -> bool {
        self.opcode == DHCP_OP_BOOTREQUEST
    }
}

/// Headers of a packet-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPacket {
    pub dl_src: MacAddress,
    pub dl_dst: MacAddress,
    pub ethertype: u16,
    pub ipv4: Option<Ipv4Header>,
    pub transport: Option<TransportPorts>,
    pub dhcp: Option<DhcpMessage>,
}

impl ParsedPacket {
    pub fn parse(data: &[u8]) -> Result<Self, PacketError> {
        if data.is_empty() {
            return Err(PacketError::Empty);
        }

        let frame = EthernetFrame::new_checked(data).map_err(PacketError::malformed("ethernet"))?;
        let ethertype = u16::from(frame.ethertype());
        let mut parsed = ParsedPacket {
            dl_src: MacAddress::new(frame.src_addr().0),
            dl_dst: MacAddress::new(frame.dst_addr().0),
            ethertype,
            ipv4: None,
            transport: None,
            dhcp: None,
        };

        if frame.ethertype() != EthernetProtocol::Ipv4 {
            return Ok(parsed);
        }

        let ip = Ipv4Packet::new_checked(frame.payload()).map_err(PacketError::malformed("ipv4"))?;
        let protocol = u8::from(ip.next_header());
        parsed.ipv4 = Some(Ipv4Header {
            src: Ipv4Addr::from(ip.src_addr().0),
            dst: Ipv4Addr::from(ip.dst_addr().0),
            protocol,
        });

        // Only the first fragment carries the transport header.
        if ip.frag_offset() != 0 {
            return Ok(parsed);
        }

        match ip.next_header() {
            IpProtocol::Udp => {
                let udp = UdpPacket::new_checked(ip.payload()).map_err(PacketError::malformed("udp"))?;
                parsed.transport = Some(TransportPorts {
                    src: udp.src_port(),
                    dst: udp.dst_port(),
                });
                if udp.src_port() == DHCP_CLIENT_PORT && udp.dst_port() == DHCP_SERVER_PORT {
                    let dhcp = DhcpPacket::new_checked(udp.payload())
                        .map_err(PacketError::malformed("dhcp"))?;
                    parsed.dhcp = Some(DhcpMessage {
                        opcode: u8::from(dhcp.opcode()),
                        payload: udp.payload().to_vec(),
                    });
                }
            }
            IpProtocol::Tcp => {
                let tcp = TcpPacket::new_checked(ip.payload()).map_err(PacketError::malformed("tcp"))?;
                parsed.transport = Some(TransportPorts {
                    src: tcp.src_port(),
                    dst: tcp.dst_port(),
                });
            }
            IpProtocol::Icmp => {
                let icmp =
                    Icmpv4Packet::new_checked(ip.payload()).map_err(PacketError::malformed("icmp"))?;
                parsed.transport = Some(TransportPorts {
                    src: u16::from(u8::from(icmp.msg_type())),
                    dst: u16::from(icmp.msg_code()),
                });
            }
            _ => {}
        }

        Ok(parsed)
    }

    pub fn is_ipv4(&self) -> bool {
        self.ipv4.is_some()
    }

    /// A DHCP bootrequest sent from the client port to the server port.
    pub fn dhcp_bootrequest(&self) -> Option<&DhcpMessage> {
        self.dhcp.as_ref().filter(|dhcp| dhcp.is_bootrequest())
    }

    /// The exact match of this packet arriving on `in_port`.
    pub fn flow_match(&self, in_port: PortNumber) -> FlowMatch {
        let mut m = FlowMatch::new()
            .with_in_port(in_port)
            .with_dl_src(self.dl_src)
            .with_dl_dst(self.dl_dst)
            .with_dl_type(self.ethertype);

        if let Some(ip) = &self.ipv4 {
            m.nw_proto = Some(ip.protocol);
            m.nw_src = Some(ip.src);
            m.nw_dst = Some(ip.dst);
        }
        if let Some(ports) = &self.transport {
            m.tp_src = Some(ports.src);
            m.tp_dst = Some(ports.dst);
        }
        m
    }
}
