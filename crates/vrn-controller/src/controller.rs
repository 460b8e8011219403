//! The per-datapath controller and its packet-in dispatcher.
//!
//! `VrnController` owns all mutable forwarding state of one managed datapath:
//! the virtual port indices, the tunnel table, the local portset slices, the
//! flow tracker and the pending resolutions. Every handler runs to completion
//! on the caller's thread; address resolution is the only suspension point
//! and resumes through [`VrnController::on_address_resolved`].

use crate::config::{ControllerConfig, FlowConfig};
use crate::dhcp::DhcpHandler;
use crate::flow_tracker::FlowTracker;
use crate::packet::{ParsedPacket, ETHERTYPE_IPV4, IP_PROTO_UDP};
use crate::policy::{ExactMatch, FlowObserver, ForwardingPolicy, NetworkWildcards};
use crate::ports::{PortManager, VirtualPort};
use crate::portset::{LocalPortSets, PortSetMembership};
use crate::resolution::{AddressResolver, Continuation, PendingResolutions, TunnelledPacket};
use crate::simulation::{ForwardInfo, Simulation};
use crate::tunnel::decode_tunnel_macs;
use crate::tunnels::{TunnelPortTable, TunnelPorts};
use std::net::Ipv4Addr;
use tracing::{debug, error, info, instrument, warn};
use vrn_datapath::{
    BufferId, Datapath, FlowAction, FlowMatch, FlowMod, FlowRemoved, PacketIn,
};
use vrn_types::{PortId, PortNumber};

/// Priority of forwarding and drop flows.
pub const FLOW_PRIORITY: u16 = 0;
/// Priority of the service flows installed on port attach.
pub const SERVICE_FLOW_PRIORITY: u16 = 1;
/// Bytes of a DHCP request punted to the controller.
pub const DHCP_PUNT_MAX_LEN: u16 = 1024;

const DHCP_CLIENT_PORT: u16 = 68;
const DHCP_SERVER_PORT: u16 = 67;

/// External collaborators of the controller.
pub struct Collaborators {
    pub datapath: Box<dyn Datapath>,
    pub simulation: Box<dyn Simulation>,
    pub resolver: Box<dyn AddressResolver>,
    pub dhcp: Box<dyn DhcpHandler>,
    pub portsets: Box<dyn PortSetMembership>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControllerStats {
    pub packets_in: u64,
    pub packets_dropped: u64,
    pub malformed_packets: u64,
    pub dhcp_requests: u64,
    pub simulation_errors: u64,
    pub flows_installed: u64,
    pub blackholes_installed: u64,
    pub resolutions_started: u64,
    pub resolutions_succeeded: u64,
    pub resolutions_failed: u64,
    pub flows_removed: u64,
    pub element_cleanup_failures: u64,
    pub datapath_errors: u64,
}

pub(crate) fn incr(counter: &mut u64) {
    *counter = counter.saturating_add(1);
}

pub struct VrnController {
    pub(crate) datapath_id: u64,
    pub(crate) local_address: Ipv4Addr,
    pub(crate) flow_config: FlowConfig,
    pub(crate) datapath: Box<dyn Datapath>,
    pub(crate) simulation: Box<dyn Simulation>,
    pub(crate) resolver: Box<dyn AddressResolver>,
    pub(crate) dhcp: Box<dyn DhcpHandler>,
    pub(crate) portsets: Box<dyn PortSetMembership>,
    pub(crate) policy: Box<dyn ForwardingPolicy>,
    pub(crate) observer: Option<Box<dyn FlowObserver>>,
    pub(crate) ports: PortManager,
    pub(crate) tunnels: TunnelPortTable,
    pub(crate) local_portsets: LocalPortSets,
    pub(crate) flows: FlowTracker,
    pub(crate) pending: PendingResolutions,
    pub(crate) service_target: Option<PortNumber>,
    pub(crate) stats: ControllerStats,
}

impl VrnController {
    pub fn new(config: &ControllerConfig, collaborators: Collaborators) -> Self {
        let policy: Box<dyn ForwardingPolicy> = if config.flows.wildcard_flows {
            Box::new(NetworkWildcards)
        } else {
            Box::new(ExactMatch)
        };

        Self {
            datapath_id: config.controller.datapath_id,
            local_address: config.controller.local_address,
            flow_config: config.flows.clone(),
            datapath: collaborators.datapath,
            simulation: collaborators.simulation,
            resolver: collaborators.resolver,
            dhcp: collaborators.dhcp,
            portsets: collaborators.portsets,
            policy,
            observer: None,
            ports: PortManager::new(),
            tunnels: TunnelPortTable::new(),
            local_portsets: LocalPortSets::new(),
            flows: FlowTracker::new(),
            pending: PendingResolutions::new(),
            service_target: None,
            stats: ControllerStats::default(),
        }
    }

    pub fn with_policy(mut self, policy: Box<dyn ForwardingPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_observer(mut self, observer: Box<dyn FlowObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn datapath_id(&self) -> u64 {
        self.datapath_id
    }

    pub fn stats(&self) -> &ControllerStats {
        &self.stats
    }

    pub fn ports(&self) -> &PortManager {
        &self.ports
    }

    pub fn tunnels(&self) -> &TunnelPortTable {
        &self.tunnels
    }

    pub fn flows(&self) -> &FlowTracker {
        &self.flows
    }

    pub fn pending_resolutions(&self) -> usize {
        self.pending.len()
    }

    /// Port substituted for packets punted from the `LOCAL` port by service
    /// flows.
    pub fn set_service_target(&mut self, port: PortNumber) {
        info!(port = %port, "service target port set");
        self.service_target = Some(port);
    }

    /// Handles a packet the datapath could not match.
    #[instrument(skip_all, fields(in_port = %packet_in.in_port, buffer = %packet_in.buffer))]
    pub fn on_packet_in(&mut self, packet_in: PacketIn) {
        incr(&mut self.stats.packets_in);
        let PacketIn {
            buffer,
            total_len,
            mut in_port,
            data,
            ..
        } = packet_in;

        if in_port == PortNumber::LOCAL {
            if let Some(target) = self.service_target {
                debug!(target = %target, "rewriting LOCAL ingress to service target");
                in_port = target;
            }
        }

        let from_tunnel = self.tunnels.is_tunnel_port(in_port);
        let ingress = self.ports.by_number(in_port).cloned();
        if ingress.is_none() && !from_tunnel {
            warn!(port = %in_port, "dropping packet from port that is neither virtual nor a tunnel");
            self.drop_packet(buffer);
            return;
        }

        let packet = match ParsedPacket::parse(&data) {
            Ok(packet) => packet,
            Err(e) => {
                warn!(port = %in_port, error = %e, "dropping malformed packet");
                incr(&mut self.stats.malformed_packets);
                self.drop_packet(buffer);
                return;
            }
        };
        let flow_match = packet.flow_match(in_port);
        debug!(len = total_len, flow = %flow_match, "packet in");

        let ingress = match ingress {
            Some(port) if !from_tunnel => port,
            _ => {
                self.on_tunnelled_packet(buffer, in_port, data, packet, flow_match);
                return;
            }
        };

        if let Some(request) = packet.dhcp_bootrequest() {
            debug!(port = %ingress.id, "delegating DHCP bootrequest");
            incr(&mut self.stats.dhcp_requests);
            self.dhcp.handle_request(&ingress, request, packet.dl_src);
            self.free_buffer(buffer);
            return;
        }

        if packet.dl_dst != ingress.mac && !packet.dl_dst.is_multicast() {
            warn!(
                dl_dst = %packet.dl_dst,
                port_mac = %ingress.mac,
                "dl_dst is neither multicast nor the ingress port's address"
            );
            incr(&mut self.stats.packets_dropped);
            self.install_blackhole(&flow_match, buffer);
            return;
        }

        let mut info = ForwardInfo::new(ingress.id, flow_match, packet);
        let verdict = match self.simulation.process(&mut info) {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!(error = %e, flow = %info.flow_match, "simulation failed, dropping packet");
                incr(&mut self.stats.simulation_errors);
                self.drop_packet(buffer);
                self.release_elements(&info.flow_match, &info.notify_elements);
                return;
            }
        };

        debug!(verdict = ?verdict, "simulation verdict");
        self.execute_verdict(verdict, buffer, ingress, data, info);
    }

    fn on_tunnelled_packet(
        &mut self,
        buffer: BufferId,
        in_port: PortNumber,
        data: Vec<u8>,
        packet: ParsedPacket,
        flow_match: FlowMatch,
    ) {
        let header = decode_tunnel_macs(packet.dl_src, packet.dl_dst);
        debug!(tunnel = %in_port, header = %header, "packet from tunnel");

        let Some(egress) = self.ports.by_id(&header.egress) else {
            warn!(egress = %header.egress, "tunnelled packet's egress port is not local");
            incr(&mut self.stats.packets_dropped);
            return;
        };

        let egress = egress.id;
        let continuation = Continuation::Tunnelled(TunnelledPacket {
            buffer,
            in_port,
            data,
            packet,
            flow_match,
            header,
        });
        self.request_resolution(egress, header.next_hop, continuation);
    }

    /// Retires a flow reported removed by the datapath.
    #[instrument(skip_all, fields(reason = %removed.reason))]
    pub fn on_flow_removed(&mut self, removed: FlowRemoved) {
        incr(&mut self.stats.flows_removed);
        let elements = self.flows.release(&removed.flow_match);
        debug!(
            flow = %removed.flow_match,
            elements = elements.len(),
            packets = removed.packet_count,
            "flow removed"
        );
        self.release_elements(&removed.flow_match, &elements);
    }

    /// Attaches a virtual port: indexes it, registers it with the simulation
    /// and installs its DHCP punt flow.
    pub fn add_virtual_port(&mut self, port: VirtualPort) {
        if let Err(e) = self.ports.attach(port.clone()) {
            error!(port = %port.id, number = %port.number, error = %e, "cannot attach virtual port");
            return;
        }
        info!(port = %port.id, number = %port.number, mac = %port.mac, "virtual port attached");

        if let Err(e) = self.simulation.add_port(&port) {
            warn!(port = %port.id, error = %e, "simulation did not accept port");
        }

        let punt = FlowMatch::new()
            .with_in_port(port.number)
            .with_dl_type(ETHERTYPE_IPV4)
            .with_nw_proto(IP_PROTO_UDP)
            .with_tp_src(DHCP_CLIENT_PORT)
            .with_tp_dst(DHCP_SERVER_PORT);
        let flow = FlowMod::permanent(
            punt,
            SERVICE_FLOW_PRIORITY,
            vec![FlowAction::Controller {
                max_len: DHCP_PUNT_MAX_LEN,
            }],
        );
        if let Err(e) = self.datapath.flow_add(flow) {
            warn!(port = %port.id, error = %e, "failed to install DHCP punt flow");
            incr(&mut self.stats.datapath_errors);
        }
    }

    pub fn delete_virtual_port(&mut self, id: &PortId) {
        let port = match self.ports.detach(id) {
            Ok(port) => port,
            Err(e) => {
                error!(port = %id, error = %e, "cannot detach virtual port");
                return;
            }
        };
        info!(port = %port.id, number = %port.number, "virtual port detached");

        if let Err(e) = self.simulation.remove_port(&port) {
            warn!(port = %port.id, error = %e, "simulation did not release port");
        }
        self.local_portsets.leave_all(port.number);
    }

    pub fn add_tunnel_port(&mut self, number: PortNumber, peer: Ipv4Addr) {
        self.tunnels.add_tunnel_port(number, peer);
    }

    pub fn remove_tunnel_port(&mut self, number: PortNumber) {
        if self.tunnels.remove_tunnel_port(number).is_none() {
            warn!(port = %number, "removing unknown tunnel port");
        }
    }

    /// Records the host of a virtual port that is not attached here.
    pub fn set_port_location(&mut self, port: PortId, host: Ipv4Addr) {
        self.tunnels.set_port_location(port, host);
    }

    /// Forgets the host of a remote virtual port. Later forwards to it are
    /// dropped until it is located again.
    pub fn clear_port_location(&mut self, port: &PortId) {
        if self.tunnels.clear_port_location(port).is_none() {
            warn!(port = %port, "clearing location of unknown port");
        }
    }

    pub fn add_portset_participant(&mut self, portset: PortId, host: Ipv4Addr) {
        debug!(portset = %portset, host = %host, "portset participant added");
        self.portsets.add_participant(portset, host);
    }

    pub fn remove_portset_participant(&mut self, portset: &PortId, host: Ipv4Addr) {
        if !self.portsets.remove_participant(portset, &host) {
            warn!(portset = %portset, host = %host, "host was not a portset participant");
        }
    }

    /// Adds a local datapath port to a portset's local slice.
    pub fn join_portset(&mut self, portset: PortId, port: PortNumber) {
        if self.local_portsets.join(portset, port) {
            debug!(portset = %portset, port = %port, "port joined portset");
        }
    }

    pub fn leave_portset(&mut self, portset: &PortId, port: PortNumber) {
        if !self.local_portsets.leave(portset, port) {
            warn!(portset = %portset, port = %port, "port was not in portset");
        }
    }

    pub(crate) fn free_buffer(&mut self, buffer: BufferId) {
        if !buffer.is_buffered() {
            return;
        }
        if let Err(e) = self.datapath.free_buffer(buffer) {
            warn!(buffer = %buffer, error = %e, "failed to free buffer");
            incr(&mut self.stats.datapath_errors);
        }
    }

    pub(crate) fn drop_packet(&mut self, buffer: BufferId) {
        incr(&mut self.stats.packets_dropped);
        self.free_buffer(buffer);
    }
}
