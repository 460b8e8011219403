//! Deferred, resolution-gated flow installation.
//!
//! Forwarding out of a local port needs the next hop's MAC address. The
//! controller parks the packet's context as a [`Continuation`], asks the
//! [`AddressResolver`] for the address and returns. The resolver answers
//! later, once, through [`VrnController::on_address_resolved`], which takes
//! the continuation out of [`PendingResolutions`] and finishes the packet.

use crate::controller::{incr, VrnController};
use crate::executor::compute_actions;
use crate::packet::ParsedPacket;
use crate::policy::{FlowScope, UnreachableCode};
use crate::ports::VirtualPort;
use crate::simulation::ForwardInfo;
use crate::tunnel::TunnelHeader;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::net::Ipv4Addr;
use tracing::{debug, instrument, warn};
use vrn_datapath::{BufferId, FlowMatch};
use vrn_types::{MacAddress, PortId, PortNumber};

/// Identifies one outstanding resolution request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResolutionToken(u64);

impl ResolutionToken {
    pub const fn new(raw: u64) -> Self {
        ResolutionToken(raw)
    }

    pub const fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ResolutionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Resolves next-hop IPv4 addresses to MAC addresses.
pub trait AddressResolver: Send {
    /// Starts resolving `next_hop` as seen from virtual port `port`.
    ///
    /// Must not call back into the controller. The outcome is reported by a
    /// single later `on_address_resolved(token, ..)` call: `Some(mac)` on
    /// success, `None` on timeout.
    fn resolve(&mut self, token: ResolutionToken, port: PortId, next_hop: Ipv4Addr);
}

/// A packet that arrived through a tunnel and waits for its next hop.
#[derive(Debug)]
pub struct TunnelledPacket {
    pub buffer: BufferId,
    pub in_port: PortNumber,
    pub data: Vec<u8>,
    pub packet: ParsedPacket,
    /// Match of the packet as received from the tunnel.
    pub flow_match: FlowMatch,
    pub header: TunnelHeader,
}

/// A packet from a local port, forwarded to another local port.
#[derive(Debug)]
pub struct LocalPacket {
    pub buffer: BufferId,
    pub ingress: VirtualPort,
    pub data: Vec<u8>,
    pub egress: PortId,
    pub info: ForwardInfo,
}

/// Suspended processing of one packet. Consumed when resumed.
#[derive(Debug)]
pub enum Continuation {
    Tunnelled(TunnelledPacket),
    Local(LocalPacket),
}

impl Continuation {
    pub fn buffer(&self) -> BufferId {
        match self {
            Continuation::Tunnelled(p) => p.buffer,
            Continuation::Local(p) => p.buffer,
        }
    }
}

/// Continuations waiting for a resolver answer.
#[derive(Debug, Default)]
pub struct PendingResolutions {
    next_token: u64,
    pending: HashMap<ResolutionToken, Continuation>,
}

impl PendingResolutions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, continuation: Continuation) -> ResolutionToken {
        let token = ResolutionToken(self.next_token);
        self.next_token = self.next_token.wrapping_add(1);
        self.pending.insert(token, continuation);
        token
    }

    /// Removes the continuation for `token`. A token yields its
    /// continuation at most once.
    pub fn take(&mut self, token: ResolutionToken) -> Option<Continuation> {
        self.pending.remove(&token)
    }

    pub fn contains(&self, token: ResolutionToken) -> bool {
        self.pending.contains_key(&token)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl VrnController {
    pub(crate) fn request_resolution(
        &mut self,
        port: PortId,
        next_hop: Ipv4Addr,
        continuation: Continuation,
    ) {
        let token = self.pending.register(continuation);
        incr(&mut self.stats.resolutions_started);
        debug!(token = %token, port = %port, next_hop = %next_hop, "resolving next hop");
        self.resolver.resolve(token, port, next_hop);
    }

    /// Resumes the packet waiting on `token`.
    #[instrument(skip_all, fields(token = %token))]
    pub fn on_address_resolved(&mut self, token: ResolutionToken, mac: Option<MacAddress>) {
        let Some(continuation) = self.pending.take(token) else {
            warn!("resolution answer for unknown token");
            return;
        };

        match mac {
            Some(_) => incr(&mut self.stats.resolutions_succeeded),
            None => incr(&mut self.stats.resolutions_failed),
        }

        match (continuation, mac) {
            (Continuation::Tunnelled(p), Some(mac)) => self.resume_tunnelled(p, mac),
            (Continuation::Tunnelled(p), None) => self.abort_tunnelled(p),
            (Continuation::Local(p), Some(mac)) => self.resume_local(p, mac),
            (Continuation::Local(p), None) => self.abort_local(p),
        }
    }

    fn resume_tunnelled(&mut self, p: TunnelledPacket, mac: MacAddress) {
        let Some(egress) = self.ports.by_id(&p.header.egress) else {
            warn!(egress = %p.header.egress, "egress port went away during resolution");
            self.drop_packet(p.buffer);
            return;
        };

        let mut rewritten = p.flow_match.clone();
        rewritten.dl_src = Some(egress.mac);
        rewritten.dl_dst = Some(mac);
        let actions = compute_actions(&p.flow_match, &rewritten, [egress.number]);

        if p.header.is_icmp_relay() {
            debug!("relaying peer ICMP error without installing a flow");
            if let Err(e) = self.datapath.packet_out(p.buffer, p.in_port, &actions, &p.data) {
                warn!(error = %e, "packet_out failed");
                incr(&mut self.stats.datapath_errors);
            }
            return;
        }

        let flow_match = self.policy.widen(&p.flow_match, FlowScope::TunnelForward);
        if self.install_flow(flow_match.clone(), p.buffer, actions, &p.data) {
            self.flows.record(flow_match, HashSet::new());
        }
    }

    fn abort_tunnelled(&mut self, p: TunnelledPacket) {
        debug!(next_hop = %p.header.next_hop, "resolution timed out for tunnelled packet");
        self.install_blackhole(&p.flow_match, p.buffer);
        self.policy
            .unreachable(UnreachableCode::Host, p.header.ingress, &p.packet);
    }

    fn resume_local(&mut self, p: LocalPacket, mac: MacAddress) {
        let LocalPacket {
            buffer,
            ingress,
            data,
            egress,
            mut info,
        } = p;

        let Some(egress) = self.ports.by_id(&egress).cloned() else {
            warn!(egress = %egress, "egress port went away during resolution");
            self.release_elements(&info.flow_match, &info.notify_elements);
            self.drop_packet(buffer);
            return;
        };

        info.match_out.dl_src = Some(egress.mac);
        info.match_out.dl_dst = Some(mac);
        let actions = compute_actions(&info.flow_match, &info.match_out, [egress.number]);

        let flow_match = self.policy.widen(&info.flow_match, FlowScope::LocalForward);
        if !self.install_flow(flow_match.clone(), buffer, actions, &data) {
            self.release_elements(&info.flow_match, &info.notify_elements);
            return;
        }
        self.notify_installed(&info.flow_match, &flow_match, ingress.id, &info.notify_elements);
        self.flows.record(flow_match, info.notify_elements);
    }

    fn abort_local(&mut self, p: LocalPacket) {
        let info = &p.info;
        debug!(flow = %info.flow_match, "resolution timed out for local packet");
        self.install_blackhole(&info.flow_match, p.buffer);
        self.release_elements(&info.flow_match, &info.notify_elements);
        self.policy
            .unreachable(UnreachableCode::Host, p.ingress.id, &info.packet);
    }
}
