//! Pluggable flow policies and notifications.

use crate::packet::ParsedPacket;
use std::collections::HashSet;
use vrn_datapath::FlowMatch;
use vrn_types::{ElementId, PortId};

/// The kind of flow a match is about to be installed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowScope {
    /// Drop flow for a blackhole verdict.
    Blackhole,
    /// Forwarding flow out of a local port.
    LocalForward,
    /// Forwarding flow for a packet that arrived through a tunnel.
    TunnelForward,
}

/// ICMP destination-unreachable codes the controller may ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnreachableCode {
    Net = 0,
    Host = 1,
    FilterProhibited = 13,
}

/// Hooks consulted by the forwarding decision executor.
pub trait ForwardingPolicy: Send {
    /// Match to install instead of the exact `flow_match`.
    fn widen(&self, flow_match: &FlowMatch, _scope: FlowScope) -> FlowMatch {
        flow_match.clone()
    }

    /// Called when a packet is dropped for a reason the sender could be told
    /// about.
    fn unreachable(&mut self, _code: UnreachableCode, _ingress: PortId, _packet: &ParsedPacket) {}
}

/// Exact-match flows, no ICMP errors.
#[derive(Debug, Default)]
pub struct ExactMatch;

impl ForwardingPolicy for ExactMatch {}

/// Keeps only the network-layer identity of a flow: ingress port, ethertype,
/// protocol and both network addresses. Link-layer addresses and transport
/// ports are wildcarded.
#[derive(Debug, Default)]
pub struct NetworkWildcards;

impl ForwardingPolicy for NetworkWildcards {
    fn widen(&self, flow_match: &FlowMatch, _scope: FlowScope) -> FlowMatch {
        FlowMatch {
            in_port: flow_match.in_port,
            dl_type: flow_match.dl_type,
            nw_proto: flow_match.nw_proto,
            nw_src: flow_match.nw_src,
            nw_dst: flow_match.nw_dst,
            ..FlowMatch::default()
        }
    }
}

/// A flow (or drop rule) that was just installed.
#[derive(Debug, Clone, Copy)]
pub struct FlowInstalled<'a> {
    /// Match of the packet that triggered the install.
    pub original: &'a FlowMatch,
    /// Match the flow was installed with.
    pub installed: &'a FlowMatch,
    pub in_port: PortId,
    pub elements: &'a HashSet<ElementId>,
}

/// Receives install notifications, e.g. for a flow checker.
pub trait FlowObserver: Send {
    fn flow_installed(&mut self, event: &FlowInstalled<'_>);
}
