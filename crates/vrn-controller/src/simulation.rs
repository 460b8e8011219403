//! Contract with the routing and filtering simulation engine.

use crate::packet::ParsedPacket;
use crate::ports::VirtualPort;
use std::collections::HashSet;
use std::net::Ipv4Addr;
use thiserror::Error;
use vrn_datapath::FlowMatch;
use vrn_types::{ElementId, PortId};

/// Forwarding decision for one packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Drop silently.
    Blackhole,
    /// The engine handled the packet itself.
    Consumed,
    /// Forward through `out_port`, which is a local port, a portset or a
    /// port on another host.
    Forward {
        out_port: PortId,
        next_hop: Ipv4Addr,
    },
    NotIpv4,
    NoRoute,
    Reject,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SimulationError {
    #[error("simulation failed: {0}")]
    Failed(String),

    #[error("unknown forwarding element {0}")]
    UnknownElement(ElementId),

    #[error("unknown port {0}")]
    UnknownPort(PortId),
}

/// Per-packet context handed to the engine.
#[derive(Debug, Clone)]
pub struct ForwardInfo {
    pub in_port_id: PortId,
    /// Match of the packet as received. Never modified.
    pub flow_match: FlowMatch,
    /// Match the packet should have on egress. The engine rewrites it for
    /// NAT-like effects.
    pub match_out: FlowMatch,
    pub packet: ParsedPacket,
    /// Elements that processed the packet, filled in by the engine.
    pub notify_elements: HashSet<ElementId>,
}

impl ForwardInfo {
    pub fn new(in_port_id: PortId, flow_match: FlowMatch, packet: ParsedPacket) -> Self {
        Self {
            in_port_id,
            match_out: flow_match.clone(),
            flow_match,
            packet,
            notify_elements: HashSet::new(),
        }
    }
}

/// The virtual topology simulation.
///
/// Called synchronously from the event loop; implementations must not block.
pub trait Simulation: Send {
    fn process(&mut self, info: &mut ForwardInfo) -> Result<Verdict, SimulationError>;

    /// Frees whatever `element` holds for the flow `flow_match`.
    fn free_flow_resources(
        &mut self,
        element: ElementId,
        flow_match: &FlowMatch,
    ) -> Result<(), SimulationError>;

    fn add_port(&mut self, port: &VirtualPort) -> Result<(), SimulationError>;

    fn remove_port(&mut self, port: &VirtualPort) -> Result<(), SimulationError>;
}

/// An engine with an empty topology: nothing is routable.
#[derive(Debug, Default)]
pub struct EmptyTopology {
    ports: HashSet<PortId>,
}

impl EmptyTopology {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Simulation for EmptyTopology {
    fn process(&mut self, info: &mut ForwardInfo) -> Result<Verdict, SimulationError> {
        if !self.ports.contains(&info.in_port_id) {
            return Err(SimulationError::UnknownPort(info.in_port_id));
        }
        if info.packet.is_ipv4() {
            Ok(Verdict::NoRoute)
        } else {
            Ok(Verdict::NotIpv4)
        }
    }

    fn free_flow_resources(
        &mut self,
        element: ElementId,
        _flow_match: &FlowMatch,
    ) -> Result<(), SimulationError> {
        Err(SimulationError::UnknownElement(element))
    }

    fn add_port(&mut self, port: &VirtualPort) -> Result<(), SimulationError> {
        self.ports.insert(port.id);
        Ok(())
    }

    fn remove_port(&mut self, port: &VirtualPort) -> Result<(), SimulationError> {
        if self.ports.remove(&port.id) {
            Ok(())
        } else {
            Err(SimulationError::UnknownPort(port.id))
        }
    }
}
