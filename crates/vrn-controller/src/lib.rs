//! Virtual router forwarding controller.
//!
//! Handles the packet-in events of one managed datapath. A packet that
//! misses the flow table is classified (local virtual port, inter-host
//! tunnel, or unknown), run through the topology simulation, and turned
//! into a flow, a drop rule, or a deferred install that waits for next-hop
//! address resolution. Flow-removed events release the per-flow state the
//! simulation's forwarding elements hold.
//!
//! # Architecture
//!
//! ```text
//! datapath ──PacketIn──▶ VrnController::on_packet_in
//!                          │  tunnel?  ──▶ decode_tunnel_macs ──▶ resolve ─┐
//!                          │  DHCP?    ──▶ DhcpHandler                     │
//!                          ▼                                               │
//!                       Simulation::process ──▶ execute_verdict            │
//!                                                 │ local ──▶ resolve ─────┤
//!                                                 │ portset / tunnel       │
//!                                                 ▼                        ▼
//!                                        Datapath::flow_add ◀── on_address_resolved
//!
//! datapath ──FlowRemoved──▶ FlowTracker::release ──▶ Simulation::free_flow_resources
//! ```
//!
//! All handlers run in one serialized context; see [`daemon`] for the
//! channel-driven event loop used by the `vrnd` binary.

pub mod config;
pub mod controller;
pub mod daemon;
pub mod dhcp;
pub mod error;
pub mod executor;
pub mod flow_tracker;
pub mod packet;
pub mod policy;
pub mod ports;
pub mod portset;
pub mod resolution;
pub mod simulation;
pub mod tunnel;
pub mod tunnels;

pub use config::ControllerConfig;
pub use controller::{Collaborators, ControllerStats, VrnController};
pub use daemon::{ChannelResolver, ControllerEvent, EventLoop};
pub use dhcp::{DhcpHandler, DiscardDhcp};
pub use error::{ControllerError, Result};
pub use executor::compute_actions;
pub use flow_tracker::FlowTracker;
pub use packet::{PacketError, ParsedPacket};
pub use policy::{
    ExactMatch, FlowInstalled, FlowObserver, FlowScope, ForwardingPolicy, NetworkWildcards,
    UnreachableCode,
};
pub use ports::{PortManager, VirtualPort};
pub use portset::{LocalPortSets, PortSetMap, PortSetMembership, PortSetResolver};
pub use resolution::{AddressResolver, Continuation, PendingResolutions, ResolutionToken};
pub use simulation::{EmptyTopology, ForwardInfo, Simulation, SimulationError, Verdict};
pub use tunnel::{decode_tunnel_macs, encode_tunnel_macs, TunnelHeader, ICMP_TUNNEL_ID};
pub use tunnels::{TunnelPortTable, TunnelPorts};
