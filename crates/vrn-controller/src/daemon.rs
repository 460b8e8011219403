//! Serialized event loop.
//!
//! Every input of the controller (datapath events, resolver answers, port
//! and tunnel lifecycle notifications) arrives as a [`ControllerEvent`] on a
//! single bounded channel. One task owns the [`VrnController`] and handles
//! the events one at a time, so no controller state is ever shared.

use crate::config::{DaemonConfig, ResolutionConfig};
use crate::controller::VrnController;
use crate::error::{ControllerError, Result};
use crate::ports::VirtualPort;
use crate::resolution::{AddressResolver, ResolutionToken};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use vrn_datapath::{FlowRemoved, PacketIn};
use vrn_types::{MacAddress, PortId, PortNumber};

/// Input of the event loop.
#[derive(Debug)]
pub enum ControllerEvent {
    PacketIn(PacketIn),
    FlowRemoved(FlowRemoved),
    AddressResolved {
        token: ResolutionToken,
        mac: Option<MacAddress>,
    },
    PortAttached(VirtualPort),
    PortDetached(PortId),
    TunnelPortAdded {
        number: PortNumber,
        peer: Ipv4Addr,
    },
    TunnelPortRemoved(PortNumber),
    /// A virtual port on another host became known.
    PortLocated {
        port: PortId,
        host: Ipv4Addr,
    },
    PortUnlocated(PortId),
    /// A host started participating in a portset.
    PortSetParticipantAdded {
        portset: PortId,
        host: Ipv4Addr,
    },
    PortSetParticipantRemoved {
        portset: PortId,
        host: Ipv4Addr,
    },
    PortSetJoined {
        portset: PortId,
        port: PortNumber,
    },
    PortSetLeft {
        portset: PortId,
        port: PortNumber,
    },
    Shutdown,
}

/// Creates the event channel, bounded by the configured queue depth.
pub fn event_channel(
    config: &DaemonConfig,
) -> (mpsc::Sender<ControllerEvent>, mpsc::Receiver<ControllerEvent>) {
    mpsc::channel(config.event_queue_depth.max(1))
}

/// Resolver that answers from a static neighbor table.
///
/// Each request is answered by a spawned task that posts
/// [`ControllerEvent::AddressResolved`] back onto the event channel: at once
/// for a known neighbor, after the timeout with no address otherwise.
/// `resolve` must be called from within a Tokio runtime.
#[derive(Debug, Clone)]
pub struct ChannelResolver {
    events: mpsc::Sender<ControllerEvent>,
    neighbors: HashMap<Ipv4Addr, MacAddress>,
    timeout: Duration,
}

impl ChannelResolver {
    pub fn new(events: mpsc::Sender<ControllerEvent>, config: &ResolutionConfig) -> Self {
        let neighbors = config
            .static_neighbors
            .iter()
            .map(|n| (n.address, n.mac))
            .collect();

        Self {
            events,
            neighbors,
            timeout: Duration::from_millis(config.timeout_ms),
        }
    }
}

impl AddressResolver for ChannelResolver {
    fn resolve(&mut self, token: ResolutionToken, port: PortId, next_hop: Ipv4Addr) {
        let events = self.events.clone();
        let mac = self.neighbors.get(&next_hop).copied();
        let timeout = self.timeout;

        tokio::spawn(async move {
            if mac.is_none() {
                tokio::time::sleep(timeout).await;
                debug!(token = %token, port = %port, next_hop = %next_hop, "resolution timed out");
            }
            if events
                .send(ControllerEvent::AddressResolved { token, mac })
                .await
                .is_err()
            {
                debug!(token = %token, "event loop gone, dropping resolution answer");
            }
        });
    }
}

/// Owns the controller and feeds it events until shutdown.
pub struct EventLoop {
    controller: VrnController,
    events: mpsc::Receiver<ControllerEvent>,
}

impl EventLoop {
    pub fn new(controller: VrnController, events: mpsc::Receiver<ControllerEvent>) -> Self {
        Self { controller, events }
    }

    pub fn controller(&self) -> &VrnController {
        &self.controller
    }

    /// Runs until a [`ControllerEvent::Shutdown`] is received and returns
    /// the controller. Fails if every sender is dropped first.
    pub async fn run(mut self) -> Result<VrnController> {
        info!(datapath_id = self.controller.datapath_id(), "event loop started");

        while let Some(event) = self.events.recv().await {
            if !self.dispatch(event) {
                let stats = self.controller.stats();
                info!(
                    packets_in = stats.packets_in,
                    flows_installed = stats.flows_installed,
                    blackholes_installed = stats.blackholes_installed,
                    pending = self.controller.pending_resolutions(),
                    "event loop stopped"
                );
                return Ok(self.controller);
            }
        }

        warn!("event channel closed without shutdown");
        Err(ControllerError::ChannelClosed)
    }

    /// Handles one event. Returns `false` once the loop should stop.
    pub fn dispatch(&mut self, event: ControllerEvent) -> bool {
        match event {
            ControllerEvent::PacketIn(packet_in) => self.controller.on_packet_in(packet_in),
            ControllerEvent::FlowRemoved(removed) => self.controller.on_flow_removed(removed),
            ControllerEvent::AddressResolved { token, mac } => {
                self.controller.on_address_resolved(token, mac)
            }
            ControllerEvent::PortAttached(port) => self.controller.add_virtual_port(port),
            ControllerEvent::PortDetached(id) => self.controller.delete_virtual_port(&id),
            ControllerEvent::TunnelPortAdded { number, peer } => {
                self.controller.add_tunnel_port(number, peer)
            }
            ControllerEvent::TunnelPortRemoved(number) => self.controller.remove_tunnel_port(number),
            ControllerEvent::PortLocated { port, host } => {
                self.controller.set_port_location(port, host)
            }
            ControllerEvent::PortUnlocated(port) => self.controller.clear_port_location(&port),
            ControllerEvent::PortSetParticipantAdded { portset, host } => {
                self.controller.add_portset_participant(portset, host)
            }
            ControllerEvent::PortSetParticipantRemoved { portset, host } => {
                self.controller.remove_portset_participant(&portset, host)
            }
            ControllerEvent::PortSetJoined { portset, port } => {
                self.controller.join_portset(portset, port)
            }
            ControllerEvent::PortSetLeft { portset, port } => {
                self.controller.leave_portset(&portset, port)
            }
            ControllerEvent::Shutdown => {
                info!("shutdown requested");
                return false;
            }
        }
        true
    }
}
