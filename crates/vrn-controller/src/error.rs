//! Error types for the controller.

use crate::packet::PacketError;
use crate::simulation::SimulationError;
use thiserror::Error;
use vrn_datapath::DatapathError;
use vrn_types::{PortId, PortNumber};

/// Controller errors.
///
/// Event handlers never surface these; they are returned by setup and
/// registry operations and logged by the handlers.
#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Packet error: {0}")]
    Packet(#[from] PacketError),

    #[error("Datapath error: {0}")]
    Datapath(#[from] DatapathError),

    #[error("Simulation error: {0}")]
    Simulation(#[from] SimulationError),

    #[error("virtual port {0} is already attached")]
    DuplicatePort(PortId),

    #[error("datapath port {0} is already in use")]
    DuplicatePortNumber(PortNumber),

    #[error("virtual port {0} is not attached")]
    UnknownPort(PortId),

    #[error("event channel closed")]
    ChannelClosed,
}

/// Result type for controller operations.
pub type Result<T> = std::result::Result<T, ControllerError>;
