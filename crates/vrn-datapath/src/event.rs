//! Events delivered by the datapath to the controller.

use crate::flow::{BufferId, FlowMatch};
use std::fmt;
use std::time::Duration;
use vrn_types::PortNumber;

/// A packet punted to the controller because no flow matched it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketIn {
    pub buffer: BufferId,
    /// Length of the packet on the wire; `data` may be truncated.
    pub total_len: u16,
    pub in_port: PortNumber,
    pub data: Vec<u8>,
}

impl PacketIn {
    pub fn new(buffer: BufferId, in_port: PortNumber, data: Vec<u8>) -> Self {
        let total_len = u16::try_from(data.len()).unwrap_or(u16::MAX);
        PacketIn {
            buffer,
            total_len,
            in_port,
            data,
        }
    }
}

/// Why the switch removed a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowRemovedReason {
    IdleTimeout,
    HardTimeout,
    Delete,
}

impl fmt::Display for FlowRemovedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FlowRemovedReason::IdleTimeout => "idle_timeout",
            FlowRemovedReason::HardTimeout => "hard_timeout",
            FlowRemovedReason::Delete => "delete",
        };
        write!(f, "{s}")
    }
}

/// Notification that a flow installed with `notify_on_remove` has expired
/// or was deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowRemoved {
    pub flow_match: FlowMatch,
    pub cookie: u64,
    pub priority: u16,
    pub reason: FlowRemovedReason,
    pub duration: Duration,
    pub idle_timeout: u16,
    pub packet_count: u64,
    pub byte_count: u64,
}

impl FlowRemoved {
    /// An idle-timeout removal with zeroed counters.
    pub fn idle(flow_match: FlowMatch) -> Self {
        FlowRemoved {
            flow_match,
            cookie: 0,
            priority: 0,
            reason: FlowRemovedReason::IdleTimeout,
            duration: Duration::ZERO,
            idle_timeout: 0,
            packet_count: 0,
            byte_count: 0,
        }
    }
}
