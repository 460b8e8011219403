//! The datapath transport trait.

use crate::error::DatapathResult;
use crate::flow::{BufferId, FlowAction, FlowMod};
use log::{debug, info};
use vrn_types::PortNumber;

/// Operations the controller issues to the switch.
///
/// Calls are fire-and-forget: an `Ok` means the request was handed to the
/// transport, not that the switch applied it.
pub trait Datapath: Send {
    /// Installs a flow. If `flow.buffer` is buffered the switch applies the
    /// new flow to that packet.
    fn flow_add(&mut self, flow: FlowMod) -> DatapathResult<()>;

    /// Emits a packet, either the buffered `buffer` or the raw `data` when
    /// `buffer` is [`BufferId::UNBUFFERED`].
    fn packet_out(
        &mut self,
        buffer: BufferId,
        in_port: PortNumber,
        actions: &[FlowAction],
        data: &[u8],
    ) -> DatapathResult<()>;

    /// Releases a buffered packet without forwarding it.
    fn free_buffer(&mut self, buffer: BufferId) -> DatapathResult<()>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoggingDatapathStats {
    pub flows_added: u64,
    pub drop_flows_added: u64,
    pub packets_out: u64,
    pub buffers_freed: u64,
}

/// A datapath with no switch attached. Every request is logged and counted.
#[derive(Debug, Default)]
pub struct LoggingDatapath {
    datapath_id: u64,
    stats: LoggingDatapathStats,
}

impl LoggingDatapath {
    pub fn new(datapath_id: u64) -> Self {
        Self {
            datapath_id,
            stats: LoggingDatapathStats::default(),
        }
    }

    pub fn stats(&self) -> &LoggingDatapathStats {
        &self.stats
    }
}

impl Datapath for LoggingDatapath {
    fn flow_add(&mut self, flow: FlowMod) -> DatapathResult<()> {
        if flow.is_drop() {
            self.stats.drop_flows_added = self.stats.drop_flows_added.saturating_add(1);
        }
        self.stats.flows_added = self.stats.flows_added.saturating_add(1);
        info!(
            "dp {:#x}: flow_add match [{}] prio {} idle {}s hard {}s buffer {} actions {:?}",
            self.datapath_id,
            flow.flow_match,
            flow.priority,
            flow.idle_timeout,
            flow.hard_timeout,
            flow.buffer,
            flow.actions
        );
        Ok(())
    }

    fn packet_out(
        &mut self,
        buffer: BufferId,
        in_port: PortNumber,
        actions: &[FlowAction],
        data: &[u8],
    ) -> DatapathResult<()> {
        self.stats.packets_out = self.stats.packets_out.saturating_add(1);
        info!(
            "dp {:#x}: packet_out buffer {} in_port {} {} bytes actions {:?}",
            self.datapath_id,
            buffer,
            in_port,
            data.len(),
            actions
        );
        Ok(())
    }

    fn free_buffer(&mut self, buffer: BufferId) -> DatapathResult<()> {
        self.stats.buffers_freed = self.stats.buffers_freed.saturating_add(1);
        debug!("dp {:#x}: free buffer {}", self.datapath_id, buffer);
        Ok(())
    }
}
