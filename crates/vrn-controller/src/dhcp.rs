//! DHCP request delegation.

use crate::packet::DhcpMessage;
use crate::ports::VirtualPort;
use tracing::info;
use vrn_types::MacAddress;

/// Answers DHCP bootrequests received on virtual ports.
pub trait DhcpHandler: Send {
    fn handle_request(&mut self, port: &VirtualPort, message: &DhcpMessage, client_mac: MacAddress);
}

/// Logs and discards every request.
#[derive(Debug, Default)]
pub struct DiscardDhcp;

impl DhcpHandler for DiscardDhcp {
    fn handle_request(&mut self, port: &VirtualPort, message: &DhcpMessage, client_mac: MacAddress) {
        info!(
            port = %port.id,
            client = %client_mac,
            len = message.payload.len(),
            "no DHCP server configured, discarding bootrequest"
        );
    }
}
