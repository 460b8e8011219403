//! Common types shared by the virtual router control plane.
//!
//! - [`MacAddress`]: 48-bit Ethernet addresses, including the synthetic
//!   addresses used on inter-host tunnels
//! - [`PortId`]: 128-bit virtual port identifiers
//! - [`PortNumber`]: datapath port numbers and the reserved sentinels
//! - [`ElementId`]: forwarding elements (routers, bridges) of the virtual
//!   topology

mod element;
mod mac;
mod port;

pub use element::ElementId;
pub use mac::MacAddress;
pub use port::{PortId, PortNumber};

/// Common error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid MAC address format: {0}")]
    InvalidMacAddress(String),

    #[error("invalid identifier: {0}")]
    InvalidId(String),

    #[error("invalid port number: {0}")]
    InvalidPortNumber(String),
}
