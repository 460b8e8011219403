//! Virtual port identifiers and datapath port numbers.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Identifier of a virtual port in the logical topology.
///
/// Ids are 128 bits wide, but only the low 32 bits travel inside tunnel
/// headers (see [`PortId::short_id`]). Port ids are expected to be allocated
/// so that the truncation is unique among the active ports of a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PortId(Uuid);

impl PortId {
    pub const fn from_uuid(id: Uuid) -> Self {
        PortId(id)
    }

    /// Allocates a fresh random id.
    pub fn new_random() -> Self {
        PortId(Uuid::new_v4())
    }

    /// Expands a 32-bit tunnel id back into a full port id.
    ///
    /// The upper 96 bits are zero, so `PortId::from_short_id(x).short_id() == x`.
    pub const fn from_short_id(short: u32) -> Self {
        PortId(Uuid::from_u128(short as u128))
    }

    /// Low 32 bits of the id, as carried in tunnel MAC addresses.
    pub const fn short_id(&self) -> u32 {
        self.0.as_u128() as u32
    }

    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PortId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(PortId)
            .map_err(|_| ParseError::InvalidId(s.to_string()))
    }
}

impl From<Uuid> for PortId {
    fn from(id: Uuid) -> Self {
        PortId(id)
    }
}

/// A datapath (switch) port number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PortNumber(u16);

impl PortNumber {
    /// Highest number usable by a physical or virtual port.
    pub const MAX: PortNumber = PortNumber(0xff00);

    /// The switch's local networking stack.
    pub const LOCAL: PortNumber = PortNumber(0xfffe);

    /// Punt to the controller.
    pub const CONTROLLER: PortNumber = PortNumber(0xfffd);

    /// No port; used as the ingress of packets the controller originates.
    pub const NONE: PortNumber = PortNumber(0xffff);

    pub const fn new(number: u16) -> Self {
        PortNumber(number)
    }

    pub const fn get(&self) -> u16 {
        self.0
    }

    /// True for the reserved numbers above [`PortNumber::MAX`].
    pub const fn is_reserved(&self) -> bool {
        self.0 > Self::MAX.0
    }
}

impl fmt::Display for PortNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::LOCAL => write!(f, "LOCAL"),
            Self::CONTROLLER => write!(f, "CONTROLLER"),
            Self::NONE => write!(f, "NONE"),
            PortNumber(n) => write!(f, "{n}"),
        }
    }
}

impl FromStr for PortNumber {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "LOCAL" => Ok(Self::LOCAL),
            "CONTROLLER" => Ok(Self::CONTROLLER),
            "NONE" => Ok(Self::NONE),
            _ => s
                .parse::<u16>()
                .map(PortNumber)
                .map_err(|_| ParseError::InvalidPortNumber(s.to_string())),
        }
    }
}

impl From<u16> for PortNumber {
    fn from(number: u16) -> Self {
        PortNumber(number)
    }
}

impl From<PortNumber> for u16 {
    fn from(port: PortNumber) -> u16 {
        port.0
    }
}
