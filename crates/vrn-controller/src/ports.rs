//! Virtual port lifecycle: the port number and port id indices.

use crate::error::{ControllerError, Result};
use std::collections::HashMap;
use vrn_types::{ElementId, MacAddress, PortId, PortNumber};

/// A virtual port attached to the managed datapath.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualPort {
    pub id: PortId,
    pub number: PortNumber,
    pub mac: MacAddress,
    /// Router or bridge owning the port.
    pub device: ElementId,
}

impl VirtualPort {
    pub fn new(id: PortId, number: PortNumber, mac: MacAddress, device: ElementId) -> Self {
        Self {
            id,
            number,
            mac,
            device,
        }
    }
}

/// Two consistent indices over the attached virtual ports.
///
/// Every port reachable by id is reachable by number and vice versa; attach
/// and detach update both or neither.
#[derive(Debug, Default)]
pub struct PortManager {
    by_id: HashMap<PortId, VirtualPort>,
    by_number: HashMap<PortNumber, PortId>,
}

impl PortManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&mut self, port: VirtualPort) -> Result<()> {
        if self.by_id.contains_key(&port.id) {
            return Err(ControllerError::DuplicatePort(port.id));
        }
        if self.by_number.contains_key(&port.number) {
            return Err(ControllerError::DuplicatePortNumber(port.number));
        }

        self.by_number.insert(port.number, port.id);
        self.by_id.insert(port.id, port);
        Ok(())
    }

    pub fn detach(&mut self, id: &PortId) -> Result<VirtualPort> {
        let port = self
            .by_id
            .remove(id)
            .ok_or(ControllerError::UnknownPort(*id))?;
        self.by_number.remove(&port.number);
        Ok(port)
    }

    pub fn by_id(&self, id: &PortId) -> Option<&VirtualPort> {
        self.by_id.get(id)
    }

    pub fn by_number(&self, number: PortNumber) -> Option<&VirtualPort> {
        self.by_number.get(&number).and_then(|id| self.by_id.get(id))
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &VirtualPort> {
        self.by_id.values()
    }
}
