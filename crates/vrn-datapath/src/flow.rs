//! Flow matches, actions and flow-mod requests.

use std::fmt;
use std::net::Ipv4Addr;
use vrn_types::{MacAddress, PortNumber};

/// Handle of a packet held in the switch's buffer pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(u32);

impl BufferId {
    /// The packet was not buffered; its bytes travel with the packet-in.
    pub const UNBUFFERED: BufferId = BufferId(0xffff_ffff);

    pub const fn new(id: u32) -> Self {
        BufferId(id)
    }

    pub const fn get(&self) -> u32 {
        self.0
    }

    pub const fn is_buffered(&self) -> bool {
        self.0 != Self::UNBUFFERED.0
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_buffered() {
            write!(f, "{}", self.0)
        } else {
            write!(f, "unbuffered")
        }
    }
}

/// Header field matchers of a flow rule.
///
/// A `None` field is wildcarded. Two matches are equal iff every field is
/// equal, which makes `FlowMatch` usable as the identity of an installed flow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct FlowMatch {
    pub in_port: Option<PortNumber>,
    pub dl_src: Option<MacAddress>,
    pub dl_dst: Option<MacAddress>,
    pub dl_type: Option<u16>,
    pub nw_proto: Option<u8>,
    pub nw_src: Option<Ipv4Addr>,
    pub nw_dst: Option<Ipv4Addr>,
    pub tp_src: Option<u16>,
    pub tp_dst: Option<u16>,
}

impl FlowMatch {
    /// A match with every field wildcarded.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_in_port(mut self, port: PortNumber) -> Self {
        self.in_port = Some(port);
        self
    }

    pub fn with_dl_src(mut self, mac: MacAddress) -> Self {
        self.dl_src = Some(mac);
        self
    }

    pub fn with_dl_dst(mut self, mac: MacAddress) -> Self {
        self.dl_dst = Some(mac);
        self
    }

    pub fn with_dl_type(mut self, ethertype: u16) -> Self {
        self.dl_type = Some(ethertype);
        self
    }

    pub fn with_nw_proto(mut self, proto: u8) -> Self {
        self.nw_proto = Some(proto);
        self
    }

    pub fn with_nw_src(mut self, addr: Ipv4Addr) -> Self {
        self.nw_src = Some(addr);
        self
    }

    pub fn with_nw_dst(mut self, addr: Ipv4Addr) -> Self {
        self.nw_dst = Some(addr);
        self
    }

    pub fn with_tp_src(mut self, port: u16) -> Self {
        self.tp_src = Some(port);
        self
    }

    pub fn with_tp_dst(mut self, port: u16) -> Self {
        self.tp_dst = Some(port);
        self
    }

    /// A match that keeps only the ethertype of `self`.
    pub fn ethertype_only(&self) -> FlowMatch {
        FlowMatch {
            dl_type: self.dl_type,
            ..FlowMatch::default()
        }
    }
}

impl fmt::Display for FlowMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        let mut field = |f: &mut fmt::Formatter<'_>, name: &str, value: &dyn fmt::Display| {
            let sep = if first { "" } else { "," };
            first = false;
            write!(f, "{sep}{name}={value}")
        };

        if let Some(v) = &self.in_port {
            field(f, "in_port", v)?;
        }
        if let Some(v) = &self.dl_src {
            field(f, "dl_src", v)?;
        }
        if let Some(v) = &self.dl_dst {
            field(f, "dl_dst", v)?;
        }
        if let Some(v) = self.dl_type {
            field(f, "dl_type", &format_args!("{v:#06x}"))?;
        }
        if let Some(v) = &self.nw_proto {
            field(f, "nw_proto", v)?;
        }
        if let Some(v) = &self.nw_src {
            field(f, "nw_src", v)?;
        }
        if let Some(v) = &self.nw_dst {
            field(f, "nw_dst", v)?;
        }
        if let Some(v) = &self.tp_src {
            field(f, "tp_src", v)?;
        }
        if let Some(v) = &self.tp_dst {
            field(f, "tp_dst", v)?;
        }
        if first {
            write!(f, "*")?;
        }
        Ok(())
    }
}

/// A single flow action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowAction {
    SetDlSrc(MacAddress),
    SetDlDst(MacAddress),
    SetNwSrc(Ipv4Addr),
    SetNwDst(Ipv4Addr),
    SetTpSrc(u16),
    SetTpDst(u16),
    Output(PortNumber),
    /// Send to the controller, truncated to `max_len` bytes.
    Controller { max_len: u16 },
}

/// A flow-add request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowMod {
    pub flow_match: FlowMatch,
    pub cookie: u64,
    pub priority: u16,
    /// Seconds; 0 disables the timeout.
    pub idle_timeout: u16,
    /// Seconds; 0 disables the timeout.
    pub hard_timeout: u16,
    /// Buffered packet the new flow is applied to.
    pub buffer: BufferId,
    /// Ask the switch for a flow-removed event when this flow expires.
    pub notify_on_remove: bool,
    /// Empty means drop.
    pub actions: Vec<FlowAction>,
}

impl FlowMod {
    /// A flow with no timeouts and no removal notice, not tied to a buffer.
    pub fn permanent(flow_match: FlowMatch, priority: u16, actions: Vec<FlowAction>) -> Self {
        FlowMod {
            flow_match,
            cookie: 0,
            priority,
            idle_timeout: 0,
            hard_timeout: 0,
            buffer: BufferId::UNBUFFERED,
            notify_on_remove: false,
            actions,
        }
    }

    pub fn is_drop(&self) -> bool {
        self.actions.is_empty()
    }
}
