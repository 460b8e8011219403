//! Datapath transport contract for the virtual router controller.
//!
//! The controller never speaks the switch-control wire protocol itself. It
//! hands typed requests to an implementation of [`Datapath`]:
//!
//! - [`flow`]: [`FlowMatch`], [`FlowAction`], [`FlowMod`] and [`BufferId`]
//! - [`event`]: events delivered by the datapath ([`PacketIn`], [`FlowRemoved`])
//! - [`error`]: transport errors
//!
//! ```ignore
//! use vrn_datapath::{Datapath, DatapathResult, FlowAction, FlowMatch, FlowMod};
//!
//! fn punt_arp(dp: &mut dyn Datapath) -> DatapathResult<()> {
//!     let m = FlowMatch::new().with_dl_type(0x0806);
//!     dp.flow_add(FlowMod::permanent(m, 1, vec![FlowAction::Controller { max_len: 128 }]))
//! }
//! ```

pub mod datapath;
pub mod error;
pub mod event;
pub mod flow;

pub use datapath::{Datapath, LoggingDatapath, LoggingDatapathStats};
pub use error::{DatapathError, DatapathResult};
pub use event::{FlowRemoved, FlowRemovedReason, PacketIn};
pub use flow::{BufferId, FlowAction, FlowMatch, FlowMod};
