//! Installed flow to forwarding element bookkeeping.

use std::collections::{HashMap, HashSet};
use tracing::debug;
use vrn_datapath::FlowMatch;
use vrn_types::ElementId;

/// Remembers which forwarding elements took part in deciding each installed
/// flow, so their per-flow state can be freed when the flow goes away.
#[derive(Debug, Default)]
pub struct FlowTracker {
    flows: HashMap<FlowMatch, HashSet<ElementId>>,
}

impl FlowTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Associates `elements` with an installed flow.
    ///
    /// A match is live at most once. Recording a match that is already live
    /// (the same flow re-installed before the switch reported its removal)
    /// merges the element sets.
    pub fn record(&mut self, flow_match: FlowMatch, elements: HashSet<ElementId>) {
        match self.flows.get_mut(&flow_match) {
            Some(existing) => {
                debug!(flow = %flow_match, "flow already tracked, merging elements");
                existing.extend(elements);
            }
            None => {
                self.flows.insert(flow_match, elements);
            }
        }
    }

    /// Forgets a flow and returns its elements.
    ///
    /// Unknown matches (never recorded, or already released) yield an empty
    /// set.
    pub fn release(&mut self, flow_match: &FlowMatch) -> HashSet<ElementId> {
        self.flows.remove(flow_match).unwrap_or_default()
    }

    pub fn contains(&self, flow_match: &FlowMatch) -> bool {
        self.flows.contains_key(flow_match)
    }

    pub fn elements(&self, flow_match: &FlowMatch) -> Option<&HashSet<ElementId>> {
        self.flows.get(flow_match)
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::net::Ipv4Addr;
    use vrn_types::PortNumber;

    fn create_test_match(port: u16) -> FlowMatch {
        FlowMatch::new()
            .with_in_port(PortNumber::new(port))
            .with_dl_type(0x0800)
            .with_nw_dst(Ipv4Addr::new(10, 0, 0, 1))
    }

    fn elements(n: usize) -> HashSet<ElementId> {
        (0..n).map(|_| ElementId::new_random()).collect()
    }

    #[test]
    fn test_record_and_release() {
        let mut tracker = FlowTracker::new();
        let routers = elements(2);
        tracker.record(create_test_match(1), routers.clone());

        assert!(tracker.contains(&create_test_match(1)));
        assert_eq!(tracker.release(&create_test_match(1)), routers);
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_release_unknown_is_empty() {
        let mut tracker = FlowTracker::new();
        tracker.record(create_test_match(1), elements(1));

        assert!(tracker.release(&create_test_match(2)).is_empty());
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_second_release_is_noop() {
        let mut tracker = FlowTracker::new();
        tracker.record(create_test_match(1), elements(3));

        assert_eq!(tracker.release(&create_test_match(1)).len(), 3);
        assert!(tracker.release(&create_test_match(1)).is_empty());
    }

    #[test]
    fn test_duplicate_record_merges() {
        let mut tracker = FlowTracker::new();
        let first = elements(1);
        let second = elements(1);
        tracker.record(create_test_match(1), first.clone());
        tracker.record(create_test_match(1), second.clone());

        assert_eq!(tracker.len(), 1);
        let merged: HashSet<_> = first.union(&second).copied().collect();
        assert_eq!(tracker.release(&create_test_match(1)), merged);
    }

    #[test]
    fn test_cloned_match_finds_entry() {
        let mut tracker = FlowTracker::new();
        let m = create_test_match(4);
        tracker.record(m.clone(), elements(1));
        assert!(tracker.elements(&m).is_some());
    }
}
