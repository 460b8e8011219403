//! Forwarding decision executor.
//!
//! Turns a simulation verdict into flow-mods, packet-outs and resource
//! releases:
//!
//! | Verdict | Result |
//! |---|---|
//! | `Blackhole` | drop flow (policy may widen it), elements released |
//! | `Consumed` | buffer freed |
//! | `Forward` to a local port | address resolution, flow installed on completion |
//! | `Forward` to a portset | flow to every member, or drop flow if none reachable |
//! | `Forward` to a remote port | flow through the peer's tunnel, or drop flow |
//! | `NotIpv4` | one permanent drop flow per ethertype |
//! | `NoRoute`, `Reject` | exact-match temporary drop flow, elements released |

use crate::controller::{incr, VrnController, FLOW_PRIORITY};
use crate::policy::{FlowInstalled, FlowScope, UnreachableCode};
use crate::ports::VirtualPort;
use crate::portset::PortSetResolver;
use crate::resolution::{Continuation, LocalPacket};
use crate::simulation::{ForwardInfo, Verdict};
use crate::tunnel::encode_tunnel_macs;
use crate::tunnels::TunnelPorts;
use std::collections::HashSet;
use std::net::Ipv4Addr;
use tracing::{debug, warn};
use vrn_datapath::{BufferId, FlowAction, FlowMatch, FlowMod};
use vrn_types::{ElementId, PortId, PortNumber};

/// Actions turning a packet matching `original` into one matching
/// `rewritten`, then sending it out of each of `out_ports`.
///
/// Only fields that differ get a rewrite action.
pub fn compute_actions(
    original: &FlowMatch,
    rewritten: &FlowMatch,
    out_ports: impl IntoIterator<Item = PortNumber>,
) -> Vec<FlowAction> {
    let mut actions = Vec::new();

    if let Some(mac) = rewritten.dl_src.filter(|_| original.dl_src != rewritten.dl_src) {
        actions.push(FlowAction::SetDlSrc(mac));
    }
    if let Some(mac) = rewritten.dl_dst.filter(|_| original.dl_dst != rewritten.dl_dst) {
        actions.push(FlowAction::SetDlDst(mac));
    }
    if let Some(addr) = rewritten.nw_src.filter(|_| original.nw_src != rewritten.nw_src) {
        actions.push(FlowAction::SetNwSrc(addr));
    }
    if let Some(addr) = rewritten.nw_dst.filter(|_| original.nw_dst != rewritten.nw_dst) {
        actions.push(FlowAction::SetNwDst(addr));
    }
    if let Some(port) = rewritten.tp_src.filter(|_| original.tp_src != rewritten.tp_src) {
        actions.push(FlowAction::SetTpSrc(port));
    }
    if let Some(port) = rewritten.tp_dst.filter(|_| original.tp_dst != rewritten.tp_dst) {
        actions.push(FlowAction::SetTpDst(port));
    }

    actions.extend(out_ports.into_iter().map(FlowAction::Output));
    actions
}

impl VrnController {
    pub(crate) fn execute_verdict(
        &mut self,
        verdict: Verdict,
        buffer: BufferId,
        ingress: VirtualPort,
        data: Vec<u8>,
        info: ForwardInfo,
    ) {
        match verdict {
            Verdict::Blackhole => {
                let installed = self.policy.widen(&info.flow_match, FlowScope::Blackhole);
                self.install_blackhole(&installed, buffer);
                self.notify_installed(&info.flow_match, &installed, ingress.id, &info.notify_elements);
                self.release_elements(&info.flow_match, &info.notify_elements);
            }
            Verdict::Consumed => {
                self.free_buffer(buffer);
            }
            Verdict::Forward { out_port, next_hop } => {
                self.forward(out_port, next_hop, buffer, ingress, data, info);
            }
            Verdict::NotIpv4 => {
                let per_ethertype = info.flow_match.ethertype_only();
                self.install_drop(&per_ethertype, buffer, 0, 0);
            }
            Verdict::NoRoute => {
                self.reject(UnreachableCode::Net, buffer, &info);
            }
            Verdict::Reject => {
                self.reject(UnreachableCode::FilterProhibited, buffer, &info);
            }
        }
    }

    fn forward(
        &mut self,
        out_port: PortId,
        next_hop: Ipv4Addr,
        buffer: BufferId,
        ingress: VirtualPort,
        data: Vec<u8>,
        mut info: ForwardInfo,
    ) {
        if self.ports.by_id(&out_port).is_some() {
            debug!(egress = %out_port, next_hop = %next_hop, "forward to local port");
            let continuation = Continuation::Local(LocalPacket {
                buffer,
                ingress,
                data,
                egress: out_port,
                info,
            });
            self.request_resolution(out_port, next_hop, continuation);
            return;
        }

        let members = PortSetResolver {
            local_address: self.local_address,
            local_slices: &self.local_portsets,
            membership: self.portsets.as_ref(),
            tunnels: &self.tunnels,
        }
        .resolve(&out_port, &info.flow_match);

        let out_ports = match members {
            Some(members) => members,
            None => match self.tunnels.port_for_vport(&out_port) {
                Some(tunnel) => {
                    debug!(egress = %out_port, tunnel = %tunnel, "forward to remote port");
                    let (dl_src, dl_dst) = encode_tunnel_macs(info.in_port_id, out_port, next_hop);
                    info.match_out.dl_src = Some(dl_src);
                    info.match_out.dl_dst = Some(dl_dst);
                    [tunnel].into_iter().collect()
                }
                None => {
                    warn!(egress = %out_port, "no tunnel port towards egress");
                    Default::default()
                }
            },
        };

        if out_ports.is_empty() {
            self.reject(UnreachableCode::Net, buffer, &info);
            return;
        }

        let actions = compute_actions(&info.flow_match, &info.match_out, out_ports);
        if self.install_flow(info.flow_match.clone(), buffer, actions, &data) {
            self.flows.record(info.flow_match, info.notify_elements);
        } else {
            self.release_elements(&info.flow_match, &info.notify_elements);
        }
    }

    /// Temporary exact-match drop for a packet that cannot be delivered.
    fn reject(&mut self, code: UnreachableCode, buffer: BufferId, info: &ForwardInfo) {
        debug!(code = ?code, flow = %info.flow_match, "dropping undeliverable packet");
        self.install_blackhole(&info.flow_match, buffer);
        self.release_elements(&info.flow_match, &info.notify_elements);
        self.policy.unreachable(code, info.in_port_id, &info.packet);
    }

    /// Installs a forwarding flow, and emits the packet itself if the
    /// datapath did not buffer it.
    ///
    /// Returns `false` if the datapath rejected the flow. The packet is then
    /// dropped and nothing refers to the flow, so callers must not track it.
    pub(crate) fn install_flow(
        &mut self,
        flow_match: FlowMatch,
        buffer: BufferId,
        actions: Vec<FlowAction>,
        data: &[u8],
    ) -> bool {
        let packet_out = (!buffer.is_buffered()).then(|| actions.clone());
        let flow = FlowMod {
            flow_match,
            cookie: 0,
            priority: FLOW_PRIORITY,
            idle_timeout: self.flow_config.idle_expire_secs,
            hard_timeout: 0,
            buffer,
            notify_on_remove: true,
            actions,
        };
        debug!(flow = %flow.flow_match, actions = ?flow.actions, "installing flow");

        if let Err(e) = self.datapath.flow_add(flow) {
            warn!(error = %e, "flow_add failed, dropping packet");
            incr(&mut self.stats.datapath_errors);
            self.drop_packet(buffer);
            return false;
        }
        incr(&mut self.stats.flows_installed);

        if let Some(actions) = packet_out {
            if let Err(e) = self.datapath.packet_out(buffer, PortNumber::NONE, &actions, data) {
                warn!(error = %e, "packet_out failed");
                incr(&mut self.stats.datapath_errors);
            }
        }
        true
    }

    /// Installs a temporary drop flow with the configured timeouts.
    pub(crate) fn install_blackhole(&mut self, flow_match: &FlowMatch, buffer: BufferId) {
        let idle = self.flow_config.blackhole_idle_secs;
        let hard = self.flow_config.blackhole_hard_secs;
        self.install_drop(flow_match, buffer, idle, hard);
    }

    fn install_drop(&mut self, flow_match: &FlowMatch, buffer: BufferId, idle: u16, hard: u16) {
        debug!(flow = %flow_match, idle, hard, "installing drop flow");
        let flow = FlowMod {
            flow_match: flow_match.clone(),
            cookie: 0,
            priority: FLOW_PRIORITY,
            idle_timeout: idle,
            hard_timeout: hard,
            buffer,
            notify_on_remove: true,
            actions: Vec::new(),
        };

        match self.datapath.flow_add(flow) {
            Ok(()) => incr(&mut self.stats.blackholes_installed),
            Err(e) => {
                warn!(error = %e, "drop flow_add failed");
                incr(&mut self.stats.datapath_errors);
            }
        }
    }

    /// Asks every element to free its state for `flow_match`. A failing
    /// element does not stop the others.
    pub(crate) fn release_elements(&mut self, flow_match: &FlowMatch, elements: &HashSet<ElementId>) {
        for element in elements {
            if let Err(e) = self.simulation.free_flow_resources(*element, flow_match) {
                warn!(element = %element, error = %e, "failed to free flow resources");
                incr(&mut self.stats.element_cleanup_failures);
            }
        }
    }

    pub(crate) fn notify_installed(
        &mut self,
        original: &FlowMatch,
        installed: &FlowMatch,
        in_port: PortId,
        elements: &HashSet<ElementId>,
    ) {
        if let Some(observer) = self.observer.as_mut() {
            observer.flow_installed(&FlowInstalled {
                original,
                installed,
                in_port,
                elements,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use vrn_types::MacAddress;

    fn create_test_match() -> FlowMatch {
        FlowMatch::new()
            .with_in_port(PortNumber::new(1))
            .with_dl_src(MacAddress::new([2, 0, 0, 0, 0, 1]))
            .with_dl_dst(MacAddress::new([2, 0, 0, 0, 0, 2]))
            .with_dl_type(0x0800)
            .with_nw_proto(6)
            .with_nw_src(Ipv4Addr::new(10, 0, 0, 1))
            .with_nw_dst(Ipv4Addr::new(10, 0, 1, 1))
            .with_tp_src(40000)
            .with_tp_dst(80)
    }

    #[test]
    fn test_identical_matches_only_output() {
        let m = create_test_match();
        let actions = compute_actions(&m, &m.clone(), [PortNumber::new(3), PortNumber::new(4)]);
        assert_eq!(
            actions,
            vec![
                FlowAction::Output(PortNumber::new(3)),
                FlowAction::Output(PortNumber::new(4)),
            ]
        );
    }

    #[test]
    fn test_link_layer_rewrite() {
        let original = create_test_match();
        let mut rewritten = original.clone();
        rewritten.dl_src = Some(MacAddress::new([2, 0, 0, 0, 0, 0xaa]));
        rewritten.dl_dst = Some(MacAddress::new([2, 0, 0, 0, 0, 0xbb]));

        assert_eq!(
            compute_actions(&original, &rewritten, [PortNumber::new(9)]),
            vec![
                FlowAction::SetDlSrc(MacAddress::new([2, 0, 0, 0, 0, 0xaa])),
                FlowAction::SetDlDst(MacAddress::new([2, 0, 0, 0, 0, 0xbb])),
                FlowAction::Output(PortNumber::new(9)),
            ]
        );
    }

    #[test]
    fn test_nat_rewrite_order() {
        let original = create_test_match();
        let mut rewritten = original.clone();
        rewritten.nw_dst = Some(Ipv4Addr::new(192, 168, 1, 10));
        rewritten.tp_dst = Some(8080);
        rewritten.nw_src = Some(Ipv4Addr::new(172, 16, 0, 1));
        rewritten.tp_src = Some(1025);

        assert_eq!(
            compute_actions(&original, &rewritten, [PortNumber::new(2)]),
            vec![
                FlowAction::SetNwSrc(Ipv4Addr::new(172, 16, 0, 1)),
                FlowAction::SetNwDst(Ipv4Addr::new(192, 168, 1, 10)),
                FlowAction::SetTpSrc(1025),
                FlowAction::SetTpDst(8080),
                FlowAction::Output(PortNumber::new(2)),
            ]
        );
    }

    #[test]
    fn test_no_output_ports() {
        let m = create_test_match();
        assert!(compute_actions(&m, &m, []).is_empty());
    }
}
