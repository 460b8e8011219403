//! Recording collaborators and frame builders for the controller tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use vrn_controller::packet::DhcpMessage;
use vrn_controller::{
    AddressResolver, Collaborators, ControllerConfig, DhcpHandler, FlowInstalled, FlowObserver,
    ForwardInfo, ForwardingPolicy, ParsedPacket, PortSetMap, ResolutionToken, Simulation,
    SimulationError, UnreachableCode, Verdict, VirtualPort, VrnController,
};
use vrn_datapath::{
    BufferId, Datapath, DatapathError, DatapathResult, FlowAction, FlowMatch, FlowMod, PacketIn,
};
use vrn_types::{ElementId, MacAddress, PortId, PortNumber};

pub const LOCAL_ADDRESS: Ipv4Addr = Ipv4Addr::new(192, 168, 0, 1);
pub const PEER_ADDRESS: Ipv4Addr = Ipv4Addr::new(192, 168, 0, 2);
pub const TUNNEL_PORT: PortNumber = PortNumber::new(100);

pub const CLIENT_MAC: MacAddress = MacAddress::new([0x02, 0xaa, 0, 0, 0, 0x01]);
pub const NEXT_HOP: Ipv4Addr = Ipv4Addr::new(10, 0, 1, 1);
pub const NEXT_HOP_MAC: MacAddress = MacAddress::new([0x02, 0xbb, 0, 0, 0, 0x01]);

pub const CLIENT_IP: [u8; 4] = [10, 0, 0, 5];
pub const SERVER_IP: [u8; 4] = [10, 0, 1, 7];

pub const ETHERTYPE_ARP: u16 = 0x0806;

// ===== Datapath =====

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketOut {
    pub buffer: BufferId,
    pub in_port: PortNumber,
    pub actions: Vec<FlowAction>,
    pub data: Vec<u8>,
}

#[derive(Debug, Default)]
pub struct DatapathLog {
    pub flows: Vec<FlowMod>,
    pub packets_out: Vec<PacketOut>,
    pub freed: Vec<BufferId>,
    pub fail_flow_add: bool,
}

impl DatapathLog {
    pub fn forwarding_flows(&self) -> Vec<FlowMod> {
        self.flows.iter().filter(|f| !f.is_drop()).cloned().collect()
    }

    pub fn drop_flows(&self) -> Vec<FlowMod> {
        self.flows.iter().filter(|f| f.is_drop()).cloned().collect()
    }
}

pub struct RecordingDatapath {
    log: Arc<Mutex<DatapathLog>>,
}

impl Datapath for RecordingDatapath {
    fn flow_add(&mut self, flow: FlowMod) -> DatapathResult<()> {
        let mut log = self.log.lock().unwrap();
        if log.fail_flow_add {
            return Err(DatapathError::rejected("flow_add", "table full"));
        }
        log.flows.push(flow);
        Ok(())
    }

    fn packet_out(
        &mut self,
        buffer: BufferId,
        in_port: PortNumber,
        actions: &[FlowAction],
        data: &[u8],
    ) -> DatapathResult<()> {
        self.log.lock().unwrap().packets_out.push(PacketOut {
            buffer,
            in_port,
            actions: actions.to_vec(),
            data: data.to_vec(),
        });
        Ok(())
    }

    fn free_buffer(&mut self, buffer: BufferId) -> DatapathResult<()> {
        self.log.lock().unwrap().freed.push(buffer);
        Ok(())
    }
}

// ===== Simulation =====

#[derive(Debug)]
pub struct SimulationState {
    pub verdict: Result<Verdict, SimulationError>,
    /// Elements added to every processed packet.
    pub elements: Vec<ElementId>,
    /// Applied to `match_out` of every processed packet.
    pub nw_dst_rewrite: Option<Ipv4Addr>,
    pub processed: Vec<FlowMatch>,
    pub freed: Vec<(ElementId, FlowMatch)>,
    pub failing_elements: HashSet<ElementId>,
    pub ports: Vec<PortId>,
}

impl Default for SimulationState {
    fn default() -> Self {
        Self {
            verdict: Ok(Verdict::Consumed),
            elements: Vec::new(),
            nw_dst_rewrite: None,
            processed: Vec::new(),
            freed: Vec::new(),
            failing_elements: HashSet::new(),
            ports: Vec::new(),
        }
    }
}

pub struct ScriptedSimulation {
    state: Arc<Mutex<SimulationState>>,
}

impl Simulation for ScriptedSimulation {
    fn process(&mut self, info: &mut ForwardInfo) -> Result<Verdict, SimulationError> {
        let mut state = self.state.lock().unwrap();
        state.processed.push(info.flow_match.clone());
        info.notify_elements.extend(state.elements.iter().copied());
        if let Some(addr) = state.nw_dst_rewrite {
            info.match_out.nw_dst = Some(addr);
        }
        state.verdict.clone()
    }

    fn free_flow_resources(
        &mut self,
        element: ElementId,
        flow_match: &FlowMatch,
    ) -> Result<(), SimulationError> {
        let mut state = self.state.lock().unwrap();
        state.freed.push((element, flow_match.clone()));
        if state.failing_elements.contains(&element) {
            return Err(SimulationError::UnknownElement(element));
        }
        Ok(())
    }

    fn add_port(&mut self, port: &VirtualPort) -> Result<(), SimulationError> {
        self.state.lock().unwrap().ports.push(port.id);
        Ok(())
    }

    fn remove_port(&mut self, port: &VirtualPort) -> Result<(), SimulationError> {
        self.state.lock().unwrap().ports.retain(|id| *id != port.id);
        Ok(())
    }
}

// ===== Resolver =====

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolveRequest {
    pub token: ResolutionToken,
    pub port: PortId,
    pub next_hop: Ipv4Addr,
}

pub struct RecordingResolver {
    requests: Arc<Mutex<Vec<ResolveRequest>>>,
}

impl AddressResolver for RecordingResolver {
    fn resolve(&mut self, token: ResolutionToken, port: PortId, next_hop: Ipv4Addr) {
        self.requests.lock().unwrap().push(ResolveRequest {
            token,
            port,
            next_hop,
        });
    }
}

// ===== DHCP =====

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpRequest {
    pub port: PortId,
    pub opcode: u8,
    pub client: MacAddress,
}

pub struct RecordingDhcp {
    requests: Arc<Mutex<Vec<DhcpRequest>>>,
}

impl DhcpHandler for RecordingDhcp {
    fn handle_request(&mut self, port: &VirtualPort, message: &DhcpMessage, client_mac: MacAddress) {
        self.requests.lock().unwrap().push(DhcpRequest {
            port: port.id,
            opcode: message.opcode,
            client: client_mac,
        });
    }
}

// ===== Policy and observer =====

/// Exact matches, records unreachable requests.
pub struct RecordingPolicy {
    pub unreachable: Arc<Mutex<Vec<(UnreachableCode, PortId)>>>,
}

impl ForwardingPolicy for RecordingPolicy {
    fn unreachable(&mut self, code: UnreachableCode, ingress: PortId, _packet: &ParsedPacket) {
        self.unreachable.lock().unwrap().push((code, ingress));
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Installed {
    pub original: FlowMatch,
    pub installed: FlowMatch,
    pub in_port: PortId,
    pub elements: usize,
}

pub struct RecordingObserver {
    pub events: Arc<Mutex<Vec<Installed>>>,
}

impl FlowObserver for RecordingObserver {
    fn flow_installed(&mut self, event: &FlowInstalled<'_>) {
        self.events.lock().unwrap().push(Installed {
            original: event.original.clone(),
            installed: event.installed.clone(),
            in_port: event.in_port,
            elements: event.elements.len(),
        });
    }
}

// ===== Harness =====

pub struct Harness {
    pub controller: VrnController,
    pub datapath: Arc<Mutex<DatapathLog>>,
    pub simulation: Arc<Mutex<SimulationState>>,
    pub resolver: Arc<Mutex<Vec<ResolveRequest>>>,
    pub dhcp: Arc<Mutex<Vec<DhcpRequest>>>,
    pub unreachable: Arc<Mutex<Vec<(UnreachableCode, PortId)>>>,
    pub installed: Arc<Mutex<Vec<Installed>>>,
}

pub fn create_test_config() -> ControllerConfig {
    let mut config = ControllerConfig::default();
    config.controller.local_address = LOCAL_ADDRESS;
    config
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(&create_test_config(), PortSetMap::new())
    }

    pub fn with_portsets(portsets: PortSetMap) -> Self {
        Self::with_config(&create_test_config(), portsets)
    }

    /// Builds a controller with the configured policy; no recording
    /// policy or observer is installed.
    pub fn with_config(config: &ControllerConfig, portsets: PortSetMap) -> Self {
        let datapath = Arc::new(Mutex::new(DatapathLog::default()));
        let simulation = Arc::new(Mutex::new(SimulationState::default()));
        let resolver = Arc::new(Mutex::new(Vec::new()));
        let dhcp = Arc::new(Mutex::new(Vec::new()));

        let controller = VrnController::new(
            config,
            Collaborators {
                datapath: Box::new(RecordingDatapath {
                    log: Arc::clone(&datapath),
                }),
                simulation: Box::new(ScriptedSimulation {
                    state: Arc::clone(&simulation),
                }),
                resolver: Box::new(RecordingResolver {
                    requests: Arc::clone(&resolver),
                }),
                dhcp: Box::new(RecordingDhcp {
                    requests: Arc::clone(&dhcp),
                }),
                portsets: Box::new(portsets),
            },
        );

        Harness {
            controller,
            datapath,
            simulation,
            resolver,
            dhcp,
            unreachable: Arc::new(Mutex::new(Vec::new())),
            installed: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Replaces the policy with one that records unreachable requests and
    /// registers a recording observer.
    pub fn recording(mut self) -> Self {
        let policy = RecordingPolicy {
            unreachable: Arc::clone(&self.unreachable),
        };
        let observer = RecordingObserver {
            events: Arc::clone(&self.installed),
        };
        self.controller = self
            .controller
            .with_policy(Box::new(policy))
            .with_observer(Box::new(observer));
        self
    }

    pub fn attach(&mut self, port: &VirtualPort) {
        self.controller.add_virtual_port(port.clone());
    }

    /// Forgets everything the datapath saw so far.
    pub fn clear_datapath(&self) {
        let mut log = self.datapath.lock().unwrap();
        log.flows.clear();
        log.packets_out.clear();
        log.freed.clear();
    }

    pub fn set_verdict(&self, verdict: Verdict) {
        self.simulation.lock().unwrap().verdict = Ok(verdict);
    }

    pub fn set_simulation_error(&self, message: &str) {
        self.simulation.lock().unwrap().verdict = Err(SimulationError::Failed(message.to_string()));
    }

    pub fn set_elements(&self, elements: &[ElementId]) {
        self.simulation.lock().unwrap().elements = elements.to_vec();
    }

    pub fn packet_in(&mut self, buffer: BufferId, in_port: PortNumber, data: Vec<u8>) {
        self.controller.on_packet_in(PacketIn::new(buffer, in_port, data));
    }

    pub fn flows(&self) -> Vec<FlowMod> {
        self.datapath.lock().unwrap().flows.clone()
    }

    pub fn forwarding_flows(&self) -> Vec<FlowMod> {
        self.datapath.lock().unwrap().forwarding_flows()
    }

    pub fn drop_flows(&self) -> Vec<FlowMod> {
        self.datapath.lock().unwrap().drop_flows()
    }

    pub fn packets_out(&self) -> Vec<PacketOut> {
        self.datapath.lock().unwrap().packets_out.clone()
    }

    pub fn freed_buffers(&self) -> Vec<BufferId> {
        self.datapath.lock().unwrap().freed.clone()
    }

    pub fn processed(&self) -> usize {
        self.simulation.lock().unwrap().processed.len()
    }

    pub fn freed_elements(&self) -> Vec<ElementId> {
        let mut freed: Vec<_> = self
            .simulation
            .lock()
            .unwrap()
            .freed
            .iter()
            .map(|(element, _)| *element)
            .collect();
        freed.sort();
        freed
    }

    pub fn resolve_requests(&self) -> Vec<ResolveRequest> {
        self.resolver.lock().unwrap().clone()
    }

    pub fn last_token(&self) -> ResolutionToken {
        self.resolver.lock().unwrap().last().unwrap().token
    }

    /// Answers the most recent resolution request.
    pub fn resolve_last(&mut self, mac: Option<MacAddress>) {
        let token = self.last_token();
        self.controller.on_address_resolved(token, mac);
    }

    pub fn dhcp_requests(&self) -> Vec<DhcpRequest> {
        self.dhcp.lock().unwrap().clone()
    }

    pub fn unreachable(&self) -> Vec<(UnreachableCode, PortId)> {
        self.unreachable.lock().unwrap().clone()
    }

    pub fn installed(&self) -> Vec<Installed> {
        self.installed.lock().unwrap().clone()
    }
}

// ===== Ports =====

pub fn create_test_port(short_id: u32, number: u16) -> VirtualPort {
    VirtualPort::new(
        PortId::from_short_id(short_id),
        PortNumber::new(number),
        MacAddress::new([0x02, 0, 0, 0, 0, u8::try_from(number).unwrap()]),
        ElementId::new_random(),
    )
}

// ===== Frames =====

pub fn ethernet(dst: MacAddress, src: MacAddress, ethertype: u16, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(14 + payload.len());
    frame.extend_from_slice(dst.as_bytes());
    frame.extend_from_slice(src.as_bytes());
    frame.extend_from_slice(&ethertype.to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

pub fn ipv4(src: [u8; 4], dst: [u8; 4], protocol: u8, payload: &[u8]) -> Vec<u8> {
    let total = u16::try_from(20 + payload.len()).unwrap();
    let mut pkt = vec![0x45, 0];
    pkt.extend_from_slice(&total.to_be_bytes());
    pkt.extend_from_slice(&[0, 0, 0x40, 0, 64, protocol, 0, 0]);
    pkt.extend_from_slice(&src);
    pkt.extend_from_slice(&dst);
    pkt.extend_from_slice(payload);
    pkt
}

pub fn udp(src: u16, dst: u16, payload: &[u8]) -> Vec<u8> {
    let len = u16::try_from(8 + payload.len()).unwrap();
    let mut seg = Vec::new();
    seg.extend_from_slice(&src.to_be_bytes());
    seg.extend_from_slice(&dst.to_be_bytes());
    seg.extend_from_slice(&len.to_be_bytes());
    seg.extend_from_slice(&[0, 0]);
    seg.extend_from_slice(payload);
    seg
}

pub fn tcp(src: u16, dst: u16) -> Vec<u8> {
    let mut seg = Vec::with_capacity(20);
    seg.extend_from_slice(&src.to_be_bytes());
    seg.extend_from_slice(&dst.to_be_bytes());
    seg.extend_from_slice(&[0, 0, 0, 1, 0, 0, 0, 0]);
    seg.extend_from_slice(&[0x50, 0x02, 0xff, 0xff, 0, 0, 0, 0]);
    seg
}

/// A TCP SYN from the client to the server.
pub fn tcp_frame(dst: MacAddress, src: MacAddress) -> Vec<u8> {
    ethernet(dst, src, 0x0800, &ipv4(CLIENT_IP, SERVER_IP, 6, &tcp(40000, 80)))
}

pub fn udp_frame(dst: MacAddress, src: MacAddress, src_port: u16, dst_port: u16, payload: &[u8]) -> Vec<u8> {
    ethernet(
        dst,
        src,
        0x0800,
        &ipv4(CLIENT_IP, SERVER_IP, 17, &udp(src_port, dst_port, payload)),
    )
}

/// A minimal BOOTP message with the DHCP magic cookie.
pub fn bootp(opcode: u8, client: MacAddress) -> Vec<u8> {
    let mut msg = vec![0u8; 240];
    msg[0] = opcode;
    msg[1] = 1;
    msg[2] = 6;
    msg[28..34].copy_from_slice(client.as_bytes());
    msg[236..240].copy_from_slice(&[99, 130, 83, 99]);
    msg
}

/// An ARP request, broadcast.
pub fn arp_frame(src: MacAddress) -> Vec<u8> {
    let mut arp = vec![0, 1, 0x08, 0, 6, 4, 0, 1];
    arp.extend_from_slice(src.as_bytes());
    arp.extend_from_slice(&CLIENT_IP);
    arp.extend_from_slice(&[0; 6]);
    arp.extend_from_slice(&SERVER_IP);
    ethernet(MacAddress::BROADCAST, src, ETHERTYPE_ARP, &arp)
}

pub fn frame_match(in_port: PortNumber, data: &[u8]) -> FlowMatch {
    ParsedPacket::parse(data).unwrap().flow_match(in_port)
}
