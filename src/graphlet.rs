//! Graphlet assembler: builds the five edge tables of the host application
//! profile graphlet for one local host and emits them as HPG records.
//!
//! Port encoding uses a fixed bit layout; the inheritance-free `Role`
//! record (see [`crate::role`]) carries the partition pattern that
//! decides which partitions a role's edges summarize.

use crate::flow::FlowRecord;
use crate::hpg::{HpgRecord, Rank};
use crate::ip_addr::IpAddr;
use crate::role::{Pattern, Role};
use std::collections::BTreeMap;

pub const COLORTYPE_SHIFT: u32 = 60;
pub const PROTCODE_SHIFT3: u32 = 56;
pub const FLOWTYPE_SHIFT3: u32 = 48;
pub const ROLE_SHIFT3: u32 = 24;
pub const HOSTNUM_SHIFT: u32 = 24;
pub const GRAPHLETNUM_SHIFT: u32 = 4;

pub const ROLE_NR_BIT_MASK: u64 = 0xFFFFFF;
pub const HOSTNUM_BIT_MASK: u64 = 0xFFFFFF;
pub const FLOW_COUNT_BIT_MASK: u64 = 0xFFFFFF;
pub const CLIENT_COUNT_BIT_MASK: u64 = 0xFFFFFF;

/// Flag bit distinguishing a role-scoped, summarized port identifier from
/// a literal port number in the packed port-identifier space.
const SUMMARY_PORT_FLAG: u64 = 1 << 40;

/// Maps flowtype to the 2-bit color code packed at [`COLORTYPE_SHIFT`]:
/// biflow -> 0, uniflow -> 1, unibiflow-qualified -> 2.
fn color_code(flowtype: crate::flow::FlowType) -> u64 {
    if flowtype.is_biflow() {
        0
    } else if flowtype.is_unibiflow_qualified() {
        2
    } else {
        1
    }
}

/// Packs a port identifier: color, protocol, flowtype, and either a literal
/// port number or a role number (tagged with [`SUMMARY_PORT_FLAG`]) in the
/// low bits, mirroring the `hpg.h` port-identifier layout.
fn pack_port_id(flowtype: crate::flow::FlowType, protocol: u8, low_bits: u64) -> u64 {
    (color_code(flowtype) << COLORTYPE_SHIFT)
        | ((protocol as u64) << PROTCODE_SHIFT3)
        | ((flowtype.0 as u64) << FLOWTYPE_SHIFT3)
        | (low_bits & (ROLE_NR_BIT_MASK | SUMMARY_PORT_FLAG))
}

fn role_scoped_port(role_num: u32) -> u64 {
    SUMMARY_PORT_FLAG | (role_num as u64 & ROLE_NR_BIT_MASK)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct LocalIpProtKey(IpAddr, u8);

#[derive(Debug, Default)]
struct Tables {
    local_ip_prot: BTreeMap<LocalIpProtKey, ()>,
    prot_local_port: BTreeMap<(u8, u64), ()>,
    local_port_remote_port: BTreeMap<(u64, u64), (u64, u64)>,
    remote_port_remote_ip: BTreeMap<(u64, IpAddr), (u64, u64, bool)>,
    total_bytes: u64,
}

impl Tables {
    fn clear(&mut self) {
        *self = Tables::default();
    }
}

/// Assembles the HPG records for one local host's active view, one
/// graphlet at a time.
#[derive(Debug, Default)]
pub struct GraphletAssembler {
    tables: Tables,
}

impl GraphletAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds and finalizes one graphlet's HPG records for `view`, given
    /// the finalized `roles` and the per-flow `flow_role` assignment
    /// vector.
    pub fn assemble(&mut self, view: &[FlowRecord], roles: &[Role], flow_role: &[u32], graphlet_nr: u16) -> Vec<HpgRecord> {
        self.tables.clear();

        for (i, flow) in view.iter().enumerate() {
            if flow_role[i] == 0 {
                self.add_single_flow_edges(flow);
            }
        }
        for role in roles.iter() {
            self.add_role_edges(role, view);
        }

        self.tables.total_bytes = view.iter().map(|f| f.d_octets).sum();
        self.emit(graphlet_nr)
    }

    fn add_single_flow_edges(&mut self, flow: &FlowRecord) {
        self.tables
            .local_ip_prot
            .insert(LocalIpProtKey(flow.local_ip, flow.protocol), ());

        let local_port_id = pack_port_id(flow.flowtype, flow.protocol, flow.local_port as u64);
        self.tables.prot_local_port.insert((flow.protocol, local_port_id), ());

        let remote_port_id = pack_port_id(flow.flowtype, flow.protocol, flow.remote_port as u64);
        let entry = self
            .tables
            .local_port_remote_port
            .entry((local_port_id, remote_port_id))
            .or_insert((0, 0));
        entry.0 += flow.d_octets;
        entry.1 += flow.d_pkts as u64;

        let entry = self
            .tables
            .remote_port_remote_ip
            .entry((remote_port_id, flow.remote_ip))
            .or_insert((0, 0, false));
        entry.0 += 1;
        entry.1 += flow.d_pkts as u64;
    }

    /// Adds edges for one finalized role. `localPort_remotePort` and
    /// `remotePort_remoteIP` each pick between a literal-port/single-IP
    /// variant and a role-scoped summary-node variant depending on which
    /// partitions `role.pattern` summarizes.
    fn add_role_edges(&mut self, role: &Role, view: &[FlowRecord]) {
        if role.role_num == 0 || role.flow_set.is_empty() {
            return;
        }
        let local_ip = view[*role.flow_set.iter().next().unwrap()].local_ip;
        self.tables.local_ip_prot.insert(LocalIpProtKey(local_ip, role.protocol), ());

        let local_port_summarized = role.pattern.contains(Pattern::LOCAL_PORT);
        let remote_port_summarized = role.pattern.contains(Pattern::REMOTE_PORT);
        let remote_ip_summarized = role.pattern.contains(Pattern::REMOTE_IP);

        let local_port_id = pack_port_id(
            role.flowtype,
            role.protocol,
            if local_port_summarized {
                role_scoped_port(role.role_num)
            } else {
                role.local_port as u64
            },
        );
        self.tables.prot_local_port.insert((role.protocol, local_port_id), ());

        let remote_port_id = pack_port_id(
            role.flowtype,
            role.protocol,
            if remote_port_summarized {
                role_scoped_port(role.role_num)
            } else {
                role.remote_port as u64
            },
        );
        let entry = self
            .tables
            .local_port_remote_port
            .entry((local_port_id, remote_port_id))
            .or_insert((0, 0));
        entry.0 += role.bytes;
        entry.1 += role.packets;

        if remote_ip_summarized {
            // Summary-node variant: one annotated edge per remote IP, with
            // the packets field carrying packets-per-flow x10 (rounded)
            // tagged by the high-bit marker.
            let packets_per_flow_x10 = if role.flows > 0 {
                (role.packets * 10 / role.flows as u64).max(1)
            } else {
                0
            };
            for &remote_ip in role.remote_ip_set.iter() {
                let entry = self
                    .tables
                    .remote_port_remote_ip
                    .entry((remote_port_id, remote_ip))
                    .or_insert((0, 0, true));
                entry.0 += 1;
                entry.1 = packets_per_flow_x10;
                entry.2 = true;
            }
        } else {
            for &remote_ip in role.remote_ip_set.iter() {
                let entry = self
                    .tables
                    .remote_port_remote_ip
                    .entry((remote_port_id, remote_ip))
                    .or_insert((0, 0, false));
                entry.0 += role.flows as u64;
                entry.1 += role.packets;
            }
        }
    }

    /// Finalization order: version pseudo-edge, the four tables in rank
    /// order, then the `totalBytes` pseudo-edge.
    fn emit(&self, graphlet_nr: u16) -> Vec<HpgRecord> {
        let mut records = Vec::new();
        records.push(HpgRecord::version_edge(graphlet_nr, 1));

        for LocalIpProtKey(ip, prot) in self.tables.local_ip_prot.keys() {
            records.push(HpgRecord::new(
                graphlet_nr,
                Rank::LocalIpProt,
                u128::from_le_bytes(ip.0),
                *prot as u128,
            ));
        }
        for &(prot, port_id) in self.tables.prot_local_port.keys() {
            records.push(HpgRecord::new(graphlet_nr, Rank::ProtLocalPort, prot as u128, port_id as u128));
        }
        for (&(local_id, remote_id), &(bytes, pkts)) in self.tables.local_port_remote_port.iter() {
            records.push(HpgRecord::new(
                graphlet_nr,
                Rank::LocalPortRemotePort,
                local_id as u128,
                remote_id as u128,
            ));
            records.push(HpgRecord::edge_label(graphlet_nr, bytes as u128, pkts as u128));
        }
        for (&(remote_id, remote_ip), &(flows_or_count, pkts, is_summary)) in self.tables.remote_port_remote_ip.iter() {
            records.push(HpgRecord::new(
                graphlet_nr,
                Rank::RemotePortRemoteIp,
                remote_id as u128,
                u128::from_le_bytes(remote_ip.0),
            ));
            let marked_pkts = if is_summary {
                pkts | hpg_ext::PACKETS_PER_FLOW_MARKER as u64
            } else {
                pkts
            };
            records.push(HpgRecord::edge_label(graphlet_nr, flows_or_count as u128, marked_pkts as u128));
        }

        records.push(HpgRecord::total_bytes_edge(graphlet_nr, self.tables.total_bytes));
        records
    }
}

/// Marker constant kept alongside the assembler rather than in `hpg.rs`
/// since only role-scoped summary-node edges ever set it.
pub mod hpg_ext {
    pub const PACKETS_PER_FLOW_MARKER: u128 = 0x8000_0000;
}
