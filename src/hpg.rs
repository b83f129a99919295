//! HPG binary format: the 48-byte (three 128-bit field) edge record the
//! graphlet assembler writes and the reader/DOT-emitter consumes.
//!
//! Field 0 packs `(graphlet_nr << 4) | rank` in its low 18 bits; fields 1
//! and 2 carry either two vertex identifiers or, for `EdgeLabel` records,
//! two edge-annotation scalars.

use crate::error::{HapError, Result};
use serde::Serialize;
use std::path::Path;

/// Bits 0..3 of field 0: which edge table (or pseudo-edge) a record
/// belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Rank {
    LocalIpProt = 0,
    ProtLocalPort = 1,
    LocalPortRemotePort = 2,
    RemotePortRemoteIp = 3,
    TotalBytes = 12,
    EdgeLabel = 14,
    Version = 15,
}

impl Rank {
    fn from_bits(bits: u8) -> Option<Rank> {
        match bits {
            0 => Some(Rank::LocalIpProt),
            1 => Some(Rank::ProtLocalPort),
            2 => Some(Rank::LocalPortRemotePort),
            3 => Some(Rank::RemotePortRemoteIp),
            12 => Some(Rank::TotalBytes),
            14 => Some(Rank::EdgeLabel),
            15 => Some(Rank::Version),
            _ => None,
        }
    }
}

const GRAPHLETNUM_SHIFT: u32 = 4;

/// Size in bytes of one HPG record: three 128-bit fields.
pub const HPG_RECORD_SIZE: usize = 48;

/// One HPG edge (or pseudo-edge) record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HpgRecord {
    pub value0: u128,
    pub value1: u128,
    pub value2: u128,
}

impl HpgRecord {
    pub fn new(graphlet_nr: u16, rank: Rank, value1: u128, value2: u128) -> Self {
        let value0 = ((graphlet_nr as u128) << GRAPHLETNUM_SHIFT) | (rank as u128);
        HpgRecord { value0, value1, value2 }
    }

    pub fn version_edge(graphlet_nr: u16, version: u128) -> Self {
        Self::new(graphlet_nr, Rank::Version, version, 0)
    }

    pub fn edge_label(graphlet_nr: u16, a: u128, b: u128) -> Self {
        Self::new(graphlet_nr, Rank::EdgeLabel, a, b)
    }

    /// `totalBytes` pseudo-edge, split into high/low 32-bit halves.
    pub fn total_bytes_edge(graphlet_nr: u16, total_bytes: u64) -> Self {
        let high = (total_bytes >> 32) as u128;
        let low = (total_bytes & 0xFFFF_FFFF) as u128;
        Self::new(graphlet_nr, Rank::TotalBytes, high, low)
    }

    pub fn total_bytes_value(&self) -> u64 {
        ((self.value1 as u64) << 32) | (self.value2 as u64 & 0xFFFF_FFFF)
    }

    pub fn graphlet_nr(&self) -> u16 {
        (self.value0 >> GRAPHLETNUM_SHIFT) as u16
    }

    pub fn rank(&self) -> Rank {
        Rank::from_bits((self.value0 & 0xF) as u8).unwrap_or(Rank::EdgeLabel)
    }

    pub fn to_le_bytes(&self) -> [u8; HPG_RECORD_SIZE] {
        let mut buf = [0u8; HPG_RECORD_SIZE];
        buf[0..16].copy_from_slice(&self.value0.to_le_bytes());
        buf[16..32].copy_from_slice(&self.value1.to_le_bytes());
        buf[32..48].copy_from_slice(&self.value2.to_le_bytes());
        buf
    }

    pub fn from_le_bytes(buf: &[u8; HPG_RECORD_SIZE]) -> Self {
        HpgRecord {
            value0: u128::from_le_bytes(buf[0..16].try_into().unwrap()),
            value1: u128::from_le_bytes(buf[16..32].try_into().unwrap()),
            value2: u128::from_le_bytes(buf[32..48].try_into().unwrap()),
        }
    }
}

/// Per-graphlet descriptor rebuilt while reading an HPG file.
///
#[derive(Debug, Clone, Default, Serialize)]
pub struct GraphletMetadata {
    pub graphlet_nr: u16,
    pub edge_count: u32,
    pub protocol_count: u32,
    pub remote_ip_count: u32,
    pub local_port_count: u32,
    pub remote_port_count: u32,
    pub total_bytes: u64,
}

/// Reads and dispatches HPG records; a pure translation layer that never
/// re-runs role inference.
#[derive(Debug, Default)]
pub struct HpgReader {
    records: Vec<HpgRecord>,
    graphlets: Vec<GraphletMetadata>,
}

impl HpgReader {
    pub fn from_records(records: Vec<HpgRecord>) -> Result<Self> {
        let mut reader = HpgReader {
            records,
            graphlets: Vec::new(),
        };
        reader.rebuild_metadata()?;
        Ok(reader)
    }

    pub fn read(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        if bytes.len() % HPG_RECORD_SIZE != 0 {
            return Err(HapError::SizeNotMultiple {
                file: path.display().to_string(),
                size: bytes.len() as u64,
                record_size: HPG_RECORD_SIZE,
            });
        }
        let records = bytes
            .chunks_exact(HPG_RECORD_SIZE)
            .map(|chunk| HpgRecord::from_le_bytes(chunk.try_into().unwrap()))
            .collect();
        Self::from_records(records)
    }

    pub fn write(path: &Path, records: &[HpgRecord]) -> Result<()> {
        let mut bytes = Vec::with_capacity(records.len() * HPG_RECORD_SIZE);
        for record in records {
            bytes.extend_from_slice(&record.to_le_bytes());
        }
        std::fs::write(path, bytes)?;
        Ok(())
    }

    fn rebuild_metadata(&mut self) -> Result<()> {
        let mut current: Option<GraphletMetadata> = None;
        for record in &self.records {
            if record.rank() == Rank::Version {
                if let Some(done) = current.take() {
                    self.graphlets.push(done);
                }
                current = Some(GraphletMetadata {
                    graphlet_nr: record.graphlet_nr(),
                    ..Default::default()
                });
                continue;
            }
            let Some(meta) = current.as_mut() else {
                return Err(HapError::FormatCorrupted {
                    file: String::new(),
                    detail: "record before first version edge".to_string(),
                });
            };
            match record.rank() {
                Rank::LocalIpProt => {
                    meta.edge_count += 1;
                    meta.protocol_count += 1;
                }
                Rank::ProtLocalPort => {
                    meta.local_port_count += 1;
                }
                Rank::LocalPortRemotePort => {
                    meta.edge_count += 1;
                }
                Rank::RemotePortRemoteIp => {
                    meta.edge_count += 1;
                    meta.remote_port_count += 1;
                    meta.remote_ip_count += 1;
                }
                Rank::TotalBytes => {
                    meta.total_bytes = record.total_bytes_value();
                }
                Rank::EdgeLabel | Rank::Version => {}
            }
        }
        if let Some(done) = current {
            self.graphlets.push(done);
        }
        Ok(())
    }

    pub fn graphlets(&self) -> impl Iterator<Item = &GraphletMetadata> {
        self.graphlets.iter()
    }

    pub fn records(&self) -> &[HpgRecord] {
        &self.records
    }

    /// Emits a DOT-style textual description of one graphlet. Pure
    /// translation: does not modify HPG data or re-run role inference.
    pub fn to_dot(&self, graphlet_nr: u16) -> String {
        let mut out = format!("digraph graphlet_{} {{\n", graphlet_nr);
        for record in self.records.iter().filter(|r| r.graphlet_nr() == graphlet_nr) {
            match record.rank() {
                Rank::LocalIpProt => {
                    out.push_str(&format!("  \"ip\" -> \"prot{}\";\n", record.value2));
                }
                Rank::ProtLocalPort => {
                    out.push_str(&format!("  \"prot{}\" -> \"lport{:x}\";\n", record.value1, record.value2));
                }
                Rank::LocalPortRemotePort => {
                    out.push_str(&format!("  \"lport{:x}\" -> \"rport{:x}\";\n", record.value1, record.value2));
                }
                Rank::RemotePortRemoteIp => {
                    out.push_str(&format!("  \"rport{:x}\" -> \"rip{:x}\";\n", record.value1, record.value2));
                }
                Rank::Version | Rank::EdgeLabel | Rank::TotalBytes => {}
            }
        }
        out.push_str("}\n");
        out
    }
}

/// Per-summary-node diagnostic emitted when DOT emission runs in "plugin"
/// mode.
#[derive(Debug, Clone, Serialize)]
pub struct SummaryNodeInfo {
    pub partition: String,
    pub protocol_name: String,
    pub local_ports: Vec<u16>,
    pub remote_ports: Vec<u16>,
    pub remote_ips: Vec<crate::ip_addr::IpAddr>,
    pub flow_direction: String,
    pub role_type_char: char,
}

impl SummaryNodeInfo {
    /// `role_type_char` follows the original's single-letter role tags:
    /// `c` client, `m` multi-client, `s` server, `p` p2p, `f` single flow.
    pub fn from_role(partition: &str, role: &crate::role::Role) -> Self {
        let role_type_char = match role.kind {
            crate::role::RoleKind::Client => 'c',
            crate::role::RoleKind::MultiClient => 'm',
            crate::role::RoleKind::Server => 's',
            crate::role::RoleKind::P2p => 'p',
            crate::role::RoleKind::SingleFlow => 'f',
        };
        let flow_direction = if role.flowtype.is_biflow() {
            "biflow"
        } else if role.flowtype.is_unibiflow_qualified() {
            "unibiflow"
        } else if role.flowtype.contains(crate::flow::FlowType::OUTFLOW) {
            "outflow"
        } else {
            "inflow"
        };
        SummaryNodeInfo {
            partition: partition.to_string(),
            protocol_name: format!("{:?}", crate::protocol::ProtocolTypes::from(role.protocol)),
            local_ports: if role.local_port != 0 { vec![role.local_port] } else { Vec::new() },
            remote_ports: if role.remote_port != 0 { vec![role.remote_port] } else { Vec::new() },
            remote_ips: role.remote_ip_set.iter().copied().collect(),
            flow_direction: flow_direction.to_string(),
            role_type_char,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_edge_round_trips_rank_and_graphlet_nr() {
        let record = HpgRecord::version_edge(42, 1);
        let bytes = record.to_le_bytes();
        let decoded = HpgRecord::from_le_bytes(&bytes);
        assert_eq!(decoded.rank(), Rank::Version);
        assert_eq!(decoded.graphlet_nr(), 42);
    }

    #[test]
    fn total_bytes_edge_round_trips_value() {
        let record = HpgRecord::total_bytes_edge(1, 123_456_789);
        assert_eq!(record.total_bytes_value(), 123_456_789);
    }

    #[test]
    fn summary_node_info_picks_role_type_char_and_protocol_name() {
        let role = crate::role::Role {
            role_num: 1,
            kind: crate::role::RoleKind::Server,
            pattern: crate::role::RoleKind::Server.canonical_pattern(),
            protocol: crate::flow::well_known_protocol::TCP,
            local_port: 80,
            remote_port: 0,
            remote_ip: crate::ip_addr::IpAddr::UNSET,
            flowtype: crate::flow::FlowType::new(crate::flow::FlowType::BIFLOW),
            flow_set: Default::default(),
            remote_ip_set: Default::default(),
            child_roles: Vec::new(),
            sub_role_set: Vec::new(),
            flows: 3,
            packets: 30,
            bytes: 3000,
            rating: 1.0,
        };
        let info = SummaryNodeInfo::from_role("remotePort_remoteIP", &role);
        assert_eq!(info.role_type_char, 's');
        assert_eq!(info.protocol_name, "TCP");
        assert_eq!(info.flow_direction, "biflow");
    }

    #[test]
    fn reader_groups_records_by_graphlet_starting_at_version() {
        let records = vec![
            HpgRecord::version_edge(1, 1),
            HpgRecord::total_bytes_edge(1, 1000),
            HpgRecord::version_edge(2, 1),
            HpgRecord::total_bytes_edge(2, 2000),
        ];
        let reader = HpgReader::from_records(records).unwrap();
        let metas: Vec<_> = reader.graphlets().collect();
        assert_eq!(metas.len(), 2);
        assert_eq!(metas[0].total_bytes, 1000);
        assert_eq!(metas[1].total_bytes, 2000);
    }
}
