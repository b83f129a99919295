//! Flow record: the fixed-layout, little-endian, 72-byte `cflow6` record
//! plus the legacy 48-byte v4 layout it is up-promoted from.

use crate::ip_addr::IpAddr;
use serde::Serialize;
use std::fmt;

pub const CFLOW_4_MAGIC_NUMBER: u8 = 1;
pub const CFLOW_6_MAGIC_NUMBER: u8 = 2;
pub const CFLOW_CURRENT_MAGIC_NUMBER: u8 = CFLOW_6_MAGIC_NUMBER;

/// Size in bytes of the on-disk v6 (current) flow record.
pub const FLOW_RECORD_V6_SIZE: usize = 72;
/// Size in bytes of the legacy v4 flow record.
pub const FLOW_RECORD_V4_SIZE: usize = 48;

/// Direction/flow-type bitset. The low four bits replicate the legacy `dir`
/// numeric codes so readers that historically consume `dir` see the same
/// byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub struct FlowType(pub u8);

impl FlowType {
    pub const OUTFLOW: u8 = 0x01;
    pub const INFLOW: u8 = 0x02;
    pub const BIFLOW: u8 = 0x04;
    pub const UNIBIFLOW: u8 = 0x08;
    pub const UNIFLOW: u8 = Self::OUTFLOW | Self::INFLOW;

    pub const fn new(bits: u8) -> Self {
        FlowType(bits)
    }

    pub fn contains(&self, mask: u8) -> bool {
        self.0 & mask != 0
    }

    pub fn set(&mut self, mask: u8) {
        self.0 |= mask;
    }

    pub fn clear(&mut self, mask: u8) {
        self.0 &= !mask;
    }

    pub fn is_uniflow(&self) -> bool {
        self.contains(Self::UNIFLOW)
    }

    pub fn is_biflow(&self) -> bool {
        self.contains(Self::BIFLOW)
    }

    pub fn is_unibiflow_qualified(&self) -> bool {
        self.contains(Self::UNIBIFLOW)
    }

    /// Swaps OUTFLOW/INFLOW bits in place; biflow and unibiflow bits are
    /// left untouched. Used by the reverse-index view.
    pub fn flip_direction(&self) -> FlowType {
        let mut bits = self.0 & !(Self::OUTFLOW | Self::INFLOW);
        if self.contains(Self::OUTFLOW) {
            bits |= Self::INFLOW;
        }
        if self.contains(Self::INFLOW) {
            bits |= Self::OUTFLOW;
        }
        FlowType(bits)
    }
}

/// IP protocol numbers relevant to role inference and filtering. Distinct
/// from the broader `ProtocolTypes` table in [`crate::protocol`]; kept small
/// on purpose since only these three drive role-engine behavior.
pub mod well_known_protocol {
    pub const TCP: u8 = 6;
    pub const UDP: u8 = 17;
    pub const ICMP: u8 = 1;
}

/// One aggregated communication between a local and a remote endpoint.
///
/// Wire layout (little-endian, no padding, exactly 72 bytes):
/// `magic, protocol, flowtype, tos_flags, durationMs, startMs, localIP,
/// remoteIP, dOctets, dPkts, localPort, remotePort, localAS, remoteAS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FlowRecord {
    pub magic: u8,
    pub protocol: u8,
    pub flowtype: FlowType,
    pub tos_flags: u8,
    pub duration_ms: u32,
    pub start_ms: u64,
    pub local_ip: IpAddr,
    pub remote_ip: IpAddr,
    pub d_octets: u64,
    pub d_pkts: u32,
    pub local_port: u16,
    pub remote_port: u16,
    pub local_as: u32,
    pub remote_as: u32,
}

impl FlowRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        local_ip: IpAddr,
        local_port: u16,
        remote_ip: IpAddr,
        remote_port: u16,
        protocol: u8,
        flowtype: FlowType,
        start_ms: u64,
        duration_ms: u32,
        d_octets: u64,
        d_pkts: u32,
    ) -> Self {
        FlowRecord {
            magic: CFLOW_CURRENT_MAGIC_NUMBER,
            protocol,
            flowtype,
            tos_flags: 0,
            duration_ms,
            start_ms,
            local_ip,
            remote_ip,
            d_octets,
            d_pkts,
            local_port,
            remote_port,
            local_as: 0,
            remote_as: 0,
        }
    }

    /// Serializes this record into its 72-byte little-endian wire form.
    pub fn to_le_bytes(&self) -> [u8; FLOW_RECORD_V6_SIZE] {
        let mut buf = [0u8; FLOW_RECORD_V6_SIZE];
        buf[0] = self.magic;
        buf[1] = self.protocol;
        buf[2] = self.flowtype.0;
        buf[3] = self.tos_flags;
        buf[4..8].copy_from_slice(&self.duration_ms.to_le_bytes());
        buf[8..16].copy_from_slice(&self.start_ms.to_le_bytes());
        buf[16..32].copy_from_slice(&self.local_ip.0);
        buf[32..48].copy_from_slice(&self.remote_ip.0);
        buf[48..56].copy_from_slice(&self.d_octets.to_le_bytes());
        buf[56..60].copy_from_slice(&self.d_pkts.to_le_bytes());
        buf[60..62].copy_from_slice(&self.local_port.to_le_bytes());
        buf[62..64].copy_from_slice(&self.remote_port.to_le_bytes());
        buf[64..68].copy_from_slice(&self.local_as.to_le_bytes());
        buf[68..72].copy_from_slice(&self.remote_as.to_le_bytes());
        buf
    }

    /// Parses a 72-byte little-endian record. `buf` must be exactly
    /// [`FLOW_RECORD_V6_SIZE`] bytes (callers slice the gzip stream first).
    pub fn from_le_bytes(buf: &[u8; FLOW_RECORD_V6_SIZE]) -> Self {
        let mut local_ip = [0u8; 16];
        local_ip.copy_from_slice(&buf[16..32]);
        let mut remote_ip = [0u8; 16];
        remote_ip.copy_from_slice(&buf[32..48]);
        FlowRecord {
            magic: buf[0],
            protocol: buf[1],
            flowtype: FlowType(buf[2]),
            tos_flags: buf[3],
            duration_ms: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
            start_ms: u64::from_le_bytes(buf[8..16].try_into().unwrap()),
            local_ip: IpAddr(local_ip),
            remote_ip: IpAddr(remote_ip),
            d_octets: u64::from_le_bytes(buf[48..56].try_into().unwrap()),
            d_pkts: u32::from_le_bytes(buf[56..60].try_into().unwrap()),
            local_port: u16::from_le_bytes(buf[60..62].try_into().unwrap()),
            remote_port: u16::from_le_bytes(buf[62..64].try_into().unwrap()),
            local_as: u32::from_le_bytes(buf[64..68].try_into().unwrap()),
            remote_as: u32::from_le_bytes(buf[68..72].try_into().unwrap()),
        }
    }

    /// `true` when both size invariants hold (`dPkts >= 1` and `dOctets >= 1`)
    /// and the host pair isn't degenerate (both unset).
    pub fn is_valid(&self) -> bool {
        self.d_pkts >= 1
            && self.d_octets >= 1
            && !(self.local_ip.is_unset() && self.remote_ip.is_unset())
    }

    /// Key used to sort the flow list: `(localIP, remoteIP, startMs)`.
    pub fn sort_key(&self) -> (IpAddr, IpAddr, u64) {
        (self.local_ip, self.remote_ip, self.start_ms)
    }

    /// Returns a copy with local/remote fields swapped and the direction
    /// bits flipped, used by the reverse-index "outside" view. Biflow and
    /// unibiflow-qualification bits are preserved.
    pub fn swapped(&self) -> FlowRecord {
        FlowRecord {
            local_ip: self.remote_ip,
            remote_ip: self.local_ip,
            local_port: self.remote_port,
            remote_port: self.local_port,
            local_as: self.remote_as,
            remote_as: self.local_as,
            flowtype: self.flowtype.flip_direction(),
            ..*self
        }
    }
}

impl fmt::Display for FlowRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "prot={} {}:{} -> {}:{} AS:{}->{} {}B {}pkts start={} dur={}ms ToS={} magic={}",
            self.protocol,
            self.local_ip,
            self.local_port,
            self.remote_ip,
            self.remote_port,
            self.local_as,
            self.remote_as,
            self.d_octets,
            self.d_pkts,
            self.start_ms,
            self.duration_ms,
            self.tos_flags,
            self.magic,
        )
    }
}

/// Legacy 48-byte, IPv4-only flow record. Exists only as the up-promotion
/// source for [`FlowRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowRecordV4 {
    pub magic: u8,
    pub protocol: u8,
    pub flowtype: FlowType,
    pub tos_flags: u8,
    pub duration_ms: u32,
    pub start_secs: u32,
    pub local_ip: [u8; 4],
    pub remote_ip: [u8; 4],
    pub d_octets: u32,
    pub d_pkts: u32,
    pub local_port: u16,
    pub remote_port: u16,
}

impl FlowRecordV4 {
    pub fn from_le_bytes(buf: &[u8; FLOW_RECORD_V4_SIZE]) -> Self {
        FlowRecordV4 {
            magic: buf[0],
            protocol: buf[1],
            flowtype: FlowType(buf[2]),
            tos_flags: buf[3],
            duration_ms: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
            start_secs: u32::from_le_bytes(buf[8..12].try_into().unwrap()),
            local_ip: buf[12..16].try_into().unwrap(),
            remote_ip: buf[16..20].try_into().unwrap(),
            d_octets: u32::from_le_bytes(buf[20..24].try_into().unwrap()),
            d_pkts: u32::from_le_bytes(buf[24..28].try_into().unwrap()),
            local_port: u16::from_le_bytes(buf[28..30].try_into().unwrap()),
            remote_port: u16::from_le_bytes(buf[30..32].try_into().unwrap()),
        }
    }

    /// Up-promotes to the current v6 record: zero-extends IPv4 addresses to
    /// IPv4-mapped IPv6 form, sets magic to the current value, and zeros the
    /// fields v4 never had (AS numbers).
    pub fn up_promote(&self) -> FlowRecord {
        FlowRecord {
            magic: CFLOW_CURRENT_MAGIC_NUMBER,
            protocol: self.protocol,
            flowtype: self.flowtype,
            tos_flags: self.tos_flags,
            duration_ms: self.duration_ms,
            start_ms: (self.start_secs as u64) * 1000,
            local_ip: IpAddr::from_ipv4_octets(self.local_ip),
            remote_ip: IpAddr::from_ipv4_octets(self.remote_ip),
            d_octets: self.d_octets as u64,
            d_pkts: self.d_pkts,
            local_port: self.local_port,
            remote_port: self.remote_port,
            local_as: 0,
            remote_as: 0,
        }
    }
}

/// Local network / netmask the UI supplies for pcap input, which lacks that
/// information on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalNetwork {
    pub addr: IpAddr,
    pub prefix_len: u8,
}

impl LocalNetwork {
    pub fn contains(&self, ip: &IpAddr) -> bool {
        let mask = IpAddr::netmask(self.prefix_len);
        ip.mask(&mask) == self.addr.mask(&mask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FlowRecord {
        FlowRecord::new(
            IpAddr::from_ipv4_octets([10, 0, 1, 1]),
            80,
            IpAddr::from_ipv4_octets([10, 0, 99, 1]),
            1100,
            well_known_protocol::TCP,
            FlowType::new(FlowType::BIFLOW),
            1_700_000_000_000,
            1500,
            1000,
            1,
        )
    }

    #[test]
    fn round_trips_through_wire_bytes() {
        let flow = sample();
        let bytes = flow.to_le_bytes();
        assert_eq!(bytes.len(), FLOW_RECORD_V6_SIZE);
        let decoded = FlowRecord::from_le_bytes(&bytes);
        assert_eq!(decoded, flow);
    }

    #[test]
    fn v4_up_promotion_zero_extends_and_zeroes_as() {
        let v4 = FlowRecordV4 {
            magic: CFLOW_4_MAGIC_NUMBER,
            protocol: well_known_protocol::UDP,
            flowtype: FlowType::new(FlowType::OUTFLOW),
            tos_flags: 0,
            duration_ms: 10,
            start_secs: 1_700_000_000,
            local_ip: [192, 168, 1, 1],
            remote_ip: [8, 8, 8, 8],
            d_octets: 500,
            d_pkts: 2,
            local_port: 53,
            remote_port: 5353,
        };
        let promoted = v4.up_promote();
        assert_eq!(promoted.magic, CFLOW_CURRENT_MAGIC_NUMBER);
        assert_eq!(promoted.local_as, 0);
        assert_eq!(promoted.remote_as, 0);
        assert_eq!(
            promoted.local_ip.to_ipv4(),
            Some(std::net::Ipv4Addr::new(192, 168, 1, 1))
        );
        assert_eq!(promoted.start_ms, 1_700_000_000_000);
    }

    #[test]
    fn flip_direction_swaps_in_out_and_preserves_biflow() {
        let mut ft = FlowType::new(FlowType::OUTFLOW);
        assert_eq!(ft.flip_direction().0, FlowType::INFLOW);

        ft = FlowType::new(FlowType::BIFLOW | FlowType::UNIBIFLOW);
        assert_eq!(ft.flip_direction(), ft);
    }

    #[test]
    fn swapped_flips_endpoints_and_direction() {
        let flow = FlowRecord::new(
            IpAddr::from_ipv4_octets([10, 0, 1, 1]),
            80,
            IpAddr::from_ipv4_octets([10, 0, 99, 1]),
            1100,
            well_known_protocol::TCP,
            FlowType::new(FlowType::OUTFLOW),
            0,
            0,
            1,
            1,
        );
        let swapped = flow.swapped();
        assert_eq!(swapped.local_ip, flow.remote_ip);
        assert_eq!(swapped.remote_ip, flow.local_ip);
        assert_eq!(swapped.local_port, flow.remote_port);
        assert_eq!(swapped.flowtype.0, FlowType::INFLOW);
    }

    #[test]
    fn validity_requires_nonzero_packets_and_bytes() {
        let mut flow = sample();
        flow.d_pkts = 0;
        assert!(!flow.is_valid());
        flow.d_pkts = 1;
        flow.d_octets = 0;
        assert!(!flow.is_valid());
    }

    #[test]
    fn local_network_contains_checks_prefix() {
        let net = LocalNetwork {
            addr: IpAddr::from_ipv4_octets([10, 0, 0, 0]),
            prefix_len: 120, // /24 in the mapped-IPv6 address space
        };
        assert!(net.contains(&IpAddr::from_ipv4_octets([10, 0, 0, 42])));
        assert!(!net.contains(&IpAddr::from_ipv4_octets([10, 0, 1, 42])));
    }
}
