//! Post-load pipeline: sorting, uniflow qualification, the remote-IP
//! reverse index, and active-view (subflow) selection.
//!
//! The active view over a local host's flows is a plain `[begin, end)`
//! index pair into an owned, sorted `Vec<FlowRecord>`.

use crate::flow::FlowRecord;
use crate::ip_addr::IpAddr;
use std::collections::HashMap;

/// An owned, sorted flow list plus the reverse index and uniflow
/// qualification computed by [`FlowList::load`].
#[derive(Debug, Clone)]
pub struct FlowList {
    flows: Vec<FlowRecord>,
    /// Permutation of `flows` indices, sorted by `remoteIP` ascending.
    reverse_index: Vec<usize>,
}

impl FlowList {
    /// Runs the full post-load pipeline over a raw flow list from the codec
    /// or an external pcap/nfdump loader: sort, uniflow qualification, and
    /// reverse-index construction.
    pub fn load(mut flows: Vec<FlowRecord>) -> Self {
        flows.sort_by_key(FlowRecord::sort_key);
        qualify_uniflows(&mut flows);
        let reverse_index = build_reverse_index(&flows);
        FlowList { flows, reverse_index }
    }

    pub fn flows(&self) -> &[FlowRecord] {
        &self.flows
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    /// Narrows to the contiguous run of flows whose `localIP == ip`,
    /// relying on the `(localIP, remoteIP, startMs)` sort order.
    pub fn active_view(&self, ip: &IpAddr) -> Subflowlist<'_> {
        let begin = self.flows.partition_point(|f| &f.local_ip < ip);
        let end = self.flows.partition_point(|f| &f.local_ip <= ip);
        Subflowlist {
            flows: &self.flows[begin..end],
        }
    }

    /// Builds the synthetic "outside view" for one remote IP: every flow
    /// touching `ip` as a remote endpoint, with local/remote fields
    /// swapped and direction bits flipped.
    pub fn reverse_view(&self, ip: &IpAddr) -> Vec<FlowRecord> {
        let begin = self
            .reverse_index
            .partition_point(|&i| &self.flows[i].remote_ip < ip);
        let end = self
            .reverse_index
            .partition_point(|&i| &self.flows[i].remote_ip <= ip);
        self.reverse_index[begin..end]
            .iter()
            .map(|&i| self.flows[i].swapped())
            .collect()
    }
}

/// A read-only, contiguous window over a [`FlowList`]'s flows belonging to
/// one local host — the unit the role engine and graphlet assembler
/// operate on.
#[derive(Debug, Clone, Copy)]
pub struct Subflowlist<'a> {
    flows: &'a [FlowRecord],
}

impl<'a> Subflowlist<'a> {
    pub fn flows(&self) -> &'a [FlowRecord] {
        self.flows
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    pub fn local_ip(&self) -> Option<IpAddr> {
        self.flows.first().map(|f| f.local_ip)
    }
}

/// Two-pass uniflow qualification: a flow is `UNIBIFLOW`-qualified iff its
/// ordered host pair has at least one biflow elsewhere in the same list.
fn qualify_uniflows(flows: &mut [FlowRecord]) {
    let mut biflow_counts: HashMap<(IpAddr, IpAddr), u32> = HashMap::new();
    for flow in flows.iter() {
        if flow.flowtype.is_biflow() {
            *biflow_counts.entry((flow.local_ip, flow.remote_ip)).or_insert(0) += 1;
        }
    }
    for flow in flows.iter_mut() {
        if flow.flowtype.is_uniflow() {
            let pair_has_biflow = biflow_counts
                .get(&(flow.local_ip, flow.remote_ip))
                .copied()
                .unwrap_or(0)
                > 0;
            if pair_has_biflow {
                flow.flowtype.set(crate::flow::FlowType::UNIBIFLOW);
            }
        }
    }
}

fn build_reverse_index(flows: &[FlowRecord]) -> Vec<usize> {
    let mut index: Vec<usize> = (0..flows.len()).collect();
    index.sort_by_key(|&i| flows[i].remote_ip);
    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::{well_known_protocol, FlowType};

    fn flow(local: [u8; 4], local_port: u16, remote: [u8; 4], remote_port: u16, flowtype: u8) -> FlowRecord {
        FlowRecord::new(
            IpAddr::from_ipv4_octets(local),
            local_port,
            IpAddr::from_ipv4_octets(remote),
            remote_port,
            well_known_protocol::TCP,
            FlowType::new(flowtype),
            0,
            0,
            100,
            1,
        )
    }

    #[test]
    fn load_sorts_by_local_remote_start() {
        let flows = vec![
            flow([10, 0, 0, 2], 1, [1, 1, 1, 1], 1, FlowType::BIFLOW),
            flow([10, 0, 0, 1], 1, [1, 1, 1, 1], 1, FlowType::BIFLOW),
        ];
        let list = FlowList::load(flows);
        assert!(list.flows()[0].local_ip < list.flows()[1].local_ip);
    }

    #[test]
    fn uniflow_is_qualified_only_when_biflow_shares_host_pair() {
        let flows = vec![
            flow([10, 0, 0, 1], 1, [1, 1, 1, 1], 1, FlowType::BIFLOW),
            flow([10, 0, 0, 1], 2, [1, 1, 1, 1], 2, FlowType::OUTFLOW),
            flow([10, 0, 0, 1], 3, [2, 2, 2, 2], 3, FlowType::OUTFLOW),
        ];
        let list = FlowList::load(flows);
        let qualified: Vec<bool> = list
            .flows()
            .iter()
            .map(|f| f.flowtype.is_unibiflow_qualified())
            .collect();
        // the outflow to 1.1.1.1 shares a host pair with a biflow; the one
        // to 2.2.2.2 does not.
        assert_eq!(qualified.iter().filter(|&&q| q).count(), 1);
    }

    #[test]
    fn active_view_narrows_to_one_local_ip() {
        let flows = vec![
            flow([10, 0, 0, 1], 1, [1, 1, 1, 1], 1, FlowType::BIFLOW),
            flow([10, 0, 0, 2], 1, [1, 1, 1, 1], 1, FlowType::BIFLOW),
        ];
        let list = FlowList::load(flows);
        let view = list.active_view(&IpAddr::from_ipv4_octets([10, 0, 0, 1]));
        assert_eq!(view.len(), 1);
        assert_eq!(view.local_ip(), Some(IpAddr::from_ipv4_octets([10, 0, 0, 1])));
    }

    #[test]
    fn reverse_view_swaps_endpoints_and_flips_direction() {
        let flows = vec![flow(
            [10, 0, 0, 1],
            80,
            [9, 9, 9, 9],
            1100,
            FlowType::OUTFLOW,
        )];
        let list = FlowList::load(flows);
        let outside = list.reverse_view(&IpAddr::from_ipv4_octets([9, 9, 9, 9]));
        assert_eq!(outside.len(), 1);
        assert_eq!(outside[0].local_ip, IpAddr::from_ipv4_octets([9, 9, 9, 9]));
        assert_eq!(outside[0].remote_ip, IpAddr::from_ipv4_octets([10, 0, 0, 1]));
        assert_eq!(outside[0].flowtype.0, FlowType::INFLOW);
    }
}
