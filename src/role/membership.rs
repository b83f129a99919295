//! Role membership: the join index between remote IPs and the roles that
//! claim them.
//!
//! Modeled as a single keyed join table rather than roles and remote-IP
//! records holding pointers into each other, so no raw pointers or shared
//! mutable cycles are needed between a role and the IPs it claims.

use super::Role;
use crate::ip_addr::IpAddr;
use std::collections::{BTreeMap, HashMap};

/// Maximum number of distinct roles a single multi-summary node tracks.
/// Remote IPs whose shared role-membership set exceeds this are still
/// aggregated into one node; the roles beyond the cap are counted in
/// [`MultiSummaryNode::overflow_roles`] rather than dropped.
pub const MAX_ROLES_PER_SUMMARY_NODE: usize = 8;

/// `remoteIP -> [role_num]`: which roles currently claim a given remote IP.
#[derive(Debug, Clone, Default)]
pub struct RoleMembership {
    by_remote_ip: HashMap<IpAddr, Vec<u32>>,
}

impl RoleMembership {
    pub fn register(&mut self, remote_ip: IpAddr, role_num: u32) {
        let entry = self.by_remote_ip.entry(remote_ip).or_default();
        if !entry.contains(&role_num) {
            entry.push(role_num);
        }
    }

    pub fn unregister(&mut self, remote_ip: &IpAddr, role_num: u32) {
        if let Some(entry) = self.by_remote_ip.get_mut(remote_ip) {
            entry.retain(|&n| n != role_num);
            if entry.is_empty() {
                self.by_remote_ip.remove(remote_ip);
            }
        }
    }

    pub fn roles_for(&self, remote_ip: &IpAddr) -> &[u32] {
        self.by_remote_ip.get(remote_ip).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Groups remote IPs that share the exact same set of role memberships
    /// into multi-summary nodes, one per distinct set with more than one
    /// member IP. Each node is capped at [`MAX_ROLES_PER_SUMMARY_NODE`]
    /// roles; roles beyond the cap are reported via `overflow_roles`
    /// instead of being silently dropped. Nodes receive synthetic negative
    /// role numbers, starting at -1 and counting down in the order their
    /// (sorted) role sets are visited.
    pub fn build_multi_summary_nodes(&self, roles: &[Role]) -> Vec<MultiSummaryNode> {
        let mut groups: BTreeMap<Vec<u32>, Vec<IpAddr>> = BTreeMap::new();
        for (&remote_ip, role_nums) in self.by_remote_ip.iter() {
            let mut key = role_nums.clone();
            key.sort_unstable();
            groups.entry(key).or_default().push(remote_ip);
        }

        let mut nodes = Vec::new();
        let mut next_role_num = -1i64;
        for (role_nums, mut remote_ips) in groups {
            if remote_ips.len() < 2 {
                continue;
            }
            remote_ips.sort();

            let overflow_roles = role_nums.len().saturating_sub(MAX_ROLES_PER_SUMMARY_NODE) as u32;
            if overflow_roles > 0 {
                log::warn!(
                    "multi-summary node over {} remote IPs drops {} role(s) beyond the {}-role cap",
                    remote_ips.len(),
                    overflow_roles,
                    MAX_ROLES_PER_SUMMARY_NODE
                );
            }

            let role_totals = role_nums
                .iter()
                .take(MAX_ROLES_PER_SUMMARY_NODE)
                .filter_map(|&role_num| {
                    roles.iter().find(|r| r.role_num == role_num).map(|r| RoleFlowTotals {
                        role_num,
                        flows: r.flows,
                        packets: r.packets,
                        bytes: r.bytes,
                    })
                })
                .collect();

            nodes.push(MultiSummaryNode {
                role_num: next_role_num,
                remote_ips,
                roles: role_totals,
                overflow_roles,
            });
            next_role_num -= 1;
        }

        nodes
    }
}

/// Per-role flow/packet/byte totals carried by a [`MultiSummaryNode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleFlowTotals {
    pub role_num: u32,
    pub flows: u32,
    pub packets: u64,
    pub bytes: u64,
}

/// Aggregate over every remote IP that shares an identical role-membership
/// set. Stands in for those IPs as a single vertex in the graphlet rather
/// than emitting one edge per IP, and carries a synthetic negative
/// `role_num` so it never collides with a real role.
#[derive(Debug, Clone)]
pub struct MultiSummaryNode {
    pub role_num: i64,
    pub remote_ips: Vec<IpAddr>,
    pub roles: Vec<RoleFlowTotals>,
    /// Count of roles in the shared membership set beyond
    /// [`MAX_ROLES_PER_SUMMARY_NODE`]; reported, not dropped.
    pub overflow_roles: u32,
}

/// Per-flow diagnostic recording how strongly a flow associates with each
/// role category, returned alongside the finalized roles for callers that
/// want to inspect *why* a flow landed where it did.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoleAssociations {
    pub client: f64,
    pub server: f64,
    pub p2p: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::role::RoleKind;

    fn role_with(role_num: u32, flows: u32, packets: u64, bytes: u64) -> Role {
        Role {
            role_num,
            kind: RoleKind::Server,
            pattern: RoleKind::Server.canonical_pattern(),
            protocol: 6,
            local_port: 80,
            remote_port: 0,
            remote_ip: IpAddr::UNSET,
            flowtype: crate::flow::FlowType::new(0),
            flow_set: Default::default(),
            remote_ip_set: Default::default(),
            child_roles: Vec::new(),
            sub_role_set: Vec::new(),
            flows,
            packets,
            bytes,
            rating: 0.0,
        }
    }

    #[test]
    fn ips_with_identical_role_sets_aggregate_into_one_node() {
        let mut membership = RoleMembership::default();
        let a = IpAddr::from_ipv4_octets([10, 0, 0, 1]);
        let b = IpAddr::from_ipv4_octets([10, 0, 0, 2]);
        membership.register(a, 1);
        membership.register(a, 2);
        membership.register(b, 1);
        membership.register(b, 2);

        let roles = vec![role_with(1, 5, 50, 500), role_with(2, 7, 70, 700)];
        let nodes = membership.build_multi_summary_nodes(&roles);

        assert_eq!(nodes.len(), 1);
        let node = &nodes[0];
        assert_eq!(node.role_num, -1);
        assert_eq!(node.remote_ips, vec![a, b]);
        assert_eq!(node.overflow_roles, 0);
        assert_eq!(node.roles.len(), 2);
    }

    #[test]
    fn a_single_ip_in_a_role_set_gets_no_summary_node() {
        let mut membership = RoleMembership::default();
        let a = IpAddr::from_ipv4_octets([10, 0, 0, 1]);
        membership.register(a, 1);

        let roles = vec![role_with(1, 5, 50, 500)];
        assert!(membership.build_multi_summary_nodes(&roles).is_empty());
    }

    #[test]
    fn role_sets_beyond_the_cap_are_reported_not_dropped() {
        let mut membership = RoleMembership::default();
        let a = IpAddr::from_ipv4_octets([10, 0, 0, 1]);
        let b = IpAddr::from_ipv4_octets([10, 0, 0, 2]);
        let roles: Vec<Role> = (1..=10).map(|n| role_with(n, 1, 1, 1)).collect();
        for role in &roles {
            membership.register(a, role.role_num);
            membership.register(b, role.role_num);
        }

        let nodes = membership.build_multi_summary_nodes(&roles);
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].roles.len(), MAX_ROLES_PER_SUMMARY_NODE);
        assert_eq!(nodes[0].overflow_roles, 2);
    }

    #[test]
    fn distinct_role_sets_get_decreasing_negative_numbers() {
        let mut membership = RoleMembership::default();
        let a = IpAddr::from_ipv4_octets([10, 0, 0, 1]);
        let b = IpAddr::from_ipv4_octets([10, 0, 0, 2]);
        let c = IpAddr::from_ipv4_octets([10, 0, 0, 3]);
        let d = IpAddr::from_ipv4_octets([10, 0, 0, 4]);
        membership.register(a, 1);
        membership.register(b, 1);
        membership.register(c, 2);
        membership.register(d, 2);

        let roles = vec![role_with(1, 1, 1, 1), role_with(2, 1, 1, 1)];
        let nodes = membership.build_multi_summary_nodes(&roles);
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].role_num, -1);
        assert_eq!(nodes[1].role_num, -2);
    }
}
