//! Client and multi-client inference.
//!
//! Candidate generation keyed by `(remoteIP, protocol, remotePort,
//! flowtype)`, pruning below the client threshold, and promotion of
//! sibling client roles into a multi-client role.

use super::membership::RoleMembership;
use super::{Role, RoleKind};
use crate::flow::FlowRecord;
use crate::prefs::Prefs;
use std::collections::BTreeMap;

type ClientKey = (crate::ip_addr::IpAddr, u8, u16, u8);

/// Well-known service port ceiling used by the "additional single flows"
/// multi-client-promotion test.
const WELL_KNOWN_PORT_CEILING: u16 = 1024;

fn eligible_for_summarization(flow: &FlowRecord, prefs: &Prefs) -> bool {
    (flow.flowtype.is_biflow() && prefs.summarize_biflows)
        || (flow.flowtype.is_uniflow() && prefs.summarize_uniflows)
}

pub fn infer(
    flows: &[FlowRecord],
    prefs: &Prefs,
    next_role_num: &mut u32,
    membership: &mut RoleMembership,
    flow_role: &mut [u32],
) -> Vec<Role> {
    if !prefs.summarize_client_roles {
        return Vec::new();
    }

    let mut candidates: BTreeMap<ClientKey, Role> = BTreeMap::new();

    for (i, flow) in flows.iter().enumerate() {
        if prefs.filter_flow(flow) || !eligible_for_summarization(flow, prefs) {
            continue;
        }
        let key = (flow.remote_ip, flow.protocol, flow.remote_port, flow.flowtype.0);
        let role = candidates.entry(key).or_insert_with(|| {
            *next_role_num += 1;
            Role {
                role_num: *next_role_num,
                kind: RoleKind::Client,
                pattern: RoleKind::Client.canonical_pattern(),
                protocol: flow.protocol,
                local_port: 0,
                remote_port: flow.remote_port,
                remote_ip: flow.remote_ip,
                flowtype: flow.flowtype,
                flow_set: Default::default(),
                remote_ip_set: Default::default(),
                child_roles: Vec::new(),
                sub_role_set: Vec::new(),
                flows: 0,
                packets: 0,
                bytes: 0,
                rating: 0.0,
            }
        });
        role.flow_set.insert(i);
        role.remote_ip_set.insert(flow.remote_ip);
        membership.register(flow.remote_ip, role.role_num);
        flow_role[i] = role.role_num;
    }

    let mut roles: Vec<Role> = candidates.into_values().collect();
    for role in roles.iter_mut() {
        role.recompute_aggregates(flows);
    }

    prune(&mut roles, prefs, membership, flow_role);
    promote_multi_client(&mut roles, flows, prefs, next_role_num, membership, flow_role);

    roles
}

fn prune(roles: &mut [Role], prefs: &Prefs, membership: &mut RoleMembership, flow_role: &mut [u32]) {
    for role in roles.iter_mut() {
        if !role.meets_minimum(prefs) {
            for &remote_ip in role.remote_ip_set.iter() {
                membership.unregister(&remote_ip, role.role_num);
            }
            for &i in role.flow_set.iter() {
                flow_role[i] = 0;
            }
            role.role_num = 0;
        }
    }
}

/// Groups surviving client roles by `(protocol, remotePort, flowtype)`
/// (local IP excluded — it's constant within one active view anyway) and
/// promotes groups large enough to qualify as a multi-client role.
fn promote_multi_client(
    roles: &mut Vec<Role>,
    flows: &[FlowRecord],
    prefs: &Prefs,
    next_role_num: &mut u32,
    membership: &mut RoleMembership,
    flow_role: &mut [u32],
) {
    if !prefs.summarize_multi_client_roles {
        return;
    }

    let mut groups: BTreeMap<(u8, u16, u8), Vec<usize>> = BTreeMap::new();
    for (idx, role) in roles.iter().enumerate() {
        if role.role_num == 0 {
            continue;
        }
        groups
            .entry((role.protocol, role.remote_port, role.flowtype.0))
            .or_default()
            .push(idx);
    }

    let unclaimed_single_flow_counts = count_unclaimed_well_known_singles(flows, roles, prefs);

    let mut promoted = Vec::new();
    for ((protocol, remote_port, flowtype), member_indices) in groups {
        let extra_singles = unclaimed_single_flow_counts
            .get(&(protocol, remote_port, flowtype))
            .copied()
            .unwrap_or(0);
        if member_indices.len() as u32 <= prefs.thresholds.multi_client && extra_singles <= prefs.thresholds.multi_client {
            continue;
        }

        *next_role_num += 1;
        let mut parent = Role {
            role_num: *next_role_num,
            kind: RoleKind::MultiClient,
            pattern: RoleKind::MultiClient.canonical_pattern(),
            protocol,
            local_port: 0,
            remote_port,
            remote_ip: crate::ip_addr::IpAddr::UNSET,
            flowtype: crate::flow::FlowType::new(flowtype),
            flow_set: Default::default(),
            remote_ip_set: Default::default(),
            child_roles: Vec::new(),
            sub_role_set: Vec::new(),
            flows: 0,
            packets: 0,
            bytes: 0,
            rating: 0.0,
        };

        for &idx in &member_indices {
            let child = &mut roles[idx];
            parent.child_roles.push(child.role_num);
            parent.flow_set.extend(child.flow_set.iter().copied());
            parent.remote_ip_set.extend(child.remote_ip_set.iter().copied());
            for &remote_ip in child.remote_ip_set.iter() {
                membership.unregister(&remote_ip, child.role_num);
                membership.register(remote_ip, parent.role_num);
            }
            child.role_num = 0;
        }
        parent.recompute_aggregates(flows);
        for &i in parent.flow_set.iter() {
            flow_role[i] = parent.role_num;
        }
        promoted.push(parent);
    }

    roles.retain(|r| r.role_num != 0);
    roles.extend(promoted);
}

fn count_unclaimed_well_known_singles(
    flows: &[FlowRecord],
    client_roles: &[Role],
    prefs: &Prefs,
) -> BTreeMap<(u8, u16, u8), u32> {
    let claimed: std::collections::HashSet<usize> = client_roles
        .iter()
        .filter(|r| r.role_num != 0)
        .flat_map(|r| r.flow_set.iter().copied())
        .collect();

    let mut counts = BTreeMap::new();
    for (i, flow) in flows.iter().enumerate() {
        if claimed.contains(&i) || prefs.filter_flow(flow) {
            continue;
        }
        if flow.remote_port < WELL_KNOWN_PORT_CEILING {
            *counts
                .entry((flow.protocol, flow.remote_port, flow.flowtype.0))
                .or_insert(0u32) += 1;
        }
    }
    counts
}
