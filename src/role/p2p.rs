//! Peer-to-peer inference. Runs after client and server inference.
//!
//! Pruning is implemented as remove-by-predicate over owned vectors,
//! avoiding any iterator-invalidation hazard from mutating a collection
//! while iterating it.

use super::membership::RoleMembership;
use super::{Role, RoleKind};
use crate::flow::{well_known_protocol, FlowRecord};
use crate::prefs::{Prefs, P2P_PORT_THRESHOLD};
use std::collections::BTreeMap;

type P2pKey = (u8, u8);

/// `true` when a flow is eligible as a p2p candidate: TCP/UDP, not already
/// claimed, and not a pair of low ports unless the remote IP is reached
/// over both TCP and UDP.
fn eligible(flow: &FlowRecord, flows: &[FlowRecord], claimed: &std::collections::HashSet<usize>, idx: usize) -> bool {
    if claimed.contains(&idx) {
        return false;
    }
    if flow.protocol != well_known_protocol::TCP && flow.protocol != well_known_protocol::UDP {
        return false;
    }
    if flow.local_port < P2P_PORT_THRESHOLD && flow.remote_port < P2P_PORT_THRESHOLD {
        let dual_stack = flows.iter().any(|other| {
            other.remote_ip == flow.remote_ip
                && other.protocol != flow.protocol
                && (other.protocol == well_known_protocol::TCP || other.protocol == well_known_protocol::UDP)
        });
        if !dual_stack {
            return false;
        }
    }
    true
}

#[allow(clippy::too_many_arguments)]
pub fn infer(
    flows: &[FlowRecord],
    prefs: &Prefs,
    next_role_num: &mut u32,
    membership: &mut RoleMembership,
    client_roles: &mut [Role],
    client_flow_role: &[u32],
    server_flow_role: &[u32],
    flow_role: &mut [u32],
) -> Vec<Role> {
    if !prefs.summarize_p2p_roles {
        return Vec::new();
    }

    let claimed: std::collections::HashSet<usize> = (0..flows.len())
        .filter(|&i| client_flow_role[i] != 0 || server_flow_role[i] != 0)
        .collect();

    let mut native_groups: BTreeMap<P2pKey, Role> = BTreeMap::new();
    for (i, flow) in flows.iter().enumerate() {
        if prefs.filter_flow(flow) || !eligible(flow, flows, &claimed, i) {
            continue;
        }
        let key = (flow.protocol, flow.flowtype.0);
        let role = native_groups.entry(key).or_insert_with(|| {
            *next_role_num += 1;
            new_p2p_role(*next_role_num, flow)
        });
        role.flow_set.insert(i);
        role.remote_ip_set.insert(flow.remote_ip);
        flow_role[i] = role.role_num;
    }

    // Fold in eligible client roles (remote port >= 1024) as consumed
    // children of the matching (protocol, flowtype) p2p candidate.
    for client in client_roles.iter() {
        if client.role_num == 0 || client.remote_port < P2P_PORT_THRESHOLD {
            continue;
        }
        let key = (client.protocol, client.flowtype.0);
        let role = native_groups.entry(key).or_insert_with(|| {
            *next_role_num += 1;
            let mut r = new_p2p_role(*next_role_num, &flows[*client.flow_set.iter().next().unwrap_or(&0)]);
            r.protocol = client.protocol;
            r.flowtype = client.flowtype;
            r
        });
        role.child_roles.push(client.role_num);
        role.flow_set.extend(client.flow_set.iter().copied());
        role.remote_ip_set.extend(client.remote_ip_set.iter().copied());
    }

    let mut roles: Vec<Role> = native_groups.into_values().collect();
    for role in roles.iter_mut() {
        role.recompute_aggregates(flows);
    }

    prune_and_consume(&mut roles, flows, prefs, membership, client_roles, flow_role);

    roles.into_iter().filter(|r| r.role_num != 0).collect()
}

fn new_p2p_role(role_num: u32, flow: &FlowRecord) -> Role {
    Role {
        role_num,
        kind: RoleKind::P2p,
        pattern: RoleKind::P2p.canonical_pattern(),
        protocol: flow.protocol,
        local_port: 0,
        remote_port: 0,
        remote_ip: crate::ip_addr::IpAddr::UNSET,
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
}

fn prune_and_consume(
    roles: &mut [Role],
    flows: &[FlowRecord],
    prefs: &Prefs,
    membership: &mut RoleMembership,
    client_roles: &mut [Role],
    flow_role: &mut [u32],
) {
    let p2p_threshold = prefs.thresholds.p2p;

    for role in roles.iter_mut() {
        let role_count = role.child_roles.len() as u32;

        if role_count < p2p_threshold {
            let client_flow_indices: std::collections::HashSet<usize> = client_roles
                .iter()
                .filter(|c| role.child_roles.contains(&c.role_num))
                .flat_map(|c| c.flow_set.iter().copied())
                .collect();
            role.flow_set.retain(|i| !client_flow_indices.contains(i));
            role.remote_ip_set = role.flow_set.iter().map(|&i| flows[i].remote_ip).collect();
            role.child_roles.clear();
            role.recompute_aggregates(flows);

            if (role.flow_set.len() as u32) < p2p_threshold {
                for &i in role.flow_set.iter() {
                    flow_role[i] = 0;
                }
                for &remote_ip in role.remote_ip_set.iter() {
                    membership.unregister(&remote_ip, role.role_num);
                }
                role.role_num = 0;
            }
        } else {
            for client in client_roles.iter_mut() {
                if role.child_roles.contains(&client.role_num) {
                    for &remote_ip in client.remote_ip_set.iter() {
                        membership.unregister(&remote_ip, client.role_num);
                        membership.register(remote_ip, role.role_num);
                    }
                    client.role_num = 0;
                }
            }
            for &i in role.flow_set.iter() {
                flow_role[i] = role.role_num;
            }
        }
    }
}
