//! Server inference.
//!
//! Candidate generation and pruning for the server role:
//! candidates keyed by `(flowtype, protocol, localPort)`, pruned below the
//! server threshold.

use super::membership::RoleMembership;
use super::{Role, RoleKind};
use crate::flow::FlowRecord;
use crate::prefs::Prefs;
use std::collections::BTreeMap;

type ServerKey = (u8, u8, u16);

pub fn infer(
    flows: &[FlowRecord],
    prefs: &Prefs,
    next_role_num: &mut u32,
    membership: &mut RoleMembership,
    flow_role: &mut [u32],
) -> Vec<Role> {
    if !prefs.summarize_server_roles {
        return Vec::new();
    }

    let mut candidates: BTreeMap<ServerKey, Role> = BTreeMap::new();

    for (i, flow) in flows.iter().enumerate() {
        if prefs.filter_flow(flow) {
            continue;
        }
        let key = (flow.flowtype.0, flow.protocol, flow.local_port);
        let role = candidates.entry(key).or_insert_with(|| {
            *next_role_num += 1;
            Role {
                role_num: *next_role_num,
                kind: RoleKind::Server,
                pattern: RoleKind::Server.canonical_pattern(),
                protocol: flow.protocol,
                local_port: flow.local_port,
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

    roles
}
