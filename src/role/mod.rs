//! Role engine: client/multi-client, server, and p2p inference over one
//! local host's active flow view, plus conflict resolution and sub-role
//! generation.
//!
//! Client, server, and p2p inference share a single tagged `Role` record:
//! one concrete type, a `RoleKind` discriminant, and per-kind free
//! functions instead of virtual dispatch.

mod client;
mod membership;
mod p2p;
mod server;

pub use membership::{MultiSummaryNode, RoleAssociations, RoleFlowTotals, RoleMembership, MAX_ROLES_PER_SUMMARY_NODE};

use crate::flow::FlowRecord;
use crate::ip_addr::IpAddr;
use crate::loader::Subflowlist;
use crate::prefs::Prefs;
use serde::Serialize;
use std::collections::BTreeSet;

/// Which partitions of the five-partite graph a role's pattern summarizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Pattern(pub u8);

impl Pattern {
    pub const LOCAL_IP: u8 = 0x01;
    pub const PROTO: u8 = 0x02;
    pub const LOCAL_PORT: u8 = 0x04;
    pub const REMOTE_PORT: u8 = 0x08;
    pub const REMOTE_IP: u8 = 0x10;

    pub const fn new(bits: u8) -> Self {
        Pattern(bits)
    }

    pub fn contains(&self, bit: u8) -> bool {
        self.0 & bit != 0
    }

    /// Number of summarized partitions; used to rank sub-roles by
    /// desummarization level (fewest summarized partitions wins).
    pub fn summarized_count(&self) -> u32 {
        self.0.count_ones()
    }

    /// Every bitmask that is a strict subset of `self` (clears one or more
    /// bits, never sets one) — the sub-role patterns a desummarization
    /// request can fall back to.
    pub fn strict_sub_patterns(&self) -> Vec<Pattern> {
        let bits = self.0;
        let mut out = Vec::new();
        let mut subset = bits;
        loop {
            if subset == 0 {
                break;
            }
            subset = (subset - 1) & bits;
            out.push(Pattern(subset));
            if subset == 0 {
                break;
            }
        }
        out
    }
}

/// Canonical pattern for each role kind: client summarizes the local
/// port; server summarizes remote port + remote IP; multi-client adds
/// remote IP to client's summarization; p2p summarizes local port, remote
/// port, and remote IP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RoleKind {
    SingleFlow,
    Client,
    MultiClient,
    Server,
    P2p,
}

impl RoleKind {
    pub fn canonical_pattern(self) -> Pattern {
        match self {
            RoleKind::SingleFlow => Pattern::new(0),
            RoleKind::Client => Pattern::new(Pattern::LOCAL_PORT),
            RoleKind::MultiClient => Pattern::new(Pattern::LOCAL_PORT | Pattern::REMOTE_IP),
            RoleKind::Server => Pattern::new(Pattern::REMOTE_PORT | Pattern::REMOTE_IP),
            RoleKind::P2p => Pattern::new(Pattern::LOCAL_PORT | Pattern::REMOTE_PORT | Pattern::REMOTE_IP),
        }
    }

    /// Minimum member-flow count for the role type to survive pruning.
    pub fn minimum_membership(self, prefs: &Prefs) -> u32 {
        match self {
            RoleKind::SingleFlow => 1,
            RoleKind::Client => prefs.thresholds.client,
            RoleKind::MultiClient => prefs.thresholds.multi_client,
            RoleKind::Server => prefs.thresholds.server,
            RoleKind::P2p => prefs.thresholds.p2p,
        }
    }
}

/// A finalized (or candidate, pre-pruning) role.
#[derive(Debug, Clone, Serialize)]
pub struct Role {
    pub role_num: u32,
    pub kind: RoleKind,
    pub pattern: Pattern,
    pub protocol: u8,
    pub local_port: u16,
    pub remote_port: u16,
    pub remote_ip: IpAddr,
    pub flowtype: crate::flow::FlowType,

    /// Indices into the active view's flow slice.
    pub flow_set: BTreeSet<usize>,
    pub remote_ip_set: BTreeSet<IpAddr>,
    /// Role numbers of child roles consumed by promotion (multi-client) or
    /// consumption (p2p absorbing client roles).
    pub child_roles: Vec<u32>,
    pub sub_role_set: Vec<Role>,

    pub flows: u32,
    pub packets: u64,
    pub bytes: u64,
    pub rating: f64,
}

impl Role {
    fn recompute_aggregates(&mut self, view: &[FlowRecord]) {
        self.flows = self.flow_set.len() as u32;
        self.packets = self.flow_set.iter().map(|&i| view[i].d_pkts as u64).sum();
        self.bytes = self.flow_set.iter().map(|&i| view[i].d_octets).sum();
    }

    fn meets_minimum(&self, prefs: &Prefs) -> bool {
        self.flows >= self.kind.minimum_membership(prefs)
    }

    /// Generates the `sub_role_set`: one fresh role per strict sub-pattern
    /// of `self.pattern`, sharing `flow_set`/`remote_ip_set`/`child_roles`.
    fn generate_sub_roles(&mut self, next_role_num: &mut u32) {
        let sub_patterns = self.pattern.strict_sub_patterns();
        self.sub_role_set = sub_patterns
            .into_iter()
            .map(|pattern| {
                *next_role_num += 1;
                Role {
                    role_num: *next_role_num,
                    kind: self.kind,
                    pattern,
                    protocol: self.protocol,
                    local_port: self.local_port,
                    remote_port: self.remote_port,
                    remote_ip: self.remote_ip,
                    flowtype: self.flowtype,
                    flow_set: self.flow_set.clone(),
                    remote_ip_set: self.remote_ip_set.clone(),
                    child_roles: self.child_roles.clone(),
                    sub_role_set: Vec::new(),
                    flows: self.flows,
                    packets: self.packets,
                    bytes: self.bytes,
                    rating: self.rating,
                }
            })
            .collect();
    }

    /// Picks, among `self` and its sub-roles, the one with the highest
    /// desummarization level (fewest summarized partitions) whose
    /// `role_num` is in `desummarized`.
    pub fn best_desummarized<'a>(&'a self, desummarized: &BTreeSet<u32>) -> Option<&'a Role> {
        std::iter::once(self)
            .chain(self.sub_role_set.iter())
            .filter(|r| desummarized.contains(&r.role_num))
            .min_by_key(|r| r.pattern.summarized_count())
    }
}

/// Ambiguous-flow and lookup-failure counters surfaced instead of aborting
/// the run.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RoleEngineStats {
    pub ambiguous_flows: u32,
}

/// Per-flow assignment to at most one canonical role, indexed in parallel
/// with the active view's flow slice. `0` means "no role".
pub type FlowRoleVector = Vec<u32>;

/// Role numbers a caller wants desummarized to their best-matching
/// sub-role — the UI-supplied input `Role::best_desummarized` reads.
pub type DesummarizedRoles = BTreeSet<u32>;

/// Runs the full role engine over one local host's active view: client/
/// multi-client inference, server inference, p2p inference, rating,
/// conflict resolution, and sub-role generation.
pub fn infer_roles(
    view: Subflowlist<'_>,
    full_list: &[FlowRecord],
    prefs: &Prefs,
) -> (Vec<Role>, FlowRoleVector, RoleEngineStats, Vec<RoleAssociations>) {
    let flows = view.flows();
    let mut next_role_num = 0u32;
    let mut membership = RoleMembership::default();

    let mut client_flow_role = vec![0u32; flows.len()];
    let mut server_flow_role = vec![0u32; flows.len()];
    let mut p2p_flow_role = vec![0u32; flows.len()];

    let mut client_roles = client::infer(flows, prefs, &mut next_role_num, &mut membership, &mut client_flow_role);
    let server_roles = server::infer(flows, prefs, &mut next_role_num, &mut membership, &mut server_flow_role);
    let p2p_roles = p2p::infer(
        flows,
        prefs,
        &mut next_role_num,
        &mut membership,
        &mut client_roles,
        &client_flow_role,
        &server_flow_role,
        &mut p2p_flow_role,
    );

    rate_roles(&mut client_roles, full_list, prefs);
    let mut server_roles = server_roles;
    rate_roles(&mut server_roles, full_list, prefs);
    let mut p2p_roles = p2p_roles;
    rate_roles(&mut p2p_roles, full_list, prefs);

    let mut stats = RoleEngineStats::default();
    let flow_role = resolve_conflicts(
        flows,
        prefs,
        &mut client_roles,
        &mut server_roles,
        &mut p2p_roles,
        &client_flow_role,
        &server_flow_role,
        &p2p_flow_role,
        &mut stats,
    );

    let associations = compute_associations(
        flows.len(),
        &client_roles,
        &server_roles,
        &p2p_roles,
        &client_flow_role,
        &server_flow_role,
        &p2p_flow_role,
    );

    let mut roles: Vec<Role> = client_roles
        .into_iter()
        .chain(server_roles)
        .chain(p2p_roles)
        .filter(|r| r.role_num != 0)
        .collect();

    for role in roles.iter_mut() {
        role.generate_sub_roles(&mut next_role_num);
    }

    (roles, flow_role, stats, associations)
}

/// Per-flow association strengths: for each category, the rating of the
/// role that claimed the flow in that category's candidate pass,
/// independent of which role ultimately won the flow in conflict
/// resolution.
#[allow(clippy::too_many_arguments)]
fn compute_associations(
    flow_count: usize,
    client_roles: &[Role],
    server_roles: &[Role],
    p2p_roles: &[Role],
    client_flow_role: &[u32],
    server_flow_role: &[u32],
    p2p_flow_role: &[u32],
) -> Vec<RoleAssociations> {
    (0..flow_count)
        .map(|i| RoleAssociations {
            client: rating_of(0, client_flow_role[i], client_roles, server_roles, p2p_roles),
            server: rating_of(1, server_flow_role[i], client_roles, server_roles, p2p_roles),
            p2p: rating_of(2, p2p_flow_role[i], client_roles, server_roles, p2p_roles),
        })
        .collect()
}

/// Rating: `min(1, flows / flow_rate_threshold)`, forced to `1` at
/// minimum membership; p2p/multi-client additionally sweep the full flow
/// list for flows that would extend the same role.
fn rate_roles(roles: &mut [Role], full_list: &[FlowRecord], prefs: &Prefs) {
    for role in roles.iter_mut() {
        if role.role_num == 0 {
            continue;
        }
        let extended_count = match role.kind {
            RoleKind::P2p | RoleKind::MultiClient => {
                count_extending_flows(role, full_list) as u32
            }
            _ => role.flows,
        };
        role.rating = if role.flows <= role.kind.minimum_membership(prefs) {
            1.0
        } else {
            (extended_count as f64 / crate::prefs::FLOW_RATE_THRESHOLD as f64).min(1.0)
        };
    }
}

fn count_extending_flows(role: &Role, full_list: &[FlowRecord]) -> usize {
    full_list
        .iter()
        .filter(|f| match role.kind {
            RoleKind::Server => f.flowtype == role.flowtype && f.protocol == role.protocol && f.local_port == role.local_port,
            RoleKind::Client | RoleKind::MultiClient => {
                f.protocol == role.protocol && f.remote_port == role.remote_port && f.flowtype == role.flowtype
            }
            RoleKind::P2p => f.protocol == role.protocol && f.flowtype == role.flowtype,
            RoleKind::SingleFlow => false,
        })
        .count()
}

/// Conflict resolution: for every flow with more than one non-zero
/// pointer, the lower-rated role is offered
/// first refusal to release the flow; on failure the higher-rated role is
/// offered the same; if neither can release, the conflict is counted and
/// the flow stays with whichever role claimed it first (client, then
/// server, then p2p, matching inference order).
#[allow(clippy::too_many_arguments)]
fn resolve_conflicts(
    flows: &[FlowRecord],
    prefs: &Prefs,
    client_roles: &mut [Role],
    server_roles: &mut [Role],
    p2p_roles: &mut [Role],
    client_flow_role: &[u32],
    server_flow_role: &[u32],
    p2p_flow_role: &[u32],
    stats: &mut RoleEngineStats,
) -> FlowRoleVector {
    let mut final_role = vec![0u32; flows.len()];

    for i in 0..flows.len() {
        let claims = [
            (0u8, client_flow_role[i]),
            (1u8, server_flow_role[i]),
            (2u8, p2p_flow_role[i]),
        ];
        let mut active: Vec<(u8, u32)> = claims.into_iter().filter(|&(_, r)| r != 0).collect();
        if active.is_empty() {
            continue;
        }
        if active.len() == 1 {
            final_role[i] = active[0].1;
            continue;
        }

        // Preserves inference order (client, then server, then p2p) for the
        // unresolved-conflict fallback below, before `active` is re-ordered
        // by rating.
        let first_claim = active[0];

        active.sort_by(|a, b| {
            rating_of(a.0, a.1, client_roles, server_roles, p2p_roles)
                .partial_cmp(&rating_of(b.0, b.1, client_roles, server_roles, p2p_roles))
                .unwrap()
        });

        let mut resolved = false;
        for attempt in 0..active.len() {
            let (kind, role_num) = active[attempt];
            if try_remove_flow(kind, role_num, i, flows, prefs, client_roles, server_roles, p2p_roles) {
                let winner = active[(attempt + 1) % active.len()];
                final_role[i] = winner.1;
                resolved = true;
                break;
            }
        }
        if !resolved {
            stats.ambiguous_flows += 1;
            final_role[i] = first_claim.1;
        }
    }

    final_role
}

fn rating_of(kind: u8, role_num: u32, client: &[Role], server: &[Role], p2p: &[Role]) -> f64 {
    let table = match kind {
        0 => client,
        1 => server,
        _ => p2p,
    };
    table.iter().find(|r| r.role_num == role_num).map(|r| r.rating).unwrap_or(0.0)
}

fn try_remove_flow(
    kind: u8,
    role_num: u32,
    flow_index: usize,
    flows: &[FlowRecord],
    prefs: &Prefs,
    client_roles: &mut [Role],
    server_roles: &mut [Role],
    p2p_roles: &mut [Role],
) -> bool {
    let table = match kind {
        0 => client_roles,
        1 => server_roles,
        _ => p2p_roles,
    };
    let Some(role) = table.iter_mut().find(|r| r.role_num == role_num) else {
        return false;
    };
    if !role.flow_set.contains(&flow_index) {
        return false;
    }
    let mut trial = role.flow_set.clone();
    trial.remove(&flow_index);
    if (trial.len() as u32) < role.kind.minimum_membership(prefs) {
        return false;
    }
    role.flow_set = trial;
    let remote_ip = flows[flow_index].remote_ip;
    if !role.flow_set.iter().any(|&i| flows[i].remote_ip == remote_ip) {
        role.remote_ip_set.remove(&remote_ip);
    }
    role.recompute_aggregates(flows);
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_sub_patterns_never_set_a_bit() {
        let pattern = Pattern::new(Pattern::LOCAL_PORT | Pattern::REMOTE_IP);
        for sub in pattern.strict_sub_patterns() {
            assert_eq!(sub.0 & !pattern.0, 0);
            assert_ne!(sub.0, pattern.0);
        }
    }

    #[test]
    fn canonical_patterns_match_role_kind_definitions() {
        assert_eq!(RoleKind::Server.canonical_pattern().0, Pattern::REMOTE_PORT | Pattern::REMOTE_IP);
        assert_eq!(RoleKind::Client.canonical_pattern().0, Pattern::LOCAL_PORT);
    }
}
