//! Top-level orchestration: load a flow file, run the role engine and
//! graphlet assembler per local host, and hand back the assembled HPG
//! records plus per-host diagnostics.
//!
//! Exposed as a builder over [`Prefs`] so callers can configure role
//! thresholds once and reuse the engine across many flow files.

use crate::codec;
use crate::flow::FlowRecord;
use crate::graphlet::GraphletAssembler;
use crate::hpg::HpgRecord;
use crate::ip_addr::IpAddr;
use crate::loader::FlowList;
use crate::prefs::Prefs;
use crate::role::{self, Role, RoleAssociations, RoleEngineStats};
use std::path::Path;

/// Per-local-host role-engine and graphlet output, returned alongside the
/// flat record stream so callers can inspect individual hosts without
/// re-running inference.
#[derive(Debug)]
pub struct HostGraphlet {
    pub local_ip: IpAddr,
    pub graphlet_nr: u16,
    pub roles: Vec<Role>,
    pub stats: RoleEngineStats,
    pub records: Vec<HpgRecord>,
    /// Per-flow client/server/p2p association strengths, indexed in
    /// parallel with this host's active view.
    pub associations: Vec<RoleAssociations>,
}

/// Aggregate counters across a whole run, surfaced instead of aborting on
/// a single host's ambiguous flows.
#[derive(Debug, Default, Clone, Copy, serde::Serialize)]
pub struct EngineStats {
    pub hosts_processed: usize,
    pub flows_loaded: usize,
    pub ambiguous_flows: u32,
}

/// Drives the full pipeline: flow codec -> loader -> role engine ->
/// graphlet assembler, one local host at a time.
#[derive(Debug)]
pub struct HapEngine {
    prefs: Prefs,
}

impl HapEngine {
    pub fn new(prefs: Prefs) -> Self {
        HapEngine { prefs }
    }

    pub fn builder() -> HapEngineBuilder {
        HapEngineBuilder::default()
    }

    /// Reads `path`, runs the pipeline over every distinct local host, and
    /// returns one [`HostGraphlet`] per host plus run-wide stats. Hosts
    /// are numbered in ascending `local_ip` order starting at 1, matching
    /// `graphlet_nr`'s role as a per-run sequence number.
    pub fn run_file(&self, path: &Path) -> crate::error::Result<(Vec<HostGraphlet>, EngineStats)> {
        let flows = codec::read_flows(path)?;
        Ok(self.run_flows(flows))
    }

    pub fn run_flows(&self, flows: Vec<FlowRecord>) -> (Vec<HostGraphlet>, EngineStats) {
        let list = FlowList::load(flows);
        let mut stats = EngineStats {
            flows_loaded: list.len(),
            ..Default::default()
        };

        let mut local_ips: Vec<IpAddr> = list.flows().iter().map(|f| f.local_ip).collect();
        local_ips.sort();
        local_ips.dedup();

        let mut hosts = Vec::with_capacity(local_ips.len());
        for (i, local_ip) in local_ips.into_iter().enumerate() {
            let graphlet_nr = (i + 1) as u16;
            let view = list.active_view(&local_ip);
            let (roles, flow_role, role_stats, associations) = role::infer_roles(view, list.flows(), &self.prefs);
            let mut assembler = GraphletAssembler::new();
            let records = assembler.assemble(view.flows(), &roles, &flow_role, graphlet_nr);

            stats.ambiguous_flows += role_stats.ambiguous_flows;
            stats.hosts_processed += 1;

            hosts.push(HostGraphlet {
                local_ip,
                graphlet_nr,
                roles,
                stats: role_stats,
                records,
                associations,
            });
        }

        log::info!(
            "processed {} host(s), {} flow(s), {} ambiguous flow(s)",
            stats.hosts_processed,
            stats.flows_loaded,
            stats.ambiguous_flows
        );

        (hosts, stats)
    }

    /// Runs the pipeline and writes the concatenated HPG record stream to
    /// `out_path`.
    pub fn write_hpg(&self, flows: Vec<FlowRecord>, out_path: &Path) -> crate::error::Result<EngineStats> {
        let (hosts, stats) = self.run_flows(flows);
        let records: Vec<HpgRecord> = hosts.into_iter().flat_map(|h| h.records).collect();
        crate::hpg::HpgReader::write(out_path, &records)?;
        Ok(stats)
    }
}

/// Builder for [`HapEngine`] using a `#[must_use]` chained-setter pattern.
#[derive(Debug, Default)]
pub struct HapEngineBuilder {
    prefs: Option<Prefs>,
}

impl HapEngineBuilder {
    #[must_use]
    pub fn with_prefs(mut self, prefs: Prefs) -> Self {
        self.prefs = Some(prefs);
        self
    }

    pub fn build(self) -> HapEngine {
        HapEngine {
            prefs: self.prefs.unwrap_or_default(),
        }
    }
}
