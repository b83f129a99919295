//! User-configurable settings for filtering and role summarization.
//!
//! Built as an immutable value constructed through a builder, so callers
//! assemble filtering and threshold settings once and reuse them across
//! many runs.

use crate::flow::{well_known_protocol, FlowType};
use serde::Serialize;

/// Minimum-membership thresholds for role types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RoleThresholds {
    pub client: u32,
    pub multi_client: u32,
    pub server: u32,
    pub p2p: u32,
}

impl Default for RoleThresholds {
    fn default() -> Self {
        RoleThresholds {
            client: 2,
            multi_client: 3,
            server: 2,
            p2p: 4,
        }
    }
}

/// Above this per-role flow count a rating is clamped to `1.0`:
/// `1_048_576` (1 Mi).
pub const FLOW_RATE_THRESHOLD: u32 = 1 << 20;

/// Port below which both endpoints must be privileged for a p2p candidate
/// to require dual TCP/UDP usage.
pub const P2P_PORT_THRESHOLD: u16 = 1024;

/// Settings relevant to flow filtering and role summarization.
#[derive(Debug, Clone, Serialize)]
pub struct Prefs {
    pub summarize_client_roles: bool,
    pub summarize_multi_client_roles: bool,
    pub summarize_server_roles: bool,
    pub summarize_p2p_roles: bool,

    pub summarize_biflows: bool,
    pub summarize_uniflows: bool,

    pub filter_biflows: bool,
    pub filter_uniflows: bool,
    pub filter_unprod_inflows: bool,
    pub filter_unprod_outflows: bool,
    pub filter_tcp: bool,
    pub filter_udp: bool,
    pub filter_icmp: bool,
    pub filter_other: bool,

    pub thresholds: RoleThresholds,
}

impl Default for Prefs {
    fn default() -> Self {
        Prefs {
            summarize_client_roles: true,
            summarize_multi_client_roles: true,
            summarize_server_roles: true,
            summarize_p2p_roles: true,
            summarize_biflows: true,
            summarize_uniflows: true,
            filter_biflows: false,
            filter_uniflows: false,
            filter_unprod_inflows: false,
            filter_unprod_outflows: false,
            filter_tcp: false,
            filter_udp: false,
            filter_icmp: false,
            filter_other: false,
            thresholds: RoleThresholds::default(),
        }
    }
}

impl Prefs {
    pub fn builder() -> PrefsBuilder {
        PrefsBuilder::default()
    }

    /// `true` when `flow` should be dropped before role inference:
    /// direction filters apply first, then protocol filters.
    pub fn filter_flow(&self, flow: &crate::flow::FlowRecord) -> bool {
        let mut flowtype_filter = 0u8;
        let mut not_flowtype_filter = 0u8;
        if self.filter_biflows {
            flowtype_filter |= FlowType::BIFLOW;
        }
        if self.filter_uniflows {
            flowtype_filter |= FlowType::UNIFLOW;
        }
        if self.filter_unprod_inflows {
            flowtype_filter |= FlowType::INFLOW;
            not_flowtype_filter = FlowType::UNIBIFLOW;
        }
        if self.filter_unprod_outflows {
            flowtype_filter |= FlowType::OUTFLOW;
            not_flowtype_filter = FlowType::UNIBIFLOW;
        }

        let mut keep = flow.flowtype.contains(flowtype_filter) && !flow.flowtype.contains(not_flowtype_filter);

        if self.filter_tcp || self.filter_udp || self.filter_icmp || self.filter_other {
            keep = !match flow.protocol {
                well_known_protocol::TCP => self.filter_tcp,
                well_known_protocol::UDP => self.filter_udp,
                well_known_protocol::ICMP => self.filter_icmp,
                _ => self.filter_other,
            };
        }

        keep
    }
}

#[derive(Debug, Clone, Default)]
pub struct PrefsBuilder {
    prefs: PrefsOverrides,
}

#[derive(Debug, Clone, Default)]
struct PrefsOverrides {
    thresholds: Option<RoleThresholds>,
    filter_tcp: Option<bool>,
    filter_udp: Option<bool>,
    filter_icmp: Option<bool>,
    filter_other: Option<bool>,
    filter_biflows: Option<bool>,
    filter_uniflows: Option<bool>,
}

impl PrefsBuilder {
    #[must_use = "builder methods consume self and return a new builder; the return value must be used"]
    pub fn with_thresholds(mut self, thresholds: RoleThresholds) -> Self {
        self.prefs.thresholds = Some(thresholds);
        self
    }

    #[must_use = "builder methods consume self and return a new builder; the return value must be used"]
    pub fn with_protocol_filter(mut self, tcp: bool, udp: bool, icmp: bool, other: bool) -> Self {
        self.prefs.filter_tcp = Some(tcp);
        self.prefs.filter_udp = Some(udp);
        self.prefs.filter_icmp = Some(icmp);
        self.prefs.filter_other = Some(other);
        self
    }

    #[must_use = "builder methods consume self and return a new builder; the return value must be used"]
    pub fn with_direction_filter(mut self, biflows: bool, uniflows: bool) -> Self {
        self.prefs.filter_biflows = Some(biflows);
        self.prefs.filter_uniflows = Some(uniflows);
        self
    }

    pub fn build(self) -> Prefs {
        let mut prefs = Prefs::default();
        if let Some(t) = self.prefs.thresholds {
            prefs.thresholds = t;
        }
        if let Some(v) = self.prefs.filter_tcp {
            prefs.filter_tcp = v;
        }
        if let Some(v) = self.prefs.filter_udp {
            prefs.filter_udp = v;
        }
        if let Some(v) = self.prefs.filter_icmp {
            prefs.filter_icmp = v;
        }
        if let Some(v) = self.prefs.filter_other {
            prefs.filter_other = v;
        }
        if let Some(v) = self.prefs.filter_biflows {
            prefs.filter_biflows = v;
        }
        if let Some(v) = self.prefs.filter_uniflows {
            prefs.filter_uniflows = v;
        }
        prefs
    }
}
