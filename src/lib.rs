#![doc = include_str!("../README.md")]

pub mod codec;
pub mod engine;
pub mod error;
pub mod flow;
pub mod graphlet;
pub mod hpg;
pub mod ip_addr;
pub mod loader;
pub mod prefs;
pub mod protocol;
pub mod role;

pub use engine::{EngineStats, HapEngine, HapEngineBuilder, HostGraphlet};
pub use error::{HapError, Result};
pub use flow::{FlowRecord, FlowType, LocalNetwork};
pub use graphlet::GraphletAssembler;
pub use hpg::{GraphletMetadata, HpgReader, HpgRecord, Rank, SummaryNodeInfo};
pub use ip_addr::IpAddr;
pub use loader::{FlowList, Subflowlist};
pub use prefs::{Prefs, PrefsBuilder, RoleThresholds};
pub use role::{
    DesummarizedRoles, MultiSummaryNode, Pattern, Role, RoleAssociations, RoleEngineStats, RoleFlowTotals, RoleKind,
    RoleMembership, MAX_ROLES_PER_SUMMARY_NODE,
};
