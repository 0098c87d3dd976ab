/// Routing module for Slate.
///
/// Distance-vector routing where the "links" are announcement logs in the
/// shared store. The table is a map of route keys to best known next hop.

pub mod engine;
pub mod table;

pub use engine::{
    apply_announcement, RoutingAnnouncement, RoutingEngine, ANNOUNCEMENT_RETENTION_MS,
    ANNOUNCE_INTERVAL_MS, LINK_COST, RELAY_PENALTY,
};
pub use table::{RouteEntry, RoutingTable};
