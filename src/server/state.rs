use arc_swap::ArcSwap;
use std::sync::Arc;

/// Point-in-time summary of the routing tables, published by the dispatcher
/// after every sync and emit tick. The admin server reads it lock-free; the
/// tables themselves are never shared.
#[derive(Debug, Clone, Default)]
pub struct EmitterStats {
    pub routes_total: usize,
    pub tcp_routes_total: usize,
    pub http_endpoints: usize,
    /// Whether at least one sync has completed since startup.
    pub synced: bool,
}

pub type StatsHandle = Arc<ArcSwap<EmitterStats>>;

pub fn new_stats_handle() -> StatsHandle {
    Arc::new(ArcSwap::from_pointee(EmitterStats::default()))
}
