mod ads;
pub mod responses;
pub mod stream;
mod typed;

pub use ads::SnapshotAggregatedDiscoveryService;
pub use typed::SnapshotDiscoveryService;
