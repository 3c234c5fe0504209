pub mod aggregate;
pub mod anchor;
pub mod api;
pub mod carbon;
pub mod config;
pub mod ingest;
pub mod locks;
pub mod merkle;
pub mod metrics_server;
pub mod normalize;
pub mod observability;
pub mod rowhash;
pub mod scheduler;

pub use aggregate::Aggregator;
pub use anchor::AnchorCoordinator;
pub use scheduler::RecomputeScheduler;
