pub mod error;
pub mod heartbeat;
pub mod node;
pub mod status;
pub mod sync;

pub use error::{ClusterError, ClusterReason, ClusterResult};
pub use heartbeat::{Heartbeat, MetricsReport, SystemSample, run_heartbeat, run_metrics_push};
pub use node::{NodeInfo, NodeTable};
pub use status::{ClusterStatus, NodeStatus};
pub use sync::{SeenVersions, SyncBroadcaster, SyncPayload};
