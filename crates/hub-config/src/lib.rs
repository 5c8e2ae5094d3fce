pub mod auth;
pub mod cluster;
pub mod component;
pub mod limits;
pub mod logging;
pub mod node;
pub mod server;
pub mod store;
pub mod types;
pub mod validate;

pub use auth::OidcConfig;
pub use cluster::ClusterConfig;
pub use component::{ComponentKind, InputConfig, OutputConfig};
pub use limits::LimitsConfig;
pub use logging::{LogFormat, LoggingConfig};
pub use node::{NodeConfig, NodeRole, NodeSection};
pub use server::ServerConfig;
pub use store::ArtifactStore;
pub use types::HumanDuration;
