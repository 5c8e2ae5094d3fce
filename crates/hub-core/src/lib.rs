pub mod channel;
pub mod driver;
pub mod error;
pub mod metrics;
pub mod plugin;
pub mod project;
pub mod record;
pub mod registry;
pub mod rule;
