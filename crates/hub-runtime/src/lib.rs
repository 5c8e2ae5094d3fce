#[macro_use]
mod log_macros;

pub mod engine;
pub mod error;
pub mod hub;
pub mod shells;
pub mod signal;
pub mod stats_task;
pub mod tracing_init;
