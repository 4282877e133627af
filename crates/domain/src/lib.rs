//! Domain building blocks for the order-book indexer: the order/event model,
//! storage and queue seams, environment configuration and telemetry wiring.

pub mod config;
pub mod model;
pub mod services;
pub mod storage;

pub use config::*;
pub use model::*;
pub use services::*;
pub use storage::*;
