//! Infrastructure adapters and runtime bootstrap.

pub mod console;
pub mod error;
pub mod store;
pub mod surface;
pub mod telemetry;
