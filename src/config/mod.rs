//! Configuration Module
//!
//! Client settings, their loading, and endpoint resolution.

pub mod endpoint;
pub mod loader;

pub use endpoint::{Endpoint, EndpointProvider};
pub use loader::{ClientConfig, ConfigLoader};
