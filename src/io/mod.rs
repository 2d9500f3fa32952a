//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `store` - Persistence contract and the in-memory backend
//! - `provider` - Provider traits and response normalization
//! - `sim` - SIM (cell positioning) provider HTTP client
//! - `gps` - GPS telematics provider HTTP client
//! - `api` - HTTP API and Prometheus endpoint

pub mod api;
pub mod gps;
pub mod provider;
pub mod sim;
pub mod store;

// Re-export commonly used types
pub use gps::GpsClient;
pub use provider::{GpsApi, ProviderResponse, SimApi};
pub use sim::SimClient;
pub use store::{MemoryStore, Store};
