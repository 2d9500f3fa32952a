//! Infrastructure - configuration, settings, errors and metrics
//!
//! This module contains infrastructure concerns:
//! - `config` - Deploy-time configuration (TOML loading, defaults)
//! - `settings` - Operator-tunable tracking settings (typed view of a key→string map)
//! - `error` - Error taxonomy shared by every service
//! - `metrics` - Lock-free metrics collection

pub mod config;
pub mod error;
pub mod metrics;
pub mod settings;

// Re-export commonly used types
pub use config::Config;
pub use error::{GeofenceSide, Result, StoreError, TrackingError};
pub use metrics::{Metrics, ProviderKind, ScanKind};
pub use settings::TrackingSettings;
