//! chartmeta-enrich library interface
//!
//! Walks weekly chart snapshots backward and enriches every distinct track
//! with lookup-service metadata. Exposed as a library for integration testing.

pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod workflow;

pub use crate::error::{RunError, RunResult};
pub use crate::workflow::{Pipeline, PipelineConfig, PipelineEvent, Reconciler, RunManifest, RunSummary};

/// Build identification captured by build.rs
pub fn build_info() -> String {
    format!(
        "chartmeta-enrich {} (git {}, built {}, {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    )
}
