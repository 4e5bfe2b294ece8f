//! # shipwright
//!
//! The deployment pipeline and runtime supervisor for a Git-to-container PaaS.
//!
//! A user points Shipwright at a Git repository; the platform fetches it,
//! detects its runtime, synthesizes a container recipe, builds an image,
//! starts a container under enforced resource caps, and keeps it healthy.
//!
//! ## Architecture
//!
//! - [`fetcher`] - Repository Fetcher: shallow clone, size and monorepo checks
//! - [`detect`] - Runtime Detector, Dockerfile Synthesizer, Port Detector
//! - [`image_builder`] - Image Builder: streams the build toolchain's output into the Log Pipeline
//! - [`runtime_manager`] - Runtime Manager: container lifecycle against the container engine
//! - [`supervisor`] - Supervisor & Metrics Sampler: usage polling and crash recovery
//! - [`deployment_machine`] - Deployment State Machine: orchestrates the pipeline end to end
//! - [`quota`] - Quota & Plan Engine: admission checks against plan limits
//! - [`queue`] - Job Queue & Worker Pool: durable work distribution
//! - [`log_pipeline`] - chunked build/runtime log persistence
//! - [`store`] - the persistence trait and its Postgres/in-memory implementations
//! - [`models`] - the data model shared by every component
//! - [`platform_error`] - the platform's typed error taxonomy
//! - [`config`] - runtime configuration and plan defaults
//! - [`api`] - the `PlatformApi` trait and its HTTP adapter
//!
//! Underneath these, Shipwright drives containers through the container
//! engine modules below, retained from the crate this platform grew out of:
//!
//! - [`client`] - Core Docker client and command execution
//! - [`container`] - Container lifecycle management
//! - [`image`] - Image operations and management
//! - [`types`] - Core types and data structures
//! - [`errors`] - Error types and handling
//! - [`executor`] - Low-level process execution

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)] // TODO: Add error docs in later phases

// Re-export the most commonly used types and traits
pub use client::{DockerClient, DockerInfo, DockerVersion};
pub use container::{
    ContainerBuilder, ContainerConfig, ContainerExecutor, ContainerManager, DockerContainer,
    ExecConfig, ExecOutput, ExecResult, HealthCheck, HealthCheckConfig, HealthCheckResult,
    HealthChecker, RemoveOptions,
};
pub use errors::{DockerError, DockerResult};
pub use image::{
    BuildOptions, BuildProgress, DockerImage, ImageHistoryItem, ImageInspect, ImageManager,
    ImageRef, ListImagesOptions, PruneResult, PullOptions, PullProgress, RegistryAuth,
    RemoveImageOptions, RemoveImageResult,
};
pub use stats::{
    ContainerStats, StatsAggregator, StatsManager, StatsOptions, StatsStream, SystemStats,
};
pub use types::{ContainerId, ContainerStatus, NetworkId, PortMapping, VolumeMount};

pub use config::{PlanDefaults, PlatformConfig};
pub use models::*;
pub use platform_error::{PlatformError, PlatformResult};
pub use store::Store;

// Platform modules
pub mod api;
pub mod config;
pub mod deployment_machine;
pub mod detect;
pub mod fetcher;
pub mod image_builder;
pub mod log_pipeline;
pub mod models;
pub mod platform_error;
pub mod queue;
pub mod quota;
pub mod runtime_manager;
pub mod store;
pub mod supervisor;

// Container engine modules, retained from the crate this platform grew out of.
pub mod client;
pub mod container;
pub mod errors;
pub mod executor;
pub mod image;
pub mod stats;
pub mod types;

// Version information
/// The version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The minimum supported Docker version
pub const MIN_DOCKER_VERSION: &str = "20.10.0";

/// Default timeout for Docker operations
pub const DEFAULT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_info() {
        assert!(!VERSION.is_empty());
        assert!(!MIN_DOCKER_VERSION.is_empty());
    }

    #[test]
    fn test_timeout_constants() {
        assert!(DEFAULT_TIMEOUT > std::time::Duration::from_secs(0));
    }
}
