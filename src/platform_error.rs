//! Typed error taxonomy for the deployment pipeline.
//!
//! Every failure that can surface to a user or an operator carries a stable
//! string code (`PlatformError::code`) in addition to its Rust variant, so
//! that API responses and log lines remain meaningful even if the wording of
//! a `Display` impl changes later.

use std::time::Duration;
use thiserror::Error;

/// Result type alias used across the deployment pipeline.
pub type PlatformResult<T> = Result<T, PlatformError>;

/// Comprehensive error type for the deployment pipeline.
#[derive(Debug, Error)]
pub enum PlatformError {
    /// The repository URL could not be cloned because it does not exist or is unreachable.
    #[error("repository not found: {url}")]
    RepoNotFound {
        /// The repository URL that could not be found
        url: String,
    },

    /// The repository requires credentials the platform was not given.
    #[error("repository requires authentication: {url}")]
    RepoPrivateUnsupported {
        /// The repository URL that required authentication
        url: String,
    },

    /// The cloned repository exceeds the configured size ceiling.
    #[error("repository exceeds size limit: {size_bytes} bytes (limit {limit_bytes})")]
    RepoTooLarge {
        /// Size of the repository on disk
        size_bytes: u64,
        /// Configured ceiling
        limit_bytes: u64,
    },

    /// A compose manifest was found at the repository root.
    #[error("docker-compose manifest detected at repository root: {path}")]
    MonorepoDetected {
        /// Path to the manifest that triggered detection
        path: String,
    },

    /// No known language/runtime marker file was found.
    #[error("could not detect a supported runtime in the repository")]
    RuntimeNotDetected,

    /// A marker file was found but names a runtime version the platform does not build for.
    #[error("unsupported language or runtime version: {detail}")]
    UnsupportedLanguage {
        /// Description of what was detected and why it is unsupported
        detail: String,
    },

    /// The detector found evidence of a system dependency the synthesized Dockerfile cannot satisfy.
    #[error("custom system dependency not supported: {detail}")]
    CustomSystemDependency {
        /// Description of the dependency that was detected
        detail: String,
    },

    /// A Dockerfile already exists at the repository root.
    #[error("Dockerfile already present at repository root")]
    DockerfilePresent,

    /// A docker-compose file already exists at the repository root.
    #[error("docker-compose manifest already present at repository root")]
    DockerComposePresent,

    /// The image build exited non-zero.
    #[error("image build failed (exit code {exit_code}): {tail}")]
    BuildFailed {
        /// Exit code of the build subprocess
        exit_code: i32,
        /// Last bytes of build output, for display without loading the full log
        tail: String,
    },

    /// The image build did not finish within the configured wall-clock budget.
    #[error("image build exceeded {timeout:?} time budget")]
    BuildTimeout {
        /// Configured build timeout
        timeout: Duration,
    },

    /// The built image exceeds the configured size ceiling.
    #[error("built image exceeds size limit: {size_bytes} bytes (limit {limit_bytes})")]
    ImageTooLarge {
        /// Size of the built image
        size_bytes: u64,
        /// Configured ceiling
        limit_bytes: u64,
    },

    /// The container exited before it ever became ready.
    #[error("application crashed on startup (exit code {exit_code:?})")]
    AppCrashOnStart {
        /// Exit code observed, if the container reported one
        exit_code: Option<i32>,
    },

    /// No process ever bound the expected port inside the container.
    #[error("application did not bind port {port} within the startup grace period")]
    PortNotListening {
        /// The port the platform expected the application to listen on
        port: u16,
    },

    /// The application appears to bind a fixed port instead of honoring `PORT`.
    #[error("application appears to ignore the PORT environment variable")]
    HardcodedPort,

    /// The running container was killed for exceeding its memory limit.
    #[error("memory limit exceeded: {limit_bytes} bytes")]
    MemoryLimitExceeded {
        /// Configured memory ceiling
        limit_bytes: u64,
    },

    /// The running container was throttled for exceeding its CPU limit.
    #[error("cpu limit exceeded: {limit_shares} shares")]
    CpuLimitExceeded {
        /// Configured CPU ceiling, in Docker CPU shares
        limit_shares: u64,
    },

    /// The application's writable layer exceeded its disk quota.
    #[error("disk limit exceeded: {limit_bytes} bytes")]
    DiskLimitExceeded {
        /// Configured disk ceiling
        limit_bytes: u64,
    },

    /// The configured health check never reported healthy.
    #[error("health check failed: {detail}")]
    HealthcheckFailed {
        /// Description of the failing check
        detail: String,
    },

    /// The proxy or internal network could not reach the running instance.
    #[error("routing error: {detail}")]
    RoutingError {
        /// Description of the routing failure
        detail: String,
    },

    /// The platform's internal Docker network is unreachable or misconfigured.
    #[error("internal network error: {detail}")]
    InternalNetworkError {
        /// Description of the network failure
        detail: String,
    },

    /// A deployment is already in flight for this application.
    #[error("a deployment is already in progress for this application")]
    DeployLocked,

    /// The owning App was deleted while this deployment was in flight.
    #[error("application was deleted while the deployment was in progress")]
    AppDeleted,

    /// The requesting user's plan does not permit the requested operation.
    #[error("plan limit exceeded: {detail}")]
    PlanLimitExceeded {
        /// Description of which limit was exceeded
        detail: String,
    },

    /// The deployment could not be performed without downtime.
    #[error("zero-downtime deployment not supported in this configuration")]
    ZeroDowntimeNotSupported,

    /// A required environment variable was not set.
    #[error("environment variable missing: {key}")]
    EnvVarMissing {
        /// Name of the missing variable
        key: String,
    },

    /// An environment variable's name or value failed validation.
    #[error("invalid environment variable {key}: {reason}")]
    InvalidEnvVar {
        /// Name of the offending variable
        key: String,
        /// Reason the value was rejected
        reason: String,
    },

    /// The build or runtime host is out of memory.
    #[error("host out of memory")]
    HostOutOfMemory,

    /// No build worker was available to claim the job.
    #[error("no build node available")]
    BuildNodeUnavailable,

    /// Catch-all for defects in the platform itself rather than user input.
    #[error("internal platform error: {message}")]
    InternalPlatformError {
        /// Free-form description, safe to log but not meant to be parsed
        message: String,
    },

    /// Wraps a lower-level container-engine error.
    #[error(transparent)]
    Container(#[from] crate::errors::DockerError),

    /// Wraps a data-store error.
    #[error("store error: {0}")]
    Store(String),

    /// Wraps an I/O error with an operation label.
    #[error("io error during {operation}: {source}")]
    Io {
        /// The operation being performed when the error occurred
        operation: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

impl PlatformError {
    /// Stable machine-readable code, suitable for API responses and dashboards.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::RepoNotFound { .. } => "REPO_NOT_FOUND",
            Self::RepoPrivateUnsupported { .. } => "REPO_PRIVATE_UNSUPPORTED",
            Self::RepoTooLarge { .. } => "REPO_TOO_LARGE",
            Self::MonorepoDetected { .. } => "MONOREPO_DETECTED",
            Self::RuntimeNotDetected => "RUNTIME_NOT_DETECTED",
            Self::UnsupportedLanguage { .. } => "UNSUPPORTED_LANGUAGE",
            Self::CustomSystemDependency { .. } => "CUSTOM_SYSTEM_DEPENDENCY",
            Self::DockerfilePresent => "DOCKERFILE_PRESENT",
            Self::DockerComposePresent => "DOCKER_COMPOSE_PRESENT",
            Self::BuildFailed { .. } => "BUILD_FAILED",
            Self::BuildTimeout { .. } => "BUILD_TIMEOUT",
            Self::ImageTooLarge { .. } => "IMAGE_TOO_LARGE",
            Self::AppCrashOnStart { .. } => "APP_CRASH_ON_START",
            Self::PortNotListening { .. } => "PORT_NOT_LISTENING",
            Self::HardcodedPort => "HARDCODED_PORT",
            Self::MemoryLimitExceeded { .. } => "MEMORY_LIMIT_EXCEEDED",
            Self::CpuLimitExceeded { .. } => "CPU_LIMIT_EXCEEDED",
            Self::DiskLimitExceeded { .. } => "DISK_LIMIT_EXCEEDED",
            Self::HealthcheckFailed { .. } => "HEALTHCHECK_FAILED",
            Self::RoutingError { .. } => "ROUTING_ERROR",
            Self::InternalNetworkError { .. } => "INTERNAL_NETWORK_ERROR",
            Self::DeployLocked => "DEPLOY_LOCKED",
            Self::AppDeleted => "APP_DELETED",
            Self::PlanLimitExceeded { .. } => "PLAN_LIMIT_EXCEEDED",
            Self::ZeroDowntimeNotSupported => "ZERO_DOWNTIME_NOT_SUPPORTED",
            Self::EnvVarMissing { .. } => "ENV_VAR_MISSING",
            Self::InvalidEnvVar { .. } => "INVALID_ENV_VAR",
            Self::HostOutOfMemory => "HOST_OUT_OF_MEMORY",
            Self::BuildNodeUnavailable => "BUILD_NODE_UNAVAILABLE",
            Self::InternalPlatformError { .. } => "INTERNAL_PLATFORM_ERROR",
            Self::Container(_) => "INTERNAL_PLATFORM_ERROR",
            Self::Store(_) => "INTERNAL_PLATFORM_ERROR",
            Self::Io { .. } => "INTERNAL_PLATFORM_ERROR",
        }
    }

    /// Coarse category used for metrics grouping and retry policy selection.
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Self::RepoNotFound { .. }
            | Self::RepoPrivateUnsupported { .. }
            | Self::RepoTooLarge { .. }
            | Self::MonorepoDetected { .. } => "fetch",
            Self::RuntimeNotDetected
            | Self::UnsupportedLanguage { .. }
            | Self::CustomSystemDependency { .. }
            | Self::DockerfilePresent
            | Self::DockerComposePresent => "detect",
            Self::BuildFailed { .. } | Self::BuildTimeout { .. } | Self::ImageTooLarge { .. } => {
                "build"
            }
            Self::AppCrashOnStart { .. }
            | Self::PortNotListening { .. }
            | Self::HardcodedPort
            | Self::HealthcheckFailed { .. } => "startup",
            Self::MemoryLimitExceeded { .. }
            | Self::CpuLimitExceeded { .. }
            | Self::DiskLimitExceeded { .. } => "resource",
            Self::RoutingError { .. } | Self::InternalNetworkError { .. } => "network",
            Self::DeployLocked | Self::PlanLimitExceeded { .. } | Self::ZeroDowntimeNotSupported => {
                "policy"
            }
            Self::AppDeleted => "cancelled",
            Self::EnvVarMissing { .. } | Self::InvalidEnvVar { .. } => "config",
            Self::HostOutOfMemory | Self::BuildNodeUnavailable => "infrastructure",
            Self::InternalPlatformError { .. } | Self::Container(_) | Self::Store(_) | Self::Io { .. } => {
                "internal"
            }
        }
    }

    /// Whether retrying the operation that produced this error is likely to help.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::BuildNodeUnavailable
                | Self::HostOutOfMemory
                | Self::InternalNetworkError { .. }
                | Self::RoutingError { .. }
        ) || matches!(self, Self::Container(inner) if inner.is_recoverable())
    }

    /// Creates an internal-error variant from any display-able cause.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::InternalPlatformError {
            message: message.into(),
        }
    }

    /// Creates an I/O error variant with an operation label attached.
    pub fn io(operation: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable_strings() {
        assert_eq!(PlatformError::RuntimeNotDetected.code(), "RUNTIME_NOT_DETECTED");
        assert_eq!(PlatformError::DeployLocked.code(), "DEPLOY_LOCKED");
    }

    #[test]
    fn categories_group_related_variants() {
        assert_eq!(
            PlatformError::RepoTooLarge {
                size_bytes: 1,
                limit_bytes: 0
            }
            .category(),
            "fetch"
        );
        assert_eq!(
            PlatformError::BuildTimeout {
                timeout: Duration::from_secs(1)
            }
            .category(),
            "build"
        );
    }

    #[test]
    fn infrastructure_errors_are_recoverable() {
        assert!(PlatformError::BuildNodeUnavailable.is_recoverable());
        assert!(!PlatformError::DeployLocked.is_recoverable());
    }

    #[test]
    fn app_deleted_is_a_cancelled_non_retryable_error() {
        assert_eq!(PlatformError::AppDeleted.code(), "APP_DELETED");
        assert_eq!(PlatformError::AppDeleted.category(), "cancelled");
        assert!(!PlatformError::AppDeleted.is_recoverable());
    }
}
