//! Language detection: fixed-priority marker-file scan of the working tree root.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::platform_error::{PlatformError, PlatformResult};

/// A detected project runtime, in the order checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Runtime {
    /// `package.json` present.
    Node,
    /// `requirements.txt` or `pyproject.toml` present.
    Python,
    /// `pom.xml` or `build.gradle` present.
    Java,
    /// `go.mod` present.
    Go,
}

/// Applies the detection rule against the working tree root; first match wins.
pub async fn detect_runtime(root: &Path) -> PlatformResult<Runtime> {
    if exists(root, "package.json").await {
        return Ok(Runtime::Node);
    }
    if exists(root, "requirements.txt").await || exists(root, "pyproject.toml").await {
        return Ok(Runtime::Python);
    }
    if exists(root, "pom.xml").await || exists(root, "build.gradle").await {
        return Ok(Runtime::Java);
    }
    if exists(root, "go.mod").await {
        return Ok(Runtime::Go);
    }
    Err(PlatformError::RuntimeNotDetected)
}

async fn exists(root: &Path, name: &str) -> bool {
    tokio::fs::try_exists(root.join(name)).await.unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[tokio::test]
    async fn priority_order_prefers_node_over_python() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("package.json"), b"{}").unwrap();
        fs::write(tmp.path().join("requirements.txt"), b"flask").unwrap();
        assert_eq!(detect_runtime(tmp.path()).await.unwrap(), Runtime::Node);
    }

    #[tokio::test]
    async fn go_mod_detects_go() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("go.mod"), b"module demo").unwrap();
        assert_eq!(detect_runtime(tmp.path()).await.unwrap(), Runtime::Go);
    }

    #[tokio::test]
    async fn no_marker_file_fails_with_runtime_not_detected() {
        let tmp = tempfile::tempdir().unwrap();
        let err = detect_runtime(tmp.path()).await.unwrap_err();
        assert!(matches!(err, PlatformError::RuntimeNotDetected));
    }
}
