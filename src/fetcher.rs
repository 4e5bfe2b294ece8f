//! Repository Fetcher: shallow-clones a Git URL into an isolated working
//! directory and screens the result before it ever reaches the build step.

use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::PlatformConfig;
use crate::platform_error::{PlatformError, PlatformResult};

/// Names the Fetcher refuses to find at the repository root: the platform
/// does not support multi-container compositions (see the product's
/// non-goals), so any of these is an immediate `MonorepoDetected`.
const COMPOSE_MANIFEST_NAMES: &[&str] = &[
    "docker-compose.yml",
    "docker-compose.yaml",
    "compose.yml",
    "compose.yaml",
];

/// Owns a per-deployment working directory and guarantees its removal on
/// every exit path, including early returns from a typed failure and
/// cancellation. Mirrors the scoped-acquisition pattern the container engine
/// uses for its own temporary state.
pub struct WorkingTree {
    path: PathBuf,
}

impl WorkingTree {
    /// Path to the checked-out repository root.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Releases the working tree, removing it from disk. Called explicitly
    /// once the Image Builder has produced a tagged image; also invoked by
    /// `Drop` so a worker crash or early return never leaks a checkout.
    pub async fn release(mut self) -> PlatformResult<()> {
        self.remove().await
    }

    async fn remove(&mut self) -> PlatformResult<()> {
        if tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            tokio::fs::remove_dir_all(&self.path)
                .await
                .map_err(|e| PlatformError::io("removing working tree", e))?;
        }
        Ok(())
    }
}

impl Drop for WorkingTree {
    fn drop(&mut self) {
        let path = self.path.clone();
        if path.exists() {
            // Best-effort synchronous cleanup; `release` is the path that
            // reports errors, this is the backstop for an unreleased guard.
            let _ = std::fs::remove_dir_all(&path);
        }
    }
}

/// Clones repositories into per-deployment working directories under
/// `PlatformConfig::workdir_root`.
pub struct RepositoryFetcher<'a> {
    config: &'a PlatformConfig,
}

impl<'a> RepositoryFetcher<'a> {
    /// Builds a fetcher against the given configuration.
    #[must_use]
    pub fn new(config: &'a PlatformConfig) -> Self {
        Self { config }
    }

    /// Clones `repo_url` at `branch` into a directory keyed by `deployment_id`.
    #[instrument(skip(self), fields(deployment_id = %deployment_id))]
    pub async fn fetch(
        &self,
        repo_url: &str,
        branch: &str,
        deployment_id: Uuid,
    ) -> PlatformResult<WorkingTree> {
        let dest = self.config.deployment_workdir(deployment_id);

        if tokio::fs::try_exists(&dest).await.unwrap_or(false) {
            tokio::fs::remove_dir_all(&dest)
                .await
                .map_err(|e| PlatformError::io("clearing stale working tree", e))?;
        }
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PlatformError::io("creating workdir root", e))?;
        }

        info!(repo_url, branch, path = %dest.display(), "cloning repository");

        let output = Command::new("git")
            .args([
                "clone",
                "--depth",
                "1",
                "--single-branch",
                "--branch",
                branch,
                repo_url,
                dest.to_string_lossy().as_ref(),
            ])
            .output()
            .await
            .map_err(|e| PlatformError::io("spawning git clone", e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(%stderr, "git clone failed");
            return Err(PlatformError::RepoNotFound {
                url: repo_url.to_string(),
            });
        }

        let tree = WorkingTree { path: dest };

        if let Some(manifest) = self.find_compose_manifest(tree.path()).await? {
            let _ = tree.release().await;
            return Err(PlatformError::MonorepoDetected { path: manifest });
        }

        let size_bytes = directory_size(tree.path()).await?;
        if size_bytes > self.config.repo_size_limit_bytes {
            let limit_bytes = self.config.repo_size_limit_bytes;
            let _ = tree.release().await;
            return Err(PlatformError::RepoTooLarge {
                size_bytes,
                limit_bytes,
            });
        }

        Ok(tree)
    }

    async fn find_compose_manifest(&self, root: &Path) -> PlatformResult<Option<String>> {
        let mut entries = tokio::fs::read_dir(root)
            .await
            .map_err(|e| PlatformError::io("scanning working tree root", e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PlatformError::io("scanning working tree root", e))?
        {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if COMPOSE_MANIFEST_NAMES
                .iter()
                .any(|candidate| candidate.eq_ignore_ascii_case(&name))
            {
                return Ok(Some(name.to_string()));
            }
        }
        Ok(None)
    }
}

async fn directory_size(root: &Path) -> PlatformResult<u64> {
    let mut stack = vec![root.to_path_buf()];
    let mut total = 0u64;
    while let Some(dir) = stack.pop() {
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| PlatformError::io("measuring working tree size", e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PlatformError::io("measuring working tree size", e))?
        {
            let metadata = entry
                .metadata()
                .await
                .map_err(|e| PlatformError::io("measuring working tree size", e))?;
            if metadata.is_dir() {
                stack.push(entry.path());
            } else {
                total += metadata.len();
            }
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[tokio::test]
    async fn compose_manifest_at_root_is_detected_case_insensitively() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("DOCKER-COMPOSE.YML"), b"services: {}").unwrap();
        let config = PlatformConfig::with_defaults("postgres://x", tmp.path().parent().unwrap());
        let fetcher = RepositoryFetcher::new(&config);
        let found = fetcher.find_compose_manifest(tmp.path()).await.unwrap();
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn nested_compose_manifest_is_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir(tmp.path().join("services")).unwrap();
        fs::write(tmp.path().join("services").join("docker-compose.yml"), b"x").unwrap();
        let config = PlatformConfig::with_defaults("postgres://x", tmp.path().parent().unwrap());
        let fetcher = RepositoryFetcher::new(&config);
        let found = fetcher.find_compose_manifest(tmp.path()).await.unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn directory_size_sums_nested_files() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir(tmp.path().join("sub")).unwrap();
        fs::write(tmp.path().join("a.txt"), vec![0u8; 100]).unwrap();
        fs::write(tmp.path().join("sub").join("b.txt"), vec![0u8; 50]).unwrap();
        let size = directory_size(tmp.path()).await.unwrap();
        assert_eq!(size, 150);
    }

    #[tokio::test]
    async fn working_tree_release_removes_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("deployment-x");
        fs::create_dir(&nested).unwrap();
        let tree = WorkingTree { path: nested.clone() };
        tree.release().await.unwrap();
        assert!(!nested.exists());
    }
}
