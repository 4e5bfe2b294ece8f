//! Port detector: determines which port a deployment's container listens on
//! and whether that came from the `PORT` contract or a hardcoded literal.

use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

use crate::models::PortSource;
use crate::platform_error::PlatformResult;

use super::dockerfile::SynthesizedRecipe;

/// Result of scanning a recipe (and, as a fallback, the project source) for
/// the port an application listens on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortDetection {
    /// The resolved port. Zero when nothing could be determined at all
    /// (only expected for worker-tagged deployments).
    pub port: u16,
    /// How `port` was determined.
    pub source: PortSource,
    /// Set when the port looks hardcoded rather than read from `PORT`,
    /// so the dashboard can surface `HARDCODED_PORT` as a non-fatal warning.
    pub warning: Option<String>,
}

fn hardcoded_port_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?:--port[= ]|-b :|listen\()(\d{2,5})").expect("valid regex"))
}

/// Scans, in priority order: the recipe's `EXPOSE`, then `ENV PORT`, then
/// framework-specific command patterns, then source files for a hardcoded
/// port literal.
pub async fn detect_port(root: &Path, recipe: &SynthesizedRecipe) -> PlatformResult<PortDetection> {
    if let Some(port) = extract_env_port(&recipe.dockerfile) {
        return Ok(PortDetection {
            port,
            source: PortSource::Env,
            warning: None,
        });
    }

    if let Some(captures) = hardcoded_port_pattern().captures(&recipe.start_command) {
        if let Ok(port) = captures[1].parse::<u16>() {
            return Ok(PortDetection {
                port,
                source: PortSource::Hardcoded,
                warning: Some(format!(
                    "start command appears to bind a fixed port ({port}) instead of reading PORT"
                )),
            });
        }
    }

    if let Some(port) = scan_source_files(root).await {
        return Ok(PortDetection {
            port,
            source: PortSource::Hardcoded,
            warning: Some(format!(
                "source scan found a hardcoded port ({port}); application may not honor PORT"
            )),
        });
    }

    Ok(PortDetection {
        port: 0,
        source: PortSource::None,
        warning: None,
    })
}

/// Fallback port discovery run after the image has been built: reads the
/// built image's `Config.ExposedPorts`, in case the static Dockerfile/source
/// scan above missed something the build process itself baked in (e.g. a
/// base image's own `EXPOSE`). Only consulted when the static scan found
/// nothing at all (`PortSource::None`).
#[must_use]
pub fn port_from_exposed_ports(exposed_ports: &std::collections::HashMap<String, serde_json::Value>) -> Option<u16> {
    exposed_ports
        .keys()
        .find_map(|key| key.split('/').next()?.parse::<u16>().ok())
}

fn extract_env_port(dockerfile: &str) -> Option<u16> {
    dockerfile.lines().find_map(|line| {
        let line = line.trim();
        line.strip_prefix("ENV PORT=")
            .and_then(|rest| rest.trim().parse::<u16>().ok())
    })
}

async fn scan_source_files(root: &Path) -> Option<u16> {
    const CANDIDATES: &[&str] = &["server.js", "app.js", "index.js", "main.js", "app.py", "main.py"];
    for candidate in CANDIDATES {
        let path = root.join(candidate);
        if let Ok(contents) = tokio::fs::read_to_string(&path).await {
            if let Some(captures) = hardcoded_port_pattern().captures(&contents) {
                if let Ok(port) = captures[1].parse::<u16>() {
                    return Some(port);
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recipe_with(dockerfile: &str, start_command: &str) -> SynthesizedRecipe {
        SynthesizedRecipe {
            dockerfile: dockerfile.to_string(),
            has_expose: dockerfile.contains("EXPOSE"),
            has_env_port: dockerfile.contains("ENV PORT"),
            start_command: start_command.to_string(),
        }
    }

    #[tokio::test]
    async fn env_port_takes_priority() {
        let tmp = tempfile::tempdir().unwrap();
        let recipe = recipe_with("ENV PORT=3000\nEXPOSE 3000", "node server.js");
        let detection = detect_port(tmp.path(), &recipe).await.unwrap();
        assert_eq!(detection.port, 3000);
        assert_eq!(detection.source, PortSource::Env);
        assert!(detection.warning.is_none());
    }

    #[tokio::test]
    async fn hardcoded_flag_in_start_command_is_flagged() {
        let tmp = tempfile::tempdir().unwrap();
        let recipe = recipe_with("FROM alpine", "gunicorn -b :5000 app:app");
        let detection = detect_port(tmp.path(), &recipe).await.unwrap();
        assert_eq!(detection.port, 5000);
        assert_eq!(detection.source, PortSource::Hardcoded);
        assert!(detection.warning.is_some());
    }

    #[tokio::test]
    async fn nothing_found_reports_none() {
        let tmp = tempfile::tempdir().unwrap();
        let recipe = recipe_with("FROM alpine", "./run.sh");
        let detection = detect_port(tmp.path(), &recipe).await.unwrap();
        assert_eq!(detection.source, PortSource::None);
    }
}
