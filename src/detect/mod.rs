//! Language Detector and Dockerfile Synthesizer: classifies a checked-out
//! project and generates an opinionated, `PORT`-contract-honoring recipe.

mod dockerfile;
mod port;
mod runtime;

pub use dockerfile::{synthesize, SynthesizedRecipe};
pub use port::{detect_port, port_from_exposed_ports, PortDetection};
pub use runtime::{detect_runtime, Runtime};

use serde::{Deserialize, Serialize};

use crate::models::PortSource;

/// Whether a deployment should receive proxy registration or run headless.
///
/// Replaces the original pattern-matching-on-the-start-command heuristic
/// with a sum type the Detector returns alongside the recipe, so the Runtime
/// Manager chooses proxy registration purely on type rather than re-deriving
/// it from free text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum RuntimeKind {
    /// Serves HTTP traffic and should be registered with the reverse proxy.
    Web(PortSpec),
    /// A background job runner (queue worker, cron-style process); skips
    /// proxy registration entirely.
    Worker,
}

/// How a web deployment's listening port was determined, bundled with the
/// port itself so callers never have to re-pair the two.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PortSpec {
    /// The port the Dockerfile Synthesizer and port detector agree the app listens on.
    pub port: u16,
    /// How that port was determined.
    pub source: PortSource,
    /// Set when the port looks hardcoded rather than read from `PORT`.
    pub warning: Option<String>,
}

/// Command patterns that mark a start command as a background worker rather
/// than a web server. Checked against the synthesized `CMD`/`ENTRYPOINT`.
const WORKER_COMMAND_PATTERNS: &[&str] = &["celery", "sidekiq", "bull", "queue:work", "cron"];

/// Classifies a synthesized recipe as serving web traffic or running as a
/// background worker, per the worker-vs-web heuristic: no `EXPOSE`, no `ENV
/// PORT`, and a start command matching a known background-job pattern.
#[must_use]
pub fn classify(recipe: &SynthesizedRecipe, detection: &PortDetection) -> RuntimeKind {
    let looks_like_worker = !recipe.has_expose
        && !recipe.has_env_port
        && WORKER_COMMAND_PATTERNS
            .iter()
            .any(|pattern| recipe.start_command.to_lowercase().contains(pattern));

    if looks_like_worker {
        return RuntimeKind::Worker;
    }

    RuntimeKind::Web(PortSpec {
        port: detection.port,
        source: detection.source,
        warning: detection.warning.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recipe(has_expose: bool, has_env_port: bool, start_command: &str) -> SynthesizedRecipe {
        SynthesizedRecipe {
            dockerfile: String::new(),
            has_expose,
            has_env_port,
            start_command: start_command.to_string(),
        }
    }

    #[test]
    fn background_job_pattern_without_port_markers_is_classified_worker() {
        let recipe = recipe(false, false, "celery -A tasks worker");
        let detection = PortDetection {
            port: 0,
            source: PortSource::None,
            warning: None,
        };
        assert_eq!(classify(&recipe, &detection), RuntimeKind::Worker);
    }

    #[test]
    fn expose_present_overrides_worker_looking_command() {
        let recipe = recipe(true, false, "celery -A tasks worker");
        let detection = PortDetection {
            port: 3000,
            source: PortSource::Env,
            warning: None,
        };
        assert_eq!(
            classify(&recipe, &detection),
            RuntimeKind::Web(PortSpec {
                port: 3000,
                source: PortSource::Env,
                warning: None,
            })
        );
    }
}
