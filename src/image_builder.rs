//! Image Builder: invokes the container build toolchain against a validated
//! recipe and tees its combined output into the Log Pipeline as it runs.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::time::timeout;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::client::DockerClient;
use crate::config::PlatformConfig;
use crate::executor::ExecutionConfig;
use crate::image::ImageRef;
use crate::log_pipeline::LogPipeline;
use crate::models::LogType;
use crate::platform_error::{PlatformError, PlatformResult};

/// Produces a locally tagged image from a working tree with a validated
/// recipe, streaming combined stdout/stderr into the Log Pipeline under
/// `log_type=build` as the build subprocess runs, then rejects the result if
/// it exceeds the configured size ceiling.
pub struct ImageBuilder<'a> {
    client: &'a DockerClient,
    log_pipeline: Arc<LogPipeline>,
    build_timeout: std::time::Duration,
    tail_bytes: usize,
    image_size_limit_bytes: u64,
}

impl<'a> ImageBuilder<'a> {
    /// Builds an `ImageBuilder` against the platform's container client.
    #[must_use]
    pub fn new(client: &'a DockerClient, log_pipeline: Arc<LogPipeline>, config: &PlatformConfig) -> Self {
        Self {
            client,
            log_pipeline,
            build_timeout: config.build_timeout,
            tail_bytes: config.build_log_tail_bytes,
            image_size_limit_bytes: config.image_size_limit_bytes,
        }
    }

    /// Builds `<slug>:<deployment_id>` from `context_path`, which must
    /// contain a Dockerfile at its root (the Dockerfile Synthesizer's job).
    #[instrument(skip(self), fields(%deployment_id, %slug))]
    pub async fn build(
        &self,
        app_id: Uuid,
        deployment_id: Uuid,
        slug: &str,
        context_path: &std::path::Path,
    ) -> PlatformResult<String> {
        let tag = format!("{slug}:{deployment_id}");
        let args = vec![
            "build".to_string(),
            "--tag".to_string(),
            tag.clone(),
            context_path.to_string_lossy().into_owned(),
        ];

        info!(%tag, "starting image build");

        let streaming = self
            .client
            .executor()
            .execute_streaming(&args, Some(ExecutionConfig::default()))
            .await
            .map_err(PlatformError::from)?;

        let mut tail = TailBuffer::new(self.tail_bytes);
        let result = timeout(self.build_timeout, self.drain(streaming, app_id, deployment_id, &mut tail)).await;

        let exit_code = match result {
            Ok(Ok(exit_code)) => exit_code,
            Ok(Err(err)) => return Err(err),
            Err(_) => {
                return Err(PlatformError::BuildTimeout {
                    timeout: self.build_timeout,
                })
            }
        };

        if exit_code != 0 {
            warn!(exit_code, "image build failed");
            return Err(PlatformError::BuildFailed {
                exit_code,
                tail: tail.into_string(),
            });
        }

        info!(%tag, "image build succeeded");

        let image_ref = ImageRef::parse(&tag)?;
        if let Ok(inspect) = self.client.images().inspect(&image_ref).await {
            if inspect.size > self.image_size_limit_bytes {
                warn!(size_bytes = inspect.size, limit_bytes = self.image_size_limit_bytes, "built image exceeds size ceiling");
                return Err(PlatformError::ImageTooLarge {
                    size_bytes: inspect.size,
                    limit_bytes: self.image_size_limit_bytes,
                });
            }
        }

        Ok(tag)
    }

    async fn drain(
        &self,
        mut streaming: crate::executor::StreamingOutput,
        app_id: Uuid,
        deployment_id: Uuid,
        tail: &mut TailBuffer,
    ) -> PlatformResult<i32> {
        loop {
            tokio::select! {
                line = streaming.stdout.recv() => {
                    match line {
                        Some(Ok(line)) => self.tee(app_id, deployment_id, &line, tail).await?,
                        Some(Err(_)) | None => {}
                    }
                }
                line = streaming.stderr.recv() => {
                    match line {
                        Some(Ok(line)) => self.tee(app_id, deployment_id, &line, tail).await?,
                        Some(Err(_)) | None => {}
                    }
                }
                status = streaming.child.wait() => {
                    let status = status.map_err(|e| PlatformError::io("waiting for build subprocess", e))?;
                    return Ok(status.code().unwrap_or(-1));
                }
            }
        }
    }

    async fn tee(&self, app_id: Uuid, deployment_id: Uuid, line: &str, tail: &mut TailBuffer) -> PlatformResult<()> {
        tail.push(line);
        self.log_pipeline
            .append_line(app_id, deployment_id, LogType::Build, line)
            .await
    }
}

/// Bounded in-memory ring of the most recent build output, so `BuildFailed`
/// can attach a tail without re-reading the persisted log.
struct TailBuffer {
    lines: VecDeque<String>,
    byte_budget: usize,
    bytes_used: usize,
}

impl TailBuffer {
    fn new(byte_budget: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            byte_budget,
            bytes_used: 0,
        }
    }

    fn push(&mut self, line: &str) {
        self.bytes_used += line.len() + 1;
        self.lines.push_back(line.to_string());
        while self.bytes_used > self.byte_budget {
            if let Some(dropped) = self.lines.pop_front() {
                self.bytes_used -= dropped.len() + 1;
            } else {
                break;
            }
        }
    }

    fn into_string(self) -> String {
        self.lines.into_iter().collect::<Vec<_>>().join("\n")
    }
}
