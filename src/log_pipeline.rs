//! Log Pipeline: chunked append-only persistence and tailing of build and
//! runtime logs, shared by the Image Builder and Runtime Manager writers.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::instrument;
use uuid::Uuid;

use crate::config::PlatformConfig;
use crate::models::{LogChunk, LogType};
use crate::platform_error::PlatformResult;
use crate::store::Store;

/// How often the tailing loop polls the store for chunks past the last one
/// it has emitted. The store is the only coordination point between writer
/// and tailer, the same way the container engine's `StatsStream` polls
/// `docker stats` rather than being pushed to.
const TAIL_POLL_INTERVAL: Duration = Duration::from_millis(500);
/// Bounded channel capacity for a tailing reader; a slow reader applies
/// backpressure to the poll loop rather than letting memory grow unbounded.
const TAIL_CHANNEL_CAPACITY: usize = 64;

/// Writes and reads chunked logs for a single App. Construct one per
/// deployment attempt; chunk indices are assigned per (deployment_id,
/// log_type) by asking the store for the next index, so concurrent writers
/// for the two `log_type`s of the same deployment never collide.
pub struct LogPipeline {
    store: Arc<dyn Store>,
    chunk_bytes: usize,
}

impl LogPipeline {
    /// Builds a pipeline against `config`'s chunk-size ceiling.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, config: &PlatformConfig) -> Self {
        Self {
            store,
            chunk_bytes: config.log_chunk_bytes,
        }
    }

    /// Appends `bytes` to a deployment's log, splitting into chunks no
    /// larger than the configured ceiling. Safe to call concurrently from
    /// the Image Builder and Runtime Manager, since each call asks the
    /// store for the next chunk index rather than tracking one locally.
    #[instrument(skip(self, bytes), fields(%deployment_id, ?log_type, len = bytes.len()))]
    pub async fn append(
        &self,
        app_id: Uuid,
        deployment_id: Uuid,
        log_type: LogType,
        bytes: &[u8],
    ) -> PlatformResult<()> {
        for piece in bytes.chunks(self.chunk_bytes) {
            let chunk_index = self.store.next_chunk_index(deployment_id, log_type).await?;
            let content = String::from_utf8_lossy(piece).into_owned();
            let chunk = LogChunk {
                id: Uuid::new_v4(),
                app_id,
                deployment_id,
                log_type,
                chunk_index,
                size_bytes: content.len() as i64,
                content,
                created_at: Utc::now(),
            };
            self.store.append_log_chunk(chunk).await?;
        }
        Ok(())
    }

    /// Convenience wrapper for appending a single line with its newline.
    pub async fn append_line(
        &self,
        app_id: Uuid,
        deployment_id: Uuid,
        log_type: LogType,
        line: &str,
    ) -> PlatformResult<()> {
        let mut bytes = line.as_bytes().to_vec();
        bytes.push(b'\n');
        self.append(app_id, deployment_id, log_type, &bytes).await
    }

    /// Reads a page of chunks in index order.
    pub async fn get(
        &self,
        deployment_id: Uuid,
        log_type: LogType,
        offset: i64,
        limit: i64,
    ) -> PlatformResult<Vec<LogChunk>> {
        self.store.get_log_chunks(deployment_id, log_type, offset, limit).await
    }

    /// Total persisted bytes across both log types for a deployment; used to
    /// roll up an App's on-disk log footprint for quota reporting.
    pub async fn size_bytes(&self, deployment_id: Uuid) -> PlatformResult<i64> {
        let mut total = 0i64;
        for log_type in [LogType::Build, LogType::Runtime] {
            let mut offset = 0i64;
            loop {
                let page = self.get(deployment_id, log_type, offset, 256).await?;
                if page.is_empty() {
                    break;
                }
                total += page.iter().map(|chunk| chunk.size_bytes).sum::<i64>();
                offset += page.len() as i64;
            }
        }
        Ok(total)
    }

    /// Streams chunks for `deployment_id`/`log_type` as they are written,
    /// starting from `chunk_index = 0`, until the Deployment reaches a
    /// terminal state or the returned stream is dropped by its reader.
    /// Mirrors the container engine's `StatsStream`: a bounded channel fed
    /// by a background poll loop against the store, rather than a push
    /// subscription the store would need to support directly.
    pub fn tail(&self, deployment_id: Uuid, log_type: LogType) -> ReceiverStream<PlatformResult<LogChunk>> {
        let (tx, rx) = mpsc::channel(TAIL_CHANNEL_CAPACITY);
        let store = self.store.clone();
        tokio::spawn(async move {
            let mut next_index = 0i64;
            loop {
                let page = match store.get_log_chunks(deployment_id, log_type, next_index, 256).await {
                    Ok(page) => page,
                    Err(err) => {
                        let _ = tx.send(Err(err)).await;
                        return;
                    }
                };

                if page.is_empty() {
                    match store.get_deployment(deployment_id).await {
                        Ok(Some(deployment)) if deployment.status.is_terminal() => return,
                        Ok(Some(_)) => {}
                        Ok(None) => return,
                        Err(err) => {
                            let _ = tx.send(Err(err)).await;
                            return;
                        }
                    }
                    tokio::time::sleep(TAIL_POLL_INTERVAL).await;
                    continue;
                }

                for chunk in page {
                    next_index = chunk.chunk_index + 1;
                    if tx.send(Ok(chunk)).await.is_err() {
                        return;
                    }
                }
            }
        });
        ReceiverStream::new(rx)
    }

    /// Prunes chunks older than the configured retention horizon.
    pub async fn prune_expired(&self, retention: chrono::Duration) -> PlatformResult<u64> {
        let cutoff = Utc::now() - retention;
        self.store.prune_log_chunks(cutoff).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use tokio_stream::StreamExt;

    #[tokio::test]
    async fn appended_bytes_split_at_exactly_the_chunk_ceiling() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let mut config = PlatformConfig::with_defaults("postgres://x", "/tmp");
        config.log_chunk_bytes = 10;
        let pipeline = LogPipeline::new(store, &config);
        let deployment_id = Uuid::new_v4();
        let app_id = Uuid::new_v4();

        pipeline
            .append(app_id, deployment_id, LogType::Build, b"0123456789abcde")
            .await
            .unwrap();

        let chunks = pipeline.get(deployment_id, LogType::Build, 0, 10).await.unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].content.len(), 10);
        assert_eq!(chunks[1].content.len(), 5);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[1].chunk_index, 1);
    }

    #[tokio::test]
    async fn interleaved_build_and_runtime_writers_keep_independent_indices() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let config = PlatformConfig::with_defaults("postgres://x", "/tmp");
        let pipeline = LogPipeline::new(store, &config);
        let deployment_id = Uuid::new_v4();
        let app_id = Uuid::new_v4();

        pipeline.append_line(app_id, deployment_id, LogType::Build, "building").await.unwrap();
        pipeline.append_line(app_id, deployment_id, LogType::Runtime, "starting").await.unwrap();
        pipeline.append_line(app_id, deployment_id, LogType::Build, "done").await.unwrap();

        let build_chunks = pipeline.get(deployment_id, LogType::Build, 0, 10).await.unwrap();
        let runtime_chunks = pipeline.get(deployment_id, LogType::Runtime, 0, 10).await.unwrap();
        assert_eq!(build_chunks.len(), 2);
        assert_eq!(runtime_chunks.len(), 1);
        assert_eq!(build_chunks[1].chunk_index, 1);
    }

    fn fixture_deployment(id: Uuid, status: crate::models::DeploymentStatus) -> crate::models::Deployment {
        let now = Utc::now();
        crate::models::Deployment {
            id,
            app_id: Uuid::new_v4(),
            status,
            image_tag: None,
            container_id: None,
            subdomain: "demo.example.com".to_string(),
            build_log_ref: Uuid::new_v4(),
            runtime_log_ref: Uuid::new_v4(),
            error_message: None,
            detected_port: None,
            runtime_port: 8080,
            port_source: crate::models::PortSource::None,
            port_warning: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn tail_emits_chunks_as_written_and_ends_at_a_terminal_deployment() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let config = PlatformConfig::with_defaults("postgres://x", "/tmp");
        let pipeline = LogPipeline::new(store.clone(), &config);
        let deployment_id = Uuid::new_v4();
        let app_id = Uuid::new_v4();

        store
            .create_deployment(fixture_deployment(deployment_id, crate::models::DeploymentStatus::Building))
            .await
            .unwrap();

        let mut stream = pipeline.tail(deployment_id, LogType::Build);

        pipeline.append_line(app_id, deployment_id, LogType::Build, "step one").await.unwrap();
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.chunk_index, 0);

        let mut deployment = store.get_deployment(deployment_id).await.unwrap().unwrap();
        deployment.status = crate::models::DeploymentStatus::Running;
        store.update_deployment(deployment).await.unwrap();

        assert!(stream.next().await.is_none());
    }
}
