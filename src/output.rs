//! The host-facing facade: owns the three batch senders and the metadata center, and implements
//! the `FlbStatus`-returning contract a plugin ABI shim would call into.

use std::sync::Arc;

use tracing::error;

use crate::config::{Config, RemoteType};
use crate::config::host_join_path;
use crate::error::MetadataError;
use crate::metadata::{MetadataCenter, MetadataCenterConfig};
use crate::pipeline::Pipeline;
use crate::record::Record;
use crate::sender::batch::Destination;
use crate::sender::{BatchSender, HttpSender};

/// The return contract the host plugin ABI expects: `Ok` maps to `FLB_OK`, `Retry` to
/// `FLB_RETRY`. There is no `Error`/fatal variant here; fatal failures happen only at `start()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlbStatus {
    Ok,
    Retry,
}

pub struct Output {
    config: Config,
    pipeline: Pipeline,
    container_sender: BatchSender,
    job_sender: BatchSender,
    log_analysis_sender: Option<BatchSender>,
    metadata: Option<Arc<MetadataCenter>>,
}

impl Output {
    /// Builds the facade. Does not touch the filesystem or network; that happens in [`start`].
    pub fn new(config: Config) -> Result<Self, crate::error::SendError> {
        let http = Arc::new(HttpSender::new(&config)?);

        let metadata = if config.docker_container_metadata_enable {
            Some(Arc::new(MetadataCenter::new(MetadataCenterConfig {
                root_path: config.docker_container_root_path.clone().into(),
                env_include: config.container_env_include.clone(),
                sync_interval: config.docker_config_sync_interval,
                max_expired_duration: config.docker_config_max_expired_duration,
            })))
        } else {
            None
        };

        let container_url = host_join_path(&config.ingest_url, &config.container_path);
        let job_url = host_join_path(&config.ingest_url, &config.job_path);

        let container_sender = BatchSender::new(Arc::clone(&http), Destination::Fixed(container_url), &config);
        let job_sender = BatchSender::new(Arc::clone(&http), Destination::Fixed(job_url), &config);

        let log_analysis_sender = match config.remote_type {
            RemoteType::LogAnalysis => Some(BatchSender::new(
                http,
                Destination::LogAnalysis(config.ingest_url.clone()),
                &config,
            )),
            RemoteType::Central => None,
        };

        let pipeline = Pipeline::new(metadata.clone());

        Ok(Output {
            config,
            pipeline,
            container_sender,
            job_sender,
            log_analysis_sender,
            metadata,
        })
    }

    /// Initializes and starts the metadata center. Fatal: a failure here should abort plugin init.
    pub fn start(&self) -> Result<(), MetadataError> {
        if let Some(metadata) = &self.metadata {
            metadata.init()?;
            metadata.start();
        }
        Ok(())
    }

    /// Runs a raw record through the pipeline and routes the resulting event to the right batch
    /// sender. Pipeline errors and batch-sender flush errors both surface as `FlbStatus::Retry`.
    pub async fn add_event(&mut self, record: &Record, fallback_timestamp_nanos: i64) -> FlbStatus {
        let event = match self.pipeline.process(record, fallback_timestamp_nanos) {
            Ok(event) => event,
            Err(err) => {
                error!(message = "record process failed", error = %err);
                return FlbStatus::Retry;
            }
        };

        let wants_log_analysis = self.config.remote_type == RemoteType::LogAnalysis
            && (!self.config.ingest_url.is_empty() || event.log_analysis_url.is_some());

        let result = match (wants_log_analysis, self.log_analysis_sender.as_mut()) {
            (true, Some(sender)) => sender.send_log_event(event).await,
            _ => match event.source {
                crate::event::Source::Job => self.job_sender.send_log_event(event).await,
                crate::event::Source::Container => self.container_sender.send_log_event(event).await,
            },
        };

        match result {
            Ok(()) => FlbStatus::Ok,
            Err(err) => {
                error!(message = "batch sender send failed", error = %err);
                FlbStatus::Retry
            }
        }
    }

    /// Flushes every active batch sender.
    pub async fn flush(&mut self) -> FlbStatus {
        let mut ok = true;
        for result in [
            self.container_sender.flush_all().await,
            self.job_sender.flush_all().await,
        ] {
            if let Err(err) = result {
                error!(message = "flush failed", error = %err);
                ok = false;
            }
        }
        if let Some(sender) = self.log_analysis_sender.as_mut() {
            if let Err(err) = sender.flush_all().await {
                error!(message = "log-analysis flush failed", error = %err);
                ok = false;
            }
        }

        if ok {
            FlbStatus::Ok
        } else {
            FlbStatus::Retry
        }
    }

    /// Resets the container and job batch senders (the non-log-analysis pair) so the host can
    /// re-present a chunk without duplication after `FLB_RETRY`.
    pub fn reset(&mut self) {
        self.container_sender.reset();
        self.job_sender.reset();
    }

    /// Flushes everything, then shuts down the metadata center's background tasks.
    pub async fn close(&mut self) -> FlbStatus {
        let status = self.flush().await;
        if let Some(metadata) = &self.metadata {
            metadata.close().await;
        }
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Record, RecordValue};
    use std::collections::HashMap;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn spawn_always_ok() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else { break };
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let _ = stream.read(&mut buf).await;
                    let _ = stream
                        .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n")
                        .await;
                    let _ = stream.shutdown().await;
                });
            }
        });
        format!("http://{addr}")
    }

    fn record_of(pairs: &[(&str, RecordValue)]) -> Record {
        pairs.iter().cloned().map(|(k, v)| (k.to_string(), v)).collect()
    }

    fn config_for(url: String) -> Config {
        Config {
            ingest_url: url,
            docker_container_metadata_enable: false,
            net_limit_bytes_per_second: 1_000_000,
            compress_level: 0,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn plain_container_record_routes_to_container_sender() {
        let url = spawn_always_ok().await;
        let mut output = Output::new(config_for(url)).unwrap();

        let record = record_of(&[("content", RecordValue::Text("hello".to_string()))]);
        let status = output.add_event(&record, 0).await;
        assert_eq!(status, FlbStatus::Ok);
    }

    #[tokio::test]
    async fn job_tagged_record_routes_to_job_sender() {
        let url = spawn_always_ok().await;
        let mut output = Output::new(config_for(url)).unwrap();

        let mut tags = HashMap::new();
        tags.insert(
            "terminus_define_tag".to_string(),
            RecordValue::Text("pipeline-task-1".to_string()),
        );
        let record = record_of(&[
            ("content", RecordValue::Text("hello".to_string())),
            ("tags", RecordValue::Map(tags)),
        ]);
        let status = output.add_event(&record, 0).await;
        assert_eq!(status, FlbStatus::Ok);
    }

    #[tokio::test]
    async fn malformed_record_is_retryable() {
        let url = spawn_always_ok().await;
        let mut output = Output::new(config_for(url)).unwrap();

        let record = record_of(&[("content", RecordValue::Other)]);
        let status = output.add_event(&record, 0).await;
        assert_eq!(status, FlbStatus::Retry);
    }

    #[tokio::test]
    async fn flush_on_empty_batches_is_ok() {
        let url = spawn_always_ok().await;
        let mut output = Output::new(config_for(url)).unwrap();
        assert_eq!(output.flush().await, FlbStatus::Ok);
    }

    #[tokio::test]
    async fn reset_does_not_touch_log_analysis_sender() {
        let url = spawn_always_ok().await;
        let mut config = config_for(url);
        config.remote_type = RemoteType::LogAnalysis;
        let mut output = Output::new(config).unwrap();

        // With no log_analysis_url on the event and no global URL other than the one we gave,
        // this still routes through the log-analysis sender per the routing rule.
        let record = record_of(&[("content", RecordValue::Text("hello".to_string()))]);
        let _ = output.add_event(&record, 0).await;
        output.reset();
        // container/job senders were never used, so reset is a no-op for them; this just proves
        // reset() doesn't panic or touch `log_analysis_sender`.
        assert!(output.log_analysis_sender.is_some());
    }
}
