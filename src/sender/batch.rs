//! Count/byte-bounded event accumulator: flushes on threshold, JSON-encodes, gzip-compresses with
//! a reused buffer, and hands the payload to an [`HttpSender`].
//!
//! The gzip encoder reuses a single buffer across flushes (`GzEncoder::new(&mut buffer, ...)`),
//! cleared and rewritten each time instead of being allocated fresh per call.

use std::io::Write;
use std::sync::Arc;

use flate2::write::GzEncoder;
use flate2::Compression;
use snafu::{OptionExt, ResultExt};
use tracing::debug;

use crate::config::Config;
use crate::error::{CompressSnafu, EncodeSnafu, MissingUrlSnafu, SendError};
use crate::event::LogEvent;

use super::HttpSender;

/// A destination's URL strategy. `Fixed` always posts to the same URL. `LogAnalysis` carries a
/// configured base URL that may be empty; when empty, the URL is adopted per-flush from the first
/// buffered event's `log_analysis_url` (per-tenant routing).
#[derive(Debug, Clone)]
pub enum Destination {
    Fixed(String),
    LogAnalysis(String),
}

pub struct BatchSender {
    http: Arc<HttpSender>,
    destination: Destination,
    compress_level: u32,
    event_limit: usize,
    content_limit_bytes: usize,
    events: Vec<LogEvent>,
    content_bytes: usize,
    gzip_buffer: Vec<u8>,
}

impl BatchSender {
    pub fn new(http: Arc<HttpSender>, destination: Destination, config: &Config) -> Self {
        BatchSender {
            http,
            destination,
            compress_level: config.compress_level,
            event_limit: config.batch_event_limit,
            content_limit_bytes: config.batch_event_content_limit_bytes,
            events: Vec::with_capacity(config.batch_event_limit),
            content_bytes: 0,
            gzip_buffer: Vec::new(),
        }
    }

    /// Appends `event`, flushing first if it would push either threshold past its bound. An error
    /// from the forced flush is returned without appending `event` (the event is lost with the
    /// rest of the failed batch, consistent with host-driven, chunk-level retry).
    pub async fn send_log_event(&mut self, event: LogEvent) -> Result<(), SendError> {
        let event_size = event.size();
        let would_exceed_count = self.events.len() + 1 > self.event_limit;
        let would_exceed_content = !self.events.is_empty()
            && self.content_bytes + event_size > self.content_limit_bytes;

        if would_exceed_count || would_exceed_content {
            self.flush_all().await?;
        }

        self.content_bytes += event_size;
        self.events.push(event);
        Ok(())
    }

    /// Flushes the current buffer if non-empty, then resets. A no-op on an empty buffer.
    pub async fn flush_all(&mut self) -> Result<(), SendError> {
        if self.events.is_empty() {
            return Ok(());
        }

        let url = match &self.destination {
            Destination::Fixed(url) => url.clone(),
            Destination::LogAnalysis(configured) if !configured.is_empty() => configured.clone(),
            Destination::LogAnalysis(_) => self.events[0]
                .log_analysis_url
                .clone()
                .context(MissingUrlSnafu)?,
        };

        let json = serde_json::to_vec(&self.events).context(EncodeSnafu)?;
        let gzip = self.compress_level > 0;
        let payload = if gzip {
            self.compress(&json)?
        } else {
            json
        };

        debug!(
            message = "flushing batch",
            events = self.events.len(),
            content_bytes = self.content_bytes,
            payload_bytes = payload.len(),
        );

        let result = self.http.send(payload, &url, gzip).await;
        self.reset();
        result
    }

    /// Discards buffered events without sending, used on `FLB_RETRY` so the host can re-present
    /// the chunk without duplication.
    pub fn reset(&mut self) {
        self.events.clear();
        self.content_bytes = 0;
    }

    fn compress(&mut self, data: &[u8]) -> Result<Vec<u8>, SendError> {
        self.gzip_buffer.clear();
        {
            let mut encoder = GzEncoder::new(&mut self.gzip_buffer, Compression::new(self.compress_level));
            encoder.write_all(data).context(CompressSnafu)?;
            encoder.finish().context(CompressSnafu)?;
        }
        Ok(self.gzip_buffer.clone())
    }
}
