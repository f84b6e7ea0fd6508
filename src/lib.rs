//! Core of the Erda log-forwarding output plugin.
//!
//! This crate implements the three subsystems where the engineering complexity of the plugin
//! lives: the [`metadata`] center that indexes container descriptors, the [`pipeline`] that
//! normalizes and enriches raw records into [`event::LogEvent`]s, and the [`sender`] stack that
//! batches, compresses and POSTs those events to the ingestion service. [`output`] wires the three
//! together behind the host-plugin contract (`FlbStatus::Ok` / `FlbStatus::Retry`).
//!
//! The host plugin ABI itself (the C-callable `FLBPluginInit`/`FLBPluginFlush`/... surface, and
//! config parsing via reflection) is not part of this crate: it is the job of a thin, separately
//! built cdylib that decodes host records and calls into [`Output`](output::Output).

pub mod config;
pub mod error;
pub mod event;
pub mod metadata;
pub mod output;
pub mod pipeline;
pub mod rate_limit;
pub mod record;
pub mod sender;

pub use config::Config;
pub use error::{ConfigError, MetadataError, PipelineError, SendError};
pub use event::LogEvent;
pub use output::{FlbStatus, Output};

/// Initializes the global `tracing` subscriber from the `LOG_LEVEL` environment variable.
///
/// A single `fmt` layer driven by an `EnvFilter`, defaulting to `info` when `LOG_LEVEL` is unset or
/// unparsable. Safe to call more than once; subsequent calls are no-ops.
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;

    let filter = std::env::var("LOG_LEVEL")
        .ok()
        .and_then(|level| EnvFilter::try_new(level).ok())
        .unwrap_or_else(|| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
