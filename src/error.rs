//! Error kinds for the plugin's subsystems, `snafu`-derived with a context-selector per variant.

use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    #[snafu(display("no ingestion URL configured and none could be derived from the environment"))]
    MissingIngestUrl,

    #[snafu(display("invalid value for {field}: {value}"))]
    InvalidValue { field: &'static str, value: String },
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MetadataError {
    #[snafu(display("failed to glob descriptor root {root}: {source}"))]
    Glob {
        root: String,
        source: glob::PatternError,
    },

    #[snafu(display("failed to read descriptor file {path}: {source}"))]
    ReadDescriptor {
        path: String,
        source: std::io::Error,
    },

    #[snafu(display("failed to parse descriptor file {path}: {source}"))]
    ParseDescriptor {
        path: String,
        source: serde_json::Error,
    },

    #[snafu(display("failed to watch root {root}: {source}"))]
    Watch {
        root: String,
        source: notify::Error,
    },
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PipelineError {
    #[snafu(display("entry key must exist: {key}"))]
    KeyMustExist { key: String },

    #[snafu(display("invalid data type for key {key}"))]
    TypeInvalid { key: String },
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SendError {
    #[snafu(display("payload of {len} bytes exceeds the rate limiter's maximum burst"))]
    ExceedsBurst { len: usize },

    #[snafu(display("failed to encode batch as JSON: {source}"))]
    Encode { source: serde_json::Error },

    #[snafu(display("failed to gzip-compress batch: {source}"))]
    Compress { source: std::io::Error },

    #[snafu(display("failed to build request: {source}"))]
    BuildRequest { source: reqwest::Error },

    #[snafu(display("request failed: {source}"))]
    Transport { source: reqwest::Error },

    #[snafu(display("response status {status} is not success"))]
    BadStatus { status: u16 },

    #[snafu(display("no destination URL is configured for this batch"))]
    MissingUrl,
}
