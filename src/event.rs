//! The normalized log event schema and its destination classification.

use std::collections::HashMap;

use serde::Serialize;

/// Which ingestion endpoint an event is destined for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Container,
    Job,
}

impl Default for Source {
    fn default() -> Self {
        Source::Container
    }
}

/// A normalized log record, ready for batching and serialization.
///
/// `log_analysis_url` is carried inline for per-tenant routing (§4.3/§4.5) but must never appear
/// in the serialized wire payload, hence `#[serde(skip)]`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LogEvent {
    pub source: Source,
    pub id: String,
    pub stream: String,
    pub content: String,
    /// Deprecated: retained for schema compatibility, always serialized as 0.
    #[serde(serialize_with = "serialize_zero")]
    pub offset: u64,
    pub timestamp: i64,
    pub tags: HashMap<String, String>,
    /// Deprecated: retained for schema compatibility with the log exporter.
    pub labels: HashMap<String, String>,
    #[serde(skip)]
    pub log_analysis_url: Option<String>,
}

fn serialize_zero<S>(_: &u64, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_u64(0)
}

impl LogEvent {
    /// Approximate wire size used to track a batch's cumulative content-byte budget: content plus
    /// identifying fields plus every tag's key/value.
    pub fn size(&self) -> usize {
        let mut size = self.content.len() + self.id.len() + self.stream.len();
        for (k, v) in &self.tags {
            size += k.len() + v.len();
        }
        size
    }
}
