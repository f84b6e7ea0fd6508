//! Turns a raw record into a normalized [`LogEvent`]: field extraction, timestamp resolution,
//! content cleanup, and the four-step enrichment chain (cluster tag, inline erda tags, container
//! metadata, business rewrites).

use std::collections::HashMap;
use std::sync::Arc;

use chrono::DateTime;
use tracing::warn;

use crate::error::PipelineError;
use crate::event::{LogEvent, Source};
use crate::metadata::MetadataCenter;
use crate::record::{get_and_convert, Default_, Record};

const META_ERDA_PREFIX: &str = "__meta_erda_";
const DICE_PREFIX: &str = "dice_";
const TERMINUS_DEFINE_TAG: &str = "terminus_define_tag";
const MONITOR_LOG_COLLECTOR: &str = "monitor_log_collector";

pub struct Pipeline {
    metadata: Option<Arc<MetadataCenter>>,
    cluster_name: Option<String>,
}

impl Pipeline {
    pub fn new(metadata: Option<Arc<MetadataCenter>>) -> Self {
        Pipeline {
            metadata,
            cluster_name: std::env::var("DICE_CLUSTER_NAME").ok(),
        }
    }

    pub fn process(&self, record: &Record, fallback_timestamp_nanos: i64) -> Result<LogEvent, PipelineError> {
        let id = get_and_convert("id", record, Some(Default_::Text(String::new())))?
            .into_text()
            .unwrap_or_default();
        let stream = get_and_convert("stream", record, Some(Default_::Text("stdout".to_string())))?
            .into_text()
            .unwrap_or_default();
        let content_raw = get_and_convert("content", record, Some(Default_::Text(String::new())))?
            .into_text()
            .unwrap_or_default();

        let timestamp = parse_record_time(record).unwrap_or(fallback_timestamp_nanos);
        let content = content_raw.strip_suffix('\n').map(str::to_string).unwrap_or(content_raw);

        let tags = match get_and_convert("tags", record, Some(Default_::StringMap(HashMap::new()))) {
            Ok(coerced) => coerced.into_string_map().unwrap_or_default(),
            Err(err) => {
                warn!(message = "can't get tags from record", error = %err);
                HashMap::new()
            }
        };
        let labels = match get_and_convert("labels", record, Some(Default_::StringMap(HashMap::new()))) {
            Ok(coerced) => coerced.into_string_map().unwrap_or_default(),
            Err(err) => {
                warn!(message = "can't get labels from record", error = %err);
                HashMap::new()
            }
        };

        let mut event = LogEvent {
            source: Source::Container,
            id,
            stream,
            content,
            offset: 0,
            timestamp,
            tags,
            labels,
            log_analysis_url: None,
        };

        self.tag_cluster_name(&mut event);
        self.enrich_inline_erda_tags(&mut event, record);
        self.enrich_container_metadata(&mut event);
        self.apply_business_rewrites(&mut event);

        Ok(event)
    }

    fn tag_cluster_name(&self, event: &mut LogEvent) {
        if let Some(name) = &self.cluster_name {
            event.tags.insert("dice_cluster_name".to_string(), name.clone());
            event.tags.insert("cluster_name".to_string(), name.clone());
        }
    }

    fn enrich_inline_erda_tags(&self, event: &mut LogEvent, record: &Record) {
        for (key, value) in record {
            let Some(pos) = key.find(META_ERDA_PREFIX) else {
                continue;
            };
            if let Some(text) = value.as_str_lossy() {
                let tag_name = &key[pos + META_ERDA_PREFIX.len()..];
                event.tags.insert(tag_name.to_string(), text);
            }
        }
    }

    fn enrich_container_metadata(&self, event: &mut LogEvent) {
        let Some(metadata) = &self.metadata else {
            return;
        };
        if event.id.is_empty() {
            return;
        }
        let Some(info) = metadata.get_info(&event.id) else {
            warn!(message = "no container metadata found", container_id = %event.id);
            return;
        };

        for (key, value) in &info.env {
            event.tags.insert(key.to_lowercase(), value.clone());
        }

        insert_if_present(&mut event.tags, "pod_name", info.labels.get("io.kubernetes.pod.name"));
        insert_if_present(&mut event.tags, "pod_namespace", info.labels.get("io.kubernetes.pod.namespace"));
        insert_if_present(&mut event.tags, "pod_id", info.labels.get("io.kubernetes.pod.uid"));
        event.tags.insert("container_id".to_string(), info.id.0.clone());
        insert_if_present(&mut event.tags, "container_name", info.labels.get("io.kubernetes.container.name"));
    }

    fn apply_business_rewrites(&self, event: &mut LogEvent) {
        if let Some(job_id) = event.tags.get(TERMINUS_DEFINE_TAG).cloned() {
            event.id = job_id;
            event.source = Source::Job;
        } else {
            event.source = Source::Container;
        }

        if let Some(url) = event.tags.remove(MONITOR_LOG_COLLECTOR) {
            event.log_analysis_url = Some(url);
        }

        let duplicates: Vec<(String, String)> = event
            .tags
            .iter()
            .filter(|(k, _)| k.starts_with(DICE_PREFIX))
            .map(|(k, v)| (k[DICE_PREFIX.len()..].to_string(), v.clone()))
            .collect();
        for (key, value) in duplicates {
            event.tags.insert(key, value);
        }
    }
}

fn insert_if_present(tags: &mut HashMap<String, String>, key: &str, value: Option<&String>) {
    if let Some(value) = value {
        tags.insert(key.to_string(), value.clone());
    }
}

fn parse_record_time(record: &Record) -> Option<i64> {
    let raw = record.get("time")?.as_str_lossy()?;
    DateTime::parse_from_rfc3339(&raw).ok().map(|dt| dt.timestamp_nanos_opt().unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordValue;

    fn record_of(pairs: &[(&str, RecordValue)]) -> Record {
        pairs.iter().cloned().map(|(k, v)| (k.to_string(), v)).collect()
    }

    #[test]
    fn required_content_fields_populate_event() {
        let record = record_of(&[
            ("id", RecordValue::ByteString(b"cid1".to_vec())),
            ("stream", RecordValue::ByteString(b"stderr".to_vec())),
            ("content", RecordValue::ByteString(b"hello\n".to_vec())),
        ]);
        let pipeline = Pipeline::new(None);
        let event = pipeline.process(&record, 42).unwrap();

        assert_eq!(event.id, "cid1");
        assert_eq!(event.stream, "stderr");
        assert_eq!(event.content, "hello");
        assert_eq!(event.timestamp, 42);
        assert_eq!(event.source, Source::Container);
    }

    #[test]
    fn missing_time_falls_back_to_host_timestamp() {
        let record = record_of(&[("content", RecordValue::Text("x".to_string()))]);
        let pipeline = Pipeline::new(None);
        let event = pipeline.process(&record, 999).unwrap();
        assert_eq!(event.timestamp, 999);
    }

    #[test]
    fn valid_rfc3339_time_overrides_fallback() {
        let record = record_of(&[
            ("content", RecordValue::Text("x".to_string())),
            ("time", RecordValue::Text("2021-10-12T16:00:14.130323755Z".to_string())),
        ]);
        let pipeline = Pipeline::new(None);
        let event = pipeline.process(&record, 999).unwrap();
        assert_eq!(event.timestamp, 1634054414130323755);
    }

    #[test]
    fn inline_erda_tags_are_promoted() {
        let record = record_of(&[
            ("content", RecordValue::Text("x".to_string())),
            ("__meta_erda_msp_env_id", RecordValue::ByteString(b"abc111".to_vec())),
        ]);
        let pipeline = Pipeline::new(None);
        let event = pipeline.process(&record, 0).unwrap();
        assert_eq!(event.tags.get("msp_env_id").unwrap(), "abc111");
    }

    #[test]
    fn terminus_define_tag_routes_to_job_and_overrides_id() {
        let mut tags = HashMap::new();
        tags.insert("terminus_define_tag".to_string(), "pipeline-task-1024".to_string());
        let record = record_of(&[
            ("id", RecordValue::Text("original-cid".to_string())),
            ("content", RecordValue::Text("x".to_string())),
            ("tags", RecordValue::Map(tags.into_iter().map(|(k, v)| (k, RecordValue::Text(v))).collect())),
        ]);
        let pipeline = Pipeline::new(None);
        let event = pipeline.process(&record, 0).unwrap();
        assert_eq!(event.source, Source::Job);
        assert_eq!(event.id, "pipeline-task-1024");
    }

    #[test]
    fn monitor_log_collector_tag_becomes_transient_url() {
        let mut tags = HashMap::new();
        tags.insert("monitor_log_collector".to_string(), "http://tenant.example/collect".to_string());
        let record = record_of(&[
            ("content", RecordValue::Text("x".to_string())),
            ("tags", RecordValue::Map(tags.into_iter().map(|(k, v)| (k, RecordValue::Text(v))).collect())),
        ]);
        let pipeline = Pipeline::new(None);
        let event = pipeline.process(&record, 0).unwrap();
        assert_eq!(event.log_analysis_url.as_deref(), Some("http://tenant.example/collect"));
        assert!(!event.tags.contains_key("monitor_log_collector"));
    }

    #[test]
    fn dice_prefixed_tags_are_duplicated_without_prefix() {
        let mut tags = HashMap::new();
        tags.insert("dice_application_name".to_string(), "scheduler".to_string());
        let record = record_of(&[
            ("content", RecordValue::Text("x".to_string())),
            ("tags", RecordValue::Map(tags.into_iter().map(|(k, v)| (k, RecordValue::Text(v))).collect())),
        ]);
        let pipeline = Pipeline::new(None);
        let event = pipeline.process(&record, 0).unwrap();
        assert_eq!(event.tags.get("dice_application_name").unwrap(), "scheduler");
        assert_eq!(event.tags.get("application_name").unwrap(), "scheduler");
    }

    #[test]
    fn unsupported_value_type_on_a_present_key_fails() {
        let record = record_of(&[("content", RecordValue::Other)]);
        let pipeline = Pipeline::new(None);
        assert!(pipeline.process(&record, 0).is_err());
    }
}
