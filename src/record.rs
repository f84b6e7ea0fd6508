//! The heterogeneously-typed record the host decoder hands us, and the coercion helper that turns
//! it into the strongly-typed fields [`crate::pipeline`] needs.
//!
//! The Go original models a decoded record as `map[interface{}]interface{}` and leans on a
//! type-switch per access. Rust has no equivalent dynamic type, so the host decoder's handful of
//! possible value shapes become an explicit sum type here — the `interface{}`-plus-type-switch
//! becomes a `match` over [`RecordValue`].

use std::collections::HashMap;

use crate::error::{KeyMustExistSnafu, PipelineError, TypeInvalidSnafu};
use snafu::OptionExt;

/// A single value as the host decoder would hand it to us.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordValue {
    ByteString(Vec<u8>),
    Text(String),
    UInt64(u64),
    Float64(f64),
    Map(HashMap<String, RecordValue>),
    Other,
}

impl RecordValue {
    /// Zero-copy-ish view as `&str` for byte-string and text variants; `None` otherwise.
    pub fn as_str_lossy(&self) -> Option<String> {
        match self {
            RecordValue::ByteString(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
            RecordValue::Text(s) => Some(s.clone()),
            _ => None,
        }
    }
}

/// A record as handed to the [`crate::pipeline`]: an opaque key/value mapping with per-key
/// heterogeneous value types.
pub type Record = HashMap<String, RecordValue>;

/// The coerced result of a field extraction: either a scalar string/uint64 or a flattened
/// `map<string,string>`, matching the handful of destination types the pipeline actually needs.
#[derive(Debug, Clone, PartialEq)]
pub enum Coerced {
    Text(String),
    UInt64(u64),
    StringMap(HashMap<String, String>),
    Map(HashMap<String, RecordValue>),
}

impl Coerced {
    pub fn into_text(self) -> Option<String> {
        match self {
            Coerced::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn into_string_map(self) -> Option<HashMap<String, String>> {
        match self {
            Coerced::StringMap(m) => Some(m),
            _ => None,
        }
    }

    pub fn into_map(self) -> Option<HashMap<String, RecordValue>> {
        match self {
            Coerced::Map(m) => Some(m),
            _ => None,
        }
    }
}

/// The default value supplied to [`get_and_convert`]: `None` makes the key required, `Some`
/// supplies a fallback and also signals the desired coercion shape (e.g. requesting a
/// `StringMap` default makes nested maps get flattened to `map<string,string>`).
#[derive(Debug, Clone)]
pub enum Default_ {
    Text(String),
    StringMap(HashMap<String, String>),
}

/// Extracts `key` from `record`, coercing its value to the shape implied by `default`.
///
/// Mirrors `getAndConvert` in the Go original: when the key is absent and no default was given,
/// returns [`PipelineError::KeyMustExist`]; when present but of an unsupported type, returns
/// [`PipelineError::TypeInvalid`]. A nested mapping is flattened to `map<string,string>` when a
/// `StringMap` default was supplied; otherwise it's passed through unconverted as `Coerced::Map`.
pub fn get_and_convert(
    key: &str,
    record: &Record,
    default: Option<Default_>,
) -> Result<Coerced, PipelineError> {
    let value = match record.get(key) {
        Some(v) => v,
        None => {
            return match default {
                Some(Default_::Text(s)) => Ok(Coerced::Text(s)),
                Some(Default_::StringMap(m)) => Ok(Coerced::StringMap(m)),
                None => KeyMustExistSnafu { key }.fail(),
            };
        }
    };

    coerce(key, value, default.is_some())
}

fn coerce(key: &str, value: &RecordValue, want_string_map: bool) -> Result<Coerced, PipelineError> {
    match value {
        RecordValue::ByteString(bytes) => {
            Ok(Coerced::Text(String::from_utf8_lossy(bytes).into_owned()))
        }
        RecordValue::Text(s) => Ok(Coerced::Text(s.clone())),
        RecordValue::UInt64(n) => Ok(Coerced::UInt64(*n)),
        RecordValue::Float64(f) => Ok(Coerced::UInt64(*f as u64)),
        RecordValue::Map(nested) if want_string_map => {
            let mut out = HashMap::with_capacity(nested.len());
            for (k, v) in nested {
                let coerced = coerce(k, v, false)?;
                let s = coerced.into_text().context(TypeInvalidSnafu { key: k.clone() })?;
                out.insert(k.clone(), s);
            }
            Ok(Coerced::StringMap(out))
        }
        RecordValue::Map(nested) => Ok(Coerced::Map(nested.clone())),
        RecordValue::Other => TypeInvalidSnafu { key }.fail(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_of(pairs: &[(&str, RecordValue)]) -> Record {
        pairs.iter().cloned().map(|(k, v)| (k.to_string(), v)).collect()
    }

    #[test]
    fn missing_required_key_fails() {
        let record = record_of(&[]);
        let err = get_and_convert("id", &record, None).unwrap_err();
        assert!(matches!(err, PipelineError::KeyMustExist { .. }));
    }

    #[test]
    fn missing_optional_key_returns_default() {
        let record = record_of(&[]);
        let got = get_and_convert("stream", &record, Some(Default_::Text("stdout".into()))).unwrap();
        assert_eq!(got.into_text().unwrap(), "stdout");
    }

    #[test]
    fn byte_string_coerces_to_text() {
        let record = record_of(&[("id", RecordValue::ByteString(b"cid1".to_vec()))]);
        let got = get_and_convert("id", &record, None).unwrap();
        assert_eq!(got.into_text().unwrap(), "cid1");
    }

    #[test]
    fn float_truncates_to_uint() {
        let record = record_of(&[("n", RecordValue::Float64(3.9))]);
        let got = get_and_convert("n", &record, None).unwrap();
        assert_eq!(got, Coerced::UInt64(3));
    }

    #[test]
    fn nested_map_flattens_when_string_map_requested() {
        let mut nested = HashMap::new();
        nested.insert("a".to_string(), RecordValue::ByteString(b"1".to_vec()));
        nested.insert("b".to_string(), RecordValue::Text("2".to_string()));
        let record = record_of(&[("tags", RecordValue::Map(nested))]);

        let got = get_and_convert("tags", &record, Some(Default_::StringMap(HashMap::new())))
            .unwrap()
            .into_string_map()
            .unwrap();

        assert_eq!(got.get("a").unwrap(), "1");
        assert_eq!(got.get("b").unwrap(), "2");
    }

    #[test]
    fn nested_map_passes_through_when_no_string_map_default_requested() {
        let mut nested = HashMap::new();
        nested.insert("a".to_string(), RecordValue::UInt64(7));
        let record = record_of(&[("extra", RecordValue::Map(nested))]);

        let got = get_and_convert("extra", &record, None).unwrap().into_map().unwrap();
        assert_eq!(got.get("a").unwrap(), &RecordValue::UInt64(7));
    }

    #[test]
    fn unsupported_type_fails() {
        let record = record_of(&[("x", RecordValue::Other)]);
        let err = get_and_convert("x", &record, None).unwrap_err();
        assert!(matches!(err, PipelineError::TypeInvalid { .. }));
    }
}
