//! Parsing of the `config.v2.json` container descriptor and conversion into a [`ContainerInfo`].

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::{ContainerId, ContainerInfo};

pub const CONFIG_FILE_NAME: &str = "config.v2.json";

/// On-disk shape of `config.v2.json`. Unknown fields are ignored by serde's default behavior.
#[derive(Debug, Deserialize)]
pub struct DockerConfigV2 {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "Config", default)]
    pub config: DockerConfigInner,
}

#[derive(Debug, Default, Deserialize)]
pub struct DockerConfigInner {
    #[serde(rename = "Env", default)]
    pub env: Vec<String>,
    #[serde(rename = "Labels", default)]
    pub labels: HashMap<String, String>,
}

/// Converts a parsed descriptor into a [`ContainerInfo`], retaining only whitelisted env keys.
pub fn convert(descriptor: DockerConfigV2, env_include: &HashSet<String>, source_path: &Path) -> ContainerInfo {
    let mut env = HashMap::new();
    for item in &descriptor.config.env {
        if let Some((key, value)) = item.split_once('=') {
            if env_include.contains(key) {
                env.insert(key.to_string(), value.to_string());
            }
        }
    }

    ContainerInfo {
        id: ContainerId(descriptor.id),
        name: descriptor.name,
        env,
        labels: descriptor.config.labels,
        source_path: source_path.to_path_buf(),
    }
}

/// Reads and parses a single descriptor file from disk.
pub fn read_descriptor(path: &Path) -> Result<DockerConfigV2, DescriptorError> {
    let bytes = std::fs::read(path).map_err(|source| DescriptorError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|source| DescriptorError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[derive(Debug)]
pub enum DescriptorError {
    Read { path: PathBuf, source: std::io::Error },
    Parse { path: PathBuf, source: serde_json::Error },
}

impl std::fmt::Display for DescriptorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DescriptorError::Read { path, source } => {
                write!(f, "failed to read {}: {}", path.display(), source)
            }
            DescriptorError::Parse { path, source } => {
                write!(f, "failed to parse {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for DescriptorError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_whitelist_filters_entries() {
        let descriptor = DockerConfigV2 {
            id: "cid1".to_string(),
            name: "/my-container".to_string(),
            config: DockerConfigInner {
                env: vec!["MSP_ENV_ID=abc111".to_string(), "SECRET=nope".to_string()],
                labels: HashMap::new(),
            },
        };
        let mut include = HashSet::new();
        include.insert("MSP_ENV_ID".to_string());

        let info = convert(descriptor, &include, Path::new("/root/cid1/config.v2.json"));

        assert_eq!(info.env.get("MSP_ENV_ID").unwrap(), "abc111");
        assert!(info.env.get("SECRET").is_none());
    }

    #[test]
    fn empty_whitelist_retains_nothing() {
        let descriptor = DockerConfigV2 {
            id: "cid1".to_string(),
            name: String::new(),
            config: DockerConfigInner {
                env: vec!["ANY=thing".to_string()],
                labels: HashMap::new(),
            },
        };
        let info = convert(descriptor, &HashSet::new(), Path::new("/x"));
        assert!(info.env.is_empty());
    }

    #[test]
    fn parses_real_shaped_json() {
        let json = r#"{
            "ID": "cid1",
            "Name": "/my-container",
            "Config": {
                "Env": ["MSP_ENV_ID=abc111"],
                "Labels": {"io.kubernetes.pod.name": "p1"}
            },
            "SomeUnknownField": 42
        }"#;
        let descriptor: DockerConfigV2 = serde_json::from_str(json).unwrap();
        assert_eq!(descriptor.id, "cid1");
        assert_eq!(descriptor.config.labels.get("io.kubernetes.pod.name").unwrap(), "p1");
    }
}
