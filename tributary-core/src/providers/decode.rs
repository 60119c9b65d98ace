use std::collections::BTreeMap;
use std::fmt;
use std::path::Path as FsPath;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::provider::{Provider, Sink};
use crate::providers::{join_names, walk_map};
use crate::value::Value;

pub const STRING_PROVIDER_NAME: &str = "String";
pub const BYTES_PROVIDER_NAME: &str = "Bytes";

/// Document formats a text source can be decoded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    Json,
    Yaml,
    Toml,
}

impl Format {
    pub fn name(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Yaml => "yaml",
            Self::Toml => "toml",
        }
    }

    pub fn from_extension(path: &FsPath) -> Option<Self> {
        match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "yaml" | "yml" => Some(Self::Yaml),
            "toml" => Some(Self::Toml),
            _ => None,
        }
    }

    /// Decodes a document whose top level is a map.
    pub fn decode(self, text: &str) -> Result<BTreeMap<String, Value>> {
        if text.trim().is_empty() {
            return Ok(BTreeMap::new());
        }

        let document: serde_json::Value = match self {
            Self::Json => serde_json::from_str(text)
                .map_err(|err| Error::Decode(format!("failed to parse JSON: {err}")))?,
            Self::Yaml => serde_yaml::from_str(text)
                .map_err(|err| Error::Decode(format!("failed to parse YAML: {err}")))?,
            Self::Toml => toml::from_str(text)
                .map_err(|err| Error::Decode(format!("failed to parse TOML: {err}")))?,
        };

        match Value::from(document) {
            Value::Map(entries) => Ok(entries),
            Value::Null => Ok(BTreeMap::new()),
            other => Err(Error::Decode(format!(
                "{} document must be a map, found {}",
                self.name(),
                other.type_name()
            ))),
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Format {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "yaml" | "yml" => Ok(Self::Yaml),
            "toml" => Ok(Self::Toml),
            other => Err(Error::Config(format!("unsupported format '{other}'"))),
        }
    }
}

/// A fixed document held in memory, decoded on every fetch.
pub struct TextProvider {
    name: String,
    format: Format,
    content: Vec<u8>,
}

impl TextProvider {
    pub fn from_string(format: Format, content: impl Into<String>) -> Self {
        Self {
            name: join_names([format.name(), STRING_PROVIDER_NAME]),
            format,
            content: content.into().into_bytes(),
        }
    }

    pub fn from_bytes(format: Format, content: impl Into<Vec<u8>>) -> Self {
        Self {
            name: join_names([format.name(), BYTES_PROVIDER_NAME]),
            format,
            content: content.into(),
        }
    }
}

#[async_trait]
impl Provider for TextProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn values(&self, cancel: &CancellationToken, sink: &mut dyn Sink) -> Result<()> {
        let text = std::str::from_utf8(&self.content)
            .map_err(|err| Error::Decode(format!("{} is not valid UTF-8: {err}", self.name)))?;
        let values = self.format.decode(text)?;
        walk_map(cancel, &values, sink).await
    }
}
