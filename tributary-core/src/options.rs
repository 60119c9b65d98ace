use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const DEFAULT_TAG: &str = "fido";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Start watching notifying providers whenever a fetch runs.
    pub auto_watch: bool,
    /// Re-fetch a provider when it signals a change.
    pub auto_update: bool,
    /// Lower ranked providers cannot overwrite values set by higher ranked ones.
    pub enforce_priority: bool,
    /// Name of the tag carrying each field's path segment.
    pub tag: String,
    pub error_on_field_not_found: bool,
    pub error_on_missing_tag: bool,
    /// Buffered notifications per subscriber before publishing blocks.
    pub subscriber_capacity: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            auto_watch: true,
            auto_update: true,
            enforce_priority: true,
            tag: DEFAULT_TAG.to_owned(),
            error_on_field_not_found: false,
            error_on_missing_tag: true,
            subscriber_capacity: 16,
        }
    }
}

impl Options {
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    pub fn with_auto_watch(mut self, enabled: bool) -> Self {
        self.auto_watch = enabled;
        self
    }

    pub fn with_auto_update(mut self, enabled: bool) -> Self {
        self.auto_update = enabled;
        self
    }

    pub fn with_priority_enforcement(mut self, enforce: bool) -> Self {
        self.enforce_priority = enforce;
        self
    }

    pub fn with_error_on_field_not_found(mut self, error: bool) -> Self {
        self.error_on_field_not_found = error;
        self
    }

    pub fn with_error_on_missing_tag(mut self, error: bool) -> Self {
        self.error_on_missing_tag = error;
        self
    }

    pub fn with_subscriber_capacity(mut self, capacity: usize) -> Self {
        self.subscriber_capacity = capacity;
        self
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let options: Self = toml::from_str(content)
            .map_err(|err| Error::Config(format!("failed to parse options: {err}")))?;
        options.validate()
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let options: Self = serde_json::from_str(content)
            .map_err(|err| Error::Config(format!("failed to parse options: {err}")))?;
        options.validate()
    }

    fn validate(self) -> Result<Self> {
        if self.tag.trim().is_empty() {
            return Err(Error::Config("tag must not be empty".to_owned()));
        }
        if self.subscriber_capacity == 0 {
            return Err(Error::Config(
                "subscriber_capacity must be at least 1".to_owned(),
            ));
        }
        Ok(self)
    }
}

/// Loads options from a `.toml` or `.json` file.
pub fn load_from_file(path: &Path) -> Result<Options> {
    let content = std::fs::read_to_string(path).map_err(|err| {
        Error::Config(format!(
            "failed to read options '{}': {err}",
            path.display()
        ))
    })?;

    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => Options::from_json_str(&content),
        Some("toml") | None => Options::from_toml_str(&content),
        Some(other) => Err(Error::Config(format!(
            "unsupported options format '{other}' for '{}'",
            path.display()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::Options;

    #[test]
    fn defaults_match_documented_behaviour() {
        let options = Options::default();
        assert!(options.auto_watch);
        assert!(options.auto_update);
        assert!(options.enforce_priority);
        assert!(options.error_on_missing_tag);
        assert!(!options.error_on_field_not_found);
        assert_eq!(options.tag, "fido");
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let options = Options::from_toml_str("tag = \"cfg\"\nenforce_priority = false\n")
            .expect("options should parse");
        assert_eq!(options.tag, "cfg");
        assert!(!options.enforce_priority);
        assert!(options.auto_update);
    }

    #[test]
    fn rejects_zero_capacity() {
        let error = Options::from_json_str(r#"{"subscriber_capacity": 0}"#)
            .expect_err("validation should fail");
        assert!(error.to_string().contains("subscriber_capacity"));
    }
}
