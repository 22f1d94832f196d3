//! Namespaced key/value settings
//!
//! Settings are grouped by namespace (usually a router type such as
//! `ProphetRouter`). A [`SettingsView`] reads one namespace and falls back to
//! the shared `group` namespace for keys it does not define.
//!
//! ```toml
//! [group]
//! buffer_size = "5M"
//! msg_ttl = 300
//!
//! [ProphetRouter]
//! seconds_in_time_unit = 30
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use crate::error::{ConfigError, ConfigResult};

/// Namespace every router view falls back to
pub const GROUP_NS: &str = "group";

/// All settings of a run, by namespace
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Settings {
    namespaces: BTreeMap<String, BTreeMap<String, String>>,
}

impl Settings {
    /// Create empty settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse settings from TOML text
    ///
    /// Every top-level table is a namespace; scalar values are kept in their
    /// textual form and converted on lookup.
    pub fn from_toml_str(text: &str) -> ConfigResult<Self> {
        let table: toml::Table = text
            .parse()
            .map_err(|e: toml::de::Error| ConfigError::Parse(e.to_string()))?;

        let mut settings = Settings::new();
        for (namespace, value) in table {
            let toml::Value::Table(entries) = value else {
                return Err(ConfigError::Parse(format!(
                    "top-level key {namespace} must be a table"
                )));
            };
            for (key, value) in entries {
                let text = match value {
                    toml::Value::String(s) => s,
                    toml::Value::Integer(i) => i.to_string(),
                    toml::Value::Float(f) => f.to_string(),
                    toml::Value::Boolean(b) => b.to_string(),
                    other => {
                        return Err(ConfigError::Parse(format!(
                            "unsupported value for {namespace}.{key}: {other}"
                        )));
                    }
                };
                settings.set(&namespace, &key, text);
            }
        }
        Ok(settings)
    }

    /// Load settings from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Parse(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Set a value
    pub fn set(&mut self, namespace: &str, key: &str, value: impl Into<String>) -> &mut Self {
        self.namespaces
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value.into());
        self
    }

    /// Builder-style [`Settings::set`]
    pub fn with(mut self, namespace: &str, key: &str, value: impl Into<String>) -> Self {
        self.set(namespace, key, value);
        self
    }

    /// Raw value of a key in one namespace, without fallback
    pub fn raw(&self, namespace: &str, key: &str) -> Option<&str> {
        self.namespaces
            .get(namespace)
            .and_then(|ns| ns.get(key))
            .map(String::as_str)
    }

    /// View of a namespace that falls back to [`GROUP_NS`]
    pub fn namespace(&self, namespace: &str) -> SettingsView<'_> {
        SettingsView {
            settings: self,
            namespace: namespace.to_string(),
            fallback: (namespace != GROUP_NS).then(|| GROUP_NS.to_string()),
        }
    }

    /// View of a namespace with an explicit fallback namespace
    pub fn with_fallback(&self, namespace: &str, fallback: &str) -> SettingsView<'_> {
        SettingsView {
            settings: self,
            namespace: namespace.to_string(),
            fallback: Some(fallback.to_string()),
        }
    }
}

/// Read access to one namespace of [`Settings`]
#[derive(Debug, Clone)]
pub struct SettingsView<'a> {
    settings: &'a Settings,
    namespace: String,
    fallback: Option<String>,
}

impl<'a> SettingsView<'a> {
    /// Name of the primary namespace
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Whether the key is defined here or in the fallback
    pub fn contains(&self, key: &str) -> bool {
        self.get_str(key).is_some()
    }

    /// Raw textual value
    pub fn get_str(&self, key: &str) -> Option<&'a str> {
        self.settings.raw(&self.namespace, key).or_else(|| {
            self.fallback
                .as_deref()
                .and_then(|fb| self.settings.raw(fb, key))
        })
    }

    /// Raw textual value, failing when missing
    pub fn require_str(&self, key: &str) -> ConfigResult<&'a str> {
        self.get_str(key).ok_or_else(|| ConfigError::Missing {
            namespace: self.namespace.clone(),
            key: key.to_string(),
        })
    }

    /// Parse an optional value
    pub fn get<T: FromStr>(&self, key: &str) -> ConfigResult<Option<T>> {
        match self.get_str(key) {
            Some(raw) => raw
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| self.invalid(key, raw, "cannot parse value")),
            None => Ok(None),
        }
    }

    /// Parse a value, using `default` when missing
    pub fn get_or<T: FromStr>(&self, key: &str, default: T) -> ConfigResult<T> {
        Ok(self.get(key)?.unwrap_or(default))
    }

    /// Parse a required value
    pub fn require<T: FromStr>(&self, key: &str) -> ConfigResult<T> {
        let raw = self.require_str(key)?;
        raw.trim()
            .parse()
            .map_err(|_| self.invalid(key, raw, "cannot parse value"))
    }

    /// Parse an optional boolean (`true`/`false`/`1`/`0`)
    pub fn get_bool(&self, key: &str) -> ConfigResult<Option<bool>> {
        match self.get_str(key) {
            Some(raw) => match raw.trim() {
                "true" | "1" => Ok(Some(true)),
                "false" | "0" => Ok(Some(false)),
                _ => Err(self.invalid(key, raw, "expected a boolean")),
            },
            None => Ok(None),
        }
    }

    /// Parse an optional byte size with decimal `k`/`M`/`G` suffixes
    pub fn get_size(&self, key: &str) -> ConfigResult<Option<u64>> {
        match self.get_str(key) {
            Some(raw) => parse_size(raw)
                .map(Some)
                .ok_or_else(|| self.invalid(key, raw, "expected a size such as 500k or 5M")),
            None => Ok(None),
        }
    }

    /// Build an `Invalid` error for a key of this view
    pub fn invalid(&self, key: &str, value: &str, reason: &str) -> ConfigError {
        ConfigError::Invalid {
            namespace: self.namespace.clone(),
            key: key.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Parse a byte size such as `250`, `500k`, `1.5M` or `2G`
pub fn parse_size(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    let (number, multiplier) = match raw.chars().last()? {
        'k' | 'K' => (&raw[..raw.len() - 1], 1_000.0),
        'M' => (&raw[..raw.len() - 1], 1_000_000.0),
        'G' => (&raw[..raw.len() - 1], 1_000_000_000.0),
        _ => (raw, 1.0),
    };
    let value: f64 = number.trim().parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    Some((value * multiplier).round() as u64)
}
