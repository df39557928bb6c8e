// Environment variable loading

use crate::{ConfigError, Result};
use serde_json::{Map, Value};
use std::env;

/// Loads `PREFIX_SECTION_FIELD` variables into a nested `{section: {field: value}}` object.
///
/// `CADENCE_DISPATCHER_BATCH_LIMIT=25` becomes `{"dispatcher": {"batch_limit": 25}}`.
/// Values that parse as JSON scalars (numbers, booleans) keep their type; anything else
/// stays a string.
pub struct EnvLoader {
    prefix: Option<String>,
}

impl EnvLoader {
    pub fn new(prefix: Option<String>) -> Self {
        Self { prefix }
    }

    /// Load from the process environment
    pub fn load(&self) -> Map<String, Value> {
        self.load_from(env::vars())
    }

    /// Load from an explicit set of variables
    pub fn load_from<I, K, V>(&self, vars: I) -> Map<String, Value>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut root = Map::new();

        for (key, value) in vars {
            let Some(path) = self.strip(key.as_ref()) else {
                continue;
            };
            insert_path(&mut root, &path, coerce(value.into()));
        }

        root
    }

    /// Load a single variable by its unprefixed name
    pub fn load_var(&self, key: &str) -> Result<String> {
        env::var(self.full_key(key)).map_err(ConfigError::Env)
    }

    pub fn load_var_or(&self, key: &str, default: &str) -> String {
        self.load_var(key).unwrap_or_else(|_| default.to_string())
    }

    fn full_key(&self, key: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}_{}", prefix, key.to_uppercase()),
            None => key.to_uppercase(),
        }
    }

    /// Lowercased key with the prefix removed, or `None` if the prefix does not match.
    fn strip(&self, key: &str) -> Option<String> {
        let rest = match &self.prefix {
            Some(prefix) => key.strip_prefix(prefix.as_str())?.strip_prefix('_')?,
            None => key,
        };
        if rest.is_empty() {
            return None;
        }
        Some(rest.to_lowercase())
    }
}

impl Default for EnvLoader {
    fn default() -> Self {
        Self::new(None)
    }
}

/// Parse a raw string into the closest JSON scalar.
pub(crate) fn coerce(raw: String) -> Value {
    match serde_json::from_str::<Value>(raw.trim()) {
        Ok(value @ (Value::Number(_) | Value::Bool(_))) => value,
        _ => Value::String(raw),
    }
}

/// `section_field_name` goes under `section.field_name`; a key without `_` stays top-level.
pub(crate) fn insert_path(root: &mut Map<String, Value>, key: &str, value: Value) {
    match key.split_once('_') {
        Some((section, field)) if !field.is_empty() => {
            let entry = root
                .entry(section.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(map) = entry {
                map.insert(field.to_string(), value);
            }
        }
        _ => {
            root.entry(key.to_string()).or_insert(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixed_vars_are_nested() {
        let loader = EnvLoader::new(Some("CADENCE".to_string()));
        let map = loader.load_from([
            ("CADENCE_DISPATCHER_BATCH_LIMIT", "25"),
            ("CADENCE_MAIL_LINK_BASE", "https://example.com/rsvp"),
            ("CADENCE_CRON_ENABLED", "false"),
            ("OTHER_DISPATCHER_BATCH_LIMIT", "99"),
        ]);

        assert_eq!(map["dispatcher"]["batch_limit"], Value::from(25));
        assert_eq!(
            map["mail"]["link_base"],
            Value::from("https://example.com/rsvp")
        );
        assert_eq!(map["cron"]["enabled"], Value::from(false));
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn test_prefix_must_be_followed_by_separator() {
        let loader = EnvLoader::new(Some("CADENCE".to_string()));
        let map = loader.load_from([("CADENCEX_DISPATCHER_BATCH_LIMIT", "1"), ("CADENCE_", "1")]);
        assert!(map.is_empty());
    }

    #[test]
    fn test_coerce_keeps_strings() {
        assert_eq!(coerce("0.95".to_string()), Value::from(0.95));
        assert_eq!(coerce("true".to_string()), Value::from(true));
        assert_eq!(
            coerce("invites@example.com".to_string()),
            Value::from("invites@example.com")
        );
        assert_eq!(coerce("\"quoted\"".to_string()), Value::from("\"quoted\""));
    }

    #[test]
    fn test_env_loader_with_default() {
        let loader = EnvLoader::new(Some("CADENCE_TEST".to_string()));
        assert_eq!(loader.load_var_or("NONEXISTENT_VAR_12345", "default"), "default");
        assert!(loader.load_var("MISSING_VAR_67890").is_err());
    }
}
