//! Layered configuration for the Cadence engine.
//!
//! Values are merged in order: built-in defaults, an optional TOML/JSON/.env file,
//! then `CADENCE_`-prefixed environment variables.
//!
//! ```
//! use cadence_config::{ConfigManager, EngineConfig};
//!
//! let manager = ConfigManager::with_defaults(&EngineConfig::default()).unwrap();
//! manager.set("dispatcher.batch_limit", 20).unwrap();
//!
//! let config: EngineConfig = manager.load_validated().unwrap();
//! assert_eq!(config.dispatcher.batch_limit, 20);
//! ```

pub mod engine;
pub mod env;
pub mod error;
pub mod loader;
pub mod validation;

pub use engine::{CronConfig, DispatcherConfig, EngineConfig, ExperimentConfig, MailConfig};
pub use env::EnvLoader;
pub use error::{ConfigError, Result};
pub use loader::{ConfigLoader, FileFormat};
pub use validation::{ConfigValidator, Validate};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

/// Environment prefix used by [`EngineConfig::load`].
pub const ENV_PREFIX: &str = "CADENCE";

/// Merges configuration layers into one tree of values.
///
/// Keys are dotted paths (`dispatcher.batch_limit`).
#[derive(Clone, Default)]
pub struct ConfigManager {
    tree: Arc<RwLock<Map<String, Value>>>,
    env_prefix: Option<String>,
}

impl ConfigManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a manager that reads environment variables under `prefix`.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            tree: Arc::default(),
            env_prefix: Some(prefix.into()),
        }
    }

    /// Seed the tree with a serialized default value.
    pub fn with_defaults<T: Serialize>(defaults: &T) -> Result<Self> {
        let manager = Self::new();
        manager.merge_value(serde_json::to_value(defaults)?)?;
        Ok(manager)
    }

    /// Overlay prefixed environment variables.
    pub fn load_env(&self) -> Result<()> {
        let loader = EnvLoader::new(self.env_prefix.clone());
        self.merge_value(Value::Object(loader.load()))
    }

    /// Load a `.env` file into the process environment, then overlay the environment.
    ///
    /// A missing default `.env` is not an error.
    pub fn load_dotenv(&self, path: Option<&Path>) -> Result<()> {
        match path {
            Some(path) => {
                dotenvy::from_path(path).map_err(|e| ConfigError::Load {
                    source_name: path.display().to_string(),
                    reason: e.to_string(),
                })?;
            }
            None => {
                dotenvy::dotenv().ok();
            }
        }
        self.load_env()
    }

    /// Overlay a configuration file, detecting its format from the extension.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let data = ConfigLoader::auto(path)?.load_file(path)?;
        self.merge_value(Value::Object(data))
    }

    /// Deep-merge a value into the tree. Objects merge key by key; anything else replaces.
    pub fn merge_value(&self, value: Value) -> Result<()> {
        let Value::Object(incoming) = value else {
            return Err(ConfigError::invalid("<root>", "expected an object"));
        };
        let mut tree = self.tree.write().unwrap_or_else(PoisonError::into_inner);
        merge_maps(&mut tree, incoming);
        Ok(())
    }

    /// Set a value at a dotted path, creating intermediate objects.
    pub fn set<T: Serialize>(&self, key: &str, value: T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        let mut tree = self.tree.write().unwrap_or_else(PoisonError::into_inner);

        let mut segments = key.split('.').peekable();
        let mut node = &mut *tree;
        while let Some(segment) = segments.next() {
            if segments.peek().is_none() {
                node.insert(segment.to_string(), value);
                return Ok(());
            }
            let child = node
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !child.is_object() {
                *child = Value::Object(Map::new());
            }
            node = match child {
                Value::Object(map) => map,
                _ => return Err(ConfigError::invalid(key, "path crosses a scalar")),
            };
        }
        Err(ConfigError::invalid(key, "empty key"))
    }

    /// Read a value at a dotted path.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let tree = self.tree.read().unwrap_or_else(PoisonError::into_inner);

        let mut segments = key.split('.');
        let first = segments.next().unwrap_or_default();
        let mut node = tree
            .get(first)
            .ok_or_else(|| ConfigError::KeyNotFound(key.to_string()))?;
        for segment in segments {
            node = node
                .get(segment)
                .ok_or_else(|| ConfigError::KeyNotFound(key.to_string()))?;
        }

        Ok(serde_json::from_value(node.clone())?)
    }

    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.get(key).unwrap_or(default)
    }

    pub fn has(&self, key: &str) -> bool {
        self.get::<Value>(key).is_ok()
    }

    /// Deserialize the whole tree and validate it.
    pub fn load_validated<T: DeserializeOwned + Validate>(&self) -> Result<T> {
        let snapshot = {
            let tree = self.tree.read().unwrap_or_else(PoisonError::into_inner);
            Value::Object(tree.clone())
        };

        let validated: T = serde_json::from_value(snapshot)?;
        validated.validate()?;
        Ok(validated)
    }
}

fn merge_maps(target: &mut Map<String, Value>, incoming: Map<String, Value>) {
    for (key, value) in incoming {
        match (target.get_mut(&key), value) {
            (Some(Value::Object(existing)), Value::Object(nested)) => merge_maps(existing, nested),
            (_, value) => {
                target.insert(key, value);
            }
        }
    }
}

impl EngineConfig {
    /// Load defaults, an optional file, `.env`, and `CADENCE_*` variables, then validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let manager = ConfigManager::with_defaults(&EngineConfig::default())?;
        let manager = ConfigManager {
            env_prefix: Some(ENV_PREFIX.to_string()),
            ..manager
        };

        if let Some(path) = path {
            manager.load_file(path)?;
        }
        manager.load_dotenv(None)?;
        manager.load_validated()
    }
}
