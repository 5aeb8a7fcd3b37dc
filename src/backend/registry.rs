//! Backend registry
//!
//! Owns the factories known to this process and the backends built from
//! configuration or from the master's backend list. Backends are installed
//! under `type.id`; id `default` is also reachable as the bare `type`.
//!
//! Loads build every backend of a batch before taking the write lock, so
//! lookups running concurrently with a reload see either the old or the new
//! set for each key, never a half-built backend.

use crate::backend::{
    BackendStorage, BackendStorageFactory, MemoryBackendFactory, Properties, S3BackendFactory,
};
use crate::common::{Error, Result};
use crate::proto::StorageBackend;
use config::{ConfigError, Map, Value};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Configuration namespace holding `<type>.<id>` backend tables.
pub const STORAGE_BACKEND_PREFIX: &str = "storage.backend";

const DEFAULT_ID: &str = "default";

struct BuiltBackend {
    storage_type: String,
    id: String,
    storage: Arc<dyn BackendStorage>,
}

#[derive(Default)]
pub struct BackendRegistry {
    factories: RwLock<HashMap<String, Arc<dyn BackendStorageFactory>>>,
    storages: RwLock<HashMap<String, Arc<dyn BackendStorage>>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in `s3` and `memory` factories.
    pub fn with_default_factories() -> Self {
        let registry = Self::new();
        registry.register_factory(Arc::new(S3BackendFactory));
        registry.register_factory(Arc::new(MemoryBackendFactory));
        registry
    }

    /// Last registration for a type wins.
    pub fn register_factory(&self, factory: Arc<dyn BackendStorageFactory>) {
        let storage_type = factory.storage_type().to_string();
        tracing::debug!("registered backend storage factory {}", storage_type);
        self.factories.write().insert(storage_type, factory);
    }

    pub fn has_factory(&self, storage_type: &str) -> bool {
        self.factories.read().contains_key(storage_type)
    }

    fn factory(&self, storage_type: &str) -> Option<Arc<dyn BackendStorageFactory>> {
        self.factories.read().get(storage_type).cloned()
    }

    /// Build every enabled backend under `storage.backend`.
    ///
    /// An unknown type or a backend that fails to build is fatal: nothing
    /// from the batch is installed and the error is returned.
    pub fn load_configuration(&self, config: &config::Config) -> Result<()> {
        let types = match config.get_table(STORAGE_BACKEND_PREFIX) {
            Ok(types) => types,
            Err(ConfigError::NotFound(_)) => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let mut built = Vec::new();
        for (storage_type, entries) in types {
            let factory = self
                .factory(&storage_type)
                .ok_or_else(|| Error::UnknownBackendType(storage_type.clone()))?;

            for (id, entry) in entries.into_table()? {
                let entry = entry.into_table()?;
                if !is_enabled(&entry)? {
                    tracing::debug!("skipping disabled backend storage {}.{}", storage_type, id);
                    continue;
                }
                let properties = properties_from_table(&storage_type, &id, entry)?;
                let storage = build(factory.as_ref(), &storage_type, &id, &properties)?;
                built.push(BuiltBackend {
                    storage_type: storage_type.clone(),
                    id,
                    storage,
                });
            }
        }

        self.install(built);
        Ok(())
    }

    /// Build backends pushed by the master.
    ///
    /// Types this process has no factory for are skipped with a warning; a
    /// peer may know about backends this build does not support.
    pub fn load_from_remote(&self, backends: &[StorageBackend]) -> Result<()> {
        let mut built = Vec::new();
        for backend in backends {
            let Some(factory) = self.factory(&backend.r#type) else {
                tracing::warn!("storage type {} not found", backend.r#type);
                continue;
            };
            let properties = Properties::new(backend.properties.clone());
            let storage = build(factory.as_ref(), &backend.r#type, &backend.id, &properties)?;
            built.push(BuiltBackend {
                storage_type: backend.r#type.clone(),
                id: backend.id.clone(),
                storage,
            });
        }

        self.install(built);
        Ok(())
    }

    /// Install a backend built outside the registry, e.g. one sharing a client.
    pub fn install_storage(&self, storage: Arc<dyn BackendStorage>) {
        self.install(vec![BuiltBackend {
            storage_type: storage.storage_type().to_string(),
            id: storage.id().to_string(),
            storage,
        }]);
    }

    /// Every backend installed under a `type.id` key, sorted by key.
    pub fn export_configuration(&self) -> Vec<StorageBackend> {
        let storages = self.storages.read();
        let mut backends: Vec<StorageBackend> = storages
            .iter()
            .filter_map(|(name, storage)| {
                let parts: Vec<&str> = name.split('.').collect();
                if parts.len() != 2 {
                    return None;
                }
                Some(StorageBackend {
                    r#type: parts[0].to_string(),
                    id: parts[1].to_string(),
                    properties: storage.to_properties(),
                })
            })
            .collect();
        backends.sort_by(|a, b| (&a.r#type, &a.id).cmp(&(&b.r#type, &b.id)));
        backends
    }

    /// Look up by `type.id`, or by bare `type` for the default backend.
    pub fn get(&self, name: &str) -> Option<Arc<dyn BackendStorage>> {
        self.storages.read().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.storages.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.storages.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.storages.read().is_empty()
    }

    fn install(&self, built: Vec<BuiltBackend>) {
        if built.is_empty() {
            return;
        }
        let mut storages = self.storages.write();
        for backend in built {
            let name = format!("{}.{}", backend.storage_type, backend.id);
            if backend.id == DEFAULT_ID {
                storages.insert(backend.storage_type.clone(), backend.storage.clone());
            }
            tracing::info!("installed backend storage {}", name);
            storages.insert(name, backend.storage);
        }
    }
}

fn build(
    factory: &dyn BackendStorageFactory,
    storage_type: &str,
    id: &str,
    properties: &Properties,
) -> Result<Arc<dyn BackendStorage>> {
    factory
        .build_storage(properties, id)
        .map_err(|e| Error::BackendBuild {
            name: format!("{}.{}", storage_type, id),
            reason: e.to_string(),
        })
}

fn is_enabled(entry: &Map<String, Value>) -> Result<bool> {
    match entry.get("enabled") {
        Some(value) => Ok(value.clone().into_bool()?),
        None => Ok(false),
    }
}

fn properties_from_table(
    storage_type: &str,
    id: &str,
    entry: Map<String, Value>,
) -> Result<Properties> {
    let mut map = HashMap::new();
    for (key, value) in entry {
        if key == "enabled" {
            continue;
        }
        let value = value.into_string().map_err(|e| {
            Error::InvalidConfig(format!("{}.{}.{}: {}", storage_type, id, key, e))
        })?;
        map.insert(key, value);
    }
    Ok(Properties::new(map))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(toml: &str) -> config::Config {
        config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
    }

    #[test]
    fn test_missing_namespace_is_empty() {
        let registry = BackendRegistry::with_default_factories();
        registry.load_configuration(&source("log_level = \"info\"")).unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_default_alias() {
        let registry = BackendRegistry::with_default_factories();
        registry
            .load_configuration(&source(
                r#"
[storage.backend.memory.default]
enabled = true

[storage.backend.memory.scratch]
enabled = true
"#,
            ))
            .unwrap();

        assert_eq!(registry.names(), vec!["memory", "memory.default", "memory.scratch"]);
        assert!(registry.get("memory").is_some());
        assert_eq!(registry.get("memory.scratch").unwrap().id(), "scratch");
    }

    #[test]
    fn test_disabled_entries_skipped() {
        let registry = BackendRegistry::with_default_factories();
        registry
            .load_configuration(&source(
                r#"
[storage.backend.memory.off]
enabled = false

[storage.backend.memory.implicit]
"#,
            ))
            .unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unknown_type_is_fatal() {
        let registry = BackendRegistry::with_default_factories();
        let err = registry
            .load_configuration(&source(
                r#"
[storage.backend.tape.default]
enabled = true
"#,
            ))
            .unwrap_err();
        assert!(matches!(err, Error::UnknownBackendType(ref t) if t == "tape"));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_build_failure_is_fatal() {
        let registry = BackendRegistry::with_default_factories();
        let err = registry
            .load_configuration(&source(
                r#"
[storage.backend.s3.default]
enabled = true
region = "us-east-1"
request_timeout_secs = "never"
"#,
            ))
            .unwrap_err();
        assert!(matches!(err, Error::BackendBuild { ref name, .. } if name == "s3.default"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remote_unknown_type_skipped() {
        let registry = BackendRegistry::with_default_factories();
        registry
            .load_from_remote(&[
                StorageBackend {
                    r#type: "tape".into(),
                    id: "default".into(),
                    properties: HashMap::new(),
                },
                StorageBackend {
                    r#type: "memory".into(),
                    id: "default".into(),
                    properties: HashMap::new(),
                },
            ])
            .unwrap();

        assert_eq!(registry.names(), vec!["memory", "memory.default"]);
    }

    #[test]
    fn test_export_excludes_alias_and_malformed_keys() {
        let registry = BackendRegistry::with_default_factories();
        registry
            .load_from_remote(&[
                StorageBackend {
                    r#type: "memory".into(),
                    id: "default".into(),
                    properties: HashMap::new(),
                },
                StorageBackend {
                    r#type: "memory".into(),
                    id: "a.b".into(),
                    properties: HashMap::new(),
                },
            ])
            .unwrap();

        let exported = registry.export_configuration();
        assert_eq!(exported.len(), 1);
        assert_eq!(exported[0].r#type, "memory");
        assert_eq!(exported[0].id, "default");
        assert!(registry.get("memory.a.b").is_some());
    }

    #[test]
    fn test_install_storage_aliases_default() {
        let registry = BackendRegistry::new();
        registry.install_storage(Arc::new(crate::backend::MemoryBackendStorage::new("default")));
        assert_eq!(registry.names(), vec!["memory", "memory.default"]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_register_factory_last_wins() {
        let registry = BackendRegistry::new();
        assert!(!registry.has_factory("memory"));
        registry.register_factory(Arc::new(MemoryBackendFactory));
        registry.register_factory(Arc::new(MemoryBackendFactory));
        assert!(registry.has_factory("memory"));
        assert_eq!(registry.factories.read().len(), 1);
    }
}
