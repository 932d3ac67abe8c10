//! Worker registry: maps keys to worker constructors.
//!
//! The registry is an ordinary value. Callers build one, register what they
//! need (or start from [`WorkerRegistry::with_builtin_workers`]) and pass it
//! to whatever creates workers.

use super::geoflow::GeoflowWorker;
use super::template::{TemplateDbWorker, TemplateWorker};
use super::threedfier::{ThreedfierTerrainWorker, ThreedfierWorker};
use super::{Worker, WorkerParams};
use std::collections::HashMap;
use tp_common::{Error, Result};
use tracing::debug;

/// Builds a worker from its parameters.
pub type WorkerConstructor = Box<dyn Fn(&WorkerParams) -> Result<Box<dyn Worker>> + Send + Sync>;

#[derive(Default)]
pub struct WorkerRegistry {
    constructors: HashMap<String, WorkerConstructor>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding `template`, `templatedb`, `threedfier`,
    /// `threedfier_terrain` and `lod13`.
    pub fn with_builtin_workers() -> Self {
        let mut registry = Self::new();
        registry.register(TemplateWorker::KEY, |_| Ok(Box::new(TemplateWorker)));
        registry.register(TemplateDbWorker::KEY, |_| Ok(Box::new(TemplateDbWorker)));
        registry.register(ThreedfierWorker::KEY, |p| {
            Ok(Box::new(ThreedfierWorker::new(p.thinning)))
        });
        registry.register(ThreedfierTerrainWorker::KEY, |p| {
            Ok(Box::new(ThreedfierTerrainWorker::new(
                p.thinning,
                p.simplification_tolerance,
            )))
        });
        registry.register(GeoflowWorker::KEY, |p| Ok(Box::new(GeoflowWorker::new(p.flags.clone()))));
        registry
    }

    /// Register `constructor` under `key`. A later registration for the same
    /// key replaces the earlier one.
    pub fn register<F>(&mut self, key: &str, constructor: F)
    where
        F: Fn(&WorkerParams) -> Result<Box<dyn Worker>> + Send + Sync + 'static,
    {
        if self
            .constructors
            .insert(key.to_string(), Box::new(constructor))
            .is_some()
        {
            debug!(key, "replaced registered worker");
        }
    }

    pub fn create(&self, key: &str, params: &WorkerParams) -> Result<Box<dyn Worker>> {
        let constructor = self
            .constructors
            .get(key)
            .ok_or_else(|| Error::WorkerNotRegistered {
                key: key.to_string(),
            })?;
        constructor(params)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.constructors.contains_key(key)
    }

    /// Registered keys, sorted.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }
}

impl std::fmt::Debug for WorkerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerRegistry")
            .field("keys", &self.keys())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::{ExecutionParams, TileContext};
    use tp_common::TileId;

    struct Named(&'static str);

    impl Worker for Named {
        fn name(&self) -> &'static str {
            self.0
        }

        fn execute(&self, _: &TileId, _: &TileContext, _: &ExecutionParams) -> Result<bool> {
            Ok(true)
        }
    }

    #[test]
    fn test_builtin_keys() {
        let registry = WorkerRegistry::with_builtin_workers();
        assert_eq!(
            registry.keys(),
            vec!["lod13", "template", "templatedb", "threedfier", "threedfier_terrain"]
        );
        let worker = registry.create("threedfier", &WorkerParams::default()).unwrap();
        assert_eq!(worker.name(), "threedfier");
    }

    #[test]
    fn test_unknown_key_is_config_error() {
        let registry = WorkerRegistry::with_builtin_workers();
        let err = registry.create("lod22", &WorkerParams::default()).err().unwrap();
        assert!(matches!(err, Error::WorkerNotRegistered { ref key } if key == "lod22"));
        assert!(err.is_config());
    }

    #[test]
    fn test_last_registration_wins() {
        let mut registry = WorkerRegistry::new();
        registry.register("custom", |_| Ok(Box::new(Named("first"))));
        registry.register("custom", |_| Ok(Box::new(Named("second"))));
        let worker = registry.create("custom", &WorkerParams::default()).unwrap();
        assert_eq!(worker.name(), "second");
        assert_eq!(registry.keys(), vec!["custom"]);
    }

    #[test]
    fn test_constructor_errors_propagate() {
        let mut registry = WorkerRegistry::new();
        registry.register("broken", |_| Err(Error::config("thinning must be positive")));
        assert!(registry.create("broken", &WorkerParams::default()).is_err());
        assert!(registry.contains("broken"));
        assert!(!registry.contains("other"));
    }
}
