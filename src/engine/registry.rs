use std::collections::HashMap;
use std::sync::Arc;

use super::DbManager;
use crate::config::AgentConfig;
use crate::error::Result;

pub type ManagerFactory = Arc<dyn Fn(&AgentConfig) -> Result<Arc<dyn DbManager>> + Send + Sync>;

/// Engine adapters keyed by `(engine, workload)`.
///
/// Filled once by the entry point before the server starts, then only read.
#[derive(Default, Clone)]
pub struct ManagerRegistry {
    factories: HashMap<(String, String), ManagerFactory>,
}

fn key(engine: &str, workload: &str) -> (String, String) {
    (engine.to_ascii_lowercase(), workload.to_ascii_lowercase())
}

impl ManagerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, engine: &str, workload: &str, factory: F)
    where
        F: Fn(&AgentConfig) -> Result<Arc<dyn DbManager>> + Send + Sync + 'static,
    {
        self.factories
            .insert(key(engine, workload), Arc::new(factory));
    }

    pub fn contains(&self, engine: &str, workload: &str) -> bool {
        self.factories.contains_key(&key(engine, workload))
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Builds the manager for the configured engine. `Ok(None)` means no
    /// adapter is registered and the agent runs without one.
    pub fn create(&self, config: &AgentConfig) -> Result<Option<Arc<dyn DbManager>>> {
        match self.factories.get(&key(&config.engine, &config.workload)) {
            Some(factory) => factory(config).map(Some),
            None => {
                tracing::warn!(
                    "No database manager registered for engine={} workload={}",
                    config.engine,
                    config.workload
                );
                Ok(None)
            }
        }
    }
}
