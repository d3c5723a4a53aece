//! Lookup from task kind to the strategy that produces it.

use std::{collections::HashMap, sync::Arc};

use thiserror::Error;

use crate::domain::task::TaskKind;

use super::strategy::Strategy;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("no handler for type `{0}`")]
    UnknownType(String),
}

/// Holds one strategy per task kind. Built at startup and read-only afterwards.
#[derive(Default, Clone)]
pub struct StrategyRegistry {
    strategies: HashMap<TaskKind, Arc<dyn Strategy>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `strategy` under its own kind, replacing any previous entry.
    pub fn register(&mut self, strategy: Arc<dyn Strategy>) -> &mut Self {
        self.strategies.insert(strategy.kind(), strategy);
        self
    }

    pub fn with(mut self, strategy: Arc<dyn Strategy>) -> Self {
        self.register(strategy);
        self
    }

    pub fn resolve(&self, kind: TaskKind) -> Result<Arc<dyn Strategy>, RegistryError> {
        self.strategies
            .get(&kind)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownType(kind.to_string()))
    }

    /// Registered kinds in declaration order.
    pub fn kinds(&self) -> Vec<TaskKind> {
        TaskKind::ALL
            .into_iter()
            .filter(|kind| self.strategies.contains_key(kind))
            .collect()
    }
}

impl std::fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
