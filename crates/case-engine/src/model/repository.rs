//! Deployed case definition repository.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

use crate::error::{EngineError, EngineResult};
use crate::model::loader::validate_definition;
use crate::model::types::CaseDefinition;

/// In-memory registry of deployed case definitions.
///
/// Every deployment of a key gets the next version number; lookups by key
/// resolve to the latest version.
#[derive(Clone, Default)]
pub struct DefinitionRepository {
    inner: Arc<RwLock<Deployments>>,
}

#[derive(Default)]
struct Deployments {
    by_id: HashMap<String, Arc<CaseDefinition>>,
    /// key -> ids ordered by version
    versions: HashMap<String, Vec<String>>,
}

impl DefinitionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deploy a definition, assigning its id and version.
    pub async fn deploy(&self, mut definition: CaseDefinition) -> EngineResult<Arc<CaseDefinition>> {
        validate_definition(&definition)?;

        let mut guard = self.inner.write().await;
        let version = guard
            .versions
            .get(&definition.key)
            .map(|ids| ids.len() as u32 + 1)
            .unwrap_or(1);

        definition.version = version;
        definition.id = format!("{}:{}:{}", definition.key, version, uuid::Uuid::new_v4());

        let definition = Arc::new(definition);
        guard
            .versions
            .entry(definition.key.clone())
            .or_default()
            .push(definition.id.clone());
        guard
            .by_id
            .insert(definition.id.clone(), Arc::clone(&definition));

        info!(
            definition_id = %definition.id,
            key = %definition.key,
            version = version,
            plan_items = definition.plan_item_count(),
            "Deployed case definition"
        );

        Ok(definition)
    }

    /// Find a definition by id.
    pub async fn find_by_id(&self, id: &str) -> EngineResult<Arc<CaseDefinition>> {
        if id.trim().is_empty() {
            return Err(EngineError::NotValid(
                "caseDefinitionId is null".to_string(),
            ));
        }
        self.inner
            .read()
            .await
            .by_id
            .get(id)
            .cloned()
            .ok_or_else(|| {
                EngineError::NotFound(format!("no deployed case definition found with id '{}'", id))
            })
    }

    /// Find the latest version of a definition key.
    pub async fn find_latest_by_key(&self, key: &str) -> EngineResult<Arc<CaseDefinition>> {
        if key.trim().is_empty() {
            return Err(EngineError::NotValid(
                "caseDefinitionKey is null".to_string(),
            ));
        }
        let guard = self.inner.read().await;
        guard
            .versions
            .get(key)
            .and_then(|ids| ids.last())
            .and_then(|id| guard.by_id.get(id))
            .cloned()
            .ok_or_else(|| {
                EngineError::NotFound(format!(
                    "no case definition deployed with key '{}'",
                    key
                ))
            })
    }

    /// All deployed definitions, ordered by key then version.
    pub async fn list(&self) -> Vec<Arc<CaseDefinition>> {
        let guard = self.inner.read().await;
        let mut all: Vec<_> = guard.by_id.values().cloned().collect();
        all.sort_by(|a, b| a.key.cmp(&b.key).then(a.version.cmp(&b.version)));
        all
    }
}
