use super::dto::ProcessModelDto;
use super::yaml::{parse_process_json, parse_process_yaml};
use super::{FlowNode, ProcessDefinition};
use anyhow::{anyhow, Context, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use tracing::info;

/// Read access to deployed process definitions.
pub trait DefinitionRepository: Send + Sync {
    /// Look up by definition id (`<key>:<version>`).
    fn definition(&self, definition_id: &str) -> Option<Arc<ProcessDefinition>>;

    fn deployed_version(&self, key: &str, version: u32) -> Option<Arc<ProcessDefinition>>;

    fn latest_deployed_version(&self, key: &str) -> Option<Arc<ProcessDefinition>>;

    fn lookup_node(&self, definition_id: &str, activity_id: &str) -> Option<FlowNode> {
        self.definition(definition_id)
            .and_then(|def| def.node(activity_id).cloned())
    }
}

// ── MemoryRepository ──

type Versions = BTreeMap<u32, Arc<ProcessDefinition>>;

/// In-memory DefinitionRepository. Each deploy of a key gets version `latest + 1`.
pub struct MemoryRepository {
    inner: RwLock<HashMap<String, Versions>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Validate and deploy a model as the next version of its key.
    pub fn deploy(&self, dto: &ProcessModelDto) -> Result<Arc<ProcessDefinition>> {
        let mut store = self.inner.write().map_err(|e| anyhow!("Lock: {}", e))?;
        let version = store
            .get(&dto.key)
            .and_then(|versions| versions.keys().next_back())
            .map_or(1, |v| v + 1);
        let definition = Arc::new(
            dto.build_definition(version)
                .with_context(|| format!("Deploying process '{}'", dto.key))?,
        );
        store
            .entry(dto.key.clone())
            .or_default()
            .insert(version, definition.clone());
        info!(definition_id = %definition.id(), "Deployed process definition");
        Ok(definition)
    }

    pub fn deploy_yaml(&self, yaml: &str) -> Result<Arc<ProcessDefinition>> {
        let dto = parse_process_yaml(yaml).context("Parsing process model YAML")?;
        self.deploy(&dto)
    }

    pub fn deploy_json(&self, json: &str) -> Result<Arc<ProcessDefinition>> {
        let dto = parse_process_json(json).context("Parsing process model JSON")?;
        self.deploy(&dto)
    }

    /// Remove one deployed version. Returns whether it existed.
    pub fn undeploy(&self, definition_id: &str) -> Result<bool> {
        let Some((key, version)) = split_definition_id(definition_id) else {
            return Ok(false);
        };
        let mut store = self.inner.write().map_err(|e| anyhow!("Lock: {}", e))?;
        let removed = store
            .get_mut(key)
            .and_then(|versions| versions.remove(&version))
            .is_some();
        if removed {
            info!(definition_id, "Undeployed process definition");
        }
        Ok(removed)
    }

    /// Deployed versions of a key, ascending.
    pub fn versions(&self, key: &str) -> Vec<u32> {
        self.read(|store| {
            store
                .get(key)
                .map(|versions| versions.keys().copied().collect())
                .unwrap_or_default()
        })
    }

    fn read<T>(&self, f: impl FnOnce(&HashMap<String, Versions>) -> T) -> T {
        // Poisoned locks are still readable.
        let store = self.inner.read().unwrap_or_else(|e| e.into_inner());
        f(&store)
    }
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl DefinitionRepository for MemoryRepository {
    fn definition(&self, definition_id: &str) -> Option<Arc<ProcessDefinition>> {
        let (key, version) = split_definition_id(definition_id)?;
        self.deployed_version(key, version)
    }

    fn deployed_version(&self, key: &str, version: u32) -> Option<Arc<ProcessDefinition>> {
        self.read(|store| store.get(key)?.get(&version).cloned())
    }

    fn latest_deployed_version(&self, key: &str) -> Option<Arc<ProcessDefinition>> {
        self.read(|store| store.get(key)?.values().next_back().cloned())
    }
}

fn split_definition_id(definition_id: &str) -> Option<(&str, u32)> {
    let (key, version) = definition_id.rsplit_once(':')?;
    Some((key, version.parse().ok()?))
}
