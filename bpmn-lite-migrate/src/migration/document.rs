use crate::types::VariableMap;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

fn is_none_direction(d: &MappingDirection) -> bool {
    *d == MappingDirection::None
}

/// Which definition an instance is migrated to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TargetDefinition {
    Id {
        definition_id: String,
    },
    /// Latest deployed version of the key when `version` is omitted.
    Key {
        process_key: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<u32>,
    },
}

impl std::fmt::Display for TargetDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetDefinition::Id { definition_id } => write!(f, "with id '{}'", definition_id),
            TargetDefinition::Key {
                process_key,
                version: Some(v),
            } => write!(f, "with key '{}' and version '{}'", process_key, v),
            TargetDefinition::Key {
                process_key,
                version: None,
            } => write!(f, "with key '{}'", process_key),
        }
    }
}

/// A migration request: target definition, activity mappings and instance variables.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MigrationDocument {
    pub target: TargetDefinition,
    #[serde(default)]
    pub mappings: Vec<ActivityMapping>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub instance_variables: VariableMap,
}

impl MigrationDocument {
    pub fn to_definition_id(definition_id: impl Into<String>) -> Self {
        Self::new(TargetDefinition::Id {
            definition_id: definition_id.into(),
        })
    }

    pub fn to_process(process_key: impl Into<String>, version: Option<u32>) -> Self {
        Self::new(TargetDefinition::Key {
            process_key: process_key.into(),
            version,
        })
    }

    fn new(target: TargetDefinition) -> Self {
        Self {
            target,
            mappings: Vec::new(),
            instance_variables: VariableMap::new(),
        }
    }

    pub fn with_mapping(mut self, mapping: ActivityMapping) -> Self {
        self.mappings.push(mapping);
        self
    }

    pub fn with_instance_variable(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.instance_variables.insert(name.into(), value.into());
        self
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Parsing migration document JSON")
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).context("Parsing migration document YAML")
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Serializing migration document")
    }
}

// ─── Activity mapping ─────────────────────────────────────────

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MappingDirection {
    #[default]
    None,
    /// Targets live in the sub-process called by the call activity.
    IntoSubprocess,
    /// Sources live in the sub-process, targets in the process containing the call activity.
    OutToParent,
}

/// One user-declared correspondence between old and new activities.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActivityMapping {
    pub from_activity_ids: Vec<String>,
    pub to_activity_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_activity_id: Option<String>,
    #[serde(default, skip_serializing_if = "is_none_direction")]
    pub direction: MappingDirection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub called_element_version: Option<u32>,
    /// Set once on the instance the targets land in.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub instance_variables: VariableMap,
    /// Set on every resulting execution.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub local_variables: VariableMap,
    /// Set on the executions of one target activity, on top of `local_variables`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub activity_local_variables: BTreeMap<String, VariableMap>,
}

impl ActivityMapping {
    fn new(from: Vec<String>, to: Vec<String>) -> Self {
        Self {
            from_activity_ids: from,
            to_activity_ids: to,
            call_activity_id: None,
            direction: MappingDirection::None,
            called_element_version: None,
            instance_variables: VariableMap::new(),
            local_variables: VariableMap::new(),
            activity_local_variables: BTreeMap::new(),
        }
    }

    pub fn one_to_one(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::new(vec![from.into()], vec![to.into()])
    }

    pub fn one_to_many<I, S>(from: impl Into<String>, to: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(vec![from.into()], to.into_iter().map(Into::into).collect())
    }

    pub fn many_to_one<I, S>(from: I, to: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(from.into_iter().map(Into::into).collect(), vec![to.into()])
    }

    pub fn in_sub_process_of_call_activity(mut self, call_activity_id: impl Into<String>) -> Self {
        self.call_activity_id = Some(call_activity_id.into());
        self.direction = MappingDirection::IntoSubprocess;
        self
    }

    pub fn in_parent_process_of_call_activity(
        mut self,
        call_activity_id: impl Into<String>,
    ) -> Self {
        self.call_activity_id = Some(call_activity_id.into());
        self.direction = MappingDirection::OutToParent;
        self
    }

    pub fn with_called_element_version(mut self, version: u32) -> Self {
        self.called_element_version = Some(version);
        self
    }

    pub fn with_instance_variable(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.instance_variables.insert(name.into(), value.into());
        self
    }

    pub fn with_local_variable(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.local_variables.insert(name.into(), value.into());
        self
    }

    pub fn with_local_variable_for(
        mut self,
        to_activity_id: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.activity_local_variables
            .entry(to_activity_id.into())
            .or_default()
            .insert(name.into(), value.into());
        self
    }

    /// Local variables for executions created at `to_activity_id`.
    pub fn locals_for(&self, to_activity_id: &str) -> VariableMap {
        let mut vars = self.local_variables.clone();
        if let Some(specific) = self.activity_local_variables.get(to_activity_id) {
            vars.extend(specific.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        vars
    }

    pub(crate) fn from_label(&self) -> String {
        self.from_activity_ids.join(", ")
    }
}
