//! Hierarchical variable storage of one case instance.
//!
//! Variables are keyed by owner execution id. Reads walk an ancestry chain
//! (execution first, case instance root last) and stop at the first owner
//! holding the name. Whether a write lands on the root or on the execution
//! itself is decided by the tree, which knows the root.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A variable as seen by queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableInstance {
    pub name: String,
    pub value: serde_json::Value,
    /// Execution owning the variable (the case instance id for global variables).
    pub case_execution_id: String,
    pub case_instance_id: String,
}

/// Variables of one case instance, grouped by owner execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VariableScope {
    owners: BTreeMap<String, BTreeMap<String, serde_json::Value>>,
}

impl VariableScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Nearest value of `name` along `ancestry` (owner first, root last).
    pub fn get<'a, I>(&self, ancestry: I, name: &str) -> Option<&serde_json::Value>
    where
        I: IntoIterator<Item = &'a str>,
    {
        ancestry
            .into_iter()
            .find_map(|owner| self.get_local(owner, name))
    }

    pub fn get_local(&self, owner: &str, name: &str) -> Option<&serde_json::Value> {
        self.owners.get(owner).and_then(|vars| vars.get(name))
    }

    /// All variables visible from the first element of `ancestry`.
    /// A name owned closer to the execution shadows the same name further up.
    pub fn visible<'a, I>(&self, ancestry: I) -> BTreeMap<String, serde_json::Value>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut merged = BTreeMap::new();
        for owner in ancestry {
            if let Some(vars) = self.owners.get(owner) {
                for (name, value) in vars {
                    merged.entry(name.clone()).or_insert_with(|| value.clone());
                }
            }
        }
        merged
    }

    pub fn local(&self, owner: &str) -> BTreeMap<String, serde_json::Value> {
        self.owners.get(owner).cloned().unwrap_or_default()
    }

    pub fn set(&mut self, owner: &str, name: impl Into<String>, value: serde_json::Value) {
        self.owners
            .entry(owner.to_string())
            .or_default()
            .insert(name.into(), value);
    }

    /// Remove `name` from `owner`, returning the old value.
    pub fn remove(&mut self, owner: &str, name: &str) -> Option<serde_json::Value> {
        let vars = self.owners.get_mut(owner)?;
        let removed = vars.remove(name);
        if vars.is_empty() {
            self.owners.remove(owner);
        }
        removed
    }

    /// Destroy every variable owned by `owner`.
    pub fn drop_owner(&mut self, owner: &str) -> usize {
        self.owners.remove(owner).map(|vars| vars.len()).unwrap_or(0)
    }

    /// Flatten into variable instances, ordered by owner then name.
    pub fn instances(&self, case_instance_id: &str) -> Vec<VariableInstance> {
        self.owners
            .iter()
            .flat_map(|(owner, vars)| {
                vars.iter().map(move |(name, value)| VariableInstance {
                    name: name.clone(),
                    value: value.clone(),
                    case_execution_id: owner.clone(),
                    case_instance_id: case_instance_id.to_string(),
                })
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.owners.values().map(|vars| vars.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}
