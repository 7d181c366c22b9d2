//! Case definition YAML loader.
//!
//! Reads compiled case definitions serialized as YAML and validates the
//! structural rules the execution core relies on:
//! - the root plan item is a case plan model
//! - activity ids are unique
//! - only stages (and the plan model) have children
//! - process and case tasks name the definition they spawn

use std::collections::HashSet;
use std::path::Path;

use crate::engine::state::ActivityType;
use crate::error::{EngineError, EngineResult};
use crate::model::types::{CaseDefinition, PlanItemDefinition};

/// Parse a YAML string into a CaseDefinition.
pub fn parse_definition(yaml_content: &str) -> EngineResult<CaseDefinition> {
    let definition: CaseDefinition = serde_yaml::from_str(yaml_content)?;

    validate_definition(&definition)?;

    Ok(definition)
}

/// Validate a parsed definition.
pub fn validate_definition(definition: &CaseDefinition) -> EngineResult<()> {
    if definition.key.trim().is_empty() {
        return Err(EngineError::NotValid(
            "Case definition key must not be empty".to_string(),
        ));
    }

    let root = &definition.case_plan_model;
    if root.activity_type != ActivityType::CasePlanModel {
        return Err(EngineError::NotValid(format!(
            "Case definition '{}': root plan item '{}' must be a case plan model, found {}",
            definition.key, root.id, root.activity_type
        )));
    }

    let mut seen = HashSet::new();
    validate_plan_item(&definition.key, root, true, &mut seen)
}

fn validate_plan_item<'a>(
    key: &str,
    item: &'a PlanItemDefinition,
    is_root: bool,
    seen: &mut HashSet<&'a str>,
) -> EngineResult<()> {
    if item.id.trim().is_empty() {
        return Err(EngineError::NotValid(format!(
            "Case definition '{}': plan item without id",
            key
        )));
    }

    if !seen.insert(item.id.as_str()) {
        return Err(EngineError::NotValid(format!(
            "Case definition '{}': duplicate activity id '{}'",
            key, item.id
        )));
    }

    if !is_root && item.activity_type == ActivityType::CasePlanModel {
        return Err(EngineError::NotValid(format!(
            "Case definition '{}': '{}' is a nested case plan model",
            key, item.id
        )));
    }

    if !item.activity_type.is_container() && !item.children.is_empty() {
        return Err(EngineError::NotValid(format!(
            "Case definition '{}': {} '{}' cannot contain plan items",
            key, item.activity_type, item.id
        )));
    }

    if item.activity_type.spawns_instance()
        && item
            .definition_key
            .as_deref()
            .map(|k| k.trim().is_empty())
            .unwrap_or(true)
    {
        return Err(EngineError::NotValid(format!(
            "Case definition '{}': {} '{}' must reference a definition key",
            key, item.activity_type, item.id
        )));
    }

    if is_root && item.manual_activation_required {
        return Err(EngineError::NotValid(format!(
            "Case definition '{}': a case plan model cannot require manual activation",
            key
        )));
    }

    for child in &item.children {
        validate_plan_item(key, child, false, seen)?;
    }

    Ok(())
}

/// Load every `*.yaml` / `*.yml` definition in a directory, sorted by file name.
pub fn load_dir(dir: &Path) -> EngineResult<Vec<CaseDefinition>> {
    let entries = std::fs::read_dir(dir).map_err(|e| {
        EngineError::Config(format!(
            "Cannot read definitions directory {}: {}",
            dir.display(),
            e
        ))
    })?;

    let mut paths: Vec<_> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            matches!(
                p.extension().and_then(|e| e.to_str()),
                Some("yaml") | Some("yml")
            )
        })
        .collect();
    paths.sort();

    let mut definitions = Vec::with_capacity(paths.len());
    for path in paths {
        let content = std::fs::read_to_string(&path).map_err(|e| {
            EngineError::Config(format!("Cannot read {}: {}", path.display(), e))
        })?;
        let definition = parse_definition(&content).map_err(|e| match e {
            EngineError::Parse(msg) => EngineError::Parse(format!("{}: {}", path.display(), msg)),
            other => other,
        })?;
        definitions.push(definition);
    }

    Ok(definitions)
}
