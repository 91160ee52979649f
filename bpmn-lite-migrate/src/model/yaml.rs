use super::dto::ProcessModelDto;
use anyhow::{Context, Result};
use std::path::Path;

/// Parse a YAML string into a ProcessModelDto.
///
/// Validation is NOT performed here; `ProcessModelDto::build_definition`
/// validates before building the graph.
pub fn parse_process_yaml(yaml_str: &str) -> Result<ProcessModelDto> {
    let dto: ProcessModelDto = serde_yaml::from_str(yaml_str)?;
    Ok(dto)
}

/// Parse a JSON string into a ProcessModelDto.
pub fn parse_process_json(json_str: &str) -> Result<ProcessModelDto> {
    let dto: ProcessModelDto = serde_json::from_str(json_str)?;
    Ok(dto)
}

/// Load a model file; `.json` is read as JSON, anything else as YAML.
pub fn load_process_file(path: &Path) -> Result<ProcessModelDto> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    if is_json {
        parse_process_json(&content).with_context(|| format!("Parsing {}", path.display()))
    } else {
        parse_process_yaml(&content).with_context(|| format!("Parsing {}", path.display()))
    }
}
