//! Case records on disk.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde_json::Value;

use crate::core::types::CaseContext;

/// Load one case from a JSON file holding a single object.
pub fn load_case(path: &Path) -> Result<CaseContext> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let value: Value =
        serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    case_from_value(value).with_context(|| format!("load case {}", path.display()))
}

/// Load a dataset: a JSON array of case objects.
pub fn load_cases(path: &Path) -> Result<Vec<CaseContext>> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let value: Value =
        serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    let Value::Array(items) = value else {
        bail!("{} must contain a JSON array of cases", path.display());
    };
    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| case_from_value(item).with_context(|| format!("case #{index}")))
        .collect()
}

fn case_from_value(value: Value) -> Result<CaseContext> {
    if !value.is_object() {
        bail!("case must be a JSON object");
    }
    // Numeric ids are common in datasets; keep them as text.
    let value = match value {
        Value::Object(mut map) => {
            if let Some(Value::Number(id)) = map.get("id") {
                let id = id.to_string();
                map.insert("id".to_string(), Value::String(id));
            }
            Value::Object(map)
        }
        other => other,
    };
    serde_json::from_value(value).context("bind case record")
}
