//! Category guidance lookup.
//!
//! The classification step asks for guidance keyed by the previous category
//! and for comparison guidance between the previous category and its
//! alternate. Both lookups are pure and may yield empty text.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

/// Read-only source of guidance text.
pub trait GuidanceSource: Send + Sync {
    /// Guidance for one category key (`primary` or `primary-secondary`).
    fn guidance_for(&self, category: &str) -> String;

    /// Guidance for telling two categories apart. Order-insensitive.
    fn comparison_guidance_for(&self, first: &str, second: &str) -> String;
}

/// Source that never has guidance.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoGuidance;

impl GuidanceSource for NoGuidance {
    fn guidance_for(&self, _category: &str) -> String {
        String::new()
    }

    fn comparison_guidance_for(&self, _first: &str, _second: &str) -> String {
        String::new()
    }
}

/// One comparison entry: text for telling `between[0]` from `between[1]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Comparison {
    pub between: [String; 2],
    pub guidance: String,
}

/// Guidance library loaded from TOML:
///
/// ```toml
/// [categories]
/// "internal medicine-cardiology" = "Ask about exertional chest pain."
///
/// [[comparisons]]
/// between = ["internal medicine-cardiology", "surgery-thoracic"]
/// guidance = "Distinguish cardiac from chest wall pain."
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GuidanceLibrary {
    pub categories: BTreeMap<String, String>,
    pub comparisons: Vec<Comparison>,
}

impl GuidanceLibrary {
    pub fn load(path: &Path) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        let library: GuidanceLibrary =
            toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
        library
            .validate()
            .with_context(|| format!("validate {}", path.display()))?;
        Ok(library)
    }

    pub fn validate(&self) -> Result<()> {
        for key in self.categories.keys() {
            if key.trim().is_empty() {
                bail!("category keys must be non-empty");
            }
        }
        for comparison in &self.comparisons {
            let [first, second] = &comparison.between;
            if first.trim().is_empty() || second.trim().is_empty() {
                bail!("comparison categories must be non-empty");
            }
        }
        Ok(())
    }

    /// Small library written by `interview init`.
    pub fn example() -> Self {
        let mut categories = BTreeMap::new();
        categories.insert(
            "internal medicine-cardiology".to_string(),
            "Ask about chest pain on exertion, palpitations and ankle swelling.".to_string(),
        );
        categories.insert(
            "internal medicine-respiratory".to_string(),
            "Ask about cough, sputum, fever and shortness of breath.".to_string(),
        );
        Self {
            categories,
            comparisons: vec![Comparison {
                between: [
                    "internal medicine-cardiology".to_string(),
                    "internal medicine-respiratory".to_string(),
                ],
                guidance: "Breathlessness on exertion with leg swelling points to the heart; \
                           breathlessness with productive cough points to the lungs."
                    .to_string(),
            }],
        }
    }
}

impl GuidanceSource for GuidanceLibrary {
    fn guidance_for(&self, category: &str) -> String {
        self.categories
            .get(category.trim())
            .cloned()
            .unwrap_or_default()
    }

    fn comparison_guidance_for(&self, first: &str, second: &str) -> String {
        let (first, second) = (first.trim(), second.trim());
        self.comparisons
            .iter()
            .find(|comparison| {
                let [a, b] = &comparison.between;
                (a == first && b == second) || (a == second && b == first)
            })
            .map(|comparison| comparison.guidance.clone())
            .unwrap_or_default()
    }
}

/// Write a guidance library as TOML.
pub fn write_library(path: &Path, library: &GuidanceLibrary) -> Result<()> {
    library.validate()?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let buf = toml::to_string_pretty(library).context("serialize guidance toml")?;
    fs::write(path, buf).with_context(|| format!("write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comparison_lookup_ignores_order() {
        let library = GuidanceLibrary::example();
        let forward = library.comparison_guidance_for(
            "internal medicine-cardiology",
            "internal medicine-respiratory",
        );
        let backward = library.comparison_guidance_for(
            "internal medicine-respiratory",
            "internal medicine-cardiology",
        );
        assert!(!forward.is_empty());
        assert_eq!(forward, backward);
        assert_eq!(library.comparison_guidance_for("a", "b"), "");
    }

    #[test]
    fn unknown_category_yields_empty_text() {
        let library = GuidanceLibrary::example();
        assert_eq!(library.guidance_for("dermatology"), "");
        assert!(
            library
                .guidance_for(" internal medicine-cardiology ")
                .contains("chest pain")
        );
        assert_eq!(NoGuidance.guidance_for("anything"), "");
    }

    #[test]
    fn written_library_loads_back() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("guidance.toml");
        write_library(&path, &GuidanceLibrary::example()).expect("write");
        assert_eq!(
            GuidanceLibrary::load(&path).expect("load"),
            GuidanceLibrary::example()
        );
    }

    #[test]
    fn blank_comparison_category_is_rejected() {
        let library: GuidanceLibrary = toml::from_str(
            r#"
[[comparisons]]
between = ["cardiology", " "]
guidance = "x"
"#,
        )
        .expect("parse");
        assert!(library.validate().is_err());
    }
}
