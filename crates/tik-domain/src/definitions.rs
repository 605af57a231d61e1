use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What a category label means for publishing: which extractors produce its
/// elements and which validators guard them, in order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryDefinition {
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default)]
    pub extracts: Vec<String>,
    #[serde(default)]
    pub validations: Vec<String>,
    /// Per-extractor parameter trees handed to adapters at extract time.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub settings: IndexMap<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CategoryDefinitions(IndexMap<String, CategoryDefinition>);

impl CategoryDefinitions {
    #[must_use]
    pub fn new(entries: IndexMap<String, CategoryDefinition>) -> Self {
        Self(entries)
    }

    /// Definitions seeded into a fresh commons folder.
    #[must_use]
    pub fn studio_defaults() -> Self {
        let entry = |kind: &str, extracts: &[&str], validations: &[&str]| CategoryDefinition {
            kind: Some(kind.to_string()),
            extracts: extracts.iter().map(ToString::to_string).collect(),
            validations: validations.iter().map(ToString::to_string).collect(),
            settings: IndexMap::new(),
        };
        let mut map = IndexMap::new();
        map.insert("Model".to_string(), entry("asset", &["source"], &[]));
        map.insert("Rig".to_string(), entry("asset", &["source"], &[]));
        map.insert("LookDev".to_string(), entry("asset", &["source"], &[]));
        map.insert("Layout".to_string(), entry("shot", &["source"], &[]));
        map.insert("Animation".to_string(), entry("shot", &["source"], &[]));
        map.insert("Lighting".to_string(), entry("shot", &["source"], &[]));
        Self(map)
    }

    #[must_use]
    pub fn get(&self, label: &str) -> Option<&CategoryDefinition> {
        self.0.get(label)
    }

    #[must_use]
    pub fn contains(&self, label: &str) -> bool {
        self.0.contains_key(label)
    }

    pub fn insert(&mut self, label: impl Into<String>, definition: CategoryDefinition) {
        self.0.insert(label.into(), definition);
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_the_commons_layout() {
        let defs: CategoryDefinitions = serde_json::from_value(serde_json::json!({
            "Model": {"type": "asset", "extracts": ["source", "alembic"], "validations": ["ngons"]},
            "Lighting": {"extracts": ["source"]}
        }))
        .expect("parse definitions");
        let model = defs.get("Model").expect("model");
        assert_eq!(model.kind.as_deref(), Some("asset"));
        assert_eq!(model.extracts, vec!["source", "alembic"]);
        assert!(defs.get("Lighting").expect("lighting").validations.is_empty());
        assert_eq!(defs.labels().collect::<Vec<_>>(), vec!["Model", "Lighting"]);
    }
}
