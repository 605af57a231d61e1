use serde::{Deserialize, Serialize};

pub const DEFAULT_RESOLUTION: [u32; 2] = [1920, 1080];
pub const DEFAULT_FPS: f64 = 25.0;

/// Nested, serializable form of the subproject hierarchy as stored in
/// `project_structure.json`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubTreeNode {
    #[serde(default)]
    pub id: u32,
    pub name: String,
    #[serde(default)]
    pub path: String,
    #[serde(default = "default_resolution")]
    pub resolution: [u32; 2],
    #[serde(default = "default_fps")]
    pub fps: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub subs: Vec<SubTreeNode>,
}

impl SubTreeNode {
    #[must_use]
    pub fn root(name: impl Into<String>) -> Self {
        Self {
            id: 0,
            name: name.into(),
            path: String::new(),
            resolution: DEFAULT_RESOLUTION,
            fps: DEFAULT_FPS,
            mode: Some("root".to_string()),
            categories: Vec::new(),
            subs: Vec::new(),
        }
    }

    /// Number of nodes in this subtree, including `self`.
    #[must_use]
    pub fn node_count(&self) -> usize {
        1 + self.subs.iter().map(SubTreeNode::node_count).sum::<usize>()
    }
}

fn default_resolution() -> [u32; 2] {
    DEFAULT_RESOLUTION
}

fn default_fps() -> f64 {
    DEFAULT_FPS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let node: SubTreeNode = serde_json::from_value(serde_json::json!({
            "name": "demo",
            "subs": [{"id": 7, "name": "Assets", "path": "Assets"}]
        }))
        .expect("parse tree");
        assert_eq!(node.resolution, DEFAULT_RESOLUTION);
        assert_eq!(node.subs[0].id, 7);
        assert!(node.subs[0].categories.is_empty());
        assert_eq!(node.node_count(), 2);
    }
}
