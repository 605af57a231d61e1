use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// One numbered snapshot of a work, as stored in the `versions` list of a
/// `.work` record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkVersion {
    pub version_number: u32,
    #[serde(default)]
    pub workstation: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub thumbnail: String,
    #[serde(default)]
    pub previews: IndexMap<String, String>,
    /// Relative to the category folder under the project root.
    pub scene_path: String,
    #[serde(default)]
    pub file_format: String,
    #[serde(default)]
    pub dcc_version: String,
    #[serde(default)]
    pub created_at: String,
}

/// A single artifact produced by an extractor during publishing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishElement {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub suffix: String,
    /// Relative to the project root, posix separators.
    pub path: String,
    #[serde(default)]
    pub sequential: bool,
    #[serde(default)]
    pub bundled: bool,
}

/// Content of the per-work `promoted.json` side-car.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromotedMarker {
    pub publish_id: u32,
    pub name: String,
    pub path: String,
}

/// A soft-deleted file: where it lived and where purgatory put it. Both
/// paths are relative to the project root, posix separators.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgatoryEntry {
    pub original: String,
    pub moved: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn work_versions_tolerate_sparse_records() {
        let version: WorkVersion = serde_json::from_value(serde_json::json!({
            "version_number": 2,
            "scene_path": "test/test_v002.ma"
        }))
        .expect("parse version");
        assert_eq!(version.version_number, 2);
        assert!(version.previews.is_empty());
        assert_eq!(version.dcc_version, "");
    }

    #[test]
    fn elements_use_type_key() {
        let element = PublishElement {
            name: "Source Scene".into(),
            kind: "source".into(),
            suffix: ".ma".into(),
            path: "Assets/superman/Model/publish/test/test_v001.ma".into(),
            sequential: false,
            bundled: false,
        };
        let json = serde_json::to_value(&element).expect("serialize");
        assert_eq!(json["type"], "source");
        assert!(json.get("kind").is_none());
    }
}
