use std::collections::VecDeque;

use anyhow::{bail, Result};
use indexmap::IndexMap;
use tik_domain::{join_relative, matches_wildcard, validate_name, SubTreeNode};

use crate::entity::generate_id;
use crate::outcome::{Outcome, Refusal, RefusalKind, UsageError};

/// One node of the subproject hierarchy.
#[derive(Clone, Debug, PartialEq)]
pub struct Subproject {
    pub id: u32,
    pub name: String,
    pub path: String,
    pub resolution: [u32; 2],
    pub fps: f64,
    pub mode: Option<String>,
    pub categories: Vec<String>,
    pub parent: Option<u32>,
    children: IndexMap<String, u32>,
}

impl Subproject {
    pub fn child_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.children.values().copied()
    }

    pub fn child_names(&self) -> impl Iterator<Item = &str> {
        self.children.keys().map(String::as_str)
    }

    pub fn child(&self, name: &str) -> Option<u32> {
        self.children.get(name).copied()
    }

    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

/// Optional overrides applied on top of what a new node inherits from its
/// parent.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SubprojectProps {
    pub resolution: Option<[u32; 2]>,
    pub fps: Option<f64>,
    pub mode: Option<String>,
    pub categories: Option<Vec<String>>,
}

/// Id-indexed arena holding the whole hierarchy.
#[derive(Clone, Debug, PartialEq)]
pub struct SubprojectTree {
    root: u32,
    nodes: IndexMap<u32, Subproject>,
}

impl SubprojectTree {
    pub fn new(name: impl Into<String>) -> Self {
        let node = SubTreeNode::root(name);
        let root = generate_id();
        let mut nodes = IndexMap::new();
        nodes.insert(
            root,
            Subproject {
                id: root,
                name: node.name,
                path: String::new(),
                resolution: node.resolution,
                fps: node.fps,
                mode: node.mode,
                categories: node.categories,
                parent: None,
                children: IndexMap::new(),
            },
        );
        Self { root, nodes }
    }

    pub fn root_id(&self) -> u32 {
        self.root
    }

    pub fn root(&self) -> &Subproject {
        &self.nodes[&self.root]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn find_sub_by_id(&self, id: u32) -> Option<&Subproject> {
        self.nodes.get(&id)
    }

    pub fn children(&self, id: u32) -> Vec<&Subproject> {
        self.nodes
            .get(&id)
            .map(|node| {
                node.child_ids()
                    .filter_map(|child| self.nodes.get(&child))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Breadth-first walk starting at `id`, including `id` itself.
    pub fn walk(&self, id: u32) -> Vec<&Subproject> {
        let mut visited = Vec::new();
        let mut queue = VecDeque::from([id]);
        while let Some(current) = queue.pop_front() {
            let Some(node) = self.nodes.get(&current) else {
                continue;
            };
            visited.push(node);
            queue.extend(node.child_ids());
        }
        visited
    }

    pub fn find_sub_by_path(&self, path: &str) -> Option<&Subproject> {
        let wanted = path.trim_matches('/');
        self.walk(self.root)
            .into_iter()
            .find(|node| node.path == wanted)
    }

    pub fn find_subs_by_wildcard(&self, pattern: &str) -> Vec<&Subproject> {
        self.walk(self.root)
            .into_iter()
            .filter(|node| !node.is_root() && matches_wildcard(pattern, &node.path))
            .collect()
    }

    /// Adds a child under `parent`, inheriting its properties.
    ///
    /// Duplicate or malformed names are refused and leave the tree untouched.
    pub fn add_sub_project(
        &mut self,
        parent: u32,
        name: &str,
        props: SubprojectProps,
        uid: Option<u32>,
    ) -> Result<Outcome<u32>> {
        let Some(parent_node) = self.nodes.get(&parent) else {
            return Err(UsageError::InvalidArgument(format!("unknown subproject id {parent}")).into());
        };
        if let Err(err) = validate_name(name) {
            return Ok(Outcome::Refused(Refusal::warning(
                RefusalKind::InvalidName,
                err.to_string(),
            )));
        }
        if parent_node.children.contains_key(name) {
            return Ok(Outcome::Refused(Refusal::warning(
                RefusalKind::Duplicate,
                format!(
                    "{name} already exists in sub-projects of {}",
                    parent_node.name
                ),
            )));
        }
        let id = match uid {
            Some(id) if self.nodes.contains_key(&id) => {
                return Err(
                    UsageError::InvalidArgument(format!("subproject id {id} is taken")).into(),
                )
            }
            Some(id) => id,
            None => loop {
                let id = generate_id();
                if !self.nodes.contains_key(&id) {
                    break id;
                }
            },
        };
        let node = Subproject {
            id,
            name: name.to_string(),
            path: join_relative(&parent_node.path, name),
            resolution: props.resolution.unwrap_or(parent_node.resolution),
            fps: props.fps.unwrap_or(parent_node.fps),
            mode: props.mode.or_else(|| inherited_mode(parent_node)),
            categories: props
                .categories
                .unwrap_or_else(|| parent_node.categories.clone()),
            parent: Some(parent),
            children: IndexMap::new(),
        };
        self.nodes.insert(id, node);
        if let Some(parent_node) = self.nodes.get_mut(&parent) {
            parent_node.children.insert(name.to_string(), id);
        }
        Ok(Outcome::Done(id))
    }

    /// Renames a node and/or overrides its properties. Paths below a renamed
    /// node follow along.
    pub fn edit_sub_project(
        &mut self,
        id: u32,
        new_name: Option<&str>,
        props: SubprojectProps,
    ) -> Result<Outcome<()>> {
        let Some(node) = self.nodes.get(&id) else {
            return Err(UsageError::InvalidArgument(format!("unknown subproject id {id}")).into());
        };
        let old_name = node.name.clone();
        let parent = node.parent;
        if let Some(name) = new_name.filter(|name| *name != old_name) {
            let Some(parent) = parent else {
                return Err(
                    UsageError::InvalidArgument("the root subproject cannot be renamed".into())
                        .into(),
                );
            };
            if let Err(err) = validate_name(name) {
                return Ok(Outcome::Refused(Refusal::warning(
                    RefusalKind::InvalidName,
                    err.to_string(),
                )));
            }
            let siblings = &self.nodes[&parent].children;
            if siblings.contains_key(name) {
                return Ok(Outcome::Refused(Refusal::warning(
                    RefusalKind::Duplicate,
                    format!("{name} already exists next to {old_name}"),
                )));
            }
            if let Some(parent_node) = self.nodes.get_mut(&parent) {
                if let Some(index) = parent_node.children.get_index_of(&old_name) {
                    parent_node.children.insert(name.to_string(), id);
                    let last = parent_node.children.len() - 1;
                    parent_node.children.move_index(last, index);
                    parent_node.children.shift_remove(&old_name);
                }
            }
            if let Some(node) = self.nodes.get_mut(&id) {
                node.name = name.to_string();
            }
            self.refresh_paths(id);
        }
        if let Some(node) = self.nodes.get_mut(&id) {
            if let Some(resolution) = props.resolution {
                node.resolution = resolution;
            }
            if let Some(fps) = props.fps {
                node.fps = fps;
            }
            if let Some(mode) = props.mode {
                node.mode = Some(mode);
            }
            if let Some(categories) = props.categories {
                node.categories = categories;
            }
        }
        Ok(Outcome::Done(()))
    }

    fn refresh_paths(&mut self, id: u32) {
        let parent_path = self
            .nodes
            .get(&id)
            .and_then(|node| node.parent)
            .and_then(|parent| self.nodes.get(&parent))
            .map(|parent| parent.path.clone())
            .unwrap_or_default();
        let mut queue = VecDeque::from([(id, parent_path)]);
        while let Some((current, parent_path)) = queue.pop_front() {
            let Some(node) = self.nodes.get_mut(&current) else {
                continue;
            };
            node.path = join_relative(&parent_path, &node.name);
            let path = node.path.clone();
            queue.extend(node.child_ids().map(|child| (child, path.clone())));
        }
    }

    /// Detaches `id` and its descendants. The root cannot be removed.
    pub fn remove_sub_project(&mut self, id: u32) -> Result<Subproject> {
        if id == self.root {
            bail!(UsageError::InvalidArgument(
                "the root subproject cannot be removed".into()
            ));
        }
        let Some(node) = self.nodes.get(&id) else {
            return Err(UsageError::InvalidArgument(format!("unknown subproject id {id}")).into());
        };
        let name = node.name.clone();
        if let Some(parent) = node.parent.and_then(|parent| self.nodes.get_mut(&parent)) {
            parent.children.shift_remove(&name);
        }
        let doomed: Vec<u32> = self.walk(id).iter().map(|node| node.id).collect();
        let mut removed = None;
        for doomed_id in doomed {
            let node = self.nodes.shift_remove(&doomed_id);
            if doomed_id == id {
                removed = node;
            }
        }
        removed.ok_or_else(|| {
            UsageError::InvalidArgument(format!("unknown subproject id {id}")).into()
        })
    }

    /// Nested form of the subtree rooted at `id`.
    pub fn get_sub_tree(&self, id: u32) -> Option<SubTreeNode> {
        let node = self.nodes.get(&id)?;
        Some(SubTreeNode {
            id: node.id,
            name: node.name.clone(),
            path: node.path.clone(),
            resolution: node.resolution,
            fps: node.fps,
            mode: node.mode.clone(),
            categories: node.categories.clone(),
            subs: node
                .child_ids()
                .filter_map(|child| self.get_sub_tree(child))
                .collect(),
        })
    }

    pub fn to_sub_tree(&self) -> SubTreeNode {
        self.get_sub_tree(self.root)
            .unwrap_or_else(|| SubTreeNode::root(""))
    }

    /// Rebuilds an arena from its nested form. Paths are recomputed from
    /// names so a hand-edited record cannot drift.
    pub fn from_sub_tree(data: &SubTreeNode) -> Result<Self> {
        let mut tree = Self {
            root: data.id,
            nodes: IndexMap::new(),
        };
        let mut queue = VecDeque::from([(data, None::<u32>)]);
        while let Some((node, parent)) = queue.pop_front() {
            if tree.nodes.contains_key(&node.id) {
                bail!("duplicate subproject id {} in structure", node.id);
            }
            let path = match parent {
                Some(parent) => {
                    let parent_node = &tree.nodes[&parent];
                    if parent_node.children.contains_key(&node.name) {
                        bail!(
                            "duplicate subproject name {} under {}",
                            node.name,
                            parent_node.path
                        );
                    }
                    join_relative(&parent_node.path, &node.name)
                }
                None => String::new(),
            };
            tree.nodes.insert(
                node.id,
                Subproject {
                    id: node.id,
                    name: node.name.clone(),
                    path,
                    resolution: node.resolution,
                    fps: node.fps,
                    mode: node.mode.clone(),
                    categories: node.categories.clone(),
                    parent,
                    children: IndexMap::new(),
                },
            );
            if let Some(parent_node) = parent.and_then(|parent| tree.nodes.get_mut(&parent)) {
                parent_node.children.insert(node.name.clone(), node.id);
            }
            queue.extend(node.subs.iter().map(|sub| (sub, Some(node.id))));
        }
        Ok(tree)
    }

    pub fn set_sub_tree(&mut self, data: &SubTreeNode) -> Result<()> {
        *self = Self::from_sub_tree(data)?;
        Ok(())
    }
}

fn inherited_mode(parent: &Subproject) -> Option<String> {
    parent.mode.clone().filter(|mode| mode != "root")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (SubprojectTree, u32, u32) {
        let mut tree = SubprojectTree::new("demo");
        let root = tree.root_id();
        let assets = tree
            .add_sub_project(
                root,
                "Assets",
                SubprojectProps {
                    mode: Some("asset".into()),
                    categories: Some(vec!["Model".into(), "Rig".into()]),
                    ..SubprojectProps::default()
                },
                None,
            )
            .expect("add")
            .done()
            .expect("assets");
        let characters = tree
            .add_sub_project(assets, "Characters", SubprojectProps::default(), None)
            .expect("add")
            .done()
            .expect("characters");
        (tree, assets, characters)
    }

    #[test]
    fn children_inherit_and_paths_compose() {
        let (tree, _, characters) = sample();
        let node = tree.find_sub_by_id(characters).expect("node");
        assert_eq!(node.path, "Assets/Characters");
        assert_eq!(node.mode.as_deref(), Some("asset"));
        assert_eq!(node.categories, vec!["Model", "Rig"]);
        assert_eq!(
            tree.find_sub_by_path("Assets/Characters").map(|n| n.id),
            Some(characters)
        );
        assert!(tree.find_sub_by_path("Assets/Props").is_none());
    }

    #[test]
    fn duplicate_siblings_are_refused_without_side_effects() {
        let (mut tree, assets, _) = sample();
        let before = tree.clone();
        let outcome = tree
            .add_sub_project(assets, "Characters", SubprojectProps::default(), None)
            .expect("add");
        assert_eq!(
            outcome.refusal().map(|r| r.kind),
            Some(RefusalKind::Duplicate)
        );
        assert_eq!(tree, before);
    }

    #[test]
    fn nested_form_round_trips() {
        let (tree, assets, _) = sample();
        let nested = tree.to_sub_tree();
        let rebuilt = SubprojectTree::from_sub_tree(&nested).expect("rebuild");
        assert_eq!(rebuilt, tree);
        assert_eq!(rebuilt.to_sub_tree(), nested);
        assert_eq!(
            tree.get_sub_tree(assets).expect("subtree").node_count(),
            2
        );
    }

    #[test]
    fn wildcard_search_matches_paths() {
        let (mut tree, assets, _) = sample();
        tree.add_sub_project(assets, "Props", SubprojectProps::default(), None)
            .expect("add")
            .done()
            .expect("props");
        let hits: Vec<&str> = tree
            .find_subs_by_wildcard("Assets/*")
            .into_iter()
            .map(|node| node.path.as_str())
            .collect();
        assert_eq!(hits, vec!["Assets/Characters", "Assets/Props"]);
    }

    #[test]
    fn renames_refresh_descendant_paths_and_keep_order() {
        let (mut tree, assets, characters) = sample();
        tree.add_sub_project(assets, "Props", SubprojectProps::default(), None)
            .expect("add")
            .done()
            .expect("props");
        let outcome = tree
            .edit_sub_project(characters, Some("Chars"), SubprojectProps::default())
            .expect("edit");
        assert!(outcome.is_done());
        assert_eq!(
            tree.find_sub_by_id(characters).map(|n| n.path.as_str()),
            Some("Assets/Chars")
        );
        let names: Vec<&str> = tree
            .find_sub_by_id(assets)
            .expect("assets")
            .child_names()
            .collect();
        assert_eq!(names, vec!["Chars", "Props"]);
    }

    #[test]
    fn removal_drops_the_whole_subtree() {
        let (mut tree, assets, characters) = sample();
        let removed = tree.remove_sub_project(assets).expect("remove");
        assert_eq!(removed.path, "Assets");
        assert!(tree.find_sub_by_id(characters).is_none());
        assert_eq!(tree.len(), 1);
        assert!(tree.remove_sub_project(tree.root_id()).is_err());
    }
}
