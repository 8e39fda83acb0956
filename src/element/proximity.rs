//! Label-relative lookup.
//!
//! Settings rows on the editor page look like `<label>原创</label> ...
//! <span>未声明</span>` with no stable id on the value. The page returns a
//! subtree around each label; the walk below finds the value relative to it.

use crate::browser::driver::Rect;
use crate::element::descriptor::is_visible;
use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_SIBLINGS: usize = 5;
pub const DEFAULT_MAX_ANCESTORS: usize = 4;

/// Serialised DOM node as returned by the proximity snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DomNode {
    pub ref_id: u64,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub rect: Rect,
    #[serde(default)]
    pub display: String,
    #[serde(default)]
    pub visibility: String,
    #[serde(default)]
    pub anchor: bool,
    #[serde(default)]
    pub children: Vec<DomNode>,
}

impl DomNode {
    pub fn is_visible(&self) -> bool {
        is_visible(&self.rect, &self.display, &self.visibility)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProximityDirection {
    /// Only siblings after the label.
    FollowingSibling,
    /// Label siblings, then the siblings of its parent.
    Parent,
    /// Climb up to `max_ancestors` levels, checking following siblings at each.
    AncestorSearch,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProximityQuery {
    pub anchor_text: String,
    pub values: Vec<String>,
    pub direction: ProximityDirection,
    pub max_siblings: usize,
    pub max_ancestors: usize,
}

impl ProximityQuery {
    pub fn new(anchor_text: impl Into<String>, values: &[&str]) -> Self {
        Self {
            anchor_text: anchor_text.into(),
            values: values.iter().map(|v| v.to_string()).collect(),
            direction: ProximityDirection::AncestorSearch,
            max_siblings: DEFAULT_MAX_SIBLINGS,
            max_ancestors: DEFAULT_MAX_ANCESTORS,
        }
    }

    pub fn direction(mut self, direction: ProximityDirection) -> Self {
        self.direction = direction;
        self
    }

    pub fn max_siblings(mut self, max_siblings: usize) -> Self {
        self.max_siblings = max_siblings;
        self
    }

    /// How many ancestor levels the walk may climb.
    pub fn climb_limit(&self) -> usize {
        match self.direction {
            ProximityDirection::FollowingSibling => 0,
            ProximityDirection::Parent => 1,
            ProximityDirection::AncestorSearch => self.max_ancestors,
        }
    }

    pub fn describe(&self) -> String {
        format!(
            "near({:?} -> {:?}, {:?}, siblings={})",
            self.anchor_text, self.values, self.direction, self.max_siblings
        )
    }
}

fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn anchor_path(node: &DomNode) -> Option<Vec<usize>> {
    if node.anchor {
        return Some(Vec::new());
    }
    for (idx, child) in node.children.iter().enumerate() {
        if let Some(mut path) = anchor_path(child) {
            path.insert(0, idx);
            return Some(path);
        }
    }
    None
}

fn node_at<'a>(root: &'a DomNode, path: &[usize]) -> Option<&'a DomNode> {
    path.iter()
        .try_fold(root, |node, &idx| node.children.get(idx))
}

/// First visible node in `node`'s subtree whose text equals one of the
/// expected values. Nodes carrying the label text are never returned.
fn find_value<'a>(node: &'a DomNode, query: &ProximityQuery) -> Option<&'a DomNode> {
    let text = normalize(&node.text);
    let anchor = normalize(&query.anchor_text);
    if !anchor.is_empty() && text.contains(&anchor) {
        // The label may share a container with the value; look inside it.
        return node
            .children
            .iter()
            .filter(|child| !child.anchor)
            .find_map(|child| find_value(child, query));
    }
    if node.is_visible() && query.values.iter().any(|v| normalize(v) == text) {
        return Some(node);
    }
    node.children.iter().find_map(|child| find_value(child, query))
}

/// Walk outward from the anchor in `root` and return the value node.
pub fn locate_value<'a>(root: &'a DomNode, query: &ProximityQuery) -> Option<&'a DomNode> {
    let path = anchor_path(root)?;
    let climb = query.climb_limit().min(path.len());
    for up in 0..=climb {
        let current = &path[..path.len() - up];
        let Some((&index, parent_path)) = current.split_last() else {
            break;
        };
        let parent = node_at(root, parent_path)?;
        let hit = parent
            .children
            .iter()
            .skip(index + 1)
            .take(query.max_siblings)
            .find_map(|sibling| find_value(sibling, query));
        if hit.is_some() {
            return hit;
        }
    }
    None
}
