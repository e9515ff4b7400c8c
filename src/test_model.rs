//! Test model definitions
//!
//! Core data structures for the discovered test tree: nodes, their
//! metadata records, and the published tree snapshot. A tree is rebuilt
//! wholesale on every discovery cycle; no node identity survives a
//! rebuild, so consumers that care about identity match on the id string.

use serde::Serialize;
use std::path::PathBuf;

use crate::test_id::TestId;

/// Location of a bench test-case declaration in its source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceLocation {
    pub file: PathBuf,
    /// Byte offset of the start of the `TEST_CASE` marker.
    pub start: usize,
    /// Byte offset just past the end of the marker.
    pub end: usize,
}

/// Metadata captured alongside a node at discovery time, so run arguments
/// can be reconstructed without re-parsing the id string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TestInfo {
    pub name: String,
    pub filename: String,
    pub target: String,
    pub params: String,
    pub gen_testcases: String,
    pub tb_testcases: String,
}

/// A node in the discovery tree.
///
/// A node is a leaf iff it has no children; leaves are the unit launched
/// as a simulator process. Non-leaf nodes exist purely to group.
#[derive(Debug, Clone, Serialize)]
pub struct TestNode {
    pub id: TestId,
    pub label: String,
    pub source_location: Option<SourceLocation>,
    pub children: Vec<TestNode>,
    pub info: TestInfo,
}

impl TestNode {
    pub fn new(id: TestId, label: impl Into<String>) -> Self {
        Self {
            id,
            label: label.into(),
            source_location: None,
            children: Vec::new(),
            info: TestInfo::default(),
        }
    }

    pub fn with_info(mut self, info: TestInfo) -> Self {
        self.info = info;
        self
    }

    pub fn with_source_location(mut self, loc: Option<SourceLocation>) -> Self {
        self.source_location = loc;
        self
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Find a node anywhere in this subtree by its id string.
    pub fn find(&self, id: &str) -> Option<&TestNode> {
        if self.id.to_string() == id {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(id))
    }

    /// All leaf nodes of this subtree, in pre-order.
    pub fn leaves(&self) -> Vec<&TestNode> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a TestNode>) {
        if self.is_leaf() {
            out.push(self);
        }
        for child in &self.children {
            child.collect_leaves(out);
        }
    }
}

/// One published discovery result. Replaced wholesale on every cycle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TestTree {
    pub roots: Vec<TestNode>,
}

impl TestTree {
    pub fn find(&self, id: &str) -> Option<&TestNode> {
        self.roots.iter().find_map(|r| r.find(id))
    }

    pub fn leaves(&self) -> Vec<&TestNode> {
        self.roots.iter().flat_map(|r| r.leaves()).collect()
    }

    pub fn leaf_count(&self) -> usize {
        self.leaves().len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}
