//! Call trees materialized from the edge multigraph.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{GuardError, Result};
use crate::ir::{Edge, Key};

/// One node of a call tree. Keys may repeat across branches (diamond
/// includes) but never along a single root-to-leaf path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeNode {
    pub key: Key,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TreeNode>,
}

/// Flattened tree: `(parent, child)` pairs in pre-order; the root is the
/// only pair without a parent.
pub type EdgeList = Vec<(Option<Key>, Key)>;

impl TreeNode {
    pub fn leaf(key: Key) -> Self {
        Self {
            key,
            children: Vec::new(),
        }
    }

    /// Number of nodes, root included.
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(TreeNode::node_count).sum::<usize>()
    }

    /// Keys in pre-order.
    pub fn preorder(&self) -> Vec<&Key> {
        let mut out = Vec::with_capacity(self.node_count());
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            out.push(&node.key);
            stack.extend(node.children.iter().rev());
        }
        out
    }

    pub fn to_edge_list(&self) -> EdgeList {
        let mut pairs = vec![(None, self.key.clone())];
        fn visit(node: &TreeNode, pairs: &mut EdgeList) {
            for child in &node.children {
                pairs.push((Some(node.key.clone()), child.key.clone()));
                visit(child, pairs);
            }
        }
        visit(self, &mut pairs);
        pairs
    }

    /// Rebuild a tree from its pre-order edge list.
    pub fn from_edge_list(pairs: &[(Option<Key>, Key)]) -> Result<Self> {
        let roots = pairs.iter().filter(|(parent, _)| parent.is_none()).count();
        if roots != 1 {
            return Err(GuardError::structural(
                "edge list",
                format!("expected exactly one root pair, found {roots}"),
            ));
        }

        let mut arena: Vec<(Key, Vec<usize>)> = Vec::with_capacity(pairs.len());
        let mut path: Vec<usize> = Vec::new();
        for (parent, child) in pairs {
            let Some(parent) = parent else {
                if !arena.is_empty() {
                    return Err(GuardError::structural(
                        child.as_str(),
                        "root pair must come first in the edge list",
                    ));
                }
                arena.push((child.clone(), Vec::new()));
                path.push(0);
                continue;
            };
            if arena.is_empty() {
                return Err(GuardError::structural(
                    child.as_str(),
                    "root pair must come first in the edge list",
                ));
            }
            while path.last().is_some_and(|&top| arena[top].0 != *parent) {
                path.pop();
            }
            let Some(&top) = path.last() else {
                return Err(GuardError::structural(
                    parent.as_str(),
                    "parent is not on the current path of the edge list",
                ));
            };
            let id = arena.len();
            arena.push((child.clone(), Vec::new()));
            arena[top].1.push(id);
            path.push(id);
        }

        fn assemble(arena: &[(Key, Vec<usize>)], id: usize) -> TreeNode {
            let (key, children) = &arena[id];
            TreeNode {
                key: key.clone(),
                children: children.iter().map(|&c| assemble(arena, c)).collect(),
            }
        }
        Ok(assemble(&arena, 0))
    }
}

/// Expands roots over an edge multigraph.
pub struct TreeBuilder<'a> {
    edges: &'a [Edge],
    outgoing: HashMap<&'a Key, Vec<usize>>,
    max_depth: usize,
}

impl<'a> TreeBuilder<'a> {
    pub fn new(edges: &'a [Edge], max_depth: usize) -> Self {
        let mut outgoing: HashMap<&Key, Vec<usize>> = HashMap::new();
        for (i, edge) in edges.iter().enumerate() {
            outgoing.entry(&edge.src).or_default().push(i);
        }
        Self {
            edges,
            outgoing,
            max_depth,
        }
    }

    /// Build the tree rooted at `root`.
    ///
    /// Fails with `DepthExceeded` instead of truncating when a path is
    /// deeper than the configured bound.
    pub fn build(&self, root: &Key) -> Result<TreeNode> {
        let mut visited = HashSet::new();
        let mut path = Vec::new();
        self.expand(root, root, &mut visited, &mut path)
    }

    /// `visited` holds edge indices and `path` the non-root keys of the
    /// current path only; both are restored before the next sibling.
    fn expand(
        &self,
        root: &Key,
        key: &Key,
        visited: &mut HashSet<usize>,
        path: &mut Vec<&'a Key>,
    ) -> Result<TreeNode> {
        if path.len() > self.max_depth {
            return Err(GuardError::DepthExceeded {
                root: root.to_string(),
                depth: self.max_depth,
            });
        }
        let mut node = TreeNode::leaf(key.clone());
        let Some(candidates) = self.outgoing.get(key) else {
            return Ok(node);
        };
        let edges: &'a [Edge] = self.edges;
        for &i in candidates {
            if visited.contains(&i) {
                continue;
            }
            let child = &edges[i].dst;
            if child == root || path.contains(&child) {
                tracing::trace!(root = %root, key = %child, "cycle back to ancestor, not expanding");
                continue;
            }
            visited.insert(i);
            path.push(child);
            let expanded = self.expand(root, child, visited, path);
            path.pop();
            visited.remove(&i);
            node.children.push(expanded?);
        }
        Ok(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn k(i: usize) -> Key {
        Key::parse(&format!("taskfile taskfile:tasks/t{i}.yml")).unwrap()
    }

    fn e(a: usize, b: usize) -> Edge {
        Edge::new(k(a), k(b))
    }

    #[test]
    fn diamond_is_expanded_per_path() {
        let edges = vec![e(0, 1), e(0, 2), e(1, 3), e(2, 3)];
        let tree = TreeBuilder::new(&edges, 10).build(&k(0)).unwrap();
        assert_eq!(tree.node_count(), 5);
        assert_eq!(tree.children[0].children[0].key, k(3));
        assert_eq!(tree.children[1].children[0].key, k(3));
    }

    #[test]
    fn cycles_stop_at_ancestor() {
        let edges = vec![e(0, 1), e(1, 2), e(2, 0), e(2, 1)];
        let tree = TreeBuilder::new(&edges, 10).build(&k(0)).unwrap();
        let keys: Vec<&Key> = tree.preorder();
        assert_eq!(keys, vec![&k(0), &k(1), &k(2)]);
    }

    #[test]
    fn parallel_edges_yield_repeated_children() {
        let edges = vec![e(0, 1), e(0, 1)];
        let tree = TreeBuilder::new(&edges, 10).build(&k(0)).unwrap();
        assert_eq!(tree.children.len(), 2);
    }

    #[test]
    fn depth_bound_is_fatal() {
        let edges: Vec<Edge> = (0..10).map(|i| e(i, i + 1)).collect();
        let err = TreeBuilder::new(&edges, 4).build(&k(0)).unwrap_err();
        assert!(matches!(err, GuardError::DepthExceeded { depth: 4, .. }));
        assert!(TreeBuilder::new(&edges, 10).build(&k(0)).is_ok());
    }

    #[test]
    fn edge_list_needs_exactly_one_root() {
        let pairs = vec![(None, k(0)), (None, k(1))];
        assert!(TreeNode::from_edge_list(&pairs).is_err());
        let pairs = vec![(Some(k(0)), k(1))];
        assert!(TreeNode::from_edge_list(&pairs).is_err());
    }

    #[test]
    fn edge_list_rejects_unknown_parent() {
        let pairs = vec![(None, k(0)), (Some(k(5)), k(1))];
        assert!(TreeNode::from_edge_list(&pairs).is_err());
    }

    #[test]
    fn edge_list_shape() {
        let edges = vec![e(0, 1), e(1, 2), e(0, 3)];
        let tree = TreeBuilder::new(&edges, 10).build(&k(0)).unwrap();
        assert_eq!(
            tree.to_edge_list(),
            vec![
                (None, k(0)),
                (Some(k(0)), k(1)),
                (Some(k(1)), k(2)),
                (Some(k(0)), k(3)),
            ]
        );
    }

    proptest! {
        #[test]
        fn edge_list_round_trip(raw in proptest::collection::vec((0usize..6, 0usize..6), 0..12)) {
            let edges: Vec<Edge> = raw.iter().map(|&(a, b)| e(a, b)).collect();
            let tree = TreeBuilder::new(&edges, 16).build(&k(0)).unwrap();
            let rebuilt = TreeNode::from_edge_list(&tree.to_edge_list()).unwrap();
            prop_assert_eq!(rebuilt, tree);
        }
    }
}
