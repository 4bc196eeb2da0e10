//! Read-only traversal of a frozen module

use crate::module::Module;
use crate::node::{Node, NodeId};
use std::collections::{BTreeMap, BTreeSet};

/// Callbacks for [`walk`]. Returning `false` from `enter` skips the
/// node's children.
pub trait Visitor {
    fn enter(&mut self, _module: &Module, _node: &Node) -> bool {
        true
    }

    fn leave(&mut self, _module: &Module, _node: &Node) {}
}

/// Visits every statement of the module body in source order, depth
/// first, following owned children only.
pub fn walk<V: Visitor>(module: &Module, visitor: &mut V) {
    let mut seen = BTreeSet::new();
    for id in module.body() {
        walk_inner(module, *id, visitor, &mut seen);
    }
}

pub fn walk_from<V: Visitor>(module: &Module, root: NodeId, visitor: &mut V) {
    let mut seen = BTreeSet::new();
    walk_inner(module, root, visitor, &mut seen);
}

fn walk_inner<V: Visitor>(module: &Module, id: NodeId, visitor: &mut V, seen: &mut BTreeSet<NodeId>) {
    // a malformed module may contain ownership cycles
    if !seen.insert(id) {
        return;
    }
    let Some(node) = module.node(id) else {
        return;
    };
    if visitor.enter(module, node) {
        for child in node.kind.children() {
            walk_inner(module, child, visitor, seen);
        }
    }
    visitor.leave(module, node);
}

/// Structural parent of every owned node.
#[derive(Debug, Default)]
pub struct ParentMap {
    parents: BTreeMap<NodeId, NodeId>,
    conflicts: Vec<(NodeId, NodeId, NodeId)>,
}

impl ParentMap {
    pub fn build(module: &Module) -> Self {
        Self::from_nodes(module.nodes())
    }

    pub fn from_nodes<'a>(nodes: impl Iterator<Item = &'a Node>) -> Self {
        let mut map = ParentMap::default();
        for node in nodes {
            for child in node.kind.children() {
                match map.parents.get(&child) {
                    Some(first) if *first != node.id => {
                        map.conflicts.push((child, *first, node.id));
                    }
                    Some(_) => {}
                    None => {
                        map.parents.insert(child, node.id);
                    }
                }
            }
        }
        map
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.parents.get(&id).copied()
    }

    /// Children claimed by more than one owner, as `(child, first, second)`.
    pub fn conflicts(&self) -> &[(NodeId, NodeId, NodeId)] {
        &self.conflicts
    }

    /// Ancestors from the direct parent up to the root. Stops early on a
    /// cycle.
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut chain = Vec::new();
        let mut seen = BTreeSet::from([id]);
        let mut current = id;
        while let Some(parent) = self.parent(current) {
            if !seen.insert(parent) {
                break;
            }
            chain.push(parent);
            current = parent;
        }
        chain
    }

    /// True when following parents from `id` comes back to `id`.
    pub fn in_cycle(&self, id: NodeId) -> bool {
        let mut seen = BTreeSet::new();
        let mut current = id;
        while let Some(parent) = self.parent(current) {
            if parent == id {
                return true;
            }
            if !seen.insert(parent) {
                return false;
            }
            current = parent;
        }
        false
    }

    pub fn is_ancestor_or_self(&self, ancestor: NodeId, id: NodeId) -> bool {
        ancestor == id || self.ancestors(id).contains(&ancestor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{BuildOptions, IrBuilder};
    use crate::node::BinaryOperator;

    struct KindCounter(Vec<&'static str>);

    impl Visitor for KindCounter {
        fn enter(&mut self, _module: &Module, node: &Node) -> bool {
            self.0.push(node.kind_name());
            true
        }
    }

    #[test]
    fn test_walk_visits_in_field_order() {
        let mut b = IrBuilder::new();
        let one = b.numeric_literal(1.0).unwrap();
        let two = b.numeric_literal(2.0).unwrap();
        let sum = b.binary_expression(BinaryOperator::Add, one.id, two.id).unwrap();
        let stmt = b.expression_statement(sum.id).unwrap();
        b.push_statement(stmt);
        let module = b.build(&BuildOptions::default()).unwrap();

        let mut counter = KindCounter(Vec::new());
        walk(&module, &mut counter);
        assert_eq!(
            counter.0,
            ["ExpressionStatement", "BinaryExpression", "NumericLiteral", "NumericLiteral"]
        );

        let parents = ParentMap::build(&module);
        assert_eq!(parents.parent(one.id), Some(sum.id));
        assert_eq!(parents.ancestors(one.id), vec![sum.id, stmt.id]);
        assert!(parents.is_ancestor_or_self(stmt.id, two.id));
        assert!(parents.conflicts().is_empty());
    }
}
