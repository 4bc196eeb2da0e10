//! Semantic checks on a typed module
//!
//! Reference integrity, the ownership tree, identifier scoping and the
//! consistency of the derived control-flow graphs.

use crate::module::Module;
use crate::node::{DeclarationKind, Node, NodeId, NodeKind};
use crate::visit::{walk, ParentMap, Visitor};
use std::collections::{BTreeMap, BTreeSet};

pub fn check_references(module: &Module, errors: &mut Vec<String>) {
    for node in module.nodes() {
        for reference in node.kind.references() {
            match module.node(reference.target) {
                None => errors.push(format!(
                    "nodes.{}.{}: references missing node {}",
                    node.id, reference.field, reference.target
                )),
                Some(target) if !reference.category.admits(&target.kind) => errors.push(format!(
                    "nodes.{}.{}: expected {}, found {} (node {})",
                    node.id,
                    reference.field,
                    reference.category,
                    target.kind_name(),
                    target.id
                )),
                Some(_) => {}
            }
        }
    }
    for (i, id) in module.body().iter().enumerate() {
        match module.node(*id) {
            None => errors.push(format!("body[{i}]: references missing node {id}")),
            Some(node) if !node.kind.is_statement() => errors.push(format!(
                "body[{i}]: expected a statement, found {}",
                node.kind_name()
            )),
            Some(_) => {}
        }
    }
}

pub fn check_tree(module: &Module, parents: &ParentMap, errors: &mut Vec<String>) {
    for (child, first, second) in parents.conflicts() {
        errors.push(format!("nodes.{child}: owned by both node {first} and node {second}"));
    }
    for node in module.nodes() {
        if parents.in_cycle(node.id) {
            errors.push(format!("nodes.{}: part of an ownership cycle", node.id));
        }
    }
    let mut seen = BTreeSet::new();
    for (i, id) in module.body().iter().enumerate() {
        if let Some(parent) = parents.parent(*id) {
            errors.push(format!("body[{i}]: node {id} is also owned by node {parent}"));
        }
        if !seen.insert(*id) {
            errors.push(format!("body[{i}]: node {id} appears twice"));
        }
    }
}

/// Node whose subtree a binding is visible in; `None` means module scope.
fn scope_owner(module: &Module, parents: &ParentMap, binding: &Node) -> Option<NodeId> {
    match &binding.kind {
        NodeKind::FunctionExpression(_) | NodeKind::ClassExpression(_) => Some(binding.id),
        NodeKind::Parameter { .. } => {
            let parent = parents.parent(binding.id)?;
            match module.node(parent).map(|n| &n.kind) {
                Some(NodeKind::RestElement { .. }) => parents.parent(parent),
                _ => Some(parent),
            }
        }
        NodeKind::VariableDeclarator { .. } => {
            let parent = parents.parent(binding.id)?;
            match module.node(parent).map(|n| &n.kind) {
                Some(NodeKind::VariableDeclaration {
                    declaration_kind: DeclarationKind::Var,
                    ..
                }) => parents
                    .ancestors(parent)
                    .into_iter()
                    .find(|id| module.node(*id).is_some_and(|n| n.kind.as_function().is_some())),
                Some(NodeKind::VariableDeclaration { .. }) => parents.parent(parent),
                _ => Some(parent),
            }
        }
        _ => parents.parent(binding.id),
    }
}

/// True for bindings that are unusable before their declaration runs:
/// `let`/`const` declarators and class declarations.
fn is_block_scoped(module: &Module, parents: &ParentMap, binding: &Node) -> bool {
    match &binding.kind {
        NodeKind::ClassDeclaration(_) => true,
        NodeKind::VariableDeclarator { .. } => !matches!(
            parents.parent(binding.id).and_then(|p| module.node(p)).map(|n| &n.kind),
            Some(NodeKind::VariableDeclaration {
                declaration_kind: DeclarationKind::Var,
                ..
            })
        ),
        _ => false,
    }
}

/// Position of every reachable node in a depth-first walk of the body.
#[derive(Default)]
struct SourceOrder(BTreeMap<NodeId, usize>);

impl Visitor for SourceOrder {
    fn enter(&mut self, _module: &Module, node: &Node) -> bool {
        let next = self.0.len();
        self.0.insert(node.id, next);
        true
    }
}

/// True if a function boundary lies between `id` and its ancestor `owner`
/// (`None` is the module itself).
fn crosses_function(module: &Module, parents: &ParentMap, owner: Option<NodeId>, id: NodeId) -> bool {
    parents
        .ancestors(id)
        .into_iter()
        .take_while(|ancestor| Some(*ancestor) != owner)
        .any(|ancestor| module.node(ancestor).is_some_and(|n| n.kind.as_function().is_some()))
}

pub fn check_scopes(module: &Module, parents: &ParentMap, errors: &mut Vec<String>) {
    let mut order = SourceOrder::default();
    walk(module, &mut order);
    let position = |id: NodeId| order.0.get(&id).copied();

    for node in module.nodes() {
        let NodeKind::Identifier {
            name,
            binding: Some(binding),
        } = &node.kind
        else {
            continue;
        };
        // missing or mistyped targets are reported by the reference check
        let Some(target) = module.node(*binding).filter(|t| t.kind.is_binding()) else {
            continue;
        };
        let owner = scope_owner(module, parents, target);
        if owner.is_some_and(|owner| !parents.is_ancestor_or_self(owner, node.id)) {
            errors.push(format!(
                "nodes.{}.binding: `{name}` resolves to node {binding}, which is not in scope here",
                node.id
            ));
            continue;
        }
        if !is_block_scoped(module, parents, target) || crosses_function(module, parents, owner, node.id) {
            continue;
        }
        if let (Some(used), Some(declared)) = (position(node.id), position(*binding)) {
            if used < declared {
                errors.push(format!(
                    "nodes.{}.binding: `{name}` is used before its declaration (node {binding})",
                    node.id
                ));
            }
        }
    }
}

pub fn check_cfg(module: &Module, errors: &mut Vec<String>) {
    for (function, cfg) in &module.metadata().cfg {
        let path = format!("metadata.cfg.{function}");
        match module.node(*function) {
            Some(node) if node.kind.as_function().is_some() => {}
            Some(node) => errors.push(format!("{path}: node is a {}, not a function", node.kind_name())),
            None => errors.push(format!("{path}: references missing node {function}")),
        }

        let mut ids = BTreeSet::new();
        for (i, block) in cfg.blocks.iter().enumerate() {
            if !ids.insert(block.id) {
                errors.push(format!("{path}.blocks[{i}]: duplicate block id {}", block.id));
            }
        }
        if !ids.contains(&cfg.entry) {
            errors.push(format!("{path}.entry: missing block {}", cfg.entry));
            continue;
        }

        for (i, block) in cfg.blocks.iter().enumerate() {
            for successor in &block.successors {
                if !ids.contains(successor) {
                    errors.push(format!("{path}.blocks[{i}].successors: missing block {successor}"));
                }
            }
            for statement in &block.statements {
                if !module.contains(*statement) {
                    errors.push(format!(
                        "{path}.blocks[{i}].statements: references missing node {statement}"
                    ));
                }
            }
        }

        let reachable = cfg.reachable();
        for (i, block) in cfg.blocks.iter().enumerate() {
            if !reachable.contains(&block.id) {
                errors.push(format!("{path}.blocks[{i}]: block {} is unreachable from entry", block.id));
            }
        }
    }
}
