//! IR Builder - the only writer of IR state
//!
//! Ids come from a counter seeded per builder, so building the same program
//! twice yields identical modules. Every reference is checked when a node is
//! created: the target must already exist (or be reserved) and be of the
//! category the field demands.

use crate::cfg;
use crate::error::BuilderError;
use crate::module::{Module, ModuleMetadata, SCHEMA_VERSION};
use crate::node::*;
use crate::types::TypeDescriptor;
use crate::validate;
use luascript_error::Span;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Handle returned by the builder; carries only the id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeRef {
    pub id: NodeId,
}

impl From<NodeRef> for NodeId {
    fn from(node: NodeRef) -> Self {
        node.id
    }
}

/// Envelope data for a new node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeMeta {
    pub span: Option<Span>,
    pub ty: Option<TypeDescriptor>,
    pub synthetic: bool,
}

impl NodeMeta {
    pub fn at(span: Option<Span>) -> Self {
        Self {
            span,
            ..Self::default()
        }
    }

    pub fn synthetic(span: Option<Span>) -> Self {
        Self {
            span,
            ty: None,
            synthetic: true,
        }
    }

    pub fn typed(mut self, ty: Option<TypeDescriptor>) -> Self {
        self.ty = ty;
        self
    }
}

#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Run the validator and fail with `BuilderError::Validation` on errors
    pub validate: bool,
    /// Derive per-function control-flow graphs into the metadata
    pub derive_cfg: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            validate: true,
            derive_cfg: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IrBuilder {
    nodes: BTreeMap<NodeId, Node>,
    reserved: BTreeSet<NodeId>,
    next_id: u32,
    body: Vec<NodeId>,
    metadata: ModuleMetadata,
}

impl Default for IrBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl IrBuilder {
    pub fn new() -> Self {
        Self::with_seed(1)
    }

    /// Builder whose first id is `seed`.
    pub fn with_seed(seed: u32) -> Self {
        Self {
            nodes: BTreeMap::new(),
            reserved: BTreeSet::new(),
            next_id: seed,
            body: Vec::new(),
            metadata: ModuleMetadata::default(),
        }
    }

    /// Reopens a finished module so transforms can rewrite it.
    pub fn from_module(module: &Module) -> Self {
        let next_id = module
            .nodes
            .keys()
            .next_back()
            .map(|id| id.0.saturating_add(1))
            .unwrap_or(1);
        Self {
            nodes: module.nodes.clone(),
            reserved: BTreeSet::new(),
            next_id,
            body: module.body.clone(),
            metadata: ModuleMetadata {
                cfg: BTreeMap::new(),
                ..module.metadata.clone()
            },
        }
    }

    fn next(&mut self) -> Result<NodeId, BuilderError> {
        let id = NodeId(self.next_id);
        self.next_id = self.next_id.checked_add(1).ok_or(BuilderError::IdsExhausted)?;
        Ok(id)
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn kind(&self, id: NodeId) -> Option<&NodeKind> {
        self.nodes.get(&id).map(|n| &n.kind)
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn check(&self, id: NodeId, kind: &NodeKind) -> Result<(), BuilderError> {
        check_scalars(kind)?;
        for reference in kind.references() {
            if reference.target == id {
                return Err(BuilderError::InvalidNode {
                    kind: kind.name(),
                    message: format!("`{}` refers to the node itself", reference.field),
                });
            }
            match self.nodes.get(&reference.target) {
                Some(target) => {
                    if !reference.category.admits(&target.kind) {
                        return Err(BuilderError::ShapeMismatch {
                            kind: kind.name(),
                            field: reference.field,
                            expected: reference.category,
                            found: target.kind.name(),
                            target: reference.target,
                        });
                    }
                }
                None if self.reserved.contains(&reference.target) => {}
                None => {
                    return Err(BuilderError::DanglingReference {
                        kind: kind.name(),
                        field: reference.field,
                        missing: reference.target,
                    });
                }
            }
        }
        Ok(())
    }

    pub fn create_node(&mut self, kind: NodeKind) -> Result<NodeRef, BuilderError> {
        self.create_node_with(kind, NodeMeta::default())
    }

    pub fn create_node_with(&mut self, kind: NodeKind, meta: NodeMeta) -> Result<NodeRef, BuilderError> {
        let id = NodeId(self.next_id);
        self.check(id, &kind)?;
        let id = self.next()?;
        self.insert(id, kind, meta);
        Ok(NodeRef { id })
    }

    fn insert(&mut self, id: NodeId, kind: NodeKind, meta: NodeMeta) {
        self.nodes.insert(
            id,
            Node {
                id,
                kind,
                span: meta.span,
                ty: meta.ty,
                synthetic: meta.synthetic,
            },
        );
    }

    /// Allocates an id to be filled later (hoisted or forward-referenced
    /// declarations).
    pub fn reserve(&mut self) -> Result<NodeId, BuilderError> {
        let id = self.next()?;
        self.reserved.insert(id);
        Ok(id)
    }

    pub fn is_reserved(&self, id: NodeId) -> bool {
        self.reserved.contains(&id)
    }

    pub fn fill(&mut self, id: NodeId, kind: NodeKind) -> Result<NodeRef, BuilderError> {
        self.fill_with(id, kind, NodeMeta::default())
    }

    pub fn fill_with(&mut self, id: NodeId, kind: NodeKind, meta: NodeMeta) -> Result<NodeRef, BuilderError> {
        if !self.reserved.contains(&id) {
            return Err(if self.nodes.contains_key(&id) {
                BuilderError::AlreadyDefined(id)
            } else {
                BuilderError::UnknownNode(id)
            });
        }
        self.check(id, &kind)?;
        self.reserved.remove(&id);
        self.insert(id, kind, meta);
        Ok(NodeRef { id })
    }

    /// Swaps the kind of an existing node, keeping its envelope.
    pub fn replace(&mut self, id: NodeId, kind: NodeKind) -> Result<(), BuilderError> {
        self.check(id, &kind)?;
        let node = self.nodes.get_mut(&id).ok_or(BuilderError::UnknownNode(id))?;
        node.kind = kind;
        Ok(())
    }

    pub fn set_type(&mut self, id: NodeId, ty: Option<TypeDescriptor>) -> Result<(), BuilderError> {
        let node = self.nodes.get_mut(&id).ok_or(BuilderError::UnknownNode(id))?;
        node.ty = ty;
        Ok(())
    }

    pub fn push_statement(&mut self, stmt: impl Into<NodeId>) {
        self.body.push(stmt.into());
    }

    pub fn set_body(&mut self, body: Vec<NodeId>) {
        self.body = body;
    }

    pub fn body(&self) -> &[NodeId] {
        &self.body
    }

    pub fn set_source(&mut self, source: impl Into<String>) {
        self.metadata.source = Some(source.into());
    }

    pub fn add_directive(&mut self, directive: impl Into<String>) {
        self.metadata.directives.push(directive.into());
    }

    /// Removes nodes no longer reachable from the body. Returns how many
    /// were dropped.
    pub fn prune_unreachable(&mut self) -> usize {
        let mut live = BTreeSet::new();
        let mut stack: Vec<NodeId> = self.body.clone();
        stack.extend(self.reserved.iter().copied());
        while let Some(id) = stack.pop() {
            if !live.insert(id) {
                continue;
            }
            if let Some(node) = self.nodes.get(&id) {
                stack.extend(node.kind.references().into_iter().map(|r| r.target));
            }
        }
        let before = self.nodes.len();
        self.nodes.retain(|id, _| live.contains(id));
        before - self.nodes.len()
    }

    /// Freezes the node table into a [`Module`].
    pub fn build(self, options: &BuildOptions) -> Result<Module, BuilderError> {
        if let Some(id) = self.reserved.iter().next() {
            return Err(BuilderError::Unfilled(*id));
        }
        for (i, id) in self.body.iter().enumerate() {
            let node = self.nodes.get(id).ok_or_else(|| BuilderError::DanglingReference {
                kind: "Module",
                field: format!("body[{i}]"),
                missing: *id,
            })?;
            if !node.kind.is_statement() {
                return Err(BuilderError::ShapeMismatch {
                    kind: "Module",
                    field: format!("body[{i}]"),
                    expected: Category::Statement,
                    found: node.kind.name(),
                    target: *id,
                });
            }
        }

        let mut metadata = self.metadata;
        metadata.cfg = if options.derive_cfg {
            cfg::derive_all(&self.nodes)
        } else {
            BTreeMap::new()
        };

        let module = Module {
            schema_version: SCHEMA_VERSION.to_string(),
            nodes: self.nodes,
            body: self.body,
            metadata,
        };
        debug!(
            nodes = module.len(),
            statements = module.body.len(),
            functions = module.metadata.cfg.len(),
            "built IR module"
        );

        if options.validate {
            let report = validate::validate(&module);
            if !report.ok {
                return Err(BuilderError::Validation(report.errors));
            }
        }
        Ok(module)
    }

    // ------------------------------------------------------------------
    // Convenience constructors
    // ------------------------------------------------------------------

    pub fn numeric_literal(&mut self, value: f64) -> Result<NodeRef, BuilderError> {
        self.create_node_with(
            NodeKind::NumericLiteral { value },
            NodeMeta::default().typed(Some(TypeDescriptor::number())),
        )
    }

    pub fn string_literal(&mut self, value: &str) -> Result<NodeRef, BuilderError> {
        self.create_node_with(
            NodeKind::StringLiteral {
                value: value.to_string(),
            },
            NodeMeta::default().typed(Some(TypeDescriptor::string())),
        )
    }

    pub fn boolean_literal(&mut self, value: bool) -> Result<NodeRef, BuilderError> {
        self.create_node_with(
            NodeKind::BooleanLiteral { value },
            NodeMeta::default().typed(Some(TypeDescriptor::boolean())),
        )
    }

    pub fn null_literal(&mut self) -> Result<NodeRef, BuilderError> {
        self.create_node(NodeKind::NullLiteral)
    }

    pub fn undefined_literal(&mut self) -> Result<NodeRef, BuilderError> {
        self.create_node(NodeKind::UndefinedLiteral)
    }

    pub fn identifier(&mut self, name: &str, binding: Option<NodeId>) -> Result<NodeRef, BuilderError> {
        self.create_node(NodeKind::Identifier {
            name: name.to_string(),
            binding,
        })
    }

    pub fn parameter(&mut self, name: &str) -> Result<NodeRef, BuilderError> {
        self.create_node(NodeKind::Parameter {
            name: name.to_string(),
        })
    }

    pub fn binary_expression(
        &mut self,
        operator: BinaryOperator,
        left: NodeId,
        right: NodeId,
    ) -> Result<NodeRef, BuilderError> {
        self.create_node(NodeKind::BinaryExpression {
            operator,
            left,
            right,
        })
    }

    pub fn logical_expression(
        &mut self,
        operator: LogicalOperator,
        left: NodeId,
        right: NodeId,
    ) -> Result<NodeRef, BuilderError> {
        self.create_node(NodeKind::LogicalExpression {
            operator,
            left,
            right,
        })
    }

    pub fn unary_expression(&mut self, operator: UnaryOperator, argument: NodeId) -> Result<NodeRef, BuilderError> {
        self.create_node(NodeKind::UnaryExpression { operator, argument })
    }

    pub fn assignment_expression(
        &mut self,
        operator: AssignmentOperator,
        target: NodeId,
        value: NodeId,
    ) -> Result<NodeRef, BuilderError> {
        self.create_node(NodeKind::AssignmentExpression {
            operator,
            target,
            value,
        })
    }

    pub fn call_expression(&mut self, callee: NodeId, arguments: Vec<ListItem>) -> Result<NodeRef, BuilderError> {
        let has_spread = arguments.iter().any(|a| a.spread);
        self.create_node(NodeKind::CallExpression {
            callee,
            arguments,
            has_spread,
        })
    }

    pub fn member_expression(&mut self, object: NodeId, property: NodeId, computed: bool) -> Result<NodeRef, BuilderError> {
        self.create_node(NodeKind::MemberExpression {
            object,
            property,
            computed,
        })
    }

    pub fn array_expression(&mut self, elements: Vec<ListItem>) -> Result<NodeRef, BuilderError> {
        let has_spread = elements.iter().any(|e| e.spread);
        self.create_node(NodeKind::ArrayExpression {
            elements,
            has_spread,
        })
    }

    pub fn expression_statement(&mut self, expression: NodeId) -> Result<NodeRef, BuilderError> {
        self.create_node(NodeKind::ExpressionStatement { expression })
    }

    pub fn return_statement(&mut self, argument: Option<NodeId>) -> Result<NodeRef, BuilderError> {
        self.create_node(NodeKind::ReturnStatement { argument })
    }

    pub fn block_statement(&mut self, body: Vec<NodeId>) -> Result<NodeRef, BuilderError> {
        self.create_node(NodeKind::BlockStatement { body })
    }

    pub fn if_statement(
        &mut self,
        test: NodeId,
        consequent: NodeId,
        alternate: Option<NodeId>,
    ) -> Result<NodeRef, BuilderError> {
        self.create_node(NodeKind::IfStatement {
            test,
            consequent,
            alternate,
        })
    }

    pub fn variable_declarator(&mut self, name: &str, init: Option<NodeId>) -> Result<NodeRef, BuilderError> {
        self.create_node(NodeKind::VariableDeclarator {
            name: name.to_string(),
            init,
        })
    }

    pub fn variable_declaration(
        &mut self,
        declaration_kind: DeclarationKind,
        declarations: Vec<NodeId>,
    ) -> Result<NodeRef, BuilderError> {
        if declarations.is_empty() {
            return Err(BuilderError::InvalidNode {
                kind: "VariableDeclaration",
                message: "at least one declarator is required".into(),
            });
        }
        self.create_node(NodeKind::VariableDeclaration {
            declaration_kind,
            declarations,
        })
    }

    pub fn function_declaration(
        &mut self,
        name: &str,
        params: Vec<NodeId>,
        rest: Option<NodeId>,
        body: NodeId,
        is_async: bool,
    ) -> Result<NodeRef, BuilderError> {
        self.create_node(NodeKind::FunctionDeclaration(FunctionNode {
            name: Some(name.to_string()),
            params,
            rest,
            body,
            is_async,
        }))
    }

    pub fn template_literal(&mut self, parts: Vec<NodeId>) -> Result<NodeRef, BuilderError> {
        self.create_node_with(
            NodeKind::TemplateLiteral { parts },
            NodeMeta::default().typed(Some(TypeDescriptor::string())),
        )
    }
}

fn check_scalars(kind: &NodeKind) -> Result<(), BuilderError> {
    let invalid = |message: &str| {
        Err(BuilderError::InvalidNode {
            kind: kind.name(),
            message: message.to_string(),
        })
    };
    match kind {
        NodeKind::NumericLiteral { value } if !value.is_finite() => {
            invalid("numeric literals must be finite")
        }
        NodeKind::Identifier { name, .. }
        | NodeKind::Parameter { name }
        | NodeKind::VariableDeclarator { name, .. }
            if name.is_empty() =>
        {
            invalid("name must not be empty")
        }
        NodeKind::ClassDeclaration(class) | NodeKind::ClassExpression(class) if class.name.is_empty() => {
            invalid("class name must not be empty")
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_sequential_from_seed() {
        let mut b = IrBuilder::with_seed(10);
        let a = b.numeric_literal(1.0).unwrap();
        let r = b.reserve().unwrap();
        let c = b.string_literal("x").unwrap();
        assert_eq!((a.id, r, c.id), (NodeId(10), NodeId(11), NodeId(12)));
    }

    #[test]
    fn test_dangling_reference_fails_fast() {
        let mut b = IrBuilder::new();
        let one = b.numeric_literal(1.0).unwrap();
        let err = b
            .binary_expression(BinaryOperator::Add, one.id, NodeId(99))
            .unwrap_err();
        assert_eq!(
            err,
            BuilderError::DanglingReference {
                kind: "BinaryExpression",
                field: "right".into(),
                missing: NodeId(99),
            }
        );
        // the failed request consumed no id
        assert_eq!(b.numeric_literal(2.0).unwrap().id, NodeId(2));
    }

    #[test]
    fn test_shape_mismatch() {
        let mut b = IrBuilder::new();
        let stmt = b.create_node(NodeKind::EmptyStatement).unwrap();
        let one = b.numeric_literal(1.0).unwrap();
        let err = b
            .binary_expression(BinaryOperator::Mul, stmt.id, one.id)
            .unwrap_err();
        assert!(matches!(
            err,
            BuilderError::ShapeMismatch { found: "EmptyStatement", expected: Category::Expression, .. }
        ));
    }

    #[test]
    fn test_reserved_ids_accept_forward_references() {
        let mut b = IrBuilder::new();
        let decl = b.reserve().unwrap();
        let use_site = b.identifier("x", Some(decl)).unwrap();
        let stmt = b.expression_statement(use_site.id).unwrap();

        let err = b.clone().build(&BuildOptions::default()).unwrap_err();
        assert_eq!(err, BuilderError::Unfilled(decl));

        b.fill(
            decl,
            NodeKind::VariableDeclarator {
                name: "x".into(),
                init: None,
            },
        )
        .unwrap();
        let declaration = b
            .variable_declaration(DeclarationKind::Let, vec![decl])
            .unwrap();
        b.push_statement(declaration);
        b.push_statement(stmt);
        b.build(&BuildOptions::default()).unwrap();
    }

    #[test]
    fn test_fill_twice_is_rejected() {
        let mut b = IrBuilder::new();
        let id = b.reserve().unwrap();
        b.fill(id, NodeKind::EmptyStatement).unwrap();
        assert_eq!(
            b.fill(id, NodeKind::EmptyStatement).unwrap_err(),
            BuilderError::AlreadyDefined(id)
        );
    }

    #[test]
    fn test_non_finite_literal_rejected() {
        let mut b = IrBuilder::new();
        assert!(matches!(
            b.numeric_literal(f64::NAN),
            Err(BuilderError::InvalidNode { kind: "NumericLiteral", .. })
        ));
    }

    #[test]
    fn test_body_must_hold_statements() {
        let mut b = IrBuilder::new();
        let one = b.numeric_literal(1.0).unwrap();
        b.push_statement(one);
        assert!(matches!(
            b.build(&BuildOptions::default()),
            Err(BuilderError::ShapeMismatch { kind: "Module", .. })
        ));
    }

    #[test]
    fn test_prune_unreachable() {
        let mut b = IrBuilder::new();
        let orphan = b.numeric_literal(1.0).unwrap();
        let kept = b.numeric_literal(2.0).unwrap();
        let stmt = b.expression_statement(kept.id).unwrap();
        b.push_statement(stmt);

        assert_eq!(b.prune_unreachable(), 1);
        assert!(b.node(orphan.id).is_none());
        assert!(b.node(kept.id).is_some());
    }

    #[test]
    fn test_from_module_continues_numbering() {
        let mut b = IrBuilder::new();
        let one = b.numeric_literal(1.0).unwrap();
        let stmt = b.expression_statement(one.id).unwrap();
        b.push_statement(stmt);
        let module = b.build(&BuildOptions::default()).unwrap();

        let mut reopened = IrBuilder::from_module(&module);
        assert_eq!(reopened.numeric_literal(3.0).unwrap().id, NodeId(3));
    }

    #[test]
    fn test_id_space_exhaustion_is_an_error() {
        let mut b = IrBuilder::with_seed(u32::MAX - 1);
        assert_eq!(b.numeric_literal(1.0).unwrap().id, NodeId(u32::MAX - 1));
        assert_eq!(b.numeric_literal(2.0).unwrap_err(), BuilderError::IdsExhausted);
        assert_eq!(b.reserve().unwrap_err(), BuilderError::IdsExhausted);
    }
}
