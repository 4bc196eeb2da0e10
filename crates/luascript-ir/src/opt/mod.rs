//! IR optimizer
//!
//! Passes implement [`Transform`] and are run by a [`TransformRegistry`]
//! in ascending priority order, repeatedly, until a round changes nothing
//! or the round limit is hit. Nodes orphaned by a rewrite are pruned and
//! the result is rebuilt with validation, so a pass can never hand a
//! broken module to a backend.

mod const_fold;
mod dce;
mod inline;

pub use const_fold::ConstantFolding;
pub use dce::DeadCodeElimination;
pub use inline::TrivialInlining;

use crate::builder::{BuildOptions, IrBuilder};
use crate::error::BuilderError;
use crate::module::Module;
use crate::node::{NodeId, NodeKind};
use crate::types::TypeDescriptor;
use std::fmt;
use tracing::{debug, trace};

/// Rounds run before giving up on reaching a fixpoint.
pub const DEFAULT_MAX_ROUNDS: usize = 8;

pub trait Transform: Send + Sync {
    fn name(&self) -> &'static str;

    /// Lower runs first.
    fn priority(&self) -> i32;

    /// Rewrites the builder in place; returns whether anything changed.
    fn run(&self, builder: &mut IrBuilder) -> Result<bool, BuilderError>;
}

pub struct TransformRegistry {
    passes: Vec<Box<dyn Transform>>,
    max_rounds: usize,
}

impl Default for TransformRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TransformRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformRegistry")
            .field("passes", &self.names())
            .field("max_rounds", &self.max_rounds)
            .finish()
    }
}

impl TransformRegistry {
    pub fn new() -> Self {
        Self {
            passes: Vec::new(),
            max_rounds: DEFAULT_MAX_ROUNDS,
        }
    }

    /// Inlining, constant folding and dead-code elimination.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register(TrivialInlining);
        registry.register(ConstantFolding);
        registry.register(DeadCodeElimination);
        registry
    }

    pub fn with_max_rounds(mut self, rounds: usize) -> Self {
        self.max_rounds = rounds.max(1);
        self
    }

    /// Adds a pass after every registered pass of equal or lower priority.
    pub fn register<T: Transform + 'static>(&mut self, pass: T) {
        let at = self
            .passes
            .iter()
            .position(|p| p.priority() > pass.priority())
            .unwrap_or(self.passes.len());
        self.passes.insert(at, Box::new(pass));
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    /// Runs the passes on `builder` until nothing changes. Returns the
    /// number of rounds that made a change.
    pub fn run(&self, builder: &mut IrBuilder) -> Result<usize, BuilderError> {
        let mut changed_rounds = 0;
        for round in 0..self.max_rounds {
            let mut changed = false;
            for pass in &self.passes {
                let pass_changed = pass.run(builder)?;
                trace!(pass = pass.name(), round, changed = pass_changed, "ran transform");
                changed |= pass_changed;
            }
            if !changed {
                break;
            }
            changed_rounds += 1;
        }
        Ok(changed_rounds)
    }

    /// Optimizes a copy of `module`.
    pub fn apply(&self, module: &Module) -> Result<Module, BuilderError> {
        let mut builder = IrBuilder::from_module(module);
        let rounds = self.run(&mut builder)?;
        let pruned = builder.prune_unreachable();
        debug!(rounds, pruned, passes = self.passes.len(), "optimized module");
        builder.build(&BuildOptions::default())
    }
}

fn literal_type(kind: &NodeKind) -> Option<TypeDescriptor> {
    match kind {
        NodeKind::NumericLiteral { .. } => Some(TypeDescriptor::number()),
        NodeKind::StringLiteral { .. } => Some(TypeDescriptor::string()),
        NodeKind::BooleanLiteral { .. } => Some(TypeDescriptor::boolean()),
        _ => None,
    }
}

fn is_literal(kind: &NodeKind) -> bool {
    kind.literal_truthiness().is_some()
}

/// Turns node `id` into a copy of `source`'s kind and type. Binding sites
/// are never copied: identifiers would keep pointing at the original.
fn adopt(builder: &mut IrBuilder, id: NodeId, source: NodeId) -> Result<bool, BuilderError> {
    let Some(node) = builder.node(source) else {
        return Ok(false);
    };
    if node.kind.is_binding() {
        return Ok(false);
    }
    let (kind, ty) = (node.kind.clone(), node.ty.clone());
    builder.replace(id, kind)?;
    builder.set_type(id, ty)?;
    Ok(true)
}

/// Rewrites node `id` as the literal `kind`.
fn set_literal(builder: &mut IrBuilder, id: NodeId, kind: NodeKind) -> Result<(), BuilderError> {
    let ty = literal_type(&kind);
    builder.replace(id, kind)?;
    builder.set_type(id, ty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lower::lower;
    use luascript_ast::build::*;
    use luascript_ast::Stmt;

    struct Named(&'static str, i32);

    impl Transform for Named {
        fn name(&self) -> &'static str {
            self.0
        }

        fn priority(&self) -> i32 {
            self.1
        }

        fn run(&self, _builder: &mut IrBuilder) -> Result<bool, BuilderError> {
            Ok(false)
        }
    }

    fn optimized(body: Vec<Stmt>) -> Module {
        let module = lower(&program(body)).expect("lowers");
        TransformRegistry::standard().apply(&module).expect("optimizes")
    }

    fn init_of(module: &Module, name: &str) -> NodeKind {
        let init = module
            .nodes()
            .find_map(|node| match &node.kind {
                NodeKind::VariableDeclarator { name: n, init } if n == name => *init,
                _ => None,
            })
            .expect("declarator with an initializer");
        module.node(init).expect("init exists").kind.clone()
    }

    fn function_body(module: &Module, index: usize) -> Vec<NodeId> {
        let func = module
            .node(module.body()[index])
            .and_then(|n| n.kind.as_function())
            .expect("function");
        match &module.node(func.body).expect("body").kind {
            NodeKind::BlockStatement { body } => body.clone(),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_registry_orders_by_priority_stably() {
        let mut registry = TransformRegistry::new();
        registry.register(Named("late", 30));
        registry.register(Named("early", 10));
        registry.register(Named("middle-a", 20));
        registry.register(Named("middle-b", 20));
        assert_eq!(registry.names(), vec!["early", "middle-a", "middle-b", "late"]);
    }

    #[test]
    fn test_standard_pipeline_order() {
        assert_eq!(
            TransformRegistry::standard().names(),
            vec!["trivial-inlining", "constant-folding", "dead-code-elimination"]
        );
    }

    #[test]
    fn test_folds_arithmetic() {
        let module = optimized(vec![let_("x", bin("+", num(1.0), bin("*", num(2.0), num(3.0))))]);
        assert_eq!(init_of(&module, "x"), NodeKind::NumericLiteral { value: 7.0 });
    }

    #[test]
    fn test_keeps_non_finite_results() {
        let module = optimized(vec![let_("x", bin("/", num(1.0), num(0.0)))]);
        assert_eq!(init_of(&module, "x").name(), "BinaryExpression");
    }

    #[test]
    fn test_folds_string_concatenation() {
        let module = optimized(vec![let_("s", bin("+", str_lit("a"), str_lit("b")))]);
        assert_eq!(init_of(&module, "s"), NodeKind::StringLiteral { value: "ab".into() });
    }

    #[test]
    fn test_inlines_constant_function() {
        let module = optimized(vec![
            func("answer", vec![], vec![ret(Some(num(42.0)))]),
            let_("x", bin("+", call(ident("answer"), vec![]), num(1.0))),
        ]);
        assert_eq!(init_of(&module, "x"), NodeKind::NumericLiteral { value: 43.0 });
        // the declaration itself stays
        assert_eq!(module.body().len(), 2);
    }

    #[test]
    fn test_inlines_identity_function() {
        let module = optimized(vec![
            func("id", vec![pid("v")], vec![ret(Some(ident("v")))]),
            let_("x", call(ident("id"), vec![num(5.0)])),
        ]);
        assert_eq!(init_of(&module, "x"), NodeKind::NumericLiteral { value: 5.0 });
    }

    #[test]
    fn test_removes_code_after_return() {
        let module = optimized(vec![func(
            "f",
            vec![],
            vec![
                ret(Some(num(1.0))),
                expr_stmt(call(ident("never"), vec![])),
                func("hoisted", vec![], vec![]),
            ],
        )]);
        let body = function_body(&module, 0);
        assert_eq!(body.len(), 2);
        assert_eq!(module.node(body[1]).map(|n| n.kind.name()), Some("FunctionDeclaration"));
    }

    #[test]
    fn test_folds_literal_if() {
        let module = optimized(vec![
            if_(bool_lit(false), vec![expr_stmt(call(ident("a"), vec![]))], None),
            if_(
                num(1.0),
                vec![expr_stmt(call(ident("b"), vec![]))],
                Some(vec![expr_stmt(call(ident("c"), vec![]))]),
            ),
        ]);
        let kinds: Vec<_> = module
            .body()
            .iter()
            .map(|id| module.node(*id).map(|n| n.kind.name()))
            .collect();
        assert_eq!(kinds, vec![Some("EmptyStatement"), Some("BlockStatement")]);
        assert!(!module.nodes().any(|n| matches!(&n.kind, NodeKind::Identifier { name, .. } if name == "c")));
    }

    #[test]
    fn test_optimized_module_is_valid_and_stable() {
        let source = vec![
            func("k", vec![], vec![ret(Some(num(2.0)))]),
            let_("y", logical("&&", bool_lit(true), call(ident("k"), vec![]))),
            while_(bool_lit(false), vec![expr_stmt(call(ident("spin"), vec![]))]),
        ];
        let once = optimized(source.clone());
        let twice = TransformRegistry::standard().apply(&once).expect("optimizes");
        assert_eq!(once.to_json().expect("json"), twice.to_json().expect("json"));
        assert!(crate::validate::validate(&once).ok);
    }
}
