//! Trivial inlining
//!
//! Replaces calls to two shapes of top-level function with their result:
//! constant functions (`function k() { return 42; }`) and identity
//! functions (`function id(v) { return v; }`). Only literal or identifier
//! arguments are substituted, and a function that is ever assigned to is
//! left alone.

use super::{adopt, is_literal, Transform};
use crate::builder::IrBuilder;
use crate::error::BuilderError;
use crate::node::{NodeId, NodeKind};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy)]
enum Shape {
    /// Returns this literal node
    Constant(NodeId),
    /// Returns its only parameter
    Identity,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TrivialInlining;

impl Transform for TrivialInlining {
    fn name(&self) -> &'static str {
        "trivial-inlining"
    }

    fn priority(&self) -> i32 {
        10
    }

    fn run(&self, builder: &mut IrBuilder) -> Result<bool, BuilderError> {
        let candidates = candidates(builder);
        if candidates.is_empty() {
            return Ok(false);
        }

        let mut changed = false;
        for id in builder.node_ids() {
            let Some(NodeKind::CallExpression {
                callee,
                arguments,
                has_spread: false,
            }) = builder.kind(id)
            else {
                continue;
            };
            let Some(NodeKind::Identifier {
                binding: Some(function),
                ..
            }) = builder.kind(*callee)
            else {
                continue;
            };
            let Some(shape) = candidates.get(function) else {
                continue;
            };
            let source = match *shape {
                Shape::Constant(literal) if arguments.is_empty() => literal,
                Shape::Identity if arguments.len() == 1 => {
                    let argument = arguments[0].value;
                    let simple = builder
                        .kind(argument)
                        .is_some_and(|k| is_literal(k) || matches!(k, NodeKind::Identifier { .. }));
                    if !simple {
                        continue;
                    }
                    argument
                }
                _ => continue,
            };
            changed |= adopt(builder, id, source)?;
        }
        Ok(changed)
    }
}

/// Top-level function declarations with an inlinable body.
fn candidates(builder: &IrBuilder) -> BTreeMap<NodeId, Shape> {
    let written = assigned_bindings(builder);
    let mut found = BTreeMap::new();
    for &id in builder.body() {
        let Some(NodeKind::FunctionDeclaration(func)) = builder.kind(id) else {
            continue;
        };
        if func.is_async || func.rest.is_some() || written.contains(&id) {
            continue;
        }
        let Some(NodeKind::BlockStatement { body }) = builder.kind(func.body) else {
            continue;
        };
        let [only] = body.as_slice() else {
            continue;
        };
        let Some(NodeKind::ReturnStatement { argument: Some(value) }) = builder.kind(*only) else {
            continue;
        };
        match builder.kind(*value) {
            Some(kind) if is_literal(kind) && func.params.is_empty() => {
                found.insert(id, Shape::Constant(*value));
            }
            Some(NodeKind::Identifier {
                binding: Some(binding), ..
            }) if func.params.as_slice() == [*binding] => {
                found.insert(id, Shape::Identity);
            }
            _ => {}
        }
    }
    found
}

/// Bindings that appear as the target of an assignment or update.
fn assigned_bindings(builder: &IrBuilder) -> BTreeSet<NodeId> {
    let mut written = BTreeSet::new();
    for id in builder.node_ids() {
        let target = match builder.kind(id) {
            Some(NodeKind::AssignmentExpression { target, .. }) => *target,
            Some(NodeKind::UpdateExpression { argument, .. }) => *argument,
            _ => continue,
        };
        if let Some(NodeKind::Identifier {
            binding: Some(binding), ..
        }) = builder.kind(target)
        {
            written.insert(*binding);
        }
    }
    written
}
