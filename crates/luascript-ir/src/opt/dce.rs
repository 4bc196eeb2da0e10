//! Dead-code elimination
//!
//! Drops statements that follow a `return`, `throw`, `break` or
//! `continue` in the same statement list (declarations are kept, since
//! they are hoisted or may still be referenced), and resolves branches
//! whose test is a literal.

use super::{adopt, Transform};
use crate::builder::IrBuilder;
use crate::error::BuilderError;
use crate::node::{LogicalOperator, NodeId, NodeKind};

#[derive(Debug, Default, Clone, Copy)]
pub struct DeadCodeElimination;

impl Transform for DeadCodeElimination {
    fn name(&self) -> &'static str {
        "dead-code-elimination"
    }

    fn priority(&self) -> i32 {
        30
    }

    fn run(&self, builder: &mut IrBuilder) -> Result<bool, BuilderError> {
        let mut changed = false;

        if let Some(body) = live_statements(builder, builder.body()) {
            builder.set_body(body);
            changed = true;
        }

        for id in builder.node_ids() {
            let Some(kind) = builder.kind(id).cloned() else {
                continue;
            };
            changed |= match kind {
                NodeKind::BlockStatement { body } => match live_statements(builder, &body) {
                    Some(body) => {
                        builder.replace(id, NodeKind::BlockStatement { body })?;
                        true
                    }
                    None => false,
                },
                NodeKind::SwitchCase { test, consequent } => match live_statements(builder, &consequent) {
                    Some(consequent) => {
                        builder.replace(id, NodeKind::SwitchCase { test, consequent })?;
                        true
                    }
                    None => false,
                },
                NodeKind::IfStatement {
                    test,
                    consequent,
                    alternate,
                } => match truthiness(builder, test) {
                    Some(true) => adopt(builder, id, consequent)?,
                    Some(false) => match alternate {
                        Some(alternate) => adopt(builder, id, alternate)?,
                        None => {
                            builder.replace(id, NodeKind::EmptyStatement)?;
                            true
                        }
                    },
                    None => false,
                },
                NodeKind::WhileStatement { test, .. } if truthiness(builder, test) == Some(false) => {
                    builder.replace(id, NodeKind::EmptyStatement)?;
                    true
                }
                NodeKind::ConditionalExpression {
                    test,
                    consequent,
                    alternate,
                } => match truthiness(builder, test) {
                    Some(true) => adopt(builder, id, consequent)?,
                    Some(false) => adopt(builder, id, alternate)?,
                    None => false,
                },
                NodeKind::LogicalExpression { operator, left, right } => match short_circuit(builder, operator, left) {
                    Some(true) => adopt(builder, id, left)?,
                    Some(false) => adopt(builder, id, right)?,
                    None => false,
                },
                _ => false,
            };
        }
        Ok(changed)
    }
}

fn truthiness(builder: &IrBuilder, id: NodeId) -> Option<bool> {
    builder.kind(id).and_then(NodeKind::literal_truthiness)
}

/// Whether a logical expression with a literal left side evaluates to its
/// left operand (`Some(true)`) or its right one (`Some(false)`).
fn short_circuit(builder: &IrBuilder, operator: LogicalOperator, left: NodeId) -> Option<bool> {
    let kind = builder.kind(left)?;
    let truthy = kind.literal_truthiness()?;
    Some(match operator {
        LogicalOperator::And => !truthy,
        LogicalOperator::Or => truthy,
        LogicalOperator::Nullish => !matches!(kind, NodeKind::NullLiteral | NodeKind::UndefinedLiteral),
    })
}

fn is_terminator(kind: &NodeKind) -> bool {
    matches!(
        kind,
        NodeKind::ReturnStatement { .. }
            | NodeKind::ThrowStatement { .. }
            | NodeKind::BreakStatement
            | NodeKind::ContinueStatement
    )
}

fn is_declaration(kind: &NodeKind) -> bool {
    matches!(
        kind,
        NodeKind::FunctionDeclaration(_) | NodeKind::ClassDeclaration(_) | NodeKind::VariableDeclaration { .. }
    )
}

/// `stmts` without the unreachable tail, or `None` when nothing is dropped.
fn live_statements(builder: &IrBuilder, stmts: &[NodeId]) -> Option<Vec<NodeId>> {
    let end = stmts
        .iter()
        .position(|id| builder.kind(*id).is_some_and(is_terminator))?;
    let (live, tail) = stmts.split_at(end + 1);
    let kept: Vec<NodeId> = tail
        .iter()
        .copied()
        .filter(|id| builder.kind(*id).is_some_and(is_declaration))
        .collect();
    if kept.len() == tail.len() {
        return None;
    }
    Some(live.iter().copied().chain(kept).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::DeclarationKind;

    #[test]
    fn test_tail_after_break_is_dropped() {
        let mut b = IrBuilder::new();
        let brk = b.create_node(NodeKind::BreakStatement).unwrap();
        let one = b.numeric_literal(1.0).unwrap();
        let stray = b.expression_statement(one.id).unwrap();
        let decl = b.variable_declarator("x", None).unwrap();
        let var = b.variable_declaration(DeclarationKind::Let, vec![decl.id]).unwrap();
        let live = live_statements(&b, &[brk.id, stray.id, var.id]);
        assert_eq!(live, Some(vec![brk.id, var.id]));
    }

    #[test]
    fn test_nothing_to_drop() {
        let mut b = IrBuilder::new();
        let one = b.numeric_literal(1.0).unwrap();
        let stmt = b.expression_statement(one.id).unwrap();
        let ret = b.return_statement(None).unwrap();
        assert_eq!(live_statements(&b, &[stmt.id, ret.id]), None);
    }

    #[test]
    fn test_nullish_short_circuit() {
        let mut b = IrBuilder::new();
        let null = b.null_literal().unwrap();
        let zero = b.numeric_literal(0.0).unwrap();
        assert_eq!(short_circuit(&b, LogicalOperator::Nullish, null.id), Some(false));
        assert_eq!(short_circuit(&b, LogicalOperator::Nullish, zero.id), Some(true));
        assert_eq!(short_circuit(&b, LogicalOperator::And, zero.id), Some(true));
        assert_eq!(short_circuit(&b, LogicalOperator::Or, zero.id), Some(false));
    }
}
