//! Constant folding
//!
//! Folds unary and binary operators whose operands are literals. Numeric
//! results are only folded when finite, so `1 / 0` stays an expression
//! and no literal outside the number schema is ever produced.

use super::{set_literal, Transform};
use crate::builder::IrBuilder;
use crate::error::BuilderError;
use crate::node::{BinaryOperator, NodeKind, UnaryOperator};

#[derive(Debug, Default, Clone, Copy)]
pub struct ConstantFolding;

impl Transform for ConstantFolding {
    fn name(&self) -> &'static str {
        "constant-folding"
    }

    fn priority(&self) -> i32 {
        20
    }

    fn run(&self, builder: &mut IrBuilder) -> Result<bool, BuilderError> {
        let mut changed = false;
        for id in builder.node_ids() {
            let folded = match builder.kind(id) {
                Some(NodeKind::BinaryExpression { operator, left, right }) => {
                    match (builder.kind(*left), builder.kind(*right)) {
                        (Some(l), Some(r)) => fold_binary(*operator, l, r),
                        _ => None,
                    }
                }
                Some(NodeKind::UnaryExpression { operator, argument }) => {
                    builder.kind(*argument).and_then(|a| fold_unary(*operator, a))
                }
                _ => None,
            };
            if let Some(kind) = folded {
                set_literal(builder, id, kind)?;
                changed = true;
            }
        }
        Ok(changed)
    }
}

fn number(value: f64) -> Option<NodeKind> {
    value.is_finite().then_some(NodeKind::NumericLiteral { value })
}

fn boolean(value: bool) -> Option<NodeKind> {
    Some(NodeKind::BooleanLiteral { value })
}

fn fold_binary(op: BinaryOperator, left: &NodeKind, right: &NodeKind) -> Option<NodeKind> {
    use BinaryOperator::*;
    match (left, right) {
        (NodeKind::NumericLiteral { value: a }, NodeKind::NumericLiteral { value: b }) => {
            let (a, b) = (*a, *b);
            match op {
                Add => number(a + b),
                Sub => number(a - b),
                Mul => number(a * b),
                Div => number(a / b),
                Rem => number(a % b),
                Exp => number(a.powf(b)),
                Eq | StrictEq => boolean(a == b),
                NotEq | StrictNotEq => boolean(a != b),
                Lt => boolean(a < b),
                LtEq => boolean(a <= b),
                Gt => boolean(a > b),
                GtEq => boolean(a >= b),
                _ => None,
            }
        }
        (NodeKind::StringLiteral { value: a }, NodeKind::StringLiteral { value: b }) => match op {
            Add => Some(NodeKind::StringLiteral {
                value: format!("{a}{b}"),
            }),
            Eq | StrictEq => boolean(a == b),
            NotEq | StrictNotEq => boolean(a != b),
            _ => None,
        },
        (NodeKind::BooleanLiteral { value: a }, NodeKind::BooleanLiteral { value: b }) => match op {
            Eq | StrictEq => boolean(a == b),
            NotEq | StrictNotEq => boolean(a != b),
            _ => None,
        },
        _ => None,
    }
}

fn fold_unary(op: UnaryOperator, argument: &NodeKind) -> Option<NodeKind> {
    match (op, argument) {
        (UnaryOperator::Neg, NodeKind::NumericLiteral { value }) => number(-value),
        (UnaryOperator::Plus, NodeKind::NumericLiteral { value }) => number(*value),
        (UnaryOperator::Not, kind) => kind.literal_truthiness().map(|t| NodeKind::BooleanLiteral { value: !t }),
        (UnaryOperator::TypeOf, NodeKind::NumericLiteral { .. }) => Some(NodeKind::StringLiteral {
            value: "number".into(),
        }),
        (UnaryOperator::TypeOf, NodeKind::StringLiteral { .. }) => Some(NodeKind::StringLiteral {
            value: "string".into(),
        }),
        (UnaryOperator::TypeOf, NodeKind::BooleanLiteral { .. }) => Some(NodeKind::StringLiteral {
            value: "boolean".into(),
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn num(value: f64) -> NodeKind {
        NodeKind::NumericLiteral { value }
    }

    #[test]
    fn test_numeric_operators() {
        assert_eq!(fold_binary(BinaryOperator::Sub, &num(5.0), &num(2.0)), Some(num(3.0)));
        assert_eq!(fold_binary(BinaryOperator::Exp, &num(2.0), &num(10.0)), Some(num(1024.0)));
        assert_eq!(
            fold_binary(BinaryOperator::Lt, &num(1.0), &num(2.0)),
            Some(NodeKind::BooleanLiteral { value: true })
        );
    }

    #[test]
    fn test_non_finite_is_not_folded() {
        assert_eq!(fold_binary(BinaryOperator::Div, &num(0.0), &num(0.0)), None);
        assert_eq!(fold_binary(BinaryOperator::Exp, &num(10.0), &num(400.0)), None);
    }

    #[test]
    fn test_mixed_operands_are_left_alone() {
        let s = NodeKind::StringLiteral { value: "1".into() };
        assert_eq!(fold_binary(BinaryOperator::Add, &s, &num(1.0)), None);
        assert_eq!(fold_binary(BinaryOperator::BitAnd, &num(3.0), &num(1.0)), None);
    }

    #[test]
    fn test_unary() {
        assert_eq!(fold_unary(UnaryOperator::Neg, &num(4.0)), Some(num(-4.0)));
        assert_eq!(
            fold_unary(UnaryOperator::Not, &NodeKind::StringLiteral { value: String::new() }),
            Some(NodeKind::BooleanLiteral { value: true })
        );
        assert_eq!(fold_unary(UnaryOperator::Not, &NodeKind::ThisExpression), None);
    }
}
