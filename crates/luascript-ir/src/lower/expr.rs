//! Expression lowering

use super::pattern::{assign_pattern, assignable_identifier};
use super::{class, function, LowerResult, LoweringContext};
use crate::error::LoweringError;
use crate::node::*;
use crate::types::TypeDescriptor;
use luascript_ast::{self as ast, Expr, ObjectMember, Pattern, PropertyKind};
use serde_json::Value;
use std::collections::BTreeMap;

pub(super) fn lower_expr(ctx: &mut LoweringContext, expr: &Expr) -> LowerResult<NodeId> {
    match expr {
        Expr::Identifier(id) => lower_identifier(ctx, id),
        Expr::Literal(lit) => lower_literal(ctx, lit),
        Expr::TemplateLiteral(tpl) => lower_template(ctx, tpl),
        Expr::ThisExpression(this) => ctx.node(NodeKind::ThisExpression, &this.pos),
        Expr::Super(sup) => ctx.node(NodeKind::Super, &sup.pos),
        Expr::ArrayExpression(arr) => lower_array(ctx, arr),
        Expr::ObjectExpression(obj) => lower_object(ctx, obj),
        Expr::FunctionExpression(func) => function::function_expression(ctx, func, None),
        Expr::ArrowFunctionExpression(arrow) => function::arrow_function(ctx, arrow, None),
        Expr::ClassExpression(cls) => class::class_expression(ctx, cls, None),
        Expr::UnaryExpression(unary) => lower_unary(ctx, unary),
        Expr::UpdateExpression(update) => lower_update(ctx, update),
        Expr::BinaryExpression(bin) => lower_binary(ctx, bin),
        Expr::LogicalExpression(logical) => lower_logical(ctx, logical),
        Expr::AssignmentExpression(assign) => lower_assignment(ctx, assign),
        Expr::ConditionalExpression(cond) => {
            let test = lower_expr(ctx, &cond.test)?;
            let consequent = lower_expr(ctx, &cond.consequent)?;
            let alternate = lower_expr(ctx, &cond.alternate)?;
            let ty = union_of(ctx, consequent, alternate);
            ctx.typed(
                NodeKind::ConditionalExpression {
                    test,
                    consequent,
                    alternate,
                },
                &cond.pos,
                ty,
            )
        }
        Expr::CallExpression(call) => lower_call(ctx, call, false),
        Expr::NewExpression(call) => lower_call(ctx, call, true),
        Expr::MemberExpression(member) => lower_member(ctx, member),
        Expr::SequenceExpression(seq) => {
            let expressions = seq
                .expressions
                .iter()
                .map(|e| lower_expr(ctx, e))
                .collect::<LowerResult<Vec<_>>>()?;
            let ty = expressions.last().and_then(|last| ctx.type_of(*last));
            ctx.typed(NodeKind::SequenceExpression { expressions }, &seq.pos, ty)
        }
        Expr::AwaitExpression(await_expr) => {
            if !ctx.current().is_async {
                return Err(LoweringError::malformed(
                    "AwaitExpression",
                    "await outside of an async function",
                    ctx.span(&await_expr.pos),
                ));
            }
            let argument = lower_expr(ctx, &await_expr.argument)?;
            ctx.node(NodeKind::AwaitExpression { argument }, &await_expr.pos)
        }
        Expr::ParenthesizedExpression(paren) => lower_expr(ctx, &paren.expression),
        Expr::SpreadElement(spread) => Err(LoweringError::malformed(
            "SpreadElement",
            "spread outside of an argument or element list",
            ctx.span(&spread.pos),
        )),
        other => Err(LoweringError::unhandled(other.type_name(), ctx.span(other.pos()))),
    }
}

/// Lowers the initializer of a named binding; anonymous functions and
/// classes take the binding's name.
pub(super) fn lower_named(ctx: &mut LoweringContext, name: &str, expr: &Expr) -> LowerResult<NodeId> {
    match expr {
        Expr::FunctionExpression(func) if func.id.is_none() => {
            function::function_expression(ctx, func, Some(name))
        }
        Expr::ArrowFunctionExpression(arrow) => function::arrow_function(ctx, arrow, Some(name)),
        Expr::ClassExpression(cls) if cls.id.is_none() => class::class_expression(ctx, cls, Some(name)),
        _ => lower_expr(ctx, expr),
    }
}

fn lower_identifier(ctx: &mut LoweringContext, id: &ast::Identifier) -> LowerResult<NodeId> {
    let binding = ctx.scopes.resolve(&id.name);
    if binding.is_none() {
        match id.name.as_str() {
            "undefined" => return ctx.node(NodeKind::UndefinedLiteral, &id.pos),
            "NaN" | "Infinity" => {
                return ctx.typed(
                    NodeKind::Identifier {
                        name: id.name.clone(),
                        binding: None,
                    },
                    &id.pos,
                    Some(TypeDescriptor::number()),
                )
            }
            _ => {}
        }
    }
    let ty = binding.and_then(|b| ctx.binding_types.get(&b).cloned());
    ctx.typed(
        NodeKind::Identifier {
            name: id.name.clone(),
            binding,
        },
        &id.pos,
        ty,
    )
}

/// Property name a literal key stands for (`{1: x}` → `"1"`).
pub(super) fn literal_key(lit: &ast::Literal) -> String {
    match &lit.value {
        Value::String(s) => s.clone(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
            Some(f) => f.to_string(),
            None => n.to_string(),
        },
        other => other.to_string(),
    }
}

fn lower_literal(ctx: &mut LoweringContext, lit: &ast::Literal) -> LowerResult<NodeId> {
    if lit.regex.is_some() {
        return Err(LoweringError::unhandled("RegExpLiteral", ctx.span(&lit.pos)));
    }
    if lit.bigint.is_some() {
        return Err(LoweringError::unhandled("BigIntLiteral", ctx.span(&lit.pos)));
    }
    let (kind, ty) = match &lit.value {
        Value::Number(n) => {
            let value = n.as_f64().ok_or_else(|| {
                LoweringError::malformed("Literal", format!("number {n} out of range"), ctx.span(&lit.pos))
            })?;
            (NodeKind::NumericLiteral { value }, Some(TypeDescriptor::number()))
        }
        Value::String(value) => (
            NodeKind::StringLiteral {
                value: value.clone(),
            },
            Some(TypeDescriptor::string()),
        ),
        Value::Bool(value) => (
            NodeKind::BooleanLiteral { value: *value },
            Some(TypeDescriptor::boolean()),
        ),
        Value::Null => (NodeKind::NullLiteral, Some(TypeDescriptor::primitive("null"))),
        other => {
            return Err(LoweringError::malformed(
                "Literal",
                format!("unexpected literal value {other}"),
                ctx.span(&lit.pos),
            ))
        }
    };
    ctx.typed(kind, &lit.pos, ty)
}

fn lower_template(ctx: &mut LoweringContext, tpl: &ast::TemplateLiteral) -> LowerResult<NodeId> {
    if tpl.quasis.len() != tpl.expressions.len() + 1 {
        return Err(LoweringError::malformed(
            "TemplateLiteral",
            "quasis and expressions do not interleave",
            ctx.span(&tpl.pos),
        ));
    }
    let mut parts = Vec::with_capacity(tpl.quasis.len() * 2);
    for (i, quasi) in tpl.quasis.iter().enumerate() {
        let cooked = quasi.value.cooked.clone().unwrap_or_else(|| quasi.value.raw.clone());
        parts.push(ctx.node(
            NodeKind::TemplateElement {
                cooked,
                raw: quasi.value.raw.clone(),
            },
            &quasi.pos,
        )?);
        if let Some(expr) = tpl.expressions.get(i) {
            parts.push(lower_expr(ctx, expr)?);
        }
    }
    ctx.typed(NodeKind::TemplateLiteral { parts }, &tpl.pos, Some(TypeDescriptor::string()))
}

/// Argument or element list; `...x` entries become spread items.
fn lower_items(ctx: &mut LoweringContext, items: &[Expr]) -> LowerResult<Vec<ListItem>> {
    items
        .iter()
        .map(|item| match item {
            Expr::SpreadElement(spread) => Ok(ListItem::spread(lower_expr(ctx, &spread.argument)?)),
            other => Ok(ListItem::plain(lower_expr(ctx, other)?)),
        })
        .collect()
}

fn lower_array(ctx: &mut LoweringContext, arr: &ast::ArrayExpression) -> LowerResult<NodeId> {
    let mut elements = Vec::with_capacity(arr.elements.len());
    for element in &arr.elements {
        match element {
            Some(Expr::SpreadElement(spread)) => {
                elements.push(ListItem::spread(lower_expr(ctx, &spread.argument)?));
            }
            Some(expr) => elements.push(ListItem::plain(lower_expr(ctx, expr)?)),
            None => elements.push(ListItem::plain(ctx.synthetic(NodeKind::UndefinedLiteral, &arr.pos)?)),
        }
    }
    let has_spread = elements.iter().any(|e| e.spread);
    let known: Option<Vec<TypeDescriptor>> = elements
        .iter()
        .map(|e| if e.spread { None } else { ctx.type_of(e.value) })
        .collect();
    let element_type = match known {
        Some(types) if !types.is_empty() => TypeDescriptor::union(types),
        _ => TypeDescriptor::any(),
    };
    ctx.typed(
        NodeKind::ArrayExpression {
            elements,
            has_spread,
        },
        &arr.pos,
        Some(TypeDescriptor::array(element_type)),
    )
}

fn object_key(ctx: &mut LoweringContext, key: &Expr, computed: bool) -> LowerResult<(NodeId, Option<String>)> {
    if computed {
        return Ok((lower_expr(ctx, key)?, None));
    }
    let name = match key {
        Expr::Identifier(id) => id.name.clone(),
        Expr::Literal(lit) => literal_key(lit),
        other => return Err(LoweringError::unhandled(other.type_name(), ctx.span(other.pos()))),
    };
    let id = ctx.typed(
        NodeKind::StringLiteral { value: name.clone() },
        key.pos(),
        Some(TypeDescriptor::string()),
    )?;
    Ok((id, Some(name)))
}

fn lower_object(ctx: &mut LoweringContext, obj: &ast::ObjectExpression) -> LowerResult<NodeId> {
    let mut properties = Vec::with_capacity(obj.properties.len());
    let mut shape = BTreeMap::new();
    for member in &obj.properties {
        match member {
            ObjectMember::Property(prop) => {
                if prop.kind != PropertyKind::Init {
                    return Err(LoweringError::unhandled("ObjectAccessorProperty", ctx.span(&prop.pos)));
                }
                let (key, name) = object_key(ctx, &prop.key, prop.computed)?;
                let value = match &name {
                    Some(name) => lower_named(ctx, name, &prop.value)?,
                    None => lower_expr(ctx, &prop.value)?,
                };
                if let (Some(name), Some(ty)) = (name, ctx.type_of(value)) {
                    shape.insert(name, ty);
                }
                properties.push(ctx.node(
                    NodeKind::Property {
                        key,
                        value,
                        computed: prop.computed,
                    },
                    &prop.pos,
                )?);
            }
            ObjectMember::SpreadElement(spread) => {
                let argument = lower_expr(ctx, &spread.argument)?;
                properties.push(ctx.node(NodeKind::SpreadElement { argument }, &spread.pos)?);
            }
        }
    }
    ctx.typed(
        NodeKind::ObjectExpression { properties },
        &obj.pos,
        Some(TypeDescriptor::Object { properties: shape }),
    )
}

fn lower_unary(ctx: &mut LoweringContext, unary: &ast::UnaryExpression) -> LowerResult<NodeId> {
    let operator = UnaryOperator::parse(&unary.operator).ok_or_else(|| {
        LoweringError::malformed(
            "UnaryExpression",
            format!("unknown operator `{}`", unary.operator),
            ctx.span(&unary.pos),
        )
    })?;
    let argument = lower_expr(ctx, &unary.argument)?;
    let ty = match operator {
        UnaryOperator::Neg | UnaryOperator::Plus | UnaryOperator::BitNot => Some(TypeDescriptor::number()),
        UnaryOperator::Not | UnaryOperator::Delete => Some(TypeDescriptor::boolean()),
        UnaryOperator::TypeOf => Some(TypeDescriptor::string()),
        UnaryOperator::Void => Some(TypeDescriptor::primitive("undefined")),
    };
    ctx.typed(NodeKind::UnaryExpression { operator, argument }, &unary.pos, ty)
}

/// Lowers an expression in assignment-target position.
fn lower_target(ctx: &mut LoweringContext, expr: &Expr, kind: &str) -> LowerResult<NodeId> {
    match expr {
        Expr::Identifier(id) => assignable_identifier(ctx, &id.name, &id.pos),
        Expr::MemberExpression(member) => lower_member(ctx, member),
        Expr::ParenthesizedExpression(paren) => lower_target(ctx, &paren.expression, kind),
        other => Err(LoweringError::malformed(
            kind,
            format!("{} is not assignable", other.type_name()),
            ctx.span(other.pos()),
        )),
    }
}

fn lower_update(ctx: &mut LoweringContext, update: &ast::UpdateExpression) -> LowerResult<NodeId> {
    let operator = UpdateOperator::parse(&update.operator).ok_or_else(|| {
        LoweringError::malformed(
            "UpdateExpression",
            format!("unknown operator `{}`", update.operator),
            ctx.span(&update.pos),
        )
    })?;
    let argument = lower_target(ctx, &update.argument, "UpdateExpression")?;
    ctx.typed(
        NodeKind::UpdateExpression {
            operator,
            prefix: update.prefix,
            argument,
        },
        &update.pos,
        Some(TypeDescriptor::number()),
    )
}

fn binary_type(operator: BinaryOperator, left: Option<TypeDescriptor>, right: Option<TypeDescriptor>) -> Option<TypeDescriptor> {
    if operator.is_comparison() {
        return Some(TypeDescriptor::boolean());
    }
    if operator == BinaryOperator::Add {
        let is_string = |t: &Option<TypeDescriptor>| t.as_ref().is_some_and(|t| t.is_string());
        let is_number = |t: &Option<TypeDescriptor>| t.as_ref().is_some_and(|t| t.is_number());
        return if is_string(&left) || is_string(&right) {
            Some(TypeDescriptor::string())
        } else if is_number(&left) && is_number(&right) {
            Some(TypeDescriptor::number())
        } else {
            None
        };
    }
    Some(TypeDescriptor::number())
}

fn lower_binary(ctx: &mut LoweringContext, bin: &ast::BinaryExpression) -> LowerResult<NodeId> {
    let operator = BinaryOperator::parse(&bin.operator).ok_or_else(|| {
        LoweringError::malformed(
            "BinaryExpression",
            format!("unknown operator `{}`", bin.operator),
            ctx.span(&bin.pos),
        )
    })?;
    if let Expr::PrivateIdentifier(private) = bin.left.as_ref() {
        return Err(LoweringError::unhandled("PrivateIdentifier", ctx.span(&private.pos)));
    }
    let left = lower_expr(ctx, &bin.left)?;
    let right = lower_expr(ctx, &bin.right)?;
    let ty = binary_type(operator, ctx.type_of(left), ctx.type_of(right));
    ctx.typed(
        NodeKind::BinaryExpression {
            operator,
            left,
            right,
        },
        &bin.pos,
        ty,
    )
}

fn union_of(ctx: &LoweringContext, a: NodeId, b: NodeId) -> Option<TypeDescriptor> {
    match (ctx.type_of(a), ctx.type_of(b)) {
        (Some(a), Some(b)) => Some(TypeDescriptor::union([a, b])),
        _ => None,
    }
}

fn lower_logical(ctx: &mut LoweringContext, logical: &ast::BinaryExpression) -> LowerResult<NodeId> {
    let operator = LogicalOperator::parse(&logical.operator).ok_or_else(|| {
        LoweringError::malformed(
            "LogicalExpression",
            format!("unknown operator `{}`", logical.operator),
            ctx.span(&logical.pos),
        )
    })?;
    let left = lower_expr(ctx, &logical.left)?;
    let right = lower_expr(ctx, &logical.right)?;
    let ty = union_of(ctx, left, right);
    ctx.typed(
        NodeKind::LogicalExpression {
            operator,
            left,
            right,
        },
        &logical.pos,
        ty,
    )
}

fn lower_assignment(ctx: &mut LoweringContext, assign: &ast::AssignmentExpression) -> LowerResult<NodeId> {
    let operator = AssignmentOperator::parse(&assign.operator).ok_or_else(|| {
        LoweringError::malformed(
            "AssignmentExpression",
            format!("unknown operator `{}`", assign.operator),
            ctx.span(&assign.pos),
        )
    })?;
    if operator == AssignmentOperator::Assign {
        return assign_pattern(ctx, &assign.left, &assign.right, &assign.pos);
    }

    let target = match assign.left.as_ref() {
        Pattern::Identifier(id) => assignable_identifier(ctx, &id.name, &id.pos)?,
        Pattern::MemberExpression(member) => lower_member(ctx, member)?,
        other => {
            return Err(LoweringError::malformed(
                "AssignmentExpression",
                format!("`{}` cannot destructure", assign.operator),
                ctx.span(other.pos()),
            ))
        }
    };
    let value = lower_expr(ctx, &assign.right)?;
    let ty = match operator.binary() {
        Some(op) => binary_type(op, ctx.type_of(target), ctx.type_of(value)),
        None => union_of(ctx, target, value),
    };
    if let Some(NodeKind::Identifier {
        binding: Some(binding),
        ..
    }) = ctx.builder.kind(target)
    {
        let binding = *binding;
        if ctx.binding_types.get(&binding) != ty.as_ref() {
            ctx.record_binding_type(binding, None);
        }
    }
    ctx.typed(
        NodeKind::AssignmentExpression {
            operator,
            target,
            value,
        },
        &assign.pos,
        ty,
    )
}

fn lower_call(ctx: &mut LoweringContext, call: &ast::CallExpression, is_new: bool) -> LowerResult<NodeId> {
    if call.optional {
        return Err(LoweringError::unhandled("OptionalCallExpression", ctx.span(&call.pos)));
    }
    let callee = lower_expr(ctx, &call.callee)?;
    let arguments = lower_items(ctx, &call.arguments)?;
    let has_spread = arguments.iter().any(|a| a.spread);
    let kind = if is_new {
        NodeKind::NewExpression {
            callee,
            arguments,
            has_spread,
        }
    } else {
        NodeKind::CallExpression {
            callee,
            arguments,
            has_spread,
        }
    };
    ctx.node(kind, &call.pos)
}

pub(super) fn lower_member(ctx: &mut LoweringContext, member: &ast::MemberExpression) -> LowerResult<NodeId> {
    if member.optional {
        return Err(LoweringError::unhandled("OptionalMemberExpression", ctx.span(&member.pos)));
    }
    let object = lower_expr(ctx, &member.object)?;
    let property = if member.computed {
        lower_expr(ctx, &member.property)?
    } else {
        match member.property.as_ref() {
            Expr::Identifier(id) => ctx.typed(
                NodeKind::StringLiteral {
                    value: id.name.clone(),
                },
                &id.pos,
                Some(TypeDescriptor::string()),
            )?,
            other => return Err(LoweringError::unhandled(other.type_name(), ctx.span(other.pos()))),
        }
    };
    let ty = match ctx.builder.kind(property) {
        Some(NodeKind::StringLiteral { value }) if !member.computed && value == "length" => {
            Some(TypeDescriptor::number())
        }
        _ => None,
    };
    ctx.typed(
        NodeKind::MemberExpression {
            object,
            property,
            computed: member.computed,
        },
        &member.pos,
        ty,
    )
}
