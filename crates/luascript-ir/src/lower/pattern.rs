//! Destructuring
//!
//! Object and array patterns are flattened into a temporary holding the
//! source value plus one member access per leaf. In declarations every
//! step is a declarator of the same `VariableDeclaration`; in assignments
//! the steps become a `SequenceExpression` whose last element is the
//! temporary, so the expression keeps its value.

use super::expr::{lower_expr, lower_named};
use super::{LowerResult, LoweringContext};
use crate::error::LoweringError;
use crate::node::*;
use crate::types::TypeDescriptor;
use luascript_ast::{self as ast, Expr, ObjectPatternMember, Pattern, Pos};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Mode {
    Declare(DeclarationKind),
    Assign,
}

/// Collects the steps of a destructuring: declarators when declaring,
/// assignment expressions otherwise.
pub(super) struct Sink {
    mode: Mode,
    steps: Vec<NodeId>,
}

impl Sink {
    pub(super) fn new(mode: Mode) -> Self {
        Self {
            mode,
            steps: Vec::new(),
        }
    }
}

#[derive(Clone)]
enum Key {
    Name(String),
    Index(usize),
    Computed(NodeId),
    /// Computed key already evaluated into a temporary
    Held(String, NodeId),
}

/// Names bound by a pattern, in source order.
pub(super) fn pattern_names(pattern: &Pattern, names: &mut Vec<String>) {
    match pattern {
        Pattern::Identifier(id) => names.push(id.name.clone()),
        Pattern::ObjectPattern(obj) => {
            for member in &obj.properties {
                match member {
                    ObjectPatternMember::Property(prop) => pattern_names(&prop.value, names),
                    ObjectPatternMember::RestElement(rest) => pattern_names(&rest.argument, names),
                }
            }
        }
        Pattern::ArrayPattern(arr) => {
            for element in arr.elements.iter().flatten() {
                pattern_names(element, names);
            }
        }
        Pattern::RestElement(rest) => pattern_names(&rest.argument, names),
        Pattern::AssignmentPattern(assign) => pattern_names(&assign.left, names),
        Pattern::MemberExpression(_) => {}
    }
}

/// Declares `name`, filling the id reserved on block entry when there is
/// one.
pub(super) fn declare_name(
    ctx: &mut LoweringContext,
    name: &str,
    init: Option<NodeId>,
    kind: DeclarationKind,
    pos: &Pos,
    synthetic: bool,
) -> LowerResult<NodeId> {
    let ty = init.and_then(|i| ctx.type_of(i));
    let node = NodeKind::VariableDeclarator {
        name: name.to_string(),
        init,
    };
    let reserved = ctx
        .scopes
        .local(name)
        .filter(|id| ctx.builder.is_reserved(*id));
    let id = match reserved {
        Some(id) => ctx.fill(id, node, pos, synthetic)?,
        None => {
            let id = if synthetic {
                ctx.synthetic(node, pos)?
            } else {
                ctx.node(node, pos)?
            };
            ctx.scopes.add_binding(name, id);
            id
        }
    };
    ctx.builder.set_type(id, ty.clone())?;
    ctx.record_binding_type(id, ty);
    if kind == DeclarationKind::Const {
        ctx.constants.insert(id);
    }
    Ok(id)
}

/// Destructures `value` into `pattern`, recording the steps in `sink`.
/// Returns the temporary holding the whole value for object and array
/// patterns.
pub(super) fn destructure(
    ctx: &mut LoweringContext,
    sink: &mut Sink,
    pattern: &Pattern,
    value: NodeId,
) -> LowerResult<Option<(String, NodeId)>> {
    match pattern {
        Pattern::Identifier(id) => {
            leaf_identifier(ctx, sink, &id.name, value, &id.pos)?;
            Ok(None)
        }
        Pattern::MemberExpression(member) => {
            if sink.mode != Mode::Assign {
                return Err(LoweringError::malformed(
                    "VariableDeclarator",
                    "member expressions cannot be declared",
                    ctx.span(&member.pos),
                ));
            }
            let target = super::expr::lower_member(ctx, member)?;
            let assign = ctx.synthetic(assignment(target, value), &member.pos)?;
            sink.steps.push(assign);
            Ok(None)
        }
        Pattern::AssignmentPattern(assign) => {
            let with_default = default_value(ctx, sink, value, &assign.right, &assign.pos)?;
            destructure(ctx, sink, &assign.left, with_default)
        }
        Pattern::ObjectPattern(obj) => {
            let temp = bind_temp(ctx, sink, value, &obj.pos)?;
            let has_rest = obj
                .properties
                .iter()
                .any(|member| matches!(member, ObjectPatternMember::RestElement(_)));
            let mut excluded = Vec::new();
            for member in &obj.properties {
                match member {
                    ObjectPatternMember::Property(prop) => {
                        let key = match property_key(ctx, &prop.key, prop.computed)? {
                            // the rest copy deletes the same key, so it is evaluated once
                            Key::Computed(expr) if has_rest => {
                                let (name, id) = bind_temp(ctx, sink, expr, &prop.pos)?;
                                Key::Held(name, id)
                            }
                            key => key,
                        };
                        if matches!(key, Key::Name(_) | Key::Held(..)) {
                            excluded.push(key.clone());
                        }
                        let access = member_access(ctx, &temp, key, &prop.pos)?;
                        destructure(ctx, sink, &prop.value, access)?;
                    }
                    ObjectPatternMember::RestElement(rest) => {
                        let collected = object_rest(ctx, sink, &temp, &excluded, &rest.pos)?;
                        destructure(ctx, sink, &rest.argument, collected)?;
                    }
                }
            }
            Ok(Some(temp))
        }
        Pattern::ArrayPattern(arr) => {
            let temp = bind_temp(ctx, sink, value, &arr.pos)?;
            for (index, element) in arr.elements.iter().enumerate() {
                match element {
                    None => {}
                    Some(Pattern::RestElement(rest)) => {
                        let object = ctx.synthetic_ident(&temp.0, temp.1, &rest.pos)?;
                        let start = number(ctx, index as f64, &rest.pos)?;
                        let sliced = method_call(ctx, object, "slice", vec![start], &rest.pos)?;
                        destructure(ctx, sink, &rest.argument, sliced)?;
                    }
                    Some(element) => {
                        let access = member_access(ctx, &temp, Key::Index(index), element.pos())?;
                        destructure(ctx, sink, element, access)?;
                    }
                }
            }
            Ok(Some(temp))
        }
        Pattern::RestElement(rest) => Err(LoweringError::malformed(
            "RestElement",
            "rest element outside of a pattern list",
            ctx.span(&rest.pos),
        )),
    }
}

/// `target = value` for any assignment-position pattern, as one
/// expression.
pub(super) fn assign_pattern(
    ctx: &mut LoweringContext,
    target: &Pattern,
    value: &Expr,
    pos: &Pos,
) -> LowerResult<NodeId> {
    match target {
        Pattern::Identifier(id) => {
            let value = lower_named(ctx, &id.name, value)?;
            let target = assignable_identifier(ctx, &id.name, &id.pos)?;
            note_assigned_type(ctx, target, value);
            let ty = ctx.type_of(value);
            ctx.typed(assignment(target, value), pos, ty)
        }
        Pattern::MemberExpression(member) => {
            let value = lower_expr(ctx, value)?;
            let target = super::expr::lower_member(ctx, member)?;
            let ty = ctx.type_of(value);
            ctx.typed(assignment(target, value), pos, ty)
        }
        pattern => {
            let value = lower_expr(ctx, value)?;
            assign_lowered(ctx, pattern, value, pos)
        }
    }
}

/// Destructuring assignment of an already lowered value.
pub(super) fn assign_lowered(
    ctx: &mut LoweringContext,
    pattern: &Pattern,
    value: NodeId,
    pos: &Pos,
) -> LowerResult<NodeId> {
    let mut sink = Sink::new(Mode::Assign);
    let temp = destructure(ctx, &mut sink, pattern, value)?;
    let mut exprs = sink.steps;
    if let Some((name, id)) = temp {
        exprs.push(ctx.synthetic_ident(&name, id, pos)?);
    }
    if exprs.len() == 1 {
        return Ok(exprs[0]);
    }
    ctx.synthetic(NodeKind::SequenceExpression { expressions: exprs }, pos)
}

/// Identifier node for the left side of an assignment; rejects constants.
pub(super) fn assignable_identifier(ctx: &mut LoweringContext, name: &str, pos: &Pos) -> LowerResult<NodeId> {
    let binding = ctx.scopes.resolve(name);
    if let Some(binding) = binding {
        if ctx.constants.contains(&binding) {
            return Err(LoweringError::malformed(
                "AssignmentExpression",
                format!("assignment to constant `{name}`"),
                ctx.span(pos),
            ));
        }
    }
    ctx.node(
        NodeKind::Identifier {
            name: name.to_string(),
            binding,
        },
        pos,
    )
}

fn note_assigned_type(ctx: &mut LoweringContext, target: NodeId, value: NodeId) {
    let binding = match ctx.builder.kind(target) {
        Some(NodeKind::Identifier {
            binding: Some(binding),
            ..
        }) => *binding,
        _ => return,
    };
    let assigned = ctx.type_of(value);
    let known = ctx.binding_types.get(&binding).cloned();
    if known.is_some() && known != assigned {
        ctx.record_binding_type(binding, None);
    }
}

fn assignment(target: NodeId, value: NodeId) -> NodeKind {
    NodeKind::AssignmentExpression {
        operator: AssignmentOperator::Assign,
        target,
        value,
    }
}

fn leaf_identifier(
    ctx: &mut LoweringContext,
    sink: &mut Sink,
    name: &str,
    value: NodeId,
    pos: &Pos,
) -> LowerResult<()> {
    let step = match sink.mode {
        Mode::Declare(kind) => declare_name(ctx, name, Some(value), kind, pos, false)?,
        Mode::Assign => {
            let target = assignable_identifier(ctx, name, pos)?;
            note_assigned_type(ctx, target, value);
            ctx.synthetic(assignment(target, value), pos)?
        }
    };
    sink.steps.push(step);
    Ok(())
}

fn bind_temp(ctx: &mut LoweringContext, sink: &mut Sink, value: NodeId, pos: &Pos) -> LowerResult<(String, NodeId)> {
    match sink.mode {
        Mode::Declare(_) => {
            let name = ctx.fresh_name("tmp");
            let ty = ctx.type_of(value);
            let id = ctx.synthetic(
                NodeKind::VariableDeclarator {
                    name: name.clone(),
                    init: Some(value),
                },
                pos,
            )?;
            ctx.record_binding_type(id, ty);
            sink.steps.push(id);
            Ok((name, id))
        }
        Mode::Assign => {
            let (name, id) = ctx.pending_temp(pos)?;
            let target = ctx.synthetic_ident(&name, id, pos)?;
            let step = ctx.synthetic(assignment(target, value), pos)?;
            sink.steps.push(step);
            Ok((name, id))
        }
    }
}

/// `tmp === undefined ? fallback : tmp`
fn default_value(
    ctx: &mut LoweringContext,
    sink: &mut Sink,
    value: NodeId,
    fallback: &Expr,
    pos: &Pos,
) -> LowerResult<NodeId> {
    let temp = bind_temp(ctx, sink, value, pos)?;
    let tested = ctx.synthetic_ident(&temp.0, temp.1, pos)?;
    let undefined = ctx.synthetic(NodeKind::UndefinedLiteral, pos)?;
    let test = ctx.synthetic(
        NodeKind::BinaryExpression {
            operator: BinaryOperator::StrictEq,
            left: tested,
            right: undefined,
        },
        pos,
    )?;
    let fallback = lower_expr(ctx, fallback)?;
    let current = ctx.synthetic_ident(&temp.0, temp.1, pos)?;
    let ty = match (ctx.type_of(fallback), ctx.type_of(current)) {
        (Some(a), Some(b)) => Some(TypeDescriptor::union([a, b])),
        _ => None,
    };
    let meta = crate::builder::NodeMeta::synthetic(ctx.span(pos)).typed(ty);
    Ok(ctx
        .builder
        .create_node_with(
            NodeKind::ConditionalExpression {
                test,
                consequent: fallback,
                alternate: current,
            },
            meta,
        )?
        .id)
}

fn property_key(ctx: &mut LoweringContext, key: &Expr, computed: bool) -> LowerResult<Key> {
    if computed {
        return Ok(Key::Computed(lower_expr(ctx, key)?));
    }
    match key {
        Expr::Identifier(id) => Ok(Key::Name(id.name.clone())),
        Expr::Literal(lit) => Ok(Key::Name(super::expr::literal_key(lit))),
        other => Err(LoweringError::malformed(
            "ObjectPattern",
            format!("unsupported key {}", other.type_name()),
            ctx.span(other.pos()),
        )),
    }
}

fn member_access(ctx: &mut LoweringContext, temp: &(String, NodeId), key: Key, pos: &Pos) -> LowerResult<NodeId> {
    let object = ctx.synthetic_ident(&temp.0, temp.1, pos)?;
    let (property, computed) = match key {
        Key::Name(name) => (string(ctx, &name, pos)?, false),
        Key::Index(index) => (number(ctx, index as f64, pos)?, true),
        Key::Computed(expr) => (expr, true),
        Key::Held(name, id) => (ctx.synthetic_ident(&name, id, pos)?, true),
    };
    ctx.synthetic(
        NodeKind::MemberExpression {
            object,
            property,
            computed,
        },
        pos,
    )
}

/// `Object.assign({}, tmp)` followed by deleting the keys already taken.
fn object_rest(
    ctx: &mut LoweringContext,
    sink: &mut Sink,
    temp: &(String, NodeId),
    excluded: &[Key],
    pos: &Pos,
) -> LowerResult<NodeId> {
    let object_global = ctx.scopes.resolve("Object");
    let object = ctx.synthetic(
        NodeKind::Identifier {
            name: "Object".into(),
            binding: object_global,
        },
        pos,
    )?;
    let empty = ctx.synthetic(NodeKind::ObjectExpression { properties: vec![] }, pos)?;
    let source = ctx.synthetic_ident(&temp.0, temp.1, pos)?;
    let copy = method_call(ctx, object, "assign", vec![empty, source], pos)?;
    if excluded.is_empty() {
        return Ok(copy);
    }

    let rest = bind_temp(ctx, sink, copy, pos)?;
    let mut steps = Vec::with_capacity(excluded.len() + 1);
    for key in excluded {
        let access = member_access(ctx, &rest, key.clone(), pos)?;
        steps.push(ctx.synthetic(
            NodeKind::UnaryExpression {
                operator: UnaryOperator::Delete,
                argument: access,
            },
            pos,
        )?);
    }
    steps.push(ctx.synthetic_ident(&rest.0, rest.1, pos)?);
    ctx.synthetic(NodeKind::SequenceExpression { expressions: steps }, pos)
}

fn method_call(ctx: &mut LoweringContext, object: NodeId, method: &str, args: Vec<NodeId>, pos: &Pos) -> LowerResult<NodeId> {
    let property = string(ctx, method, pos)?;
    let callee = ctx.synthetic(
        NodeKind::MemberExpression {
            object,
            property,
            computed: false,
        },
        pos,
    )?;
    ctx.synthetic(
        NodeKind::CallExpression {
            callee,
            arguments: args.into_iter().map(ListItem::plain).collect(),
            has_spread: false,
        },
        pos,
    )
}

fn string(ctx: &mut LoweringContext, value: &str, pos: &Pos) -> LowerResult<NodeId> {
    let meta = crate::builder::NodeMeta::synthetic(ctx.span(pos)).typed(Some(TypeDescriptor::string()));
    Ok(ctx
        .builder
        .create_node_with(
            NodeKind::StringLiteral {
                value: value.to_string(),
            },
            meta,
        )?
        .id)
}

fn number(ctx: &mut LoweringContext, value: f64, pos: &Pos) -> LowerResult<NodeId> {
    let meta = crate::builder::NodeMeta::synthetic(ctx.span(pos)).typed(Some(TypeDescriptor::number()));
    Ok(ctx
        .builder
        .create_node_with(NodeKind::NumericLiteral { value }, meta)?
        .id)
}

/// Lowers a whole declarator list of a `let`/`const` declaration.
pub(super) fn lexical_declaration(
    ctx: &mut LoweringContext,
    decl: &ast::VariableDeclaration,
    kind: DeclarationKind,
) -> LowerResult<NodeId> {
    let mut sink = Sink::new(Mode::Declare(kind));
    for declarator in &decl.declarations {
        match (&declarator.id, &declarator.init) {
            (Pattern::Identifier(id), init) => {
                if init.is_none() && kind == DeclarationKind::Const {
                    return Err(LoweringError::malformed(
                        "VariableDeclaration",
                        format!("const `{}` has no initializer", id.name),
                        ctx.span(&declarator.pos),
                    ));
                }
                let init = match init {
                    Some(init) => Some(lower_named(ctx, &id.name, init)?),
                    None => None,
                };
                let declared = declare_name(ctx, &id.name, init, kind, &declarator.pos, false)?;
                sink.steps.push(declared);
            }
            (pattern, Some(init)) => {
                let value = lower_expr(ctx, init)?;
                destructure(ctx, &mut sink, pattern, value)?;
            }
            (pattern, None) => {
                return Err(LoweringError::malformed(
                    "VariableDeclaration",
                    "destructuring declaration has no initializer",
                    ctx.span(pattern.pos()),
                ));
            }
        }
    }
    ctx.node(
        NodeKind::VariableDeclaration {
            declaration_kind: kind,
            declarations: sink.steps,
        },
        &decl.pos,
    )
}

/// `let <pattern> = <value>` for an already lowered value.
pub(super) fn declare_lowered(
    ctx: &mut LoweringContext,
    pattern: &Pattern,
    value: NodeId,
    kind: DeclarationKind,
    pos: &Pos,
) -> LowerResult<NodeId> {
    let mut sink = Sink::new(Mode::Declare(kind));
    destructure(ctx, &mut sink, pattern, value)?;
    ctx.synthetic(
        NodeKind::VariableDeclaration {
            declaration_kind: kind,
            declarations: sink.steps,
        },
        pos,
    )
}
