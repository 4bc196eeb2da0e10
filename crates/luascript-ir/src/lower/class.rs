//! Classes
//!
//! A class lowers to a constructor `FunctionExpression`, one
//! `MethodDefinition` per method (instance methods point at the class's
//! `PrototypeReference`), static fields as `Property` nodes and a
//! `ClassMetadata` summary. Instance fields are assigned inside the
//! constructor. A class without a constructor gets a synthetic one; for a
//! derived class it forwards all arguments to `super`.

use super::expr::{lower_expr, lower_named, literal_key};
use super::function::{lower_function, Body, ConstructorFields};
use super::scope::FrameKind;
use super::{LowerResult, LoweringContext};
use crate::error::LoweringError;
use crate::node::*;
use luascript_ast::{self as ast, ClassMember, Expr, MethodKind as AstMethodKind, Pos};
use tracing::trace;

pub(super) fn class_declaration(ctx: &mut LoweringContext, cls: &ast::Class) -> LowerResult<NodeId> {
    let Some(id) = &cls.id else {
        return Err(LoweringError::malformed(
            "ClassDeclaration",
            "class declaration without a name",
            ctx.span(&cls.pos),
        ));
    };
    let reserved = ctx
        .scopes
        .local(&id.name)
        .filter(|reserved| ctx.builder.is_reserved(*reserved));
    let node = lower_class(ctx, cls, &id.name)?;
    let kind = NodeKind::ClassDeclaration(node);
    match reserved {
        Some(reserved) => ctx.fill(reserved, kind, &cls.pos, false),
        None => {
            let created = ctx.node(kind, &cls.pos)?;
            ctx.scopes.add_binding(&id.name, created);
            Ok(created)
        }
    }
}

pub(super) fn class_expression(ctx: &mut LoweringContext, cls: &ast::Class, hint: Option<&str>) -> LowerResult<NodeId> {
    let Some(id) = &cls.id else {
        let name = match hint {
            Some(hint) => hint.to_string(),
            None => ctx.fresh_name("Class"),
        };
        let node = lower_class(ctx, cls, &name)?;
        return ctx.node(NodeKind::ClassExpression(node), &cls.pos);
    };

    let self_id = ctx.builder.reserve()?;
    ctx.scopes.push_scope(FrameKind::Block);
    ctx.scopes.add_binding(&id.name, self_id);
    let node = lower_class(ctx, cls, &id.name);
    ctx.scopes.pop_scope();
    ctx.fill(self_id, NodeKind::ClassExpression(node?), &cls.pos, false)
}

/// Name of a non-computed class member key.
fn member_name(ctx: &LoweringContext, key: &Expr, computed: bool, pos: &Pos) -> LowerResult<String> {
    if computed {
        return Err(LoweringError::unhandled("ComputedClassMember", ctx.span(pos)));
    }
    match key {
        Expr::Identifier(id) => Ok(id.name.clone()),
        Expr::Literal(lit) => Ok(literal_key(lit)),
        other => Err(LoweringError::unhandled(other.type_name(), ctx.span(other.pos()))),
    }
}

fn lower_class(ctx: &mut LoweringContext, cls: &ast::Class, name: &str) -> LowerResult<ClassNode> {
    trace!(name, "lowering class");
    let super_class = cls.super_class.as_ref().map(|s| lower_expr(ctx, s)).transpose()?;
    let super_name = match cls.super_class.as_deref() {
        Some(Expr::Identifier(id)) => Some(id.name.clone()),
        _ => None,
    };
    let derived = super_class.is_some();
    let prototype = ctx.synthetic(
        NodeKind::PrototypeReference {
            class_name: name.to_string(),
        },
        &cls.pos,
    )?;

    let mut constructor = None;
    let mut methods = Vec::new();
    let mut instance_fields = Vec::new();
    let mut static_fields = Vec::new();
    for member in &cls.body.body {
        match member {
            ClassMember::MethodDefinition(method) if method.kind == AstMethodKind::Constructor => {
                constructor = Some(method);
            }
            ClassMember::MethodDefinition(method) => methods.push(method),
            ClassMember::PropertyDefinition(field) if field.is_static => static_fields.push(field),
            ClassMember::PropertyDefinition(field) => instance_fields.push(field),
            ClassMember::StaticBlock(block) => {
                return Err(LoweringError::unhandled("StaticBlock", ctx.span(&block.pos)));
            }
        }
    }

    let mut metadata_fields = Vec::with_capacity(instance_fields.len());
    for field in &instance_fields {
        metadata_fields.push(member_name(ctx, &field.key, field.computed, &field.pos)?);
    }

    let constructor = match constructor {
        Some(method) => {
            if method.value.generator {
                return Err(LoweringError::unhandled("GeneratorFunction", ctx.span(&method.pos)));
            }
            let parts = lower_function(
                ctx,
                &method.value.params,
                Body::Block(&method.value.body),
                method.value.is_async,
                &method.value.pos,
                ConstructorFields {
                    fields: instance_fields,
                    derived,
                },
            )?;
            let (node, ty) = parts.into_node(Some(name.to_string()), method.value.is_async);
            ctx.typed(NodeKind::FunctionExpression(node), &method.pos, Some(ty))?
        }
        None => synthesize_constructor(ctx, name, derived, &instance_fields, &cls.pos)?,
    };

    let mut method_ids = Vec::with_capacity(methods.len());
    let mut instance_methods = Vec::new();
    let mut static_methods = Vec::new();
    for method in methods {
        let key = member_name(ctx, &method.key, method.computed, &method.pos)?;
        if method.value.generator {
            return Err(LoweringError::unhandled("GeneratorFunction", ctx.span(&method.pos)));
        }
        let parts = lower_function(
            ctx,
            &method.value.params,
            Body::Block(&method.value.body),
            method.value.is_async,
            &method.value.pos,
            ConstructorFields::default(),
        )?;
        let (node, ty) = parts.into_node(Some(key.clone()), method.value.is_async);
        let value = ctx.typed(NodeKind::FunctionExpression(node), &method.value.pos, Some(ty))?;
        let method_kind = match method.kind {
            AstMethodKind::Get => MethodKind::Get,
            AstMethodKind::Set => MethodKind::Set,
            _ => MethodKind::Method,
        };
        if method.is_static {
            static_methods.push(key.clone());
        } else {
            instance_methods.push(key.clone());
        }
        method_ids.push(ctx.node(
            NodeKind::MethodDefinition {
                key,
                value,
                method_kind,
                is_static: method.is_static,
                home: (!method.is_static).then_some(prototype),
            },
            &method.pos,
        )?);
    }

    let mut static_properties = Vec::with_capacity(static_fields.len());
    let mut static_names = Vec::with_capacity(static_fields.len());
    for field in static_fields {
        let key_name = member_name(ctx, &field.key, field.computed, &field.pos)?;
        let key = ctx.synthetic(NodeKind::StringLiteral { value: key_name.clone() }, field.key.pos())?;
        let value = match &field.value {
            Some(value) => lower_named(ctx, &key_name, value)?,
            None => ctx.synthetic(NodeKind::UndefinedLiteral, &field.pos)?,
        };
        static_properties.push(ctx.node(
            NodeKind::Property {
                key,
                value,
                computed: false,
            },
            &field.pos,
        )?);
        static_names.push(key_name);
    }

    let metadata = ctx.synthetic(
        NodeKind::ClassMetadata {
            super_class: super_name,
            derived,
            instance_methods,
            static_methods,
            instance_fields: metadata_fields,
            static_fields: static_names,
        },
        &cls.pos,
    )?;

    Ok(ClassNode {
        name: name.to_string(),
        super_class,
        constructor,
        methods: method_ids,
        static_properties,
        metadata,
        prototype,
    })
}

/// `this.<field> = <value>;` for each instance field, in declaration order.
pub(super) fn field_initializers(ctx: &mut LoweringContext, fields: &[&ast::PropertyDefinition]) -> LowerResult<Vec<NodeId>> {
    let mut statements = Vec::with_capacity(fields.len());
    for field in fields {
        let name = member_name(ctx, &field.key, field.computed, &field.pos)?;
        let this = ctx.synthetic(NodeKind::ThisExpression, &field.pos)?;
        let property = ctx.synthetic(NodeKind::StringLiteral { value: name.clone() }, field.key.pos())?;
        let target = ctx.synthetic(
            NodeKind::MemberExpression {
                object: this,
                property,
                computed: false,
            },
            &field.pos,
        )?;
        let value = match &field.value {
            Some(value) => lower_named(ctx, &name, value)?,
            None => ctx.synthetic(NodeKind::UndefinedLiteral, &field.pos)?,
        };
        let assign = ctx.synthetic(
            NodeKind::AssignmentExpression {
                operator: AssignmentOperator::Assign,
                target,
                value,
            },
            &field.pos,
        )?;
        statements.push(ctx.synthetic(NodeKind::ExpressionStatement { expression: assign }, &field.pos)?);
    }
    Ok(statements)
}

fn synthesize_constructor(
    ctx: &mut LoweringContext,
    name: &str,
    derived: bool,
    fields: &[&ast::PropertyDefinition],
    pos: &Pos,
) -> LowerResult<NodeId> {
    let saved = std::mem::take(&mut ctx.pending_temps);
    ctx.enter_function(false);
    let parts = synthesized_parts(ctx, derived, fields, pos);
    ctx.leave_function();
    ctx.pending_temps = saved;
    let (rest, body) = parts?;
    ctx.synthetic(
        NodeKind::FunctionExpression(FunctionNode {
            name: Some(name.to_string()),
            params: Vec::new(),
            rest,
            body,
            is_async: false,
        }),
        pos,
    )
}

fn synthesized_parts(
    ctx: &mut LoweringContext,
    derived: bool,
    fields: &[&ast::PropertyDefinition],
    pos: &Pos,
) -> LowerResult<(Option<NodeId>, NodeId)> {
    let mut statements = Vec::new();
    let mut rest = None;
    if derived {
        // constructor(...args) { super(...args); }
        let args = ctx.synthetic(NodeKind::Parameter { name: "args".into() }, pos)?;
        ctx.scopes.add_binding("args", args);
        rest = Some(ctx.synthetic(NodeKind::RestElement { argument: args }, pos)?);
        let callee = ctx.synthetic(NodeKind::Super, pos)?;
        let forwarded = ctx.synthetic_ident("args", args, pos)?;
        let call = ctx.synthetic(
            NodeKind::CallExpression {
                callee,
                arguments: vec![ListItem::spread(forwarded)],
                has_spread: true,
            },
            pos,
        )?;
        statements.push(ctx.synthetic(NodeKind::ExpressionStatement { expression: call }, pos)?);
    }
    statements.extend(field_initializers(ctx, fields)?);
    if let Some(temps) = ctx.take_pending_declaration(Vec::new(), pos)? {
        statements.insert(0, temps);
    }
    let body = ctx.synthetic(NodeKind::BlockStatement { body: statements }, pos)?;
    Ok((rest, body))
}
