//! Functions, arrows and their parameter lists
//!
//! Parameters are always plain `Parameter` nodes. Defaults become an
//! `if (p === undefined) p = default;` prologue, patterns bind a synthetic
//! parameter that is destructured at the top of the body, and a trailing
//! `...rest` becomes a `RestElement`.

use super::class::field_initializers;
use super::expr::lower_expr;
use super::pattern::declare_lowered;
use super::stmt::{declare_block, directive_prologue, hoist_vars, lower_statements};
use super::scope::FrameKind;
use super::{LowerResult, LoweringContext};
use crate::builder::NodeMeta;
use crate::error::LoweringError;
use crate::node::*;
use crate::types::TypeDescriptor;
use luascript_ast::{self as ast, ArrowBody, Expr, Pattern, Pos};
use tracing::trace;

pub(super) enum Body<'a> {
    Block(&'a ast::BlockStatement),
    Expression(&'a Expr),
}

/// Extra work for class constructors: instance fields are initialised
/// after the `super(...)` call of a derived class, at the top otherwise.
#[derive(Default)]
pub(super) struct ConstructorFields<'a> {
    pub fields: Vec<&'a ast::PropertyDefinition>,
    pub derived: bool,
}

pub(super) struct FunctionParts {
    pub params: Vec<NodeId>,
    pub rest: Option<NodeId>,
    pub body: NodeId,
    pub returns: Option<TypeDescriptor>,
}

impl FunctionParts {
    pub fn into_node(self, name: Option<String>, is_async: bool) -> (FunctionNode, TypeDescriptor) {
        let ty = TypeDescriptor::function(
            vec![TypeDescriptor::any(); self.params.len()],
            self.returns.unwrap_or_else(TypeDescriptor::any),
        );
        let node = FunctionNode {
            name,
            params: self.params,
            rest: self.rest,
            body: self.body,
            is_async,
        };
        (node, ty)
    }
}

fn reject_generator(ctx: &LoweringContext, func: &ast::Function) -> LowerResult<()> {
    if func.generator {
        return Err(LoweringError::unhandled("GeneratorFunction", ctx.span(&func.pos)));
    }
    Ok(())
}

pub(super) fn function_declaration(ctx: &mut LoweringContext, func: &ast::Function) -> LowerResult<NodeId> {
    reject_generator(ctx, func)?;
    let Some(id) = &func.id else {
        return Err(LoweringError::malformed(
            "FunctionDeclaration",
            "function declaration without a name",
            ctx.span(&func.pos),
        ));
    };
    trace!(name = %id.name, "lowering function declaration");

    let reserved = ctx
        .scopes
        .local(&id.name)
        .filter(|reserved| ctx.builder.is_reserved(*reserved));
    let parts = lower_function(ctx, &func.params, Body::Block(&func.body), func.is_async, &func.pos, ConstructorFields::default())?;
    let (node, ty) = parts.into_node(Some(id.name.clone()), func.is_async);
    let kind = NodeKind::FunctionDeclaration(node);

    let declared = match reserved {
        Some(reserved) => {
            let filled = ctx.fill(reserved, kind, &func.pos, false)?;
            ctx.builder.set_type(filled, Some(ty))?;
            filled
        }
        None => {
            let created = ctx.typed(kind, &func.pos, Some(ty))?;
            ctx.scopes.add_binding(&id.name, created);
            created
        }
    };
    Ok(declared)
}

pub(super) fn function_expression(ctx: &mut LoweringContext, func: &ast::Function, hint: Option<&str>) -> LowerResult<NodeId> {
    reject_generator(ctx, func)?;
    let Some(id) = &func.id else {
        let parts = lower_function(ctx, &func.params, Body::Block(&func.body), func.is_async, &func.pos, ConstructorFields::default())?;
        let (node, ty) = parts.into_node(hint.map(str::to_string), func.is_async);
        return ctx.typed(NodeKind::FunctionExpression(node), &func.pos, Some(ty));
    };

    // the name of a function expression is visible only inside it
    let self_id = ctx.builder.reserve()?;
    ctx.scopes.push_scope(FrameKind::Block);
    ctx.scopes.add_binding(&id.name, self_id);
    let parts = lower_function(ctx, &func.params, Body::Block(&func.body), func.is_async, &func.pos, ConstructorFields::default());
    ctx.scopes.pop_scope();
    let (node, ty) = parts?.into_node(Some(id.name.clone()), func.is_async);
    let filled = ctx.fill(self_id, NodeKind::FunctionExpression(node), &func.pos, false)?;
    ctx.builder.set_type(filled, Some(ty))?;
    Ok(filled)
}

pub(super) fn arrow_function(ctx: &mut LoweringContext, arrow: &ast::ArrowFunction, hint: Option<&str>) -> LowerResult<NodeId> {
    let body = match &arrow.body {
        ArrowBody::Block(block) => Body::Block(block),
        ArrowBody::Expression(expr) => Body::Expression(expr),
    };
    let parts = lower_function(ctx, &arrow.params, body, arrow.is_async, &arrow.pos, ConstructorFields::default())?;
    let (node, ty) = parts.into_node(hint.map(str::to_string), arrow.is_async);
    ctx.typed(NodeKind::ArrowFunctionExpression(node), &arrow.pos, Some(ty))
}

/// Lowers parameters and body inside a fresh function scope.
pub(super) fn lower_function(
    ctx: &mut LoweringContext,
    params: &[Pattern],
    body: Body<'_>,
    is_async: bool,
    pos: &Pos,
    constructor: ConstructorFields<'_>,
) -> LowerResult<FunctionParts> {
    let saved = std::mem::take(&mut ctx.pending_temps);
    ctx.enter_function(is_async);
    let lowered = function_inner(ctx, params, body, pos, constructor);
    ctx.leave_function();
    ctx.pending_temps = saved;
    lowered
}

fn function_inner(
    ctx: &mut LoweringContext,
    params: &[Pattern],
    body: Body<'_>,
    pos: &Pos,
    constructor: ConstructorFields<'_>,
) -> LowerResult<FunctionParts> {
    let (param_ids, rest, mut prologue) = lower_params(ctx, params)?;
    let param_temps = ctx.take_pending_declaration(Vec::new(), pos)?;

    let (statements, returns, body_pos) = match body {
        Body::Block(block) => {
            let directives = directive_prologue(&block.body);
            let hoisted = hoist_vars(ctx, &block.body, &block.pos)?;
            declare_block(ctx, &block.body)?;
            let mut statements: Vec<NodeId> = hoisted.into_iter().collect();
            let mut user = lower_statements(ctx, &block.body[directives.len()..])?;
            if !constructor.fields.is_empty() {
                let inits = field_initializers(ctx, &constructor.fields)?;
                let at = if constructor.derived {
                    super_call_position(ctx, &user).map_or(0, |i| i + 1)
                } else {
                    0
                };
                user.splice(at..at, inits);
            }
            statements.extend(user);
            (statements, None, block.pos.clone())
        }
        Body::Expression(expr) => {
            let value = lower_expr(ctx, expr)?;
            let returns = ctx.type_of(value);
            let ret = ctx.synthetic(NodeKind::ReturnStatement { argument: Some(value) }, expr.pos())?;
            let mut statements = Vec::new();
            if let Some(temps) = ctx.take_pending_declaration(Vec::new(), expr.pos())? {
                statements.push(temps);
            }
            statements.push(ret);
            (statements, returns, expr.pos().clone())
        }
    };

    let mut all: Vec<NodeId> = param_temps.into_iter().collect();
    all.append(&mut prologue);
    all.extend(statements);
    let body = ctx.synthetic(NodeKind::BlockStatement { body: all }, &body_pos)?;
    Ok(FunctionParts {
        params: param_ids,
        rest,
        body,
        returns,
    })
}

/// Index of the top-level `super(...)` statement, if any.
fn super_call_position(ctx: &LoweringContext, statements: &[NodeId]) -> Option<usize> {
    statements.iter().position(|stmt| {
        let Some(NodeKind::ExpressionStatement { expression }) = ctx.builder.kind(*stmt) else {
            return false;
        };
        let Some(NodeKind::CallExpression { callee, .. }) = ctx.builder.kind(*expression) else {
            return false;
        };
        matches!(ctx.builder.kind(*callee), Some(NodeKind::Super))
    })
}

fn declare_param(ctx: &mut LoweringContext, name: &str, pos: &Pos, synthetic: bool) -> LowerResult<NodeId> {
    let kind = NodeKind::Parameter {
        name: name.to_string(),
    };
    let id = if synthetic {
        ctx.synthetic(kind, pos)?
    } else {
        ctx.node(kind, pos)?
    };
    ctx.scopes.add_binding(name, id);
    Ok(id)
}

type Params = (Vec<NodeId>, Option<NodeId>, Vec<NodeId>);

fn lower_params(ctx: &mut LoweringContext, params: &[Pattern]) -> LowerResult<Params> {
    let mut ids = Vec::with_capacity(params.len());
    let mut rest = None;
    let mut prologue = Vec::new();

    for (index, param) in params.iter().enumerate() {
        match param {
            Pattern::Identifier(id) => ids.push(declare_param(ctx, &id.name, &id.pos, false)?),
            Pattern::AssignmentPattern(assign) => match assign.left.as_ref() {
                Pattern::Identifier(id) => {
                    let param = declare_param(ctx, &id.name, &id.pos, false)?;
                    ids.push(param);
                    prologue.push(default_param(ctx, &id.name, param, &assign.right, &assign.pos)?);
                }
                pattern => {
                    let name = ctx.fresh_name("param");
                    let param = declare_param(ctx, &name, &assign.pos, true)?;
                    ids.push(param);
                    prologue.push(default_param(ctx, &name, param, &assign.right, &assign.pos)?);
                    let value = ctx.synthetic_ident(&name, param, pattern.pos())?;
                    prologue.push(declare_lowered(ctx, pattern, value, DeclarationKind::Let, pattern.pos())?);
                }
            },
            Pattern::RestElement(rest_param) => {
                if index + 1 != params.len() {
                    return Err(LoweringError::malformed(
                        "RestElement",
                        "rest parameter must be last",
                        ctx.span(&rest_param.pos),
                    ));
                }
                let param = match rest_param.argument.as_ref() {
                    Pattern::Identifier(id) => declare_param(ctx, &id.name, &id.pos, false)?,
                    pattern => {
                        let name = ctx.fresh_name("rest");
                        let param = declare_param(ctx, &name, pattern.pos(), true)?;
                        let value = ctx.synthetic_ident(&name, param, pattern.pos())?;
                        prologue.push(declare_lowered(ctx, pattern, value, DeclarationKind::Let, pattern.pos())?);
                        param
                    }
                };
                rest = Some(ctx.node(NodeKind::RestElement { argument: param }, &rest_param.pos)?);
            }
            Pattern::ObjectPattern(_) | Pattern::ArrayPattern(_) => {
                let name = ctx.fresh_name("param");
                let param_id = declare_param(ctx, &name, param.pos(), true)?;
                ids.push(param_id);
                let value = ctx.synthetic_ident(&name, param_id, param.pos())?;
                prologue.push(declare_lowered(ctx, param, value, DeclarationKind::Let, param.pos())?);
            }
            Pattern::MemberExpression(member) => {
                return Err(LoweringError::malformed(
                    "Parameter",
                    "member expression in parameter position",
                    ctx.span(&member.pos),
                ));
            }
        }
    }
    Ok((ids, rest, prologue))
}

/// `if (name === undefined) { name = fallback; }`
fn default_param(
    ctx: &mut LoweringContext,
    name: &str,
    param: NodeId,
    fallback: &Expr,
    pos: &Pos,
) -> LowerResult<NodeId> {
    let tested = ctx.synthetic_ident(name, param, pos)?;
    let undefined = ctx.synthetic(NodeKind::UndefinedLiteral, pos)?;
    let test = ctx.synthetic(
        NodeKind::BinaryExpression {
            operator: BinaryOperator::StrictEq,
            left: tested,
            right: undefined,
        },
        pos,
    )?;
    let value = lower_expr(ctx, fallback)?;
    let target = ctx.synthetic_ident(name, param, pos)?;
    let meta = NodeMeta::synthetic(ctx.span(pos)).typed(ctx.type_of(value));
    let assign = ctx
        .builder
        .create_node_with(
            NodeKind::AssignmentExpression {
                operator: AssignmentOperator::Assign,
                target,
                value,
            },
            meta,
        )?
        .id;
    let stmt = ctx.synthetic(NodeKind::ExpressionStatement { expression: assign }, pos)?;
    let block = ctx.synthetic(NodeKind::BlockStatement { body: vec![stmt] }, pos)?;
    ctx.synthetic(
        NodeKind::IfStatement {
            test,
            consequent: block,
            alternate: None,
        },
        pos,
    )
}
