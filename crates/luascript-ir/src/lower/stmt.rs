//! Statement lowering

use super::expr::lower_expr;
use super::pattern::{assign_lowered, assign_pattern, declare_lowered, declare_name, lexical_declaration, pattern_names};
use super::scope::FrameKind;
use super::{class, function, LowerResult, LoweringContext};
use crate::error::LoweringError;
use crate::node::*;
use luascript_ast::{self as ast, ForHead, ForInit, Pattern, Pos, Stmt, VarKind};
use std::slice;

/// Leading `"use strict"`-style directives of a body.
pub(super) fn directive_prologue(body: &[Stmt]) -> Vec<String> {
    body.iter()
        .map_while(|stmt| match stmt {
            Stmt::ExpressionStatement(expr) => expr.directive.clone(),
            _ => None,
        })
        .collect()
}

fn declaration_kind(kind: VarKind) -> DeclarationKind {
    match kind {
        VarKind::Var => DeclarationKind::Var,
        VarKind::Let => DeclarationKind::Let,
        VarKind::Const => DeclarationKind::Const,
    }
}

/// Names declared with `var` anywhere in `stmts`, nested functions
/// excluded.
fn collect_var_names(stmts: &[Stmt], names: &mut Vec<String>) {
    fn var_decl(decl: &ast::VariableDeclaration, names: &mut Vec<String>) {
        if decl.kind == VarKind::Var {
            for declarator in &decl.declarations {
                pattern_names(&declarator.id, names);
            }
        }
    }
    for stmt in stmts {
        match stmt {
            Stmt::VariableDeclaration(decl) => var_decl(decl, names),
            Stmt::BlockStatement(block) => collect_var_names(&block.body, names),
            Stmt::IfStatement(if_stmt) => {
                collect_var_names(slice::from_ref(if_stmt.consequent.as_ref()), names);
                if let Some(alternate) = &if_stmt.alternate {
                    collect_var_names(slice::from_ref(alternate.as_ref()), names);
                }
            }
            Stmt::ForStatement(for_stmt) => {
                if let Some(ForInit::Declaration(decl)) = &for_stmt.init {
                    var_decl(decl, names);
                }
                collect_var_names(slice::from_ref(for_stmt.body.as_ref()), names);
            }
            Stmt::ForInStatement(ast::ForInStatement { left, body, .. })
            | Stmt::ForOfStatement(ast::ForOfStatement { left, body, .. }) => {
                if let ForHead::Declaration(decl) = left {
                    var_decl(decl, names);
                }
                collect_var_names(slice::from_ref(body.as_ref()), names);
            }
            Stmt::WhileStatement(loop_stmt) | Stmt::DoWhileStatement(loop_stmt) => {
                collect_var_names(slice::from_ref(loop_stmt.body.as_ref()), names);
            }
            Stmt::TryStatement(try_stmt) => {
                collect_var_names(&try_stmt.block.body, names);
                if let Some(handler) = &try_stmt.handler {
                    collect_var_names(&handler.body.body, names);
                }
                if let Some(finalizer) = &try_stmt.finalizer {
                    collect_var_names(&finalizer.body, names);
                }
            }
            Stmt::SwitchStatement(switch) => {
                for case in &switch.cases {
                    collect_var_names(&case.consequent, names);
                }
            }
            _ => {}
        }
    }
}

/// Declares every `var` of a function (or program) body up front and
/// returns the synthetic declaration holding them.
pub(super) fn hoist_vars(ctx: &mut LoweringContext, body: &[Stmt], pos: &Pos) -> LowerResult<Option<NodeId>> {
    let mut names = Vec::new();
    collect_var_names(body, &mut names);

    let function_names: Vec<&str> = body
        .iter()
        .filter_map(|stmt| match stmt {
            Stmt::FunctionDeclaration(func) => func.id.as_ref().map(|id| id.name.as_str()),
            _ => None,
        })
        .collect();

    let mut declarators = Vec::new();
    let mut seen = Vec::new();
    for name in names {
        if seen.contains(&name) || function_names.contains(&name.as_str()) || ctx.scopes.local(&name).is_some() {
            continue;
        }
        let id = ctx.synthetic(
            NodeKind::VariableDeclarator {
                name: name.clone(),
                init: None,
            },
            pos,
        )?;
        ctx.scopes.add_function_binding(&name, id);
        seen.push(name);
        declarators.push(id);
    }
    if declarators.is_empty() {
        return Ok(None);
    }
    Ok(Some(ctx.synthetic(
        NodeKind::VariableDeclaration {
            declaration_kind: DeclarationKind::Var,
            declarations: declarators,
        },
        pos,
    )?))
}

/// Reserves ids for the block-scoped declarations of `stmts` so they can
/// be referenced before their declaration is lowered.
pub(super) fn declare_block(ctx: &mut LoweringContext, stmts: &[Stmt]) -> LowerResult<()> {
    let mut names = Vec::new();
    for stmt in stmts {
        match stmt {
            Stmt::VariableDeclaration(decl) if decl.kind != VarKind::Var => {
                for declarator in &decl.declarations {
                    pattern_names(&declarator.id, &mut names);
                }
            }
            Stmt::FunctionDeclaration(func) => {
                if let Some(id) = &func.id {
                    names.push(id.name.clone());
                }
            }
            Stmt::ClassDeclaration(cls) => {
                if let Some(id) = &cls.id {
                    names.push(id.name.clone());
                }
            }
            _ => {}
        }
    }
    for name in names {
        let already_reserved = ctx
            .scopes
            .local(&name)
            .is_some_and(|id| ctx.builder.is_reserved(id));
        if !already_reserved {
            let id = ctx.builder.reserve()?;
            ctx.scopes.add_binding(&name, id);
        }
    }
    Ok(())
}

/// Lowers a statement list. Temporaries introduced by a statement are
/// declared right before it.
pub(super) fn lower_statements(ctx: &mut LoweringContext, stmts: &[Stmt]) -> LowerResult<Vec<NodeId>> {
    let mut out = Vec::with_capacity(stmts.len());
    for stmt in stmts {
        let saved = std::mem::take(&mut ctx.pending_temps);
        let mut lowered = Vec::new();
        lower_stmt(ctx, stmt, &mut lowered)?;
        if let Some(temps) = ctx.take_pending_declaration(saved, stmt.pos())? {
            out.push(temps);
        }
        out.extend(lowered);
    }
    Ok(out)
}

/// A `{ ... }` block with its own scope.
pub(super) fn lower_block(ctx: &mut LoweringContext, block: &ast::BlockStatement) -> LowerResult<NodeId> {
    lower_block_with(ctx, &block.body, Vec::new(), &block.pos, false)
}

/// Body of a statement list in a fresh scope, after `prefix`.
pub(super) fn lower_block_with(
    ctx: &mut LoweringContext,
    stmts: &[Stmt],
    mut prefix: Vec<NodeId>,
    pos: &Pos,
    synthetic: bool,
) -> LowerResult<NodeId> {
    ctx.scopes.push_scope(FrameKind::Block);
    let lowered = declare_block(ctx, stmts).and_then(|_| lower_statements(ctx, stmts));
    ctx.scopes.pop_scope();
    prefix.extend(lowered?);
    let kind = NodeKind::BlockStatement { body: prefix };
    if synthetic {
        ctx.synthetic(kind, pos)
    } else {
        ctx.node(kind, pos)
    }
}

/// Loop and branch bodies always become blocks.
fn lower_body(ctx: &mut LoweringContext, stmt: &Stmt, prefix: Vec<NodeId>) -> LowerResult<NodeId> {
    match stmt {
        Stmt::BlockStatement(block) => lower_block_with(ctx, &block.body, prefix, &block.pos, false),
        other => lower_block_with(ctx, slice::from_ref(other), prefix, other.pos(), true),
    }
}

fn in_loop<T>(ctx: &mut LoweringContext, f: impl FnOnce(&mut LoweringContext) -> LowerResult<T>) -> LowerResult<T> {
    ctx.current_mut().loop_depth += 1;
    let result = f(ctx);
    ctx.current_mut().loop_depth -= 1;
    result
}

/// `var` declarators with an initializer become assignments.
fn var_assignments(ctx: &mut LoweringContext, decl: &ast::VariableDeclaration) -> LowerResult<Vec<NodeId>> {
    let mut assignments = Vec::new();
    for declarator in &decl.declarations {
        if let Some(init) = &declarator.init {
            assignments.push(assign_pattern(ctx, &declarator.id, init, &declarator.pos)?);
        }
    }
    Ok(assignments)
}

fn lower_stmt(ctx: &mut LoweringContext, stmt: &Stmt, out: &mut Vec<NodeId>) -> LowerResult<()> {
    let id = match stmt {
        Stmt::ExpressionStatement(expr_stmt) => {
            let expression = lower_expr(ctx, &expr_stmt.expression)?;
            ctx.node(NodeKind::ExpressionStatement { expression }, &expr_stmt.pos)?
        }
        Stmt::BlockStatement(block) => lower_block(ctx, block)?,
        Stmt::EmptyStatement(empty) => ctx.node(NodeKind::EmptyStatement, &empty.pos)?,
        Stmt::VariableDeclaration(decl) => match decl.kind {
            VarKind::Var => {
                for expression in var_assignments(ctx, decl)? {
                    out.push(ctx.node(NodeKind::ExpressionStatement { expression }, &decl.pos)?);
                }
                return Ok(());
            }
            kind => lexical_declaration(ctx, decl, declaration_kind(kind))?,
        },
        Stmt::FunctionDeclaration(func) => function::function_declaration(ctx, func)?,
        Stmt::ClassDeclaration(cls) => class::class_declaration(ctx, cls)?,
        Stmt::ReturnStatement(ret) => {
            if !ctx.current().in_function {
                return Err(LoweringError::malformed(
                    "ReturnStatement",
                    "return outside of a function",
                    ctx.span(&ret.pos),
                ));
            }
            let argument = ret.argument.as_ref().map(|e| lower_expr(ctx, e)).transpose()?;
            ctx.node(NodeKind::ReturnStatement { argument }, &ret.pos)?
        }
        Stmt::IfStatement(if_stmt) => {
            let test = lower_expr(ctx, &if_stmt.test)?;
            let consequent = lower_body(ctx, &if_stmt.consequent, Vec::new())?;
            let alternate = match if_stmt.alternate.as_deref() {
                None => None,
                // keep `else if` chains flat
                Some(nested @ Stmt::IfStatement(_)) => {
                    let mut chained = Vec::new();
                    lower_stmt(ctx, nested, &mut chained)?;
                    chained.pop()
                }
                Some(other) => Some(lower_body(ctx, other, Vec::new())?),
            };
            ctx.node(
                NodeKind::IfStatement {
                    test,
                    consequent,
                    alternate,
                },
                &if_stmt.pos,
            )?
        }
        Stmt::ForStatement(for_stmt) => {
            ctx.scopes.push_scope(FrameKind::Block);
            let lowered = lower_for(ctx, for_stmt);
            ctx.scopes.pop_scope();
            lowered?
        }
        Stmt::ForInStatement(for_in) => {
            lower_for_each(ctx, IterationKind::Keys, &for_in.left, &for_in.right, &for_in.body, &for_in.pos)?
        }
        Stmt::ForOfStatement(for_of) => {
            if for_of.is_await {
                return Err(LoweringError::unhandled("ForAwaitStatement", ctx.span(&for_of.pos)));
            }
            lower_for_each(ctx, IterationKind::Values, &for_of.left, &for_of.right, &for_of.body, &for_of.pos)?
        }
        Stmt::WhileStatement(loop_stmt) => {
            let test = lower_expr(ctx, &loop_stmt.test)?;
            let body = in_loop(ctx, |ctx| lower_body(ctx, &loop_stmt.body, Vec::new()))?;
            ctx.node(NodeKind::WhileStatement { test, body }, &loop_stmt.pos)?
        }
        Stmt::DoWhileStatement(loop_stmt) => {
            let body = in_loop(ctx, |ctx| lower_body(ctx, &loop_stmt.body, Vec::new()))?;
            let test = lower_expr(ctx, &loop_stmt.test)?;
            ctx.node(NodeKind::DoWhileStatement { body, test }, &loop_stmt.pos)?
        }
        Stmt::BreakStatement(jump) => {
            let current = ctx.current();
            if jump.label.is_some() {
                return Err(LoweringError::unhandled("LabeledBreak", ctx.span(&jump.pos)));
            }
            if current.loop_depth == 0 && current.switch_depth == 0 {
                return Err(LoweringError::malformed(
                    "BreakStatement",
                    "break outside of a loop or switch",
                    ctx.span(&jump.pos),
                ));
            }
            ctx.node(NodeKind::BreakStatement, &jump.pos)?
        }
        Stmt::ContinueStatement(jump) => {
            if jump.label.is_some() {
                return Err(LoweringError::unhandled("LabeledContinue", ctx.span(&jump.pos)));
            }
            if ctx.current().loop_depth == 0 {
                return Err(LoweringError::malformed(
                    "ContinueStatement",
                    "continue outside of a loop",
                    ctx.span(&jump.pos),
                ));
            }
            ctx.node(NodeKind::ContinueStatement, &jump.pos)?
        }
        Stmt::ThrowStatement(throw) => {
            let argument = lower_expr(ctx, &throw.argument)?;
            ctx.node(NodeKind::ThrowStatement { argument }, &throw.pos)?
        }
        Stmt::TryStatement(try_stmt) => lower_try(ctx, try_stmt)?,
        Stmt::SwitchStatement(switch) => lower_switch(ctx, switch)?,
        other => return Err(LoweringError::unhandled(other.type_name(), ctx.span(other.pos()))),
    };
    out.push(id);
    Ok(())
}

fn lower_for(ctx: &mut LoweringContext, for_stmt: &ast::ForStatement) -> LowerResult<NodeId> {
    let init = match &for_stmt.init {
        None => None,
        Some(ForInit::Declaration(decl)) if decl.kind == VarKind::Var => {
            let mut assignments = var_assignments(ctx, decl)?;
            match assignments.len() {
                0 => None,
                1 => assignments.pop(),
                _ => Some(ctx.synthetic(
                    NodeKind::SequenceExpression {
                        expressions: assignments,
                    },
                    &decl.pos,
                )?),
            }
        }
        Some(ForInit::Declaration(decl)) => Some(lexical_declaration(ctx, decl, declaration_kind(decl.kind))?),
        Some(ForInit::Expression(expr)) => Some(lower_expr(ctx, expr)?),
    };
    let test = for_stmt.test.as_ref().map(|e| lower_expr(ctx, e)).transpose()?;
    let update = for_stmt.update.as_ref().map(|e| lower_expr(ctx, e)).transpose()?;
    let body = in_loop(ctx, |ctx| lower_body(ctx, &for_stmt.body, Vec::new()))?;
    ctx.node(
        NodeKind::ForStatement {
            init,
            test,
            update,
            body,
        },
        &for_stmt.pos,
    )
}

/// `for-of` / `for-in` → `ForEachStatement` with a fresh declarator per
/// iteration. Heads that are not a plain `let`/`const` name bind a
/// synthetic item and destructure or assign it at the top of the body.
fn lower_for_each(
    ctx: &mut LoweringContext,
    iterate: IterationKind,
    left: &ForHead,
    right: &ast::Expr,
    body: &Stmt,
    pos: &Pos,
) -> LowerResult<NodeId> {
    let iterable = lower_expr(ctx, right)?;
    ctx.scopes.push_scope(FrameKind::Block);
    let lowered = for_each_parts(ctx, left, body, pos);
    ctx.scopes.pop_scope();
    let (binding, body) = lowered?;
    ctx.node(
        NodeKind::ForEachStatement {
            iterate,
            binding,
            iterable,
            body,
        },
        pos,
    )
}

fn for_each_parts(ctx: &mut LoweringContext, left: &ForHead, body: &Stmt, pos: &Pos) -> LowerResult<(NodeId, NodeId)> {
    let (kind, target) = match left {
        ForHead::Declaration(decl) => {
            let [declarator] = decl.declarations.as_slice() else {
                return Err(LoweringError::malformed(
                    "ForEachStatement",
                    "loop head must declare exactly one binding",
                    ctx.span(&decl.pos),
                ));
            };
            if declarator.init.is_some() {
                return Err(LoweringError::malformed(
                    "ForEachStatement",
                    "loop head binding cannot have an initializer",
                    ctx.span(&declarator.pos),
                ));
            }
            (Some(declaration_kind(decl.kind)), &declarator.id)
        }
        ForHead::Pattern(pattern) => (None, pattern),
    };

    let mut prefix = Vec::new();
    let binding = match (kind, target) {
        (Some(kind @ (DeclarationKind::Let | DeclarationKind::Const)), Pattern::Identifier(id)) => {
            declare_name(ctx, &id.name, None, kind, &id.pos, false)?
        }
        (Some(kind @ (DeclarationKind::Let | DeclarationKind::Const)), pattern) => {
            let (name, item) = item_declarator(ctx, pos)?;
            let value = ctx.synthetic_ident(&name, item, pattern.pos())?;
            prefix.push(declare_lowered(ctx, pattern, value, kind, pattern.pos())?);
            item
        }
        (_, pattern) => {
            let (name, item) = item_declarator(ctx, pos)?;
            let value = ctx.synthetic_ident(&name, item, pattern.pos())?;
            let expression = assign_lowered(ctx, pattern, value, pattern.pos())?;
            prefix.push(ctx.synthetic(NodeKind::ExpressionStatement { expression }, pattern.pos())?);
            item
        }
    };
    let body = in_loop(ctx, |ctx| lower_body(ctx, body, prefix))?;
    Ok((binding, body))
}

fn item_declarator(ctx: &mut LoweringContext, pos: &Pos) -> LowerResult<(String, NodeId)> {
    let name = ctx.fresh_name("item");
    let id = ctx.synthetic(
        NodeKind::VariableDeclarator {
            name: name.clone(),
            init: None,
        },
        pos,
    )?;
    Ok((name, id))
}

fn lower_try(ctx: &mut LoweringContext, try_stmt: &ast::TryStatement) -> LowerResult<NodeId> {
    let block = lower_block(ctx, &try_stmt.block)?;
    let handler = match &try_stmt.handler {
        None => None,
        Some(handler) => {
            ctx.scopes.push_scope(FrameKind::Block);
            let lowered = lower_catch(ctx, handler);
            ctx.scopes.pop_scope();
            Some(lowered?)
        }
    };
    let finalizer = try_stmt.finalizer.as_ref().map(|f| lower_block(ctx, f)).transpose()?;
    ctx.node(
        NodeKind::TryStatement {
            block,
            handler,
            finalizer,
        },
        &try_stmt.pos,
    )
}

fn lower_catch(ctx: &mut LoweringContext, handler: &ast::CatchClause) -> LowerResult<NodeId> {
    let mut prefix = Vec::new();
    let param = match &handler.param {
        None => None,
        Some(Pattern::Identifier(id)) => {
            let param = ctx.node(NodeKind::Parameter { name: id.name.clone() }, &id.pos)?;
            ctx.scopes.add_binding(&id.name, param);
            Some(param)
        }
        Some(pattern) => {
            let name = ctx.fresh_name("err");
            let param = ctx.synthetic(NodeKind::Parameter { name: name.clone() }, pattern.pos())?;
            let value = ctx.synthetic_ident(&name, param, pattern.pos())?;
            prefix.push(declare_lowered(ctx, pattern, value, DeclarationKind::Let, pattern.pos())?);
            Some(param)
        }
    };
    let body = lower_block_with(ctx, &handler.body.body, prefix, &handler.body.pos, false)?;
    ctx.node(NodeKind::CatchClause { param, body }, &handler.pos)
}

fn lower_switch(ctx: &mut LoweringContext, switch: &ast::SwitchStatement) -> LowerResult<NodeId> {
    let discriminant = lower_expr(ctx, &switch.discriminant)?;
    ctx.scopes.push_scope(FrameKind::Block);
    ctx.current_mut().switch_depth += 1;
    let cases = lower_cases(ctx, &switch.cases);
    ctx.current_mut().switch_depth -= 1;
    ctx.scopes.pop_scope();
    let cases = cases?;
    ctx.node(NodeKind::SwitchStatement { discriminant, cases }, &switch.pos)
}

fn lower_cases(ctx: &mut LoweringContext, cases: &[ast::SwitchCase]) -> LowerResult<Vec<NodeId>> {
    for case in cases {
        declare_block(ctx, &case.consequent)?;
    }
    let mut lowered = Vec::with_capacity(cases.len());
    for case in cases {
        let test = case.test.as_ref().map(|t| lower_expr(ctx, t)).transpose()?;
        let consequent = lower_statements(ctx, &case.consequent)?;
        lowered.push(ctx.node(NodeKind::SwitchCase { test, consequent }, &case.pos)?);
    }
    Ok(lowered)
}
