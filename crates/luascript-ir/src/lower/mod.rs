//! Lowering AST → IR
//!
//! Walks an ESTree [`Program`] once, resolving every identifier against a
//! scope stack and desugaring the high-level forms (destructuring, for-of,
//! classes, default and rest parameters) into the closed IR node set.
//!
//! Declarations are handled in two steps: on entry to a block every
//! `let`/`const`/`class`/`function` name gets a reserved node id, and the
//! node is filled in when the declaration itself is reached. `var`
//! declarations are hoisted into a synthetic declaration at the top of the
//! enclosing function and their sites become assignments.

mod class;
mod expr;
mod function;
mod pattern;
pub mod scope;
mod stmt;

use crate::builder::{BuildOptions, IrBuilder, NodeMeta};
use crate::error::LoweringError;
use crate::module::Module;
use crate::node::{DeclarationKind, NodeId, NodeKind};
use crate::types::TypeDescriptor;
use luascript_ast::{Pos, Program};
use luascript_error::Span;
use scope::{FrameKind, ScopeStack};
use std::collections::{HashMap, HashSet};
use tracing::debug;

pub type LowerResult<T> = Result<T, LoweringError>;

#[derive(Debug, Clone, Default)]
pub struct LowerOptions {
    pub build: BuildOptions,
    /// File id stamped on every span
    pub file_id: u32,
    /// Recorded as `metadata.source`
    pub source_name: Option<String>,
}

/// Per-function state: what `return`, `await`, `break` and `continue` may
/// refer to.
#[derive(Debug, Clone, Copy, Default)]
struct FunctionContext {
    in_function: bool,
    is_async: bool,
    loop_depth: u32,
    switch_depth: u32,
}

pub struct LoweringContext {
    pub(crate) builder: IrBuilder,
    pub(crate) scopes: ScopeStack,
    file_id: u32,
    functions: Vec<FunctionContext>,
    /// Temporaries introduced inside the current statement; declared right
    /// before it
    pending_temps: Vec<NodeId>,
    temp_counter: u32,
    constants: HashSet<NodeId>,
    binding_types: HashMap<NodeId, TypeDescriptor>,
}

impl LoweringContext {
    pub fn new(file_id: u32) -> Self {
        Self {
            builder: IrBuilder::new(),
            scopes: ScopeStack::new(),
            file_id,
            functions: vec![FunctionContext::default()],
            pending_temps: Vec::new(),
            temp_counter: 0,
            constants: HashSet::new(),
            binding_types: HashMap::new(),
        }
    }

    fn span(&self, pos: &Pos) -> Option<Span> {
        pos.span(self.file_id)
    }

    /// Creates a node written in the source at `pos`.
    fn node(&mut self, kind: NodeKind, pos: &Pos) -> LowerResult<NodeId> {
        let meta = NodeMeta::at(self.span(pos));
        Ok(self.builder.create_node_with(kind, meta)?.id)
    }

    fn typed(&mut self, kind: NodeKind, pos: &Pos, ty: Option<TypeDescriptor>) -> LowerResult<NodeId> {
        let meta = NodeMeta::at(self.span(pos)).typed(ty);
        Ok(self.builder.create_node_with(kind, meta)?.id)
    }

    /// Creates a node introduced by desugaring.
    fn synthetic(&mut self, kind: NodeKind, pos: &Pos) -> LowerResult<NodeId> {
        let meta = NodeMeta::synthetic(self.span(pos));
        Ok(self.builder.create_node_with(kind, meta)?.id)
    }

    fn fill(&mut self, id: NodeId, kind: NodeKind, pos: &Pos, synthetic: bool) -> LowerResult<NodeId> {
        let meta = NodeMeta {
            span: self.span(pos),
            ty: None,
            synthetic,
        };
        Ok(self.builder.fill_with(id, kind, meta)?.id)
    }

    fn type_of(&self, id: NodeId) -> Option<TypeDescriptor> {
        self.builder.node(id).and_then(|n| n.ty.clone())
    }

    fn fresh_name(&mut self, prefix: &str) -> String {
        let name = format!("__{prefix}{}", self.temp_counter);
        self.temp_counter += 1;
        name
    }

    /// Identifier bound to a node the lowering itself created.
    fn synthetic_ident(&mut self, name: &str, binding: NodeId, pos: &Pos) -> LowerResult<NodeId> {
        let ty = self.binding_types.get(&binding).cloned();
        let meta = NodeMeta::synthetic(self.span(pos)).typed(ty);
        let kind = NodeKind::Identifier {
            name: name.to_string(),
            binding: Some(binding),
        };
        Ok(self.builder.create_node_with(kind, meta)?.id)
    }

    /// Declares a temporary whose `let` is emitted before the current
    /// statement.
    fn pending_temp(&mut self, pos: &Pos) -> LowerResult<(String, NodeId)> {
        let name = self.fresh_name("tmp");
        let id = self.synthetic(
            NodeKind::VariableDeclarator {
                name: name.clone(),
                init: None,
            },
            pos,
        )?;
        self.pending_temps.push(id);
        Ok((name, id))
    }

    fn take_pending_declaration(&mut self, saved: Vec<NodeId>, pos: &Pos) -> LowerResult<Option<NodeId>> {
        let temps = std::mem::replace(&mut self.pending_temps, saved);
        if temps.is_empty() {
            return Ok(None);
        }
        let declaration = self.synthetic(
            NodeKind::VariableDeclaration {
                declaration_kind: DeclarationKind::Let,
                declarations: temps,
            },
            pos,
        )?;
        Ok(Some(declaration))
    }

    fn current(&self) -> FunctionContext {
        self.functions.last().copied().unwrap_or_default()
    }

    fn current_mut(&mut self) -> &mut FunctionContext {
        if self.functions.is_empty() {
            self.functions.push(FunctionContext::default());
        }
        let last = self.functions.len() - 1;
        &mut self.functions[last]
    }

    fn enter_function(&mut self, is_async: bool) {
        self.functions.push(FunctionContext {
            in_function: true,
            is_async,
            loop_depth: 0,
            switch_depth: 0,
        });
        self.scopes.push_scope(FrameKind::Function);
    }

    fn leave_function(&mut self) {
        self.scopes.pop_scope();
        if self.functions.len() > 1 {
            self.functions.pop();
        }
    }

    fn record_binding_type(&mut self, binding: NodeId, ty: Option<TypeDescriptor>) {
        match ty {
            Some(ty) => {
                self.binding_types.insert(binding, ty);
            }
            None => {
                self.binding_types.remove(&binding);
            }
        }
    }
}

/// Lowers a program with default options: fresh ids from 1, validation on.
pub fn lower(program: &Program) -> LowerResult<Module> {
    lower_with(program, &LowerOptions::default())
}

pub fn lower_with(program: &Program, options: &LowerOptions) -> LowerResult<Module> {
    let mut ctx = LoweringContext::new(options.file_id);
    if let Some(source) = &options.source_name {
        ctx.builder.set_source(source.clone());
    }

    let directives = stmt::directive_prologue(&program.body);
    for directive in &directives {
        ctx.builder.add_directive(directive.clone());
    }

    let hoisted = stmt::hoist_vars(&mut ctx, &program.body, &program.pos)?;
    stmt::declare_block(&mut ctx, &program.body)?;
    let mut body: Vec<NodeId> = hoisted.into_iter().collect();
    body.extend(stmt::lower_statements(&mut ctx, &program.body[directives.len()..])?);

    debug!(
        statements = program.body.len(),
        nodes = ctx.builder.len(),
        "lowered program"
    );
    ctx.builder.set_body(body);
    Ok(ctx.builder.build(&options.build)?)
}

#[cfg(test)]
mod tests;
