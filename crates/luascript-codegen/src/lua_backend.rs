//! Lua code generation backend
//!
//! Generates readable Lua 5.4 (or 5.1) source from the IR. Emission is a
//! single depth-first walk over the frozen module; every problem is
//! collected as a [`BackendError`] and no text is returned if any occur.
//!
//! Mapping highlights:
//! - `+` on strings becomes `..`, `===`/`!==` become `==`/`~=`
//! - arrays are 1-based, so numeric indexes get `+ 1`
//! - classes are tables with an `__index` chain; `new C()` is `C.new()`
//! - method calls on values use `:` so the receiver arrives as `self`
//! - `try` runs its block through `pcall`, `throw` is `error(v, 0)`
//! - runtime helpers (`__ls_*`) are prepended only when used

use crate::error::BackendError;
use crate::support::{block_body, global_number, lookup, unsupported, Emitter};
use crate::{Artifact, CodeGen, CompileOptions, CompileOutput, LuaOptions, LuaVersion, Target};
use luascript_ir::node::{
    AssignmentOperator, BinaryOperator, ClassNode, FunctionNode, IterationKind, ListItem, LogicalOperator,
    MethodKind, UnaryOperator, UpdateOperator,
};
use luascript_ir::{Module, Node, NodeId, NodeKind};
use std::collections::BTreeSet;
use tracing::debug;

const BACKEND: &str = "lua";

const LUA_KEYWORDS: &[&str] = &[
    "and", "break", "do", "else", "elseif", "end", "false", "for", "function", "goto", "if", "in", "local", "nil",
    "not", "or", "repeat", "return", "then", "true", "until", "while",
];

/// Lua backend
#[derive(Debug, Clone, Default)]
pub struct LuaBackend {
    options: LuaOptions,
    debug_info: bool,
}

impl LuaBackend {
    pub fn new(options: &CompileOptions) -> Self {
        Self {
            options: options.lua.clone(),
            debug_info: options.debug_info,
        }
    }

    pub fn emit(&self, module: &Module) -> Result<String, Vec<BackendError>> {
        let mut gen = LuaGen::new(module, &self.options, self.debug_info);
        gen.statements(module.body());
        gen.finish()
    }
}

impl CodeGen for LuaBackend {
    fn target(&self) -> Target {
        Target::Lua
    }

    fn compile(&self, module: &Module) -> CompileOutput {
        let result = self.emit(module);
        match &result {
            Ok(text) => debug!(bytes = text.len(), version = self.options.version.as_str(), "lua emission finished"),
            Err(errors) => debug!(errors = errors.len(), "lua emission failed"),
        }
        CompileOutput::from_result(Target::Lua, result.map(Artifact::Text))
    }
}

/// Runtime support functions, emitted in this order ahead of the program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Helper {
    Assign,
    InstanceOf,
    Await,
    Slice,
    TypeOf,
}

impl Helper {
    fn source(&self, version: LuaVersion) -> &'static str {
        match self {
            Helper::Assign => {
                "local function __ls_assign(target, ...)
    for i = 1, select(\"#\", ...) do
        local source = select(i, ...)
        if source ~= nil then
            for k, v in pairs(source) do
                target[k] = v
            end
        end
    end
    return target
end
"
            }
            Helper::InstanceOf => {
                "local function __ls_instanceof(value, class)
    if type(value) ~= \"table\" then
        return false
    end
    local mt = getmetatable(value)
    while mt ~= nil do
        if mt == class then
            return true
        end
        local parent = getmetatable(mt)
        mt = parent and parent.__index or nil
    end
    return false
end
"
            }
            Helper::Await => match version {
                LuaVersion::Lua54 => {
                    "local function __ls_await(value)
    if coroutine.isyieldable() then
        return coroutine.yield(value)
    end
    return value
end
"
                }
                LuaVersion::Lua51 => {
                    "local function __ls_await(value)
    if coroutine.running() then
        return coroutine.yield(value)
    end
    return value
end
"
                }
            },
            Helper::Slice => {
                "local function __ls_slice(list, first, last)
    local n = #list
    first = first or 0
    last = last or n
    if first < 0 then
        first = math.max(n + first, 0)
    end
    if last < 0 then
        last = math.max(n + last, 0)
    end
    local out = {}
    for i = first + 1, math.min(last, n) do
        out[#out + 1] = list[i]
    end
    return out
end
"
            }
            Helper::TypeOf => {
                "local function __ls_typeof(value)
    local t = type(value)
    if t == \"nil\" then
        return \"undefined\"
    elseif t == \"table\" then
        return \"object\"
    end
    return t
end
"
            }
        }
    }
}

/// What `break` and `continue` may leave.
#[derive(Debug)]
enum JumpTarget {
    Loop { label: Option<String>, try_depth: usize },
    Switch { try_depth: usize },
}

/// Per-function emission state.
#[derive(Debug, Default)]
struct FunctionFrame {
    /// Number of `pcall` closures between here and the function itself
    try_depth: usize,
    targets: Vec<JumpTarget>,
}

struct LuaGen<'m> {
    module: &'m Module,
    options: &'m LuaOptions,
    debug_info: bool,
    out: Emitter,
    errors: Vec<BackendError>,
    helpers: BTreeSet<Helper>,
    counter: u32,
    frame: FunctionFrame,
    /// Parent class expression of each enclosing class
    classes: Vec<Option<String>>,
    /// Declarators and classes already declared `local` by their block
    predeclared: BTreeSet<NodeId>,
}

impl<'m> LuaGen<'m> {
    fn new(module: &'m Module, options: &'m LuaOptions, debug_info: bool) -> Self {
        Self {
            module,
            options,
            debug_info,
            out: Emitter::new(options.indent_width),
            errors: Vec::new(),
            helpers: BTreeSet::new(),
            counter: 0,
            frame: FunctionFrame::default(),
            classes: Vec::new(),
            predeclared: BTreeSet::new(),
        }
    }

    fn finish(self) -> Result<String, Vec<BackendError>> {
        if !self.errors.is_empty() {
            return Err(self.errors);
        }
        let mut text = format!("-- Generated by luascript for Lua {}\n", self.options.version.as_str());
        if let Some(source) = &self.module.metadata().source {
            text.push_str(&format!("-- source: {source}\n"));
        }
        for helper in &self.helpers {
            text.push_str(helper.source(self.options.version));
            text.push('\n');
        }
        text.push_str(&self.out.finish());
        Ok(text)
    }

    fn node(&self, id: NodeId) -> Result<&'m Node, BackendError> {
        lookup(self.module, id, BACKEND)
    }

    fn fresh(&mut self, prefix: &str) -> String {
        self.counter += 1;
        format!("{prefix}{}", self.counter)
    }

    fn unpack(&self) -> &'static str {
        match self.options.version {
            LuaVersion::Lua54 => "table.unpack",
            LuaVersion::Lua51 => "unpack",
        }
    }

    /// Runs `f` against a fresh writer one level deeper and returns its text.
    fn nested(&mut self, f: impl FnOnce(&mut Self) -> Result<(), BackendError>) -> Result<String, BackendError> {
        let inner = self.out.nested();
        let outer = std::mem::replace(&mut self.out, inner);
        let result = f(self);
        let inner = std::mem::replace(&mut self.out, outer);
        result?;
        Ok(inner.finish())
    }

    /// Immediately invoked closure whose body is written by `f`.
    fn iife(&mut self, f: impl FnOnce(&mut Self) -> Result<(), BackendError>) -> Result<String, BackendError> {
        let body = self.nested(f)?;
        Ok(format!("(function()\n{body}{}end)()", self.out.pad()))
    }

    /// True if `found` matches a node under `id` before a `stop` node is hit.
    fn scan(&self, id: NodeId, found: fn(&NodeKind) -> bool, stop: fn(&NodeKind) -> bool) -> bool {
        let Some(node) = self.module.node(id) else {
            return false;
        };
        if found(&node.kind) {
            return true;
        }
        if stop(&node.kind) {
            return false;
        }
        node.kind.children().into_iter().any(|child| self.scan(child, found, stop))
    }

    // ---- statements ----

    /// Emits a statement list. Function declarations are hoisted to the
    /// top of the list so they can be called before their definition.
    /// When they are, every name the list declares is made local up front
    /// so the hoisted bodies close over it instead of a global.
    fn statements(&mut self, ids: &[NodeId]) {
        let (hoisted, rest): (Vec<NodeId>, Vec<NodeId>) = ids.iter().copied().partition(|id| {
            matches!(
                self.module.node(*id).map(|n| &n.kind),
                Some(NodeKind::FunctionDeclaration(_))
            )
        });

        let mut names = Vec::new();
        if !hoisted.is_empty() {
            for id in &rest {
                self.forward_declare(*id, &mut names);
            }
        }
        let local = hoisted.len() == 1 && names.is_empty();
        if !local && !hoisted.is_empty() {
            for id in &hoisted {
                if let Some(NodeKind::FunctionDeclaration(func)) = self.module.node(*id).map(|n| &n.kind) {
                    if let Some(name) = func.name.as_deref().map(lua_name) {
                        if !names.contains(&name) {
                            names.push(name);
                        }
                    }
                }
            }
            self.out.line(format!("local {}", names.join(", ")));
        }
        for id in hoisted {
            if let Err(e) = self.function_declaration(id, local) {
                self.errors.push(e);
            }
        }

        let last = rest.len().saturating_sub(1);
        for (i, id) in rest.into_iter().enumerate() {
            if let Err(e) = self.statement(id, i == last) {
                self.errors.push(e);
            }
        }
    }

    /// Records the names bound directly by statement `id`.
    fn forward_declare(&mut self, id: NodeId, names: &mut Vec<String>) {
        let Some(node) = self.module.node(id) else {
            return;
        };
        let mut bound = Vec::new();
        match &node.kind {
            NodeKind::VariableDeclaration { declarations, .. } => {
                for declarator in declarations {
                    if let Some(NodeKind::VariableDeclarator { name, .. }) = self.module.node(*declarator).map(|n| &n.kind) {
                        bound.push((*declarator, lua_name(name)));
                    }
                }
            }
            NodeKind::ClassDeclaration(class) => bound.push((id, lua_name(&class.name))),
            _ => {}
        }
        for (owner, name) in bound {
            self.predeclared.insert(owner);
            if !names.contains(&name) {
                names.push(name);
            }
        }
    }

    /// Body of a compound statement.
    fn body(&mut self, id: NodeId) -> Result<(), BackendError> {
        let body = block_body(self.module, id, BACKEND)?;
        self.statements(&body);
        Ok(())
    }

    fn annotate(&mut self, node: &Node) {
        if !self.debug_info || node.synthetic {
            return;
        }
        if let Some(span) = &node.span {
            self.out.line(format!("-- line {}", span.start.line));
        }
    }

    fn statement(&mut self, id: NodeId, last: bool) -> Result<(), BackendError> {
        let node = self.node(id)?;
        self.annotate(node);
        match &node.kind {
            NodeKind::ExpressionStatement { expression } => self.expression_statement(*expression),
            NodeKind::VariableDeclaration { declarations, .. } => {
                for declarator in declarations {
                    self.declarator(*declarator)?;
                }
                Ok(())
            }
            NodeKind::FunctionDeclaration(_) => self.function_declaration(id, true),
            NodeKind::ClassDeclaration(class) => {
                let local = !self.predeclared.contains(&id);
                self.class(class, local).map(|_| ())
            }
            NodeKind::BlockStatement { body } => {
                self.out.line("do");
                self.out.indent();
                self.statements(body);
                self.out.dedent();
                self.out.line("end");
                Ok(())
            }
            NodeKind::EmptyStatement => Ok(()),
            NodeKind::IfStatement {
                test,
                consequent,
                alternate,
            } => self.if_statement(*test, *consequent, *alternate),
            NodeKind::ForStatement {
                init,
                test,
                update,
                body,
            } => self.for_statement(*init, *test, *update, *body),
            NodeKind::ForEachStatement {
                iterate,
                binding,
                iterable,
                body,
            } => {
                let name = self.declared_name(*binding)?;
                let iterable = self.expr(*iterable)?;
                match iterate {
                    IterationKind::Values => self.out.line(format!("for _, {name} in ipairs({iterable}) do")),
                    IterationKind::Keys => self.out.line(format!("for {name} in pairs({iterable}) do")),
                }
                self.loop_body(*body, None)?;
                self.out.line("end");
                Ok(())
            }
            NodeKind::WhileStatement { test, body } => {
                let test = self.expr(*test)?;
                self.out.line(format!("while {test} do"));
                self.loop_body(*body, None)?;
                self.out.line("end");
                Ok(())
            }
            NodeKind::DoWhileStatement { body, test } => {
                self.out.line("repeat");
                self.loop_body(*body, None)?;
                let test = self.expr(*test)?;
                self.out.line(format!("until not ({test})"));
                Ok(())
            }
            NodeKind::BreakStatement => self.break_statement(node, last),
            NodeKind::ContinueStatement => self.continue_statement(node),
            NodeKind::ReturnStatement { argument } => self.return_statement(*argument, last),
            NodeKind::ThrowStatement { argument } => {
                let value = self.expr(*argument)?;
                self.out.line(format!("error({value}, 0)"));
                Ok(())
            }
            NodeKind::TryStatement {
                block,
                handler,
                finalizer,
            } => self.try_statement(*block, *handler, *finalizer),
            NodeKind::SwitchStatement { discriminant, cases } => self.switch_statement(*discriminant, cases),
            _ => Err(unsupported(BACKEND, node, "not a statement")),
        }
    }

    fn expression_statement(&mut self, id: NodeId) -> Result<(), BackendError> {
        let node = self.node(id)?;
        match &node.kind {
            NodeKind::AssignmentExpression {
                operator,
                target,
                value,
            } => self.assignment(node, *operator, *target, *value),
            NodeKind::UpdateExpression { operator, argument, .. } => {
                let target = self.target(*argument)?;
                self.out.line(format!("{target} = {target} {} 1", update_symbol(*operator)));
                Ok(())
            }
            NodeKind::SequenceExpression { expressions } => {
                for expression in expressions {
                    self.expression_statement(*expression)?;
                }
                Ok(())
            }
            NodeKind::CallExpression { .. } | NodeKind::NewExpression { .. } | NodeKind::AwaitExpression { .. } => {
                let call = self.expr(id)?;
                if call.starts_with('(') || !call.ends_with(')') {
                    self.out.line(format!("local _ = {call}"));
                } else {
                    self.out.line(call);
                }
                Ok(())
            }
            _ => {
                let value = self.expr(id)?;
                self.out.line(format!("local _ = {value}"));
                Ok(())
            }
        }
    }

    fn declarator(&mut self, id: NodeId) -> Result<(), BackendError> {
        let node = self.node(id)?;
        let NodeKind::VariableDeclarator { name, init } = &node.kind else {
            return Err(unsupported(BACKEND, node, "expected a VariableDeclarator"));
        };
        let name = lua_name(name);
        let declared = self.predeclared.contains(&id);
        let Some(init) = init else {
            if !declared {
                self.out.line(format!("local {name}"));
            }
            return Ok(());
        };
        let init_node = self.node(*init)?;
        if declared {
            let value = self.expr(*init)?;
            self.out.line(format!("{name} = {value}"));
        } else if is_function_like(&init_node.kind) {
            // Declared first so the value can refer to itself.
            self.out.line(format!("local {name}"));
            let value = self.expr(*init)?;
            self.out.line(format!("{name} = {value}"));
        } else {
            let value = self.expr(*init)?;
            self.out.line(format!("local {name} = {value}"));
        }
        Ok(())
    }

    fn declared_name(&self, id: NodeId) -> Result<String, BackendError> {
        let node = self.node(id)?;
        match &node.kind {
            NodeKind::VariableDeclarator { name, .. } | NodeKind::Parameter { name } => Ok(lua_name(name)),
            _ => Err(unsupported(BACKEND, node, "expected a binding")),
        }
    }

    fn assignment(
        &mut self,
        node: &'m Node,
        operator: AssignmentOperator,
        target: NodeId,
        value: NodeId,
    ) -> Result<(), BackendError> {
        let place = self.target(target)?;
        if let Some(logical) = operator.logical() {
            let value = self.expr(value)?;
            let test = match logical {
                LogicalOperator::And => place.clone(),
                LogicalOperator::Or => format!("not {place}"),
                LogicalOperator::Nullish => format!("{place} == nil"),
            };
            self.out.line(format!("if {test} then {place} = {value} end"));
            return Ok(());
        }
        let value = match operator.binary() {
            Some(op) => self.binary(node, op, target, value)?,
            None => {
                let value_node = self.node(value)?;
                match (&self.node(target)?.kind, value_node.kind.as_function()) {
                    (NodeKind::MemberExpression { .. }, Some(func)) => {
                        let receiver = receiver_for(&value_node.kind);
                        self.function_expr(func, Some(receiver))?
                    }
                    _ => self.expr(value)?,
                }
            }
        };
        self.out.line(format!("{place} = {value}"));
        Ok(())
    }

    fn if_statement(&mut self, test: NodeId, consequent: NodeId, alternate: Option<NodeId>) -> Result<(), BackendError> {
        let test = self.expr(test)?;
        self.out.line(format!("if {test} then"));
        let (mut consequent, mut alternate) = (consequent, alternate);
        loop {
            self.out.indent();
            self.body(consequent)?;
            self.out.dedent();
            let Some(next) = alternate else {
                break;
            };
            let next = self.node(next)?;
            match &next.kind {
                NodeKind::IfStatement {
                    test,
                    consequent: c,
                    alternate: a,
                } => {
                    let test = self.expr(*test)?;
                    self.out.line(format!("elseif {test} then"));
                    consequent = *c;
                    alternate = *a;
                }
                _ => {
                    self.out.line("else");
                    self.out.indent();
                    self.body(next.id)?;
                    self.out.dedent();
                    break;
                }
            }
        }
        self.out.line("end");
        Ok(())
    }

    fn for_statement(
        &mut self,
        init: Option<NodeId>,
        test: Option<NodeId>,
        update: Option<NodeId>,
        body: NodeId,
    ) -> Result<(), BackendError> {
        self.out.line("do");
        self.out.indent();
        if let Some(init) = init {
            match &self.node(init)?.kind {
                NodeKind::VariableDeclaration { .. } => self.statement(init, false)?,
                _ => self.expression_statement(init)?,
            }
        }
        let test = match test {
            Some(test) => self.expr(test)?,
            None => "true".to_string(),
        };
        self.out.line(format!("while {test} do"));
        self.loop_body(body, update)?;
        self.out.line("end");
        self.out.dedent();
        self.out.line("end");
        Ok(())
    }

    /// Loop body one level deeper. When the body uses `continue` it is
    /// wrapped in `do ... end` and followed by the `goto` label, so the
    /// label never lands inside the scope of a body local.
    fn loop_body(&mut self, body: NodeId, update: Option<NodeId>) -> Result<(), BackendError> {
        let wants_label = self.options.version == LuaVersion::Lua54
            && self.scan(
                body,
                |k| matches!(k, NodeKind::ContinueStatement),
                |k| is_loop(k) || is_function_like(k),
            );
        let label = wants_label.then(|| self.fresh("continue_"));

        self.out.indent();
        self.frame.targets.push(JumpTarget::Loop {
            label: label.clone(),
            try_depth: self.frame.try_depth,
        });
        let result = match &label {
            Some(label) => {
                self.out.line("do");
                self.out.indent();
                let result = self.body(body);
                self.out.dedent();
                self.out.line("end");
                self.out.line(format!("::{label}::"));
                result
            }
            None => self.body(body),
        };
        self.frame.targets.pop();
        result?;
        if let Some(update) = update {
            self.expression_statement(update)?;
        }
        self.out.dedent();
        Ok(())
    }

    fn break_statement(&mut self, node: &Node, last: bool) -> Result<(), BackendError> {
        let try_depth = match self.frame.targets.last() {
            Some(JumpTarget::Loop { try_depth, .. } | JumpTarget::Switch { try_depth }) => *try_depth,
            None => return Err(unsupported(BACKEND, node, "break outside of a loop or switch")),
        };
        if try_depth != self.frame.try_depth {
            return Err(unsupported(BACKEND, node, "break out of a try block"));
        }
        self.out.line(if last { "break" } else { "do break end" });
        Ok(())
    }

    fn continue_statement(&mut self, node: &Node) -> Result<(), BackendError> {
        if self.options.version == LuaVersion::Lua51 {
            return Err(unsupported(BACKEND, node, "continue needs goto, which Lua 5.1 lacks"));
        }
        let target = self.frame.targets.iter().rev().find_map(|t| match t {
            JumpTarget::Loop { label, try_depth } => Some((label.clone(), *try_depth)),
            JumpTarget::Switch { .. } => None,
        });
        match target {
            Some((Some(label), try_depth)) if try_depth == self.frame.try_depth => {
                self.out.line(format!("goto {label}"));
                Ok(())
            }
            Some((_, _)) => Err(unsupported(BACKEND, node, "continue out of a try block")),
            None => Err(unsupported(BACKEND, node, "continue outside of a loop")),
        }
    }

    fn return_statement(&mut self, argument: Option<NodeId>, last: bool) -> Result<(), BackendError> {
        let value = argument.map(|a| self.expr(a)).transpose()?;
        let text = if self.frame.try_depth > 0 {
            // Inside a pcall closure the value is boxed so "returned nil"
            // differs from "fell off the end".
            format!("return {{{}}}", value.as_deref().unwrap_or("nil"))
        } else {
            match value {
                Some(value) => format!("return {value}"),
                None => "return".to_string(),
            }
        };
        if last {
            self.out.line(text);
        } else {
            self.out.line(format!("do {text} end"));
        }
        Ok(())
    }

    fn try_statement(
        &mut self,
        block: NodeId,
        handler: Option<NodeId>,
        finalizer: Option<NodeId>,
    ) -> Result<(), BackendError> {
        let n = self.fresh("");
        let (ok, res) = (format!("__ok{n}"), format!("__res{n}"));

        self.out.line("do");
        self.out.indent();
        self.out.line(format!("local {ok}, {res} = pcall(function()"));
        self.out.indent();
        self.frame.try_depth += 1;
        let result = self.body(block);
        self.frame.try_depth -= 1;
        result?;
        self.out.dedent();
        self.out.line("end)");

        if let Some(handler) = handler {
            let node = self.node(handler)?;
            let NodeKind::CatchClause { param, body } = &node.kind else {
                return Err(unsupported(BACKEND, node, "expected a CatchClause"));
            };
            self.out.line(format!("if not {ok} then"));
            self.out.indent();
            if let Some(param) = param {
                let name = self.declared_name(*param)?;
                self.out.line(format!("local {name} = {res}"));
            }
            self.body(*body)?;
            self.out.dedent();
            self.out.line("end");
        }
        if let Some(finalizer) = finalizer {
            self.out.line("do");
            self.out.indent();
            self.body(finalizer)?;
            self.out.dedent();
            self.out.line("end");
        }
        if handler.is_none() {
            self.out.line(format!("if not {ok} then error({res}, 0) end"));
        }
        let returns = self.scan(block, |k| matches!(k, NodeKind::ReturnStatement { .. }), is_function_like);
        if returns {
            let value = if self.frame.try_depth > 0 { res.clone() } else { format!("{res}[1]") };
            self.out.line(format!("if {ok} and {res} ~= nil then return {value} end"));
        }
        self.out.dedent();
        self.out.line("end");
        Ok(())
    }

    /// `switch` as a `repeat ... until true` block so `break` leaves it.
    /// Matching cases set a fall-through flag; `default` runs when no
    /// case test matches.
    fn switch_statement(&mut self, discriminant: NodeId, cases: &[NodeId]) -> Result<(), BackendError> {
        let n = self.fresh("");
        let (sw, ft, hit) = (format!("__sw{n}"), format!("__ft{n}"), format!("__hit{n}"));

        let mut arms = Vec::with_capacity(cases.len());
        for case in cases {
            let node = self.node(*case)?;
            let NodeKind::SwitchCase { test, consequent } = &node.kind else {
                return Err(unsupported(BACKEND, node, "expected a SwitchCase"));
            };
            let test = test.map(|t| self.operand(t)).transpose()?;
            arms.push((test, consequent));
        }

        self.out.line("repeat");
        self.out.indent();
        let discriminant = self.expr(discriminant)?;
        self.out.line(format!("local {sw} = {discriminant}"));
        self.out.line(format!("local {ft} = false"));
        if arms.iter().any(|(test, _)| test.is_none()) {
            let tests: Vec<String> = arms
                .iter()
                .filter_map(|(test, _)| test.as_ref().map(|t| format!("{sw} == {t}")))
                .collect();
            let any = if tests.is_empty() { "false".to_string() } else { tests.join(" or ") };
            self.out.line(format!("local {hit} = {any}"));
        }

        self.frame.targets.push(JumpTarget::Switch {
            try_depth: self.frame.try_depth,
        });
        for (test, consequent) in arms {
            let condition = match test {
                Some(test) => format!("{ft} or {sw} == {test}"),
                None => format!("{ft} or not {hit}"),
            };
            self.out.line(format!("if {condition} then"));
            self.out.indent();
            self.out.line(format!("{ft} = true"));
            self.statements(consequent);
            self.out.dedent();
            self.out.line("end");
        }
        self.frame.targets.pop();
        self.out.dedent();
        self.out.line("until true");
        Ok(())
    }

    // ---- functions and classes ----

    fn params(&self, func: &FunctionNode, receiver: Option<&str>) -> Result<String, BackendError> {
        let mut names: Vec<String> = receiver.map(str::to_string).into_iter().collect();
        for param in &func.params {
            names.push(self.declared_name(*param)?);
        }
        if func.rest.is_some() {
            names.push("...".to_string());
        }
        Ok(names.join(", "))
    }

    /// Statements of a function body, with the rest parameter collected
    /// into a table local first.
    fn function_body(&mut self, func: &FunctionNode) -> Result<(), BackendError> {
        let saved = std::mem::take(&mut self.frame);
        let result = self.function_body_inner(func);
        self.frame = saved;
        result
    }

    fn function_body_inner(&mut self, func: &FunctionNode) -> Result<(), BackendError> {
        if let Some(rest) = func.rest {
            let node = self.node(rest)?;
            let NodeKind::RestElement { argument } = &node.kind else {
                return Err(unsupported(BACKEND, node, "expected a RestElement"));
            };
            let name = self.declared_name(*argument)?;
            self.out.line(format!("local {name} = {{...}}"));
        }
        self.body(func.body)
    }

    fn function_declaration(&mut self, id: NodeId, local: bool) -> Result<(), BackendError> {
        let node = self.node(id)?;
        let NodeKind::FunctionDeclaration(func) = &node.kind else {
            return Err(unsupported(BACKEND, node, "expected a FunctionDeclaration"));
        };
        let name = func.name.as_deref().map(lua_name).unwrap_or_else(|| format!("__fn{}", node.id));
        let params = self.params(func, None)?;
        let prefix = if local { "local " } else { "" };
        self.out.line(format!("{prefix}function {name}({params})"));
        self.out.indent();
        self.function_body(func)?;
        self.out.dedent();
        self.out.line("end");
        Ok(())
    }

    fn function_expr(&mut self, func: &FunctionNode, receiver: Option<&str>) -> Result<String, BackendError> {
        let params = self.params(func, receiver)?;
        let body = self.nested(|g| g.function_body(func))?;
        Ok(format!("function({params})\n{body}{}end", self.out.pad()))
    }

    /// Emits the class table and its members; returns the Lua name.
    fn class(&mut self, class: &'m ClassNode, local: bool) -> Result<String, BackendError> {
        let name = lua_name(&class.name);
        let parent = match class.super_class {
            None => None,
            Some(super_class) => {
                let value = self.expr(super_class)?;
                if matches!(self.node(super_class)?.kind, NodeKind::Identifier { .. }) {
                    Some(value)
                } else {
                    let local = self.fresh("__ls_super");
                    self.out.line(format!("local {local} = {value}"));
                    Some(local)
                }
            }
        };

        let prefix = if local { "local " } else { "" };
        self.out.line(format!("{prefix}{name} = {{}}"));
        self.out.line(format!("{name}.__index = {name}"));
        if let Some(parent) = &parent {
            self.out.line(format!("setmetatable({name}, {{__index = {parent}}})"));
        }
        self.out.line(format!("function {name}.new(...)"));
        self.out.indent();
        self.out.line(format!("local self = setmetatable({{}}, {name})"));
        self.out.line(format!("{name}.__init(self, ...)"));
        self.out.line("return self");
        self.out.dedent();
        self.out.line("end");

        self.classes.push(parent);
        let result = self.class_members(&name, class);
        self.classes.pop();
        result?;
        Ok(name)
    }

    fn class_members(&mut self, name: &str, class: &'m ClassNode) -> Result<(), BackendError> {
        let constructor = self.node(class.constructor)?;
        let NodeKind::FunctionExpression(func) = &constructor.kind else {
            return Err(unsupported(BACKEND, constructor, "expected a FunctionExpression"));
        };
        let params = self.params(func, None)?;
        self.out.line(format!("function {name}:__init({params})"));
        self.out.indent();
        self.function_body(func)?;
        self.out.dedent();
        self.out.line("end");

        for method in &class.methods {
            let node = self.node(*method)?;
            let NodeKind::MethodDefinition {
                key,
                value,
                method_kind,
                ..
            } = &node.kind
            else {
                return Err(unsupported(BACKEND, node, "expected a MethodDefinition"));
            };
            if *method_kind != MethodKind::Method {
                self.errors.push(unsupported(
                    BACKEND,
                    node,
                    format!("accessor `{key}` has no Lua equivalent"),
                ));
                continue;
            }
            let function = self.node(*value)?;
            let NodeKind::FunctionExpression(func) = &function.kind else {
                return Err(unsupported(BACKEND, function, "expected a FunctionExpression"));
            };
            if is_lua_ident(key) {
                let params = self.params(func, None)?;
                self.out.line(format!("function {name}:{key}({params})"));
            } else {
                let params = self.params(func, Some("self"))?;
                self.out.line(format!("{name}[{}] = function({params})", lua_string(key)));
            }
            self.out.indent();
            self.function_body(func)?;
            self.out.dedent();
            self.out.line("end");
        }

        for property in &class.static_properties {
            let node = self.node(*property)?;
            let NodeKind::Property { key, value, .. } = &node.kind else {
                return Err(unsupported(BACKEND, node, "expected a Property"));
            };
            let key = self.property_name(*key)?;
            let value = self.expr(*value)?;
            self.out.line(format!("{} = {value}", field(name, &key)));
        }
        Ok(())
    }

    fn parent(&self, node: &Node) -> Result<String, BackendError> {
        self.classes
            .last()
            .cloned()
            .flatten()
            .ok_or_else(|| unsupported(BACKEND, node, "super outside of a derived class"))
    }

    // ---- expressions ----

    fn expr(&mut self, id: NodeId) -> Result<String, BackendError> {
        let node = self.node(id)?;
        Ok(match &node.kind {
            NodeKind::NumericLiteral { value } => lua_number(*value),
            NodeKind::StringLiteral { value } => lua_string(value),
            NodeKind::BooleanLiteral { value } => value.to_string(),
            NodeKind::NullLiteral | NodeKind::UndefinedLiteral => "nil".to_string(),
            NodeKind::TemplateLiteral { parts } => self.template(parts)?,
            NodeKind::TemplateElement { cooked, .. } => lua_string(cooked),
            NodeKind::Identifier { name, .. } => match global_number(&node.kind) {
                Some(value) => lua_number(value),
                None => lua_name(name),
            },
            NodeKind::ThisExpression => "self".to_string(),
            NodeKind::Super => self.parent(node)?,
            NodeKind::BinaryExpression { operator, left, right } => self.binary(node, *operator, *left, *right)?,
            NodeKind::LogicalExpression { operator, left, right } => {
                let l = self.operand(*left)?;
                let r = self.operand(*right)?;
                match operator {
                    LogicalOperator::And => format!("{l} and {r}"),
                    LogicalOperator::Or => format!("{l} or {r}"),
                    LogicalOperator::Nullish => {
                        let pad = self.out.pad();
                        let unit = " ".repeat(self.options.indent_width);
                        format!(
                            "(function(__v)\n{pad}{unit}if __v == nil then\n{pad}{unit}{unit}return {r}\n{pad}{unit}end\n{pad}{unit}return __v\n{pad}end)({l})"
                        )
                    }
                }
            }
            NodeKind::UnaryExpression { operator, argument } => self.unary(node, *operator, *argument)?,
            NodeKind::UpdateExpression {
                operator,
                prefix,
                argument,
            } => {
                let target = self.target(*argument)?;
                let symbol = update_symbol(*operator);
                let prefix = *prefix;
                self.iife(|g| {
                    if prefix {
                        g.out.line(format!("{target} = {target} {symbol} 1"));
                        g.out.line(format!("return {target}"));
                    } else {
                        g.out.line(format!("local __v = {target}"));
                        g.out.line(format!("{target} = __v {symbol} 1"));
                        g.out.line("return __v");
                    }
                    Ok(())
                })?
            }
            NodeKind::AssignmentExpression {
                operator,
                target,
                value,
            } => {
                let (operator, target, value) = (*operator, *target, *value);
                self.iife(|g| {
                    g.assignment(node, operator, target, value)?;
                    let place = g.target(target)?;
                    g.out.line(format!("return {place}"));
                    Ok(())
                })?
            }
            NodeKind::ConditionalExpression {
                test,
                consequent,
                alternate,
            } => {
                let (test, consequent, alternate) = (*test, *consequent, *alternate);
                self.iife(|g| {
                    let test = g.expr(test)?;
                    g.out.line(format!("if {test} then"));
                    g.out.indent();
                    let consequent = g.expr(consequent)?;
                    g.out.line(format!("return {consequent}"));
                    g.out.dedent();
                    g.out.line("end");
                    let alternate = g.expr(alternate)?;
                    g.out.line(format!("return {alternate}"));
                    Ok(())
                })?
            }
            NodeKind::CallExpression { callee, arguments, .. } => self.call(node, *callee, arguments)?,
            NodeKind::NewExpression { callee, arguments, .. } => {
                let class = self.prefix(*callee)?;
                let args = self.arguments(None, arguments)?;
                format!("{class}.new({args})")
            }
            NodeKind::MemberExpression {
                object,
                property,
                computed,
            } => self.member(node, *object, *property, *computed)?,
            NodeKind::ArrayExpression { elements, .. } => self.array(elements)?,
            NodeKind::ObjectExpression { properties } => self.object(properties)?,
            NodeKind::SequenceExpression { expressions } => {
                let Some((last, init)) = expressions.split_last() else {
                    return Ok("nil".to_string());
                };
                let last = *last;
                self.iife(|g| {
                    for expression in init {
                        g.expression_statement(*expression)?;
                    }
                    let value = g.expr(last)?;
                    g.out.line(format!("return {value}"));
                    Ok(())
                })?
            }
            NodeKind::AwaitExpression { argument } => {
                self.helpers.insert(Helper::Await);
                format!("__ls_await({})", self.expr(*argument)?)
            }
            NodeKind::FunctionExpression(func) | NodeKind::ArrowFunctionExpression(func) => {
                self.function_expr(func, None)?
            }
            NodeKind::ClassExpression(class) => self.iife(|g| {
                let name = g.class(class, true)?;
                g.out.line(format!("return {name}"));
                Ok(())
            })?,
            _ => return Err(unsupported(BACKEND, node, "not an expression")),
        })
    }

    /// Expression text safe to use as an operator operand.
    fn operand(&mut self, id: NodeId) -> Result<String, BackendError> {
        let text = self.expr(id)?;
        let wrap = match &self.node(id)?.kind {
            NodeKind::BinaryExpression { .. }
            | NodeKind::LogicalExpression { .. }
            | NodeKind::UnaryExpression { .. }
            | NodeKind::FunctionExpression(_)
            | NodeKind::ArrowFunctionExpression(_) => true,
            NodeKind::NumericLiteral { value } => *value < 0.0,
            _ => false,
        };
        Ok(if wrap && !text.starts_with('(') { format!("({text})") } else { text })
    }

    /// Expression text usable before `.`, `:`, `[` or a call.
    fn prefix(&mut self, id: NodeId) -> Result<String, BackendError> {
        let text = self.expr(id)?;
        let node = self.node(id)?;
        let bare = match &node.kind {
            NodeKind::Identifier { .. } => global_number(&node.kind).is_none(),
            NodeKind::MemberExpression { .. }
            | NodeKind::CallExpression { .. }
            | NodeKind::NewExpression { .. }
            | NodeKind::ThisExpression
            | NodeKind::Super => true,
            _ => false,
        };
        Ok(if bare && !text.starts_with('#') && !text.starts_with('(') {
            text
        } else {
            format!("({text})")
        })
    }

    fn is_string(&self, id: NodeId) -> bool {
        self.module.node(id).is_some_and(|node| {
            matches!(node.kind, NodeKind::StringLiteral { .. } | NodeKind::TemplateLiteral { .. })
                || node.ty.as_ref().is_some_and(|ty| ty.is_string())
        })
    }

    fn is_number(&self, id: NodeId) -> bool {
        self.module.node(id).is_some_and(|node| {
            matches!(node.kind, NodeKind::NumericLiteral { .. })
                || node.ty.as_ref().is_some_and(|ty| ty.is_number())
        })
    }

    fn binary(&mut self, at: &Node, operator: BinaryOperator, left: NodeId, right: NodeId) -> Result<String, BackendError> {
        use BinaryOperator::*;
        if operator.is_bitwise() && self.options.version == LuaVersion::Lua51 {
            return Err(unsupported(BACKEND, at, "bitwise operators need Lua 5.3 or newer"));
        }
        let concat = operator == Add
            && (self.is_string(left) || self.is_string(right) || at.ty.as_ref().is_some_and(|t| t.is_string()));
        let l = self.operand(left)?;
        let r = self.operand(right)?;
        Ok(match operator {
            Add if concat => format!("{l} .. {r}"),
            Rem => format!("math.fmod({l}, {r})"),
            Exp => format!("{l} ^ {r}"),
            Eq | StrictEq => format!("{l} == {r}"),
            NotEq | StrictNotEq => format!("{l} ~= {r}"),
            BitXor => format!("{l} ~ {r}"),
            Shr => format!("{l} // (1 << {r})"),
            UShr => format!("{l} >> {r}"),
            In => format!("({r}[{l}] ~= nil)"),
            InstanceOf => {
                self.helpers.insert(Helper::InstanceOf);
                format!("__ls_instanceof({l}, {r})")
            }
            _ => format!("{l} {} {r}", operator.as_str()),
        })
    }

    fn unary(&mut self, at: &Node, operator: UnaryOperator, argument: NodeId) -> Result<String, BackendError> {
        Ok(match operator {
            UnaryOperator::Neg => format!("-{}", self.operand(argument)?),
            UnaryOperator::Plus => format!("tonumber({})", self.expr(argument)?),
            UnaryOperator::Not => format!("not {}", self.operand(argument)?),
            UnaryOperator::BitNot => {
                if self.options.version == LuaVersion::Lua51 {
                    return Err(unsupported(BACKEND, at, "bitwise operators need Lua 5.3 or newer"));
                }
                format!("~{}", self.operand(argument)?)
            }
            UnaryOperator::TypeOf => {
                self.helpers.insert(Helper::TypeOf);
                format!("__ls_typeof({})", self.expr(argument)?)
            }
            UnaryOperator::Void => {
                if self.node(argument)?.kind.is_literal() {
                    "nil".to_string()
                } else {
                    let value = self.expr(argument)?;
                    self.iife(|g| {
                        g.out.line(format!("local _ = {value}"));
                        Ok(())
                    })?
                }
            }
            UnaryOperator::Delete => match &self.node(argument)?.kind {
                NodeKind::MemberExpression { .. } => {
                    let place = self.target(argument)?;
                    self.iife(|g| {
                        g.out.line(format!("{place} = nil"));
                        g.out.line("return true");
                        Ok(())
                    })?
                }
                _ => "true".to_string(),
            },
        })
    }

    fn template(&mut self, parts: &[NodeId]) -> Result<String, BackendError> {
        let mut pieces = Vec::with_capacity(parts.len());
        for part in parts {
            let node = self.node(*part)?;
            match &node.kind {
                NodeKind::TemplateElement { cooked, .. } => {
                    if !cooked.is_empty() {
                        pieces.push(lua_string(cooked));
                    }
                }
                _ => pieces.push(format!("tostring({})", self.expr(*part)?)),
            }
        }
        Ok(if pieces.is_empty() { "\"\"".to_string() } else { pieces.join(" .. ") })
    }

    fn property_name(&self, id: NodeId) -> Result<String, BackendError> {
        let node = self.node(id)?;
        match &node.kind {
            NodeKind::StringLiteral { value } => Ok(value.clone()),
            _ => Err(unsupported(BACKEND, node, "expected a property name")),
        }
    }

    fn target(&mut self, id: NodeId) -> Result<String, BackendError> {
        let node = self.node(id)?;
        match &node.kind {
            NodeKind::Identifier { name, .. } => Ok(lua_name(name)),
            NodeKind::MemberExpression {
                object,
                property,
                computed,
            } => {
                if !*computed && self.property_name(*property)? == "length" {
                    return Err(unsupported(BACKEND, node, "assigning to `length`"));
                }
                self.member(node, *object, *property, *computed)
            }
            _ => Err(unsupported(BACKEND, node, "not an assignment target")),
        }
    }

    fn member(&mut self, at: &Node, object: NodeId, property: NodeId, computed: bool) -> Result<String, BackendError> {
        let object_node = self.node(object)?;
        if computed {
            let object = self.prefix(object)?;
            let key = self.index_key(property)?;
            return Ok(format!("{object}[{key}]"));
        }
        let name = self.property_name(property)?;
        match &object_node.kind {
            NodeKind::Super => return Ok(field(&self.parent(at)?, &name)),
            NodeKind::Identifier { name: global, binding: None } if global == "Math" => {
                return Ok(match name.as_str() {
                    "PI" => "math.pi".to_string(),
                    "E" => "math.exp(1)".to_string(),
                    other => field("math", other),
                })
            }
            _ => {}
        }
        let object = self.prefix(object)?;
        if name == "length" {
            return Ok(format!("#{object}"));
        }
        Ok(field(&object, &name))
    }

    /// Table key for `obj[key]`; numeric keys shift to Lua's 1-based arrays.
    fn index_key(&mut self, property: NodeId) -> Result<String, BackendError> {
        let node = self.node(property)?;
        if let NodeKind::NumericLiteral { value } = node.kind {
            if value.fract() == 0.0 && value >= 0.0 {
                return Ok(lua_number(value + 1.0));
            }
        }
        let key = self.expr(property)?;
        Ok(if self.is_number(property) { format!("{} + 1", self.wrap_sum(property, key)?) } else { key })
    }

    fn wrap_sum(&self, id: NodeId, text: String) -> Result<String, BackendError> {
        Ok(match &self.node(id)?.kind {
            NodeKind::LogicalExpression { .. } | NodeKind::BinaryExpression { .. } => format!("({text})"),
            _ => text,
        })
    }

    fn arguments(&mut self, receiver: Option<&str>, items: &[ListItem]) -> Result<String, BackendError> {
        let mut parts: Vec<String> = receiver.map(str::to_string).into_iter().collect();
        let inner_spread = items
            .iter()
            .enumerate()
            .any(|(i, item)| item.spread && i + 1 != items.len());
        if inner_spread {
            let list = self.array(items)?;
            parts.push(format!("{}({list})", self.unpack()));
        } else {
            for item in items {
                let value = self.expr(item.value)?;
                parts.push(if item.spread { format!("{}({value})", self.unpack()) } else { value });
            }
        }
        Ok(parts.join(", "))
    }

    fn call(&mut self, at: &'m Node, callee: NodeId, arguments: &[ListItem]) -> Result<String, BackendError> {
        let callee_node = self.node(callee)?;
        let plain = !arguments.iter().any(|item| item.spread);
        match &callee_node.kind {
            NodeKind::Super => {
                let parent = self.parent(at)?;
                let args = self.arguments(Some("self"), arguments)?;
                Ok(format!("{parent}.__init({args})"))
            }
            NodeKind::MemberExpression {
                object,
                property,
                computed: false,
            } => {
                let name = self.property_name(*property)?;
                let object_node = self.node(*object)?;
                match &object_node.kind {
                    NodeKind::Super => {
                        let parent = self.parent(at)?;
                        let args = self.arguments(Some("self"), arguments)?;
                        return Ok(format!("{}({args})", field(&parent, &name)));
                    }
                    NodeKind::Identifier { name: global, binding: None } => {
                        return self.global_call(global, &name, arguments);
                    }
                    _ => {}
                }
                match (name.as_str(), arguments) {
                    ("push", [item]) if plain => {
                        let list = self.expr(*object)?;
                        let value = self.expr(item.value)?;
                        return Ok(format!("table.insert({list}, {value})"));
                    }
                    ("pop", []) => return Ok(format!("table.remove({})", self.expr(*object)?)),
                    ("join", [] | [_]) if plain => {
                        let list = self.expr(*object)?;
                        let separator = match arguments.first() {
                            Some(item) => self.expr(item.value)?,
                            None => "\",\"".to_string(),
                        };
                        return Ok(format!("table.concat({list}, {separator})"));
                    }
                    ("slice", _) => {
                        self.helpers.insert(Helper::Slice);
                        let list = self.expr(*object)?;
                        let args = self.arguments(Some(list.as_str()), arguments)?;
                        return Ok(format!("__ls_slice({args})"));
                    }
                    _ => {}
                }
                let object = self.prefix(*object)?;
                if is_lua_ident(&name) {
                    let args = self.arguments(None, arguments)?;
                    Ok(format!("{object}:{name}({args})"))
                } else {
                    let args = self.arguments(Some(object.as_str()), arguments)?;
                    Ok(format!("{object}[{}]({args})", lua_string(&name)))
                }
            }
            NodeKind::MemberExpression {
                object,
                property,
                computed: true,
            } => {
                let object = self.prefix(*object)?;
                let key = self.index_key(*property)?;
                let args = self.arguments(Some(object.as_str()), arguments)?;
                Ok(format!("{object}[{key}]({args})"))
            }
            _ => {
                let function = self.prefix(callee)?;
                let args = self.arguments(None, arguments)?;
                Ok(format!("{function}({args})"))
            }
        }
    }

    /// `<global>.<name>(...)` where the object is an unbound global.
    fn global_call(&mut self, global: &str, name: &str, arguments: &[ListItem]) -> Result<String, BackendError> {
        if let ("Math", "pow", [base, exponent]) = (global, name, arguments) {
            let base = self.operand(base.value)?;
            let exponent = self.operand(exponent.value)?;
            return Ok(format!("({base} ^ {exponent})"));
        }
        let args = self.arguments(None, arguments)?;
        Ok(match (global, name) {
            ("console", "log" | "info" | "warn" | "error" | "debug") => format!("print({args})"),
            ("Object", "assign") => {
                self.helpers.insert(Helper::Assign);
                format!("__ls_assign({args})")
            }
            ("Math", "round") if arguments.len() == 1 => format!("math.floor({args} + 0.5)"),
            ("Math", "trunc") if arguments.len() == 1 => format!("(math.modf({args}))"),
            ("Math", other) => format!("{}({args})", field("math", other)),
            _ => format!("{}({args})", field(&lua_name(global), name)),
        })
    }

    fn array(&mut self, items: &[ListItem]) -> Result<String, BackendError> {
        if !items.iter().any(|item| item.spread) {
            let values = items
                .iter()
                .map(|item| self.expr(item.value))
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(format!("{{{}}}", values.join(", ")));
        }
        // Built element by element so spread items land at their position.
        self.iife(|g| {
            let lead: Vec<String> = items
                .iter()
                .take_while(|item| !item.spread)
                .map(|item| g.expr(item.value))
                .collect::<Result<_, _>>()?;
            g.out.line(format!("local __t = {{{}}}", lead.join(", ")));
            for item in &items[lead.len()..] {
                let value = g.expr(item.value)?;
                if item.spread {
                    g.out.line(format!("for _, __v in ipairs({value}) do"));
                    g.out.indent();
                    g.out.line("__t[#__t + 1] = __v");
                    g.out.dedent();
                    g.out.line("end");
                } else {
                    g.out.line(format!("__t[#__t + 1] = {value}"));
                }
            }
            g.out.line("return __t");
            Ok(())
        })
    }

    fn object(&mut self, properties: &[NodeId]) -> Result<String, BackendError> {
        let mut groups: Vec<String> = Vec::new();
        let mut current: Vec<String> = Vec::new();
        let mut spread = false;
        for property in properties {
            let node = self.node(*property)?;
            match &node.kind {
                NodeKind::Property { key, value, computed } => {
                    current.push(self.object_entry(*key, *value, *computed)?);
                }
                NodeKind::SpreadElement { argument } => {
                    if !spread || !current.is_empty() {
                        groups.push(format!("{{{}}}", current.join(", ")));
                        current.clear();
                    }
                    spread = true;
                    groups.push(self.expr(*argument)?);
                }
                _ => return Err(unsupported(BACKEND, node, "expected an object member")),
            }
        }
        if !spread {
            return Ok(format!("{{{}}}", current.join(", ")));
        }
        if !current.is_empty() {
            groups.push(format!("{{{}}}", current.join(", ")));
        }
        self.helpers.insert(Helper::Assign);
        Ok(format!("__ls_assign({})", groups.join(", ")))
    }

    fn object_entry(&mut self, key: NodeId, value: NodeId, computed: bool) -> Result<String, BackendError> {
        let value_node = self.node(value)?;
        // Function values are called as methods, so they take the receiver.
        let value = match value_node.kind.as_function() {
            Some(func) => self.function_expr(func, Some(receiver_for(&value_node.kind)))?,
            None => self.expr(value)?,
        };
        if computed {
            let key = self.expr(key)?;
            return Ok(format!("[{key}] = {value}"));
        }
        let name = self.property_name(key)?;
        Ok(if is_lua_ident(&name) {
            format!("{name} = {value}")
        } else {
            format!("[{}] = {value}", lua_string(&name))
        })
    }
}

fn is_loop(kind: &NodeKind) -> bool {
    matches!(
        kind,
        NodeKind::ForStatement { .. }
            | NodeKind::ForEachStatement { .. }
            | NodeKind::WhileStatement { .. }
            | NodeKind::DoWhileStatement { .. }
    )
}

fn is_function_like(kind: &NodeKind) -> bool {
    matches!(
        kind,
        NodeKind::FunctionDeclaration(_)
            | NodeKind::FunctionExpression(_)
            | NodeKind::ArrowFunctionExpression(_)
            | NodeKind::ClassDeclaration(_)
            | NodeKind::ClassExpression(_)
    )
}

/// First parameter given to a function stored on an object. Arrows keep
/// the outer `self`, so theirs is a throwaway name.
fn receiver_for(kind: &NodeKind) -> &'static str {
    match kind {
        NodeKind::ArrowFunctionExpression(_) => "_",
        _ => "self",
    }
}

fn update_symbol(operator: UpdateOperator) -> &'static str {
    match operator {
        UpdateOperator::Increment => "+",
        UpdateOperator::Decrement => "-",
    }
}

/// Lua identifier for a source name.
pub fn lua_name(name: &str) -> String {
    let name = name.replace('$', "_S");
    if LUA_KEYWORDS.contains(&name.as_str()) || name == "self" {
        format!("{name}_")
    } else {
        name
    }
}

fn is_lua_ident(name: &str) -> bool {
    let mut chars = name.chars();
    let starts_well = chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    starts_well && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') && !LUA_KEYWORDS.contains(&name)
}

fn field(object: &str, name: &str) -> String {
    if is_lua_ident(name) {
        format!("{object}.{name}")
    } else {
        format!("{object}[{}]", lua_string(name))
    }
}

pub fn lua_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 || c == '\u{7f}' => out.push_str(&format!("\\{:03}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

pub fn lua_number(value: f64) -> String {
    if value.is_nan() {
        "(0/0)".to_string()
    } else if value.is_infinite() {
        if value > 0.0 { "math.huge" } else { "(-math.huge)" }.to_string()
    } else if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value:?}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use luascript_ast::build::*;
    use luascript_ast::{Stmt, VarKind};
    use luascript_ir::lower;
    use pretty_assertions::assert_eq;

    fn emit_with(body: Vec<Stmt>, options: &CompileOptions) -> Result<String, Vec<BackendError>> {
        let module = lower(&program(body)).expect("program should lower");
        LuaBackend::new(options).emit(&module)
    }

    fn emit(body: Vec<Stmt>) -> String {
        emit_with(body, &CompileOptions::default()).expect("lua emission should succeed")
    }

    fn lua51() -> CompileOptions {
        let mut options = CompileOptions::default();
        options.lua.version = LuaVersion::Lua51;
        options
    }

    #[test]
    fn test_add_function() {
        let lua = emit(vec![func(
            "add",
            vec![pid("a"), pid("b")],
            vec![ret(Some(bin("+", ident("a"), ident("b"))))],
        )]);
        assert!(lua.contains("local function add(a, b)"), "{lua}");
        assert!(lua.contains("return a + b"), "{lua}");
    }

    #[test]
    fn test_exact_output() {
        let lua = emit(vec![
            let_("x", num(1.0)),
            if_(
                bin(">", ident("x"), num(0.0)),
                vec![expr_stmt(call(member(ident("console"), "log"), vec![str_lit("pos")]))],
                Some(vec![expr_stmt(call(member(ident("console"), "log"), vec![str_lit("neg")]))]),
            ),
        ]);
        assert_eq!(
            lua,
            "-- Generated by luascript for Lua 5.4\n\
             local x = 1\n\
             if x > 0 then\n    print(\"pos\")\nelse\n    print(\"neg\")\nend\n"
        );
    }

    #[test]
    fn test_operator_mapping() {
        let lua = emit(vec![
            const_("s", bin("+", str_lit("a"), str_lit("b"))),
            func(
                "cmp",
                vec![pid("a"), pid("b")],
                vec![
                    expr_stmt(call(ident("print"), vec![bin("===", ident("a"), ident("b"))])),
                    expr_stmt(call(ident("print"), vec![bin("!==", ident("a"), ident("b"))])),
                    ret(Some(logical("&&", ident("a"), logical("||", ident("b"), unary("!", ident("a")))))),
                ],
            ),
        ]);
        assert!(lua.contains("local s, cmp\n"), "{lua}");
        assert!(lua.contains(r#"s = "a" .. "b""#), "{lua}");
        assert!(lua.contains("print(a == b)"), "{lua}");
        assert!(lua.contains("print(a ~= b)"), "{lua}");
        assert!(lua.contains("return a and (b or (not a))"), "{lua}");
    }

    #[test]
    fn test_hoisted_function_captures_block_local() {
        let lua = emit(vec![
            let_("count", num(0.0)),
            func(
                "inc",
                vec![],
                vec![
                    expr_stmt(assign("=", pid("count"), bin("+", ident("count"), num(1.0)))),
                    ret(Some(ident("count"))),
                ],
            ),
            expr_stmt(call(ident("inc"), vec![])),
        ]);
        assert_eq!(
            lua,
            "-- Generated by luascript for Lua 5.4\n\
             local count, inc\n\
             function inc()\n    count = count + 1\n    return count\nend\n\
             count = 0\n\
             inc()\n"
        );
    }

    #[test]
    fn test_hoisted_function_captures_var() {
        let lua = emit(vec![
            var_("x", Some(num(1.0))),
            func("f", vec![], vec![ret(Some(ident("x")))]),
        ]);
        let declared = lua.find("local x, f").expect("forward declaration");
        let function = lua.find("function f()").expect("function body");
        assert!(declared < function, "{lua}");
        assert!(!lua.contains("local function f"), "{lua}");
        assert!(!lua.contains("local x =") && lua.contains("x = 1"), "{lua}");
    }

    #[test]
    fn test_hoisted_function_captures_class() {
        let lua = emit(vec![
            class("Point", None, vec![]),
            func("make", vec![], vec![ret(Some(new_expr(ident("Point"), vec![])))]),
        ]);
        assert!(lua.contains("local Point, make\n"), "{lua}");
        assert!(lua.contains("\nPoint = {}\n"), "{lua}");
    }

    #[test]
    fn test_spread_preserves_order() {
        let lua = emit(vec![
            const_("mid", array(vec![num(2.0), num(3.0)])),
            const_("all", array(vec![num(1.0), spread(ident("mid")), num(4.0)])),
        ]);
        let lead = lua.find("local __t = {1}").expect("leading literal");
        let middle = lua.find("ipairs(mid)").expect("spread sequence");
        let trail = lua.find("__t[#__t + 1] = 4").expect("trailing literal");
        assert!(lead < middle && middle < trail, "{lua}");
    }

    #[test]
    fn test_rest_parameter_collects_table() {
        let lua = emit(vec![func(
            "f",
            vec![pid("a"), rest_pat(pid("rest"))],
            vec![ret(Some(ident("rest")))],
        )]);
        assert!(lua.contains("local function f(a, ...)"), "{lua}");
        assert_eq!(lua.matches("local rest = {...}").count(), 1);
    }

    #[test]
    fn test_class_with_inheritance() {
        let lua = emit(vec![
            class(
                "Animal",
                None,
                vec![
                    constructor(vec![pid("name")], vec![expr_stmt(assign("=", pmember(this(), "name"), ident("name")))]),
                    method("speak", vec![], vec![ret(Some(member(this(), "name")))]),
                ],
            ),
            class(
                "Dog",
                Some(ident("Animal")),
                vec![method("speak", vec![], vec![ret(Some(call(member(super_(), "speak"), vec![])))])],
            ),
            const_("d", new_expr(ident("Dog"), vec![str_lit("rex")])),
        ]);
        assert!(lua.contains("local Animal = {}\nAnimal.__index = Animal"), "{lua}");
        assert!(lua.contains("function Animal:__init(name)\n    self.name = name\nend"), "{lua}");
        assert!(lua.contains("function Animal:speak()\n    return self.name\nend"), "{lua}");
        assert!(lua.contains("setmetatable(Dog, {__index = Animal})"), "{lua}");
        assert!(lua.contains("Animal.__init(self, table.unpack(args))"), "{lua}");
        assert!(lua.contains("return Animal.speak(self)"), "{lua}");
        assert!(lua.contains(r#"local d = Dog.new("rex")"#), "{lua}");
    }

    #[test]
    fn test_loops_and_iteration() {
        let lua = emit(vec![
            const_("xs", array(vec![num(1.0), num(2.0)])),
            for_of(VarKind::Const, pid("x"), ident("xs"), vec![expr_stmt(call(ident("print"), vec![ident("x")]))]),
            for_in(VarKind::Const, pid("k"), ident("xs"), vec![]),
            for_(
                Some(for_let("i", num(0.0))),
                Some(bin("<", ident("i"), num(3.0))),
                Some(update("++", false, ident("i"))),
                vec![if_(bin("===", ident("i"), num(1.0)), vec![cont()], None)],
            ),
            do_while(vec![brk()], bool_lit(false)),
        ]);
        assert!(lua.contains("for _, x in ipairs(xs) do"), "{lua}");
        assert!(lua.contains("for k in pairs(xs) do"), "{lua}");
        assert!(lua.contains("while i < 3 do"), "{lua}");
        assert!(lua.contains("goto continue_1"), "{lua}");
        assert!(lua.contains("::continue_1::\n        i = i + 1"), "{lua}");
        assert!(lua.contains("repeat\n    break\nuntil not (false)"), "{lua}");
    }

    #[test]
    fn test_continue_is_rejected_on_lua51() {
        let errors = emit_with(
            vec![while_(bool_lit(true), vec![cont()])],
            &lua51(),
        )
        .unwrap_err();
        assert!(matches!(
            &errors[0],
            BackendError::Unsupported { kind: "ContinueStatement", .. }
        ));
    }

    #[test]
    fn test_try_catch_uses_pcall() {
        let lua = emit(vec![func(
            "safe",
            vec![],
            vec![try_(
                vec![ret(Some(call(ident("risky"), vec![])))],
                Some((Some(pid("e")), vec![ret(Some(ident("e")))])),
                None,
            )],
        )]);
        assert!(lua.contains("local __ok1, __res1 = pcall(function()"), "{lua}");
        assert!(lua.contains("return {risky()}"), "{lua}");
        assert!(lua.contains("local e = __res1"), "{lua}");
        assert!(lua.contains("if __ok1 and __res1 ~= nil then return __res1[1] end"), "{lua}");
    }

    #[test]
    fn test_throw_uses_error() {
        let lua = emit(vec![throw(str_lit("boom"))]);
        assert!(lua.contains(r#"error("boom", 0)"#), "{lua}");
    }

    #[test]
    fn test_switch_fallthrough_and_default() {
        let lua = emit(vec![
            let_("x", num(2.0)),
            switch(
                ident("x"),
                vec![
                    (Some(num(1.0)), vec![]),
                    (Some(num(2.0)), vec![expr_stmt(call(ident("print"), vec![str_lit("low")])), brk()]),
                    (None, vec![expr_stmt(call(ident("print"), vec![str_lit("other")]))]),
                ],
            ),
        ]);
        assert!(lua.contains("repeat\n    local __sw1 = x\n    local __ft1 = false"), "{lua}");
        assert!(lua.contains("local __hit1 = __sw1 == 1 or __sw1 == 2"), "{lua}");
        assert!(lua.contains("if __ft1 or __sw1 == 2 then"), "{lua}");
        assert!(lua.contains("if __ft1 or not __hit1 then"), "{lua}");
        assert!(lua.contains("until true"), "{lua}");
    }

    #[test]
    fn test_builtins_and_indexing() {
        let lua = emit(vec![
            const_("xs", array(vec![])),
            expr_stmt(call(member(ident("xs"), "push"), vec![num(1.0)])),
            expr_stmt(call(ident("print"), vec![member(ident("xs"), "length"), index(ident("xs"), num(0.0))])),
            expr_stmt(call(member(ident("Math"), "floor"), vec![member(ident("Math"), "PI")])),
        ]);
        assert!(lua.contains("table.insert(xs, 1)"), "{lua}");
        assert!(lua.contains("print(#xs, xs[1])"), "{lua}");
        assert!(lua.contains("local _ = math.floor(math.pi)") || lua.contains("math.floor(math.pi)"), "{lua}");
        assert!(!lua.contains("__ls_"), "no helper should be emitted:\n{lua}");
    }

    #[test]
    fn test_helpers_are_emitted_on_demand() {
        let lua = emit(vec![
            const_("a", object(vec![prop("x", num(1.0))])),
            const_("b", object(vec![spread_prop(ident("a")), prop("y", num(2.0))])),
        ]);
        assert!(lua.contains("local function __ls_assign(target, ...)"), "{lua}");
        assert!(lua.contains("local b = __ls_assign({}, a, {y = 2})"), "{lua}");
        assert!(!lua.contains("__ls_instanceof"), "{lua}");
    }

    #[test]
    fn test_getter_reports_diagnostic() {
        let module = lower(&program(vec![class(
            "Box",
            None,
            vec![getter("size", vec![ret(Some(num(1.0)))])],
        )]))
        .unwrap();
        let output = LuaBackend::default().compile(&module);
        assert!(!output.success);
        assert!(output.output.is_none());
        assert!(matches!(
            &output.diagnostics[0],
            BackendError::Unsupported { kind: "MethodDefinition", .. }
        ));
    }

    #[test]
    fn test_bitwise_needs_lua54() {
        let body = || vec![const_("m", bin("&", num(6.0), num(3.0)))];
        assert!(emit(body()).contains("local m = 6 & 3"));
        assert!(emit_with(body(), &lua51()).is_err());
    }

    #[test]
    fn test_names_and_literals() {
        assert_eq!(lua_name("end"), "end_");
        assert_eq!(lua_name("self"), "self_");
        assert_eq!(lua_name("$el"), "_Sel");
        assert_eq!(lua_string("a\"b\n"), r#""a\"b\n""#);
        assert_eq!(lua_number(3.0), "3");
        assert_eq!(lua_number(0.5), "0.5");
        assert_eq!(lua_number(f64::INFINITY), "math.huge");
        assert_eq!(lua_number(f64::NAN), "(0/0)");
    }

    #[test]
    fn test_emission_is_repeatable() {
        let module = lower(&program(vec![func("f", vec![pid("x")], vec![ret(Some(ident("x")))])])).unwrap();
        let backend = LuaBackend::default();
        assert_eq!(backend.emit(&module).unwrap(), backend.emit(&module).unwrap());
    }
}
