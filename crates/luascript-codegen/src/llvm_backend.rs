//! LLVM backend
//!
//! Renders the numeric subset of a module as textual LLVM IR in SSA form.
//! Every value is a `double`. Variables live in `alloca` slots (globals
//! in `@` globals) and temporaries are numbered `%0, %1, ...` per function,
//! so the output is accepted by `llvm-as`/`opt` as is. Top-level code runs
//! from an internal initializer registered in `@llvm.global_ctors`.
//!
//! The optimization level selects the pass pipeline recorded in the
//! header and the function attributes; native code generation is left
//! to the LLVM toolchain.
//!
//! # Example
//!
//! ```rust,ignore
//! use luascript_codegen::{CompileOptions, LlvmBackend};
//!
//! let backend = LlvmBackend::new(&CompileOptions { opt_level: 2, ..Default::default() });
//! let text = backend.emit_ir(&module)?;
//! ```

use crate::error::BackendError;
use crate::support::{
    block_body, global_number, lookup, math_call, math_constant, unsupported, Intrinsic, NumericFunction,
    NumericPlan, Slot, INIT_FUNCTION,
};
use crate::{Artifact, CodeGen, CompileOptions, CompileOutput, Target};
use luascript_ir::node::{AssignmentOperator, BinaryOperator, ListItem, LogicalOperator, UnaryOperator, UpdateOperator};
use luascript_ir::{Module, Node, NodeId, NodeKind, TransformRegistry};
use std::collections::BTreeSet;
use std::fmt::Write as _;
use tracing::debug;

const BACKEND: &str = "llvm";

/// `undefined` as a double.
const NAN: &str = "0x7FF8000000000000";

/// LLVM backend for textual SSA output
#[derive(Debug, Clone)]
pub struct LlvmBackend {
    opt_level: u8,
    triple: String,
    debug_info: bool,
}

impl Default for LlvmBackend {
    fn default() -> Self {
        Self::new(&CompileOptions::default())
    }
}

impl LlvmBackend {
    pub fn new(options: &CompileOptions) -> Self {
        Self {
            opt_level: options.opt_level.min(3),
            triple: options.target_triple.clone(),
            debug_info: options.debug_info,
        }
    }

    /// Passes selected by the optimization level, in pipeline order.
    pub fn passes(&self) -> Vec<&'static str> {
        let mut passes = Vec::new();
        if self.opt_level >= 1 {
            passes.push("mem2reg");
        }
        if self.opt_level >= 2 {
            passes.extend(["inline", "gvn"]);
        }
        if self.opt_level >= 3 {
            passes.extend(["loop-vectorize", "slp-vectorizer"]);
        }
        passes
    }

    /// Renders the module as LLVM IR text. From `-O1` up the IR optimizer
    /// runs first.
    pub fn emit_ir(&self, module: &Module) -> Result<String, Vec<BackendError>> {
        if self.opt_level >= 1 {
            let optimized = TransformRegistry::standard()
                .apply(module)
                .map_err(|e| vec![BackendError::Transform(e.to_string())])?;
            self.emit_module(&optimized)
        } else {
            self.emit_module(module)
        }
    }

    fn emit_module(&self, module: &Module) -> Result<String, Vec<BackendError>> {
        let plan = NumericPlan::new(module, BACKEND)?;
        let mut intrinsics = BTreeSet::new();
        let mut errors = Vec::new();
        let mut bodies = Vec::new();

        for func in &plan.functions {
            let emitter = FunctionEmitter::new(module, &plan, func, self.debug_info, &mut intrinsics);
            match emitter.emit_function(&self.signature(func)) {
                Ok(text) => bodies.push(text),
                Err(mut errs) => errors.append(&mut errs),
            }
        }
        if let Some(init) = &plan.init {
            let emitter = FunctionEmitter::new(module, &plan, init, self.debug_info, &mut intrinsics);
            let header = format!("define internal void @{INIT_FUNCTION}() #0");
            match emitter.emit_function(&header) {
                Ok(text) => bodies.push(text),
                Err(mut errs) => errors.append(&mut errs),
            }
        }
        if !errors.is_empty() {
            return Err(errors);
        }

        let source = module.metadata().source.as_deref().unwrap_or("luascript");
        let mut out = String::new();
        let _ = writeln!(out, "; ModuleID = '{source}'");
        let _ = writeln!(out, "source_filename = \"{source}\"");
        let _ = writeln!(out, "target triple = \"{}\"", self.triple);
        let _ = writeln!(out, "; optimization level: O{}", self.opt_level);
        let passes = self.passes();
        if !passes.is_empty() {
            let _ = writeln!(out, "; passes: {}", passes.join(", "));
        }
        out.push('\n');

        if !plan.globals.is_empty() {
            for (_, name) in &plan.globals {
                let _ = writeln!(out, "@{} = global double {NAN}", symbol(name));
            }
            out.push('\n');
        }
        if plan.init.is_some() {
            let _ = writeln!(
                out,
                "@llvm.global_ctors = appending global [1 x {{ i32, ptr, ptr }}] [{{ i32, ptr, ptr }} {{ i32 65535, ptr @{INIT_FUNCTION}, ptr null }}]\n"
            );
        }

        for body in bodies {
            out.push_str(&body);
            out.push('\n');
        }

        for intrinsic in &intrinsics {
            let params = if matches!(*intrinsic, "pow" | "minimum" | "maximum") {
                "double, double"
            } else {
                "double"
            };
            let _ = writeln!(out, "declare double @llvm.{intrinsic}.f64({params})");
        }
        if !intrinsics.is_empty() {
            out.push('\n');
        }

        let attributes = if self.opt_level == 0 {
            "noinline nounwind optnone"
        } else {
            "nounwind"
        };
        let _ = writeln!(out, "attributes #0 = {{ {attributes} }}");
        Ok(out)
    }

    fn signature(&self, func: &NumericFunction) -> String {
        let params: Vec<String> = (0..func.params.len()).map(|i| format!("double %arg{i}")).collect();
        format!("define double @{}({}) #0", symbol(&func.name), params.join(", "))
    }
}

impl CodeGen for LlvmBackend {
    fn target(&self) -> Target {
        Target::Llvm
    }

    fn compile(&self, module: &Module) -> CompileOutput {
        let result = self.emit_ir(module);
        match &result {
            Ok(text) => debug!(bytes = text.len(), opt_level = self.opt_level, triple = %self.triple, "llvm emission finished"),
            Err(errors) => debug!(errors = errors.len(), "llvm emission failed"),
        }
        CompileOutput::from_result(Target::Llvm, result.map(Artifact::Text))
    }
}

/// Global symbol for a source name.
fn symbol(name: &str) -> String {
    let valid = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '$' | '.' | '-'));
    if valid && !name.is_empty() {
        name.to_string()
    } else {
        format!("\"{name}\"")
    }
}

/// Double constant in a form `llvm-as` accepts exactly.
fn double(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{value:.1}")
    } else {
        format!("0x{:016X}", value.to_bits())
    }
}

/// Loop exits for `break` and `continue`.
struct LoopLabels {
    continue_to: String,
    break_to: String,
}

/// Emits one function body in SSA form.
struct FunctionEmitter<'m, 'i> {
    module: &'m Module,
    plan: &'m NumericPlan,
    scope: &'m NumericFunction,
    debug_info: bool,
    intrinsics: &'i mut BTreeSet<&'static str>,
    lines: Vec<String>,
    /// Alloca of each local slot
    slots: Vec<String>,
    next_value: u32,
    next_label: u32,
    /// Label of the block being filled
    block: String,
    /// The current block already ends in a terminator
    terminated: bool,
    loops: Vec<LoopLabels>,
    errors: Vec<BackendError>,
}

impl<'m, 'i> FunctionEmitter<'m, 'i> {
    fn new(
        module: &'m Module,
        plan: &'m NumericPlan,
        scope: &'m NumericFunction,
        debug_info: bool,
        intrinsics: &'i mut BTreeSet<&'static str>,
    ) -> Self {
        Self {
            module,
            plan,
            scope,
            debug_info,
            intrinsics,
            lines: Vec::new(),
            slots: Vec::new(),
            next_value: 0,
            next_label: 0,
            block: "entry".to_string(),
            terminated: false,
            loops: Vec::new(),
            errors: Vec::new(),
        }
    }

    fn returns(&self) -> bool {
        self.scope.name != INIT_FUNCTION
    }

    fn emit_function(mut self, header: &str) -> Result<String, Vec<BackendError>> {
        let scope = self.scope;
        self.lines.push("entry:".to_string());
        for (i, param) in scope.params.iter().enumerate() {
            let name = self.binding_name(*param);
            let slot = format!("%{name}.addr");
            self.instruction(format!("{slot} = alloca double"));
            self.instruction(format!("store double %arg{i}, ptr {slot}"));
            self.slots.push(slot);
        }
        for local in &scope.locals {
            let name = self.binding_name(*local);
            let slot = format!("%{name}.{local}.addr");
            self.instruction(format!("{slot} = alloca double"));
            self.instruction(format!("store double {NAN}, ptr {slot}"));
            self.slots.push(slot);
        }

        for id in &scope.body {
            if let Err(e) = self.emit_statement(*id) {
                self.errors.push(e);
            }
        }
        if !self.errors.is_empty() {
            return Err(self.errors);
        }
        if !self.terminated {
            let ret = if self.returns() { format!("ret double {NAN}") } else { "ret void".to_string() };
            self.terminator(ret);
        }

        let mut text = format!("{header} {{\n");
        for line in &self.lines {
            text.push_str(line);
            text.push('\n');
        }
        text.push_str("}\n");
        Ok(text)
    }

    fn binding_name(&self, id: NodeId) -> String {
        let name = match self.module.node(id).map(|n| &n.kind) {
            Some(NodeKind::Parameter { name } | NodeKind::VariableDeclarator { name, .. }) => name.as_str(),
            _ => "v",
        };
        name.chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
            .collect()
    }

    fn node(&self, id: NodeId) -> Result<&'m Node, BackendError> {
        lookup(self.module, id, BACKEND)
    }

    /// Appends a non-terminator. Code after a terminator goes into a fresh
    /// block with no predecessors.
    fn instruction(&mut self, text: impl Into<String>) {
        if self.terminated {
            let dead = self.label("dead");
            self.start_block(&dead);
        }
        self.lines.push(format!("  {}", text.into()));
    }

    fn terminator(&mut self, text: impl Into<String>) {
        if self.terminated {
            return;
        }
        self.lines.push(format!("  {}", text.into()));
        self.terminated = true;
    }

    fn branch(&mut self, target: &str) {
        self.terminator(format!("br label %{target}"));
    }

    fn start_block(&mut self, label: &str) {
        self.lines.push(format!("{label}:"));
        self.block = label.to_string();
        self.terminated = false;
    }

    fn label(&mut self, prefix: &str) -> String {
        let label = format!("{prefix}.{}", self.next_label);
        self.next_label += 1;
        label
    }

    /// Emits `%N = <text>` and returns `%N`.
    fn value(&mut self, text: impl AsRef<str>) -> String {
        if self.terminated {
            let dead = self.label("dead");
            self.start_block(&dead);
        }
        let name = format!("%{}", self.next_value);
        self.next_value += 1;
        self.lines.push(format!("  {name} = {}", text.as_ref()));
        name
    }

    fn slot(&self, node: &Node, binding: Option<NodeId>) -> Result<Slot, BackendError> {
        binding
            .and_then(|b| self.plan.resolve(self.scope, b))
            .ok_or_else(|| unsupported(BACKEND, node, "reference to a value outside the numeric subset"))
    }

    fn address(&self, slot: Slot, node: &Node) -> Result<String, BackendError> {
        match slot {
            Slot::Local(index) => self
                .slots
                .get(index as usize)
                .cloned()
                .ok_or(BackendError::InvalidModule { backend: BACKEND, id: node.id }),
            Slot::Global(index) => self
                .plan
                .globals
                .get(index as usize)
                .map(|(_, name)| format!("@{}", symbol(name)))
                .ok_or(BackendError::InvalidModule { backend: BACKEND, id: node.id }),
            Slot::Function(_) => Err(unsupported(BACKEND, node, "functions are not values here")),
        }
    }

    fn body(&mut self, id: NodeId) -> Result<(), BackendError> {
        for stmt in block_body(self.module, id, BACKEND)? {
            self.emit_statement(stmt)?;
        }
        Ok(())
    }

    fn emit_statement(&mut self, id: NodeId) -> Result<(), BackendError> {
        let node = self.node(id)?;
        if self.debug_info && !node.synthetic {
            if let Some(span) = &node.span {
                self.lines.push(format!("  ; line {}", span.start.line));
            }
        }
        match &node.kind {
            NodeKind::ExpressionStatement { expression } => {
                self.emit_expr(*expression)?;
            }
            NodeKind::VariableDeclaration { declarations, .. } => {
                for declarator in declarations {
                    let decl = self.node(*declarator)?;
                    let NodeKind::VariableDeclarator { init, .. } = &decl.kind else {
                        return Err(unsupported(BACKEND, decl, "expected a VariableDeclarator"));
                    };
                    let value = match init {
                        Some(init) => self.emit_expr(*init)?,
                        None => NAN.to_string(),
                    };
                    let address = self.address(self.slot(decl, Some(decl.id))?, decl)?;
                    self.instruction(format!("store double {value}, ptr {address}"));
                }
            }
            NodeKind::BlockStatement { body } => {
                for stmt in body {
                    self.emit_statement(*stmt)?;
                }
            }
            NodeKind::EmptyStatement => {}
            NodeKind::IfStatement {
                test,
                consequent,
                alternate,
            } => {
                let then_label = self.label("if.then");
                let end_label = self.label("if.end");
                let else_label = match alternate {
                    Some(_) => self.label("if.else"),
                    None => end_label.clone(),
                };
                let condition = self.emit_condition(*test)?;
                self.terminator(format!("br i1 {condition}, label %{then_label}, label %{else_label}"));
                self.start_block(&then_label);
                self.body(*consequent)?;
                self.branch(&end_label);
                if let Some(alternate) = alternate {
                    self.start_block(&else_label);
                    self.body(*alternate)?;
                    self.branch(&end_label);
                }
                self.start_block(&end_label);
            }
            NodeKind::WhileStatement { test, body } => {
                let cond_label = self.label("while.cond");
                let body_label = self.label("while.body");
                let end_label = self.label("while.end");
                self.branch(&cond_label);
                self.start_block(&cond_label);
                let condition = self.emit_condition(*test)?;
                self.terminator(format!("br i1 {condition}, label %{body_label}, label %{end_label}"));
                self.start_block(&body_label);
                self.loop_body(*body, &cond_label, &end_label)?;
                self.branch(&cond_label);
                self.start_block(&end_label);
            }
            NodeKind::DoWhileStatement { body, test } => {
                let body_label = self.label("do.body");
                let cond_label = self.label("do.cond");
                let end_label = self.label("do.end");
                self.branch(&body_label);
                self.start_block(&body_label);
                self.loop_body(*body, &cond_label, &end_label)?;
                self.branch(&cond_label);
                self.start_block(&cond_label);
                let condition = self.emit_condition(*test)?;
                self.terminator(format!("br i1 {condition}, label %{body_label}, label %{end_label}"));
                self.start_block(&end_label);
            }
            NodeKind::ForStatement {
                init,
                test,
                update,
                body,
            } => {
                if let Some(init) = init {
                    match &self.node(*init)?.kind {
                        NodeKind::VariableDeclaration { .. } => self.emit_statement(*init)?,
                        _ => {
                            self.emit_expr(*init)?;
                        }
                    }
                }
                let cond_label = self.label("for.cond");
                let body_label = self.label("for.body");
                let update_label = self.label("for.update");
                let end_label = self.label("for.end");
                self.branch(&cond_label);
                self.start_block(&cond_label);
                match test {
                    Some(test) => {
                        let condition = self.emit_condition(*test)?;
                        self.terminator(format!("br i1 {condition}, label %{body_label}, label %{end_label}"));
                    }
                    None => self.branch(&body_label),
                }
                self.start_block(&body_label);
                self.loop_body(*body, &update_label, &end_label)?;
                self.branch(&update_label);
                self.start_block(&update_label);
                if let Some(update) = update {
                    self.emit_expr(*update)?;
                }
                self.branch(&cond_label);
                self.start_block(&end_label);
            }
            NodeKind::BreakStatement => {
                let target = self
                    .loops
                    .last()
                    .map(|l| l.break_to.clone())
                    .ok_or_else(|| unsupported(BACKEND, node, "break outside of a loop"))?;
                self.branch(&target);
            }
            NodeKind::ContinueStatement => {
                let target = self
                    .loops
                    .last()
                    .map(|l| l.continue_to.clone())
                    .ok_or_else(|| unsupported(BACKEND, node, "continue outside of a loop"))?;
                self.branch(&target);
            }
            NodeKind::ReturnStatement { argument } => {
                if !self.returns() {
                    return Err(unsupported(BACKEND, node, "return outside of a function"));
                }
                let value = match argument {
                    Some(argument) => self.emit_expr(*argument)?,
                    None => NAN.to_string(),
                };
                self.terminator(format!("ret double {value}"));
            }
            NodeKind::FunctionDeclaration(_) => {
                return Err(unsupported(BACKEND, node, "nested functions need closures"));
            }
            _ => return Err(unsupported(BACKEND, node, "outside the numeric subset")),
        }
        Ok(())
    }

    fn loop_body(&mut self, body: NodeId, continue_to: &str, break_to: &str) -> Result<(), BackendError> {
        self.loops.push(LoopLabels {
            continue_to: continue_to.to_string(),
            break_to: break_to.to_string(),
        });
        let result = self.body(body);
        self.loops.pop();
        result
    }

    /// Emits `id` as an `i1`.
    fn emit_condition(&mut self, id: NodeId) -> Result<String, BackendError> {
        let node = self.node(id)?;
        match &node.kind {
            NodeKind::BinaryExpression { operator, left, right } if operator.is_comparison() => {
                let l = self.emit_expr(*left)?;
                let r = self.emit_expr(*right)?;
                self.compare(node, *operator, &l, &r)
            }
            _ => {
                let value = self.emit_expr(id)?;
                Ok(self.truthy(&value))
            }
        }
    }

    /// Ordered compare, so NaN is falsy.
    fn truthy(&mut self, value: &str) -> String {
        self.value(format!("fcmp one double {value}, 0.0"))
    }

    fn compare(&mut self, at: &Node, operator: BinaryOperator, l: &str, r: &str) -> Result<String, BackendError> {
        use BinaryOperator::*;
        let predicate = match operator {
            Eq | StrictEq => "oeq",
            NotEq | StrictNotEq => "une",
            Lt => "olt",
            LtEq => "ole",
            Gt => "ogt",
            GtEq => "oge",
            _ => return Err(unsupported(BACKEND, at, format!("`{operator}` is not numeric"))),
        };
        Ok(self.value(format!("fcmp {predicate} double {l}, {r}")))
    }

    fn call_intrinsic(&mut self, name: &'static str, args: &[String]) -> String {
        self.intrinsics.insert(name);
        let args: Vec<String> = args.iter().map(|a| format!("double {a}")).collect();
        self.value(format!("call double @llvm.{name}.f64({})", args.join(", ")))
    }

    fn arithmetic(&mut self, at: &Node, operator: BinaryOperator, l: &str, r: &str) -> Result<String, BackendError> {
        use BinaryOperator::*;
        let op = match operator {
            Add => "fadd",
            Sub => "fsub",
            Mul => "fmul",
            Div => "fdiv",
            Rem => "frem",
            Exp => return Ok(self.call_intrinsic("pow", &[l.to_string(), r.to_string()])),
            op if op.is_comparison() => {
                let flag = self.compare(at, op, l, r)?;
                return Ok(self.value(format!("uitofp i1 {flag} to double")));
            }
            op => return Err(unsupported(BACKEND, at, format!("`{op}` is not numeric"))),
        };
        Ok(self.value(format!("{op} double {l}, {r}")))
    }

    /// `value` then `phi` join of two arms. `arms` emits each arm and
    /// returns its value.
    fn select(
        &mut self,
        condition: &str,
        prefix: &str,
        mut arm: impl FnMut(&mut Self, bool) -> Result<String, BackendError>,
    ) -> Result<String, BackendError> {
        let then_label = self.label(&format!("{prefix}.then"));
        let else_label = self.label(&format!("{prefix}.else"));
        let end_label = self.label(&format!("{prefix}.end"));
        self.terminator(format!("br i1 {condition}, label %{then_label}, label %{else_label}"));

        self.start_block(&then_label);
        let then_value = arm(self, true)?;
        let then_from = self.block.clone();
        self.branch(&end_label);

        self.start_block(&else_label);
        let else_value = arm(self, false)?;
        let else_from = self.block.clone();
        self.branch(&end_label);

        self.start_block(&end_label);
        Ok(self.value(format!(
            "phi double [ {then_value}, %{then_from} ], [ {else_value}, %{else_from} ]"
        )))
    }

    fn emit_expr(&mut self, id: NodeId) -> Result<String, BackendError> {
        let node = self.node(id)?;
        Ok(match &node.kind {
            NodeKind::NumericLiteral { value } => double(*value),
            NodeKind::BooleanLiteral { value } => double(if *value { 1.0 } else { 0.0 }),
            NodeKind::NullLiteral => double(0.0),
            NodeKind::UndefinedLiteral => NAN.to_string(),
            NodeKind::Identifier { binding, .. } => match global_number(&node.kind) {
                Some(value) => double(value),
                None => {
                    let address = self.address(self.slot(node, *binding)?, node)?;
                    self.value(format!("load double, ptr {address}"))
                }
            },
            NodeKind::MemberExpression { .. } => math_constant(self.module, id)
                .map(double)
                .ok_or_else(|| unsupported(BACKEND, node, "only Math constants are numeric members"))?,
            NodeKind::BinaryExpression { operator, left, right } => {
                let l = self.emit_expr(*left)?;
                let r = self.emit_expr(*right)?;
                self.arithmetic(node, *operator, &l, &r)?
            }
            NodeKind::LogicalExpression { operator, left, right } => {
                let l = self.emit_expr(*left)?;
                if *operator == LogicalOperator::Nullish {
                    return Ok(l);
                }
                let condition = self.truthy(&l);
                let and = *operator == LogicalOperator::And;
                let right = *right;
                let prefix = if and { "and" } else { "or" };
                self.select(&condition, prefix, |e, taken| {
                    if taken == and {
                        e.emit_expr(right)
                    } else {
                        Ok(l.clone())
                    }
                })?
            }
            NodeKind::UnaryExpression { operator, argument } => match operator {
                UnaryOperator::Neg => {
                    let value = self.emit_expr(*argument)?;
                    self.value(format!("fneg double {value}"))
                }
                UnaryOperator::Plus => self.emit_expr(*argument)?,
                UnaryOperator::Not => {
                    let flag = self.emit_condition(*argument)?;
                    let inverted = self.value(format!("xor i1 {flag}, true"));
                    self.value(format!("uitofp i1 {inverted} to double"))
                }
                UnaryOperator::Void => {
                    self.emit_expr(*argument)?;
                    NAN.to_string()
                }
                op => return Err(unsupported(BACKEND, node, format!("`{op}` is not numeric"))),
            },
            NodeKind::UpdateExpression {
                operator,
                prefix,
                argument,
            } => {
                let target = self.node(*argument)?;
                let NodeKind::Identifier { binding, .. } = &target.kind else {
                    return Err(unsupported(BACKEND, node, "only variables can be updated"));
                };
                let address = self.address(self.slot(target, *binding)?, target)?;
                let old = self.value(format!("load double, ptr {address}"));
                let op = match operator {
                    UpdateOperator::Increment => "fadd",
                    UpdateOperator::Decrement => "fsub",
                };
                let new = self.value(format!("{op} double {old}, 1.0"));
                self.instruction(format!("store double {new}, ptr {address}"));
                if *prefix {
                    new
                } else {
                    old
                }
            }
            NodeKind::AssignmentExpression {
                operator,
                target,
                value,
            } => {
                let target = self.node(*target)?;
                let NodeKind::Identifier { binding, .. } = &target.kind else {
                    return Err(unsupported(BACKEND, node, "only variables can be assigned"));
                };
                let address = self.address(self.slot(target, *binding)?, target)?;
                let result = match (operator, operator.binary()) {
                    (AssignmentOperator::Assign, _) => self.emit_expr(*value)?,
                    (_, Some(op)) => {
                        let current = self.value(format!("load double, ptr {address}"));
                        let rhs = self.emit_expr(*value)?;
                        self.arithmetic(node, op, &current, &rhs)?
                    }
                    (op, None) => return Err(unsupported(BACKEND, node, format!("`{op}` is not supported"))),
                };
                self.instruction(format!("store double {result}, ptr {address}"));
                result
            }
            NodeKind::ConditionalExpression {
                test,
                consequent,
                alternate,
            } => {
                let condition = self.emit_condition(*test)?;
                let (consequent, alternate) = (*consequent, *alternate);
                self.select(&condition, "cond", |e, taken| {
                    e.emit_expr(if taken { consequent } else { alternate })
                })?
            }
            NodeKind::CallExpression { callee, arguments, .. } => self.emit_call(node, *callee, arguments)?,
            NodeKind::SequenceExpression { expressions } => {
                let mut last = NAN.to_string();
                for expression in expressions {
                    last = self.emit_expr(*expression)?;
                }
                last
            }
            _ => return Err(unsupported(BACKEND, node, "outside the numeric subset")),
        })
    }

    fn emit_call(&mut self, node: &Node, callee: NodeId, arguments: &[ListItem]) -> Result<String, BackendError> {
        if arguments.iter().any(|item| item.spread) {
            return Err(unsupported(BACKEND, node, "spread arguments need an array runtime"));
        }
        let mut values = Vec::with_capacity(arguments.len());
        if let Some(intrinsic) = math_call(self.module, callee) {
            if arguments.len() != intrinsic.arity() {
                return Err(unsupported(
                    BACKEND,
                    node,
                    format!("Math call expects {} argument(s)", intrinsic.arity()),
                ));
            }
            for item in arguments {
                values.push(self.emit_expr(item.value)?);
            }
            return Ok(match intrinsic {
                Intrinsic::Sqrt => self.call_intrinsic("sqrt", &values),
                Intrinsic::Abs => self.call_intrinsic("fabs", &values),
                Intrinsic::Floor => self.call_intrinsic("floor", &values),
                Intrinsic::Ceil => self.call_intrinsic("ceil", &values),
                Intrinsic::Trunc => self.call_intrinsic("trunc", &values),
                Intrinsic::Round => {
                    let shifted = self.value(format!("fadd double {}, 0.5", values[0]));
                    self.call_intrinsic("floor", &[shifted])
                }
                Intrinsic::Min => self.call_intrinsic("minimum", &values),
                Intrinsic::Max => self.call_intrinsic("maximum", &values),
                Intrinsic::Pow => self.call_intrinsic("pow", &values),
            });
        }

        let callee_node = self.node(callee)?;
        let NodeKind::Identifier { binding, .. } = &callee_node.kind else {
            return Err(unsupported(BACKEND, node, "only direct calls are supported"));
        };
        let Ok(Slot::Function(index)) = self.slot(callee_node, *binding) else {
            return Err(unsupported(BACKEND, node, "callee is not a top-level function"));
        };
        let function = self
            .plan
            .function(index)
            .ok_or(BackendError::InvalidModule { backend: BACKEND, id: callee })?;
        for item in arguments {
            values.push(self.emit_expr(item.value)?);
        }
        // Extra arguments are evaluated and dropped, missing ones are undefined.
        values.resize(function.params.len(), NAN.to_string());
        let args: Vec<String> = values.iter().map(|v| format!("double {v}")).collect();
        Ok(self.value(format!("call double @{}({})", symbol(&function.name), args.join(", "))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use luascript_ast::build::*;
    use luascript_ast::Stmt;
    use luascript_ir::lower;

    fn emit_at(body: Vec<Stmt>, opt_level: u8) -> Result<String, Vec<BackendError>> {
        let module = lower(&program(body)).expect("program should lower");
        let options = CompileOptions {
            opt_level,
            target_triple: "x86_64-unknown-linux-gnu".to_string(),
            ..CompileOptions::default()
        };
        LlvmBackend::new(&options).emit_ir(&module)
    }

    fn emit(body: Vec<Stmt>) -> String {
        emit_at(body, 0).expect("llvm emission should succeed")
    }

    /// `%N` definitions of every function, in text order.
    fn value_numbers(ir: &str) -> Vec<Vec<u32>> {
        let mut functions = Vec::new();
        for line in ir.lines() {
            if line.starts_with("define ") {
                functions.push(Vec::new());
            }
            let trimmed = line.trim_start();
            if let Some(rest) = trimmed.strip_prefix('%') {
                if let Some((number, _)) = rest.split_once(" = ") {
                    if let (Ok(n), Some(current)) = (number.parse::<u32>(), functions.last_mut()) {
                        current.push(n);
                    }
                }
            }
        }
        functions
    }

    #[test]
    fn test_add_function() {
        let ir = emit(vec![func(
            "add",
            vec![pid("a"), pid("b")],
            vec![ret(Some(bin("+", ident("a"), ident("b"))))],
        )]);
        assert!(ir.starts_with("; ModuleID = 'luascript'\n"), "{ir}");
        assert!(ir.contains("target triple = \"x86_64-unknown-linux-gnu\""), "{ir}");
        assert!(ir.contains("define double @add(double %arg0, double %arg1) #0 {"), "{ir}");
        assert!(ir.contains("%a.addr = alloca double"), "{ir}");
        assert!(ir.contains("%2 = fadd double %0, %1"), "{ir}");
        assert!(ir.contains("ret double %2"), "{ir}");
        assert!(ir.contains("attributes #0 = { noinline nounwind optnone }"), "{ir}");
    }

    #[test]
    fn test_globals_use_constructor() {
        let ir = emit(vec![let_("count", num(2.0)), expr_stmt(update("++", false, ident("count")))]);
        assert!(ir.contains("@count = global double 0x7FF8000000000000"), "{ir}");
        assert!(ir.contains("@llvm.global_ctors = appending global"), "{ir}");
        assert!(ir.contains("define internal void @__luascript_init() #0 {"), "{ir}");
        assert!(ir.contains("store double 2.0, ptr @count"), "{ir}");
        assert!(ir.contains("ret void"), "{ir}");
    }

    #[test]
    fn test_control_flow_is_ssa() {
        let ir = emit(vec![func(
            "sum",
            vec![pid("n")],
            vec![
                let_("total", num(0.0)),
                for_(
                    Some(for_let("i", num(0.0))),
                    Some(bin("<", ident("i"), ident("n"))),
                    Some(update("++", false, ident("i"))),
                    vec![
                        if_(bin("===", ident("i"), num(3.0)), vec![cont()], None),
                        if_(bin(">", ident("total"), num(50.0)), vec![brk()], None),
                        expr_stmt(assign("+=", pid("total"), ident("i"))),
                    ],
                ),
                ret(Some(cond(
                    logical("&&", ident("total"), ident("n")),
                    ident("total"),
                    unary("-", num(1.0)),
                ))),
            ],
        )]);
        assert!(ir.contains("br label %for.cond."), "{ir}");
        assert!(ir.contains("br label %for.update."), "{ir}");
        assert!(ir.contains("phi double"), "{ir}");
        for numbers in value_numbers(&ir) {
            let expected: Vec<u32> = (0..numbers.len() as u32).collect();
            assert_eq!(numbers, expected, "values must be numbered in order:\n{ir}");
        }
    }

    #[test]
    fn test_intrinsics_are_declared() {
        let ir = emit(vec![func(
            "f",
            vec![pid("x")],
            vec![ret(Some(bin(
                "**",
                call(member(ident("Math"), "sqrt"), vec![ident("x")]),
                num(2.0),
            )))],
        )]);
        assert!(ir.contains("call double @llvm.sqrt.f64(double %0)"), "{ir}");
        assert!(ir.contains("declare double @llvm.pow.f64(double, double)"), "{ir}");
        assert!(ir.contains("declare double @llvm.sqrt.f64(double)"), "{ir}");
    }

    #[test]
    fn test_optimization_levels() {
        let body = || vec![func("id", vec![pid("x")], vec![ret(Some(ident("x")))])];
        let o0 = emit_at(body(), 0).unwrap();
        assert!(!o0.contains("; passes:"));
        let o2 = emit_at(body(), 2).unwrap();
        assert!(o2.contains("; passes: mem2reg, inline, gvn"), "{o2}");
        assert!(o2.contains("attributes #0 = { nounwind }"), "{o2}");
        let o3 = emit_at(body(), 3).unwrap();
        assert!(o3.contains("loop-vectorize, slp-vectorizer"), "{o3}");
    }

    #[test]
    fn test_missing_arguments_are_undefined() {
        let ir = emit(vec![
            func("pair", vec![pid("a"), pid("b")], vec![ret(Some(ident("b")))]),
            const_("r", call(ident("pair"), vec![num(1.0)])),
        ]);
        assert!(ir.contains("call double @pair(double 1.0, double 0x7FF8000000000000)"), "{ir}");
    }

    #[test]
    fn test_strings_are_rejected() {
        let errors = emit_at(vec![func("f", vec![], vec![ret(Some(str_lit("x")))])], 0).unwrap_err();
        assert!(matches!(
            &errors[0],
            BackendError::Unsupported { backend: "llvm", kind: "StringLiteral", .. }
        ));
    }

    #[test]
    fn test_double_constants() {
        assert_eq!(double(2.0), "2.0");
        assert_eq!(double(-3.0), "-3.0");
        assert_eq!(double(0.5), "0x3FE0000000000000");
        assert_eq!(double(f64::INFINITY), "0x7FF0000000000000");
    }
}
