//! WebAssembly backend
//!
//! Encodes the numeric subset of a module as a binary WASM module. Every
//! value is an `f64`; booleans are `1.0`/`0.0` and `undefined` is NaN.
//! Top-level variables become mutable globals initialized by a start
//! function; top-level functions are exported by name.

use crate::error::BackendError;
use crate::support::{
    block_body, global_number, lookup, math_call, math_constant, unsupported, Intrinsic, NumericFunction,
    NumericPlan, Slot,
};
use crate::{Artifact, CodeGen, CompileOptions, CompileOutput, Target};
use luascript_ir::node::{AssignmentOperator, BinaryOperator, ListItem, LogicalOperator, UnaryOperator, UpdateOperator};
use luascript_ir::{Module, Node, NodeId, NodeKind, TransformRegistry};
use std::collections::BTreeMap;
use tracing::debug;
use wasm_encoder::{
    BlockType, CodeSection, ConstExpr, ExportKind, ExportSection, Function, FunctionSection, GlobalSection,
    GlobalType, Instruction, StartSection, TypeSection, ValType,
};

const BACKEND: &str = "wasm";

#[derive(Debug, Clone)]
pub struct WasmBackend {
    /// Run the IR optimizer before encoding
    optimize: bool,
}

impl Default for WasmBackend {
    fn default() -> Self {
        Self { optimize: true }
    }
}

impl WasmBackend {
    pub fn new(options: &CompileOptions) -> Self {
        Self {
            optimize: options.wasm_optimize,
        }
    }

    pub fn encode(&self, module: &Module) -> Result<Vec<u8>, Vec<BackendError>> {
        if self.optimize {
            let optimized = TransformRegistry::standard()
                .apply(module)
                .map_err(|e| vec![BackendError::Transform(e.to_string())])?;
            encode_module(&optimized)
        } else {
            encode_module(module)
        }
    }
}

impl CodeGen for WasmBackend {
    fn target(&self) -> Target {
        Target::Wasm
    }

    fn compile(&self, module: &Module) -> CompileOutput {
        let result = self.encode(module);
        match &result {
            Ok(bytes) => debug!(bytes = bytes.len(), optimize = self.optimize, "wasm encoding finished"),
            Err(errors) => debug!(errors = errors.len(), "wasm encoding failed"),
        }
        CompileOutput::from_result(Target::Wasm, result.map(Artifact::Binary))
    }
}

/// Function type table, one entry per distinct signature.
#[derive(Default)]
struct Types {
    section: TypeSection,
    indices: BTreeMap<(usize, bool), u32>,
}

impl Types {
    fn index(&mut self, params: usize, returns: bool) -> u32 {
        if let Some(index) = self.indices.get(&(params, returns)) {
            return *index;
        }
        let index = self.indices.len() as u32;
        let results = if returns { vec![ValType::F64] } else { Vec::new() };
        self.section.ty().function(vec![ValType::F64; params], results);
        self.indices.insert((params, returns), index);
        index
    }
}

fn encode_module(module: &Module) -> Result<Vec<u8>, Vec<BackendError>> {
    let plan = NumericPlan::new(module, BACKEND)?;
    let mut errors = Vec::new();

    let mut types = Types::default();
    let mut functions = FunctionSection::new();
    let mut code = CodeSection::new();

    for func in &plan.functions {
        functions.function(types.index(func.params.len(), true));
        match FuncGen::new(module, &plan, func, true).finish() {
            Ok(body) => {
                code.function(&body);
            }
            Err(mut errs) => errors.append(&mut errs),
        }
    }
    let start = match &plan.init {
        Some(init) => {
            functions.function(types.index(0, false));
            match FuncGen::new(module, &plan, init, false).finish() {
                Ok(body) => {
                    code.function(&body);
                }
                Err(mut errs) => errors.append(&mut errs),
            }
            Some(plan.functions.len() as u32)
        }
        None => None,
    };

    if !errors.is_empty() {
        return Err(errors);
    }

    let mut globals = GlobalSection::new();
    for _ in &plan.globals {
        globals.global(
            GlobalType {
                val_type: ValType::F64,
                mutable: true,
                shared: false,
            },
            &ConstExpr::f64_const(f64::NAN),
        );
    }

    // A later declaration of the same name wins, as in the source language.
    let mut exported = BTreeMap::new();
    for (index, func) in plan.functions.iter().enumerate() {
        exported.insert(func.name.as_str(), index as u32);
    }
    let mut exports = ExportSection::new();
    for (name, index) in &exported {
        exports.export(name, ExportKind::Func, *index);
    }

    let mut wasm = wasm_encoder::Module::new();
    wasm.section(&types.section);
    wasm.section(&functions);
    if !plan.globals.is_empty() {
        wasm.section(&globals);
    }
    wasm.section(&exports);
    if let Some(function_index) = start {
        wasm.section(&StartSection { function_index });
    }
    wasm.section(&code);

    debug!(
        functions = plan.functions.len(),
        globals = plan.globals.len(),
        has_init = start.is_some(),
        "encoded wasm module"
    );
    Ok(wasm.finish())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Label {
    Break,
    Continue,
    Other,
}

/// Instruction generation for one function.
struct FuncGen<'m> {
    module: &'m Module,
    plan: &'m NumericPlan,
    scope: &'m NumericFunction,
    returns: bool,
    insts: Vec<Instruction<'static>>,
    labels: Vec<Label>,
    /// Extra locals allocated past the declared slots
    scratch: u32,
    errors: Vec<BackendError>,
}

impl<'m> FuncGen<'m> {
    fn new(module: &'m Module, plan: &'m NumericPlan, scope: &'m NumericFunction, returns: bool) -> Self {
        Self {
            module,
            plan,
            scope,
            returns,
            insts: Vec::new(),
            labels: Vec::new(),
            scratch: 0,
            errors: Vec::new(),
        }
    }

    fn finish(mut self) -> Result<Function, Vec<BackendError>> {
        let scope = self.scope;
        for id in &scope.body {
            if let Err(e) = self.statement(*id) {
                self.errors.push(e);
            }
        }
        if !self.errors.is_empty() {
            return Err(self.errors);
        }
        if self.returns {
            // Falling off the end returns `undefined`.
            self.insts.push(Instruction::F64Const(f64::NAN));
        }
        self.insts.push(Instruction::End);

        let declared = self.scope.locals.len() as u32 + self.scratch;
        let mut func = Function::new([(declared, ValType::F64)]);
        for inst in &self.insts {
            func.instruction(inst);
        }
        Ok(func)
    }

    fn node(&self, id: NodeId) -> Result<&'m Node, BackendError> {
        lookup(self.module, id, BACKEND)
    }

    fn emit(&mut self, inst: Instruction<'static>) {
        self.insts.push(inst);
    }

    fn temp(&mut self) -> u32 {
        let index = self.scope.slot_count() + self.scratch;
        self.scratch += 1;
        index
    }

    fn slot(&self, node: &Node, binding: Option<NodeId>) -> Result<Slot, BackendError> {
        binding
            .and_then(|b| self.plan.resolve(self.scope, b))
            .ok_or_else(|| unsupported(BACKEND, node, "reference to a value outside the numeric subset"))
    }

    fn load(&mut self, slot: Slot, node: &Node) -> Result<(), BackendError> {
        match slot {
            Slot::Local(index) => self.emit(Instruction::LocalGet(index)),
            Slot::Global(index) => self.emit(Instruction::GlobalGet(index)),
            Slot::Function(_) => return Err(unsupported(BACKEND, node, "functions are not values here")),
        }
        Ok(())
    }

    /// Stores the top of the stack, leaving the stored value behind.
    fn store(&mut self, slot: Slot, node: &Node) -> Result<(), BackendError> {
        match slot {
            Slot::Local(index) => self.emit(Instruction::LocalTee(index)),
            Slot::Global(index) => {
                self.emit(Instruction::GlobalSet(index));
                self.emit(Instruction::GlobalGet(index));
            }
            Slot::Function(_) => return Err(unsupported(BACKEND, node, "cannot assign to a function")),
        }
        Ok(())
    }

    fn depth_of(&self, wanted: Label) -> Option<u32> {
        self.labels
            .iter()
            .rev()
            .position(|label| *label == wanted)
            .map(|depth| depth as u32)
    }

    fn body(&mut self, id: NodeId) -> Result<(), BackendError> {
        for stmt in block_body(self.module, id, BACKEND)? {
            self.statement(stmt)?;
        }
        Ok(())
    }

    fn statement(&mut self, id: NodeId) -> Result<(), BackendError> {
        let node = self.node(id)?;
        match &node.kind {
            NodeKind::ExpressionStatement { expression } => {
                self.expr(*expression)?;
                self.emit(Instruction::Drop);
            }
            NodeKind::VariableDeclaration { declarations, .. } => {
                for declarator in declarations {
                    let decl = self.node(*declarator)?;
                    let NodeKind::VariableDeclarator { init, .. } = &decl.kind else {
                        return Err(unsupported(BACKEND, decl, "expected a VariableDeclarator"));
                    };
                    match init {
                        Some(init) => self.expr(*init)?,
                        None => self.emit(Instruction::F64Const(f64::NAN)),
                    }
                    let slot = self.slot(decl, Some(decl.id))?;
                    self.store(slot, decl)?;
                    self.emit(Instruction::Drop);
                }
            }
            NodeKind::BlockStatement { body } => {
                for stmt in body {
                    self.statement(*stmt)?;
                }
            }
            NodeKind::EmptyStatement => {}
            NodeKind::IfStatement {
                test,
                consequent,
                alternate,
            } => {
                self.condition(*test)?;
                self.emit(Instruction::If(BlockType::Empty));
                self.labels.push(Label::Other);
                self.body(*consequent)?;
                if let Some(alternate) = alternate {
                    self.emit(Instruction::Else);
                    self.body(*alternate)?;
                }
                self.labels.pop();
                self.emit(Instruction::End);
            }
            NodeKind::WhileStatement { test, body } => {
                self.emit(Instruction::Block(BlockType::Empty));
                self.emit(Instruction::Loop(BlockType::Empty));
                self.labels.extend([Label::Break, Label::Continue]);
                self.condition(*test)?;
                self.emit(Instruction::I32Eqz);
                self.emit(Instruction::BrIf(1));
                self.body(*body)?;
                self.emit(Instruction::Br(0));
                self.labels.truncate(self.labels.len() - 2);
                self.emit(Instruction::End);
                self.emit(Instruction::End);
            }
            NodeKind::DoWhileStatement { body, test } => {
                self.emit(Instruction::Block(BlockType::Empty));
                self.emit(Instruction::Loop(BlockType::Empty));
                self.emit(Instruction::Block(BlockType::Empty));
                self.labels.extend([Label::Break, Label::Other, Label::Continue]);
                self.body(*body)?;
                self.labels.pop();
                self.emit(Instruction::End);
                self.condition(*test)?;
                self.emit(Instruction::BrIf(0));
                self.labels.truncate(self.labels.len() - 2);
                self.emit(Instruction::End);
                self.emit(Instruction::End);
            }
            NodeKind::ForStatement {
                init,
                test,
                update,
                body,
            } => {
                if let Some(init) = init {
                    match &self.node(*init)?.kind {
                        NodeKind::VariableDeclaration { .. } => self.statement(*init)?,
                        _ => {
                            self.expr(*init)?;
                            self.emit(Instruction::Drop);
                        }
                    }
                }
                self.emit(Instruction::Block(BlockType::Empty));
                self.emit(Instruction::Loop(BlockType::Empty));
                self.labels.extend([Label::Break, Label::Other]);
                if let Some(test) = test {
                    self.condition(*test)?;
                    self.emit(Instruction::I32Eqz);
                    self.emit(Instruction::BrIf(1));
                }
                self.emit(Instruction::Block(BlockType::Empty));
                self.labels.push(Label::Continue);
                self.body(*body)?;
                self.labels.pop();
                self.emit(Instruction::End);
                if let Some(update) = update {
                    self.expr(*update)?;
                    self.emit(Instruction::Drop);
                }
                self.emit(Instruction::Br(0));
                self.labels.truncate(self.labels.len() - 2);
                self.emit(Instruction::End);
                self.emit(Instruction::End);
            }
            NodeKind::BreakStatement => {
                let depth = self
                    .depth_of(Label::Break)
                    .ok_or_else(|| unsupported(BACKEND, node, "break outside of a loop"))?;
                self.emit(Instruction::Br(depth));
            }
            NodeKind::ContinueStatement => {
                let depth = self
                    .depth_of(Label::Continue)
                    .ok_or_else(|| unsupported(BACKEND, node, "continue outside of a loop"))?;
                self.emit(Instruction::Br(depth));
            }
            NodeKind::ReturnStatement { argument } => {
                if !self.returns {
                    return Err(unsupported(BACKEND, node, "return outside of a function"));
                }
                match argument {
                    Some(argument) => self.expr(*argument)?,
                    None => self.emit(Instruction::F64Const(f64::NAN)),
                }
                self.emit(Instruction::Return);
            }
            NodeKind::FunctionDeclaration(_) => {
                return Err(unsupported(BACKEND, node, "nested functions need closures"));
            }
            _ => return Err(unsupported(BACKEND, node, "outside the numeric subset")),
        }
        Ok(())
    }

    /// Pushes an `i32` truth value for `id`.
    fn condition(&mut self, id: NodeId) -> Result<(), BackendError> {
        let node = self.node(id)?;
        match &node.kind {
            NodeKind::BinaryExpression { operator, left, right } if operator.is_comparison() => {
                self.expr(*left)?;
                self.expr(*right)?;
                self.compare(node, *operator)
            }
            _ => {
                self.expr(id)?;
                self.truthy();
                Ok(())
            }
        }
    }

    /// f64 on the stack to an `i32` truth value: neither zero nor NaN.
    fn truthy(&mut self) {
        let t = self.temp();
        self.emit(Instruction::LocalTee(t));
        self.emit(Instruction::F64Const(0.0));
        self.emit(Instruction::F64Ne);
        self.emit(Instruction::LocalGet(t));
        self.emit(Instruction::LocalGet(t));
        self.emit(Instruction::F64Eq);
        self.emit(Instruction::I32And);
    }

    fn compare(&mut self, at: &Node, operator: BinaryOperator) -> Result<(), BackendError> {
        use BinaryOperator::*;
        let inst = match operator {
            Eq | StrictEq => Instruction::F64Eq,
            NotEq | StrictNotEq => Instruction::F64Ne,
            Lt => Instruction::F64Lt,
            LtEq => Instruction::F64Le,
            Gt => Instruction::F64Gt,
            GtEq => Instruction::F64Ge,
            _ => return Err(unsupported(BACKEND, at, format!("`{operator}` is not numeric"))),
        };
        self.emit(inst);
        Ok(())
    }

    /// Applies `operator` to the two f64 values on the stack.
    fn arithmetic(&mut self, at: &Node, operator: BinaryOperator) -> Result<(), BackendError> {
        use BinaryOperator::*;
        match operator {
            Add => self.emit(Instruction::F64Add),
            Sub => self.emit(Instruction::F64Sub),
            Mul => self.emit(Instruction::F64Mul),
            Div => self.emit(Instruction::F64Div),
            Rem => {
                // a - trunc(a / b) * b keeps the sign of the dividend
                let (a, b) = (self.temp(), self.temp());
                self.emit(Instruction::LocalSet(b));
                self.emit(Instruction::LocalSet(a));
                self.emit(Instruction::LocalGet(a));
                self.emit(Instruction::LocalGet(a));
                self.emit(Instruction::LocalGet(b));
                self.emit(Instruction::F64Div);
                self.emit(Instruction::F64Trunc);
                self.emit(Instruction::LocalGet(b));
                self.emit(Instruction::F64Mul);
                self.emit(Instruction::F64Sub);
            }
            op if op.is_comparison() => {
                self.compare(at, op)?;
                self.emit(Instruction::F64ConvertI32U);
            }
            Exp => return Err(unsupported(BACKEND, at, "`**` has no WebAssembly instruction")),
            op => return Err(unsupported(BACKEND, at, format!("`{op}` is not numeric"))),
        }
        Ok(())
    }

    fn expr(&mut self, id: NodeId) -> Result<(), BackendError> {
        let node = self.node(id)?;
        match &node.kind {
            NodeKind::NumericLiteral { value } => self.emit(Instruction::F64Const(*value)),
            NodeKind::BooleanLiteral { value } => self.emit(Instruction::F64Const(if *value { 1.0 } else { 0.0 })),
            NodeKind::NullLiteral => self.emit(Instruction::F64Const(0.0)),
            NodeKind::UndefinedLiteral => self.emit(Instruction::F64Const(f64::NAN)),
            NodeKind::Identifier { binding, .. } => match global_number(&node.kind) {
                Some(value) => self.emit(Instruction::F64Const(value)),
                None => {
                    let slot = self.slot(node, *binding)?;
                    self.load(slot, node)?;
                }
            },
            NodeKind::MemberExpression { .. } => {
                let value = math_constant(self.module, id)
                    .ok_or_else(|| unsupported(BACKEND, node, "only Math constants are numeric members"))?;
                self.emit(Instruction::F64Const(value));
            }
            NodeKind::BinaryExpression { operator, left, right } => {
                self.expr(*left)?;
                self.expr(*right)?;
                self.arithmetic(node, *operator)?;
            }
            NodeKind::LogicalExpression { operator, left, right } => {
                self.expr(*left)?;
                if *operator == LogicalOperator::Nullish {
                    // numbers are never nullish
                    return Ok(());
                }
                let kept = self.temp();
                self.emit(Instruction::LocalTee(kept));
                self.truthy();
                self.emit(Instruction::If(BlockType::Result(ValType::F64)));
                if *operator == LogicalOperator::And {
                    self.expr(*right)?;
                    self.emit(Instruction::Else);
                    self.emit(Instruction::LocalGet(kept));
                } else {
                    self.emit(Instruction::LocalGet(kept));
                    self.emit(Instruction::Else);
                    self.expr(*right)?;
                }
                self.emit(Instruction::End);
            }
            NodeKind::UnaryExpression { operator, argument } => match operator {
                UnaryOperator::Neg => {
                    self.expr(*argument)?;
                    self.emit(Instruction::F64Neg);
                }
                UnaryOperator::Plus => self.expr(*argument)?,
                UnaryOperator::Not => {
                    self.condition(*argument)?;
                    self.emit(Instruction::I32Eqz);
                    self.emit(Instruction::F64ConvertI32U);
                }
                UnaryOperator::Void => {
                    self.expr(*argument)?;
                    self.emit(Instruction::Drop);
                    self.emit(Instruction::F64Const(f64::NAN));
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
                let slot = self.slot(target, *binding)?;
                let step = match operator {
                    UpdateOperator::Increment => Instruction::F64Add,
                    UpdateOperator::Decrement => Instruction::F64Sub,
                };
                self.load(slot, target)?;
                if !*prefix {
                    self.load(slot, target)?;
                }
                self.emit(Instruction::F64Const(1.0));
                self.emit(step);
                self.store(slot, target)?;
                if !*prefix {
                    self.emit(Instruction::Drop);
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
                let slot = self.slot(target, *binding)?;
                match (operator, operator.binary()) {
                    (AssignmentOperator::Assign, _) => self.expr(*value)?,
                    (_, Some(op)) => {
                        self.load(slot, target)?;
                        self.expr(*value)?;
                        self.arithmetic(node, op)?;
                    }
                    (op, None) => return Err(unsupported(BACKEND, node, format!("`{op}` is not supported"))),
                }
                self.store(slot, target)?;
            }
            NodeKind::ConditionalExpression {
                test,
                consequent,
                alternate,
            } => {
                self.condition(*test)?;
                self.emit(Instruction::If(BlockType::Result(ValType::F64)));
                self.expr(*consequent)?;
                self.emit(Instruction::Else);
                self.expr(*alternate)?;
                self.emit(Instruction::End);
            }
            NodeKind::CallExpression { callee, arguments, .. } => self.call(node, *callee, arguments)?,
            NodeKind::SequenceExpression { expressions } => {
                let Some((last, init)) = expressions.split_last() else {
                    return Err(unsupported(BACKEND, node, "empty sequence"));
                };
                for expression in init {
                    self.expr(*expression)?;
                    self.emit(Instruction::Drop);
                }
                self.expr(*last)?;
            }
            _ => return Err(unsupported(BACKEND, node, "outside the numeric subset")),
        }
        Ok(())
    }

    fn call(&mut self, node: &Node, callee: NodeId, arguments: &[ListItem]) -> Result<(), BackendError> {
        if arguments.iter().any(|item| item.spread) {
            return Err(unsupported(BACKEND, node, "spread arguments need an array runtime"));
        }
        if let Some(intrinsic) = math_call(self.module, callee) {
            return self.intrinsic(node, intrinsic, arguments);
        }
        let callee_node = self.node(callee)?;
        let NodeKind::Identifier { binding, .. } = &callee_node.kind else {
            return Err(unsupported(BACKEND, node, "only direct calls are supported"));
        };
        let Ok(Slot::Function(index)) = self.slot(callee_node, *binding) else {
            return Err(unsupported(BACKEND, node, "callee is not a top-level function"));
        };
        let arity = self.plan.function(index).map_or(0, |f| f.params.len());
        for (i, item) in arguments.iter().enumerate() {
            self.expr(item.value)?;
            if i >= arity {
                self.emit(Instruction::Drop);
            }
        }
        // Missing arguments are `undefined`.
        for _ in arguments.len()..arity {
            self.emit(Instruction::F64Const(f64::NAN));
        }
        self.emit(Instruction::Call(index));
        Ok(())
    }

    fn intrinsic(&mut self, node: &Node, intrinsic: Intrinsic, arguments: &[ListItem]) -> Result<(), BackendError> {
        if arguments.len() != intrinsic.arity() {
            return Err(unsupported(
                BACKEND,
                node,
                format!("Math call expects {} argument(s)", intrinsic.arity()),
            ));
        }
        if intrinsic == Intrinsic::Pow {
            return Err(unsupported(BACKEND, node, "Math.pow has no WebAssembly instruction"));
        }
        for item in arguments {
            self.expr(item.value)?;
        }
        match intrinsic {
            Intrinsic::Sqrt => self.emit(Instruction::F64Sqrt),
            Intrinsic::Abs => self.emit(Instruction::F64Abs),
            Intrinsic::Floor => self.emit(Instruction::F64Floor),
            Intrinsic::Ceil => self.emit(Instruction::F64Ceil),
            Intrinsic::Trunc => self.emit(Instruction::F64Trunc),
            Intrinsic::Round => {
                self.emit(Instruction::F64Const(0.5));
                self.emit(Instruction::F64Add);
                self.emit(Instruction::F64Floor);
            }
            Intrinsic::Min => self.emit(Instruction::F64Min),
            Intrinsic::Max => self.emit(Instruction::F64Max),
            Intrinsic::Pow => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use luascript_ast::build::*;
    use luascript_ast::Stmt;
    use luascript_ir::lower;
    use wasmparser::{Parser, Payload, Validator};

    fn encode_with(body: Vec<Stmt>, optimize: bool) -> Result<Vec<u8>, Vec<BackendError>> {
        let module = lower(&program(body)).expect("program should lower");
        WasmBackend { optimize }.encode(&module)
    }

    fn encode(body: Vec<Stmt>) -> Vec<u8> {
        let bytes = encode_with(body, false).expect("wasm encoding should succeed");
        Validator::new().validate_all(&bytes).expect("module should validate");
        bytes
    }

    fn exports(bytes: &[u8]) -> Vec<String> {
        let mut names = Vec::new();
        for payload in Parser::new(0).parse_all(bytes) {
            if let Ok(Payload::ExportSection(reader)) = payload {
                for export in reader {
                    names.push(export.unwrap().name.to_string());
                }
            }
        }
        names
    }

    fn add_function() -> Stmt {
        func("add", vec![pid("a"), pid("b")], vec![ret(Some(bin("+", ident("a"), ident("b"))))])
    }

    #[test]
    fn test_add_function() {
        let bytes = encode(vec![add_function()]);
        assert_eq!(&bytes[..4], b"\0asm");
        assert_eq!(exports(&bytes), vec!["add"]);
    }

    #[test]
    fn test_compile_output() {
        let module = lower(&program(vec![add_function()])).unwrap();
        let output = WasmBackend::default().compile(&module);
        assert!(output.success);
        assert!(output.bytes().is_some_and(|b| !b.is_empty()));
    }

    #[test]
    fn test_globals_and_loops() {
        encode(vec![
            let_("total", num(0.0)),
            for_(
                Some(for_let("i", num(0.0))),
                Some(bin("<", ident("i"), num(10.0))),
                Some(update("++", false, ident("i"))),
                vec![
                    if_(bin("===", bin("%", ident("i"), num(2.0)), num(0.0)), vec![cont()], None),
                    expr_stmt(assign("+=", pid("total"), ident("i"))),
                ],
            ),
            while_(
                bool_lit(true),
                vec![if_(bin(">", ident("total"), num(100.0)), vec![brk()], None), expr_stmt(update("--", true, ident("total")))],
            ),
            do_while(vec![expr_stmt(assign("=", pid("total"), num(1.0)))], bool_lit(false)),
        ]);
    }

    #[test]
    fn test_math_logic_and_calls() {
        let bytes = encode(vec![
            func(
                "hyp",
                vec![pid("x"), pid("y")],
                vec![ret(Some(call(
                    member(ident("Math"), "sqrt"),
                    vec![bin("+", bin("*", ident("x"), ident("x")), bin("*", ident("y"), ident("y")))],
                )))],
            ),
            func(
                "pick",
                vec![pid("a"), pid("b")],
                vec![ret(Some(cond(
                    logical("&&", ident("a"), unary("!", ident("b"))),
                    member(ident("Math"), "PI"),
                    logical("||", ident("b"), ident("NaN")),
                )))],
            ),
            const_("h", call(ident("hyp"), vec![num(3.0)])),
        ]);
        assert_eq!(exports(&bytes), vec!["hyp", "pick"]);
    }

    #[test]
    fn test_strings_are_rejected() {
        let errors = encode_with(vec![const_("s", str_lit("hi"))], false).unwrap_err();
        assert!(matches!(
            &errors[0],
            BackendError::Unsupported { backend: "wasm", kind: "StringLiteral", .. }
        ));
    }

    #[test]
    fn test_failure_has_no_output() {
        let module = lower(&program(vec![func("f", vec![], vec![ret(Some(array(vec![])))])])).unwrap();
        let output = WasmBackend::default().compile(&module);
        assert!(!output.success);
        assert!(output.output.is_none());
        assert!(!output.diagnostics.is_empty());
    }

    #[test]
    fn test_optimized_module_validates() {
        let bytes = encode_with(
            vec![
                func("double", vec![pid("n")], vec![ret(Some(bin("*", ident("n"), num(2.0))))]),
                const_("x", bin("+", num(1.0), num(2.0))),
                if_(bool_lit(false), vec![expr_stmt(call(ident("double"), vec![ident("x")]))], None),
            ],
            true,
        )
        .unwrap();
        Validator::new().validate_all(&bytes).unwrap();
    }
}
