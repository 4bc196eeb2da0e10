//! MLIR backend
//!
//! Builds an op tree in a `luascript` dialect that mirrors the IR one node
//! to one op, then prints it as MLIR text. Statement children become
//! regions; expression children become operands. Every value has the
//! type `!luascript.value`.
//!
//! With canonicalization enabled, three passes run before printing:
//! constant folding, common subexpression elimination scoped by region,
//! and removal of pure ops whose results are unused.

use crate::error::BackendError;
use crate::support::{block_body, global_number, lookup, unsupported};
use crate::{Artifact, CodeGen, CompileOptions, CompileOutput, Target};
use luascript_ir::node::{BinaryOperator, ClassNode, FunctionNode, IterationKind, ListItem, MethodKind, UnaryOperator};
use luascript_ir::{Module, Node, NodeId, NodeKind, SCHEMA_VERSION};
use std::collections::HashMap;
use std::fmt::Write as _;
use tracing::{debug, trace};

const BACKEND: &str = "mlir";
const VALUE_TYPE: &str = "!luascript.value";

#[derive(Debug, Clone)]
pub struct MlirBackend {
    canonicalize: bool,
}

impl Default for MlirBackend {
    fn default() -> Self {
        Self { canonicalize: true }
    }
}

impl MlirBackend {
    pub fn new(options: &CompileOptions) -> Self {
        Self {
            canonicalize: options.mlir_canonicalize,
        }
    }

    pub fn emit(&self, module: &Module) -> Result<String, Vec<BackendError>> {
        let mut gen = OpBuilder::new(module);
        let mut ops = Vec::new();
        for id in module.body() {
            if let Err(e) = gen.statement(*id, &mut ops) {
                gen.errors.push(e);
            }
        }
        if !gen.errors.is_empty() {
            return Err(gen.errors);
        }

        if self.canonicalize {
            let folded = fold_constants(&mut ops, &mut HashMap::new());
            let merged = eliminate_common(&mut ops, &mut vec![HashMap::new()], &mut HashMap::new());
            let removed = remove_dead(&mut ops);
            trace!(folded, merged, removed, "mlir canonicalization");
        }

        let mut out = String::new();
        let _ = writeln!(out, "// Generated by luascript");
        if self.canonicalize {
            let _ = writeln!(out, "// passes: canonicalize, cse");
        }
        let _ = writeln!(out, "module attributes {{luascript.schema = \"{SCHEMA_VERSION}\"}} {{");
        let mut printer = Printer::default();
        for op in &ops {
            printer.op(op, 1, &mut out);
        }
        out.push_str("}\n");
        Ok(out)
    }
}

impl CodeGen for MlirBackend {
    fn target(&self) -> Target {
        Target::Mlir
    }

    fn compile(&self, module: &Module) -> CompileOutput {
        let result = self.emit(module);
        match &result {
            Ok(text) => debug!(bytes = text.len(), canonicalize = self.canonicalize, "mlir emission finished"),
            Err(errors) => debug!(errors = errors.len(), "mlir emission failed"),
        }
        CompileOutput::from_result(Target::Mlir, result.map(Artifact::Text))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct Value(u32);

#[derive(Debug, Clone, PartialEq)]
enum Attr {
    Num(f64),
    Str(String),
    Bool(bool),
    /// Bare word such as `null`
    Keyword(&'static str),
    Strings(Vec<String>),
    Ints(Vec<usize>),
}

impl Attr {
    fn truthiness(&self) -> Option<bool> {
        match self {
            Attr::Num(n) => Some(*n != 0.0 && !n.is_nan()),
            Attr::Str(s) => Some(!s.is_empty()),
            Attr::Bool(b) => Some(*b),
            Attr::Keyword(_) => Some(false),
            _ => None,
        }
    }
}

impl std::fmt::Display for Attr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Attr::Num(n) => f.write_str(&float(*n)),
            Attr::Str(s) => f.write_str(&quote(s)),
            Attr::Bool(b) => write!(f, "{b}"),
            Attr::Keyword(k) => f.write_str(k),
            Attr::Strings(items) => {
                let items: Vec<String> = items.iter().map(|s| quote(s)).collect();
                write!(f, "[{}]", items.join(", "))
            }
            Attr::Ints(items) => {
                let items: Vec<String> = items.iter().map(|i| i.to_string()).collect();
                write!(f, "[{}]", items.join(", "))
            }
        }
    }
}

fn float(n: f64) -> String {
    if n.is_nan() {
        "0x7FF8000000000000".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "0x7FF0000000000000" } else { "0xFFF0000000000000" }.to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{n:.1}")
    } else {
        format!("{n:?}")
    }
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\{:02X}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

#[derive(Debug, Clone)]
struct Op {
    name: &'static str,
    result: Option<Value>,
    operands: Vec<Value>,
    attrs: Vec<(&'static str, Attr)>,
    regions: Vec<Vec<Op>>,
    /// No side effects; removable when unused
    pure: bool,
    /// Identical ops compute identical values
    cse: bool,
    /// Regions see no values from outside
    isolated: bool,
}

impl Op {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            result: None,
            operands: Vec::new(),
            attrs: Vec::new(),
            regions: Vec::new(),
            pure: false,
            cse: false,
            isolated: false,
        }
    }

    fn constant(value: Attr) -> Self {
        Op::new("constant").attr("value", value).pure().cse()
    }

    fn operands(mut self, operands: Vec<Value>) -> Self {
        self.operands = operands;
        self
    }

    fn attr(mut self, key: &'static str, value: Attr) -> Self {
        self.attrs.push((key, value));
        self
    }

    fn attrs(mut self, attrs: Vec<(&'static str, Attr)>) -> Self {
        self.attrs.extend(attrs);
        self
    }

    fn region(mut self, ops: Vec<Op>) -> Self {
        self.regions.push(ops);
        self
    }

    fn pure(mut self) -> Self {
        self.pure = true;
        self
    }

    fn cse(mut self) -> Self {
        self.cse = true;
        self
    }

    fn isolated(mut self) -> Self {
        self.isolated = true;
        self
    }

    fn value(&self) -> Option<&Attr> {
        match (self.name, self.attrs.first()) {
            ("constant", Some((_, value))) => Some(value),
            _ => None,
        }
    }

    /// Identity of the computation for CSE.
    fn key(&self) -> String {
        let attrs: Vec<String> = self.attrs.iter().map(|(k, v)| format!("{k}={v}")).collect();
        format!("{}{:?}{}", self.name, self.operands, attrs.join(","))
    }
}

fn binary_mnemonic(operator: BinaryOperator) -> &'static str {
    use BinaryOperator::*;
    match operator {
        Add => "add",
        Sub => "sub",
        Mul => "mul",
        Div => "div",
        Rem => "rem",
        Exp => "pow",
        Eq => "eq",
        NotEq => "ne",
        StrictEq => "strict_eq",
        StrictNotEq => "strict_ne",
        Lt => "lt",
        LtEq => "le",
        Gt => "gt",
        GtEq => "ge",
        BitAnd => "bit_and",
        BitOr => "bit_or",
        BitXor => "bit_xor",
        Shl => "shl",
        Shr => "shr",
        UShr => "ushr",
        In => "in",
        InstanceOf => "instanceof",
    }
}

fn unary_mnemonic(operator: UnaryOperator) -> &'static str {
    match operator {
        UnaryOperator::Neg => "neg",
        UnaryOperator::Plus => "plus",
        UnaryOperator::Not => "not",
        UnaryOperator::BitNot => "bit_not",
        UnaryOperator::TypeOf => "typeof",
        UnaryOperator::Void => "void",
        UnaryOperator::Delete => "delete",
    }
}

/// Lowers IR nodes to ops.
struct OpBuilder<'m> {
    module: &'m Module,
    next: u32,
    errors: Vec<BackendError>,
}

impl<'m> OpBuilder<'m> {
    fn new(module: &'m Module) -> Self {
        Self {
            module,
            next: 0,
            errors: Vec::new(),
        }
    }

    fn node(&self, id: NodeId) -> Result<&'m Node, BackendError> {
        lookup(self.module, id, BACKEND)
    }

    /// Appends `op` with a fresh result and returns it.
    fn push(&mut self, ops: &mut Vec<Op>, mut op: Op) -> Value {
        let value = Value(self.next);
        self.next += 1;
        op.result = Some(value);
        ops.push(op);
        value
    }

    fn name_of(&self, id: NodeId) -> Result<String, BackendError> {
        let node = self.node(id)?;
        match &node.kind {
            NodeKind::Parameter { name } | NodeKind::VariableDeclarator { name, .. } => Ok(name.clone()),
            NodeKind::StringLiteral { value } => Ok(value.clone()),
            NodeKind::RestElement { argument } => self.name_of(*argument),
            _ => Err(unsupported(BACKEND, node, "expected a name")),
        }
    }

    fn statements(&mut self, ids: &[NodeId]) -> Result<Vec<Op>, BackendError> {
        let mut ops = Vec::new();
        for id in ids {
            self.statement(*id, &mut ops)?;
        }
        Ok(ops)
    }

    fn body(&mut self, id: NodeId) -> Result<Vec<Op>, BackendError> {
        let body = block_body(self.module, id, BACKEND)?;
        self.statements(&body)
    }

    /// Region computing `id` and yielding it.
    fn yielding(&mut self, id: NodeId) -> Result<Vec<Op>, BackendError> {
        let mut region = Vec::new();
        let value = self.expr(id, &mut region)?;
        region.push(Op::new("yield").operands(vec![value]));
        Ok(region)
    }

    fn statement(&mut self, id: NodeId, ops: &mut Vec<Op>) -> Result<(), BackendError> {
        let node = self.node(id)?;
        let op = match &node.kind {
            NodeKind::ExpressionStatement { expression } => {
                self.expr(*expression, ops)?;
                return Ok(());
            }
            NodeKind::VariableDeclaration {
                declaration_kind,
                declarations,
            } => {
                for declarator in declarations {
                    let decl = self.node(*declarator)?;
                    let NodeKind::VariableDeclarator { name, init } = &decl.kind else {
                        return Err(unsupported(BACKEND, decl, "expected a VariableDeclarator"));
                    };
                    let operands = match init {
                        Some(init) => vec![self.expr(*init, ops)?],
                        None => Vec::new(),
                    };
                    ops.push(
                        Op::new("declare")
                            .operands(operands)
                            .attr("kind", Attr::Str(declaration_kind.as_str().to_string()))
                            .attr("name", Attr::Str(name.clone())),
                    );
                }
                return Ok(());
            }
            NodeKind::EmptyStatement => return Ok(()),
            NodeKind::FunctionDeclaration(func) => self.function("func", func)?,
            NodeKind::ClassDeclaration(class) => self.class(class, ops)?,
            NodeKind::BlockStatement { body } => Op::new("block").region(self.statements(body)?),
            NodeKind::IfStatement {
                test,
                consequent,
                alternate,
            } => {
                let condition = self.expr(*test, ops)?;
                let alternate = match alternate {
                    Some(alternate) => self.body(*alternate)?,
                    None => Vec::new(),
                };
                Op::new("if")
                    .operands(vec![condition])
                    .region(self.body(*consequent)?)
                    .region(alternate)
            }
            NodeKind::ForStatement {
                init,
                test,
                update,
                body,
            } => {
                let mut init_region = Vec::new();
                if let Some(init) = init {
                    match &self.node(*init)?.kind {
                        NodeKind::VariableDeclaration { .. } => self.statement(*init, &mut init_region)?,
                        _ => {
                            self.expr(*init, &mut init_region)?;
                        }
                    }
                }
                let test_region = match test {
                    Some(test) => self.yielding(*test)?,
                    None => Vec::new(),
                };
                let mut update_region = Vec::new();
                if let Some(update) = update {
                    self.expr(*update, &mut update_region)?;
                }
                Op::new("for")
                    .region(init_region)
                    .region(test_region)
                    .region(update_region)
                    .region(self.body(*body)?)
            }
            NodeKind::ForEachStatement {
                iterate,
                binding,
                iterable,
                body,
            } => {
                let iterable = self.expr(*iterable, ops)?;
                let iterate = match iterate {
                    IterationKind::Values => "values",
                    IterationKind::Keys => "keys",
                };
                Op::new("for_each")
                    .operands(vec![iterable])
                    .attr("iterate", Attr::Str(iterate.to_string()))
                    .attr("name", Attr::Str(self.name_of(*binding)?))
                    .region(self.body(*body)?)
            }
            NodeKind::WhileStatement { test, body } => {
                Op::new("while").region(self.yielding(*test)?).region(self.body(*body)?)
            }
            NodeKind::DoWhileStatement { body, test } => {
                Op::new("do_while").region(self.body(*body)?).region(self.yielding(*test)?)
            }
            NodeKind::BreakStatement => Op::new("break"),
            NodeKind::ContinueStatement => Op::new("continue"),
            NodeKind::ReturnStatement { argument } => {
                let operands = match argument {
                    Some(argument) => vec![self.expr(*argument, ops)?],
                    None => Vec::new(),
                };
                Op::new("return").operands(operands)
            }
            NodeKind::ThrowStatement { argument } => Op::new("throw").operands(vec![self.expr(*argument, ops)?]),
            NodeKind::TryStatement {
                block,
                handler,
                finalizer,
            } => {
                let mut op = Op::new("try").region(self.body(*block)?);
                match handler {
                    Some(handler) => {
                        let clause = self.node(*handler)?;
                        let NodeKind::CatchClause { param, body } = &clause.kind else {
                            return Err(unsupported(BACKEND, clause, "expected a CatchClause"));
                        };
                        if let Some(param) = param {
                            op = op.attr("param", Attr::Str(self.name_of(*param)?));
                        }
                        op = op.region(self.body(*body)?);
                    }
                    None => op = op.region(Vec::new()),
                }
                match finalizer {
                    Some(finalizer) => op.region(self.body(*finalizer)?),
                    None => op.region(Vec::new()),
                }
            }
            NodeKind::SwitchStatement { discriminant, cases } => {
                let discriminant = self.expr(*discriminant, ops)?;
                let mut region = Vec::new();
                for case in cases {
                    let node = self.node(*case)?;
                    let NodeKind::SwitchCase { test, consequent } = &node.kind else {
                        return Err(unsupported(BACKEND, node, "expected a SwitchCase"));
                    };
                    let case_op = match test {
                        Some(test) => Op::new("case").operands(vec![self.expr(*test, &mut region)?]),
                        None => Op::new("case").attr("default", Attr::Bool(true)),
                    };
                    region.push(case_op.region(self.statements(consequent)?));
                }
                Op::new("switch").operands(vec![discriminant]).region(region)
            }
            _ => return Err(unsupported(BACKEND, node, "not a statement")),
        };
        ops.push(op);
        Ok(())
    }

    fn function(&mut self, name: &'static str, func: &FunctionNode) -> Result<Op, BackendError> {
        let mut op = Op::new(name);
        if let Some(function_name) = &func.name {
            op = op.attr("name", Attr::Str(function_name.clone()));
        }
        let params = func
            .params
            .iter()
            .map(|p| self.name_of(*p))
            .collect::<Result<Vec<_>, _>>()?;
        op = op.attr("params", Attr::Strings(params));
        if let Some(rest) = func.rest {
            op = op.attr("rest", Attr::Str(self.name_of(rest)?));
        }
        if func.is_async {
            op = op.attr("async", Attr::Bool(true));
        }
        Ok(op.region(self.body(func.body)?).isolated())
    }

    fn class(&mut self, class: &ClassNode, ops: &mut Vec<Op>) -> Result<Op, BackendError> {
        let operands = match class.super_class {
            Some(super_class) => vec![self.expr(super_class, ops)?],
            None => Vec::new(),
        };
        let mut region = Vec::new();
        let constructor = self.node(class.constructor)?;
        let Some(func) = constructor.kind.as_function() else {
            return Err(unsupported(BACKEND, constructor, "expected a function"));
        };
        region.push(self.function("constructor", func)?);

        for method in &class.methods {
            let node = self.node(*method)?;
            let NodeKind::MethodDefinition {
                key,
                value,
                method_kind,
                is_static,
                ..
            } = &node.kind
            else {
                return Err(unsupported(BACKEND, node, "expected a MethodDefinition"));
            };
            let function = self.node(*value)?;
            let Some(func) = function.kind.as_function() else {
                return Err(unsupported(BACKEND, function, "expected a function"));
            };
            let kind = match method_kind {
                MethodKind::Method => "method",
                MethodKind::Get => "get",
                MethodKind::Set => "set",
            };
            region.push(
                self.function("method", func)?
                    .attr("key", Attr::Str(key.clone()))
                    .attr("kind", Attr::Str(kind.to_string()))
                    .attr("static", Attr::Bool(*is_static)),
            );
        }

        for property in &class.static_properties {
            let node = self.node(*property)?;
            let NodeKind::Property { key, value, computed } = &node.kind else {
                return Err(unsupported(BACKEND, node, "expected a Property"));
            };
            let mut op = Op::new("static_property");
            let mut operands = Vec::new();
            if *computed {
                operands.push(self.expr(*key, &mut region)?);
            } else {
                op = op.attr("key", Attr::Str(self.name_of(*key)?));
            }
            operands.push(self.expr(*value, &mut region)?);
            region.push(op.operands(operands));
        }

        Ok(Op::new("class")
            .operands(operands)
            .attr("name", Attr::Str(class.name.clone()))
            .region(region))
    }

    /// Operands and attributes naming an assignment target.
    fn place(&mut self, id: NodeId, ops: &mut Vec<Op>) -> Result<(Vec<Value>, Vec<(&'static str, Attr)>), BackendError> {
        let node = self.node(id)?;
        match &node.kind {
            NodeKind::Identifier { name, .. } => Ok((Vec::new(), vec![("name", Attr::Str(name.clone()))])),
            NodeKind::MemberExpression {
                object,
                property,
                computed: false,
            } => {
                let object = self.expr(*object, ops)?;
                Ok((vec![object], vec![("property", Attr::Str(self.name_of(*property)?))]))
            }
            NodeKind::MemberExpression { object, property, .. } => {
                let object = self.expr(*object, ops)?;
                let key = self.expr(*property, ops)?;
                Ok((vec![object, key], vec![("computed", Attr::Bool(true))]))
            }
            _ => Err(unsupported(BACKEND, node, "not an assignment target")),
        }
    }

    /// Values of an argument or element list and the spread positions.
    fn list(&mut self, items: &[ListItem], ops: &mut Vec<Op>) -> Result<(Vec<Value>, Vec<usize>), BackendError> {
        let mut values = Vec::with_capacity(items.len());
        let mut spread = Vec::new();
        for (i, item) in items.iter().enumerate() {
            values.push(self.expr(item.value, ops)?);
            if item.spread {
                spread.push(i);
            }
        }
        Ok((values, spread))
    }

    fn expr(&mut self, id: NodeId, ops: &mut Vec<Op>) -> Result<Value, BackendError> {
        let node = self.node(id)?;
        let op = match &node.kind {
            NodeKind::NumericLiteral { value } => Op::constant(Attr::Num(*value)),
            NodeKind::StringLiteral { value } => Op::constant(Attr::Str(value.clone())),
            NodeKind::TemplateElement { cooked, .. } => Op::constant(Attr::Str(cooked.clone())),
            NodeKind::BooleanLiteral { value } => Op::constant(Attr::Bool(*value)),
            NodeKind::NullLiteral => Op::constant(Attr::Keyword("null")),
            NodeKind::UndefinedLiteral => Op::constant(Attr::Keyword("undefined")),
            NodeKind::TemplateLiteral { parts } => {
                let mut quasis = Vec::new();
                let mut values = Vec::new();
                for part in parts {
                    match &self.node(*part)?.kind {
                        NodeKind::TemplateElement { cooked, .. } => quasis.push(cooked.clone()),
                        _ => values.push(self.expr(*part, ops)?),
                    }
                }
                Op::new("template").operands(values).attr("quasis", Attr::Strings(quasis)).pure()
            }
            NodeKind::Identifier { name, .. } => match global_number(&node.kind) {
                Some(value) => Op::constant(Attr::Num(value)),
                None => Op::new("ref").attr("name", Attr::Str(name.clone())).pure(),
            },
            NodeKind::ThisExpression => Op::new("this").pure().cse(),
            NodeKind::Super => Op::new("super").pure(),
            NodeKind::BinaryExpression { operator, left, right } => {
                let l = self.expr(*left, ops)?;
                let r = self.expr(*right, ops)?;
                Op::new(binary_mnemonic(*operator)).operands(vec![l, r]).pure().cse()
            }
            NodeKind::LogicalExpression { operator, left, right } => {
                let l = self.expr(*left, ops)?;
                Op::new("logical")
                    .operands(vec![l])
                    .attr("operator", Attr::Str(operator.as_str().to_string()))
                    .region(self.yielding(*right)?)
            }
            NodeKind::UnaryExpression { operator, argument } => {
                let value = self.expr(*argument, ops)?;
                let op = Op::new(unary_mnemonic(*operator)).operands(vec![value]);
                if *operator == UnaryOperator::Delete {
                    op
                } else {
                    op.pure().cse()
                }
            }
            NodeKind::UpdateExpression {
                operator,
                prefix,
                argument,
            } => {
                let (operands, attrs) = self.place(*argument, ops)?;
                Op::new("update")
                    .operands(operands)
                    .attrs(attrs)
                    .attr("operator", Attr::Str(operator.as_str().to_string()))
                    .attr("prefix", Attr::Bool(*prefix))
            }
            NodeKind::AssignmentExpression {
                operator,
                target,
                value,
            } => {
                let (mut operands, attrs) = self.place(*target, ops)?;
                operands.push(self.expr(*value, ops)?);
                Op::new("assign")
                    .operands(operands)
                    .attrs(attrs)
                    .attr("operator", Attr::Str(operator.as_str().to_string()))
            }
            NodeKind::ConditionalExpression {
                test,
                consequent,
                alternate,
            } => {
                let condition = self.expr(*test, ops)?;
                Op::new("select")
                    .operands(vec![condition])
                    .region(self.yielding(*consequent)?)
                    .region(self.yielding(*alternate)?)
            }
            NodeKind::CallExpression { callee, arguments, .. } | NodeKind::NewExpression { callee, arguments, .. } => {
                let callee = self.expr(*callee, ops)?;
                let (args, spread) = self.list(arguments, ops)?;
                let name = if matches!(node.kind, NodeKind::NewExpression { .. }) { "new" } else { "call" };
                let mut op = Op::new(name).operands(std::iter::once(callee).chain(args).collect());
                if !spread.is_empty() {
                    op = op.attr("spread", Attr::Ints(spread));
                }
                op
            }
            NodeKind::MemberExpression {
                object,
                property,
                computed,
            } => {
                let object = self.expr(*object, ops)?;
                if *computed {
                    let key = self.expr(*property, ops)?;
                    Op::new("get_index").operands(vec![object, key])
                } else {
                    Op::new("get_property")
                        .operands(vec![object])
                        .attr("name", Attr::Str(self.name_of(*property)?))
                }
            }
            NodeKind::ArrayExpression { elements, .. } => {
                let (values, spread) = self.list(elements, ops)?;
                let op = Op::new("array").operands(values);
                if spread.is_empty() {
                    op
                } else {
                    op.attr("spread", Attr::Ints(spread))
                }
            }
            NodeKind::ObjectExpression { properties } => {
                let mut region = Vec::new();
                for property in properties {
                    let node = self.node(*property)?;
                    match &node.kind {
                        NodeKind::Property { key, value, computed } => {
                            let mut op = Op::new("property");
                            let mut operands = Vec::new();
                            if *computed {
                                operands.push(self.expr(*key, &mut region)?);
                            } else {
                                op = op.attr("key", Attr::Str(self.name_of(*key)?));
                            }
                            operands.push(self.expr(*value, &mut region)?);
                            region.push(op.operands(operands));
                        }
                        NodeKind::SpreadElement { argument } => {
                            let value = self.expr(*argument, &mut region)?;
                            region.push(Op::new("spread").operands(vec![value]));
                        }
                        _ => return Err(unsupported(BACKEND, node, "expected an object member")),
                    }
                }
                Op::new("object").region(region)
            }
            NodeKind::SequenceExpression { expressions } => {
                let values = expressions
                    .iter()
                    .map(|e| self.expr(*e, ops))
                    .collect::<Result<Vec<_>, _>>()?;
                Op::new("sequence").operands(values)
            }
            NodeKind::AwaitExpression { argument } => Op::new("await").operands(vec![self.expr(*argument, ops)?]),
            NodeKind::FunctionExpression(func) => self.function("closure", func)?,
            NodeKind::ArrowFunctionExpression(func) => self.function("closure", func)?.attr("arrow", Attr::Bool(true)),
            NodeKind::ClassExpression(class) => self.class(class, ops)?,
            _ => return Err(unsupported(BACKEND, node, "not an expression")),
        };
        Ok(self.push(ops, op))
    }
}

/// Folds constant operands into `constant` ops. Definitions precede uses
/// in walk order, so one pass sees every foldable op.
fn fold_constants(ops: &mut [Op], constants: &mut HashMap<Value, Attr>) -> usize {
    let mut folded = 0;
    for op in ops.iter_mut() {
        if op.regions.is_empty() && op.name != "constant" {
            let args: Option<Vec<&Attr>> = op.operands.iter().map(|v| constants.get(v)).collect();
            if let Some(value) = args.and_then(|args| evaluate(op.name, &args)) {
                *op = Op {
                    result: op.result,
                    ..Op::constant(value)
                };
                folded += 1;
            }
        }
        if let (Some(result), Some(value)) = (op.result, op.value()) {
            constants.insert(result, value.clone());
        }
        for region in &mut op.regions {
            folded += fold_constants(region, constants);
        }
    }
    folded
}

fn evaluate(name: &str, args: &[&Attr]) -> Option<Attr> {
    let value = match (name, args) {
        ("add", [Attr::Str(a), Attr::Str(b)]) => return Some(Attr::Str(format!("{a}{b}"))),
        ("neg", [Attr::Num(a)]) => Attr::Num(-a),
        ("plus", [Attr::Num(a)]) => Attr::Num(*a),
        ("not", [a]) => Attr::Bool(!a.truthiness()?),
        (_, [Attr::Num(a), Attr::Num(b)]) => {
            let (a, b) = (*a, *b);
            match name {
                "add" => Attr::Num(a + b),
                "sub" => Attr::Num(a - b),
                "mul" => Attr::Num(a * b),
                "div" => Attr::Num(a / b),
                "rem" => Attr::Num(a % b),
                "pow" => Attr::Num(a.powf(b)),
                "eq" | "strict_eq" => Attr::Bool(a == b),
                "ne" | "strict_ne" => Attr::Bool(a != b),
                "lt" => Attr::Bool(a < b),
                "le" => Attr::Bool(a <= b),
                "gt" => Attr::Bool(a > b),
                "ge" => Attr::Bool(a >= b),
                _ => return None,
            }
        }
        _ => return None,
    };
    // Only finite numbers are folded.
    match value {
        Attr::Num(n) if !n.is_finite() => None,
        value => Some(value),
    }
}

/// Replaces repeated pure computations with the first occurrence. A
/// region sees the ops of its enclosing regions but not its siblings.
fn eliminate_common(
    ops: &mut Vec<Op>,
    scopes: &mut Vec<HashMap<String, Value>>,
    replaced: &mut HashMap<Value, Value>,
) -> usize {
    let mut merged = 0;
    let mut keep = Vec::with_capacity(ops.len());
    for mut op in ops.drain(..) {
        for operand in &mut op.operands {
            if let Some(existing) = replaced.get(operand) {
                *operand = *existing;
            }
        }
        for region in &mut op.regions {
            if op.isolated {
                merged += eliminate_common(region, &mut vec![HashMap::new()], replaced);
            } else {
                scopes.push(HashMap::new());
                merged += eliminate_common(region, scopes, replaced);
                scopes.pop();
            }
        }
        if let (true, true, Some(result)) = (op.cse, op.regions.is_empty(), op.result) {
            let key = op.key();
            if let Some(existing) = scopes.iter().rev().find_map(|scope| scope.get(&key)) {
                replaced.insert(result, *existing);
                merged += 1;
                continue;
            }
            if let Some(scope) = scopes.last_mut() {
                scope.insert(key, result);
            }
        }
        keep.push(op);
    }
    *ops = keep;
    merged
}

fn count_uses(ops: &[Op], uses: &mut HashMap<Value, usize>) {
    for op in ops {
        for operand in &op.operands {
            *uses.entry(*operand).or_default() += 1;
        }
        for region in &op.regions {
            count_uses(region, uses);
        }
    }
}

/// Drops pure ops whose results are unused, until nothing changes.
fn remove_dead(ops: &mut Vec<Op>) -> usize {
    fn sweep(ops: &mut Vec<Op>, uses: &HashMap<Value, usize>) -> usize {
        let before = ops.len();
        ops.retain(|op| {
            let dead = op.pure
                && op.regions.is_empty()
                && op.result.is_some_and(|r| uses.get(&r).copied().unwrap_or(0) == 0);
            !dead
        });
        let mut removed = before - ops.len();
        for op in ops.iter_mut() {
            for region in &mut op.regions {
                removed += sweep(region, uses);
            }
        }
        removed
    }

    let mut total = 0;
    loop {
        let mut uses = HashMap::new();
        count_uses(ops, &mut uses);
        let removed = sweep(ops, &uses);
        if removed == 0 {
            return total;
        }
        total += removed;
    }
}

/// Prints ops, numbering values in order of definition. Isolated regions
/// restart numbering at `%0`.
#[derive(Default)]
struct Printer {
    scopes: Vec<(HashMap<Value, u32>, u32)>,
}

impl Printer {
    fn define(&mut self, value: Value) -> u32 {
        if self.scopes.is_empty() {
            self.scopes.push((HashMap::new(), 0));
        }
        let Some((names, next)) = self.scopes.last_mut() else {
            return 0;
        };
        let number = *next;
        names.insert(value, number);
        *next += 1;
        number
    }

    fn name(&self, value: Value) -> String {
        self.scopes
            .iter()
            .rev()
            .find_map(|(names, _)| names.get(&value))
            .map_or_else(|| format!("%v{}", value.0), |n| format!("%{n}"))
    }

    fn op(&mut self, op: &Op, depth: usize, out: &mut String) {
        let pad = "  ".repeat(depth);
        out.push_str(&pad);
        if let Some(result) = op.result {
            let number = self.define(result);
            let _ = write!(out, "%{number} = ");
        }
        let _ = write!(out, "luascript.{}", op.name);
        match op.value() {
            Some(value) => {
                let _ = write!(out, " {value}");
            }
            None => {
                if !op.operands.is_empty() {
                    let operands: Vec<String> = op.operands.iter().map(|v| self.name(*v)).collect();
                    let _ = write!(out, " {}", operands.join(", "));
                }
                if !op.attrs.is_empty() {
                    let attrs: Vec<String> = op.attrs.iter().map(|(k, v)| format!("{k} = {v}")).collect();
                    let _ = write!(out, " {{{}}}", attrs.join(", "));
                }
            }
        }
        for region in &op.regions {
            out.push_str(" {\n");
            if op.isolated {
                self.scopes.push((HashMap::new(), 0));
            }
            for inner in region {
                self.op(inner, depth + 1, out);
            }
            if op.isolated {
                self.scopes.pop();
            }
            out.push_str(&pad);
            out.push('}');
        }
        if op.result.is_some() {
            let _ = write!(out, " : {VALUE_TYPE}");
        }
        out.push('\n');
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use luascript_ast::build::*;
    use luascript_ast::{Stmt, VarKind};
    use luascript_ir::lower;

    fn emit_with(body: Vec<Stmt>, canonicalize: bool) -> String {
        let module = lower(&program(body)).expect("program should lower");
        MlirBackend { canonicalize }.emit(&module).expect("mlir emission should succeed")
    }

    fn emit(body: Vec<Stmt>) -> String {
        emit_with(body, true)
    }

    #[test]
    fn test_add_function() {
        let mlir = emit(vec![func(
            "add",
            vec![pid("a"), pid("b")],
            vec![ret(Some(bin("+", ident("a"), ident("b"))))],
        )]);
        assert!(mlir.starts_with("// Generated by luascript\n"), "{mlir}");
        assert!(mlir.contains("module attributes {luascript.schema = \"1.0.0\"} {"), "{mlir}");
        assert!(mlir.contains("luascript.func {name = \"add\", params = [\"a\", \"b\"]} {"), "{mlir}");
        assert!(mlir.contains("%2 = luascript.add %0, %1 : !luascript.value"), "{mlir}");
        assert!(mlir.contains("luascript.return %2\n"), "{mlir}");
    }

    #[test]
    fn test_constant_folding() {
        let body = || vec![const_("x", bin("+", num(1.0), bin("*", num(2.0), num(3.0))))];
        let folded = emit(body());
        assert!(folded.contains("%0 = luascript.constant 7.0 : !luascript.value"), "{folded}");
        assert!(folded.contains("luascript.declare %0 {kind = \"const\", name = \"x\"}"), "{folded}");
        assert!(!folded.contains("luascript.mul"), "{folded}");

        let raw = emit_with(body(), false);
        assert!(raw.contains("luascript.mul"), "{raw}");
        assert!(!raw.contains("// passes"), "{raw}");
    }

    #[test]
    fn test_cse_merges_repeated_values() {
        let mlir = emit(vec![expr_stmt(call(
            ident("f"),
            vec![bin("*", num(2.0), num(3.0)), bin("*", num(2.0), num(3.0))],
        ))]);
        assert_eq!(mlir.matches("luascript.constant").count(), 1, "{mlir}");
        assert!(mlir.contains("%2 = luascript.call %0, %1, %1 : !luascript.value"), "{mlir}");
    }

    #[test]
    fn test_cse_is_scoped_by_region() {
        let call_with = |name: &str| vec![expr_stmt(call(ident(name), vec![num(5.0)]))];
        let siblings = emit(vec![if_(ident("c"), call_with("f"), Some(call_with("g")))]);
        assert_eq!(siblings.matches("luascript.constant 5.0").count(), 2, "{siblings}");

        let mut body = call_with("h");
        body.push(if_(ident("c"), call_with("f"), Some(call_with("g"))));
        let dominated = emit(body);
        assert_eq!(dominated.matches("luascript.constant 5.0").count(), 1, "{dominated}");
    }

    #[test]
    fn test_functions_restart_numbering() {
        let mlir = emit(vec![
            const_("k", num(5.0)),
            func("f", vec![], vec![ret(Some(num(5.0)))]),
        ]);
        assert_eq!(mlir.matches("luascript.constant 5.0").count(), 2, "{mlir}");
        assert!(mlir.contains("    %0 = luascript.constant 5.0"), "{mlir}");
    }

    #[test]
    fn test_dead_pure_ops_are_removed() {
        let mlir = emit(vec![expr_stmt(bin("+", ident("a"), num(1.0)))]);
        assert!(!mlir.contains("luascript.add"), "{mlir}");
        let kept = emit(vec![expr_stmt(call(ident("f"), vec![]))]);
        assert!(kept.contains("luascript.call"), "{kept}");
    }

    #[test]
    fn test_every_construct_has_an_op() {
        let mlir = emit(vec![
            class(
                "Point",
                None,
                vec![
                    constructor(vec![pid("x")], vec![expr_stmt(assign("=", pmember(this(), "x"), ident("x")))]),
                    method("norm", vec![], vec![ret(Some(member(this(), "x")))]),
                ],
            ),
            for_of(VarKind::Const, pid("p"), array(vec![num(1.0)]), vec![cont()]),
            try_(
                vec![throw(new_expr(ident("Error"), vec![str_lit("x")]))],
                Some((Some(pid("e")), vec![])),
                None,
            ),
            switch(ident("v"), vec![(Some(num(1.0)), vec![brk()]), (None, vec![])]),
            const_("t", template(&["a", "b"], vec![ident("v")])),
        ]);
        for op in [
            "luascript.class",
            "luascript.constructor",
            "luascript.method",
            "luascript.assign",
            "luascript.for_each",
            "luascript.continue",
            "luascript.try",
            "luascript.throw",
            "luascript.new",
            "luascript.switch",
            "luascript.case",
            "luascript.template",
        ] {
            assert!(mlir.contains(op), "missing {op}:\n{mlir}");
        }
    }

    #[test]
    fn test_output_is_deterministic() {
        let body = || {
            vec![func(
                "f",
                vec![pid("a")],
                vec![ret(Some(logical("||", ident("a"), cond(ident("a"), num(1.0), num(2.0)))))],
            )]
        };
        assert_eq!(emit(body()), emit(body()));
    }
}
