//! Pieces shared by the backends

use crate::error::BackendError;
use luascript_ir::{Module, Node, NodeId, NodeKind};
use std::collections::HashMap;

pub(crate) fn lookup<'m>(module: &'m Module, id: NodeId, backend: &'static str) -> Result<&'m Node, BackendError> {
    module
        .node(id)
        .ok_or(BackendError::InvalidModule { backend, id })
}

pub(crate) fn unsupported(backend: &'static str, node: &Node, reason: impl Into<String>) -> BackendError {
    BackendError::Unsupported {
        backend,
        kind: node.kind.name(),
        id: node.id,
        reason: reason.into(),
    }
}

/// Indented line writer for the text backends.
#[derive(Debug)]
pub(crate) struct Emitter {
    out: String,
    depth: usize,
    unit: String,
}

impl Emitter {
    pub fn new(indent_width: usize) -> Self {
        Self {
            out: String::new(),
            depth: 0,
            unit: " ".repeat(indent_width),
        }
    }

    pub fn line(&mut self, text: impl AsRef<str>) {
        let text = text.as_ref();
        if !text.is_empty() {
            for _ in 0..self.depth {
                self.out.push_str(&self.unit);
            }
            self.out.push_str(text);
        }
        self.out.push('\n');
    }

    pub fn indent(&mut self) {
        self.depth += 1;
    }

    pub fn dedent(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    /// Empty writer one level deeper, for text spliced into a line of `self`.
    pub fn nested(&self) -> Emitter {
        Emitter {
            out: String::new(),
            depth: self.depth + 1,
            unit: self.unit.clone(),
        }
    }

    /// Indentation of the current depth.
    pub fn pad(&self) -> String {
        self.unit.repeat(self.depth)
    }

    pub fn finish(self) -> String {
        self.out
    }
}

/// `Math.*` functions with a direct numeric lowering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Intrinsic {
    Sqrt,
    Abs,
    Floor,
    Ceil,
    Trunc,
    Round,
    Min,
    Max,
    Pow,
}

impl Intrinsic {
    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "sqrt" => Intrinsic::Sqrt,
            "abs" => Intrinsic::Abs,
            "floor" => Intrinsic::Floor,
            "ceil" => Intrinsic::Ceil,
            "trunc" => Intrinsic::Trunc,
            "round" => Intrinsic::Round,
            "min" => Intrinsic::Min,
            "max" => Intrinsic::Max,
            "pow" => Intrinsic::Pow,
            _ => return None,
        })
    }

    pub fn arity(&self) -> usize {
        match self {
            Intrinsic::Min | Intrinsic::Max | Intrinsic::Pow => 2,
            _ => 1,
        }
    }
}

/// Property name of `Math.<name>` when `Math` is the unshadowed global.
fn math_member(module: &Module, id: NodeId) -> Option<&str> {
    let NodeKind::MemberExpression {
        object,
        property,
        computed: false,
    } = &module.node(id)?.kind
    else {
        return None;
    };
    match (&module.node(*object)?.kind, &module.node(*property)?.kind) {
        (NodeKind::Identifier { name, binding: None }, NodeKind::StringLiteral { value }) if name == "Math" => {
            Some(value.as_str())
        }
        _ => None,
    }
}

pub(crate) fn math_call(module: &Module, callee: NodeId) -> Option<Intrinsic> {
    math_member(module, callee).and_then(Intrinsic::parse)
}

pub(crate) fn math_constant(module: &Module, id: NodeId) -> Option<f64> {
    match math_member(module, id)? {
        "PI" => Some(std::f64::consts::PI),
        "E" => Some(std::f64::consts::E),
        "LN2" => Some(std::f64::consts::LN_2),
        "SQRT2" => Some(std::f64::consts::SQRT_2),
        _ => None,
    }
}

/// Value of a global `NaN` / `Infinity` reference.
pub(crate) fn global_number(kind: &NodeKind) -> Option<f64> {
    match kind {
        NodeKind::Identifier { name, binding: None } => match name.as_str() {
            "NaN" => Some(f64::NAN),
            "Infinity" => Some(f64::INFINITY),
            _ => None,
        },
        _ => None,
    }
}

/// Where a binding lives in the numeric backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Slot {
    Local(u32),
    Global(u32),
    Function(u32),
}

/// A function of the numeric subset: every value is an f64.
#[derive(Debug)]
pub(crate) struct NumericFunction {
    pub id: NodeId,
    pub name: String,
    pub params: Vec<NodeId>,
    /// Declarators inside the body, after the parameters in slot order
    pub locals: Vec<NodeId>,
    /// Statements of the body
    pub body: Vec<NodeId>,
    slots: HashMap<NodeId, u32>,
}

impl NumericFunction {
    fn new(id: NodeId, name: String, params: Vec<NodeId>, locals: Vec<NodeId>, body: Vec<NodeId>) -> Self {
        let slots = params
            .iter()
            .chain(locals.iter())
            .enumerate()
            .map(|(i, id)| (*id, i as u32))
            .collect();
        Self {
            id,
            name,
            params,
            locals,
            body,
            slots,
        }
    }

    pub fn slot_count(&self) -> u32 {
        (self.params.len() + self.locals.len()) as u32
    }
}

/// Layout of a module for the numeric backends: top-level functions,
/// top-level variables as globals, and every other top-level statement
/// gathered into an initializer.
#[derive(Debug)]
pub(crate) struct NumericPlan {
    pub functions: Vec<NumericFunction>,
    /// Top-level declarators with their names
    pub globals: Vec<(NodeId, String)>,
    /// `None` when there is no top-level code to run
    pub init: Option<NumericFunction>,
    function_index: HashMap<NodeId, u32>,
    global_index: HashMap<NodeId, u32>,
}

pub(crate) const INIT_FUNCTION: &str = "__luascript_init";

impl NumericPlan {
    pub fn new(module: &Module, backend: &'static str) -> Result<Self, Vec<BackendError>> {
        let mut errors = Vec::new();
        let mut functions = Vec::new();
        let mut globals = Vec::new();
        let mut init_body = Vec::new();

        for &id in module.body() {
            let node = lookup(module, id, backend).map_err(|e| vec![e])?;
            match &node.kind {
                NodeKind::FunctionDeclaration(func) => {
                    if func.is_async {
                        errors.push(unsupported(backend, node, "async functions are not numeric"));
                        continue;
                    }
                    if func.rest.is_some() {
                        errors.push(unsupported(backend, node, "rest parameters need an array runtime"));
                        continue;
                    }
                    let body = block_body(module, func.body, backend).map_err(|e| vec![e])?;
                    let mut locals = Vec::new();
                    for stmt in &body {
                        collect_declarators(module, *stmt, &mut locals);
                    }
                    let name = func.name.clone().unwrap_or_else(|| format!("fn{}", node.id));
                    functions.push(NumericFunction::new(id, name, func.params.clone(), locals, body));
                }
                NodeKind::VariableDeclaration { declarations, .. } => {
                    for &declarator in declarations {
                        if let NodeKind::VariableDeclarator { name, .. } =
                            &lookup(module, declarator, backend).map_err(|e| vec![e])?.kind
                        {
                            globals.push((declarator, name.clone()));
                        }
                    }
                    init_body.push(id);
                }
                NodeKind::EmptyStatement => {}
                _ => init_body.push(id),
            }
        }

        if !errors.is_empty() {
            return Err(errors);
        }

        let function_index = functions
            .iter()
            .enumerate()
            .map(|(i, f)| (f.id, i as u32))
            .collect();
        let global_index: HashMap<NodeId, u32> = globals
            .iter()
            .enumerate()
            .map(|(i, (id, _))| (*id, i as u32))
            .collect();

        let init = (!init_body.is_empty()).then(|| {
            let mut locals = Vec::new();
            for stmt in &init_body {
                collect_declarators(module, *stmt, &mut locals);
            }
            locals.retain(|id| !global_index.contains_key(id));
            NumericFunction::new(NodeId(0), INIT_FUNCTION.to_string(), Vec::new(), locals, init_body)
        });

        Ok(Self {
            functions,
            globals,
            init,
            function_index,
            global_index,
        })
    }

    pub fn resolve(&self, scope: &NumericFunction, binding: NodeId) -> Option<Slot> {
        if let Some(slot) = scope.slots.get(&binding) {
            return Some(Slot::Local(*slot));
        }
        if let Some(index) = self.global_index.get(&binding) {
            return Some(Slot::Global(*index));
        }
        self.function_index.get(&binding).map(|i| Slot::Function(*i))
    }

    pub fn function(&self, index: u32) -> Option<&NumericFunction> {
        self.functions.get(index as usize)
    }
}

pub(crate) fn block_body(module: &Module, block: NodeId, backend: &'static str) -> Result<Vec<NodeId>, BackendError> {
    let node = lookup(module, block, backend)?;
    match &node.kind {
        NodeKind::BlockStatement { body } => Ok(body.clone()),
        _ => Ok(vec![block]),
    }
}

/// Declarators under `id`, without entering nested functions or classes.
fn collect_declarators(module: &Module, id: NodeId, out: &mut Vec<NodeId>) {
    let Some(node) = module.node(id) else {
        return;
    };
    match &node.kind {
        NodeKind::FunctionDeclaration(_)
        | NodeKind::FunctionExpression(_)
        | NodeKind::ArrowFunctionExpression(_)
        | NodeKind::ClassDeclaration(_)
        | NodeKind::ClassExpression(_) => {}
        NodeKind::VariableDeclarator { .. } => {
            if !out.contains(&id) {
                out.push(id);
            }
            for child in node.kind.children() {
                collect_declarators(module, child, out);
            }
        }
        kind => {
            for child in kind.children() {
                collect_declarators(module, child, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use luascript_ast::build::*;
    use luascript_ir::lower;

    #[test]
    fn test_emitter_indents() {
        let mut out = Emitter::new(2);
        out.line("do");
        out.indent();
        out.line("x = 1");
        out.dedent();
        out.dedent();
        out.line("end");
        assert_eq!(out.finish(), "do\n  x = 1\nend\n");
    }

    #[test]
    fn test_math_intrinsics() {
        let module = lower(&program(vec![
            expr_stmt(call(member(ident("Math"), "sqrt"), vec![num(4.0)])),
            expr_stmt(member(ident("Math"), "PI")),
        ]))
        .unwrap();
        let calls: Vec<_> = module
            .nodes()
            .filter_map(|n| match &n.kind {
                NodeKind::CallExpression { callee, .. } => math_call(&module, *callee),
                _ => None,
            })
            .collect();
        assert_eq!(calls, vec![Intrinsic::Sqrt]);
        assert_eq!(Intrinsic::Pow.arity(), 2);

        let pi = module.nodes().find_map(|n| math_constant(&module, n.id));
        assert_eq!(pi, Some(std::f64::consts::PI));
    }

    #[test]
    fn test_numeric_plan_layout() {
        let module = lower(&program(vec![
            let_("scale", num(2.0)),
            func(
                "area",
                vec![pid("w"), pid("h")],
                vec![let_("a", bin("*", ident("w"), ident("h"))), ret(Some(bin("*", ident("a"), ident("scale"))))],
            ),
            expr_stmt(call(ident("area"), vec![num(1.0), num(2.0)])),
        ]))
        .unwrap();

        let plan = NumericPlan::new(&module, "test").unwrap();
        assert_eq!(plan.functions.len(), 1);
        assert_eq!(plan.globals.len(), 1);
        assert_eq!(plan.globals[0].1, "scale");

        let area = &plan.functions[0];
        assert_eq!(area.name, "area");
        assert_eq!(area.slot_count(), 3);
        assert_eq!(plan.resolve(area, area.params[1]), Some(Slot::Local(1)));
        assert_eq!(plan.resolve(area, area.locals[0]), Some(Slot::Local(2)));
        assert_eq!(plan.resolve(area, plan.globals[0].0), Some(Slot::Global(0)));
        assert_eq!(plan.resolve(area, area.id), Some(Slot::Function(0)));

        let init = plan.init.as_ref().unwrap();
        assert_eq!(init.body.len(), 2);
        assert!(init.locals.is_empty());
    }

    #[test]
    fn test_async_function_is_rejected() {
        let module = lower(&program(vec![async_func("load", vec![], vec![])])).unwrap();
        let errors = NumericPlan::new(&module, "test").unwrap_err();
        assert!(matches!(
            &errors[0],
            BackendError::Unsupported { kind: "FunctionDeclaration", .. }
        ));
    }
}
