//! End-to-end tests for the LuaScript compiler
//!
//! Drives the whole pipeline the way the CLI does:
//! ESTree JSON → Lowering → Validation → Backends

use luascript_ast::{parse_program, Program};
use luascript_codegen::{BackendManager, CompileOptions, CompileOutput, Target};
use luascript_error::{Diagnostic, Diagnostics, ErrorCode};
use luascript_ir::{lower, validate, Module};

/// Result of compiling one program
#[derive(Debug)]
pub struct CompileResult {
    /// Lowering and validation succeeded
    pub success: bool,
    pub diagnostics: Diagnostics,
    pub module: Option<Module>,
    /// One entry per backend, in target order
    pub outputs: Vec<CompileOutput>,
}

impl CompileResult {
    fn failed(diagnostics: Diagnostics) -> Self {
        Self {
            success: false,
            diagnostics,
            module: None,
            outputs: Vec::new(),
        }
    }

    pub fn output(&self, target: Target) -> Option<&CompileOutput> {
        self.outputs.iter().find(|o| o.target == target)
    }

    /// Generated Lua, if the Lua backend succeeded.
    pub fn lua(&self) -> Option<&str> {
        self.output(Target::Lua).and_then(CompileOutput::text)
    }
}

/// Lowers and validates a program, panicking with every error otherwise.
pub fn lower_program(program: &Program) -> Module {
    let module = lower(program).unwrap_or_else(|e| panic!("lowering failed: {e}"));
    let report = validate(&module);
    if !report.ok {
        panic!("lowered module is invalid:\n{}", report.errors.join("\n"));
    }
    module
}

/// Runs a program through lowering, validation and every backend.
pub fn compile_program(program: &Program, options: &CompileOptions) -> CompileResult {
    let module = match lower(program) {
        Ok(module) => module,
        Err(e) => return CompileResult::failed(std::iter::once(Diagnostic::from(&e)).collect()),
    };

    let report = validate(&module);
    if !report.ok {
        return CompileResult::failed(
            report
                .errors
                .into_iter()
                .map(|e| Diagnostic::error(e).with_code(ErrorCode::INVARIANT_VIOLATION))
                .collect(),
        );
    }

    let outputs = BackendManager::with_defaults(options).compile_all(&module);
    let diagnostics = outputs
        .iter()
        .flat_map(|o| o.diagnostics.iter().map(Diagnostic::from))
        .collect();
    CompileResult {
        success: true,
        diagnostics,
        module: Some(module),
        outputs,
    }
}

/// Compiles ESTree JSON as printed by an external parser.
pub fn compile_json(json: &str) -> CompileResult {
    match parse_program(json) {
        Ok(program) => compile_program(&program, &CompileOptions::default()),
        Err(e) => CompileResult::failed(
            std::iter::once(Diagnostic::error(e.to_string()).with_code(ErrorCode::INVALID_AST)).collect(),
        ),
    }
}

/// Asserts that a program lowers, validates and compiles to Lua
pub fn assert_compiles(program: &Program) {
    let result = compile_program(program, &CompileOptions::default());
    if !result.success || result.lua().is_none() {
        panic!("Expected program to compile, but got errors:\n{:?}", result.diagnostics);
    }
}

/// Asserts that the Lua output contains a specific string
pub fn assert_lua_contains(program: &Program, expected: &str) {
    let result = compile_program(program, &CompileOptions::default());
    let Some(lua) = result.lua() else {
        panic!("Expected Lua output, but got errors:\n{:?}", result.diagnostics);
    };
    if !lua.contains(expected) {
        panic!("Expected Lua output to contain '{expected}', but it didn't.\n\nGenerated code:\n{lua}");
    }
}

/// Asserts that the IR JSON contains a specific string
pub fn assert_ir_contains(program: &Program, expected: &str) {
    let module = lower_program(program);
    let json = module.to_json().unwrap_or_else(|e| panic!("serialization failed: {e}"));
    if !json.contains(expected) {
        panic!("Expected IR to contain '{expected}', but it didn't.\n\nIR:\n{json}");
    }
}

#[cfg(test)]
mod pipeline_tests {
    use super::*;
    use luascript_ast::build::*;
    use luascript_ast::VarKind;
    use luascript_ir::node::NodeKind;
    use luascript_ir::{validate_json, TransformRegistry};
    use pretty_assertions::assert_eq;

    /// `function add(a, b) { return a + b; }` as acorn prints it.
    const ADD_ESTREE: &str = r#"{
      "type": "Program", "start": 0, "end": 36, "sourceType": "script",
      "loc": {"start": {"line": 1, "column": 0}, "end": {"line": 1, "column": 36}},
      "body": [{
        "type": "FunctionDeclaration", "start": 0, "end": 36,
        "loc": {"start": {"line": 1, "column": 0}, "end": {"line": 1, "column": 36}},
        "id": {"type": "Identifier", "start": 9, "end": 12, "name": "add"},
        "expression": false, "generator": false, "async": false,
        "params": [
          {"type": "Identifier", "start": 13, "end": 14, "name": "a"},
          {"type": "Identifier", "start": 16, "end": 17, "name": "b"}
        ],
        "body": {"type": "BlockStatement", "start": 19, "end": 36, "body": [{
          "type": "ReturnStatement", "start": 21, "end": 34,
          "argument": {"type": "BinaryExpression", "start": 28, "end": 33,
            "left": {"type": "Identifier", "start": 28, "end": 29, "name": "a"},
            "operator": "+",
            "right": {"type": "Identifier", "start": 32, "end": 33, "name": "b"}}
        }]}
      }]
    }"#;

    fn shapes_program() -> Program {
        program(vec![
            class(
                "Shape",
                None,
                vec![
                    constructor(vec![pid("name")], vec![expr_stmt(assign("=", pmember(this(), "name"), ident("name")))]),
                    method("describe", vec![], vec![ret(Some(template(&["shape ", ""], vec![member(this(), "name")])))]),
                ],
            ),
            class(
                "Circle",
                Some(ident("Shape")),
                vec![
                    constructor(
                        vec![pid("r")],
                        vec![
                            expr_stmt(call(super_(), vec![str_lit("circle")])),
                            expr_stmt(assign("=", pmember(this(), "r"), ident("r"))),
                        ],
                    ),
                    method("area", vec![], vec![ret(Some(bin("*", member(ident("Math"), "PI"), bin("**", member(this(), "r"), num(2.0)))))]),
                ],
            ),
            const_("shapes", array(vec![new_expr(ident("Circle"), vec![num(1.0)]), new_expr(ident("Circle"), vec![num(2.0)])])),
            let_("total", num(0.0)),
            for_of(
                VarKind::Const,
                pid("s"),
                ident("shapes"),
                vec![expr_stmt(assign("+=", pid("total"), call(member(ident("s"), "area"), vec![])))],
            ),
            try_(
                vec![if_(bin("<", ident("total"), num(0.0)), vec![throw(new_expr(ident("Error"), vec![str_lit("negative")]))], None)],
                Some((Some(pid("e")), vec![expr_stmt(call(member(ident("console"), "log"), vec![ident("e")]))])),
                None,
            ),
            switch(
                ident("total"),
                vec![
                    (Some(num(0.0)), vec![expr_stmt(call(member(ident("console"), "log"), vec![str_lit("none")])), brk()]),
                    (None, vec![expr_stmt(call(member(ident("console"), "log"), vec![ident("total")]))]),
                ],
            ),
        ])
    }

    // =========================================
    // Scenario
    // =========================================

    #[test]
    fn test_add_scenario_across_backends() {
        let result = compile_json(ADD_ESTREE);
        assert!(result.success, "{:?}", result.diagnostics);

        let module = result.module.as_ref().unwrap();
        let functions: Vec<_> = module.functions().collect();
        assert_eq!(functions.len(), 1);
        let func = functions[0].kind.as_function().unwrap();
        assert_eq!(func.name.as_deref(), Some("add"));
        assert_eq!(func.params.len(), 2);

        let returns: Vec<_> = module
            .nodes()
            .filter_map(|n| match &n.kind {
                NodeKind::ReturnStatement { argument: Some(argument) } => module.node(*argument),
                _ => None,
            })
            .collect();
        assert_eq!(returns.len(), 1);
        match &returns[0].kind {
            NodeKind::BinaryExpression { operator, left, right } => {
                assert_eq!(operator.as_str(), "+");
                for side in [left, right] {
                    assert!(matches!(module.node(*side).unwrap().kind, NodeKind::Identifier { .. }));
                }
            }
            other => panic!("unexpected return argument {other:?}"),
        }

        let lua = result.lua().unwrap();
        assert!(lua.contains("function add(a, b)"), "{lua}");
        assert!(lua.contains("return a + b"), "{lua}");

        let wasm = result.output(Target::Wasm).unwrap();
        assert!(wasm.success);
        let bytes = wasm.bytes().unwrap();
        assert!(!bytes.is_empty());
        wasmparser::Validator::new().validate_all(bytes).unwrap();

        let llvm = result.output(Target::Llvm).unwrap();
        assert!(llvm.success);
        assert!(llvm.text().unwrap().contains("define double @add(double %arg0, double %arg1)"));

        let mlir = result.output(Target::Mlir).unwrap();
        assert!(mlir.text().unwrap().contains("luascript.func {name = \"add\""));
    }

    #[test]
    fn test_dangling_reference_fails_validation() {
        let report = validate_json(
            r#"{"schemaVersion": "1.0.0",
                "nodes": {"1": {"id": 1, "kind": "ReturnStatement", "argument": 7}},
                "body": [1], "metadata": {}}"#,
        );
        assert!(!report.ok);
        assert!(!report.errors.is_empty());
        assert!(report.errors.iter().any(|e| e.contains('7')), "{:?}", report.errors);
    }

    #[test]
    fn test_malformed_documents_never_crash() {
        for doc in ["", "[]", "{}", r#"{"schemaVersion": 1}"#, r#"{"schemaVersion": "9.0.0", "nodes": {}, "body": []}"#] {
            assert!(!validate_json(doc).ok, "{doc} should be rejected");
        }
    }

    // =========================================
    // Lowering properties
    // =========================================

    #[test]
    fn test_lowering_is_deterministic() {
        let first = lower_program(&shapes_program()).to_json().unwrap();
        let second = lower_program(&shapes_program()).to_json().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_every_reference_resolves() {
        let module = lower_program(&shapes_program());
        for node in module.nodes() {
            for child in node.kind.children() {
                assert!(module.contains(child), "node {} references missing {child}", node.id);
            }
        }
    }

    #[test]
    fn test_json_round_trip() {
        let module = lower_program(&shapes_program());
        let restored = Module::from_json(&module.to_json().unwrap()).unwrap();
        assert_eq!(module, restored);
        assert!(validate(&restored).ok);
    }

    #[test]
    fn test_rest_binding_collects_one_parameter() {
        let module = lower_program(&program(vec![func(
            "f",
            vec![pid("a"), rest_pat(pid("rest"))],
            vec![ret(Some(ident("rest")))],
        )]));
        let func = module.functions().next().unwrap().kind.as_function().unwrap();
        assert_eq!(func.params.len(), 1);
        let rest = module.node(func.rest.unwrap()).unwrap();
        let NodeKind::RestElement { argument } = &rest.kind else {
            panic!("expected RestElement, got {:?}", rest.kind);
        };
        assert!(matches!(&module.node(*argument).unwrap().kind, NodeKind::Parameter { name } if name == "rest"));

        let lua = compile_program(
            &program(vec![luascript_ast::build::func("f", vec![pid("a"), rest_pat(pid("rest"))], vec![ret(Some(ident("rest")))])]),
            &CompileOptions::default(),
        );
        assert_eq!(lua.lua().unwrap().matches("local rest = {...}").count(), 1);
    }

    #[test]
    fn test_string_concatenation_is_typed() {
        assert_ir_contains(
            &program(vec![const_("s", bin("+", str_lit("a"), str_lit("b")))]),
            r#""type":{"kind":"primitive","name":"string"}"#,
        );
    }

    // =========================================
    // Lua output
    // =========================================

    #[test]
    fn test_lua_operator_mapping() {
        assert_lua_contains(&program(vec![const_("s", bin("+", str_lit("a"), str_lit("b")))]), r#""a" .. "b""#);
        assert_lua_contains(&program(vec![const_("e", bin("===", ident("x"), ident("y")))]), "x == y");
        assert_lua_contains(&program(vec![const_("n", bin("!==", ident("x"), ident("y")))]), "x ~= y");
    }

    #[test]
    fn test_lua_spread_order() {
        let result = compile_program(
            &program(vec![const_("all", array(vec![num(1.0), spread(ident("mid")), num(4.0)]))]),
            &CompileOptions::default(),
        );
        let lua = result.lua().unwrap();
        let lead = lua.find("{1}").expect("leading literal");
        let middle = lua.find("ipairs(mid)").expect("spread sequence");
        let trail = lua.find("= 4").expect("trailing literal");
        assert!(lead < middle && middle < trail, "{lua}");
    }

    #[test]
    fn test_full_program_compiles_to_lua() {
        assert_compiles(&shapes_program());
        assert_lua_contains(&shapes_program(), "setmetatable");
        assert_lua_contains(&shapes_program(), "pcall");
    }

    // =========================================
    // Backend manager
    // =========================================

    #[test]
    fn test_numeric_backends_reject_classes_independently() {
        let result = compile_program(&shapes_program(), &CompileOptions::default());
        assert!(result.success);
        assert!(result.output(Target::Lua).unwrap().success);
        assert!(result.output(Target::Mlir).unwrap().success);
        for target in [Target::Wasm, Target::Llvm] {
            let output = result.output(target).unwrap();
            assert!(!output.success, "{target} should fail");
            assert!(output.output.is_none());
            assert!(!output.diagnostics.is_empty());
        }
        assert!(result.diagnostics.has_errors());
    }

    #[test]
    fn test_numeric_program_compiles_everywhere() {
        let fib = program(vec![
            func(
                "fib",
                vec![pid("n")],
                vec![
                    if_(bin("<", ident("n"), num(2.0)), vec![ret(Some(ident("n")))], None),
                    ret(Some(bin(
                        "+",
                        call(ident("fib"), vec![bin("-", ident("n"), num(1.0))]),
                        call(ident("fib"), vec![bin("-", ident("n"), num(2.0))]),
                    ))),
                ],
            ),
            const_("answer", call(ident("fib"), vec![num(10.0)])),
        ]);
        let options = CompileOptions {
            opt_level: 2,
            ..CompileOptions::default()
        };
        let result = compile_program(&fib, &options);
        for output in &result.outputs {
            assert!(output.success, "{}: {:?}", output.target, output.diagnostics);
        }
        let wasm = result.output(Target::Wasm).unwrap().bytes().unwrap();
        wasmparser::Validator::new().validate_all(wasm).unwrap();
    }

    #[test]
    fn test_parallel_compilation_matches() {
        let module = lower_program(&shapes_program());
        let manager = BackendManager::with_defaults(&CompileOptions::default());
        let sequential = manager.compile_all(&module);
        let parallel = manager.compile_all_parallel(&module);
        let summary = |outputs: &[CompileOutput]| -> Vec<(Target, bool, Option<Vec<u8>>)> {
            outputs
                .iter()
                .map(|o| (o.target, o.success, o.bytes().map(<[u8]>::to_vec)))
                .collect()
        };
        assert_eq!(summary(&sequential), summary(&parallel));
    }

    #[test]
    fn test_optimizer_shrinks_module() {
        let module = lower_program(&program(vec![func(
            "f",
            vec![],
            vec![
                if_(bool_lit(false), vec![expr_stmt(call(ident("never"), vec![]))], None),
                ret(Some(bin("+", num(1.0), bin("*", num(2.0), num(3.0))))),
            ],
        )]));
        let optimized = TransformRegistry::standard().apply(&module).unwrap();
        assert!(optimized.len() < module.len());
        assert!(validate(&optimized).ok);
        let literal = optimized.nodes().any(|n| matches!(&n.kind, NodeKind::NumericLiteral { value } if *value == 7.0));
        assert!(literal);
    }

    #[test]
    fn test_invalid_estree_is_reported() {
        let result = compile_json(r#"{"type": "Identifier", "name": "x"}"#);
        assert!(!result.success);
        assert!(result.diagnostics.has_errors());
    }

    #[test]
    fn test_unsupported_syntax_names_kind() {
        let result = compile_json(
            r#"{"type": "Program", "body": [{"type": "DebuggerStatement"}]}"#,
        );
        assert!(!result.success);
        let message = result.diagnostics.iter().next().unwrap().message.clone();
        assert!(message.contains("DebuggerStatement"), "{message}");
    }
}
