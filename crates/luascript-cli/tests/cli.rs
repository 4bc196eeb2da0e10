use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

const ADD_ESTREE: &str = r#"{
  "type": "Program", "sourceType": "script",
  "body": [{
    "type": "FunctionDeclaration",
    "id": {"type": "Identifier", "name": "add"},
    "expression": false, "generator": false, "async": false,
    "params": [{"type": "Identifier", "name": "a"}, {"type": "Identifier", "name": "b"}],
    "body": {"type": "BlockStatement", "body": [{
      "type": "ReturnStatement",
      "argument": {"type": "BinaryExpression", "operator": "+",
        "left": {"type": "Identifier", "name": "a"},
        "right": {"type": "Identifier", "name": "b"}}
    }]}
  }]
}"#;

const DANGLING_IR: &str = r#"{
  "schemaVersion": "1.0.0",
  "nodes": {
    "1": {"id": 1, "kind": "ExpressionStatement", "expression": 99}
  },
  "body": [1],
  "metadata": {}
}"#;

fn luascript(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_luascript"))
        .args(args)
        .env_remove("LUASCRIPT_PARSER")
        .output()
        .expect("binary should run")
}

fn fixture(dir: &TempDir, name: &str, contents: &str) -> String {
    let path = dir.path().join(name);
    fs::write(&path, contents).unwrap();
    path.display().to_string()
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn test_check_estree_input() {
    let dir = TempDir::new().unwrap();
    let input = fixture(&dir, "add.json", ADD_ESTREE);
    let output = luascript(&["check", &input]);
    assert!(output.status.success(), "{}", stderr(&output));
    assert!(stdout(&output).contains("ok"));
}

#[test]
fn test_check_rejects_dangling_reference() {
    let dir = TempDir::new().unwrap();
    let input = fixture(&dir, "broken.json", DANGLING_IR);
    let output = luascript(&["check", &input, "--as", "ir"]);
    assert_eq!(output.status.code(), Some(1));
    let errors = stderr(&output);
    assert!(errors.contains("99"), "{errors}");
    assert!(errors.contains("error[EV001]"), "{errors}");
}

#[test]
fn test_ir_output_round_trips_through_check() {
    let dir = TempDir::new().unwrap();
    let input = fixture(&dir, "add.json", ADD_ESTREE);
    let ir = dir.path().join("add.ir.json");
    let output = luascript(&["ir", &input, "--as", "ast", "-o", &ir.display().to_string()]);
    assert!(output.status.success(), "{}", stderr(&output));

    let text = fs::read_to_string(&ir).unwrap();
    assert!(text.contains("\"schemaVersion\": \"1.0.0\""));
    let check = luascript(&["check", &ir.display().to_string()]);
    assert!(check.status.success(), "{}", stderr(&check));
    assert!(stdout(&check).contains("valid IR"));
}

#[test]
fn test_compile_lua_to_stdout() {
    let dir = TempDir::new().unwrap();
    let input = fixture(&dir, "add.json", ADD_ESTREE);
    let output = luascript(&["compile", &input, "-t", "lua"]);
    assert!(output.status.success(), "{}", stderr(&output));
    let lua = stdout(&output);
    assert!(lua.contains("function add(a, b)"), "{lua}");
    assert!(lua.contains("return a + b"), "{lua}");
}

#[test]
fn test_compile_wasm_writes_valid_module() {
    let dir = TempDir::new().unwrap();
    let input = fixture(&dir, "add.json", ADD_ESTREE);
    let output = luascript(&["compile", &input, "-t", "wasm"]);
    assert!(output.status.success(), "{}", stderr(&output));

    let bytes = fs::read(dir.path().join("add.wasm")).unwrap();
    assert_eq!(&bytes[..4], b"\0asm");
    wasmparser::Validator::new().validate_all(&bytes).unwrap();
}

#[test]
fn test_compile_all_targets() {
    let dir = TempDir::new().unwrap();
    let input = fixture(&dir, "add.json", ADD_ESTREE);
    let out = dir.path().join("out");
    let output = luascript(&["compile", &input, "-t", "all", "-o", &out.display().to_string(), "-O", "2"]);
    assert!(output.status.success(), "{}", stderr(&output));
    for name in ["add.lua", "add.wasm", "add.ll", "add.mlir"] {
        assert!(Path::new(&out.join(name)).exists(), "missing {name}");
    }
    let llvm = fs::read_to_string(out.join("add.ll")).unwrap();
    assert!(llvm.contains("@add"));
}

#[test]
fn test_unsupported_construct_fails_for_numeric_target() {
    let dir = TempDir::new().unwrap();
    let input = fixture(
        &dir,
        "greet.json",
        r#"{"type": "Program", "body": [{"type": "VariableDeclaration", "kind": "const",
            "declarations": [{"type": "VariableDeclarator",
              "id": {"type": "Identifier", "name": "greeting"},
              "init": {"type": "Literal", "value": "hi"}}]}]}"#,
    );
    let output = luascript(&["compile", &input, "-t", "llvm"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("StringLiteral"), "{}", stderr(&output));
}

#[test]
fn test_external_parser_command() {
    let dir = TempDir::new().unwrap();
    // `cat` stands in for a parser: the file already holds ESTree JSON.
    let input = fixture(&dir, "add.js", ADD_ESTREE);
    let output = luascript(&["compile", &input, "--parser", "cat", "-t", "mlir"]);
    assert!(output.status.success(), "{}", stderr(&output));
    assert!(stdout(&output).contains("luascript.func"));

    let missing = luascript(&["check", &input, "--parser", "luascript-no-such-parser"]);
    assert_eq!(missing.status.code(), Some(1));
    assert!(stderr(&missing).contains("EI003"), "{}", stderr(&missing));
}

#[test]
fn test_config_file_sets_lua_version() {
    let dir = TempDir::new().unwrap();
    let input = fixture(
        &dir,
        "loop.json",
        r#"{"type": "Program", "body": [{"type": "WhileStatement",
            "test": {"type": "Identifier", "name": "x"},
            "body": {"type": "BlockStatement", "body": [{"type": "ContinueStatement", "label": null}]}}]}"#,
    );
    let config = fixture(&dir, "config.json", r#"{"lua": {"version": "5.1"}}"#);
    let output = luascript(&["--config", &config, "compile", &input]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("ContinueStatement"), "{}", stderr(&output));

    let default = luascript(&["compile", &input]);
    assert!(default.status.success(), "{}", stderr(&default));
    assert!(stdout(&default).contains("goto continue"), "{}", stdout(&default));
}

#[test]
fn test_schema_command() {
    let output = luascript(&["schema"]);
    assert!(output.status.success());
    let schema: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert!(schema.get("$schema").is_some());
}
