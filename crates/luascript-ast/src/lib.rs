//! luascript-ast - the ESTree program model handed to the lowering pass
//!
//! The scripting front-end is an external ESTree-producing parser (acorn,
//! esprima, ...). This crate deserializes its JSON output and offers the
//! [`build`] constructors for programs assembled in code.
//!
//! ```rust
//! let json = r#"{"type": "Program", "sourceType": "script", "body": [
//!     {"type": "ExpressionStatement", "expression": {"type": "Identifier", "name": "x"}}
//! ]}"#;
//! let program = luascript_ast::parse_program(json).unwrap();
//! assert_eq!(program.body[0].type_name(), "ExpressionStatement");
//! ```

pub mod ast;
pub mod build;

pub use ast::*;

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AstError {
    #[error("invalid ESTree JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("expected a Program node at the root, found `{0}`")]
    NotAProgram(String),
}

/// Parses the JSON text of an ESTree `Program`.
pub fn parse_program(json: &str) -> Result<Program, AstError> {
    let value: Value = serde_json::from_str(json)?;
    program_from_value(value)
}

/// Converts an already-parsed JSON value into a `Program`.
pub fn program_from_value(value: Value) -> Result<Program, AstError> {
    match value.get("type").and_then(Value::as_str) {
        Some("Program") | None => Ok(serde_json::from_value(value)?),
        Some(other) => Err(AstError::NotAProgram(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_acorn_output() {
        // `function add(a, b) { return a + b; }` as printed by acorn --locations
        let json = r#"{
          "type": "Program", "start": 0, "end": 36, "sourceType": "script",
          "loc": {"start": {"line": 1, "column": 0}, "end": {"line": 1, "column": 36}},
          "body": [{
            "type": "FunctionDeclaration", "start": 0, "end": 36,
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

        let program = parse_program(json).unwrap();
        let expected = build::program(vec![build::func(
            "add",
            vec![build::pid("a"), build::pid("b")],
            vec![build::ret(Some(build::bin("+", build::ident("a"), build::ident("b"))))],
        )]);

        // Positions differ; compare the re-serialized shapes without them.
        fn strip(value: &mut Value) {
            match value {
                Value::Object(map) => {
                    for key in ["start", "end", "loc", "expression"] {
                        map.remove(key);
                    }
                    map.values_mut().for_each(strip);
                }
                Value::Array(items) => items.iter_mut().for_each(strip),
                _ => {}
            }
        }
        let mut parsed = serde_json::to_value(&program).unwrap();
        let mut built = serde_json::to_value(&expected).unwrap();
        strip(&mut parsed);
        strip(&mut built);
        assert_eq!(parsed, built);
    }

    #[test]
    fn test_rejects_non_program_root() {
        let err = parse_program(r#"{"type": "Identifier", "name": "x"}"#).unwrap_err();
        assert!(matches!(err, AstError::NotAProgram(ref kind) if kind == "Identifier"));
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        assert!(matches!(parse_program("{"), Err(AstError::Json(_))));
    }
}
