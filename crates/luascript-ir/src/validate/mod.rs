//! IR Validator
//!
//! Read-only. Runs every check and collects all problems as
//! `"<path>: <problem>"` strings instead of stopping at the first one.

mod invariants;
mod schema;

pub use schema::{check_document, json_schema, KINDS};

use crate::module::{Module, ModuleMetadata, SCHEMA_VERSION};
use crate::node::{Node, NodeId};
use crate::visit::ParentMap;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub ok: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    fn from_errors(errors: Vec<String>) -> Self {
        Self {
            ok: errors.is_empty(),
            errors,
        }
    }
}

/// Validates a typed module.
pub fn validate(module: &Module) -> ValidationReport {
    let mut errors = Vec::new();
    for (key, node) in &module.nodes {
        if *key != node.id {
            errors.push(format!("nodes.{key}.id: {} does not match its key", node.id));
        }
    }
    if !crate::module::is_compatible_version(module.schema_version()) {
        errors.push(format!(
            "schemaVersion: `{}` is not compatible with {}",
            module.schema_version(),
            crate::module::SCHEMA_VERSION
        ));
    }

    let parents = ParentMap::build(module);
    invariants::check_references(module, &mut errors);
    invariants::check_tree(module, &parents, &mut errors);
    invariants::check_scopes(module, &parents, &mut errors);
    invariants::check_cfg(module, &mut errors);

    debug!(nodes = module.len(), errors = errors.len(), "validated module");
    ValidationReport::from_errors(errors)
}

/// Validates a JSON document: shape first, then the semantic checks over
/// every node that can still be read. Both lists are merged.
pub fn validate_value(document: &Value) -> ValidationReport {
    let mut errors = check_document(document);
    if errors.is_empty() {
        return match serde_json::from_value::<Module>(document.clone()) {
            Ok(module) => validate(&module),
            Err(err) => ValidationReport::from_errors(vec![format!("$: {err}")]),
        };
    }
    if let Some((module, dropped)) = salvage(document) {
        let unreadable: Vec<String> = dropped.iter().map(|id| format!("references missing node {id}")).collect();
        for error in validate(&module).errors {
            if unreadable.iter().any(|suffix| error.ends_with(suffix.as_str())) || errors.contains(&error) {
                continue;
            }
            errors.push(error);
        }
    }
    ValidationReport::from_errors(errors)
}

/// Reads the nodes of a malformed document that still deserialize.
/// Returns the partial module and the ids that had to be left out.
fn salvage(document: &Value) -> Option<(Module, BTreeSet<NodeId>)> {
    let root = document.as_object()?;
    let mut nodes = BTreeMap::new();
    let mut dropped = BTreeSet::new();
    for (key, value) in root.get("nodes")?.as_object()? {
        let Ok(id) = key.parse::<u32>().map(NodeId) else {
            continue;
        };
        match serde_json::from_value::<Node>(value.clone()) {
            Ok(node) => {
                nodes.insert(id, node);
            }
            Err(_) => {
                dropped.insert(id);
            }
        }
    }
    let body = root
        .get("body")
        .and_then(|body| serde_json::from_value::<Vec<NodeId>>(body.clone()).ok())
        .unwrap_or_default();
    let metadata = root
        .get("metadata")
        .and_then(|metadata| serde_json::from_value::<ModuleMetadata>(metadata.clone()).ok())
        .unwrap_or_default();
    let module = Module {
        schema_version: SCHEMA_VERSION.to_string(),
        nodes,
        body,
        metadata,
    };
    Some((module, dropped))
}

pub fn validate_json(json: &str) -> ValidationReport {
    match serde_json::from_str::<Value>(json) {
        Ok(document) => validate_value(&document),
        Err(err) => ValidationReport::from_errors(vec![format!("$: invalid JSON: {err}")]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{BuildOptions, IrBuilder};
    use crate::node::*;
    use serde_json::json;

    #[test]
    fn test_dangling_reference_reported_not_thrown() {
        let doc = json!({
            "schemaVersion": "1.0.0",
            "nodes": {
                "1": {"id": 1, "kind": "NumericLiteral", "value": 1.0},
                "12": {"id": 12, "kind": "BinaryExpression", "operator": "+", "left": 99, "right": 1},
                "13": {"id": 13, "kind": "ExpressionStatement", "expression": 12}
            },
            "body": [13],
            "metadata": {}
        });
        let report = validate_value(&doc);
        assert!(!report.ok);
        assert_eq!(report.errors, vec!["nodes.12.left: references missing node 99".to_string()]);
    }

    #[test]
    fn test_collects_every_error() {
        let doc = json!({
            "schemaVersion": "1.0.0",
            "nodes": {
                "1": {"id": 1, "kind": "ExpressionStatement", "expression": 7},
                "2": {"id": 2, "kind": "ReturnStatement", "argument": 8}
            },
            "body": [1, 2, 5]
        });
        let report = validate_value(&doc);
        assert_eq!(
            report.errors,
            vec![
                "nodes.1.expression: references missing node 7".to_string(),
                "nodes.2.argument: references missing node 8".to_string(),
                "body[2]: references missing node 5".to_string(),
            ]
        );
    }

    #[test]
    fn test_category_violation() {
        let doc = json!({
            "schemaVersion": "1.0.0",
            "nodes": {
                "1": {"id": 1, "kind": "EmptyStatement"},
                "2": {"id": 2, "kind": "ExpressionStatement", "expression": 1}
            },
            "body": [2]
        });
        let report = validate_value(&doc);
        assert_eq!(
            report.errors,
            vec!["nodes.2.expression: expected an expression, found EmptyStatement (node 1)".to_string()]
        );
    }

    #[test]
    fn test_out_of_scope_binding() {
        // function f(a) {}  a;
        let mut b = IrBuilder::new();
        let param = b.parameter("a").unwrap();
        let body = b.block_statement(vec![]).unwrap();
        let func = b.function_declaration("f", vec![param.id], None, body.id, false).unwrap();
        let use_site = b.identifier("a", Some(param.id)).unwrap();
        let stmt = b.expression_statement(use_site.id).unwrap();
        b.push_statement(func);
        b.push_statement(stmt);

        let err = b.build(&BuildOptions::default()).unwrap_err();
        assert_eq!(
            err,
            crate::BuilderError::Validation(vec![format!(
                "nodes.{}.binding: `a` resolves to node {}, which is not in scope here",
                use_site.id, param.id
            )])
        );
    }

    #[test]
    fn test_var_binding_visible_in_whole_function() {
        // function f() { { var x; } return x; }
        let mut b = IrBuilder::new();
        let decl = b.variable_declarator("x", None).unwrap();
        let declaration = b.variable_declaration(DeclarationKind::Var, vec![decl.id]).unwrap();
        let inner = b.block_statement(vec![declaration.id]).unwrap();
        let x = b.identifier("x", Some(decl.id)).unwrap();
        let ret = b.return_statement(Some(x.id)).unwrap();
        let body = b.block_statement(vec![inner.id, ret.id]).unwrap();
        let func = b.function_declaration("f", vec![], None, body.id, false).unwrap();
        b.push_statement(func);

        let module = b.build(&BuildOptions::default()).unwrap();
        assert!(validate(&module).ok);
    }

    #[test]
    fn test_use_before_let_is_rejected() {
        // x; let x;
        let doc = json!({
            "schemaVersion": "1.0.0",
            "nodes": {
                "1": {"id": 1, "kind": "Identifier", "name": "x", "binding": 3},
                "2": {"id": 2, "kind": "ExpressionStatement", "expression": 1},
                "3": {"id": 3, "kind": "VariableDeclarator", "name": "x", "init": null},
                "4": {"id": 4, "kind": "VariableDeclaration", "declarationKind": "let", "declarations": [3]}
            },
            "body": [2, 4]
        });
        let report = validate_value(&doc);
        assert_eq!(
            report.errors,
            vec!["nodes.1.binding: `x` is used before its declaration (node 3)".to_string()]
        );
    }

    #[test]
    fn test_closure_may_name_a_later_let() {
        // function f() { return x; } let x;
        let doc = json!({
            "schemaVersion": "1.0.0",
            "nodes": {
                "1": {"id": 1, "kind": "Identifier", "name": "x", "binding": 5},
                "2": {"id": 2, "kind": "ReturnStatement", "argument": 1},
                "3": {"id": 3, "kind": "BlockStatement", "body": [2]},
                "4": {"id": 4, "kind": "FunctionDeclaration", "name": "f", "params": [], "body": 3, "isAsync": false},
                "5": {"id": 5, "kind": "VariableDeclarator", "name": "x", "init": null},
                "6": {"id": 6, "kind": "VariableDeclaration", "declarationKind": "let", "declarations": [5]}
            },
            "body": [4, 6]
        });
        let report = validate_value(&doc);
        assert!(report.ok, "{:?}", report.errors);
    }

    #[test]
    fn test_shared_child_breaks_tree() {
        let doc = json!({
            "schemaVersion": "1.0.0",
            "nodes": {
                "1": {"id": 1, "kind": "NumericLiteral", "value": 1.0},
                "2": {"id": 2, "kind": "ExpressionStatement", "expression": 1},
                "3": {"id": 3, "kind": "ExpressionStatement", "expression": 1}
            },
            "body": [2, 3]
        });
        let report = validate_value(&doc);
        assert_eq!(report.errors, vec!["nodes.1: owned by both node 2 and node 3".to_string()]);
    }

    #[test]
    fn test_shape_and_tree_errors_reported_together() {
        let doc = json!({
            "schemaVersion": "1.0.0",
            "nodes": {
                "1": {"id": 1, "kind": "NumericLiteral", "value": 1.0},
                "2": {"id": 2, "kind": "ExpressionStatement", "expression": 1},
                "3": {"id": 3, "kind": "ExpressionStatement", "expression": 1},
                "4": {"id": 4, "kind": "EmptyStatement", "extra": true}
            },
            "body": [2, 3, 4]
        });
        let report = validate_value(&doc);
        assert_eq!(
            report.errors,
            vec![
                "nodes.4.extra: unknown field for EmptyStatement".to_string(),
                "nodes.1: owned by both node 2 and node 3".to_string(),
            ]
        );
    }

    #[test]
    fn test_unreadable_node_is_not_reported_twice() {
        let doc = json!({
            "schemaVersion": "1.0.0",
            "nodes": {
                "1": {"id": 1, "kind": "Mystery"},
                "2": {"id": 2, "kind": "ExpressionStatement", "expression": 1},
                "3": {"id": 3, "kind": "ReturnStatement", "argument": 9}
            },
            "body": [2, 3]
        });
        let report = validate_value(&doc);
        assert_eq!(
            report.errors,
            vec![
                "nodes.1.kind: unknown node kind `Mystery`".to_string(),
                "nodes.3.argument: references missing node 9".to_string(),
            ]
        );
    }

    #[test]
    fn test_broken_cfg() {
        let doc = json!({
            "schemaVersion": "1.0.0",
            "nodes": {
                "1": {"id": 1, "kind": "BlockStatement", "body": []},
                "2": {"id": 2, "kind": "FunctionDeclaration", "name": "f", "params": [], "body": 1, "isAsync": false}
            },
            "body": [2],
            "metadata": {"cfg": {"2": {"entry": 0, "blocks": [
                {"id": 0, "statements": [], "successors": [4]},
                {"id": 1, "statements": [], "successors": []}
            ]}}}
        });
        let report = validate_value(&doc);
        assert_eq!(
            report.errors,
            vec![
                "metadata.cfg.2.blocks[0].successors: missing block 4".to_string(),
                "metadata.cfg.2.blocks[1]: block 1 is unreachable from entry".to_string(),
            ]
        );
    }

    #[test]
    fn test_invalid_json_text() {
        let report = validate_json("{ not json");
        assert!(!report.ok);
        assert!(report.errors[0].starts_with("$: invalid JSON"));
    }
}
