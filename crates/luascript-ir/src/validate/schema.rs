//! Shape checks on the raw JSON form of a module
//!
//! Every node kind has a closed field table. The same table drives the
//! checks below and the JSON-Schema document published by [`json_schema`].

use crate::module::{is_compatible_version, SCHEMA_VERSION};
use serde_json::{json, Map, Value};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldType {
    Id,
    OptId,
    IdList,
    /// `[{spread, value}]`
    ListItems,
    Str,
    OptStr,
    StrList,
    Bool,
    Number,
    Enum(&'static [&'static str]),
}

type Fields = &'static [(&'static str, FieldType)];

const ENVELOPE: &[&str] = &["id", "kind", "span", "type", "synthetic"];

const DECLARATION_KINDS: &[&str] = &["var", "let", "const"];
const ITERATION_KINDS: &[&str] = &["values", "keys"];
const METHOD_KINDS: &[&str] = &["method", "get", "set"];

const BINARY: &[&str] = &[
    "+", "-", "*", "/", "%", "**", "==", "!=", "===", "!==", "<", "<=", ">", ">=", "&", "|",
    "^", "<<", ">>", ">>>", "in", "instanceof",
];
const LOGICAL: &[&str] = &["&&", "||", "??"];
const UNARY: &[&str] = &["-", "+", "!", "~", "typeof", "void", "delete"];
const UPDATE: &[&str] = &["++", "--"];
const ASSIGNMENT: &[&str] = &[
    "=", "+=", "-=", "*=", "/=", "%=", "**=", "<<=", ">>=", ">>>=", "&=", "|=", "^=", "&&=",
    "||=", "??=",
];

use FieldType::*;

const FUNCTION: Fields = &[
    ("name", OptStr),
    ("params", IdList),
    ("rest", OptId),
    ("body", Id),
    ("isAsync", Bool),
];

const CLASS: Fields = &[
    ("name", Str),
    ("superClass", OptId),
    ("constructor", Id),
    ("methods", IdList),
    ("staticProperties", IdList),
    ("metadata", Id),
    ("prototype", Id),
];

const CALL: Fields = &[("callee", Id), ("arguments", ListItems), ("hasSpread", Bool)];
const LOOP: Fields = &[("test", Id), ("body", Id)];

/// Field table of every node kind.
pub const KINDS: &[(&str, Fields)] = &[
    ("NumericLiteral", &[("value", Number)]),
    ("StringLiteral", &[("value", Str)]),
    ("BooleanLiteral", &[("value", Bool)]),
    ("NullLiteral", &[]),
    ("UndefinedLiteral", &[]),
    ("TemplateLiteral", &[("parts", IdList)]),
    ("TemplateElement", &[("cooked", Str), ("raw", Str)]),
    ("Identifier", &[("name", Str), ("binding", OptId)]),
    ("ThisExpression", &[]),
    ("Super", &[]),
    ("BinaryExpression", &[("operator", Enum(BINARY)), ("left", Id), ("right", Id)]),
    ("LogicalExpression", &[("operator", Enum(LOGICAL)), ("left", Id), ("right", Id)]),
    ("UnaryExpression", &[("operator", Enum(UNARY)), ("argument", Id)]),
    (
        "UpdateExpression",
        &[("operator", Enum(UPDATE)), ("prefix", Bool), ("argument", Id)],
    ),
    (
        "AssignmentExpression",
        &[("operator", Enum(ASSIGNMENT)), ("target", Id), ("value", Id)],
    ),
    (
        "ConditionalExpression",
        &[("test", Id), ("consequent", Id), ("alternate", Id)],
    ),
    ("CallExpression", CALL),
    ("NewExpression", CALL),
    (
        "MemberExpression",
        &[("object", Id), ("property", Id), ("computed", Bool)],
    ),
    ("ArrayExpression", &[("elements", ListItems), ("hasSpread", Bool)]),
    ("ObjectExpression", &[("properties", IdList)]),
    ("Property", &[("key", Id), ("value", Id), ("computed", Bool)]),
    ("SpreadElement", &[("argument", Id)]),
    ("SequenceExpression", &[("expressions", IdList)]),
    ("AwaitExpression", &[("argument", Id)]),
    ("FunctionExpression", FUNCTION),
    ("ArrowFunctionExpression", FUNCTION),
    ("ClassExpression", CLASS),
    ("FunctionDeclaration", FUNCTION),
    ("ClassDeclaration", CLASS),
    ("Parameter", &[("name", Str)]),
    ("RestElement", &[("argument", Id)]),
    (
        "VariableDeclaration",
        &[("declarationKind", Enum(DECLARATION_KINDS)), ("declarations", IdList)],
    ),
    ("VariableDeclarator", &[("name", Str), ("init", OptId)]),
    (
        "MethodDefinition",
        &[
            ("key", Str),
            ("value", Id),
            ("methodKind", Enum(METHOD_KINDS)),
            ("isStatic", Bool),
            ("home", OptId),
        ],
    ),
    (
        "ClassMetadata",
        &[
            ("superClass", OptStr),
            ("derived", Bool),
            ("instanceMethods", StrList),
            ("staticMethods", StrList),
            ("instanceFields", StrList),
            ("staticFields", StrList),
        ],
    ),
    ("PrototypeReference", &[("className", Str)]),
    ("ExpressionStatement", &[("expression", Id)]),
    ("BlockStatement", &[("body", IdList)]),
    ("EmptyStatement", &[]),
    (
        "IfStatement",
        &[("test", Id), ("consequent", Id), ("alternate", OptId)],
    ),
    (
        "ForStatement",
        &[("init", OptId), ("test", OptId), ("update", OptId), ("body", Id)],
    ),
    (
        "ForEachStatement",
        &[
            ("iterate", Enum(ITERATION_KINDS)),
            ("binding", Id),
            ("iterable", Id),
            ("body", Id),
        ],
    ),
    ("WhileStatement", LOOP),
    ("DoWhileStatement", LOOP),
    ("BreakStatement", &[]),
    ("ContinueStatement", &[]),
    ("ReturnStatement", &[("argument", OptId)]),
    ("ThrowStatement", &[("argument", Id)]),
    (
        "TryStatement",
        &[("block", Id), ("handler", OptId), ("finalizer", OptId)],
    ),
    ("CatchClause", &[("param", OptId), ("body", Id)]),
    ("SwitchStatement", &[("discriminant", Id), ("cases", IdList)]),
    ("SwitchCase", &[("test", OptId), ("consequent", IdList)]),
];

pub fn fields_of(kind: &str) -> Option<Fields> {
    KINDS.iter().find(|(name, _)| *name == kind).map(|(_, f)| *f)
}

fn is_id(value: &Value) -> bool {
    value.as_u64().is_some_and(|n| n <= u32::MAX as u64)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn check_field(path: &str, ty: FieldType, value: Option<&Value>, errors: &mut Vec<String>) {
    let value = match (ty, value) {
        (OptId | OptStr, None | Some(Value::Null)) => return,
        (_, None) => {
            errors.push(format!("{path}: missing required field"));
            return;
        }
        (_, Some(value)) => value,
    };
    match ty {
        Id | OptId => {
            if !is_id(value) {
                errors.push(format!("{path}: expected a node id, found {}", type_name(value)));
            }
        }
        IdList => match value.as_array() {
            Some(items) => {
                for (i, item) in items.iter().enumerate() {
                    if !is_id(item) {
                        errors.push(format!("{path}[{i}]: expected a node id, found {}", type_name(item)));
                    }
                }
            }
            None => errors.push(format!("{path}: expected an array of ids, found {}", type_name(value))),
        },
        ListItems => match value.as_array() {
            Some(items) => {
                for (i, item) in items.iter().enumerate() {
                    let item_path = format!("{path}[{i}]");
                    match item.as_object() {
                        Some(obj) => {
                            check_field(&format!("{item_path}.spread"), Bool, obj.get("spread"), errors);
                            check_field(&format!("{item_path}.value"), Id, obj.get("value"), errors);
                            for key in obj.keys().filter(|k| *k != "spread" && *k != "value") {
                                errors.push(format!("{item_path}.{key}: unknown field"));
                            }
                        }
                        None => errors.push(format!("{item_path}: expected an object, found {}", type_name(item))),
                    }
                }
            }
            None => errors.push(format!("{path}: expected an array, found {}", type_name(value))),
        },
        Str | OptStr => {
            if !value.is_string() {
                errors.push(format!("{path}: expected a string, found {}", type_name(value)));
            }
        }
        StrList => match value.as_array() {
            Some(items) if items.iter().all(Value::is_string) => {}
            _ => errors.push(format!("{path}: expected an array of strings")),
        },
        Bool => {
            if !value.is_boolean() {
                errors.push(format!("{path}: expected a boolean, found {}", type_name(value)));
            }
        }
        Number => {
            if !value.is_number() {
                errors.push(format!("{path}: expected a number, found {}", type_name(value)));
            }
        }
        Enum(allowed) => match value.as_str() {
            Some(s) if allowed.contains(&s) => {}
            Some(s) => errors.push(format!("{path}: `{s}` is not one of {}", allowed.join(" "))),
            None => errors.push(format!("{path}: expected a string, found {}", type_name(value))),
        },
    }
}

fn check_span(path: &str, value: &Value, errors: &mut Vec<String>) {
    let Some(span) = value.as_object() else {
        errors.push(format!("{path}: expected an object, found {}", type_name(value)));
        return;
    };
    for end in ["start", "end"] {
        let pos = span.get(end).and_then(Value::as_object);
        let valid = pos.is_some_and(|p| {
            p.get("line").is_some_and(Value::is_u64) && p.get("column").is_some_and(Value::is_u64)
        });
        if !valid {
            errors.push(format!("{path}.{end}: expected a position with line and column"));
        }
    }
}

fn check_node(key: &str, value: &Value, errors: &mut Vec<String>) {
    let path = format!("nodes.{key}");
    let Some(node) = value.as_object() else {
        errors.push(format!("{path}: expected an object, found {}", type_name(value)));
        return;
    };

    match node.get("id") {
        Some(id) if is_id(id) => {
            if key.parse::<u64>().ok() != id.as_u64() {
                errors.push(format!("{path}.id: {id} does not match its key"));
            }
        }
        Some(id) => errors.push(format!("{path}.id: expected a node id, found {}", type_name(id))),
        None => errors.push(format!("{path}.id: missing required field")),
    }
    if let Some(span) = node.get("span").filter(|s| !s.is_null()) {
        check_span(&format!("{path}.span"), span, errors);
    }
    if let Some(ty) = node.get("type").filter(|t| !t.is_null()) {
        if !ty.get("kind").is_some_and(Value::is_string) {
            errors.push(format!("{path}.type: expected a type descriptor"));
        }
    }
    if let Some(synthetic) = node.get("synthetic") {
        if !synthetic.is_boolean() {
            errors.push(format!("{path}.synthetic: expected a boolean"));
        }
    }

    let Some(kind) = node.get("kind").and_then(Value::as_str) else {
        errors.push(format!("{path}.kind: missing or not a string"));
        return;
    };
    let Some(fields) = fields_of(kind) else {
        errors.push(format!("{path}.kind: unknown node kind `{kind}`"));
        return;
    };
    for (name, ty) in fields {
        check_field(&format!("{path}.{name}"), *ty, node.get(*name), errors);
    }
    for field in node.keys() {
        let known = ENVELOPE.contains(&field.as_str()) || fields.iter().any(|(name, _)| name == field);
        if !known {
            errors.push(format!("{path}.{field}: unknown field for {kind}"));
        }
    }
}

/// Checks the whole document and returns every problem found.
pub fn check_document(document: &Value) -> Vec<String> {
    let mut errors = Vec::new();
    let Some(root) = document.as_object() else {
        errors.push(format!("$: expected an object, found {}", type_name(document)));
        return errors;
    };

    match root.get("schemaVersion").and_then(Value::as_str) {
        Some(version) if is_compatible_version(version) => {}
        Some(version) => errors.push(format!(
            "schemaVersion: `{version}` is not compatible with {SCHEMA_VERSION}"
        )),
        None => errors.push("schemaVersion: missing or not a string".to_string()),
    }

    match root.get("nodes").map(|n| n.as_object()) {
        Some(Some(nodes)) => {
            for (key, node) in nodes {
                check_node(key, node, &mut errors);
            }
        }
        Some(None) => errors.push("nodes: expected an object keyed by id".to_string()),
        None => errors.push("nodes: missing required field".to_string()),
    }

    check_field("body", IdList, root.get("body"), &mut errors);

    if let Some(metadata) = root.get("metadata") {
        if !metadata.is_object() {
            errors.push(format!("metadata: expected an object, found {}", type_name(metadata)));
        }
    }
    for key in root.keys() {
        if !matches!(key.as_str(), "schemaVersion" | "nodes" | "body" | "metadata") {
            errors.push(format!("{key}: unknown top-level field"));
        }
    }
    errors
}

fn field_schema(ty: FieldType) -> Value {
    let id = json!({"type": "integer", "minimum": 0, "maximum": u32::MAX});
    match ty {
        Id => id,
        OptId => json!({"oneOf": [id, {"type": "null"}]}),
        IdList => json!({"type": "array", "items": id}),
        ListItems => json!({
            "type": "array",
            "items": {
                "type": "object",
                "required": ["spread", "value"],
                "additionalProperties": false,
                "properties": {"spread": {"type": "boolean"}, "value": id}
            }
        }),
        Str => json!({"type": "string"}),
        OptStr => json!({"type": ["string", "null"]}),
        StrList => json!({"type": "array", "items": {"type": "string"}}),
        Bool => json!({"type": "boolean"}),
        Number => json!({"type": "number"}),
        Enum(values) => json!({"enum": values}),
    }
}

/// JSON-Schema (draft-07) document describing the module format.
pub fn json_schema() -> Value {
    let mut definitions = Map::new();
    for (kind, fields) in KINDS {
        let mut properties = Map::new();
        properties.insert("kind".into(), json!({"const": kind}));
        properties.insert("id".into(), field_schema(Id));
        properties.insert("span".into(), json!({"type": ["object", "null"]}));
        properties.insert("type".into(), json!({"type": ["object", "null"]}));
        properties.insert("synthetic".into(), json!({"type": "boolean"}));
        let mut required = vec![json!("id"), json!("kind")];
        for (name, ty) in *fields {
            properties.insert((*name).into(), field_schema(*ty));
            if !matches!(ty, OptId | OptStr) {
                required.push(json!(name));
            }
        }
        definitions.insert(
            (*kind).to_string(),
            json!({
                "type": "object",
                "properties": properties,
                "required": required,
                "additionalProperties": false
            }),
        );
    }
    let variants: Vec<Value> = KINDS
        .iter()
        .map(|(kind, _)| json!({"$ref": format!("#/definitions/{kind}")}))
        .collect();

    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "$id": format!("https://luascript.dev/ir/{SCHEMA_VERSION}/module.json"),
        "title": "LuaScript IR module",
        "type": "object",
        "required": ["schemaVersion", "nodes", "body"],
        "additionalProperties": false,
        "properties": {
            "schemaVersion": {"type": "string", "pattern": "^1\\.[0-9]+\\.[0-9]+$"},
            "nodes": {
                "type": "object",
                "propertyNames": {"pattern": "^[0-9]+$"},
                "additionalProperties": {"oneOf": variants}
            },
            "body": field_schema(IdList),
            "metadata": {"type": "object"}
        },
        "definitions": definitions
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{AssignmentOperator, BinaryOperator, LogicalOperator, UnaryOperator, UpdateOperator};

    fn symbols<T: Copy>(all: &[T], as_str: fn(&T) -> &'static str) -> Vec<&'static str> {
        all.iter().map(as_str).collect()
    }

    #[test]
    fn test_operator_tables_match_model() {
        assert_eq!(BINARY, symbols(BinaryOperator::ALL, BinaryOperator::as_str));
        assert_eq!(LOGICAL, symbols(LogicalOperator::ALL, LogicalOperator::as_str));
        assert_eq!(UNARY, symbols(UnaryOperator::ALL, UnaryOperator::as_str));
        assert_eq!(UPDATE, symbols(UpdateOperator::ALL, UpdateOperator::as_str));
        assert_eq!(ASSIGNMENT, symbols(AssignmentOperator::ALL, AssignmentOperator::as_str));
    }

    #[test]
    fn test_every_kind_listed_once() {
        let mut names: Vec<&str> = KINDS.iter().map(|(k, _)| *k).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), KINDS.len());
        assert_eq!(KINDS.len(), 53);
    }

    #[test]
    fn test_node_shape_errors() {
        let doc = json!({
            "schemaVersion": "1.0.0",
            "nodes": {
                "1": {"id": 1, "kind": "BinaryExpression", "operator": "<>", "left": "a"},
                "2": {"id": 3, "kind": "Mystery"},
                "3": {"id": 3, "kind": "EmptyStatement", "extra": true}
            },
            "body": [3]
        });
        let errors = check_document(&doc);
        assert!(errors.contains(&"nodes.1.operator: `<>` is not one of + - * / % ** == != === !== < <= > >= & | ^ << >> >>> in instanceof".to_string()));
        assert!(errors.contains(&"nodes.1.left: expected a node id, found a string".to_string()));
        assert!(errors.contains(&"nodes.1.right: missing required field".to_string()));
        assert!(errors.contains(&"nodes.2.id: 3 does not match its key".to_string()));
        assert!(errors.contains(&"nodes.2.kind: unknown node kind `Mystery`".to_string()));
        assert!(errors.contains(&"nodes.3.extra: unknown field for EmptyStatement".to_string()));
    }

    #[test]
    fn test_version_and_top_level() {
        let doc = json!({"schemaVersion": "2.0.0", "nodes": {}, "body": [], "extra": 1});
        let errors = check_document(&doc);
        assert_eq!(
            errors,
            vec![
                "schemaVersion: `2.0.0` is not compatible with 1.0.0".to_string(),
                "extra: unknown top-level field".to_string(),
            ]
        );
    }

    #[test]
    fn test_json_schema_lists_every_kind() {
        let schema = json_schema();
        let definitions = schema["definitions"].as_object().unwrap();
        assert_eq!(definitions.len(), KINDS.len());
        assert_eq!(
            definitions["ForEachStatement"]["properties"]["iterate"],
            json!({"enum": ["values", "keys"]})
        );
    }
}
