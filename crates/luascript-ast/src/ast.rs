//! AST - ESTree node types produced by the external parser
//!
//! Only the fields the lowering pass reads are modelled; anything else a
//! parser attaches (`range`, comments, extra flags) is ignored on input.

use luascript_error::{Position, Span};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// `loc` as emitted by acorn/esprima: 1-based lines, 0-based columns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub start: LineColumn,
    pub end: LineColumn,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineColumn {
    pub line: u32,
    pub column: u32,
}

/// Positional data shared by every node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pos {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loc: Option<SourceLocation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<usize>,
}

impl Pos {
    pub fn span(&self, file_id: u32) -> Option<Span> {
        let loc = self.loc.as_ref()?;
        let start = Position::new(
            loc.start.line,
            loc.start.column + 1,
            self.start.unwrap_or_default(),
        );
        let end = Position::new(
            loc.end.line,
            loc.end.column + 1,
            self.end.unwrap_or_default(),
        );
        Some(Span::new(start, end, file_id))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    #[default]
    Script,
    Module,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Program {
    pub body: Vec<Stmt>,
    #[serde(default)]
    pub source_type: SourceType,
    #[serde(flatten)]
    pub pos: Pos,
}

/// A node kind the lowering pass knows by name but has no rule for.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Opaque {
    #[serde(flatten)]
    pub pos: Pos,
}

// ============================================================================
// Statements
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Stmt {
    ExpressionStatement(ExpressionStatement),
    BlockStatement(BlockStatement),
    EmptyStatement(Opaque),
    VariableDeclaration(VariableDeclaration),
    FunctionDeclaration(Function),
    ClassDeclaration(Class),
    ReturnStatement(ReturnStatement),
    IfStatement(IfStatement),
    ForStatement(ForStatement),
    ForInStatement(ForInStatement),
    ForOfStatement(ForOfStatement),
    WhileStatement(WhileStatement),
    DoWhileStatement(WhileStatement),
    BreakStatement(JumpStatement),
    ContinueStatement(JumpStatement),
    ThrowStatement(ThrowStatement),
    TryStatement(TryStatement),
    SwitchStatement(SwitchStatement),
    LabeledStatement(Opaque),
    WithStatement(Opaque),
    DebuggerStatement(Opaque),
    ImportDeclaration(Opaque),
    ExportNamedDeclaration(Opaque),
    ExportDefaultDeclaration(Opaque),
    ExportAllDeclaration(Opaque),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpressionStatement {
    pub expression: Expr,
    /// Set for directive prologue entries such as `"use strict"`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directive: Option<String>,
    #[serde(flatten)]
    pub pos: Pos,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockStatement {
    pub body: Vec<Stmt>,
    #[serde(flatten)]
    pub pos: Pos,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VarKind {
    Var,
    Let,
    Const,
}

impl VarKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            VarKind::Var => "var",
            VarKind::Let => "let",
            VarKind::Const => "const",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDeclaration {
    pub kind: VarKind,
    pub declarations: Vec<VariableDeclarator>,
    #[serde(flatten)]
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDeclarator {
    pub id: Pattern,
    #[serde(default)]
    pub init: Option<Expr>,
    #[serde(flatten)]
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnStatement {
    #[serde(default)]
    pub argument: Option<Expr>,
    #[serde(flatten)]
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IfStatement {
    pub test: Expr,
    pub consequent: Box<Stmt>,
    #[serde(default)]
    pub alternate: Option<Box<Stmt>>,
    #[serde(flatten)]
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForStatement {
    #[serde(default)]
    pub init: Option<ForInit>,
    #[serde(default)]
    pub test: Option<Expr>,
    #[serde(default)]
    pub update: Option<Expr>,
    pub body: Box<Stmt>,
    #[serde(flatten)]
    pub pos: Pos,
}

/// `for (init; ...)`: either a declaration or a bare expression.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ForInit {
    Declaration(VariableDeclaration),
    Expression(Expr),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForInStatement {
    pub left: ForHead,
    pub right: Expr,
    pub body: Box<Stmt>,
    #[serde(flatten)]
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForOfStatement {
    pub left: ForHead,
    pub right: Expr,
    pub body: Box<Stmt>,
    #[serde(rename = "await", default)]
    pub is_await: bool,
    #[serde(flatten)]
    pub pos: Pos,
}

/// Left side of `for-in` / `for-of`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ForHead {
    Declaration(VariableDeclaration),
    Pattern(Pattern),
}

/// Shared by `while` and `do-while`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhileStatement {
    pub test: Expr,
    pub body: Box<Stmt>,
    #[serde(flatten)]
    pub pos: Pos,
}

/// `break` / `continue`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JumpStatement {
    #[serde(default)]
    pub label: Option<Identifier>,
    #[serde(flatten)]
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThrowStatement {
    pub argument: Expr,
    #[serde(flatten)]
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TryStatement {
    pub block: BlockStatement,
    #[serde(default)]
    pub handler: Option<CatchClause>,
    #[serde(default)]
    pub finalizer: Option<BlockStatement>,
    #[serde(flatten)]
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatchClause {
    #[serde(default)]
    pub param: Option<Pattern>,
    pub body: BlockStatement,
    #[serde(flatten)]
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchStatement {
    pub discriminant: Expr,
    pub cases: Vec<SwitchCase>,
    #[serde(flatten)]
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchCase {
    /// `None` for `default:`
    #[serde(default)]
    pub test: Option<Expr>,
    pub consequent: Vec<Stmt>,
    #[serde(flatten)]
    pub pos: Pos,
}

// ============================================================================
// Functions and classes
// ============================================================================

/// `FunctionDeclaration` and `FunctionExpression`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    #[serde(default)]
    pub id: Option<Identifier>,
    pub params: Vec<Pattern>,
    pub body: BlockStatement,
    #[serde(rename = "async", default)]
    pub is_async: bool,
    #[serde(default)]
    pub generator: bool,
    #[serde(flatten)]
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrowFunction {
    pub params: Vec<Pattern>,
    pub body: ArrowBody,
    #[serde(rename = "async", default)]
    pub is_async: bool,
    #[serde(flatten)]
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ArrowBody {
    Block(BlockStatement),
    Expression(Box<Expr>),
}

/// `ClassDeclaration` and `ClassExpression`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Class {
    #[serde(default)]
    pub id: Option<Identifier>,
    #[serde(default)]
    pub super_class: Option<Box<Expr>>,
    pub body: ClassBody,
    #[serde(flatten)]
    pub pos: Pos,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassBody {
    pub body: Vec<ClassMember>,
    #[serde(flatten)]
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClassMember {
    MethodDefinition(MethodDefinition),
    PropertyDefinition(PropertyDefinition),
    StaticBlock(Opaque),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MethodKind {
    Constructor,
    Method,
    Get,
    Set,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodDefinition {
    pub key: Expr,
    pub value: Function,
    pub kind: MethodKind,
    #[serde(default)]
    pub computed: bool,
    #[serde(rename = "static", default)]
    pub is_static: bool,
    #[serde(flatten)]
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDefinition {
    pub key: Expr,
    #[serde(default)]
    pub value: Option<Expr>,
    #[serde(default)]
    pub computed: bool,
    #[serde(rename = "static", default)]
    pub is_static: bool,
    #[serde(flatten)]
    pub pos: Pos,
}

// ============================================================================
// Expressions
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Expr {
    Identifier(Identifier),
    Literal(Literal),
    TemplateLiteral(TemplateLiteral),
    ThisExpression(Opaque),
    Super(Opaque),
    ArrayExpression(ArrayExpression),
    ObjectExpression(ObjectExpression),
    FunctionExpression(Function),
    ArrowFunctionExpression(ArrowFunction),
    ClassExpression(Class),
    UnaryExpression(UnaryExpression),
    UpdateExpression(UpdateExpression),
    BinaryExpression(BinaryExpression),
    LogicalExpression(BinaryExpression),
    AssignmentExpression(AssignmentExpression),
    ConditionalExpression(ConditionalExpression),
    CallExpression(CallExpression),
    NewExpression(CallExpression),
    MemberExpression(MemberExpression),
    SequenceExpression(SequenceExpression),
    AwaitExpression(AwaitExpression),
    SpreadElement(SpreadElement),
    ParenthesizedExpression(ParenthesizedExpression),
    ChainExpression(Opaque),
    YieldExpression(Opaque),
    TaggedTemplateExpression(Opaque),
    MetaProperty(Opaque),
    ImportExpression(Opaque),
    PrivateIdentifier(Opaque),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identifier {
    pub name: String,
    #[serde(flatten)]
    pub pos: Pos,
}

/// Raw literal; the lowering pass decides what `value` means.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Literal {
    #[serde(default)]
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bigint: Option<String>,
    #[serde(flatten)]
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateLiteral {
    pub quasis: Vec<TemplateElement>,
    pub expressions: Vec<Expr>,
    #[serde(flatten)]
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateElement {
    pub value: TemplateValue,
    #[serde(default)]
    pub tail: bool,
    #[serde(flatten)]
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateValue {
    pub raw: String,
    #[serde(default)]
    pub cooked: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayExpression {
    /// `None` marks a hole (`[a, , b]`)
    pub elements: Vec<Option<Expr>>,
    #[serde(flatten)]
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectExpression {
    pub properties: Vec<ObjectMember>,
    #[serde(flatten)]
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ObjectMember {
    Property(Property),
    SpreadElement(SpreadElement),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyKind {
    #[default]
    Init,
    Get,
    Set,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub key: Expr,
    pub value: Expr,
    #[serde(default)]
    pub kind: PropertyKind,
    #[serde(default)]
    pub computed: bool,
    #[serde(default)]
    pub method: bool,
    #[serde(default)]
    pub shorthand: bool,
    #[serde(flatten)]
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnaryExpression {
    pub operator: String,
    pub argument: Box<Expr>,
    #[serde(default = "default_true")]
    pub prefix: bool,
    #[serde(flatten)]
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateExpression {
    pub operator: String,
    pub argument: Box<Expr>,
    pub prefix: bool,
    #[serde(flatten)]
    pub pos: Pos,
}

/// Shared by `BinaryExpression` and `LogicalExpression`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinaryExpression {
    pub operator: String,
    pub left: Box<Expr>,
    pub right: Box<Expr>,
    #[serde(flatten)]
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentExpression {
    pub operator: String,
    pub left: Box<Pattern>,
    pub right: Box<Expr>,
    #[serde(flatten)]
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionalExpression {
    pub test: Box<Expr>,
    pub consequent: Box<Expr>,
    pub alternate: Box<Expr>,
    #[serde(flatten)]
    pub pos: Pos,
}

/// Shared by `CallExpression` and `NewExpression`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallExpression {
    pub callee: Box<Expr>,
    pub arguments: Vec<Expr>,
    #[serde(default)]
    pub optional: bool,
    #[serde(flatten)]
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberExpression {
    pub object: Box<Expr>,
    pub property: Box<Expr>,
    #[serde(default)]
    pub computed: bool,
    #[serde(default)]
    pub optional: bool,
    #[serde(flatten)]
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceExpression {
    pub expressions: Vec<Expr>,
    #[serde(flatten)]
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AwaitExpression {
    pub argument: Box<Expr>,
    #[serde(flatten)]
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpreadElement {
    pub argument: Box<Expr>,
    #[serde(flatten)]
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParenthesizedExpression {
    pub expression: Box<Expr>,
    #[serde(flatten)]
    pub pos: Pos,
}

// ============================================================================
// Patterns
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Pattern {
    Identifier(Identifier),
    ObjectPattern(ObjectPattern),
    ArrayPattern(ArrayPattern),
    RestElement(RestElement),
    AssignmentPattern(AssignmentPattern),
    MemberExpression(MemberExpression),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectPattern {
    pub properties: Vec<ObjectPatternMember>,
    #[serde(flatten)]
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ObjectPatternMember {
    Property(PatternProperty),
    RestElement(RestElement),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternProperty {
    pub key: Expr,
    pub value: Pattern,
    #[serde(default)]
    pub computed: bool,
    #[serde(default)]
    pub shorthand: bool,
    #[serde(flatten)]
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayPattern {
    pub elements: Vec<Option<Pattern>>,
    #[serde(flatten)]
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestElement {
    pub argument: Box<Pattern>,
    #[serde(flatten)]
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentPattern {
    pub left: Box<Pattern>,
    pub right: Box<Expr>,
    #[serde(flatten)]
    pub pos: Pos,
}

// ============================================================================
// Accessors and untagged dispatch
// ============================================================================

macro_rules! node_accessors {
    ($enum:ident { $($variant:ident),* $(,)? }) => {
        impl $enum {
            /// ESTree `type` tag of this node
            pub fn type_name(&self) -> &'static str {
                match self {
                    $( $enum::$variant(_) => stringify!($variant), )*
                }
            }

            pub fn pos(&self) -> &Pos {
                match self {
                    $( $enum::$variant(node) => &node.pos, )*
                }
            }
        }
    };
}

node_accessors!(Stmt {
    ExpressionStatement, BlockStatement, EmptyStatement, VariableDeclaration,
    FunctionDeclaration, ClassDeclaration, ReturnStatement, IfStatement, ForStatement,
    ForInStatement, ForOfStatement, WhileStatement, DoWhileStatement, BreakStatement,
    ContinueStatement, ThrowStatement, TryStatement, SwitchStatement, LabeledStatement,
    WithStatement, DebuggerStatement, ImportDeclaration, ExportNamedDeclaration,
    ExportDefaultDeclaration, ExportAllDeclaration,
});

node_accessors!(Expr {
    Identifier, Literal, TemplateLiteral, ThisExpression, Super, ArrayExpression,
    ObjectExpression, FunctionExpression, ArrowFunctionExpression, ClassExpression,
    UnaryExpression, UpdateExpression, BinaryExpression, LogicalExpression,
    AssignmentExpression, ConditionalExpression, CallExpression, NewExpression,
    MemberExpression, SequenceExpression, AwaitExpression, SpreadElement,
    ParenthesizedExpression, ChainExpression, YieldExpression, TaggedTemplateExpression,
    MetaProperty, ImportExpression, PrivateIdentifier,
});

node_accessors!(Pattern {
    Identifier, ObjectPattern, ArrayPattern, RestElement, AssignmentPattern, MemberExpression,
});

node_accessors!(ClassMember {
    MethodDefinition, PropertyDefinition, StaticBlock,
});

fn default_true() -> bool {
    true
}

/// Reads a node as JSON and routes it by its `type` tag.
fn split_on_type<'de, D, A, B>(
    deserializer: D,
    first_type: &str,
    first: impl FnOnce(Value) -> serde_json::Result<A>,
    second: impl FnOnce(Value) -> serde_json::Result<B>,
) -> Result<Result<A, B>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let is_first = value.get("type").and_then(Value::as_str) == Some(first_type);
    if is_first {
        first(value).map(Ok).map_err(D::Error::custom)
    } else {
        second(value).map(Err).map_err(D::Error::custom)
    }
}

impl<'de> Deserialize<'de> for ForInit {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let routed = split_on_type(
            deserializer,
            "VariableDeclaration",
            serde_json::from_value::<VariableDeclaration>,
            serde_json::from_value::<Expr>,
        )?;
        Ok(match routed {
            Ok(decl) => ForInit::Declaration(decl),
            Err(expr) => ForInit::Expression(expr),
        })
    }
}

impl<'de> Deserialize<'de> for ForHead {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let routed = split_on_type(
            deserializer,
            "VariableDeclaration",
            serde_json::from_value::<VariableDeclaration>,
            serde_json::from_value::<Pattern>,
        )?;
        Ok(match routed {
            Ok(decl) => ForHead::Declaration(decl),
            Err(pattern) => ForHead::Pattern(pattern),
        })
    }
}

impl<'de> Deserialize<'de> for ArrowBody {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let routed = split_on_type(
            deserializer,
            "BlockStatement",
            serde_json::from_value::<BlockStatement>,
            serde_json::from_value::<Expr>,
        )?;
        Ok(match routed {
            Ok(block) => ArrowBody::Block(block),
            Err(expr) => ArrowBody::Expression(Box::new(expr)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_statement_tagging() {
        let stmt: Stmt = serde_json::from_value(json!({
            "type": "ReturnStatement",
            "argument": { "type": "Identifier", "name": "x" }
        }))
        .unwrap();

        assert_eq!(stmt.type_name(), "ReturnStatement");
        match stmt {
            Stmt::ReturnStatement(ret) => {
                assert!(matches!(ret.argument, Some(Expr::Identifier(ref id)) if id.name == "x"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_for_init_routes_on_type() {
        let stmt: Stmt = serde_json::from_value(json!({
            "type": "ForStatement",
            "init": {
                "type": "VariableDeclaration",
                "kind": "let",
                "declarations": [{
                    "type": "VariableDeclarator",
                    "id": { "type": "Identifier", "name": "i" },
                    "init": { "type": "Literal", "value": 0 }
                }]
            },
            "test": null,
            "update": { "type": "UpdateExpression", "operator": "++", "prefix": false,
                        "argument": { "type": "Identifier", "name": "i" } },
            "body": { "type": "BlockStatement", "body": [] }
        }))
        .unwrap();

        let Stmt::ForStatement(for_stmt) = stmt else {
            panic!("expected ForStatement");
        };
        assert!(matches!(for_stmt.init, Some(ForInit::Declaration(ref d)) if d.kind == VarKind::Let));
        assert!(for_stmt.test.is_none());
    }

    #[test]
    fn test_arrow_expression_body() {
        let expr: Expr = serde_json::from_value(json!({
            "type": "ArrowFunctionExpression",
            "params": [{ "type": "Identifier", "name": "x" }],
            "body": { "type": "BinaryExpression", "operator": "*",
                      "left": { "type": "Identifier", "name": "x" },
                      "right": { "type": "Literal", "value": 2 } },
            "expression": true,
            "async": false
        }))
        .unwrap();

        let Expr::ArrowFunctionExpression(arrow) = expr else {
            panic!("expected arrow");
        };
        assert!(matches!(arrow.body, ArrowBody::Expression(_)));
    }

    #[test]
    fn test_loc_to_span() {
        let ident: Identifier = serde_json::from_value(json!({
            "name": "total",
            "start": 4,
            "end": 9,
            "loc": { "start": { "line": 1, "column": 4 }, "end": { "line": 1, "column": 9 } }
        }))
        .unwrap();

        let span = ident.pos.span(3).unwrap();
        assert_eq!(span.start, Position::new(1, 5, 4));
        assert_eq!(span.end.offset, 9);
        assert_eq!(span.file_id, 3);
    }

    #[test]
    fn test_unsupported_kinds_still_deserialize() {
        let stmt: Stmt = serde_json::from_value(json!({
            "type": "LabeledStatement",
            "label": { "type": "Identifier", "name": "outer" },
            "body": { "type": "EmptyStatement" }
        }))
        .unwrap();
        assert_eq!(stmt.type_name(), "LabeledStatement");
    }
}
