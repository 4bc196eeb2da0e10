//! Constructors for assembling ESTree programs in code.
//!
//! Hosts that embed their own parser, and the test suites, build ASTs with
//! these instead of spelling out JSON:
//!
//! ```rust
//! use luascript_ast::build::*;
//!
//! let program = program(vec![func(
//!     "add",
//!     vec![pid("a"), pid("b")],
//!     vec![ret(Some(bin("+", ident("a"), ident("b"))))],
//! )]);
//! assert_eq!(program.body.len(), 1);
//! ```

use crate::ast::*;
use serde_json::Value;

fn boxed(expr: Expr) -> Box<Expr> {
    Box::new(expr)
}

pub fn program(body: Vec<Stmt>) -> Program {
    Program {
        body,
        source_type: SourceType::Script,
        pos: Pos::default(),
    }
}

// ----------------------------------------------------------------------------
// Expressions
// ----------------------------------------------------------------------------

pub fn identifier(name: &str) -> Identifier {
    Identifier {
        name: name.to_string(),
        pos: Pos::default(),
    }
}

pub fn ident(name: &str) -> Expr {
    Expr::Identifier(identifier(name))
}

fn literal(value: Value) -> Expr {
    Expr::Literal(Literal {
        value,
        raw: None,
        regex: None,
        bigint: None,
        pos: Pos::default(),
    })
}

pub fn num(value: f64) -> Expr {
    literal(Value::from(value))
}

pub fn str_lit(value: &str) -> Expr {
    literal(Value::from(value))
}

pub fn bool_lit(value: bool) -> Expr {
    literal(Value::from(value))
}

pub fn null() -> Expr {
    literal(Value::Null)
}

pub fn this() -> Expr {
    Expr::ThisExpression(Opaque::default())
}

pub fn super_() -> Expr {
    Expr::Super(Opaque::default())
}

/// `quasis.len()` must be `exprs.len() + 1`.
pub fn template(quasis: &[&str], exprs: Vec<Expr>) -> Expr {
    let last = quasis.len().saturating_sub(1);
    Expr::TemplateLiteral(TemplateLiteral {
        quasis: quasis
            .iter()
            .enumerate()
            .map(|(i, text)| TemplateElement {
                value: TemplateValue {
                    raw: text.to_string(),
                    cooked: Some(text.to_string()),
                },
                tail: i == last,
                pos: Pos::default(),
            })
            .collect(),
        expressions: exprs,
        pos: Pos::default(),
    })
}

pub fn array(elements: Vec<Expr>) -> Expr {
    Expr::ArrayExpression(ArrayExpression {
        elements: elements.into_iter().map(Some).collect(),
        pos: Pos::default(),
    })
}

pub fn array_with_holes(elements: Vec<Option<Expr>>) -> Expr {
    Expr::ArrayExpression(ArrayExpression {
        elements,
        pos: Pos::default(),
    })
}

pub fn spread(argument: Expr) -> Expr {
    Expr::SpreadElement(SpreadElement {
        argument: boxed(argument),
        pos: Pos::default(),
    })
}

pub fn object(properties: Vec<ObjectMember>) -> Expr {
    Expr::ObjectExpression(ObjectExpression {
        properties,
        pos: Pos::default(),
    })
}

pub fn prop(key: &str, value: Expr) -> ObjectMember {
    ObjectMember::Property(Property {
        key: ident(key),
        value,
        kind: PropertyKind::Init,
        computed: false,
        method: false,
        shorthand: false,
        pos: Pos::default(),
    })
}

pub fn computed_prop(key: Expr, value: Expr) -> ObjectMember {
    ObjectMember::Property(Property {
        key,
        value,
        kind: PropertyKind::Init,
        computed: true,
        method: false,
        shorthand: false,
        pos: Pos::default(),
    })
}

pub fn spread_prop(argument: Expr) -> ObjectMember {
    ObjectMember::SpreadElement(SpreadElement {
        argument: boxed(argument),
        pos: Pos::default(),
    })
}

pub fn bin(op: &str, left: Expr, right: Expr) -> Expr {
    Expr::BinaryExpression(BinaryExpression {
        operator: op.to_string(),
        left: boxed(left),
        right: boxed(right),
        pos: Pos::default(),
    })
}

pub fn logical(op: &str, left: Expr, right: Expr) -> Expr {
    Expr::LogicalExpression(BinaryExpression {
        operator: op.to_string(),
        left: boxed(left),
        right: boxed(right),
        pos: Pos::default(),
    })
}

pub fn unary(op: &str, argument: Expr) -> Expr {
    Expr::UnaryExpression(UnaryExpression {
        operator: op.to_string(),
        argument: boxed(argument),
        prefix: true,
        pos: Pos::default(),
    })
}

pub fn update(op: &str, prefix: bool, argument: Expr) -> Expr {
    Expr::UpdateExpression(UpdateExpression {
        operator: op.to_string(),
        argument: boxed(argument),
        prefix,
        pos: Pos::default(),
    })
}

pub fn assign(op: &str, target: Pattern, value: Expr) -> Expr {
    Expr::AssignmentExpression(AssignmentExpression {
        operator: op.to_string(),
        left: Box::new(target),
        right: boxed(value),
        pos: Pos::default(),
    })
}

pub fn cond(test: Expr, consequent: Expr, alternate: Expr) -> Expr {
    Expr::ConditionalExpression(ConditionalExpression {
        test: boxed(test),
        consequent: boxed(consequent),
        alternate: boxed(alternate),
        pos: Pos::default(),
    })
}

fn call_node(callee: Expr, arguments: Vec<Expr>) -> CallExpression {
    CallExpression {
        callee: boxed(callee),
        arguments,
        optional: false,
        pos: Pos::default(),
    }
}

pub fn call(callee: Expr, arguments: Vec<Expr>) -> Expr {
    Expr::CallExpression(call_node(callee, arguments))
}

pub fn new_expr(callee: Expr, arguments: Vec<Expr>) -> Expr {
    Expr::NewExpression(call_node(callee, arguments))
}

fn member_node(object: Expr, property: Expr, computed: bool) -> MemberExpression {
    MemberExpression {
        object: boxed(object),
        property: boxed(property),
        computed,
        optional: false,
        pos: Pos::default(),
    }
}

/// `object.name`
pub fn member(object: Expr, name: &str) -> Expr {
    Expr::MemberExpression(member_node(object, ident(name), false))
}

/// `object[property]`
pub fn index(object: Expr, property: Expr) -> Expr {
    Expr::MemberExpression(member_node(object, property, true))
}

pub fn seq(expressions: Vec<Expr>) -> Expr {
    Expr::SequenceExpression(SequenceExpression {
        expressions,
        pos: Pos::default(),
    })
}

pub fn await_expr(argument: Expr) -> Expr {
    Expr::AwaitExpression(AwaitExpression {
        argument: boxed(argument),
        pos: Pos::default(),
    })
}

pub fn arrow(params: Vec<Pattern>, body: Expr) -> Expr {
    Expr::ArrowFunctionExpression(ArrowFunction {
        params,
        body: ArrowBody::Expression(boxed(body)),
        is_async: false,
        pos: Pos::default(),
    })
}

pub fn arrow_block(params: Vec<Pattern>, body: Vec<Stmt>) -> Expr {
    Expr::ArrowFunctionExpression(ArrowFunction {
        params,
        body: ArrowBody::Block(block_node(body)),
        is_async: false,
        pos: Pos::default(),
    })
}

fn function_node(name: Option<&str>, params: Vec<Pattern>, body: Vec<Stmt>, is_async: bool) -> Function {
    Function {
        id: name.map(identifier),
        params,
        body: block_node(body),
        is_async,
        generator: false,
        pos: Pos::default(),
    }
}

pub fn func_expr(name: Option<&str>, params: Vec<Pattern>, body: Vec<Stmt>) -> Expr {
    Expr::FunctionExpression(function_node(name, params, body, false))
}

pub fn class_expr(name: Option<&str>, super_class: Option<Expr>, members: Vec<ClassMember>) -> Expr {
    Expr::ClassExpression(class_node(name, super_class, members))
}

// ----------------------------------------------------------------------------
// Patterns
// ----------------------------------------------------------------------------

pub fn pid(name: &str) -> Pattern {
    Pattern::Identifier(identifier(name))
}

/// `target.name` as an assignment target
pub fn pmember(object: Expr, name: &str) -> Pattern {
    Pattern::MemberExpression(member_node(object, ident(name), false))
}

/// `{ key: value, ...rest }`; shorthand when key and value name agree.
pub fn obj_pat(entries: Vec<(&str, Pattern)>, rest: Option<&str>) -> Pattern {
    let mut properties: Vec<ObjectPatternMember> = entries
        .into_iter()
        .map(|(key, value)| {
            let shorthand = matches!(&value, Pattern::Identifier(id) if id.name == key);
            ObjectPatternMember::Property(PatternProperty {
                key: ident(key),
                value,
                computed: false,
                shorthand,
                pos: Pos::default(),
            })
        })
        .collect();
    if let Some(rest) = rest {
        properties.push(ObjectPatternMember::RestElement(RestElement {
            argument: Box::new(pid(rest)),
            pos: Pos::default(),
        }));
    }
    Pattern::ObjectPattern(ObjectPattern {
        properties,
        pos: Pos::default(),
    })
}

/// `[a, , b, ...rest]`
pub fn arr_pat(elements: Vec<Option<Pattern>>, rest: Option<Pattern>) -> Pattern {
    let mut elements = elements;
    if let Some(rest) = rest {
        elements.push(Some(rest_pat(rest)));
    }
    Pattern::ArrayPattern(ArrayPattern {
        elements,
        pos: Pos::default(),
    })
}

pub fn default_pat(target: Pattern, value: Expr) -> Pattern {
    Pattern::AssignmentPattern(AssignmentPattern {
        left: Box::new(target),
        right: boxed(value),
        pos: Pos::default(),
    })
}

pub fn rest_pat(argument: Pattern) -> Pattern {
    Pattern::RestElement(RestElement {
        argument: Box::new(argument),
        pos: Pos::default(),
    })
}

// ----------------------------------------------------------------------------
// Statements
// ----------------------------------------------------------------------------

pub fn expr_stmt(expression: Expr) -> Stmt {
    Stmt::ExpressionStatement(ExpressionStatement {
        expression,
        directive: None,
        pos: Pos::default(),
    })
}

/// `"use strict";` style prologue entry.
pub fn directive(value: &str) -> Stmt {
    Stmt::ExpressionStatement(ExpressionStatement {
        expression: str_lit(value),
        directive: Some(value.to_string()),
        pos: Pos::default(),
    })
}

pub fn declaration(kind: VarKind, declarations: Vec<(Pattern, Option<Expr>)>) -> VariableDeclaration {
    VariableDeclaration {
        kind,
        declarations: declarations
            .into_iter()
            .map(|(id, init)| VariableDeclarator {
                id,
                init,
                pos: Pos::default(),
            })
            .collect(),
        pos: Pos::default(),
    }
}

pub fn decl(kind: VarKind, target: Pattern, init: Option<Expr>) -> Stmt {
    Stmt::VariableDeclaration(declaration(kind, vec![(target, init)]))
}

pub fn let_(name: &str, init: Expr) -> Stmt {
    decl(VarKind::Let, pid(name), Some(init))
}

pub fn const_(name: &str, init: Expr) -> Stmt {
    decl(VarKind::Const, pid(name), Some(init))
}

pub fn var_(name: &str, init: Option<Expr>) -> Stmt {
    decl(VarKind::Var, pid(name), init)
}

fn block_node(body: Vec<Stmt>) -> BlockStatement {
    BlockStatement {
        body,
        pos: Pos::default(),
    }
}

pub fn block(body: Vec<Stmt>) -> Stmt {
    Stmt::BlockStatement(block_node(body))
}

pub fn ret(argument: Option<Expr>) -> Stmt {
    Stmt::ReturnStatement(ReturnStatement {
        argument,
        pos: Pos::default(),
    })
}

pub fn if_(test: Expr, consequent: Vec<Stmt>, alternate: Option<Vec<Stmt>>) -> Stmt {
    Stmt::IfStatement(IfStatement {
        test,
        consequent: Box::new(block(consequent)),
        alternate: alternate.map(|body| Box::new(block(body))),
        pos: Pos::default(),
    })
}

/// `if (test) ... else if ...` with an arbitrary statement as the alternate
pub fn if_else(test: Expr, consequent: Vec<Stmt>, alternate: Stmt) -> Stmt {
    Stmt::IfStatement(IfStatement {
        test,
        consequent: Box::new(block(consequent)),
        alternate: Some(Box::new(alternate)),
        pos: Pos::default(),
    })
}

pub fn while_(test: Expr, body: Vec<Stmt>) -> Stmt {
    Stmt::WhileStatement(WhileStatement {
        test,
        body: Box::new(block(body)),
        pos: Pos::default(),
    })
}

pub fn do_while(body: Vec<Stmt>, test: Expr) -> Stmt {
    Stmt::DoWhileStatement(WhileStatement {
        test,
        body: Box::new(block(body)),
        pos: Pos::default(),
    })
}

pub fn for_(init: Option<ForInit>, test: Option<Expr>, update: Option<Expr>, body: Vec<Stmt>) -> Stmt {
    Stmt::ForStatement(ForStatement {
        init,
        test,
        update,
        body: Box::new(block(body)),
        pos: Pos::default(),
    })
}

/// `let name = init` as a `for` initializer
pub fn for_let(name: &str, init: Expr) -> ForInit {
    ForInit::Declaration(declaration(VarKind::Let, vec![(pid(name), Some(init))]))
}

pub fn for_of(kind: VarKind, target: Pattern, iterable: Expr, body: Vec<Stmt>) -> Stmt {
    Stmt::ForOfStatement(ForOfStatement {
        left: ForHead::Declaration(declaration(kind, vec![(target, None)])),
        right: iterable,
        body: Box::new(block(body)),
        is_await: false,
        pos: Pos::default(),
    })
}

pub fn for_in(kind: VarKind, target: Pattern, object: Expr, body: Vec<Stmt>) -> Stmt {
    Stmt::ForInStatement(ForInStatement {
        left: ForHead::Declaration(declaration(kind, vec![(target, None)])),
        right: object,
        body: Box::new(block(body)),
        pos: Pos::default(),
    })
}

pub fn brk() -> Stmt {
    Stmt::BreakStatement(JumpStatement::default())
}

pub fn cont() -> Stmt {
    Stmt::ContinueStatement(JumpStatement::default())
}

pub fn throw(argument: Expr) -> Stmt {
    Stmt::ThrowStatement(ThrowStatement {
        argument,
        pos: Pos::default(),
    })
}

pub fn try_(
    body: Vec<Stmt>,
    handler: Option<(Option<Pattern>, Vec<Stmt>)>,
    finalizer: Option<Vec<Stmt>>,
) -> Stmt {
    Stmt::TryStatement(TryStatement {
        block: block_node(body),
        handler: handler.map(|(param, body)| CatchClause {
            param,
            body: block_node(body),
            pos: Pos::default(),
        }),
        finalizer: finalizer.map(block_node),
        pos: Pos::default(),
    })
}

/// Cases are `(test, consequent)`; a `None` test is `default:`.
pub fn switch(discriminant: Expr, cases: Vec<(Option<Expr>, Vec<Stmt>)>) -> Stmt {
    Stmt::SwitchStatement(SwitchStatement {
        discriminant,
        cases: cases
            .into_iter()
            .map(|(test, consequent)| SwitchCase {
                test,
                consequent,
                pos: Pos::default(),
            })
            .collect(),
        pos: Pos::default(),
    })
}

pub fn func(name: &str, params: Vec<Pattern>, body: Vec<Stmt>) -> Stmt {
    Stmt::FunctionDeclaration(function_node(Some(name), params, body, false))
}

pub fn async_func(name: &str, params: Vec<Pattern>, body: Vec<Stmt>) -> Stmt {
    Stmt::FunctionDeclaration(function_node(Some(name), params, body, true))
}

fn class_node(name: Option<&str>, super_class: Option<Expr>, members: Vec<ClassMember>) -> Class {
    Class {
        id: name.map(identifier),
        super_class: super_class.map(boxed),
        body: ClassBody {
            body: members,
            pos: Pos::default(),
        },
        pos: Pos::default(),
    }
}

pub fn class(name: &str, super_class: Option<Expr>, members: Vec<ClassMember>) -> Stmt {
    Stmt::ClassDeclaration(class_node(Some(name), super_class, members))
}

fn method_node(name: &str, kind: MethodKind, is_static: bool, params: Vec<Pattern>, body: Vec<Stmt>) -> ClassMember {
    ClassMember::MethodDefinition(MethodDefinition {
        key: ident(name),
        value: function_node(None, params, body, false),
        kind,
        computed: false,
        is_static,
        pos: Pos::default(),
    })
}

pub fn constructor(params: Vec<Pattern>, body: Vec<Stmt>) -> ClassMember {
    method_node("constructor", MethodKind::Constructor, false, params, body)
}

pub fn method(name: &str, params: Vec<Pattern>, body: Vec<Stmt>) -> ClassMember {
    method_node(name, MethodKind::Method, false, params, body)
}

pub fn static_method(name: &str, params: Vec<Pattern>, body: Vec<Stmt>) -> ClassMember {
    method_node(name, MethodKind::Method, true, params, body)
}

pub fn getter(name: &str, body: Vec<Stmt>) -> ClassMember {
    method_node(name, MethodKind::Get, false, Vec::new(), body)
}

pub fn field(name: &str, value: Option<Expr>) -> ClassMember {
    ClassMember::PropertyDefinition(PropertyDefinition {
        key: ident(name),
        value,
        computed: false,
        is_static: false,
        pos: Pos::default(),
    })
}

pub fn static_field(name: &str, value: Option<Expr>) -> ClassMember {
    ClassMember::PropertyDefinition(PropertyDefinition {
        key: ident(name),
        value,
        computed: false,
        is_static: true,
        pos: Pos::default(),
    })
}
