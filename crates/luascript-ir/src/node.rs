//! IR nodes
//!
//! Every node lives in the module's flat node table and refers to other
//! nodes only by [`NodeId`]. On the wire a node is a single JSON object:
//! the envelope (`id`, `kind`, optional `span`, `type`, `synthetic`) plus the
//! kind-specific fields in camelCase.

use crate::types::TypeDescriptor;
use luascript_error::Span;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Handle of a node in a module's node table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

macro_rules! operator_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $symbol:literal),* $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $( #[serde(rename = $symbol)] $variant, )*
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),*];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $( $name::$variant => $symbol, )*
                }
            }

            pub fn parse(symbol: &str) -> Option<Self> {
                match symbol {
                    $( $symbol => Some($name::$variant), )*
                    _ => None,
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

operator_enum!(BinaryOperator {
    Add => "+",
    Sub => "-",
    Mul => "*",
    Div => "/",
    Rem => "%",
    Exp => "**",
    Eq => "==",
    NotEq => "!=",
    StrictEq => "===",
    StrictNotEq => "!==",
    Lt => "<",
    LtEq => "<=",
    Gt => ">",
    GtEq => ">=",
    BitAnd => "&",
    BitOr => "|",
    BitXor => "^",
    Shl => "<<",
    Shr => ">>",
    UShr => ">>>",
    In => "in",
    InstanceOf => "instanceof",
});

impl BinaryOperator {
    pub fn is_comparison(&self) -> bool {
        use BinaryOperator::*;
        matches!(
            self,
            Eq | NotEq | StrictEq | StrictNotEq | Lt | LtEq | Gt | GtEq | In | InstanceOf
        )
    }

    pub fn is_arithmetic(&self) -> bool {
        use BinaryOperator::*;
        matches!(self, Add | Sub | Mul | Div | Rem | Exp)
    }

    pub fn is_bitwise(&self) -> bool {
        use BinaryOperator::*;
        matches!(self, BitAnd | BitOr | BitXor | Shl | Shr | UShr)
    }
}

operator_enum!(LogicalOperator {
    And => "&&",
    Or => "||",
    Nullish => "??",
});

operator_enum!(UnaryOperator {
    Neg => "-",
    Plus => "+",
    Not => "!",
    BitNot => "~",
    TypeOf => "typeof",
    Void => "void",
    Delete => "delete",
});

operator_enum!(UpdateOperator {
    Increment => "++",
    Decrement => "--",
});

operator_enum!(AssignmentOperator {
    Assign => "=",
    AddAssign => "+=",
    SubAssign => "-=",
    MulAssign => "*=",
    DivAssign => "/=",
    RemAssign => "%=",
    ExpAssign => "**=",
    ShlAssign => "<<=",
    ShrAssign => ">>=",
    UShrAssign => ">>>=",
    BitAndAssign => "&=",
    BitOrAssign => "|=",
    BitXorAssign => "^=",
    AndAssign => "&&=",
    OrAssign => "||=",
    NullishAssign => "??=",
});

impl AssignmentOperator {
    /// Arithmetic/bitwise operator applied by a compound assignment.
    pub fn binary(&self) -> Option<BinaryOperator> {
        use AssignmentOperator::*;
        Some(match self {
            AddAssign => BinaryOperator::Add,
            SubAssign => BinaryOperator::Sub,
            MulAssign => BinaryOperator::Mul,
            DivAssign => BinaryOperator::Div,
            RemAssign => BinaryOperator::Rem,
            ExpAssign => BinaryOperator::Exp,
            ShlAssign => BinaryOperator::Shl,
            ShrAssign => BinaryOperator::Shr,
            UShrAssign => BinaryOperator::UShr,
            BitAndAssign => BinaryOperator::BitAnd,
            BitOrAssign => BinaryOperator::BitOr,
            BitXorAssign => BinaryOperator::BitXor,
            _ => return None,
        })
    }

    /// Short-circuit operator applied by a logical assignment.
    pub fn logical(&self) -> Option<LogicalOperator> {
        match self {
            AssignmentOperator::AndAssign => Some(LogicalOperator::And),
            AssignmentOperator::OrAssign => Some(LogicalOperator::Or),
            AssignmentOperator::NullishAssign => Some(LogicalOperator::Nullish),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeclarationKind {
    Var,
    Let,
    Const,
}

impl DeclarationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeclarationKind::Var => "var",
            DeclarationKind::Let => "let",
            DeclarationKind::Const => "const",
        }
    }
}

/// What a `ForEachStatement` walks over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IterationKind {
    /// `for-of`
    Values,
    /// `for-in`
    Keys,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MethodKind {
    Method,
    Get,
    Set,
}

/// Element of an argument or array list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListItem {
    pub spread: bool,
    pub value: NodeId,
}

impl ListItem {
    pub fn plain(value: NodeId) -> Self {
        Self {
            spread: false,
            value,
        }
    }

    pub fn spread(value: NodeId) -> Self {
        Self { spread: true, value }
    }
}

/// Fields shared by function declarations, expressions and arrows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionNode {
    pub name: Option<String>,
    /// `Parameter` nodes, in order
    pub params: Vec<NodeId>,
    /// `RestElement` wrapping the trailing `...rest` parameter
    pub rest: Option<NodeId>,
    /// `BlockStatement`
    pub body: NodeId,
    pub is_async: bool,
}

/// Fields shared by class declarations and expressions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassNode {
    pub name: String,
    pub super_class: Option<NodeId>,
    /// `FunctionExpression` run by `new`
    pub constructor: NodeId,
    /// `MethodDefinition` nodes
    pub methods: Vec<NodeId>,
    /// `Property` nodes assigned on the class itself
    pub static_properties: Vec<NodeId>,
    /// `ClassMetadata`
    pub metadata: NodeId,
    /// `PrototypeReference` shared by the instance methods
    pub prototype: NodeId,
}

/// The closed set of IR node kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all_fields = "camelCase")]
pub enum NodeKind {
    // Literals
    NumericLiteral {
        value: f64,
    },
    StringLiteral {
        value: String,
    },
    BooleanLiteral {
        value: bool,
    },
    NullLiteral,
    UndefinedLiteral,
    /// `TemplateElement` and expression ids in source order
    TemplateLiteral {
        parts: Vec<NodeId>,
    },
    TemplateElement {
        cooked: String,
        raw: String,
    },

    // Expressions
    Identifier {
        name: String,
        /// Declaring node; `None` for globals
        binding: Option<NodeId>,
    },
    ThisExpression,
    Super,
    BinaryExpression {
        operator: BinaryOperator,
        left: NodeId,
        right: NodeId,
    },
    LogicalExpression {
        operator: LogicalOperator,
        left: NodeId,
        right: NodeId,
    },
    UnaryExpression {
        operator: UnaryOperator,
        argument: NodeId,
    },
    UpdateExpression {
        operator: UpdateOperator,
        prefix: bool,
        argument: NodeId,
    },
    AssignmentExpression {
        operator: AssignmentOperator,
        target: NodeId,
        value: NodeId,
    },
    ConditionalExpression {
        test: NodeId,
        consequent: NodeId,
        alternate: NodeId,
    },
    CallExpression {
        callee: NodeId,
        arguments: Vec<ListItem>,
        has_spread: bool,
    },
    NewExpression {
        callee: NodeId,
        arguments: Vec<ListItem>,
        has_spread: bool,
    },
    /// Non-computed access stores the property name as a `StringLiteral`
    MemberExpression {
        object: NodeId,
        property: NodeId,
        computed: bool,
    },
    ArrayExpression {
        elements: Vec<ListItem>,
        has_spread: bool,
    },
    /// `Property` and `SpreadElement` ids
    ObjectExpression {
        properties: Vec<NodeId>,
    },
    Property {
        key: NodeId,
        value: NodeId,
        computed: bool,
    },
    /// `...expr` inside an object literal
    SpreadElement {
        argument: NodeId,
    },
    SequenceExpression {
        expressions: Vec<NodeId>,
    },
    AwaitExpression {
        argument: NodeId,
    },
    FunctionExpression(FunctionNode),
    ArrowFunctionExpression(FunctionNode),
    ClassExpression(ClassNode),

    // Declarations and binding sites
    FunctionDeclaration(FunctionNode),
    ClassDeclaration(ClassNode),
    Parameter {
        name: String,
    },
    RestElement {
        /// `Parameter` receiving the collected arguments
        argument: NodeId,
    },
    VariableDeclaration {
        declaration_kind: DeclarationKind,
        declarations: Vec<NodeId>,
    },
    VariableDeclarator {
        name: String,
        init: Option<NodeId>,
    },
    MethodDefinition {
        key: String,
        /// `FunctionExpression`
        value: NodeId,
        method_kind: MethodKind,
        is_static: bool,
        /// Prototype the method is installed on; `None` for static methods
        home: Option<NodeId>,
    },
    ClassMetadata {
        /// Parent class name when `extends` names a plain identifier
        super_class: Option<String>,
        derived: bool,
        instance_methods: Vec<String>,
        static_methods: Vec<String>,
        instance_fields: Vec<String>,
        static_fields: Vec<String>,
    },
    PrototypeReference {
        class_name: String,
    },

    // Statements
    ExpressionStatement {
        expression: NodeId,
    },
    BlockStatement {
        body: Vec<NodeId>,
    },
    EmptyStatement,
    IfStatement {
        test: NodeId,
        consequent: NodeId,
        alternate: Option<NodeId>,
    },
    ForStatement {
        init: Option<NodeId>,
        test: Option<NodeId>,
        update: Option<NodeId>,
        body: NodeId,
    },
    /// Canonical `for-of` / `for-in` loop; `binding` is a fresh
    /// `VariableDeclarator` per iteration
    ForEachStatement {
        iterate: IterationKind,
        binding: NodeId,
        iterable: NodeId,
        body: NodeId,
    },
    WhileStatement {
        test: NodeId,
        body: NodeId,
    },
    DoWhileStatement {
        body: NodeId,
        test: NodeId,
    },
    BreakStatement,
    ContinueStatement,
    ReturnStatement {
        argument: Option<NodeId>,
    },
    ThrowStatement {
        argument: NodeId,
    },
    TryStatement {
        block: NodeId,
        handler: Option<NodeId>,
        finalizer: Option<NodeId>,
    },
    CatchClause {
        param: Option<NodeId>,
        body: NodeId,
    },
    SwitchStatement {
        discriminant: NodeId,
        cases: Vec<NodeId>,
    },
    SwitchCase {
        /// `None` for `default:`
        test: Option<NodeId>,
        consequent: Vec<NodeId>,
    },
}

/// What a referenced node is allowed to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Expression,
    Statement,
    /// `Identifier` or `MemberExpression`
    AssignTarget,
    /// Node that can be the `binding` of an `Identifier`
    Binding,
    /// `TemplateElement` or an expression
    TemplatePart,
    /// `Property` or `SpreadElement`
    ObjectMember,
    /// `VariableDeclaration` or an expression
    ForInit,
    Parameter,
    RestElement,
    Block,
    Declarator,
    FunctionExpression,
    Method,
    Property,
    CatchClause,
    SwitchCase,
    ClassMetadata,
    Prototype,
}

impl Category {
    pub fn admits(&self, kind: &NodeKind) -> bool {
        match self {
            Category::Expression => kind.is_expression(),
            Category::Statement => kind.is_statement(),
            Category::AssignTarget => matches!(
                kind,
                NodeKind::Identifier { .. } | NodeKind::MemberExpression { .. }
            ),
            Category::Binding => kind.is_binding(),
            Category::TemplatePart => {
                matches!(kind, NodeKind::TemplateElement { .. }) || kind.is_expression()
            }
            Category::ObjectMember => matches!(
                kind,
                NodeKind::Property { .. } | NodeKind::SpreadElement { .. }
            ),
            Category::ForInit => {
                matches!(kind, NodeKind::VariableDeclaration { .. }) || kind.is_expression()
            }
            Category::Parameter => matches!(kind, NodeKind::Parameter { .. }),
            Category::RestElement => matches!(kind, NodeKind::RestElement { .. }),
            Category::Block => matches!(kind, NodeKind::BlockStatement { .. }),
            Category::Declarator => matches!(kind, NodeKind::VariableDeclarator { .. }),
            Category::FunctionExpression => matches!(kind, NodeKind::FunctionExpression(_)),
            Category::Method => matches!(kind, NodeKind::MethodDefinition { .. }),
            Category::Property => matches!(kind, NodeKind::Property { .. }),
            Category::CatchClause => matches!(kind, NodeKind::CatchClause { .. }),
            Category::SwitchCase => matches!(kind, NodeKind::SwitchCase { .. }),
            Category::ClassMetadata => matches!(kind, NodeKind::ClassMetadata { .. }),
            Category::Prototype => matches!(kind, NodeKind::PrototypeReference { .. }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Expression => "an expression",
            Category::Statement => "a statement",
            Category::AssignTarget => "an assignment target",
            Category::Binding => "a binding declaration",
            Category::TemplatePart => "a template part",
            Category::ObjectMember => "an object member",
            Category::ForInit => "a declaration or expression",
            Category::Parameter => "a Parameter",
            Category::RestElement => "a RestElement",
            Category::Block => "a BlockStatement",
            Category::Declarator => "a VariableDeclarator",
            Category::FunctionExpression => "a FunctionExpression",
            Category::Method => "a MethodDefinition",
            Category::Property => "a Property",
            Category::CatchClause => "a CatchClause",
            Category::SwitchCase => "a SwitchCase",
            Category::ClassMetadata => "a ClassMetadata",
            Category::Prototype => "a PrototypeReference",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One id-valued field of a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    /// Field path relative to the node, e.g. `arguments[1].value`
    pub field: String,
    pub target: NodeId,
    pub category: Category,
    /// `false` for cross-links (`binding`, `home`) that are not ownership
    pub structural: bool,
}

#[derive(Default)]
struct Refs(Vec<Reference>);

impl Refs {
    fn push(&mut self, field: String, target: NodeId, category: Category, structural: bool) {
        self.0.push(Reference {
            field,
            target,
            category,
            structural,
        });
    }

    fn one(&mut self, field: &str, target: NodeId, category: Category) -> &mut Self {
        self.push(field.to_string(), target, category, true);
        self
    }

    fn opt(&mut self, field: &str, target: Option<NodeId>, category: Category) -> &mut Self {
        if let Some(target) = target {
            self.one(field, target, category);
        }
        self
    }

    fn many(&mut self, field: &str, targets: &[NodeId], category: Category) -> &mut Self {
        for (i, target) in targets.iter().enumerate() {
            self.push(format!("{field}[{i}]"), *target, category, true);
        }
        self
    }

    fn items(&mut self, field: &str, items: &[ListItem]) -> &mut Self {
        for (i, item) in items.iter().enumerate() {
            self.push(format!("{field}[{i}].value"), item.value, Category::Expression, true);
        }
        self
    }

    fn cross(&mut self, field: &str, target: Option<NodeId>, category: Category) -> &mut Self {
        if let Some(target) = target {
            self.push(field.to_string(), target, category, false);
        }
        self
    }

    fn function(&mut self, func: &FunctionNode) -> &mut Self {
        self.many("params", &func.params, Category::Parameter)
            .opt("rest", func.rest, Category::RestElement)
            .one("body", func.body, Category::Block)
    }

    fn class(&mut self, class: &ClassNode) -> &mut Self {
        self.opt("superClass", class.super_class, Category::Expression)
            .one("constructor", class.constructor, Category::FunctionExpression)
            .many("methods", &class.methods, Category::Method)
            .many("staticProperties", &class.static_properties, Category::Property)
            .one("metadata", class.metadata, Category::ClassMetadata)
            .one("prototype", class.prototype, Category::Prototype)
    }
}

impl NodeKind {
    /// The `kind` tag as written in JSON.
    pub fn name(&self) -> &'static str {
        use NodeKind::*;
        match self {
            NumericLiteral { .. } => "NumericLiteral",
            StringLiteral { .. } => "StringLiteral",
            BooleanLiteral { .. } => "BooleanLiteral",
            NullLiteral => "NullLiteral",
            UndefinedLiteral => "UndefinedLiteral",
            TemplateLiteral { .. } => "TemplateLiteral",
            TemplateElement { .. } => "TemplateElement",
            Identifier { .. } => "Identifier",
            ThisExpression => "ThisExpression",
            Super => "Super",
            BinaryExpression { .. } => "BinaryExpression",
            LogicalExpression { .. } => "LogicalExpression",
            UnaryExpression { .. } => "UnaryExpression",
            UpdateExpression { .. } => "UpdateExpression",
            AssignmentExpression { .. } => "AssignmentExpression",
            ConditionalExpression { .. } => "ConditionalExpression",
            CallExpression { .. } => "CallExpression",
            NewExpression { .. } => "NewExpression",
            MemberExpression { .. } => "MemberExpression",
            ArrayExpression { .. } => "ArrayExpression",
            ObjectExpression { .. } => "ObjectExpression",
            Property { .. } => "Property",
            SpreadElement { .. } => "SpreadElement",
            SequenceExpression { .. } => "SequenceExpression",
            AwaitExpression { .. } => "AwaitExpression",
            FunctionExpression(_) => "FunctionExpression",
            ArrowFunctionExpression(_) => "ArrowFunctionExpression",
            ClassExpression(_) => "ClassExpression",
            FunctionDeclaration(_) => "FunctionDeclaration",
            ClassDeclaration(_) => "ClassDeclaration",
            Parameter { .. } => "Parameter",
            RestElement { .. } => "RestElement",
            VariableDeclaration { .. } => "VariableDeclaration",
            VariableDeclarator { .. } => "VariableDeclarator",
            MethodDefinition { .. } => "MethodDefinition",
            ClassMetadata { .. } => "ClassMetadata",
            PrototypeReference { .. } => "PrototypeReference",
            ExpressionStatement { .. } => "ExpressionStatement",
            BlockStatement { .. } => "BlockStatement",
            EmptyStatement => "EmptyStatement",
            IfStatement { .. } => "IfStatement",
            ForStatement { .. } => "ForStatement",
            ForEachStatement { .. } => "ForEachStatement",
            WhileStatement { .. } => "WhileStatement",
            DoWhileStatement { .. } => "DoWhileStatement",
            BreakStatement => "BreakStatement",
            ContinueStatement => "ContinueStatement",
            ReturnStatement { .. } => "ReturnStatement",
            ThrowStatement { .. } => "ThrowStatement",
            TryStatement { .. } => "TryStatement",
            CatchClause { .. } => "CatchClause",
            SwitchStatement { .. } => "SwitchStatement",
            SwitchCase { .. } => "SwitchCase",
        }
    }

    pub fn is_expression(&self) -> bool {
        use NodeKind::*;
        matches!(
            self,
            NumericLiteral { .. }
                | StringLiteral { .. }
                | BooleanLiteral { .. }
                | NullLiteral
                | UndefinedLiteral
                | TemplateLiteral { .. }
                | Identifier { .. }
                | ThisExpression
                | Super
                | BinaryExpression { .. }
                | LogicalExpression { .. }
                | UnaryExpression { .. }
                | UpdateExpression { .. }
                | AssignmentExpression { .. }
                | ConditionalExpression { .. }
                | CallExpression { .. }
                | NewExpression { .. }
                | MemberExpression { .. }
                | ArrayExpression { .. }
                | ObjectExpression { .. }
                | SequenceExpression { .. }
                | AwaitExpression { .. }
                | FunctionExpression(_)
                | ArrowFunctionExpression(_)
                | ClassExpression(_)
        )
    }

    pub fn is_statement(&self) -> bool {
        use NodeKind::*;
        matches!(
            self,
            ExpressionStatement { .. }
                | VariableDeclaration { .. }
                | FunctionDeclaration(_)
                | ClassDeclaration(_)
                | BlockStatement { .. }
                | EmptyStatement
                | IfStatement { .. }
                | ForStatement { .. }
                | ForEachStatement { .. }
                | WhileStatement { .. }
                | DoWhileStatement { .. }
                | BreakStatement
                | ContinueStatement
                | ReturnStatement { .. }
                | ThrowStatement { .. }
                | TryStatement { .. }
                | SwitchStatement { .. }
        )
    }

    /// Kinds an `Identifier` may resolve to.
    pub fn is_binding(&self) -> bool {
        use NodeKind::*;
        matches!(
            self,
            Parameter { .. }
                | VariableDeclarator { .. }
                | FunctionDeclaration(_)
                | ClassDeclaration(_)
                | FunctionExpression(_)
                | ClassExpression(_)
        )
    }

    pub fn is_literal(&self) -> bool {
        use NodeKind::*;
        matches!(
            self,
            NumericLiteral { .. }
                | StringLiteral { .. }
                | BooleanLiteral { .. }
                | NullLiteral
                | UndefinedLiteral
        )
    }

    /// Statements after which control never reaches the next sibling.
    pub fn is_terminator(&self) -> bool {
        use NodeKind::*;
        matches!(
            self,
            ReturnStatement { .. } | ThrowStatement { .. } | BreakStatement | ContinueStatement
        )
    }

    pub fn as_function(&self) -> Option<&FunctionNode> {
        match self {
            NodeKind::FunctionDeclaration(f)
            | NodeKind::FunctionExpression(f)
            | NodeKind::ArrowFunctionExpression(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_class(&self) -> Option<&ClassNode> {
        match self {
            NodeKind::ClassDeclaration(c) | NodeKind::ClassExpression(c) => Some(c),
            _ => None,
        }
    }

    /// Truthiness of a literal, if it is one.
    pub fn literal_truthiness(&self) -> Option<bool> {
        match self {
            NodeKind::NumericLiteral { value } => Some(*value != 0.0 && !value.is_nan()),
            NodeKind::StringLiteral { value } => Some(!value.is_empty()),
            NodeKind::BooleanLiteral { value } => Some(*value),
            NodeKind::NullLiteral | NodeKind::UndefinedLiteral => Some(false),
            _ => None,
        }
    }

    /// Every id-valued field with the category it must satisfy.
    pub fn references(&self) -> Vec<Reference> {
        use Category as C;
        use NodeKind::*;
        let mut refs = Refs::default();
        match self {
            NumericLiteral { .. }
            | StringLiteral { .. }
            | BooleanLiteral { .. }
            | NullLiteral
            | UndefinedLiteral
            | TemplateElement { .. }
            | ThisExpression
            | Super
            | Parameter { .. }
            | ClassMetadata { .. }
            | PrototypeReference { .. }
            | EmptyStatement
            | BreakStatement
            | ContinueStatement => {}
            TemplateLiteral { parts } => {
                refs.many("parts", parts, C::TemplatePart);
            }
            Identifier { binding, .. } => {
                refs.cross("binding", *binding, C::Binding);
            }
            BinaryExpression { left, right, .. } | LogicalExpression { left, right, .. } => {
                refs.one("left", *left, C::Expression)
                    .one("right", *right, C::Expression);
            }
            UnaryExpression { argument, .. }
            | SpreadElement { argument }
            | AwaitExpression { argument } => {
                refs.one("argument", *argument, C::Expression);
            }
            UpdateExpression { argument, .. } => {
                refs.one("argument", *argument, C::AssignTarget);
            }
            AssignmentExpression { target, value, .. } => {
                refs.one("target", *target, C::AssignTarget)
                    .one("value", *value, C::Expression);
            }
            ConditionalExpression {
                test,
                consequent,
                alternate,
            } => {
                refs.one("test", *test, C::Expression)
                    .one("consequent", *consequent, C::Expression)
                    .one("alternate", *alternate, C::Expression);
            }
            CallExpression {
                callee, arguments, ..
            }
            | NewExpression {
                callee, arguments, ..
            } => {
                refs.one("callee", *callee, C::Expression)
                    .items("arguments", arguments);
            }
            MemberExpression {
                object, property, ..
            } => {
                refs.one("object", *object, C::Expression)
                    .one("property", *property, C::Expression);
            }
            ArrayExpression { elements, .. } => {
                refs.items("elements", elements);
            }
            ObjectExpression { properties } => {
                refs.many("properties", properties, C::ObjectMember);
            }
            Property { key, value, .. } => {
                refs.one("key", *key, C::Expression)
                    .one("value", *value, C::Expression);
            }
            SequenceExpression { expressions } => {
                refs.many("expressions", expressions, C::Expression);
            }
            FunctionExpression(func) | ArrowFunctionExpression(func) | FunctionDeclaration(func) => {
                refs.function(func);
            }
            ClassExpression(class) | ClassDeclaration(class) => {
                refs.class(class);
            }
            RestElement { argument } => {
                refs.one("argument", *argument, C::Parameter);
            }
            VariableDeclaration { declarations, .. } => {
                refs.many("declarations", declarations, C::Declarator);
            }
            VariableDeclarator { init, .. } => {
                refs.opt("init", *init, C::Expression);
            }
            MethodDefinition { value, home, .. } => {
                refs.one("value", *value, C::FunctionExpression)
                    .cross("home", *home, C::Prototype);
            }
            ExpressionStatement { expression } => {
                refs.one("expression", *expression, C::Expression);
            }
            BlockStatement { body } => {
                refs.many("body", body, C::Statement);
            }
            IfStatement {
                test,
                consequent,
                alternate,
            } => {
                refs.one("test", *test, C::Expression)
                    .one("consequent", *consequent, C::Statement)
                    .opt("alternate", *alternate, C::Statement);
            }
            ForStatement {
                init,
                test,
                update,
                body,
            } => {
                refs.opt("init", *init, C::ForInit)
                    .opt("test", *test, C::Expression)
                    .opt("update", *update, C::Expression)
                    .one("body", *body, C::Statement);
            }
            ForEachStatement {
                binding,
                iterable,
                body,
                ..
            } => {
                refs.one("binding", *binding, C::Declarator)
                    .one("iterable", *iterable, C::Expression)
                    .one("body", *body, C::Statement);
            }
            WhileStatement { test, body } | DoWhileStatement { body, test } => {
                refs.one("test", *test, C::Expression)
                    .one("body", *body, C::Statement);
            }
            ReturnStatement { argument } => {
                refs.opt("argument", *argument, C::Expression);
            }
            ThrowStatement { argument } => {
                refs.one("argument", *argument, C::Expression);
            }
            TryStatement {
                block,
                handler,
                finalizer,
            } => {
                refs.one("block", *block, C::Block)
                    .opt("handler", *handler, C::CatchClause)
                    .opt("finalizer", *finalizer, C::Block);
            }
            CatchClause { param, body } => {
                refs.opt("param", *param, C::Parameter)
                    .one("body", *body, C::Block);
            }
            SwitchStatement {
                discriminant,
                cases,
            } => {
                refs.one("discriminant", *discriminant, C::Expression)
                    .many("cases", cases, C::SwitchCase);
            }
            SwitchCase { test, consequent } => {
                refs.opt("test", *test, C::Expression)
                    .many("consequent", consequent, C::Statement);
            }
        }
        refs.0
    }

    /// Owned children in field order (excludes cross-links).
    pub fn children(&self) -> Vec<NodeId> {
        self.references()
            .into_iter()
            .filter(|r| r.structural)
            .map(|r| r.target)
            .collect()
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    #[serde(flatten)]
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<Span>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub ty: Option<TypeDescriptor>,
    /// Introduced by desugaring rather than written in the source
    #[serde(default, skip_serializing_if = "is_false")]
    pub synthetic: bool,
}

impl Node {
    pub fn new(id: NodeId, kind: NodeKind) -> Self {
        Self {
            id,
            kind,
            span: None,
            ty: None,
            synthetic: false,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        self.kind.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_operator_symbols() {
        assert_eq!(BinaryOperator::StrictNotEq.as_str(), "!==");
        assert_eq!(BinaryOperator::parse(">>>"), Some(BinaryOperator::UShr));
        assert_eq!(AssignmentOperator::parse("**="), Some(AssignmentOperator::ExpAssign));
        assert_eq!(AssignmentOperator::AddAssign.binary(), Some(BinaryOperator::Add));
        assert_eq!(AssignmentOperator::OrAssign.logical(), Some(LogicalOperator::Or));
        assert!(UnaryOperator::parse("await").is_none());
    }

    #[test]
    fn test_node_json_shape() {
        let mut node = Node::new(
            NodeId(7),
            NodeKind::BinaryExpression {
                operator: BinaryOperator::Add,
                left: NodeId(5),
                right: NodeId(6),
            },
        );
        node.synthetic = true;

        let value = serde_json::to_value(&node).unwrap();
        assert_eq!(
            value,
            json!({"id": 7, "kind": "BinaryExpression", "operator": "+", "left": 5, "right": 6, "synthetic": true})
        );
        let back: Node = serde_json::from_value(value).unwrap();
        assert_eq!(back, node);
    }

    #[test]
    fn test_camel_case_fields() {
        let node = Node::new(
            NodeId(3),
            NodeKind::CallExpression {
                callee: NodeId(1),
                arguments: vec![ListItem::spread(NodeId(2))],
                has_spread: true,
            },
        );
        let value = serde_json::to_value(&node).unwrap();
        assert_eq!(value["hasSpread"], true);
        assert_eq!(value["arguments"][0], json!({"spread": true, "value": 2}));
    }

    #[test]
    fn test_function_fields_flatten() {
        let node = Node::new(
            NodeId(9),
            NodeKind::FunctionDeclaration(FunctionNode {
                name: Some("add".into()),
                params: vec![NodeId(1), NodeId(2)],
                rest: None,
                body: NodeId(8),
                is_async: false,
            }),
        );
        let value = serde_json::to_value(&node).unwrap();
        assert_eq!(value["kind"], "FunctionDeclaration");
        assert_eq!(value["name"], "add");
        assert_eq!(value["isAsync"], false);
        assert_eq!(value["params"], json!([1, 2]));
    }

    #[test]
    fn test_references_and_children() {
        let kind = NodeKind::MethodDefinition {
            key: "speak".into(),
            value: NodeId(4),
            method_kind: MethodKind::Method,
            is_static: false,
            home: Some(NodeId(2)),
        };
        let refs = kind.references();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[1].field, "home");
        assert!(!refs[1].structural);
        assert_eq!(kind.children(), vec![NodeId(4)]);
    }

    #[test]
    fn test_category_admits() {
        let ident = NodeKind::Identifier {
            name: "x".into(),
            binding: None,
        };
        assert!(Category::Expression.admits(&ident));
        assert!(Category::AssignTarget.admits(&ident));
        assert!(!Category::Statement.admits(&ident));
        assert!(Category::ForInit.admits(&NodeKind::VariableDeclaration {
            declaration_kind: DeclarationKind::Let,
            declarations: vec![],
        }));
    }

    #[test]
    fn test_literal_truthiness() {
        assert_eq!(NodeKind::NumericLiteral { value: 0.0 }.literal_truthiness(), Some(false));
        assert_eq!(
            NodeKind::StringLiteral { value: "a".into() }.literal_truthiness(),
            Some(true)
        );
        assert_eq!(NodeKind::ThisExpression.literal_truthiness(), None);
    }
}
