use super::*;
use crate::node::{BinaryOperator, IterationKind, MethodKind, Node, UnaryOperator};
use crate::validate::validate;
use luascript_ast::build::*;
use luascript_ast::{
    Expr, ObjectPattern, ObjectPatternMember, Opaque, Pattern, PatternProperty, Pos, RestElement, Stmt, VarKind,
};

fn lowered(body: Vec<Stmt>) -> Module {
    let module = lower(&program(body)).expect("program should lower");
    let report = validate(&module);
    assert!(report.ok, "lowered module failed validation: {:?}", report.errors);
    module
}

fn kind(module: &Module, id: NodeId) -> &NodeKind {
    &module.node(id).expect("node exists").kind
}

fn find<'a>(module: &'a Module, name: &str) -> Vec<&'a Node> {
    module.nodes().filter(|node| node.kind.name() == name).collect()
}

fn declarator_named(module: &Module, wanted: &str) -> Option<NodeId> {
    module.nodes().find_map(|node| match &node.kind {
        NodeKind::VariableDeclarator { name, .. } if name == wanted => Some(node.id),
        _ => None,
    })
}

#[test]
fn test_lower_add_function() {
    let module = lowered(vec![func(
        "add",
        vec![pid("a"), pid("b")],
        vec![ret(Some(bin("+", ident("a"), ident("b"))))],
    )]);

    assert_eq!(module.body().len(), 1);
    let NodeKind::FunctionDeclaration(func) = kind(&module, module.body()[0]) else {
        panic!("expected a function declaration");
    };
    assert_eq!(func.name.as_deref(), Some("add"));
    assert_eq!(func.params.len(), 2);

    let NodeKind::BlockStatement { body } = kind(&module, func.body) else {
        panic!("expected a block body");
    };
    let NodeKind::ReturnStatement { argument: Some(sum) } = kind(&module, body[0]) else {
        panic!("expected a return");
    };
    let NodeKind::BinaryExpression { operator, left, .. } = kind(&module, *sum) else {
        panic!("expected a binary expression");
    };
    assert_eq!(*operator, BinaryOperator::Add);
    match kind(&module, *left) {
        NodeKind::Identifier { name, binding } => {
            assert_eq!(name, "a");
            assert_eq!(*binding, Some(func.params[0]));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(module.cfg(module.body()[0]).is_some());
}

#[test]
fn test_lowering_is_deterministic() {
    let source = || {
        program(vec![
            class(
                "Point",
                None,
                vec![field("x", Some(num(0.0))), method("get", vec![], vec![ret(Some(member(this(), "x")))])],
            ),
            decl(
                VarKind::Const,
                obj_pat(vec![("a", pid("a")), ("b", pid("c"))], Some("rest")),
                Some(ident("source")),
            ),
            for_of(VarKind::Const, arr_pat(vec![Some(pid("k")), Some(pid("v"))], None), ident("pairs"), vec![]),
        ])
    };
    let first = lower(&source()).expect("lowers").to_json().expect("serializes");
    let second = lower(&source()).expect("lowers").to_json().expect("serializes");
    assert_eq!(first, second);
}

#[test]
fn test_var_is_hoisted_to_the_top() {
    let module = lowered(vec![
        expr_stmt(call(ident("log"), vec![ident("x")])),
        var_("x", Some(num(1.0))),
    ]);

    assert_eq!(module.body().len(), 3);
    let NodeKind::VariableDeclaration {
        declaration_kind,
        declarations,
    } = kind(&module, module.body()[0])
    else {
        panic!("expected the hoisted declaration first");
    };
    assert_eq!(*declaration_kind, DeclarationKind::Var);
    assert!(module.node(module.body()[0]).is_some_and(|n| n.synthetic));

    let x = declarations[0];
    let uses: Vec<_> = module
        .nodes()
        .filter_map(|node| match &node.kind {
            NodeKind::Identifier { name, binding } if name == "x" => Some(*binding),
            _ => None,
        })
        .collect();
    assert_eq!(uses.len(), 2);
    assert!(uses.iter().all(|binding| *binding == Some(x)));
}

#[test]
fn test_function_declarations_are_visible_before_their_statement() {
    let module = lowered(vec![expr_stmt(call(ident("g"), vec![])), func("g", vec![], vec![])]);
    let g = module.body()[1];
    let callee = module.nodes().find_map(|node| match &node.kind {
        NodeKind::Identifier { name, binding } if name == "g" => Some(*binding),
        _ => None,
    });
    assert_eq!(callee, Some(Some(g)));
}

#[test]
fn test_unbound_names_are_globals() {
    let module = lowered(vec![expr_stmt(call(member(ident("console"), "log"), vec![str_lit("hi")]))]);
    let console = module.nodes().find_map(|node| match &node.kind {
        NodeKind::Identifier { name, binding } if name == "console" => Some(*binding),
        _ => None,
    });
    assert_eq!(console, Some(None));
}

#[test]
fn test_undefined_becomes_a_literal() {
    let module = lowered(vec![let_("x", ident("undefined"))]);
    assert_eq!(find(&module, "UndefinedLiteral").len(), 1);
    assert!(find(&module, "Identifier").is_empty());
}

#[test]
fn test_object_destructuring_declares_each_name() {
    let module = lowered(vec![decl(
        VarKind::Const,
        obj_pat(vec![("a", pid("a")), ("b", pid("c"))], None),
        Some(ident("source")),
    )]);
    assert!(declarator_named(&module, "a").is_some());
    assert!(declarator_named(&module, "c").is_some());
    assert!(declarator_named(&module, "b").is_none());
}

#[test]
fn test_object_rest_drops_computed_keys() {
    // const {[k]: v, ...rest} = o
    let pattern = Pattern::ObjectPattern(ObjectPattern {
        properties: vec![
            ObjectPatternMember::Property(PatternProperty {
                key: ident("k"),
                value: pid("v"),
                computed: true,
                shorthand: false,
                pos: Pos::default(),
            }),
            ObjectPatternMember::RestElement(RestElement {
                argument: Box::new(pid("rest")),
                pos: Pos::default(),
            }),
        ],
        pos: Pos::default(),
    });
    let module = lowered(vec![
        const_("k", str_lit("a")),
        decl(VarKind::Const, pattern, Some(ident("o"))),
    ]);

    let deletes: Vec<&Node> = module
        .nodes()
        .filter(|node| {
            matches!(
                node.kind,
                NodeKind::UnaryExpression {
                    operator: UnaryOperator::Delete,
                    ..
                }
            )
        })
        .collect();
    assert_eq!(deletes.len(), 1);
    let NodeKind::UnaryExpression { argument, .. } = &deletes[0].kind else {
        panic!("expected a delete");
    };
    let NodeKind::MemberExpression { property, computed, .. } = kind(&module, *argument) else {
        panic!("expected a member access");
    };
    assert!(*computed);
    let NodeKind::Identifier {
        binding: Some(held), ..
    } = kind(&module, *property)
    else {
        panic!("expected the evaluated key");
    };
    let NodeKind::VariableDeclarator { init: Some(init), .. } = kind(&module, *held) else {
        panic!("expected a key temporary");
    };
    assert!(matches!(kind(&module, *init), NodeKind::Identifier { name, .. } if name == "k"));

    // the key expression itself is evaluated once
    let key_reads = module
        .nodes()
        .filter(|node| matches!(&node.kind, NodeKind::Identifier { name, .. } if name == "k"))
        .count();
    assert_eq!(key_reads, 1);
}

#[test]
fn test_array_rest_uses_slice() {
    let module = lowered(vec![decl(
        VarKind::Let,
        arr_pat(vec![Some(pid("head"))], Some(pid("tail"))),
        Some(ident("list")),
    )]);
    assert!(declarator_named(&module, "tail").is_some());
    let slices = module
        .nodes()
        .filter(|node| matches!(&node.kind, NodeKind::StringLiteral { value } if value == "slice"))
        .count();
    assert_eq!(slices, 1);
}

#[test]
fn test_for_of_with_pattern_binds_item() {
    let module = lowered(vec![for_of(
        VarKind::Const,
        arr_pat(vec![Some(pid("k")), Some(pid("v"))], None),
        ident("pairs"),
        vec![expr_stmt(call(ident("use"), vec![ident("k"), ident("v")]))],
    )]);
    let loops = find(&module, "ForEachStatement");
    assert_eq!(loops.len(), 1);
    let NodeKind::ForEachStatement { iterate, .. } = &loops[0].kind else {
        panic!("expected a for-each");
    };
    assert_eq!(*iterate, IterationKind::Values);
    assert!(declarator_named(&module, "k").is_some());
    assert!(declarator_named(&module, "v").is_some());
}

#[test]
fn test_default_parameter_becomes_prologue_check() {
    let module = lowered(vec![func(
        "f",
        vec![default_pat(pid("a"), num(1.0))],
        vec![ret(Some(ident("a")))],
    )]);
    let NodeKind::FunctionDeclaration(func) = kind(&module, module.body()[0]) else {
        panic!("expected a function");
    };
    let NodeKind::BlockStatement { body } = kind(&module, func.body) else {
        panic!("expected a block");
    };
    assert_eq!(kind(&module, body[0]).name(), "IfStatement");
    assert!(module.node(body[0]).is_some_and(|n| n.synthetic));
}

#[test]
fn test_class_members() {
    let module = lowered(vec![class(
        "Point",
        None,
        vec![
            field("x", Some(num(0.0))),
            constructor(vec![], vec![]),
            method("getX", vec![], vec![ret(Some(member(this(), "x")))]),
            getter("size", vec![ret(Some(num(1.0)))]),
            static_method("origin", vec![], vec![]),
            static_field("count", None),
        ],
    )]);

    let NodeKind::ClassDeclaration(class) = kind(&module, module.body()[0]) else {
        panic!("expected a class");
    };
    assert_eq!(class.name, "Point");
    assert_eq!(class.methods.len(), 3);
    assert_eq!(class.static_properties.len(), 1);

    match kind(&module, class.metadata) {
        NodeKind::ClassMetadata {
            derived,
            instance_methods,
            static_methods,
            instance_fields,
            static_fields,
            ..
        } => {
            assert!(!derived);
            assert_eq!(instance_methods, &["getX", "size"]);
            assert_eq!(static_methods, &["origin"]);
            assert_eq!(instance_fields, &["x"]);
            assert_eq!(static_fields, &["count"]);
        }
        other => panic!("unexpected {other:?}"),
    }

    for method in &class.methods {
        let NodeKind::MethodDefinition {
            key,
            method_kind,
            is_static,
            home,
            ..
        } = kind(&module, *method)
        else {
            panic!("expected a method");
        };
        if *is_static {
            assert_eq!(*home, None);
        } else {
            assert_eq!(*home, Some(class.prototype));
        }
        if key == "size" {
            assert_eq!(*method_kind, MethodKind::Get);
        }
    }

    // the field initialiser lands in the constructor
    let NodeKind::FunctionExpression(ctor) = kind(&module, class.constructor) else {
        panic!("expected a constructor");
    };
    let NodeKind::BlockStatement { body } = kind(&module, ctor.body) else {
        panic!("expected a block");
    };
    assert_eq!(body.len(), 1);
}

#[test]
fn test_derived_class_gets_forwarding_constructor() {
    let module = lowered(vec![class("Child", Some(ident("Base")), vec![field("y", None)])]);
    let NodeKind::ClassDeclaration(class) = kind(&module, module.body()[0]) else {
        panic!("expected a class");
    };
    let NodeKind::FunctionExpression(ctor) = kind(&module, class.constructor) else {
        panic!("expected a constructor");
    };
    assert!(ctor.rest.is_some());
    assert!(module.node(class.constructor).is_some_and(|n| n.synthetic));

    let NodeKind::BlockStatement { body } = kind(&module, ctor.body) else {
        panic!("expected a block");
    };
    assert_eq!(body.len(), 2);
    let NodeKind::ExpressionStatement { expression } = kind(&module, body[0]) else {
        panic!("expected the super call first");
    };
    let NodeKind::CallExpression { callee, has_spread, .. } = kind(&module, *expression) else {
        panic!("expected a call");
    };
    assert!(has_spread);
    assert_eq!(kind(&module, *callee).name(), "Super");

    match kind(&module, class.metadata) {
        NodeKind::ClassMetadata { super_class, derived, .. } => {
            assert_eq!(super_class.as_deref(), Some("Base"));
            assert!(derived);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_anonymous_class_takes_declarator_name() {
    let module = lowered(vec![const_("Shape", class_expr(None, None, vec![]))]);
    let classes = find(&module, "ClassExpression");
    let NodeKind::ClassExpression(class) = &classes[0].kind else {
        panic!("expected a class expression");
    };
    assert_eq!(class.name, "Shape");
}

#[test]
fn test_unknown_expression_is_unhandled() {
    let program = program(vec![expr_stmt(Expr::YieldExpression(Opaque::default()))]);
    match lower(&program) {
        Err(LoweringError::Unhandled { kind, .. }) => assert_eq!(kind, "YieldExpression"),
        other => panic!("expected an unhandled error, got {other:?}"),
    }
}

#[test]
fn test_const_reassignment_is_rejected() {
    let program = program(vec![const_("x", num(1.0)), expr_stmt(assign("=", pid("x"), num(2.0)))]);
    assert!(matches!(lower(&program), Err(LoweringError::Malformed { .. })));
}

#[test]
fn test_return_outside_function_is_rejected() {
    let program = program(vec![ret(None)]);
    match lower(&program) {
        Err(LoweringError::Malformed { kind, .. }) => assert_eq!(kind, "ReturnStatement"),
        other => panic!("expected a malformed error, got {other:?}"),
    }
}

#[test]
fn test_await_requires_async_function() {
    let sync = program(vec![func("f", vec![], vec![expr_stmt(await_expr(ident("p")))])]);
    assert!(matches!(lower(&sync), Err(LoweringError::Malformed { .. })));

    let module = lowered(vec![async_func("f", vec![], vec![expr_stmt(await_expr(ident("p")))])]);
    assert_eq!(find(&module, "AwaitExpression").len(), 1);
}

#[test]
fn test_source_and_directives_are_recorded() {
    let options = LowerOptions {
        source_name: Some("main.js".into()),
        ..LowerOptions::default()
    };
    let module = lower_with(&program(vec![directive("use strict")]), &options).expect("lowers");
    assert_eq!(module.metadata().source.as_deref(), Some("main.js"));
    assert_eq!(module.metadata().directives, vec!["use strict".to_string()]);
    assert!(module.body().is_empty());
}
