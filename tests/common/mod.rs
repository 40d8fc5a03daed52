//! Tree-building helpers for driving the engine the way the external
//! parser would.
#![allow(dead_code)]

use nami::ast::*;

pub fn pos() -> Pos {
    Pos::new(1, 1)
}

pub fn e(kind: ExprKind) -> Expr {
    Expr::new(kind, pos())
}

pub fn module(body: Vec<Expr>) -> Expr {
    e(ExprKind::Module(ModuleDecl {
        name: String::new(),
        body,
    }))
}

pub fn submodule(name: &str, body: Vec<Expr>) -> Expr {
    e(ExprKind::Module(ModuleDecl {
        name: name.to_string(),
        body,
    }))
}

pub fn int(n: i64) -> Expr {
    e(ExprKind::Literal {
        literal: Literal::Number(n.to_string()),
        constant: None,
    })
}

pub fn float(f: f64) -> Expr {
    e(ExprKind::Literal {
        literal: Literal::Number(format!("{:?}", f)),
        constant: None,
    })
}

pub fn string(s: &str) -> Expr {
    e(ExprKind::Literal {
        literal: Literal::String(s.to_string()),
        constant: None,
    })
}

pub fn bareword(s: &str) -> Expr {
    e(ExprKind::Literal {
        literal: Literal::Bareword(s.to_string()),
        constant: None,
    })
}

pub fn boolean(b: bool) -> Expr {
    e(ExprKind::Literal {
        literal: Literal::Bool(b),
        constant: None,
    })
}

pub fn nil() -> Expr {
    e(ExprKind::Literal {
        literal: Literal::Nil,
        constant: None,
    })
}

pub fn var(name: &str) -> Expr {
    e(ExprKind::Variable {
        name: name.to_string(),
        symbol: None,
    })
}

pub fn let_(name: &str, value: Expr) -> Expr {
    e(ExprKind::Let {
        names: vec![name.to_string()],
        symbols: Vec::new(),
        value: Box::new(value),
    })
}

pub fn let_many(names: &[&str], value: Expr) -> Expr {
    e(ExprKind::Let {
        names: names.iter().map(|n| n.to_string()).collect(),
        symbols: Vec::new(),
        value: Box::new(value),
    })
}

pub fn assign(name: &str, value: Expr) -> Expr {
    binary(BinaryOp::Assign, var(name), value)
}

pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    e(ExprKind::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    })
}

pub fn unary(op: UnaryOp, operand: Expr) -> Expr {
    e(ExprKind::Unary {
        op,
        operand: Box::new(operand),
    })
}

pub fn pipe(producer: Expr, consumer: Expr) -> Expr {
    binary(BinaryOp::Pipe, producer, consumer)
}

pub fn call(name: &str, args: Vec<Expr>) -> Expr {
    e(ExprKind::Call(Box::new(CallExpr::new(
        Vec::new(),
        name,
        args,
    ))))
}

pub fn call_in(path: &[&str], name: &str, args: Vec<Expr>) -> Expr {
    e(ExprKind::Call(Box::new(CallExpr::new(
        path.iter().map(|p| p.to_string()).collect(),
        name,
        args,
    ))))
}

pub fn call_with_closure(
    name: &str,
    args: Vec<Expr>,
    params: &[&str],
    body: Vec<Expr>,
) -> Expr {
    let mut inner = CallExpr::new(Vec::new(), name, args);
    inner.closure = Some(closure(params, body));
    e(ExprKind::Call(Box::new(inner)))
}

pub fn closure(params: &[&str], body: Vec<Expr>) -> Expr {
    e(ExprKind::Closure(Box::new(ClosureExpr {
        params: params.iter().map(|p| p.to_string()).collect(),
        body,
        symbol: None,
    })))
}

pub fn function(name: &str, params: Vec<Param>, body: Vec<Expr>) -> Expr {
    e(ExprKind::Function(Box::new(FunctionDecl {
        name: name.to_string(),
        params,
        has_closure_param: false,
        body,
        symbol: None,
    })))
}

pub fn function_with_closure(name: &str, params: Vec<Param>, body: Vec<Expr>) -> Expr {
    e(ExprKind::Function(Box::new(FunctionDecl {
        name: name.to_string(),
        params,
        has_closure_param: true,
        body,
        symbol: None,
    })))
}

pub fn struct_(name: &str, params: Vec<Param>) -> Expr {
    e(ExprKind::Struct(StructDecl {
        name: name.to_string(),
        params,
        symbol: None,
    }))
}

pub fn new_(path: &[&str], args: Vec<Expr>) -> Expr {
    e(ExprKind::New(Box::new(NewExpr {
        path: path.iter().map(|p| p.to_string()).collect(),
        args,
        target: None,
    })))
}

pub fn list(items: Vec<Expr>) -> Expr {
    e(ExprKind::List(items))
}

pub fn tuple(items: Vec<Expr>) -> Expr {
    e(ExprKind::Tuple(items))
}

pub fn dict(entries: Vec<(Expr, Expr)>) -> Expr {
    e(ExprKind::Dictionary(
        entries.into_iter().map(|(k, v)| (k, Some(v))).collect(),
    ))
}

pub fn set_lit(keys: Vec<Expr>) -> Expr {
    e(ExprKind::Dictionary(
        keys.into_iter().map(|k| (k, None)).collect(),
    ))
}

pub fn index(target: Expr, idx: Expr) -> Expr {
    e(ExprKind::Indexer {
        target: Box::new(target),
        index: Box::new(idx),
    })
}

pub fn field(object: Expr, name: &str) -> Expr {
    e(ExprKind::FieldAccess {
        object: Box::new(object),
        field: name.to_string(),
    })
}

pub fn range(from: Expr, to: Expr, inclusive: bool) -> Expr {
    e(ExprKind::Range {
        from: Some(Box::new(from)),
        to: Some(Box::new(to)),
        inclusive,
    })
}

pub fn if_(cond: Expr, then_branch: Expr, else_branch: Option<Expr>) -> Expr {
    e(ExprKind::If {
        cond: Box::new(cond),
        then_branch: Box::new(then_branch),
        else_branch: else_branch.map(Box::new),
    })
}

pub fn while_(cond: Expr, body: Expr) -> Expr {
    e(ExprKind::While {
        cond: Box::new(cond),
        body: Box::new(body),
    })
}

pub fn for_(names: &[&str], iterable: Expr, body: Expr) -> Expr {
    e(ExprKind::For {
        names: names.iter().map(|n| n.to_string()).collect(),
        symbols: Vec::new(),
        iterable: Box::new(iterable),
        body: Box::new(body),
    })
}

pub fn block(body: Vec<Expr>) -> Expr {
    e(ExprKind::Block(body))
}

pub fn ret(value: Option<Expr>) -> Expr {
    e(ExprKind::Keyword {
        keyword: Keyword::Return,
        value: value.map(Box::new),
    })
}

pub fn brk() -> Expr {
    e(ExprKind::Keyword {
        keyword: Keyword::Break,
        value: None,
    })
}

pub fn fref(name: &str) -> Expr {
    e(ExprKind::FunctionReference {
        path: Vec::new(),
        name: name.to_string(),
        target: None,
    })
}

pub fn interp(parts: Vec<InterpolationPart>) -> Expr {
    e(ExprKind::StringInterpolation(parts))
}

pub fn text_part(s: &str) -> InterpolationPart {
    InterpolationPart::Text(s.to_string())
}

pub fn expr_part(expr: Expr) -> InterpolationPart {
    InterpolationPart::Expr(expr)
}
