//! Expression AST
//!
//! The tree produced by the expression parser and walked by the engine's
//! evaluator. Function literals are first-class: they may be bound,
//! passed and applied, but a function value that survives to a state's
//! final output is a runtime serialization failure (the evaluator's
//! concern, not ours).

/// Binary operators, loosest-binding last in the parser.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    /// String concatenation (`&`); both operands are stringified.
    Concat,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

/// One node of a parsed expression.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),

    /// `$` — the current value.
    Input,
    /// `$$` — the context object.
    Context,
    /// `$name` — a bound variable (`$states` included).
    Var(String),

    /// `expr.field` navigation; bare identifiers navigate the current
    /// value, so `foo.bar` parses as `Field(Field(Input, foo), bar)`.
    Field(Box<Expr>, String),
    /// `expr[index]` navigation with a computed index.
    Index(Box<Expr>, Box<Expr>),

    Neg(Box<Expr>),
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Conditional {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },

    /// `function($a, $b) { body }`
    Function {
        params: Vec<String>,
        body: Box<Expr>,
    },
    /// Application: `callee(arg, ...)`.
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
}

impl Expr {
    pub fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Self {
        Self::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }
}
