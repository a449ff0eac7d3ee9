mod diff;
mod eval;
mod parser;

pub use diff::ExprMatrix;
pub use eval::{CompiledExpr, Env};

use std::{
    collections::BTreeSet,
    fmt::Display,
    ops::{Add, Div, Mul, Neg, Sub},
};

/// Resolved reference of a symbol into the positional layout of a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Symbol {
    /// Index into the ordered parameter set.
    Parameter(usize),
    /// Index into the ordered state vector.
    State(usize),
    /// Index into the algebraic variables.
    Algebraic(usize),
    /// Index into the independent variables.
    Independent(usize),
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// `a + b`
    Add,
    /// `a - b`
    Sub,
    /// `a * b`
    Mul,
    /// `a / b`
    Div,
    /// `a ** b` or `a ^ b`
    Pow,
}

/// Elementary functions callable in equations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    /// Natural exponential.
    Exp,
    /// Natural logarithm, spelled `ln` or `log`.
    Ln,
    /// Decimal logarithm.
    Log10,
    /// Square root.
    Sqrt,
    /// Sine.
    Sin,
    /// Cosine.
    Cos,
    /// Tangent.
    Tan,
    /// Hyperbolic sine.
    Sinh,
    /// Hyperbolic cosine.
    Cosh,
    /// Hyperbolic tangent.
    Tanh,
    /// Absolute value.
    Abs,
}

impl Function {
    fn from_name(name: &str) -> Option<Self> {
        let func = match name {
            "exp" => Self::Exp,
            "ln" | "log" => Self::Ln,
            "log10" => Self::Log10,
            "sqrt" => Self::Sqrt,
            "sin" => Self::Sin,
            "cos" => Self::Cos,
            "tan" => Self::Tan,
            "sinh" => Self::Sinh,
            "cosh" => Self::Cosh,
            "tanh" => Self::Tanh,
            "abs" => Self::Abs,
            _ => return None,
        };
        Some(func)
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Exp => "exp",
            Self::Ln => "ln",
            Self::Log10 => "log10",
            Self::Sqrt => "sqrt",
            Self::Sin => "sin",
            Self::Cos => "cos",
            Self::Tan => "tan",
            Self::Sinh => "sinh",
            Self::Cosh => "cosh",
            Self::Tanh => "tanh",
            Self::Abs => "abs",
        }
    }
}

/// Expression tree of a model equation.
///
/// Parsed equations hold [Expr::Named] leaves which are bound to positional [Symbol]s by the
/// model before differentiation or evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Numeric literal.
    Const(f64),
    /// Unbound identifier as written in the equation.
    Named(String),
    /// Bound model symbol.
    Sym(Symbol),
    /// Unary minus.
    Neg(Box<Expr>),
    /// Binary operation.
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    /// Elementary function call.
    Call(Function, Box<Expr>),
}

impl Expr {
    /// Parses an equation right-hand side, e.g. `mu_max*S/(K_S + S)*X`.
    pub fn parse(source: &str) -> crate::Result<Self> {
        parser::Parser::new(source).parse()
    }

    /// Returns `true` for a literal equal to `value`.
    pub fn is_const(&self, value: f64) -> bool {
        matches!(self, Self::Const(c) if *c == value)
    }

    /// Returns the unbound identifiers used in the expression.
    pub fn names(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        self.visit(&mut |e| {
            if let Self::Named(n) = e {
                names.insert(n.clone());
            }
        });
        names
    }

    /// Returns the bound symbols used in the expression.
    pub fn symbols(&self) -> BTreeSet<Symbol> {
        let mut symbols = BTreeSet::new();
        self.visit(&mut |e| {
            if let Self::Sym(s) = e {
                symbols.insert(*s);
            }
        });
        symbols
    }

    /// Returns `true` if an algebraic variable is still referenced.
    pub fn contains_algebraic(&self) -> bool {
        self.symbols()
            .iter()
            .any(|s| matches!(s, Symbol::Algebraic(_)))
    }

    fn visit(&self, f: &mut impl FnMut(&Expr)) {
        f(self);
        match self {
            Self::Const(_) | Self::Named(_) | Self::Sym(_) => {}
            Self::Neg(a) | Self::Call(_, a) => a.visit(f),
            Self::Binary(_, a, b) => {
                a.visit(f);
                b.visit(f);
            }
        }
    }

    /// Replaces every named leaf with the symbol returned by `resolver`; names the resolver does
    /// not know stay unbound.
    pub fn bind(&self, resolver: &impl Fn(&str) -> Option<Symbol>) -> Expr {
        self.map_leaves(&|e| match e {
            Self::Named(n) => resolver(n).map(Self::Sym),
            _ => None,
        })
    }

    /// Inlines the definitions of algebraic variables once.
    pub fn substitute(&self, algebraic: &[Expr]) -> Expr {
        self.map_leaves(&|e| match e {
            Self::Sym(Symbol::Algebraic(i)) => algebraic.get(*i).cloned(),
            _ => None,
        })
    }

    fn map_leaves(&self, f: &impl Fn(&Expr) -> Option<Expr>) -> Expr {
        match self {
            Self::Const(_) | Self::Named(_) | Self::Sym(_) => f(self).unwrap_or_else(|| self.clone()),
            Self::Neg(a) => -a.map_leaves(f),
            Self::Binary(op, a, b) => Self::binary(*op, a.map_leaves(f), b.map_leaves(f)),
            Self::Call(func, a) => Self::call(*func, a.map_leaves(f)),
        }
    }

    /// Builds a binary node with constant folding.
    pub fn binary(op: BinaryOp, a: Expr, b: Expr) -> Expr {
        match op {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => a / b,
            BinaryOp::Pow => a.pow(b),
        }
    }

    /// Builds `self ** exponent`.
    pub fn pow(self, exponent: Expr) -> Expr {
        match (&self, &exponent) {
            (Self::Const(a), Self::Const(b)) => Self::Const(a.powf(*b)),
            (_, e) if e.is_const(0.) => Self::Const(1.),
            (_, e) if e.is_const(1.) => self,
            (a, _) if a.is_const(1.) => Self::Const(1.),
            _ => Self::Binary(BinaryOp::Pow, Box::new(self), Box::new(exponent)),
        }
    }

    /// Builds a function call, folding constant arguments.
    pub fn call(func: Function, arg: Expr) -> Expr {
        if let Self::Const(c) = arg {
            let v = func.apply(c);
            if v.is_finite() {
                return Self::Const(v);
            }
        }
        Self::Call(func, Box::new(arg))
    }
}

impl Add for Expr {
    type Output = Expr;
    fn add(self, rhs: Expr) -> Expr {
        match (&self, &rhs) {
            (Self::Const(a), Self::Const(b)) => Self::Const(a + b),
            (a, _) if a.is_const(0.) => rhs,
            (_, b) if b.is_const(0.) => self,
            (_, Self::Neg(b)) => self - (**b).clone(),
            _ => Self::Binary(BinaryOp::Add, Box::new(self), Box::new(rhs)),
        }
    }
}

impl Sub for Expr {
    type Output = Expr;
    fn sub(self, rhs: Expr) -> Expr {
        match (&self, &rhs) {
            (Self::Const(a), Self::Const(b)) => Self::Const(a - b),
            (_, b) if b.is_const(0.) => self,
            (a, _) if a.is_const(0.) => -rhs,
            (a, b) if a == b => Self::Const(0.),
            _ => Self::Binary(BinaryOp::Sub, Box::new(self), Box::new(rhs)),
        }
    }
}

impl Mul for Expr {
    type Output = Expr;
    fn mul(self, rhs: Expr) -> Expr {
        match (&self, &rhs) {
            (Self::Const(a), Self::Const(b)) => Self::Const(a * b),
            (a, b) if a.is_const(0.) || b.is_const(0.) => Self::Const(0.),
            (a, _) if a.is_const(1.) => rhs,
            (_, b) if b.is_const(1.) => self,
            (a, _) if a.is_const(-1.) => -rhs,
            (_, b) if b.is_const(-1.) => -self,
            _ => Self::Binary(BinaryOp::Mul, Box::new(self), Box::new(rhs)),
        }
    }
}

impl Div for Expr {
    type Output = Expr;
    fn div(self, rhs: Expr) -> Expr {
        match (&self, &rhs) {
            (Self::Const(a), Self::Const(b)) if *b != 0. => Self::Const(a / b),
            (a, b) if a.is_const(0.) && !b.is_const(0.) => Self::Const(0.),
            (_, b) if b.is_const(1.) => self,
            _ => Self::Binary(BinaryOp::Div, Box::new(self), Box::new(rhs)),
        }
    }
}

impl Neg for Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        match self {
            Self::Const(c) => Self::Const(-c),
            Self::Neg(a) => *a,
            _ => Self::Neg(Box::new(self)),
        }
    }
}

impl Display for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Const(c) => write!(f, "{c}"),
            Self::Named(n) => write!(f, "{n}"),
            Self::Sym(Symbol::Parameter(i)) => write!(f, "p[{i}]"),
            Self::Sym(Symbol::State(i)) => write!(f, "x[{i}]"),
            Self::Sym(Symbol::Algebraic(i)) => write!(f, "y[{i}]"),
            Self::Sym(Symbol::Independent(i)) => write!(f, "t[{i}]"),
            Self::Neg(a) => write!(f, "-({a})"),
            Self::Binary(op, a, b) => {
                let op = match op {
                    BinaryOp::Add => "+",
                    BinaryOp::Sub => "-",
                    BinaryOp::Mul => "*",
                    BinaryOp::Div => "/",
                    BinaryOp::Pow => "**",
                };
                write!(f, "({a} {op} {b})")
            }
            Self::Call(func, a) => write!(f, "{}({a})", func.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Result;

    fn resolver(name: &str) -> Option<Symbol> {
        match name {
            "k" => Some(Symbol::Parameter(0)),
            "X" => Some(Symbol::State(0)),
            "Y" => Some(Symbol::Algebraic(0)),
            "t" => Some(Symbol::Independent(0)),
            _ => None,
        }
    }

    #[test]
    fn names_and_bind() -> Result<()> {
        let expr = Expr::parse("k*X + exp(-t)/Z")?;
        let names: Vec<String> = expr.names().into_iter().collect();
        assert_eq!(names, vec!["X", "Z", "k", "t"]);

        let bound = expr.bind(&resolver);
        let names: Vec<String> = bound.names().into_iter().collect();
        assert_eq!(names, vec!["Z"]);
        assert!(bound.symbols().contains(&Symbol::State(0)));
        Ok(())
    }

    #[test]
    fn substitute_algebraic() -> Result<()> {
        let expr = Expr::parse("k*Y")?.bind(&resolver);
        assert!(expr.contains_algebraic());
        let definition = Expr::parse("2*X")?.bind(&resolver);
        let resolved = expr.substitute(&[definition]);
        assert!(!resolved.contains_algebraic());
        assert_eq!(format!("{resolved}"), "(p[0] * (2 * x[0]))");
        Ok(())
    }

    #[test]
    fn constant_folding() -> Result<()> {
        let expr = Expr::parse("0*X + 1*k - (2 + 3)")?;
        assert_eq!(format!("{expr}"), "(k - 5)");
        let expr = Expr::parse("exp(0) * X ** 1")?;
        assert_eq!(expr, Expr::Named("X".to_string()));
        Ok(())
    }
}
