use super::{BinaryOp, Expr, Function, Symbol};

impl Expr {
    /// Symbolic derivative with respect to `symbol`.
    ///
    /// Unbound names are treated as constants. The result is simplified by the constant folding
    /// of the [Expr] constructors only, no algebraic normalization takes place.
    pub fn diff(&self, symbol: Symbol) -> Expr {
        match self {
            Self::Const(_) | Self::Named(_) => Self::Const(0.),
            Self::Sym(s) => Self::Const(if *s == symbol { 1. } else { 0. }),
            Self::Neg(a) => -a.diff(symbol),
            Self::Binary(op, a, b) => {
                let (a, b) = (a.as_ref(), b.as_ref());
                let da = a.diff(symbol);
                match op {
                    BinaryOp::Add => da + b.diff(symbol),
                    BinaryOp::Sub => da - b.diff(symbol),
                    BinaryOp::Mul => da * b.clone() + a.clone() * b.diff(symbol),
                    BinaryOp::Div => {
                        let db = b.diff(symbol);
                        if db.is_const(0.) {
                            da / b.clone()
                        } else {
                            (da * b.clone() - a.clone() * db) / b.clone().pow(Self::Const(2.))
                        }
                    }
                    BinaryOp::Pow => match b {
                        Self::Const(c) => {
                            Self::Const(*c) * a.clone().pow(Self::Const(c - 1.)) * da
                        }
                        _ => {
                            // d(a^b) = a^b * (b' ln a + b a' / a)
                            let db = b.diff(symbol);
                            let ln_part = if db.is_const(0.) {
                                Self::Const(0.)
                            } else {
                                db * Self::call(Function::Ln, a.clone())
                            };
                            let base_part = if da.is_const(0.) {
                                Self::Const(0.)
                            } else {
                                b.clone() * da / a.clone()
                            };
                            self.clone() * (ln_part + base_part)
                        }
                    },
                }
            }
            Self::Call(func, a) => {
                let da = a.diff(symbol);
                if da.is_const(0.) {
                    return Self::Const(0.);
                }
                let a = a.as_ref().clone();
                let outer = match func {
                    Function::Exp => Self::call(Function::Exp, a),
                    Function::Ln => Self::Const(1.) / a,
                    Function::Log10 => Self::Const(1.) / (a * Self::Const(std::f64::consts::LN_10)),
                    Function::Sqrt => Self::Const(0.5) / Self::call(Function::Sqrt, a),
                    Function::Sin => Self::call(Function::Cos, a),
                    Function::Cos => -Self::call(Function::Sin, a),
                    Function::Tan => {
                        Self::Const(1.) / Self::call(Function::Cos, a).pow(Self::Const(2.))
                    }
                    Function::Sinh => Self::call(Function::Cosh, a),
                    Function::Cosh => Self::call(Function::Sinh, a),
                    Function::Tanh => {
                        Self::Const(1.) - Self::call(Function::Tanh, a).pow(Self::Const(2.))
                    }
                    Function::Abs => a.clone() / Self::call(Function::Abs, a),
                };
                outer * da
            }
        }
    }
}

/// Dense matrix of expressions, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct ExprMatrix {
    nrows: usize,
    ncols: usize,
    data: Vec<Expr>,
}

impl ExprMatrix {
    /// Jacobian of `functions` with respect to `symbols`.
    pub fn jacobian(functions: &[Expr], symbols: &[Symbol]) -> Self {
        let data = functions
            .iter()
            .flat_map(|f| symbols.iter().map(move |s| f.diff(*s)))
            .collect();
        Self {
            nrows: functions.len(),
            ncols: symbols.len(),
            data,
        }
    }

    /// Number of rows.
    pub fn nrows(&self) -> usize {
        self.nrows
    }

    /// Number of columns.
    pub fn ncols(&self) -> usize {
        self.ncols
    }

    /// Entry at (row, col).
    pub fn get(&self, row: usize, col: usize) -> &Expr {
        &self.data[row * self.ncols + col]
    }

    /// Iterates over the entries which are not the literal zero.
    pub fn non_zero(&self) -> impl Iterator<Item = (usize, usize, &Expr)> {
        self.data
            .iter()
            .enumerate()
            .filter(|(_, e)| !e.is_const(0.))
            .map(|(idx, e)| (idx / self.ncols, idx % self.ncols, e))
    }
}
