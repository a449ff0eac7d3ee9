use super::{BinaryOp, Expr, Function, Symbol};
use crate::{Error, Result};
use num_dual::DualNum;
use std::sync::Arc;

/// Values of the symbols an expression is evaluated with.
#[derive(Debug, Clone, Copy)]
pub struct Env<'a, D> {
    /// Independent variables.
    pub independent: &'a [D],
    /// States.
    pub states: &'a [D],
    /// Parameters.
    pub parameters: &'a [D],
}

impl<'a, D> Env<'a, D> {
    /// Creates the environment.
    pub fn new(independent: &'a [D], states: &'a [D], parameters: &'a [D]) -> Self {
        Self {
            independent,
            states,
            parameters,
        }
    }
}

impl Function {
    /// Applies the function on a (dual) number.
    pub fn apply<D: DualNum<f64>>(&self, x: D) -> D {
        match self {
            Self::Exp => x.exp(),
            Self::Ln => x.ln(),
            Self::Log10 => x.log10(),
            Self::Sqrt => x.sqrt(),
            Self::Sin => x.sin(),
            Self::Cos => x.cos(),
            Self::Tan => x.tan(),
            Self::Sinh => x.sinh(),
            Self::Cosh => x.cosh(),
            Self::Tanh => x.tanh(),
            Self::Abs => x.abs(),
        }
    }
}

fn unresolved(expr: &Expr) -> Error {
    match expr {
        Expr::Named(n) => Error::UndefinedSymbols {
            symbols: vec![n.clone()],
        },
        _ => Error::NonResolvableAlgebraicSystem {
            variables: vec![format!("{expr}")],
        },
    }
}

fn integer_exponent(c: f64) -> Option<i32> {
    (c.fract() == 0. && c.abs() <= i32::MAX as f64).then_some(c as i32)
}

impl Expr {
    /// Evaluates the expression by walking the tree. Generic over [DualNum] so the same tree is
    /// used for plain values and forward-mode derivatives.
    pub fn eval<D: DualNum<f64>>(&self, env: &Env<D>) -> Result<D> {
        let val = match self {
            Self::Const(c) => D::from(*c),
            Self::Sym(Symbol::Parameter(i)) => env.parameters[*i].clone(),
            Self::Sym(Symbol::State(i)) => env.states[*i].clone(),
            Self::Sym(Symbol::Independent(i)) => env.independent[*i].clone(),
            Self::Named(_) | Self::Sym(Symbol::Algebraic(_)) => return Err(unresolved(self)),
            Self::Neg(a) => -a.eval(env)?,
            Self::Binary(op, a, b) => {
                let a_val = a.eval(env)?;
                match op {
                    BinaryOp::Add => a_val + b.eval(env)?,
                    BinaryOp::Sub => a_val - b.eval(env)?,
                    BinaryOp::Mul => a_val * b.eval(env)?,
                    BinaryOp::Div => a_val / b.eval(env)?,
                    BinaryOp::Pow => match b.as_ref() {
                        Self::Const(c) => match integer_exponent(*c) {
                            Some(n) => a_val.powi(n),
                            None => a_val.powf(*c),
                        },
                        _ => a_val.powd(b.eval(env)?),
                    },
                }
            }
            Self::Call(func, a) => func.apply(a.eval(env)?),
        };
        Ok(val)
    }

    /// Compiles the tree into nested closures. Fails if unbound names or algebraic references are
    /// left.
    pub fn compile(&self) -> Result<CompiledExpr> {
        Ok(CompiledExpr(self.compile_fn()?))
    }

    fn compile_fn(&self) -> Result<Arc<EvalFn>> {
        let f: Arc<EvalFn> = match self {
            Self::Const(c) => {
                let c = *c;
                closure(move |_| c)
            }
            Self::Sym(Symbol::Parameter(i)) => {
                let i = *i;
                closure(move |env| env.parameters[i])
            }
            Self::Sym(Symbol::State(i)) => {
                let i = *i;
                closure(move |env| env.states[i])
            }
            Self::Sym(Symbol::Independent(i)) => {
                let i = *i;
                closure(move |env| env.independent[i])
            }
            Self::Named(_) | Self::Sym(Symbol::Algebraic(_)) => return Err(unresolved(self)),
            Self::Neg(a) => {
                let a = a.compile_fn()?;
                closure(move |env| -a(env))
            }
            Self::Binary(op, a, b) => {
                let af = a.compile_fn()?;
                match (op, b.as_ref()) {
                    (BinaryOp::Pow, Self::Const(c)) => match integer_exponent(*c) {
                        Some(n) => closure(move |env| af(env).powi(n)),
                        None => {
                            let c = *c;
                            closure(move |env| af(env).powf(c))
                        }
                    },
                    _ => {
                        let bf = b.compile_fn()?;
                        match op {
                            BinaryOp::Add => closure(move |env| af(env) + bf(env)),
                            BinaryOp::Sub => closure(move |env| af(env) - bf(env)),
                            BinaryOp::Mul => closure(move |env| af(env) * bf(env)),
                            BinaryOp::Div => closure(move |env| af(env) / bf(env)),
                            BinaryOp::Pow => closure(move |env| af(env).powf(bf(env))),
                        }
                    }
                }
            }
            Self::Call(func, a) => {
                let a = a.compile_fn()?;
                let func = *func;
                closure(move |env| func.apply(a(env)))
            }
        };
        Ok(f)
    }
}

type EvalFn = dyn Fn(&Env<f64>) -> f64 + Send + Sync;

fn closure(f: impl Fn(&Env<f64>) -> f64 + Send + Sync + 'static) -> Arc<EvalFn> {
    Arc::new(f)
}

/// Expression compiled into a closure.
#[derive(Clone)]
pub struct CompiledExpr(Arc<EvalFn>);

impl CompiledExpr {
    /// Evaluates the compiled expression.
    #[inline(always)]
    pub fn call(&self, env: &Env<f64>) -> f64 {
        (self.0)(env)
    }
}

impl std::fmt::Debug for CompiledExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CompiledExpr")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Result;
    use num_dual::Dual64;

    const EQ_EPS: f64 = 1e-12;

    fn bound(source: &str) -> Result<Expr> {
        Ok(Expr::parse(source)?.bind(&|n| match n {
            "a" => Some(Symbol::Parameter(0)),
            "x" => Some(Symbol::State(0)),
            "t" => Some(Symbol::Independent(0)),
            _ => None,
        }))
    }

    #[test]
    fn compiled_matches_tree() -> Result<()> {
        let expr = bound("a*x**2 - sqrt(t)/x + x**a + log10(100)*sin(t)")?;
        let compiled = expr.compile()?;
        let (t, x, a) = ([4.0], [1.5], [0.7]);
        let env = Env::new(&t, &x, &a);
        let tree = expr.eval(&env)?;
        let closure = compiled.call(&env);
        let expected = 0.7 * 1.5_f64.powi(2) - 2.0 / 1.5 + 1.5_f64.powf(0.7) + 2.0 * 4.0_f64.sin();
        assert!((tree - expected).abs() < EQ_EPS);
        assert!((closure - expected).abs() < EQ_EPS);
        Ok(())
    }

    #[test]
    fn dual_derivative() -> Result<()> {
        let expr = bound("a*exp(-x)")?;
        let t = [Dual64::from(0.)];
        let x = [Dual64::new(2., 1.)];
        let a = [Dual64::from(3.)];
        let val = expr.eval(&Env::new(&t, &x, &a))?;
        assert!((val.re - 3. * (-2.0_f64).exp()).abs() < EQ_EPS);
        assert!((val.eps + 3. * (-2.0_f64).exp()).abs() < EQ_EPS);
        Ok(())
    }

    #[test]
    fn unresolved_fails() -> Result<()> {
        let expr = bound("a*z")?;
        assert_eq!(
            expr.compile().err(),
            Some(Error::UndefinedSymbols {
                symbols: vec!["z".to_string()]
            })
        );
        Ok(())
    }
}
