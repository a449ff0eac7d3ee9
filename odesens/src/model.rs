use crate::{Env, Error, Expr, ExprMatrix, Result, Symbol};
use nalgebra::{DMatrix, DVector};
use num_dual::Dual64;
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// Equation strings, parameter values and independent variables of a model.
///
/// Every ODE is declared by the name of its state, algebraic equations by the name of the
/// output they define. Declaration order fixes the positional layout used by every tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelDefinition {
    name: String,
    odes: Vec<(String, String)>,
    algebraic: Vec<(String, String)>,
    parameters: Vec<(String, f64)>,
    independent: Vec<String>,
}

impl Default for ModelDefinition {
    fn default() -> Self {
        Self {
            name: "model".to_string(),
            odes: vec![],
            algebraic: vec![],
            parameters: vec![],
            independent: vec![],
        }
    }
}

impl ModelDefinition {
    /// Creates an empty definition.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    /// Adds the ODE `d state / dt = rhs`.
    pub fn with_ode(mut self, state: &str, rhs: &str) -> Self {
        self.odes.push((state.to_string(), rhs.to_string()));
        self
    }

    /// Adds the algebraic output `name = rhs`.
    pub fn with_algebraic(mut self, name: &str, rhs: &str) -> Self {
        self.algebraic.push((name.to_string(), rhs.to_string()));
        self
    }

    /// Adds a parameter and its nominal value.
    pub fn with_parameter(mut self, name: &str, value: f64) -> Self {
        self.parameters.push((name.to_string(), value));
        self
    }

    /// Adds an independent variable. Defaults to `t` if none is given.
    pub fn with_independent(mut self, name: &str) -> Self {
        self.independent.push(name.to_string());
        self
    }

    fn independent_names(&self) -> Vec<String> {
        match self.independent.is_empty() {
            true => vec!["t".to_string()],
            false => self.independent.clone(),
        }
    }

    fn replace(&mut self, name: &str, rhs: &str) -> Result<()> {
        let slot = self
            .odes
            .iter_mut()
            .chain(self.algebraic.iter_mut())
            .find(|(n, _)| n == name)
            .ok_or_else(|| Error::UnknownName {
                kind: "equation",
                name: name.to_string(),
            })?;
        slot.1 = rhs.to_string();
        Ok(())
    }
}

/// Resolved symbolic model with its cached Jacobians.
///
/// After construction no expression references an algebraic variable. The Jacobians
/// `dF/dx`, `dF/dθ`, `dG/dx` and `dG/dθ` are derived once and recomputed by
/// [SymbolicModel::replace_equation].
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolicModel {
    definition: ModelDefinition,
    states: Vec<String>,
    parameters: Vec<String>,
    algebraic: Vec<String>,
    independent: Vec<String>,
    odes: Vec<Expr>,
    algebraic_equations: Vec<Expr>,
    dfdx: ExprMatrix,
    dfdtheta: ExprMatrix,
    dgdx: ExprMatrix,
    dgdtheta: ExprMatrix,
}

impl SymbolicModel {
    /// Parses, validates and resolves the definition and derives the Jacobians.
    pub fn new(definition: ModelDefinition) -> Result<Self> {
        let states: Vec<String> = definition.odes.iter().map(|(n, _)| n.clone()).collect();
        let algebraic: Vec<String> = definition.algebraic.iter().map(|(n, _)| n.clone()).collect();
        let parameters: Vec<String> = definition.parameters.iter().map(|(n, _)| n.clone()).collect();
        let independent = definition.independent_names();

        if states.is_empty() && algebraic.is_empty() {
            return Err(Error::ModelKind {
                reason: "model has no equations",
            });
        }
        if !states.is_empty() && independent.len() != 1 {
            return Err(Error::ModelKind {
                reason: "ODE models have exactly one independent variable",
            });
        }

        let mut declared = BTreeSet::new();
        for name in states
            .iter()
            .chain(&algebraic)
            .chain(&parameters)
            .chain(&independent)
        {
            if !declared.insert(name.as_str()) {
                return Err(Error::DuplicateSymbol { name: name.clone() });
            }
        }

        let parse = |eqs: &[(String, String)]| -> Result<Vec<Expr>> {
            eqs.iter().map(|(_, rhs)| Expr::parse(rhs)).collect()
        };
        let odes = parse(&definition.odes)?;
        let algebraic_equations = parse(&definition.algebraic)?;

        let used: BTreeSet<String> = odes
            .iter()
            .chain(&algebraic_equations)
            .flat_map(|e| e.names())
            .collect();
        let undefined: Vec<String> = used
            .iter()
            .filter(|n| !declared.contains(n.as_str()))
            .cloned()
            .collect();
        if !undefined.is_empty() {
            return Err(Error::UndefinedSymbols { symbols: undefined });
        }
        for name in parameters.iter().filter(|p| !used.contains(*p)) {
            warn!(model = %definition.name, parameter = %name, "parameter is not used in any equation");
        }

        let position = |names: &[String], name: &str| names.iter().position(|n| n == name);
        let resolver = |name: &str| {
            position(&parameters, name)
                .map(Symbol::Parameter)
                .or_else(|| position(&states, name).map(Symbol::State))
                .or_else(|| position(&algebraic, name).map(Symbol::Algebraic))
                .or_else(|| position(&independent, name).map(Symbol::Independent))
        };
        let bind = |exprs: Vec<Expr>| exprs.iter().map(|e| e.bind(&resolver)).collect::<Vec<_>>();
        let odes = bind(odes);
        let algebraic_defs = bind(algebraic_equations);

        let bound = algebraic.len();
        let algebraic_equations =
            resolve(algebraic_defs.clone(), &algebraic_defs, bound, &algebraic)?;
        let odes = resolve(odes, &algebraic_defs, bound, &algebraic)?;

        let state_symbols: Vec<Symbol> = (0..states.len()).map(Symbol::State).collect();
        let parameter_symbols: Vec<Symbol> = (0..parameters.len()).map(Symbol::Parameter).collect();
        let dfdx = ExprMatrix::jacobian(&odes, &state_symbols);
        let dfdtheta = ExprMatrix::jacobian(&odes, &parameter_symbols);
        let dgdx = ExprMatrix::jacobian(&algebraic_equations, &state_symbols);
        let dgdtheta = ExprMatrix::jacobian(&algebraic_equations, &parameter_symbols);
        debug!(
            model = %definition.name,
            states = states.len(),
            algebraic = algebraic.len(),
            parameters = parameters.len(),
            "derived model jacobians"
        );

        Ok(Self {
            definition,
            states,
            parameters,
            algebraic,
            independent,
            odes,
            algebraic_equations,
            dfdx,
            dfdtheta,
            dgdx,
            dgdtheta,
        })
    }

    /// Replaces the right-hand side of an ODE or algebraic equation and derives the model again.
    /// On failure the model is left unchanged.
    pub fn replace_equation(&mut self, name: &str, rhs: &str) -> Result<()> {
        let mut definition = self.definition.clone();
        definition.replace(name, rhs)?;
        *self = Self::new(definition)?;
        Ok(())
    }

    /// Model name.
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    /// Ordered state names.
    pub fn states(&self) -> &[String] {
        &self.states
    }

    /// Ordered parameter names.
    pub fn parameters(&self) -> &[String] {
        &self.parameters
    }

    /// Ordered algebraic output names.
    pub fn algebraic(&self) -> &[String] {
        &self.algebraic
    }

    /// Independent variable names.
    pub fn independent(&self) -> &[String] {
        &self.independent
    }

    /// Output names, states followed by algebraic outputs.
    pub fn outputs(&self) -> Vec<String> {
        self.states.iter().chain(&self.algebraic).cloned().collect()
    }

    /// `true` if the model has at least one ODE.
    pub fn is_ode(&self) -> bool {
        !self.states.is_empty()
    }

    /// Nominal parameter values in declaration order.
    pub fn nominal_parameters(&self) -> DVector<f64> {
        DVector::from_iterator(
            self.parameters.len(),
            self.definition.parameters.iter().map(|(_, v)| *v),
        )
    }

    /// Position of a parameter.
    pub fn parameter_index(&self, name: &str) -> Result<usize> {
        index_of(&self.parameters, "parameter", name)
    }

    /// Position of a state.
    pub fn state_index(&self, name: &str) -> Result<usize> {
        index_of(&self.states, "state", name)
    }

    /// Position of an output.
    pub fn output_index(&self, name: &str) -> Result<usize> {
        index_of(&self.outputs(), "output", name)
    }

    /// Resolved ODE right-hand sides.
    pub fn odes(&self) -> &[Expr] {
        &self.odes
    }

    /// Resolved algebraic equations.
    pub fn algebraic_equations(&self) -> &[Expr] {
        &self.algebraic_equations
    }

    /// `dF/dx`
    pub fn dfdx(&self) -> &ExprMatrix {
        &self.dfdx
    }

    /// `dF/dθ`
    pub fn dfdtheta(&self) -> &ExprMatrix {
        &self.dfdtheta
    }

    /// `dG/dx`
    pub fn dgdx(&self) -> &ExprMatrix {
        &self.dgdx
    }

    /// `dG/dθ`
    pub fn dgdtheta(&self) -> &ExprMatrix {
        &self.dgdtheta
    }

    /// Evaluates the symbolic `dF/dx` at a point.
    pub fn eval_dfdx(&self, t: f64, x: &DVector<f64>, theta: &DVector<f64>) -> Result<DMatrix<f64>> {
        eval_matrix(&self.dfdx, t, x, theta)
    }

    /// Evaluates the symbolic `dF/dθ` at a point.
    pub fn eval_dfdtheta(
        &self,
        t: f64,
        x: &DVector<f64>,
        theta: &DVector<f64>,
    ) -> Result<DMatrix<f64>> {
        eval_matrix(&self.dfdtheta, t, x, theta)
    }

    /// `dF/dx` by forward-mode automatic differentiation of the expression trees.
    pub fn dual_state_jacobian(
        &self,
        t: f64,
        x: &DVector<f64>,
        theta: &DVector<f64>,
    ) -> Result<DMatrix<f64>> {
        self.dual_jacobian(t, x, theta, Wrt::States)
    }

    /// `dF/dθ` by forward-mode automatic differentiation of the expression trees.
    pub fn dual_parameter_jacobian(
        &self,
        t: f64,
        x: &DVector<f64>,
        theta: &DVector<f64>,
    ) -> Result<DMatrix<f64>> {
        self.dual_jacobian(t, x, theta, Wrt::Parameters)
    }

    fn dual_jacobian(
        &self,
        t: f64,
        x: &DVector<f64>,
        theta: &DVector<f64>,
        wrt: Wrt,
    ) -> Result<DMatrix<f64>> {
        let ncols = match wrt {
            Wrt::States => x.len(),
            Wrt::Parameters => theta.len(),
        };
        let mut jac = DMatrix::zeros(self.odes.len(), ncols);
        let t_dual = [Dual64::from(t)];
        for col in 0..ncols {
            let seed = |v: &DVector<f64>, active: bool| -> Vec<Dual64> {
                v.iter()
                    .enumerate()
                    .map(|(i, val)| Dual64::new(*val, if active && i == col { 1. } else { 0. }))
                    .collect()
            };
            let x_dual = seed(x, matches!(wrt, Wrt::States));
            let theta_dual = seed(theta, matches!(wrt, Wrt::Parameters));
            let env = Env::new(&t_dual, &x_dual, &theta_dual);
            for (row, ode) in self.odes.iter().enumerate() {
                jac[(row, col)] = ode.eval(&env)?.eps;
            }
        }
        Ok(jac)
    }
}

#[derive(Clone, Copy)]
enum Wrt {
    States,
    Parameters,
}

fn index_of(names: &[String], kind: &'static str, name: &str) -> Result<usize> {
    names
        .iter()
        .position(|n| n == name)
        .ok_or_else(|| Error::UnknownName {
            kind,
            name: name.to_string(),
        })
}

fn eval_matrix(
    matrix: &ExprMatrix,
    t: f64,
    x: &DVector<f64>,
    theta: &DVector<f64>,
) -> Result<DMatrix<f64>> {
    let t = [t];
    let env = Env::new(&t, x.as_slice(), theta.as_slice());
    let mut out = DMatrix::zeros(matrix.nrows(), matrix.ncols());
    for row in 0..matrix.nrows() {
        for col in 0..matrix.ncols() {
            out[(row, col)] = matrix.get(row, col).eval(&env)?;
        }
    }
    Ok(out)
}

/// Inlines algebraic definitions until no algebraic reference is left, at most `bound` times.
fn resolve(
    mut exprs: Vec<Expr>,
    definitions: &[Expr],
    bound: usize,
    names: &[String],
) -> Result<Vec<Expr>> {
    for _ in 0..bound {
        if !exprs.iter().any(Expr::contains_algebraic) {
            break;
        }
        exprs = exprs.iter().map(|e| e.substitute(definitions)).collect();
    }
    let unresolved: BTreeSet<String> = exprs
        .iter()
        .flat_map(|e| e.symbols())
        .filter_map(|s| match s {
            Symbol::Algebraic(i) => names.get(i).cloned(),
            _ => None,
        })
        .collect();
    if !unresolved.is_empty() {
        return Err(Error::NonResolvableAlgebraicSystem {
            variables: unresolved.into_iter().collect(),
        });
    }
    Ok(exprs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Result;

    const EQ_EPS: f64 = 1e-7;
    const EQ_MAX_REL: f64 = 1e-7;

    fn monod() -> ModelDefinition {
        ModelDefinition::new("monod")
            .with_ode("S", "-mu_max/Y*S/(K_S + S)*X + Q_in*(S_in - S)")
            .with_ode("X", "mu*X - Q_in*X")
            .with_algebraic("mu", "mu_max*S/(K_S + S)")
            .with_algebraic("growth", "mu*X")
            .with_parameter("mu_max", 0.4)
            .with_parameter("K_S", 0.015)
            .with_parameter("Y", 0.67)
            .with_parameter("Q_in", 0.05)
            .with_parameter("S_in", 0.02)
    }

    #[test]
    fn resolves_algebraic_variables() -> Result<()> {
        let model = SymbolicModel::new(monod())?;
        assert_eq!(model.states(), &["S", "X"]);
        assert_eq!(model.outputs(), vec!["S", "X", "mu", "growth"]);
        assert!(!model.odes().iter().any(Expr::contains_algebraic));
        assert!(!model.algebraic_equations().iter().any(Expr::contains_algebraic));
        assert_eq!(model.dfdtheta().ncols(), 5);
        assert_eq!(model.dgdx().nrows(), 2);
        Ok(())
    }

    #[test]
    fn undefined_symbols() -> Result<()> {
        let definition = ModelDefinition::new("m")
            .with_ode("X", "k*X + b - c")
            .with_parameter("k", 1.);
        assert_eq!(
            SymbolicModel::new(definition),
            Err(Error::UndefinedSymbols {
                symbols: vec!["b".to_string(), "c".to_string()]
            })
        );
        Ok(())
    }

    #[test]
    fn circular_algebraic_definition() -> Result<()> {
        let definition = ModelDefinition::new("m")
            .with_ode("X", "a*X")
            .with_algebraic("a", "b + k")
            .with_algebraic("b", "a*k")
            .with_parameter("k", 1.);
        assert_eq!(
            SymbolicModel::new(definition),
            Err(Error::NonResolvableAlgebraicSystem {
                variables: vec!["a".to_string(), "b".to_string()]
            })
        );
        Ok(())
    }

    #[test]
    fn duplicate_and_kind_errors() -> Result<()> {
        let definition = ModelDefinition::new("m")
            .with_ode("X", "k*X")
            .with_parameter("X", 1.);
        assert_eq!(
            SymbolicModel::new(definition),
            Err(Error::DuplicateSymbol {
                name: "X".to_string()
            })
        );
        let definition = ModelDefinition::new("m")
            .with_ode("X", "k*X")
            .with_parameter("k", 1.)
            .with_independent("t")
            .with_independent("z");
        assert!(matches!(
            SymbolicModel::new(definition),
            Err(Error::ModelKind { .. })
        ));
        Ok(())
    }

    #[test]
    fn symbolic_jacobian_matches_dual_numbers() -> Result<()> {
        let model = SymbolicModel::new(monod())?;
        let x = DVector::from_vec(vec![0.012, 0.3]);
        let theta = model.nominal_parameters();
        let symbolic = model.eval_dfdx(0., &x, &theta)?;
        let dual = model.dual_state_jacobian(0., &x, &theta)?;
        assert!(symbolic.relative_eq(&dual, EQ_EPS, EQ_MAX_REL));
        let symbolic = model.eval_dfdtheta(0., &x, &theta)?;
        let dual = model.dual_parameter_jacobian(0., &x, &theta)?;
        assert!(symbolic.relative_eq(&dual, EQ_EPS, EQ_MAX_REL));
        Ok(())
    }

    #[test]
    fn symbolic_jacobian_matches_finite_differences() -> Result<()> {
        let model = SymbolicModel::new(monod())?;
        let x = DVector::from_vec(vec![0.012, 0.3]);
        let theta = model.nominal_parameters();
        let symbolic = model.eval_dfdx(0., &x, &theta)?;
        let rhs = |x: &DVector<f64>| -> Result<DVector<f64>> {
            let t = [0.];
            let env = Env::new(&t, x.as_slice(), theta.as_slice());
            let vals = model.odes().iter().map(|e| e.eval(&env)).collect::<Result<Vec<f64>>>()?;
            Ok(DVector::from_vec(vals))
        };
        let h = 1e-7;
        for col in 0..x.len() {
            let (mut xp, mut xm) = (x.clone(), x.clone());
            xp[col] += h;
            xm[col] -= h;
            let fd = (rhs(&xp)? - rhs(&xm)?) / (2. * h);
            for row in 0..x.len() {
                assert!((fd[row] - symbolic[(row, col)]).abs() < 1e-5);
            }
        }
        Ok(())
    }

    #[test]
    fn replace_equation_recomputes_jacobians() -> Result<()> {
        let mut model = SymbolicModel::new(monod())?;
        let x = DVector::from_vec(vec![0.012, 0.3]);
        let theta = model.nominal_parameters();
        model.replace_equation("X", "-Q_in*X")?;
        let jac = model.eval_dfdx(0., &x, &theta)?;
        assert_eq!(jac[(1, 0)], 0.);
        assert_eq!(jac[(1, 1)], -0.05);

        let err = model.replace_equation("X", "unknown*X");
        assert!(err.is_err());
        assert_eq!(model.eval_dfdx(0., &x, &theta)?[(1, 1)], -0.05);
        Ok(())
    }
}
