use crate::{CompiledExpr, Env, Error, ExprMatrix, Result, SymbolicModel};
use nalgebra::{DMatrix, DVector};

type SparseEntries = Vec<(usize, usize, CompiledExpr)>;

fn compile_sparse(matrix: &ExprMatrix) -> Result<SparseEntries> {
    matrix
        .non_zero()
        .map(|(row, col, e)| Ok((row, col, e.compile()?)))
        .collect()
}

/// Numeric right-hand sides generated from a [SymbolicModel].
///
/// Holds closures for the plain system `F`, the algebraic outputs `G` and the non-zero entries
/// of the four Jacobians. Augmented states are laid out as `[x; vec(dx/dθ)]` where `dx/dθ` is
/// stored row-major with one row per state.
#[derive(Debug, Clone)]
pub struct CompiledModel {
    symbolic: SymbolicModel,
    odes: Vec<CompiledExpr>,
    algebraic: Vec<CompiledExpr>,
    dfdx: SparseEntries,
    dfdtheta: SparseEntries,
    dgdx: SparseEntries,
    dgdtheta: SparseEntries,
}

impl CompiledModel {
    /// Compiles all expressions of the model.
    pub fn new(symbolic: SymbolicModel) -> Result<Self> {
        let compile = |exprs: &[crate::Expr]| -> Result<Vec<CompiledExpr>> {
            exprs.iter().map(|e| e.compile()).collect()
        };
        Ok(Self {
            odes: compile(symbolic.odes())?,
            algebraic: compile(symbolic.algebraic_equations())?,
            dfdx: compile_sparse(symbolic.dfdx())?,
            dfdtheta: compile_sparse(symbolic.dfdtheta())?,
            dgdx: compile_sparse(symbolic.dgdx())?,
            dgdtheta: compile_sparse(symbolic.dgdtheta())?,
            symbolic,
        })
    }

    /// The symbolic model the closures are generated from.
    pub fn symbolic(&self) -> &SymbolicModel {
        &self.symbolic
    }

    /// Number of states.
    pub fn n_states(&self) -> usize {
        self.odes.len()
    }

    /// Number of parameters.
    pub fn n_parameters(&self) -> usize {
        self.symbolic.parameters().len()
    }

    /// Number of algebraic outputs.
    pub fn n_algebraic(&self) -> usize {
        self.algebraic.len()
    }

    /// Number of outputs (states and algebraic outputs).
    pub fn n_outputs(&self) -> usize {
        self.n_states() + self.n_algebraic()
    }

    /// Length of the augmented state `[x; vec(dx/dθ)]`.
    pub fn augmented_len(&self) -> usize {
        self.n_states() * (1 + self.n_parameters())
    }

    /// Evaluates `F(t, x, θ)` after checking the lengths of `x` and `θ`.
    pub fn eval_rhs(
        &self,
        t: f64,
        x: &DVector<f64>,
        theta: &DVector<f64>,
    ) -> Result<DVector<f64>> {
        check_len("x", x.len(), self.n_states())?;
        check_len("theta", theta.len(), self.n_parameters())?;
        let mut dx = DVector::zeros(self.n_states());
        self.rhs(t, x.as_slice(), theta.as_slice(), dx.as_mut_slice());
        Ok(dx)
    }

    /// Evaluates `G(independent, x, θ)` after checking the lengths of every argument.
    pub fn eval_algebraic(
        &self,
        independent: &[f64],
        x: &DVector<f64>,
        theta: &DVector<f64>,
    ) -> Result<DVector<f64>> {
        let n_independent = self.symbolic.independent().len();
        check_len("independent", independent.len(), n_independent)?;
        check_len("x", x.len(), self.n_states())?;
        check_len("theta", theta.len(), self.n_parameters())?;
        let mut out = DVector::zeros(self.n_algebraic());
        self.algebraic(independent, x.as_slice(), theta.as_slice(), out.as_mut_slice());
        Ok(out)
    }

    /// Plain system `dx/dt = F(t, x, θ)`.
    pub(crate) fn rhs(&self, t: f64, x: &[f64], theta: &[f64], dx: &mut [f64]) {
        let t = [t];
        let env = Env::new(&t, x, theta);
        for (d, f) in dx.iter_mut().zip(&self.odes) {
            *d = f.call(&env);
        }
    }

    /// Augmented system with `d/dt(dx/dθ) = dF/dθ + dF/dx · dx/dθ`.
    pub(crate) fn augmented_rhs(&self, t: f64, y: &[f64], theta: &[f64], dy: &mut [f64]) {
        let n_states = self.n_states();
        let n_par = self.n_parameters();
        let (x, sens) = y.split_at(n_states);
        let (dx, dsens) = dy.split_at_mut(n_states);
        self.rhs(t, x, theta, dx);

        let t = [t];
        let env = Env::new(&t, x, theta);
        dsens.fill(0.);
        for (row, col, e) in &self.dfdtheta {
            dsens[row * n_par + col] += e.call(&env);
        }
        for (row, k, e) in &self.dfdx {
            let v = e.call(&env);
            let sens_k = &sens[k * n_par..(k + 1) * n_par];
            let dsens_row = &mut dsens[row * n_par..(row + 1) * n_par];
            for (d, s) in dsens_row.iter_mut().zip(sens_k) {
                *d += v * s;
            }
        }
    }

    /// Algebraic outputs `G(t, x, θ)`.
    pub(crate) fn algebraic(&self, independent: &[f64], x: &[f64], theta: &[f64], out: &mut [f64]) {
        let env = Env::new(independent, x, theta);
        for (o, g) in out.iter_mut().zip(&self.algebraic) {
            *o = g.call(&env);
        }
    }

    /// Algebraic sensitivities `dy/dθ = dG/dθ + dG/dx · dx/dθ` with `dx/dθ` given as a
    /// states × parameters matrix.
    pub(crate) fn algebraic_sensitivity(
        &self,
        independent: &[f64],
        x: &[f64],
        state_sens: &DMatrix<f64>,
        theta: &[f64],
    ) -> DMatrix<f64> {
        let env = Env::new(independent, x, theta);
        let mut out = DMatrix::zeros(self.n_algebraic(), self.n_parameters());
        for (row, col, e) in &self.dgdtheta {
            out[(*row, *col)] += e.call(&env);
        }
        for (row, k, e) in &self.dgdx {
            let v = e.call(&env);
            for col in 0..out.ncols() {
                out[(*row, col)] += v * state_sens[(*k, col)];
            }
        }
        out
    }
}

fn check_len(vector: &'static str, len: usize, expected: usize) -> Result<()> {
    match len == expected {
        true => Ok(()),
        false => Err(Error::ShapeMismatch {
            mat1: vector,
            mat2: "model",
            dim1: 0,
            dim2: 0,
            shape1: (len, 1),
            shape2: (expected, 1),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ModelDefinition, Result};

    #[test]
    fn augmented_linear_decay() -> Result<()> {
        let definition = ModelDefinition::new("decay")
            .with_ode("X", "-k*X")
            .with_algebraic("Y", "c*X")
            .with_parameter("k", 0.5)
            .with_parameter("c", 2.);
        let model = CompiledModel::new(SymbolicModel::new(definition)?)?;
        assert_eq!(model.augmented_len(), 3);

        let theta = [0.5, 2.];
        // x, dx/dk, dx/dc
        let y = [4., -1., 0.];
        let mut dy = [0.; 3];
        model.augmented_rhs(0., &y, &theta, &mut dy);
        assert_eq!(dy, [-2., -4. + 0.5, 0.]);

        let sens = DMatrix::from_row_slice(1, 2, &[-1., 0.]);
        let alg = model.algebraic_sensitivity(&[0.], &[4.], &sens, &theta);
        assert_eq!(alg, DMatrix::from_row_slice(1, 2, &[-2., 4.]));

        let mut out = [0.];
        model.algebraic(&[0.], &[4.], &theta, &mut out);
        assert_eq!(out, [8.]);
        Ok(())
    }

    #[test]
    fn checked_evaluation() -> Result<()> {
        let definition = ModelDefinition::new("decay")
            .with_ode("X", "-k*X")
            .with_algebraic("Y", "c*X")
            .with_parameter("k", 0.5)
            .with_parameter("c", 2.);
        let model = CompiledModel::new(SymbolicModel::new(definition)?)?;
        let x = DVector::from_vec(vec![4.]);
        let theta = DVector::from_vec(vec![0.5, 2.]);
        assert_eq!(model.eval_rhs(0., &x, &theta)?, DVector::from_vec(vec![-2.]));
        assert_eq!(
            model.eval_algebraic(&[0.], &x, &theta)?,
            DVector::from_vec(vec![8.])
        );

        let short = DVector::from_vec(vec![0.5]);
        assert_eq!(
            model.eval_rhs(0., &x, &short),
            Err(Error::ShapeMismatch {
                mat1: "theta",
                mat2: "model",
                dim1: 0,
                dim2: 0,
                shape1: (1, 1),
                shape2: (2, 1),
            })
        );
        assert_eq!(
            model.eval_rhs(0., &DVector::zeros(0), &theta),
            Err(Error::ShapeMismatch {
                mat1: "x",
                mat2: "model",
                dim1: 0,
                dim2: 0,
                shape1: (0, 1),
                shape2: (1, 1),
            })
        );
        assert!(model.eval_algebraic(&[], &x, &theta).is_err());
        Ok(())
    }
}
