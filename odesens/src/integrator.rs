use crate::{CompiledModel, Error, Result, SampleGrid, SensitivityTensor};
use nalgebra::{DMatrix, DVector};
use ode_solvers::{Dopri5, System};
use std::sync::Arc;
use tracing::debug;

type State = ode_solvers::DVector<f64>;

// Relative distance of the dense output point from the segment end. Hitting the end exactly is
// subject to rounding of `t0 + dx`.
const DENSE_OUTPUT_SHRINK: f64 = 1e-12;
const REACH_RTOL: f64 = 1e-9;

/// Parameters, initial state and sample grid of a single model evaluation.
///
/// Contexts are never mutated by an evaluation. Candidates of a design search are evaluated on
/// fresh contexts derived with the `with_*` methods.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationContext {
    parameters: DVector<f64>,
    initial_state: DVector<f64>,
    grid: SampleGrid,
}

impl EvaluationContext {
    /// Creates a context.
    pub fn new(parameters: DVector<f64>, initial_state: DVector<f64>, grid: SampleGrid) -> Self {
        Self {
            parameters,
            initial_state,
            grid,
        }
    }

    /// Replaces the parameter values.
    pub fn with_parameters(mut self, parameters: DVector<f64>) -> Self {
        self.parameters = parameters;
        self
    }

    /// Replaces the initial state.
    pub fn with_initial_state(mut self, initial_state: DVector<f64>) -> Self {
        self.initial_state = initial_state;
        self
    }

    /// Replaces the sample grid.
    pub fn with_grid(mut self, grid: SampleGrid) -> Self {
        self.grid = grid;
        self
    }

    /// Parameter values.
    pub fn parameters(&self) -> &DVector<f64> {
        &self.parameters
    }

    /// Initial state at the first grid point.
    pub fn initial_state(&self) -> &DVector<f64> {
        &self.initial_state
    }

    /// Sample grid.
    pub fn grid(&self) -> &SampleGrid {
        &self.grid
    }
}

/// Tolerances of the Dormand-Prince integrator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverOptions {
    /// Relative tolerance.
    pub rtol: f64,
    /// Absolute tolerance.
    pub atol: f64,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            rtol: 1e-8,
            atol: 1e-10,
        }
    }
}

impl SolverOptions {
    /// Default tolerances.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the relative tolerance.
    pub fn with_rtol(mut self, rtol: f64) -> Self {
        self.rtol = rtol;
        self
    }

    /// Sets the absolute tolerance.
    pub fn with_atol(mut self, atol: f64) -> Self {
        self.atol = atol;
        self
    }
}

/// Output values on a sample grid, one row per sample and one column per output.
#[derive(Debug, Clone, PartialEq)]
pub struct Trajectory {
    grid: SampleGrid,
    outputs: Vec<String>,
    values: DMatrix<f64>,
}

impl Trajectory {
    /// Creates a trajectory; `values` must have one row per sample and one column per output.
    pub fn new(grid: SampleGrid, outputs: Vec<String>, values: DMatrix<f64>) -> Result<Self> {
        if values.nrows() != grid.len() || values.ncols() != outputs.len() {
            return Err(Error::ShapeMismatch {
                mat1: "values",
                mat2: "grid",
                dim1: 0,
                dim2: 1,
                shape1: values.shape(),
                shape2: (outputs.len(), grid.len()),
            });
        }
        Ok(Self {
            grid,
            outputs,
            values,
        })
    }

    /// Sample grid.
    pub fn grid(&self) -> &SampleGrid {
        &self.grid
    }

    /// Output names.
    pub fn outputs(&self) -> &[String] {
        &self.outputs
    }

    /// Samples × outputs.
    pub fn values(&self) -> &DMatrix<f64> {
        &self.values
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.values.nrows()
    }

    /// `true` if there are no samples.
    pub fn is_empty(&self) -> bool {
        self.values.nrows() == 0
    }

    /// Values of a single output over all samples.
    pub fn output(&self, name: &str) -> Result<DVector<f64>> {
        let idx = self
            .outputs
            .iter()
            .position(|o| o == name)
            .ok_or_else(|| Error::UnknownName {
                kind: "output",
                name: name.to_string(),
            })?;
        Ok(self.values.column(idx).into_owned())
    }
}

#[derive(Clone, Copy)]
struct PlainSystem<'a> {
    model: &'a CompiledModel,
    theta: &'a [f64],
}

impl System<f64, State> for PlainSystem<'_> {
    fn system(&self, t: f64, y: &State, dy: &mut State) {
        self.model
            .rhs(t, y.as_slice(), self.theta, dy.as_mut_slice());
    }
}

#[derive(Clone, Copy)]
struct AugmentedSystem<'a> {
    model: &'a CompiledModel,
    theta: &'a [f64],
}

impl System<f64, State> for AugmentedSystem<'_> {
    fn system(&self, t: f64, y: &State, dy: &mut State) {
        self.model
            .augmented_rhs(t, y.as_slice(), self.theta, dy.as_mut_slice());
    }
}

/// Evaluates a [CompiledModel] on an [EvaluationContext].
///
/// ODE models are integrated piecewise between consecutive grid points with a Dormand-Prince
/// 5(4) scheme, starting at the first grid point. Algebraic-only models are evaluated directly.
#[derive(Debug, Clone)]
pub struct Integrator {
    model: Arc<CompiledModel>,
    options: SolverOptions,
}

impl Integrator {
    /// Creates an integrator.
    pub fn new(model: Arc<CompiledModel>, options: SolverOptions) -> Self {
        Self { model, options }
    }

    /// The evaluated model.
    pub fn model(&self) -> &Arc<CompiledModel> {
        &self.model
    }

    /// Solver tolerances.
    pub fn options(&self) -> &SolverOptions {
        &self.options
    }

    /// Output trajectory of the plain system.
    pub fn trajectory(&self, ctx: &EvaluationContext) -> Result<Trajectory> {
        self.check_context(ctx)?;
        let theta = ctx.parameters().as_slice();
        let mut values = DMatrix::zeros(ctx.grid().len(), self.model.n_outputs());

        let states = match self.model.symbolic().is_ode() {
            true => {
                let system = PlainSystem {
                    model: &self.model,
                    theta,
                };
                self.integrate(system, &ctx.grid().values()?, ctx.initial_state().as_slice())?
            }
            false => vec![vec![]; ctx.grid().len()],
        };
        let mut alg = vec![0.; self.model.n_algebraic()];
        for (sample, x) in states.iter().enumerate() {
            let independent = ctx.grid().point(sample);
            self.model.algebraic(&independent, x, theta, &mut alg);
            for (col, v) in x.iter().chain(&alg).enumerate() {
                values[(sample, col)] = *v;
            }
        }
        self.trajectory_from(ctx, values)
    }

    /// Output trajectory and local sensitivities `dy/dθ` of the augmented system.
    ///
    /// Sensitivities start at zero, initial states are not treated as parameters. Algebraic
    /// outputs and their sensitivities are post-processed from the state solution.
    pub fn sensitivities(&self, ctx: &EvaluationContext) -> Result<(Trajectory, SensitivityTensor)> {
        self.check_context(ctx)?;
        let theta = ctx.parameters().as_slice();
        let n_states = self.model.n_states();
        let n_par = self.model.n_parameters();
        let n_outputs = self.model.n_outputs();
        let n_samples = ctx.grid().len();

        let augmented = match self.model.symbolic().is_ode() {
            true => {
                let mut y0 = vec![0.; self.model.augmented_len()];
                y0[..n_states].copy_from_slice(ctx.initial_state().as_slice());
                let system = AugmentedSystem {
                    model: &self.model,
                    theta,
                };
                self.integrate(system, &ctx.grid().values()?, &y0)?
            }
            false => vec![vec![]; n_samples],
        };

        let mut values = DMatrix::zeros(n_samples, n_outputs);
        let mut samples = Vec::with_capacity(n_samples);
        let mut alg = vec![0.; self.model.n_algebraic()];
        for (sample, y) in augmented.iter().enumerate() {
            let (x, flat) = y.split_at(n_states);
            let state_sens = DMatrix::from_row_slice(n_states, n_par, flat);
            let independent = ctx.grid().point(sample);

            self.model.algebraic(&independent, x, theta, &mut alg);
            for (col, v) in x.iter().chain(&alg).enumerate() {
                values[(sample, col)] = *v;
            }

            let alg_sens = self
                .model
                .algebraic_sensitivity(&independent, x, &state_sens, theta);
            let mut sens = DMatrix::zeros(n_outputs, n_par);
            sens.rows_mut(0, n_states).copy_from(&state_sens);
            sens.rows_mut(n_states, alg_sens.nrows()).copy_from(&alg_sens);
            samples.push(sens);
        }

        let trajectory = self.trajectory_from(ctx, values)?;
        let tensor = SensitivityTensor::new(
            ctx.grid().clone(),
            self.model.symbolic().outputs(),
            self.model.symbolic().parameters().to_vec(),
            samples,
        )?;
        Ok((trajectory, tensor))
    }

    fn trajectory_from(&self, ctx: &EvaluationContext, values: DMatrix<f64>) -> Result<Trajectory> {
        Trajectory::new(ctx.grid().clone(), self.model.symbolic().outputs(), values)
    }

    fn check_context(&self, ctx: &EvaluationContext) -> Result<()> {
        if ctx.parameters().len() != self.model.n_parameters() {
            return Err(Error::ShapeMismatch {
                mat1: "parameters",
                mat2: "model parameters",
                dim1: 0,
                dim2: 0,
                shape1: ctx.parameters().shape(),
                shape2: (self.model.n_parameters(), 1),
            });
        }
        if self.model.symbolic().is_ode() && ctx.initial_state().len() != self.model.n_states() {
            return Err(Error::ShapeMismatch {
                mat1: "initial_state",
                mat2: "model states",
                dim1: 0,
                dim2: 0,
                shape1: ctx.initial_state().shape(),
                shape2: (self.model.n_states(), 1),
            });
        }
        if ctx.grid().names().len() != self.model.symbolic().independent().len() {
            return Err(Error::InvalidGrid {
                grid: ctx.grid().names().join(", "),
                reason: "grid dimension does not match the independent variables",
            });
        }
        if self.model.symbolic().is_ode() && ctx.grid().values()?.windows(2).any(|w| w[1] <= w[0])
        {
            return Err(Error::InvalidGrid {
                grid: ctx.grid().names().join(", "),
                reason: "values must increase strictly",
            });
        }
        Ok(())
    }

    fn integrate<F>(&self, system: F, grid: &[f64], y0: &[f64]) -> Result<Vec<Vec<f64>>>
    where
        F: System<f64, State> + Copy,
    {
        let mut out = Vec::with_capacity(grid.len());
        let mut y = State::from_column_slice(y0);
        out.push(y0.to_vec());
        let mut n_eval = 0;

        for window in grid.windows(2) {
            let (t0, t1) = (window[0], window[1]);
            let dx = (t1 - t0) * (1. - DENSE_OUTPUT_SHRINK);
            let mut stepper =
                Dopri5::new(system, t0, t1, dx, y.clone(), self.options.rtol, self.options.atol);
            let stats = stepper.integrate().map_err(|e| Error::Integration {
                at: t0,
                reason: format!("{e:?}"),
            })?;
            n_eval += stats.num_eval;

            let reached = stepper.x_out().last().copied().unwrap_or(t0);
            if (t1 - reached).abs() > REACH_RTOL * t1.abs().max(1.) {
                return Err(Error::Integration {
                    at: reached,
                    reason: format!("final point {t1} not reached"),
                });
            }
            y = stepper
                .y_out()
                .last()
                .cloned()
                .ok_or_else(|| Error::Integration {
                    at: t0,
                    reason: "solver returned no output".to_string(),
                })?;
            if y.iter().any(|v| !v.is_finite()) {
                return Err(Error::Integration {
                    at: t1,
                    reason: "non-finite state".to_string(),
                });
            }
            out.push(y.as_slice().to_vec());
        }
        debug!(
            samples = grid.len(),
            evaluations = n_eval,
            "integrated {}",
            self.model.symbolic().name()
        );
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ModelDefinition, Result, SymbolicModel};

    const EQ_EPS: f64 = 1e-6;

    fn integrator(definition: ModelDefinition) -> Result<Integrator> {
        let model = CompiledModel::new(SymbolicModel::new(definition)?)?;
        Ok(Integrator::new(Arc::new(model), SolverOptions::default()))
    }

    #[test]
    fn algebraic_growth_curve() -> Result<()> {
        let integrator = integrator(
            ModelDefinition::new("growth")
                .with_algebraic("W", "W0*Wf/(W0+(Wf-W0)*exp(-mu*t))")
                .with_parameter("W0", 2.0805)
                .with_parameter("Wf", 9.7523)
                .with_parameter("mu", 0.0659),
        )?;
        let theta = integrator.model().symbolic().nominal_parameters();
        let ctx = EvaluationContext::new(
            theta,
            DVector::zeros(0),
            SampleGrid::from_values("t", &[0., 100., 1000.])?,
        );
        let trajectory = integrator.trajectory(&ctx)?;
        let w = trajectory.output("W")?;
        assert!((w[0] - 2.0805).abs() < 1e-12);
        assert!((w[2] - 9.7523).abs() < 1e-9);
        assert!(w[1] < w[2]);
        Ok(())
    }

    #[test]
    fn exponential_decay() -> Result<()> {
        let integrator = integrator(
            ModelDefinition::new("decay")
                .with_ode("X", "-k*X")
                .with_algebraic("Y", "c*X")
                .with_parameter("k", 0.3)
                .with_parameter("c", 2.),
        )?;
        let ctx = EvaluationContext::new(
            DVector::from_vec(vec![0.3, 2.]),
            DVector::from_vec(vec![4.]),
            SampleGrid::linspace("t", 0., 5., 11)?,
        );
        let (trajectory, tensor) = integrator.sensitivities(&ctx)?;
        let plain = integrator.trajectory(&ctx)?;

        for (sample, t) in ctx.grid().values()?.iter().enumerate() {
            let x = 4. * (-0.3 * t).exp();
            assert!((trajectory.values()[(sample, 0)] - x).abs() < EQ_EPS);
            assert!((plain.values()[(sample, 0)] - x).abs() < EQ_EPS);
            assert!((trajectory.values()[(sample, 1)] - 2. * x).abs() < EQ_EPS);

            let sens = tensor.sample(sample);
            // dX/dk, dX/dc, dY/dk, dY/dc
            assert!((sens[(0, 0)] + t * x).abs() < EQ_EPS);
            assert_eq!(sens[(0, 1)], 0.);
            assert!((sens[(1, 0)] + 2. * t * x).abs() < EQ_EPS);
            assert!((sens[(1, 1)] - x).abs() < EQ_EPS);
        }
        Ok(())
    }

    #[test]
    fn context_shape() -> Result<()> {
        let integrator = integrator(
            ModelDefinition::new("decay")
                .with_ode("X", "-k*X")
                .with_parameter("k", 0.3),
        )?;
        let ctx = EvaluationContext::new(
            DVector::from_vec(vec![0.3]),
            DVector::from_vec(vec![1., 2.]),
            SampleGrid::linspace("t", 0., 5., 11)?,
        );
        assert_eq!(
            integrator.trajectory(&ctx),
            Err(Error::ShapeMismatch {
                mat1: "initial_state",
                mat2: "model states",
                dim1: 0,
                dim2: 0,
                shape1: (2, 1),
                shape2: (1, 1),
            })
        );

        let unordered = SampleGrid::from_points(&["t"], DMatrix::from_row_slice(1, 3, &[0., 2., 1.]))?;
        let ctx = ctx
            .with_initial_state(DVector::from_vec(vec![1.]))
            .with_grid(unordered);
        assert_eq!(
            integrator.trajectory(&ctx),
            Err(Error::InvalidGrid {
                grid: "t".to_string(),
                reason: "values must increase strictly",
            })
        );
        Ok(())
    }
}
