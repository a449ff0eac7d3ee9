use crate::{EvaluationContext, Error, Integrator, Result, SampleGrid, Trajectory};
use nalgebra::{DMatrix, DVector};

/// Normalization of local sensitivities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scaling {
    /// Absolute sensitivity `dy_i/dθ_j`.
    #[default]
    Cas,
    /// Parameter relative sensitivity `dy_i/dθ_j · θ_j`.
    Cprs,
    /// Total relative sensitivity `dy_i/dθ_j · θ_j / y_i`.
    ///
    /// Outputs touching zero are divided by their mean value over the grid instead.
    Ctrs,
}

/// Local sensitivities on a sample grid, one `outputs × parameters` matrix per sample.
#[derive(Debug, Clone, PartialEq)]
pub struct SensitivityTensor {
    grid: SampleGrid,
    outputs: Vec<String>,
    parameters: Vec<String>,
    samples: Vec<DMatrix<f64>>,
}

impl SensitivityTensor {
    /// Creates a tensor, every matrix must have one row per output and one column per parameter.
    pub fn new(
        grid: SampleGrid,
        outputs: Vec<String>,
        parameters: Vec<String>,
        samples: Vec<DMatrix<f64>>,
    ) -> Result<Self> {
        if samples.len() != grid.len() {
            return Err(Error::ShapeMismatch {
                mat1: "samples",
                mat2: "grid",
                dim1: 0,
                dim2: 1,
                shape1: (samples.len(), 1),
                shape2: (1, grid.len()),
            });
        }
        if let Some(s) = samples
            .iter()
            .find(|s| s.shape() != (outputs.len(), parameters.len()))
        {
            return Err(Error::ShapeMismatch {
                mat1: "sample",
                mat2: "outputs x parameters",
                dim1: 0,
                dim2: 0,
                shape1: s.shape(),
                shape2: (outputs.len(), parameters.len()),
            });
        }
        Ok(Self {
            grid,
            outputs,
            parameters,
            samples,
        })
    }

    /// Sample grid the tensor is aligned with.
    pub fn grid(&self) -> &SampleGrid {
        &self.grid
    }

    /// Output names.
    pub fn outputs(&self) -> &[String] {
        &self.outputs
    }

    /// Parameter names.
    pub fn parameters(&self) -> &[String] {
        &self.parameters
    }

    /// All per-sample matrices.
    pub fn samples(&self) -> &[DMatrix<f64>] {
        &self.samples
    }

    /// `outputs × parameters` matrix of sample `idx`.
    pub fn sample(&self, idx: usize) -> &DMatrix<f64> {
        &self.samples[idx]
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// `true` if there are no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Sensitivities of one output, one row per sample and one column per parameter.
    pub fn output_table(&self, output: &str) -> Result<DMatrix<f64>> {
        let idx = position(&self.outputs, "output", output)?;
        Ok(DMatrix::from_fn(
            self.len(),
            self.parameters.len(),
            |row, col| self.samples[row][(idx, col)],
        ))
    }

    /// Restricts the tensor to the given outputs.
    pub fn select_outputs(&self, names: &[String]) -> Result<Self> {
        let idx = names
            .iter()
            .map(|n| position(&self.outputs, "output", n))
            .collect::<Result<Vec<usize>>>()?;
        Ok(Self {
            grid: self.grid.clone(),
            outputs: names.to_vec(),
            parameters: self.parameters.clone(),
            samples: self.samples.iter().map(|s| s.select_rows(&idx)).collect(),
        })
    }

    /// Restricts the tensor to the given parameters.
    pub fn select_parameters(&self, names: &[String]) -> Result<Self> {
        let idx = names
            .iter()
            .map(|n| position(&self.parameters, "parameter", n))
            .collect::<Result<Vec<usize>>>()?;
        Ok(Self {
            grid: self.grid.clone(),
            outputs: self.outputs.clone(),
            parameters: names.to_vec(),
            samples: self.samples.iter().map(|s| s.select_columns(&idx)).collect(),
        })
    }

    /// Applies a [Scaling]. `theta` holds the values of the tensor's parameters and `trajectory`
    /// the output values on the same grid.
    pub fn scaled(
        &self,
        scaling: Scaling,
        theta: &DVector<f64>,
        trajectory: &Trajectory,
    ) -> Result<Self> {
        if theta.len() != self.parameters.len() {
            return Err(Error::ShapeMismatch {
                mat1: "theta",
                mat2: "parameters",
                dim1: 0,
                dim2: 0,
                shape1: theta.shape(),
                shape2: (self.parameters.len(), 1),
            });
        }
        let mut scaled = self.clone();
        match scaling {
            Scaling::Cas => {}
            Scaling::Cprs => {
                for s in scaled.samples.iter_mut() {
                    scale_columns(s, theta);
                }
            }
            Scaling::Ctrs => {
                let values = self
                    .outputs
                    .iter()
                    .map(|o| trajectory.output(o))
                    .collect::<Result<Vec<DVector<f64>>>>()?;
                let means = values
                    .iter()
                    .zip(&self.outputs)
                    .map(|(v, name)| {
                        if !v.iter().any(|y| *y == 0.) {
                            return Ok(None);
                        }
                        match v.mean() {
                            mean if mean == 0. => Err(Error::ZeroOutput {
                                output: name.clone(),
                            }),
                            mean => Ok(Some(mean)),
                        }
                    })
                    .collect::<Result<Vec<Option<f64>>>>()?;
                for (sample, s) in scaled.samples.iter_mut().enumerate() {
                    scale_columns(s, theta);
                    for (i, mut row) in s.row_iter_mut().enumerate() {
                        row /= means[i].unwrap_or(values[i][sample]);
                    }
                }
            }
        }
        Ok(scaled)
    }
}

fn scale_columns(s: &mut DMatrix<f64>, theta: &DVector<f64>) {
    for (j, mut col) in s.column_iter_mut().enumerate() {
        col *= theta[j];
    }
}

fn position(names: &[String], kind: &'static str, name: &str) -> Result<usize> {
    names
        .iter()
        .position(|n| n == name)
        .ok_or_else(|| Error::UnknownName {
            kind,
            name: name.to_string(),
        })
}

/// Trajectory and scaled sensitivities of one evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalSensitivity {
    /// Output values.
    pub trajectory: Trajectory,
    /// Scaled sensitivities.
    pub tensor: SensitivityTensor,
}

impl LocalSensitivity {
    /// Sensitivities of one output, one row per sample and one column per parameter.
    pub fn output_table(&self, output: &str) -> Result<DMatrix<f64>> {
        self.tensor.output_table(output)
    }
}

/// Analytic local sensitivities from the augmented system.
pub fn analytic_local_sensitivity(
    integrator: &Integrator,
    ctx: &EvaluationContext,
    scaling: Scaling,
) -> Result<LocalSensitivity> {
    let (trajectory, tensor) = integrator.sensitivities(ctx)?;
    let tensor = tensor.scaled(scaling, ctx.parameters(), &trajectory)?;
    Ok(LocalSensitivity { trajectory, tensor })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CompiledModel, ModelDefinition, Result, SolverOptions, SymbolicModel};
    use std::sync::Arc;

    const EQ_EPS: f64 = 1e-9;

    fn growth(factor: &str) -> Result<(Integrator, EvaluationContext)> {
        let definition = ModelDefinition::new("growth")
            .with_algebraic("y", &format!("{factor}*a*exp(-b*t) + c"))
            .with_parameter("a", 2.)
            .with_parameter("b", 0.4)
            .with_parameter("c", 0.5);
        let model = Arc::new(CompiledModel::new(SymbolicModel::new(definition)?)?);
        let ctx = EvaluationContext::new(
            model.symbolic().nominal_parameters(),
            DVector::zeros(0),
            SampleGrid::linspace("t", 0., 9., 10)?,
        );
        Ok((Integrator::new(model, SolverOptions::default()), ctx))
    }

    #[test]
    fn parameter_relative() -> Result<()> {
        let (integrator, ctx) = growth("1")?;
        let cas = analytic_local_sensitivity(&integrator, &ctx, Scaling::Cas)?;
        let cprs = analytic_local_sensitivity(&integrator, &ctx, Scaling::Cprs)?;
        let (cas, cprs) = (cas.output_table("y")?, cprs.output_table("y")?);
        for row in 0..cas.nrows() {
            assert!((cprs[(row, 0)] - 2. * cas[(row, 0)]).abs() < EQ_EPS);
            assert!((cprs[(row, 1)] - 0.4 * cas[(row, 1)]).abs() < EQ_EPS);
            assert!((cprs[(row, 2)] - 0.5 * cas[(row, 2)]).abs() < EQ_EPS);
        }
        Ok(())
    }

    #[test]
    fn total_relative_is_scale_free() -> Result<()> {
        // scaling the output by 5 also scales the offset c
        let (unit, ctx) = growth("1")?;
        let unit = analytic_local_sensitivity(&unit, &ctx, Scaling::Ctrs)?;
        let (scaled, _) = growth("5")?;
        let ctx = ctx.with_parameters(DVector::from_vec(vec![2., 0.4, 2.5]));
        let scaled = analytic_local_sensitivity(&scaled, &ctx, Scaling::Ctrs)?;

        let (unit, scaled) = (unit.output_table("y")?, scaled.output_table("y")?);
        for (u, s) in unit.iter().zip(scaled.iter()) {
            assert!((u - s).abs() < EQ_EPS);
        }
        Ok(())
    }

    #[test]
    fn zero_output() -> Result<()> {
        let (integrator, ctx) = growth("1")?;
        let ctx = ctx.with_parameters(DVector::from_vec(vec![0., 0.4, 0.]));
        assert_eq!(
            analytic_local_sensitivity(&integrator, &ctx, Scaling::Ctrs),
            Err(Error::ZeroOutput {
                output: "y".to_string()
            })
        );
        Ok(())
    }

    #[test]
    fn selection() -> Result<()> {
        let (integrator, ctx) = growth("1")?;
        let (_, tensor) = integrator.sensitivities(&ctx)?;
        let selected = tensor.select_parameters(&["c".to_string(), "a".to_string()])?;
        assert_eq!(selected.sample(3)[(0, 0)], 1.);
        assert_eq!(selected.sample(3)[(0, 1)], tensor.sample(3)[(0, 0)]);
        assert!(tensor.select_outputs(&["z".to_string()]).is_err());
        Ok(())
    }
}
