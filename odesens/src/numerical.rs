use crate::{
    EvaluationContext, Error, Integrator, LocalSensitivity, Result, Scaling, SensitivityTensor,
    Trajectory,
};
use nalgebra::DMatrix;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Finite-difference scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Procedure {
    /// `(y(θ(1+ε)) - y(θ(1-ε))) / 2εθ`, records both one sided estimates.
    #[default]
    Central,
    /// `(y(θ(1+ε)) - y(θ)) / εθ`
    Forward,
    /// `(y(θ) - y(θ(1-ε))) / εθ`
    Backward,
}

/// Comparison of the forward estimate `f` and the backward estimate `b` of a central run.
///
/// Relative criteria skip the first sample, where sensitivities of ODE models vanish, and every
/// sample with `f = 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccuracyCriterion {
    /// `mean((f - b)²)`
    Sse,
    /// `mean(|f - b|)`
    Sae,
    /// `max(|(f - b) / f|)`
    Mre,
    /// `mean(|1 - b / f|)`
    Sre,
    /// `max(|1 - b / f|)`
    Ratio,
}

impl AccuracyCriterion {
    /// Every criterion.
    pub const ALL: [AccuracyCriterion; 5] = [Self::Sse, Self::Sae, Self::Mre, Self::Sre, Self::Ratio];

    fn measure(&self, f: &[f64], b: &[f64]) -> f64 {
        let pairs = f.iter().zip(b);
        let relative = || {
            pairs
                .clone()
                .skip(1)
                .filter(|(f, _)| **f != 0.)
                .map(|(f, b)| (1. - b / f).abs())
        };
        match self {
            Self::Sse => mean(pairs.clone().map(|(f, b)| (f - b).powi(2))),
            Self::Sae => mean(pairs.clone().map(|(f, b)| (f - b).abs())),
            // |(f - b) / f| equals |1 - b / f|
            Self::Mre | Self::Ratio => relative().fold(0., f64::max),
            Self::Sre => mean(relative()),
        }
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0., 0usize), |(s, n), v| (s + v, n + 1));
    match n {
        0 => 0.,
        _ => sum / n as f64,
    }
}

/// Result of a finite-difference run.
#[derive(Debug, Clone, PartialEq)]
pub struct NumericalResult {
    procedure: Procedure,
    sensitivity: LocalSensitivity,
    forward: Option<SensitivityTensor>,
    backward: Option<SensitivityTensor>,
}

impl NumericalResult {
    /// Scheme used.
    pub fn procedure(&self) -> Procedure {
        self.procedure
    }

    /// Baseline trajectory and scaled sensitivities.
    pub fn sensitivity(&self) -> &LocalSensitivity {
        &self.sensitivity
    }

    /// Unscaled forward estimate, recorded by central runs.
    pub fn forward(&self) -> Option<&SensitivityTensor> {
        self.forward.as_ref()
    }

    /// Unscaled backward estimate, recorded by central runs.
    pub fn backward(&self) -> Option<&SensitivityTensor> {
        self.backward.as_ref()
    }

    /// Accuracy of the central estimate, one row per parameter and one column per output.
    pub fn accuracy(&self, criterion: AccuracyCriterion) -> Result<DMatrix<f64>> {
        let (Some(forward), Some(backward)) = (&self.forward, &self.backward) else {
            return Err(Error::AccuracyUnavailable);
        };
        let n_outputs = forward.outputs().len();
        let n_par = forward.parameters().len();
        let mut acc = DMatrix::zeros(n_par, n_outputs);
        for output in 0..n_outputs {
            for par in 0..n_par {
                let f: Vec<f64> = forward.samples().iter().map(|s| s[(output, par)]).collect();
                let b: Vec<f64> = backward.samples().iter().map(|s| s[(output, par)]).collect();
                acc[(par, output)] = criterion.measure(&f, &b);
            }
        }
        Ok(acc)
    }
}

/// Accuracy of one perturbation factor.
#[derive(Debug, Clone, PartialEq)]
pub struct QualityEntry {
    /// Perturbation factor.
    pub perturbation: f64,
    /// Applied criterion.
    pub criterion: AccuracyCriterion,
    /// Parameters × outputs.
    pub values: DMatrix<f64>,
}

/// Finite-difference local sensitivities, evaluating the full model at perturbed parameters.
///
/// Perturbations are fractional, parameter `θ_j` is moved by `ε θ_j`. Zero-valued parameters are
/// moved by `ε` instead.
#[derive(Debug, Clone)]
pub struct NumericalSensitivity {
    integrator: Integrator,
    perturbation: f64,
    parameter_perturbation: BTreeMap<String, f64>,
    procedure: Procedure,
}

impl NumericalSensitivity {
    /// Central differences with perturbation `1e-6`.
    pub fn new(integrator: Integrator) -> Self {
        Self {
            integrator,
            perturbation: 1e-6,
            parameter_perturbation: BTreeMap::new(),
            procedure: Procedure::Central,
        }
    }

    /// Sets the perturbation of all parameters without an individual one.
    pub fn with_perturbation(mut self, perturbation: f64) -> Self {
        self.perturbation = perturbation;
        self
    }

    /// Sets the perturbation of a single parameter.
    pub fn with_parameter_perturbation(mut self, name: &str, perturbation: f64) -> Self {
        self.parameter_perturbation
            .insert(name.to_string(), perturbation);
        self
    }

    /// Sets the finite-difference scheme.
    pub fn with_procedure(mut self, procedure: Procedure) -> Self {
        self.procedure = procedure;
        self
    }

    fn step(&self, name: &str, value: f64) -> f64 {
        let eps = self
            .parameter_perturbation
            .get(name)
            .copied()
            .unwrap_or(self.perturbation);
        match value == 0. {
            true => eps,
            false => eps * value,
        }
    }

    /// Local sensitivities of every output with respect to every parameter.
    pub fn numeric_local_sensitivity(
        &self,
        ctx: &EvaluationContext,
        scaling: Scaling,
    ) -> Result<NumericalResult> {
        let model = self.integrator.model().symbolic();
        if let Some(unknown) = self
            .parameter_perturbation
            .keys()
            .find(|k| !model.parameters().contains(*k))
        {
            return Err(Error::UnknownName {
                kind: "parameter",
                name: unknown.clone(),
            });
        }
        let baseline = self.integrator.trajectory(ctx)?;
        let theta = ctx.parameters();
        let steps: Vec<f64> = model
            .parameters()
            .iter()
            .zip(theta.iter())
            .map(|(n, v)| self.step(n, *v))
            .collect();

        let perturbed = |idx: usize, sign: f64| -> Result<Trajectory> {
            let mut theta = theta.clone();
            theta[idx] += sign * steps[idx];
            self.integrator
                .trajectory(&ctx.clone().with_parameters(theta))
        };
        let runs = (0..steps.len())
            .into_par_iter()
            .map(|idx| -> Result<(Option<Trajectory>, Option<Trajectory>)> {
                let up = match self.procedure {
                    Procedure::Central | Procedure::Forward => Some(perturbed(idx, 1.)?),
                    Procedure::Backward => None,
                };
                let down = match self.procedure {
                    Procedure::Central | Procedure::Backward => Some(perturbed(idx, -1.)?),
                    Procedure::Forward => None,
                };
                Ok((up, down))
            })
            .collect::<Result<Vec<_>>>()?;

        let difference = |upper: &[&DMatrix<f64>],
                          lower: &[&DMatrix<f64>],
                          factor: f64|
         -> Result<SensitivityTensor> {
            let samples = (0..baseline.len())
                .map(|sample| {
                    DMatrix::from_fn(baseline.outputs().len(), steps.len(), |output, par| {
                        (upper[par][(sample, output)] - lower[par][(sample, output)])
                            / (factor * steps[par])
                    })
                })
                .collect();
            SensitivityTensor::new(
                ctx.grid().clone(),
                baseline.outputs().to_vec(),
                model.parameters().to_vec(),
                samples,
            )
        };
        let base = vec![baseline.values(); steps.len()];
        let up: Vec<&DMatrix<f64>> = runs
            .iter()
            .map(|(u, _)| u.as_ref().map_or(baseline.values(), |t| t.values()))
            .collect();
        let down: Vec<&DMatrix<f64>> = runs
            .iter()
            .map(|(_, d)| d.as_ref().map_or(baseline.values(), |t| t.values()))
            .collect();

        let (tensor, forward, backward) = match self.procedure {
            Procedure::Central => (
                difference(&up, &down, 2.)?,
                Some(difference(&up, &base, 1.)?),
                Some(difference(&base, &down, 1.)?),
            ),
            Procedure::Forward => (difference(&up, &base, 1.)?, None, None),
            Procedure::Backward => (difference(&base, &down, 1.)?, None, None),
        };
        let tensor = tensor.scaled(scaling, theta, &baseline)?;
        Ok(NumericalResult {
            procedure: self.procedure,
            sensitivity: LocalSensitivity {
                trajectory: baseline,
                tensor,
            },
            forward,
            backward,
        })
    }

    /// Accuracy of central estimates for several perturbation factors.
    pub fn quality_scan(
        &self,
        ctx: &EvaluationContext,
        perturbations: &[f64],
        criteria: &[AccuracyCriterion],
    ) -> Result<Vec<QualityEntry>> {
        let mut entries = Vec::with_capacity(perturbations.len() * criteria.len());
        for perturbation in perturbations {
            let central = Self {
                perturbation: *perturbation,
                procedure: Procedure::Central,
                ..self.clone()
            };
            let result = central.numeric_local_sensitivity(ctx, Scaling::Cas)?;
            for criterion in criteria {
                entries.push(QualityEntry {
                    perturbation: *perturbation,
                    criterion: *criterion,
                    values: result.accuracy(*criterion)?,
                });
            }
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        CompiledModel, ModelDefinition, Result, SampleGrid, SolverOptions, SymbolicModel,
        analytic_local_sensitivity,
    };
    use nalgebra::DVector;
    use std::sync::Arc;

    fn monod() -> Result<(Integrator, EvaluationContext)> {
        let definition = ModelDefinition::new("monod")
            .with_ode("S", "-mu/Y*X")
            .with_ode("X", "mu*X")
            .with_algebraic("mu", "mu_max*S/(K_s + S)")
            .with_parameter("mu_max", 0.5)
            .with_parameter("K_s", 2.)
            .with_parameter("Y", 0.6);
        let model = Arc::new(CompiledModel::new(SymbolicModel::new(definition)?)?);
        let ctx = EvaluationContext::new(
            model.symbolic().nominal_parameters(),
            DVector::from_vec(vec![10., 0.2]),
            SampleGrid::linspace("t", 0., 10., 21)?,
        );
        let options = SolverOptions::default().with_rtol(1e-11).with_atol(1e-12);
        Ok((Integrator::new(model, options), ctx))
    }

    #[test]
    fn central_agrees_with_analytic() -> Result<()> {
        let (integrator, ctx) = monod()?;
        let analytic = analytic_local_sensitivity(&integrator, &ctx, Scaling::Cprs)?;
        let numeric = NumericalSensitivity::new(integrator)
            .with_perturbation(1e-5)
            .numeric_local_sensitivity(&ctx, Scaling::Cprs)?;

        for (a, n) in analytic
            .tensor
            .samples()
            .iter()
            .zip(numeric.sensitivity().tensor.samples())
        {
            for (a, n) in a.iter().zip(n.iter()) {
                assert!((a - n).abs() < 1e-4 * (1. + a.abs()), "{a} vs {n}");
            }
        }
        Ok(())
    }

    #[test]
    fn one_sided_has_no_accuracy() -> Result<()> {
        let (integrator, ctx) = monod()?;
        let forward = NumericalSensitivity::new(integrator)
            .with_procedure(Procedure::Forward)
            .numeric_local_sensitivity(&ctx, Scaling::Cas)?;
        assert_eq!(forward.procedure(), Procedure::Forward);
        assert!(forward.forward().is_none());
        assert_eq!(
            forward.accuracy(AccuracyCriterion::Sse),
            Err(Error::AccuracyUnavailable)
        );
        Ok(())
    }

    #[test]
    fn accuracy_criteria() -> Result<()> {
        let f = [0., 2., 4.];
        let b = [0., 1., 5.];
        assert_eq!(AccuracyCriterion::Sse.measure(&f, &b), 2. / 3.);
        assert_eq!(AccuracyCriterion::Sae.measure(&f, &b), 2. / 3.);
        assert_eq!(AccuracyCriterion::Mre.measure(&f, &b), 0.5);
        assert_eq!(AccuracyCriterion::Ratio.measure(&f, &b), 0.5);
        assert_eq!(AccuracyCriterion::Sre.measure(&f, &b), 0.375);
        Ok(())
    }

    #[test]
    fn quality_improves_with_smaller_perturbation() -> Result<()> {
        let (integrator, ctx) = monod()?;
        let scan = NumericalSensitivity::new(integrator)
            .with_parameter_perturbation("K_s", 1e-4)
            .quality_scan(&ctx, &[1e-2, 1e-4], &[AccuracyCriterion::Sae])?;
        assert_eq!(scan.len(), 2);
        assert_eq!(scan[0].values.shape(), (3, 3));
        // mu_max on X
        assert!(scan[1].values[(0, 1)] < scan[0].values[(0, 1)]);
        Ok(())
    }
}
