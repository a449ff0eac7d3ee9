use crate::{
    Criterion, Design, DesignSpace, DesignVariable, Error, Experiment, Goal, Individual,
    OptimizerOptions, Result, StochasticOptimizer, VariableKind,
};
use tracing::info;

/// Robust design against parameter uncertainty.
///
/// Alternates between the design maximizing the smallest D value over a finite set of parameter
/// vectors and the parameter vector minimizing D for that design, which is added to the set.
/// The loop converges once the worst parameter vector is not worse than the set's worst case.
#[derive(Debug, Clone)]
pub struct Maximin<'a> {
    experiment: &'a Experiment,
    space: DesignSpace,
    parameters: DesignSpace,
    max_iterations: usize,
    options: OptimizerOptions,
}

/// Outcome of [Maximin::run].
#[derive(Debug, Clone, PartialEq)]
pub struct MaximinResult {
    /// Robust design.
    pub design: Design,
    /// Names of the uncertain parameters.
    pub parameter_names: Vec<String>,
    /// Parameter vectors considered, starting with the nominal one.
    pub parameter_sets: Vec<Vec<f64>>,
    /// Worst case D value of the best design per iteration, starting with 1.
    pub psi_independent: Vec<f64>,
    /// Smallest D value found by the parameter search per iteration, starting with 0.
    pub psi_parameter: Vec<f64>,
    /// Number of iterations.
    pub iterations: usize,
    /// `true` if the loop converged before the iteration cap.
    pub success: bool,
}

impl<'a> Maximin<'a> {
    /// Creates the loop for the design `variables` with `samples` designed samples and the
    /// uncertain `parameters`.
    pub fn new(
        experiment: &'a Experiment,
        variables: Vec<DesignVariable>,
        samples: usize,
        parameters: Vec<DesignVariable>,
    ) -> Result<Self> {
        let model = experiment.model().symbolic();
        if parameters.iter().any(|p| p.kind() != VariableKind::Parameter) {
            return Err(Error::ModelKind {
                reason: "uncertain variables have to be parameters",
            });
        }
        if let Some(p) = parameters
            .iter()
            .find(|p| variables.iter().any(|v| v.name() == p.name()))
        {
            return Err(Error::DuplicateSymbol {
                name: p.name().to_string(),
            });
        }
        let space = DesignSpace::new(model, variables, samples)?;
        experiment.check_sample_range(&space)?;
        Ok(Self {
            experiment,
            space,
            parameters: DesignSpace::new(model, parameters, 0)?,
            max_iterations: 100,
            options: OptimizerOptions::new().with_max_evaluations(1000),
        })
    }

    /// Sets the iteration cap.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Sets the options of both searches.
    pub fn with_options(mut self, options: OptimizerOptions) -> Self {
        self.options = options;
        self
    }

    /// Runs the loop.
    pub fn run(&self) -> Result<MaximinResult> {
        if self.max_iterations == 0 {
            return Err(Error::MinValue {
                vector: "max_iterations",
                dim: 0,
                value: 0,
                ge_value: 1,
            });
        }
        let model = self.experiment.model().symbolic();
        let names: Vec<String> = self
            .parameters
            .variables()
            .iter()
            .map(|p| p.name().to_string())
            .collect();
        let nominal = names
            .iter()
            .map(|n| Ok(self.experiment.context().parameters()[model.parameter_index(n)?]))
            .collect::<Result<Vec<f64>>>()?;

        let mut parameter_sets = vec![nominal];
        let mut psi_independent = vec![1.];
        let mut psi_parameter = vec![0.];
        let mut design = None;
        let mut iterations = 0;
        while !converged(&psi_parameter, &psi_independent) && iterations < self.max_iterations {
            let seed = self.options.seed + 2 * iterations as u64;

            let outer = StochasticOptimizer::new(
                self.space.bounds(),
                Goal::Maximize,
                self.options.clone().with_seed(seed),
            )?;
            let population = outer.optimize(|x| {
                let candidate = self.space.decode(x)?;
                parameter_sets
                    .iter()
                    .map(|theta| self.d_criterion(&candidate, &names, theta))
                    .try_fold(f64::INFINITY, |min, d| Ok(min.min(d?)))
            })?;
            let best = feasible(population.best())?;
            let robust = self.space.decode(&best.candidate)?;
            psi_independent.push(best.fitness);

            let inner = StochasticOptimizer::new(
                self.parameters.bounds(),
                Goal::Minimize,
                self.options.clone().with_seed(seed + 1),
            )?;
            let population = inner.optimize(|theta| self.d_criterion(&robust, &names, theta))?;
            let worst = feasible(population.best())?;
            psi_parameter.push(worst.fitness);
            if !parameter_sets.contains(&worst.candidate) {
                parameter_sets.push(worst.candidate.clone());
            }

            iterations += 1;
            info!(
                iteration = iterations,
                psi_independent = best.fitness,
                psi_parameter = worst.fitness,
                parameter_sets = parameter_sets.len(),
                "maximin iteration"
            );
            design = Some(robust);
        }

        let design = design.ok_or(Error::NoFeasibleCandidate {
            criterion: Criterion::D.name(),
        })?;
        Ok(MaximinResult {
            success: converged(&psi_parameter, &psi_independent),
            design,
            parameter_names: names,
            parameter_sets,
            psi_independent,
            psi_parameter,
            iterations,
        })
    }

    fn d_criterion(&self, design: &Design, names: &[String], theta: &[f64]) -> Result<f64> {
        let assignments = design
            .assignments()
            .iter()
            .cloned()
            .chain(names.iter().cloned().zip(theta.iter().copied()))
            .collect();
        let design = Design::new(
            assignments,
            design.independent().to_vec(),
            design.samples().to_vec(),
        )?;
        Criterion::D.evaluate(&self.experiment.design_fim(&design)?)
    }
}

// A zero worst case is never accepted as converged.
fn converged(psi_parameter: &[f64], psi_independent: &[f64]) -> bool {
    match (psi_parameter.last(), psi_independent.last()) {
        (Some(p), Some(i)) => *i > 0. && p >= i,
        _ => false,
    }
}

fn feasible(best: Option<&Individual>) -> Result<Individual> {
    best.filter(|i| i.fitness.is_finite())
        .cloned()
        .ok_or(Error::NoFeasibleCandidate {
            criterion: Criterion::D.name(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        CompiledModel, ErrorLaw, ErrorModel, EvaluationContext, ModelDefinition, SampleGrid,
        SymbolicModel,
    };
    use nalgebra::DVector;
    use std::sync::Arc;

    fn decay() -> Result<Experiment> {
        let definition = ModelDefinition::new("decay")
            .with_ode("X", "-k*X")
            .with_parameter("k", 0.25);
        let model = Arc::new(CompiledModel::new(SymbolicModel::new(definition)?)?);
        let ctx = EvaluationContext::new(
            model.symbolic().nominal_parameters(),
            DVector::from_vec(vec![4.]),
            SampleGrid::linspace("t", 0., 10., 21)?,
        );
        Ok(Experiment::new(model, ctx)
            .with_error_model(ErrorModel::new().with_law("X", ErrorLaw::Absolute { std_dev: 0.1 })))
    }

    #[test]
    fn worst_case_decay_rate() -> Result<()> {
        let experiment = decay()?;
        let t = DesignVariable::new("t", VariableKind::Independent, 0., 10.)?;
        let k = DesignVariable::new("k", VariableKind::Parameter, 0.2, 0.5)?;
        let result = Maximin::new(&experiment, vec![t], 1, vec![k])?
            .with_max_iterations(10)
            .with_options(OptimizerOptions::new().with_max_evaluations(320))
            .run()?;

        // D decreases with k, the robust sample time is 1/k_max
        assert!(result.success);
        assert!((result.design.samples()[0][0] - 2.).abs() < 0.15);
        assert_eq!(result.parameter_sets[0], vec![0.25]);
        assert!(result.parameter_sets.iter().skip(1).all(|p| p[0] > 0.45));
        assert_eq!(result.psi_independent.len(), result.iterations + 1);
        Ok(())
    }

    #[test]
    fn invalid_setup() -> Result<()> {
        let experiment = decay()?;
        let t = DesignVariable::new("t", VariableKind::Independent, 0., 10.)?;
        assert_eq!(
            Maximin::new(&experiment, vec![t.clone()], 1, vec![t.clone()]).map(|_| ()),
            Err(Error::ModelKind {
                reason: "uncertain variables have to be parameters"
            })
        );
        let k = DesignVariable::new("k", VariableKind::Parameter, 0.2, 0.5)?;
        assert_eq!(
            Maximin::new(&experiment, vec![k.clone()], 1, vec![k]).map(|_| ()),
            Err(Error::DuplicateSymbol {
                name: "k".to_string()
            })
        );
        Ok(())
    }
}
