use crate::{
    CompiledModel, CriteriaReport, Criterion, ErrorCovariance, ErrorModel, Error, EvaluationContext,
    FimAssembler, FimTime, Integrator, LocalSensitivity, NumericalResult, NumericalSensitivity,
    ObservationTable, Procedure, Result, Scaling, SensitivityTensor, SolverOptions,
    analytic_local_sensitivity,
};
use nalgebra::DMatrix;
use std::sync::Arc;

/// How sensitivities entering the fisher-information matrix are computed.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum SensitivityMethod {
    /// Augmented system.
    #[default]
    Analytic,
    /// Finite differences.
    Numeric {
        /// Fractional perturbation.
        perturbation: f64,
        /// Finite-difference scheme.
        procedure: Procedure,
    },
}

/// Model, canonical evaluation context, measured outputs and error model of an experiment.
///
/// The canonical context is never changed. Information of other parameters, initial states or
/// sample grids is computed with [Experiment::fim_for], which always uses predicted outputs for
/// the covariance. Observations given with [Experiment::with_observations] only apply to the
/// canonical context.
#[derive(Debug, Clone)]
pub struct Experiment {
    integrator: Integrator,
    ctx: EvaluationContext,
    measured: Vec<String>,
    error_model: ErrorModel,
    observations: Option<ObservationTable>,
    prior_fim: Option<DMatrix<f64>>,
    fim_parameters: Vec<String>,
    sensitivity_method: SensitivityMethod,
}

impl Experiment {
    /// Measures every output and estimates every parameter by default.
    pub fn new(model: Arc<CompiledModel>, ctx: EvaluationContext) -> Self {
        let measured = model.symbolic().outputs();
        let fim_parameters = model.symbolic().parameters().to_vec();
        Self {
            integrator: Integrator::new(model, SolverOptions::default()),
            ctx,
            measured,
            error_model: ErrorModel::new(),
            observations: None,
            prior_fim: None,
            fim_parameters,
            sensitivity_method: SensitivityMethod::Analytic,
        }
    }

    /// Sets the measured outputs.
    pub fn with_measured(mut self, outputs: &[&str]) -> Result<Self> {
        let known = self.model().symbolic().outputs();
        self.measured = checked_names(outputs, &known, "output")?;
        Ok(self)
    }

    /// Sets the error model of the measured outputs.
    pub fn with_error_model(mut self, error_model: ErrorModel) -> Self {
        self.error_model = error_model;
        self
    }

    /// Uses measured data instead of predictions for the covariance of the canonical context.
    pub fn with_observations(mut self, observations: ObservationTable) -> Result<Self> {
        if observations.len() != self.ctx.grid().len() {
            return Err(Error::ShapeMismatch {
                mat1: "observations",
                mat2: "grid",
                dim1: 0,
                dim2: 1,
                shape1: (observations.len(), observations.outputs().len()),
                shape2: (1, self.ctx.grid().len()),
            });
        }
        self.observations = Some(observations);
        Ok(self)
    }

    /// Adds information of previous experiments.
    pub fn with_prior_fim(mut self, prior: DMatrix<f64>) -> Self {
        self.prior_fim = Some(prior);
        self
    }

    /// Restricts the fisher-information matrix to the given parameters.
    pub fn with_fim_parameters(mut self, parameters: &[&str]) -> Result<Self> {
        let known = self.model().symbolic().parameters().to_vec();
        self.fim_parameters = checked_names(parameters, &known, "parameter")?;
        Ok(self)
    }

    /// Sets how sensitivities are computed.
    pub fn with_sensitivity_method(mut self, method: SensitivityMethod) -> Self {
        self.sensitivity_method = method;
        self
    }

    /// Sets the integrator tolerances.
    pub fn with_solver(mut self, options: SolverOptions) -> Self {
        self.integrator = Integrator::new(self.integrator.model().clone(), options);
        self
    }

    /// The compiled model.
    pub fn model(&self) -> &Arc<CompiledModel> {
        self.integrator.model()
    }

    /// Canonical evaluation context.
    pub fn context(&self) -> &EvaluationContext {
        &self.ctx
    }

    /// Integrator used for every evaluation.
    pub fn integrator(&self) -> &Integrator {
        &self.integrator
    }

    /// Measured outputs.
    pub fn measured(&self) -> &[String] {
        &self.measured
    }

    /// Parameters of the fisher-information matrix.
    pub fn fim_parameters(&self) -> &[String] {
        &self.fim_parameters
    }

    /// Prior information.
    pub fn prior_fim(&self) -> Option<&DMatrix<f64>> {
        self.prior_fim.as_ref()
    }

    /// Analytic sensitivities of the canonical context.
    pub fn analytic_local_sensitivity(&self, scaling: Scaling) -> Result<LocalSensitivity> {
        analytic_local_sensitivity(&self.integrator, &self.ctx, scaling)
    }

    /// Finite-difference sensitivities of the canonical context.
    pub fn numeric_local_sensitivity(
        &self,
        perturbation: f64,
        procedure: Procedure,
        scaling: Scaling,
    ) -> Result<NumericalResult> {
        NumericalSensitivity::new(self.integrator.clone())
            .with_perturbation(perturbation)
            .with_procedure(procedure)
            .numeric_local_sensitivity(&self.ctx, scaling)
    }

    /// Fisher-information matrix of the canonical context including the prior.
    pub fn get_fim(&self) -> Result<DMatrix<f64>> {
        let (tensor, covariance) = self.tensor_and_covariance(&self.ctx, true)?;
        self.assembler(&tensor, &covariance)?.fim()
    }

    /// Per-sample fisher-information contributions of the canonical context.
    pub fn get_fim_time(&self) -> Result<FimTime> {
        let (tensor, covariance) = self.tensor_and_covariance(&self.ctx, true)?;
        self.assembler(&tensor, &covariance)?.fim_time()
    }

    /// Fisher-information matrix of another context including the prior.
    pub fn fim_for(&self, ctx: &EvaluationContext) -> Result<DMatrix<f64>> {
        let (tensor, covariance) = self.tensor_and_covariance(ctx, false)?;
        self.assembler(&tensor, &covariance)?.fim()
    }

    /// Per-sample fisher-information contributions of another context.
    pub fn fim_time_for(&self, ctx: &EvaluationContext) -> Result<FimTime> {
        let (tensor, covariance) = self.tensor_and_covariance(ctx, false)?;
        self.assembler(&tensor, &covariance)?.fim_time()
    }

    /// Single criterion of the canonical fisher-information matrix.
    pub fn criterion(&self, criterion: Criterion) -> Result<f64> {
        criterion.evaluate(&self.get_fim()?)
    }

    /// Every criterion of the canonical fisher-information matrix.
    pub fn criteria(&self) -> Result<CriteriaReport> {
        Ok(CriteriaReport::new(&self.get_fim()?))
    }

    fn assembler<'a>(
        &self,
        tensor: &'a SensitivityTensor,
        covariance: &'a ErrorCovariance,
    ) -> Result<FimAssembler<'a>> {
        let assembler = FimAssembler::new(tensor, covariance)?;
        match &self.prior_fim {
            Some(prior) => assembler.with_prior(prior.clone()),
            None => Ok(assembler),
        }
    }

    fn tensor_and_covariance(
        &self,
        ctx: &EvaluationContext,
        use_observations: bool,
    ) -> Result<(SensitivityTensor, ErrorCovariance)> {
        let (trajectory, tensor) = match self.sensitivity_method {
            SensitivityMethod::Analytic => self.integrator.sensitivities(ctx)?,
            SensitivityMethod::Numeric {
                perturbation,
                procedure,
            } => {
                let result = NumericalSensitivity::new(self.integrator.clone())
                    .with_perturbation(perturbation)
                    .with_procedure(procedure)
                    .numeric_local_sensitivity(ctx, Scaling::Cas)?;
                let LocalSensitivity { trajectory, tensor } = result.sensitivity().clone();
                (trajectory, tensor)
            }
        };
        let tensor = tensor
            .select_outputs(&self.measured)?
            .select_parameters(&self.fim_parameters)?;
        let table = match (&self.observations, use_observations) {
            (Some(observations), true) => observations.clone(),
            _ => ObservationTable::from_trajectory(&trajectory, &self.measured)?,
        };
        let covariance = ErrorCovariance::new(&table, &self.error_model)?;
        Ok((tensor, covariance))
    }
}

fn checked_names(names: &[&str], known: &[String], kind: &'static str) -> Result<Vec<String>> {
    names
        .iter()
        .map(|n| match known.iter().any(|k| k == n) {
            true => Ok(n.to_string()),
            false => Err(Error::UnknownName {
                kind,
                name: n.to_string(),
            }),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ErrorLaw, ModelDefinition, Result, SampleGrid, SymbolicModel};
    use nalgebra::DVector;

    fn decay() -> Result<Experiment> {
        let definition = ModelDefinition::new("decay")
            .with_ode("X", "-k*X")
            .with_algebraic("Y", "c*X")
            .with_parameter("k", 0.3)
            .with_parameter("c", 2.);
        let model = Arc::new(CompiledModel::new(SymbolicModel::new(definition)?)?);
        let ctx = EvaluationContext::new(
            model.symbolic().nominal_parameters(),
            DVector::from_vec(vec![4.]),
            SampleGrid::linspace("t", 0., 10., 11)?,
        );
        Ok(Experiment::new(model, ctx)
            .with_measured(&["X", "Y"])?
            .with_error_model(
                ErrorModel::new()
                    .with_law("X", ErrorLaw::Absolute { std_dev: 0.1 })
                    .with_law("Y", ErrorLaw::Relative { fraction: 0.05 }),
            ))
    }

    #[test]
    fn fim_matches_time_resolved_sum() -> Result<()> {
        let experiment = decay()?;
        let fim = experiment.get_fim()?;
        let total = experiment.get_fim_time()?.total().unwrap();
        assert!((&fim - total).norm() < 1e-9 * fim.norm());
        assert_eq!(fim.shape(), (2, 2));
        assert!(experiment.criterion(Criterion::D)? > 0.);
        Ok(())
    }

    #[test]
    fn numeric_fim_is_close() -> Result<()> {
        let experiment =
            decay()?.with_solver(SolverOptions::new().with_rtol(1e-11).with_atol(1e-12));
        let analytic = experiment.get_fim()?;
        let numeric = experiment
            .clone()
            .with_sensitivity_method(SensitivityMethod::Numeric {
                perturbation: 1e-6,
                procedure: Procedure::Central,
            })
            .get_fim()?;
        assert!((&analytic - numeric).norm() < 1e-3 * analytic.norm());
        Ok(())
    }

    #[test]
    fn restricted_fim() -> Result<()> {
        let experiment = decay()?.with_fim_parameters(&["k"])?;
        let fim = experiment
            .clone()
            .with_prior_fim(DMatrix::from_element(1, 1, 1.))
            .get_fim()?;
        assert_eq!(fim.shape(), (1, 1));
        assert!((fim[(0, 0)] - experiment.get_fim()?[(0, 0)] - 1.).abs() < 1e-9);
        assert_eq!(
            decay()?.with_measured(&["Z"]).map(|_| ()),
            Err(Error::UnknownName {
                kind: "output",
                name: "Z".to_string()
            })
        );
        Ok(())
    }

    #[test]
    fn observed_data() -> Result<()> {
        let experiment = decay()?;
        let mut rows = vec![vec![Some(1.), Some(2.)]; 11];
        rows[3] = vec![None, None];
        let table = ObservationTable::new(vec!["X".to_string(), "Y".to_string()], rows)?;
        let observed = experiment.clone().with_observations(table)?;
        let fim_time = observed.get_fim_time()?;
        assert_eq!(fim_time.contributions()[3], DMatrix::zeros(2, 2));
        assert!(observed.criteria()?.get(Criterion::D).is_some());
        Ok(())
    }
}
