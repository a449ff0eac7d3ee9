use nalgebra::DVector;
use odesens::{
    CompiledModel, EvaluationContext, Experiment, Integrator, ModelDefinition, NumericalSensitivity,
    Procedure, Result, SampleGrid, Scaling, SolverOptions, SymbolicModel,
    analytic_local_sensitivity,
};
use std::sync::Arc;

const EQ_EPS: f64 = 1e-6;
const EQ_MAX_REL: f64 = 1e-4;

// Monod growth of biomass X on substrate S
fn monod() -> Result<(Arc<CompiledModel>, EvaluationContext)> {
    let definition = ModelDefinition::new("monod")
        .with_ode("X", "mu*X")
        .with_ode("S", "-mu*X/Y")
        .with_algebraic("mu", "mumax*S/(Ks+S)")
        .with_parameter("mumax", 0.4)
        .with_parameter("Ks", 0.5)
        .with_parameter("Y", 0.67);
    let model = Arc::new(CompiledModel::new(SymbolicModel::new(definition)?)?);
    let ctx = EvaluationContext::new(
        model.symbolic().nominal_parameters(),
        DVector::from_vec(vec![0.1, 10.]),
        SampleGrid::linspace("t", 0., 12., 25)?,
    );
    Ok((model, ctx))
}

#[test]
fn symbolic_and_dual_jacobians_agree() -> Result<()> {
    let (model, ctx) = monod()?;
    let symbolic = model.symbolic();
    let x = DVector::from_vec(vec![0.7, 3.2]);
    let theta = ctx.parameters();

    let dfdx = symbolic.eval_dfdx(1., &x, theta)?;
    let dual = symbolic.dual_state_jacobian(1., &x, theta)?;
    assert!((&dfdx - dual).norm() < EQ_EPS);

    // central differences of the right-hand side
    let mut fd = dfdx.clone();
    let h = 1e-6;
    for j in 0..x.len() {
        let (mut up, mut down) = (x.clone(), x.clone());
        up[j] += h;
        down[j] -= h;
        let f_up = model.eval_rhs(1., &up, theta)?;
        let f_down = model.eval_rhs(1., &down, theta)?;
        for i in 0..x.len() {
            fd[(i, j)] = (f_up[i] - f_down[i]) / (2. * h);
        }
    }
    assert!((&dfdx - fd).norm() < EQ_EPS);
    Ok(())
}

#[test]
fn analytic_matches_central_differences() -> Result<()> {
    let (model, ctx) = monod()?;
    let integrator = Integrator::new(model, SolverOptions::new().with_rtol(1e-11).with_atol(1e-13));
    let analytic = analytic_local_sensitivity(&integrator, &ctx, Scaling::Cas)?;
    let numeric = NumericalSensitivity::new(integrator)
        .with_perturbation(1e-5)
        .with_procedure(Procedure::Central)
        .numeric_local_sensitivity(&ctx, Scaling::Cas)?;

    for output in ["X", "S", "mu"] {
        let a = analytic.output_table(output)?;
        let n = numeric.sensitivity().output_table(output)?;
        assert!(
            (&a - &n).norm() <= EQ_MAX_REL * a.norm().max(1.),
            "{output}: {}",
            (&a - &n).norm()
        );
    }
    Ok(())
}

#[test]
fn experiment_criteria_report() -> Result<()> {
    let (model, ctx) = monod()?;
    let experiment = Experiment::new(model, ctx)
        .with_measured(&["X", "S"])?
        .with_error_model(
            odesens::ErrorModel::new()
                .with_law("X", odesens::ErrorLaw::Absolute { std_dev: 0.05 })
                .with_law("S", odesens::ErrorLaw::Relative { fraction: 0.02 }),
        );
    let fim = experiment.get_fim()?;
    assert_eq!(fim.shape(), (3, 3));
    assert!(fim.clone().symmetric_eigenvalues().iter().all(|l| *l > -EQ_EPS));

    let report = experiment.criteria()?;
    assert!(report.get(odesens::Criterion::D).is_some_and(|d| d > 0.));
    assert!(report.to_string().contains("modA"));

    let correlation = odesens::parameter_correlation(&fim)?;
    for i in 0..3 {
        assert!((correlation[(i, i)] - 1.).abs() < EQ_EPS);
    }
    Ok(())
}
