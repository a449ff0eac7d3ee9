use nalgebra::DVector;
use odesens::{
    AccuracyCriterion, CompiledModel, ErrorLaw, ErrorModel, EvaluationContext, Experiment,
    ModelDefinition, Procedure, Result, SampleGrid, Scaling, SymbolicModel,
};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

// dX/dt = mu * X
// dS/dt = -mu * X / Y
// mu = mumax * S / (Ks + S)
fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // symbolic model, jacobians are derived once on construction
    let definition = ModelDefinition::new("monod")
        .with_ode("X", "mu*X")
        .with_ode("S", "-mu*X/Y")
        .with_algebraic("mu", "mumax*S/(Ks+S)")
        .with_parameter("mumax", 0.4)
        .with_parameter("Ks", 0.5)
        .with_parameter("Y", 0.67);
    let model = Arc::new(CompiledModel::new(SymbolicModel::new(definition)?)?);

    // nominal parameters, initial state and sample times
    let ctx = EvaluationContext::new(
        model.symbolic().nominal_parameters(),
        DVector::from_vec(vec![0.1, 10.]),
        SampleGrid::linspace("t", 0., 12., 13)?,
    );

    let experiment = Experiment::new(model, ctx)
        .with_measured(&["X", "S"])?
        .with_error_model(
            ErrorModel::new()
                .with_law("X", ErrorLaw::Absolute { std_dev: 0.05 })
                .with_law("S", ErrorLaw::Relative { fraction: 0.02 }),
        );

    // total relative sensitivities of the biomass, one column per parameter
    let analytic = experiment.analytic_local_sensitivity(Scaling::Ctrs)?;
    println!("dX/dθ · θ/X {}", analytic.output_table("X")?);

    // central differences and their agreement with the one sided estimates
    let numeric = experiment.numeric_local_sensitivity(1e-6, Procedure::Central, Scaling::Ctrs)?;
    println!(
        "max relative error {}",
        numeric.accuracy(AccuracyCriterion::Mre)?
    );

    // criteria of the fisher-information matrix
    println!("{}", experiment.criteria()?);

    Ok(())
}
