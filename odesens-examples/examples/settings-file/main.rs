use nalgebra::DVector;
use odesens::{
    CompiledModel, Criterion, DesignVariable, ErrorLaw, ErrorModel, EvaluationContext, Experiment,
    ModelDefinition, Result, SampleGrid, Settings, SymbolicModel, VariableKind,
};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

// v = Vmax * S / (Km + S)
fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // ODESENS_OPTIMIZER__SEED=3 overrides the file value
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/examples/settings-file/settings.toml");
    let settings = Settings::from_file(path)?;

    let definition = ModelDefinition::new("michaelis-menten")
        .with_algebraic("v", "Vmax*S/(Km+S)")
        .with_parameter("Vmax", 1.)
        .with_parameter("Km", 2.)
        .with_independent("S");
    let model = Arc::new(CompiledModel::new(SymbolicModel::new(definition)?)?);
    let ctx = EvaluationContext::new(
        model.symbolic().nominal_parameters(),
        DVector::zeros(0),
        SampleGrid::linspace("S", 0.1, 20., 50)?,
    );
    let experiment = Experiment::new(model, ctx)
        .with_error_model(ErrorModel::new().with_law("v", ErrorLaw::Absolute { std_dev: 0.05 }))
        .with_solver(settings.solver.options())
        .with_sensitivity_method(settings.numerical.sensitivity_method());

    let s = DesignVariable::new("S", VariableKind::Independent, 0.1, 20.)?;
    let (population, design) =
        experiment.inspyred_optimize(vec![s], 2, Criterion::D, settings.optimizer.clone())?;

    println!("{design}");
    println!(
        "D {:+.4e} after {} evaluations",
        population.best().map_or(f64::NAN, |b| b.fitness),
        population.evaluations()
    );
    // D-optimal support: S = 20 and S = Km * 20 / (2 Km + 20)

    Ok(())
}
