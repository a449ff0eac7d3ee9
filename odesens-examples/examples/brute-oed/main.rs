use nalgebra::{DMatrix, DVector};
use odesens::{
    CompiledModel, Criterion, DesignVariable, ErrorLaw, ErrorModel, EvaluationContext, Experiment,
    ModelDefinition, Result, SampleGrid, SymbolicModel, VariableKind,
};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

// y = a * exp(-b * t)
fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let definition = ModelDefinition::new("exponential")
        .with_algebraic("y", "a*exp(-b*t)")
        .with_parameter("a", 1.)
        .with_parameter("b", 0.5);
    let model = Arc::new(CompiledModel::new(SymbolicModel::new(definition)?)?);
    let ctx = EvaluationContext::new(
        model.symbolic().nominal_parameters(),
        DVector::zeros(0),
        SampleGrid::linspace("t", 0., 10., 11)?,
    );

    // small prior keeps the first picks regular
    let experiment = Experiment::new(model, ctx)
        .with_error_model(ErrorModel::new().with_law("y", ErrorLaw::Absolute { std_dev: 0.1 }))
        .with_prior_fim(DMatrix::identity(2, 2) * 1e-8);

    // greedy selection of four samples out of 41 candidates without replacement
    let t = DesignVariable::new("t", VariableKind::Independent, 0., 10.)?;
    let result = experiment.brute_oed(&[(t, 41)], 4, Criterion::D, false)?;

    // picked samples in order of selection
    println!("{result}");
    println!("D {:+.4e}", Criterion::D.evaluate(&result.fim)?);

    Ok(())
}
