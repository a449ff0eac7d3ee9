use nalgebra::DVector;
use odesens::{
    CompiledModel, DesignVariable, ErrorLaw, ErrorModel, EvaluationContext, Experiment, Maximin,
    ModelDefinition, OptimizerOptions, Result, SampleGrid, SymbolicModel, VariableKind,
};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

// dX/dt = -k * X
fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let definition = ModelDefinition::new("decay")
        .with_ode("X", "-k*X")
        .with_parameter("k", 0.25);
    let model = Arc::new(CompiledModel::new(SymbolicModel::new(definition)?)?);

    // designed sample times are interpolated on this grid
    let ctx = EvaluationContext::new(
        model.symbolic().nominal_parameters(),
        DVector::from_vec(vec![4.]),
        SampleGrid::linspace("t", 0., 10., 101)?,
    );
    let experiment = Experiment::new(model, ctx)
        .with_error_model(ErrorModel::new().with_law("X", ErrorLaw::Absolute { std_dev: 0.1 }));

    // one sample time, decay rate uncertain within [0.2, 0.5]
    let t = DesignVariable::new("t", VariableKind::Independent, 0., 10.)?;
    let k = DesignVariable::new("k", VariableKind::Parameter, 0.2, 0.5)?;
    let result = Maximin::new(&experiment, vec![t], 1, vec![k])?
        .with_max_iterations(20)
        .with_options(OptimizerOptions::new().with_max_evaluations(500))
        .run()?;

    println!("{}", result.design);
    println!(
        "converged: {} after {} iterations, worst case parameters {:?}",
        result.success, result.iterations, result.parameter_sets
    );
    // the robust sample time approaches 1 / k_max = 2

    Ok(())
}
