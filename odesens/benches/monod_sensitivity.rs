use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use nalgebra::DVector;
use odesens::{
    CompiledModel, EvaluationContext, Integrator, ModelDefinition, NumericalSensitivity, Result,
    SampleGrid, Scaling, SolverOptions, SymbolicModel, analytic_local_sensitivity,
};
use std::{sync::Arc, time::Duration};

fn monod(samples: usize) -> Result<(Integrator, EvaluationContext)> {
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
        SampleGrid::linspace("t", 0., 12., samples)?,
    );
    Ok((Integrator::new(model, SolverOptions::default()), ctx))
}

fn benchmark_monod(c: &mut Criterion) {
    let mut group = c.benchmark_group("Monod Sensitivities");
    group.sample_size(10).warm_up_time(Duration::from_secs(1));
    for samples in [25, 100, 400] {
        let Ok((integrator, ctx)) = monod(samples) else {
            continue;
        };
        group.bench_with_input(BenchmarkId::new("Analytic", samples), &ctx, |b, ctx| {
            b.iter(|| analytic_local_sensitivity(&integrator, ctx, Scaling::Cas));
        });
        let numerical = NumericalSensitivity::new(integrator.clone());
        group.bench_with_input(BenchmarkId::new("Central", samples), &ctx, |b, ctx| {
            b.iter(|| numerical.numeric_local_sensitivity(ctx, Scaling::Cas));
        });
    }
    group.finish();
}

criterion_group!(benches, benchmark_monod);
criterion_main!(benches);
