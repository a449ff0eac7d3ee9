#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![doc = include_str!("../../README.md")]
mod covariance;
mod design;
mod error;
mod experiment;
mod fim;
mod grid;
mod integrator;
mod model;
mod numerical;
mod optimality;
mod optimizer;
mod robust;
mod sensitivity;
mod settings;
mod symbolic;
mod system;

pub use covariance::{ErrorCovariance, ErrorLaw, ErrorModel, ObservationTable, SampleCovariance};
pub use design::{
    BruteResult, Design, DesignSpace, DesignVariable, GreedySelection, VariableKind,
};
pub use error::{Error, Result};
pub use experiment::{Experiment, SensitivityMethod};
pub use fim::{FimAssembler, FimTime, parameter_correlation};
pub use grid::{MIN_GRID_POINTS, SampleGrid, cartesian_product, linspace};
pub use integrator::{EvaluationContext, Integrator, SolverOptions, Trajectory};
pub use model::{ModelDefinition, SymbolicModel};
pub use numerical::{
    AccuracyCriterion, NumericalResult, NumericalSensitivity, Procedure, QualityEntry,
};
pub use optimality::{CriteriaReport, Criterion, Goal};
pub use optimizer::{
    Approach, Individual, OptimizerOptions, Population, StochasticOptimizer,
};
pub use robust::{Maximin, MaximinResult};
pub use sensitivity::{LocalSensitivity, Scaling, SensitivityTensor, analytic_local_sensitivity};
pub use settings::{MaximinSettings, NumericalSettings, Settings, SolverSettings};
pub use symbolic::{BinaryOp, CompiledExpr, Env, Expr, ExprMatrix, Function, Symbol};
pub use system::CompiledModel;
