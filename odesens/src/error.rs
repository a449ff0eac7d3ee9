/// Main error type
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    /// A vector contains a minimum value lower than required.
    #[error("minimal value for each value in vector {vector} is {ge_value}")]
    MinValue {
        /// Vector name
        vector: &'static str,
        /// Value constraint
        dim: usize,
        /// Value at position dim
        value: usize,
        /// Required minimum value
        ge_value: usize,
    },
    /// Minimal dimensional distance requirement is violated.
    #[error(
        "min distance between vectors {vector1} and {vector2} found on dim {dim} with {distance} but should > {gt_distance}"
    )]
    MinDistanceBetweenVectors {
        /// Name of vector1.
        vector1: &'static str,
        /// Name of vector2.
        vector2: &'static str,
        /// Dimension on which the distance requirement is violated.
        dim: usize,
        /// Found distance between dim-values of vector1 and vector2.
        distance: f64,
        /// Minimal required distance.
        gt_distance: f64,
    },
    /// Two given tensors do not have the same shape.
    #[error(
        "mat {mat1} with shape {shape1:?} and {mat2} with {shape2:?} have different len on dim {dim1} and {dim2}"
    )]
    ShapeMismatch {
        /// Name of matrix 1.
        mat1: &'static str,
        /// Name of matrix .
        mat2: &'static str,
        /// Affected shape of dimension on matrix 1.
        dim1: usize,
        /// Affected shape of dimension on matrix 2.
        dim2: usize,
        /// Shape of matrix 1.
        shape1: (usize, usize),
        /// Shape of matrix 2.
        shape2: (usize, usize),
    },
    /// An equation string could not be parsed.
    #[error("cannot parse expression '{expression}' at position {position}: {reason}")]
    Parse {
        /// Expression source.
        expression: String,
        /// Byte offset of the failure.
        position: usize,
        /// What went wrong.
        reason: &'static str,
    },
    /// Symbols used in equations that are neither parameters, states, algebraic nor independent
    /// variables.
    #[error("undefined symbols {symbols:?}")]
    UndefinedSymbols {
        /// Offending symbol names.
        symbols: Vec<String>,
    },
    /// A name is declared more than once.
    #[error("symbol {name} is declared more than once")]
    DuplicateSymbol {
        /// Declared name.
        name: String,
    },
    /// The algebraic substitution did not reach a fixpoint within its bound.
    #[error("non-resolvable algebraic system, unresolved variables {variables:?}")]
    NonResolvableAlgebraicSystem {
        /// Algebraic variables still referenced after substitution.
        variables: Vec<String>,
    },
    /// A name lookup failed.
    #[error("{kind} {name} does not exist")]
    UnknownName {
        /// Kind of the looked up entity.
        kind: &'static str,
        /// Requested name.
        name: String,
    },
    /// The model shape does not support the requested operation.
    #[error("model kind: {reason}")]
    ModelKind {
        /// What is not supported.
        reason: &'static str,
    },
    /// The independent sample grid is malformed.
    #[error("invalid grid {grid}: {reason}")]
    InvalidGrid {
        /// Grid name.
        grid: String,
        /// What is wrong.
        reason: &'static str,
    },
    /// The integrator did not reach the requested point.
    #[error("integration failed at {at}: {reason}")]
    Integration {
        /// Independent value at which integration failed.
        at: f64,
        /// Reported reason.
        reason: String,
    },
    /// A matrix that must be inverted is singular.
    #[error("matrix {mat} is singular")]
    SingularMatrix {
        /// Matrix name.
        mat: &'static str,
    },
    /// A measurement variance is not strictly positive or not finite.
    #[error("variance {variance} of output {output} at sample {sample} is invalid")]
    InvalidVariance {
        /// Output name.
        output: String,
        /// Sample index.
        sample: usize,
        /// Computed variance.
        variance: f64,
    },
    /// A measured output has no error law.
    #[error("output {output} has no error law")]
    MissingErrorLaw {
        /// Output name.
        output: String,
    },
    /// An operation refers to an output that is not measured at the given sample.
    #[error("output {output} is not measured at sample {sample}")]
    UnmeasuredOutput {
        /// Output name.
        output: String,
        /// Sample index.
        sample: usize,
    },
    /// Total relative sensitivity requires a non-zero output.
    #[error("output {output} is zero on the full grid")]
    ZeroOutput {
        /// Output name.
        output: String,
    },
    /// Accuracy diagnostics need both one sided estimates.
    #[error("accuracy criteria are only available for the central procedure")]
    AccuracyUnavailable,
    /// A design value lies outside of the evaluated range.
    #[error("design value {value} of {variable} is outside [{lower}, {upper}]")]
    DesignOutOfRange {
        /// Design variable name.
        variable: String,
        /// Requested value.
        value: f64,
        /// Lower limit.
        lower: f64,
        /// Upper limit.
        upper: f64,
    },
    /// Every candidate of a search failed to evaluate.
    #[error("no feasible candidate for criterion {criterion}")]
    NoFeasibleCandidate {
        /// Criterion name.
        criterion: &'static str,
    },
    /// Settings could not be read.
    #[error("config: {reason}")]
    Config {
        /// Reported reason.
        reason: String,
    },
}

/// Main result type
pub type Result<T> = std::result::Result<T, Error>;
