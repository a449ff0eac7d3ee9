mod a_opt;
mod d_opt;
mod e_opt;
mod report;
use crate::{Error, Result};
use nalgebra::DMatrix;
pub use report::CriteriaReport;

// Eigenvalues below this fraction of the largest magnitude count as zero.
const SINGULAR_RTOL: f64 = 1e-12;

/// Direction of an optimization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Goal {
    /// Larger is better.
    Maximize,
    /// Smaller is better.
    Minimize,
}

impl Goal {
    /// `true` if `a` is strictly better than `b`.
    pub fn is_better(&self, a: f64, b: f64) -> bool {
        match self {
            Self::Maximize => a > b,
            Self::Minimize => a < b,
        }
    }

    /// Worst possible value, used to penalize failed evaluations.
    pub fn worst(&self) -> f64 {
        match self {
            Self::Maximize => f64::NEG_INFINITY,
            Self::Minimize => f64::INFINITY,
        }
    }

    /// Value to minimize, `-value` for maximizations.
    pub fn loss(&self, value: f64) -> f64 {
        match self {
            Self::Maximize => -value,
            Self::Minimize => value,
        }
    }
}

#[cfg_attr(doc, katexit::katexit)]
/// Scalar optimality criteria of a fisher-information matrix $\mathcal{M}$.
///
/// | Criterion | Value | Goal |
/// |---|---|---|
/// | A | $\operatorname{tr} \mathcal{M}^{-1}$ | minimize |
/// | modA | $\operatorname{tr} \mathcal{M}$ | maximize |
/// | D | $\det \mathcal{M}$ | maximize |
/// | E | $\lambda_{min}(\mathcal{M})$ | maximize |
/// | modE | $\lambda_{max}(\mathcal{M}) / \lambda_{min}(\mathcal{M})$ | minimize |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Criterion {
    /// Trace of the inverse.
    A,
    /// Trace.
    ModA,
    /// Determinant.
    #[default]
    D,
    /// Smallest eigenvalue.
    E,
    /// Condition number.
    ModE,
}

impl Criterion {
    /// Every criterion.
    pub const ALL: [Criterion; 5] = [Self::A, Self::ModA, Self::D, Self::E, Self::ModE];

    /// Short name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::A => "A",
            Self::ModA => "modA",
            Self::D => "D",
            Self::E => "E",
            Self::ModE => "modE",
        }
    }

    /// Whether the criterion is maximized or minimized.
    pub fn goal(&self) -> Goal {
        match self {
            Self::A | Self::ModE => Goal::Minimize,
            Self::ModA | Self::D | Self::E => Goal::Maximize,
        }
    }

    /// Evaluates the criterion, A and modE fail on singular matrices.
    pub fn evaluate(&self, fim: &DMatrix<f64>) -> Result<f64> {
        if !fim.is_square() {
            return Err(Error::ShapeMismatch {
                mat1: "fim",
                mat2: "fim",
                dim1: 0,
                dim2: 1,
                shape1: fim.shape(),
                shape2: fim.shape(),
            });
        }
        match self {
            Self::A => a_opt::a_optimality(fim),
            Self::ModA => Ok(a_opt::mod_a_optimality(fim)),
            Self::D => Ok(d_opt::d_optimality(fim)),
            Self::E => Ok(e_opt::e_optimality(fim)),
            Self::ModE => e_opt::mod_e_optimality(fim),
        }
    }
}

fn is_singular(eigenvalues: &[f64]) -> bool {
    let scale = eigenvalues.iter().fold(0., |m: f64, l| m.max(l.abs()));
    let min = eigenvalues.iter().copied().fold(f64::INFINITY, f64::min);
    scale == 0. || min <= SINGULAR_RTOL * scale
}

fn symmetric_eigenvalues(fim: &DMatrix<f64>) -> Vec<f64> {
    fim.clone().symmetric_eigenvalues().iter().copied().collect()
}
