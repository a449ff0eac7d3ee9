use super::{is_singular, symmetric_eigenvalues};
use crate::{Error, Result};
use nalgebra::DMatrix;

/// Smallest eigenvalue.
pub(super) fn e_optimality(fim: &DMatrix<f64>) -> f64 {
    symmetric_eigenvalues(fim)
        .into_iter()
        .fold(f64::INFINITY, f64::min)
}

/// Ratio of largest and smallest eigenvalue.
pub(super) fn mod_e_optimality(fim: &DMatrix<f64>) -> Result<f64> {
    let eigs = symmetric_eigenvalues(fim);
    if is_singular(&eigs) {
        return Err(Error::SingularMatrix { mat: "fim" });
    }
    let max = eigs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let min = eigs.iter().copied().fold(f64::INFINITY, f64::min);
    Ok(max / min)
}
