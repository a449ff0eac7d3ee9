use super::{is_singular, symmetric_eigenvalues};
use crate::{Error, Result};
use faer::{Mat, Side, linalg::solvers::DenseSolveCore};
use faer_ext::IntoFaer;
use nalgebra::DMatrix;

#[cfg_attr(doc, katexit::katexit)]
/// A-Optimality is defined as the trace of the inverse fisher-information matrix
///
/// $$ A := \operatorname{tr} \mathcal{M}^{-1}. $$
pub(super) fn a_optimality(fim: &DMatrix<f64>) -> Result<f64> {
    if is_singular(&symmetric_eigenvalues(fim)) {
        return Err(Error::SingularMatrix { mat: "fim" });
    }
    let fim: Mat<f64> = fim.view_range(.., ..).into_faer().to_owned();
    let fim_inv = fim.lblt(Side::Lower).inverse();
    Ok(fim_inv.diagonal().column_vector().sum())
}

/// Trace of the fisher-information matrix.
pub(super) fn mod_a_optimality(fim: &DMatrix<f64>) -> f64 {
    fim.trace()
}
