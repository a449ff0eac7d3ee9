use faer::Mat;
use faer_ext::IntoFaer;
use nalgebra::DMatrix;

#[cfg_attr(doc, katexit::katexit)]
/// D-Optimality is defined as the determinant of the fisher-information matrix
///
/// $$ D := \det \mathcal{M}. $$
pub(super) fn d_optimality(fim: &DMatrix<f64>) -> f64 {
    let fim: Mat<f64> = fim.view_range(.., ..).into_faer().to_owned();
    fim.determinant()
}
