use crate::{Error, ErrorCovariance, Result, SampleGrid, SensitivityTensor};
use nalgebra::DMatrix;
use tracing::warn;

#[cfg_attr(doc, katexit::katexit)]
/// Assembles the fisher-information matrix
///
/// $$ \mathcal{M} = \sum_t S_t^T Q_t^{-1} S_t + \mathcal{M}_0 $$
///
/// with sensitivities $S_t$ restricted to the outputs observed at sample $t$, their covariance
/// $Q_t$ and an optional prior $\mathcal{M}_0$.
#[derive(Debug, Clone)]
pub struct FimAssembler<'a> {
    tensor: &'a SensitivityTensor,
    covariance: &'a ErrorCovariance,
    rows: Vec<usize>,
    prior: Option<DMatrix<f64>>,
}

impl<'a> FimAssembler<'a> {
    /// Matches the covariance outputs against the tensor outputs.
    pub fn new(tensor: &'a SensitivityTensor, covariance: &'a ErrorCovariance) -> Result<Self> {
        if tensor.len() != covariance.len() {
            return Err(Error::ShapeMismatch {
                mat1: "sensitivities",
                mat2: "covariance",
                dim1: 0,
                dim2: 0,
                shape1: (tensor.len(), tensor.parameters().len()),
                shape2: (covariance.len(), covariance.outputs().len()),
            });
        }
        let rows = covariance
            .outputs()
            .iter()
            .map(|o| {
                tensor
                    .outputs()
                    .iter()
                    .position(|t| t == o)
                    .ok_or_else(|| Error::UnknownName {
                        kind: "output",
                        name: o.clone(),
                    })
            })
            .collect::<Result<Vec<usize>>>()?;
        Ok(Self {
            tensor,
            covariance,
            rows,
            prior: None,
        })
    }

    /// Adds a prior information matrix to [FimAssembler::fim].
    pub fn with_prior(mut self, prior: DMatrix<f64>) -> Result<Self> {
        let n = self.tensor.parameters().len();
        if prior.shape() != (n, n) {
            return Err(Error::ShapeMismatch {
                mat1: "prior",
                mat2: "fim",
                dim1: 0,
                dim2: 0,
                shape1: prior.shape(),
                shape2: (n, n),
            });
        }
        self.prior = Some(prior);
        Ok(self)
    }

    /// Contribution of a single sample, zero if nothing is observed there.
    pub fn contribution(&self, sample: usize) -> Result<DMatrix<f64>> {
        let n = self.tensor.parameters().len();
        let Some(cov) = self.covariance.sample(sample) else {
            return Ok(DMatrix::zeros(n, n));
        };
        let rows: Vec<usize> = cov.outputs().iter().map(|o| self.rows[*o]).collect();
        let s = self.tensor.sample(sample).select_rows(&rows);
        let q_inv = cov
            .matrix()
            .clone()
            .try_inverse()
            .ok_or(Error::SingularMatrix { mat: "covariance" })?;
        let m = s.transpose() * q_inv * &s;
        Ok((&m + m.transpose()) * 0.5)
    }

    /// Aggregated fisher-information matrix including the prior.
    pub fn fim(&self) -> Result<DMatrix<f64>> {
        let n = self.tensor.parameters().len();
        let mut fim = match &self.prior {
            Some(prior) => prior.clone(),
            None => DMatrix::zeros(n, n),
        };
        for sample in 0..self.tensor.len() {
            fim += self.contribution(sample)?;
        }
        self.warn_unobserved();
        Ok(fim)
    }

    /// Per-sample contributions without the prior.
    pub fn fim_time(&self) -> Result<FimTime> {
        let contributions = (0..self.tensor.len())
            .map(|sample| self.contribution(sample))
            .collect::<Result<Vec<_>>>()?;
        self.warn_unobserved();
        Ok(FimTime {
            grid: self.tensor.grid().clone(),
            contributions,
        })
    }

    fn warn_unobserved(&self) {
        let missing = (0..self.tensor.len())
            .filter(|s| self.covariance.sample(*s).is_none())
            .count();
        if missing > 0 {
            warn!(missing, "not all timesteps evaluated");
        }
    }
}

/// Fisher-information contributions per sample.
#[derive(Debug, Clone, PartialEq)]
pub struct FimTime {
    grid: SampleGrid,
    contributions: Vec<DMatrix<f64>>,
}

impl FimTime {
    /// Creates contributions aligned with `grid`.
    pub fn new(grid: SampleGrid, contributions: Vec<DMatrix<f64>>) -> Result<Self> {
        if grid.len() != contributions.len() {
            return Err(Error::ShapeMismatch {
                mat1: "contributions",
                mat2: "grid",
                dim1: 0,
                dim2: 1,
                shape1: (contributions.len(), 1),
                shape2: (1, grid.len()),
            });
        }
        Ok(Self {
            grid,
            contributions,
        })
    }

    /// Sample grid.
    pub fn grid(&self) -> &SampleGrid {
        &self.grid
    }

    /// Contribution per sample.
    pub fn contributions(&self) -> &[DMatrix<f64>] {
        &self.contributions
    }

    /// Sum of all contributions.
    pub fn total(&self) -> Option<DMatrix<f64>> {
        let mut iter = self.contributions.iter();
        let first = iter.next()?.clone();
        Some(iter.fold(first, |acc, m| acc + m))
    }

    /// Linear interpolation of the contributions of a one dimensional grid at `t`.
    pub fn interpolate(&self, t: f64) -> Result<DMatrix<f64>> {
        let values = self.grid.values()?;
        let (lower, upper) = match (values.first(), values.last()) {
            (Some(l), Some(u)) => (*l, *u),
            _ => {
                return Err(Error::InvalidGrid {
                    grid: self.grid.names().join(", "),
                    reason: "grid is empty",
                });
            }
        };
        if !(lower..=upper).contains(&t) {
            return Err(Error::DesignOutOfRange {
                variable: self.grid.names().join(", "),
                value: t,
                lower,
                upper,
            });
        }
        let idx = values.partition_point(|v| *v <= t);
        if idx == values.len() {
            return Ok(self.contributions[idx - 1].clone());
        }
        let (t0, t1) = (values[idx - 1], values[idx]);
        let w = (t - t0) / (t1 - t0);
        Ok(&self.contributions[idx - 1] * (1. - w) + &self.contributions[idx] * w)
    }
}

/// Parameter correlation matrix from the inverse of `fim`.
pub fn parameter_correlation(fim: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    let ecm = fim
        .clone()
        .try_inverse()
        .ok_or(Error::SingularMatrix { mat: "fim" })?;
    let n = ecm.nrows();
    if (0..n).any(|i| ecm[(i, i)] <= 0. || ecm[(i, i)].is_nan()) {
        return Err(Error::SingularMatrix { mat: "fim" });
    }
    Ok(DMatrix::from_fn(n, n, |i, j| {
        ecm[(i, j)] / (ecm[(i, i)] * ecm[(j, j)]).sqrt()
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ErrorLaw, ErrorModel, ObservationTable, Result};

    const EQ_EPS: f64 = 1e-9;

    fn tensor() -> Result<SensitivityTensor> {
        let grid = SampleGrid::from_values("t", &[0., 1., 2., 3.])?;
        let samples = vec![
            DMatrix::from_row_slice(2, 2, &[1., 0.5, 0., 2.]),
            DMatrix::from_row_slice(2, 2, &[0.3, -1., 1.5, 0.2]),
            DMatrix::from_row_slice(2, 2, &[4., 4., 1., 1.]),
            DMatrix::from_row_slice(2, 2, &[-2., 0.1, 0.7, 0.9]),
        ];
        SensitivityTensor::new(
            grid,
            vec!["A".to_string(), "B".to_string()],
            vec!["p".to_string(), "q".to_string()],
            samples,
        )
    }

    fn covariance(rows: Vec<Vec<Option<f64>>>) -> Result<ErrorCovariance> {
        let table = ObservationTable::new(vec!["B".to_string(), "A".to_string()], rows)?;
        let model = ErrorModel::new()
            .with_law("A", ErrorLaw::Absolute { std_dev: 0.5 })
            .with_law("B", ErrorLaw::Relative { fraction: 0.2 });
        ErrorCovariance::new(&table, &model)
    }

    #[test]
    fn symmetric_positive_semidefinite() -> Result<()> {
        let tensor = tensor()?;
        let cov = covariance(vec![vec![Some(1.), Some(3.)]; 4])?;
        let fim = FimAssembler::new(&tensor, &cov)?.fim()?;
        assert_eq!(fim, fim.transpose());
        let eigs = fim.clone().symmetric_eigenvalues();
        assert!(eigs.iter().all(|l| *l >= -EQ_EPS));
        Ok(())
    }

    #[test]
    fn unobserved_sample_contributes_nothing() -> Result<()> {
        let tensor = tensor()?;
        let rows = vec![
            vec![Some(1.), Some(3.)],
            vec![None, None],
            vec![Some(2.), None],
            vec![None, Some(1.)],
        ];
        let cov = covariance(rows)?;
        let assembler = FimAssembler::new(&tensor, &cov)?;
        assert_eq!(assembler.contribution(1)?, DMatrix::zeros(2, 2));

        // only B observed at sample 2, variance (0.2 * 2)^2
        let s = tensor.sample(2).row(1).into_owned();
        let expected = s.transpose() * &s / 0.16;
        assert!((assembler.contribution(2)? - expected).norm() < 1e-9);

        let fim_time = assembler.fim_time()?;
        let total = fim_time.total().unwrap();
        assert!((total - assembler.fim()?).norm() < EQ_EPS);
        Ok(())
    }

    #[test]
    fn order_independent() -> Result<()> {
        let tensor = tensor()?;
        let cov = covariance(vec![vec![Some(1.), Some(3.)]; 4])?;
        let fim_time = FimAssembler::new(&tensor, &cov)?.fim_time()?;
        let forward = fim_time.total().unwrap();
        let reversed = fim_time
            .contributions()
            .iter()
            .rev()
            .fold(DMatrix::zeros(2, 2), |acc, m| acc + m);
        assert!((forward - reversed).norm() < EQ_EPS);
        Ok(())
    }

    #[test]
    fn prior_and_interpolation() -> Result<()> {
        let tensor = tensor()?;
        let cov = covariance(vec![vec![Some(1.), Some(3.)]; 4])?;
        let assembler = FimAssembler::new(&tensor, &cov)?;
        let prior = DMatrix::identity(2, 2);
        let fim = assembler.clone().with_prior(prior.clone())?.fim()?;
        assert!((fim - assembler.fim()? - prior).norm() < EQ_EPS);

        let fim_time = assembler.fim_time()?;
        let mid = fim_time.interpolate(1.5)?;
        let expected = (&fim_time.contributions()[1] + &fim_time.contributions()[2]) * 0.5;
        assert!((mid - expected).norm() < EQ_EPS);
        assert_eq!(fim_time.interpolate(3.)?, fim_time.contributions()[3]);
        assert_eq!(
            fim_time.interpolate(4.),
            Err(Error::DesignOutOfRange {
                variable: "t".to_string(),
                value: 4.,
                lower: 0.,
                upper: 3.
            })
        );
        Ok(())
    }

    #[test]
    fn correlation() -> Result<()> {
        let fim = DMatrix::from_row_slice(2, 2, &[2., 1., 1., 2.]);
        let corr = parameter_correlation(&fim)?;
        assert!((corr[(0, 0)] - 1.).abs() < EQ_EPS);
        assert!((corr[(0, 1)] + 0.5).abs() < EQ_EPS);
        assert_eq!(
            parameter_correlation(&DMatrix::zeros(2, 2)),
            Err(Error::SingularMatrix { mat: "fim" })
        );
        // invertible but indefinite
        let indefinite = DMatrix::from_row_slice(2, 2, &[1., 2., 2., 1.]);
        assert_eq!(
            parameter_correlation(&indefinite),
            Err(Error::SingularMatrix { mat: "fim" })
        );
        Ok(())
    }
}
