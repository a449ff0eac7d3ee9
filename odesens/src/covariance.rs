use crate::{Error, Result, Trajectory};
use nalgebra::{DMatrix, DVector};
use std::collections::BTreeMap;

#[cfg_attr(doc, katexit::katexit)]
/// Measurement error law of a single output.
///
/// Every law yields the variance $\sigma^2$ of a measurement $y$.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorLaw {
    /// Constant standard deviation, $\sigma^2$.
    Absolute {
        /// Standard deviation.
        std_dev: f64,
    },
    /// Standard deviation proportional to the measurement, $(f y)^2$.
    Relative {
        /// Proportionality factor.
        fraction: f64,
    },
    /// Relative error growing below a lower accuracy bound $l$,
    ///
    /// $$ \sigma = y e \left(1 + \frac{1}{(y/l)^2 + y/l}\right). $$
    Ternbach {
        /// Minimal relative error $e$.
        minimal_relative_error: f64,
        /// Lower accuracy bound $l$.
        lower_accuracy_bound: f64,
    },
    /// Variances given per sample.
    Direct {
        /// One variance per sample.
        variances: Vec<f64>,
    },
}

impl ErrorLaw {
    /// Variance of measurement `y` at sample `sample`.
    pub fn variance(&self, y: f64, sample: usize) -> f64 {
        match self {
            Self::Absolute { std_dev } => std_dev.powi(2),
            Self::Relative { fraction } => (fraction * y).powi(2),
            Self::Ternbach {
                minimal_relative_error,
                lower_accuracy_bound,
            } => {
                let r = y / lower_accuracy_bound;
                (y * minimal_relative_error * (1. + 1. / (r.powi(2) + r))).powi(2)
            }
            Self::Direct { variances } => variances.get(sample).copied().unwrap_or(f64::NAN),
        }
    }
}

/// Error laws by output name.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ErrorModel {
    laws: BTreeMap<String, ErrorLaw>,
}

impl ErrorModel {
    /// Empty error model.
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns the law of an output.
    pub fn with_law(mut self, output: &str, law: ErrorLaw) -> Self {
        self.laws.insert(output.to_string(), law);
        self
    }

    /// Law of an output.
    pub fn law(&self, output: &str) -> Result<&ErrorLaw> {
        self.laws.get(output).ok_or_else(|| Error::MissingErrorLaw {
            output: output.to_string(),
        })
    }
}

/// Measured (or predicted) outputs, one row per sample, `None` for missing data.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationTable {
    outputs: Vec<String>,
    rows: Vec<Vec<Option<f64>>>,
}

impl ObservationTable {
    /// Creates a table, every row must have one entry per output.
    pub fn new(outputs: Vec<String>, rows: Vec<Vec<Option<f64>>>) -> Result<Self> {
        if let Some(row) = rows.iter().find(|r| r.len() != outputs.len()) {
            return Err(Error::ShapeMismatch {
                mat1: "row",
                mat2: "outputs",
                dim1: 1,
                dim2: 1,
                shape1: (1, row.len()),
                shape2: (1, outputs.len()),
            });
        }
        Ok(Self { outputs, rows })
    }

    /// Predicted values of the `measured` outputs, fully observed.
    pub fn from_trajectory(trajectory: &Trajectory, measured: &[String]) -> Result<Self> {
        let columns = measured
            .iter()
            .map(|m| trajectory.output(m))
            .collect::<Result<Vec<_>>>()?;
        let rows = (0..trajectory.len())
            .map(|sample| columns.iter().map(|c| Some(c[sample])).collect())
            .collect();
        Ok(Self {
            outputs: measured.to_vec(),
            rows,
        })
    }

    /// Output names.
    pub fn outputs(&self) -> &[String] {
        &self.outputs
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// `true` if there are no samples.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Value of output `output` at sample `sample`.
    pub fn get(&self, sample: usize, output: usize) -> Option<f64> {
        self.rows.get(sample).and_then(|r| r.get(output).copied().flatten())
    }

    /// Sets or clears a single value.
    pub fn set(&mut self, sample: usize, output: usize, value: Option<f64>) {
        if let Some(v) = self.rows.get_mut(sample).and_then(|r| r.get_mut(output)) {
            *v = value;
        }
    }
}

/// Covariance of the outputs observed at one sample.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleCovariance {
    outputs: Vec<usize>,
    matrix: DMatrix<f64>,
}

impl SampleCovariance {
    /// Observed output positions of the covariance's table.
    pub fn outputs(&self) -> &[usize] {
        &self.outputs
    }

    /// Covariance matrix restricted to the observed outputs.
    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.matrix
    }
}

/// Measurement covariances per sample.
///
/// Samples without any observation have no entry. Outputs missing at a sample are left out of
/// that sample's matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorCovariance {
    outputs: Vec<String>,
    entries: BTreeMap<usize, SampleCovariance>,
    variances: Vec<Vec<Option<f64>>>,
}

impl ErrorCovariance {
    /// Evaluates the error laws on every observed value of the table.
    pub fn new(table: &ObservationTable, model: &ErrorModel) -> Result<Self> {
        let laws = table
            .outputs()
            .iter()
            .map(|o| model.law(o))
            .collect::<Result<Vec<_>>>()?;

        let mut variances = vec![vec![None; table.outputs().len()]; table.len()];
        let mut entries = BTreeMap::new();
        for (sample, row) in variances.iter_mut().enumerate() {
            let mut observed = vec![];
            for (output, law) in laws.iter().enumerate() {
                let Some(y) = table.get(sample, output) else {
                    continue;
                };
                let variance =
                    check_variance(law.variance(y, sample), &table.outputs()[output], sample)?;
                row[output] = Some(variance);
                observed.push((output, variance));
            }
            if !observed.is_empty() {
                let outputs = observed.iter().map(|(o, _)| *o).collect();
                let diag = observed.iter().map(|(_, v)| *v);
                let matrix = DMatrix::from_diagonal(&DVector::from_iterator(observed.len(), diag));
                entries.insert(sample, SampleCovariance { outputs, matrix });
            }
        }
        Ok(Self {
            outputs: table.outputs().to_vec(),
            entries,
            variances,
        })
    }

    /// Output names.
    pub fn outputs(&self) -> &[String] {
        &self.outputs
    }

    /// Number of samples, including samples without observations.
    pub fn len(&self) -> usize {
        self.variances.len()
    }

    /// `true` if there are no samples.
    pub fn is_empty(&self) -> bool {
        self.variances.is_empty()
    }

    /// Covariance of a sample, `None` if nothing is observed there.
    pub fn sample(&self, sample: usize) -> Option<&SampleCovariance> {
        self.entries.get(&sample)
    }

    /// Variance table, one row per sample and one column per output.
    pub fn variances(&self) -> &[Vec<Option<f64>>] {
        &self.variances
    }

    /// Overrides the variance of a single observed datum.
    pub fn set_error_datapoint(&mut self, sample: usize, output: &str, variance: f64) -> Result<()> {
        let out_idx = self
            .outputs
            .iter()
            .position(|o| o == output)
            .ok_or_else(|| Error::UnknownName {
                kind: "output",
                name: output.to_string(),
            })?;
        let unmeasured = || Error::UnmeasuredOutput {
            output: output.to_string(),
            sample,
        };
        let slot = self
            .variances
            .get_mut(sample)
            .and_then(|r| r[out_idx].as_mut())
            .ok_or_else(unmeasured)?;
        let entry = self.entries.get_mut(&sample).ok_or_else(unmeasured)?;
        let pos = entry
            .outputs
            .iter()
            .position(|o| *o == out_idx)
            .ok_or_else(unmeasured)?;

        let variance = check_variance(variance, output, sample)?;
        *slot = variance;
        entry.matrix[(pos, pos)] = variance;
        Ok(())
    }
}

fn check_variance(variance: f64, output: &str, sample: usize) -> Result<f64> {
    match variance.is_finite() && variance > 0. {
        true => Ok(variance),
        false => Err(Error::InvalidVariance {
            output: output.to_string(),
            sample,
            variance,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Result;

    fn table() -> Result<ObservationTable> {
        ObservationTable::new(
            vec!["A".to_string(), "B".to_string()],
            vec![
                vec![Some(2.), Some(4.)],
                vec![None, Some(1.)],
                vec![None, None],
            ],
        )
    }

    #[test]
    fn missing_data_is_excluded() -> Result<()> {
        let model = ErrorModel::new()
            .with_law("A", ErrorLaw::Absolute { std_dev: 0.5 })
            .with_law("B", ErrorLaw::Relative { fraction: 0.1 });
        let cov = ErrorCovariance::new(&table()?, &model)?;

        let first = cov.sample(0).unwrap();
        assert_eq!(first.outputs(), &[0, 1]);
        assert!((first.matrix()[(1, 1)] - 0.16).abs() < 1e-12);
        assert_eq!(first.matrix()[(0, 0)], 0.25);

        let second = cov.sample(1).unwrap();
        assert_eq!(second.outputs(), &[1]);
        assert_eq!(second.matrix().shape(), (1, 1));

        assert!(cov.sample(2).is_none());
        assert_eq!(cov.variances()[2], vec![None, None]);
        Ok(())
    }

    #[test]
    fn point_override() -> Result<()> {
        let model = ErrorModel::new()
            .with_law("A", ErrorLaw::Absolute { std_dev: 0.5 })
            .with_law("B", ErrorLaw::Absolute { std_dev: 1. });
        let mut cov = ErrorCovariance::new(&table()?, &model)?;
        cov.set_error_datapoint(1, "B", 3.)?;
        assert_eq!(cov.variances()[1][1], Some(3.));
        assert_eq!(cov.sample(1).map(|s| s.matrix()[(0, 0)]), Some(3.));

        assert_eq!(
            cov.set_error_datapoint(1, "A", 3.),
            Err(Error::UnmeasuredOutput {
                output: "A".to_string(),
                sample: 1
            })
        );
        assert!(cov.set_error_datapoint(0, "A", -1.).is_err());
        assert_eq!(cov.variances()[0][0], Some(0.25));
        Ok(())
    }

    #[test]
    fn laws() -> Result<()> {
        let ternbach = ErrorLaw::Ternbach {
            minimal_relative_error: 0.1,
            lower_accuracy_bound: 1.,
        };
        // sigma = 1 * 0.1 * (1 + 1/2)
        assert!((ternbach.variance(1., 0) - 0.0225).abs() < 1e-12);
        assert!(ternbach.variance(0., 0).is_nan());

        let direct = ErrorLaw::Direct {
            variances: vec![1., 2.],
        };
        assert_eq!(direct.variance(10., 1), 2.);
        assert!(direct.variance(10., 2).is_nan());

        assert_eq!(
            ErrorCovariance::new(&table()?, &ErrorModel::new()),
            Err(Error::MissingErrorLaw {
                output: "A".to_string()
            })
        );
        let relative = ErrorModel::new()
            .with_law("A", ErrorLaw::Relative { fraction: 0.1 })
            .with_law("B", ErrorLaw::Absolute { std_dev: 1. });
        let zero = ObservationTable::new(
            vec!["A".to_string(), "B".to_string()],
            vec![vec![Some(0.), None]],
        )?;
        assert_eq!(
            ErrorCovariance::new(&zero, &relative),
            Err(Error::InvalidVariance {
                output: "A".to_string(),
                sample: 0,
                variance: 0.
            })
        );
        Ok(())
    }
}
