use crate::{Error, Result};
use nalgebra::{DMatrix, DVector};

/// Minimal number of points of a [SampleGrid::linspace] grid.
pub const MIN_GRID_POINTS: usize = 10;

/// Samples of the independent variables.
///
/// Points are stored column-orientated, one row per independent variable.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleGrid {
    names: Vec<String>,
    points: DMatrix<f64>,
}

impl SampleGrid {
    /// Equidistant grid of `n` points in `[start, end]`.
    pub fn linspace(name: &str, start: f64, end: f64, n: usize) -> Result<Self> {
        if end <= start {
            return Err(Error::InvalidGrid {
                grid: name.to_string(),
                reason: "end must be greater than start",
            });
        }
        if n < MIN_GRID_POINTS {
            return Err(Error::InvalidGrid {
                grid: name.to_string(),
                reason: "at least 10 grid points are required",
            });
        }
        let values = linspace(start, end, n);
        Ok(Self {
            names: vec![name.to_string()],
            points: DMatrix::from_row_slice(1, n, &values),
        })
    }

    /// Grid of given values, which have to increase strictly.
    pub fn from_values(name: &str, values: &[f64]) -> Result<Self> {
        if values.is_empty() {
            return Err(Error::InvalidGrid {
                grid: name.to_string(),
                reason: "grid is empty",
            });
        }
        if values.windows(2).any(|w| w[1] <= w[0]) {
            return Err(Error::InvalidGrid {
                grid: name.to_string(),
                reason: "values must increase strictly",
            });
        }
        Ok(Self {
            names: vec![name.to_string()],
            points: DMatrix::from_row_slice(1, values.len(), values),
        })
    }

    /// Grid of arbitrary points, one row per name and one column per sample.
    pub fn from_points(names: &[&str], points: DMatrix<f64>) -> Result<Self> {
        if points.nrows() != names.len() {
            return Err(Error::ShapeMismatch {
                mat1: "points",
                mat2: "names",
                dim1: 0,
                dim2: 1,
                shape1: points.shape(),
                shape2: (1, names.len()),
            });
        }
        if points.ncols() == 0 {
            return Err(Error::InvalidGrid {
                grid: names.join(", "),
                reason: "grid is empty",
            });
        }
        Ok(Self {
            names: names.iter().map(|n| n.to_string()).collect(),
            points,
        })
    }

    /// Cubic grid defined by lower/upper bound and the dimensional sample number q, created with
    /// help of generating the cartesian product.
    pub fn cartesian(
        names: &[&str],
        lower: &DVector<f64>,
        upper: &DVector<f64>,
        q: &[usize],
    ) -> Result<Self> {
        let points = cartesian_product(lower, upper, q)?;
        Ok(Self {
            names: names.iter().map(|n| n.to_string()).collect(),
            points,
        })
    }

    /// Independent variable names.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Points, one column per sample.
    pub fn points(&self) -> &DMatrix<f64> {
        &self.points
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.points.ncols()
    }

    /// `true` if the grid has no samples.
    pub fn is_empty(&self) -> bool {
        self.points.ncols() == 0
    }

    /// Values of the independent variables at sample `idx`.
    pub fn point(&self, idx: usize) -> Vec<f64> {
        self.points.column(idx).iter().copied().collect()
    }

    /// Values of a one dimensional grid.
    pub fn values(&self) -> Result<Vec<f64>> {
        match self.points.nrows() {
            1 => Ok(self.points.row(0).iter().copied().collect()),
            _ => Err(Error::ModelKind {
                reason: "grid has more than one independent variable",
            }),
        }
    }

    /// Returns the grid without its first sample.
    pub fn without_first(&self) -> Self {
        if self.is_empty() {
            return self.clone();
        }
        Self {
            names: self.names.clone(),
            points: self.points.columns(1, self.len() - 1).into_owned(),
        }
    }
}

/// `n` equidistant values from `start` to `end` including both.
pub fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    match n {
        0 => vec![],
        1 => vec![start],
        _ => {
            let delta = (end - start) / (n as f64 - 1.);
            (0..n)
                .map(|i| match i == n - 1 {
                    true => end,
                    false => start + i as f64 * delta,
                })
                .collect()
        }
    }
}

/// Cartesian product of `q[d]` equidistant values per dimension `d`, column-orientated.
pub fn cartesian_product(
    lower: &DVector<f64>,
    upper: &DVector<f64>,
    q: &[usize],
) -> Result<DMatrix<f64>> {
    if lower.len() != upper.len() || lower.len() != q.len() {
        return Err(Error::ShapeMismatch {
            mat1: "lower",
            mat2: "upper",
            dim1: 0,
            dim2: 0,
            shape1: lower.shape(),
            shape2: upper.shape(),
        });
    }
    if let Some((q_min_dim, &q_min)) = q.iter().enumerate().min_by_key(|(_, v)| **v) {
        if q_min < 2 {
            return Err(Error::MinValue {
                vector: "q",
                dim: q_min_dim,
                value: q_min,
                ge_value: 2,
            });
        }
    }
    if !lower.is_empty() {
        let (dim, distance) = (upper - lower).argmin();
        if distance <= 0.0 {
            return Err(Error::MinDistanceBetweenVectors {
                vector1: "lower",
                vector2: "upper",
                dim,
                distance,
                gt_distance: 0.0,
            });
        }
    }

    let axes: Vec<Vec<f64>> = (0..q.len())
        .map(|d| linspace(lower[d], upper[d], q[d]))
        .collect();
    let columns = build_grid(&axes, vec![0.; q.len()], 0);
    let mut points = DMatrix::zeros(q.len(), columns.len());
    for (col, point) in columns.iter().enumerate() {
        points.column_mut(col).copy_from_slice(point);
    }
    Ok(points)
}

fn build_grid(axes: &[Vec<f64>], mut x: Vec<f64>, d: usize) -> Vec<Vec<f64>> {
    if d < axes.len() {
        let mut vec: Vec<Vec<f64>> = vec![];
        for v in &axes[d] {
            x[d] = *v;
            vec.extend(build_grid(axes, x.clone(), d + 1));
        }
        vec
    } else {
        vec![x]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Error, Result};

    #[test]
    fn grid() -> Result<()> {
        let lower = DVector::from_vec(vec![0., 0.]);
        let upper = DVector::from_vec(vec![1., 1.]);
        let grid = SampleGrid::cartesian(&["a", "b"], &lower, &upper, &[2, 2])?;

        let grid_rslt = DMatrix::from_vec(2, 4, vec![0., 0., 0., 1., 1., 0., 1., 1.]);
        assert_eq!(grid.points(), &grid_rslt);
        assert_eq!(grid.point(1), vec![0., 1.]);
        Ok(())
    }

    #[test]
    fn grid_bound() -> Result<()> {
        let lower = DVector::from_vec(vec![0., 0.]);
        let upper = DVector::from_vec(vec![1., 0.]);
        let grid = SampleGrid::cartesian(&["a", "b"], &lower, &upper, &[2, 2]);

        let grid_err = Err(Error::MinDistanceBetweenVectors {
            vector1: "lower",
            vector2: "upper",
            dim: 1,
            distance: 0.,
            gt_distance: 0.,
        });
        assert_eq!(grid, grid_err);
        Ok(())
    }

    #[test]
    fn grid_sample_size() -> Result<()> {
        let lower = DVector::from_vec(vec![0., 0.]);
        let upper = DVector::from_vec(vec![1., 1.]);
        let grid = SampleGrid::cartesian(&["a", "b"], &lower, &upper, &[2, 1]);

        let grid_err = Err(Error::MinValue {
            vector: "q",
            dim: 1,
            value: 1,
            ge_value: 2,
        });
        assert_eq!(grid, grid_err);
        Ok(())
    }

    #[test]
    fn linspace_guards() -> Result<()> {
        let grid = SampleGrid::linspace("t", 0., 9., 10)?;
        assert_eq!(grid.values()?, (0..10).map(|v| v as f64).collect::<Vec<_>>());
        assert_eq!(grid.without_first().len(), 9);

        assert_eq!(
            SampleGrid::linspace("t", 1., 1., 20),
            Err(Error::InvalidGrid {
                grid: "t".to_string(),
                reason: "end must be greater than start",
            })
        );
        assert_eq!(
            SampleGrid::linspace("t", 0., 1., 9),
            Err(Error::InvalidGrid {
                grid: "t".to_string(),
                reason: "at least 10 grid points are required",
            })
        );
        assert!(SampleGrid::from_values("t", &[0., 1., 1.]).is_err());
        Ok(())
    }

    #[test]
    fn scattered_points() -> Result<()> {
        let points = DMatrix::from_row_slice(2, 3, &[0., 2., 1., 5., 5., 3.]);
        let grid = SampleGrid::from_points(&["S", "pH"], points.clone())?;
        assert_eq!(grid.point(2), vec![1., 3.]);
        assert!(grid.values().is_err());
        assert_eq!(
            SampleGrid::from_points(&["S"], points),
            Err(Error::ShapeMismatch {
                mat1: "points",
                mat2: "names",
                dim1: 0,
                dim2: 1,
                shape1: (2, 3),
                shape2: (1, 1),
            })
        );
        Ok(())
    }
}
