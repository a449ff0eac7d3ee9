use crate::{
    Criterion, Error, EvaluationContext, Experiment, Result, SampleGrid, SymbolicModel,
    cartesian_product, linspace,
};
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use std::fmt::Display;
use tracing::{debug, info};

/// Marginal information left for a point drawn without replacement.
const DEFLATED: f64 = 1e-20;

/// What a design variable changes. The order is the order of the design vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum VariableKind {
    /// Model parameter.
    Parameter,
    /// Initial value of a state.
    Initial,
    /// Independent variable of the samples.
    Independent,
}

/// Bounded design variable.
#[derive(Debug, Clone, PartialEq)]
pub struct DesignVariable {
    name: String,
    kind: VariableKind,
    lower: f64,
    upper: f64,
}

impl DesignVariable {
    /// Creates a variable, `lower` has to be smaller than `upper`.
    pub fn new(name: &str, kind: VariableKind, lower: f64, upper: f64) -> Result<Self> {
        if lower >= upper {
            return Err(Error::MinDistanceBetweenVectors {
                vector1: "lower",
                vector2: "upper",
                dim: 0,
                distance: upper - lower,
                gt_distance: 0.,
            });
        }
        Ok(Self {
            name: name.to_string(),
            kind,
            lower,
            upper,
        })
    }

    /// Variable name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// What the variable changes.
    pub fn kind(&self) -> VariableKind {
        self.kind
    }

    /// Lower bound.
    pub fn lower(&self) -> f64 {
        self.lower
    }

    /// Upper bound.
    pub fn upper(&self) -> f64 {
        self.upper
    }

    fn check(&self, value: f64) -> Result<f64> {
        match (self.lower..=self.upper).contains(&value) {
            true => Ok(value),
            false => Err(Error::DesignOutOfRange {
                variable: self.name.clone(),
                value,
                lower: self.lower,
                upper: self.upper,
            }),
        }
    }
}

/// Design variables of a model and the number of designed samples.
///
/// Design vectors hold the parameter values first, then the initial values and finally the
/// independent values, sample after sample.
#[derive(Debug, Clone, PartialEq)]
pub struct DesignSpace {
    variables: Vec<DesignVariable>,
    samples: usize,
}

impl DesignSpace {
    /// Validates the variables against `model`. If any independent variable is designed, all
    /// of them have to be.
    pub fn new(model: &SymbolicModel, mut variables: Vec<DesignVariable>, samples: usize) -> Result<Self> {
        for (idx, var) in variables.iter().enumerate() {
            if variables[..idx].iter().any(|v| v.name == var.name) {
                return Err(Error::DuplicateSymbol {
                    name: var.name.clone(),
                });
            }
            match var.kind {
                VariableKind::Parameter => {
                    model.parameter_index(&var.name)?;
                }
                VariableKind::Initial if !model.is_ode() => {
                    return Err(Error::ModelKind {
                        reason: "algebraic models have no initial values",
                    });
                }
                VariableKind::Initial => {
                    model.state_index(&var.name)?;
                }
                VariableKind::Independent => {
                    if !model.independent().contains(&var.name) {
                        return Err(Error::UnknownName {
                            kind: "independent",
                            name: var.name.clone(),
                        });
                    }
                }
            }
        }
        let designed = variables
            .iter()
            .filter(|v| v.kind == VariableKind::Independent)
            .count();
        if designed > 0 && designed != model.independent().len() {
            return Err(Error::ModelKind {
                reason: "either all or no independent variables have to be designed",
            });
        }
        if designed > 0 && samples == 0 {
            return Err(Error::MinValue {
                vector: "samples",
                dim: 0,
                value: samples,
                ge_value: 1,
            });
        }
        variables.sort_by_key(|v| v.kind);
        Ok(Self { variables, samples })
    }

    /// Variables in design vector order.
    pub fn variables(&self) -> &[DesignVariable] {
        &self.variables
    }

    /// Number of designed samples.
    pub fn samples(&self) -> usize {
        self.samples
    }

    fn conditions(&self) -> impl Iterator<Item = &DesignVariable> {
        self.variables
            .iter()
            .filter(|v| v.kind != VariableKind::Independent)
    }

    fn independents(&self) -> impl Iterator<Item = &DesignVariable> {
        self.variables
            .iter()
            .filter(|v| v.kind == VariableKind::Independent)
    }

    /// Length of a design vector.
    pub fn dimension(&self) -> usize {
        self.conditions().count() + self.independents().count() * self.samples
    }

    /// Bounds of every design vector entry.
    pub fn bounds(&self) -> Vec<(f64, f64)> {
        let conditions = self.conditions().map(|v| (v.lower, v.upper));
        let independents: Vec<(f64, f64)> = self.independents().map(|v| (v.lower, v.upper)).collect();
        conditions
            .chain((0..self.samples).flat_map(|_| independents.iter().copied()))
            .collect()
    }

    /// Design of a design vector.
    pub fn decode(&self, x: &[f64]) -> Result<Design> {
        if x.len() != self.dimension() {
            return Err(Error::ShapeMismatch {
                mat1: "design vector",
                mat2: "design space",
                dim1: 0,
                dim2: 0,
                shape1: (x.len(), 1),
                shape2: (self.dimension(), 1),
            });
        }
        let conditions: Vec<&DesignVariable> = self.conditions().collect();
        let independents: Vec<&DesignVariable> = self.independents().collect();
        let (head, tail) = x.split_at(conditions.len());

        let assignments = conditions
            .iter()
            .zip(head)
            .map(|(v, x)| Ok((v.name.clone(), v.check(*x)?)))
            .collect::<Result<Vec<_>>>()?;
        let samples = match independents.is_empty() {
            true => vec![],
            false => tail
                .chunks(independents.len())
                .map(|point| {
                    independents
                        .iter()
                        .zip(point)
                        .map(|(v, x)| v.check(*x))
                        .collect::<Result<Vec<f64>>>()
                })
                .collect::<Result<Vec<_>>>()?,
        };
        Ok(Design {
            assignments,
            independent: independents.iter().map(|v| v.name.clone()).collect(),
            samples,
        })
    }
}

/// Values of the design variables of one experiment.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Design {
    assignments: Vec<(String, f64)>,
    independent: Vec<String>,
    samples: Vec<Vec<f64>>,
}

impl Design {
    /// Creates a design from parameter or initial values and sample points.
    pub fn new(
        assignments: Vec<(String, f64)>,
        independent: Vec<String>,
        samples: Vec<Vec<f64>>,
    ) -> Result<Self> {
        if let Some(point) = samples.iter().find(|p| p.len() != independent.len()) {
            return Err(Error::ShapeMismatch {
                mat1: "sample",
                mat2: "independent",
                dim1: 1,
                dim2: 1,
                shape1: (1, point.len()),
                shape2: (1, independent.len()),
            });
        }
        Ok(Self {
            assignments,
            independent,
            samples,
        })
    }

    /// Parameter and initial values by name.
    pub fn assignments(&self) -> &[(String, f64)] {
        &self.assignments
    }

    /// Names of the designed independent variables.
    pub fn independent(&self) -> &[String] {
        &self.independent
    }

    /// Sample points, empty if the samples are not designed.
    pub fn samples(&self) -> &[Vec<f64>] {
        &self.samples
    }
}

impl Display for Design {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let conditions: String = self
            .assignments
            .iter()
            .map(|(name, v)| format!("{name}\t{v:>+.4}"))
            .collect::<Vec<String>>()
            .join("\n");
        let samples: String = self
            .samples
            .iter()
            .map(|p| {
                let values = p
                    .iter()
                    .map(|v| format!("{:>+.4}", v))
                    .collect::<Vec<String>>()
                    .join(", ");
                format!("[ {values} ]")
            })
            .collect::<Vec<String>>()
            .join("\n");
        let header = format!("Samples [ {} ]", self.independent.join(", "));
        write!(
            f,
            "{:-^1$}\n{conditions}\n{header}\n{samples}",
            " Design ", 28
        )
    }
}

#[cfg_attr(doc, katexit::katexit)]
/// Greedy selection of the most informative candidates.
///
/// Every step picks the candidate $j$ optimizing the criterion of
/// $\mathcal{M}_{cum} + \mathcal{M}_j$ and adds $\mathcal{M}_j$ to $\mathcal{M}_{cum}$.
/// Without replacement the contribution of a picked candidate is deflated and the candidate
/// is not eligible anymore. Repeated calls of [GreedySelection::select] continue from the
/// current cumulative matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct GreedySelection {
    base: Vec<DMatrix<f64>>,
    criterion: Criterion,
    replacement: bool,
    cumulative: DMatrix<f64>,
    eligible: Vec<bool>,
    selected: Vec<usize>,
}

impl GreedySelection {
    /// Creates a selection over per-candidate contributions of equal shape.
    pub fn new(contributions: Vec<DMatrix<f64>>, criterion: Criterion) -> Result<Self> {
        let shape = match contributions.first() {
            Some(c) => c.shape(),
            None => {
                return Err(Error::NoFeasibleCandidate {
                    criterion: criterion.name(),
                });
            }
        };
        if let Some(c) = contributions.iter().find(|c| c.shape() != shape) {
            return Err(Error::ShapeMismatch {
                mat1: "contribution",
                mat2: "contribution",
                dim1: 0,
                dim2: 0,
                shape1: c.shape(),
                shape2: shape,
            });
        }
        Ok(Self {
            eligible: vec![true; contributions.len()],
            base: contributions,
            criterion,
            replacement: false,
            cumulative: DMatrix::zeros(shape.0, shape.1),
            selected: vec![],
        })
    }

    /// Starts from prior information.
    pub fn with_prior(mut self, prior: DMatrix<f64>) -> Result<Self> {
        if prior.shape() != self.cumulative.shape() {
            return Err(Error::ShapeMismatch {
                mat1: "prior",
                mat2: "contribution",
                dim1: 0,
                dim2: 0,
                shape1: prior.shape(),
                shape2: self.cumulative.shape(),
            });
        }
        self.cumulative += prior;
        Ok(self)
    }

    /// Allows picking a candidate more than once.
    pub fn with_replacement(mut self, replacement: bool) -> Self {
        self.replacement = replacement;
        self
    }

    /// Picks `k` further candidates and returns their indices.
    pub fn select(&mut self, k: usize) -> Result<Vec<usize>> {
        let goal = self.criterion.goal();
        let mut picked = Vec::with_capacity(k);
        for _ in 0..k {
            let scores: Vec<Option<f64>> = self
                .base
                .par_iter()
                .zip(self.eligible.par_iter())
                .map(|(m, eligible)| match eligible {
                    true => self.criterion.evaluate(&(&self.cumulative + m)).ok(),
                    false => None,
                })
                .collect();
            let best = scores
                .iter()
                .enumerate()
                .filter_map(|(j, s)| s.map(|s| (j, s)))
                .fold(None, |best: Option<(usize, f64)>, (j, s)| match best {
                    Some((_, b)) if !goal.is_better(s, b) => best,
                    _ => Some((j, s)),
                });
            let Some((j, value)) = best else {
                return Err(Error::NoFeasibleCandidate {
                    criterion: self.criterion.name(),
                });
            };
            debug!(candidate = j, value, "greedy pick");

            self.cumulative += &self.base[j];
            if !self.replacement {
                self.base[j].fill(DEFLATED);
                self.eligible[j] = false;
            }
            self.selected.push(j);
            picked.push(j);
        }
        Ok(picked)
    }

    /// Cumulative information of the prior and all picks.
    pub fn cumulative(&self) -> &DMatrix<f64> {
        &self.cumulative
    }

    /// Every pick so far.
    pub fn selected(&self) -> &[usize] {
        &self.selected
    }
}

/// Samples picked by [Experiment::brute_oed].
#[derive(Debug, Clone, PartialEq)]
pub struct BruteResult {
    /// Column names of `samples`.
    pub names: Vec<String>,
    /// One row per picked sample.
    pub samples: DMatrix<f64>,
    /// Cumulative fisher-information matrix including the prior.
    pub fim: DMatrix<f64>,
}

impl Display for BruteResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let header = self.names.join("\t");
        let rows: String = self
            .samples
            .row_iter()
            .map(|r| {
                r.iter()
                    .map(|v| format!("{v:>+.4}"))
                    .collect::<Vec<String>>()
                    .join("\t")
            })
            .collect::<Vec<String>>()
            .join("\n");
        write!(f, "{:-^1$}\n{header}\n{rows}", " Experiments ", 28)
    }
}

impl Experiment {
    /// Canonical context with the parameter and initial values of `design`.
    pub fn context_for(&self, design: &Design) -> Result<EvaluationContext> {
        let model = self.model().symbolic();
        let mut parameters = self.context().parameters().clone();
        let mut initial = self.context().initial_state().clone();
        for (name, value) in design.assignments() {
            match model.parameter_index(name) {
                Ok(idx) => parameters[idx] = *value,
                Err(_) => initial[model.state_index(name)?] = *value,
            }
        }
        Ok(self
            .context()
            .clone()
            .with_parameters(parameters)
            .with_initial_state(initial))
    }

    /// Fisher-information matrix of a design including the prior.
    ///
    /// ODE models are integrated on the canonical grid, designed sample times are interpolated
    /// in between. Algebraic models are evaluated at the designed points directly.
    pub fn design_fim(&self, design: &Design) -> Result<DMatrix<f64>> {
        let ctx = self.context_for(design)?;
        if design.samples().is_empty() {
            return self.fim_for(&ctx);
        }
        if self.model().symbolic().is_ode() {
            let n = self.fim_parameters().len();
            let fim_time = self.fim_time_for(&ctx)?;
            let mut fim = self
                .prior_fim()
                .cloned()
                .unwrap_or_else(|| DMatrix::zeros(n, n));
            for point in design.samples() {
                fim += fim_time.interpolate(point[0])?;
            }
            return Ok(fim);
        }
        let names: Vec<&str> = design.independent().iter().map(String::as_str).collect();
        let samples = design.samples();
        let points = DMatrix::from_fn(names.len(), samples.len(), |row, col| samples[col][row]);
        self.fim_for(&ctx.with_grid(SampleGrid::from_points(&names, points)?))
    }

    /// Exhaustive evaluation of a design grid followed by a greedy pick of `k` samples.
    ///
    /// Every variable is rastered with its number of steps. Parameter and initial values form
    /// the cartesian product of conditions, each of which is evaluated on the independent grid
    /// (the canonical grid if no independent variable is rastered).
    pub fn brute_oed(
        &self,
        steps: &[(DesignVariable, usize)],
        k: usize,
        criterion: Criterion,
        replacement: bool,
    ) -> Result<BruteResult> {
        let model = self.model().symbolic();
        let variables: Vec<DesignVariable> = steps.iter().map(|(v, _)| v.clone()).collect();
        let space = DesignSpace::new(model, variables, k.max(1))?;

        let conditions: Vec<&DesignVariable> = space.conditions().collect();
        let condition_points = match conditions.is_empty() {
            true => DMatrix::zeros(0, 1),
            false => cartesian_product(
                &DVector::from_iterator(conditions.len(), conditions.iter().map(|v| v.lower)),
                &DVector::from_iterator(conditions.len(), conditions.iter().map(|v| v.upper)),
                &conditions
                    .iter()
                    .map(|v| step_count(steps, &v.name))
                    .collect::<Vec<usize>>(),
            )?,
        };
        let independents: Vec<&DesignVariable> = space.independents().collect();
        let (grid, skip) = self.brute_grid(&independents, steps)?;

        let evaluated = (0..condition_points.ncols())
            .into_par_iter()
            .map(|col| {
                let assignments = conditions
                    .iter()
                    .zip(condition_points.column(col).iter())
                    .map(|(v, x)| (v.name.clone(), *x))
                    .collect();
                let design = Design::new(assignments, vec![], vec![])?;
                let ctx = self.context_for(&design)?.with_grid(grid.clone());
                let fim_time = self.fim_time_for(&ctx)?;
                Ok(fim_time.contributions()[skip..].to_vec())
            })
            .collect::<Result<Vec<Vec<DMatrix<f64>>>>>()?;

        let names: Vec<String> = conditions
            .iter()
            .map(|v| v.name.clone())
            .chain(grid.names().iter().cloned())
            .collect();
        let n_points = grid.len() - skip;
        let mut rows = DMatrix::zeros(condition_points.ncols() * n_points, names.len());
        for col in 0..condition_points.ncols() {
            for point in 0..n_points {
                let condition_col = condition_points.column(col);
                let values = condition_col
                    .iter()
                    .copied()
                    .chain(grid.point(point + skip));
                for (c, v) in values.enumerate() {
                    rows[(col * n_points + point, c)] = v;
                }
            }
        }
        let contributions: Vec<DMatrix<f64>> = evaluated.into_iter().flatten().collect();
        info!(
            candidates = contributions.len(),
            criterion = criterion.name(),
            "evaluated brute force design grid"
        );

        let mut selection = GreedySelection::new(contributions, criterion)?.with_replacement(replacement);
        if let Some(prior) = self.prior_fim() {
            selection = selection.with_prior(prior.clone())?;
        }
        let picked = selection.select(k)?;
        Ok(BruteResult {
            names,
            samples: rows.select_rows(picked.iter()),
            fim: selection.cumulative().clone(),
        })
    }

    fn brute_grid(
        &self,
        independents: &[&DesignVariable],
        steps: &[(DesignVariable, usize)],
    ) -> Result<(SampleGrid, usize)> {
        if independents.is_empty() {
            return Ok((self.context().grid().clone(), 0));
        }
        let q: Vec<usize> = independents
            .iter()
            .map(|v| step_count(steps, &v.name))
            .collect();
        if let Some((dim, value)) = q.iter().enumerate().find(|(_, n)| **n < 2) {
            return Err(Error::MinValue {
                vector: "steps",
                dim,
                value: *value,
                ge_value: 2,
            });
        }
        if !self.model().symbolic().is_ode() {
            let names: Vec<&str> = independents.iter().map(|v| v.name.as_str()).collect();
            let lower = DVector::from_iterator(names.len(), independents.iter().map(|v| v.lower));
            let upper = DVector::from_iterator(names.len(), independents.iter().map(|v| v.upper));
            return Ok((SampleGrid::cartesian(&names, &lower, &upper, &q)?, 0));
        }

        // integration starts at the canonical initial point
        let var = independents[0];
        let mut values = linspace(var.lower, var.upper, q[0]);
        let t0 = self.context().grid().values()?.first().copied().unwrap_or(var.lower);
        let skip = match t0 < var.lower {
            true => {
                values.insert(0, t0);
                1
            }
            false => 0,
        };
        Ok((SampleGrid::from_values(&var.name, &values)?, skip))
    }
}

fn step_count(steps: &[(DesignVariable, usize)], name: &str) -> usize {
    steps
        .iter()
        .find(|(v, _)| v.name == name)
        .map_or(0, |(_, n)| *n)
}
