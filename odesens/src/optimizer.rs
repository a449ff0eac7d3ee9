use crate::{
    Criterion, Design, DesignSpace, DesignVariable, Error, Experiment, Goal, Result, VariableKind,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

// Standard deviation of gaussian mutations relative to the variable range.
const MUTATION_SCALE: f64 = 0.1;

/// Population based search strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Approach {
    /// Particle swarm with a global best topology.
    #[default]
    ParticleSwarm,
    /// Tournament selection, heuristic crossover and gaussian mutation.
    Evolutionary,
    /// Gaussian moves accepted with the Metropolis rule under a cooling temperature.
    SimulatedAnnealing,
}

/// Options of a [StochasticOptimizer].
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct OptimizerOptions {
    /// Search strategy.
    #[serde(default)]
    pub approach: Approach,
    /// Individuals per generation.
    #[serde(default = "default_pop_size")]
    pub pop_size: usize,
    /// Objective evaluations after which the search stops.
    #[serde(default = "default_max_evaluations")]
    pub max_evaluations: usize,
    /// Seed of the random number generator.
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Particle swarm inertia.
    #[serde(default = "default_inertia")]
    pub inertia: f64,
    /// Particle swarm attraction towards the personal best.
    #[serde(default = "default_rate")]
    pub cognitive_rate: f64,
    /// Particle swarm attraction towards the global best.
    #[serde(default = "default_rate")]
    pub social_rate: f64,
    /// Probability of mutating a gene.
    #[serde(default = "default_mutation_rate")]
    pub mutation_rate: f64,
    /// Probability of crossing two parents.
    #[serde(default = "default_crossover_rate")]
    pub crossover_rate: f64,
    /// Competitors per tournament.
    #[serde(default = "default_tournament_size")]
    pub tournament_size: usize,
    /// Initial annealing temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Relative temperature decrease per generation.
    #[serde(default = "default_cooling_rate")]
    pub cooling_rate: f64,
}

fn default_pop_size() -> usize {
    16
}

fn default_max_evaluations() -> usize {
    256
}

fn default_seed() -> u64 {
    347
}

fn default_inertia() -> f64 {
    0.5
}

fn default_rate() -> f64 {
    2.1
}

fn default_mutation_rate() -> f64 {
    0.1
}

fn default_crossover_rate() -> f64 {
    1.0
}

fn default_tournament_size() -> usize {
    2
}

fn default_temperature() -> f64 {
    100.
}

fn default_cooling_rate() -> f64 {
    0.01
}

impl Default for OptimizerOptions {
    fn default() -> Self {
        Self {
            approach: Approach::default(),
            pop_size: default_pop_size(),
            max_evaluations: default_max_evaluations(),
            seed: default_seed(),
            inertia: default_inertia(),
            cognitive_rate: default_rate(),
            social_rate: default_rate(),
            mutation_rate: default_mutation_rate(),
            crossover_rate: default_crossover_rate(),
            tournament_size: default_tournament_size(),
            temperature: default_temperature(),
            cooling_rate: default_cooling_rate(),
        }
    }
}

impl OptimizerOptions {
    /// Default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the search strategy.
    pub fn with_approach(mut self, approach: Approach) -> Self {
        self.approach = approach;
        self
    }

    /// Sets the population size.
    pub fn with_pop_size(mut self, pop_size: usize) -> Self {
        self.pop_size = pop_size;
        self
    }

    /// Sets the evaluation budget.
    pub fn with_max_evaluations(mut self, max_evaluations: usize) -> Self {
        self.max_evaluations = max_evaluations;
        self
    }

    /// Sets the seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// Candidate and its objective value.
#[derive(Debug, Clone, PartialEq)]
pub struct Individual {
    /// Position in the search space.
    pub candidate: Vec<f64>,
    /// Objective value, the goal's worst value if the evaluation failed.
    pub fitness: f64,
}

/// Final population of a search.
#[derive(Debug, Clone, PartialEq)]
pub struct Population {
    individuals: Vec<Individual>,
    evaluations: usize,
    generations: usize,
}

impl Population {
    /// Individuals sorted best first.
    pub fn individuals(&self) -> &[Individual] {
        &self.individuals
    }

    /// Best individual.
    pub fn best(&self) -> Option<&Individual> {
        self.individuals.first()
    }

    /// Number of objective evaluations.
    pub fn evaluations(&self) -> usize {
        self.evaluations
    }

    /// Number of generations after the initial one.
    pub fn generations(&self) -> usize {
        self.generations
    }
}

/// Bounded population based optimizer.
///
/// Candidates never leave their bounds. Failed or non-finite evaluations are penalized with the
/// worst value of the goal, so the search continues around them.
#[derive(Debug, Clone)]
pub struct StochasticOptimizer {
    bounds: Vec<(f64, f64)>,
    goal: Goal,
    options: OptimizerOptions,
}

impl StochasticOptimizer {
    /// Creates an optimizer over `bounds`, one `(lower, upper)` pair per dimension.
    pub fn new(bounds: Vec<(f64, f64)>, goal: Goal, options: OptimizerOptions) -> Result<Self> {
        if bounds.is_empty() {
            return Err(Error::MinValue {
                vector: "bounds",
                dim: 0,
                value: 0,
                ge_value: 1,
            });
        }
        if let Some((dim, (l, u))) = bounds
            .iter()
            .enumerate()
            .find(|(_, (l, u))| l >= u || !l.is_finite() || !u.is_finite())
        {
            return Err(Error::MinDistanceBetweenVectors {
                vector1: "lower",
                vector2: "upper",
                dim,
                distance: u - l,
                gt_distance: 0.,
            });
        }
        if options.pop_size < 2 {
            return Err(Error::MinValue {
                vector: "pop_size",
                dim: 0,
                value: options.pop_size,
                ge_value: 2,
            });
        }
        Ok(Self {
            bounds,
            goal,
            options,
        })
    }

    /// Search bounds.
    pub fn bounds(&self) -> &[(f64, f64)] {
        &self.bounds
    }

    /// Options.
    pub fn options(&self) -> &OptimizerOptions {
        &self.options
    }

    /// Runs the search until the evaluation budget is spent.
    pub fn optimize<F>(&self, objective: F) -> Result<Population>
    where
        F: Fn(&[f64]) -> Result<f64> + Sync,
    {
        let mut rng = StdRng::seed_from_u64(self.options.seed);
        let initial: Vec<Vec<f64>> = (0..self.options.pop_size)
            .map(|_| {
                self.bounds
                    .iter()
                    .map(|(l, u)| rng.random_range(*l..=*u))
                    .collect()
            })
            .collect();
        let mut search = Search {
            optimizer: self,
            objective: &objective,
            evaluations: 0,
            generations: 0,
        };
        let population = search.evaluate(initial);
        let mut individuals = match self.options.approach {
            Approach::ParticleSwarm => search.particle_swarm(population, &mut rng)?,
            Approach::Evolutionary => search.evolutionary(population, &mut rng)?,
            Approach::SimulatedAnnealing => search.simulated_annealing(population, &mut rng)?,
        };
        individuals.sort_by(|a, b| self.compare(a.fitness, b.fitness));
        info!(
            evaluations = search.evaluations,
            generations = search.generations,
            best = individuals.first().map(|i| i.fitness),
            "search finished"
        );
        Ok(Population {
            individuals,
            evaluations: search.evaluations,
            generations: search.generations,
        })
    }

    fn compare(&self, a: f64, b: f64) -> std::cmp::Ordering {
        self.goal.loss(a).total_cmp(&self.goal.loss(b))
    }

    fn clamp(&self, x: &mut [f64]) {
        for (v, (l, u)) in x.iter_mut().zip(&self.bounds) {
            *v = v.clamp(*l, *u);
        }
    }

    fn mutate(&self, x: &mut [f64], rate: f64, rng: &mut StdRng) -> Result<()> {
        for (v, (l, u)) in x.iter_mut().zip(&self.bounds) {
            if rng.random::<f64>() < rate {
                *v += gaussian((u - l) * MUTATION_SCALE)?.sample(rng);
            }
        }
        self.clamp(x);
        Ok(())
    }
}

fn gaussian(sd: f64) -> Result<Normal<f64>> {
    Normal::new(0., sd).map_err(|e| Error::Config {
        reason: e.to_string(),
    })
}

struct Search<'a, F> {
    optimizer: &'a StochasticOptimizer,
    objective: &'a F,
    evaluations: usize,
    generations: usize,
}

impl<F> Search<'_, F>
where
    F: Fn(&[f64]) -> Result<f64> + Sync,
{
    fn exhausted(&self) -> bool {
        self.evaluations >= self.optimizer.options.max_evaluations
    }

    fn evaluate(&mut self, candidates: Vec<Vec<f64>>) -> Vec<Individual> {
        let goal = self.optimizer.goal;
        let objective = self.objective;
        self.evaluations += candidates.len();
        candidates
            .into_par_iter()
            .map(|candidate| {
                let fitness = match objective(&candidate) {
                    Ok(v) if v.is_finite() => v,
                    Ok(v) => {
                        warn!(value = v, "non-finite objective penalized");
                        goal.worst()
                    }
                    Err(e) => {
                        warn!(%e, "failed candidate penalized");
                        goal.worst()
                    }
                };
                Individual { candidate, fitness }
            })
            .collect()
    }

    fn best<'b>(&self, individuals: &'b [Individual]) -> Option<&'b Individual> {
        individuals
            .iter()
            .min_by(|a, b| self.optimizer.compare(a.fitness, b.fitness))
    }

    fn particle_swarm(
        &mut self,
        mut particles: Vec<Individual>,
        rng: &mut StdRng,
    ) -> Result<Vec<Individual>> {
        let optimizer = self.optimizer;
        let opts = &optimizer.options;
        let goal = optimizer.goal;
        let dim = optimizer.bounds.len();
        let mut velocities = vec![vec![0.; dim]; particles.len()];
        let mut personal = particles.clone();

        while !self.exhausted() {
            let global = self
                .best(&personal)
                .map(|i| i.candidate.clone())
                .unwrap_or_default();
            let moved: Vec<Vec<f64>> = particles
                .iter()
                .zip(velocities.iter_mut())
                .zip(&personal)
                .map(|((p, v), best)| {
                    let mut x = p.candidate.clone();
                    for d in 0..dim {
                        let (r1, r2) = (rng.random::<f64>(), rng.random::<f64>());
                        v[d] = opts.inertia * v[d]
                            + opts.cognitive_rate * r1 * (best.candidate[d] - x[d])
                            + opts.social_rate * r2 * (global[d] - x[d]);
                        x[d] += v[d];
                    }
                    optimizer.clamp(&mut x);
                    x
                })
                .collect();
            particles = self.evaluate(moved);
            for (best, p) in personal.iter_mut().zip(&particles) {
                if goal.is_better(p.fitness, best.fitness) {
                    *best = p.clone();
                }
            }
            self.generations += 1;
            debug!(generation = self.generations, "particle swarm step");
        }
        Ok(personal)
    }

    fn evolutionary(
        &mut self,
        mut population: Vec<Individual>,
        rng: &mut StdRng,
    ) -> Result<Vec<Individual>> {
        let opts = self.optimizer.options.clone();
        let size = population.len();
        while !self.exhausted() {
            let offspring: Vec<Vec<f64>> = (0..size)
                .map(|_| {
                    let mom = self.tournament(&population, opts.tournament_size, rng);
                    let dad = self.tournament(&population, opts.tournament_size, rng);
                    let mut child = match rng.random::<f64>() < opts.crossover_rate {
                        true => self.heuristic_crossover(mom, dad, rng),
                        false => mom.candidate.clone(),
                    };
                    self.optimizer.mutate(&mut child, opts.mutation_rate, rng)?;
                    Ok(child)
                })
                .collect::<Result<Vec<_>>>()?;
            population.extend(self.evaluate(offspring));
            population.sort_by(|a, b| self.optimizer.compare(a.fitness, b.fitness));
            population.truncate(size);
            self.generations += 1;
            debug!(generation = self.generations, "evolutionary step");
        }
        Ok(population)
    }

    fn tournament<'b>(
        &self,
        population: &'b [Individual],
        size: usize,
        rng: &mut StdRng,
    ) -> &'b Individual {
        let mut winner = &population[rng.random_range(0..population.len())];
        for _ in 1..size.max(1) {
            let competitor = &population[rng.random_range(0..population.len())];
            if self.optimizer.goal.is_better(competitor.fitness, winner.fitness) {
                winner = competitor;
            }
        }
        winner
    }

    // The child lies beyond the better parent, on the line through both.
    fn heuristic_crossover(&self, a: &Individual, b: &Individual, rng: &mut StdRng) -> Vec<f64> {
        let (better, worse) = match self.optimizer.goal.is_better(b.fitness, a.fitness) {
            true => (b, a),
            false => (a, b),
        };
        let r = rng.random::<f64>();
        let mut child: Vec<f64> = better
            .candidate
            .iter()
            .zip(&worse.candidate)
            .map(|(x, y)| x + r * (x - y))
            .collect();
        self.optimizer.clamp(&mut child);
        child
    }

    fn simulated_annealing(
        &mut self,
        mut states: Vec<Individual>,
        rng: &mut StdRng,
    ) -> Result<Vec<Individual>> {
        let opts = self.optimizer.options.clone();
        let goal = self.optimizer.goal;
        let mut temperature = opts.temperature;
        let mut archive = states.clone();
        while !self.exhausted() {
            let moves = states
                .iter()
                .map(|s| {
                    let mut x = s.candidate.clone();
                    self.optimizer.mutate(&mut x, 1., rng)?;
                    Ok(x)
                })
                .collect::<Result<Vec<_>>>()?;
            let moved = self.evaluate(moves);
            for ((state, candidate), best) in states.iter_mut().zip(moved).zip(archive.iter_mut()) {
                let delta = goal.loss(candidate.fitness) - goal.loss(state.fitness);
                let accept = match delta <= 0. {
                    true => true,
                    false => temperature > 0. && rng.random::<f64>() < (-delta / temperature).exp(),
                };
                if accept {
                    *state = candidate;
                }
                if goal.is_better(state.fitness, best.fitness) {
                    *best = state.clone();
                }
            }
            temperature *= 1. - opts.cooling_rate;
            self.generations += 1;
            debug!(generation = self.generations, temperature, "annealing step");
        }
        Ok(archive)
    }
}

impl Experiment {
    /// Stochastic search for the design optimizing `criterion`.
    ///
    /// Sample times of ODE models have to lie on the canonical grid range, they are scored on
    /// the interpolated per-sample information.
    pub fn inspyred_optimize(
        &self,
        variables: Vec<DesignVariable>,
        samples: usize,
        criterion: Criterion,
        options: OptimizerOptions,
    ) -> Result<(Population, Design)> {
        let space = DesignSpace::new(self.model().symbolic(), variables, samples)?;
        self.check_sample_range(&space)?;
        let optimizer = StochasticOptimizer::new(space.bounds(), criterion.goal(), options)?;
        let population = optimizer.optimize(|x| {
            let design = space.decode(x)?;
            criterion.evaluate(&self.design_fim(&design)?)
        })?;
        let best = population
            .best()
            .filter(|i| i.fitness.is_finite())
            .ok_or(Error::NoFeasibleCandidate {
                criterion: criterion.name(),
            })?;
        let design = space.decode(&best.candidate)?;
        Ok((population, design))
    }

    pub(crate) fn check_sample_range(&self, space: &DesignSpace) -> Result<()> {
        if !self.model().symbolic().is_ode() {
            return Ok(());
        }
        let values = self.context().grid().values()?;
        let (Some(lower), Some(upper)) = (values.first(), values.last()) else {
            return Ok(());
        };
        for var in space.variables() {
            if var.kind() != VariableKind::Independent {
                continue;
            }
            for value in [var.lower(), var.upper()] {
                if value < *lower || value > *upper {
                    return Err(Error::DesignOutOfRange {
                        variable: var.name().to_string(),
                        value,
                        lower: *lower,
                        upper: *upper,
                    });
                }
            }
        }
        Ok(())
    }
}
