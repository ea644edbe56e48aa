//! Run orchestration: decide between cache hit, cache extension and a fresh
//! computation, drive the engine, and commit finished trajectories.

use crate::config::CacheConfig;
use crate::engine::{sample_row, Engine, EngineFactory};
use crate::error::{CacheError, Result};
use crate::index::{TrajectoryIndex, TrajectoryRecord};
use crate::params::{resolve, ParamSet, Params};
use crate::stats::StatTable;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{info, warn};

/// Owns the index, the engine factory and the random source used for seeds
/// and for picking among equivalent cached trajectories.
pub struct TrajectoryCache<F: EngineFactory> {
    index: TrajectoryIndex,
    factory: F,
    rng: StdRng,
}

/// How a [`RunDriver`] should be obtained.
#[derive(Debug, Clone)]
pub struct DriverRequest {
    pub params: ParamSet,
    /// Load this trajectory file directly. Takes precedence over `force_fresh`.
    pub file: Option<String>,
    /// Skip the lookup and always compute.
    pub force_fresh: bool,
    /// Pin unmentioned parameters to their defaults during lookup.
    pub use_defaults: bool,
}

impl DriverRequest {
    pub fn lookup(params: ParamSet) -> Self {
        Self {
            params,
            file: None,
            force_fresh: false,
            use_defaults: true,
        }
    }

    pub fn fresh(params: ParamSet) -> Self {
        Self {
            force_fresh: true,
            ..Self::lookup(params)
        }
    }

    pub fn from_file(file: impl Into<String>) -> Self {
        Self {
            file: Some(file.into()),
            ..Self::lookup(ParamSet::new())
        }
    }

    pub fn use_defaults(mut self, use_defaults: bool) -> Self {
        self.use_defaults = use_defaults;
        self
    }
}

impl<F: EngineFactory> TrajectoryCache<F> {
    pub fn open(config: &CacheConfig, factory: F) -> Result<Self> {
        Ok(Self {
            index: TrajectoryIndex::open(config)?,
            factory,
            rng: StdRng::from_entropy(),
        })
    }

    /// Replaces the entropy-seeded random source, for reproducible sessions.
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    pub fn index(&self) -> &TrajectoryIndex {
        &self.index
    }

    pub fn index_mut(&mut self) -> &mut TrajectoryIndex {
        &mut self.index
    }

    pub fn driver(&mut self, request: &DriverRequest) -> Result<RunDriver<F::Engine>> {
        if let Some(file) = &request.file {
            if request.force_fresh {
                warn!(file = %file, "both a file and force_fresh were requested; loading the file");
            }
            return self.load(file);
        }
        if request.force_fresh {
            return self.fresh(&request.params);
        }
        let mut criteria = request.params.clone();
        criteria
            .entry("steps".to_string())
            .or_insert(Params::DEFAULT.steps.into());
        match self
            .index
            .find_one(&criteria, request.use_defaults, &mut self.rng)?
        {
            Some(record) => self.load(&record.file),
            None => self.fresh(&request.params),
        }
    }

    /// A driver over a stored trajectory.
    pub fn load(&self, file: &str) -> Result<RunDriver<F::Engine>> {
        let (stored, table) = self.index.load_file(file)?;
        let params = Params::from_stored(&stored)?;
        let expected = params.sample_count(params.steps);
        if table.len() < expected {
            return Err(CacheError::format(format!(
                "{} holds {} samples but steps={} with interval={} needs {}",
                file,
                table.len(),
                params.steps,
                params.interval,
                expected
            )));
        }
        info!(file = %file, steps = params.steps, "loaded trajectory from cache");
        Ok(RunDriver {
            params,
            stats: table.clone(),
            stage: Stage::Loaded(table),
            source_file: Some(file.to_string()),
            record: None,
        })
    }

    /// A driver with a live engine and no cached data.
    pub fn fresh(&mut self, overrides: &ParamSet) -> Result<RunDriver<F::Engine>> {
        let params = resolve(overrides, &mut self.rng)?;
        let engine = self.build_engine(&params)?;
        info!(
            cost_units = params.cost_units(),
            estimated_seconds = params.estimated_seconds(),
            seed = params.seed,
            "simulation will be computed"
        );
        Ok(RunDriver {
            params,
            stats: StatTable::with_default_names(),
            stage: Stage::Fresh(engine),
            source_file: None,
            record: None,
        })
    }

    fn build_engine(&self, params: &Params) -> Result<F::Engine> {
        Ok(self.factory.build(&params.engine_args())?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    /// Live engine, nothing computed yet.
    Fresh,
    /// Backed by a stored trajectory.
    Loaded,
    /// Computed and persisted; `run` may not be called again.
    Completed,
}

enum Stage<E> {
    Fresh(E),
    Loaded(StatTable),
    Completed,
}

enum Plan {
    Serve(Option<usize>),
    Compute(u64),
    Extend(u64),
}

/// One trajectory request. A driver built fresh (or extended) supports a
/// single `run`; calling it again is a caller error. Drivers served from
/// cache may be read repeatedly.
pub struct RunDriver<E> {
    params: Params,
    stats: StatTable,
    stage: Stage<E>,
    source_file: Option<String>,
    record: Option<TrajectoryRecord>,
}

impl<E: Engine> RunDriver<E> {
    pub fn state(&self) -> DriverState {
        match self.stage {
            Stage::Fresh(_) => DriverState::Fresh,
            Stage::Loaded(_) => DriverState::Loaded,
            Stage::Completed => DriverState::Completed,
        }
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Statistics as of the last `run` (the full stored table before one).
    pub fn stats(&self) -> &StatTable {
        &self.stats
    }

    pub fn engine(&self) -> Option<&E> {
        match &self.stage {
            Stage::Fresh(engine) => Some(engine),
            _ => None,
        }
    }

    /// Engine time while computing, otherwise the trajectory length.
    pub fn time(&self) -> u64 {
        match &self.stage {
            Stage::Fresh(engine) => engine.time(),
            _ => self.params.steps,
        }
    }

    /// Trajectory file this driver was loaded from.
    pub fn source_file(&self) -> Option<&str> {
        self.source_file.as_deref()
    }

    /// Record registered by this driver's own computation.
    pub fn record(&self) -> Option<&TrajectoryRecord> {
        self.record.as_ref()
    }

    fn plan(&self, steps: Option<u64>) -> Result<Plan> {
        match &self.stage {
            Stage::Fresh(_) => Ok(Plan::Compute(steps.unwrap_or(self.params.steps))),
            Stage::Loaded(_) => match steps {
                None => Ok(Plan::Serve(None)),
                Some(s) if s <= self.params.steps => {
                    Ok(Plan::Serve(Some(self.params.sample_count(s))))
                }
                Some(s) => Ok(Plan::Extend(s)),
            },
            Stage::Completed => Err(CacheError::config(
                "run was already called on this driver; build a new one",
            )),
        }
    }

    /// Produces the trajectory for `steps` generations (the resolved `steps`
    /// when `None`) and returns its statistics.
    pub fn run<F>(&mut self, cache: &mut TrajectoryCache<F>, steps: Option<u64>) -> Result<&StatTable>
    where
        F: EngineFactory<Engine = E>,
    {
        let plan = self.plan(steps)?;
        self.execute(cache, plan, |_| {})?;
        Ok(&self.stats)
    }

    /// Like [`RunDriver::run`], additionally calling `sampler` after every
    /// engine step and returning its results keyed by engine time. The
    /// persisted trajectory is unaffected by sampling. Only valid when the
    /// request requires computation.
    pub fn run_with_sampler<F, T, S>(
        &mut self,
        cache: &mut TrajectoryCache<F>,
        steps: Option<u64>,
        mut sampler: S,
    ) -> Result<Vec<(u64, T)>>
    where
        F: EngineFactory<Engine = E>,
        S: FnMut(&RunDriver<E>) -> T,
    {
        let plan = self.plan(steps)?;
        if let Plan::Serve(_) = plan {
            return Err(CacheError::config(
                "per-step sampling needs a computed run, but this request is served from cache",
            ));
        }
        let mut samples = Vec::new();
        self.execute(cache, plan, |driver| {
            samples.push((driver.time(), sampler(driver)))
        })?;
        Ok(samples)
    }

    fn execute<F, S>(&mut self, cache: &mut TrajectoryCache<F>, plan: Plan, on_step: S) -> Result<()>
    where
        F: EngineFactory<Engine = E>,
        S: FnMut(&RunDriver<E>),
    {
        match plan {
            Plan::Serve(rows) => {
                if let Stage::Loaded(stored) = &self.stage {
                    self.stats = match rows {
                        Some(rows) => stored.truncated(rows),
                        None => stored.clone(),
                    };
                }
                Ok(())
            }
            Plan::Compute(target) => self.compute(cache, target, on_step),
            Plan::Extend(target) => {
                warn!(
                    cached_steps = self.params.steps,
                    requested_steps = target,
                    seed = self.params.seed,
                    "requested length exceeds the cached trajectory; recomputing from scratch"
                );
                let params = self.params.with_steps(target);
                let engine = cache.build_engine(&params)?;
                self.params = params;
                self.stats = StatTable::with_default_names();
                self.stage = Stage::Fresh(engine);
                self.compute(cache, target, on_step)
            }
        }
    }

    fn compute<F, S>(&mut self, cache: &mut TrajectoryCache<F>, target: u64, on_step: S) -> Result<()>
    where
        F: EngineFactory<Engine = E>,
        S: FnMut(&RunDriver<E>),
    {
        if let Err(err) = self.advance(target, on_step) {
            // Engine state is not resumable after a failed step.
            self.stage = Stage::Completed;
            return Err(err);
        }
        self.stage = Stage::Completed;
        self.params.steps = target;
        self.stats.truncate(self.params.sample_count(target));
        let record = cache.index.save_run(&self.params, &self.stats)?;
        info!(file = %record.file, rows = self.stats.len(), "computed trajectory stored in cache");
        self.record = Some(record);
        Ok(())
    }

    fn advance<S>(&mut self, target: u64, mut on_step: S) -> Result<()>
    where
        S: FnMut(&RunDriver<E>),
    {
        let start = self.time();
        for _ in start..target {
            let Stage::Fresh(engine) = &mut self.stage else {
                return Err(CacheError::config("no live engine to advance"));
            };
            engine.step()?;
            if engine.time() % self.params.interval == 0 {
                engine.calc_stat()?;
                let row = sample_row(&*engine, self.stats.names())?;
                self.stats.push_row(&row)?;
            }
            on_step(&*self);
        }
        Ok(())
    }
}
