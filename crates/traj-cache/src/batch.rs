use crate::driver::{RunDriver, TrajectoryCache};
use crate::engine::EngineFactory;
use crate::error::Result;
use crate::params::{ParamSet, Params};
use tracing::info;

impl<F: EngineFactory> TrajectoryCache<F> {
    /// Returns `run_count` drivers for independent trajectories sharing
    /// `criteria`: cached matches first, then fresh drivers (each drawing its
    /// own seed unless `criteria` fixes one) for the shortfall. The caller
    /// runs them.
    ///
    /// Every matching record is eligible, so records that happen to share a
    /// seed can yield duplicate trajectories within one batch.
    pub fn gather(
        &mut self,
        run_count: usize,
        criteria: &ParamSet,
        use_defaults: bool,
    ) -> Result<Vec<RunDriver<F::Engine>>> {
        let mut lookup = criteria.clone();
        lookup
            .entry("steps".to_string())
            .or_insert(Params::DEFAULT.steps.into());
        let found = self.index().find(&lookup, use_defaults)?;

        let mut drivers = Vec::with_capacity(run_count);
        for record in found.iter().take(run_count) {
            drivers.push(self.load(&record.file)?);
        }
        let cached = drivers.len();
        for _ in cached..run_count {
            drivers.push(self.fresh(criteria)?);
        }
        info!(
            requested = run_count,
            cached,
            fresh = run_count - cached,
            "gathered trajectory batch"
        );
        Ok(drivers)
    }
}
