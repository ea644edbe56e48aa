//! Boundary to the external simulation engine. The cache never looks inside
//! an engine: it builds one from positional arguments, steps it, and reads
//! named statistics after `calc_stat`.

use crate::error::EngineError;
use crate::params::ParamValue;

pub trait Engine {
    /// Generations simulated so far.
    fn time(&self) -> u64;

    /// Advances the population by one generation.
    fn step(&mut self) -> Result<(), EngineError>;

    /// Refreshes the derived statistics read by [`Engine::stat`].
    fn calc_stat(&mut self) -> Result<(), EngineError>;

    /// Value of a statistic as of the last `calc_stat` call.
    fn stat(&self, name: &str) -> Option<f64>;
}

/// Builds engines from the values of `params::ENGINE_PARAM_NAMES`, in order.
pub trait EngineFactory {
    type Engine: Engine;

    fn build(&self, args: &[ParamValue]) -> Result<Self::Engine, EngineError>;
}

impl<F, E> EngineFactory for F
where
    F: Fn(&[ParamValue]) -> Result<E, EngineError>,
    E: Engine,
{
    type Engine = E;

    fn build(&self, args: &[ParamValue]) -> Result<E, EngineError> {
        self(args)
    }
}

/// Reads one table row from the engine, in `names` order.
pub(crate) fn sample_row<E: Engine + ?Sized>(
    engine: &E,
    names: &[String],
) -> Result<Vec<f64>, EngineError> {
    names
        .iter()
        .map(|name| {
            engine
                .stat(name)
                .ok_or_else(|| EngineError::new(format!("engine does not report statistic {}", name)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedEngine;

    #[test]
    fn closures_act_as_factories() {
        let factory = |args: &[ParamValue]| -> Result<ScriptedEngine, EngineError> {
            Ok(ScriptedEngine::new(args, None))
        };
        let mut engine = factory.build(&[ParamValue::Int(3)]).expect("build");
        engine.step().expect("step");
        assert_eq!(engine.time(), 1);
    }

    #[test]
    fn sample_row_reports_missing_statistics() {
        let mut engine = ScriptedEngine::new(&[], None);
        engine.calc_stat().expect("calc");
        let row = sample_row(&engine, &["time".to_string()]).expect("row");
        assert_eq!(row, vec![0.0]);
        let err = sample_row(&engine, &["nonsense".to_string()]).expect_err("missing");
        assert!(err.to_string().contains("nonsense"));
    }
}
