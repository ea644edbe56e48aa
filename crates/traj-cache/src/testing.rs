//! Deterministic engine and temp-dir helpers shared by the unit tests.

use crate::config::CacheConfig;
use crate::engine::{Engine, EngineFactory};
use crate::ensure_dir;
use crate::error::EngineError;
use crate::params::{ParamValue, ENGINE_PARAM_NAMES};
use crate::stats::default_stat_names;
use chrono::Utc;
use std::cell::Cell;
use std::path::PathBuf;
use std::rc::Rc;

pub(crate) fn temp_root(tag: &str) -> PathBuf {
    let root = std::env::temp_dir().join(format!(
        "traj_cache_test_{}_{}_{}",
        tag,
        std::process::id(),
        Utc::now().timestamp_micros()
    ));
    ensure_dir(&root).expect("temp root");
    root
}

pub(crate) fn temp_config(tag: &str) -> CacheConfig {
    CacheConfig::rooted_at(&temp_root(tag))
}

/// Reports statistics that are a pure function of the seed and the time, so
/// two engines built with the same arguments produce the same trajectory.
#[derive(Debug)]
pub(crate) struct ScriptedEngine {
    time: u64,
    seed: f64,
    fail_at: Option<u64>,
    calculated_at: Option<u64>,
}

impl ScriptedEngine {
    pub(crate) fn new(args: &[ParamValue], fail_at: Option<u64>) -> Self {
        let seed_pos = ENGINE_PARAM_NAMES
            .iter()
            .position(|name| *name == "seed")
            .unwrap_or(0);
        let seed = args.get(seed_pos).map(ParamValue::as_f64).unwrap_or(0.0);
        Self {
            time: 0,
            seed,
            fail_at,
            calculated_at: None,
        }
    }
}

impl Engine for ScriptedEngine {
    fn time(&self) -> u64 {
        self.time
    }

    fn step(&mut self) -> Result<(), EngineError> {
        if Some(self.time + 1) == self.fail_at {
            return Err(EngineError::new(format!("scripted failure at {}", self.time + 1)));
        }
        self.time += 1;
        Ok(())
    }

    fn calc_stat(&mut self) -> Result<(), EngineError> {
        self.calculated_at = Some(self.time);
        Ok(())
    }

    fn stat(&self, name: &str) -> Option<f64> {
        let t = self.calculated_at? as f64;
        if name == "time" {
            return Some(t);
        }
        let idx = default_stat_names().iter().position(|n| n == name)? as f64;
        Some(self.seed.rem_euclid(97.0) + idx * 10.0 - t * 0.5)
    }
}

/// Counts how many engines it has built.
#[derive(Debug, Clone, Default)]
pub(crate) struct ScriptedFactory {
    pub(crate) builds: Rc<Cell<usize>>,
    pub(crate) fail_at: Option<u64>,
}

impl ScriptedFactory {
    pub(crate) fn failing_at(time: u64) -> Self {
        Self {
            fail_at: Some(time),
            ..Self::default()
        }
    }

    pub(crate) fn build_count(&self) -> usize {
        self.builds.get()
    }
}

impl EngineFactory for ScriptedFactory {
    type Engine = ScriptedEngine;

    fn build(&self, args: &[ParamValue]) -> Result<ScriptedEngine, EngineError> {
        if args.len() != ENGINE_PARAM_NAMES.len() {
            return Err(EngineError::new(format!(
                "expected {} arguments, got {}",
                ENGINE_PARAM_NAMES.len(),
                args.len()
            )));
        }
        self.builds.set(self.builds.get() + 1);
        Ok(ScriptedEngine::new(args, self.fail_at))
    }
}
