//! Parameter model: the canonical key set, immutable defaults and the
//! `resolve` merge that turns a partial override map into a complete,
//! sentinel-free [`Params`].

use crate::error::{CacheError, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A partial or complete parameter mapping, keyed by the canonical names.
pub type ParamSet = BTreeMap<String, ParamValue>;

/// Scalar parameter value as it appears in trajectory and index files.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
}

impl ParamValue {
    pub fn as_f64(&self) -> f64 {
        match *self {
            ParamValue::Bool(b) => {
                if b {
                    1.0
                } else {
                    0.0
                }
            }
            ParamValue::Int(i) => i as f64,
            ParamValue::Float(f) => f,
        }
    }

    /// Numeric equality: `1 == 1.0` and `true == 1`.
    pub fn matches(&self, other: &ParamValue) -> bool {
        match (self, other) {
            (ParamValue::Int(a), ParamValue::Int(b)) => a == b,
            _ => self.as_f64() == other.as_f64(),
        }
    }

    fn to_int(self, key: &str) -> Result<i64> {
        match self {
            ParamValue::Int(i) => Ok(i),
            ParamValue::Float(f) if f.is_finite() && f.fract() == 0.0 => Ok(f as i64),
            other => Err(CacheError::config(format!(
                "parameter {} expects an integer (got {})",
                key, other
            ))),
        }
    }

    fn to_count(self, key: &str) -> Result<u64> {
        let value = self.to_int(key)?;
        u64::try_from(value).map_err(|_| {
            CacheError::config(format!(
                "parameter {} must be non-negative (got {})",
                key, value
            ))
        })
    }

    fn to_float(self, key: &str) -> Result<f64> {
        match self {
            ParamValue::Int(i) => Ok(i as f64),
            ParamValue::Float(f) => Ok(f),
            ParamValue::Bool(_) => Err(CacheError::config(format!(
                "parameter {} expects a number (got {})",
                key, self
            ))),
        }
    }

    fn to_bool(self, key: &str) -> Result<bool> {
        match self {
            ParamValue::Bool(b) => Ok(b),
            ParamValue::Int(0) => Ok(false),
            ParamValue::Int(1) => Ok(true),
            ParamValue::Float(f) if f == 0.0 => Ok(false),
            ParamValue::Float(f) if f == 1.0 => Ok(true),
            other => Err(CacheError::config(format!(
                "parameter {} expects a boolean (got {})",
                key, other
            ))),
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(b) => write!(f, "{}", b),
            ParamValue::Int(i) => write!(f, "{}", i),
            ParamValue::Float(x) => write!(f, "{:?}", x),
        }
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Bool(value)
    }
}

impl From<i32> for ParamValue {
    fn from(value: i32) -> Self {
        ParamValue::Int(i64::from(value))
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Int(value)
    }
}

impl From<u64> for ParamValue {
    fn from(value: u64) -> Self {
        ParamValue::Int(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::Float(value)
    }
}

/// Every recognized key, in the order used when printing a full set.
pub const PARAM_NAMES: [&str; 17] = [
    "steps",
    "N",
    "G",
    "M",
    "B",
    "fb",
    "T",
    "Tmut",
    "Mmut",
    "Ttransform",
    "C",
    "X",
    "even",
    "constantX",
    "Binitial",
    "interval",
    "seed",
];

/// Positional argument order of the engine constructor.
pub const ENGINE_PARAM_NAMES: [&str; 15] = [
    "N",
    "G",
    "B",
    "fb",
    "M",
    "Mmut",
    "T",
    "Tmut",
    "Ttransform",
    "C",
    "X",
    "even",
    "constantX",
    "Binitial",
    "seed",
];

/// Argument order of the equivalent standalone simulation executable.
pub const EXE_PARAM_NAMES: [&str; 13] = [
    "N",
    "G",
    "B",
    "fb",
    "M",
    "Mmut",
    "T",
    "Tmut",
    "Ttransform",
    "C",
    "Binitial",
    "interval",
    "seed",
];

/// Rough wall-clock cost of one calculation unit (one gene of one organism
/// for one generation).
pub const SECONDS_PER_COST_UNIT: f64 = 5e-8;

/// A complete parameter set with one named field per key.
#[derive(Debug, Clone, PartialEq)]
pub struct Params {
    pub steps: u64,
    /// Population size.
    pub n: u64,
    /// Genome length.
    pub g: u64,
    /// Mutation rate.
    pub m: f64,
    /// Probability that a mutation is beneficial.
    pub b: f64,
    /// Fitness gain of a beneficial mutation.
    pub fb: f64,
    /// Horizontal transfer rate.
    pub t: f64,
    pub tmut: f64,
    pub mmut: f64,
    pub ttransform: f64,
    /// Cost of horizontal transfer.
    pub c: f64,
    /// Ploidy / fitness mode.
    pub x: u64,
    pub even: bool,
    pub constant_x: bool,
    /// Negative means "same as `b`" until resolved.
    pub binitial: f64,
    pub interval: u64,
    /// Negative means "draw one" until resolved.
    pub seed: i64,
}

impl Params {
    pub const DEFAULT: Params = Params {
        steps: 200,
        n: 100,
        g: 100,
        m: 0.015,
        b: 0.1,
        fb: 0.05,
        t: 0.0,
        tmut: 0.0,
        mmut: 0.0,
        ttransform: 1.0,
        c: 0.0,
        x: 1,
        even: true,
        constant_x: true,
        binitial: -1.0,
        interval: 1,
        seed: -1,
    };

    fn entries(&self) -> [(&'static str, ParamValue); 17] {
        [
            ("steps", self.steps.into()),
            ("N", self.n.into()),
            ("G", self.g.into()),
            ("M", self.m.into()),
            ("B", self.b.into()),
            ("fb", self.fb.into()),
            ("T", self.t.into()),
            ("Tmut", self.tmut.into()),
            ("Mmut", self.mmut.into()),
            ("Ttransform", self.ttransform.into()),
            ("C", self.c.into()),
            ("X", self.x.into()),
            ("even", self.even.into()),
            ("constantX", self.constant_x.into()),
            ("Binitial", self.binitial.into()),
            ("interval", self.interval.into()),
            ("seed", self.seed.into()),
        ]
    }

    pub fn get(&self, key: &str) -> Option<ParamValue> {
        self.entries()
            .iter()
            .find(|(name, _)| *name == key)
            .map(|(_, value)| *value)
    }

    /// Assigns one named parameter, checking the value kind.
    pub fn set(&mut self, key: &str, value: ParamValue) -> Result<()> {
        match key {
            "steps" => self.steps = value.to_count(key)?,
            "N" => self.n = value.to_count(key)?,
            "G" => self.g = value.to_count(key)?,
            "M" => self.m = value.to_float(key)?,
            "B" => self.b = value.to_float(key)?,
            "fb" => self.fb = value.to_float(key)?,
            "T" => self.t = value.to_float(key)?,
            "Tmut" => self.tmut = value.to_float(key)?,
            "Mmut" => self.mmut = value.to_float(key)?,
            "Ttransform" => self.ttransform = value.to_float(key)?,
            "C" => self.c = value.to_float(key)?,
            "X" => self.x = value.to_count(key)?,
            "even" => self.even = value.to_bool(key)?,
            "constantX" => self.constant_x = value.to_bool(key)?,
            "Binitial" => self.binitial = value.to_float(key)?,
            "interval" => self.interval = value.to_count(key)?,
            "seed" => self.seed = value.to_int(key)?,
            other => {
                return Err(CacheError::config(format!(
                    "unknown parameter: {}",
                    other
                )))
            }
        }
        Ok(())
    }

    /// Reads a set that was written by this layer (trajectory header or index
    /// record). Unknown keys are ignored and missing keys take defaults.
    pub fn from_stored(set: &ParamSet) -> Result<Params> {
        let mut params = Params::DEFAULT;
        for (key, value) in set {
            if !PARAM_NAMES.contains(&key.as_str()) {
                continue;
            }
            params
                .set(key, *value)
                .map_err(|e| CacheError::format(format!("stored parameters: {}", e)))?;
        }
        params
            .validate()
            .map_err(|e| CacheError::format(format!("stored parameters: {}", e)))?;
        params.resolve_binitial();
        if params.seed < 0 {
            return Err(CacheError::format(
                "stored parameters carry an unresolved seed",
            ));
        }
        Ok(params)
    }

    fn validate(&self) -> Result<()> {
        if self.interval == 0 {
            return Err(CacheError::config("interval must be at least 1"));
        }
        Ok(())
    }

    fn resolve_binitial(&mut self) {
        if self.binitial < 0.0 {
            self.binitial = self.b;
        }
    }

    /// The complete mapping used as a cache key and written to disk.
    pub fn to_set(&self) -> ParamSet {
        self.entries()
            .iter()
            .map(|(name, value)| (name.to_string(), *value))
            .collect()
    }

    pub fn engine_args(&self) -> Vec<ParamValue> {
        self.args_for(&ENGINE_PARAM_NAMES)
    }

    pub fn exe_args(&self) -> Vec<ParamValue> {
        self.args_for(&EXE_PARAM_NAMES)
    }

    fn args_for(&self, names: &[&str]) -> Vec<ParamValue> {
        let entries = self.entries();
        names
            .iter()
            .filter_map(|name| {
                entries
                    .iter()
                    .find(|(key, _)| key == name)
                    .map(|(_, value)| *value)
            })
            .collect()
    }

    pub fn with_steps(&self, steps: u64) -> Params {
        Params {
            steps,
            ..self.clone()
        }
    }

    /// Number of rows a trajectory of `steps` generations holds.
    pub fn sample_count(&self, steps: u64) -> usize {
        (steps / self.interval) as usize
    }

    pub fn cost_units(&self) -> u64 {
        self.n
            .saturating_mul(self.g)
            .saturating_mul(self.x)
            .saturating_mul(self.steps)
    }

    pub fn estimated_seconds(&self) -> f64 {
        self.cost_units() as f64 * SECONDS_PER_COST_UNIT
    }
}

impl Default for Params {
    fn default() -> Self {
        Params::DEFAULT
    }
}

/// The defaults as a mapping, sentinels included.
pub fn default_set() -> ParamSet {
    Params::DEFAULT.to_set()
}

/// Layers `overrides` over the defaults and replaces both sentinels with
/// concrete values. A negative seed draws a fresh one from `rng`.
pub fn resolve<R: Rng + ?Sized>(overrides: &ParamSet, rng: &mut R) -> Result<Params> {
    let mut params = Params::DEFAULT;
    for (key, value) in overrides {
        params.set(key, *value)?;
    }
    params.validate()?;
    params.resolve_binitial();
    if params.seed < 0 {
        params.seed = i64::from(rng.gen::<u32>());
    }
    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn set(pairs: &[(&str, ParamValue)]) -> ParamSet {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn resolve_fills_defaults() {
        let mut rng = StdRng::seed_from_u64(1);
        let params = resolve(&set(&[("N", 50.into())]), &mut rng).expect("resolve");
        assert_eq!(params.n, 50);
        assert_eq!(params.g, 100);
        assert_eq!(params.steps, 200);
        assert!((params.m - 0.015).abs() < 1e-12);
        assert!(params.even);
    }

    #[test]
    fn resolve_binitial_follows_b() {
        let mut rng = StdRng::seed_from_u64(2);
        let params = resolve(&set(&[("B", 0.2.into())]), &mut rng).expect("resolve");
        assert_eq!(params.binitial, 0.2);

        let explicit = resolve(
            &set(&[("B", 0.2.into()), ("Binitial", 0.05.into())]),
            &mut rng,
        )
        .expect("resolve");
        assert_eq!(explicit.binitial, 0.05);
    }

    #[test]
    fn resolve_draws_distinct_seeds() {
        let mut rng = StdRng::seed_from_u64(3);
        let overrides = set(&[("seed", ParamValue::Int(-1))]);
        let a = resolve(&overrides, &mut rng).expect("a");
        let b = resolve(&overrides, &mut rng).expect("b");
        assert!(a.seed >= 0 && a.seed <= i64::from(u32::MAX));
        assert!(b.seed >= 0);
        assert_ne!(a.seed, b.seed);
    }

    #[test]
    fn resolve_keeps_explicit_seed() {
        let mut rng = StdRng::seed_from_u64(4);
        let params = resolve(&set(&[("seed", 42.into())]), &mut rng).expect("resolve");
        assert_eq!(params.seed, 42);
    }

    #[test]
    fn resolve_rejects_unknown_and_mistyped_keys() {
        let mut rng = StdRng::seed_from_u64(5);
        let err = resolve(&set(&[("verbose", true.into())]), &mut rng).expect_err("unknown");
        assert!(err.to_string().contains("unknown parameter"), "{}", err);

        let err = resolve(&set(&[("N", 10.5.into())]), &mut rng).expect_err("fractional N");
        assert!(matches!(err, CacheError::Configuration(_)));

        let err = resolve(&set(&[("interval", 0.into())]), &mut rng).expect_err("zero");
        assert!(err.to_string().contains("interval"), "{}", err);
    }

    #[test]
    fn integral_floats_and_flag_ints_are_accepted() {
        let mut rng = StdRng::seed_from_u64(6);
        let params = resolve(
            &set(&[("N", 30.0.into()), ("even", 0.into())]),
            &mut rng,
        )
        .expect("resolve");
        assert_eq!(params.n, 30);
        assert!(!params.even);
    }

    #[test]
    fn engine_args_follow_constructor_order() {
        let mut rng = StdRng::seed_from_u64(7);
        let params = resolve(
            &set(&[("N", 10.into()), ("G", 20.into()), ("seed", 9.into())]),
            &mut rng,
        )
        .expect("resolve");
        let args = params.engine_args();
        assert_eq!(args.len(), ENGINE_PARAM_NAMES.len());
        assert_eq!(args[0], ParamValue::Int(10));
        assert_eq!(args[1], ParamValue::Int(20));
        assert_eq!(args[13], ParamValue::Float(0.1));
        assert_eq!(args[14], ParamValue::Int(9));
        assert_eq!(params.exe_args().len(), EXE_PARAM_NAMES.len());
    }

    #[test]
    fn to_set_round_trips_through_from_stored() {
        let mut rng = StdRng::seed_from_u64(8);
        let params = resolve(&set(&[("T", 0.3.into())]), &mut rng).expect("resolve");
        let stored = params.to_set();
        assert_eq!(stored.len(), PARAM_NAMES.len());
        let back = Params::from_stored(&stored).expect("from_stored");
        assert_eq!(back, params);
    }

    #[test]
    fn from_stored_ignores_extra_keys_but_rejects_unresolved_seed() {
        let mut stored = default_set();
        stored.insert("verbose".to_string(), false.into());
        stored.insert("seed".to_string(), 5.into());
        let params = Params::from_stored(&stored).expect("extra keys");
        assert_eq!(params.binitial, params.b);

        stored.insert("seed".to_string(), ParamValue::Int(-1));
        let err = Params::from_stored(&stored).expect_err("unresolved seed");
        assert!(matches!(err, CacheError::Format(_)));
    }

    #[test]
    fn numeric_matching_crosses_kinds() {
        assert!(ParamValue::Int(1).matches(&ParamValue::Float(1.0)));
        assert!(ParamValue::Bool(true).matches(&ParamValue::Int(1)));
        assert!(!ParamValue::Float(0.1).matches(&ParamValue::Float(0.2)));
    }

    #[test]
    fn cost_estimate_scales_with_size() {
        let params = Params {
            n: 10,
            g: 20,
            x: 2,
            steps: 100,
            ..Params::DEFAULT
        };
        assert_eq!(params.cost_units(), 40_000);
        assert!((params.estimated_seconds() - 0.002).abs() < 1e-12);
        assert_eq!(params.sample_count(100), 100);
        assert_eq!(
            Params {
                interval: 3,
                ..Params::DEFAULT
            }
            .sample_count(10),
            3
        );
    }
}
