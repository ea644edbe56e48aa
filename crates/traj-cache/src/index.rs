//! Append-only catalog of stored trajectories.
//!
//! The backing file holds one JSON record per line and is the source of
//! truth: `register` rereads it before appending so records written by other
//! processes since the last load are kept. The read-modify-write is not
//! locked; two writers racing can still drop one registration.

use crate::codec::{self, TRAJECTORY_EXTENSION};
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::params::{default_set, ParamSet, ParamValue, Params};
use crate::stats::StatTable;
use crate::{atomic_write_bytes, ensure_dir, write_new_file};
use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryRecord {
    pub params: ParamSet,
    pub stat_names: Vec<String>,
    pub file: String,
}

impl TrajectoryRecord {
    pub fn steps(&self) -> Option<f64> {
        self.params.get("steps").map(ParamValue::as_f64)
    }
}

/// Files on disk that the index does not know about, and the reverse.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuditReport {
    pub unindexed_files: Vec<String>,
    pub missing_files: Vec<String>,
}

impl AuditReport {
    pub fn is_consistent(&self) -> bool {
        self.unindexed_files.is_empty() && self.missing_files.is_empty()
    }
}

#[derive(Debug)]
struct Filter {
    keys: Vec<(String, ParamValue)>,
    min_steps: f64,
    binitial_tracks_b: bool,
}

impl Filter {
    fn build(criteria: &ParamSet, use_defaults: bool) -> Result<Self> {
        let mut effective = if use_defaults {
            default_set()
        } else {
            ParamSet::new()
        };
        effective.extend(criteria.iter().map(|(k, v)| (k.clone(), *v)));

        let min_steps = effective
            .remove("steps")
            .ok_or_else(|| CacheError::config("lookup criteria need a steps lower bound"))?
            .as_f64();

        let mut binitial_tracks_b = false;
        if let Some(binitial) = effective.get("Binitial").copied() {
            if binitial.as_f64() < 0.0 {
                match effective.get("B").copied() {
                    Some(b) => {
                        effective.insert("Binitial".to_string(), b);
                    }
                    None => {
                        effective.remove("Binitial");
                        binitial_tracks_b = true;
                    }
                }
            }
        }
        if let Some(seed) = effective.get("seed") {
            if seed.as_f64() < 0.0 {
                effective.remove("seed");
            }
        }

        Ok(Self {
            keys: effective.into_iter().collect(),
            min_steps,
            binitial_tracks_b,
        })
    }

    fn accepts(&self, record: &TrajectoryRecord) -> bool {
        let params = &record.params;
        let keys_match = self.keys.iter().all(|(key, want)| {
            params
                .get(key)
                .map(|have| have.matches(want))
                .unwrap_or(false)
        });
        if !keys_match {
            return false;
        }
        if self.binitial_tracks_b {
            match (params.get("Binitial"), params.get("B")) {
                (Some(binitial), Some(b)) if binitial.matches(b) => {}
                _ => return false,
            }
        }
        record
            .steps()
            .map(|steps| steps >= self.min_steps)
            .unwrap_or(false)
    }
}

#[derive(Debug)]
pub struct TrajectoryIndex {
    data_dir: PathBuf,
    index_path: PathBuf,
    records: Vec<TrajectoryRecord>,
}

impl TrajectoryIndex {
    /// Opens the index, creating an empty index file when none exists.
    pub fn open(config: &CacheConfig) -> Result<Self> {
        if !config.index_path.exists() {
            if let Some(parent) = config.index_path.parent() {
                if !parent.as_os_str().is_empty() {
                    ensure_dir(parent)?;
                }
            }
            fs::File::create(&config.index_path)?;
            debug!(path = %config.index_path.display(), "created empty trajectory index");
        }
        let mut index = Self {
            data_dir: config.data_dir.clone(),
            index_path: config.index_path.clone(),
            records: Vec::new(),
        };
        index.reload()?;
        Ok(index)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    pub fn records(&self) -> &[TrajectoryRecord] {
        &self.records
    }

    /// Replaces the in-memory records with the current file contents.
    pub fn reload(&mut self) -> Result<()> {
        let raw = fs::read_to_string(&self.index_path)?;
        let mut records = Vec::new();
        for (idx, line) in raw.lines().enumerate() {
            let line = line.trim();
            if !line.starts_with('{') {
                continue;
            }
            let record: TrajectoryRecord = serde_json::from_str(line).map_err(|e| {
                CacheError::format(format!(
                    "{} line {}: {}",
                    self.index_path.display(),
                    idx + 1,
                    e
                ))
            })?;
            records.push(record);
        }
        self.records = records;
        Ok(())
    }

    pub fn persist(&self) -> Result<()> {
        let mut out = String::new();
        for record in &self.records {
            out.push_str(&serde_json::to_string(record)?);
            out.push('\n');
        }
        atomic_write_bytes(&self.index_path, out.as_bytes())
    }

    pub fn register(&mut self, record: TrajectoryRecord) -> Result<()> {
        self.reload()?;
        debug!(file = %record.file, known = self.records.len(), "registering trajectory");
        self.records.push(record);
        self.persist()
    }

    /// Records whose parameters equal `criteria` and whose length is at least
    /// `criteria["steps"]`. With `use_defaults`, keys absent from `criteria`
    /// must hold their default values; otherwise they are unconstrained.
    pub fn find(&self, criteria: &ParamSet, use_defaults: bool) -> Result<Vec<TrajectoryRecord>> {
        self.find_where(criteria, use_defaults, |_| true)
    }

    pub fn find_where<P>(
        &self,
        criteria: &ParamSet,
        use_defaults: bool,
        predicate: P,
    ) -> Result<Vec<TrajectoryRecord>>
    where
        P: Fn(&TrajectoryRecord) -> bool,
    {
        let filter = Filter::build(criteria, use_defaults)?;
        Ok(self
            .records
            .iter()
            .filter(|record| filter.accepts(record) && predicate(record))
            .cloned()
            .collect())
    }

    /// One matching record chosen uniformly at random.
    pub fn find_one<R: Rng + ?Sized>(
        &self,
        criteria: &ParamSet,
        use_defaults: bool,
        rng: &mut R,
    ) -> Result<Option<TrajectoryRecord>> {
        let mut found = self.find(criteria, use_defaults)?;
        if found.is_empty() {
            return Ok(None);
        }
        let pick = rng.gen_range(0..found.len());
        Ok(Some(found.swap_remove(pick)))
    }

    pub fn trajectory_path(&self, file: &str) -> PathBuf {
        self.data_dir.join(file)
    }

    pub fn load_file(&self, file: &str) -> Result<(ParamSet, StatTable)> {
        let bytes = fs::read(self.trajectory_path(file))?;
        codec::decode(&bytes)
    }

    pub fn load_by_params<R: Rng + ?Sized>(
        &self,
        criteria: &ParamSet,
        use_defaults: bool,
        rng: &mut R,
    ) -> Result<Option<(ParamSet, StatTable)>> {
        match self.find_one(criteria, use_defaults, rng)? {
            Some(record) => self.load_file(&record.file).map(Some),
            None => Ok(None),
        }
    }

    /// Writes a completed trajectory to a new file and registers it.
    pub fn save_run(&mut self, params: &Params, table: &StatTable) -> Result<TrajectoryRecord> {
        if self.data_dir.exists() && !self.data_dir.is_dir() {
            return Err(CacheError::StorageConflict(self.data_dir.clone()));
        }
        let expected = params.sample_count(params.steps);
        if table.len() < expected {
            return Err(CacheError::format(format!(
                "refusing to store {} samples for steps={} with interval={} (needs {})",
                table.len(),
                params.steps,
                params.interval,
                expected
            )));
        }
        ensure_dir(&self.data_dir)?;

        let set = params.to_set();
        let bytes = codec::encode(&set, table)?;
        let base = trajectory_file_name(params);
        let mut attempt = 0;
        let file = loop {
            let file = numbered_file_name(&base, attempt);
            match write_new_file(&self.trajectory_path(&file), &bytes) {
                Ok(()) => break file,
                Err(CacheError::StorageConflict(_)) if attempt < MAX_NAME_ATTEMPTS => {
                    debug!(file = %file, "trajectory file name taken");
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        };

        let record = TrajectoryRecord {
            params: set,
            stat_names: table.names().to_vec(),
            file,
        };
        self.register(record.clone())?;
        info!(file = %record.file, rows = table.len(), "trajectory saved");
        Ok(record)
    }

    /// Compares trajectory files in the data directory with the index.
    pub fn audit(&self) -> Result<AuditReport> {
        let mut on_disk = BTreeSet::new();
        if self.data_dir.is_dir() {
            for entry in WalkDir::new(&self.data_dir).min_depth(1).max_depth(1) {
                let entry = entry.map_err(std::io::Error::from)?;
                if !entry.file_type().is_file() {
                    continue;
                }
                if let Some(name) = entry.file_name().to_str() {
                    if name.ends_with(TRAJECTORY_EXTENSION) {
                        on_disk.insert(name.to_string());
                    }
                }
            }
        }
        let indexed: BTreeSet<String> = self.records.iter().map(|r| r.file.clone()).collect();
        Ok(AuditReport {
            unindexed_files: on_disk.difference(&indexed).cloned().collect(),
            missing_files: indexed.difference(&on_disk).cloned().collect(),
        })
    }
}

const MAX_NAME_ATTEMPTS: u32 = 1000;

/// `base` itself for the first attempt, then `<stem>-<attempt>.txt.zst`.
fn numbered_file_name(base: &str, attempt: u32) -> String {
    if attempt == 0 {
        return base.to_string();
    }
    let suffix = format!(".{}", TRAJECTORY_EXTENSION);
    let stem = base.strip_suffix(&suffix).unwrap_or(base);
    format!("{}-{}{}", stem, attempt, suffix)
}

/// `<UTC timestamp>_<engine arguments joined by '_'>.txt.zst`
pub fn trajectory_file_name(params: &Params) -> String {
    let args: Vec<String> = params
        .engine_args()
        .iter()
        .map(ToString::to_string)
        .collect();
    format!(
        "{}_{}.{}",
        Utc::now().format("%Y-%m-%d_%H-%M-%S"),
        args.join("_"),
        TRAJECTORY_EXTENSION
    )
}
