use crate::error::{CacheError, Result};

/// Statistic groups reported by the engine; each expands to avg/std/min/max.
pub const STAT_GROUPS: [&str; 7] = ["E", "EE", "X", "F", "M", "T", "EG"];

const STAT_SUFFIXES: [&str; 4] = ["avg", "std", "min", "max"];

/// `time`, the four summaries of every group, then `Tplus`.
pub fn default_stat_names() -> Vec<String> {
    let mut names = vec!["time".to_string()];
    for group in STAT_GROUPS {
        for suffix in STAT_SUFFIXES {
            names.push(format!("{}{}", group, suffix));
        }
    }
    names.push("Tplus".to_string());
    names
}

/// Column-oriented statistics: one `f64` series per name, all the same length.
#[derive(Debug, Clone, PartialEq)]
pub struct StatTable {
    names: Vec<String>,
    columns: Vec<Vec<f64>>,
}

impl StatTable {
    pub fn new(names: Vec<String>) -> Self {
        let columns = vec![Vec::new(); names.len()];
        Self { names, columns }
    }

    pub fn with_default_names() -> Self {
        Self::new(default_stat_names())
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|idx| self.columns[idx].as_slice())
    }

    /// Number of sampled time points.
    pub fn len(&self) -> usize {
        self.columns.first().map(Vec::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn push_row(&mut self, row: &[f64]) -> Result<()> {
        if row.len() != self.names.len() {
            return Err(CacheError::format(format!(
                "row has {} values but the table has {} statistics",
                row.len(),
                self.names.len()
            )));
        }
        for (column, value) in self.columns.iter_mut().zip(row) {
            column.push(*value);
        }
        Ok(())
    }

    pub fn row(&self, idx: usize) -> Option<Vec<f64>> {
        if idx >= self.len() {
            return None;
        }
        Some(self.columns.iter().map(|c| c[idx]).collect())
    }

    /// A copy holding at most the first `rows` time points.
    pub fn truncated(&self, rows: usize) -> StatTable {
        StatTable {
            names: self.names.clone(),
            columns: self
                .columns
                .iter()
                .map(|c| c[..rows.min(c.len())].to_vec())
                .collect(),
        }
    }

    pub(crate) fn truncate(&mut self, rows: usize) {
        for column in &mut self.columns {
            column.truncate(rows);
        }
    }
}
