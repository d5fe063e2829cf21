use crate::evaluate::Scores;
use crate::experiment::grid::Params;
use anyhow::{Context, Result};
use csv::{ReaderBuilder, WriterBuilder};
use std::path::Path;
use tracing::{debug, info};

/// Result columns appended after the option columns
pub const RESULT_COLUMNS: [&str; 4] = ["roc_auc", "mean_roc_auc", "dice_score", "mean_dice"];

/// Format a score cell; NaN is written as `nan`
fn format_score(value: f64) -> String {
    if value.is_nan() {
        "nan".to_string()
    } else {
        value.to_string()
    }
}

/// Format a per-label list as a single `[a, b, ...]` cell
fn format_list(values: &[f64]) -> String {
    let items: Vec<String> = values.iter().map(|v| format_score(*v)).collect();
    format!("[{}]", items.join(", "))
}

/// Parse a list cell written by [`format_list`]
pub fn parse_list(cell: &str) -> Option<Vec<f64>> {
    let inner = cell.trim().strip_prefix('[')?.strip_suffix(']')?;
    if inner.trim().is_empty() {
        return Some(Vec::new());
    }
    inner
        .split(',')
        .map(|item| match item.trim() {
            "nan" | "NaN" => Some(f64::NAN),
            v => v.parse().ok(),
        })
        .collect()
}

/// Persistent results of every evaluated configuration.
///
/// Cells are kept as text so columns this build does not know about
/// survive a load/save cycle unchanged. An empty cell is missing.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultsTable {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl ResultsTable {
    /// Empty table with the option columns followed by the result columns
    pub fn new(option_names: &[String]) -> Self {
        let mut table = Self {
            columns: Vec::new(),
            rows: Vec::new(),
        };
        table.ensure_columns(option_names);
        table
    }

    /// Load the table at `path`, or start an empty one if there is none
    pub fn load_or_new<P: AsRef<Path>>(path: P, option_names: &[String]) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            info!("No results at {:?}, starting a new table", path);
            return Ok(Self::new(option_names));
        }

        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .from_path(path)
            .with_context(|| format!("Failed to open results {:?}", path))?;
        let columns: Vec<String> = reader.headers()?.iter().map(|s| s.to_string()).collect();
        let mut rows = Vec::new();
        for (line, record) in reader.records().enumerate() {
            let record = record.with_context(|| format!("Bad results row at line {}", line + 2))?;
            rows.push(record.iter().map(|s| s.to_string()).collect());
        }

        let mut table = Self { columns, rows };
        table.ensure_columns(option_names);
        info!("Loaded {} result rows from {:?}", table.len(), path);
        Ok(table)
    }

    /// Append missing option and result columns, filled with missing cells
    fn ensure_columns(&mut self, option_names: &[String]) {
        let wanted = option_names
            .iter()
            .map(String::as_str)
            .chain(RESULT_COLUMNS);
        for name in wanted {
            if !self.columns.iter().any(|c| c == name) {
                debug!("Adding results column {}", name);
                self.columns.push(name.to_string());
                for row in &mut self.rows {
                    row.push(String::new());
                }
            }
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            crate::utils::ensure_dir(parent)?;
        }

        let mut writer = WriterBuilder::new()
            .from_path(path)
            .with_context(|| format!("Failed to create results {:?}", path))?;
        writer.write_record(&self.columns)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        writer.flush()?;
        debug!("Saved {} result rows to {:?}", self.len(), path);
        Ok(())
    }

    fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Option cells compare without regard to ASCII case, so `True` written
    /// by older tables matches `true`
    fn matches(&self, row: &[String], params: &Params) -> bool {
        params.values().iter().all(|(name, value)| {
            self.column_index(name)
                .map(|i| row[i].trim().eq_ignore_ascii_case(value))
                .unwrap_or(false)
        })
    }

    /// A configuration is tested once a matching row has a ROC-AUC cell
    pub fn is_tested(&self, params: &Params) -> bool {
        let Some(roc) = self.column_index("roc_auc") else {
            return false;
        };
        self.rows.iter().any(|row| {
            let cell = row[roc].trim();
            self.matches(row, params) && !cell.is_empty() && cell != "nan"
        })
    }

    /// Append a row for `params`; missing `scores` leave the result cells empty
    pub fn append(&mut self, params: &Params, scores: Option<&Scores>) {
        let mut row = vec![String::new(); self.columns.len()];
        for (name, value) in params.values() {
            if let Some(i) = self.column_index(name) {
                row[i] = value.clone();
            }
        }
        if let Some(scores) = scores {
            let cells = [
                format_list(&scores.roc_auc),
                format_score(scores.mean_roc_auc),
                format_list(&scores.dice_score),
                format_score(scores.mean_dice),
            ];
            for (name, cell) in RESULT_COLUMNS.iter().zip(cells) {
                if let Some(i) = self.column_index(name) {
                    row[i] = cell;
                }
            }
        }
        self.rows.push(row);
    }

    /// Highest defined mean ROC-AUC among rows matching `params`
    pub fn best_mean_roc_auc(&self, params: &Params) -> Option<f64> {
        let i = self.column_index("mean_roc_auc")?;
        self.rows
            .iter()
            .filter(|row| self.matches(row, params))
            .filter_map(|row| row[i].trim().parse::<f64>().ok())
            .filter(|v| !v.is_nan())
            .max_by(|a, b| a.total_cmp(b))
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Cell by row index and column name
    pub fn cell(&self, row: usize, column: &str) -> Option<&str> {
        let i = self.column_index(column)?;
        self.rows.get(row).map(|r| r[i].as_str())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
