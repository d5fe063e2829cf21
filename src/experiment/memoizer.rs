use crate::error::PipelineError;
use crate::evaluate::Scores;
use crate::experiment::grid::{Params, SearchGrid};
use crate::experiment::results::ResultsTable;
use crate::experiment::PersistPolicy;
use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use tracing::{info, warn};

/// What running one grid point produced
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Scored(Scores),
    /// The configuration cannot run in this build
    Unavailable(String),
}

/// Runs one configuration end to end
pub trait Pipeline {
    fn run(&mut self, params: &Params) -> Result<RunOutcome>;
}

/// Counts of what happened to each grid point
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GridSummary {
    pub evaluated: usize,
    pub skipped: usize,
    pub unavailable: usize,
    pub failed: usize,
}

/// Drives the grid, skipping configurations the results table already holds
pub struct Memoizer {
    results_path: PathBuf,
    persist: PersistPolicy,
    fast_iteration: bool,
    strict: bool,
    show_progress: bool,
}

impl Memoizer {
    pub fn new<P: Into<PathBuf>>(results_path: P) -> Self {
        Self {
            results_path: results_path.into(),
            persist: PersistPolicy::EachResult,
            fast_iteration: false,
            strict: true,
            show_progress: true,
        }
    }

    pub fn with_persist(mut self, persist: PersistPolicy) -> Self {
        self.persist = persist;
        self
    }

    /// Re-run every configuration and never write the table
    pub fn with_fast_iteration(mut self, fast_iteration: bool) -> Self {
        self.fast_iteration = fast_iteration;
        self
    }

    /// In non-strict mode training and shape failures skip the grid point
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    fn progress_bar(&self, len: usize) -> Result<ProgressBar> {
        if !self.show_progress {
            return Ok(ProgressBar::hidden());
        }
        let bar = ProgressBar::new(len as u64);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")?
                .progress_chars("##-"),
        );
        Ok(bar)
    }

    /// Evaluate every untested grid point and record it in `table`
    pub fn run<P: Pipeline>(
        &self,
        grid: &SearchGrid,
        table: &mut ResultsTable,
        pipeline: &mut P,
    ) -> Result<GridSummary> {
        let mut summary = GridSummary::default();
        let mut unsaved = 0usize;
        let bar = self.progress_bar(grid.len())?;
        if self.fast_iteration {
            info!(
                "Fast iteration: re-running all {} configurations, results are not saved",
                grid.len()
            );
        }

        for params in grid.points() {
            bar.set_message(params.to_string());

            if !self.fast_iteration && table.is_tested(params) {
                info!("already tried this combination: {}", params);
                summary.skipped += 1;
                bar.inc(1);
                continue;
            }

            info!("Running {}", params);
            match pipeline.run(params) {
                Ok(RunOutcome::Scored(scores)) => {
                    info!(
                        "mean ROC-AUC {:.4}, mean Dice {:.4}",
                        scores.mean_roc_auc, scores.mean_dice
                    );
                    table.append(params, Some(&scores));
                    summary.evaluated += 1;
                    unsaved += 1;
                }
                Ok(RunOutcome::Unavailable(reason)) => {
                    warn!("Skipping {}: {}", params, reason);
                    table.append(params, None);
                    summary.unavailable += 1;
                    unsaved += 1;
                }
                Err(e) => {
                    let fatal = e
                        .downcast_ref::<PipelineError>()
                        .map(PipelineError::is_fatal)
                        .unwrap_or(false);
                    if fatal || self.strict {
                        bar.abandon();
                        self.flush(table, &mut unsaved)?;
                        return Err(e.context(format!("configuration {} failed", params)));
                    }
                    warn!("Configuration {} failed, continuing: {:#}", params, e);
                    summary.failed += 1;
                }
            }

            if self.should_persist(unsaved) {
                self.flush(table, &mut unsaved)?;
            }
            bar.inc(1);
        }

        bar.finish_and_clear();
        self.flush(table, &mut unsaved)?;
        info!(
            "Grid done: {} evaluated, {} already tested, {} unavailable, {} failed",
            summary.evaluated, summary.skipped, summary.unavailable, summary.failed
        );
        Ok(summary)
    }

    fn should_persist(&self, unsaved: usize) -> bool {
        match self.persist {
            PersistPolicy::EachResult => unsaved > 0,
            PersistPolicy::Every(n) => unsaved >= n.max(1),
            PersistPolicy::EndOfRun => false,
        }
    }

    /// Write pending rows, never in fast-iteration mode
    fn flush(&self, table: &ResultsTable, unsaved: &mut usize) -> Result<()> {
        if self.fast_iteration || *unsaved == 0 {
            return Ok(());
        }
        table.save(&self.results_path)?;
        *unsaved = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::grid::default_grid;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    /// Scores every configuration unless told to fail
    struct FakePipeline {
        calls: Vec<String>,
        fail_with: Option<fn() -> anyhow::Error>,
        unavailable: bool,
    }

    impl FakePipeline {
        fn new() -> Self {
            Self {
                calls: Vec::new(),
                fail_with: None,
                unavailable: false,
            }
        }
    }

    impl Pipeline for FakePipeline {
        fn run(&mut self, params: &Params) -> Result<RunOutcome> {
            self.calls.push(params.to_string());
            if let Some(make_error) = self.fail_with {
                return Err(make_error());
            }
            if self.unavailable {
                return Ok(RunOutcome::Unavailable("not built".to_string()));
            }
            Ok(RunOutcome::Scored(Scores {
                roc_auc: vec![0.75; 10],
                mean_roc_auc: 0.75,
                dice_score: vec![0.5; 10],
                mean_dice: 0.5,
            }))
        }
    }

    fn two_point_grid() -> SearchGrid {
        let mut options = default_grid();
        options.insert("loss".to_string(), vec!["dice".to_string(), "hinge".to_string()]);
        SearchGrid::new(options).unwrap()
    }

    #[test]
    fn test_tested_configurations_are_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("params_results.csv");
        let grid = two_point_grid();
        let memoizer = Memoizer::new(&path).with_progress(false);

        let mut table = ResultsTable::new(&grid.option_names());
        let mut pipeline = FakePipeline::new();
        let summary = memoizer.run(&grid, &mut table, &mut pipeline).unwrap();
        assert_eq!(summary.evaluated, 2);
        assert_eq!(table.len(), 2);
        let saved = std::fs::read_to_string(&path).unwrap();

        // second run over the persisted table changes nothing
        let mut table = ResultsTable::load_or_new(&path, &grid.option_names()).unwrap();
        let before = table.clone();
        let mut pipeline = FakePipeline::new();
        let summary = memoizer.run(&grid, &mut table, &mut pipeline).unwrap();

        assert_eq!(summary.skipped, 2);
        assert!(pipeline.calls.is_empty());
        assert_eq!(table, before);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), saved);
    }

    #[test]
    fn test_fast_iteration_reruns_and_never_saves() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("params_results.csv");
        let grid = two_point_grid();

        let mut table = ResultsTable::new(&grid.option_names());
        for params in grid.points() {
            table.append(params, Some(&Scores {
                roc_auc: vec![0.5],
                mean_roc_auc: 0.5,
                dice_score: vec![0.5],
                mean_dice: 0.5,
            }));
        }

        let memoizer = Memoizer::new(&path).with_fast_iteration(true).with_progress(false);
        let mut pipeline = FakePipeline::new();
        let summary = memoizer.run(&grid, &mut table, &mut pipeline).unwrap();

        assert_eq!(summary.evaluated, 2);
        assert_eq!(pipeline.calls.len(), 2);
        assert!(!path.exists());
    }

    #[test]
    fn test_persist_every_n() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("params_results.csv");
        let memoizer = Memoizer::new(&path)
            .with_persist(PersistPolicy::Every(5))
            .with_progress(false);
        assert!(!memoizer.should_persist(4));
        assert!(memoizer.should_persist(5));

        // leftovers are written when the grid ends
        let grid = two_point_grid();
        let mut table = ResultsTable::new(&grid.option_names());
        memoizer.run(&grid, &mut table, &mut FakePipeline::new()).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_unavailable_rows_are_retried() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("params_results.csv");
        let grid = SearchGrid::new(default_grid()).unwrap();
        let memoizer = Memoizer::new(&path).with_progress(false);

        let mut table = ResultsTable::new(&grid.option_names());
        let mut pipeline = FakePipeline::new();
        pipeline.unavailable = true;
        let summary = memoizer.run(&grid, &mut table, &mut pipeline).unwrap();
        assert_eq!(summary.unavailable, 1);
        assert_eq!(table.len(), 1);

        let summary = memoizer.run(&grid, &mut table, &mut FakePipeline::new()).unwrap();
        assert_eq!(summary.evaluated, 1);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_diverged_point_is_not_recorded() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("params_results.csv");
        let grid = SearchGrid::new(default_grid()).unwrap();

        fn diverged() -> anyhow::Error {
            PipelineError::NonFinitePredictions { label: 0, count: 3 }.into()
        }

        let mut table = ResultsTable::new(&grid.option_names());
        let mut pipeline = FakePipeline::new();
        pipeline.fail_with = Some(diverged as fn() -> anyhow::Error);
        let memoizer = Memoizer::new(&path).with_strict(false).with_progress(false);
        let summary = memoizer.run(&grid, &mut table, &mut pipeline).unwrap();
        assert_eq!(summary.failed, 1);
        assert!(table.is_empty());

        let summary = memoizer.run(&grid, &mut table, &mut FakePipeline::new()).unwrap();
        assert_eq!(summary.evaluated, 1);
        assert!(table.is_tested(&grid.points()[0]));
    }

    #[test]
    fn test_error_handling_modes() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("params_results.csv");
        let grid = two_point_grid();

        fn shape_error() -> anyhow::Error {
            PipelineError::ShapeMismatch {
                pid: 1,
                expected: (12, 3),
                found: (11, 3),
            }
            .into()
        }
        fn integrity_error() -> anyhow::Error {
            PipelineError::TooManyTimePoints {
                pid: 1,
                count: 13,
                max: 12,
            }
            .into()
        }

        // strict: first failure aborts
        let mut table = ResultsTable::new(&grid.option_names());
        let mut pipeline = FakePipeline::new();
        pipeline.fail_with = Some(shape_error as fn() -> anyhow::Error);
        assert!(Memoizer::new(&path)
            .with_progress(false)
            .run(&grid, &mut table, &mut pipeline)
            .is_err());
        assert_eq!(pipeline.calls.len(), 1);

        // keep going: shape errors skip without a row
        let lenient = Memoizer::new(&path).with_strict(false).with_progress(false);
        let mut pipeline = FakePipeline::new();
        pipeline.fail_with = Some(shape_error as fn() -> anyhow::Error);
        let summary = lenient.run(&grid, &mut table, &mut pipeline).unwrap();
        assert_eq!(summary.failed, 2);
        assert!(table.is_empty());

        // data-integrity errors stay fatal
        let mut pipeline = FakePipeline::new();
        pipeline.fail_with = Some(integrity_error as fn() -> anyhow::Error);
        let err = lenient.run(&grid, &mut table, &mut pipeline).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::TooManyTimePoints { .. })
        ));
    }

    #[test]
    fn test_empty_grid() {
        let temp_dir = TempDir::new().unwrap();
        let mut options: BTreeMap<String, Vec<String>> = default_grid();
        options.insert("model".to_string(), Vec::new());
        let grid = SearchGrid::new(options).unwrap();
        let mut table = ResultsTable::new(&grid.option_names());

        let summary = Memoizer::new(temp_dir.path().join("r.csv"))
            .with_progress(false)
            .run(&grid, &mut table, &mut FakePipeline::new())
            .unwrap();
        assert_eq!(summary, GridSummary::default());
    }
}
