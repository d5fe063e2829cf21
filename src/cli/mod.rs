use crate::experiment::ExperimentConfig;
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

/// labgrid: hyperparameter grid runner for ICU test-ordering prediction
#[derive(Parser, Debug)]
#[command(name = "labgrid")]
#[command(about = "Grid search over imputation, scaling and model options for ICU time series")]
#[command(version)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run every untested configuration of the grid
    Run(RunArgs),

    /// Show which grid points are already tested
    Status(StatusArgs),
}

/// Grid run arguments
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Per-hour feature table (CSV or TSV, optionally gzipped)
    #[arg(short, long, required = true)]
    pub features: PathBuf,

    /// Per-subject label table
    #[arg(short, long, required = true)]
    pub labels: PathBuf,

    /// Experiment configuration file (JSON)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Results table path
    #[arg(short, long)]
    pub results: Option<PathBuf>,

    /// Directory for imputation caches and search artifacts
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// Only use the first N subjects
    #[arg(long)]
    pub subjects: Option<usize>,

    /// Maximum training epochs
    #[arg(short, long)]
    pub epochs: Option<usize>,

    /// Batch size
    #[arg(short, long)]
    pub batch_size: Option<usize>,

    /// Architecture search trials
    #[arg(long)]
    pub trials: Option<usize>,

    /// Random seed
    #[arg(long)]
    pub seed: Option<u64>,

    /// Fast iteration: re-run everything, save nothing
    #[arg(long)]
    pub fast: bool,

    /// Skip configurations that fail to train instead of aborting
    #[arg(long)]
    pub keep_going: bool,
}

impl RunArgs {
    /// Override configuration values given on the command line
    pub fn apply(&self, config: &mut ExperimentConfig) {
        if let Some(results) = &self.results {
            config.results_path = results.clone();
        }
        if let Some(cache_dir) = &self.cache_dir {
            config.cache_dir = cache_dir.clone();
        }
        if let Some(subjects) = self.subjects {
            config.num_subjects = Some(subjects);
        }
        if let Some(epochs) = self.epochs {
            config.epochs = epochs;
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(trials) = self.trials {
            config.trials = trials;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if self.fast {
            config.fast_iteration = true;
        }
        if self.keep_going {
            config.strict = false;
        }
    }
}

/// Status arguments
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Experiment configuration file (JSON)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Results table path
    #[arg(short, long)]
    pub results: Option<PathBuf>,
}

/// Parse CLI arguments
pub fn parse_args() -> Cli {
    Cli::parse()
}

/// Configuration from `path`, or the defaults
pub fn load_config(path: Option<&Path>) -> Result<ExperimentConfig> {
    match path {
        Some(path) => ExperimentConfig::from_file(path),
        None => Ok(ExperimentConfig::default()),
    }
}

/// Setup logging based on verbosity
pub fn setup_logging(verbose: bool) {
    let filter = if verbose { "debug" } else { "info" };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_args() {
        let cli = Cli::parse_from([
            "labgrid", "run",
            "-f", "train_features.csv",
            "-l", "train_labels.csv",
            "--subjects", "100",
            "--fast",
        ]);

        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.features, PathBuf::from("train_features.csv"));
                assert_eq!(args.labels, PathBuf::from("train_labels.csv"));

                let mut config = ExperimentConfig::default();
                args.apply(&mut config);
                assert_eq!(config.num_subjects, Some(100));
                assert!(config.fast_iteration);
                assert!(config.strict);
                assert_eq!(config.epochs, 1000);
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_status_args() {
        let cli = Cli::parse_from(["labgrid", "-v", "status", "-r", "results.csv"]);
        assert!(cli.verbose);

        match cli.command {
            Commands::Status(args) => {
                assert_eq!(args.results, Some(PathBuf::from("results.csv")));
                assert!(args.config.is_none());
            }
            _ => panic!("Expected Status command"),
        }
    }

    #[test]
    fn test_run_requires_inputs() {
        assert!(Cli::try_parse_from(["labgrid", "run", "-f", "x.csv"]).is_err());
    }
}
