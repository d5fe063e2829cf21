use anyhow::{Context, Result};
use labgrid::cli::{load_config, parse_args, setup_logging, Commands, RunArgs, StatusArgs};
use labgrid::experiment::memoizer::Memoizer;
use labgrid::experiment::pipeline::ClinicalPipeline;
use labgrid::experiment::results::ResultsTable;
use labgrid::TrainingBackend;
use tracing::{error, info};

fn main() {
    let cli = parse_args();

    setup_logging(cli.verbose);

    info!("{}", labgrid::info());

    let result = match cli.command {
        Commands::Run(args) => run_grid(args),
        Commands::Status(args) => run_status(args),
    };

    if let Err(e) = result {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run_grid(args: RunArgs) -> Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    args.apply(&mut config);

    let grid = config.search_grid()?;
    info!("Grid has {} configurations", grid.len());
    info!("Results table: {:?}", config.results_path);

    let mut table = ResultsTable::load_or_new(&config.results_path, &grid.option_names())?;

    let device = Default::default();
    let mut pipeline = ClinicalPipeline::<TrainingBackend>::prepare(
        config.clone(),
        &args.features,
        &args.labels,
        device,
    )
    .context("Failed to prepare input tables")?;

    let memoizer = Memoizer::new(&config.results_path)
        .with_persist(config.persist)
        .with_fast_iteration(config.fast_iteration)
        .with_strict(config.strict);
    let summary = memoizer.run(&grid, &mut table, &mut pipeline)?;

    info!("\n=== Grid Results ===");
    info!("Evaluated: {}", summary.evaluated);
    info!("Already tested: {}", summary.skipped);
    info!("Unavailable: {}", summary.unavailable);
    info!("Failed: {}", summary.failed);

    Ok(())
}

fn run_status(args: StatusArgs) -> Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(results) = args.results {
        config.results_path = results;
    }

    let grid = config.search_grid()?;
    let table = ResultsTable::load_or_new(&config.results_path, &grid.option_names())?;

    let mut tested = 0;
    for params in grid.points() {
        if table.is_tested(params) {
            tested += 1;
            match table.best_mean_roc_auc(params) {
                Some(auc) => info!("tested   {}  (mean ROC-AUC {:.4})", params, auc),
                None => info!("tested   {}  (mean ROC-AUC undefined)", params),
            }
        } else {
            info!("pending  {}", params);
        }
    }
    info!("{}/{} configurations tested", tested, grid.len());

    Ok(())
}
