//! Runs the analyses selected on the command line.

use crate::analysis::{Analysis, Runner};
use crate::app_state::{AppState, SharedAppState};
use crate::cli::{self, CommandLineArgs};
use crate::dataset::Dataset;
use crate::error::ExplorerError;
use crate::metrics;

use std::sync::Arc;

/// Variables read by the analyses.
pub const VARIABLES: [&str; 3] = ["elevation", "pcp", "t_mean"];

/// Outcome of a run.
#[derive(Debug, Default, PartialEq)]
pub struct Summary {
    pub succeeded: Vec<Analysis>,
    pub failed: Vec<Analysis>,
}

impl Summary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Opens the dataset once and runs the selected analyses against it.
///
/// Errors opening the dataset are returned. Failures of individual analyses are logged and
/// listed in the summary.
pub async fn run(args: &CommandLineArgs) -> Result<Summary, ExplorerError> {
    let state: SharedAppState = Arc::new(AppState::new(args)?);
    tracing::info!("Opening {}", state.source.location);
    let dataset = Dataset::open_variables(
        &state.chunk_store,
        state.source.location.prefix(),
        &VARIABLES,
    )
    .await?;
    tracing::info!("Opened {}", dataset);

    let runner = Arc::new(Runner::new(
        Arc::new(dataset),
        state.executor.clone(),
        state.surface.clone(),
        args.params(),
    ));
    let mut summary = Summary::default();
    for (analysis, outcome) in runner.run_all(&args.analyses()).await {
        match outcome {
            Ok(_) => summary.succeeded.push(analysis),
            Err(_) => summary.failed.push(analysis),
        }
    }

    if let Some(metrics_file) = &args.metrics_file {
        metrics::write_metrics(&cli::expand_path(metrics_file)?)?;
    }
    Ok(summary)
}
