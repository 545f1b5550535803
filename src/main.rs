//! This file defines the ensemble-explorer binary entry point.

use ensemble_explorer::app;
use ensemble_explorer::cli;
use ensemble_explorer::error::ErrorReport;
use ensemble_explorer::metrics;
use ensemble_explorer::tracing;

use std::process::ExitCode;

/// Application entry point
#[tokio::main]
async fn main() -> ExitCode {
    let args = cli::parse();
    tracing::init_tracing(&args);
    metrics::register_metrics();
    let code = match app::run(&args).await {
        Ok(summary) if summary.is_success() => {
            ::tracing::info!("Completed {} analyses", summary.succeeded.len());
            ExitCode::SUCCESS
        }
        Ok(summary) => {
            ::tracing::error!(
                "{} of {} analyses failed",
                summary.failed.len(),
                summary.failed.len() + summary.succeeded.len()
            );
            ExitCode::FAILURE
        }
        Err(err) => {
            ErrorReport::new(&err).log("Run failed");
            ExitCode::FAILURE
        }
    };
    tracing::shutdown_tracing();
    code
}
