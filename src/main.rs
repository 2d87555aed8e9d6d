// src/main.rs

use std::process::ExitCode;

use jobdag::{cli, logging, run};

#[tokio::main]
async fn main() -> ExitCode {
    let args = cli::parse();
    if let Err(err) = logging::init_logging(args.log_level) {
        eprintln!("jobdag: {err:#}");
        return ExitCode::from(2);
    }

    // A `--job` run that did not succeed also ends up here.
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}
