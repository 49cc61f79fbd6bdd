use futures::prelude::*;
use std::panic::AssertUnwindSafe;
use std::process::ExitCode;
use tg_sweeper::tracing_err;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> ExitCode {
    if dotenvy::dotenv().is_err() {
        eprintln!("Dotenv config was not found, ignoring this...")
    }

    let logging_task = tg_sweeper::init_logging();

    let main_fut = AssertUnwindSafe(async {
        let result = try_main().await;

        result.map(|()| ExitCode::SUCCESS).unwrap_or_else(|err| {
            error!(err = tracing_err(&err), "Exitting with an error...");
            ExitCode::FAILURE
        })
    })
    .catch_unwind()
    .unwrap_or_else(|_| {
        error!("Exitting due to a panic...");
        ExitCode::FAILURE
    });

    let exit_code = tokio::select! {
        exit_code = main_fut => exit_code,
        () = abort_signal() => ExitCode::FAILURE,
    };

    logging_task.shutdown().await;

    exit_code
}

async fn try_main() -> tg_sweeper::Result {
    let config = tg_sweeper::Config::load()?;
    tg_sweeper::run(config).await
}

async fn abort_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(
            err = tracing_err(&err),
            "Failed to wait for Ctrl+C, continuing without it..."
        );
        // Never resolve, so that the main task is the one to finish
        future::pending::<()>().await;
    } else {
        info!("Ctrl+C received, exiting forcefully...");
    }
}
