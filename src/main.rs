// src/main.rs

use ciflow::errors::CiflowError;
use ciflow::{cli, logging, run};

/// Exit code for a malformed event.
const EXIT_BAD_EVENT: i32 = 2;

#[tokio::main]
async fn main() {
    let code = match run_main().await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("ciflow error: {err:?}");
            match err.downcast_ref::<CiflowError>() {
                Some(CiflowError::Event(_)) => EXIT_BAD_EVENT,
                _ => 1,
            }
        }
    };
    std::process::exit(code);
}

async fn run_main() -> anyhow::Result<i32> {
    let args = cli::parse();
    logging::init_logging(args.log_level)?;
    Ok(run(args).await?)
}
