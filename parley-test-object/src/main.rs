use std::{env, process::ExitCode};

use log::{debug, LevelFilter};

use parley_test_object::{args::Args, run};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse_known(env::args_os());

    let mut logger = pretty_env_logger::formatted_builder();
    logger.filter_level(LevelFilter::Info);
    if let Ok(filters) = env::var("RUST_LOG") {
        logger.parse_filters(&filters);
    }
    logger.init();

    debug!("Starting Parley test object");

    ExitCode::from(run(args).await)
}
