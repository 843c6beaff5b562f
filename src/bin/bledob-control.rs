use clap::Parser;
use log::{error, info};
use bledob_control::{init_logging, run};
use bledob_control::cli::Cli;
use bledob_control::error::{AppRunError, ConfigError};

fn main() -> Result<(), AppRunError> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    info!(concat!("BLEDOB Control ", env!("CARGO_PKG_VERSION")));

    match run(cli) {
        Err(AppRunError::ConfigError { source: ConfigError::CanNotLock { .. } }) => {
            error!("This application has already been started");
            Ok(())
        },
        Err(err) => {
            error!("Unexpected error: {}", err);
            Err(err)
        }
        Ok(_) => Ok(())
    }
}
