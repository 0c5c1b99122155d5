use clap::Parser;

use tributary::cli::{self, Cli};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let settings = match cli::load_and_merge_config(&cli) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Configuration error: {:#}", anyhow::Error::from(e));
            std::process::exit(2);
        }
    };

    let _log_handle = match cli::init_logger_from_settings(&settings) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Logger initialization error: {:#}", anyhow::Error::from(e));
            std::process::exit(2);
        }
    };

    tracing::info!(
        app = %settings.application.name,
        version = %settings.application.version,
        "Starting"
    );

    if let Err(e) = cli::execute_command(&cli, settings).await {
        let code = e.exit_code();
        tracing::error!(error = %e, "Command failed");
        eprintln!("Error: {:#}", anyhow::Error::from(e));
        std::process::exit(code);
    }
}
