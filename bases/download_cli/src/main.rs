// bases/download_cli/src/main.rs
mod app;
mod args;
mod config;
mod output;

use app::App;
use args::CliArgs;
use clap::Parser;
use color_eyre::Result;
use config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let config = Config::from_args(CliArgs::parse())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_filter().into()),
        )
        .init();

    let app = App::new(config);
    match app.run().await {
        Ok(Some(report)) if report.all_failed() => std::process::exit(1),
        Ok(_) => Ok(()),
        Err(error) => {
            app.print_error(&error);
            std::process::exit(1);
        }
    }
}
