use clap::Parser;
use tracing_subscriber::EnvFilter;

use warden::cli;
use warden::config;
use warden::errors::WardenError;
use warden::pipeline::{RunReport, RunStatus};

#[tokio::main]
async fn main() {
    let cli = cli::Cli::parse();

    // Initialize logging
    let log_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if cli.log_json {
        subscriber.json().init();
    } else {
        subscriber.with_ansi(!cli.no_color).init();
    }

    let result = match cli.command {
        cli::Commands::Run(args) => cli::run::handle_run(args).await.map(|report| run_exit_code(&report)),
        cli::Commands::Validate(args) => handle_validate(args).await.map(|()| 0),
        cli::Commands::Tools(args) => cli::tools::handle_tools(args).await.map(|()| 0),
    };

    match result {
        Ok(0) => {}
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(error_exit_code(&e));
        }
    }
}

fn error_exit_code(e: &WardenError) -> i32 {
    match e {
        WardenError::Config(_) | WardenError::Yaml(_) => 2,
        WardenError::Infrastructure(_) | WardenError::Docker(_) => 3,
        WardenError::PlannerUnavailable(_) => 4,
        WardenError::Cancelled(_) => 130,
        _ => 1,
    }
}

fn run_exit_code(report: &RunReport) -> i32 {
    match report.status {
        RunStatus::Completed => 0,
        RunStatus::Cancelled => 130,
        _ if report.error_type.as_deref() == Some("PlannerUnavailable") => 4,
        _ => 1,
    }
}

async fn handle_validate(args: cli::commands::ValidateArgs) -> Result<(), WardenError> {
    let path = std::path::PathBuf::from(&args.config);
    let config = config::parse_config(&path).await?;
    let registry = cli::build_registry(&config, None)?;
    println!(
        "Configuration is valid: {} ({} phases, {} tools)",
        args.config,
        config.phases.len(),
        registry.len()
    );
    Ok(())
}
