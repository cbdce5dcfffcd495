//! Config command implementation

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use defensics_api::HttpDefensicsClient;
use defensics_runner::JobConfig;
use serde_json::json;
use std::path::PathBuf;

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Validate a job file and print the effective configuration
    Show(ShowArgs),
}

#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Path to the job file
    #[arg(long, value_name = "PATH")]
    config: PathBuf,

    /// Output as JSON
    #[arg(long)]
    json: bool,
}

/// Execute the config command
pub fn execute(command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Show(args) => show(args),
    }
}

fn show(args: ShowArgs) -> Result<()> {
    let config = JobConfig::load(&args.config)
        .with_context(|| format!("Failed to load job file {}", args.config.display()))?;
    let instance = config.selected_instance()?;
    let poll = config.poll_configuration(|key| std::env::var(key).ok());

    // No credentials are needed to resolve the API root
    let client = HttpDefensicsClient::new(instance.client_settings(None))
        .context("Invalid API server settings")?;

    if args.json {
        let output = json!({
            "instance": instance.name,
            "apiBaseUrl": client.base_url().as_str(),
            "certificateValidationDisabled": instance.certificate_validation_disabled,
            "credentialsId": instance.credentials_id,
            "testPlan": config.step.test_plan,
            "saveResultPackage": config.step.save_result_package,
            "pollIntervalSecs": poll.interval.as_secs(),
            "maxConsecutiveFailures": poll.max_consecutive_failures,
            "requestTimeoutSecs": instance.request_timeout_secs,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print!("{}", config.to_toml_string()?);
        println!();
        println!("# API base URL:             {}", client.base_url());
        println!("# Effective poll interval:  {}s", poll.interval.as_secs());
        println!("# Max consecutive failures: {}", poll.max_consecutive_failures);
    }
    Ok(())
}
