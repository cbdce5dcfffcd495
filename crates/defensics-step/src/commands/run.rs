//! Run command implementation

use anyhow::{Context, Result};
use clap::Args;
use defensics_api::HttpDefensicsClient;
use defensics_runner::{BuildDirContext, BuildStep, JobConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Run the build step
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to the job file
    #[arg(long, value_name = "PATH")]
    config: PathBuf,

    /// Directory for this build's outcome and artifacts
    #[arg(long, value_name = "DIR")]
    build_dir: PathBuf,

    /// Directory shared by all builds of the job; receives the report link
    #[arg(long, value_name = "DIR")]
    job_dir: Option<PathBuf>,
}

/// Execute the run command, returning the exit code of the build outcome
pub async fn execute(args: RunArgs) -> Result<i32> {
    let env = |key: &str| std::env::var(key).ok();

    let config = JobConfig::load(&args.config)
        .with_context(|| format!("Failed to load job file {}", args.config.display()))?;
    let instance = config.selected_instance()?;
    let token = instance
        .resolve_token(env)
        .context("Failed to resolve API credentials")?;
    let client = HttpDefensicsClient::new(instance.client_settings(token))
        .context("Failed to create API client")?;
    let poll_config = config.poll_configuration(env);

    let cancel = CancellationToken::new();
    let ctx = BuildDirContext::create(&args.build_dir, args.job_dir.clone(), cancel.clone())
        .with_context(|| {
            format!(
                "Failed to prepare build directory {}",
                args.build_dir.display()
            )
        })?;
    spawn_signal_handler(cancel);

    info!(
        instance = %instance.name,
        url = %client.base_url(),
        test_plan = %config.step.test_plan,
        "Starting Defensics build step"
    );
    let step = BuildStep::new(
        Arc::new(client),
        config.step.test_plan.clone(),
        poll_config,
        config.step.save_result_package,
    );
    let result = step.execute(&ctx).await;

    println!("{}", result.outcome);
    if let Some(artifact) = &result.artifact {
        println!("Report: {}", artifact.report_path.display());
    }
    Ok(result.outcome.exit_code())
}

/// Turn SIGINT/SIGTERM into a host interruption of the build
fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};

            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => {
                            info!("Received SIGINT (Ctrl+C)");
                        }
                        _ = sigterm.recv() => {
                            info!("Received SIGTERM");
                        }
                    }
                }
                Err(e) => {
                    warn!("Failed to create SIGTERM handler: {e}");
                    if let Err(e) = ctrl_c.await {
                        warn!("Failed to listen for Ctrl+C: {e}");
                        return;
                    }
                    info!("Received SIGINT (Ctrl+C)");
                }
            }
        }

        #[cfg(not(unix))]
        {
            if let Err(e) = ctrl_c.await {
                warn!("Failed to listen for Ctrl+C: {e}");
                return;
            }
            info!("Received Ctrl+C");
        }

        cancel.cancel();
    });
}
