use colored::Colorize;
use convoy_cloud_aws::AwsCloud;
use convoy_config::Settings;
use convoy_core::{PipelineOutcome, Registry, Runtime};
use convoy_tools::ProcessRunner;
use std::sync::Arc;

pub fn handle_list() -> anyhow::Result<()> {
    let registry = Registry::builtin()?;
    let width = registry
        .list()
        .iter()
        .map(|p| p.name.len())
        .max()
        .unwrap_or(0);

    println!("{}", "Pipelines:".bold());
    for pipeline in registry.list() {
        println!(
            "  {}  {}",
            format!("{:width$}", pipeline.name, width = width).cyan(),
            pipeline.summary
        );
    }
    println!();
    println!("Run one with: convoy pipelines run <name> [--key value]...");
    Ok(())
}

pub async fn handle_run(name: &str, args: &[String], json: bool) -> anyhow::Result<()> {
    let registry = Registry::builtin()?;
    // Unknown names fail before any credentials are loaded.
    let pipeline = registry.get(name)?;

    let settings = Settings::from_env()?;
    tracing::debug!(
        infra_dir = %settings.infra_dir.display(),
        region = %settings.aws.region,
        "settings loaded"
    );
    let cloud = AwsCloud::connect(&settings.aws).await;
    let runtime = Runtime::new(
        settings,
        Arc::new(cloud.compute),
        Arc::new(cloud.images),
        Arc::new(cloud.dns),
        Arc::new(ProcessRunner),
    );

    println!("{} {}", "▶ Pipeline:".bold(), pipeline.name.cyan());
    let outcome = registry.run(pipeline.name, &runtime, args).await?;

    match &outcome {
        PipelineOutcome::Deployed(summary) => {
            println!();
            println!(
                "{} {} is up ({} node(s))",
                "✓".green().bold(),
                summary.deployment,
                summary.nodes.len()
            );
            for warning in &summary.warnings {
                println!("  {} {}", "⚠".yellow(), warning);
            }
        }
        PipelineOutcome::Destroyed(report) => {
            if !report.is_clean() {
                println!(
                    "{}",
                    "Some resources may need manual cleanup; see the warnings above.".yellow()
                );
            }
        }
        PipelineOutcome::DnsUpdated(_) => {}
    }

    if json {
        println!("{}", serde_json::to_string(&outcome)?);
    }
    Ok(())
}
