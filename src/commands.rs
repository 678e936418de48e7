//! Handlers behind the maintenance binary's subcommands.

use crate::cli::{Cli, Commands, OutputFormat};
use crate::config::{load_config, CacheConfig, RepositoryProfile};
use crate::snapshot::file_set::FileSetSpec;
use crate::solution::SolutionCacheManager;
use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;
use tokio_util::sync::CancellationToken;

/// Count project-definition files under `root`
fn count_projects(root: &Path, config: &CacheConfig) -> Result<usize> {
    let patterns: Vec<String> = config
        .snapshot
        .project_extensions
        .iter()
        .map(|ext| format!("**/*.{}", ext))
        .collect();
    let spec = FileSetSpec::new(&patterns, &config.snapshot.exclude)?;
    Ok(spec.collect(root, &CancellationToken::new())?.len())
}

/// Resolve the effective configuration: file and environment, then the
/// profile and cache-root flags
pub fn resolve_config(cli: &Cli, solution: &Path) -> Result<CacheConfig> {
    let mut config = load_config(cli.config.as_deref(), Some(solution))?;

    if let Some(name) = &cli.profile {
        let profile = if name.eq_ignore_ascii_case("auto") {
            let projects = count_projects(solution, &config)?;
            let profile = RepositoryProfile::for_project_count(projects);
            log::info!("{} projects found, using {:?} profile", projects, profile);
            profile
        } else {
            RepositoryProfile::parse(name)
                .with_context(|| format!("Unknown profile '{}'", name))?
        };
        config = profile.apply(config);
    }

    if let Some(root) = &cli.cache_root {
        config.cache_root = Some(root.clone());
    }

    config.validate()?;
    Ok(config)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub async fn run(cli: Cli) -> Result<()> {
    let solution = cli.command.solution().clone();
    let config = resolve_config(&cli, &solution)?;
    let manager = SolutionCacheManager::open(&solution, config)
        .await
        .with_context(|| format!("Failed to open cache for {}", solution.display()))?;
    let cancel = CancellationToken::new();

    match cli.command {
        Commands::Stats { format, .. } => {
            let health = manager.health().await;
            match format {
                OutputFormat::Json => print_json(&health)?,
                OutputFormat::Text => {
                    println!("Solution:     {}", health.solution_root);
                    println!("Cache root:   {}", health.cache_root);
                    println!(
                        "Durable:      {} entries, {} / {} bytes ({:.1}%)",
                        health.durable_entries,
                        health.durable_bytes,
                        health.durable_max_bytes,
                        health.utilization * 100.0
                    );
                    println!("Counters:     {}", health.statistics.combined);
                    if let Some(quota) = &health.quota {
                        println!(
                            "Quota:        {} files, {} bytes, {} expired, {} unused{}",
                            quota.file_count,
                            quota.total_bytes,
                            quota.expired_count,
                            quota.unused_count,
                            if quota.needs_cleanup { " (cleanup recommended)" } else { "" }
                        );
                    }
                    match health.last_cleanup {
                        Some(at) => println!("Last cleanup: {}", at.to_rfc3339()),
                        None => println!("Last cleanup: never"),
                    }
                }
            }
        }
        Commands::Cleanup { format, .. } => {
            let maintenance = manager.maintain().await?;
            let cleanup = manager.cleanup_storage(&cancel).await?;
            match format {
                OutputFormat::Json => print_json(&serde_json::json!({
                    "maintenance": {
                        "expired": maintenance.expired,
                        "evicted": maintenance.evicted,
                        "total_bytes": maintenance.total_bytes,
                    },
                    "cleanup": cleanup,
                }))?,
                OutputFormat::Text => {
                    println!("Maintenance: {}", maintenance);
                    println!("Cleanup:     {}", cleanup);
                }
            }
        }
        Commands::Changes { format, .. } => {
            let changes = manager.pending_changes(&cancel).await?;
            match format {
                OutputFormat::Json => print_json(&changes)?,
                OutputFormat::Text => {
                    println!("{}", changes);
                    for (label, files) in [
                        ("+", &changes.added),
                        ("~", &changes.modified),
                        ("-", &changes.deleted),
                    ] {
                        for file in files {
                            println!("  {} {}", label, file.display());
                        }
                    }
                }
            }
        }
        Commands::Refresh { format, .. } => {
            let report = manager.initialize(&cancel).await?;
            match format {
                OutputFormat::Json => print_json(&report)?,
                OutputFormat::Text => {
                    println!("Changes:     {}", report.changes);
                    println!(
                        "Invalidated: {} keys ({} by dependency, {} by heuristic)",
                        report.invalidated.total(),
                        report.invalidated.exact.len(),
                        report.invalidated.heuristic.len()
                    );
                }
            }
        }
        Commands::Clear { .. } => {
            let removed = manager.clear().await?;
            println!("Removed {} entries", removed);
        }
    }

    manager.shutdown().await?;
    Ok(())
}
