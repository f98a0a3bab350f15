use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use kbmigrate_core::config::{MigrateConfig, load_located_config, locate_config};
use kbmigrate_core::{MigrationReport, migrate};

#[derive(Debug, Parser)]
#[command(
    name = "kbmigrate",
    version,
    about = "Migrate a WordPress knowledge base into a Zendesk Help Center"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(short, long, global = true, help = "Enable debug logging")]
    verbose: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Run one migration pass")]
    Run(RunArgs),
    #[command(about = "Print the resolved configuration (secrets redacted)")]
    Config,
}

#[derive(Debug, Args)]
struct RunArgs {
    #[arg(long, help = "Resolve everything but perform no writes")]
    dry_run: bool,
    #[arg(long, help = "Print the full report as JSON")]
    json: bool,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    match cli.command {
        Some(Commands::Run(args)) => run_migration(cli.config.as_deref(), args),
        Some(Commands::Config) => run_config(cli.config.as_deref()),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn run_migration(config: Option<&Path>, args: RunArgs) -> Result<()> {
    let config = resolve_config(config)?;
    let report = migrate(&config, args.dry_run)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    if !report.success {
        bail!(
            "migration finished with {} failed page(s) and {} error(s)",
            report.failed,
            report.errors.len()
        );
    }
    Ok(())
}

fn run_config(config: Option<&Path>) -> Result<()> {
    let location = locate_config(config, |key| env::var(key).ok());
    let resolved = resolve_config(config)?;
    println!("config_path: {}", normalize_path(&location.path));
    println!("config_exists: {}", format_flag(location.path.exists()));
    println!("config_explicit: {}", format_flag(location.explicit));
    println!("{}", resolved.diagnostics());
    Ok(())
}

fn print_report(report: &MigrationReport) {
    println!("migration report");
    println!("dry_run: {}", report.dry_run);
    println!("pages: {}", report.pages);
    println!("categories: {}", report.categories);
    println!("categories_created: {}", report.categories_created);
    println!("sections_created: {}", report.sections_created);
    println!("created: {}", report.created);
    println!("updated: {}", report.updated);
    println!("unchanged: {}", report.unchanged);
    println!("skipped: {}", report.skipped);
    println!("failed: {}", report.failed);
    println!("requests.wordpress: {}", report.source_requests);
    println!("requests.zendesk: {}", report.sink_requests);
    for result in &report.results {
        println!(
            "page.{}: {} ({})",
            result.page_id,
            result.outcome.label(),
            result.title.as_deref().unwrap_or("<untitled>")
        );
    }
    if !report.errors.is_empty() {
        println!("errors:");
        for error in &report.errors {
            println!("  - {error}");
        }
    }
}

fn resolve_config(config: Option<&Path>) -> Result<MigrateConfig> {
    let location = locate_config(config, |key| env::var(key).ok());
    let file = load_located_config(&location)?;
    MigrateConfig::from_process_env(&file)
}

fn init_tracing(verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_env("KBMIGRATE_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|error| anyhow::anyhow!("failed to initialize tracing subscriber: {error}"))?;

    Ok(())
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
