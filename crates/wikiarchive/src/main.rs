use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use wikiarchive_core::config::{CliOverrides, DEFAULT_CONFIG_FILENAME, HarvestConfig, load_config};
use wikiarchive_core::harvest::{HarvestPlan, HarvestReport, run_harvest, run_plan};

#[derive(Debug, Parser)]
#[command(
    name = "wikiarchive",
    version,
    about = "Archive MediaWiki category members as wikitext and rendered HTML"
)]
struct Cli {
    #[arg(long, global = true, help = "Enable debug logging")]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Discover, fetch and store every page, then write index.json
    Harvest(SelectionArgs),
    /// Discover and build the worklist without fetching pages or writing files
    Discover(DiscoverArgs),
}

#[derive(Debug, Args)]
struct SelectionArgs {
    #[arg(long, value_name = "PATH", help = "TOML config file (default: ./wikiarchive.toml)")]
    config: Option<PathBuf>,
    #[arg(long, value_name = "DIR")]
    output: Option<PathBuf>,
    #[arg(long, value_name = "TOPICS", value_delimiter = ',')]
    topics: Option<Vec<String>>,
    #[arg(long, value_name = "N")]
    max_pages: Option<usize>,
    #[arg(long, value_name = "N")]
    workers: Option<usize>,
}

#[derive(Debug, Args)]
struct DiscoverArgs {
    #[command(flatten)]
    selection: SelectionArgs,
    #[arg(long, help = "Print the plan as JSON")]
    json: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Harvest(args) => run_harvest_command(&args),
        Commands::Discover(args) => run_discover_command(&args),
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

fn resolve_config(args: &SelectionArgs) -> Result<HarvestConfig> {
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILENAME));
    let file = load_config(&config_path)?;
    if config_path.exists() {
        log::info!("loaded configuration from {}", normalize_path(&config_path));
    }
    let overrides = CliOverrides {
        output: args.output.clone(),
        topics: args.topics.clone(),
        max_pages: args.max_pages,
        workers: args.workers,
    };
    Ok(HarvestConfig::resolve(&file, &overrides))
}

fn run_harvest_command(args: &SelectionArgs) -> Result<()> {
    let config = resolve_config(args)?;
    let report = run_harvest(&config)?;
    print_report(&report);
    Ok(())
}

fn run_discover_command(args: &DiscoverArgs) -> Result<()> {
    let config = resolve_config(&args.selection)?;
    let plan = run_plan(&config)?;
    if args.json {
        let rendered =
            serde_json::to_string_pretty(&plan).context("failed to serialize harvest plan")?;
        println!("{rendered}");
    } else {
        print_plan(&plan, config.max_pages);
    }
    Ok(())
}

fn print_plan(plan: &HarvestPlan, max_pages: usize) {
    println!("wikiarchive discover");
    for (topic, result) in plan.categories.iter() {
        match &result.search_query {
            Some(query) => println!(
                "  {topic}: {} members, search {query:?}: {} hits",
                result.count,
                result.search_hits.unwrap_or(0)
            ),
            None => println!("  {topic}: {} members", result.count),
        }
        if let Some(error) = &result.error {
            println!("    listing error: {error}");
        }
        if let Some(error) = &result.search_error {
            println!("    search error: {error}");
        }
    }
    println!("discovered: {}", plan.stats.discovered);
    println!("unique: {}", plan.stats.unique);
    println!("worklist: {} (cap {max_pages})", plan.stats.kept);
    println!("requests: {}", plan.requests);
    let gaps = plan.gaps();
    if !gaps.is_empty() {
        println!("gaps: {}", gaps.join(", "));
    }
    for title in plan.worklist.iter() {
        println!("  {title}");
    }
}

fn print_report(report: &HarvestReport) {
    println!("wikiarchive harvest");
    println!("topics: {}", report.topics);
    println!("discovered: {}", report.discovered);
    println!("unique: {}", report.unique);
    println!("worklist: {}", report.worklist);
    println!("archived: {}", report.archived);
    println!("failed: {}", report.failed);
    println!("requests: {}", report.requests);
    if report.gaps.is_empty() {
        println!("gaps: <none>");
    } else {
        println!("gaps: {}", report.gaps.join(", "));
    }
    println!("manifest: {}", normalize_path(&report.manifest_path));
    println!("names: {}", normalize_path(&report.names_path));
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
