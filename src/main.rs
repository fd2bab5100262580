//! # lcp-toolbox CLI
//!
//! Command-line interface for the lcp-toolbox library.
//! Runs least-cost path and related cost-distance tools against a GRASS
//! GIS session.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use log::error;

use lcp_toolbox::tools::circuit::{self, CircuitOptions, Scenario};
use lcp_toolbox::tools::costnn::{self, CostNnOptions};
use lcp_toolbox::tools::friction::{self, FrictionFormula, FrictionOptions};
use lcp_toolbox::tools::lcp::{self, LcpOptions};
use lcp_toolbox::tools::sample::{self, SampleOptions};
use lcp_toolbox::tools::terrain::{self, TerrainOptions};
use lcp_toolbox::tools::totalcost::{self, TotalCostOptions};
use lcp_toolbox::tools::viewshed::{self, ViewshedOptions};
use lcp_toolbox::{effective_lanes, GisConfig, GrassSession, ProgressCallback};

mod cli;

/// Command-line interface for lcp-toolbox
#[derive(Parser)]
#[command(name = "lcp-toolbox")]
#[command(about = "Least-cost paths and cost-distance analysis over GRASS GIS")]
#[command(long_about = "Least-cost paths and cost-distance analysis over GRASS GIS.

Run inside a GRASS session, or set a launcher prefix so modules can be reached:
  LCP_TOOLBOX_LAUNCHER=\"grass /data/grassdata/loc/PERMANENT --exec\"

Examples:
  lcp-toolbox lcp friction sites --raster-output paths --nearest 3
  lcp-toolbox totalcost friction --output reach --max-cost 5000
  lcp-toolbox friction dem friction --formula Tobler")]
#[command(version = env!("LCP_TOOLBOX_VERSION"))]
struct Cli {
    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Validate parameters and show what would run without touching GRASS
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Least-cost paths between points
    Lcp(LcpArgs),
    /// Count from how many cells each cell is reachable within a cost budget
    Totalcost(TotalCostArgs),
    /// Cost-distance nearest neighbour statistics against random patterns
    Costnn(CostNnArgs),
    /// Slope-based friction surface
    Friction(FrictionArgs),
    /// Deviation from mean elevation
    Terrain(TerrainArgs),
    /// One viewshed per point
    Viewshed(ViewshedArgs),
    /// Circuitscape batch run
    Circuit(CircuitArgs),
    /// Random raster sampling into a CSV file
    Sample(SampleArgs),
}

#[derive(Args)]
struct LcpArgs {
    /// Friction raster
    friction: String,
    /// Point vector layer
    points: String,
    /// Raster counting paths per cell
    #[arg(long)]
    raster_output: Option<String>,
    /// Vector layer of path lines
    #[arg(long)]
    vector_output: Option<String>,
    /// Search radius in map units, 0 for unlimited
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    radius: f64,
    /// Number of nearest points, 0 for all
    #[arg(long, default_value_t = 0)]
    nearest: usize,
    /// Use knight's move
    #[arg(short, long)]
    knight: bool,
    /// Add cost attributes to the vector output
    #[arg(short = 'c', long)]
    cost_attributes: bool,
    /// Points processed concurrently
    #[arg(long)]
    lanes: Option<usize>,
    /// Replace existing outputs
    #[arg(long)]
    overwrite: bool,
}

#[derive(Args)]
struct TotalCostArgs {
    /// Friction raster, cost per map unit
    friction: String,
    /// Output raster
    #[arg(long)]
    output: Option<String>,
    /// Cost budget
    #[arg(long, allow_hyphen_values = true)]
    max_cost: f64,
    /// Only report the edge effect distances
    #[arg(short, long)]
    edge_only: bool,
    /// Use knight's move
    #[arg(short, long)]
    knight: bool,
    /// Cells processed concurrently
    #[arg(long, default_value_t = 4)]
    lanes: usize,
    /// Replace an existing output
    #[arg(long)]
    overwrite: bool,
}

#[derive(Args)]
struct CostNnArgs {
    /// Friction raster
    friction: String,
    /// Point vector layer
    points: String,
    /// Number of random patterns
    #[arg(long, default_value_t = 1)]
    sims: usize,
    /// Use knight's move
    #[arg(short, long)]
    knight: bool,
    /// Points processed concurrently
    #[arg(long)]
    lanes: Option<usize>,
    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct FrictionArgs {
    /// Elevation raster
    dem: String,
    /// Output friction raster
    output: String,
    /// Keep the slope raster under this name
    #[arg(long)]
    slope: Option<String>,
    /// Tobler (alias Hiker) or Minetti
    #[arg(long, default_value = "Tobler")]
    formula: String,
    /// Replace existing outputs
    #[arg(long)]
    overwrite: bool,
}

#[derive(Args)]
struct TerrainArgs {
    /// Input raster
    input: String,
    /// Output raster
    output: String,
    /// Neighbourhood size in cells, positive and odd
    #[arg(long, default_value_t = 3)]
    size: u32,
    /// Circular neighbourhood
    #[arg(short, long)]
    circular: bool,
    /// Replace an existing output
    #[arg(long)]
    overwrite: bool,
}

#[derive(Args)]
struct ViewshedArgs {
    /// Elevation raster
    dem: String,
    /// Observer point layer
    points: String,
    /// Output name prefix, followed by the point id
    #[arg(long, default_value = "viewshed_")]
    prefix: String,
    /// Observer height above ground
    #[arg(long, default_value_t = 1.75)]
    observer_elevation: f64,
    /// Target height above ground
    #[arg(long, default_value_t = 0.0)]
    target_elevation: f64,
    /// Maximum visibility distance, -1 for unlimited
    #[arg(long, default_value_t = -1.0, allow_hyphen_values = true)]
    max_distance: f64,
    /// Account for the earth's curvature
    #[arg(short, long)]
    curvature: bool,
    /// Viewsheds computed concurrently
    #[arg(long)]
    lanes: Option<usize>,
    /// Replace existing outputs
    #[arg(long)]
    overwrite: bool,
}

#[derive(Args)]
struct CircuitArgs {
    /// Resistance raster
    friction: String,
    /// Focal point layer
    points: String,
    /// pairwise, one-to-all or all-to-one
    #[arg(long, default_value = "pairwise")]
    scenario: String,
    /// Low memory mode
    #[arg(short, long)]
    low_memory: bool,
    /// Only import the cumulative current map
    #[arg(short, long)]
    cumulative_only: bool,
    /// Connect four neighbours only
    #[arg(short = 'r', long)]
    four_neighbours: bool,
    /// Output name prefix
    #[arg(long, default_value = "cs")]
    prefix: String,
    /// Replace existing outputs
    #[arg(long)]
    overwrite: bool,
}

#[derive(Args)]
struct SampleArgs {
    /// Raster to sample
    input: String,
    /// CSV file to write
    output: PathBuf,
    /// Cells per sample
    #[arg(long, default_value_t = 1)]
    size: usize,
    /// Number of samples
    #[arg(long, default_value_t = 1)]
    sims: usize,
    /// Replace an existing file
    #[arg(long)]
    overwrite: bool,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("❌ Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging to stderr
    let default_filter = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .target(env_logger::Target::Stderr)
        .init();

    if cli.verbose {
        eprintln!("🧭 lcp-toolbox v{} starting...", env!("LCP_TOOLBOX_VERSION"));
    }

    let config = load_config(cli.config.as_deref())?;
    let gis = GrassSession::new(config.clone());

    match cli.command {
        Command::Lcp(args) => run_lcp(&gis, &config, args, cli.dry_run).await,
        Command::Totalcost(args) => run_totalcost(&gis, &config, args, cli.dry_run).await,
        Command::Costnn(args) => run_costnn(&gis, &config, args, cli.dry_run).await,
        Command::Friction(args) => run_friction(&gis, args, cli.dry_run).await,
        Command::Terrain(args) => run_terrain(&gis, args, cli.dry_run).await,
        Command::Viewshed(args) => run_viewshed(&gis, &config, args, cli.dry_run).await,
        Command::Circuit(args) => run_circuit(&gis, &config, args, cli.dry_run).await,
        Command::Sample(args) => run_sample(&gis, args, cli.dry_run).await,
    }
}

/// Defaults, then the config file if given, then environment overrides
fn load_config(path: Option<&Path>) -> anyhow::Result<GisConfig> {
    let config = match path {
        Some(path) => GisConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => GisConfig::default(),
    };
    Ok(config.with_env())
}

/// Progress bar over scheduler iterations
fn iteration_progress(message: &str) -> ProgressCallback {
    let progress_manager = cli::ProgressManager::new(0, message);
    let pb = progress_manager.pb;
    Arc::new(move |done, total| {
        if pb.length().unwrap_or(0) != total {
            pb.set_length(total);
        }
        pb.set_position(done);
        if done >= total {
            pb.finish_with_message("✅ Done");
        }
    })
}

async fn run_lcp(gis: &GrassSession, config: &GisConfig, args: LcpArgs, dry_run: bool) -> anyhow::Result<()> {
    let lanes = effective_lanes(args.lanes.unwrap_or(config.lanes));
    let mut options = LcpOptions {
        friction: args.friction,
        points: args.points,
        raster_output: args.raster_output,
        vector_output: args.vector_output,
        radius: args.radius,
        nearest: args.nearest,
        knight: args.knight,
        cost_attributes: args.cost_attributes,
        lanes,
        memory_mb: Some(config.memory_mb),
        overwrite: args.overwrite,
        progress: None,
    };
    let policy = options.validate()?;

    if dry_run {
        eprintln!(
            "🔍 [DRY RUN] Would compute least-cost paths over <{}> between points of <{}> ({policy:?}, {lanes} lanes)",
            options.friction, options.points
        );
        return Ok(());
    }

    options.progress = Some(iteration_progress(&format!("🛤️  Least-cost paths from <{}>", options.points)));
    let report = lcp::run(gis, &options).await?;

    eprintln!(
        "✅ {} points, {} iterations, {} lane runs ({} skipped)",
        report.points, report.summary.iterations, report.summary.lane_runs, report.summary.skipped_lanes
    );
    if !report.paths.is_empty() {
        println!("from,to,cost");
        for path in &report.paths {
            println!("{},{},{}", path.from, path.to, path.cost);
        }
    }
    Ok(())
}

async fn run_totalcost(
    gis: &GrassSession,
    config: &GisConfig,
    args: TotalCostArgs,
    dry_run: bool,
) -> anyhow::Result<()> {
    let mut options = TotalCostOptions {
        friction: args.friction,
        output: args.output,
        max_cost: args.max_cost,
        knight: args.knight,
        edge_only: args.edge_only,
        memory_mb: Some(config.memory_mb),
        lanes: effective_lanes(args.lanes),
        overwrite: args.overwrite,
        progress: None,
    };
    options.validate()?;

    if dry_run {
        eprintln!(
            "🔍 [DRY RUN] Would compute total cost over <{}> with budget {} ({} lanes)",
            options.friction, options.max_cost, options.lanes
        );
        return Ok(());
    }

    if !options.edge_only {
        options.progress = Some(iteration_progress(&format!("🗺️  Total cost over <{}>", options.friction)));
    }
    let report = totalcost::run(gis, &options).await?;

    println!("edge_effect_min={}", report.edge_effect.min);
    println!("edge_effect_max={}", report.edge_effect.max);
    if let Some(summary) = report.summary {
        eprintln!("✅ {} start cells in {} iterations", report.cells, summary.iterations);
    }
    Ok(())
}

async fn run_costnn(gis: &GrassSession, config: &GisConfig, args: CostNnArgs, dry_run: bool) -> anyhow::Result<()> {
    let options = CostNnOptions {
        friction: args.friction,
        points: args.points,
        sims: args.sims,
        knight: args.knight,
        lanes: effective_lanes(args.lanes.unwrap_or(config.lanes)),
        memory_mb: Some(config.memory_mb),
    };
    options.validate()?;

    if dry_run {
        eprintln!(
            "🔍 [DRY RUN] Would compare nearest neighbour costs of <{}> with {} random patterns",
            options.points, options.sims
        );
        return Ok(());
    }

    let report = costnn::run(gis, &options).await?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("points={}", report.points);
        println!("observed_mean={}", report.observed_mean);
        println!("simulated_mean={}", report.simulated_mean);
        println!("stddev={}", report.stddev);
        println!("envelope95={},{}", report.lower95, report.upper95);
        println!("envelope99={},{}", report.lower99, report.upper99);
    }
    Ok(())
}

async fn run_friction(gis: &GrassSession, args: FrictionArgs, dry_run: bool) -> anyhow::Result<()> {
    let formula: FrictionFormula = args.formula.parse()?;
    let options = FrictionOptions {
        dem: args.dem,
        output: args.output,
        slope: args.slope,
        formula,
        overwrite: args.overwrite,
    };

    if dry_run {
        eprintln!(
            "🔍 [DRY RUN] Would derive <{}> from <{}> with the {} formula",
            options.output, options.dem, options.formula
        );
        return Ok(());
    }

    friction::run(gis, &options).await?;
    eprintln!("✅ Friction raster <{}> written", options.output);
    Ok(())
}

async fn run_terrain(gis: &GrassSession, args: TerrainArgs, dry_run: bool) -> anyhow::Result<()> {
    let options = TerrainOptions {
        input: args.input,
        output: args.output,
        size: args.size,
        circular: args.circular,
        overwrite: args.overwrite,
    };
    options.validate()?;

    if dry_run {
        eprintln!(
            "🔍 [DRY RUN] Would compute deviation from mean of <{}> over {}x{} cells",
            options.input, options.size, options.size
        );
        return Ok(());
    }

    terrain::run(gis, &options).await?;
    eprintln!("✅ Deviation from mean written to <{}>", options.output);
    Ok(())
}

async fn run_viewshed(gis: &GrassSession, config: &GisConfig, args: ViewshedArgs, dry_run: bool) -> anyhow::Result<()> {
    let options = ViewshedOptions {
        dem: args.dem,
        points: args.points,
        prefix: args.prefix,
        observer_elevation: args.observer_elevation,
        target_elevation: args.target_elevation,
        max_distance: args.max_distance,
        curvature: args.curvature,
        lanes: effective_lanes(args.lanes.unwrap_or(config.lanes)),
        overwrite: args.overwrite,
    };
    options.validate()?;

    if dry_run {
        eprintln!(
            "🔍 [DRY RUN] Would compute viewsheds over <{}> for points of <{}> into {}<id>",
            options.dem, options.points, options.prefix
        );
        return Ok(());
    }

    let outputs = viewshed::run(gis, &options).await?;
    eprintln!("✅ {} viewsheds written", outputs.len());
    for output in outputs {
        println!("{output}");
    }
    Ok(())
}

async fn run_circuit(gis: &GrassSession, config: &GisConfig, args: CircuitArgs, dry_run: bool) -> anyhow::Result<()> {
    let scenario: Scenario = args.scenario.parse()?;
    let mut options = CircuitOptions::new(args.friction, args.points, config.circuitscape.as_str());
    options.scenario = scenario;
    options.low_memory = args.low_memory;
    options.cumulative_only = args.cumulative_only;
    options.four_neighbours = args.four_neighbours;
    options.prefix = args.prefix;
    options.overwrite = args.overwrite;

    if dry_run {
        eprintln!(
            "🔍 [DRY RUN] Would run {} ({} scenario) on <{}> and <{}>",
            options.solver, options.scenario, options.friction, options.points
        );
        return Ok(());
    }

    let imported = circuit::run(gis, &options).await?;
    eprintln!("✅ {} current maps imported", imported.len());
    for name in imported {
        println!("{name}");
    }
    Ok(())
}

async fn run_sample(gis: &GrassSession, args: SampleArgs, dry_run: bool) -> anyhow::Result<()> {
    let options = SampleOptions {
        input: args.input,
        output: args.output,
        size: args.size,
        sims: args.sims,
        overwrite: args.overwrite,
    };
    options.validate()?;

    if dry_run {
        eprintln!(
            "🔍 [DRY RUN] Would draw {} samples of {} cells from <{}> into {}",
            options.sims,
            options.size,
            options.input,
            options.output.display()
        );
        return Ok(());
    }

    let rows = sample::run(gis, &options).await?;
    eprintln!("📁 {rows} samples saved to {}", options.output.display());
    Ok(())
}
