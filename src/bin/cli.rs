//! loopclaim CLI - Debug tool for loop detection and claim resolution
//!
//! Usage:
//!   loopclaim-cli loops <trace.json>
//!   loopclaim-cli validate <trace.json> --duration <s> [--level <n>] [--source <live|manual|import>]
//!   loopclaim-cli claim <trace.json> --duration <s> --player <id> [--points <n>] [--territories <file>]
//!   loopclaim-cli simulate [--scenario <single|multi|long>] [--output <file>]
//!
//! Traces are JSON arrays of `{"lat", "lng", "timestamp"?}` samples. The
//! tool shows verbose output of every pipeline stage, helping to understand
//! why a run claims, steals or is rejected.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::{Parser, Subcommand, ValueEnum};
use loopclaim::{
    BalanceConfig, ClaimProcessor, ClaimRequest, ClaimResponse, ClaimSource, GpsPoint,
    MemoryTerritoryStore, PlayerProfile, PolygonMetrics, Territory, geo_utils,
    loops::extract_loops_with_config, synthetic::RunScenario, validation::validate_for_source,
};

#[derive(Parser)]
#[command(name = "loopclaim-cli")]
#[command(about = "Debug tool for loop detection and territory claims", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Balance configuration JSON overriding the defaults
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose debug output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum SourceArg {
    Live,
    Manual,
    Import,
}

impl From<SourceArg> for ClaimSource {
    fn from(source: SourceArg) -> Self {
        match source {
            SourceArg::Live => ClaimSource::Live,
            SourceArg::Manual => ClaimSource::Manual,
            SourceArg::Import => ClaimSource::Import,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ScenarioArg {
    Single,
    Multi,
    Long,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract closed loops from a trace and print their metrics
    Loops {
        /// Trace JSON file
        trace: PathBuf,
    },

    /// Validate a trace as a claim
    Validate {
        /// Trace JSON file
        trace: PathBuf,

        /// Run duration in seconds
        #[arg(short, long)]
        duration: f64,

        /// Level of the runner
        #[arg(short, long, default_value = "1")]
        level: u32,

        /// Where the trace came from
        #[arg(short, long, value_enum, default_value = "live")]
        source: SourceArg,
    },

    /// Run the full claim pipeline against a territory snapshot
    Claim {
        /// Trace JSON file
        trace: PathBuf,

        /// Run duration in seconds
        #[arg(short, long)]
        duration: f64,

        /// Claiming player id
        #[arg(short, long)]
        player: String,

        /// Total points of the claiming player
        #[arg(long, default_value = "0")]
        points: u64,

        /// Existing territories (JSON array)
        #[arg(short, long)]
        territories: Option<PathBuf>,

        /// Where the trace came from
        #[arg(short, long, value_enum, default_value = "live")]
        source: SourceArg,

        /// Write the resulting territories here
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Generate a synthetic run
    Simulate {
        #[arg(short, long, value_enum, default_value = "multi")]
        scenario: ScenarioArg,

        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format(|buf, record| writeln!(buf, "[{:5}] {}", record.level(), record.args()))
        .init();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            std::process::exit(2);
        }
    };

    let result = match cli.command {
        Commands::Loops { trace } => run_loops(&trace, &config),
        Commands::Validate {
            trace,
            duration,
            level,
            source,
        } => run_validate(&trace, duration, level, source.into(), &config),
        Commands::Claim {
            trace,
            duration,
            player,
            points,
            territories,
            source,
            output,
        } => run_claim(
            &trace,
            duration,
            PlayerProfile::new(player, points),
            territories.as_deref(),
            source.into(),
            output.as_deref(),
            &config,
        ),
        Commands::Simulate { scenario, output } => run_simulate(scenario, output.as_deref()),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn load_config(path: Option<&Path>) -> Result<BalanceConfig, String> {
    match path {
        Some(path) => {
            let json = fs::read_to_string(path).map_err(|e| e.to_string())?;
            BalanceConfig::from_json_str(&json).map_err(|e| e.to_string())
        }
        None => Ok(BalanceConfig::default()),
    }
}

fn load_trace(path: &Path) -> Result<Vec<GpsPoint>, String> {
    let json = fs::read_to_string(path).map_err(|e| e.to_string())?;
    let points: Vec<GpsPoint> = serde_json::from_str(&json).map_err(|e| e.to_string())?;
    println!("Loaded {} points from {}", points.len(), path.display());
    Ok(points)
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as i64)
}

fn run_loops(trace: &Path, config: &BalanceConfig) -> Result<(), String> {
    let points = load_trace(trace)?;

    println!("\n{}", "=".repeat(60));
    println!("LOOP EXTRACTION");
    println!("{}", "=".repeat(60));
    println!(
        "Path distance: {:.0}m, endpoints {:.0}m apart",
        geo_utils::path_distance(&points),
        geo_utils::closure_gap(&points).unwrap_or(0.0)
    );

    let loops = extract_loops_with_config(&points, &config.loops);
    println!("Found {} loops", loops.len());

    for (i, l) in loops.iter().enumerate() {
        let distance = geo_utils::path_distance(l.points());
        let metrics = PolygonMetrics::measure(l, distance, 0.0);
        println!(
            "  [{}] {} vertices, area {:.0} m², perimeter {:.0}m",
            i + 1,
            l.len(),
            metrics.area,
            metrics.perimeter
        );
    }
    Ok(())
}

fn run_validate(
    trace: &Path,
    duration: f64,
    level: u32,
    source: ClaimSource,
    config: &BalanceConfig,
) -> Result<(), String> {
    let points = load_trace(trace)?;
    let area = geo_utils::polygon_area(&points);

    let report = validate_for_source(
        &points,
        duration,
        area,
        level,
        source,
        &config.loops,
        &config.validation,
        &config.rewards,
    );

    println!("\n{}", "=".repeat(60));
    println!("VALIDATION");
    println!("{}", "=".repeat(60));
    println!(
        "Area {:.0} m², distance {:.0}m, pace {:.2} min/km",
        area,
        geo_utils::path_distance(&points),
        geo_utils::average_pace(geo_utils::path_distance(&points), duration)
    );

    if report.is_valid {
        println!("  [OK] Run is valid");
    } else {
        for message in report.messages() {
            println!("  [ERR] {}", message);
        }
    }
    Ok(())
}

fn run_claim(
    trace: &Path,
    duration: f64,
    player: PlayerProfile,
    territories: Option<&Path>,
    source: ClaimSource,
    output: Option<&Path>,
    config: &BalanceConfig,
) -> Result<(), String> {
    let path = load_trace(trace)?;
    let existing: Vec<Territory> = match territories {
        Some(file) => {
            let json = fs::read_to_string(file).map_err(|e| e.to_string())?;
            serde_json::from_str(&json).map_err(|e| e.to_string())?
        }
        None => Vec::new(),
    };
    println!("Loaded {} existing territories", existing.len());

    let store = MemoryTerritoryStore::with_territories(existing);
    let processor = ClaimProcessor::new(config.clone());
    let request = ClaimRequest {
        path,
        duration,
        source,
        is_public: false,
    };

    let result = processor.process(&store, &request, &player, now_ms());

    if let Ok(report) = &result {
        println!("\n{}", "=".repeat(60));
        println!("OUTCOMES");
        println!("{}", "=".repeat(60));
        for outcome in &report.outcomes {
            let detail = outcome
                .reject_reason
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default();
            println!(
                "  {:?} {} ({:+.0} m², +{} pts) {}",
                outcome.action,
                outcome.territory_id,
                outcome.area_delta,
                outcome.points_gained,
                detail
            );
        }
        for invalid in &report.invalid_loops {
            println!(
                "  [SKIP] loop of {:.0} m²: {} violations",
                invalid.area,
                invalid.errors.len()
            );
        }
    }

    let response = ClaimResponse::from_result(&result);
    let json = serde_json::to_string_pretty(&response).map_err(|e| e.to_string())?;
    println!("\n{}", json);

    if let Some(output) = output {
        let territories = store.territories().map_err(|e| e.to_string())?;
        let json = serde_json::to_string_pretty(&territories).map_err(|e| e.to_string())?;
        fs::write(output, json).map_err(|e| e.to_string())?;
        println!("Wrote {} territories to {}", territories.len(), output.display());
    }
    Ok(())
}

fn run_simulate(scenario: ScenarioArg, output: Option<&Path>) -> Result<(), String> {
    let scenario = match scenario {
        ScenarioArg::Single => RunScenario::single_block(),
        ScenarioArg::Multi => RunScenario::multi_loop(),
        ScenarioArg::Long => RunScenario::long_run(),
    };
    let run = scenario.generate();
    let json = serde_json::to_string_pretty(&run.trace).map_err(|e| e.to_string())?;

    match output {
        Some(path) => {
            fs::write(path, json).map_err(|e| e.to_string())?;
            eprintln!(
                "Wrote {} points ({} loops, {:.0}s) to {}",
                run.trace.len(),
                run.expected_loops,
                run.duration_seconds,
                path.display()
            );
        }
        None => println!("{}", json),
    }
    Ok(())
}
