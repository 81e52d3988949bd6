use std::path::{Path, PathBuf};
use std::process;
use std::str::FromStr;

use clap::Parser;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::ThreadPoolBuilder;
use serde_json::json;
use tracing::{error, info};
use tracing_subscriber::FmtSubscriber;

use clarans_parallel::{
    generate_clustered_points, generate_points, random_means, Clarans, ClaransConfig,
    ClaransError, DataLoader, DataMatrix, DenseMetric, Energy, InitStrategy, L3Variant, Level,
    Norm, Result as ClaransResult, RunOutcome, SearchStrategy,
};

/// Blob means are drawn from `[0, MEAN_SCALE)^dim`.
const MEAN_SCALE: f64 = 10.0;

#[derive(Parser, Debug)]
#[command(name = "clarans-parallel")]
#[command(about = "Parallel CLARANS k-medoids with tiered proposal evaluation", long_about = None)]
struct Args {
    /// Number of clusters
    #[arg(short, long, default_value_t = 8)]
    k: usize,

    /// Number of points to generate when not using --input
    #[arg(short = 'n', long, default_value_t = 20_000)]
    points: usize,

    /// Dimensionality of points when generating
    #[arg(short, long, default_value_t = 2)]
    dim: usize,

    /// Generate Gaussian blobs around this many random means (0 = uniform data)
    #[arg(long, default_value_t = 0)]
    clusters_in_data: usize,

    /// Standard deviation of generated blobs
    #[arg(long, default_value_t = 0.5)]
    spread: f64,

    /// Input dataset (CSV with a header row)
    #[arg(long)]
    input: Option<PathBuf>,

    /// Output file for medoids and run statistics (JSON)
    #[arg(short, long, default_value = "clarans_result.json")]
    output: PathBuf,

    /// Optional file containing per-item cluster assignments (CSV)
    #[arg(long)]
    assignments: Option<PathBuf>,

    /// Evaluator level (0-3)
    #[arg(long, value_parser = parse_from_str::<Level>, default_value = "2")]
    level: Level,

    /// Early-abort rule at level 3 (heuristic, hoeffding)
    #[arg(long, value_parser = parse_from_str::<L3Variant>, default_value = "heuristic")]
    l3_variant: L3Variant,

    /// Evaluate proposals on worker threads and keep the best
    #[arg(long, default_value_t = false)]
    patient: bool,

    /// Worker threads used by the evaluator and updates
    #[arg(long, default_value_t = 1)]
    threads: usize,

    /// Maximum proposals evaluated per round
    #[arg(long, default_value_t = 10_000)]
    max_proposals: usize,

    /// Maximum number of rounds
    #[arg(long, default_value_t = 10_000)]
    max_rounds: usize,

    /// Wall-clock budget in seconds
    #[arg(long, default_value_t = 10.0)]
    max_time: f64,

    /// Stop once the mean energy per item reaches this value
    #[arg(long, default_value_t = 0.0)]
    min_mean_energy: f64,

    /// Energy transform (identity, quadratic, cubic, squarepotential, log, exp, sqrt)
    #[arg(long, value_parser = parse_from_str::<Energy>, default_value = "quadratic")]
    energy: Energy,

    /// Critical radius for squarepotential or coefficient for exp
    #[arg(long)]
    energy_param: Option<f64>,

    /// Distance norm (l1, l2, li)
    #[arg(long, value_parser = parse_from_str::<Norm>, default_value = "l2")]
    metric: Norm,

    /// Initialization method
    #[arg(long, value_parser = parse_from_str::<InitStrategy>, default_value = "kmeans++")]
    init: InitStrategy,

    /// RNG seed
    #[arg(long, default_value_t = 42u64)]
    seed: u64,

    /// Verify every cache after initialisation and after each accepted round
    #[arg(long, default_value_t = false)]
    with_tests: bool,

    /// Override Rayon global thread pool size
    #[arg(long)]
    rayon_threads: Option<usize>,

    /// Verbosity: set RUST_LOG style level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() {
    let args = Args::parse();
    if let Err(err) = init_logging(&args.log_level) {
        eprintln!("failed to initialise logging: {err}");
    }

    if let Err(err) = run(args) {
        error!(error = %err, "clarans run failed");
        process::exit(1);
    }
}

fn init_logging(level: &str) -> Result<(), String> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(match level {
            "trace" => tracing::Level::TRACE,
            "debug" => tracing::Level::DEBUG,
            "warn" => tracing::Level::WARN,
            "error" => tracing::Level::ERROR,
            _ => tracing::Level::INFO,
        })
        .finish();
    tracing::subscriber::set_global_default(subscriber).map_err(|err| err.to_string())
}

fn run(args: Args) -> ClaransResult<()> {
    if let Some(threads) = args.rayon_threads {
        ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .map_err(|err| {
                ClaransError::InvalidConfig(format!(
                    "failed to configure rayon threadpool: {err}"
                ))
            })?;
        info!(threads, "configured rayon global thread pool");
    }

    let mut rng = ChaCha8Rng::seed_from_u64(args.seed);
    let data = load_data(&args, &mut rng)?;

    let config = ClaransConfig {
        k: args.k,
        level: args.level,
        l3_variant: args.l3_variant,
        strategy: if args.patient {
            SearchStrategy::Patient
        } else {
            SearchStrategy::Greedy
        },
        threads: args.threads,
        max_proposals: args.max_proposals,
        max_rounds: args.max_rounds,
        max_time_secs: args.max_time,
        min_mean_energy: args.min_mean_energy,
        energy: with_energy_param(args.energy, args.energy_param),
        seed: args.seed,
        init: args.init,
        with_tests: args.with_tests,
        ..ClaransConfig::default()
    };

    let mut clarans = Clarans::new(DenseMetric::new(data, args.metric), config)?;
    clarans.initialize_with_strategy()?;
    let outcome = clarans.run()?;
    info!(
        time_in_proposals = ?clarans.time_in_proposals(),
        time_in_updates = ?clarans.time_in_updates(),
        "time breakdown"
    );

    write_result(&args, &clarans, &outcome)?;

    if let Some(path) = args.assignments.as_ref() {
        write_assignments(path, &clarans.final_assignment())?;
    }

    Ok(())
}

fn load_data(args: &Args, rng: &mut ChaCha8Rng) -> ClaransResult<DataMatrix> {
    if let Some(path) = args.input.as_deref() {
        info!(path = ?path, "loading input data");
        return DataLoader::load_csv(path);
    }
    if args.clusters_in_data > 0 {
        let per_cluster = args.points.div_ceil(args.clusters_in_data);
        info!(
            points = per_cluster * args.clusters_in_data,
            dim = args.dim,
            clusters = args.clusters_in_data,
            spread = args.spread,
            "generating synthetic clustered data"
        );
        let means = random_means(args.clusters_in_data, args.dim, MEAN_SCALE, rng);
        return generate_clustered_points(per_cluster, &means, args.spread, rng);
    }
    info!(points = args.points, dim = args.dim, "generating synthetic uniform data");
    Ok(generate_points(args.points, args.dim, rng))
}

fn with_energy_param(energy: Energy, param: Option<f64>) -> Energy {
    match (energy, param) {
        (Energy::SquarePotential { .. }, Some(critical_radius)) => {
            Energy::SquarePotential { critical_radius }
        }
        (Energy::Exp { .. }, Some(coeff)) => Energy::Exp { coeff },
        (energy, _) => energy,
    }
}

fn write_result(
    args: &Args,
    clarans: &Clarans<DenseMetric>,
    outcome: &RunOutcome,
) -> ClaransResult<()> {
    let data = clarans.metric().data();
    let medoids: Vec<Vec<f64>> = clarans
        .centers()
        .iter()
        .map(|&c| data.row(c).to_vec())
        .collect();
    let cluster_sizes: Vec<usize> = (0..clarans.centers().len())
        .map(|k| clarans.store().members(k).len() + 1)
        .collect();
    let config = clarans.config();

    let dump = json!({
        "k": config.k,
        "dim": data.ncols(),
        "rows": data.nrows(),
        "outcome": outcome,
        "cluster_sizes": cluster_sizes,
        "center_indices": clarans.centers(),
        "medoids": medoids,
        "time_in_proposals_seconds": clarans.time_in_proposals().as_secs_f64(),
        "time_in_updates_seconds": clarans.time_in_updates().as_secs_f64(),
        "config": config,
        "metric": args.metric,
        "data_source": if let Some(path) = args.input.as_ref() {
            json!({
                "type": "file",
                "path": path.display().to_string(),
            })
        } else {
            json!({
                "type": "synthetic",
                "points": data.nrows(),
                "dim": args.dim,
                "clusters_in_data": args.clusters_in_data,
                "spread": args.spread,
            })
        },
        "assignments_path": args.assignments.as_ref().map(|p| p.display().to_string()),
    });

    std::fs::write(&args.output, serde_json::to_string_pretty(&dump)?)?;
    info!(path = ?args.output, "wrote clustering summary");
    Ok(())
}

fn write_assignments(path: &Path, labels: &[usize]) -> ClaransResult<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["index", "cluster"])?;
    for (idx, cluster) in labels.iter().enumerate() {
        writer.write_record([idx.to_string(), cluster.to_string()])?;
    }
    writer.flush()?;
    info!(path = ?path, "wrote assignments CSV");
    Ok(())
}

fn parse_from_str<T>(raw: &str) -> Result<T, String>
where
    T: FromStr<Err = ClaransError>,
{
    T::from_str(raw).map_err(|err| err.to_string())
}
