use clap::{Parser, ValueEnum};
use poolcast_application::benchmarking::{run_bench, synthetic_config, synthetic_universe, BenchSummary};
use poolcast_application::config::load_config;
use poolcast_application::fitting::Paradigm;
use poolcast_domain::entities::evaluation::Metric;
use poolcast_domain::repositories::dataset_source::DatasetSource;
use poolcast_infrastructure::dataset::CsvDatasetSource;
use poolcast_infrastructure::solvers::NativeRegressionBackend;
use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Parser)]
#[command(name = "poolcast-bench")]
#[command(about = "Runs the pooling experiment on a synthetic universe or a CSV dataset (dev)")]
struct Args {
    /// Number of synthetic entities (default: 8).
    #[arg(long, default_value_t = 8)]
    entities: usize,

    /// Number of synthetic daily dates per entity (default: 250).
    #[arg(long, default_value_t = 250)]
    days: usize,

    /// Cross-validation folds for the synthetic run.
    #[arg(long, default_value_t = 5)]
    folds: usize,

    /// Worker threads for the synthetic run.
    #[arg(long, default_value_t = 1)]
    workers: usize,

    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Long-format dataset CSV (date, entity_id, target, features). Requires --config.
    #[arg(long, requires = "config")]
    csv: Option<PathBuf>,

    /// TOML experiment config for the CSV run.
    #[arg(long, requires = "csv")]
    config: Option<PathBuf>,

    /// Print a single JSON line instead of human output.
    #[arg(long, default_value_t = false)]
    json: bool,

    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Prometheus metrics listen addr (e.g. 127.0.0.1:9898). Optional.
    #[arg(long)]
    metrics_addr: Option<String>,

    /// Write a CPU profile as an SVG flamegraph to this path (requires feature `pprof`).
    #[arg(long)]
    profile_svg: Option<PathBuf>,
}

fn main() {
    let args = Args::parse();

    if let Err(err) = init_tracing(args.log_format) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
    if let Err(err) = init_metrics(args.metrics_addr.as_deref()) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }

    if let Err(err) = run(&args) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn init_tracing(format: LogFormat) -> Result<(), String> {
    let filter = std::env::var("POOLCAST_LOG").unwrap_or_else(|_| "info".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_new(filter)
        .map_err(|err| format!("invalid log filter: {err}"))?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
    Ok(())
}

#[cfg(feature = "prometheus")]
fn init_metrics(metrics_addr: Option<&str>) -> Result<Option<SocketAddr>, String> {
    use metrics_exporter_prometheus::PrometheusBuilder;

    let Some(raw) = metrics_addr else {
        return Ok(None);
    };
    let addr: SocketAddr = raw
        .parse()
        .map_err(|err| format!("invalid --metrics-addr (expected host:port): {err}"))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|err| format!("failed to install prometheus exporter: {err}"))?;

    tracing::info!(metrics_addr = %addr, "prometheus metrics exporter enabled");
    Ok(Some(addr))
}

#[cfg(not(feature = "prometheus"))]
fn init_metrics(metrics_addr: Option<&str>) -> Result<Option<SocketAddr>, String> {
    if metrics_addr.is_some() {
        return Err("metrics exporter requires poolcast-bench feature `prometheus`".to_string());
    }
    Ok(None)
}

fn run(args: &Args) -> Result<(), String> {
    #[cfg(feature = "pprof")]
    let guard = if let Some(path) = &args.profile_svg {
        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        Some(
            pprof::ProfilerGuard::new(100)
                .map_err(|err| format!("failed to start profiler: {err}"))?,
        )
    } else {
        None
    };

    #[cfg(not(feature = "pprof"))]
    if args.profile_svg.is_some() {
        return Err("profiling requires poolcast-bench feature `pprof`".to_string());
    }

    let backend = NativeRegressionBackend::new();
    let (source_label, summary) = match (&args.csv, &args.config) {
        (Some(csv), Some(config_path)) => {
            let config = load_config(config_path)?;
            let source = CsvDatasetSource::new(
                csv,
                config.dataset.target.clone(),
                config.dataset.features.clone(),
            );
            let dataset = source.load_dataset()?;
            ("csv", run_bench(&dataset, &config, &backend)?)
        }
        _ => {
            let universe = synthetic_universe(args.entities, args.days)?;
            let config = synthetic_config(&universe, args.seed, args.folds, args.workers);
            ("synthetic", run_bench(&universe.dataset, &config, &backend)?)
        }
    };

    metrics::histogram!("poolcast.bench.elapsed_ms", "source" => source_label)
        .record(summary.elapsed_ms as f64);
    metrics::gauge!("poolcast.bench.rows_per_sec", "source" => source_label).set(summary.rows_per_sec);

    #[cfg(feature = "pprof")]
    if let (Some(guard), Some(path)) = (guard, &args.profile_svg) {
        let report = guard
            .report()
            .build()
            .map_err(|err| format!("failed to build profile report: {err}"))?;
        let file = fs::File::create(path)
            .map_err(|err| format!("failed to create {}: {err}", path.display()))?;
        report
            .flamegraph(file)
            .map_err(|err| format!("failed to write flamegraph: {err}"))?;
        tracing::info!(profile_svg = %path.display(), "wrote cpu profile flamegraph");
    }

    if args.json {
        println!("{}", json_line(source_label, &summary));
    } else {
        print_human(source_label, &summary);
    }
    Ok(())
}

fn cv_rmse(summary: &BenchSummary, paradigm: Paradigm) -> Option<f64> {
    summary
        .report
        .cv
        .summary
        .models
        .get(paradigm.label())
        .and_then(|model| model.mean.get(&Metric::Rmse).copied().flatten())
}

fn test_rmse(summary: &BenchSummary, paradigm: Paradigm) -> Option<f64> {
    summary
        .report
        .test_evaluations
        .get(&paradigm)
        .and_then(|eval| eval.rmse)
}

fn json_line(source: &str, summary: &BenchSummary) -> serde_json::Value {
    let paradigms: serde_json::Map<String, serde_json::Value> = Paradigm::ALL
        .iter()
        .map(|p| {
            (
                p.label().to_string(),
                serde_json::json!({
                    "cv_rmse": cv_rmse(summary, *p),
                    "test_rmse": test_rmse(summary, *p),
                    "final_models": summary.report.final_models.get(p).map(|c| c.present_count()),
                }),
            )
        })
        .collect();
    serde_json::json!({
        "source": source,
        "rows": summary.rows,
        "entities": summary.entities,
        "train_rows": summary.report.train_rows,
        "test_rows": summary.report.test_rows,
        "folds_requested": summary.report.cv.summary.folds_requested,
        "folds_succeeded": summary.report.cv.summary.folds_succeeded,
        "elapsed_ms": summary.elapsed_ms,
        "rows_per_sec": summary.rows_per_sec,
        "paradigms": paradigms,
    })
}

fn fmt_metric(value: Option<f64>) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| format!("{v:.4}"))
}

fn print_human(source: &str, summary: &BenchSummary) {
    let cv = &summary.report.cv.summary;
    println!(
        "bench: source={} rows={} entities={} elapsed_ms={} rows_per_sec={:.2}",
        source, summary.rows, summary.entities, summary.elapsed_ms, summary.rows_per_sec
    );
    println!(
        "bench: train_rows={} test_rows={} folds={}/{}",
        summary.report.train_rows, summary.report.test_rows, cv.folds_succeeded, cv.folds_requested
    );
    for paradigm in Paradigm::ALL {
        println!(
            "bench: {} cv_rmse={} test_rmse={}",
            paradigm,
            fmt_metric(cv_rmse(summary, paradigm)),
            fmt_metric(test_rmse(summary, paradigm))
        );
    }
}
