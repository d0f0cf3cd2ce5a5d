//! qmagg - quality-measure aggregation CLI
//!
//! ## Commands
//!
//! - `aggregate`: fold evaluator results into per-network summaries
//! - `classify`: show the run identity derived from result paths
//! - `parse-score`: extract the score from evaluator output
//! - `show`: print a summary file as JSON

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, Level};

use qmagg_core::{
    classify_path, parse_score, read_seed_file, AggConfig, AggregationReport, Aggregator,
    Expectation, FormSelection, RunConfig, SummaryFile, SummaryForm, SummaryKey, WriteMode,
};

#[derive(Parser)]
#[command(name = "qmagg")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Aggregate clustering quality-measure evaluations", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Aggregate results of one algorithm and measure, or a whole batch
    Aggregate(AggregateArgs),

    /// Print the run identity of result file paths
    Classify {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Parse a score from evaluator output (stdin when no file is given)
    ParseScore { file: Option<PathBuf> },

    /// Print a summary file as JSON
    Show {
        /// Summary file (`.res` or `.resx`)
        path: PathBuf,
    },
}

#[derive(clap::Args)]
struct AggregateArgs {
    /// Batch configuration (TOML); overrides the single-pair flags
    #[arg(short, long, env = "QMAGG_CONFIG")]
    config: Option<PathBuf>,

    /// Root of the result tree
    #[arg(long, env = "QMAGG_RESULTS_DIR", default_value = "results")]
    results_dir: PathBuf,

    /// Where summaries are written
    #[arg(long, env = "QMAGG_OUTPUT_DIR", default_value = "aggregated")]
    output_dir: PathBuf,

    /// Algorithm name
    #[arg(short, long)]
    algorithm: Option<String>,

    /// Quality measure name
    #[arg(short, long)]
    measure: Option<String>,

    /// Seed the results were produced with
    #[arg(long, env = "QMAGG_SEED", conflicts_with = "seed_file")]
    seed: Option<u64>,

    /// File holding the seed
    #[arg(long, env = "QMAGG_SEED_FILE")]
    seed_file: Option<PathBuf>,

    /// replace | merge
    #[arg(long, default_value = "replace")]
    mode: String,

    /// Recompute all rows, also after a seed change
    #[arg(long)]
    revalue: bool,

    /// terse | extended | both
    #[arg(long, default_value = "both")]
    forms: String,

    /// Expected grid as <instances>x<shuffles>; missing runs count as fails
    #[arg(long)]
    expect: Option<String>,

    /// Print reports as JSON
    #[arg(long)]
    report_json: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    qmagg_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Aggregate(args) => cmd_aggregate(&args),
        Commands::Classify { paths } => cmd_classify(&paths),
        Commands::ParseScore { file } => cmd_parse_score(file.as_deref()),
        Commands::Show { path } => cmd_show(&path),
    }
}

fn parse_expectation(text: &str) -> Result<Expectation> {
    let (instances, shuffles) = text
        .split_once(['x', 'X'])
        .context("expected grid as <instances>x<shuffles>")?;
    Ok(Expectation {
        instances: instances
            .trim()
            .parse()
            .with_context(|| format!("invalid instance count {instances:?}"))?,
        shuffles: shuffles
            .trim()
            .parse()
            .with_context(|| format!("invalid shuffle count {shuffles:?}"))?,
    })
}

fn jobs_from_args(args: &AggregateArgs) -> Result<Vec<AggConfig>> {
    if let Some(path) = &args.config {
        let batch = RunConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?;
        return Ok(batch.jobs()?);
    }

    let algorithm = args
        .algorithm
        .clone()
        .context("--algorithm is required without --config")?;
    let measure = args
        .measure
        .clone()
        .context("--measure is required without --config")?;
    let seed = match (args.seed, &args.seed_file) {
        (Some(seed), _) => seed,
        (None, Some(file)) => read_seed_file(file)
            .with_context(|| format!("Failed to read seed file {}", file.display()))?,
        (None, None) => bail!("either --seed or --seed-file is required"),
    };
    let mode: WriteMode = args.mode.parse()?;
    let forms: FormSelection = args.forms.parse()?;
    let expectation = args.expect.as_deref().map(parse_expectation).transpose()?;

    let job = AggConfig::new(
        &args.results_dir,
        &args.output_dir,
        algorithm,
        measure,
        seed,
    )
    .with_mode(mode)
    .with_revalue(args.revalue)
    .with_forms(forms)
    .with_expectation(expectation);
    Ok(vec![job])
}

fn print_report(report: &AggregationReport) {
    println!(
        "{}/{}: {} ({} networks, {} records, {} parse failures, {} skipped)",
        report.key.algorithm,
        report.key.measure,
        report.plan.label(),
        report.networks,
        report.records,
        report.parse_failures,
        report.skipped,
    );
    if !report.recomputed.is_empty() {
        println!("  recomputed: {}", report.recomputed.join(", "));
    }
    for path in &report.written {
        println!("  wrote {}", path.display());
    }
    for path in &report.backups {
        println!("  backup {}", path.display());
    }
}

/// Reports of the pairs that succeeded and the failures of the others.
/// A failing pair never stops the pairs after it.
fn run_jobs(jobs: Vec<AggConfig>) -> (Vec<AggregationReport>, Vec<anyhow::Error>) {
    let mut reports = Vec::with_capacity(jobs.len());
    let mut failures = Vec::new();
    for job in jobs {
        let label = format!("{}/{}", job.algorithm, job.measure);
        match Aggregator::new(job).run() {
            Ok(report) => reports.push(report),
            Err(e) => {
                error!(event = "aggregate.failed", pair = %label, error = %e);
                failures.push(
                    anyhow::Error::new(e).context(format!("Aggregation of {label} failed")),
                );
            }
        }
    }
    (reports, failures)
}

fn cmd_aggregate(args: &AggregateArgs) -> Result<()> {
    let jobs = jobs_from_args(args)?;
    let total = jobs.len();
    let (reports, failures) = run_jobs(jobs);

    if args.report_json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        reports.iter().for_each(print_report);
    }
    for failure in &failures {
        eprintln!("error: {failure:#}");
    }
    if reports.is_empty() {
        bail!("all {total} aggregation(s) failed");
    }
    Ok(())
}

fn cmd_classify(paths: &[PathBuf]) -> Result<()> {
    let mut failed = 0;
    for path in paths {
        match classify_path(path) {
            Ok(id) => println!(
                "{}\tnetwork={}\tinstance={}\tshuffle={}\tlevel={}",
                path.display(),
                id.network_key(),
                id.instance_index(),
                id.shuffle_index(),
                id.level,
            ),
            Err(e) => {
                eprintln!("{}\t{e}", path.display());
                failed += 1;
            }
        }
    }
    if failed > 0 {
        bail!("{failed} of {} paths could not be classified", paths.len());
    }
    Ok(())
}

fn cmd_parse_score(file: Option<&Path>) -> Result<()> {
    let text = match file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read stdin")?;
            buf
        }
    };
    let score = parse_score(&text)?;
    println!("{}", qmagg_core::fmt_num(score));
    Ok(())
}

fn cmd_show(path: &Path) -> Result<()> {
    let form = match path.extension().and_then(|e| e.to_str()) {
        Some("res") => SummaryForm::Terse,
        Some("resx") => SummaryForm::Extended,
        _ => bail!("{} is not a .res or .resx summary", path.display()),
    };
    let measure = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    let algorithm = path
        .parent()
        .and_then(|p| p.file_name())
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    let file = SummaryFile::new(path, form, SummaryKey::new(algorithm, measure));
    let table = file
        .load()?
        .with_context(|| format!("{} does not exist", path.display()))?;

    let out = serde_json::json!({
        "algorithm": algorithm,
        "measure": measure,
        "generated_at": table.generated_at,
        "seed": table.seed,
        "rows": table.rows,
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expectation_grid_parses() {
        let exp = parse_expectation("3x5").unwrap();
        assert_eq!((exp.instances, exp.shuffles), (3, 5));
        assert!(parse_expectation("3").is_err());
        assert!(parse_expectation("ax2").is_err());
    }

    #[test]
    fn aggregate_flags_build_one_job() {
        let cli = Cli::try_parse_from([
            "qmagg",
            "aggregate",
            "--results-dir",
            "r",
            "--output-dir",
            "o",
            "-a",
            "daoc",
            "-m",
            "nmi",
            "--seed",
            "9",
            "--mode",
            "merge",
            "--expect",
            "2x2",
        ])
        .unwrap();
        let Commands::Aggregate(args) = cli.command else {
            panic!("expected aggregate");
        };
        let jobs = jobs_from_args(&args).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].seed, 9);
        assert_eq!(jobs[0].mode, WriteMode::Merge);
        assert_eq!(jobs[0].expectation.unwrap().runs(), 4);
    }

    #[test]
    fn seed_file_is_read_when_no_seed_given() {
        let dir = tempfile::tempdir().unwrap();
        let seed = dir.path().join("seed");
        std::fs::write(&seed, "31\n").unwrap();
        let cli = Cli::try_parse_from([
            "qmagg",
            "aggregate",
            "-a",
            "daoc",
            "-m",
            "nmi",
            "--seed-file",
            seed.to_str().unwrap(),
        ])
        .unwrap();
        let Commands::Aggregate(args) = cli.command else {
            panic!("expected aggregate");
        };
        assert_eq!(jobs_from_args(&args).unwrap()[0].seed, 31);
    }

    #[test]
    fn failing_pair_does_not_stop_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let results = dir.path().join("results");
        let output = dir.path().join("aggregated");
        let nmi = results.join("daoc").join("nmi");
        std::fs::create_dir_all(&nmi).unwrap();
        std::fs::write(nmi.join("karate.out"), "0.4\n").unwrap();

        let jobs = vec![
            AggConfig::new(&results, &output, "daoc", "mod", 1),
            AggConfig::new(&results, &output, "daoc", "nmi", 1),
        ];
        let (reports, failures) = run_jobs(jobs);
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].key.measure, "nmi");
        assert_eq!(failures.len(), 1);
        assert!(format!("{:#}", failures[0]).contains("daoc/mod"));
        assert!(output.join("daoc").join("nmi.res").exists());
    }

    #[test]
    fn seed_and_seed_file_conflict() {
        let parsed = Cli::try_parse_from([
            "qmagg",
            "aggregate",
            "-a",
            "x",
            "-m",
            "y",
            "--seed",
            "1",
            "--seed-file",
            "s",
        ]);
        assert!(parsed.is_err());
    }
}
