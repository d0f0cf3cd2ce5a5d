//! End-to-end aggregation over temporary result trees.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone, Utc};
use qmagg_core::{
    classify_path, AggConfig, AggError, Aggregator, Expectation, FormSelection, UpdatePlan,
    WriteMode,
};

fn at(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 19, 9, minute, 0).unwrap()
}

fn put(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

struct Bench {
    _dir: tempfile::TempDir,
    results: PathBuf,
    output: PathBuf,
}

impl Bench {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let results = dir.path().join("results");
        let output = dir.path().join("aggregated");
        Self {
            _dir: dir,
            results,
            output,
        }
    }

    fn config(&self, seed: u64) -> AggConfig {
        AggConfig::new(&self.results, &self.output, "daoc", "nmi", seed)
    }

    fn terse(&self) -> String {
        fs::read_to_string(self.output.join("daoc/nmi.res")).unwrap()
    }

    fn extended(&self) -> String {
        fs::read_to_string(self.output.join("daoc/nmi.resx")).unwrap()
    }

    fn backups(&self, name: &str) -> Vec<String> {
        let mut found: Vec<String> = fs::read_dir(self.output.join("daoc"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| n.starts_with(&format!("{name}.")) && n != name)
            .collect();
        found.sort();
        found
    }
}

#[test]
fn two_shuffles_average_to_point_seven() {
    let bench = Bench::new();
    // Shuffle 0 peaks at level 1, shuffle 1 at level 0.
    put(&bench.results, "daoc/nmi/N%0.nmi", "0.5\t0\n0.8\t1\n");
    put(&bench.results, "daoc/nmi/N%1.nmi", "0.6\t0\n0.4\t1\n");

    let report = Aggregator::new(bench.config(7))
        .with_timestamp(at(0))
        .run()
        .unwrap();
    assert_eq!(report.plan, UpdatePlan::Fresh);
    assert_eq!(report.records, 4);

    let terse = bench.terse();
    assert!(terse.starts_with("# --- 2026-10-19 09:00:00 (seed: 7) ---\n"));
    assert!(terse.contains("\nN\t0.7\n"));

    let extended = bench.extended();
    assert!(extended.contains("\nN\n\tdaoc>\tnmi: 0.7 (0.6 .. 0.8), s: 0, count: 1, fails: 0, "));
    assert!(extended.contains("d(shuf): 0.7, s(shuf): 0.141421, count(shuf): 2, fails(shuf): 0\n"));
}

#[test]
fn rerun_on_same_inputs_is_byte_identical() {
    let bench = Bench::new();
    put(&bench.results, "daoc/nmi/karate^0.out", "mod: 0.41\n");
    put(&bench.results, "daoc/nmi/karate^1.out", "0.45\n");
    put(&bench.results, "daoc/nmi/jazz.out", "0.3\n");

    Aggregator::new(bench.config(1))
        .with_timestamp(at(0))
        .run()
        .unwrap();
    let (terse, extended) = (bench.terse(), bench.extended());

    let again = Aggregator::new(bench.config(1))
        .with_timestamp(at(5))
        .run()
        .unwrap();
    assert_eq!(again.plan, UpdatePlan::NoOp);
    assert!(again.written.is_empty());
    assert_eq!(bench.terse(), terse);
    assert_eq!(bench.extended(), extended);
    assert!(bench.backups("nmi.res").is_empty());
}

#[test]
fn merge_leaves_other_rows_untouched() {
    let bench = Bench::new();
    put(&bench.results, "daoc/nmi/a.out", "0.123456\n");
    put(&bench.results, "daoc/nmi/b.out", "0.5\n");
    let cfg = bench.config(3).with_mode(WriteMode::Merge);
    Aggregator::new(cfg.clone())
        .with_timestamp(at(0))
        .run()
        .unwrap();
    let a_block = |text: &str| {
        let start = text.find("a\n").unwrap();
        let end = text[start..].find("\nb\n").unwrap();
        text[start..start + end].to_string()
    };
    let before = a_block(&bench.extended());

    fs::remove_file(bench.results.join("daoc/nmi/a.out")).unwrap();
    put(&bench.results, "daoc/nmi/b.out", "0.9\n");
    let report = Aggregator::new(cfg).with_timestamp(at(1)).run().unwrap();
    assert_eq!(report.recomputed, vec!["b"]);

    let terse = bench.terse();
    assert!(terse.contains("\na\t0.123456\n"));
    assert!(terse.contains("\nb\t0.9\n"));
    assert_eq!(a_block(&bench.extended()), before);
}

#[test]
fn replace_drops_networks_no_longer_present() {
    let bench = Bench::new();
    put(&bench.results, "daoc/nmi/a.out", "0.1\n");
    put(&bench.results, "daoc/nmi/b.out", "0.2\n");
    Aggregator::new(bench.config(3))
        .with_timestamp(at(0))
        .run()
        .unwrap();

    fs::remove_file(bench.results.join("daoc/nmi/a.out")).unwrap();
    let report = Aggregator::new(bench.config(3))
        .with_timestamp(at(1))
        .run()
        .unwrap();
    assert!(matches!(report.plan, UpdatePlan::Extend { .. }));
    let terse = bench.terse();
    assert!(!terse.contains("\na\t"));
    assert!(terse.contains("\nb\t0.2\n"));
}

#[test]
fn all_failed_network_reports_zero_and_counts_runs() {
    let bench = Bench::new();
    put(&bench.results, "daoc/nmi/dead^0%0.out", "Segmentation fault\n");
    put(&bench.results, "daoc/nmi/dead^0%0.out.status", "139\n");
    put(&bench.results, "daoc/nmi/dead^0%1.out", "");
    put(&bench.results, "daoc/nmi/dead^1%0.out", "nan\n");
    put(&bench.results, "daoc/nmi/alive.out", "0.25\n");
    // dead^1%1 never produced output.

    let cfg = bench.config(1).with_expectation(Some(Expectation {
        instances: 2,
        shuffles: 2,
    }));
    let report = Aggregator::new(cfg).with_timestamp(at(0)).run().unwrap();
    assert_eq!(report.parse_failures, 3);

    assert!(bench.terse().contains("\ndead\t0\n"));
    let extended = bench.extended();
    assert!(extended.contains("\ndead\n\tdaoc>\tnmi: 0 (0 .. 0), s: 0, count: 0, fails: 2, "));
    assert!(extended.contains("count(shuf): 0, fails(shuf): 4\n"));
    // Missing runs of the expected grid are fails for healthy networks too.
    assert!(extended.contains("count(shuf): 1, fails(shuf): 3\n"));
}

#[test]
fn every_write_adds_exactly_one_backup_per_form() {
    let bench = Bench::new();
    for (minute, value) in [(0, "0.1"), (0, "0.2"), (0, "0.3")] {
        put(&bench.results, "daoc/nmi/karate.out", value);
        Aggregator::new(bench.config(1))
            .with_timestamp(at(minute))
            .run()
            .unwrap();
    }
    let backups = bench.backups("nmi.res");
    assert_eq!(
        backups,
        vec!["nmi.res.20261019T090000Z", "nmi.res.20261019T090000Z-1"]
    );
    assert_eq!(bench.backups("nmi.resx").len(), 2);
    let first = fs::read_to_string(bench.output.join("daoc").join(&backups[0])).unwrap();
    assert!(first.contains("karate\t0.1\n"));
    assert!(bench.terse().contains("karate\t0.3\n"));
}

#[test]
fn seed_change_is_rejected_unless_revalued() {
    let bench = Bench::new();
    put(&bench.results, "daoc/nmi/karate.out", "0.4\n");
    put(&bench.results, "daoc/nmi/jazz.out", "0.6\n");
    let cfg = bench.config(11).with_mode(WriteMode::Merge);
    Aggregator::new(cfg).with_timestamp(at(0)).run().unwrap();
    let before = bench.terse();

    fs::remove_file(bench.results.join("daoc/nmi/jazz.out")).unwrap();
    let err = Aggregator::new(bench.config(12).with_mode(WriteMode::Merge))
        .with_timestamp(at(1))
        .run()
        .unwrap_err();
    assert!(matches!(
        err,
        AggError::SeedMismatch {
            recorded: 11,
            current: 12,
            ..
        }
    ));
    assert_eq!(bench.terse(), before);

    let report = Aggregator::new(
        bench
            .config(12)
            .with_mode(WriteMode::Merge)
            .with_revalue(true),
    )
    .with_timestamp(at(2))
    .run()
    .unwrap();
    assert_eq!(
        report.plan,
        UpdatePlan::Revalue {
            discard_existing: true
        }
    );
    let terse = bench.terse();
    assert!(terse.contains("(seed: 12)"));
    assert!(terse.contains("\nkarate\t0.4\n"));
    // Rows produced under the old seed are not carried over.
    assert!(!terse.contains("jazz"));
}

#[test]
fn terse_only_writes_a_single_form() {
    let bench = Bench::new();
    put(&bench.results, "daoc/nmi/karate.out", "0.4\n");
    let report = Aggregator::new(bench.config(1).with_forms(FormSelection::Terse))
        .with_timestamp(at(0))
        .run()
        .unwrap();
    assert_eq!(report.written.len(), 1);
    assert!(!bench.output.join("daoc/nmi.resx").exists());
    assert!(bench.output.join("daoc/nmi.manifest.json").exists());
}

#[test]
fn cluster_file_path_classifies_to_instance_and_shuffle() {
    let id = classify_path(Path::new("results/daoc/clusters/karate^2%3.cnl")).unwrap();
    assert_eq!(id.name.base_name, "karate");
    assert_eq!(id.instance_index(), 2);
    assert_eq!(id.shuffle_index(), 3);
    assert_eq!(id.level, 0);
}
