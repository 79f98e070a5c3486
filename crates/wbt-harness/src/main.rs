#![forbid(unsafe_code)]

use anyhow::{Context, Result, bail};
use std::env;
use std::path::Path;
use wbt_scenario::{CleanLoadScenario, ScenarioConfig};
use wbt_sim::SimPlatform;
use wbt_types::ByteSize;

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    init_tracing();

    let args: Vec<String> = env::args().skip(1).collect();
    let cmd = args.first().map(String::as_str);

    match cmd {
        Some("run-clean-load") => run_clean_load(&args[1..]),
        Some("--help" | "-h" | "help") | None => {
            print_usage();
            Ok(())
        }
        Some(other) => {
            print_usage();
            bail!("unknown command: {other}")
        }
    }
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run_clean_load(args: &[String]) -> Result<()> {
    let mut config = ScenarioConfig::default();
    let mut index = 0_usize;
    while index < args.len() {
        match args[index].as_str() {
            "--seed" => {
                let raw = args.get(index + 1).context("--seed requires a value")?;
                config.workload_seed = raw.parse().context("invalid --seed value")?;
                index += 2;
            }
            "--grace-secs" => {
                let raw = args
                    .get(index + 1)
                    .context("--grace-secs requires a value")?;
                config.reboot_grace_secs = raw.parse().context("invalid --grace-secs value")?;
                index += 2;
            }
            "--out" => {
                let raw = args.get(index + 1).context("--out requires a value")?;
                config.artifact_dir = Some(Path::new(raw).to_path_buf());
                index += 2;
            }
            other => {
                bail!("unknown run-clean-load option: {other}");
            }
        }
    }

    let sim = SimPlatform::new();
    sim.add_disk(&config.cache_disk, ByteSize::from_gib(4));
    sim.add_disk(&config.core_disk, ByteSize::from_gib(8));

    let scenario = CleanLoadScenario::new(config, sim.collaborators());
    let report = scenario.run()?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.passed {
        bail!(
            "clean-load scenario failed: {} structural finding(s), {} metric mismatch(es)",
            report.structural_findings.len(),
            report.comparison.mismatch_count()
        );
    }
    Ok(())
}

fn print_usage() {
    println!("wbt-harness — write-back cache clean-load scenario runner");
    println!();
    println!("USAGE:");
    println!("  wbt-harness run-clean-load [--seed S] [--grace-secs N] [--out DIR]");
    println!();
    println!("CLEAN LOAD:");
    println!("  Provisions a simulated cache and two core partitions, fills the cache");
    println!("  with dirty write-back data, removes one core without flushing, reboots");
    println!("  the platform, reloads the cache, and verifies occupancy and dirty");
    println!("  statistics survived unchanged. Prints a JSON report.");
    println!("  Use --out DIR to persist the report and the NDJSON step log.");
    println!();
    println!("EXAMPLES:");
    println!("  wbt-harness run-clean-load");
    println!("  wbt-harness run-clean-load --seed 123 --out artifacts/clean_load");
}
