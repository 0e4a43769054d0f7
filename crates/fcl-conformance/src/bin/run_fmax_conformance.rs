#![forbid(unsafe_code)]

use fcl_conformance::fmax_suite::{FmaxRunReport, run_fmax_conformance, write_run_report};
use fcl_conformance::{HarnessConfig, parse_seed, parse_work_items, set_fmax_log_path};
use fcl_device::HostDevice;
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize)]
struct RunSummary {
    status: String,
    device: String,
    seed: u64,
    work_items: usize,
    input_sha256: String,
    report_path: String,
    log_path: Option<String>,
    variants: Vec<String>,
    failure: Option<String>,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("run_fmax_conformance failed: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let mut cfg = HarnessConfig::from_env()?;
    let mut log_path: Option<PathBuf> = None;
    let mut report_path: Option<PathBuf> = None;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--seed" => {
                let value = args
                    .next()
                    .ok_or_else(|| "--seed requires a value".to_string())?;
                cfg.seed = parse_seed(&value)?;
            }
            "--work-items" => {
                let value = args
                    .next()
                    .ok_or_else(|| "--work-items requires a value".to_string())?;
                cfg.work_items = parse_work_items(&value)?;
            }
            "--log-path" => {
                let value = args
                    .next()
                    .ok_or_else(|| "--log-path requires a value".to_string())?;
                log_path = Some(PathBuf::from(value));
            }
            "--report-path" => {
                let value = args
                    .next()
                    .ok_or_else(|| "--report-path requires a value".to_string())?;
                report_path = Some(PathBuf::from(value));
            }
            "--help" | "-h" => {
                println!(
                    "Usage: cargo run -p fcl-conformance --bin run_fmax_conformance -- [--seed <u64>] [--work-items <n>] [--log-path <path>] [--report-path <path>]"
                );
                return Ok(());
            }
            unknown => return Err(format!("unknown argument: {unknown}")),
        }
    }

    if log_path.is_some() {
        set_fmax_log_path(log_path.clone());
    }
    let report_path = report_path.unwrap_or_else(|| cfg.report_root.join("fmax_run_report.json"));

    let mut device = HostDevice::new();
    let report = run_fmax_conformance(&mut device, &cfg.fmax_run_config())?;
    write_run_report(&report_path, &report)?;

    for outcome in &report.variants {
        println!("{}", outcome.summary_line());
    }
    let summary = summarize(&report, &report_path, log_path);
    let summary_json = serde_json::to_string_pretty(&summary)
        .map_err(|err| format!("failed serializing summary: {err}"))?;
    println!("{summary_json}");

    if let Some(failure) = &report.failure {
        eprintln!("{failure}");
    }
    if !report.passed() {
        std::process::exit(2);
    }
    Ok(())
}

fn summarize(report: &FmaxRunReport, report_path: &Path, log_path: Option<PathBuf>) -> RunSummary {
    RunSummary {
        status: report.status.clone(),
        device: report.device.clone(),
        seed: report.seed,
        work_items: report.work_items,
        input_sha256: report.input_sha256.clone(),
        report_path: report_path.display().to_string(),
        log_path: log_path.map(|path| path.display().to_string()),
        variants: report
            .variants
            .iter()
            .map(|outcome| outcome.summary_line())
            .collect(),
        failure: report.failure.as_ref().map(ToString::to_string),
    }
}
