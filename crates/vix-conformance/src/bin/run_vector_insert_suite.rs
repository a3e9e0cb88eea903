#![forbid(unsafe_code)]

use serde::Serialize;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use vix_conformance::{
    CaseReport, HarnessConfig, SuiteReport, parse_num_elements, run_vector_insert_suite,
};
use vix_device::{HostDevice, IlModuleStore};
use vix_dtype::{INSERT_CASES, VectorShape, find_insert_case};
use vix_random::parse_seed;

const USAGE: &str = "Usage: cargo run -p vix-conformance --bin run_vector_insert_suite -- \
[--case <kernel_name>]... [--num <n>] [--seed <u64>] [--spirv-root <dir>] \
[--log-path <path>] [--artifact-root <dir>] [--disable-extension <ext>]... [--parallel]";

#[derive(Debug, Serialize)]
struct GateSummary {
    status: &'static str,
    suite: &'static str,
    seed: u64,
    num_elements: usize,
    trial_log: Option<String>,
    case_count: usize,
    pass_count: usize,
    skip_count: usize,
    failures: Vec<String>,
    cases: Vec<CaseReport>,
}

fn main() {
    match run() {
        Ok(true) => {}
        Ok(false) => std::process::exit(2),
        Err(err) => {
            eprintln!("run_vector_insert_suite failed: {err}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<bool, String> {
    let mut config = HarnessConfig::from_env()?;
    let mut cases: Vec<VectorShape> = Vec::new();
    let mut disabled: Vec<String> = Vec::new();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        let mut value = |flag: &str| {
            args.next()
                .ok_or_else(|| format!("{flag} requires a value"))
        };
        match arg.as_str() {
            "--case" => {
                let name = value("--case")?;
                let shape = find_insert_case(&name)
                    .ok_or_else(|| format!("unknown case {name}"))?;
                cases.push(shape);
            }
            "--num" => config.num_elements = parse_num_elements(&value("--num")?)?,
            "--seed" => {
                config.seed = parse_seed(&value("--seed")?).map_err(|err| err.to_string())?;
            }
            "--spirv-root" => config.spirv_root = Some(PathBuf::from(value("--spirv-root")?)),
            "--log-path" => config.trial_log_path = Some(PathBuf::from(value("--log-path")?)),
            "--artifact-root" => {
                config.artifact_root = Some(PathBuf::from(value("--artifact-root")?));
            }
            "--disable-extension" => disabled.push(value("--disable-extension")?),
            "--parallel" => config.parallel = true,
            "--help" | "-h" => {
                println!("{USAGE}");
                return Ok(true);
            }
            unknown => return Err(format!("unknown argument: {unknown}")),
        }
    }
    if cases.is_empty() {
        cases = INSERT_CASES.to_vec();
    }

    if config.trial_log_path.is_none() {
        let ts_millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |duration| duration.as_millis());
        config.trial_log_path = Some(
            PathBuf::from(env!("CARGO_MANIFEST_DIR"))
                .join("../../artifacts/logs")
                .join(format!("vector_insert_{ts_millis}.jsonl")),
        );
    }

    let spirv_root = config.spirv_root.clone();
    let report = run_vector_insert_suite(&config, &cases, |_| {
        let mut device = HostDevice::new();
        for extension in &disabled {
            device = device.without_extension(extension);
        }
        match &spirv_root {
            Some(root) => device.with_module_store(IlModuleStore::new(root)),
            None => device,
        }
    })?;

    let passed = report.all_passed();
    let summary = summarize(&config, report, passed);
    let summary_json = serde_json::to_string_pretty(&summary)
        .map_err(|err| format!("failed serializing summary: {err}"))?;
    println!("{summary_json}");
    Ok(passed)
}

fn summarize(config: &HarnessConfig, report: SuiteReport, passed: bool) -> GateSummary {
    GateSummary {
        status: if passed { "pass" } else { "fail" },
        suite: report.suite,
        seed: report.seed,
        num_elements: report.num_elements,
        trial_log: config
            .trial_log_path
            .as_ref()
            .map(|path| path.display().to_string()),
        case_count: report.case_count,
        pass_count: report.pass_count,
        skip_count: report.skip_count,
        failures: report.failures,
        cases: report.cases,
    }
}
