#![forbid(unsafe_code)]

pub mod artifacts;
pub mod driver;
pub mod logging;
pub mod oracle;
pub mod trial;

pub use driver::{
    CaseOutcome, CaseParams, CaseRun, CaseStage, run_insert_case, run_insert_case_with_data,
};
pub use trial::{DeviceBindings, INSERT_REASON_CODES, InsertFailure, TrialRecord, run_trials};

use crate::artifacts::{FailureArtifact, write_failure_artifact};
use crate::logging::{TrialLogEntry, env_fingerprint, maybe_append_trial_log};
use serde::Serialize;
use std::path::PathBuf;
use vix_device::ComputeDevice;
use vix_dtype::VectorShape;
use vix_random::{parse_seed, resolve_run_seed};
use vix_runtime::EvidenceLedger;

pub const SUITE_NAME: &str = "vector_insert";
pub const DEFAULT_NUM_ELEMENTS: usize = 1 << 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessConfig {
    pub num_elements: usize,
    pub seed: u64,
    /// When set, every kernel must exist as a `.spv32`/`.spv64` module here.
    pub spirv_root: Option<PathBuf>,
    pub trial_log_path: Option<PathBuf>,
    /// Mismatch artifacts are written here when set.
    pub artifact_root: Option<PathBuf>,
    pub parallel: bool,
}

impl HarnessConfig {
    #[must_use]
    pub fn default_paths() -> Self {
        let repo_root = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../..");
        Self {
            num_elements: DEFAULT_NUM_ELEMENTS,
            seed: resolve_run_seed(None),
            spirv_root: None,
            trial_log_path: None,
            artifact_root: Some(repo_root.join("artifacts/vector_insert/failures")),
            parallel: false,
        }
    }

    /// Defaults overlaid with `VIX_*` environment variables.
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let mut config = Self::default_paths();
        if let Some(raw) = lookup("VIX_NUM_ELEMENTS") {
            config.num_elements = parse_num_elements(&raw)?;
        }
        if let Some(raw) = lookup("VIX_RANDOM_SEED") {
            config.seed = parse_seed(&raw).map_err(|err| format!("VIX_RANDOM_SEED: {err}"))?;
        }
        if let Some(raw) = lookup("VIX_SPIRV_ROOT") {
            config.spirv_root = Some(PathBuf::from(raw));
        }
        if let Some(raw) = lookup(logging::TRIAL_LOG_ENV) {
            config.trial_log_path = Some(PathBuf::from(raw));
        }
        if let Some(raw) = lookup("VIX_ARTIFACT_ROOT") {
            config.artifact_root = Some(PathBuf::from(raw));
        }
        Ok(config)
    }

    #[must_use]
    pub const fn case_params(&self) -> CaseParams {
        CaseParams {
            num_elements: self.num_elements,
            seed: self.seed,
        }
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self::default_paths()
    }
}

pub fn parse_num_elements(raw: &str) -> Result<usize, String> {
    match raw.trim().parse::<usize>() {
        Ok(0) => Err("element count must be > 0".to_string()),
        Ok(num) => Ok(num),
        Err(err) => Err(format!("invalid element count {raw:?}: {err}")),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaseReport {
    pub case: String,
    pub outcome: &'static str,
    pub stage: CaseStage,
    pub reason_code: &'static str,
    pub message: Option<String>,
    pub trials: usize,
    pub input_sha256: Option<String>,
    pub reference_sha256: Option<String>,
    pub artifact: Option<String>,
    pub elapsed_ms: u128,
}

#[derive(Debug, Clone, Serialize)]
pub struct SuiteReport {
    pub suite: &'static str,
    pub seed: u64,
    pub num_elements: usize,
    pub case_count: usize,
    pub pass_count: usize,
    pub skip_count: usize,
    pub failures: Vec<String>,
    pub cases: Vec<CaseReport>,
    pub ledger: EvidenceLedger,
}

impl SuiteReport {
    /// Skips are not failures.
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.failures.is_empty() && self.pass_count + self.skip_count == self.case_count
    }
}

/// Runs `cases` in order, one fresh device per case from `make_device`.
///
/// With `config.parallel` every case runs on its own scoped thread; reports
/// keep the order of `cases` either way. Per-case faults land in the report;
/// `Err` is reserved for log and artifact I/O.
pub fn run_vector_insert_suite<D, F>(
    config: &HarnessConfig,
    cases: &[VectorShape],
    make_device: F,
) -> Result<SuiteReport, String>
where
    D: ComputeDevice,
    F: Fn(VectorShape) -> D + Sync,
{
    // each run owns the sink; a run without a path must not inherit the last one
    logging::set_trial_log_path(config.trial_log_path.clone());
    let params = config.case_params();
    let run_one = |shape: VectorShape| {
        let mut device = make_device(shape);
        let mut ledger = EvidenceLedger::new();
        let run = run_insert_case(&mut device, shape, params, &mut ledger);
        (run, ledger)
    };
    let run_one = &run_one;

    let runs: Vec<(CaseRun, EvidenceLedger)> = if config.parallel {
        std::thread::scope(|scope| {
            let handles: Vec<_> = cases
                .iter()
                .map(|&shape| scope.spawn(move || run_one(shape)))
                .collect();
            handles
                .into_iter()
                .zip(cases)
                .map(|(handle, shape)| {
                    handle
                        .join()
                        .map_err(|_| format!("case thread for {shape} panicked"))
                })
                .collect::<Result<Vec<_>, String>>()
        })?
    } else {
        cases.iter().map(|&shape| run_one(shape)).collect()
    };

    let mut report = SuiteReport {
        suite: SUITE_NAME,
        seed: config.seed,
        num_elements: config.num_elements,
        case_count: cases.len(),
        pass_count: 0,
        skip_count: 0,
        failures: Vec::new(),
        cases: Vec::with_capacity(cases.len()),
        ledger: EvidenceLedger::new(),
    };
    for (run, ledger) in runs {
        for event in ledger.events() {
            report.ledger.record(event.clone());
        }
        append_case_log(&run)?;
        let artifact = match (&config.artifact_root, run.outcome.failure()) {
            (Some(root), Some(failure)) => FailureArtifact::from_failure(
                &run.case_name(),
                run.seed,
                run.num_elements,
                run.input_sha256.as_deref().unwrap_or_default(),
                run.reference_sha256.as_deref().unwrap_or_default(),
                failure,
            )
            .map(|artifact| write_failure_artifact(root, &artifact))
            .transpose()?,
            _ => None,
        };

        match &run.outcome {
            CaseOutcome::Pass { .. } => report.pass_count += 1,
            CaseOutcome::Skip { .. } => report.skip_count += 1,
            CaseOutcome::Fail(failure) => report
                .failures
                .push(format!("{}: {failure}", run.case_name())),
        }
        report.cases.push(CaseReport {
            case: run.case_name(),
            outcome: run.outcome.as_str(),
            stage: run.stage,
            reason_code: run.outcome.reason_code(),
            message: match &run.outcome {
                CaseOutcome::Pass { .. } => None,
                CaseOutcome::Skip { message, .. } => Some(message.clone()),
                CaseOutcome::Fail(failure) => Some(failure.to_string()),
            },
            trials: run.trials.len(),
            input_sha256: run.input_sha256.clone(),
            reference_sha256: run.reference_sha256.clone(),
            artifact: artifact.map(|path| path.display().to_string()),
            elapsed_ms: run.elapsed_ms,
        });
    }
    Ok(report)
}

fn append_case_log(run: &CaseRun) -> Result<(), String> {
    let case = run.case_name();
    let fingerprint = env_fingerprint(&run.device_name);
    let base = |fixture_id: String, mode: &str| TrialLogEntry {
        suite: SUITE_NAME,
        fixture_id,
        seed: run.seed,
        mode: mode.to_string(),
        env_fingerprint: fingerprint.clone(),
        reason_code: String::new(),
        case: case.clone(),
        outcome: String::new(),
        lane_index: None,
        element: None,
        passed: false,
    };

    for trial in &run.trials {
        let mut entry = base(format!("{case}/k{}", trial.lane_index), "trial");
        entry.lane_index = Some(trial.lane_index);
        entry.passed = trial.passed;
        entry.outcome = if trial.passed { "pass" } else { "fail" }.to_string();
        entry.reason_code = if trial.passed {
            "insert_pass"
        } else {
            "insert_lane_mismatch"
        }
        .to_string();
        maybe_append_trial_log(&entry)?;
    }

    let mut entry = base(case.clone(), "case");
    entry.outcome = run.outcome.as_str().to_string();
    entry.reason_code = run.outcome.reason_code().to_string();
    entry.passed = !matches!(run.outcome, CaseOutcome::Fail(_));
    if let Some((element, lane_index)) = run
        .outcome
        .failure()
        .and_then(InsertFailure::mismatch_location)
    {
        entry.element = Some(element);
        entry.lane_index = Some(lane_index);
    }
    maybe_append_trial_log(&entry)
}

#[cfg(test)]
mod tests {
    use super::{DEFAULT_NUM_ELEMENTS, HarnessConfig, parse_num_elements};
    use std::collections::HashMap;
    use std::path::PathBuf;
    use vix_random::DEFAULT_RUN_SEED;

    #[test]
    fn defaults_match_the_documented_run() {
        let config = HarnessConfig::default();
        assert_eq!(config.num_elements, DEFAULT_NUM_ELEMENTS);
        assert_eq!(config.seed, DEFAULT_RUN_SEED);
        assert!(config.spirv_root.is_none());
        assert!(config.trial_log_path.is_none());
        assert!(!config.parallel);
        let artifact_root = config.artifact_root.expect("artifact root defaults on");
        assert!(artifact_root.ends_with("artifacts/vector_insert/failures"));
        assert!(artifact_root.starts_with(env!("CARGO_MANIFEST_DIR")));
    }

    #[test]
    fn unset_variables_keep_the_default_paths() {
        let config = HarnessConfig::from_lookup(|key| {
            (key == "VIX_SPIRV_ROOT").then(|| "/opt/spirv".to_string())
        })
        .expect("valid environment");
        assert_eq!(config.spirv_root, Some(PathBuf::from("/opt/spirv")));
        assert_eq!(config.artifact_root, HarnessConfig::default_paths().artifact_root);
        assert!(config.trial_log_path.is_none());
    }

    #[test]
    fn environment_overrides_defaults() {
        let env: HashMap<&str, &str> = [
            ("VIX_NUM_ELEMENTS", "4096"),
            ("VIX_RANDOM_SEED", "0xBEEF"),
            ("VIX_SPIRV_ROOT", "/opt/spirv"),
            ("VIX_ARTIFACT_ROOT", "/tmp/vix"),
        ]
        .into_iter()
        .collect();
        let config = HarnessConfig::from_lookup(|key| env.get(key).map(|v| (*v).to_string()))
            .expect("valid environment");
        assert_eq!(config.num_elements, 4096);
        assert_eq!(config.seed, 0xBEEF);
        assert_eq!(config.spirv_root, Some(PathBuf::from("/opt/spirv")));
        assert_eq!(config.artifact_root, Some(PathBuf::from("/tmp/vix")));
        assert!(config.trial_log_path.is_none());
    }

    #[test]
    fn bad_environment_values_are_rejected() {
        let err = HarnessConfig::from_lookup(|key| {
            (key == "VIX_RANDOM_SEED").then(|| "seedy".to_string())
        })
        .expect_err("unparseable seed");
        assert!(err.starts_with("VIX_RANDOM_SEED"), "{err}");
        assert!(parse_num_elements("0").is_err());
        assert!(parse_num_elements("-3").is_err());
        assert_eq!(parse_num_elements(" 16 "), Ok(16));
    }
}
