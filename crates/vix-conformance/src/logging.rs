#![forbid(unsafe_code)]

use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

pub const TRIAL_LOG_ENV: &str = "VIX_TRIAL_LOG_PATH";

static TRIAL_LOG_PATH: OnceLock<Mutex<Option<PathBuf>>> = OnceLock::new();

/// One JSONL line per trial or terminal case event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrialLogEntry {
    pub suite: &'static str,
    pub fixture_id: String,
    pub seed: u64,
    pub mode: String,
    pub env_fingerprint: String,
    pub reason_code: String,
    pub case: String,
    pub outcome: String,
    pub lane_index: Option<usize>,
    pub element: Option<usize>,
    pub passed: bool,
}

pub fn set_trial_log_path(path: Option<PathBuf>) {
    let cell = TRIAL_LOG_PATH.get_or_init(|| Mutex::new(None));
    if let Ok(mut slot) = cell.lock() {
        *slot = path;
    }
}

/// Configured path first, then the environment.
#[must_use]
pub fn trial_log_path() -> Option<PathBuf> {
    let configured = TRIAL_LOG_PATH
        .get()
        .and_then(|cell| cell.lock().ok())
        .and_then(|slot| slot.clone());
    configured.or_else(|| std::env::var_os(TRIAL_LOG_ENV).map(PathBuf::from))
}

pub fn maybe_append_trial_log(entry: &TrialLogEntry) -> Result<(), String> {
    let Some(path) = trial_log_path() else {
        return Ok(());
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|err| format!("failed creating {}: {err}", parent.display()))?;
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|err| format!("failed opening {}: {err}", path.display()))?;
    let line = serde_json::to_string(entry)
        .map_err(|err| format!("failed serializing trial log entry: {err}"))?;
    let mut payload = line.into_bytes();
    payload.push(b'\n');
    file.write_all(&payload)
        .map_err(|err| format!("failed appending trial log {}: {err}", path.display()))
}

/// `os-arch` plus the device name, so logs from different hosts stay apart.
#[must_use]
pub fn env_fingerprint(device_name: &str) -> String {
    format!(
        "{}-{}:{device_name}",
        std::env::consts::OS,
        std::env::consts::ARCH
    )
}

pub fn log_info(message: &str) {
    eprintln!("[vix] {message}");
}

pub fn log_error(message: &str) {
    eprintln!("[vix] ERROR: {message}");
}

#[cfg(test)]
mod tests {
    use super::{TrialLogEntry, env_fingerprint, maybe_append_trial_log, set_trial_log_path};
    use serial_test::serial;
    use std::fs;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn entry(case: &str) -> TrialLogEntry {
        TrialLogEntry {
            suite: "vector_insert",
            fixture_id: format!("{case}/k0"),
            seed: 1,
            mode: "trial".to_string(),
            env_fingerprint: env_fingerprint("test"),
            reason_code: "ok".to_string(),
            case: case.to_string(),
            outcome: "pass".to_string(),
            lane_index: Some(0),
            element: None,
            passed: true,
        }
    }

    #[test]
    #[serial]
    fn appends_one_line_per_entry() {
        let ts_nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |duration| duration.as_nanos());
        let path = std::env::temp_dir()
            .join(format!("vix_trial_log_{}_{ts_nanos}", std::process::id()))
            .join("trials.jsonl");
        set_trial_log_path(Some(path.clone()));
        maybe_append_trial_log(&entry("vector_int4_insert")).expect("first line");
        maybe_append_trial_log(&entry("vector_long2_insert")).expect("second line");
        set_trial_log_path(None);

        let raw = fs::read_to_string(&path).expect("log exists");
        let lines: Vec<serde_json::Value> = raw
            .lines()
            .map(|line| serde_json::from_str(line).expect("json line"))
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["case"], "vector_long2_insert");
        assert_eq!(lines[0]["lane_index"], 0);
        assert!(lines[0]["element"].is_null());

        if let Some(dir) = path.parent() {
            let _ = fs::remove_dir_all(dir);
        }
    }

    #[test]
    #[serial]
    fn unset_path_is_a_no_op() {
        set_trial_log_path(None);
        if std::env::var_os(super::TRIAL_LOG_ENV).is_none() {
            assert!(super::trial_log_path().is_none());
        }
        assert!(maybe_append_trial_log(&entry("vector_int4_insert")).is_ok());
    }
}
