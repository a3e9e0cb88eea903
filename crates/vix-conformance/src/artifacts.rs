#![forbid(unsafe_code)]

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use crate::trial::InsertFailure;

#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(&mut out, "{byte:02x}");
    }
    out
}

/// Evidence for one lane mismatch. Records are little-endian lane bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureArtifact {
    pub case: String,
    pub seed: u64,
    pub num_elements: usize,
    pub element: usize,
    pub lane_index: usize,
    pub lane: usize,
    pub expected: String,
    pub observed: String,
    pub expected_record_b64: String,
    pub observed_record_b64: String,
    pub input_sha256: String,
    pub reference_sha256: String,
}

impl FailureArtifact {
    /// `None` unless `failure` is a mismatch.
    #[must_use]
    pub fn from_failure(
        case: &str,
        seed: u64,
        num_elements: usize,
        input_sha256: &str,
        reference_sha256: &str,
        failure: &InsertFailure,
    ) -> Option<Self> {
        let InsertFailure::Mismatch {
            element,
            lane_index,
            lane,
            expected,
            observed,
            expected_record,
            observed_record,
        } = failure
        else {
            return None;
        };
        Some(Self {
            case: case.to_string(),
            seed,
            num_elements,
            element: *element,
            lane_index: *lane_index,
            lane: *lane,
            expected: expected.clone(),
            observed: observed.clone(),
            expected_record_b64: BASE64.encode(expected_record),
            observed_record_b64: BASE64.encode(observed_record),
            input_sha256: input_sha256.to_string(),
            reference_sha256: reference_sha256.to_string(),
        })
    }

    pub fn expected_record(&self) -> Result<Vec<u8>, String> {
        BASE64
            .decode(&self.expected_record_b64)
            .map_err(|err| format!("base64 decode failed: {err}"))
    }

    pub fn observed_record(&self) -> Result<Vec<u8>, String> {
        BASE64
            .decode(&self.observed_record_b64)
            .map_err(|err| format!("base64 decode failed: {err}"))
    }

    #[must_use]
    pub fn file_name(&self) -> String {
        format!(
            "{}_seed{}_k{}_e{}.json",
            self.case, self.seed, self.lane_index, self.element
        )
    }
}

/// Writes `artifact` as pretty JSON under `root` and returns the path.
pub fn write_failure_artifact(root: &Path, artifact: &FailureArtifact) -> Result<PathBuf, String> {
    fs::create_dir_all(root).map_err(|err| format!("failed creating {}: {err}", root.display()))?;
    let path = root.join(artifact.file_name());
    let json = serde_json::to_string_pretty(artifact)
        .map_err(|err| format!("failed serializing failure artifact: {err}"))?;
    fs::write(&path, json).map_err(|err| format!("failed writing {}: {err}", path.display()))?;
    Ok(path)
}

pub fn read_failure_artifact(path: &Path) -> Result<FailureArtifact, String> {
    let raw = fs::read_to_string(path)
        .map_err(|err| format!("failed reading {}: {err}", path.display()))?;
    serde_json::from_str(&raw).map_err(|err| format!("invalid artifact {}: {err}", path.display()))
}
