#![forbid(unsafe_code)]

//! Shared test support: the `TestLogV1` record every suite emits, fixture
//! digests, and the proptest case budget.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt::Write as _;

pub const TEST_LOG_SCHEMA_VERSION: &str = "mk-test-log.v1";

const PROPTEST_CASES_ENV: &str = "MK_PROPTEST_CASES";
const PROPTEST_SEED_ENV: &str = "MK_PROPTEST_SEED";
const DEFAULT_PROPTEST_CASES: u32 = 256;
const CI_PROPTEST_CASES: u32 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestMode {
    Generation,
    Ablation,
    Codegen,
    Fuzz,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestResult {
    Pass,
    Fail,
    Skip,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestLogV1 {
    pub schema_version: String,
    pub test_id: String,
    pub fixture_id: String,
    pub seed: Option<u64>,
    pub mode: TestMode,
    pub env: BTreeMap<String, String>,
    pub artifact_refs: Vec<String>,
    pub result: TestResult,
    pub duration_ms: u64,
    pub details: Option<String>,
}

impl TestLogV1 {
    #[must_use]
    pub fn unit(test_id: String, fixture_id: String, mode: TestMode, result: TestResult) -> Self {
        Self {
            schema_version: TEST_LOG_SCHEMA_VERSION.to_owned(),
            test_id,
            fixture_id,
            seed: None,
            mode,
            env: capture_env(),
            artifact_refs: Vec::new(),
            result,
            duration_ms: 0,
            details: None,
        }
    }

    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Hex sha256 of the fixture's JSON encoding.
pub fn fixture_id_from_json<T: Serialize + ?Sized>(fixture: &T) -> Result<String, serde_json::Error> {
    let bytes = serde_json::to_vec(fixture)?;
    Ok(sha256_hex(&bytes))
}

#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(&mut out, "{byte:02x}");
    }
    out
}

#[must_use]
pub fn test_id(module_path: &str, name: &str) -> String {
    format!("{module_path}::{name}")
}

/// `MK_PROPTEST_CASES` if set and positive, otherwise a larger budget when
/// running under CI.
#[must_use]
pub fn property_test_case_count() -> u32 {
    if let Some(cases) = std::env::var(PROPTEST_CASES_ENV)
        .ok()
        .and_then(|raw| raw.trim().parse::<u32>().ok())
        .filter(|cases| *cases > 0)
    {
        return cases;
    }
    if std::env::var_os("CI").is_some() {
        CI_PROPTEST_CASES
    } else {
        DEFAULT_PROPTEST_CASES
    }
}

/// Seed pinned through `MK_PROPTEST_SEED`, for replaying a failing run.
#[must_use]
pub fn capture_proptest_seed() -> Option<u64> {
    std::env::var(PROPTEST_SEED_ENV)
        .ok()
        .and_then(|raw| raw.trim().parse().ok())
}

#[must_use]
pub fn capture_env() -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    env.insert("os".to_owned(), std::env::consts::OS.to_owned());
    env.insert("arch".to_owned(), std::env::consts::ARCH.to_owned());
    for key in [PROPTEST_CASES_ENV, PROPTEST_SEED_ENV, "CI"] {
        if let Ok(value) = std::env::var(key) {
            env.insert(key.to_owned(), value);
        }
    }
    env
}
