//! Typed pipeline configuration. Built once per run (by `load_config` or by
//! tests), then passed into the pipeline as an explicit immutable value so
//! that job expansion stays deterministic and testable in isolation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, error, info};

use crate::matrix::MatrixConfig;

/// Per-job build settings shared by every matrix cell. The command and test
/// command are opaque strings handed to the external toolchain; the per-job
/// axis env is derived on top of `env` during matrix expansion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Build command; receives the job env plus `WHEELSMITH_OUTPUT_DIR`.
    pub command: String,
    /// Test suite invocation run against the built artifact.
    pub test_command: String,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Where the build tool emits artifact files (one subdirectory per job).
    pub output_dir: PathBuf,
}

/// Settings for the single source-distribution job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SdistConfig {
    /// Packaging command; must emit exactly one file into the output dir.
    pub command: String,
    pub source_dir: PathBuf,
    pub output_dir: PathBuf,
}

/// Settings for the publish phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishConfig {
    /// Upload command invoked once per artifact; receives the artifact path
    /// and credentials through the environment.
    pub command: String,
    /// Flat directory all staged artifacts are normalized into.
    pub staging_dir: PathBuf,
}

/// Execution-host capabilities, checked before dispatching a job whose
/// architecture differs from the host's.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostCapabilities {
    pub native_arch: String,
    /// Whether foreign-architecture builds can run under emulation.
    #[serde(default)]
    pub emulation_available: bool,
}

impl HostCapabilities {
    /// Capabilities of the current host: native arch only, no emulation.
    pub fn detect() -> Self {
        HostCapabilities {
            native_arch: std::env::consts::ARCH.to_string(),
            emulation_available: false,
        }
    }
}

/// Credentials consumed by the registry upload. Never stored in config files;
/// injected from the environment at load time.
#[derive(Debug, Clone)]
pub enum RegistryCredentials {
    Basic { username: String, password: String },
    Token(String),
}

impl RegistryCredentials {
    /// Reads credentials from the environment: a token
    /// (`WHEELSMITH_REGISTRY_TOKEN`) wins over a username/password pair
    /// (`WHEELSMITH_REGISTRY_USERNAME` / `WHEELSMITH_REGISTRY_PASSWORD`).
    /// Returns `None` when neither is configured; runs that never publish do
    /// not need credentials.
    pub fn from_env() -> Option<Self> {
        if let Ok(token) = std::env::var("WHEELSMITH_REGISTRY_TOKEN") {
            info!(
                token_set = !token.is_empty(),
                "Registry token loaded from environment"
            );
            return Some(RegistryCredentials::Token(token));
        }
        match (
            std::env::var("WHEELSMITH_REGISTRY_USERNAME"),
            std::env::var("WHEELSMITH_REGISTRY_PASSWORD"),
        ) {
            (Ok(username), Ok(password)) => {
                info!(%username, "Registry credentials loaded from environment");
                Some(RegistryCredentials::Basic { username, password })
            }
            (Ok(_), Err(e)) | (Err(e), Ok(_)) => {
                error!(error = ?e, "Incomplete registry credentials in environment");
                None
            }
            (Err(_), Err(_)) => {
                debug!("No registry credentials in environment");
                None
            }
        }
    }
}

/// The full, immutable configuration for one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub matrix: MatrixConfig,
    pub build: BuildConfig,
    pub sdist: SdistConfig,
    pub publish: PublishConfig,
    pub host: HostCapabilities,
}

impl PipelineConfig {
    pub fn trace_loaded(&self) {
        info!(
            axes = self.matrix.axes.len(),
            exclusions = self.matrix.exclude.len(),
            host_arch = %self.host.native_arch,
            emulation = self.host.emulation_available,
            "Loaded PipelineConfig"
        );
        debug!(?self, "PipelineConfig loaded (full debug)");
    }
}
