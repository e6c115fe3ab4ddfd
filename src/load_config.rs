//! `load_config` module: loads and adapts a static YAML pipeline file —
//! including environment secret injection — into the internal
//! [`PipelineConfig`].
//!
//! This module is the only place where untrusted YAML is parsed and mapped to
//! rich, strongly-typed internal structs.
//!
//! # Responsibilities
//! - Parse user-supplied YAML pipeline files into type-safe Rust structs
//! - Default the optional `host:` section from the running host
//! - Inject registry credentials from the environment (never from YAML)
//! - Ensure robust error messages for CLI and tests: any failure in loading
//!   must result in clear diagnostics.
//!
//! # Errors
//! All errors in this module use `anyhow::Error` for context-rich
//! diagnostics, and are surfaced at the CLI boundary.

use anyhow::Result;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::{error, info};

use crate::config::{
    BuildConfig, HostCapabilities, PipelineConfig, PublishConfig, RegistryCredentials, SdistConfig,
};
use crate::matrix::MatrixConfig;

/// YAML-side schema of a pipeline file. `host` is optional; everything else
/// is required.
#[derive(Debug, Deserialize)]
pub struct PipelineFile {
    pub matrix: MatrixConfig,
    pub build: BuildConfig,
    pub sdist: SdistConfig,
    pub publish: PublishConfig,
    #[serde(default)]
    pub host: Option<HostCapabilities>,
}

/// Loads a static YAML pipeline file (no secrets) into a [`PipelineConfig`].
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<PipelineConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading pipeline configuration from file");

    let content = match fs::read_to_string(path_ref) {
        Ok(content) => {
            info!(config_path = ?path_ref, "Pipeline file read successfully");
            content
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read pipeline file");
            return Err(anyhow::anyhow!(
                "Failed to read pipeline file {:?}: {}",
                path_ref,
                e
            ));
        }
    };

    let file: PipelineFile = match serde_yaml::from_str(&content) {
        Ok(file) => file,
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse pipeline YAML");
            return Err(anyhow::anyhow!(
                "Failed to parse pipeline file {:?}: {}",
                path_ref,
                e
            ));
        }
    };

    let host = file.host.unwrap_or_else(HostCapabilities::detect);
    Ok(PipelineConfig {
        matrix: file.matrix,
        build: file.build,
        sdist: file.sdist,
        publish: file.publish,
        host,
    })
}

/// Injects registry credentials from the environment (after loading `.env`
/// when present). `None` is fine for runs that never reach the publish phase.
pub fn credentials_from_env() -> Option<RegistryCredentials> {
    dotenvy::dotenv().ok();
    RegistryCredentials::from_env()
}
