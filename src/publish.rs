//! # publish: release gating and registry upload
//!
//! Two pieces live here. The gate decides, once per run and only from the
//! triggering event, whether publishing may proceed at all: only a published
//! release opens it; manual and unknown triggers keep it closed, which is not
//! an error. The publisher then normalizes all staged artifacts into one flat
//! staging directory — a naming collision across jobs is fatal before any
//! upload happens — and uploads them sequentially to the registry, aborting
//! on the first failure with no automatic retries.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use tracing::{error, info};

use crate::config::RegistryCredentials;
use crate::contract::{Artifact, Registry, ToolError};

/// The external event that started the pipeline. Read-only input to the gate.
#[derive(Debug, Clone)]
pub struct TriggerEvent {
    pub kind: String,
}

impl TriggerEvent {
    /// The one event kind that opens the gate.
    pub const RELEASE_PUBLISHED: &'static str = "release-published";
    pub const MANUAL: &'static str = "manual";

    pub fn new(kind: impl Into<String>) -> Self {
        TriggerEvent { kind: kind.into() }
    }
}

/// Whether publishing may proceed, with the reason. Terminal: computed
/// exactly once per pipeline run, after all producers have finished.
#[derive(Debug, Clone)]
pub struct PublishDecision {
    pub open: bool,
    pub reason: String,
}

/// Opens the gate iff the event kind is the distinguished release kind.
/// Every other kind, including unknown values, yields a closed gate.
pub fn decide(event: &TriggerEvent) -> PublishDecision {
    if event.kind == TriggerEvent::RELEASE_PUBLISHED {
        PublishDecision {
            open: true,
            reason: "release published".to_string(),
        }
    } else {
        PublishDecision {
            open: false,
            reason: format!("trigger kind '{}' does not publish", event.kind),
        }
    }
}

/// Error from the publish phase.
#[derive(Debug)]
pub enum PublishError {
    /// Two artifacts would overwrite each other in the flat staging
    /// directory. Detected before any upload call is made.
    NamingCollision {
        file_name: String,
        jobs: (String, String),
    },
    /// The registry rejected an upload or transport failed. The remaining
    /// uploads are aborted; nothing is retried.
    Upload { file_name: String, detail: String },
    /// The gate is open but no registry credentials were configured.
    MissingCredentials,
    Io(std::io::Error),
}

impl std::fmt::Display for PublishError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PublishError::NamingCollision { file_name, jobs } => write!(
                f,
                "artifact name collision on '{}' between jobs {} and {}",
                file_name, jobs.0, jobs.1
            ),
            PublishError::Upload { file_name, detail } => {
                write!(f, "upload of '{file_name}' failed: {detail}")
            }
            PublishError::MissingCredentials => {
                write!(f, "registry credentials not configured")
            }
            PublishError::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl std::error::Error for PublishError {}

impl From<std::io::Error> for PublishError {
    fn from(e: std::io::Error) -> Self {
        PublishError::Io(e)
    }
}

/// Downloads all staged artifacts into one flat directory and uploads them to
/// the registry.
pub struct Publisher {
    registry: Arc<dyn Registry>,
    staging_dir: PathBuf,
}

impl Publisher {
    pub fn new(registry: Arc<dyn Registry>, staging_dir: PathBuf) -> Self {
        Publisher {
            registry,
            staging_dir,
        }
    }

    /// Publishes every artifact, returning how many were uploaded. The
    /// caller guarantees the preconditions: gate open and zero per-job
    /// errors.
    pub async fn publish(
        &self,
        artifacts: &[Artifact],
        credentials: &RegistryCredentials,
    ) -> Result<usize, PublishError> {
        info!(count = artifacts.len(), "[PUBLISH] Normalizing artifacts into staging directory");

        // Collision check first, before any file or registry activity.
        let mut seen: BTreeMap<&str, &str> = BTreeMap::new();
        for artifact in artifacts {
            if let Some(previous_job) =
                seen.insert(artifact.file_name.as_str(), artifact.job_id.as_str())
            {
                error!(
                    file_name = %artifact.file_name,
                    first_job = previous_job,
                    second_job = %artifact.job_id,
                    "[PUBLISH][ERROR] Artifact name collision"
                );
                return Err(PublishError::NamingCollision {
                    file_name: artifact.file_name.clone(),
                    jobs: (previous_job.to_string(), artifact.job_id.clone()),
                });
            }
        }

        if self.staging_dir.exists() {
            fs::remove_dir_all(&self.staging_dir)?;
        }
        fs::create_dir_all(&self.staging_dir)?;
        for artifact in artifacts {
            fs::write(self.staging_dir.join(&artifact.file_name), &artifact.content)?;
        }

        let mut uploaded = 0usize;
        for artifact in artifacts {
            let local_path = self.staging_dir.join(&artifact.file_name);
            match self
                .registry
                .upload(&artifact.file_name, &local_path, credentials)
                .await
            {
                Ok(()) => {
                    uploaded += 1;
                    info!(
                        file_name = %artifact.file_name,
                        job_id = %artifact.job_id,
                        content_hash = %artifact.content_hash,
                        "[PUBLISH] Uploaded artifact"
                    );
                }
                Err(e) => {
                    error!(
                        file_name = %artifact.file_name,
                        error = %e,
                        "[PUBLISH][ERROR] Upload failed, aborting remaining uploads"
                    );
                    return Err(PublishError::Upload {
                        file_name: artifact.file_name.clone(),
                        detail: e.to_string(),
                    });
                }
            }
        }
        info!(uploaded, "[PUBLISH] All artifacts uploaded");
        Ok(uploaded)
    }
}

/// Default registry client: invokes the configured publish command once per
/// artifact, passing the artifact path and credentials through the
/// environment.
pub struct CommandRegistry {
    command: String,
}

impl CommandRegistry {
    pub fn new(command: String) -> Self {
        CommandRegistry { command }
    }
}

#[async_trait]
impl Registry for CommandRegistry {
    async fn upload(
        &self,
        file_name: &str,
        local_path: &Path,
        credentials: &RegistryCredentials,
    ) -> Result<(), ToolError> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&self.command)
            .env("WHEELSMITH_ARTIFACT", local_path)
            .env("WHEELSMITH_ARTIFACT_NAME", file_name);
        match credentials {
            RegistryCredentials::Basic { username, password } => {
                cmd.env("WHEELSMITH_REGISTRY_USERNAME", username)
                    .env("WHEELSMITH_REGISTRY_PASSWORD", password);
            }
            RegistryCredentials::Token(token) => {
                cmd.env("WHEELSMITH_REGISTRY_TOKEN", token);
            }
        }
        let status = cmd.status()?;
        if status.success() {
            Ok(())
        } else {
            Err(format!("publish command exited with {status}").into())
        }
    }
}
