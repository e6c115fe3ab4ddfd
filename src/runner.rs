//! # runner: per-cell build execution
//!
//! Executes one [`BuildJob`]: provisions the build environment (checking the
//! host's emulation capability for foreign architectures), invokes the build
//! tool with job-scoped configuration, verifies the built artifact against
//! the package's test suite in a clean environment, and registers the
//! resulting artifacts with the [`ArtifactStore`].
//!
//! Each step is an independent failure point. Runner instances for distinct
//! jobs share no mutable state beyond the store; a failure in one job never
//! cancels another — the pipeline collects per-job results instead of
//! short-circuiting.

use async_trait::async_trait;
use std::fs;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use tracing::{error, info};

use crate::config::{BuildConfig, HostCapabilities};
use crate::contract::{Artifact, ArtifactKind, ArtifactPayload, BuildTool, ToolError, Verifier};
use crate::matrix::BuildJob;
use crate::store::ArtifactStore;

/// Name of the axis the emulation capability check applies to.
pub const ARCH_AXIS: &str = "arch";

/// Error from one producer (a matrix cell or the sdist job).
#[derive(Debug)]
pub enum BuildError {
    /// The host cannot provision the job's platform: the architecture needs
    /// emulation and the host does not support it.
    UnsupportedPlatform { job_id: String, arch: String },
    /// The build tool failed or returned nonzero.
    BuildFailed { job_id: String, detail: String },
    /// The package test suite did not pass against the built artifact. A
    /// built-but-unverified artifact is never registered for publishing.
    VerificationFailed { job_id: String, detail: String },
    Io(std::io::Error),
}

impl std::fmt::Display for BuildError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildError::UnsupportedPlatform { job_id, arch } => write!(
                f,
                "job {job_id}: architecture {arch} requires emulation, which this host lacks"
            ),
            BuildError::BuildFailed { job_id, detail } => {
                write!(f, "job {job_id}: build failed: {detail}")
            }
            BuildError::VerificationFailed { job_id, detail } => {
                write!(f, "job {job_id}: verification failed: {detail}")
            }
            BuildError::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl std::error::Error for BuildError {}

impl From<std::io::Error> for BuildError {
    fn from(e: std::io::Error) -> Self {
        BuildError::Io(e)
    }
}

/// Executes build jobs against the configured tool seams and registers
/// produced artifacts with the store.
pub struct BuildRunner {
    build_tool: Arc<dyn BuildTool>,
    verifier: Arc<dyn Verifier>,
    host: HostCapabilities,
    store: Arc<ArtifactStore>,
}

impl BuildRunner {
    pub fn new(
        build_tool: Arc<dyn BuildTool>,
        verifier: Arc<dyn Verifier>,
        host: HostCapabilities,
        store: Arc<ArtifactStore>,
    ) -> Self {
        BuildRunner {
            build_tool,
            verifier,
            host,
            store,
        }
    }

    /// Runs one job to a terminal state. On success the produced artifacts
    /// have been registered with the store under the job's identity.
    pub async fn run(&self, job: &BuildJob) -> Result<Vec<Artifact>, BuildError> {
        info!(job_id = %job.id, "[BUILD] Starting job");

        // Step 1: provision. Foreign-arch jobs need emulation support.
        if let Some(arch) = job.value_of(ARCH_AXIS) {
            if arch != self.host.native_arch {
                if !self.host.emulation_available {
                    error!(
                        job_id = %job.id,
                        arch,
                        host_arch = %self.host.native_arch,
                        "[BUILD][ERROR] Emulation required but unavailable on this host"
                    );
                    return Err(BuildError::UnsupportedPlatform {
                        job_id: job.id.clone(),
                        arch: arch.to_string(),
                    });
                }
                info!(job_id = %job.id, arch, "[BUILD] Building under emulation");
            }
        }

        // Step 2+3: invoke the build tool with the job-scoped environment.
        let payloads = match self.build_tool.build(job).await {
            Ok(payloads) if payloads.is_empty() => {
                error!(job_id = %job.id, "[BUILD][ERROR] Build tool produced no artifacts");
                return Err(BuildError::BuildFailed {
                    job_id: job.id.clone(),
                    detail: "build tool produced no artifacts".to_string(),
                });
            }
            Ok(payloads) => {
                info!(job_id = %job.id, artifacts = payloads.len(), "[BUILD] Build succeeded");
                payloads
            }
            Err(e) => {
                error!(job_id = %job.id, error = %e, "[BUILD][ERROR] Build tool failed");
                return Err(BuildError::BuildFailed {
                    job_id: job.id.clone(),
                    detail: e.to_string(),
                });
            }
        };

        // Step 4: verification. A suite that cannot run leaves the artifact
        // just as unverified as a suite that fails.
        match self.verifier.verify(job, &payloads).await {
            Ok(true) => {
                info!(job_id = %job.id, "[BUILD] Verification passed");
            }
            Ok(false) => {
                error!(job_id = %job.id, "[BUILD][ERROR] Test suite failed against built artifact");
                return Err(BuildError::VerificationFailed {
                    job_id: job.id.clone(),
                    detail: "test suite failed against built artifact".to_string(),
                });
            }
            Err(e) => {
                error!(job_id = %job.id, error = %e, "[BUILD][ERROR] Verification step failed to run");
                return Err(BuildError::VerificationFailed {
                    job_id: job.id.clone(),
                    detail: format!("verification step failed to run: {e}"),
                });
            }
        }

        // Step 5: register with the store under the job's identity.
        let artifacts: Vec<Artifact> = payloads
            .into_iter()
            .map(|payload| Artifact::new(&job.id, ArtifactKind::Binary, payload))
            .collect();
        for artifact in &artifacts {
            self.store.put(artifact.clone());
        }
        info!(job_id = %job.id, artifacts = artifacts.len(), "[BUILD] Job succeeded, artifacts staged");
        Ok(artifacts)
    }
}

/// Default build tool: shells out to the configured build command with the
/// job's environment, then collects artifact files from the job's output
/// directory.
pub struct CommandBuildTool {
    config: BuildConfig,
}

impl CommandBuildTool {
    pub fn new(config: BuildConfig) -> Self {
        CommandBuildTool { config }
    }
}

#[async_trait]
impl BuildTool for CommandBuildTool {
    async fn build(&self, job: &BuildJob) -> Result<Vec<ArtifactPayload>, ToolError> {
        let out_dir = self.config.output_dir.join(&job.id);
        // Clean output dir so stale artifacts from earlier runs never leak in.
        if out_dir.exists() {
            fs::remove_dir_all(&out_dir)?;
        }
        fs::create_dir_all(&out_dir)?;

        info!(job_id = %job.id, command = %job.build_command, "Invoking build command");
        let status = Command::new("sh")
            .arg("-c")
            .arg(&job.build_command)
            .envs(job.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .env("WHEELSMITH_OUTPUT_DIR", &out_dir)
            .status()?;
        if !status.success() {
            return Err(format!("build command exited with {status}").into());
        }

        let mut payloads = Vec::new();
        for entry in fs::read_dir(&out_dir)? {
            let path = entry?.path();
            if path.is_file() {
                let file_name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                payloads.push(ArtifactPayload {
                    file_name,
                    content: fs::read(&path)?,
                });
            }
        }
        payloads.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        Ok(payloads)
    }
}

/// Default verifier: installs the built artifacts into a clean scratch
/// directory and runs the job's test command there, reporting pass/fail from
/// the exit status.
pub struct CommandVerifier;

#[async_trait]
impl Verifier for CommandVerifier {
    async fn verify(
        &self,
        job: &BuildJob,
        artifacts: &[ArtifactPayload],
    ) -> Result<bool, ToolError> {
        let scratch = tempfile::tempdir()?;
        for artifact in artifacts {
            write_artifact(scratch.path(), &artifact.file_name, &artifact.content)?;
        }
        info!(job_id = %job.id, command = %job.test_command, "Invoking test command in clean environment");
        let status = Command::new("sh")
            .arg("-c")
            .arg(&job.test_command)
            .envs(job.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .env("WHEELSMITH_INSTALL_DIR", scratch.path())
            .status()?;
        Ok(status.success())
    }
}

fn write_artifact(dir: &Path, file_name: &str, content: &[u8]) -> std::io::Result<()> {
    fs::write(dir.join(file_name), content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{MockBuildTool, MockVerifier};
    use crate::matrix::BuildJob;

    fn job(id: &str, arch: &str) -> BuildJob {
        BuildJob {
            id: id.to_string(),
            values: vec![
                ("os".to_string(), "linux".to_string()),
                ("arch".to_string(), arch.to_string()),
            ],
            env: vec![],
            build_command: "true".to_string(),
            test_command: "true".to_string(),
        }
    }

    fn host(native_arch: &str, emulation: bool) -> HostCapabilities {
        HostCapabilities {
            native_arch: native_arch.to_string(),
            emulation_available: emulation,
        }
    }

    fn payload() -> ArtifactPayload {
        ArtifactPayload {
            file_name: "pkg.whl".to_string(),
            content: b"bin".to_vec(),
        }
    }

    #[tokio::test]
    async fn foreign_arch_without_emulation_is_unsupported_platform() {
        let build_tool = MockBuildTool::new();
        let verifier = MockVerifier::new();
        let store = Arc::new(ArtifactStore::new());
        let runner = BuildRunner::new(
            Arc::new(build_tool),
            Arc::new(verifier),
            host("x86_64", false),
            store.clone(),
        );

        let err = runner.run(&job("linux-aarch64", "aarch64")).await.unwrap_err();
        assert!(matches!(err, BuildError::UnsupportedPlatform { .. }));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn foreign_arch_with_emulation_builds_and_registers() {
        let mut build_tool = MockBuildTool::new();
        build_tool.expect_build().returning(|_| Ok(vec![payload()]));
        let mut verifier = MockVerifier::new();
        verifier.expect_verify().returning(|_, _| Ok(true));
        let store = Arc::new(ArtifactStore::new());
        let runner = BuildRunner::new(
            Arc::new(build_tool),
            Arc::new(verifier),
            host("x86_64", true),
            store.clone(),
        );

        let artifacts = runner.run(&job("linux-aarch64", "aarch64")).await.unwrap();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn failed_verification_registers_nothing() {
        let mut build_tool = MockBuildTool::new();
        build_tool.expect_build().returning(|_| Ok(vec![payload()]));
        let mut verifier = MockVerifier::new();
        verifier.expect_verify().returning(|_, _| Ok(false));
        let store = Arc::new(ArtifactStore::new());
        let runner = BuildRunner::new(
            Arc::new(build_tool),
            Arc::new(verifier),
            host("x86_64", false),
            store.clone(),
        );

        let err = runner.run(&job("linux-x86_64", "x86_64")).await.unwrap_err();
        assert!(matches!(err, BuildError::VerificationFailed { .. }));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn build_tool_error_maps_to_build_failed() {
        let mut build_tool = MockBuildTool::new();
        build_tool
            .expect_build()
            .returning(|_| Err("compiler exploded".into()));
        let verifier = MockVerifier::new();
        let store = Arc::new(ArtifactStore::new());
        let runner = BuildRunner::new(
            Arc::new(build_tool),
            Arc::new(verifier),
            host("x86_64", false),
            store.clone(),
        );

        let err = runner.run(&job("linux-x86_64", "x86_64")).await.unwrap_err();
        match err {
            BuildError::BuildFailed { detail, .. } => assert!(detail.contains("compiler exploded")),
            other => panic!("expected BuildFailed, got {other:?}"),
        }
    }
}
