#![allow(unused)]

//! # contract: interfaces for the pipeline's external collaborators
//!
//! This module defines the trait seams between the orchestration core and
//! everything it merely invokes: the build toolchain, the verification test
//! runner, the source-distribution packager and the package registry. It also
//! defines the artifact types that flow across those seams.
//!
//! ## Interface & Extensibility
//! - Implement [`BuildTool`], [`Verifier`], [`SdistTool`] or [`Registry`] to
//!   plug in a real toolchain, a test double, or a mock.
//! - All methods are async, returning results and using boxed error types.
//! - Error handling is uniform at the seam: collaborators return boxed trait
//!   objects; the orchestration layer maps them to typed pipeline errors.
//!
//! ## Mocking & Testing
//! - Every trait is annotated for `mockall` so consumers can generate
//!   deterministic mocks for unit/integration tests (feature
//!   `test-export-mocks`, enabled by default).
//!
//! ## Adding New Collaborators
//! - Implement the trait for your backend.
//! - Convert all meaningful upstream errors to a boxed error; the core never
//!   inspects collaborator error internals.

use async_trait::async_trait;
use mockall::{automock, predicate::*};
use sha2::{Digest, Sha256};
use std::path::Path;

use crate::config::RegistryCredentials;
use crate::matrix::BuildJob;

/// Error type at the collaborator seam (simple boxed error).
pub type ToolError = Box<dyn std::error::Error + Send + Sync>;

/// Which kind of distributable a producer emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    /// A compiled, platform-specific distribution (one matrix cell).
    Binary,
    /// The platform-independent source distribution.
    Source,
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArtifactKind::Binary => write!(f, "binary"),
            ArtifactKind::Source => write!(f, "source"),
        }
    }
}

/// Raw build output as handed back by a tool, before staging.
#[derive(Debug, Clone)]
pub struct ArtifactPayload {
    /// File name the artifact will carry in the flat publish directory.
    pub file_name: String,
    /// Raw blob contents. The core never inspects artifact internals.
    pub content: Vec<u8>,
}

/// A staged artifact, tagged with the producing job for traceability.
#[derive(Debug, Clone)]
pub struct Artifact {
    /// Staging address: `<job-id>::<kind>::<file-name>`.
    pub store_key: String,
    /// Normalized publish name, used for collision detection.
    pub file_name: String,
    pub kind: ArtifactKind,
    /// Identity of the producing job (or `sdist` for the source distribution).
    pub job_id: String,
    pub content: Vec<u8>,
    /// SHA-256 of the contents, recorded for audit reports.
    pub content_hash: String,
}

impl Artifact {
    /// Stages a payload under the producing job's identity, computing the
    /// content hash up front.
    pub fn new(job_id: &str, kind: ArtifactKind, payload: ArtifactPayload) -> Self {
        let content_hash = {
            let mut hasher = Sha256::new();
            hasher.update(&payload.content);
            format!("{:x}", hasher.finalize())
        };
        Artifact {
            store_key: format!("{}::{}::{}", job_id, kind, payload.file_name),
            file_name: payload.file_name,
            kind,
            job_id: job_id.to_string(),
            content: payload.content,
            content_hash,
        }
    }
}

/// Trait for the opaque external build command. Receives one job's
/// environment and target spec, emits one or more artifact payloads.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait BuildTool: Send + Sync {
    /// Build the distribution(s) for one matrix cell.
    async fn build(&self, job: &BuildJob) -> Result<Vec<ArtifactPayload>, ToolError>;
}

/// Trait for the opaque external test runner. Installs the built artifacts
/// into a clean environment and runs the package's test suite against them.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Verifier: Send + Sync {
    /// Returns `Ok(true)` when the suite passed, `Ok(false)` when it failed.
    async fn verify(&self, job: &BuildJob, artifacts: &[ArtifactPayload])
        -> Result<bool, ToolError>;
}

/// Trait for the source-distribution packager: bundles the source tree into
/// one distributable blob without compiling anything.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait SdistTool: Send + Sync {
    async fn package(&self, source_dir: &Path) -> Result<ArtifactPayload, ToolError>;
}

/// Trait for the opaque registry upload command. One call, one result, per
/// artifact; the implementor owns transport and authentication details.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Registry: Send + Sync {
    async fn upload(
        &self,
        file_name: &str,
        local_path: &Path,
        credentials: &RegistryCredentials,
    ) -> Result<(), ToolError>;
}
