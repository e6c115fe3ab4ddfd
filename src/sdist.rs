//! # sdist: the source-distribution job
//!
//! An independent, single-job path that packages the source tree into one
//! platform-independent blob, exactly once per pipeline run, in parallel with
//! the build matrix. Its failure never cancels matrix jobs already in flight.

use async_trait::async_trait;
use std::fs;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use tracing::{error, info};

use crate::config::SdistConfig;
use crate::contract::{Artifact, ArtifactKind, ArtifactPayload, SdistTool, ToolError};
use crate::runner::BuildError;
use crate::store::ArtifactStore;

/// Identity the source distribution is staged under (it belongs to no matrix
/// cell).
pub const SDIST_JOB_ID: &str = "sdist";

pub struct SourceDistBuilder {
    tool: Arc<dyn SdistTool>,
    store: Arc<ArtifactStore>,
}

impl SourceDistBuilder {
    pub fn new(tool: Arc<dyn SdistTool>, store: Arc<ArtifactStore>) -> Self {
        SourceDistBuilder { tool, store }
    }

    /// Packages the source tree and registers the resulting artifact with the
    /// store under the sdist identity.
    pub async fn run(&self, source_dir: &Path) -> Result<Artifact, BuildError> {
        info!(source_dir = %source_dir.display(), "[SDIST] Packaging source distribution");
        let payload = match self.tool.package(source_dir).await {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, "[SDIST][ERROR] Packaging failed");
                return Err(BuildError::BuildFailed {
                    job_id: SDIST_JOB_ID.to_string(),
                    detail: e.to_string(),
                });
            }
        };
        let artifact = Artifact::new(SDIST_JOB_ID, ArtifactKind::Source, payload);
        self.store.put(artifact.clone());
        info!(file_name = %artifact.file_name, "[SDIST] Source distribution staged");
        Ok(artifact)
    }
}

/// Default sdist tool: runs the configured packaging command and expects it
/// to emit exactly one file into the sdist output directory.
pub struct CommandSdistTool {
    config: SdistConfig,
}

impl CommandSdistTool {
    pub fn new(config: SdistConfig) -> Self {
        CommandSdistTool { config }
    }
}

#[async_trait]
impl SdistTool for CommandSdistTool {
    async fn package(&self, source_dir: &Path) -> Result<ArtifactPayload, ToolError> {
        let out_dir = &self.config.output_dir;
        if out_dir.exists() {
            fs::remove_dir_all(out_dir)?;
        }
        fs::create_dir_all(out_dir)?;

        info!(command = %self.config.command, "Invoking sdist command");
        let status = Command::new("sh")
            .arg("-c")
            .arg(&self.config.command)
            .env("WHEELSMITH_SOURCE_DIR", source_dir)
            .env("WHEELSMITH_OUTPUT_DIR", out_dir)
            .status()?;
        if !status.success() {
            return Err(format!("sdist command exited with {status}").into());
        }

        let mut files: Vec<_> = fs::read_dir(out_dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file())
            .collect();
        files.sort();
        match files.as_slice() {
            [single] => Ok(ArtifactPayload {
                file_name: single
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                content: fs::read(single)?,
            }),
            other => Err(format!(
                "expected exactly one source distribution, found {}",
                other.len()
            )
            .into()),
        }
    }
}
