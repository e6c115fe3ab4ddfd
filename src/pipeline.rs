//! # pipeline: top-level orchestration
//!
//! Fan-out with result aggregation: one task per matrix cell plus one for the
//! source distribution, no shared mutable state except the append-only
//! [`ArtifactStore`]. Failures are collected, never propagated early — the
//! full matrix always runs to a terminal state before the publish gate is
//! evaluated. Publishing happens only when the gate is open *and* every
//! producer succeeded; a closed gate is a skip, not a failure.
//!
//! # Navigation
//! - Main entrypoint: [`Pipeline::run`]
//! - Result types: [`PipelineReport`], [`JobReport`], [`PublishOutcome`]

use futures::future::join_all;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::{PipelineConfig, RegistryCredentials};
use crate::contract::{BuildTool, Registry, SdistTool, Verifier};
use crate::matrix;
use crate::publish::{self, PublishError, Publisher, TriggerEvent};
use crate::runner::{BuildError, BuildRunner, CommandBuildTool, CommandVerifier};
use crate::sdist::{CommandSdistTool, SourceDistBuilder, SDIST_JOB_ID};
use crate::store::ArtifactStore;

/// Pseudo-identity used when matrix expansion itself fails and no cell ever
/// gets dispatched.
pub const MATRIX_JOB_ID: &str = "matrix";

/// Terminal result for one producer (a matrix cell or the sdist job). On
/// success, carries the number of artifacts staged.
#[derive(Debug)]
pub struct JobReport {
    pub job_id: String,
    pub result: Result<usize, BuildError>,
}

/// What happened to the publish phase.
#[derive(Debug)]
pub enum PublishOutcome {
    Published { uploaded: usize },
    /// The trigger did not open the gate; the run can still be a success.
    SkippedGateClosed { reason: String },
    /// At least one producer failed; a partial matrix is never published.
    SkippedBuildFailed,
    Failed(PublishError),
}

/// Aggregate report for one pipeline run.
#[derive(Debug)]
pub struct PipelineReport {
    pub run_id: Uuid,
    pub jobs: Vec<JobReport>,
    pub sdist: JobReport,
    pub publish: PublishOutcome,
}

impl PipelineReport {
    /// The run's terminal status: failure if any producer failed or an
    /// attempted publish failed. A skipped publish is not a failure.
    pub fn overall_success(&self) -> bool {
        self.jobs.iter().all(|j| j.result.is_ok())
            && self.sdist.result.is_ok()
            && !matches!(self.publish, PublishOutcome::Failed(_))
    }
}

/// The assembled pipeline: immutable config plus the four collaborator seams.
pub struct Pipeline {
    config: PipelineConfig,
    build_tool: Arc<dyn BuildTool>,
    verifier: Arc<dyn Verifier>,
    sdist_tool: Arc<dyn SdistTool>,
    registry: Arc<dyn Registry>,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        build_tool: Arc<dyn BuildTool>,
        verifier: Arc<dyn Verifier>,
        sdist_tool: Arc<dyn SdistTool>,
        registry: Arc<dyn Registry>,
    ) -> Self {
        Pipeline {
            config,
            build_tool,
            verifier,
            sdist_tool,
            registry,
        }
    }

    /// Wires the command-backed default collaborators from the config.
    pub fn with_commands(config: PipelineConfig) -> Self {
        let build_tool = Arc::new(CommandBuildTool::new(config.build.clone()));
        let sdist_tool = Arc::new(CommandSdistTool::new(config.sdist.clone()));
        let registry = Arc::new(publish::CommandRegistry::new(config.publish.command.clone()));
        Pipeline::new(config, build_tool, Arc::new(CommandVerifier), sdist_tool, registry)
    }

    /// Runs the full pipeline: expand, fan out, barrier, gate, publish.
    /// Always returns a report; the caller maps it to an exit status.
    pub async fn run(
        &self,
        event: &TriggerEvent,
        credentials: Option<&RegistryCredentials>,
    ) -> PipelineReport {
        let run_id = Uuid::new_v4();
        info!(%run_id, event_kind = %event.kind, "[PIPELINE] Starting pipeline run");

        let jobs = match matrix::expand(&self.config.matrix, &self.config.build) {
            Ok(jobs) => jobs,
            Err(e) => {
                error!(error = %e, "[PIPELINE][ERROR] Build matrix is invalid, nothing dispatched");
                return PipelineReport {
                    run_id,
                    jobs: vec![JobReport {
                        job_id: MATRIX_JOB_ID.to_string(),
                        result: Err(BuildError::BuildFailed {
                            job_id: MATRIX_JOB_ID.to_string(),
                            detail: e.to_string(),
                        }),
                    }],
                    sdist: JobReport {
                        job_id: SDIST_JOB_ID.to_string(),
                        result: Err(BuildError::BuildFailed {
                            job_id: SDIST_JOB_ID.to_string(),
                            detail: "skipped: build matrix is invalid".to_string(),
                        }),
                    },
                    publish: PublishOutcome::SkippedBuildFailed,
                };
            }
        };
        let store = Arc::new(ArtifactStore::new());
        let runner = Arc::new(BuildRunner::new(
            self.build_tool.clone(),
            self.verifier.clone(),
            self.config.host.clone(),
            store.clone(),
        ));

        // Fan out: one independent task per job, no cancellation between
        // siblings.
        let mut handles = Vec::with_capacity(jobs.len());
        for job in jobs {
            let runner = runner.clone();
            let job_id = job.id.clone();
            let handle = tokio::spawn(async move {
                let result = runner.run(&job).await.map(|artifacts| artifacts.len());
                JobReport {
                    job_id: job.id,
                    result,
                }
            });
            handles.push((job_id, handle));
        }

        // The source distribution runs in parallel with the matrix.
        let sdist_builder = SourceDistBuilder::new(self.sdist_tool.clone(), store.clone());
        let source_dir = self.config.sdist.source_dir.clone();
        let sdist_handle = tokio::spawn(async move {
            let result = sdist_builder.run(&source_dir).await.map(|_| 1usize);
            JobReport {
                job_id: SDIST_JOB_ID.to_string(),
                result,
            }
        });

        // Barrier: every producer reaches a terminal state before gating.
        let (job_ids, futures): (Vec<_>, Vec<_>) = handles.into_iter().unzip();
        let mut job_reports = Vec::with_capacity(job_ids.len());
        for (job_id, joined) in job_ids.into_iter().zip(join_all(futures).await) {
            job_reports.push(unwrap_join(job_id, joined));
        }
        let sdist_report = unwrap_join(SDIST_JOB_ID.to_string(), sdist_handle.await);

        let failed: Vec<&str> = job_reports
            .iter()
            .chain(std::iter::once(&sdist_report))
            .filter(|report| report.result.is_err())
            .map(|report| report.job_id.as_str())
            .collect();
        info!(
            jobs = job_reports.len(),
            failed = failed.len(),
            staged = store.len(),
            "[PIPELINE] All producers finished"
        );

        // The gate is evaluated exactly once, after the barrier.
        let decision = publish::decide(event);
        info!(open = decision.open, reason = %decision.reason, "[PIPELINE] Publish gate evaluated");

        let publish = if !failed.is_empty() {
            error!(failed_jobs = ?failed, "[PIPELINE] Build stage failed, publish skipped");
            PublishOutcome::SkippedBuildFailed
        } else if !decision.open {
            info!(reason = %decision.reason, "[PIPELINE] Gate closed, publish skipped");
            PublishOutcome::SkippedGateClosed {
                reason: decision.reason,
            }
        } else {
            let artifacts = store.drain_all();
            match credentials {
                None => {
                    error!("[PIPELINE][ERROR] Gate open but registry credentials missing");
                    PublishOutcome::Failed(PublishError::MissingCredentials)
                }
                Some(credentials) => {
                    let publisher = Publisher::new(
                        self.registry.clone(),
                        self.config.publish.staging_dir.clone(),
                    );
                    match publisher.publish(&artifacts, credentials).await {
                        Ok(uploaded) => PublishOutcome::Published { uploaded },
                        Err(e) => {
                            error!(error = %e, "[PIPELINE][ERROR] Publish phase failed");
                            PublishOutcome::Failed(e)
                        }
                    }
                }
            }
        };

        let report = PipelineReport {
            run_id,
            jobs: job_reports,
            sdist: sdist_report,
            publish,
        };
        info!(success = report.overall_success(), "[PIPELINE] Run complete");
        report
    }
}

/// A panicked producer task is recorded as a failed job, not propagated: the
/// rest of the matrix already ran to completion.
fn unwrap_join(
    job_id: String,
    joined: Result<JobReport, tokio::task::JoinError>,
) -> JobReport {
    match joined {
        Ok(report) => report,
        Err(e) => {
            error!(job_id = %job_id, error = %e, "[PIPELINE][ERROR] Producer task panicked");
            JobReport {
                result: Err(BuildError::BuildFailed {
                    job_id: job_id.clone(),
                    detail: format!("producer task panicked: {e}"),
                }),
                job_id,
            }
        }
    }
}
