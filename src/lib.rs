#![doc = "wheelsmith: cross-platform build-and-publish pipeline."]

//! Expands a declarative OS × architecture × runtime-version matrix into
//! build jobs, runs them in parallel (build + verification), stages the
//! artifacts, and — gated on a published-release trigger — uploads the
//! aggregate to a package registry.
//!
//! # Usage
//! The library exposes the full pipeline; the `wheelsmith` binary is a thin
//! clap wrapper around [`run`].

pub mod config;
pub mod contract;
pub mod load_config;
pub mod matrix;
pub mod pipeline;
pub mod publish;
pub mod runner;
pub mod sdist;
pub mod store;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use load_config::{credentials_from_env, load_config};
use pipeline::Pipeline;
use publish::TriggerEvent;

/// CLI for wheelsmith: build a platform matrix of wheels and publish them on
/// release.
#[derive(Parser)]
#[clap(
    name = "wheelsmith",
    version,
    about = "Expand a platform matrix, build and verify binary wheels, and publish release artifacts to a registry"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the full build matrix and, on a published release, upload the
    /// collected artifacts
    Run {
        /// Path to the YAML pipeline file
        #[clap(long)]
        config: PathBuf,
        /// Kind of the triggering event ("release-published" publishes;
        /// anything else skips the publish phase)
        #[clap(long, default_value = "manual")]
        event: String,
    },
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    // Emit a top-level 'trace_initialised' event at the very start
    tracing::info!("trace_initialised");

    let result = match cli.command {
        Commands::Run { config, event } => {
            let config = load_config(config)?;
            config.trace_loaded();
            let credentials = credentials_from_env();
            let event = TriggerEvent::new(event);
            println!("Pipeline starting...");
            let pipeline = Pipeline::with_commands(config);
            let report = pipeline.run(&event, credentials.as_ref()).await;
            println!("Pipeline complete.\nReport:");
            println!("{report:#?}");
            if report.overall_success() {
                Ok(())
            } else {
                eprintln!("[ERROR] Pipeline finished with failures");
                Err(anyhow::anyhow!("pipeline finished with failures"))
            }
        }
    };

    // Emit an 'exit' span as required for testing and structured tracing.
    let exit_span = tracing::info_span!("exit");
    exit_span.in_scope(|| {
        tracing::info!("emitting exit for test");
    });

    result
}
