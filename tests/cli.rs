use assert_cmd::Command;
use predicates::prelude::*;
use std::fs::write;
use tempfile::{tempdir, NamedTempFile};

/// Pipeline file whose build/test/sdist/publish steps are plain shell
/// commands, so the CLI can run end-to-end without any real toolchain.
fn create_shell_pipeline_config(scratch: &std::path::Path) -> NamedTempFile {
    let config = NamedTempFile::new().expect("Creating temp config file failed");
    let yaml = format!(
        r#"
matrix:
  axes:
    - name: os
      values: [linux]
    - name: python
      values: ["3.10", "3.11"]
build:
  command: 'echo wheel > "$WHEELSMITH_OUTPUT_DIR/pkg-$WHEELSMITH_OS-$WHEELSMITH_PYTHON.whl"'
  test_command: "true"
  output_dir: {scratch}/wheelhouse
sdist:
  command: 'echo src > "$WHEELSMITH_OUTPUT_DIR/pkg-1.0.tar.gz"'
  source_dir: {scratch}
  output_dir: {scratch}/sdist
publish:
  command: 'test -f "$WHEELSMITH_ARTIFACT"'
  staging_dir: {scratch}/staging
"#,
        scratch = scratch.display()
    );
    write(config.path(), yaml).expect("Writing temp config failed");
    config
}

#[test]
fn run_cli_manual_event_succeeds_without_publishing() {
    let scratch = tempdir().expect("tempdir");
    let config = create_shell_pipeline_config(scratch.path());
    let mut cmd = Command::cargo_bin("wheelsmith").expect("Binary exists");

    cmd.arg("run").arg("--config").arg(config.path());

    cmd.assert().success().stdout(
        predicate::str::contains("Pipeline complete")
            .and(predicate::str::contains("SkippedGateClosed")),
    );
    // Nothing was staged for upload.
    assert!(!scratch.path().join("staging").exists());
}

#[test]
fn run_cli_release_event_stages_and_publishes() {
    let scratch = tempdir().expect("tempdir");
    let config = create_shell_pipeline_config(scratch.path());
    let mut cmd = Command::cargo_bin("wheelsmith").expect("Binary exists");

    cmd.arg("run")
        .arg("--config")
        .arg(config.path())
        .arg("--event")
        .arg("release-published")
        .env("WHEELSMITH_REGISTRY_TOKEN", "tok-test");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Published"));
    // Two wheels plus the sdist, normalized into the flat staging dir.
    let staging = scratch.path().join("staging");
    assert!(staging.join("pkg-linux-3.10.whl").is_file());
    assert!(staging.join("pkg-linux-3.11.whl").is_file());
    assert!(staging.join("pkg-1.0.tar.gz").is_file());
}

#[test]
fn run_cli_fails_on_missing_config() {
    let mut cmd = Command::cargo_bin("wheelsmith").expect("Binary exists");
    cmd.arg("run").arg("--config").arg("no/such/pipeline.yaml");
    cmd.assert().failure();
}

use std::sync::{Arc, Mutex};
use tracing_subscriber::prelude::*; // needed for .with()
use tracing_subscriber::{layer::Context, Layer, Registry};

/// Custom Layer to collect emitted event messages.
struct EventCollector {
    events: Arc<Mutex<Vec<String>>>,
}

impl<S> Layer<S> for EventCollector
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        use std::fmt::Write as FmtWrite;
        let mut msg = String::new();
        let _ = write!(&mut msg, "{:?}", event);
        self.events.lock().unwrap().push(msg);
    }
}

#[tokio::test]
async fn emits_trace_initialised_event() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let collector = EventCollector {
        events: events.clone(),
    };
    let subscriber = Registry::default().with(collector);
    let _guard = tracing::subscriber::set_default(subscriber);

    use wheelsmith::{run, Cli, Commands};

    // Provide minimum config for the Run subcommand (using a dummy path).
    let cli = Cli {
        command: Commands::Run {
            config: std::path::PathBuf::from("dummy.yaml"),
            event: "manual".to_string(),
        },
    };

    let _ = run(cli).await;

    let event_msgs = events.lock().unwrap();
    assert!(
        event_msgs
            .iter()
            .any(|msg| msg.contains("trace_initialised")),
        "Expected a 'trace_initialised' trace event, got: {:?}",
        event_msgs
    );
}
