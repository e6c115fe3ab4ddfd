//! # matrix: declarative build-matrix expansion
//!
//! Expands a set of axes (operating system × architecture × runtime version)
//! into concrete [`BuildJob`]s, applying exclusion rules with partial-match
//! semantics. Expansion is pure and deterministic: the same config always
//! yields the same jobs in the same order, so logs are reproducible.
//!
//! An axis with zero values yields an empty job set (a no-op pipeline, not an
//! error), and a rule that matches nothing is silently inert. Two distinct
//! combinations that would join to the same job id make expansion fail
//! instead of aliasing each other.

use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use tracing::{debug, error, info};

use crate::config::BuildConfig;

/// The matrix itself can be invalid: axis values may join into ambiguous job
/// identities.
#[derive(Debug)]
pub enum MatrixError {
    /// Two distinct axis combinations join to the same job id (values
    /// containing the id separator can alias each other). Identities must be
    /// unique; an aliased id would silently overwrite one job's artifacts
    /// with another's.
    AmbiguousJobId {
        id: String,
        first: Vec<(String, String)>,
        second: Vec<(String, String)>,
    },
}

impl std::fmt::Display for MatrixError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatrixError::AmbiguousJobId { id, first, second } => write!(
                f,
                "ambiguous job identity '{id}': axis combinations {first:?} and {second:?} join to the same id"
            ),
        }
    }
}

impl std::error::Error for MatrixError {}

/// Env var prefix for per-axis variables exported to the build tool.
pub const AXIS_ENV_PREFIX: &str = "WHEELSMITH";

/// One dimension of build variation, e.g. operating system. Immutable once
/// declared; the declared value order is the expansion order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Axis {
    pub name: String,
    pub values: Vec<String>,
}

/// A partial axis→value assignment. A combination is excluded when every axis
/// the rule names carries the rule's value; axes the rule does not name are
/// wildcards.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExclusionRule(pub BTreeMap<String, String>);

impl ExclusionRule {
    pub fn matches(&self, combination: &[(String, String)]) -> bool {
        self.0
            .iter()
            .all(|(axis, value)| combination.iter().any(|(a, v)| a == axis && v == value))
    }
}

/// Declarative matrix: ordered axes plus exclusion rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatrixConfig {
    pub axes: Vec<Axis>,
    #[serde(default)]
    pub exclude: Vec<ExclusionRule>,
}

/// One concrete cell of the build matrix, with derived job-scoped
/// configuration. Identity is the tuple of axis values, joined in axis order.
/// Immutable after creation.
#[derive(Debug, Clone)]
pub struct BuildJob {
    pub id: String,
    /// Axis assignment in declared axis order.
    pub values: Vec<(String, String)>,
    /// Job-scoped environment: one `WHEELSMITH_<AXIS>` var per axis plus the
    /// config-level extra env.
    pub env: Vec<(String, String)>,
    pub build_command: String,
    pub test_command: String,
}

impl BuildJob {
    pub fn value_of(&self, axis: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(a, _)| a == axis)
            .map(|(_, v)| v.as_str())
    }
}

/// Expands the Cartesian product of all axis values, drops combinations
/// matching at least one exclusion rule, and derives per-job configuration.
/// Fails when two surviving combinations would share a job id.
pub fn expand(matrix: &MatrixConfig, build: &BuildConfig) -> Result<Vec<BuildJob>, MatrixError> {
    if matrix.axes.is_empty() {
        info!("Matrix has no axes, expanding to an empty job set");
        return Ok(Vec::new());
    }

    let mut combinations: Vec<Vec<(String, String)>> = vec![Vec::new()];
    for axis in &matrix.axes {
        let mut next = Vec::with_capacity(combinations.len() * axis.values.len());
        for combination in &combinations {
            for value in &axis.values {
                let mut extended = combination.clone();
                extended.push((axis.name.clone(), value.clone()));
                next.push(extended);
            }
        }
        combinations = next;
    }
    let product_size = combinations.len();

    let mut jobs = Vec::new();
    let mut seen_ids: BTreeMap<String, Vec<(String, String)>> = BTreeMap::new();
    for combination in combinations {
        if let Some(rule) = matrix.exclude.iter().find(|r| r.matches(&combination)) {
            debug!(combination = ?combination, rule = ?rule, "Combination excluded by rule");
            continue;
        }
        let job = derive_job(combination, build);
        match seen_ids.entry(job.id.clone()) {
            Entry::Vacant(vacant) => {
                vacant.insert(job.values.clone());
            }
            Entry::Occupied(occupied) => {
                error!(id = %job.id, "Distinct axis combinations join to the same job id");
                return Err(MatrixError::AmbiguousJobId {
                    id: job.id,
                    first: occupied.get().clone(),
                    second: job.values,
                });
            }
        }
        jobs.push(job);
    }

    info!(
        product = product_size,
        excluded = product_size - jobs.len(),
        jobs = jobs.len(),
        "Matrix expanded"
    );
    Ok(jobs)
}

fn derive_job(values: Vec<(String, String)>, build: &BuildConfig) -> BuildJob {
    let id = values
        .iter()
        .map(|(_, v)| v.as_str())
        .collect::<Vec<_>>()
        .join("-");

    let mut env: Vec<(String, String)> = values
        .iter()
        .map(|(axis, value)| (axis_env_name(axis), value.clone()))
        .collect();
    for (k, v) in &build.env {
        env.push((k.clone(), v.clone()));
    }

    BuildJob {
        id,
        values,
        env,
        build_command: build.command.clone(),
        test_command: build.test_command.clone(),
    }
}

fn axis_env_name(axis: &str) -> String {
    format!(
        "{}_{}",
        AXIS_ENV_PREFIX,
        axis.to_uppercase().replace(['-', '.'], "_")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn axis(name: &str, values: &[&str]) -> Axis {
        Axis {
            name: name.to_string(),
            values: values.iter().map(|v| v.to_string()).collect(),
        }
    }

    fn rule(pairs: &[(&str, &str)]) -> ExclusionRule {
        ExclusionRule(
            pairs
                .iter()
                .map(|(a, v)| (a.to_string(), v.to_string()))
                .collect(),
        )
    }

    fn build_config() -> BuildConfig {
        BuildConfig {
            command: "make wheel".to_string(),
            test_command: "make test".to_string(),
            env: BTreeMap::new(),
            output_dir: "wheelhouse".into(),
        }
    }

    #[test]
    fn expands_two_by_two_minus_one_exclusion_to_three_jobs() {
        let matrix = MatrixConfig {
            axes: vec![axis("os", &["A", "B"]), axis("arch", &["x86", "arm"])],
            exclude: vec![rule(&[("os", "B"), ("arch", "arm")])],
        };
        let jobs = expand(&matrix, &build_config()).unwrap();
        let ids: Vec<&str> = jobs.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, vec!["A-x86", "A-arm", "B-x86"]);
    }

    #[test]
    fn job_count_is_product_minus_matched_combinations() {
        let matrix = MatrixConfig {
            axes: vec![
                axis("os", &["linux", "macos", "windows"]),
                axis("arch", &["x86_64", "aarch64"]),
                axis("python", &["3.10", "3.11"]),
            ],
            // Wildcard on python: matches 2 combinations.
            exclude: vec![rule(&[("os", "windows"), ("arch", "aarch64")])],
        };
        let jobs = expand(&matrix, &build_config()).unwrap();
        assert_eq!(jobs.len(), 3 * 2 * 2 - 2);
        for job in &jobs {
            assert!(
                !(job.value_of("os") == Some("windows") && job.value_of("arch") == Some("aarch64")),
                "excluded combination leaked into job set: {}",
                job.id
            );
        }
    }

    #[test]
    fn no_job_matches_any_rule() {
        let matrix = MatrixConfig {
            axes: vec![axis("os", &["A", "B"]), axis("arch", &["x86", "arm"])],
            exclude: vec![rule(&[("arch", "arm")])],
        };
        let jobs = expand(&matrix, &build_config()).unwrap();
        assert_eq!(jobs.len(), 2);
        for job in &jobs {
            for rule in &matrix.exclude {
                assert!(!rule.matches(&job.values));
            }
        }
    }

    #[test]
    fn inert_rule_is_silently_ignored() {
        let matrix = MatrixConfig {
            axes: vec![axis("os", &["A"])],
            exclude: vec![rule(&[("os", "Z")])],
        };
        assert_eq!(expand(&matrix, &build_config()).unwrap().len(), 1);
    }

    #[test]
    fn axis_with_zero_values_yields_empty_job_set() {
        let matrix = MatrixConfig {
            axes: vec![axis("os", &["A", "B"]), axis("arch", &[])],
            exclude: vec![],
        };
        assert!(expand(&matrix, &build_config()).unwrap().is_empty());
    }

    #[test]
    fn expansion_is_deterministic() {
        let matrix = MatrixConfig {
            axes: vec![axis("os", &["A", "B"]), axis("arch", &["x86", "arm"])],
            exclude: vec![],
        };
        let first: Vec<String> = expand(&matrix, &build_config())
            .unwrap()
            .into_iter()
            .map(|j| j.id)
            .collect();
        let second: Vec<String> = expand(&matrix, &build_config())
            .unwrap()
            .into_iter()
            .map(|j| j.id)
            .collect();
        assert_eq!(first, second);
    }

    #[test]
    fn aliasing_axis_values_are_rejected_not_silently_merged() {
        // (a-b, c) and (a, b-c) both join to the id "a-b-c".
        let matrix = MatrixConfig {
            axes: vec![axis("os", &["a-b", "a"]), axis("arch", &["c", "b-c"])],
            exclude: vec![],
        };
        let err = expand(&matrix, &build_config()).unwrap_err();
        match err {
            MatrixError::AmbiguousJobId { id, first, second } => {
                assert_eq!(id, "a-b-c");
                assert_ne!(first, second);
            }
        }
    }

    #[test]
    fn excluding_one_of_two_aliasing_combinations_resolves_the_ambiguity() {
        let matrix = MatrixConfig {
            axes: vec![axis("os", &["a-b", "a"]), axis("arch", &["c", "b-c"])],
            exclude: vec![rule(&[("os", "a"), ("arch", "b-c")])],
        };
        let jobs = expand(&matrix, &build_config()).unwrap();
        assert_eq!(jobs.len(), 3);
    }

    #[test]
    fn job_env_carries_axis_values_and_extra_env() {
        let mut config = build_config();
        config
            .env
            .insert("PKG_VERSION".to_string(), "1.0".to_string());
        let matrix = MatrixConfig {
            axes: vec![
                axis("os", &["linux"]),
                axis("runtime-version", &["3.11"]),
            ],
            exclude: vec![],
        };
        let jobs = expand(&matrix, &config).unwrap();
        assert_eq!(jobs.len(), 1);
        let env = &jobs[0].env;
        assert!(env.contains(&("WHEELSMITH_OS".to_string(), "linux".to_string())));
        assert!(env.contains(&(
            "WHEELSMITH_RUNTIME_VERSION".to_string(),
            "3.11".to_string()
        )));
        assert!(env.contains(&("PKG_VERSION".to_string(), "1.0".to_string())));
    }
}
