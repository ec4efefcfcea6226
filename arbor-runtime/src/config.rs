//! Parsed profiling configuration.
//!
//! The engine only consumes already-parsed values. `ProfileConfig::from_env()`
//! is the one place that reads `ARBOR_PROFILING_*` variables; tests and the CLI
//! go through `from_lookup` with their own source of values.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::Error;

pub const ENV_PREFIX: &str = "ARBOR_PROFILING_";

/// Output format requested from the writers.
///
/// The post-processor consults it twice: the TAU snapshot shape keeps raw
/// parameter nodes, and the key-thread/cluster-thread formats trigger the
/// matching clustering stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    None,
    TauSnapshot,
    Cube4,
    CubeTuple,
    ThreadSum,
    ThreadTuple,
    KeyThreads,
    ClusterThreads,
    #[default]
    Default,
}

impl OutputFormat {
    const NAMES: [(&'static str, OutputFormat); 9] = [
        ("none", OutputFormat::None),
        ("tau_snapshot", OutputFormat::TauSnapshot),
        ("cube4", OutputFormat::Cube4),
        ("cube_tuple", OutputFormat::CubeTuple),
        ("thread_sum", OutputFormat::ThreadSum),
        ("thread_tuple", OutputFormat::ThreadTuple),
        ("key_threads", OutputFormat::KeyThreads),
        ("cluster_threads", OutputFormat::ClusterThreads),
        ("default", OutputFormat::Default),
    ];

    pub fn name(self) -> &'static str {
        Self::NAMES
            .iter()
            .find(|(_, f)| *f == self)
            .map_or("default", |(n, _)| n)
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        Self::NAMES
            .iter()
            .find(|(n, _)| *n == lower)
            .map(|(_, f)| *f)
            .ok_or_else(|| {
                let names: Vec<&str> = Self::NAMES.iter().map(|(n, _)| *n).collect();
                format!("expected one of {}", names.join(", "))
            })
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Structural similarity the clusterer requires before merging iterations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClusteringMode {
    None,
    #[default]
    Subtree,
    SubtreeVisits,
    Mpi,
    MpiVisits,
    MpiVisitsAll,
}

impl ClusteringMode {
    const NAMES: [(&'static str, ClusteringMode); 6] = [
        ("none", ClusteringMode::None),
        ("subtree", ClusteringMode::Subtree),
        ("subtree_visits", ClusteringMode::SubtreeVisits),
        ("mpi", ClusteringMode::Mpi),
        ("mpi_visits", ClusteringMode::MpiVisits),
        ("mpi_visits_all", ClusteringMode::MpiVisitsAll),
    ];
}

impl FromStr for ClusteringMode {
    type Err = String;

    /// Accepts the mode name or its position in the table (`subtree` or `1`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        if let Ok(n) = lower.parse::<usize>() {
            return Self::NAMES
                .get(n)
                .map(|(_, m)| *m)
                .ok_or_else(|| format!("mode number must be below {}", Self::NAMES.len()));
        }
        Self::NAMES
            .iter()
            .find(|(n, _)| *n == lower)
            .map(|(_, m)| *m)
            .ok_or_else(|| "unknown clustering mode".to_owned())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProfileConfig {
    pub max_callpath_depth: u64,
    pub task_exchange_num: u64,
    pub base_name: String,
    pub format: OutputFormat,
    pub enable_clustering: bool,
    pub cluster_count: u64,
    pub clustering_mode: ClusteringMode,
    pub clustered_region: String,
    pub enable_core_files: bool,
    pub core_dir: PathBuf,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            max_callpath_depth: 100,
            task_exchange_num: 1024,
            base_name: "profile".to_owned(),
            format: OutputFormat::Default,
            enable_clustering: true,
            cluster_count: 64,
            clustering_mode: ClusteringMode::Subtree,
            clustered_region: String::new(),
            enable_core_files: false,
            core_dir: PathBuf::from("."),
        }
    }
}

impl ProfileConfig {
    /// Read `ARBOR_PROFILING_*` variables, falling back to defaults for unset ones.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a config from any key/value source. Keys are the full variable
    /// names (`ARBOR_PROFILING_MAX_CALLPATH_DEPTH`, ...).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let get = |key: &str| {
            let name = format!("{ENV_PREFIX}{key}");
            lookup(&name).map(|value| (name, value))
        };

        let mut config = Self::default();
        if let Some((name, value)) = get("MAX_CALLPATH_DEPTH") {
            config.max_callpath_depth = parse_size(&name, &value)?;
        }
        if let Some((name, value)) = get("TASK_EXCHANGE_NUM") {
            config.task_exchange_num = parse_size(&name, &value)?;
        }
        if let Some((_, value)) = get("BASE_NAME") {
            config.base_name = value;
        }
        if let Some((name, value)) = get("FORMAT") {
            config.format = value
                .parse()
                .map_err(|reason| invalid(&name, &value, reason))?;
        }
        if let Some((name, value)) = get("ENABLE_CLUSTERING") {
            config.enable_clustering = parse_bool(&name, &value)?;
        }
        if let Some((name, value)) = get("CLUSTER_COUNT") {
            config.cluster_count = parse_size(&name, &value)?;
        }
        if let Some((name, value)) = get("CLUSTERING_MODE") {
            config.clustering_mode = value
                .parse()
                .map_err(|reason| invalid(&name, &value, reason))?;
        }
        if let Some((_, value)) = get("CLUSTERED_REGION") {
            config.clustered_region = value;
        }
        if let Some((name, value)) = get("ENABLE_CORE_FILES") {
            config.enable_core_files = parse_bool(&name, &value)?;
        }
        if let Some((_, value)) = get("CORE_DIR") {
            config.core_dir = PathBuf::from(value);
        }
        Ok(config)
    }
}

fn invalid(name: &str, value: &str, reason: impl Into<String>) -> Error {
    Error::InvalidConfig {
        name: name.to_owned(),
        value: value.to_owned(),
        reason: reason.into(),
    }
}

/// Parse a number with an optional `K`, `M` or `G` suffix (powers of 1024).
pub fn parse_size(name: &str, value: &str) -> Result<u64, Error> {
    let trimmed = value.trim();
    let (digits, shift) = match trimmed.char_indices().last() {
        Some((i, 'k' | 'K')) => (&trimmed[..i], 10),
        Some((i, 'm' | 'M')) => (&trimmed[..i], 20),
        Some((i, 'g' | 'G')) => (&trimmed[..i], 30),
        _ => (trimmed, 0),
    };
    let base: u64 = digits
        .trim()
        .parse()
        .map_err(|_| invalid(name, value, "expected a number with optional K/M/G suffix"))?;
    base.checked_mul(1u64 << shift)
        .ok_or_else(|| invalid(name, value, "value does not fit into 64 bits"))
}

fn parse_bool(name: &str, value: &str) -> Result<bool, Error> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(name, value, "expected true or false")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (format!("{ENV_PREFIX}{k}"), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn unset_variables_keep_defaults() {
        let config = ProfileConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config, ProfileConfig::default());
        assert_eq!(config.max_callpath_depth, 100);
        assert_eq!(config.task_exchange_num, 1024);
    }

    #[test]
    fn size_suffixes_scale_by_1024() {
        let config =
            ProfileConfig::from_lookup(lookup(&[("TASK_EXCHANGE_NUM", "2K"), ("CLUSTER_COUNT", "1m")]))
                .unwrap();
        assert_eq!(config.task_exchange_num, 2048);
        assert_eq!(config.cluster_count, 1 << 20);
    }

    #[test]
    fn format_and_mode_parse_by_name_or_number() {
        let config = ProfileConfig::from_lookup(lookup(&[
            ("FORMAT", "TAU_SNAPSHOT"),
            ("CLUSTERING_MODE", "2"),
            ("ENABLE_CLUSTERING", "no"),
        ]))
        .unwrap();
        assert_eq!(config.format, OutputFormat::TauSnapshot);
        assert_eq!(config.clustering_mode, ClusteringMode::SubtreeVisits);
        assert!(!config.enable_clustering);
    }

    #[test]
    fn malformed_depth_is_invalid_config() {
        let err = ProfileConfig::from_lookup(lookup(&[("MAX_CALLPATH_DEPTH", "deep")]))
            .unwrap_err();
        match err {
            Error::InvalidConfig { name, value, .. } => {
                assert_eq!(name, "ARBOR_PROFILING_MAX_CALLPATH_DEPTH");
                assert_eq!(value, "deep");
            }
            other => panic!("expected InvalidConfig, got {other:?}"),
        }
    }

    #[test]
    fn unknown_format_lists_alternatives() {
        let err = ProfileConfig::from_lookup(lookup(&[("FORMAT", "xml")])).unwrap_err();
        assert!(err.to_string().contains("cube4"), "unexpected: {err}");
    }
}
