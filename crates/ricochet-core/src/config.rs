//! Configuration types

use crate::error::{Error, Result};
use crate::field::FieldLimits;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Ricochet configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Analysis configuration
    pub analysis: AnalysisConfig,

    /// Output configuration
    pub output: OutputConfig,
}

impl Config {
    /// Load a configuration file; `.json` files are read as JSON, anything else as YAML
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json_str(&content),
            _ => Self::from_yaml_str(&content),
        }
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }
}

/// How field chains are abstracted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldAbstraction {
    /// Exact chains; cycles or chains longer than K collapse into a set
    Exact,
    /// Chains keep a precise prefix of at most K fields
    KLimited,
}

/// Which call sites an unbalanced backward exit may continue into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextPolicy {
    /// Continue into every caller
    AllCallers,
    /// Never leave the method; parameters become origins
    NoContext,
}

/// Which right-hand sides count as allocation sites
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationPolicy {
    /// `new`, `newarray` and `null`
    Reference,
    /// Reference allocations plus constants
    PrimitiveAndReference,
}

/// Analysis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Wall-clock budget per query (ms)
    pub time_budget_ms: u64,

    /// Number of scheduler dequeues between budget checks
    pub budget_check_interval: usize,

    /// Maximum precise field chain length (K)
    pub field_limit: usize,

    /// Field chain abstraction
    pub field_abstraction: FieldAbstraction,

    /// Propagate facts rooted at static fields
    pub track_static_fields: bool,

    /// Model array element reads and writes
    pub handle_arrays: bool,

    /// Record the storing statement inside each field of a fact
    pub track_statements_in_fields: bool,

    /// Kill facts overwritten by a field store through the same base
    pub strongly_update_fields: bool,

    /// Hold facts at casts until the allocation type is known to fit
    pub type_check_casts: bool,

    /// Discover callees lazily from receiver allocation types
    pub on_the_fly_call_graph: bool,

    /// Context expansion at unbalanced backward exits
    pub context: ContextPolicy,

    /// Allocation-site classifier
    pub allocation_sites: AllocationPolicy,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            time_budget_ms: 100_000,
            budget_check_interval: 1000,
            field_limit: 5,
            field_abstraction: FieldAbstraction::Exact,
            track_static_fields: true,
            handle_arrays: true,
            track_statements_in_fields: false,
            strongly_update_fields: true,
            type_check_casts: true,
            on_the_fly_call_graph: true,
            context: ContextPolicy::AllCallers,
            allocation_sites: AllocationPolicy::Reference,
        }
    }
}

impl AnalysisConfig {
    /// Field-sequence limits derived from this configuration
    pub fn field_limits(&self) -> FieldLimits {
        FieldLimits::new(self.field_limit, self.field_abstraction)
    }

    pub fn time_budget(&self) -> Duration {
        Duration::from_millis(self.time_budget_ms)
    }
}

/// Output format for the command-line tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    Text,
    Json,
}

/// Output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Result rendering
    pub format: OutputFormat,

    /// Drop null and conservative origins from reported results
    pub hide_null_allocations: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: OutputFormat::Text,
            hide_null_allocations: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.analysis.time_budget_ms, 100_000);
        assert_eq!(config.analysis.budget_check_interval, 1000);
        assert!(config.analysis.track_static_fields);
        assert!(!config.analysis.track_statements_in_fields);
        assert_eq!(config.analysis.context, ContextPolicy::AllCallers);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = Config::from_yaml_str(
            "analysis:\n  field_limit: 2\n  field_abstraction: k_limited\n  context: no_context\n",
        )
        .unwrap();
        assert_eq!(config.analysis.field_limit, 2);
        assert_eq!(config.analysis.field_abstraction, FieldAbstraction::KLimited);
        assert_eq!(config.analysis.context, ContextPolicy::NoContext);
        assert!(config.analysis.handle_arrays);
        assert_eq!(config.output.format, OutputFormat::Text);
    }

    #[test]
    fn test_load_json_by_extension() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"analysis": {{"time_budget_ms": 250}}, "output": {{"format": "json"}}}}"#).unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.analysis.time_budget(), Duration::from_millis(250));
        assert_eq!(config.output.format, OutputFormat::Json);
    }

    #[test]
    fn test_invalid_yaml_is_config_error() {
        let err = Config::from_yaml_str("analysis: [1, 2").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
