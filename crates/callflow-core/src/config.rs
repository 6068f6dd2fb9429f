use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::call_graph::StrategyKind;
use crate::errors::{AnalysisError, Result};

/// Call graph construction options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallGraphOptions {
    /// Construction strategy (default: single-callee)
    #[serde(default)]
    pub strategy: StrategyKind,

    /// Overrider count above which a virtual method becomes a root
    /// under the multiple-callee strategy (default: 5)
    #[serde(default = "default_big_override_threshold")]
    pub big_override_threshold: u32,
}

fn default_big_override_threshold() -> u32 {
    5
}

impl Default for CallGraphOptions {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::SingleCallee,
            big_override_threshold: default_big_override_threshold(),
        }
    }
}

/// Global type analysis options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeAnalysisOptions {
    /// Refinement runs after the bootstrap run (default: 10)
    #[serde(default = "default_max_global_analysis_iteration")]
    pub max_global_analysis_iteration: usize,
}

fn default_max_global_analysis_iteration() -> usize {
    10
}

impl Default for TypeAnalysisOptions {
    fn default() -> Self {
        Self {
            max_global_analysis_iteration: default_max_global_analysis_iteration(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsOptions {
    /// Pretty-print diagnostics (default: true)
    #[serde(default = "default_true")]
    pub pretty: bool,
}

fn default_true() -> bool {
    true
}

impl Default for DiagnosticsOptions {
    fn default() -> Self {
        Self { pretty: true }
    }
}

/// Main analysis configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisConfig {
    #[serde(default)]
    pub call_graph: CallGraphOptions,

    #[serde(default)]
    pub type_analysis: TypeAnalysisOptions,

    #[serde(default)]
    pub diagnostics: DiagnosticsOptions,
}

/// Options given on the command line; `None` keeps the file value
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub strategy: Option<StrategyKind>,
    pub big_override_threshold: Option<u32>,
    pub max_global_analysis_iteration: Option<usize>,
    pub pretty: Option<bool>,
}

impl AnalysisConfig {
    /// Load configuration from a YAML (`.yaml`/`.yml`) or JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let is_yaml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"));
        if is_yaml {
            Self::from_yaml_str(&content)
        } else {
            Self::from_json_str(&content)
        }
    }

    pub fn from_json_str(source: &str) -> Result<Self> {
        serde_json::from_str(source).map_err(|e| AnalysisError::Config(e.to_string()))
    }

    pub fn from_yaml_str(source: &str) -> Result<Self> {
        serde_yaml::from_str(source).map_err(|e| AnalysisError::Config(e.to_string()))
    }

    /// Create a default configuration and write it to a file
    pub fn init_file(path: &Path) -> Result<()> {
        let config = AnalysisConfig::default();
        let json = serde_json::to_string_pretty(&config)
            .map_err(|e| AnalysisError::Config(e.to_string()))?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Merge this configuration with CLI overrides
    pub fn merge_with_cli(&mut self, overrides: CliOverrides) {
        if let Some(strategy) = overrides.strategy {
            self.call_graph.strategy = strategy;
        }
        if let Some(threshold) = overrides.big_override_threshold {
            self.call_graph.big_override_threshold = threshold;
        }
        if let Some(max) = overrides.max_global_analysis_iteration {
            self.type_analysis.max_global_analysis_iteration = max;
        }
        if let Some(pretty) = overrides.pretty {
            self.diagnostics.pretty = pretty;
        }
    }
}
