//! Pipeline configuration.

use crate::value::ValueDefinition;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use sf_error::{Result, SfError, SourceError};
use sf_script::{EngineConfig, ScriptConfig};
use std::path::Path;

/// Configuration for a [`RowPipeline`](crate::RowPipeline), usually read
/// from a JSON file.
///
/// ```json
/// {
///   "scripting": [{ "script_file": "functions.rhai" }],
///   "transform": {
///     "name": { "function": "lowercase" },
///     "source": "import"
///   },
///   "map": "testMap",
///   "transient_columns": ["scratch"],
///   "error_policy": "drop"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Script documents, loaded in order.
    #[serde(default)]
    pub scripting: Vec<ScriptConfig>,

    /// Script engine settings.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Output column -> value definition, applied in order.
    #[serde(default)]
    pub transform: IndexMap<String, ValueDefinition>,

    /// Row mapper applied to every input row before the transforms.
    #[serde(default)]
    pub map: Option<String>,

    /// Connection property -> value definition, resolved once.
    #[serde(default)]
    pub connection_properties: IndexMap<String, ValueDefinition>,

    /// Columns removed before rows are written.
    #[serde(default)]
    pub transient_columns: Vec<String>,

    /// What to do with a row whose processing fails.
    #[serde(default)]
    pub error_policy: ErrorPolicy,

    /// Stop after this many input rows (0 = no limit).
    #[serde(default)]
    pub limit: u64,

    /// Worker threads.
    #[serde(default = "default_threads")]
    pub threads: usize,
}

fn default_threads() -> usize {
    1
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            scripting: Vec::new(),
            engine: EngineConfig::default(),
            transform: IndexMap::new(),
            map: None,
            connection_properties: IndexMap::new(),
            transient_columns: Vec::new(),
            error_policy: ErrorPolicy::default(),
            limit: 0,
            threads: default_threads(),
        }
    }
}

impl PipelineConfig {
    /// Reads a JSON configuration file.
    ///
    /// Relative `script_file` paths are resolved against the directory
    /// containing the configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SourceError::NotFound(path.display().to_string()).into());
        }

        let text = std::fs::read_to_string(path)
            .map_err(|e| SourceError::Io(format!("Failed to read {}: {e}", path.display())))?;
        let mut config: Self = serde_json::from_str(&text).map_err(|e| {
            SfError::Config(format!("Invalid configuration {}: {e}", path.display()))
        })?;

        if let Some(base) = path.parent() {
            for script in &mut config.scripting {
                if let Some(file) = &script.script_file {
                    let file_path = Path::new(file);
                    if file_path.is_relative() {
                        script.script_file = Some(base.join(file_path).display().to_string());
                    }
                }
            }
        }

        if config.threads == 0 {
            config.threads = default_threads();
        }

        Ok(config)
    }

    /// Adds a script document.
    pub fn with_script(mut self, script: ScriptConfig) -> Self {
        self.scripting.push(script);
        self
    }

    /// Adds a transform column.
    pub fn with_transform(mut self, column: impl Into<String>, value: ValueDefinition) -> Self {
        self.transform.insert(column.into(), value);
        self
    }

    /// Sets the row mapper.
    pub fn with_map(mut self, function: impl Into<String>) -> Self {
        self.map = Some(function.into());
        self
    }

    /// Adds a connection property.
    pub fn with_connection_property(
        mut self,
        name: impl Into<String>,
        value: ValueDefinition,
    ) -> Self {
        self.connection_properties.insert(name.into(), value);
        self
    }

    /// Adds a transient column.
    pub fn with_transient_column(mut self, column: impl Into<String>) -> Self {
        self.transient_columns.push(column.into());
        self
    }

    /// Sets the error policy.
    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }

    /// Sets the input row limit.
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = limit;
        self
    }

    /// Sets the worker thread count.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Function names the configuration refers to.
    pub fn referenced_functions(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .transform
            .values()
            .chain(self.connection_properties.values())
            .filter_map(ValueDefinition::function_name)
            .collect();
        if let Some(map) = &self.map {
            names.push(map);
        }
        names
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        for script in &self.scripting {
            script.validate()?;
        }
        self.engine.validate()?;

        if self.threads == 0 {
            return Err(SfError::Config("threads must be at least 1".to_string()));
        }
        if self.scripting.is_empty() {
            if let Some(name) = self.referenced_functions().first() {
                return Err(SfError::Config(format!(
                    "function '{name}' is referenced but no scripts are configured"
                )));
            }
        }
        Ok(())
    }
}

/// Error handling policies for row failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    /// Drop rows that fail, continue processing.
    #[default]
    Drop,

    /// Abort the run on the first failing row.
    Fail,

    /// Write the original input row unchanged if processing fails.
    Passthrough,
}
