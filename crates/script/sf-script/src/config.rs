//! Configuration types for the script engine.

use serde::{Deserialize, Serialize};
use sf_error::{Result, SfError};
use std::time::Duration;

/// Configuration for an [`EngineContext`](crate::EngineContext).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// How calls are spread over interpreter instances.
    #[serde(default)]
    pub mode: DispatchMode,

    /// Number of instances in pool mode (ignored when serialized).
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Routing of calls to pool instances.
    #[serde(default)]
    pub routing: Routing,

    /// Default deadline for a call, queueing included.
    #[serde(default, with = "humantime_serde")]
    pub call_timeout: Option<Duration>,

    /// Capacity of each instance's call queue.
    ///
    /// Callers block once the queue is full, which provides backpressure.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Interpreter safety limits.
    #[serde(default)]
    pub limits: EngineLimits,
}

fn default_pool_size() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn default_queue_capacity() -> usize {
    64
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: DispatchMode::default(),
            pool_size: default_pool_size(),
            routing: Routing::default(),
            call_timeout: None,
            queue_capacity: default_queue_capacity(),
            limits: EngineLimits::default(),
        }
    }
}

impl EngineConfig {
    /// Creates a serialized configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a pool configuration with `size` instances.
    pub fn pool(size: usize) -> Self {
        Self {
            mode: DispatchMode::Pool,
            pool_size: size,
            ..Self::default()
        }
    }

    /// Sets the routing policy.
    pub fn with_routing(mut self, routing: Routing) -> Self {
        self.routing = routing;
        self
    }

    /// Sets the default call deadline.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    /// Sets the per-instance queue capacity.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Sets the interpreter limits.
    pub fn with_limits(mut self, limits: EngineLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Number of interpreter instances this configuration provisions.
    pub fn instance_count(&self) -> usize {
        match self.mode {
            DispatchMode::Serialized => 1,
            DispatchMode::Pool => self.pool_size,
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.mode == DispatchMode::Pool && self.pool_size == 0 {
            return Err(SfError::Config("pool_size must be at least 1".to_string()));
        }
        if self.queue_capacity == 0 {
            return Err(SfError::Config(
                "queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.call_timeout == Some(Duration::ZERO) {
            return Err(SfError::Config(
                "call_timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// How calls are spread over interpreter instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// One instance; every call is queued in arrival order.
    #[default]
    Serialized,

    /// Several independently loaded instances.
    Pool,
}

/// Routing of calls to pool instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Routing {
    /// Spread calls evenly.
    #[default]
    RoundRobin,

    /// Send calls with the same affinity key to the same instance.
    ///
    /// Calls without a key fall back to round-robin.
    Affinity,
}

/// Interpreter safety limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineLimits {
    /// Maximum expression nesting at global level.
    pub max_expr_depth: usize,

    /// Maximum expression nesting inside functions.
    pub max_function_expr_depth: usize,

    /// Maximum function call nesting.
    pub max_call_levels: usize,

    /// Maximum operations per call (0 = unlimited).
    pub max_operations: u64,

    /// Maximum string length.
    pub max_string_size: usize,

    /// Maximum array length.
    pub max_array_size: usize,

    /// Maximum map size.
    pub max_map_size: usize,
}

impl Default for EngineLimits {
    fn default() -> Self {
        Self {
            max_expr_depth: 64,
            max_function_expr_depth: 64,
            max_call_levels: 16,
            max_operations: 100_000,
            max_string_size: 1_000_000,
            max_array_size: 10_000,
            max_map_size: 10_000,
        }
    }
}

impl EngineLimits {
    /// Removes the operation limit, leaving deadlines as the only bound.
    pub fn unlimited_operations(mut self) -> Self {
        self.max_operations = 0;
        self
    }
}

/// Where one script document comes from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScriptConfig {
    /// Inline Rhai script (mutually exclusive with script_file).
    #[serde(default)]
    pub script: Option<String>,

    /// Path to a Rhai script file.
    #[serde(default)]
    pub script_file: Option<String>,

    /// Logical document name; defaults to the file path.
    #[serde(default)]
    pub name: Option<String>,

    /// Namespace for the document's functions.
    ///
    /// Functions of a namespaced document are resolved as `namespace::name`
    /// and never collide with functions of other documents.
    #[serde(default)]
    pub namespace: Option<String>,
}

impl ScriptConfig {
    /// Creates a new config with an inline script.
    pub fn with_script(script: impl Into<String>) -> Self {
        Self {
            script: Some(script.into()),
            ..Self::default()
        }
    }

    /// Creates a new config with a script file path.
    pub fn with_script_file(path: impl Into<String>) -> Self {
        Self {
            script_file: Some(path.into()),
            ..Self::default()
        }
    }

    /// Sets the document name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Places the document's functions in a namespace.
    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        match (&self.script, &self.script_file) {
            (Some(_), Some(_)) => {
                return Err(SfError::Config(
                    "script and script_file are mutually exclusive".to_string(),
                ))
            }
            (None, None) => {
                return Err(SfError::Config(
                    "one of script or script_file is required".to_string(),
                ))
            }
            _ => {}
        }
        if let Some(namespace) = &self.namespace {
            if !is_identifier(namespace) {
                return Err(SfError::Config(format!(
                    "namespace '{namespace}' is not a valid identifier"
                )));
            }
        }
        Ok(())
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
