//! EngineContext - the handle hosts use to call script functions.

use crate::config::{EngineConfig, Routing, ScriptConfig};
use crate::instance::{Instance, Submission};
use crate::invocation::{Invocation, Outcome};
use crate::registry::FunctionHandle;
use crate::source::{ScriptLibrary, ScriptSource, SourceDocument};
use crate::stats::{EngineStats, EngineStatsSnapshot};
use parking_lot::RwLock;
use sf_error::{Result, ScriptError, SfError};
use sf_traits::HostEnvironment;
use sf_types::{FunctionRole, Row, Value};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Attempts per call when the chosen instance is recycled underneath it.
const MAX_ATTEMPTS: usize = 3;

/// Per-call options.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Deadline overriding the configured `call_timeout`.
    pub timeout: Option<Duration>,

    /// Affinity key, used when routing is [`Routing::Affinity`].
    pub affinity: Option<u64>,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the call deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Routes calls with equal keys to the same instance.
    pub fn with_affinity(mut self, key: impl Hash) -> Self {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        self.affinity = Some(hasher.finish());
        self
    }
}

struct ContextState {
    library: Arc<ScriptLibrary>,
    instances: Vec<Arc<Instance>>,
    closed: bool,
}

/// A loaded script library plus the interpreter instances that run it.
///
/// The context is `Send + Sync`; share it behind an `Arc` and call it from
/// any number of threads. In serialized mode every call goes through one
/// instance in arrival order. In pool mode each instance is loaded
/// independently and calls to different instances run in parallel.
///
/// A call that exceeds its deadline fails with [`ScriptError::Timeout`]; the
/// instance that ran it is discarded and replaced, so later calls are not
/// affected.
pub struct EngineContext {
    config: EngineConfig,
    host: Arc<dyn HostEnvironment>,
    state: RwLock<ContextState>,
    next_slot: AtomicUsize,
    next_instance: AtomicUsize,
    stats: EngineStats,
}

impl std::fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("EngineContext")
            .field("mode", &self.config.mode)
            .field("instances", &state.instances.len())
            .field("generation", &state.library.generation())
            .field("closed", &state.closed)
            .finish_non_exhaustive()
    }
}

impl EngineContext {
    /// Opens a context over an already loaded library.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or any instance
    /// fails to run the documents' top-level statements.
    pub fn open(
        library: ScriptLibrary,
        config: EngineConfig,
        host: Arc<dyn HostEnvironment>,
    ) -> Result<Self> {
        config.validate()?;

        let library = Arc::new(library);
        let context = Self {
            config,
            host,
            state: RwLock::new(ContextState {
                library: Arc::clone(&library),
                instances: Vec::new(),
                closed: false,
            }),
            next_slot: AtomicUsize::new(0),
            next_instance: AtomicUsize::new(0),
            stats: EngineStats::new(),
        };

        let instances = context.provision_all(&library)?;
        context.state.write().instances = instances;

        info!(
            mode = ?context.config.mode,
            instances = context.config.instance_count(),
            generation = library.generation(),
            "Opened engine context"
        );

        Ok(context)
    }

    /// Compiles `documents` and opens a context over them.
    pub fn load(
        documents: &[SourceDocument],
        config: EngineConfig,
        host: Arc<dyn HostEnvironment>,
    ) -> Result<Self> {
        let library = ScriptSource::new(&config.limits).load(documents)?;
        Self::open(library, config, host)
    }

    /// Reads the configured documents, compiles them and opens a context.
    pub async fn from_configs(
        scripts: &[ScriptConfig],
        config: EngineConfig,
        host: Arc<dyn HostEnvironment>,
    ) -> Result<Self> {
        let documents = ScriptSource::read_documents(scripts).await?;
        Self::load(&documents, config, host)
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The library currently in use.
    pub fn library(&self) -> Arc<ScriptLibrary> {
        Arc::clone(&self.state.read().library)
    }

    /// Resolves a function name for use in `role`.
    pub fn resolve(&self, name: &str, role: FunctionRole) -> Result<FunctionHandle> {
        let state = self.state.read();
        if state.closed {
            return Err(ScriptError::Closed.into());
        }
        Ok(state.library.registry().resolve(name, role)?)
    }

    /// Computes one column value: `f(column_name, row)`.
    pub fn call_column_transform(
        &self,
        handle: &FunctionHandle,
        column: &str,
        row: impl Into<Arc<Row>>,
        options: &CallOptions,
    ) -> Result<Value> {
        expect_role(handle, FunctionRole::ColumnTransform)?;
        let invocation = Invocation::ColumnTransform {
            handle: handle.clone(),
            column: column.to_string(),
            row: row.into(),
        };
        into_value(handle, self.dispatch(invocation, options)?)
    }

    /// Computes a configuration string: `f(property_name)`.
    pub fn call_connection_property(
        &self,
        handle: &FunctionHandle,
        property: &str,
        options: &CallOptions,
    ) -> Result<String> {
        expect_role(handle, FunctionRole::ConnectionProperty)?;
        let invocation = Invocation::ConnectionProperty {
            handle: handle.clone(),
            property: property.to_string(),
        };
        match into_value(handle, self.dispatch(invocation, options)?)? {
            Value::String(s) => Ok(s),
            other => Ok(other.to_string()),
        }
    }

    /// Expands one row into zero or more: `f(row, emit)`.
    ///
    /// Rows come back in emission order. If the call fails nothing it
    /// emitted is returned.
    pub fn call_row_mapper(
        &self,
        handle: &FunctionHandle,
        row: impl Into<Arc<Row>>,
        options: &CallOptions,
    ) -> Result<Vec<Row>> {
        expect_role(handle, FunctionRole::RowMapper)?;
        let invocation = Invocation::RowMapper {
            handle: handle.clone(),
            row: row.into(),
        };
        match self.dispatch(invocation, options)? {
            Outcome::Rows(rows) => Ok(rows),
            Outcome::Value(_) => Err(unexpected_outcome(handle)),
        }
    }

    /// Resolves `function` and runs it as a column transform.
    pub fn transform_column(
        &self,
        function: &str,
        column: &str,
        row: impl Into<Arc<Row>>,
    ) -> Result<Value> {
        let handle = self.resolve(function, FunctionRole::ColumnTransform)?;
        self.call_column_transform(&handle, column, row, &CallOptions::default())
    }

    /// Resolves `function` and runs it as a connection property.
    pub fn connection_property(&self, function: &str, property: &str) -> Result<String> {
        let handle = self.resolve(function, FunctionRole::ConnectionProperty)?;
        self.call_connection_property(&handle, property, &CallOptions::default())
    }

    /// Resolves `function` and runs it as a row mapper.
    pub fn map_row(&self, function: &str, row: impl Into<Arc<Row>>) -> Result<Vec<Row>> {
        let handle = self.resolve(function, FunctionRole::RowMapper)?;
        self.call_row_mapper(&handle, row, &CallOptions::default())
    }

    /// Replaces the library.
    ///
    /// New instances are provisioned before the old ones are retired, so a
    /// failed reload leaves the context untouched. Calls already queued on
    /// old instances finish against the old library; handles resolved
    /// before the reload fail with [`ScriptError::StaleHandle`].
    pub fn reload(&self, library: ScriptLibrary) -> Result<()> {
        if self.is_closed() {
            return Err(ScriptError::Closed.into());
        }

        let library = Arc::new(library);
        let fresh = self.provision_all(&library)?;

        let retired = {
            let mut state = self.state.write();
            if state.closed {
                return Err(ScriptError::Closed.into());
            }
            state.library = Arc::clone(&library);
            std::mem::replace(&mut state.instances, fresh)
        };
        for instance in &retired {
            instance.retire();
        }

        self.stats.record_reload();
        info!(generation = library.generation(), "Reloaded script library");
        Ok(())
    }

    /// Compiles `documents` and reloads with them.
    pub fn reload_documents(&self, documents: &[SourceDocument]) -> Result<()> {
        let library = ScriptSource::new(&self.config.limits).load(documents)?;
        self.reload(library)
    }

    /// Releases all interpreters.
    ///
    /// Running calls are terminated, queued and later calls fail with
    /// [`ScriptError::Closed`]. Closing twice is a no-op.
    pub fn close(&self) {
        let instances = {
            let mut state = self.state.write();
            if state.closed {
                return;
            }
            state.closed = true;
            std::mem::take(&mut state.instances)
        };

        for instance in &instances {
            instance.shutdown();
        }
        info!(instances = instances.len(), "Closed engine context");
    }

    /// Returns true once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.state.read().closed
    }

    /// Current call statistics.
    pub fn stats(&self) -> EngineStatsSnapshot {
        self.stats.snapshot()
    }

    fn provision(&self, library: &Arc<ScriptLibrary>) -> std::result::Result<Instance, ScriptError> {
        let id = self.next_instance.fetch_add(1, Ordering::Relaxed);
        Instance::spawn(id, Arc::clone(library), &self.config, Arc::clone(&self.host))
    }

    fn provision_all(&self, library: &Arc<ScriptLibrary>) -> Result<Vec<Arc<Instance>>> {
        let count = self.config.instance_count();
        let mut instances = Vec::with_capacity(count);
        for _ in 0..count {
            // Already started instances exit once dropped
            instances.push(Arc::new(self.provision(library)?));
        }
        Ok(instances)
    }

    fn route(&self, affinity: Option<u64>) -> std::result::Result<(usize, Arc<Instance>), ScriptError> {
        let state = self.state.read();
        if state.closed || state.instances.is_empty() {
            return Err(ScriptError::Closed);
        }

        let count = state.instances.len();
        let slot = match (self.config.routing, affinity) {
            (Routing::Affinity, Some(key)) => (key % count as u64) as usize,
            _ => self.next_slot.fetch_add(1, Ordering::Relaxed) % count,
        };
        Ok((slot, Arc::clone(&state.instances[slot])))
    }

    fn dispatch(&self, invocation: Invocation, options: &CallOptions) -> Result<Outcome> {
        let timeout = options.timeout.or(self.config.call_timeout);
        let function = invocation.handle().name().to_string();

        for attempt in 0..MAX_ATTEMPTS {
            let (slot, instance) = self.route(options.affinity)?;

            match instance.submit(invocation.clone(), timeout) {
                Submission::Done(Ok(outcome)) => {
                    let emitted = match &outcome {
                        Outcome::Rows(rows) => rows.len(),
                        Outcome::Value(_) => 0,
                    };
                    self.stats.record_success(emitted);
                    return Ok(outcome);
                }
                Submission::Done(Err(e)) => {
                    debug!(function = %function, error = %e, "Script call failed");
                    self.stats.record_failure();
                    return Err(e.into());
                }
                Submission::TimedOut { started } => {
                    let timeout = timeout.unwrap_or_default();
                    self.stats.record_timeout();
                    if started {
                        warn!(
                            function = %function,
                            instance = instance.id(),
                            timeout = ?timeout,
                            "Script call timed out, recycling instance"
                        );
                        instance.abandon();
                        self.replace(slot, &instance);
                    } else {
                        debug!(
                            function = %function,
                            instance = instance.id(),
                            timeout = ?timeout,
                            "Script call timed out before it started"
                        );
                    }
                    return Err(ScriptError::Timeout { function, timeout }.into());
                }
                Submission::Recycled => {
                    debug!(function = %function, attempt, "Instance recycled, retrying call");
                    self.replace(slot, &instance);
                }
                Submission::Died => {
                    error!(
                        function = %function,
                        instance = instance.id(),
                        "Interpreter thread died during call"
                    );
                    self.stats.record_failure();
                    self.replace(slot, &instance);
                    return Err(ScriptError::Execution {
                        function,
                        cause: "interpreter thread died".to_string(),
                    }
                    .into());
                }
            }
        }

        Err(ScriptError::Execution {
            function,
            cause: format!("no interpreter instance available after {MAX_ATTEMPTS} attempts"),
        }
        .into())
    }

    /// Swaps a fresh instance into `slot` if it still holds `old`.
    ///
    /// `old` itself is only retired, so calls already queued on a live
    /// instance still complete.
    fn replace(&self, slot: usize, old: &Arc<Instance>) {
        let library = {
            let state = self.state.read();
            let current = !state.closed
                && state
                    .instances
                    .get(slot)
                    .is_some_and(|i| Arc::ptr_eq(i, old));
            if !current {
                return;
            }
            Arc::clone(&state.library)
        };

        let fresh = match self.provision(&library) {
            Ok(instance) => Arc::new(instance),
            Err(e) => {
                error!(slot, error = %e, "Failed to provision replacement instance");
                return;
            }
        };

        let mut state = self.state.write();
        let current = !state.closed
            && Arc::ptr_eq(&state.library, &library)
            && state
                .instances
                .get(slot)
                .is_some_and(|i| Arc::ptr_eq(i, old));
        if current {
            debug!(slot, old = old.id(), new = fresh.id(), "Replaced interpreter instance");
            state.instances[slot] = fresh;
            self.stats.record_recycle();
            drop(state);
            old.retire();
        } else {
            drop(state);
            fresh.retire();
        }
    }
}

impl Drop for EngineContext {
    fn drop(&mut self) {
        self.close();
    }
}

fn expect_role(handle: &FunctionHandle, role: FunctionRole) -> Result<()> {
    if handle.role() == role {
        Ok(())
    } else {
        Err(SfError::Config(format!(
            "handle for '{}' was resolved as {} but called as {role}",
            handle.name(),
            handle.role()
        )))
    }
}

fn into_value(handle: &FunctionHandle, outcome: Outcome) -> Result<Value> {
    match outcome {
        Outcome::Value(value) => Ok(value),
        Outcome::Rows(_) => Err(unexpected_outcome(handle)),
    }
}

fn unexpected_outcome(handle: &FunctionHandle) -> SfError {
    SfError::Other(anyhow::anyhow!(
        "unexpected outcome shape for {} call to {}",
        handle.role(),
        handle.name()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineLimits;
    use sf_traits::StaticEnvironment;
    use std::time::Instant;

    const SCRIPT: &str = r#"
        fn lowercase(column_name, row) { row.get(column_name).to_lower() }
        fn connectionProperty(name) { user_name() + "." + name }
        fn testMap(row, emit) { emit.call(row); emit.call(row); }
        fn spin(name) { let n = 0; loop { n += 1; } }
        fn slow(name) { let n = 0; while n < 20000 { n += 1; } name }
    "#;

    fn host() -> Arc<dyn HostEnvironment> {
        Arc::new(StaticEnvironment::new().with_user_name("tester"))
    }

    fn context(config: EngineConfig) -> EngineContext {
        EngineContext::load(&[SourceDocument::new("test.rhai", SCRIPT)], config, host()).unwrap()
    }

    fn row() -> Row {
        Row::new().with("name", "ACME").with("id", 7_i64)
    }

    #[test]
    fn test_roles() {
        let ctx = context(EngineConfig::new());

        assert_eq!(
            ctx.transform_column("lowercase", "name", row()).unwrap(),
            Value::from("acme")
        );
        assert_eq!(
            ctx.connection_property("connectionProperty", "password").unwrap(),
            "tester.password"
        );
        assert_eq!(ctx.map_row("testMap", row()).unwrap(), vec![row(), row()]);

        let stats = ctx.stats();
        assert_eq!(stats.calls, 3);
        assert_eq!(stats.rows_emitted, 2);
    }

    #[test]
    fn test_unknown_function() {
        let ctx = context(EngineConfig::new());
        let err = ctx.transform_column("missing", "name", row()).unwrap_err();
        assert!(matches!(err.as_script(), Some(ScriptError::NotFound { .. })));
    }

    #[test]
    fn test_handle_used_in_wrong_role() {
        let ctx = context(EngineConfig::new());
        let handle = ctx
            .resolve("lowercase", FunctionRole::ColumnTransform)
            .unwrap();
        let err = ctx
            .call_row_mapper(&handle, row(), &CallOptions::default())
            .unwrap_err();
        assert!(matches!(err, SfError::Config(_)));
    }

    #[test]
    fn test_timeout_recycles_instance() {
        let config = EngineConfig::new()
            .with_limits(EngineLimits::default().unlimited_operations())
            .with_call_timeout(Duration::from_millis(100));
        let ctx = context(config);

        let started = Instant::now();
        let err = ctx.connection_property("spin", "x").unwrap_err();
        assert!(matches!(err.as_script(), Some(ScriptError::Timeout { .. })));
        assert!(started.elapsed() < Duration::from_secs(5));

        // The replacement instance serves later calls
        assert_eq!(
            ctx.connection_property("connectionProperty", "a").unwrap(),
            "tester.a"
        );

        let stats = ctx.stats();
        assert_eq!(stats.timeouts, 1);
        assert_eq!(stats.instances_recycled, 1);
    }

    #[test]
    fn test_per_call_timeout_overrides_config() {
        let config =
            EngineConfig::new().with_limits(EngineLimits::default().unlimited_operations());
        let ctx = context(config);
        let handle = ctx
            .resolve("spin", FunctionRole::ConnectionProperty)
            .unwrap();

        let options = CallOptions::new().with_timeout(Duration::from_millis(50));
        let err = ctx
            .call_connection_property(&handle, "x", &options)
            .unwrap_err();
        assert!(matches!(err.as_script(), Some(ScriptError::Timeout { .. })));
    }

    #[test]
    fn test_reload_invalidates_handles() {
        let ctx = context(EngineConfig::new());
        let old = ctx
            .resolve("lowercase", FunctionRole::ColumnTransform)
            .unwrap();

        ctx.reload_documents(&[SourceDocument::new(
            "v2.rhai",
            "fn lowercase(column_name, row) { \"v2\" }",
        )])
        .unwrap();

        let err = ctx
            .call_column_transform(&old, "name", row(), &CallOptions::default())
            .unwrap_err();
        assert!(matches!(err.as_script(), Some(ScriptError::StaleHandle { .. })));

        assert_eq!(
            ctx.transform_column("lowercase", "name", row()).unwrap(),
            Value::from("v2")
        );
        assert!(ctx.resolve("testMap", FunctionRole::RowMapper).is_err());
        assert_eq!(ctx.stats().reloads, 1);
    }

    #[test]
    fn test_failed_reload_keeps_library() {
        let ctx = context(EngineConfig::new());
        let generation = ctx.library().generation();

        assert!(ctx
            .reload_documents(&[SourceDocument::new("bad.rhai", "fn broken(")])
            .is_err());
        assert_eq!(ctx.library().generation(), generation);
        assert!(ctx.transform_column("lowercase", "name", row()).is_ok());
    }

    #[test]
    fn test_close_is_idempotent() {
        let ctx = context(EngineConfig::pool(2));
        ctx.close();
        ctx.close();

        assert!(ctx.is_closed());
        let err = ctx.transform_column("lowercase", "name", row()).unwrap_err();
        assert!(matches!(err.as_script(), Some(ScriptError::Closed)));
        assert!(ctx.reload_documents(&[]).is_err());
    }

    #[test]
    fn test_pool_parallel_calls() {
        let ctx = Arc::new(context(EngineConfig::pool(4)));

        std::thread::scope(|scope| {
            for t in 0..8 {
                let ctx = Arc::clone(&ctx);
                scope.spawn(move || {
                    for i in 0..10 {
                        let name = format!("t{t}-{i}");
                        assert_eq!(ctx.connection_property("slow", &name).unwrap(), name);
                    }
                });
            }
        });

        assert_eq!(ctx.stats().calls, 80);
    }

    #[test]
    fn test_affinity_routing_is_stable() {
        let ctx = context(EngineConfig::pool(4).with_routing(Routing::Affinity));
        let key = CallOptions::new().with_affinity("customer-42").affinity;

        let (first, _) = ctx.route(key).unwrap();
        for _ in 0..10 {
            let (slot, _) = ctx.route(key).unwrap();
            assert_eq!(slot, first);
        }
    }

    #[test]
    fn test_round_robin_spreads_calls() {
        let ctx = context(EngineConfig::pool(3));
        let slots: Vec<usize> = (0..6).map(|_| ctx.route(None).unwrap().0).collect();
        assert_eq!(slots, vec![0, 1, 2, 0, 1, 2]);
    }
}
