//! Running script functions in their calling conventions.

use crate::builtin::register_builtin_functions;
use crate::config::EngineLimits;
use crate::conversion::{dynamic_to_value, row_to_map};
use crate::emit::EmitSink;
use crate::host::register_host_functions;
use crate::registry::FunctionHandle;
use crate::row_view::RowView;
use crate::source::ScriptLibrary;
use rhai::{CallFnOptions, Dynamic, Engine, EvalAltResult, FuncArgs, OptimizationLevel, Scope};
use sf_error::ScriptError;
use sf_traits::HostEnvironment;
use sf_types::{Row, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Creates a Rhai engine with safety limits.
pub(crate) fn create_engine(limits: &EngineLimits) -> Engine {
    let mut engine = Engine::new();

    engine.set_max_expr_depths(limits.max_expr_depth, limits.max_function_expr_depth);
    engine.set_max_operations(limits.max_operations);
    engine.set_max_string_size(limits.max_string_size);
    engine.set_max_array_size(limits.max_array_size);
    engine.set_max_map_size(limits.max_map_size);
    engine.set_max_call_levels(limits.max_call_levels);

    // Full would fold host functions with constant arguments at compile time
    engine.set_optimization_level(OptimizationLevel::Simple);

    engine
}

/// One call, with arguments shaped for the handle's role.
#[derive(Debug, Clone)]
pub(crate) enum Invocation {
    ColumnTransform {
        handle: FunctionHandle,
        column: String,
        row: Arc<Row>,
    },
    ConnectionProperty {
        handle: FunctionHandle,
        property: String,
    },
    RowMapper {
        handle: FunctionHandle,
        row: Arc<Row>,
    },
}

impl Invocation {
    pub(crate) fn handle(&self) -> &FunctionHandle {
        match self {
            Self::ColumnTransform { handle, .. }
            | Self::ConnectionProperty { handle, .. }
            | Self::RowMapper { handle, .. } => handle,
        }
    }
}

/// What a successful call produced.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Outcome {
    Value(Value),
    Rows(Vec<Row>),
}

/// One independently loaded interpreter: engine, library and global state.
///
/// Not shared between threads; each pool instance owns exactly one.
pub(crate) struct Interpreter {
    engine: Engine,
    library: Arc<ScriptLibrary>,
    scopes: Vec<Scope<'static>>,
}

impl Interpreter {
    /// Builds an interpreter and runs every document's top-level statements.
    ///
    /// `abort` terminates whatever script is running once it is set.
    pub(crate) fn new(
        library: Arc<ScriptLibrary>,
        limits: &EngineLimits,
        host: Arc<dyn HostEnvironment>,
        abort: Arc<AtomicBool>,
    ) -> Result<Self, ScriptError> {
        let mut engine = create_engine(limits);
        register_builtin_functions(&mut engine);
        register_host_functions(&mut engine, host);
        RowView::register(&mut engine);
        EmitSink::register(&mut engine);

        engine.on_progress(move |_| {
            if abort.load(Ordering::Relaxed) {
                Some(Dynamic::from("aborted"))
            } else {
                None
            }
        });

        let mut scopes: Vec<Scope<'static>> =
            library.programs().iter().map(|_| Scope::new()).collect();

        for loaded in library.loaded_documents() {
            engine
                .run_ast_with_scope(&mut scopes[loaded.program], &loaded.ast)
                .map_err(|e| ScriptError::Load {
                    document: loaded.document.name().to_string(),
                    message: e.to_string(),
                    line: e.position().line(),
                })?;
        }

        Ok(Self {
            engine,
            library,
            scopes,
        })
    }

    /// Runs one invocation to completion.
    pub(crate) fn execute(&mut self, invocation: &Invocation) -> Result<Outcome, ScriptError> {
        match invocation {
            Invocation::ColumnTransform {
                handle,
                column,
                row,
            } => {
                let view = RowView::new(Arc::clone(row));
                let result = self.call(handle, (column.clone(), view))?;
                let value = dynamic_to_value(&result).ok_or_else(|| ScriptError::Execution {
                    function: handle.name().to_string(),
                    cause: format!("returned a {} instead of a scalar", result.type_name()),
                })?;
                Ok(Outcome::Value(value))
            }
            Invocation::ConnectionProperty { handle, property } => {
                let result = self.call(handle, (property.clone(),))?;
                match dynamic_to_value(&result) {
                    Some(Value::Null) => Err(ScriptError::Execution {
                        function: handle.name().to_string(),
                        cause: format!("returned no value for property '{property}'"),
                    }),
                    Some(value) => Ok(Outcome::Value(Value::String(value.to_string()))),
                    None => Err(ScriptError::Execution {
                        function: handle.name().to_string(),
                        cause: format!("returned a {} instead of a string", result.type_name()),
                    }),
                }
            }
            Invocation::RowMapper { handle, row } => {
                let sink = EmitSink::new(Arc::clone(row));
                let emit = sink.fn_ptr().map_err(|e| execution_error(handle, &e))?;
                let result = self.call(handle, (row_to_map(row), emit));
                let buffer = sink.finish();

                if let Some(cause) = buffer.violation {
                    return Err(ScriptError::InvalidEmitArgument {
                        function: handle.name().to_string(),
                        cause,
                    });
                }
                result.map(drop)?;

                trace!(function = handle.name(), rows = buffer.rows.len(), "Mapper emitted rows");
                Ok(Outcome::Rows(buffer.rows))
            }
        }
    }

    fn call(&mut self, handle: &FunctionHandle, args: impl FuncArgs) -> Result<Dynamic, ScriptError> {
        let entry = self.library.registry().entry(handle)?;
        let program = &self.library.programs()[entry.program];

        let options = CallFnOptions::new().eval_ast(false).rewind_scope(true);
        self.engine
            .call_fn_with_options::<Dynamic>(
                options,
                &mut self.scopes[entry.program],
                &program.ast,
                &entry.name,
                args,
            )
            .map_err(|e| execution_error(handle, &e))
    }
}

fn execution_error(handle: &FunctionHandle, error: &EvalAltResult) -> ScriptError {
    let cause = match innermost(error) {
        EvalAltResult::ErrorTerminated(..) => "terminated: call was abandoned".to_string(),
        _ => error.to_string(),
    };
    ScriptError::Execution {
        function: handle.name().to_string(),
        cause,
    }
}

fn innermost(error: &EvalAltResult) -> &EvalAltResult {
    match error {
        EvalAltResult::ErrorInFunctionCall(_, _, inner, _) => innermost(inner),
        other => other,
    }
}
