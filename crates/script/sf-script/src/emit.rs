//! Per-call emit callback for row mappers.

use crate::conversion::map_to_row;
use crate::row_view::RowView;
use parking_lot::Mutex;
use rhai::{Dynamic, Engine, EvalAltResult, FnPtr, Map};
use sf_types::Row;
use std::sync::Arc;

/// Native function the emit pointer is bound to.
const EMIT_FN: &str = "emit_row";

/// Collects the rows a mapper emits during exactly one call.
///
/// Scripts receive it curried into a function pointer and call
/// `emit.call(row)` or `call(emit, row)`.
#[derive(Debug, Clone)]
pub(crate) struct EmitSink {
    buffer: Arc<Mutex<EmitBuffer>>,
}

#[derive(Debug, Default)]
pub(crate) struct EmitBuffer {
    template: Arc<Row>,
    pub(crate) rows: Vec<Row>,
    pub(crate) violation: Option<String>,
    closed: bool,
}

impl EmitSink {
    /// Creates a sink; emitted columns shared with `input` keep its order.
    pub(crate) fn new(input: Arc<Row>) -> Self {
        Self {
            buffer: Arc::new(Mutex::new(EmitBuffer {
                template: input,
                ..EmitBuffer::default()
            })),
        }
    }

    /// Wraps the sink in a callable function pointer.
    pub(crate) fn fn_ptr(&self) -> Result<FnPtr, Box<EvalAltResult>> {
        let mut ptr = FnPtr::new(EMIT_FN)?;
        ptr.add_curry(Dynamic::from(self.clone()));
        Ok(ptr)
    }

    /// Closes the sink and returns what was collected.
    pub(crate) fn finish(&self) -> EmitBuffer {
        let mut buffer = self.buffer.lock();
        buffer.closed = true;
        std::mem::take(&mut *buffer)
    }

    fn push(&mut self, value: Dynamic) -> Result<(), Box<EvalAltResult>> {
        let mut buffer = self.buffer.lock();
        if buffer.closed {
            return Err("emit called after the mapper returned".into());
        }

        let row = if value.is::<RowView>() {
            Ok(value.cast::<RowView>().row().clone())
        } else if value.is_map() {
            map_to_row(&value.cast::<Map>(), Some(buffer.template.as_ref()))
        } else {
            Err(format!(
                "expected a map of column values, got {}",
                value.type_name()
            ))
        };

        match row {
            Ok(row) => {
                buffer.rows.push(row);
                Ok(())
            }
            Err(cause) => {
                // First violation wins even if the script catches the error
                if buffer.violation.is_none() {
                    buffer.violation = Some(cause.clone());
                }
                Err(cause.into())
            }
        }
    }

    /// Registers the sink type and its native emit function.
    pub(crate) fn register(engine: &mut Engine) {
        engine
            .register_type_with_name::<EmitSink>("Emitter")
            .register_fn(EMIT_FN, |sink: &mut EmitSink, row: Dynamic| sink.push(row));
    }
}
