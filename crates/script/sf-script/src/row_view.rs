//! Read-only view of a row exposed to scripts.

use crate::conversion::{row_to_map, value_to_dynamic};
use rhai::{Array, Dynamic, Engine, ImmutableString, Map, INT};
use sf_types::Row;
use std::sync::Arc;

/// Script-facing, read-only view of a [`Row`].
///
/// Scripts see it as type `Row` and can read it with `row.get("col")`,
/// `row["col"]` or `row.col`. An absent column reads as `()`. Values are
/// copied out, so nothing a script does changes the underlying row.
#[derive(Debug, Clone)]
pub struct RowView {
    row: Arc<Row>,
}

impl RowView {
    /// Creates a view over a shared row.
    pub fn new(row: Arc<Row>) -> Self {
        Self { row }
    }

    /// Returns the column value, or `()` when absent.
    pub fn get(&self, name: &str) -> Dynamic {
        self.row
            .get(name)
            .map(value_to_dynamic)
            .unwrap_or(Dynamic::UNIT)
    }

    /// Returns true if the column exists.
    pub fn has(&self, name: &str) -> bool {
        self.row.contains(name)
    }

    /// Column names in row order.
    pub fn keys(&self) -> Array {
        self.row
            .column_names()
            .map(|name| Dynamic::from(name.to_string()))
            .collect()
    }

    /// Copies the row into a mutable object map.
    pub fn to_map(&self) -> Map {
        row_to_map(&self.row)
    }

    /// The underlying row.
    pub fn row(&self) -> &Row {
        &self.row
    }

    /// Registers the `Row` type and its methods.
    pub(crate) fn register(engine: &mut Engine) {
        engine
            .register_type_with_name::<RowView>("Row")
            .register_fn("get", |view: &mut RowView, name: &str| view.get(name))
            .register_fn("has", |view: &mut RowView, name: &str| view.has(name))
            .register_fn("contains", |view: &mut RowView, name: &str| view.has(name))
            .register_fn("keys", |view: &mut RowView| view.keys())
            .register_fn("len", |view: &mut RowView| view.row.len() as INT)
            .register_fn("is_empty", |view: &mut RowView| view.row.is_empty())
            .register_fn("to_map", |view: &mut RowView| view.to_map())
            .register_fn("to_string", |view: &mut RowView| {
                format!("{:?}", view.row)
            })
            // Property access without a registered getter falls back here
            .register_indexer_get(|view: &mut RowView, name: ImmutableString| {
                view.get(name.as_str())
            });
    }
}
