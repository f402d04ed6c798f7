//! Event tables for settlement analysis.
//!
//! A `tracing` subscriber turns every structured event into a row of a
//! column table named after the event's target. Columns appear the first time
//! a field is seen, so the schema follows whatever the engine emits.
//!
//! # Usage
//!
//! ```ignore
//! // In engine code:
//! tracing::info!(target: "trade", bid_id, side = "buy", quantity, price);
//!
//! // In a test:
//! let (round, recorder) = instrument::capture(|| engine.settle(&bids, "APM", &config));
//! let trades = recorder.table(instrument::targets::TRADE).unwrap().to_dataframe()?;
//! ```

use std::cell::RefCell;
use std::collections::HashMap;
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Record};
use tracing::{Event, Id, Metadata, Subscriber};

/// Targets the settlement engine emits under.
pub mod targets {
    /// One row per round: primary clearing price and volume.
    pub const CLEARING: &str = "clearing";
    /// One row per transaction leg, both phases.
    pub const TRADE: &str = "trade";
    /// One row per round (and per AUP pass): residual price and volume.
    pub const RESIDUAL: &str = "residual";
    /// Warn-level rows for every recovered numeric degeneracy.
    pub const FALLBACK: &str = "fallback";
}

/// A column of typed values.
#[derive(Debug, Clone)]
pub enum TypedColumn {
    U64(Vec<u64>),
    I64(Vec<i64>),
    F64(Vec<f64>),
    Bool(Vec<bool>),
    Str(Vec<String>),
}

impl TypedColumn {
    pub fn len(&self) -> usize {
        match self {
            TypedColumn::U64(v) => v.len(),
            TypedColumn::I64(v) => v.len(),
            TypedColumn::F64(v) => v.len(),
            TypedColumn::Bool(v) => v.len(),
            TypedColumn::Str(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn pad_to(&mut self, rows: usize) {
        let missing = rows.saturating_sub(self.len());
        if missing == 0 {
            return;
        }
        match self {
            TypedColumn::U64(v) => v.extend(std::iter::repeat_n(0, missing)),
            TypedColumn::I64(v) => v.extend(std::iter::repeat_n(0, missing)),
            TypedColumn::F64(v) => v.extend(std::iter::repeat_n(0.0, missing)),
            TypedColumn::Bool(v) => v.extend(std::iter::repeat_n(false, missing)),
            TypedColumn::Str(v) => v.extend(std::iter::repeat_n(String::new(), missing)),
        }
    }
}

/// A table with dynamically-typed columns. Rows missing a field get the
/// column type's zero value.
#[derive(Debug, Clone, Default)]
pub struct DynamicTable {
    pub columns: HashMap<String, TypedColumn>,
    pub row_count: usize,
}

impl DynamicTable {
    fn pad_columns(&mut self) {
        let rows = self.row_count;
        for col in self.columns.values_mut() {
            col.pad_to(rows);
        }
    }

    pub fn f64s(&self, name: &str) -> Option<&[f64]> {
        match self.columns.get(name)? {
            TypedColumn::F64(v) => Some(v),
            _ => None,
        }
    }

    pub fn u64s(&self, name: &str) -> Option<&[u64]> {
        match self.columns.get(name)? {
            TypedColumn::U64(v) => Some(v),
            _ => None,
        }
    }

    pub fn strs(&self, name: &str) -> Option<&[String]> {
        match self.columns.get(name)? {
            TypedColumn::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn bools(&self, name: &str) -> Option<&[bool]> {
        match self.columns.get(name)? {
            TypedColumn::Bool(v) => Some(v),
            _ => None,
        }
    }
}

/// Collection of tables, keyed by tracing target.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    pub tables: HashMap<String, DynamicTable>,
}

impl Recorder {
    pub fn table(&self, target: &str) -> Option<&DynamicTable> {
        self.tables.get(target)
    }

    /// Row count of a target's table, zero if nothing was emitted.
    pub fn rows(&self, target: &str) -> usize {
        self.tables.get(target).map(|t| t.row_count).unwrap_or(0)
    }
}

thread_local! {
    static RECORDER: RefCell<Recorder> = RefCell::default();
}

/// Visitor that appends one event's fields to the current row.
struct ColumnVisitor<'a> {
    table: &'a mut DynamicTable,
    /// Rows recorded before this one; new columns are back-filled to this length.
    row_count: usize,
}

impl ColumnVisitor<'_> {
    fn column(&mut self, field: &Field, empty: impl FnOnce(usize) -> TypedColumn) -> &mut TypedColumn {
        let rows = self.row_count;
        self.table
            .columns
            .entry(field.name().to_string())
            .or_insert_with(|| empty(rows))
    }
}

impl Visit for ColumnVisitor<'_> {
    fn record_u64(&mut self, field: &Field, value: u64) {
        if let TypedColumn::U64(v) = self.column(field, |n| TypedColumn::U64(vec![0; n])) {
            v.push(value);
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        if let TypedColumn::I64(v) = self.column(field, |n| TypedColumn::I64(vec![0; n])) {
            v.push(value);
        }
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        if let TypedColumn::F64(v) = self.column(field, |n| TypedColumn::F64(vec![0.0; n])) {
            v.push(value);
        }
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        if let TypedColumn::Bool(v) = self.column(field, |n| TypedColumn::Bool(vec![false; n])) {
            v.push(value);
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if let TypedColumn::Str(v) = self.column(field, |n| TypedColumn::Str(vec![String::new(); n])) {
            v.push(value.to_string());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.record_str(field, &format!("{:?}", value));
    }
}

/// Subscriber that collects info-and-above events into per-target tables.
pub struct EventTableSubscriber;

impl Subscriber for EventTableSubscriber {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.is_event() && *metadata.level() <= tracing::Level::INFO
    }

    fn new_span(&self, _span: &Attributes<'_>) -> Id {
        Id::from_u64(1)
    }

    fn record(&self, _span: &Id, _values: &Record<'_>) {}

    fn record_follows_from(&self, _span: &Id, _follows: &Id) {}

    fn event(&self, event: &Event<'_>) {
        let target = event.metadata().target().to_string();

        RECORDER.with(|r| {
            let mut recorder = r.borrow_mut();
            let table = recorder.tables.entry(target).or_default();

            table.pad_columns();
            let row_count = table.row_count;
            event.record(&mut ColumnVisitor { table, row_count });
            table.row_count += 1;
            // Columns this event did not mention
            table.pad_columns();
        });
    }

    fn enter(&self, _span: &Id) {}

    fn exit(&self, _span: &Id) {}
}

/// Install the subscriber as the global default. Later calls are ignored.
pub fn install_subscriber() {
    let _ = tracing::subscriber::set_global_default(EventTableSubscriber);
}

/// Take everything recorded on this thread so far.
pub fn drain() -> Recorder {
    RECORDER.with(|r| std::mem::take(&mut *r.borrow_mut()))
}

pub fn clear() {
    RECORDER.with(|r| *r.borrow_mut() = Recorder::default());
}

/// Run `f` with the subscriber scoped to this thread and return what it recorded.
///
/// Anything recorded on the thread before the call is discarded.
pub fn capture<T>(f: impl FnOnce() -> T) -> (T, Recorder) {
    clear();
    let out = tracing::subscriber::with_default(EventTableSubscriber, f);
    (out, drain())
}

// === Polars Integration ===

use polars::prelude::*;

impl DynamicTable {
    pub fn to_dataframe(&self) -> PolarsResult<DataFrame> {
        let mut names: Vec<&String> = self.columns.keys().collect();
        names.sort();

        let columns: Vec<Column> = names
            .into_iter()
            .map(|name| match &self.columns[name] {
                TypedColumn::U64(v) => Column::new(name.into(), v),
                TypedColumn::I64(v) => Column::new(name.into(), v),
                TypedColumn::F64(v) => Column::new(name.into(), v),
                TypedColumn::Bool(v) => Column::new(name.into(), v),
                TypedColumn::Str(v) => Column::new(name.into(), v),
            })
            .collect();

        DataFrame::new(columns)
    }
}

impl Recorder {
    pub fn to_dataframes(&self) -> HashMap<String, DataFrame> {
        self.tables
            .iter()
            .filter_map(|(name, table)| table.to_dataframe().ok().map(|df| (name.clone(), df)))
            .collect()
    }
}

pub fn drain_to_dataframes() -> HashMap<String, DataFrame> {
    drain().to_dataframes()
}
