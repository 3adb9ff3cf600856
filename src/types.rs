//! Core types and data structures for the pipeline engine

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A single cell of a tabular dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Cell {
    /// Missing value
    Null,
    /// Boolean flag
    Bool(bool),
    /// Whole number (counts, sequence numbers)
    Int(i64),
    /// Floating-point value; may be NaN or infinite
    Float(f64),
    /// Exact amount (request/disbursement amounts, handling fees)
    Decimal(BigDecimal),
    /// Free text (bank codes, references, remarks)
    Text(String),
    /// Calendar date without time zone
    Date(NaiveDate),
}

impl Cell {
    /// Name of the cell's type, as used in the columnar schema
    pub fn kind(&self) -> &'static str {
        match self {
            Cell::Null => "null",
            Cell::Bool(_) => "bool",
            Cell::Int(_) => "int",
            Cell::Float(_) => "float",
            Cell::Decimal(_) => "decimal",
            Cell::Text(_) => "text",
            Cell::Date(_) => "date",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::Text(value.to_string())
    }
}

impl From<String> for Cell {
    fn from(value: String) -> Self {
        Cell::Text(value)
    }
}

impl From<i64> for Cell {
    fn from(value: i64) -> Self {
        Cell::Int(value)
    }
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        Cell::Float(value)
    }
}

impl From<bool> for Cell {
    fn from(value: bool) -> Self {
        Cell::Bool(value)
    }
}

impl From<BigDecimal> for Cell {
    fn from(value: BigDecimal) -> Self {
        Cell::Decimal(value)
    }
}

impl From<NaiveDate> for Cell {
    fn from(value: NaiveDate) -> Self {
        Cell::Date(value)
    }
}

static NULL_CELL: Cell = Cell::Null;

/// Tabular dataset: rows of cells under named columns
///
/// The engine treats the contents as opaque. Rows are not forced to match the
/// column count; such a frame simply cannot be stored in columnar form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Column names in order
    pub columns: Vec<String>,
    /// Row-major cell data
    pub rows: Vec<Vec<Cell>>,
}

impl Frame {
    /// Create an empty frame with the given columns
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Create a frame with no columns and no rows
    pub fn empty() -> Self {
        Self::default()
    }

    /// Append a row
    pub fn push_row(&mut self, row: Vec<Cell>) {
        self.rows.push(row);
    }

    /// Builder-style row append
    pub fn with_row(mut self, row: Vec<Cell>) -> Self {
        self.rows.push(row);
        self
    }

    /// `(rows, columns)`
    pub fn shape(&self) -> (usize, usize) {
        (self.rows.len(), self.columns.len())
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    /// True when the frame has neither rows nor columns
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty() && self.columns.is_empty()
    }

    /// Index of a column by name
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Iterate over the cells of a named column
    pub fn column<'a>(&'a self, name: &str) -> Option<impl Iterator<Item = &'a Cell> + 'a> {
        let idx = self.column_index(name)?;
        Some(
            self.rows
                .iter()
                .map(move |row| row.get(idx).unwrap_or(&NULL_CELL)),
        )
    }
}

/// Variable value held by a context
///
/// Values that JSON cannot carry verbatim (`Decimal`, `Opaque`, non-finite
/// floats) are persisted as strings.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    /// Absent value
    Null,
    /// Boolean flag
    Bool(bool),
    /// Whole number
    Int(i64),
    /// Floating-point value; non-finite values persist as text
    Float(f64),
    /// Exact decimal; persists as text
    Decimal(BigDecimal),
    /// Plain string (periods, file paths, bank codes)
    Text(String),
    /// Structured JSON-like value (lists, nested maps)
    Json(serde_json::Value),
    /// Debug rendering of a value with no JSON representation
    Opaque(String),
}

impl Scalar {
    /// Wrap an arbitrary value by its debug rendering
    pub fn opaque<T: fmt::Debug>(value: &T) -> Self {
        Scalar::Opaque(format!("{:?}", value))
    }

    /// The JSON value written to a checkpoint sidecar
    pub fn to_persisted(&self) -> serde_json::Value {
        use serde_json::Value;
        match self {
            Scalar::Null => Value::Null,
            Scalar::Bool(b) => Value::Bool(*b),
            Scalar::Int(i) => Value::from(*i),
            Scalar::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or_else(|| Value::String(f.to_string())),
            Scalar::Decimal(d) => Value::String(d.to_string()),
            Scalar::Text(s) => Value::String(s.clone()),
            Scalar::Json(v) => v.clone(),
            Scalar::Opaque(s) => Value::String(s.clone()),
        }
    }

    /// Rebuild a scalar from a persisted JSON value
    pub fn from_persisted(value: serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => Scalar::Null,
            Value::Bool(b) => Scalar::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Scalar::Int(i),
                None => Scalar::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => Scalar::Text(s),
            other => Scalar::Json(other),
        }
    }

    /// The value as it will read back after a checkpoint round trip
    pub fn normalized(&self) -> Self {
        Scalar::from_persisted(self.to_persisted())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Scalar::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Float(f) => Some(*f),
            Scalar::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Scalar::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Decimal view; accepts text written by a previous checkpoint
    pub fn as_decimal(&self) -> Option<BigDecimal> {
        match self {
            Scalar::Decimal(d) => Some(d.clone()),
            Scalar::Int(i) => Some(BigDecimal::from(*i)),
            Scalar::Text(s) => BigDecimal::from_str(s).ok(),
            _ => None,
        }
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::Text(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Scalar::Text(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Int(value)
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Scalar::Float(value)
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Scalar::Bool(value)
    }
}

impl From<BigDecimal> for Scalar {
    fn from(value: BigDecimal) -> Self {
        Scalar::Decimal(value)
    }
}

impl From<serde_json::Value> for Scalar {
    fn from(value: serde_json::Value) -> Self {
        Scalar::Json(value)
    }
}

/// Terminal status of a step invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Success,
    Failed,
    /// The step opted out at runtime
    Skipped,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Success => "success",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Free-form metadata attached to step results and checkpoints
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Errors that can occur while building or running a pipeline
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Pipeline not found: {0}")]
    PipelineNotFound(String),
    #[error("Duplicate step name: {0}")]
    DuplicateStep(String),
    #[error("Inconsistent resume point: {0}")]
    InconsistentResume(String),
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

/// Errors raised by checkpoint storage
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("Checkpoint not found: {0}")]
    NotFound(String),
    #[error("Invalid checkpoint name: {0}")]
    InvalidName(String),
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Storage error: {0}")]
    Storage(String),
}

impl CheckpointError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Result type for checkpoint operations
pub type CheckpointResult<T> = Result<T, CheckpointError>;

/// Snapshot of a context's contents, for logs and summaries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSummary {
    pub task_name: String,
    pub task_type: String,
    pub data_shape: (usize, usize),
    pub auxiliary_data: Vec<String>,
    pub variables: Vec<String>,
    pub errors: usize,
    pub warnings: usize,
    pub validations: Vec<String>,
    pub history_steps: usize,
}
