//! On-disk encodings for datasets: typed columnar JSON, with a lossless
//! row-major blob as fallback
//!
//! The columnar form requires a rectangular frame with unique column names,
//! one cell type per column (nulls allowed anywhere) and finite floats. Any
//! frame can be written as a blob.

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::str::FromStr;

use crate::types::*;

/// File extension of the columnar form
pub const COLUMNAR_EXT: &str = "columns.json";
/// File extension of the blob form
pub const BLOB_EXT: &str = "blob.json";

const COLUMNAR_FORMAT: &str = "recon-columnar/1";
const BLOB_FORMAT: &str = "recon-blob/1";

/// Reasons a frame cannot be stored in columnar form
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ColumnarError {
    #[error("duplicate column name '{0}'")]
    DuplicateColumn(String),
    #[error("row {row} has {found} cells, expected {expected}")]
    RaggedRow {
        row: usize,
        expected: usize,
        found: usize,
    },
    #[error("column '{column}' mixes {first} and {found} values")]
    MixedTypes {
        column: String,
        first: &'static str,
        found: &'static str,
    },
    #[error("column '{column}' holds a non-finite float at row {row}")]
    NonFiniteFloat { column: String, row: usize },
    #[error("encoding failed: {0}")]
    Encode(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ColumnType {
    Null,
    Bool,
    Int,
    Float,
    Decimal,
    Text,
    Date,
}

#[derive(Debug, Serialize, Deserialize)]
struct ColumnChunk {
    name: String,
    dtype: ColumnType,
    values: Vec<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ColumnarFile {
    format: String,
    num_rows: usize,
    columns: Vec<ColumnChunk>,
}

fn column_type(cell: &Cell) -> ColumnType {
    match cell {
        Cell::Null => ColumnType::Null,
        Cell::Bool(_) => ColumnType::Bool,
        Cell::Int(_) => ColumnType::Int,
        Cell::Float(_) => ColumnType::Float,
        Cell::Decimal(_) => ColumnType::Decimal,
        Cell::Text(_) => ColumnType::Text,
        Cell::Date(_) => ColumnType::Date,
    }
}

/// Encode a frame in columnar form
pub fn encode_columnar(frame: &Frame) -> Result<Vec<u8>, ColumnarError> {
    let mut seen = HashSet::new();
    for name in &frame.columns {
        if !seen.insert(name.as_str()) {
            return Err(ColumnarError::DuplicateColumn(name.clone()));
        }
    }

    let width = frame.columns.len();
    for (row, cells) in frame.rows.iter().enumerate() {
        if cells.len() != width {
            return Err(ColumnarError::RaggedRow {
                row,
                expected: width,
                found: cells.len(),
            });
        }
    }

    let mut columns = Vec::with_capacity(width);
    for (idx, name) in frame.columns.iter().enumerate() {
        let mut dtype = ColumnType::Null;
        let mut first_kind = "null";
        let mut values = Vec::with_capacity(frame.rows.len());

        for (row, cells) in frame.rows.iter().enumerate() {
            let cell = &cells[idx];
            let kind = column_type(cell);
            if kind != ColumnType::Null {
                if dtype == ColumnType::Null {
                    dtype = kind;
                    first_kind = cell.kind();
                } else if dtype != kind {
                    return Err(ColumnarError::MixedTypes {
                        column: name.clone(),
                        first: first_kind,
                        found: cell.kind(),
                    });
                }
            }
            values.push(cell_to_value(cell).ok_or_else(|| ColumnarError::NonFiniteFloat {
                column: name.clone(),
                row,
            })?);
        }

        columns.push(ColumnChunk {
            name: name.clone(),
            dtype,
            values,
        });
    }

    let file = ColumnarFile {
        format: COLUMNAR_FORMAT.to_string(),
        num_rows: frame.rows.len(),
        columns,
    };
    serde_json::to_vec(&file).map_err(|e| ColumnarError::Encode(e.to_string()))
}

fn cell_to_value(cell: &Cell) -> Option<Value> {
    Some(match cell {
        Cell::Null => Value::Null,
        Cell::Bool(b) => Value::Bool(*b),
        Cell::Int(i) => Value::from(*i),
        Cell::Float(f) => Value::Number(serde_json::Number::from_f64(*f)?),
        Cell::Decimal(d) => Value::String(d.to_string()),
        Cell::Text(s) => Value::String(s.clone()),
        Cell::Date(d) => Value::String(d.format("%Y-%m-%d").to_string()),
    })
}

fn value_to_cell(dtype: ColumnType, value: Value, column: &str) -> CheckpointResult<Cell> {
    let bad = |what: &str| {
        CheckpointError::Serialization(format!("column '{}': invalid {} value", column, what))
    };
    if value.is_null() {
        return Ok(Cell::Null);
    }
    let cell = match dtype {
        ColumnType::Null => return Err(bad("null")),
        ColumnType::Bool => Cell::Bool(value.as_bool().ok_or_else(|| bad("bool"))?),
        ColumnType::Int => Cell::Int(value.as_i64().ok_or_else(|| bad("int"))?),
        ColumnType::Float => Cell::Float(value.as_f64().ok_or_else(|| bad("float"))?),
        ColumnType::Decimal => {
            let text = value.as_str().ok_or_else(|| bad("decimal"))?;
            Cell::Decimal(BigDecimal::from_str(text).map_err(|_| bad("decimal"))?)
        }
        ColumnType::Text => Cell::Text(value.as_str().ok_or_else(|| bad("text"))?.to_string()),
        ColumnType::Date => {
            let text = value.as_str().ok_or_else(|| bad("date"))?;
            Cell::Date(NaiveDate::parse_from_str(text, "%Y-%m-%d").map_err(|_| bad("date"))?)
        }
    };
    Ok(cell)
}

/// Decode a frame from columnar form
pub fn decode_columnar(bytes: &[u8]) -> CheckpointResult<Frame> {
    let file: ColumnarFile = serde_json::from_slice(bytes)
        .map_err(|e| CheckpointError::Serialization(format!("columnar file: {}", e)))?;
    if file.format != COLUMNAR_FORMAT {
        return Err(CheckpointError::Serialization(format!(
            "unsupported columnar format '{}'",
            file.format
        )));
    }

    let mut rows: Vec<Vec<Cell>> = (0..file.num_rows)
        .map(|_| Vec::with_capacity(file.columns.len()))
        .collect();
    let mut columns = Vec::with_capacity(file.columns.len());

    for chunk in file.columns {
        if chunk.values.len() != file.num_rows {
            return Err(CheckpointError::Serialization(format!(
                "column '{}' has {} values, expected {}",
                chunk.name,
                chunk.values.len(),
                file.num_rows
            )));
        }
        for (row, value) in rows.iter_mut().zip(chunk.values) {
            row.push(value_to_cell(chunk.dtype, value, &chunk.name)?);
        }
        columns.push(chunk.name);
    }

    Ok(Frame { columns, rows })
}

/// Row-major cell; floats are stored by bit pattern so NaN and infinities
/// survive
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
enum BlobCell {
    Null,
    Bool(bool),
    Int(i64),
    FloatBits(u64),
    Decimal(String),
    Text(String),
    Date(NaiveDate),
}

#[derive(Debug, Serialize, Deserialize)]
struct BlobFile {
    format: String,
    columns: Vec<String>,
    rows: Vec<Vec<BlobCell>>,
}

impl From<&Cell> for BlobCell {
    fn from(cell: &Cell) -> Self {
        match cell {
            Cell::Null => BlobCell::Null,
            Cell::Bool(b) => BlobCell::Bool(*b),
            Cell::Int(i) => BlobCell::Int(*i),
            Cell::Float(f) => BlobCell::FloatBits(f.to_bits()),
            Cell::Decimal(d) => BlobCell::Decimal(d.to_string()),
            Cell::Text(s) => BlobCell::Text(s.clone()),
            Cell::Date(d) => BlobCell::Date(*d),
        }
    }
}

impl TryFrom<BlobCell> for Cell {
    type Error = CheckpointError;

    fn try_from(cell: BlobCell) -> CheckpointResult<Self> {
        Ok(match cell {
            BlobCell::Null => Cell::Null,
            BlobCell::Bool(b) => Cell::Bool(b),
            BlobCell::Int(i) => Cell::Int(i),
            BlobCell::FloatBits(bits) => Cell::Float(f64::from_bits(bits)),
            BlobCell::Decimal(text) => Cell::Decimal(BigDecimal::from_str(&text).map_err(|e| {
                CheckpointError::Serialization(format!("blob decimal '{}': {}", text, e))
            })?),
            BlobCell::Text(s) => Cell::Text(s),
            BlobCell::Date(d) => Cell::Date(d),
        })
    }
}

/// Encode any frame in blob form
pub fn encode_blob(frame: &Frame) -> CheckpointResult<Vec<u8>> {
    let file = BlobFile {
        format: BLOB_FORMAT.to_string(),
        columns: frame.columns.clone(),
        rows: frame
            .rows
            .iter()
            .map(|row| row.iter().map(BlobCell::from).collect())
            .collect(),
    };
    serde_json::to_vec(&file).map_err(|e| CheckpointError::Serialization(format!("blob: {}", e)))
}

/// Decode a frame from blob form
pub fn decode_blob(bytes: &[u8]) -> CheckpointResult<Frame> {
    let file: BlobFile = serde_json::from_slice(bytes)
        .map_err(|e| CheckpointError::Serialization(format!("blob file: {}", e)))?;
    if file.format != BLOB_FORMAT {
        return Err(CheckpointError::Serialization(format!(
            "unsupported blob format '{}'",
            file.format
        )));
    }

    let rows = file
        .rows
        .into_iter()
        .map(|row| row.into_iter().map(Cell::try_from).collect())
        .collect::<CheckpointResult<Vec<Vec<Cell>>>>()?;

    Ok(Frame {
        columns: file.columns,
        rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn statement() -> Frame {
        Frame::new(["date", "bank", "request_amount", "fee", "installments"])
            .with_row(vec![
                Cell::Date(NaiveDate::from_ymd_opt(2025, 1, 3).unwrap()),
                Cell::from("CUB"),
                Cell::Decimal(BigDecimal::from_str("1500.25").unwrap()),
                Cell::Float(12.5),
                Cell::Int(6),
            ])
            .with_row(vec![
                Cell::Date(NaiveDate::from_ymd_opt(2025, 1, 4).unwrap()),
                Cell::from("CTBC"),
                Cell::Null,
                Cell::Float(0.0),
                Cell::Int(12),
            ])
    }

    #[test]
    fn test_columnar_preserves_cells() {
        let frame = statement();
        let decoded = decode_columnar(&encode_columnar(&frame).unwrap()).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_columnar_keeps_shape_of_row_less_frame() {
        let frame = Frame::new(["a", "b", "c"]);
        let decoded = decode_columnar(&encode_columnar(&frame).unwrap()).unwrap();
        assert_eq!(decoded.shape(), (0, 3));
    }

    #[test]
    fn test_columnar_rejections() {
        let dup = Frame::new(["amount", "amount"]).with_row(vec![Cell::Int(1), Cell::Int(2)]);
        assert_eq!(
            encode_columnar(&dup).unwrap_err(),
            ColumnarError::DuplicateColumn("amount".to_string())
        );

        let ragged = Frame::new(["a", "b"]).with_row(vec![Cell::Int(1)]);
        assert!(matches!(
            encode_columnar(&ragged),
            Err(ColumnarError::RaggedRow { row: 0, expected: 2, found: 1 })
        ));

        let mixed = Frame::new(["ref"])
            .with_row(vec![Cell::Int(1)])
            .with_row(vec![Cell::Null])
            .with_row(vec![Cell::from("A-1")]);
        assert!(matches!(
            encode_columnar(&mixed),
            Err(ColumnarError::MixedTypes { first: "int", found: "text", .. })
        ));

        let nan = Frame::new(["rate"]).with_row(vec![Cell::Float(f64::NAN)]);
        assert!(matches!(
            encode_columnar(&nan),
            Err(ColumnarError::NonFiniteFloat { row: 0, .. })
        ));
    }

    #[test]
    fn test_blob_handles_what_columnar_cannot() {
        let frame = Frame::new(["ref", "ref"])
            .with_row(vec![Cell::Int(1), Cell::Float(f64::INFINITY)])
            .with_row(vec![Cell::from("x")]);
        let decoded = decode_blob(&encode_blob(&frame).unwrap()).unwrap();
        assert_eq!(decoded.columns, frame.columns);
        assert_eq!(decoded.rows[0][1], Cell::Float(f64::INFINITY));
        assert_eq!(decoded.rows[1], vec![Cell::from("x")]);
    }

    #[test]
    fn test_format_mismatch_is_an_error() {
        assert!(decode_columnar(br#"{"format":"other","num_rows":0,"columns":[]}"#).is_err());
        assert!(decode_blob(b"not json").is_err());
    }
}
