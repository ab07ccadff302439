//! Tabular data exchanged with table emitters and `load_table`.

use std::fmt::Display;
use std::sync::Arc;

use arrow_json::reader::infer_json_schema_from_iterator;
use arrow_json::writer::JsonArray;
use arrow_json::{ReaderBuilder, WriterBuilder};
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use serde_json::{Map, Number, Value};

use crate::{EncodingError, StorageError, TesseraResult};

/// One table row: column name to JSON-primitive cell value.
pub type Row = Map<String, Value>;

/// A whole table as a list of rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub rows: Vec<Row>,
}

impl Table {
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Column names in first-seen order across all rows.
    pub fn columns(&self) -> Vec<String> {
        let mut columns: Vec<String> = Vec::new();
        for row in &self.rows {
            for key in row.keys() {
                if !columns.iter().any(|c| c == key) {
                    columns.push(key.clone());
                }
            }
        }
        columns
    }

    /// Parse raw table bytes, picking the format from the table's name and,
    /// for names without a known extension, the Parquet magic.
    pub fn parse(name: &str, bytes: &[u8]) -> TesseraResult<Self> {
        match TableFormat::detect(name, bytes) {
            TableFormat::Parquet => Self::from_parquet(bytes),
            TableFormat::JsonLines => Self::from_json_lines(bytes),
            TableFormat::JsonArray => Self::from_json_array(bytes),
            TableFormat::Csv => Self::from_csv(bytes),
        }
    }

    pub fn from_json_lines(bytes: &[u8]) -> TesseraResult<Self> {
        let text = std::str::from_utf8(bytes).map_err(|_| EncodingError::InvalidText {
            encoding: "utf-8".to_string(),
        })?;
        let mut rows = Vec::new();
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            rows.push(expect_object(serde_json::from_str(line)?)?);
        }
        Ok(Self { rows })
    }

    pub fn from_json_array(bytes: &[u8]) -> TesseraResult<Self> {
        let values: Vec<Value> = serde_json::from_slice(bytes)?;
        let rows = values
            .into_iter()
            .map(expect_object)
            .collect::<TesseraResult<Vec<_>>>()?;
        Ok(Self { rows })
    }

    /// CSV with a header row. Cells stay strings; empty cells become null.
    pub fn from_csv(bytes: &[u8]) -> TesseraResult<Self> {
        let mut reader = csv::Reader::from_reader(bytes);
        let headers = reader.headers().map_err(csv_error)?.clone();
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(csv_error)?;
            let row: Row = headers
                .iter()
                .zip(record.iter())
                .map(|(column, cell)| {
                    let value = if cell.is_empty() {
                        Value::Null
                    } else {
                        Value::String(cell.to_string())
                    };
                    (column.to_string(), value)
                })
                .collect();
            rows.push(row);
        }
        Ok(Self { rows })
    }

    /// Parquet file contents. Columns map to JSON through Arrow: nested lists
    /// and structs become arrays and objects, nulls are kept as explicit
    /// `null` cells.
    pub fn from_parquet(bytes: &[u8]) -> TesseraResult<Self> {
        let reader = ParquetRecordBatchReaderBuilder::try_new(Bytes::copy_from_slice(bytes))
            .and_then(|builder| builder.build())
            .map_err(parquet_error)?;

        let mut writer = WriterBuilder::new()
            .with_explicit_nulls(true)
            .build::<_, JsonArray>(Vec::new());
        for batch in reader {
            let batch = batch.map_err(parquet_error)?;
            writer.write(&batch).map_err(parquet_error)?;
        }
        writer.finish().map_err(parquet_error)?;
        let json = writer.into_inner();
        if json.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        Self::from_json_array(&json)
    }

    /// Serialize as Parquet, inferring the column types from the rows.
    ///
    /// An empty table has no schema to infer and is rejected.
    pub fn to_parquet(&self) -> TesseraResult<Vec<u8>> {
        if self.rows.is_empty() {
            return Err(StorageError::Serialization {
                reason: "cannot infer a Parquet schema from an empty table".to_string(),
            }
            .into());
        }
        let values: Vec<Value> = self.rows.iter().cloned().map(Value::Object).collect();
        let schema = Arc::new(
            infer_json_schema_from_iterator(values.iter().map(Ok)).map_err(parquet_error)?,
        );

        let mut decoder = ReaderBuilder::new(Arc::clone(&schema))
            .with_batch_size(values.len())
            .build_decoder()
            .map_err(parquet_error)?;
        decoder.serialize(&values).map_err(parquet_error)?;

        let mut writer = ArrowWriter::try_new(Vec::new(), schema, None).map_err(parquet_error)?;
        if let Some(batch) = decoder.flush().map_err(parquet_error)? {
            writer.write(&batch).map_err(parquet_error)?;
        }
        Ok(writer.into_inner().map_err(parquet_error)?)
    }

    /// Serialize as JSON Lines.
    pub fn to_json_lines(&self) -> TesseraResult<Vec<u8>> {
        let mut out = Vec::new();
        for row in &self.rows {
            serde_json::to_writer(&mut out, row)?;
            out.push(b'\n');
        }
        Ok(out)
    }
}

/// Leading and trailing magic of every Parquet file.
const PARQUET_MAGIC: &[u8; 4] = b"PAR1";

/// Encodings `load_table` understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableFormat {
    /// Apache Parquet (`.parquet`), the pipeline's table output format.
    Parquet,
    /// One JSON object per line (`.jsonl`, `.ndjson`).
    JsonLines,
    /// A single JSON array of objects (`.json`).
    JsonArray,
    /// Comma separated values with a header row (`.csv`).
    Csv,
}

impl TableFormat {
    /// Format implied by the name's extension, if it names one.
    pub fn for_name(name: &str) -> Option<Self> {
        let (_, extension) = name.rsplit_once('.')?;
        match extension.to_ascii_lowercase().as_str() {
            "parquet" => Some(Self::Parquet),
            "csv" => Some(Self::Csv),
            "json" => Some(Self::JsonArray),
            "jsonl" | "ndjson" => Some(Self::JsonLines),
            _ => None,
        }
    }

    /// Format for `name`, falling back to sniffing `bytes`: Parquet when the
    /// contents carry its magic, JSON Lines otherwise.
    pub fn detect(name: &str, bytes: &[u8]) -> Self {
        Self::for_name(name).unwrap_or_else(|| {
            if bytes.starts_with(PARQUET_MAGIC) && bytes.ends_with(PARQUET_MAGIC) {
                Self::Parquet
            } else {
                Self::JsonLines
            }
        })
    }
}

/// A cell as produced by a table emitter, before it is made JSON-safe.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
    List(Vec<Cell>),
    FloatArray(Vec<f64>),
}

impl From<Cell> for Value {
    fn from(cell: Cell) -> Self {
        match cell {
            Cell::Null => Value::Null,
            Cell::Bool(b) => Value::Bool(b),
            Cell::Int(i) => Value::from(i),
            Cell::Float(f) => float_value(f),
            Cell::Text(s) => Value::String(s),
            Cell::Timestamp(ts) => Value::String(ts.to_rfc3339_opts(SecondsFormat::Micros, true)),
            Cell::List(cells) => Value::Array(cells.into_iter().map(Value::from).collect()),
            Cell::FloatArray(values) => Value::Array(values.into_iter().map(float_value).collect()),
        }
    }
}

/// Build a row from emitter cells.
pub fn row_from_cells<I, K>(cells: I) -> Row
where
    I: IntoIterator<Item = (K, Cell)>,
    K: Into<String>,
{
    cells
        .into_iter()
        .map(|(column, cell)| (column.into(), Value::from(cell)))
        .collect()
}

// NaN and infinities have no JSON representation.
fn float_value(f: f64) -> Value {
    Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}

fn expect_object(value: Value) -> TesseraResult<Row> {
    match value {
        Value::Object(row) => Ok(row),
        other => Err(StorageError::Serialization {
            reason: format!("expected a JSON object per table row, got {}", other),
        }
        .into()),
    }
}

fn parquet_error(e: impl Display) -> StorageError {
    StorageError::Serialization {
        reason: e.to_string(),
    }
}

fn csv_error(e: csv::Error) -> StorageError {
    StorageError::Serialization {
        reason: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_parse_json_lines() {
        let table = Table::parse("entities", b"{\"id\":\"1\",\"n\":1}\n\n{\"id\":\"2\",\"n\":2}\n").unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.rows[1]["n"], json!(2));
        assert_eq!(table.columns(), vec!["id".to_string(), "n".to_string()]);
    }

    #[test]
    fn test_parse_json_array_and_csv() {
        let table = Table::parse("nodes.json", br#"[{"id": "a"}, {"id": "b"}]"#).unwrap();
        assert_eq!(table.len(), 2);

        let table = Table::parse("nodes.csv", b"id,title\n1,Alpha\n2,\n").unwrap();
        assert_eq!(table.rows[0]["title"], json!("Alpha"));
        assert_eq!(table.rows[1]["title"], Value::Null);
    }

    #[test]
    fn test_non_object_rows_are_rejected() {
        assert!(Table::parse("t", b"[1,2]\n").is_err());
        assert!(Table::parse("t.json", b"[1,2]").is_err());
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(TableFormat::for_name("create_final_nodes.parquet"), Some(TableFormat::Parquet));
        assert_eq!(TableFormat::for_name("NODES.CSV"), Some(TableFormat::Csv));
        assert_eq!(TableFormat::for_name("events.ndjson"), Some(TableFormat::JsonLines));
        assert_eq!(TableFormat::for_name("entities"), None);
        assert_eq!(TableFormat::detect("entities", b"PAR1....PAR1"), TableFormat::Parquet);
        assert_eq!(TableFormat::detect("entities", b"{\"id\":1}\n"), TableFormat::JsonLines);
    }

    fn graph_nodes() -> Table {
        Table::new(vec![
            serde_json::from_value(json!({
                "id": "n1", "degree": 3, "score": 0.5, "tags": ["a", "b"], "note": null
            }))
            .unwrap(),
            serde_json::from_value(json!({
                "id": "n2", "degree": 1, "score": 1.25, "tags": [], "note": "hub"
            }))
            .unwrap(),
        ])
    }

    #[test]
    fn test_parquet_written_then_parsed() {
        let table = graph_nodes();
        let bytes = table.to_parquet().unwrap();
        assert!(bytes.starts_with(PARQUET_MAGIC));

        let parsed = Table::parse("create_final_nodes.parquet", &bytes).unwrap();
        assert_eq!(parsed, table);
        // Sniffed when the name carries no extension.
        assert_eq!(Table::parse("create_final_nodes", &bytes).unwrap(), table);
    }

    #[test]
    fn test_invalid_parquet_is_a_serialization_error() {
        let err = Table::parse("nodes.parquet", b"{\"id\":1}").unwrap_err();
        assert!(matches!(
            err,
            crate::TesseraError::Storage(StorageError::Serialization { .. })
        ));
        assert!(Table::default().to_parquet().is_err());
    }

    #[test]
    fn test_cells_become_json_primitives() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let row = row_from_cells([
            ("when", Cell::Timestamp(ts)),
            ("tags", Cell::List(vec![Cell::Text("a".into()), Cell::Int(2)])),
            ("vec", Cell::FloatArray(vec![0.5, f64::NAN])),
            ("ok", Cell::Bool(true)),
            ("none", Cell::Null),
        ]);
        assert_eq!(row["when"], json!("2024-05-01T12:00:00.000000Z"));
        assert_eq!(row["tags"], json!(["a", 2]));
        assert_eq!(row["vec"], json!([0.5, null]));
        assert_eq!(row["ok"], json!(true));
        assert_eq!(row["none"], Value::Null);
    }

    #[test]
    fn test_json_lines_written_then_parsed() {
        let table = Table::new(vec![row_from_cells([("id", Cell::Text("x".into()))])]);
        let bytes = table.to_json_lines().unwrap();
        assert_eq!(Table::from_json_lines(&bytes).unwrap(), table);
    }
}
