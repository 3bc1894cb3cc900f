mod error;
mod utils;

pub use error::ParseError;
pub use utils::clean_str;

use anyhow::{Context, Result};
use csv::{Position, ReaderBuilder, Trim};
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, trace};

use crate::config::TestType;

pub const TAG_SETUP_TITLE: &str = "SetupTitle";
pub const TAG_TEST_PARAMETER: &str = "TestParameter";
pub const TAG_DATA_NAME: &str = "DataName";
pub const TAG_DATA_VALUE: &str = "DataValue";

/// A `TestParameter` value: one cell, or one cell per channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    Single(String),
    List(Vec<String>),
}

pub type TestParameters = BTreeMap<String, ParamValue>;

/// One CSV line of an export, fields trimmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    /// 1-based line in the source file.
    pub line: usize,
    pub fields: Vec<String>,
}

impl Row {
    pub fn tag(&self) -> Option<&str> {
        self.fields.first().map(String::as_str)
    }

    fn is(&self, tag: &str) -> bool {
        self.tag() == Some(tag)
    }
}

/// One `DataName` header and the `DataValue` rows under it.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementBlock {
    pub index: usize,
    /// Empty when the export has no `SetupTitle` row for this block.
    pub setup_title: String,
    pub params: TestParameters,
    /// Header names without the leading `DataName` cell.
    pub columns: Vec<String>,
    /// Values in source order. Non-numeric cells are `None`.
    pub rows: Vec<Vec<Option<f64>>>,
}

impl MeasurementBlock {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn column(&self, name: &str) -> Option<Vec<Option<f64>>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(|r| r[idx]).collect())
    }
}

/// A parsed export. Never modified after parsing.
#[derive(Debug, Clone)]
pub struct RawMeasurementFile {
    pub path: PathBuf,
    pub file_name: String,
    pub test_type: TestType,
    /// Parameters of the first block (the whole file for single-block exports).
    pub params: TestParameters,
    pub blocks: Vec<MeasurementBlock>,
}

impl RawMeasurementFile {
    pub fn total_rows(&self) -> usize {
        self.blocks.iter().map(|b| b.rows.len()).sum()
    }
}

/// Read `path` and parse it according to `test_type`.
#[tracing::instrument(level = "debug", skip(path), fields(path = %path.as_ref().display()))]
pub fn parse_file<P: AsRef<Path>>(path: P, test_type: TestType) -> Result<RawMeasurementFile> {
    let path = path.as_ref();
    let buf = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    // exports occasionally carry stray Latin-1 bytes in setup titles
    let text = String::from_utf8_lossy(&buf);
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    let mut parsed = parse_str(&text, &file_name, test_type)?;
    parsed.path = path.to_path_buf();
    Ok(parsed)
}

/// Parse export text that is already in memory. `file_name` is only used
/// for error messages and output naming.
pub fn parse_str(text: &str, file_name: &str, test_type: TestType) -> Result<RawMeasurementFile> {
    let rows = load_rows(text).with_context(|| format!("reading rows of {}", file_name))?;
    trace!(file_name, rows = rows.len(), "loaded rows");

    let blocks = match test_type {
        TestType::MultiRaw => parse_multi(file_name, &rows)?,
        TestType::Raw | TestType::IvSweep | TestType::GateSweep => {
            vec![parse_single(file_name, &rows)?]
        }
    };
    debug!(
        file_name,
        blocks = blocks.len(),
        rows = blocks.iter().map(|b| b.rows.len()).sum::<usize>(),
        "parsed export"
    );

    let params = blocks.first().map(|b| b.params.clone()).unwrap_or_default();
    Ok(RawMeasurementFile {
        path: PathBuf::from(file_name),
        file_name: file_name.to_string(),
        test_type,
        params,
        blocks,
    })
}

/// Split export text into trimmed rows, skipping blank lines.
pub fn load_rows(text: &str) -> Result<Vec<Row>> {
    let text = text.trim_start_matches('\u{feff}');
    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true) // tag rows differ in width
        .trim(Trim::All)
        .from_reader(text.as_bytes());

    let mut rows = Vec::new();
    for (idx, result) in rdr.records().enumerate() {
        let record = result.with_context(|| format!("CSV parse error at record {}", idx))?;
        // `"I" ` with padding outside the quotes is not unquoted by the reader
        let fields: Vec<String> = record.iter().map(clean_str).collect();
        if fields.iter().all(|f| f.is_empty()) {
            continue;
        }
        let line = record
            .position()
            .map_or(idx + 1, |pos| record_line(text, pos));
        rows.push(Row { line, fields });
    }
    Ok(rows)
}

/// A record's position is where the reader stopped after the previous
/// record, before any blank lines it skipped. Step over those.
fn record_line(text: &str, pos: &Position) -> usize {
    let start = (pos.byte() as usize).min(text.len());
    let skipped = text.as_bytes()[start..]
        .iter()
        .take_while(|&&b| b == b'\r' || b == b'\n')
        .filter(|&&b| b == b'\n')
        .count();
    pos.line() as usize + skipped
}

/// Numeric value of a cell; anything else, `NaN` included, is missing.
pub fn parse_value(cell: &str) -> Option<f64> {
    cell.trim().parse::<f64>().ok().filter(|v| !v.is_nan())
}

/// Collect `TestParameter,<key>,<values...>` rows. Later keys win.
pub fn extract_test_parameters(rows: &[Row]) -> TestParameters {
    let mut params = TestParameters::new();
    for row in rows.iter().filter(|r| r.is(TAG_TEST_PARAMETER)) {
        let Some(key) = row.fields.get(1) else {
            continue;
        };
        let values = &row.fields[2..];
        let value = if values.len() == 1 {
            ParamValue::Single(values[0].clone())
        } else {
            ParamValue::List(values.to_vec())
        };
        params.insert(key.clone(), value);
    }
    params
}

/// A single-block export: exactly one `DataName` row.
pub fn parse_single(file_name: &str, rows: &[Row]) -> Result<MeasurementBlock, ParseError> {
    let mut names = rows.iter().filter(|r| r.is(TAG_DATA_NAME));
    let Some(first) = names.next() else {
        return Err(ParseError::MissingDataName {
            file: file_name.to_string(),
        });
    };
    if let Some(second) = names.next() {
        return Err(ParseError::MultipleDataBlocks {
            file: file_name.to_string(),
            first: first.line,
            second: second.line,
        });
    }

    let setup_title = rows
        .iter()
        .find(|r| r.is(TAG_SETUP_TITLE))
        .map(setup_title_of)
        .unwrap_or_default();
    build_block(file_name, rows, 0, setup_title)
}

/// A multi-block export, split at each `SetupTitle` row. An export without
/// setup titles is one untitled block. Segments without data are dropped.
pub fn parse_multi(file_name: &str, rows: &[Row]) -> Result<Vec<MeasurementBlock>, ParseError> {
    let starts: Vec<usize> = rows
        .iter()
        .enumerate()
        .filter(|(_, r)| r.is(TAG_SETUP_TITLE))
        .map(|(i, _)| i)
        .collect();
    let segments: Vec<(&[Row], String)> = if starts.is_empty() {
        vec![(rows, String::new())]
    } else {
        starts
            .iter()
            .enumerate()
            .map(|(n, &start)| {
                let end = starts.get(n + 1).copied().unwrap_or(rows.len());
                (&rows[start..end], setup_title_of(&rows[start]))
            })
            .collect()
    };

    let mut blocks = Vec::new();
    for (segment, title) in segments {
        let names: Vec<&Row> = segment.iter().filter(|r| r.is(TAG_DATA_NAME)).collect();
        match names.as_slice() {
            [] => {
                debug!(file_name, setup = %title, "setup block has no DataName row, skipped");
                continue;
            }
            [_] => {}
            [first, second, ..] => {
                return Err(ParseError::RepeatedDataName {
                    file: file_name.to_string(),
                    setup: title,
                    first: first.line,
                    second: second.line,
                })
            }
        }

        let block = build_block(file_name, segment, blocks.len(), title)?;
        if block.rows.is_empty() {
            debug!(file_name, setup = %block.setup_title, "setup block has no data rows, skipped");
            continue;
        }
        blocks.push(block);
    }

    if blocks.is_empty() {
        return Err(ParseError::NoMeasurementBlocks {
            file: file_name.to_string(),
        });
    }
    Ok(blocks)
}

fn setup_title_of(row: &Row) -> String {
    row.fields.get(1).cloned().unwrap_or_default()
}

/// Build the block of `rows`, which must hold exactly one `DataName` row.
fn build_block(
    file_name: &str,
    rows: &[Row],
    index: usize,
    setup_title: String,
) -> Result<MeasurementBlock, ParseError> {
    let header_pos = rows
        .iter()
        .position(|r| r.is(TAG_DATA_NAME))
        .ok_or_else(|| ParseError::MissingDataName {
            file: file_name.to_string(),
        })?;
    let columns: Vec<String> = rows[header_pos].fields[1..].to_vec();

    let mut values = Vec::new();
    for row in rows[header_pos + 1..].iter().filter(|r| r.is(TAG_DATA_VALUE)) {
        let cells = &row.fields[1..];
        if cells.len() != columns.len() {
            return Err(ParseError::ColumnCountMismatch {
                file: file_name.to_string(),
                line: row.line,
                expected: columns.len(),
                found: cells.len(),
            });
        }
        values.push(cells.iter().map(|c| parse_value(c)).collect());
    }

    Ok(MeasurementBlock {
        index,
        setup_title,
        params: extract_test_parameters(rows),
        columns,
        rows: values,
    })
}
