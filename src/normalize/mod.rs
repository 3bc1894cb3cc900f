mod write;

pub use write::{render_table, write_table};

use anyhow::{anyhow, Context, Result};
use std::{collections::HashMap, path::Path};
use tracing::debug;

use crate::config::{Config, MultiRawLayout, TestType};
use crate::parse::{MeasurementBlock, RawMeasurementFile};
use crate::sweep::{Quantity, Sweep, SweepKind};

/// Column added to multi-raw output naming each row's setup block.
pub const SETUP_TITLE_COLUMN: &str = "SetupTitle";

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Number(f64),
    Text(String),
    Empty,
}

impl Cell {
    /// Shortest round-trip float text, so `1E-12` comes out as `1e-12` and
    /// integral values keep a trailing `.0`.
    pub fn render(&self) -> String {
        match self {
            Cell::Number(v) => format!("{:?}", v),
            Cell::Text(s) => s.clone(),
            Cell::Empty => String::new(),
        }
    }
}

impl From<Option<f64>> for Cell {
    fn from(v: Option<f64>) -> Self {
        v.map(Cell::Number).unwrap_or(Cell::Empty)
    }
}

/// Canonical output rows of one file, in source order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NormalizedTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

/// A table and the file name it is written under.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedOutput {
    pub file_name: String,
    pub table: NormalizedTable,
}

/// Output tables of one file, plus its sweep for sweep test types.
#[derive(Debug, Clone)]
pub struct NormalizedFile {
    pub outputs: Vec<NormalizedOutput>,
    pub sweep: Option<Sweep>,
}

/// Reshape a parsed file into its output tables.
pub fn normalize(file: &RawMeasurementFile, cfg: &Config) -> Result<Vec<NormalizedOutput>> {
    Ok(normalize_file(file, cfg)?.outputs)
}

pub fn normalize_file(file: &RawMeasurementFile, cfg: &Config) -> Result<NormalizedFile> {
    let mut sweep = None;
    let outputs = match file.test_type {
        TestType::Raw => vec![NormalizedOutput {
            file_name: file.file_name.clone(),
            table: block_table(first_block(file)?),
        }],
        TestType::MultiRaw => match cfg.layout {
            MultiRawLayout::Merged => vec![NormalizedOutput {
                file_name: file.file_name.clone(),
                table: merge_blocks(&file.blocks),
            }],
            MultiRawLayout::Split => file
                .blocks
                .iter()
                .enumerate()
                .map(|(i, block)| NormalizedOutput {
                    file_name: derived_name(&file.file_name, &format!("block{}", i + 1)),
                    table: merge_blocks(std::slice::from_ref(block)),
                })
                .collect(),
        },
        TestType::IvSweep | TestType::GateSweep => {
            let built = build_sweep(file, cfg)?;
            let outputs = sweep_outputs(file, &built, cfg);
            sweep = Some(built);
            outputs
        }
    };
    debug!(
        file = %file.file_name,
        outputs = outputs.len(),
        "normalized"
    );
    Ok(NormalizedFile { outputs, sweep })
}

fn first_block(file: &RawMeasurementFile) -> Result<&MeasurementBlock> {
    file.blocks
        .first()
        .ok_or_else(|| anyhow!("{} has no measurement block", file.file_name))
}

/// A single block as-is: its own columns, numbers or empty cells.
pub fn block_table(block: &MeasurementBlock) -> NormalizedTable {
    NormalizedTable {
        columns: block.columns.clone(),
        rows: block
            .rows
            .iter()
            .map(|r| r.iter().map(|v| Cell::from(*v)).collect())
            .collect(),
    }
}

/// Stack blocks under the union of their columns (first-appearance order)
/// plus a trailing `SetupTitle` column. Cells a block lacks stay empty.
///
/// Columns are matched by name and occurrence, so a header that repeats a
/// name keeps every copy, as the raw output does.
pub fn merge_blocks(blocks: &[MeasurementBlock]) -> NormalizedTable {
    let mut keys: Vec<(&str, usize)> = Vec::new();
    for block in blocks {
        for key in column_keys(&block.columns) {
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
    }

    let mut rows = Vec::with_capacity(blocks.iter().map(|b| b.rows.len()).sum());
    for block in blocks {
        let own = column_keys(&block.columns);
        let lookup: Vec<Option<usize>> = keys
            .iter()
            .map(|key| own.iter().position(|k| k == key))
            .collect();
        for values in &block.rows {
            let mut row: Vec<Cell> = lookup
                .iter()
                .map(|idx| idx.map_or(Cell::Empty, |i| Cell::from(values[i])))
                .collect();
            row.push(Cell::Text(block.setup_title.clone()));
            rows.push(row);
        }
    }

    let mut columns: Vec<String> = keys.iter().map(|(name, _)| name.to_string()).collect();
    columns.push(SETUP_TITLE_COLUMN.to_string());
    NormalizedTable { columns, rows }
}

/// Each column name paired with how often it appeared before in `columns`.
fn column_keys(columns: &[String]) -> Vec<(&str, usize)> {
    let mut seen: HashMap<&str, usize> = HashMap::new();
    columns
        .iter()
        .map(|name| {
            let count = seen.entry(name.as_str()).or_insert(0);
            let key = (name.as_str(), *count);
            *count += 1;
            key
        })
        .collect()
}

/// The sweep of a file's first block, in the configured display units.
pub fn build_sweep(file: &RawMeasurementFile, cfg: &Config) -> Result<Sweep> {
    let kind = match file.test_type {
        TestType::GateSweep => SweepKind::Gate,
        _ => SweepKind::Iv,
    };
    let (volt_col, curr_col) = cfg
        .columns
        .sweep_columns(file.test_type)
        .ok_or_else(|| anyhow!("{} is not a sweep test type", file.test_type.as_str()))?;

    let mut sweep =
        Sweep::from_block(first_block(file)?, kind, volt_col, curr_col).with_context(|| {
            format!(
                "extracting {} sweep from {}",
                file.test_type.as_str(),
                file.file_name
            )
        })?;
    sweep.change_units(Quantity::Voltage, cfg.units.volt);
    sweep.change_units(Quantity::Current, cfg.units.current);
    Ok(sweep)
}

fn sweep_outputs(
    file: &RawMeasurementFile,
    sweep: &Sweep,
    cfg: &Config,
) -> Vec<NormalizedOutput> {
    let mut outputs = vec![NormalizedOutput {
        file_name: file.file_name.clone(),
        table: columns_table(
            vec![sweep.volt_header(), sweep.current_header()],
            &sweep.volts(),
            &sweep.current(),
        ),
    }];

    if cfg.fit.enabled {
        sweep.log_fit(&file.file_name);
        outputs.push(NormalizedOutput {
            file_name: derived_name(&file.file_name, "fit"),
            table: fit_table(sweep),
        });
    }
    outputs
}

/// The sampled fit curve of `sweep` with its voltage and fit current headers.
pub fn fit_table(sweep: &Sweep) -> NormalizedTable {
    let (v_fit, i_fit) = sweep.fit_curve();
    columns_table(
        vec![sweep.volt_header(), sweep.fit_current_header()],
        &v_fit,
        &i_fit,
    )
}

fn columns_table(columns: Vec<String>, x: &[f64], y: &[f64]) -> NormalizedTable {
    NormalizedTable {
        columns,
        rows: x
            .iter()
            .zip(y)
            .map(|(a, b)| vec![Cell::Number(*a), Cell::Number(*b)])
            .collect(),
    }
}

/// `dev1.csv` + `fit` -> `dev1_fit.csv`
pub fn derived_name(file_name: &str, suffix: &str) -> String {
    let path = Path::new(file_name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy())
        .unwrap_or_else(|| file_name.into());
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy())
        .unwrap_or_else(|| "csv".into());
    format!("{}_{}.{}", stem, suffix, ext)
}
