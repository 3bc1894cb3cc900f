use thiserror::Error;

/// Layout problems in a B1500A export. Line numbers are 1-based.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("{file}: no DataName row found")]
    MissingDataName { file: String },

    #[error(
        "{file}: DataName rows at lines {first} and {second}; multi-block exports need the multi-raw test type"
    )]
    MultipleDataBlocks {
        file: String,
        first: usize,
        second: usize,
    },

    #[error("{file}: setup block {setup:?} has DataName rows at lines {first} and {second}")]
    RepeatedDataName {
        file: String,
        setup: String,
        first: usize,
        second: usize,
    },

    #[error("{file}:{line}: expected {expected} values, found {found}")]
    ColumnCountMismatch {
        file: String,
        line: usize,
        expected: usize,
        found: usize,
    },

    #[error("{file}: no setup block contains measurement data")]
    NoMeasurementBlocks { file: String },
}
