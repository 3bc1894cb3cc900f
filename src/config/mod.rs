use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Component, Path, PathBuf},
};

use crate::units::UnitPrefix;

/// Folder created under the input folder to hold converted files.
pub const OUTPUT_DIR_NAME: &str = "modified_csv";

pub const IVSWEEP_VOLT_COL: &str = "DrainV";
pub const IVSWEEP_CURR_COL: &str = "DrainI";
pub const GATESWEEP_VOLT_COL: &str = "GateV";
pub const GATESWEEP_CURR_COL: &str = "DrainI";

/// Which export convention every file of a folder follows.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum TestType {
    /// One setup, one `DataName` block per file.
    #[default]
    Raw,
    /// Several `SetupTitle` blocks concatenated in one file.
    MultiRaw,
    /// Drain voltage/current sweep.
    IvSweep,
    /// Gate voltage vs drain current sweep.
    GateSweep,
}

impl TestType {
    pub fn as_str(&self) -> &str {
        match self {
            TestType::Raw => "raw",
            TestType::MultiRaw => "multi-raw",
            TestType::IvSweep => "iv-sweep",
            TestType::GateSweep => "gate-sweep",
        }
    }

    /// Fit options only mean something for the sweep types.
    pub fn uses_fit(&self) -> bool {
        matches!(self, TestType::IvSweep | TestType::GateSweep)
    }
}

/// How the blocks of a multi-raw file are written.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum MultiRawLayout {
    /// All blocks stacked into one file with a `SetupTitle` column.
    #[default]
    Merged,
    /// One output file per block.
    Split,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FitOptions {
    /// Write the sampled fit curve next to the sweep data.
    pub enabled: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UnitOptions {
    pub volt: UnitPrefix,
    pub current: UnitPrefix,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ColumnNames {
    pub iv_volt: String,
    pub iv_current: String,
    pub gate_volt: String,
    pub gate_current: String,
}

impl Default for ColumnNames {
    fn default() -> Self {
        Self {
            iv_volt: IVSWEEP_VOLT_COL.to_string(),
            iv_current: IVSWEEP_CURR_COL.to_string(),
            gate_volt: GATESWEEP_VOLT_COL.to_string(),
            gate_current: GATESWEEP_CURR_COL.to_string(),
        }
    }
}

impl ColumnNames {
    /// (voltage column, current column) for a sweep type.
    pub fn sweep_columns(&self, test_type: TestType) -> Option<(&str, &str)> {
        match test_type {
            TestType::IvSweep => Some((self.iv_volt.as_str(), self.iv_current.as_str())),
            TestType::GateSweep => Some((self.gate_volt.as_str(), self.gate_current.as_str())),
            TestType::Raw | TestType::MultiRaw => None,
        }
    }
}

/// Everything one conversion run needs. Every field has a default so a
/// YAML file only has to name what it changes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub test_type: TestType,
    pub layout: MultiRawLayout,
    pub fit: FitOptions,
    pub units: UnitOptions,
    pub columns: ColumnNames,
    pub output_dir: String,
    pub fail_fast: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            test_type: TestType::default(),
            layout: MultiRawLayout::default(),
            fit: FitOptions::default(),
            units: UnitOptions::default(),
            columns: ColumnNames::default(),
            output_dir: OUTPUT_DIR_NAME.to_string(),
            fail_fast: false,
        }
    }
}

impl Config {
    /// Load a YAML config file. Missing keys keep their defaults.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let cfg: Config = serde_yaml::from_str(&text)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        let mut comps = Path::new(&self.output_dir).components();
        match (comps.next(), comps.next()) {
            (Some(Component::Normal(_)), None) => Ok(()),
            _ => bail!(
                "output_dir must be a single folder name, got '{}'",
                self.output_dir
            ),
        }
    }

    /// `<folder>/<output_dir>`
    pub fn output_dir_for(&self, folder: &Path) -> PathBuf {
        folder.join(&self.output_dir)
    }
}
