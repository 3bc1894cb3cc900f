// src/pipeline/mod.rs
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::Serialize;
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    time::Instant,
};
use tracing::{error, info, instrument, warn};

use crate::config::{Config, TestType};
use crate::locate::find_csv_files;
use crate::normalize::{fit_table, normalize_file, write_table, NormalizedOutput};
use crate::parse::parse_file;
use crate::sweep::{avg_fit, Sweep};

/// What happened to one input file.
#[derive(Debug, Clone, Serialize)]
pub struct FileOutcome {
    pub input: PathBuf,
    pub outputs: Vec<PathBuf>,
    pub blocks: usize,
    pub rows: usize,
    pub bytes: u64,
    pub error: Option<String>,
}

impl FileOutcome {
    fn failed(input: &Path, err: &anyhow::Error) -> Self {
        Self {
            input: input.to_path_buf(),
            outputs: Vec::new(),
            blocks: 0,
            rows: 0,
            bytes: 0,
            error: Some(format!("{:#}", err)),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Result of one folder conversion. Files are listed in locator order.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub folder: PathBuf,
    pub output_dir: PathBuf,
    pub test_type: TestType,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub files: Vec<FileOutcome>,
    /// Fit of the point-by-point mean of all converted sweeps, when fitting
    /// is enabled and at least two sweeps share a voltage axis.
    pub avg_fit: Option<PathBuf>,
}

impl RunSummary {
    pub fn converted(&self) -> usize {
        self.files.iter().filter(|f| f.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.files.len() - self.converted()
    }

    pub fn outputs_written(&self) -> usize {
        self.files.iter().map(|f| f.outputs.len()).sum::<usize>() + self.avg_fit.iter().count()
    }
}

/// A parsed and normalized input whose tables are not written yet.
struct PreparedFile {
    input: PathBuf,
    blocks: usize,
    rows: usize,
    outputs: Vec<NormalizedOutput>,
    sweep: Option<Sweep>,
}

/// Either a file ready to write or the outcome of its failure.
type Planned = std::result::Result<PreparedFile, FileOutcome>;

/// Convert every CSV file of `folder` into `<folder>/<output_dir>`.
///
/// Every file is parsed and normalized before anything is written, and the
/// run fails without writing if two outputs would share a name. A failing
/// file is recorded in the summary and the others still run, unless
/// `cfg.fail_fast` is set: then files are handled one at a time in locator
/// order and the first error is returned.
#[instrument(level = "info", skip(folder, cfg), fields(folder = %folder.display(), test_type = cfg.test_type.as_str()))]
pub fn convert_folder(folder: &Path, cfg: &Config) -> Result<RunSummary> {
    cfg.validate()?;
    let started_at = Utc::now();
    let start = Instant::now();

    let inputs = find_csv_files(folder)?;
    if inputs.is_empty() {
        bail!("no CSV files found in {}", folder.display());
    }
    if cfg.fit.enabled && !cfg.test_type.uses_fit() {
        info!("fit options have no effect for {} files", cfg.test_type.as_str());
    }
    info!(files = inputs.len(), "preparing");

    let planned: Vec<Planned> = if cfg.fail_fast {
        inputs
            .iter()
            .map(|input| prepare_file(input, cfg).map(Ok))
            .collect::<Result<Vec<_>>>()?
    } else {
        inputs
            .par_iter()
            .map(|input| prepare_file(input, cfg).map_err(|e| failure(input, e)))
            .collect()
    };

    let avg = if cfg.fit.enabled && cfg.test_type.uses_fit() {
        average_fit_output(folder, &planned)
    } else {
        None
    };
    check_output_names(folder, &planned, avg.as_ref())?;

    let out_dir = cfg.output_dir_for(folder);
    fs::create_dir_all(&out_dir)
        .with_context(|| format!("creating output directory {}", out_dir.display()))?;
    info!(out_dir = %out_dir.display(), "writing");

    let files: Vec<FileOutcome> = if cfg.fail_fast {
        planned
            .into_iter()
            .map(|p| match p {
                Ok(file) => write_file(&file, &out_dir),
                Err(outcome) => Ok(outcome),
            })
            .collect::<Result<Vec<_>>>()?
    } else {
        planned
            .into_par_iter()
            .map(|p| match p {
                Ok(file) => write_file(&file, &out_dir).unwrap_or_else(|e| failure(&file.input, e)),
                Err(outcome) => outcome,
            })
            .collect()
    };

    let avg_fit = match avg {
        Some(output) => {
            let path = out_dir.join(&output.file_name);
            write_table(&path, &output.table)?;
            Some(path)
        }
        None => None,
    };

    let summary = RunSummary {
        folder: folder.to_path_buf(),
        output_dir: out_dir,
        test_type: cfg.test_type,
        started_at,
        finished_at: Utc::now(),
        files,
        avg_fit,
    };
    info!(
        converted = summary.converted(),
        failed = summary.failed(),
        outputs = summary.outputs_written(),
        elapsed = ?start.elapsed(),
        "run complete"
    );
    Ok(summary)
}

fn failure(input: &Path, err: anyhow::Error) -> FileOutcome {
    error!(file = %input.display(), "conversion failed: {:#}", err);
    FileOutcome::failed(input, &err)
}

/// Parse and normalize one export.
#[instrument(level = "debug", skip(input, cfg), fields(file = %input.display()))]
fn prepare_file(input: &Path, cfg: &Config) -> Result<PreparedFile> {
    let parsed = parse_file(input, cfg.test_type)?;
    let normalized = normalize_file(&parsed, cfg)?;
    Ok(PreparedFile {
        input: input.to_path_buf(),
        blocks: parsed.blocks.len(),
        rows: parsed.total_rows(),
        outputs: normalized.outputs,
        sweep: normalized.sweep,
    })
}

/// Write the outputs of one prepared file into `out_dir`.
#[instrument(level = "info", skip(file, out_dir), fields(file = %file.input.display()))]
fn write_file(file: &PreparedFile, out_dir: &Path) -> Result<FileOutcome> {
    let mut written = Vec::with_capacity(file.outputs.len());
    let mut bytes = 0;
    for output in &file.outputs {
        let path = out_dir.join(&output.file_name);
        bytes += write_table(&path, &output.table)?;
        written.push(path);
    }
    info!(
        blocks = file.blocks,
        rows = file.rows,
        outputs = written.len(),
        "converted"
    );

    Ok(FileOutcome {
        input: file.input.clone(),
        outputs: written,
        blocks: file.blocks,
        rows: file.rows,
        bytes,
        error: None,
    })
}

/// The averaged fit of every prepared sweep, named after the folder.
/// Sweeps that cannot be averaged are logged and skipped.
fn average_fit_output(folder: &Path, planned: &[Planned]) -> Option<NormalizedOutput> {
    let sweeps: Vec<&Sweep> = planned
        .iter()
        .flatten()
        .filter_map(|file| file.sweep.as_ref())
        .collect();
    if sweeps.len() < 2 {
        return None;
    }

    match avg_fit(&sweeps) {
        Ok(avg) => {
            let name = format!("{}_avg_fit.csv", folder_label(folder));
            avg.log_fit(&name);
            Some(NormalizedOutput {
                file_name: name,
                table: fit_table(&avg),
            })
        }
        Err(e) => {
            warn!(sweeps = sweeps.len(), "no averaged fit: {}", e);
            None
        }
    }
}

fn folder_label(folder: &Path) -> String {
    folder
        .canonicalize()
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "sweeps".to_string())
}

/// Fail when two planned outputs would be written under the same name.
fn check_output_names(
    folder: &Path,
    planned: &[Planned],
    avg: Option<&NormalizedOutput>,
) -> Result<()> {
    let mut owners: HashMap<&str, &Path> = HashMap::new();
    let sources = planned
        .iter()
        .flatten()
        .flat_map(|file| file.outputs.iter().map(move |o| (o, file.input.as_path())))
        .chain(avg.map(|o| (o, folder)));

    for (output, source) in sources {
        if let Some(other) = owners.insert(output.file_name.as_str(), source) {
            bail!(
                "output {} would be written for both {} and {}",
                output.file_name,
                other.display(),
                source.display()
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FitOptions, MultiRawLayout, OUTPUT_DIR_NAME};
    use crate::test_support::{init_test_logging, write_fixture, MULTI, RAW_GATE, RAW_IV};
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn config(test_type: TestType) -> Config {
        Config {
            test_type,
            ..Config::default()
        }
    }

    fn read_outputs(dir: &Path) -> BTreeMap<String, String> {
        fs::read_dir(dir)
            .unwrap()
            .map(|e| {
                let p = e.unwrap().path();
                (
                    p.file_name().unwrap().to_string_lossy().into_owned(),
                    fs::read_to_string(&p).unwrap(),
                )
            })
            .collect()
    }

    #[test]
    fn test_raw_folder_one_output_per_input() -> Result<()> {
        init_test_logging();
        let dir = tempdir()?;
        write_fixture(dir.path(), "dev1.csv", RAW_IV);
        write_fixture(dir.path(), "dev2.csv", RAW_GATE);
        write_fixture(dir.path(), "readme.txt", "not an export");

        let summary = convert_folder(dir.path(), &config(TestType::Raw))?;
        assert_eq!(summary.converted(), 2);
        assert_eq!(summary.failed(), 0);
        assert_eq!(summary.output_dir, dir.path().join(OUTPUT_DIR_NAME));

        let outputs = read_outputs(&summary.output_dir);
        assert_eq!(
            outputs.keys().collect::<Vec<_>>(),
            vec!["dev1.csv", "dev2.csv"]
        );
        assert!(outputs["dev2.csv"].starts_with("GateV,DrainI,DrainV\n-2.0,6.35e-6,0.1\n"));
        assert_eq!(summary.files[0].rows, 5);
        assert_eq!(summary.files[0].outputs, vec![summary.output_dir.join("dev1.csv")]);
        Ok(())
    }

    #[test]
    fn test_rerun_is_idempotent() -> Result<()> {
        let dir = tempdir()?;
        write_fixture(dir.path(), "a.csv", MULTI);
        write_fixture(dir.path(), "b.csv", RAW_IV);
        let cfg = config(TestType::MultiRaw);

        let first = convert_folder(dir.path(), &cfg)?;
        let before = read_outputs(&first.output_dir);
        let second = convert_folder(dir.path(), &cfg)?;
        assert_eq!(read_outputs(&second.output_dir), before);
        assert_eq!(before.len(), 2);
        Ok(())
    }

    #[test]
    fn test_fit_option_does_not_change_raw_outputs() -> Result<()> {
        for test_type in [TestType::Raw, TestType::MultiRaw] {
            let dir = tempdir()?;
            write_fixture(dir.path(), "a.csv", RAW_IV);
            let plain = convert_folder(dir.path(), &config(test_type))?;
            let before = read_outputs(&plain.output_dir);

            let cfg = Config {
                fit: FitOptions { enabled: true },
                ..config(test_type)
            };
            let fitted = convert_folder(dir.path(), &cfg)?;
            assert_eq!(read_outputs(&fitted.output_dir), before);
        }
        Ok(())
    }

    #[test]
    fn test_split_layout_writes_one_file_per_block() -> Result<()> {
        let dir = tempdir()?;
        write_fixture(dir.path(), "m.csv", MULTI);
        let cfg = Config {
            layout: MultiRawLayout::Split,
            ..config(TestType::MultiRaw)
        };
        let summary = convert_folder(dir.path(), &cfg)?;
        assert_eq!(summary.files[0].blocks, 2);
        assert_eq!(summary.outputs_written(), 2);
        assert_eq!(
            read_outputs(&summary.output_dir).keys().collect::<Vec<_>>(),
            vec!["m_block1.csv", "m_block2.csv"]
        );
        Ok(())
    }

    #[test]
    fn test_mixed_folder_fails_per_file() -> Result<()> {
        let dir = tempdir()?;
        write_fixture(dir.path(), "good.csv", RAW_IV);
        write_fixture(dir.path(), "multi.csv", MULTI);

        let summary = convert_folder(dir.path(), &config(TestType::Raw))?;
        assert_eq!(summary.converted(), 1);
        assert_eq!(summary.failed(), 1);
        let bad = &summary.files[1];
        assert_eq!(bad.input, dir.path().join("multi.csv"));
        assert!(bad.error.as_deref().unwrap().contains("multi-raw"));
        assert!(summary.output_dir.join("good.csv").exists());
        assert!(!summary.output_dir.join("multi.csv").exists());
        Ok(())
    }

    #[test]
    fn test_fail_fast_returns_first_error() -> Result<()> {
        let dir = tempdir()?;
        write_fixture(dir.path(), "multi.csv", MULTI);
        let cfg = Config {
            fail_fast: true,
            ..config(TestType::Raw)
        };
        let err = convert_folder(dir.path(), &cfg).unwrap_err();
        assert!(format!("{:#}", err).contains("DataName rows at lines 5 and 11"));
        Ok(())
    }

    #[test]
    fn test_fail_fast_reports_first_failure_in_order() -> Result<()> {
        let dir = tempdir()?;
        write_fixture(dir.path(), "a_good.csv", RAW_IV);
        write_fixture(dir.path(), "b_multi.csv", MULTI);
        write_fixture(dir.path(), "c_empty.csv", "SetupTitle,Nothing\n");
        write_fixture(dir.path(), "d_good.csv", RAW_GATE);
        let cfg = Config {
            fail_fast: true,
            ..config(TestType::Raw)
        };

        for _ in 0..5 {
            let err = format!("{:#}", convert_folder(dir.path(), &cfg).unwrap_err());
            assert!(err.contains("b_multi.csv"), "{}", err);
            assert!(!err.contains("c_empty.csv"), "{}", err);
        }
        // nothing is written once a file fails
        assert!(!dir.path().join(OUTPUT_DIR_NAME).exists());
        Ok(())
    }

    #[test]
    fn test_colliding_output_names_fail_the_run() -> Result<()> {
        let dir = tempdir()?;
        write_fixture(dir.path(), "a.csv", RAW_GATE);
        write_fixture(dir.path(), "a_fit.csv", RAW_GATE);
        let cfg = Config {
            fit: FitOptions { enabled: true },
            ..config(TestType::GateSweep)
        };

        let err = convert_folder(dir.path(), &cfg).unwrap_err();
        assert!(err.to_string().contains("output a_fit.csv would be written for both"));
        assert!(!dir.path().join(OUTPUT_DIR_NAME).exists());

        // without fit curves the same folder converts cleanly
        let summary = convert_folder(dir.path(), &config(TestType::GateSweep))?;
        assert_eq!(summary.converted(), 2);
        Ok(())
    }

    #[test]
    fn test_averaged_fit_over_matching_sweeps() -> Result<()> {
        let dir = tempdir()?;
        write_fixture(dir.path(), "g1.csv", RAW_GATE);
        write_fixture(dir.path(), "g2.csv", RAW_GATE);
        let cfg = Config {
            fit: FitOptions { enabled: true },
            ..config(TestType::GateSweep)
        };

        let summary = convert_folder(dir.path(), &cfg)?;
        let avg = summary.avg_fit.clone().unwrap();
        assert!(avg.to_string_lossy().ends_with("_avg_fit.csv"));
        assert_eq!(avg.parent(), Some(summary.output_dir.as_path()));
        assert_eq!(summary.outputs_written(), 5);

        let outputs = read_outputs(&summary.output_dir);
        let name = avg.file_name().unwrap().to_string_lossy().into_owned();
        // identical sweeps average to the same curve as each one alone
        assert_eq!(outputs[&name], outputs["g1_fit.csv"]);
        Ok(())
    }

    #[test]
    fn test_mismatched_sweeps_skip_averaged_fit() -> Result<()> {
        let dir = tempdir()?;
        write_fixture(dir.path(), "long.csv", RAW_IV);
        write_fixture(
            dir.path(),
            "short.csv",
            "DataName,DrainV,DrainI\nDataValue,0,0\nDataValue,1,1E-05\nDataValue,2,2E-05\n",
        );
        let cfg = Config {
            fit: FitOptions { enabled: true },
            ..config(TestType::IvSweep)
        };

        let summary = convert_folder(dir.path(), &cfg)?;
        assert_eq!(summary.converted(), 2);
        assert!(summary.avg_fit.is_none());
        assert_eq!(read_outputs(&summary.output_dir).len(), 4);

        // no averaged fit without the fit option
        let summary = convert_folder(dir.path(), &config(TestType::IvSweep))?;
        assert!(summary.avg_fit.is_none());
        Ok(())
    }

    #[test]
    fn test_empty_folder_is_an_error() -> Result<()> {
        let dir = tempdir()?;
        let err = convert_folder(dir.path(), &config(TestType::Raw)).unwrap_err();
        assert!(err.to_string().contains("no CSV files found"));
        assert!(!dir.path().join(OUTPUT_DIR_NAME).exists());
        Ok(())
    }

    #[test]
    fn test_gate_sweep_with_fit_and_json_summary() -> Result<()> {
        let dir = tempdir()?;
        write_fixture(dir.path(), "g.csv", RAW_GATE);
        let cfg = Config {
            fit: FitOptions { enabled: true },
            ..config(TestType::GateSweep)
        };
        let summary = convert_folder(dir.path(), &cfg)?;
        let outputs = read_outputs(&summary.output_dir);
        assert!(outputs["g.csv"].starts_with("Volts (V),Current (A)\n"));
        assert!(outputs["g_fit.csv"].starts_with("Volts (V),Fit Current (A)\n"));

        let json = serde_json::to_value(&summary)?;
        assert_eq!(json["test_type"], "gate-sweep");
        assert_eq!(json["files"][0]["outputs"].as_array().unwrap().len(), 2);
        // a single sweep has nothing to average with
        assert!(json["avg_fit"].is_null());
        assert!(json["files"][0]["error"].is_null());
        Ok(())
    }

    #[test]
    fn test_custom_output_dir() -> Result<()> {
        let dir = tempdir()?;
        write_fixture(dir.path(), "a.csv", RAW_IV);
        let cfg = Config {
            output_dir: "normalized".into(),
            ..config(TestType::Raw)
        };
        let summary = convert_folder(dir.path(), &cfg)?;
        assert!(dir.path().join("normalized").join("a.csv").exists());
        assert_eq!(summary.outputs_written(), 1);
        Ok(())
    }
}
