use anyhow::{Context, Result};
use b1500conv::{
    config::{Config, MultiRawLayout, TestType},
    pipeline::convert_folder,
    units::UnitPrefix,
};
use clap::Parser;
use std::{path::PathBuf, process::ExitCode};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Convert Keysight B1500A CSV exports into normalized CSV files"
)]
struct Args {
    /// Folder holding the exported CSV files
    folder: PathBuf,

    /// YAML file with defaults for every option below
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(short, long, value_enum)]
    test_type: Option<TestType>,

    /// How multi-raw blocks are written
    #[arg(long, value_enum)]
    layout: Option<MultiRawLayout>,

    /// Write fit curves for sweep test types (ignored for raw types)
    #[arg(long)]
    fit: bool,

    /// Unit prefix for sweep voltages (p, n, u, m, k, M, G)
    #[arg(long)]
    volt_unit: Option<UnitPrefix>,

    /// Unit prefix for sweep currents (p, n, u, m, k, M, G)
    #[arg(long)]
    current_unit: Option<UnitPrefix>,

    /// Name of the output folder created inside FOLDER
    #[arg(long)]
    output_dir: Option<String>,

    /// Stop at the first file that fails
    #[arg(long)]
    fail_fast: bool,

    /// Print the run summary as JSON
    #[arg(long)]
    json: bool,
}

impl Args {
    fn into_config(self) -> Result<(PathBuf, Config, bool)> {
        let mut cfg = match &self.config {
            Some(path) => Config::from_yaml_file(path)?,
            None => Config::default(),
        };
        if let Some(t) = self.test_type {
            cfg.test_type = t;
        }
        if let Some(l) = self.layout {
            cfg.layout = l;
        }
        if self.fit {
            cfg.fit.enabled = true;
        }
        if let Some(p) = self.volt_unit {
            cfg.units.volt = p;
        }
        if let Some(p) = self.current_unit {
            cfg.units.current = p;
        }
        if let Some(d) = self.output_dir {
            cfg.output_dir = d;
        }
        if self.fail_fast {
            cfg.fail_fast = true;
        }
        cfg.validate()?;
        Ok((self.folder, cfg, self.json))
    }
}

fn main() -> Result<ExitCode> {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_span_events(fmt::format::FmtSpan::CLOSE)
        .with_writer(std::io::stderr)
        .init();

    let (folder, cfg, json) = Args::parse().into_config()?;
    info!(folder = %folder.display(), test_type = cfg.test_type.as_str(), "startup");

    let summary = convert_folder(&folder, &cfg)?;
    if json {
        let out = serde_json::to_string_pretty(&summary).context("serializing run summary")?;
        println!("{}", out);
    }

    if summary.failed() > 0 {
        for f in summary.files.iter().filter(|f| !f.is_ok()) {
            warn!(
                file = %f.input.display(),
                error = f.error.as_deref().unwrap_or_default(),
                "not converted"
            );
        }
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}
