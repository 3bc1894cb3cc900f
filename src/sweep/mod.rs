use thiserror::Error;
use tracing::{debug, info};

use crate::parse::MeasurementBlock;
use crate::units::UnitPrefix;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SweepError {
    #[error("column '{0}' not found")]
    MissingColumn(String),

    #[error("column '{column}' has no numeric value in data row {row}")]
    MissingValue { column: String, row: usize },

    #[error("a degree {degree} fit needs at least {needed} points, got {got}")]
    NotEnoughPoints {
        degree: usize,
        needed: usize,
        got: usize,
    },

    #[error("fit is singular; the voltage column does not vary")]
    SingularFit,

    #[error("no sweeps to average")]
    NoSweeps,

    #[error("sweep {index} has {got} points, the first sweep has {expected}")]
    LengthMismatch {
        index: usize,
        expected: usize,
        got: usize,
    },

    #[error("sweep {index} does not share the first sweep's voltage axis")]
    AxisMismatch { index: usize },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SweepKind {
    /// Drain current vs drain voltage, fitted with a line.
    Iv,
    /// Drain current vs gate voltage, fitted with a parabola.
    Gate,
}

impl SweepKind {
    pub fn degree(&self) -> usize {
        match self {
            SweepKind::Iv => 1,
            SweepKind::Gate => 2,
        }
    }
}

/// Which series a unit change applies to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Quantity {
    Voltage,
    Current,
}

/// Polynomial coefficients, highest power first.
#[derive(Clone, Debug, PartialEq)]
pub struct Fit {
    pub coeffs: Vec<f64>,
}

impl Fit {
    pub fn eval(&self, x: f64) -> f64 {
        self.coeffs.iter().fold(0.0, |acc, c| acc * x + c)
    }

    /// 1 / slope of a linear fit, in ohms.
    pub fn resistance(&self) -> Option<f64> {
        match self.coeffs.as_slice() {
            [slope, _] => Some(1.0 / slope),
            _ => None,
        }
    }

    /// Vertex voltage of a quadratic fit.
    pub fn dirac_point(&self) -> Option<f64> {
        match self.coeffs.as_slice() {
            [a, b, _] => Some(-b / (2.0 * a)),
            _ => None,
        }
    }
}

/// Least-squares polynomial fit of `y` against `x`.
pub fn polyfit(x: &[f64], y: &[f64], degree: usize) -> Result<Fit, SweepError> {
    let n = degree + 1;
    let points = x.len().min(y.len());
    if points < n {
        return Err(SweepError::NotEnoughPoints {
            degree,
            needed: n,
            got: points,
        });
    }

    // normal equations, powers ascending
    let mut ata = vec![vec![0.0; n]; n];
    let mut aty = vec![0.0; n];
    let mut powers = vec![1.0; 2 * n - 1];
    for (&xi, &yi) in x.iter().zip(y) {
        for k in 1..powers.len() {
            powers[k] = powers[k - 1] * xi;
        }
        for r in 0..n {
            aty[r] += powers[r] * yi;
            for c in 0..n {
                ata[r][c] += powers[r + c];
            }
        }
    }

    let mut coeffs = solve(ata, aty)?;
    coeffs.reverse();
    Ok(Fit { coeffs })
}

/// Gaussian elimination with partial pivoting.
fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Result<Vec<f64>, SweepError> {
    let n = b.len();
    let norm = a
        .iter()
        .flatten()
        .fold(0.0_f64, |m, v| m.max(v.abs()));
    let tolerance = norm * 1e-12;

    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))
            .unwrap_or(col);
        if a[pivot][col].abs() <= tolerance {
            return Err(SweepError::SingularFit);
        }
        a.swap(col, pivot);
        b.swap(col, pivot);

        for row in col + 1..n {
            let factor = a[row][col] / a[col][col];
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut out = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[row][k] * out[k]).sum();
        out[row] = (b[row] - tail) / a[row][row];
    }
    Ok(out)
}

/// One voltage/current sweep. Values are stored in base units; the unit
/// prefixes only affect what the accessors return.
#[derive(Clone, Debug)]
pub struct Sweep {
    pub kind: SweepKind,
    volts: Vec<f64>,
    current: Vec<f64>,
    pub volt_units: UnitPrefix,
    pub current_units: UnitPrefix,
    pub fit: Fit,
}

impl Sweep {
    pub fn from_block(
        block: &MeasurementBlock,
        kind: SweepKind,
        volt_col: &str,
        curr_col: &str,
    ) -> Result<Self, SweepError> {
        let volts = required_column(block, volt_col)?;
        let current = required_column(block, curr_col)?;
        let fit = polyfit(&volts, &current, kind.degree())?;
        debug!(?kind, points = volts.len(), coeffs = ?fit.coeffs, "fitted sweep");

        Ok(Self {
            kind,
            volts,
            current,
            volt_units: UnitPrefix::default(),
            current_units: UnitPrefix::default(),
            fit,
        })
    }

    pub fn len(&self) -> usize {
        self.volts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.volts.is_empty()
    }

    pub fn change_units(&mut self, quantity: Quantity, prefix: UnitPrefix) {
        match quantity {
            Quantity::Voltage => self.volt_units = prefix,
            Quantity::Current => self.current_units = prefix,
        }
    }

    pub fn volts(&self) -> Vec<f64> {
        self.volts.iter().map(|v| self.volt_units.scale(*v)).collect()
    }

    pub fn current(&self) -> Vec<f64> {
        self.current
            .iter()
            .map(|i| self.current_units.scale(*i))
            .collect()
    }

    pub fn resistance(&self) -> Option<f64> {
        self.fit.resistance()
    }

    pub fn dirac_point(&self) -> Option<f64> {
        self.fit.dirac_point()
    }

    /// Log the fit parameter that matters for this kind of sweep.
    pub fn log_fit(&self, source: &str) {
        match self.kind {
            SweepKind::Iv => info!(source, resistance_ohm = ?self.resistance(), "linear fit"),
            SweepKind::Gate => info!(source, dirac_v = ?self.dirac_point(), "quadratic fit"),
        }
    }

    /// Fit curve sampled at as many points as the sweep, from the first
    /// voltage towards the last with step `(last - first) / n`. Sweeps that
    /// return to their start voltage are sampled over `[min, max]` instead.
    /// Returned in the current display units.
    pub fn fit_curve(&self) -> (Vec<f64>, Vec<f64>) {
        let n = self.volts.len();
        let (Some(&first), Some(&last)) = (self.volts.first(), self.volts.last()) else {
            return (Vec::new(), Vec::new());
        };
        let (start, stop) = if first != last {
            (first, last)
        } else {
            let min = self.volts.iter().copied().fold(f64::INFINITY, f64::min);
            let max = self.volts.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            (min, max)
        };
        let step = (stop - start) / n as f64;

        (0..n)
            .map(|k| {
                let v = start + k as f64 * step;
                (
                    self.volt_units.scale(v),
                    self.current_units.scale(self.fit.eval(v)),
                )
            })
            .unzip()
    }

    pub fn volt_header(&self) -> String {
        format!("Volts ({}V)", self.volt_units)
    }

    pub fn current_header(&self) -> String {
        format!("Current ({}A)", self.current_units)
    }

    pub fn fit_current_header(&self) -> String {
        format!("Fit Current ({}A)", self.current_units)
    }
}

/// Average the current of several sweeps point by point and fit the mean.
///
/// Every sweep must have the first sweep's length and voltage axis. The
/// result keeps the first sweep's kind and display units, so its
/// `fit_curve` samples the averaged fit the same way a single sweep would.
pub fn avg_fit(sweeps: &[&Sweep]) -> Result<Sweep, SweepError> {
    let Some(first) = sweeps.first() else {
        return Err(SweepError::NoSweeps);
    };
    for (idx, sweep) in sweeps.iter().enumerate().skip(1) {
        if sweep.len() != first.len() {
            return Err(SweepError::LengthMismatch {
                index: idx + 1,
                expected: first.len(),
                got: sweep.len(),
            });
        }
        if !same_axis(&first.volts, &sweep.volts) {
            return Err(SweepError::AxisMismatch { index: idx + 1 });
        }
    }

    let count = sweeps.len() as f64;
    let current: Vec<f64> = (0..first.len())
        .map(|k| sweeps.iter().map(|s| s.current[k]).sum::<f64>() / count)
        .collect();
    let fit = polyfit(&first.volts, &current, first.kind.degree())?;
    debug!(sweeps = sweeps.len(), coeffs = ?fit.coeffs, "fitted averaged sweep");

    Ok(Sweep {
        kind: first.kind,
        volts: first.volts.clone(),
        current,
        volt_units: first.volt_units,
        current_units: first.current_units,
        fit,
    })
}

fn same_axis(a: &[f64], b: &[f64]) -> bool {
    a.iter()
        .zip(b)
        .all(|(x, y)| (x - y).abs() <= 1e-9 * x.abs().max(y.abs()).max(1e-12))
}

fn required_column(block: &MeasurementBlock, name: &str) -> Result<Vec<f64>, SweepError> {
    let values = block
        .column(name)
        .ok_or_else(|| SweepError::MissingColumn(name.to_string()))?;
    values
        .into_iter()
        .enumerate()
        .map(|(row, v)| {
            v.ok_or_else(|| SweepError::MissingValue {
                column: name.to_string(),
                row: row + 1,
            })
        })
        .collect()
}
