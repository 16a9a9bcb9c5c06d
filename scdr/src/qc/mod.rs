//! Detection of low-quality cells.
//!
//! Each cell is described by five quality-control metrics (see [`metrics::QcMatrix`]).
//! A robust location and covariance of the metric cloud is estimated with the minimum
//! covariance determinant ([`mcd::MinCovDet`]). Cells whose Mahalanobis distance to the
//! robust location is more than `sd_threshold` standard deviations away from the mean
//! distance, on either side, are flagged.

use crate::error::ScdrError;
use crate::matrix::ExpressionMatrix;
use crate::stats::mean_sd;
use anyhow::Error;
use log::{debug, info};
use ndarray::{Array1, ArrayView1};

/// Minimum covariance determinant estimator
pub mod mcd;

/// Quality-control metrics
pub mod metrics;

use mcd::{McdParams, MinCovDet};
use metrics::QcMatrix;

/// Settings of the low-quality cell detector
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct QcParams {
    /// Number of standard deviations away from the mean distance for a cell to be flagged
    pub sd_threshold: f64,
    /// Seed of the covariance estimator
    pub seed: u64,
}

impl QcParams {
    /// New detector settings with default values
    pub fn new() -> QcParams {
        QcParams {
            sd_threshold: 3.0,
            seed: 42,
        }
    }
}

impl Default for QcParams {
    fn default() -> Self {
        Self::new()
    }
}

/// Cells flagged by the two-sided outlier rule and the bounds used
#[derive(Clone, Debug, PartialEq)]
pub struct Outliers {
    /// mean of the values
    pub mean: f64,
    /// population standard deviation of the values
    pub sd: f64,
    /// values below this are flagged
    pub lower: f64,
    /// values above this are flagged
    pub upper: f64,
    /// positions of the flagged values, in order
    pub flagged: Vec<usize>,
}

/// Flag the values outside `mean +/- sd_threshold * sd`.
pub fn two_sided_outliers(values: ArrayView1<f64>, sd_threshold: f64) -> Result<Outliers, Error> {
    if !(sd_threshold.is_finite() && sd_threshold >= 0.0) {
        return Err(ScdrError::invalid(format!(
            "sd threshold must be a non-negative number, got {sd_threshold}"
        ))
        .into());
    }

    let (mean, sd) = mean_sd(&values);
    let lower = mean - sd_threshold * sd;
    let upper = mean + sd_threshold * sd;
    let flagged = values
        .iter()
        .enumerate()
        .filter(|(_, v)| **v < lower || **v > upper)
        .map(|(i, _)| i)
        .collect();

    Ok(Outliers {
        mean,
        sd,
        lower,
        upper,
        flagged,
    })
}

/// Everything computed by [`detect_low_quality_cells`]
#[derive(Clone, Debug)]
pub struct QcReport {
    /// Per-cell metrics the detector ran on
    pub metrics: QcMatrix,
    /// Squared Mahalanobis distance of each cell to the robust location
    pub distances: Array1<f64>,
    /// Outlier rule applied to `distances`
    pub outliers: Outliers,
    /// Identifiers of the flagged cells, in matrix order
    pub low_quality_cells: Vec<String>,
}

fn require<'a>(
    sub: Option<&'a ExpressionMatrix>,
    step: &'static str,
    what: &str,
) -> Result<&'a ExpressionMatrix, ScdrError> {
    match sub {
        Some(m) if !m.is_empty() => Ok(m),
        _ => Err(ScdrError::precondition(step, format!("No {what} genes found."))),
    }
}

/// Flag low-quality cells of `exp` from their read depth, detected genes and the fraction
/// of reads that go to rRNA genes, mitochondrial genes and ERCC spikes. Nothing is removed.
pub fn detect_low_quality_cells(
    exp: &ExpressionMatrix,
    mito: Option<&ExpressionMatrix>,
    ercc: Option<&ExpressionMatrix>,
    rrna: &[String],
    params: &QcParams,
) -> Result<QcReport, Error> {
    let mito = require(mito, "detect_mito", "mitochondrial")?;
    let ercc = require(ercc, "detect_ercc", "ERCC spike-in")?;

    let metrics = QcMatrix::compute(exp, mito, ercc, rrna)?;

    let mcd = MinCovDet::fit(metrics.values(), &McdParams::with_seed(params.seed))?;
    for w in &mcd.warnings {
        debug!("mcd: {}", w);
    }
    let distances = mcd.mahalanobis(metrics.values());

    let outliers = two_sided_outliers(distances.view(), params.sd_threshold)?;
    let low_quality_cells: Vec<String> = outliers
        .flagged
        .iter()
        .map(|&i| metrics.cells()[i].clone())
        .collect();
    info!(
        "{} low quality cell(s) detected, distance outside [{:.3}, {:.3}]",
        low_quality_cells.len(),
        outliers.lower,
        outliers.upper
    );

    Ok(QcReport {
        metrics,
        distances,
        outliers,
        low_quality_cells,
    })
}
