//! Minimum Covariance Determinant estimator, computed with FastMCD
//! (Rousseeuw & Van Driessen, 1999).
//!
//! The estimate is the location and covariance of the `h` observations whose covariance
//! has the smallest determinant. FastMCD draws random `h`-subsets and improves each with
//! concentration steps (C-steps): estimate location and covariance on the subset, then
//! take the `h` observations closest to it in Mahalanobis distance. Each C-step cannot
//! increase the determinant. The raw estimate is then rescaled for consistency at the
//! normal model and reweighted using the observations it does not consider outliers.

use crate::error::ScdrError;
use crate::stats::median_f64;
use anyhow::{format_err, Error};
use log::debug;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use ndarray_linalg::{Eigh, UPLO};
use rand::SeedableRng;
use rand_pcg::Pcg64Mcg;
use statrs::distribution::{ChiSquared, ContinuousCDF};

/// FastMCD settings
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct McdParams {
    /// Seed for drawing the initial subsets
    pub seed: u64,
    /// Fraction of the observations in the support. `None` uses `(n + p + 1) / 2`
    /// observations, the maximal breakdown point.
    pub support_fraction: Option<f64>,
    /// Number of random initial subsets
    pub n_trials: usize,
    /// Number of candidates refined until convergence
    pub n_best: usize,
    /// Maximum number of C-steps when refining a candidate
    pub max_c_steps: usize,
}

impl McdParams {
    /// New FastMCD settings with default values
    pub fn new() -> McdParams {
        McdParams {
            seed: 42,
            support_fraction: None,
            n_trials: 30,
            n_best: 10,
            max_c_steps: 30,
        }
    }

    /// Default settings with the given seed
    pub fn with_seed(seed: u64) -> McdParams {
        McdParams { seed, ..McdParams::new() }
    }

    fn support_size(&self, n: usize, p: usize) -> Result<usize, ScdrError> {
        let h = match self.support_fraction {
            None => (n + p + 2) / 2,
            Some(f) if f > 0.0 && f <= 1.0 => (f * n as f64) as usize,
            Some(f) => {
                return Err(ScdrError::invalid(format!(
                    "support fraction must be in (0, 1], got {f}"
                )))
            }
        };
        if h <= p {
            return Err(ScdrError::invalid(format!(
                "support of {h} observations is too small for {p} dimensions"
            )));
        }
        Ok(h.min(n))
    }
}

impl Default for McdParams {
    fn default() -> Self {
        Self::new()
    }
}

/// Fitted robust location and covariance
#[derive(Clone, Debug)]
pub struct MinCovDet {
    /// Reweighted location
    pub location: Array1<f64>,
    /// Reweighted covariance
    pub covariance: Array2<f64>,
    /// Pseudo-inverse of `covariance`
    pub precision: Array2<f64>,
    /// Observations used for the reweighted estimate
    pub support: Vec<bool>,
    /// Location of the best `h`-subset
    pub raw_location: Array1<f64>,
    /// Covariance of the best `h`-subset, after the consistency correction
    pub raw_covariance: Array2<f64>,
    /// Squared Mahalanobis distance of every training observation to `location`
    pub distances: Array1<f64>,
    /// Numerical diagnostics collected during the fit
    pub warnings: Vec<String>,
}

/// A C-step state: estimate on one `h`-subset
struct Candidate {
    location: Array1<f64>,
    covariance: Array2<f64>,
    log_det: f64,
    dist: Array1<f64>,
}

impl Candidate {
    fn new(x: ArrayView2<f64>, support: &[usize]) -> Result<Candidate, Error> {
        let (location, covariance) = location_covariance(x, support)?;
        let (log_det, precision) = log_det_pinv(&covariance)?;
        let dist = mahalanobis(x, location.view(), &precision);
        Ok(Candidate {
            location,
            covariance,
            log_det,
            dist,
        })
    }
}

/// Mean and biased covariance of the rows `support` of `x`
fn location_covariance(x: ArrayView2<f64>, support: &[usize]) -> Result<(Array1<f64>, Array2<f64>), Error> {
    let sub = x.select(Axis(0), support);
    let location = sub
        .mean_axis(Axis(0))
        .ok_or_else(|| format_err!("empty support"))?;
    let centered = &sub - &location;
    let covariance = centered.t().dot(&centered) / support.len() as f64;
    Ok((location, covariance))
}

/// Eigenvalues at or below this are treated as zero
fn eig_cutoff(eig: &Array1<f64>) -> f64 {
    let max = eig.iter().fold(0.0f64, |m, v| m.max(v.abs()));
    max * eig.len() as f64 * f64::EPSILON
}

/// `(log det, pseudo-inverse)` of a symmetric positive semi-definite matrix.
/// The log-determinant of a singular matrix is `-inf`.
fn log_det_pinv(a: &Array2<f64>) -> Result<(f64, Array2<f64>), Error> {
    let (eig, vecs) = a.eigh(UPLO::Lower)?;
    let cutoff = eig_cutoff(&eig);

    let singular = eig.iter().any(|&e| e <= cutoff);
    let log_det = if singular {
        f64::NEG_INFINITY
    } else {
        eig.iter().map(|e| e.ln()).sum()
    };

    let inv = eig.mapv(|e| if e > cutoff { 1.0 / e } else { 0.0 });
    let pinv = (&vecs * &inv).dot(&vecs.t());
    Ok((log_det, pinv))
}

/// Rank of a symmetric positive semi-definite matrix
fn rank(a: &Array2<f64>) -> Result<usize, Error> {
    let (eig, _) = a.eigh(UPLO::Lower)?;
    let cutoff = eig_cutoff(&eig);
    Ok(eig.iter().filter(|&&e| e > cutoff).count())
}

/// Squared Mahalanobis distance of the rows of `x` to `location`
fn mahalanobis(x: ArrayView2<f64>, location: ArrayView1<f64>, precision: &Array2<f64>) -> Array1<f64> {
    let centered = &x - &location;
    (&centered.dot(precision) * &centered).sum_axis(Axis(1))
}

/// Indices of the `h` smallest values
fn smallest(dist: &Array1<f64>, h: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..dist.len()).collect();
    order.sort_by(|&a, &b| dist[a].total_cmp(&dist[b]));
    order.truncate(h);
    order
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-8 + 1e-5 * b.abs()
}

/// Run C-steps from the subset `support` until the determinant stops decreasing or
/// `max_steps` is exhausted.
fn c_step(
    x: ArrayView2<f64>,
    support: &[usize],
    h: usize,
    max_steps: usize,
    warnings: &mut Vec<String>,
) -> Result<Candidate, Error> {
    let mut current = Candidate::new(x, support)?;
    let mut previous: Option<Candidate> = None;
    let mut remaining = max_steps;

    while remaining > 0
        && current.log_det.is_finite()
        && previous.as_ref().map_or(true, |p| current.log_det < p.log_det)
    {
        let next = Candidate::new(x, &smallest(&current.dist, h))?;
        previous = Some(std::mem::replace(&mut current, next));
        remaining -= 1;
    }

    let Some(previous) = previous else {
        return Ok(current);
    };
    if !current.log_det.is_finite() || close(current.log_det, previous.log_det) {
        return Ok(current);
    }
    if current.log_det > previous.log_det {
        warnings.push(format!(
            "Determinant has increased; this should not happen: log(det) > log(previous_det) ({:.15} > {:.15}).",
            current.log_det, previous.log_det
        ));
        return Ok(previous);
    }
    if remaining == 0 {
        debug!("mcd: maximum number of C-steps reached");
    }
    Ok(current)
}

impl MinCovDet {
    /// Fit the estimator to the rows of `x` (observations x features).
    pub fn fit(x: ArrayView2<f64>, params: &McdParams) -> Result<MinCovDet, Error> {
        let (n, p) = x.dim();
        if p == 0 || n <= p {
            return Err(ScdrError::invalid(format!(
                "robust covariance needs more observations than features, got {n} x {p}"
            ))
            .into());
        }
        if params.n_trials == 0 || params.n_best == 0 {
            return Err(ScdrError::invalid("FastMCD needs at least one trial and one candidate").into());
        }
        let h = params.support_size(n, p)?;
        let mut warnings = Vec::new();

        let (_, full_covariance) = location_covariance(x, &(0..n).collect::<Vec<_>>())?;
        if rank(&full_covariance)? != p {
            warnings.push("The covariance matrix associated to your dataset is not full rank".to_string());
        }

        // random starts, two C-steps each
        let mut rng = Pcg64Mcg::seed_from_u64(params.seed);
        let mut candidates = (0..params.n_trials)
            .map(|_| {
                let start = rand::seq::index::sample(&mut rng, n, h).into_vec();
                c_step(x, &start, h, 2, &mut warnings)
            })
            .collect::<Result<Vec<_>, Error>>()?;
        candidates.sort_by(|a, b| a.log_det.total_cmp(&b.log_det));
        candidates.truncate(params.n_best);

        // refine the best candidates to convergence
        let mut best: Option<Candidate> = None;
        for cand in &candidates {
            let refined = c_step(x, &smallest(&cand.dist, h), h, params.max_c_steps, &mut warnings)?;
            if best.as_ref().map_or(true, |b| refined.log_det < b.log_det) {
                best = Some(refined);
            }
        }
        let best = best.ok_or_else(|| format_err!("no FastMCD candidate"))?;

        let mut raw_covariance = best.covariance;
        let raw_location = best.location;
        let (_, raw_precision) = log_det_pinv(&raw_covariance)?;
        let mut dist = mahalanobis(x, raw_location.view(), &raw_precision);

        if h < n && raw_covariance.iter().all(|v| close(*v, 0.0)) {
            return Err(format_err!(
                "The covariance matrix of the support data is equal to 0, try to increase support_fraction"
            ));
        }

        // consistency correction at the normal model
        let chi2 = ChiSquared::new(p as f64)?;
        let correction = median_f64(&dist.to_vec())? / chi2.inverse_cdf(0.5);
        if correction.is_finite() && correction > 0.0 {
            raw_covariance *= correction;
            dist /= correction;
        } else {
            warnings.push(format!("degenerate consistency correction {correction}, left uncorrected"));
        }

        // reweighting
        let cutoff = chi2.inverse_cdf(0.975);
        let support: Vec<bool> = dist.iter().map(|&d| d < cutoff).collect();
        let rows: Vec<usize> = (0..n).filter(|&i| support[i]).collect();
        if rows.is_empty() {
            return Err(format_err!("no observation within the reweighting cutoff {}", cutoff));
        }
        let (location, covariance) = location_covariance(x, &rows)?;
        let (_, precision) = log_det_pinv(&covariance)?;
        let distances = mahalanobis(x, location.view(), &precision);

        Ok(MinCovDet {
            location,
            covariance,
            precision,
            support,
            raw_location,
            raw_covariance,
            distances,
            warnings,
        })
    }

    /// Squared Mahalanobis distance of the rows of `x` to the robust location
    pub fn mahalanobis(&self, x: ArrayView2<f64>) -> Array1<f64> {
        mahalanobis(x, self.location.view(), &self.precision)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use ndarray::Array2;
    use rand_distr::{Distribution, Normal};

    /// Standard normal cloud with `n_out` gross outliers in the first rows
    fn contaminated(n: usize, p: usize, n_out: usize) -> Array2<f64> {
        let mut rng = Pcg64Mcg::seed_from_u64(7);
        let r = Normal::new(0.0f64, 1.0f64).unwrap();
        let mut x = Array2::from_shape_simple_fn((n, p), || r.sample(&mut rng));
        for i in 0..n_out {
            x.row_mut(i).mapv_inplace(|v| v + 50.0);
        }
        x
    }

    #[test]
    fn test_robust_to_outliers() {
        let x = contaminated(300, 3, 15);
        let mcd = MinCovDet::fit(x.view(), &McdParams::new()).unwrap();

        for v in mcd.location.iter() {
            assert!(v.abs() < 0.3, "location {}", mcd.location);
        }
        for i in 0..3 {
            assert!((mcd.covariance[(i, i)] - 1.0).abs() < 0.35, "covariance {}", mcd.covariance);
        }
        assert!(mcd.support[15..].iter().filter(|&&s| s).count() > 250);
        assert!(mcd.support[..15].iter().all(|&s| !s));

        let cutoff = ChiSquared::new(3.0).unwrap().inverse_cdf(0.975);
        assert!(mcd.distances.iter().take(15).all(|&d| d > cutoff));
        assert_eq!(mcd.mahalanobis(x.view()), mcd.distances);
    }

    #[test]
    fn test_same_seed_same_fit() {
        let x = contaminated(120, 4, 5);
        let a = MinCovDet::fit(x.view(), &McdParams::with_seed(3)).unwrap();
        let b = MinCovDet::fit(x.view(), &McdParams::with_seed(3)).unwrap();
        assert_eq!(a.distances, b.distances);
        assert_eq!(a.support, b.support);
    }

    #[test]
    fn test_singular_data_is_tolerated() {
        let mut x = contaminated(100, 3, 0);
        x.column_mut(2).fill(1.0);
        let mcd = MinCovDet::fit(x.view(), &McdParams::new()).unwrap();
        assert!(mcd.distances.iter().all(|d| d.is_finite()));
        assert!(mcd.warnings.iter().any(|w| w.contains("not full rank")));
    }

    #[test]
    fn test_too_few_observations() {
        let x = contaminated(3, 3, 0);
        let err = MinCovDet::fit(x.view(), &McdParams::new()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ScdrError>(),
            Some(ScdrError::InvalidParameter(_))
        ));

        let params = McdParams {
            support_fraction: Some(1.5),
            ..McdParams::new()
        };
        assert!(MinCovDet::fit(contaminated(50, 2, 0).view(), &params).is_err());
    }
}
