#![allow(non_snake_case)]

//! Notes on generic matrix algos
//! The Lanczos method only touches the data matrix through products with dense vectors:
//! `A * b` and `b * A`. Writing it against those two operations (rather than a concrete
//! array type) lets the same code run on an owned matrix, a borrowed view, or a transposed
//! view without copying. The trait orphan rules make `b * A` awkward to express through
//! `std::ops::Mul`, so the bounds are written with `ndarray::linalg::Dot` in both directions
//! and listed directly on each algorithm. Folding them into a single super-trait collapses
//! the overloads into one `dot` method and the algorithm no longer type-checks.
//!
//! Both SVD strategies take a gene x cell matrix and report cells as rows of the
//! components and genes as rows of the contributions.

use crate::error::ScdrError;
use anyhow::Error;
use ndarray::{Array1, Array2, ArrayView2};
use std::fmt;
use std::str::FromStr;

/// IRLBA svd method
pub mod irlba;

/// Exact (dense LAPACK) svd method
pub mod exact;

#[cfg(test)]
pub(crate) mod test;

/// `(U, s, V)` of a truncated SVD: left vectors, singular values, right vectors
pub type PcaResult = (Array2<f64>, Array1<f64>, Array2<f64>);

/// Default number of components
pub const DEFAULT_NCOMP: usize = 75;

/// Trait for getting the dimensions of a matrix
pub trait DataMat {
    /// Get the shape of the matrix
    fn shape(&self) -> [usize; 2];
}

impl DataMat for ArrayView2<'_, f64> {
    fn shape(&self) -> [usize; 2] {
        [self.nrows(), self.ncols()]
    }
}

impl DataMat for Array2<f64> {
    fn shape(&self) -> [usize; 2] {
        [self.nrows(), self.ncols()]
    }
}

/// Perform a SVD of a `matrix`, retaining `k` singular triplets.
/// This trait always performs the pure SVD of the matrix. Special cases of SVD
/// such as PCA can be achieved by the appropriate shifts and scaling of `matrix`
pub trait Pca<T, N> {
    /// Compute a rank `k` SVD for `matrix`
    fn run_pca(&self, matrix: &T, k: usize) -> Result<PcaResult, Error>;
}

/// A `k` component reduction of a gene x cell matrix.
#[derive(Clone, Debug)]
pub struct SvdOutput {
    /// cells x k
    pub components: Array2<f64>,
    /// signed gene loadings, genes x k
    pub loadings: Array2<f64>,
    /// `|loadings|`, genes x k
    pub contributions: Array2<f64>,
    /// the k leading singular values of the input
    pub singular_values: Array1<f64>,
}

impl SvdOutput {
    fn new(components: Array2<f64>, loadings: Array2<f64>, singular_values: Array1<f64>) -> SvdOutput {
        let contributions = loadings.mapv(f64::abs);
        SvdOutput {
            components,
            loadings,
            contributions,
            singular_values,
        }
    }
}

/// Interchangeable strategies for reducing a gene x cell matrix to `k` latent dimensions
pub trait TruncatedSvd {
    /// Reduce `matrix` (genes x cells) to `k` components
    fn reduce(&self, matrix: ArrayView2<'_, f64>, k: usize) -> Result<SvdOutput, Error>;
}

/// SVD strategy selectable by name
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SvdMethod {
    /// implicitly restarted Lanczos bidiagonalization
    Irlb,
    /// full LAPACK SVD
    Svd,
}

impl SvdMethod {
    /// Name used in results and the assay log
    pub fn as_str(&self) -> &'static str {
        match self {
            SvdMethod::Irlb => "irlb",
            SvdMethod::Svd => "svd",
        }
    }
}

impl fmt::Display for SvdMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SvdMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "irlb" => Ok(SvdMethod::Irlb),
            "svd" => Ok(SvdMethod::Svd),
            _ => Err(ScdrError::invalid(format!(
                "Unknown PCA method specified: {s}. Valid choices are: irlb and svd"
            ))
            .into()),
        }
    }
}

/// Check that a `k` component decomposition of a `[m, n]` matrix is possible
pub(crate) fn check_rank(shape: [usize; 2], k: usize) -> Result<(), ScdrError> {
    let [m, n] = shape;
    if m < 2 || n < 2 {
        return Err(ScdrError::invalid(format!(
            "The input matrix must be at least 2x2, got {m}x{n}."
        )));
    }
    if k == 0 || k > m.min(n) {
        return Err(ScdrError::invalid(format!(
            "cannot compute {k} components of a {m}x{n} matrix; need 1 <= k <= {}",
            m.min(n)
        )));
    }
    Ok(())
}

/// Reduce a gene x cell matrix with the chosen strategy.
pub fn truncated_svd(
    matrix: ArrayView2<'_, f64>,
    method: SvdMethod,
    k: usize,
    seed: Option<u64>,
) -> Result<SvdOutput, Error> {
    match method {
        SvdMethod::Irlb => irlba::Irlba::with_seed(seed).reduce(matrix, k),
        SvdMethod::Svd => exact::ExactSvd.reduce(matrix, k),
    }
}
