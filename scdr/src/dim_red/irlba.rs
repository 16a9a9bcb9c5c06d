#![allow(non_snake_case)]

use super::{check_rank, DataMat, Pca, PcaResult, SvdOutput, TruncatedSvd};
use anyhow::{format_err, Error};
use log::{debug, warn};
use ndarray::linalg::Dot;
use ndarray::prelude::*;
use ndarray::{s, Array1, Array2, LinalgScalar};
use ndarray_linalg::SVD;
use ndarray_rand::RandomExt;
use num_traits::Float;
use rand::SeedableRng;
use rand_distr::Normal;
use rand_pcg::Pcg64Mcg;
use std::cmp::{max, min};
use std::ops::Mul;

fn norm<T: LinalgScalar + Mul + Float>(x: &ArrayView1<T>) -> T {
    x.fold(T::zero(), |sum, v| sum + (*v) * (*v)).sqrt()
}

/// Orthogonalize a vector Y against the columns of the matrix X.
/// X and Y must have the same number of rows.
fn orthog<T: LinalgScalar>(y: &ArrayView1<T>, x: &ArrayView2<T>) -> Array1<T> {
    let dot_y = &x.t().dot(y);
    y - &x.dot(dot_y)
}

/// utility function used to check linear dependencies during computation:
fn invcheck<T: Float>(x: T) -> T {
    let eps2 = (T::one() + T::one()) * T::epsilon();

    if x > eps2 {
        T::one() / x
    } else {
        T::zero()
    }
}

/// Size of the Lanczos basis used for `nu` singular triplets of an `m x n` matrix
fn work_size(nu: usize, m: usize, n: usize) -> usize {
    min(max(nu + 7, min(nu + 20, 3 * nu)), min(m, n))
}

/// Struct for storing IRLBA parameters
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Irlba {
    /// IRLBA convergence tolerance
    pub tol: f64,
    /// Maximum number of iterations
    pub max_iter: usize,
    /// Seed for the random start vector. `None` draws one from the OS.
    pub seed: Option<u64>,
}

impl Irlba {
    /// New IRLBA with default settings
    pub fn new() -> Irlba {
        Irlba {
            tol: 0.00001,
            max_iter: 1000,
            seed: None,
        }
    }

    /// Default settings with a fixed seed
    pub fn with_seed(seed: Option<u64>) -> Irlba {
        Irlba { seed, ..Irlba::new() }
    }
}

impl Default for Irlba {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Pca<T, f64> for Irlba
where
    T: DataMat + for<'a> Dot<ArrayView1<'a, f64>, Output = Array1<f64>> + Dot<Array1<f64>, Output = Array1<f64>>,
    for<'a> ArrayView1<'a, f64>: Dot<T, Output = Array1<f64>>,
{
    fn run_pca(&self, array: &T, k: usize) -> Result<PcaResult, Error> {
        irlba(array, k, self.tol, self.max_iter, self.seed)
    }
}

impl TruncatedSvd for Irlba {
    /// components = V * diag(s), loadings = U
    fn reduce(&self, matrix: ArrayView2<'_, f64>, k: usize) -> Result<SvdOutput, Error> {
        let (U, sigma, V) = self.run_pca(&matrix, k)?;
        let components = &V * &sigma;
        Ok(SvdOutput::new(components, U, sigma))
    }
}

/// Dense SVD of the operator, for when `nu` is too close to the matrix size for a
/// restarted Lanczos basis.
fn dense_fallback<T>(A: &T, nu: usize) -> Result<PcaResult, Error>
where
    T: DataMat + Dot<Array1<f64>, Output = Array1<f64>>,
{
    let [m, n] = A.shape();
    let mut dense = Array2::<f64>::zeros((m, n));
    for j in 0..n {
        let mut e = Array1::<f64>::zeros(n);
        e[j] = 1.0;
        dense.column_mut(j).assign(&A.dot(&e));
    }

    let (u, sigma, vt) = dense.svd(true, true)?;
    let u = u.ok_or_else(|| format_err!("svd returned no left singular vectors"))?;
    let vt = vt.ok_or_else(|| format_err!("svd returned no right singular vectors"))?;

    Ok((
        u.slice(s![.., 0..nu]).to_owned(),
        sigma.slice(s![0..nu]).to_owned(),
        vt.slice(s![0..nu, ..]).t().to_owned(),
    ))
}

/// Implementation of the IRLBA algorithm (Baglama & Reichel, 2005). Perform the SVD of
/// matrix `A`, retaining `nu` singular dimensions.
/// Try to achieve tolerance `tol`, stop after at most `maxit` iterations.
pub fn irlba<T>(A: &T, nu: usize, tol: f64, maxit: usize, seed: Option<u64>) -> Result<PcaResult, Error>
where
    T: DataMat + for<'a> Dot<ArrayView1<'a, f64>, Output = Array1<f64>> + Dot<Array1<f64>, Output = Array1<f64>>,
    for<'a> ArrayView1<'a, f64>: Dot<T, Output = Array1<f64>>,
{
    let [m, n] = A.shape();
    check_rank([m, n], nu)?;

    let m_b = work_size(nu, m, n);
    if m_b < nu + 3 {
        warn!(
            "computing {} of {} singular triplets, using a full svd instead of irlba",
            nu,
            min(m, n)
        );
        return dense_fallback(A, nu);
    }

    let mut mprod = 0;
    let mut it = 0;
    let mut j = 0;
    let mut k = nu;
    let mut smax = f64::MIN;
    let mut converged = false;

    let mut V: Array2<f64> = Array2::zeros((n, m_b));
    let mut W: Array2<f64> = Array2::zeros((m, m_b));
    let mut F: Array1<f64> = Array1::zeros(n);
    let mut B: Array2<f64> = Array2::zeros((m_b, m_b));
    let mut u: Array2<f64> = Array2::zeros((m_b, m_b));
    let mut sigma: Array1<f64> = Array1::zeros(m_b);
    let mut vt: Array2<f64> = Array2::zeros((m_b, m_b));

    // random initial vector
    {
        let mut rng = match seed {
            Some(seed) => Pcg64Mcg::seed_from_u64(seed),
            None => Pcg64Mcg::from_entropy(),
        };
        let rnorm = Normal::new(0.0f64, 1.0f64)?;

        let mut rand = Array1::random_using(n, rnorm, &mut rng);
        rand *= 1.0f64 / norm(&rand.view());
        V.column_mut(0).assign(&rand);
    }

    while it < maxit {
        if it > 0 {
            j = k;
        }

        W.column_mut(j).assign(&A.dot(&V.column(j)));
        mprod += 1;

        if it > 0 {
            let nc = orthog(&W.column(j), &W.slice(s![.., 0..j]));
            W.column_mut(j).assign(&nc);
        }

        let mut s = norm(&W.column(j));
        let mut sinv = invcheck(s);
        W.column_mut(j).mapv_inplace(|x| x * sinv);

        let mut fnorm = 0.0;

        // Lanczos process
        while j < m_b {
            F = W.column(j).dot(A);
            mprod += 1;

            F -= &(&V.column(j) * s);
            F = orthog(&F.view(), &V.slice(s![.., 0..j + 1]));
            fnorm = norm(&F.view());
            let finv = invcheck(fnorm);
            F *= finv;

            if j == m_b - 1 {
                B[(j, j)] = s
            } else {
                V.column_mut(j + 1).assign(&F);
                B[(j, j)] = s;
                B[(j, j + 1)] = fnorm;

                let mut new_w_col = A.dot(&V.column(j + 1));
                mprod += 1;
                new_w_col -= &(&W.column(j) * fnorm);
                new_w_col = orthog(&new_w_col.view(), &W.slice(s![.., 0..j + 1]));
                s = norm(&new_w_col.view());
                sinv = invcheck(s);

                W.column_mut(j + 1).assign(&(&new_w_col * sinv));
            }

            j += 1;
        }

        let svd = B.svd(true, true)?;
        u = svd.0.ok_or_else(|| format_err!("svd returned no left singular vectors"))?;
        sigma = svd.1;
        vt = svd.2.ok_or_else(|| format_err!("svd returned no right singular vectors"))?;

        let resid = fnorm * &u.slice(s![m_b - 1, ..]);
        smax = smax.max(sigma[0]);

        let num_converged = (0..nu).filter(|&i| resid[i].abs() < tol * smax).count();

        if num_converged < nu {
            k = max(num_converged + nu, k);
            k = min(k, m_b - 3);
        } else {
            converged = true;
            break;
        }

        // Update Ritz vectors
        let v_update = V.slice(s![.., 0..m_b]).dot(&vt.t().slice(s![.., 0..k]));
        V.slice_mut(s![.., 0..k]).assign(&v_update);
        V.column_mut(k).assign(&F);

        B = Array2::zeros((m_b, m_b));
        for l in 0..k {
            B[(l, l)] = sigma[l];
        }

        B.slice_mut(s![0..k, k]).assign(&resid.slice(s![0..k]));

        // right update
        let upd = W.slice(s![.., 0..m_b]).dot(&u.slice(s![.., 0..k]));
        W.slice_mut(s![.., 0..k]).assign(&upd);

        it += 1;
    }

    if !converged {
        warn!("irlba did not converge to tol {} within {} iterations", tol, maxit);
    }

    let U = W.slice(s![.., 0..m_b]).dot(&u.slice(s![.., 0..nu]));
    let V = V.slice(s![.., 0..m_b]).dot(&vt.t().slice(s![.., 0..nu]));

    debug!("irlba: {} restarts, {} matrix products", it, mprod);
    let sigma_out = sigma.slice(s![0..nu]).to_owned();
    Ok((U, sigma_out, V))
}
