use super::{check_rank, SvdOutput, TruncatedSvd};
use anyhow::{format_err, Error};
use log::debug;
use ndarray::{s, ArrayView2};
use ndarray_linalg::SVD;

/// Full SVD of the cell x gene matrix, computed with LAPACK. Memory grows with
/// `genes^2`, prefer [`super::irlba::Irlba`] on large inputs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExactSvd;

impl TruncatedSvd for ExactSvd {
    /// components = `X * V[:, :k]` with `X` the cell x gene matrix, loadings = `V[:, :k]`.
    ///
    /// The singular values scaled by `1 / sqrt(cells - 1)` are reported in the log only;
    /// the components are the plain projection.
    fn reduce(&self, matrix: ArrayView2<'_, f64>, k: usize) -> Result<SvdOutput, Error> {
        let [genes, cells] = [matrix.nrows(), matrix.ncols()];
        check_rank([genes, cells], k)?;

        let x = matrix.t();
        let (_, d, vt) = x.svd(false, true)?;
        let vt = vt.ok_or_else(|| format_err!("svd returned no right singular vectors"))?;

        let scaled = d.mapv(|v| v / ((cells - 1) as f64).sqrt());
        debug!(
            "exact svd of {}x{} matrix, leading scaled singular value {:.4}",
            cells,
            genes,
            scaled.get(0).copied().unwrap_or(0.0)
        );

        let v = vt.slice(s![0..k, ..]).t().to_owned();
        let components = x.dot(&v);
        Ok(SvdOutput::new(components, v, d.slice(s![0..k]).to_owned()))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_components_are_unscaled_projection() {
        // genes x cells
        let a = array![[2.0, 0.0, 1.0], [0.0, 3.0, 1.0], [1.0, 1.0, 0.0], [0.5, 0.0, 2.0]];
        let out = ExactSvd.reduce(a.view(), 2).unwrap();

        assert_eq!(out.components.dim(), (3, 2));
        assert_eq!(out.contributions.dim(), (4, 2));
        assert_abs_diff_eq!(out.components, a.t().dot(&out.loadings), epsilon = 1e-12);
        assert_abs_diff_eq!(out.contributions, out.loadings.mapv(f64::abs), epsilon = 0.0);

        // column norms of the projection are the singular values
        for (c, s) in out.components.columns().into_iter().zip(out.singular_values.iter()) {
            assert_abs_diff_eq!(c.dot(&c).sqrt(), *s, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_rejects_too_many_components() {
        let a = array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]];
        assert!(ExactSvd.reduce(a.view(), 3).is_err());
        assert!(ExactSvd.reduce(a.view(), 0).is_err());
        assert!(ExactSvd.reduce(a.view(), 2).is_ok());
    }
}
