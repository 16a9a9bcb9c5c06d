use super::exact::ExactSvd;
use super::irlba::Irlba;
use super::*;
use approx::assert_abs_diff_eq;
use ndarray::{s, Array, Array1, Array2};
use ndarray_linalg::SVD;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use rand_pcg::Pcg64Mcg;

fn seeded_rng() -> Pcg64Mcg {
    Pcg64Mcg::seed_from_u64(0)
}

/// Frobenius norm of `a` divided by its number of entries
fn frobenius(a: &ArrayView2<f64>) -> f64 {
    let acc: f64 = a.iter().map(|v| v * v).sum();
    let sz = (a.nrows() * a.ncols()) as f64;
    acc.sqrt() / sz
}

/// Compare a truncated SVD of the gene x cell matrix `a` against the full LAPACK SVD.
/// Returns `(||A^T U - V S||_frob, max relative singular value error)`.
fn cmp_svd(a: &Array2<f64>, nu: usize, svd: &impl TruncatedSvd) -> (f64, f64) {
    let out = svd.reduce(a.view(), nu).unwrap();
    assert_eq!(out.components.dim(), (a.ncols(), nu));
    assert_eq!(out.loadings.dim(), (a.nrows(), nu));

    let projected = a.t().dot(&out.loadings);
    let frob_err = frobenius(&(&projected - &out.components).view());

    let (_, s_gt, _) = a.svd(false, false).unwrap();
    let s_gt = s_gt.slice(s![0..nu]);
    let s_err = ((&out.singular_values - &s_gt) / &s_gt)
        .mapv(f64::abs)
        .fold(-1.0f64, |mm, &v| v.max(mm));

    println!("||A'U - VS||_frob = {frob_err}, ||S_tsvd - S_svd||_inf = {s_err}");
    (frob_err, s_err)
}

fn fast_test_battery() -> Vec<Array2<f64>> {
    vec![
        simple_deterministic_ex(100, 1000),
        simple_deterministic_ex(1000, 100),
        complex_ex(100, 1000, 20),
        complex_ex(1000, 100, 20),
        gene_exp_sim_real_ex(100, 1000, 20),
        gene_exp_sim_real_ex(1000, 100, 20),
    ]
}

fn run_tests(battery: Vec<Array2<f64>>, nu: usize, svd: impl TruncatedSvd) {
    for a in battery {
        let (frob_err, s_err) = cmp_svd(&a, nu, &svd);
        assert!(frob_err < 0.001);
        assert!(s_err < 0.001);
    }
}

#[test]
fn irlba_fast_test() {
    let irlba = Irlba {
        seed: Some(0),
        ..Irlba::new()
    };
    run_tests(fast_test_battery(), 10, irlba);
}

#[test]
fn exact_fast_test() {
    run_tests(fast_test_battery(), 10, ExactSvd);
}

#[test]
fn test_irlba_matches_exact() {
    let a = gene_exp_sim_real_ex(60, 150, 5);
    let irlb = truncated_svd(a.view(), SvdMethod::Irlb, 3, Some(3)).unwrap();
    let exact = truncated_svd(a.view(), SvdMethod::Svd, 3, None).unwrap();

    let rel = (&irlb.singular_values / &exact.singular_values).mapv(|r| (r - 1.0).abs());
    assert!(rel.iter().all(|&r| r < 1e-6));
    // loadings agree up to the sign of each singular vector
    assert_abs_diff_eq!(irlb.contributions, exact.contributions, epsilon = 1e-3);
}

#[test]
fn test_full_rank_reconstruction() {
    // k = min(m, n): irlba has no room for a restarted basis and falls back to a dense svd
    let a = complex_ex(8, 5, 0);
    for method in [SvdMethod::Irlb, SvdMethod::Svd] {
        let out = truncated_svd(a.view(), method, 5, Some(1)).unwrap();
        let recon = out.components.dot(&out.loadings.t());
        assert_abs_diff_eq!(recon, a.t(), epsilon = 1e-9);
    }
}

#[test]
fn test_low_rank_reconstruction() {
    // 60 x 40 keeps the Lanczos basis well above k + 3, so irlba iterates
    let a = low_rank_ex(60, 40, 3);
    let scale = a.fold(0.0f64, |mx, v| mx.max(v.abs()));
    for k in [3, 5, 10] {
        for method in [SvdMethod::Irlb, SvdMethod::Svd] {
            let out = truncated_svd(a.view(), method, k, Some(7)).unwrap();
            assert_eq!(out.components.dim(), (40, k));
            let recon = out.components.dot(&out.loadings.t());
            assert_abs_diff_eq!(recon, a.t(), epsilon = 1e-8 * scale);
        }
    }
}

#[test]
fn test_irlba_dense_fallback() {
    let a = simple_deterministic_ex(6, 5);
    let out = Irlba::with_seed(Some(0)).reduce(a.view(), 4).unwrap();
    let exact = ExactSvd.reduce(a.view(), 4).unwrap();

    assert_eq!(out.components.dim(), (5, 4));
    assert_abs_diff_eq!(out.singular_values, exact.singular_values, epsilon = 1e-9);
}

#[test]
fn test_irlba_seed_is_deterministic() {
    let a = gene_exp_sim_real_ex(80, 120, 6);
    let first = Irlba::with_seed(Some(42)).reduce(a.view(), 6).unwrap();
    let second = Irlba::with_seed(Some(42)).reduce(a.view(), 6).unwrap();

    assert_eq!(first.components, second.components);
    assert_eq!(first.loadings, second.loadings);
}

#[test]
fn test_rejects_bad_rank() {
    let a = simple_deterministic_ex(10, 4);
    for method in [SvdMethod::Irlb, SvdMethod::Svd] {
        assert!(truncated_svd(a.view(), method, 5, None).is_err());
        assert!(truncated_svd(a.view(), method, 0, None).is_err());
    }

    let thin = simple_deterministic_ex(1, 4);
    assert!(truncated_svd(thin.view(), SvdMethod::Svd, 1, None).is_err());
}

#[test]
fn test_svd_method_names() {
    assert_eq!("irlb".parse::<SvdMethod>().unwrap(), SvdMethod::Irlb);
    assert_eq!("svd".parse::<SvdMethod>().unwrap(), SvdMethod::Svd);
    assert_eq!(SvdMethod::Irlb.to_string(), "irlb");

    let err = "pca".parse::<SvdMethod>().unwrap_err();
    assert!(err.to_string().contains("Unknown PCA method specified"));
}

// deterministic matrix (useful for comparing w/ python)
fn simple_deterministic_ex(m: usize, n: usize) -> Array2<f64> {
    let mut v = Vec::new();
    for x in 0..(m * n) {
        let val = x % 7 + x % 4 + x % 50 + x % 47 + x % 12;
        v.push(val as f64);
    }

    Array::from_shape_vec((m, n), v).unwrap()
}

// random matrix with `fix_cols` columns set to be random linear combinations of
// other columns.
fn complex_ex(m: usize, n: usize, fix_cols: usize) -> Array2<f64> {
    let mut rng = seeded_rng();
    let r = Normal::new(0.0f64, 1.0f64).unwrap();
    let mut a: Array2<f64> = Array2::from_shape_simple_fn((m, n), || r.sample(&mut rng));

    // Make some columns into linear combinations of other columns.
    for i in 0..fix_cols {
        let mix = Array1::from_shape_simple_fn(n, || r.sample(&mut rng));
        let new_col = a.dot(&mix);
        a.column_mut(i).assign(&new_col);
    }

    a
}

// product of two gaussian factors, exactly rank `rank`
fn low_rank_ex(m: usize, n: usize, rank: usize) -> Array2<f64> {
    let mut rng = seeded_rng();
    let r = Normal::new(0.0f64, 1.0f64).unwrap();
    let left = Array2::from_shape_simple_fn((m, rank), || r.sample(&mut rng));
    let right = Array2::from_shape_simple_fn((rank, n), || r.sample(&mut rng));
    left.dot(&right)
}

// simulate a gene expression matrix with `nc` clusters
fn gene_exp_sim_real_ex(m: usize, n: usize, nc: usize) -> Array2<f64> {
    let mut rng = seeded_rng();

    let mut clusters = Vec::new();
    for _ in 0..nc {
        let r = Normal::new(0.0f64, 10.0f64).unwrap();
        let a = Array1::from_shape_simple_fn(n, || r.sample(&mut rng));
        clusters.push(a);
    }

    let mut a: Array2<f64> = Array2::<f64>::zeros((m, n));
    let jitter = Normal::new(0.0f64, 1.0f64).unwrap();

    for i in 0..m {
        let cluster_id = rng.gen_range(0..clusters.len());
        let row = &clusters[cluster_id];
        let new_row = row + &Array1::from_shape_simple_fn(n, || jitter.sample(&mut rng));
        a.row_mut(i).assign(&new_row);
    }

    a
}
