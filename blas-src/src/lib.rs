//! Links the BLAS/LAPACK implementation used by `ndarray-linalg`.

#[cfg(target_os = "macos")]
extern crate accelerate_src;

#[cfg(not(target_os = "macos"))]
extern crate intel_mkl_src;
