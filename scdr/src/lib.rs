//! # scdr: single-cell quality control and dimensionality reduction
//!
//! Filtering of raw count matrices, robust detection of low-quality cells and principal
//! component analysis of normalized data, with t-SNE and UMAP embeddings delegated to
//! external back-ends.

#![deny(missing_docs)]
#![deny(warnings)]

#[allow(unused_extern_crates)]
extern crate blas_src;

pub mod dataset;

/// Dimensionality reduction methods
pub mod dim_red;

pub mod error;

pub mod matrix;

pub mod preprocess;

/// Low-quality cell detection
pub mod qc;

pub mod reduce;

pub mod stats;

pub use dataset::Dataset;
pub use error::ScdrError;
pub use matrix::ExpressionMatrix;
