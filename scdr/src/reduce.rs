//! Dimensionality reduction of normalized data: principal components with one of the
//! [`SvdMethod`] engines, and 2-d embeddings through external t-SNE and UMAP back-ends.
//!
//! Every step runs on one named normalization or on all of them, and only touches the
//! normalization store and the assay log.

use crate::dataset::{AssayLog, NormRecord, PcaRecord, TsneRecord, UmapRecord};
use crate::dim_red::{truncated_svd, SvdMethod, DEFAULT_NCOMP};
use crate::error::ScdrError;
use crate::matrix::ExpressionMatrix;
use crate::stats::standardize_rows;
use anyhow::Error;
use log::{info, warn};
use ndarray::{Array2, ArrayView2};
use std::borrow::Cow;
use std::collections::BTreeMap;

/// Principal component settings
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PcaParams {
    /// SVD engine
    pub method: SvdMethod,
    /// Normalization to run on. `None` or empty runs on all of them.
    pub name: Option<String>,
    /// Number of components
    pub ncomp: usize,
    /// Use all genes instead of the highly variable ones
    pub all_genes: bool,
    /// Standardize each gene across cells first
    pub scale: bool,
    /// Seed of the iterative engine
    pub seed: Option<u64>,
}

impl PcaParams {
    /// New PCA settings with default values
    pub fn new() -> PcaParams {
        PcaParams {
            method: SvdMethod::Irlb,
            name: None,
            ncomp: DEFAULT_NCOMP,
            all_genes: false,
            scale: true,
            seed: None,
        }
    }
}

impl Default for PcaParams {
    fn default() -> Self {
        Self::new()
    }
}

/// t-SNE settings
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TsneParams {
    /// Normalization to run on. `None` or empty runs on all of them.
    pub name: Option<String>,
    /// Embed the principal components instead of the whole normalized matrix
    pub run_on_pca: bool,
    /// Effective number of neighbours
    pub perplexity: f64,
    /// Number of optimization iterations
    pub n_iter: usize,
    /// Seed of the back-end
    pub seed: Option<u64>,
}

impl TsneParams {
    /// New t-SNE settings with default values
    pub fn new() -> TsneParams {
        TsneParams {
            name: None,
            run_on_pca: true,
            perplexity: 30.0,
            n_iter: 2000,
            seed: None,
        }
    }
}

impl Default for TsneParams {
    fn default() -> Self {
        Self::new()
    }
}

/// UMAP settings
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct UmapParams {
    /// Normalization to run on. `None` or empty runs on all of them.
    pub name: Option<String>,
    /// Embed the principal components instead of the whole normalized matrix
    pub run_on_pca: bool,
    /// Size of the local neighbourhood
    pub n_neighbors: usize,
    /// Minimum distance between embedded points
    pub min_dist: f64,
    /// Seed of the back-end
    pub seed: Option<u64>,
}

impl UmapParams {
    /// New UMAP settings with default values
    pub fn new() -> UmapParams {
        UmapParams {
            name: None,
            run_on_pca: true,
            n_neighbors: 15,
            min_dist: 0.1,
            seed: None,
        }
    }
}

impl Default for UmapParams {
    fn default() -> Self {
        Self::new()
    }
}

/// A t-SNE implementation
pub trait TsneBackend {
    /// Embed the rows of `data` (cells x features) in two dimensions
    fn embed(&self, data: ArrayView2<'_, f64>, params: &TsneParams) -> Result<Array2<f64>, Error>;
}

/// A UMAP implementation
pub trait UmapBackend {
    /// Embed the rows of `data` (cells x features) in two dimensions
    fn embed(&self, data: ArrayView2<'_, f64>, params: &UmapParams) -> Result<Array2<f64>, Error>;
}

/// Names of the normalizations a step runs on
fn targets(store: &BTreeMap<String, NormRecord>, name: Option<&str>) -> Result<Vec<String>, ScdrError> {
    if store.is_empty() {
        return Err(ScdrError::precondition("normalize", "No normalized data found."));
    }
    match name {
        None | Some("") => Ok(store.keys().cloned().collect()),
        Some(n) if store.contains_key(n) => Ok(vec![n.to_string()]),
        Some(n) => Err(ScdrError::invalid(format!(
            "normalization '{}' not found, available: {}",
            n,
            store.keys().cloned().collect::<Vec<_>>().join(", ")
        ))),
    }
}

/// The genes of `record` that go into the PCA
fn pca_input<'a>(name: &str, record: &'a NormRecord, all_genes: bool) -> Result<Cow<'a, ExpressionMatrix>, ScdrError> {
    if all_genes {
        info!("using all genes of the {} normalization", name);
        return Ok(Cow::Borrowed(&record.data));
    }
    let data = record.data.subset_genes(&record.hvg.genes);
    if data.is_empty() {
        return Err(ScdrError::precondition(
            "hvg",
            format!("No highly variable genes found for the {name} normalization."),
        ));
    }
    Ok(Cow::Owned(data))
}

/// Compute principal components of the selected normalizations into `dr.pca`.
/// All targets are computed before any is stored, so a failure leaves `store` untouched.
pub fn pca(store: &mut BTreeMap<String, NormRecord>, history: &mut AssayLog, params: &PcaParams) -> Result<(), Error> {
    let names = targets(store, params.name.as_deref())?;

    let mut results = Vec::with_capacity(names.len());
    for name in names {
        let data = pca_input(&name, &store[&name], params.all_genes)?;
        info!(
            "Running PCA ({}) on the {} normalization (dimensions {:?})",
            params.method,
            name,
            data.shape()
        );

        let scaled;
        let values = if params.scale {
            scaled = standardize_rows(data.values());
            scaled.view()
        } else {
            data.values()
        };
        let out = truncated_svd(values, params.method, params.ncomp, params.seed)?;

        let record = PcaRecord {
            components: out.components,
            loadings: out.loadings,
            contributions: out.contributions,
            genes: data.genes().to_vec(),
            cells: data.cells().to_vec(),
            method: params.method,
        };
        results.push((name, record));
    }

    for (name, record) in results {
        if let Some(target) = store.get_mut(&name) {
            target.dr.pca = Some(record);
        }
    }
    history.record_step("pca", Some(params.method.as_str()));
    Ok(())
}

/// Rows to embed: the principal components, or the normalized matrix as cells x genes
fn embedding_input<'a>(
    name: &str,
    record: &'a NormRecord,
    run_on_pca: bool,
    what: &str,
) -> Result<(Cow<'a, Array2<f64>>, Vec<String>), ScdrError> {
    if run_on_pca {
        let pca = record.dr.pca.as_ref().ok_or_else(|| {
            ScdrError::precondition("pca", format!("No principal components for the {name} normalization."))
        })?;
        Ok((Cow::Borrowed(&pca.components), pca.cells.clone()))
    } else {
        warn!("Running {} on the entire gene expression matrix is not recommended.", what);
        let cells_by_genes = record.data.values().t().to_owned();
        Ok((Cow::Owned(cells_by_genes), record.data.cells().to_vec()))
    }
}

fn check_embedding(embedding: &Array2<f64>, n_cells: usize, what: &str) -> Result<(), ScdrError> {
    if embedding.nrows() != n_cells {
        return Err(ScdrError::invalid(format!(
            "{what} back-end returned {} rows for {n_cells} cells",
            embedding.nrows()
        )));
    }
    Ok(())
}

/// Compute t-SNE embeddings of the selected normalizations into `dr.tsne`
pub fn tsne(
    store: &mut BTreeMap<String, NormRecord>,
    history: &mut AssayLog,
    backend: &dyn TsneBackend,
    params: &TsneParams,
) -> Result<(), Error> {
    let names = targets(store, params.name.as_deref())?;

    let mut results = Vec::with_capacity(names.len());
    for name in names {
        let (input, cells) = embedding_input(&name, &store[&name], params.run_on_pca, "tSNE")?;
        info!(
            "Running tSNE (perplexity {}) on the {} normalization",
            params.perplexity, name
        );
        let embedding = backend.embed(input.view(), params)?;
        check_embedding(&embedding, cells.len(), "tSNE")?;

        results.push((
            name,
            TsneRecord {
                embedding,
                cells,
                run_on_pca: params.run_on_pca,
                perplexity: params.perplexity,
                n_iter: params.n_iter,
            },
        ));
    }

    for (name, record) in results {
        if let Some(target) = store.get_mut(&name) {
            target.dr.tsne = Some(record);
        }
    }
    history.record_step("tsne", None);
    Ok(())
}

/// Compute UMAP embeddings of the selected normalizations into `dr.umap`
pub fn umap(
    store: &mut BTreeMap<String, NormRecord>,
    history: &mut AssayLog,
    backend: &dyn UmapBackend,
    params: &UmapParams,
) -> Result<(), Error> {
    let names = targets(store, params.name.as_deref())?;

    let mut results = Vec::with_capacity(names.len());
    for name in names {
        let (input, cells) = embedding_input(&name, &store[&name], params.run_on_pca, "UMAP")?;
        info!("Running UMAP on the {} normalization", name);
        let embedding = backend.embed(input.view(), params)?;
        check_embedding(&embedding, cells.len(), "UMAP")?;

        results.push((
            name,
            UmapRecord {
                embedding,
                cells,
                run_on_pca: params.run_on_pca,
            },
        ));
    }

    for (name, record) in results {
        if let Some(target) = store.get_mut(&name) {
            target.dr.umap = Some(record);
        }
    }
    history.record_step("umap", None);
    Ok(())
}
