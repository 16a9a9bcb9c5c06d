//! In-memory single-cell dataset: the raw count matrix, the gene sets split off it, the
//! normalized versions of the data and everything computed on them.

use crate::dim_red::SvdMethod;
use crate::matrix::ExpressionMatrix;
use crate::preprocess::{self, FilterParams, FilterReport};
use crate::qc::{self, QcParams, QcReport};
use crate::reduce::{self, PcaParams, TsneBackend, TsneParams, UmapBackend, UmapParams};
use anyhow::Error;
use log::info;
use ndarray::Array2;
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Highly variable genes of a normalization
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Hvg {
    /// gene identifiers
    pub genes: BTreeSet<String>,
}

/// Principal components of one normalization
#[derive(Clone, Debug, PartialEq)]
pub struct PcaRecord {
    /// cells x k
    pub components: Array2<f64>,
    /// signed gene loadings, genes x k
    pub loadings: Array2<f64>,
    /// `|loadings|`, genes x k
    pub contributions: Array2<f64>,
    /// gene identifiers, rows of `loadings`
    pub genes: Vec<String>,
    /// cell identifiers, rows of `components`
    pub cells: Vec<String>,
    /// engine that computed the components
    pub method: SvdMethod,
}

/// t-SNE embedding of one normalization
#[derive(Clone, Debug, PartialEq)]
pub struct TsneRecord {
    /// cells x 2
    pub embedding: Array2<f64>,
    /// cell identifiers, rows of `embedding`
    pub cells: Vec<String>,
    /// computed from the principal components rather than the normalized matrix
    pub run_on_pca: bool,
    /// perplexity used
    pub perplexity: f64,
    /// iterations used
    pub n_iter: usize,
}

/// UMAP embedding of one normalization
#[derive(Clone, Debug, PartialEq)]
pub struct UmapRecord {
    /// cells x 2
    pub embedding: Array2<f64>,
    /// cell identifiers, rows of `embedding`
    pub cells: Vec<String>,
    /// computed from the principal components rather than the normalized matrix
    pub run_on_pca: bool,
}

/// Dimensionality reductions of one normalization
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DimReductions {
    /// principal components
    pub pca: Option<PcaRecord>,
    /// t-SNE embedding
    pub tsne: Option<TsneRecord>,
    /// UMAP embedding
    pub umap: Option<UmapRecord>,
}

/// A normalized expression matrix and the results computed on it
#[derive(Clone, Debug, PartialEq)]
pub struct NormRecord {
    /// normalized values, genes x cells
    pub data: ExpressionMatrix,
    /// highly variable genes
    pub hvg: Hvg,
    /// dimensionality reductions
    pub dr: DimReductions,
    /// cluster label of every cell, by clustering name
    pub clusters: BTreeMap<String, Vec<usize>>,
}

impl NormRecord {
    /// Record for freshly normalized data
    pub fn new(data: ExpressionMatrix) -> NormRecord {
        NormRecord {
            data,
            hvg: Hvg::default(),
            dr: DimReductions::default(),
            clusters: BTreeMap::new(),
        }
    }

    /// Set the highly variable genes
    pub fn with_hvg<I: IntoIterator<Item = String>>(mut self, genes: I) -> NormRecord {
        self.hvg.genes = genes.into_iter().collect();
        self
    }
}

/// One analysis step that ran on the dataset
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AssayEntry {
    /// step name
    pub step: String,
    /// method variant, for steps that have several
    pub method: Option<String>,
}

/// Append-only history of analysis steps
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AssayLog {
    entries: Vec<AssayEntry>,
}

impl AssayLog {
    /// Append a step
    pub fn record_step(&mut self, step: &str, method: Option<&str>) {
        self.entries.push(AssayEntry {
            step: step.to_string(),
            method: method.map(str::to_string),
        });
    }

    /// All steps, oldest first
    pub fn entries(&self) -> &[AssayEntry] {
        &self.entries
    }

    /// True if `step` ran at least once
    pub fn has_run(&self, step: &str) -> bool {
        self.entries.iter().any(|e| e.step == step)
    }
}

/// A single-cell dataset
#[derive(Clone, Debug)]
pub struct Dataset {
    /// raw counts of the nuclear genes, genes x cells
    pub exp_mat: ExpressionMatrix,
    /// raw counts of the mitochondrial genes, once split off
    pub exp_mito: Option<ExpressionMatrix>,
    /// raw counts of the ERCC spikes, once split off
    pub exp_ercc: Option<ExpressionMatrix>,
    /// normalizations by name
    pub norm_data: BTreeMap<String, NormRecord>,
    /// cells flagged by [`Dataset::auto_clean`]
    pub low_quality_cells: Vec<String>,
    /// analysis history
    pub assays: AssayLog,
}

impl Dataset {
    /// Dataset holding the raw count matrix
    pub fn new(exp_mat: ExpressionMatrix) -> Dataset {
        Dataset {
            exp_mat,
            exp_mito: None,
            exp_ercc: None,
            norm_data: BTreeMap::new(),
            low_quality_cells: Vec::new(),
            assays: AssayLog::default(),
        }
    }

    /// Add or replace a normalization
    pub fn add_normalization(&mut self, name: &str, record: NormRecord) {
        self.norm_data.insert(name.to_string(), record);
    }

    /// Move matching genes out of the count matrix. Returns them, or `None` if nothing matched.
    fn split_genes(&mut self, pattern: &str, case_insensitive: bool) -> Result<Option<ExpressionMatrix>, Error> {
        let (rest, found) = preprocess::split_by_pattern(&self.exp_mat, pattern, case_insensitive)?;
        if found.is_empty() {
            return Ok(None);
        }
        self.exp_mat = rest;
        Ok(Some(found))
    }

    /// Move mitochondrial genes (case-insensitive match of `pattern`, usually
    /// [`preprocess::MITO_PATTERN`]) to `exp_mito`. Returns how many were found.
    pub fn detect_mito(&mut self, pattern: &str) -> Result<usize, Error> {
        let found = self.split_genes(pattern, true)?;
        let n = found.as_ref().map_or(0, |m| m.n_genes());
        if found.is_some() {
            self.exp_mito = found;
        }
        info!("{} mitochondrial genes detected and removed", n);
        self.assays.record_step("detect_mito", None);
        Ok(n)
    }

    /// Move ERCC spikes (case-sensitive match of `pattern`, usually
    /// [`preprocess::ERCC_PATTERN`]) to `exp_ercc`. Returns how many were found.
    pub fn detect_ercc(&mut self, pattern: &str) -> Result<usize, Error> {
        let found = self.split_genes(pattern, false)?;
        let n = found.as_ref().map_or(0, |m| m.n_genes());
        if found.is_some() {
            self.exp_ercc = found;
        }
        info!("{} ERCC spikes detected", n);
        self.assays.record_step("detect_ercc", None);
        Ok(n)
    }

    /// Drop the cells that are no longer in `exp_mat` from the split-off matrices
    fn sync_cells(&mut self) {
        let cells: HashSet<&str> = self.exp_mat.cells().iter().map(String::as_str).collect();
        for sub in [self.exp_mito.as_mut(), self.exp_ercc.as_mut()].into_iter().flatten() {
            let keep: Vec<bool> = sub.cells().iter().map(|c| cells.contains(c.as_str())).collect();
            sub.retain_cells(&keep);
        }
    }

    /// Remove cells with few reads and genes expressed in few cells
    pub fn simple_filter(&mut self, params: &FilterParams) -> Result<FilterReport, Error> {
        let report = preprocess::filter_by_counts(&mut self.exp_mat, params.min_reads, params.min_expressed)?;
        self.sync_cells();
        self.assays.record_step("simple_filter", None);
        Ok(report)
    }

    /// Remove all-zero cells and genes
    pub fn remove_empty(&mut self) -> FilterReport {
        let report = preprocess::remove_empty(&mut self.exp_mat);
        self.sync_cells();
        self.assays.record_step("remove_empty", None);
        report
    }

    /// Flag low-quality cells into `low_quality_cells`. Nothing is removed; see
    /// [`Dataset::remove_low_quality_cells`].
    pub fn auto_clean(&mut self, rrna_genes: &[String], params: &QcParams) -> Result<QcReport, Error> {
        let report = qc::detect_low_quality_cells(
            &self.exp_mat,
            self.exp_mito.as_ref(),
            self.exp_ercc.as_ref(),
            rrna_genes,
            params,
        )?;
        self.low_quality_cells = report.low_quality_cells.clone();
        self.assays.record_step("auto_clean", None);
        Ok(report)
    }

    /// Remove the cells flagged by [`Dataset::auto_clean`] from the count matrices.
    /// Returns the number of cells removed.
    pub fn remove_low_quality_cells(&mut self) -> usize {
        let flagged: HashSet<&str> = self.low_quality_cells.iter().map(String::as_str).collect();
        let keep: Vec<bool> = self
            .exp_mat
            .cells()
            .iter()
            .map(|c| !flagged.contains(c.as_str()))
            .collect();
        let removed = self.exp_mat.retain_cells(&keep);
        self.sync_cells();
        self.low_quality_cells.clear();
        info!("{} low quality cell(s) removed", removed);
        removed
    }

    /// Principal components of the normalized data, see [`reduce::pca`]
    pub fn pca(&mut self, params: &PcaParams) -> Result<(), Error> {
        reduce::pca(&mut self.norm_data, &mut self.assays, params)
    }

    /// t-SNE embedding of the normalized data, see [`reduce::tsne`]
    pub fn tsne(&mut self, backend: &dyn TsneBackend, params: &TsneParams) -> Result<(), Error> {
        reduce::tsne(&mut self.norm_data, &mut self.assays, backend, params)
    }

    /// UMAP embedding of the normalized data, see [`reduce::umap`]
    pub fn umap(&mut self, backend: &dyn UmapBackend, params: &UmapParams) -> Result<(), Error> {
        reduce::umap(&mut self.norm_data, &mut self.assays, backend, params)
    }
}
