//! Labelled gene x cell expression matrix

use crate::error::ScdrError;
use anyhow::Error;
use ndarray::{Array1, Array2, ArrayView2, Axis};
use std::collections::{BTreeSet, HashMap, HashSet};

/// Dense expression matrix with gene (row) and cell barcode (column) identifiers.
/// Values are counts for the raw matrix and arbitrary reals for normalized data.
#[derive(Clone, Debug, PartialEq)]
pub struct ExpressionMatrix {
    genes: Vec<String>,
    cells: Vec<String>,
    values: Array2<f64>,
}

fn check_unique(ids: &[String], what: &str) -> Result<(), ScdrError> {
    let mut seen = HashSet::with_capacity(ids.len());
    for id in ids {
        if !seen.insert(id.as_str()) {
            return Err(ScdrError::invalid(format!("duplicate {what} identifier '{id}'")));
        }
    }
    Ok(())
}

impl ExpressionMatrix {
    /// Create a matrix, checking that the identifiers match the shape of `values`
    /// and that they are unique.
    pub fn new(genes: Vec<String>, cells: Vec<String>, values: Array2<f64>) -> Result<ExpressionMatrix, Error> {
        if values.nrows() != genes.len() || values.ncols() != cells.len() {
            return Err(ScdrError::invalid(format!(
                "matrix of shape {:?} does not match {} genes and {} cells",
                values.shape(),
                genes.len(),
                cells.len()
            ))
            .into());
        }
        check_unique(&genes, "gene")?;
        check_unique(&cells, "cell")?;

        Ok(ExpressionMatrix { genes, cells, values })
    }

    /// Matrix with the given cells and no genes
    pub fn empty(cells: Vec<String>) -> ExpressionMatrix {
        let values = Array2::zeros((0, cells.len()));
        ExpressionMatrix {
            genes: Vec::new(),
            cells,
            values,
        }
    }

    /// Gene identifiers, in row order
    pub fn genes(&self) -> &[String] {
        &self.genes
    }

    /// Cell identifiers, in column order
    pub fn cells(&self) -> &[String] {
        &self.cells
    }

    /// View of the values, genes x cells
    pub fn values(&self) -> ArrayView2<'_, f64> {
        self.values.view()
    }

    /// Number of genes
    pub fn n_genes(&self) -> usize {
        self.genes.len()
    }

    /// Number of cells
    pub fn n_cells(&self) -> usize {
        self.cells.len()
    }

    /// `[genes, cells]`
    pub fn shape(&self) -> [usize; 2] {
        [self.n_genes(), self.n_cells()]
    }

    /// True if the matrix has no genes.
    pub fn is_empty(&self) -> bool {
        self.genes.is_empty()
    }

    /// Total per cell
    pub fn cell_sums(&self) -> Array1<f64> {
        self.values.sum_axis(Axis(0))
    }

    /// Total per gene
    pub fn gene_sums(&self) -> Array1<f64> {
        self.values.sum_axis(Axis(1))
    }

    /// Number of cells with a non-zero value, per gene
    pub fn expressed_cells(&self) -> Array1<usize> {
        self.values
            .map_axis(Axis(1), |row| row.iter().filter(|&&v| v > 0.0).count())
    }

    /// Number of genes with a non-zero value, per cell
    pub fn detected_genes(&self) -> Array1<usize> {
        self.values
            .map_axis(Axis(0), |col| col.iter().filter(|&&v| v > 0.0).count())
    }

    /// Map from cell identifier to column index
    pub fn cell_index(&self) -> HashMap<&str, usize> {
        self.cells.iter().enumerate().map(|(i, c)| (c.as_str(), i)).collect()
    }

    /// New matrix with the genes at `rows`, in that order
    pub(crate) fn select_genes(&self, rows: &[usize]) -> ExpressionMatrix {
        ExpressionMatrix {
            genes: rows.iter().map(|&r| self.genes[r].clone()).collect(),
            cells: self.cells.clone(),
            values: self.values.select(Axis(0), rows),
        }
    }

    /// New matrix with the cells at `cols`, in that order
    pub(crate) fn select_cells(&self, cols: &[usize]) -> ExpressionMatrix {
        ExpressionMatrix {
            genes: self.genes.clone(),
            cells: cols.iter().map(|&c| self.cells[c].clone()).collect(),
            values: self.values.select(Axis(1), cols),
        }
    }

    /// Keep the genes where `keep` is true. Returns the number removed.
    pub(crate) fn retain_genes(&mut self, keep: &[bool]) -> usize {
        assert_eq!(keep.len(), self.n_genes());
        let rows: Vec<usize> = (0..keep.len()).filter(|&i| keep[i]).collect();
        let removed = keep.len() - rows.len();
        if removed > 0 {
            *self = self.select_genes(&rows);
        }
        removed
    }

    /// Keep the cells where `keep` is true. Returns the number removed.
    pub(crate) fn retain_cells(&mut self, keep: &[bool]) -> usize {
        assert_eq!(keep.len(), self.n_cells());
        let cols: Vec<usize> = (0..keep.len()).filter(|&i| keep[i]).collect();
        let removed = keep.len() - cols.len();
        if removed > 0 {
            *self = self.select_cells(&cols);
        }
        removed
    }

    /// Rows whose gene is in `genes`, keeping the matrix order
    pub fn subset_genes(&self, genes: &BTreeSet<String>) -> ExpressionMatrix {
        let rows: Vec<usize> = self
            .genes
            .iter()
            .enumerate()
            .filter(|(_, g)| genes.contains(*g))
            .map(|(i, _)| i)
            .collect();
        self.select_genes(&rows)
    }

    /// Split into `(labels..., values)`
    pub fn into_parts(self) -> (Vec<String>, Vec<String>, Array2<f64>) {
        (self.genes, self.cells, self.values)
    }
}
