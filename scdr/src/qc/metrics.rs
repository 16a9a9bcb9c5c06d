//! Per-cell quality-control metrics

use crate::error::ScdrError;
use crate::matrix::ExpressionMatrix;
use anyhow::Error;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use std::collections::HashSet;

/// Column names of a [`QcMatrix`], in order
pub const QC_METRICS: [&str; 5] = [
    "log_total_reads",
    "detected_genes",
    "percent_rrna",
    "percent_mito",
    "percent_ercc",
];

/// Cells x 5 matrix of quality-control metrics, columns as in [`QC_METRICS`]
#[derive(Clone, Debug, PartialEq)]
pub struct QcMatrix {
    cells: Vec<String>,
    values: Array2<f64>,
}

/// Reads of the `sub` matrix per cell of `exp`, matched by cell identifier
fn aligned_sums(
    exp: &ExpressionMatrix,
    sub: &ExpressionMatrix,
    step: &'static str,
    what: &str,
) -> Result<Array1<f64>, ScdrError> {
    let sums = sub.cell_sums();
    let index = sub.cell_index();
    exp.cells()
        .iter()
        .map(|cell| {
            index.get(cell.as_str()).map(|&j| sums[j]).ok_or_else(|| {
                ScdrError::precondition(step, format!("Cell '{cell}' is missing from the {what} matrix."))
            })
        })
        .collect()
}

impl QcMatrix {
    /// Compute the metrics for every cell of `exp`. Percentages are relative to the total
    /// reads of the cell in `exp`. `rrna` genes that are not in `exp` are ignored.
    pub fn compute(
        exp: &ExpressionMatrix,
        mito: &ExpressionMatrix,
        ercc: &ExpressionMatrix,
        rrna: &[String],
    ) -> Result<QcMatrix, Error> {
        let totals = exp.cell_sums();
        if let Some(j) = totals.iter().position(|&t| t <= 0.0) {
            return Err(ScdrError::precondition(
                "remove_empty",
                format!("Cell '{}' has no reads.", exp.cells()[j]),
            )
            .into());
        }

        let mito_reads = aligned_sums(exp, mito, "detect_mito", "mitochondrial")?;
        let ercc_reads = aligned_sums(exp, ercc, "detect_ercc", "ERCC")?;

        let rrna: HashSet<&str> = rrna.iter().map(String::as_str).collect();
        let rrna_rows: Vec<usize> = exp
            .genes()
            .iter()
            .enumerate()
            .filter(|(_, g)| rrna.contains(g.as_str()))
            .map(|(i, _)| i)
            .collect();
        let rrna_reads = exp.select_genes(&rrna_rows).cell_sums();
        let detected = exp.detected_genes();

        let mut values = Array2::zeros((exp.n_cells(), QC_METRICS.len()));
        for (j, mut row) in values.rows_mut().into_iter().enumerate() {
            let total = totals[j];
            row[0] = total.ln();
            row[1] = detected[j] as f64;
            row[2] = rrna_reads[j] / total * 100.0;
            row[3] = mito_reads[j] / total * 100.0;
            row[4] = ercc_reads[j] / total * 100.0;
        }

        Ok(QcMatrix {
            cells: exp.cells().to_vec(),
            values,
        })
    }

    /// Cell identifiers, in row order
    pub fn cells(&self) -> &[String] {
        &self.cells
    }

    /// cells x 5 metric values
    pub fn values(&self) -> ArrayView2<'_, f64> {
        self.values.view()
    }

    /// One metric for all cells, by name from [`QC_METRICS`]
    pub fn metric(&self, name: &str) -> Option<ArrayView1<'_, f64>> {
        QC_METRICS
            .iter()
            .position(|&m| m == name)
            .map(|i| self.values.column(i))
    }
}
