//! Cell and gene filters applied to the raw count matrix before any analysis

use crate::error::ScdrError;
use crate::matrix::ExpressionMatrix;
use anyhow::Error;
use itertools::Itertools;
use log::info;
use regex::RegexBuilder;
use std::str::FromStr;

/// Default pattern for mitochondrial gene symbols
pub const MITO_PATTERN: &str = "^mt-";

/// Default pattern for ERCC spike-in identifiers
pub const ERCC_PATTERN: &str = r"^ERCC[_-]\S+$";

/// Minimum expression breadth a gene needs to survive `filter_by_counts`
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ExpressedGenes {
    /// Keep genes expressed in strictly more than this many cells
    Count(usize),
    /// Keep genes expressed in strictly more than this fraction of cells, in [0, 1]
    Fraction(f64),
}

impl ExpressedGenes {
    fn validate(&self) -> Result<(), ScdrError> {
        match *self {
            ExpressedGenes::Fraction(f) if !(0.0..=1.0).contains(&f) => Err(ScdrError::invalid(format!(
                "expressed-cell fraction must be in [0, 1], got {f}"
            ))),
            _ => Ok(()),
        }
    }
}

impl FromStr for ExpressedGenes {
    type Err = Error;

    /// Integers are cell counts, anything with a decimal point is a fraction
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let threshold = if let Ok(n) = s.parse::<usize>() {
            ExpressedGenes::Count(n)
        } else {
            let f = s
                .parse::<f64>()
                .map_err(|_| ScdrError::invalid(format!("expressed-gene threshold not recognized: {s}")))?;
            ExpressedGenes::Fraction(f)
        };
        threshold.validate()?;
        Ok(threshold)
    }
}

/// Settings for `filter_by_counts`
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FilterParams {
    /// Cells need strictly more reads than this
    pub min_reads: f64,
    /// Gene expression breadth threshold
    pub min_expressed: ExpressedGenes,
}

impl FilterParams {
    /// New FilterParams with default settings
    pub fn new() -> FilterParams {
        FilterParams {
            min_reads: 1000.0,
            min_expressed: ExpressedGenes::Fraction(0.001),
        }
    }
}

impl Default for FilterParams {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of rows and columns dropped by a filter
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FilterReport {
    /// columns removed
    pub cells_removed: usize,
    /// rows removed
    pub genes_removed: usize,
}

/// Remove cells with `min_reads` reads or fewer, then genes that are expressed in too few
/// of the remaining cells. A zero threshold only drops genes expressed nowhere, so on a matrix
/// without empty rows and columns `(0, Count(0))` changes nothing.
pub fn filter_by_counts(
    matrix: &mut ExpressionMatrix,
    min_reads: f64,
    min_expressed: ExpressedGenes,
) -> Result<FilterReport, Error> {
    min_expressed.validate()?;

    let keep_cells: Vec<bool> = matrix.cell_sums().iter().map(|&s| s > min_reads).collect();
    let cells_removed = matrix.retain_cells(&keep_cells);
    info!("{} cells removed", cells_removed);

    let n_cells = matrix.n_cells();
    let expressed = matrix.expressed_cells();
    let keep_genes: Vec<bool> = match min_expressed {
        ExpressedGenes::Count(n) => expressed.iter().map(|&e| e > n).collect(),
        ExpressedGenes::Fraction(f) => expressed
            .iter()
            .map(|&e| n_cells > 0 && (e as f64 / n_cells as f64) > f)
            .collect(),
    };
    let genes_removed = matrix.retain_genes(&keep_genes);
    info!("Removed {} genes.", genes_removed);

    Ok(FilterReport {
        cells_removed,
        genes_removed,
    })
}

/// Remove all-zero cells and all-zero genes. Both are determined on the input matrix
/// before anything is removed.
pub fn remove_empty(matrix: &mut ExpressionMatrix) -> FilterReport {
    let keep_cells: Vec<bool> = matrix.detected_genes().iter().map(|&n| n > 0).collect();
    let keep_genes: Vec<bool> = matrix.expressed_cells().iter().map(|&n| n > 0).collect();

    let cells_removed = matrix.retain_cells(&keep_cells);
    if cells_removed > 0 {
        info!("{} empty cells will be removed", cells_removed);
    }
    let genes_removed = matrix.retain_genes(&keep_genes);
    if genes_removed > 0 {
        info!("{} empty genes will be removed", genes_removed);
    }

    FilterReport {
        cells_removed,
        genes_removed,
    }
}

/// Rows whose gene identifier matches the regular expression `pattern`, in order
pub fn matching_genes(matrix: &ExpressionMatrix, pattern: &str, case_insensitive: bool) -> Result<Vec<usize>, Error> {
    let re = RegexBuilder::new(pattern)
        .case_insensitive(case_insensitive)
        .build()
        .map_err(|e| ScdrError::invalid(format!("bad gene pattern '{pattern}': {e}")))?;

    let matched: Vec<usize> = matrix.genes().iter().positions(|g| re.is_match(g)).collect();
    info!("{} genes match '{}'", matched.len(), pattern);
    Ok(matched)
}

/// Move the genes whose identifier matches the regular expression `pattern` into a separate
/// matrix. Returns `(remainder, extracted)`. If nothing matches, the remainder is a copy
/// of `matrix` and the extracted matrix is empty over the same cells.
pub fn split_by_pattern(
    matrix: &ExpressionMatrix,
    pattern: &str,
    case_insensitive: bool,
) -> Result<(ExpressionMatrix, ExpressionMatrix), Error> {
    let matched = matching_genes(&matrix, pattern, case_insensitive)?;
    if matched.is_empty() {
        let empty = ExpressionMatrix::empty(matrix.cells().to_vec());
        return Ok((matrix.clone(), empty));
    }

    let kept: Vec<usize> = (0..matrix.n_genes())
        .filter(|i| matched.binary_search(i).is_err())
        .collect();
    Ok((matrix.select_genes(&kept), matrix.select_genes(&matched)))
}
