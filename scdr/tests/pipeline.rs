use ndarray::{Array2, Axis};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64Mcg;
use scdr::dataset::NormRecord;
use scdr::dim_red::SvdMethod;
use scdr::preprocess::{ExpressedGenes, FilterParams, ERCC_PATTERN, MITO_PATTERN};
use scdr::qc::QcParams;
use scdr::reduce::{PcaParams, TsneBackend, TsneParams, UmapBackend, UmapParams};
use scdr::{Dataset, ExpressionMatrix, ScdrError};

const N_CELLS: usize = 120;

/// 100 nuclear genes (two rRNA), 3 mitochondrial genes and 2 ERCC spikes, plus one gene
/// that is never expressed and one empty cell at the end
fn raw_counts() -> ExpressionMatrix {
    let mut rng = Pcg64Mcg::seed_from_u64(2024);
    let mut genes: Vec<String> = (0..100).map(|i| format!("Gene{i}")).collect();
    genes[0] = "Rn45s".into();
    genes[1] = "Rn18s".into();
    genes.extend(["mt-Co1", "mt-Nd1", "MT-Atp6", "ERCC-00002", "ERCC-00003", "Silent"].map(String::from));

    let mut counts = Array2::<f64>::zeros((genes.len(), N_CELLS + 1));
    for j in 0..N_CELLS {
        for i in 0..100 {
            counts[(i, j)] = rng.gen_range(0..8) as f64;
        }
        for i in 100..103 {
            counts[(i, j)] = if j == 0 { 2000.0 } else { rng.gen_range(1..12) as f64 };
        }
        for i in 103..105 {
            counts[(i, j)] = rng.gen_range(1..6) as f64;
        }
    }

    let cells = (0..=N_CELLS).map(|j| format!("AAAC{j:04}-1")).collect();
    ExpressionMatrix::new(genes, cells, counts).unwrap()
}

/// log1p of counts per 10k, with the 20 most variable genes as HVG
fn normalize(exp: &ExpressionMatrix) -> NormRecord {
    let totals = exp.cell_sums();
    let values = (&exp.values() / &totals * 1e4).mapv(f64::ln_1p);

    let var = values.var_axis(Axis(1), 0.0);
    let mut order: Vec<usize> = (0..var.len()).collect();
    order.sort_by(|&a, &b| var[b].total_cmp(&var[a]));
    let hvg: Vec<String> = order[..20].iter().map(|&i| exp.genes()[i].clone()).collect();

    let data = ExpressionMatrix::new(exp.genes().to_vec(), exp.cells().to_vec(), values).unwrap();
    NormRecord::new(data).with_hvg(hvg)
}

/// Embeds with the first two input columns
struct Leading2;

impl TsneBackend for Leading2 {
    fn embed(&self, data: ndarray::ArrayView2<'_, f64>, _: &TsneParams) -> anyhow::Result<Array2<f64>> {
        Ok(data.slice(ndarray::s![.., 0..2]).to_owned())
    }
}

impl UmapBackend for Leading2 {
    fn embed(&self, data: ndarray::ArrayView2<'_, f64>, _: &UmapParams) -> anyhow::Result<Array2<f64>> {
        Ok(data.slice(ndarray::s![.., 0..2]).to_owned())
    }
}

#[test]
fn test_full_pipeline() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut ds = Dataset::new(raw_counts());

    let report = ds.remove_empty();
    assert_eq!((report.cells_removed, report.genes_removed), (1, 1));

    assert_eq!(ds.detect_mito(MITO_PATTERN).unwrap(), 3);
    assert_eq!(ds.detect_ercc(ERCC_PATTERN).unwrap(), 2);

    let filter = FilterParams {
        min_reads: 100.0,
        min_expressed: ExpressedGenes::Fraction(0.001),
    };
    let report = ds.simple_filter(&filter).unwrap();
    assert_eq!(report.cells_removed, 0);

    let rrna = vec!["Rn45s".to_string(), "Rn18s".to_string()];
    let qc = ds.auto_clean(&rrna, &QcParams::new()).unwrap();
    assert!(qc.low_quality_cells.contains(&"AAAC0000-1".to_string()));
    let removed = ds.remove_low_quality_cells();
    assert_eq!(removed, qc.low_quality_cells.len());
    let n_cells = ds.exp_mat.n_cells();

    let err = ds.pca(&PcaParams::new()).unwrap_err();
    assert_eq!(
        err.downcast_ref::<ScdrError>().and_then(|e| e.missing_step()),
        Some("normalize")
    );

    let record = normalize(&ds.exp_mat);
    ds.add_normalization("standard", record);

    let params = PcaParams {
        ncomp: 10,
        seed: Some(1),
        ..PcaParams::new()
    };
    ds.pca(&params).unwrap();
    ds.tsne(&Leading2, &TsneParams::new()).unwrap();
    ds.umap(&Leading2, &UmapParams::new()).unwrap();

    let dr = &ds.norm_data["standard"].dr;
    let pca = dr.pca.as_ref().unwrap();
    assert_eq!(pca.components.dim(), (n_cells, 10));
    assert_eq!(pca.loadings.dim(), (20, 10));
    assert_eq!(pca.method, SvdMethod::Irlb);
    assert_eq!(dr.tsne.as_ref().unwrap().embedding.dim(), (n_cells, 2));
    assert_eq!(dr.umap.as_ref().unwrap().cells, pca.cells);

    let steps: Vec<(&str, Option<&str>)> = ds
        .assays
        .entries()
        .iter()
        .map(|e| (e.step.as_str(), e.method.as_deref()))
        .collect();
    assert_eq!(
        steps,
        vec![
            ("remove_empty", None),
            ("detect_mito", None),
            ("detect_ercc", None),
            ("simple_filter", None),
            ("auto_clean", None),
            ("pca", Some("irlb")),
            ("tsne", None),
            ("umap", None),
        ]
    );
}

#[test]
fn test_pca_more_components_than_genes() {
    let mut ds = Dataset::new(raw_counts());
    ds.remove_empty();
    let record = normalize(&ds.exp_mat);
    ds.add_normalization("standard", record);

    let params = PcaParams {
        method: SvdMethod::Svd,
        ncomp: 21,
        ..PcaParams::new()
    };
    let err = ds.pca(&params).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ScdrError>(),
        Some(ScdrError::InvalidParameter(_))
    ));
    assert!(ds.norm_data["standard"].dr.pca.is_none());
}
