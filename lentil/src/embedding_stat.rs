use crate::common::*;

fn record_coerced(dataset: &mut Dataset, what: &str, ncoerced: usize) {
    if ncoerced > 0 {
        warn!(
            "{}: {} non-finite entries set to zero in {}",
            dataset.name(),
            ncoerced,
            what
        );
    }
    dataset.set_uns(UnsKey::CoercedEntries(what.into()), UnsValue::Count(ncoerced));
}

/// Column z-score of `obsm[input]` into `obsm[output]`.
///
/// Constant columns turn into NaN under z-scoring; they are set to
/// zero and the number of such entries is stored under
/// `uns[coerced_{output}]`.
pub fn normalize_embeddings(
    datasets: &mut [Dataset],
    grouping: Grouping,
    input: &ObsmKey,
    output: &ObsmKey,
) -> anyhow::Result<Option<Dataset>> {
    apply_grouped(datasets, grouping, |dataset| {
        let (z, ncoerced) = dataset.obsm(input)?.scale_columns();
        dataset.set_obsm(output.clone(), z)?;
        record_coerced(dataset, &output.to_string(), ncoerced);
        Ok(())
    })
}

/// Empirical spatial correlation of `obsm[feature]` across graph
/// edges, one K x K matrix per dataset in `uns[empirical_correlation]`
///
/// Rows are L1-normalized; for every directed edge `i -> j` the
/// source row `x_i` and target row `y_j` are paired. With columns
/// z-scored over edges, `-(Yᵀ X) / E` is symmetrized, shifted to
/// zero mean over all entries and multiplied by `scaling`.
pub fn compute_empirical_correlations(
    datasets: &mut [Dataset],
    scaling: f32,
    feature: &ObsmKey,
) -> anyhow::Result<()> {
    let Some(first) = datasets.first() else {
        return Ok(());
    };
    let kk = first.obsm(feature)?.ncols();

    for dataset in datasets.iter_mut() {
        let x = dataset.obsm(feature)?;
        ensure_shape("embedding columns across replicates", kk, x.ncols())?;

        let (z, nz) = x.l1_normalize_rows();
        let edges = dataset.graph()?.directed_edges();
        if edges.is_empty() {
            return Err(StatError::degenerate(format!(
                "{} has no spatial edges",
                dataset.name()
            ))
            .into());
        }

        let nedges = edges.len();
        let sources = edges.iter().map(|e| e.0).collect::<Vec<_>>();
        let targets = edges.iter().map(|e| e.1).collect::<Vec<_>>();

        let (xs, nx) = z.select_rows(&sources).scale_columns();
        let (ys, ny) = z.select_rows(&targets).scale_columns();

        let corr = -(ys.transpose() * xs) / nedges as f32;
        let mut ret = (&corr + corr.transpose()) * 0.5;
        let mu = ret.mean();
        ret.add_scalar_mut(-mu);
        ret *= scaling;

        info!(
            "{}: empirical correlation over {} directed edges",
            dataset.name(),
            nedges
        );

        record_coerced(dataset, "empirical_correlation", nz + nx + ny);
        dataset.set_uns(UnsKey::EmpiricalCorrelation, UnsValue::Matrix(ret));
    }
    Ok(())
}

/// Pearson correlation between the columns of
/// `uns[ground_truth_M]` (genes x K), into
/// `uns[ground_truth_M_correlation]`
pub fn compute_columnwise_autocorrelation(dataset: &mut Dataset) -> anyhow::Result<()> {
    let (corr, ncoerced) = dataset
        .uns_matrix(&UnsKey::GroundTruthMetagenes)?
        .column_correlation();

    let key = UnsKey::GroundTruthMetageneCorrelation;
    record_coerced(dataset, &key.to_string(), ncoerced);
    dataset.set_uns(key, UnsValue::Matrix(corr));
    Ok(())
}

/// Gene-gene spatial correlation implied by the learned metagenes
///
/// `neighbor_interactions = M Σ` (genes x K) and
/// `spatial_correlation = M Σ Mᵀ` (genes x genes)
pub fn compute_spatial_correlation(dataset: &mut Dataset) -> anyhow::Result<()> {
    let metagenes = dataset.uns_matrix(&UnsKey::Metagenes)?;
    let affinity = dataset.uns_matrix(&UnsKey::SpatialAffinity)?;

    ensure_shape("spatial affinity columns", affinity.nrows(), affinity.ncols())?;
    ensure_shape("metagenes vs spatial affinity", affinity.nrows(), metagenes.ncols())?;

    let interactions = metagenes * affinity;
    let correlation = &interactions * metagenes.transpose();

    dataset.set_uns(UnsKey::NeighborInteractions, UnsValue::Matrix(interactions));
    dataset.set_uns(UnsKey::SpatialCorrelation, UnsValue::Matrix(correlation));
    Ok(())
}

/// For each directed edge `(i, j)` of the spatial graph, the K x K
/// upper-triangular matrix `1 - z_i[a] z_j[b]` (`a <= b`) of
/// L1-normalized `obsm[X]`
pub fn metagene_neighbor_interactions(dataset: &mut Dataset) -> anyhow::Result<()> {
    let (z, ncoerced) = dataset.obsm(&ObsmKey::Embeddings)?.l1_normalize_rows();
    let edges = dataset.graph()?.directed_edges();
    let kk = z.ncols();

    let values = edges
        .par_iter()
        .map(|&(i, j)| {
            Mat::from_fn(kk, kk, |a, b| {
                if a <= b {
                    1.0 - z[(i, a)] * z[(j, b)]
                } else {
                    0.0
                }
            })
        })
        .collect::<Vec<_>>();

    let key = UnsKey::MetageneNeighborInteractions;
    record_coerced(dataset, &key.to_string(), ncoerced);
    dataset.set_uns(key, UnsValue::EdgeMatrices { edges, values });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn ring(nn: usize, kk: usize) -> Dataset {
        let coordinates = Mat::from_fn(nn, 2, |i, j| if j == 0 { i as f32 } else { 0.0 });
        let mut data = Dataset::new("ring", Mat::zeros(nn, 1), coordinates).unwrap();
        let edges = (0..nn).map(|i| (i, (i + 1) % nn)).collect::<Vec<_>>();
        data.set_adjacency_edges(&edges).unwrap();
        let x = Mat::from_fn(nn, kk, |i, k| ((i * 7 + k * 3) % 5) as f32 + 1.0);
        data.set_obsm(ObsmKey::Embeddings, x).unwrap();
        data
    }

    #[test]
    fn constant_column_is_counted() {
        let mut data = ring(4, 2);
        let mut x = data.obsm(&ObsmKey::Embeddings).unwrap().clone();
        x.column_mut(1).fill(3.0);
        data.set_obsm(ObsmKey::Embeddings, x).unwrap();

        let mut datasets = vec![data];
        normalize_embeddings(
            &mut datasets,
            Grouping::Independent,
            &ObsmKey::Embeddings,
            &ObsmKey::NormalizedEmbeddings,
        )
        .unwrap();

        let data = &datasets[0];
        let z = data.obsm(&ObsmKey::NormalizedEmbeddings).unwrap();
        assert!(z.column(1).iter().all(|&v| v == 0.0));
        assert_abs_diff_eq!(z.column(0).sum(), 0.0, epsilon = 1e-5);
        let key = UnsKey::CoercedEntries("normalized_X".into());
        assert_eq!(data.uns_count(&key).unwrap(), 4);
    }

    #[test]
    fn empirical_correlation_is_symmetric_and_centred() {
        let mut datasets = vec![ring(12, 3), ring(8, 3)];
        compute_empirical_correlations(&mut datasets, 2.0, &ObsmKey::Embeddings).unwrap();

        for data in datasets.iter() {
            let corr = data.uns_matrix(&UnsKey::EmpiricalCorrelation).unwrap();
            assert_eq!(corr.shape(), (3, 3));
            assert_abs_diff_eq!(corr.mean(), 0.0, epsilon = 1e-5);
            for a in 0..3 {
                for b in 0..3 {
                    assert_abs_diff_eq!(corr[(a, b)], corr[(b, a)], epsilon = 1e-5);
                }
            }
        }
    }

    #[test]
    fn empirical_correlation_needs_same_width() {
        let mut datasets = vec![ring(6, 3), ring(6, 2)];
        let err = compute_empirical_correlations(&mut datasets, 1.0, &ObsmKey::Embeddings)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StatError>(),
            Some(StatError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn spatial_correlation_shapes() {
        let mut data = ring(4, 2);
        let m = Mat::from_row_slice(3, 2, &[1., 0., 0., 1., 1., 1.]);
        let sigma = Mat::from_row_slice(2, 2, &[2., 1., 1., 2.]);
        data.set_uns(UnsKey::Metagenes, UnsValue::Matrix(m));
        data.set_uns(UnsKey::SpatialAffinity, UnsValue::Matrix(sigma));

        compute_spatial_correlation(&mut data).unwrap();
        let sc = data.uns_matrix(&UnsKey::SpatialCorrelation).unwrap();
        assert_eq!(sc.shape(), (3, 3));
        // row 2 of M is (1, 1): (1,1) Σ (1,1)ᵀ = 6
        assert_abs_diff_eq!(sc[(2, 2)], 6.0);
        assert_eq!(
            data.uns_matrix(&UnsKey::NeighborInteractions).unwrap().shape(),
            (3, 2)
        );

        data.set_uns(UnsKey::SpatialAffinity, UnsValue::Matrix(Mat::zeros(3, 3)));
        assert!(compute_spatial_correlation(&mut data).is_err());
    }

    #[test]
    fn columnwise_autocorrelation_has_unit_diagonal() {
        let mut data = ring(4, 2);
        let m = Mat::from_row_slice(4, 2, &[1., 2., 2., 4.1, 3., 5.9, 4., 8.]);
        data.set_uns(UnsKey::GroundTruthMetagenes, UnsValue::Matrix(m));
        compute_columnwise_autocorrelation(&mut data).unwrap();

        let corr = data
            .uns_matrix(&UnsKey::GroundTruthMetageneCorrelation)
            .unwrap();
        assert_abs_diff_eq!(corr[(0, 0)], 1.0, epsilon = 1e-5);
        assert_abs_diff_eq!(corr[(1, 1)], 1.0, epsilon = 1e-5);
        assert!(corr[(0, 1)] > 0.99);
    }

    #[test]
    fn neighbor_interactions_per_directed_edge() {
        let mut data = ring(4, 2);
        metagene_neighbor_interactions(&mut data).unwrap();
        match data.uns(&UnsKey::MetageneNeighborInteractions).unwrap() {
            UnsValue::EdgeMatrices { edges, values } => {
                assert_eq!(edges.len(), 8);
                assert_eq!(values.len(), 8);
                assert!(values.iter().all(|v| v[(1, 0)] == 0.0));
                assert!(values.iter().all(|v| v[(0, 1)] > 0.0 && v[(0, 1)] < 1.0));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
