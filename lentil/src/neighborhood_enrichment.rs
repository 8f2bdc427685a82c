use crate::common::*;

/// Neighbourhood enrichment of labels over a fixed spatial graph
///
/// For a label matrix `L` (spots x labels, one-hot or any
/// non-negative weights) and adjacency `A`, the observed
/// co-occurrence `C = Lᵀ A L` is compared with what the marginal
/// label frequencies alone would give:
///
/// $$E_{ab} = W \cdot \frac{s_a}{S} \cdot \frac{s_b}{S}$$
///
/// where `s` are the column sums of `L`, `S = Σ s` and `W = Σ A`.
/// The score is `C / E`: 1 at chance, above 1 for attraction, below
/// 1 for avoidance. Entries with zero expectation score 0.
///
/// The graph part (`A`, `W`) is fixed across calls, so permutation
/// loops only redo the label products.
pub struct EnrichmentGraph<'a> {
    adjacency: &'a CscMat,
    total_weight: f32,
}

impl<'a> EnrichmentGraph<'a> {
    pub fn new(adjacency: &'a CscMat) -> anyhow::Result<Self> {
        ensure_shape("adjacency columns", adjacency.nrows(), adjacency.ncols())?;
        let total_weight = adjacency.values().iter().sum::<f32>();
        Ok(Self {
            adjacency,
            total_weight,
        })
    }

    pub fn num_nodes(&self) -> usize {
        self.adjacency.nrows()
    }

    pub fn total_weight(&self) -> f32 {
        self.total_weight
    }

    /// labels x labels enrichment of `labels` (spots x labels)
    pub fn enrichment(&self, labels: &Mat) -> anyhow::Result<Mat> {
        ensure_shape("label rows", self.num_nodes(), labels.nrows())?;
        Ok(self.score(labels))
    }

    /// Enrichment after moving row `order[i]` of `labels` to row `i`
    pub fn enrichment_permuted(&self, labels: &Mat, order: &[usize]) -> anyhow::Result<Mat> {
        ensure_shape("permutation length", self.num_nodes(), order.len())?;
        ensure_shape("label rows", self.num_nodes(), labels.nrows())?;
        let permuted = labels.select_rows(order);
        Ok(self.score(&permuted))
    }

    fn score(&self, labels: &Mat) -> Mat {
        let kk = labels.ncols();
        let neighbour_sum: Mat = self.adjacency * labels;
        let observed = labels.transpose() * neighbour_sum;

        let marginal = labels.column_sums();
        let total = marginal.sum();

        let mut ret = Mat::zeros(kk, kk);
        if total <= 0.0 || self.total_weight <= 0.0 {
            return ret;
        }

        for b in 0..kk {
            for a in 0..kk {
                let expected = self.total_weight * (marginal[a] / total) * (marginal[b] / total);
                if expected > 0.0 {
                    ret[(a, b)] = observed[(a, b)] / expected;
                }
            }
        }
        ret
    }
}

/// One-off neighbourhood enrichment; see [`EnrichmentGraph`]
pub fn compute_neighborhood_enrichment(labels: &Mat, adjacency: &CscMat) -> anyhow::Result<Mat> {
    EnrichmentGraph::new(adjacency)?.enrichment(labels)
}

/// One-hot encode category codes into a spots x categories matrix
pub fn one_hot(codes: &[usize], num_categories: usize) -> anyhow::Result<Mat> {
    let mut ret = Mat::zeros(codes.len(), num_categories);
    for (i, &c) in codes.iter().enumerate() {
        anyhow::ensure!(c < num_categories, "category {} out of {}", c, num_categories);
        ret[(i, c)] = 1.0;
    }
    Ok(ret)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    /// path 0-1-2-3-4-5, labels [a a a b b b]
    fn path_graph() -> (NeighborGraph, Mat) {
        let edges = (1..6).map(|i| (i - 1, i)).collect::<Vec<_>>();
        let graph = NeighborGraph::from_edges(6, &edges).unwrap();
        let labels = one_hot(&[0, 0, 0, 1, 1, 1], 2).unwrap();
        (graph, labels)
    }

    #[test]
    fn path_graph_enrichment() {
        let (graph, labels) = path_graph();
        let score = compute_neighborhood_enrichment(&labels, &graph.adjacency).unwrap();

        // W = 10, each label holds half of the spots: E = 2.5
        // C_aa = 4 (two edges both ways), C_ab = 1
        assert_abs_diff_eq!(score[(0, 0)], 4.0 / 2.5, epsilon = 1e-6);
        assert_abs_diff_eq!(score[(1, 1)], 4.0 / 2.5, epsilon = 1e-6);
        assert_abs_diff_eq!(score[(0, 1)], 1.0 / 2.5, epsilon = 1e-6);
        assert_abs_diff_eq!(score[(0, 1)], score[(1, 0)], epsilon = 1e-6);
    }

    #[test]
    fn soft_labels_are_symmetric() {
        let (graph, _) = path_graph();
        let soft = Mat::from_fn(6, 3, |i, j| ((i + 1) * (j + 2) % 5) as f32 + 0.5);
        let score = compute_neighborhood_enrichment(&soft, &graph.adjacency).unwrap();
        for a in 0..3 {
            for b in 0..3 {
                assert_abs_diff_eq!(score[(a, b)], score[(b, a)], epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn identity_permutation_changes_nothing() {
        let (graph, labels) = path_graph();
        let eg = EnrichmentGraph::new(&graph.adjacency).unwrap();
        let order = (0..6).collect::<Vec<_>>();
        assert_eq!(
            eg.enrichment(&labels).unwrap(),
            eg.enrichment_permuted(&labels, &order).unwrap()
        );
    }

    #[test]
    fn empty_label_column_scores_zero() {
        let (graph, _) = path_graph();
        let labels = one_hot(&[0, 0, 0, 0, 0, 0], 2).unwrap();
        let score = compute_neighborhood_enrichment(&labels, &graph.adjacency).unwrap();
        assert_abs_diff_eq!(score[(0, 0)], 1.0, epsilon = 1e-6);
        assert_eq!(score[(1, 1)], 0.0);
        assert!(score.iter().all(|x| x.is_finite()));
    }

    /// 0 -(2.0)- 1 -(0.5)- 2, both directions stored
    fn weighted_path(scale: f32) -> CscMat {
        let mut coo = nalgebra_sparse::CooMatrix::<f32>::new(3, 3);
        for &(i, j, w) in [(0, 1, 2.0), (1, 2, 0.5)].iter() {
            coo.push(i, j, scale * w);
            coo.push(j, i, scale * w);
        }
        CscMat::from(&coo)
    }

    #[test]
    fn weighted_adjacency() {
        let labels = one_hot(&[0, 0, 1], 2).unwrap();
        let adjacency = weighted_path(1.0);

        let eg = EnrichmentGraph::new(&adjacency).unwrap();
        assert_abs_diff_eq!(eg.total_weight(), 5.0, epsilon = 1e-6);

        // s = (2, 1), S = 3, W = 5
        // C_aa = 2 + 2, C_ab = 0.5, C_bb = 0
        let score = eg.enrichment(&labels).unwrap();
        assert_abs_diff_eq!(score[(0, 0)], 4.0 / (5.0 * 4.0 / 9.0), epsilon = 1e-5);
        assert_abs_diff_eq!(score[(0, 1)], 0.5 / (5.0 * 2.0 / 9.0), epsilon = 1e-5);
        assert_abs_diff_eq!(score[(1, 0)], score[(0, 1)], epsilon = 1e-6);
        assert_eq!(score[(1, 1)], 0.0);

        // a uniform rescaling of the weights cancels out
        let scaled = weighted_path(3.0);
        let eg3 = EnrichmentGraph::new(&scaled).unwrap();
        assert_abs_diff_eq!(eg3.total_weight(), 15.0, epsilon = 1e-5);
        let score3 = eg3.enrichment(&labels).unwrap();
        for (x, y) in score.iter().zip(score3.iter()) {
            assert_abs_diff_eq!(*x, *y, epsilon = 1e-5);
        }
    }

    #[test]
    fn label_rows_must_match_graph() {
        let (graph, _) = path_graph();
        let labels = Mat::zeros(5, 2);
        assert!(compute_neighborhood_enrichment(&labels, &graph.adjacency).is_err());
    }
}
