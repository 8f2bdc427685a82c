use matrix_util::knn_graph::{KnnGraphArgs, NeighborGraph};
use matrix_util::knn_match::*;
use nalgebra::DMatrix;

/// 5 x 4 regular lattice with unit spacing
fn lattice() -> DMatrix<f32> {
    let mut data = DMatrix::<f32>::zeros(20, 2);
    for i in 0..20 {
        data[(i, 0)] = (i % 5) as f32;
        data[(i, 1)] = (i / 5) as f32;
    }
    data
}

#[test]
fn nearest_rows_on_lattice() -> anyhow::Result<()> {
    let data = lattice();
    let dict = ColumnDict::from_rows(&data, (0..20).collect());

    let queries = DMatrix::from_row_slice(2, 2, &[0.1, 0.2, 3.8, 2.9]);
    let nearest = dict.nearest_rows(&queries, 2)?;

    assert_eq!(nearest[0].as_ref().map(|x| x.0), Some(0));
    assert_eq!(nearest[1].as_ref().map(|x| x.0), Some(19));
    Ok(())
}

#[test]
fn lattice_graph_is_local() -> anyhow::Result<()> {
    let data = lattice();
    let args = KnnGraphArgs {
        knn: 3,
        block_size: 7,
        reciprocal: false,
    };
    let graph = NeighborGraph::from_rows(&data, &args)?;

    assert_eq!(graph.num_nodes(), 20);
    for (&(i, j), &d) in graph.edges.iter().zip(graph.distances.iter()) {
        assert!(i < j);
        assert!(d <= 2.0_f32.sqrt() + 1e-5, "edge ({}, {}) too long: {}", i, j, d);
    }
    Ok(())
}
