pub mod dmatrix_util; // matrix normalization and column statistics
pub mod knn_graph; // symmetric neighbour graphs over points
pub mod knn_match; // HNSW dictionary for nearest neighbour look-up
pub mod traits; // traits for matrix operations
