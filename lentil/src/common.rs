#![allow(dead_code)]

pub type Mat = nalgebra::DMatrix<f32>;
pub type DVec = nalgebra::DVector<f32>;
pub type CscMat = nalgebra_sparse::CscMatrix<f32>;
pub type CountMat = nalgebra::DMatrix<usize>;

pub use crate::dataset::*;
pub use crate::error::{ensure_shape, StatError};
pub use crate::grouping::{apply_grouped, Grouping};

pub use matrix_util::dmatrix_util::concatenate_vertical;
pub use matrix_util::knn_graph::{KnnGraphArgs, NeighborGraph};
pub use matrix_util::knn_match::{ColumnDict, VecPoint};
pub use matrix_util::traits::*;

pub use indicatif::ParallelProgressIterator;
pub use log::{info, warn};
pub use rayon::prelude::*;
pub use std::collections::{HashMap, HashSet};
