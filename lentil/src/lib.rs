//! Statistics for metagene embeddings of spatial transcriptomics data
//!
//! Every function works on one or more [`Dataset`]s (expression,
//! spot coordinates, spatial neighbour graph) and records its results
//! in the dataset's typed `obs`/`obsm`/`uns` stores:
//!
//! - neighbourhood enrichment and its permutation test
//! - agreement of cluster labels with ground truth (optimal label
//!   matching, ARI, silhouette) and kNN classification benchmarks
//! - spatial correlation summaries of metagene embeddings
//! - binning of high-resolution data onto a coarser grid

mod common;

pub mod classification; // stratified split + kNN classifier precision
pub mod clustering_agreement; // confusion matrix, ARI, silhouette
pub mod dataset; // dataset container and typed keys
pub mod embedding_stat; // normalization and spatial correlation of embeddings
pub mod error; // typed failures carried in anyhow::Error
pub mod grouping; // per-replicate vs joint processing
pub mod neighborhood_enrichment;
pub mod optimal_matching; // maximum-weight label matching
pub mod resolution_search; // clustering to a target number of clusters
pub mod spatial_binning; // grid down-sampling of high-resolution data

pub use common::{CountMat, Mat};
pub use dataset::{Dataset, ObsmKey, Split, UnsKey, UnsValue};
pub use error::StatError;
pub use grouping::Grouping;
