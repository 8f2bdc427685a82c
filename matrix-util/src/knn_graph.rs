use crate::knn_match::ColumnDict;

use dashmap::DashMap;
use indicatif::ParallelProgressIterator;
use log::info;
use nalgebra::DMatrix;
use nalgebra_sparse::{CooMatrix, CscMatrix};
use rayon::prelude::*;

const DEFAULT_BLOCK_SIZE: usize = 1000;

/// Undirected neighbour graph over `n_nodes` points
#[derive(Clone, Debug)]
pub struct NeighborGraph {
    /// Symmetric CSC adjacency matrix (n_nodes x n_nodes), unit weights
    pub adjacency: CscMatrix<f32>,
    /// Sorted edge list (i < j), deduplicated
    pub edges: Vec<(usize, usize)>,
    /// Edge distances, parallel to `edges` (zero when unknown)
    pub distances: Vec<f32>,
    /// Number of nodes
    pub n_nodes: usize,
}

#[derive(Debug, Clone)]
pub struct KnnGraphArgs {
    pub knn: usize,
    pub block_size: usize,
    /// If true, keep only reciprocal edges (i→j AND j→i).
    /// If false, keep union edges (i→j OR j→i), using min distance.
    pub reciprocal: bool,
}

impl Default for KnnGraphArgs {
    fn default() -> Self {
        Self {
            knn: 6,
            block_size: DEFAULT_BLOCK_SIZE,
            reciprocal: false,
        }
    }
}

impl NeighborGraph {
    /// Build a KNN graph from row vectors (points × dims).
    ///
    /// * `data` - matrix (n x d), where each row is a point
    /// * `args` - KNN graph construction parameters
    pub fn from_rows(data: &DMatrix<f32>, args: &KnnGraphArgs) -> anyhow::Result<NeighborGraph> {
        let nn = data.nrows();
        if nn < 2 {
            return Ok(Self::from_edges(nn, &[])?);
        }

        let names = (0..nn).collect::<Vec<_>>();
        let dict = ColumnDict::from_rows(data, names);
        let nquery = args.knn.min(nn - 1).max(1);

        let jobs = create_jobs(nn, args.block_size);
        let njobs = jobs.len() as u64;

        /////////////////////////////////////////////////////////////////
        // step 1: searching nearest neighbours                        //
        /////////////////////////////////////////////////////////////////

        let triplets: DashMap<(usize, usize), f32> = DashMap::new();

        jobs.into_par_iter().progress_count(njobs).try_for_each(
            |(lb, ub)| -> anyhow::Result<()> {
                for i in lb..ub {
                    let (_indices, _distances) = dict.search_others(&i, nquery)?;
                    for (j, d_ij) in _indices.into_iter().zip(_distances) {
                        triplets.insert((i, j), d_ij);
                    }
                }
                Ok(())
            },
        )?;

        info!("{} triplets by kNN matching", triplets.len());

        if triplets.is_empty() {
            return Err(anyhow::anyhow!("empty triplets"));
        }

        ///////////////////////////////////////////////////
        // step 2: edge filtering (reciprocal or union) //
        ///////////////////////////////////////////////////

        let mut edges: Vec<((usize, usize), f32)> = if args.reciprocal {
            triplets
                .par_iter()
                .filter_map(|entry| {
                    let &(i, j) = entry.key();
                    if i < j && triplets.contains_key(&(j, i)) {
                        Some(((i, j), *entry.value()))
                    } else {
                        None
                    }
                })
                .collect()
        } else {
            triplets
                .par_iter()
                .filter_map(|entry| {
                    let &(i, j) = entry.key();
                    if i < j {
                        let d_ij = *entry.value();
                        let d_ji = triplets.get(&(j, i)).map(|e| *e).unwrap_or(d_ij);
                        Some(((i, j), d_ij.min(d_ji)))
                    } else if i > j && !triplets.contains_key(&(j, i)) {
                        Some(((j, i), *entry.value()))
                    } else {
                        None
                    }
                })
                .collect()
        };

        edges.par_sort_by_key(|&(ij, _)| ij);
        edges.dedup_by_key(|&mut (ij, _)| ij);

        info!(
            "{} edges after {} matching",
            edges.len(),
            if args.reciprocal {
                "reciprocal"
            } else {
                "union"
            }
        );

        let (edge_pairs, distances): (Vec<_>, Vec<_>) = edges.into_iter().unzip();
        Self::from_canonical(nn, edge_pairs, distances)
    }

    /// Build a graph from an arbitrary edge list.
    ///
    /// Directions are merged (i→j implies j→i); self loops and
    /// duplicates are removed.
    pub fn from_edges(n_nodes: usize, edges: &[(usize, usize)]) -> anyhow::Result<NeighborGraph> {
        let mut canonical = Vec::with_capacity(edges.len());
        for &(i, j) in edges {
            if i >= n_nodes || j >= n_nodes {
                anyhow::bail!("edge ({}, {}) out of range for {} nodes", i, j, n_nodes);
            }
            if i != j {
                canonical.push((i.min(j), i.max(j)));
            }
        }
        canonical.sort_unstable();
        canonical.dedup();

        let distances = vec![0.0; canonical.len()];
        Self::from_canonical(n_nodes, canonical, distances)
    }

    fn from_canonical(
        nn: usize,
        edges: Vec<(usize, usize)>,
        distances: Vec<f32>,
    ) -> anyhow::Result<NeighborGraph> {
        let mut coo = CooMatrix::new(nn, nn);
        for &(i, j) in edges.iter() {
            coo.push(i, j, 1.0);
            coo.push(j, i, 1.0);
        }

        Ok(NeighborGraph {
            adjacency: CscMatrix::from(&coo),
            edges,
            distances,
            n_nodes: nn,
        })
    }

    /// Get neighbors of a node from the CSC adjacency matrix
    pub fn neighbors(&self, node: usize) -> &[usize] {
        let offsets = self.adjacency.col_offsets();
        let start = offsets[node];
        let end = offsets[node + 1];
        &self.adjacency.row_indices()[start..end]
    }

    /// Both directions of every edge, ordered by source node
    pub fn directed_edges(&self) -> Vec<(usize, usize)> {
        (0..self.n_nodes)
            .flat_map(|i| self.neighbors(i).iter().map(move |&j| (i, j)))
            .collect()
    }

    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    pub fn num_nodes(&self) -> usize {
        self.n_nodes
    }
}


fn create_jobs(ntot: usize, block_size: usize) -> Vec<(usize, usize)> {
    let block_size = if block_size == 0 {
        DEFAULT_BLOCK_SIZE
    } else {
        block_size
    };
    let nblock = ntot.div_ceil(block_size);
    (0..nblock)
        .map(|block| {
            let lb = block * block_size;
            let ub = ((block + 1) * block_size).min(ntot);
            (lb, ub)
        })
        .collect()
}
