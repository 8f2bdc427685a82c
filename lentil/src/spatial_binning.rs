use crate::common::*;

use serde::{Deserialize, Serialize};

/// Relative slack on distance cut-offs, in units of the bin size
const DISTANCE_TOLERANCE: f32 = 1e-4;

/// How to coarsen a high-resolution dataset onto a square grid
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BinningArgs {
    /// number of equal chunks along the horizontal extent
    pub chunks: usize,
    /// explicit chunk side length; overrides `chunks`
    pub chunk_size: Option<f32>,
    /// explicit number of bins along each side of a chunk
    pub chunk_1d_density: Option<usize>,
    /// approximate ratio of bins to spots
    pub downsample_rate: f32,
    /// worker threads for nearest neighbour queries
    pub num_jobs: usize,
    pub level: usize,
    /// bins further than this from every spot are discarded
    /// (default: half the diagonal of a bin)
    pub support_radius: Option<f32>,
    pub keep_empty_bins: bool,
    /// neighbours in the spatial graph of the binned dataset
    pub knn: usize,
}

impl Default for BinningArgs {
    fn default() -> Self {
        Self {
            chunks: 16,
            chunk_size: None,
            chunk_1d_density: None,
            downsample_rate: 0.2,
            num_jobs: 2,
            level: 0,
            support_radius: None,
            keep_empty_bins: false,
            knn: 6,
        }
    }
}

impl BinningArgs {
    /// Same arguments, but pinned to the chunk size and density of an
    /// existing grid
    pub fn reuse_grid(&self, grid: &ChunkGrid) -> Self {
        Self {
            chunk_size: Some(grid.chunk_size),
            chunk_1d_density: Some(grid.chunk_1d_density),
            ..self.clone()
        }
    }
}

/// Square chunks tiling the spatial extent, each split into
/// `chunk_1d_density x chunk_1d_density` bins
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkGrid {
    /// lower-left corner of the extent
    pub origin: [f32; 2],
    pub chunk_size: f32,
    /// chunks along x and y
    pub num_chunks: [usize; 2],
    pub chunk_1d_density: usize,
}

impl ChunkGrid {
    pub fn bin_size(&self) -> f32 {
        self.chunk_size / self.chunk_1d_density as f32
    }

    pub fn half_diagonal(&self) -> f32 {
        self.bin_size() * std::f32::consts::SQRT_2 / 2.0
    }

    /// bins along x and y
    pub fn bins_per_axis(&self) -> [usize; 2] {
        [
            self.num_chunks[0] * self.chunk_1d_density,
            self.num_chunks[1] * self.chunk_1d_density,
        ]
    }

    pub fn num_bins(&self) -> usize {
        let [nx, ny] = self.bins_per_axis();
        nx * ny
    }

    /// Centers of all bins (num_bins x 2), row by row from the origin
    pub fn bin_centers(&self) -> Mat {
        let [nx, _] = self.bins_per_axis();
        let h = self.bin_size();
        Mat::from_fn(self.num_bins(), 2, |b, axis| {
            let cell = if axis == 0 { b % nx } else { b / nx };
            self.origin[axis] + (cell as f32 + 0.5) * h
        })
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

fn axis_range(coordinates: &Mat, axis: usize) -> (f32, f32) {
    coordinates
        .column(axis)
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        })
}

/// Lay a chunk grid over `coordinates` (spots x 2).
///
/// The chunk size is `args.chunk_size` or the horizontal extent
/// divided by `args.chunks` (the vertical extent, then 1, when the
/// extent is degenerate). Unless given, the number of bins per chunk
/// side is chosen so that occupied chunks hold about
/// `downsample_rate * N` bins in total.
pub fn chunked_downsample_on_grid(coordinates: &Mat, args: &BinningArgs) -> anyhow::Result<ChunkGrid> {
    ensure_shape("spatial coordinate columns", 2, coordinates.ncols())?;
    let nn = coordinates.nrows();
    if nn == 0 {
        return Err(StatError::degenerate("no spots to bin").into());
    }
    if coordinates.iter().any(|x| !x.is_finite()) {
        return Err(StatError::degenerate("non-finite spatial coordinates").into());
    }

    let (x_min, x_max) = axis_range(coordinates, 0);
    let (y_min, y_max) = axis_range(coordinates, 1);
    let x_range = x_max - x_min;
    let y_range = y_max - y_min;

    let chunk_size = match args.chunk_size {
        Some(size) => size,
        None => {
            anyhow::ensure!(args.chunks > 0, "need at least one chunk");
            if x_range > 0.0 {
                x_range / args.chunks as f32
            } else if y_range > 0.0 {
                y_range / args.chunks as f32
            } else {
                1.0
            }
        }
    };
    anyhow::ensure!(
        chunk_size.is_finite() && chunk_size > 0.0,
        "invalid chunk size {}",
        chunk_size
    );

    let count_chunks = |range: f32| ((range / chunk_size).ceil() as usize).max(1);
    let num_chunks = [count_chunks(x_range), count_chunks(y_range)];

    let chunk_index = |v: f32, lo: f32, n: usize| (((v - lo) / chunk_size).floor() as usize).min(n - 1);
    let occupied = coordinates
        .row_iter()
        .map(|r| {
            (
                chunk_index(r[0], x_min, num_chunks[0]),
                chunk_index(r[1], y_min, num_chunks[1]),
            )
        })
        .collect::<HashSet<_>>()
        .len();

    let chunk_1d_density = match args.chunk_1d_density {
        Some(d) => {
            anyhow::ensure!(d > 0, "chunk density must be positive");
            d
        }
        None => {
            let per_chunk = args.downsample_rate * nn as f32 / occupied as f32;
            (per_chunk.sqrt().round() as usize).max(1)
        }
    };

    let grid = ChunkGrid {
        origin: [x_min, y_min],
        chunk_size,
        num_chunks,
        chunk_1d_density,
    };

    info!(
        "{} x {} chunks of size {}, {} occupied, {} bins per chunk side",
        num_chunks[0], num_chunks[1], chunk_size, occupied, chunk_1d_density
    );

    Ok(grid)
}

/// Indices of `bin_centers` whose nearest spot lies within `radius`
pub fn filter_gridpoints(
    coordinates: &Mat,
    bin_centers: &Mat,
    radius: f32,
    num_jobs: usize,
) -> anyhow::Result<Vec<usize>> {
    let spots = ColumnDict::from_rows(coordinates, (0..coordinates.nrows()).collect());
    let nearest = spots.nearest_rows(bin_centers, num_jobs)?;

    let kept = nearest
        .into_iter()
        .enumerate()
        .filter_map(|(b, hit)| match hit {
            Some((_, d)) if d <= radius => Some(b),
            _ => None,
        })
        .collect::<Vec<_>>();

    info!(
        "{} of {} grid points within {} of a spot",
        kept.len(),
        bin_centers.nrows(),
        radius
    );
    Ok(kept)
}

/// Per-bin sums of expression
#[derive(Debug, Clone)]
pub struct BinnedExpression {
    /// bins x genes
    pub expression: Mat,
    /// spot -> bin, `None` when no bin is close enough
    pub assignments: Vec<Option<usize>>,
    /// spots per bin
    pub counts: Vec<usize>,
}

/// Assign every spot to its nearest bin within `max_distance` and
/// sum the expression of the spots in each bin.
pub fn bin_expression(
    expression: &Mat,
    coordinates: &Mat,
    bin_centers: &Mat,
    max_distance: f32,
    num_jobs: usize,
) -> anyhow::Result<BinnedExpression> {
    ensure_shape("expression rows", coordinates.nrows(), expression.nrows())?;
    let nbins = bin_centers.nrows();

    let bins = ColumnDict::from_rows(bin_centers, (0..nbins).collect());
    let nearest = bins.nearest_rows(coordinates, num_jobs)?;

    let assignments = nearest
        .into_iter()
        .map(|hit| match hit {
            Some((b, d)) if d <= max_distance => Some(b),
            _ => None,
        })
        .collect::<Vec<_>>();

    let mut binned = Mat::zeros(nbins, expression.ncols());
    let mut counts = vec![0; nbins];
    for (i, b) in assignments.iter().enumerate() {
        if let Some(b) = *b {
            let mut row = binned.row_mut(b);
            row += expression.row(i);
            counts[b] += 1;
        }
    }

    let ndropped = assignments.iter().filter(|x| x.is_none()).count();
    if ndropped > 0 {
        warn!("{} spots too far from every bin were dropped", ndropped);
    }

    Ok(BinnedExpression {
        expression: binned,
        assignments,
        counts,
    })
}

/// Coarse version of a dataset
#[derive(Debug, Clone)]
pub struct SpatialBinning {
    pub grid: ChunkGrid,
    /// bins x 2
    pub coordinates: Mat,
    /// bins x genes
    pub expression: Mat,
    /// original spot -> bin
    pub assignments: Vec<Option<usize>>,
}

/// Grid, filter, assign and aggregate.
///
/// Bins that survive the support filter but receive no spot are
/// dropped (and the assignments re-indexed) unless
/// `args.keep_empty_bins`.
pub fn spatial_binning(
    expression: &Mat,
    coordinates: &Mat,
    args: &BinningArgs,
) -> anyhow::Result<SpatialBinning> {
    let grid = chunked_downsample_on_grid(coordinates, args)?;
    let slack = DISTANCE_TOLERANCE * grid.bin_size();
    let radius = args.support_radius.unwrap_or(grid.half_diagonal()) + slack;

    let centers = grid.bin_centers();
    let supported = filter_gridpoints(coordinates, &centers, radius, args.num_jobs)?;
    let centers = centers.select_rows(&supported);

    let binned = bin_expression(
        expression,
        coordinates,
        &centers,
        grid.half_diagonal() + slack,
        args.num_jobs,
    )?;

    let (centers, expression, assignments) = if args.keep_empty_bins {
        (centers, binned.expression, binned.assignments)
    } else {
        let nonempty = (0..binned.counts.len())
            .filter(|&b| binned.counts[b] > 0)
            .collect::<Vec<_>>();

        let mut remap = vec![None; binned.counts.len()];
        for (new, &old) in nonempty.iter().enumerate() {
            remap[old] = Some(new);
        }
        let nempty = binned.counts.len() - nonempty.len();
        if nempty > 0 {
            info!("dropping {} bins without spots", nempty);
        }

        let assignments = binned
            .assignments
            .iter()
            .map(|b| b.and_then(|b| remap[b]))
            .collect();
        (
            centers.select_rows(&nonempty),
            binned.expression.select_rows(&nonempty),
            assignments,
        )
    };

    if centers.nrows() == 0 {
        return Err(StatError::degenerate("binning produced no bins").into());
    }

    info!(
        "{} spots binned into {} bins",
        coordinates.nrows(),
        centers.nrows()
    );

    Ok(SpatialBinning {
        grid,
        coordinates: centers,
        expression,
        assignments,
    })
}

/// Low-resolution copy of `dataset` named `{name}_level_{level}`,
/// with its own spatial neighbour graph
pub fn bin_dataset(dataset: &Dataset, args: &BinningArgs) -> anyhow::Result<Dataset> {
    let binning = spatial_binning(dataset.expression(), dataset.coordinates(), args)?;

    let name = format!("{}_level_{}", dataset.name(), args.level);
    let total_counts = Mat::from_iterator(
        binning.expression.nrows(),
        1,
        binning.expression.row_iter().map(|r| r.sum()),
    );

    let mut binned = Dataset::new(&name, binning.expression, binning.coordinates)?
        .with_gene_names(dataset.gene_names().to_vec())?;

    binned.set_obsm(ObsmKey::Named("total_transformed_counts".into()), total_counts)?;
    binned.set_uns(UnsKey::ChunkSize, UnsValue::Scalar(binning.grid.chunk_size));
    binned.set_uns(
        UnsKey::Chunk1dDensity,
        UnsValue::Count(binning.grid.chunk_1d_density),
    );
    binned.set_uns(UnsKey::BinAssignments, UnsValue::Assignment(binning.assignments));

    let knn_args = KnnGraphArgs {
        knn: args.knn,
        ..Default::default()
    };
    binned.compute_spatial_neighbors(&knn_args)?;
    Ok(binned)
}
