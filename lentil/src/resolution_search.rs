use crate::common::*;

const MAX_BISECTION_STEPS: usize = 100;

/// Community detection on the rows of an embedding
///
/// Higher `resolution` should give more clusters.
pub trait Clusterer {
    fn cluster(&self, embedding: &Mat, resolution: f32, seed: u64) -> anyhow::Result<Vec<usize>>;
}

#[derive(Debug, Clone)]
pub struct ClusterArgs {
    /// embedding to cluster
    pub use_rep: ObsmKey,
    /// obs column receiving the cluster ids
    pub key: Box<str>,
    pub resolution: f32,
    /// search the resolution until this many clusters are found
    pub target_clusters: Option<usize>,
    /// stop the search when the resolution bracket is this narrow
    pub tolerance: f32,
    pub seed: u64,
}

impl Default for ClusterArgs {
    fn default() -> Self {
        Self {
            use_rep: ObsmKey::NormalizedEmbeddings,
            key: "leiden".into(),
            resolution: 1.0,
            target_clusters: None,
            tolerance: 0.01,
            seed: 0,
        }
    }
}

fn num_distinct(labels: &[usize]) -> usize {
    labels.iter().collect::<HashSet<_>>().len()
}

/// Cluster at `args.resolution`; if `args.target_clusters` is missed,
/// bisect the resolution geometrically within `[r / 10, 10 r]`.
///
/// Returns the labels and the resolution that produced them.
pub fn cluster_to_target<C: Clusterer>(
    clusterer: &C,
    embedding: &Mat,
    args: &ClusterArgs,
) -> anyhow::Result<(Vec<usize>, f32)> {
    anyhow::ensure!(args.resolution > 0.0, "resolution must be positive");

    let mut resolution = args.resolution;
    let mut labels = clusterer.cluster(embedding, resolution, args.seed)?;
    let mut nclust = num_distinct(&labels);

    let Some(target) = args.target_clusters else {
        return Ok((labels, resolution));
    };

    let mut lower = 0.1 * args.resolution;
    let mut upper = 10.0 * args.resolution;
    let mut step = 0;

    while nclust != target && (upper - lower).abs() > args.tolerance && step < MAX_BISECTION_STEPS {
        resolution = (lower * upper).sqrt();
        labels = clusterer.cluster(embedding, resolution, args.seed)?;
        nclust = num_distinct(&labels);

        if nclust < target {
            lower = resolution;
        } else {
            upper = resolution;
        }
        step += 1;
        info!("resolution {:.4}: {} clusters", resolution, nclust);
    }

    if nclust != target {
        warn!(
            "found {} clusters instead of {} (resolution {:.4})",
            nclust, target, resolution
        );
    }

    Ok((labels, resolution))
}

/// Cluster `obsm[use_rep]` into obs column `key`, per replicate or
/// jointly.
pub fn cluster_datasets<C: Clusterer>(
    datasets: &mut [Dataset],
    grouping: Grouping,
    clusterer: &C,
    args: &ClusterArgs,
) -> anyhow::Result<Option<Dataset>> {
    apply_grouped(datasets, grouping, |dataset| {
        let (labels, resolution) = cluster_to_target(clusterer, dataset.obsm(&args.use_rep)?, args)?;
        info!(
            "{}: {} clusters at resolution {:.4}",
            dataset.name(),
            num_distinct(&labels),
            resolution
        );
        let labels = labels
            .into_iter()
            .map(|k| k.to_string().into_boxed_str())
            .collect();
        dataset.set_obs(&args.key, labels)
    })
}
