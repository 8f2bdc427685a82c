use crate::common::*;
use std::fmt;

pub type SpatialGraph = NeighborGraph;

/// Per-observation matrices (one row per spot)
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ObsmKey {
    /// learned metagene embeddings
    Embeddings,
    /// z-scored embeddings
    NormalizedEmbeddings,
    Pca,
    Umap,
    Named(Box<str>),
}

impl fmt::Display for ObsmKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObsmKey::Embeddings => write!(f, "X"),
            ObsmKey::NormalizedEmbeddings => write!(f, "normalized_X"),
            ObsmKey::Pca => write!(f, "X_pca"),
            ObsmKey::Umap => write!(f, "X_umap"),
            ObsmKey::Named(name) => write!(f, "{}", name),
        }
    }
}

/// Train/validation split of a classification task
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Split {
    Train,
    Validation,
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Split::Train => write!(f, "train"),
            Split::Validation => write!(f, "validation"),
        }
    }
}

/// Unstructured, per-dataset results
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum UnsKey {
    AdjacencyPvalue,
    AvoidancePvalue,
    ConfusionMatrix,
    AdjustedRandIndex,
    Silhouette,
    MicroPrecision(Split),
    MacroPrecision(Split),
    EmpiricalCorrelation,
    /// genes x metagenes
    Metagenes,
    /// metagenes x metagenes
    SpatialAffinity,
    GroundTruthMetagenes,
    GroundTruthMetageneCorrelation,
    SpatialCorrelation,
    NeighborInteractions,
    MetageneNeighborInteractions,
    ChunkSize,
    Chunk1dDensity,
    BinAssignments,
    /// number of non-finite entries replaced by zero while computing
    /// the named result
    CoercedEntries(Box<str>),
    Named(Box<str>),
}

impl fmt::Display for UnsKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnsKey::AdjacencyPvalue => write!(f, "adjacency_pvalue"),
            UnsKey::AvoidancePvalue => write!(f, "avoidance_pvalue"),
            UnsKey::ConfusionMatrix => write!(f, "confusion_matrix"),
            UnsKey::AdjustedRandIndex => write!(f, "ari"),
            UnsKey::Silhouette => write!(f, "silhouette"),
            UnsKey::MicroPrecision(split) => write!(f, "microprecision_{}", split),
            UnsKey::MacroPrecision(split) => write!(f, "macroprecision_{}", split),
            UnsKey::EmpiricalCorrelation => write!(f, "empirical_correlation"),
            UnsKey::Metagenes => write!(f, "M"),
            UnsKey::SpatialAffinity => write!(f, "Sigma_x_inv"),
            UnsKey::GroundTruthMetagenes => write!(f, "ground_truth_M"),
            UnsKey::GroundTruthMetageneCorrelation => write!(f, "ground_truth_M_correlation"),
            UnsKey::SpatialCorrelation => write!(f, "spatial_correlation"),
            UnsKey::NeighborInteractions => write!(f, "neighbor_interactions"),
            UnsKey::MetageneNeighborInteractions => write!(f, "metagene_neighbor_interactions"),
            UnsKey::ChunkSize => write!(f, "chunk_size"),
            UnsKey::Chunk1dDensity => write!(f, "chunk_1d_density"),
            UnsKey::BinAssignments => write!(f, "bin_assignments"),
            UnsKey::CoercedEntries(name) => write!(f, "coerced_{}", name),
            UnsKey::Named(name) => write!(f, "{}", name),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum UnsValue {
    Scalar(f32),
    Count(usize),
    Matrix(Mat),
    CountMatrix(CountMat),
    /// original spot -> bin (`None` = dropped)
    Assignment(Vec<Option<usize>>),
    /// one matrix per directed edge
    EdgeMatrices {
        edges: Vec<(usize, usize)>,
        values: Vec<Mat>,
    },
}

impl UnsValue {
    fn kind(&self) -> &'static str {
        match self {
            UnsValue::Scalar(_) => "scalar",
            UnsValue::Count(_) => "count",
            UnsValue::Matrix(_) => "matrix",
            UnsValue::CountMatrix(_) => "count matrix",
            UnsValue::Assignment(_) => "assignment",
            UnsValue::EdgeMatrices { .. } => "edge matrices",
        }
    }
}

/// One spatial replicate: expression, coordinates, neighbour graph
/// and the results attached to it by analysis steps.
#[derive(Clone, Debug)]
pub struct Dataset {
    name: Box<str>,
    /// spots x genes
    expression: Mat,
    gene_names: Vec<Box<str>>,
    /// spots x 2
    coordinates: Mat,
    graph: Option<SpatialGraph>,
    obs: HashMap<Box<str>, Vec<Box<str>>>,
    obsm: HashMap<ObsmKey, Mat>,
    uns: HashMap<UnsKey, UnsValue>,
}

impl Dataset {
    /// Create a dataset from a spots x genes matrix and spots x 2
    /// coordinates. Genes are named `gene_{j}` until
    /// [`Dataset::with_gene_names`] is called.
    pub fn new(name: &str, expression: Mat, coordinates: Mat) -> anyhow::Result<Self> {
        ensure_shape("spatial coordinate columns", 2, coordinates.ncols())?;
        ensure_shape(
            "spatial coordinate rows",
            expression.nrows(),
            coordinates.nrows(),
        )?;

        let gene_names = (0..expression.ncols())
            .map(|j| format!("gene_{}", j).into_boxed_str())
            .collect();

        Ok(Self {
            name: name.into(),
            expression,
            gene_names,
            coordinates,
            graph: None,
            obs: HashMap::new(),
            obsm: HashMap::new(),
            uns: HashMap::new(),
        })
    }

    pub fn with_gene_names(mut self, gene_names: Vec<Box<str>>) -> anyhow::Result<Self> {
        ensure_shape("gene names", self.expression.ncols(), gene_names.len())?;
        self.gene_names = gene_names;
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn num_obs(&self) -> usize {
        self.expression.nrows()
    }

    pub fn num_genes(&self) -> usize {
        self.expression.ncols()
    }

    pub fn expression(&self) -> &Mat {
        &self.expression
    }

    pub fn gene_names(&self) -> &[Box<str>] {
        &self.gene_names
    }

    pub fn coordinates(&self) -> &Mat {
        &self.coordinates
    }

    /////////////////////
    // neighbour graph //
    /////////////////////

    pub fn graph(&self) -> anyhow::Result<&SpatialGraph> {
        self.graph
            .as_ref()
            .ok_or_else(|| StatError::missing(&self.name, "adjacency_matrix").into())
    }

    pub fn set_graph(&mut self, graph: SpatialGraph) -> anyhow::Result<()> {
        ensure_shape("adjacency nodes", self.num_obs(), graph.num_nodes())?;
        self.graph = Some(graph);
        Ok(())
    }

    /// Attach an adjacency list; directions are merged.
    pub fn set_adjacency_edges(&mut self, edges: &[(usize, usize)]) -> anyhow::Result<()> {
        let graph = SpatialGraph::from_edges(self.num_obs(), edges)?;
        self.set_graph(graph)
    }

    /// kNN graph on the spatial coordinates
    pub fn compute_spatial_neighbors(&mut self, args: &KnnGraphArgs) -> anyhow::Result<()> {
        let graph = SpatialGraph::from_rows(&self.coordinates, args)?;
        info!(
            "{}: {} spatial edges over {} spots",
            self.name,
            graph.num_edges(),
            graph.num_nodes()
        );
        self.graph = Some(graph);
        Ok(())
    }

    /////////////////////////
    // categorical columns //
    /////////////////////////

    pub fn obs(&self, key: &str) -> anyhow::Result<&[Box<str>]> {
        self.obs
            .get(key)
            .map(|x| x.as_slice())
            .ok_or_else(|| StatError::missing(&self.name, key).into())
    }

    pub fn set_obs(&mut self, key: &str, values: Vec<Box<str>>) -> anyhow::Result<()> {
        ensure_shape(key, self.num_obs(), values.len())?;
        self.obs.insert(key.into(), values);
        Ok(())
    }

    pub fn obs_keys(&self) -> impl Iterator<Item = &str> {
        self.obs.keys().map(|x| &**x)
    }

    ////////////////////////////////
    // per-observation matrices //
    ////////////////////////////////

    pub fn obsm(&self, key: &ObsmKey) -> anyhow::Result<&Mat> {
        self.obsm
            .get(key)
            .ok_or_else(|| StatError::missing(&self.name, key).into())
    }

    pub fn set_obsm(&mut self, key: ObsmKey, value: Mat) -> anyhow::Result<()> {
        ensure_shape(&key.to_string(), self.num_obs(), value.nrows())?;
        self.obsm.insert(key, value);
        Ok(())
    }

    pub fn has_obsm(&self, key: &ObsmKey) -> bool {
        self.obsm.contains_key(key)
    }

    pub fn obsm_keys(&self) -> impl Iterator<Item = &ObsmKey> {
        self.obsm.keys()
    }

    //////////////////
    // unstructured //
    //////////////////

    pub fn uns(&self, key: &UnsKey) -> anyhow::Result<&UnsValue> {
        self.uns
            .get(key)
            .ok_or_else(|| StatError::missing(&self.name, key).into())
    }

    pub fn set_uns(&mut self, key: UnsKey, value: UnsValue) {
        self.uns.insert(key, value);
    }

    pub fn uns_entries(&self) -> impl Iterator<Item = (&UnsKey, &UnsValue)> {
        self.uns.iter()
    }

    pub fn uns_matrix(&self, key: &UnsKey) -> anyhow::Result<&Mat> {
        match self.uns(key)? {
            UnsValue::Matrix(x) => Ok(x),
            other => anyhow::bail!("`{}` holds a {}, not a matrix", key, other.kind()),
        }
    }

    pub fn uns_count_matrix(&self, key: &UnsKey) -> anyhow::Result<&CountMat> {
        match self.uns(key)? {
            UnsValue::CountMatrix(x) => Ok(x),
            other => anyhow::bail!("`{}` holds a {}, not a count matrix", key, other.kind()),
        }
    }

    pub fn uns_scalar(&self, key: &UnsKey) -> anyhow::Result<f32> {
        match self.uns(key)? {
            UnsValue::Scalar(x) => Ok(*x),
            other => anyhow::bail!("`{}` holds a {}, not a scalar", key, other.kind()),
        }
    }

    pub fn uns_count(&self, key: &UnsKey) -> anyhow::Result<usize> {
        match self.uns(key)? {
            UnsValue::Count(x) => Ok(*x),
            other => anyhow::bail!("`{}` holds a {}, not a count", key, other.kind()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toy() -> Dataset {
        let expression = Mat::from_row_slice(3, 2, &[1., 0., 0., 2., 3., 3.]);
        let coordinates = Mat::from_row_slice(3, 2, &[0., 0., 1., 0., 2., 0.]);
        Dataset::new("toy", expression, coordinates).unwrap()
    }

    #[test]
    fn missing_keys_are_typed() {
        let data = toy();
        let err = data.obsm(&ObsmKey::Embeddings).unwrap_err();
        match err.downcast_ref::<StatError>() {
            Some(StatError::MissingKey { dataset, key }) => {
                assert_eq!(&**dataset, "toy");
                assert_eq!(&**key, "X");
            }
            _ => panic!("expected MissingKey, got {}", err),
        }
        assert!(data.graph().is_err());
        assert!(data.uns(&UnsKey::AdjacencyPvalue).is_err());
    }

    #[test]
    fn coordinates_must_be_planar() {
        let err = Dataset::new("bad", Mat::zeros(3, 2), Mat::zeros(3, 3)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StatError>(),
            Some(StatError::ShapeMismatch { expected: 2, found: 3, .. })
        ));
    }

    #[test]
    fn uns_values_keep_their_kind() {
        let mut data = toy();
        data.set_uns(UnsKey::ChunkSize, UnsValue::Scalar(2.5));
        assert_eq!(data.uns_scalar(&UnsKey::ChunkSize).unwrap(), 2.5);
        assert!(data.uns_matrix(&UnsKey::ChunkSize).is_err());
        assert_eq!(
            UnsKey::MicroPrecision(Split::Validation).to_string(),
            "microprecision_validation"
        );
        assert_eq!(
            UnsKey::GroundTruthMetageneCorrelation.to_string(),
            "ground_truth_M_correlation"
        );
    }
}
