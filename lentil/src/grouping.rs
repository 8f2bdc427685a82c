use crate::common::*;
use std::ops::Range;

/// Obs column recording the replicate of each row in a merged dataset
pub const BATCH_KEY: &str = "batch";

/// Process replicates one at a time or as one concatenated dataset
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Grouping {
    #[default]
    Independent,
    Joint,
}

/// Apply `op` to every dataset, or once to their concatenation.
///
/// In the joint case the rows of every categorical column and
/// per-observation matrix of the merged dataset are scattered back
/// to the replicates they came from, and unstructured results are
/// copied to each replicate. The merged dataset is returned.
pub fn apply_grouped<F>(
    datasets: &mut [Dataset],
    grouping: Grouping,
    mut op: F,
) -> anyhow::Result<Option<Dataset>>
where
    F: FnMut(&mut Dataset) -> anyhow::Result<()>,
{
    match grouping {
        Grouping::Independent => {
            for dataset in datasets.iter_mut() {
                op(dataset)?;
            }
            Ok(None)
        }
        Grouping::Joint => {
            let (mut merged, ranges) = concatenate_datasets(datasets)?;
            op(&mut merged)?;
            scatter_rows(&merged, &ranges, datasets)?;
            Ok(Some(merged))
        }
    }
}

/// Stack datasets row-wise.
///
/// Categorical columns and per-observation matrices present in all
/// datasets are carried over (matrices must agree on their column
/// count), the neighbour graphs are combined
/// block-diagonally, and a `batch` column names the source of each
/// row. Returns the merged dataset and the row range of each input.
pub fn concatenate_datasets(datasets: &[Dataset]) -> anyhow::Result<(Dataset, Vec<Range<usize>>)> {
    let Some(first) = datasets.first() else {
        return Err(StatError::degenerate("no datasets to concatenate").into());
    };

    for dataset in datasets.iter() {
        ensure_shape("genes across replicates", first.num_genes(), dataset.num_genes())?;
    }

    let mut ranges = Vec::with_capacity(datasets.len());
    let mut lb = 0;
    for dataset in datasets.iter() {
        ranges.push(lb..(lb + dataset.num_obs()));
        lb += dataset.num_obs();
    }

    let name = datasets
        .iter()
        .map(|x| x.name())
        .collect::<Vec<_>>()
        .join("+");

    let expression = concatenate_vertical(&datasets.iter().map(|x| x.expression()).collect::<Vec<_>>())?;
    let coordinates = concatenate_vertical(&datasets.iter().map(|x| x.coordinates()).collect::<Vec<_>>())?;

    let mut merged = Dataset::new(&name, expression, coordinates)?
        .with_gene_names(first.gene_names().to_vec())?;

    let batch = datasets
        .iter()
        .flat_map(|x| std::iter::repeat(Box::<str>::from(x.name())).take(x.num_obs()))
        .collect::<Vec<_>>();
    merged.set_obs(BATCH_KEY, batch)?;

    for key in first.obs_keys() {
        if key == BATCH_KEY || datasets.iter().any(|x| x.obs(key).is_err()) {
            continue;
        }
        let mut values = Vec::with_capacity(merged.num_obs());
        for dataset in datasets.iter() {
            values.extend_from_slice(dataset.obs(key)?);
        }
        merged.set_obs(key, values)?;
    }

    for key in first.obsm_keys() {
        if !datasets.iter().all(|x| x.has_obsm(key)) {
            continue;
        }
        let ncol = first.obsm(key)?.ncols();
        for dataset in datasets.iter() {
            ensure_shape(&format!("{} columns", key), ncol, dataset.obsm(key)?.ncols())?;
        }
        let blocks = datasets
            .iter()
            .map(|x| x.obsm(key))
            .collect::<anyhow::Result<Vec<_>>>()?;
        merged.set_obsm(key.clone(), concatenate_vertical(&blocks)?)?;
    }

    if datasets.iter().all(|x| x.graph().is_ok()) {
        let mut edges = vec![];
        for (dataset, range) in datasets.iter().zip(ranges.iter()) {
            let graph = dataset.graph()?;
            edges.extend(
                graph
                    .edges
                    .iter()
                    .map(|&(i, j)| (i + range.start, j + range.start)),
            );
        }
        merged.set_adjacency_edges(&edges)?;
    }

    info!(
        "merged {} datasets into {} rows",
        datasets.len(),
        merged.num_obs()
    );

    Ok((merged, ranges))
}

fn scatter_rows(
    merged: &Dataset,
    ranges: &[Range<usize>],
    datasets: &mut [Dataset],
) -> anyhow::Result<()> {
    for (dataset, range) in datasets.iter_mut().zip(ranges.iter()) {
        for key in merged.obs_keys() {
            if key == BATCH_KEY {
                continue;
            }
            let values = merged.obs(key)?[range.clone()].to_vec();
            dataset.set_obs(key, values)?;
        }
        for key in merged.obsm_keys() {
            let value = merged.obsm(key)?.rows(range.start, range.len()).into_owned();
            dataset.set_obsm(key.clone(), value)?;
        }
        for (key, value) in merged.uns_entries() {
            dataset.set_uns(key.clone(), value.clone());
        }
    }
    Ok(())
}
