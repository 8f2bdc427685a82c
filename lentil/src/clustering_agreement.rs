use crate::common::*;
use crate::optimal_matching::{optimal_permutation, LabelMatching};

/// Categorical column encoded against its sorted distinct values
#[derive(Clone, Debug)]
pub struct LabelEncoding {
    pub classes: Vec<Box<str>>,
    pub codes: Vec<usize>,
}

impl LabelEncoding {
    pub fn new(values: &[Box<str>]) -> Self {
        let mut classes = values.to_vec();
        classes.sort();
        classes.dedup();

        let lookup: HashMap<&str, usize> = classes
            .iter()
            .enumerate()
            .map(|(k, x)| (&x[..], k))
            .collect();

        let codes = values.iter().map(|x| lookup[&x[..]]).collect();
        Self { classes, codes }
    }

    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }

    pub fn decode(&self, code: usize) -> &str {
        &self.classes[code]
    }
}

/// Count matrix with `ret[(truth, prediction)]` spots
pub fn confusion_matrix(
    truth: &[usize],
    prediction: &[usize],
    num_truth: usize,
    num_prediction: usize,
) -> anyhow::Result<CountMat> {
    ensure_shape("prediction length", truth.len(), prediction.len())?;
    let mut ret = CountMat::zeros(num_truth, num_prediction);
    for (&a, &b) in truth.iter().zip(prediction.iter()) {
        anyhow::ensure!(a < num_truth && b < num_prediction, "code out of range");
        ret[(a, b)] += 1;
    }
    Ok(ret)
}

/// Relabel predictions to their best-matching labels.
///
/// Writes obs column `{labels}_inferred` and the confusion matrix of
/// labels against inferred labels (rows and columns in sorted label
/// order) to `uns[confusion_matrix]`. Label and prediction columns
/// must have the same number of distinct values.
pub fn compute_confusion_matrix(
    dataset: &mut Dataset,
    labels: &str,
    predictions: &str,
) -> anyhow::Result<LabelMatching> {
    let truth = LabelEncoding::new(dataset.obs(labels)?);
    let pred = LabelEncoding::new(dataset.obs(predictions)?);

    let kk = truth.num_classes();
    if kk != pred.num_classes() {
        return Err(StatError::shape(
            "distinct predictions (must equal distinct labels)",
            kk,
            pred.num_classes(),
        )
        .into());
    }

    let confusion = confusion_matrix(&truth.codes, &pred.codes, kk, kk)?;
    let matching = optimal_permutation(&confusion)?;

    let inferred = pred
        .codes
        .iter()
        .map(|&p| matching.permutation[p])
        .collect::<Vec<_>>();

    info!(
        "{}: matched {} of {} spots between `{}` and `{}`",
        dataset.name(),
        matching.total_weight,
        inferred.len(),
        labels,
        predictions
    );

    let reordered = confusion_matrix(&truth.codes, &inferred, kk, kk)?;
    let inferred_names = inferred
        .iter()
        .map(|&k| truth.decode(k).into())
        .collect::<Vec<Box<str>>>();

    dataset.set_obs(&format!("{}_inferred", labels), inferred_names)?;
    dataset.set_uns(UnsKey::ConfusionMatrix, UnsValue::CountMatrix(reordered));
    Ok(matching)
}

fn choose2(n: usize) -> f64 {
    let n = n as f64;
    n * (n - 1.0) / 2.0
}

/// Adjusted Rand index of two partitions of the same spots
///
/// Partitions that agree up to renaming score 1; independent ones
/// score around 0. When both sides are a single cluster (or every
/// spot is its own cluster, or there is only one spot) the index is
/// undefined and 1 is returned.
pub fn adjusted_rand_index(truth: &[usize], prediction: &[usize]) -> anyhow::Result<f32> {
    ensure_shape("prediction length", truth.len(), prediction.len())?;
    let nn = truth.len();
    if nn == 0 {
        return Err(StatError::degenerate("no spots to compare").into());
    }
    if nn < 2 {
        return Ok(1.0);
    }

    let ka = truth.iter().max().map(|x| x + 1).unwrap_or(0);
    let kb = prediction.iter().max().map(|x| x + 1).unwrap_or(0);
    let table = confusion_matrix(truth, prediction, ka, kb)?;

    let index = table.iter().map(|&n| choose2(n)).sum::<f64>();
    let sum_rows = table.row_iter().map(|r| choose2(r.sum())).sum::<f64>();
    let sum_cols = table.column_iter().map(|c| choose2(c.sum())).sum::<f64>();

    let expected = sum_rows * sum_cols / choose2(nn);
    let max_index = (sum_rows + sum_cols) / 2.0;
    let denom = max_index - expected;

    if !denom.is_finite() || denom.abs() < f64::EPSILON {
        return Ok(1.0);
    }
    Ok(((index - expected) / denom) as f32)
}

/// ARI between obs columns `labels` and `predictions` into `uns[ari]`
pub fn compute_ari_score(dataset: &mut Dataset, labels: &str, predictions: &str) -> anyhow::Result<f32> {
    let truth = LabelEncoding::new(dataset.obs(labels)?);
    let pred = LabelEncoding::new(dataset.obs(predictions)?);
    let ari = adjusted_rand_index(&truth.codes, &pred.codes)?;
    dataset.set_uns(UnsKey::AdjustedRandIndex, UnsValue::Scalar(ari));
    Ok(ari)
}

/// Mean silhouette width of rows of `embedding` under `codes`
///
/// Euclidean distance. Spots alone in their cluster score 0. Needs
/// between 2 and N - 1 distinct clusters.
pub fn silhouette_score(embedding: &Mat, codes: &[usize]) -> anyhow::Result<f32> {
    let nn = embedding.nrows();
    ensure_shape("cluster labels", nn, codes.len())?;

    let kk = codes.iter().max().map(|x| x + 1).unwrap_or(0);
    let mut sizes = vec![0_usize; kk];
    codes.iter().for_each(|&k| sizes[k] += 1);
    let nclusters = sizes.iter().filter(|&&s| s > 0).count();

    if nclusters < 2 || nclusters + 1 > nn {
        return Err(StatError::degenerate(format!(
            "silhouette needs 2 to {} clusters, found {}",
            nn.saturating_sub(1),
            nclusters
        ))
        .into());
    }

    let widths = (0..nn)
        .into_par_iter()
        .map(|i| {
            let own = codes[i];
            if sizes[own] < 2 {
                return 0.0;
            }
            let mut dist_sum = vec![0_f64; kk];
            let xi = embedding.row(i);
            for j in 0..nn {
                if j != i {
                    dist_sum[codes[j]] += (xi - embedding.row(j)).norm() as f64;
                }
            }
            let a = dist_sum[own] / (sizes[own] - 1) as f64;
            let b = (0..kk)
                .filter(|&k| k != own && sizes[k] > 0)
                .map(|k| dist_sum[k] / sizes[k] as f64)
                .fold(f64::INFINITY, f64::min);
            let denom = a.max(b);
            if denom > 0.0 {
                (b - a) / denom
            } else {
                0.0
            }
        })
        .collect::<Vec<f64>>();

    Ok((widths.iter().sum::<f64>() / nn as f64) as f32)
}

/// Silhouette of `obsm[embeddings]` under obs column `labels` into
/// `uns[silhouette]`
pub fn compute_silhouette_score(
    dataset: &mut Dataset,
    labels: &str,
    embeddings: &ObsmKey,
) -> anyhow::Result<f32> {
    let encoding = LabelEncoding::new(dataset.obs(labels)?);
    let score = silhouette_score(dataset.obsm(embeddings)?, &encoding.codes)?;
    dataset.set_uns(UnsKey::Silhouette, UnsValue::Scalar(score));
    Ok(score)
}
