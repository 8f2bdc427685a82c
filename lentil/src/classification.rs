use crate::clustering_agreement::LabelEncoding;
use crate::common::*;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

#[derive(Debug, Clone)]
pub struct ClassificationArgs {
    /// fraction of every class used for training
    pub train_fraction: f32,
    /// neighbours voting in the classifier
    pub knn: usize,
    pub seed: u64,
}

impl Default for ClassificationArgs {
    fn default() -> Self {
        Self {
            train_fraction: 0.25,
            knn: 10,
            seed: 42,
        }
    }
}

/// Row indices of a train/validation split
#[derive(Clone, Debug)]
pub struct TrainTestSplit {
    pub train: Vec<usize>,
    pub validation: Vec<usize>,
}

/// Split rows class by class so that both sides keep the class
/// proportions.
///
/// A class with `n` members puts `round(fraction * n)` of them, but
/// at least one and at most `n - 1`, into training. Single-member
/// classes go to training.
pub fn stratified_split(codes: &[usize], fraction: f32, seed: u64) -> anyhow::Result<TrainTestSplit> {
    anyhow::ensure!(
        fraction > 0.0 && fraction < 1.0,
        "train fraction {} not in (0, 1)",
        fraction
    );

    let kk = codes.iter().max().map(|x| x + 1).unwrap_or(0);
    let mut members = vec![vec![]; kk];
    for (i, &k) in codes.iter().enumerate() {
        members[k].push(i);
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut train = vec![];
    let mut validation = vec![];

    for mut rows in members.into_iter().filter(|x| !x.is_empty()) {
        rows.shuffle(&mut rng);
        let nc = rows.len();
        let ntrain = if nc < 2 {
            nc
        } else {
            ((fraction * nc as f32).round() as usize).clamp(1, nc - 1)
        };
        train.extend_from_slice(&rows[..ntrain]);
        validation.extend_from_slice(&rows[ntrain..]);
    }

    train.sort_unstable();
    validation.sort_unstable();
    Ok(TrainTestSplit { train, validation })
}

/// k-nearest-neighbour vote over a set of labelled points
pub struct KnnClassifier {
    dict: ColumnDict<usize>,
    codes: Vec<usize>,
    num_classes: usize,
    knn: usize,
}

impl KnnClassifier {
    /// * `points` - training points, one per row
    /// * `codes` - class of each training point
    pub fn fit(points: &Mat, codes: &[usize], num_classes: usize, knn: usize) -> anyhow::Result<Self> {
        ensure_shape("training labels", points.nrows(), codes.len())?;
        if points.nrows() == 0 {
            return Err(StatError::degenerate("no training points").into());
        }
        anyhow::ensure!(codes.iter().all(|&k| k < num_classes), "class code out of range");

        let dict = ColumnDict::from_rows(points, (0..points.nrows()).collect());
        Ok(Self {
            dict,
            codes: codes.to_vec(),
            num_classes,
            knn: knn.max(1),
        })
    }

    /// Fraction of the `knn` neighbours in each class, queries x classes
    pub fn predict_proba(&self, queries: &Mat) -> Mat {
        let kk = self.num_classes;
        let rows = (0..queries.nrows())
            .into_par_iter()
            .map(|i| {
                let query = VecPoint::new(queries.row(i).iter().cloned().collect());
                let (neighbours, _) = self.dict.search(&query, self.knn);
                let mut votes = vec![0_f32; kk];
                for j in neighbours.iter() {
                    votes[self.codes[*j]] += 1.0;
                }
                let total = neighbours.len().max(1) as f32;
                votes.into_iter().map(|v| v / total).collect::<Vec<_>>()
            })
            .collect::<Vec<_>>();

        Mat::from_fn(queries.nrows(), kk, |i, k| rows[i][k])
    }

    /// Most probable class per query; ties go to the lowest class
    pub fn predict(&self, queries: &Mat) -> Vec<usize> {
        let proba = self.predict_proba(queries);
        proba
            .row_iter()
            .map(|row| {
                let mut best = 0;
                for k in 1..row.len() {
                    if row[k] > row[best] {
                        best = k;
                    }
                }
                best
            })
            .collect()
    }
}

/// Micro precision (accuracy) and macro precision.
///
/// Macro precision averages over every class seen in either `truth`
/// or `prediction`; a class that is never predicted counts as 0.
pub fn precision_scores(truth: &[usize], prediction: &[usize]) -> anyhow::Result<(f32, f32)> {
    ensure_shape("prediction length", truth.len(), prediction.len())?;
    let nn = truth.len();
    if nn == 0 {
        return Err(StatError::degenerate("no predictions to score").into());
    }

    let kk = truth
        .iter()
        .chain(prediction.iter())
        .max()
        .map(|x| x + 1)
        .unwrap_or(0);

    let mut hits = vec![0_usize; kk];
    let mut predicted = vec![0_usize; kk];
    let mut present = vec![false; kk];
    for (&t, &p) in truth.iter().zip(prediction.iter()) {
        predicted[p] += 1;
        present[t] = true;
        present[p] = true;
        if t == p {
            hits[p] += 1;
        }
    }

    let micro = hits.iter().sum::<usize>() as f32 / nn as f32;

    let per_class = (0..kk)
        .filter(|&k| present[k])
        .map(|k| {
            if predicted[k] > 0 {
                hits[k] as f32 / predicted[k] as f32
            } else {
                0.0
            }
        })
        .collect::<Vec<_>>();
    let macro_ = per_class.iter().sum::<f32>() / per_class.len() as f32;

    Ok((micro, macro_))
}

/// Train a kNN classifier on a stratified split of one dataset and
/// store micro/macro precision on both splits.
pub fn evaluate_dataset(
    dataset: &mut Dataset,
    embeddings: &ObsmKey,
    labels: &str,
    args: &ClassificationArgs,
) -> anyhow::Result<()> {
    let encoding = LabelEncoding::new(dataset.obs(labels)?);
    let x = dataset.obsm(embeddings)?;

    let split = stratified_split(&encoding.codes, args.train_fraction, args.seed)?;
    let x_train = x.select_rows(&split.train);
    let y_train = split.train.iter().map(|&i| encoding.codes[i]).collect::<Vec<_>>();

    let model = KnnClassifier::fit(&x_train, &y_train, encoding.num_classes(), args.knn)?;

    let mut scores = vec![];
    for (which, rows) in [(Split::Train, &split.train), (Split::Validation, &split.validation)] {
        if rows.is_empty() {
            warn!("{}: empty {} split", dataset.name(), which);
            continue;
        }
        let truth = rows.iter().map(|&i| encoding.codes[i]).collect::<Vec<_>>();
        let prediction = model.predict(&x.select_rows(rows.iter()));
        let (micro, macro_) = precision_scores(&truth, &prediction)?;
        info!(
            "{}: {} micro precision {:.3}, macro precision {:.3}",
            dataset.name(),
            which,
            micro,
            macro_
        );
        scores.push((which, micro, macro_));
    }

    for (which, micro, macro_) in scores {
        dataset.set_uns(UnsKey::MicroPrecision(which), UnsValue::Scalar(micro));
        dataset.set_uns(UnsKey::MacroPrecision(which), UnsValue::Scalar(macro_));
    }
    Ok(())
}

/// Classification benchmark of `obsm[embeddings]` against obs
/// column `labels`, per replicate or on all replicates together.
pub fn evaluate_classification_task(
    datasets: &mut [Dataset],
    embeddings: &ObsmKey,
    labels: &str,
    grouping: Grouping,
    args: &ClassificationArgs,
) -> anyhow::Result<Option<Dataset>> {
    apply_grouped(datasets, grouping, |dataset| {
        evaluate_dataset(dataset, embeddings, labels, args)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn split_keeps_every_class_on_both_sides() {
        let codes = [0, 0, 0, 0, 1, 1, 1, 1, 1, 1, 1, 1, 2];
        let split = stratified_split(&codes, 0.25, 42).unwrap();

        let count = |rows: &[usize], k: usize| rows.iter().filter(|&&i| codes[i] == k).count();
        assert_eq!(count(&split.train, 0), 1);
        assert_eq!(count(&split.train, 1), 2);
        assert_eq!(count(&split.train, 2), 1);
        assert_eq!(count(&split.validation, 0), 3);
        assert_eq!(count(&split.validation, 1), 6);
        assert_eq!(split.train.len() + split.validation.len(), codes.len());

        let again = stratified_split(&codes, 0.25, 42).unwrap();
        assert_eq!(split.train, again.train);
    }

    #[test]
    fn macro_precision_counts_unpredicted_classes() {
        let truth = [0, 0, 1, 1];
        let prediction = [0, 0, 0, 0];
        let (micro, macro_) = precision_scores(&truth, &prediction).unwrap();
        assert_abs_diff_eq!(micro, 0.5);
        // class 0: 2/4, class 1: never predicted
        assert_abs_diff_eq!(macro_, 0.25);
    }

    #[test]
    fn knn_ties_go_to_lowest_class() {
        let points = Mat::from_row_slice(2, 1, &[-1.0, 1.0]);
        let model = KnnClassifier::fit(&points, &[1, 0], 2, 2).unwrap();
        let query = Mat::from_row_slice(1, 1, &[0.0]);
        assert_eq!(model.predict(&query), vec![0]);
        assert_abs_diff_eq!(model.predict_proba(&query)[(0, 1)], 0.5);
    }
}
