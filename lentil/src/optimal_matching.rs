use crate::common::*;

use pathfinding::prelude::{kuhn_munkres, Matrix};

/// Maximum-weight perfect matching on a square weight matrix
pub trait WeightedMatching {
    /// Returns `assignment[row] = column` and the total weight
    fn assign(&self, weights: &CountMat) -> anyhow::Result<(Vec<usize>, usize)>;
}

/// Hungarian algorithm (`pathfinding`)
#[derive(Clone, Copy, Debug, Default)]
pub struct KuhnMunkres;

impl WeightedMatching for KuhnMunkres {
    fn assign(&self, weights: &CountMat) -> anyhow::Result<(Vec<usize>, usize)> {
        let kk = weights.nrows();
        ensure_shape("confusion matrix columns", kk, weights.ncols())?;

        let mut values = Vec::with_capacity(kk * kk);
        for i in 0..kk {
            for j in 0..kk {
                values.push(i64::try_from(weights[(i, j)])?);
            }
        }
        let matrix = Matrix::from_vec(kk, kk, values)
            .map_err(|e| anyhow::anyhow!("invalid weight matrix: {:?}", e))?;

        let (total, assignment) = kuhn_munkres(&matrix);
        Ok((assignment, usize::try_from(total)?))
    }
}

/// Label matching for a labels x predictions confusion matrix
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LabelMatching {
    /// `permutation[prediction] = label`
    pub permutation: Vec<usize>,
    /// prediction indices, ascending
    pub index: Vec<usize>,
    /// total count on the matched pairs
    pub total_weight: usize,
}

impl LabelMatching {
    /// Confusion rows reordered by the matching: entry `(p, q)` is
    /// `confusion[permutation[p], q]`, so matched pairs sit on the
    /// diagonal.
    pub fn reorder(&self, confusion: &CountMat) -> CountMat {
        CountMat::from_fn(self.index.len(), confusion.ncols(), |p, q| {
            confusion[(self.permutation[self.index[p]], q)]
        })
    }
}

/// Match predictions to labels with [`KuhnMunkres`]
pub fn optimal_permutation(confusion: &CountMat) -> anyhow::Result<LabelMatching> {
    optimal_permutation_with(confusion, &KuhnMunkres)
}

/// Match every prediction class to a distinct label class so that the
/// total number of agreeing spots is maximal.
///
/// `confusion[(label, prediction)]` counts spots; the matrix must be
/// square and non-empty.
pub fn optimal_permutation_with<M: WeightedMatching>(
    confusion: &CountMat,
    matcher: &M,
) -> anyhow::Result<LabelMatching> {
    let kk = confusion.nrows();
    ensure_shape("confusion matrix columns", kk, confusion.ncols())?;
    if kk == 0 {
        return Err(StatError::degenerate("empty confusion matrix").into());
    }

    let (label_to_prediction, total_weight) = matcher.assign(confusion)?;
    ensure_shape("matching size", kk, label_to_prediction.len())?;

    let mut permutation = vec![usize::MAX; kk];
    for (label, &prediction) in label_to_prediction.iter().enumerate() {
        anyhow::ensure!(
            prediction < kk && permutation[prediction] == usize::MAX,
            "matching is not a bijection"
        );
        permutation[prediction] = label;
    }

    Ok(LabelMatching {
        permutation,
        index: (0..kk).collect(),
        total_weight,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity_weight(confusion: &CountMat) -> usize {
        (0..confusion.nrows()).map(|i| confusion[(i, i)]).sum()
    }

    #[test]
    fn recovers_shuffled_diagonal() {
        // predictions 0,1,2 are labels 2,0,1
        let confusion = CountMat::from_row_slice(3, 3, &[0, 9, 1, 1, 0, 7, 8, 2, 0]);
        let matching = optimal_permutation(&confusion).unwrap();
        assert_eq!(matching.permutation, vec![2, 0, 1]);
        assert_eq!(matching.index, vec![0, 1, 2]);
        assert_eq!(matching.total_weight, 8 + 9 + 7);

        let reordered = matching.reorder(&confusion);
        assert_eq!(reordered[(0, 0)], 8);
        assert_eq!(reordered[(1, 1)], 9);
        assert_eq!(reordered[(2, 2)], 7);
    }

    #[test]
    fn never_worse_than_identity() {
        let confusion = CountMat::from_row_slice(
            4,
            4,
            &[3, 1, 4, 1, 5, 9, 2, 6, 5, 3, 5, 8, 9, 7, 9, 3],
        );
        let matching = optimal_permutation(&confusion).unwrap();

        let mut seen = matching.permutation.clone();
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3]);

        let matched = (0..4)
            .map(|p| confusion[(matching.permutation[p], p)])
            .sum::<usize>();
        assert_eq!(matched, matching.total_weight);
        assert!(matching.total_weight >= identity_weight(&confusion));
    }

    #[test]
    fn non_square_is_shape_mismatch() {
        let confusion = CountMat::zeros(2, 3);
        let err = optimal_permutation(&confusion).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StatError>(),
            Some(StatError::ShapeMismatch {
                expected: 2,
                found: 3,
                ..
            })
        ));
    }

    #[test]
    fn empty_is_degenerate() {
        let err = optimal_permutation(&CountMat::zeros(0, 0)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StatError>(),
            Some(StatError::DegenerateInput(_))
        ));
    }

    struct Identity;

    impl WeightedMatching for Identity {
        fn assign(&self, weights: &CountMat) -> anyhow::Result<(Vec<usize>, usize)> {
            let kk = weights.nrows();
            Ok(((0..kk).collect(), identity_weight(weights)))
        }
    }

    #[test]
    fn matcher_is_pluggable() {
        let confusion = CountMat::from_row_slice(2, 2, &[0, 5, 5, 0]);
        let matching = optimal_permutation_with(&confusion, &Identity).unwrap();
        assert_eq!(matching.permutation, vec![0, 1]);
        assert_eq!(matching.total_weight, 0);
    }
}
