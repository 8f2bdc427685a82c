use crate::traits::*;

pub use nalgebra::{DMatrix, DVector};

impl MatOps for DMatrix<f32> {
    type Mat = Self;
    type Scalar = f32;

    fn l1_normalize_rows(&self) -> (Self::Mat, usize) {
        let mut ret = self.clone();
        for mut row in ret.row_iter_mut() {
            let denom = row.iter().map(|x| x.abs()).sum::<f32>();
            row /= denom;
        }
        let ncoerced = ret.coerce_non_finite_inplace();
        (ret, ncoerced)
    }

    fn scale_columns(&self) -> (Self::Mat, usize) {
        let mut ret = self.centre_columns();
        let sig = ret.column_std();
        for (j, mut xx_j) in ret.column_iter_mut().enumerate() {
            xx_j /= sig[j];
        }
        let ncoerced = ret.coerce_non_finite_inplace();
        (ret, ncoerced)
    }

    fn centre_columns_inplace(&mut self) {
        let nn = self.nrows().max(1) as f32;
        for mut xx_j in self.column_iter_mut() {
            let mu = xx_j.sum() / nn;
            xx_j.add_scalar_mut(-mu);
        }
    }

    fn centre_columns(&self) -> Self::Mat {
        let mut ret = self.clone();
        ret.centre_columns_inplace();
        ret
    }

    fn coerce_non_finite_inplace(&mut self) -> usize {
        let mut ncoerced = 0;
        self.iter_mut().filter(|x| !x.is_finite()).for_each(|x| {
            *x = 0.0;
            ncoerced += 1;
        });
        ncoerced
    }
}

impl ColumnStatOps for DMatrix<f32> {
    type Scalar = f32;
    type DVec = DVector<f32>;

    fn column_sums(&self) -> Self::DVec {
        DVector::from_iterator(self.ncols(), self.column_iter().map(|x| x.sum()))
    }

    fn column_std(&self) -> Self::DVec {
        let nn = self.nrows() as f32;
        DVector::from_iterator(
            self.ncols(),
            self.column_iter().map(|x| {
                let mu = x.sum() / nn;
                (x.iter().map(|v| (v - mu) * (v - mu)).sum::<f32>() / nn).sqrt()
            }),
        )
    }

    fn column_correlation(&self) -> (DMatrix<f32>, usize) {
        let nn = self.nrows() as f32;
        let centred = self.centre_columns();
        let sig = centred.column_std();
        let mut corr = (centred.transpose() * &centred) / nn;
        for i in 0..corr.nrows() {
            for j in 0..corr.ncols() {
                corr[(i, j)] /= sig[i] * sig[j];
            }
        }
        let ncoerced = corr.coerce_non_finite_inplace();
        (corr, ncoerced)
    }
}

/// Stack matrices with the same number of columns on top of each other
pub fn concatenate_vertical(mats: &[&DMatrix<f32>]) -> anyhow::Result<DMatrix<f32>> {
    let ncol = mats.first().map(|x| x.ncols()).unwrap_or(0);
    if mats.iter().any(|x| x.ncols() != ncol) {
        anyhow::bail!("cannot stack matrices with different numbers of columns");
    }
    let nrow = mats.iter().map(|x| x.nrows()).sum::<usize>();
    let mut ret = DMatrix::<f32>::zeros(nrow, ncol);
    let mut lb = 0;
    for x in mats {
        ret.rows_mut(lb, x.nrows()).copy_from(*x);
        lb += x.nrows();
    }
    Ok(ret)
}
