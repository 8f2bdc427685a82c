/// Normalize, scale or centre matrices
///
/// Scaling may hit zero-variance columns or zero rows; those
/// non-finite entries are replaced by zero and the number of
/// replaced entries is returned so callers can detect the masking.
pub trait MatOps {
    type Mat;
    type Scalar;

    /// Divide each row by its L1 norm
    fn l1_normalize_rows(&self) -> (Self::Mat, usize);

    /// Column z-score with population standard deviation
    fn scale_columns(&self) -> (Self::Mat, usize);

    fn centre_columns_inplace(&mut self);

    fn centre_columns(&self) -> Self::Mat;

    /// Replace NaN/Inf by zero, returning the number of replacements
    fn coerce_non_finite_inplace(&mut self) -> usize;
}

/// Column-wise summaries
pub trait ColumnStatOps {
    type Scalar;
    type DVec;

    fn column_sums(&self) -> Self::DVec;

    fn column_std(&self) -> Self::DVec;

    /// Pearson correlation between columns, `ncol x ncol`
    fn column_correlation(&self) -> (nalgebra::DMatrix<Self::Scalar>, usize);
}
