//! Design matrices and the matrix capability used by the solver.
//!
//! The coordinate-descent engine never looks at storage directly. It talks to
//! a [`DesignOperator`], which exposes the handful of products it needs:
//! `X·v`, `Xᵗ·v`, single-column extraction, column sums of squares, and the
//! weighted column Gram product `Xᵗ·diag(w)·X[:, j]`. Dense (`Array2<f64>`)
//! and sparse ([`SparseDesignMatrix`]) backends must agree on every one of
//! them up to floating-point roundoff.

use crate::estimate::EstimationError;
use crate::faer_ndarray::{fast_atv, fast_av};
use crate::linalg::utils::KahanSum;
use faer::sparse::{SparseColMat, SparseRowMat, Triplet};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use std::ops::Deref;
use std::sync::{Arc, OnceLock};

/// Matrix capability consumed by the coordinate-descent sweep and the
/// likelihood adapter.
///
/// Implementors represent an `N × n` matrix. All vectors handed in are
/// expected to have matching lengths; callers validate shapes once up front
/// so the hot loop does not.
pub trait DesignOperator {
    fn nrows(&self) -> usize;

    fn ncols(&self) -> usize;

    /// `X · v` for `v` of length `ncols`.
    fn matvec(&self, vector: ArrayView1<'_, f64>) -> Array1<f64>;

    /// `Xᵗ · v` for `v` of length `nrows`.
    fn transpose_matvec(&self, vector: ArrayView1<'_, f64>) -> Array1<f64>;

    /// Write column `col` densely into `out` (length `nrows`).
    fn column_into(&self, col: usize, out: &mut Array1<f64>);

    /// `‖X[:, col]‖²`.
    fn column_sum_of_squares(&self, col: usize) -> f64;

    /// `Σᵢ wᵢ · X[i, col]²`, the `(col, col)` entry of `Xᵗ·diag(w)·X`.
    fn weighted_column_sum_of_squares(&self, col: usize, weights: ArrayView1<'_, f64>) -> f64;

    /// `out = Xᵗ · diag(w) · X[:, col]`.
    ///
    /// `scratch` must have length `nrows` and is clobbered.
    fn weighted_column_gram_into(
        &self,
        col: usize,
        weights: ArrayView1<'_, f64>,
        scratch: &mut Array1<f64>,
        out: &mut Array1<f64>,
    ) {
        self.column_into(col, scratch);
        scratch.zip_mut_with(&weights, |x, &w| *x *= w);
        out.assign(&self.transpose_matvec(scratch.view()));
    }
}

impl DesignOperator for Array2<f64> {
    fn nrows(&self) -> usize {
        self.dim().0
    }

    fn ncols(&self) -> usize {
        self.dim().1
    }

    fn matvec(&self, vector: ArrayView1<'_, f64>) -> Array1<f64> {
        fast_av(self, &vector)
    }

    fn transpose_matvec(&self, vector: ArrayView1<'_, f64>) -> Array1<f64> {
        fast_atv(self, &vector)
    }

    fn column_into(&self, col: usize, out: &mut Array1<f64>) {
        out.assign(&self.column(col));
    }

    fn column_sum_of_squares(&self, col: usize) -> f64 {
        let mut acc = KahanSum::default();
        for &x in self.column(col) {
            acc.add(x * x);
        }
        acc.sum()
    }

    fn weighted_column_sum_of_squares(&self, col: usize, weights: ArrayView1<'_, f64>) -> f64 {
        let mut acc = KahanSum::default();
        for (&x, &w) in self.column(col).iter().zip(weights.iter()) {
            if x != 0.0 {
                acc.add(w * x * x);
            }
        }
        acc.sum()
    }
}

#[derive(Clone)]
pub struct SparseDesignMatrix {
    matrix: SparseColMat<usize, f64>,
    csr_cache: Arc<OnceLock<Arc<SparseRowMat<usize, f64>>>>,
}

impl SparseDesignMatrix {
    pub fn new(matrix: SparseColMat<usize, f64>) -> Self {
        Self {
            matrix,
            csr_cache: Arc::new(OnceLock::new()),
        }
    }

    /// Build from `(row, col, value)` triplets. Duplicate entries are summed.
    pub fn from_triplets(
        nrows: usize,
        ncols: usize,
        entries: &[(usize, usize, f64)],
    ) -> Result<Self, EstimationError> {
        let triplets: Vec<Triplet<usize, usize, f64>> = entries
            .iter()
            .map(|&(row, col, value)| Triplet::new(row, col, value))
            .collect();
        let matrix = SparseColMat::try_new_from_triplets(nrows, ncols, &triplets).map_err(|e| {
            EstimationError::SparseConstruction(format!(
                "failed to assemble {nrows}x{ncols} matrix from {} triplets: {e:?}",
                entries.len()
            ))
        })?;
        Ok(Self::new(matrix))
    }

    /// Sparse encoding of a dense matrix, keeping exactly its nonzero entries.
    pub fn from_dense(dense: ArrayView2<'_, f64>) -> Result<Self, EstimationError> {
        let mut entries = Vec::new();
        for ((row, col), &value) in dense.indexed_iter() {
            if value != 0.0 {
                entries.push((row, col, value));
            }
        }
        Self::from_triplets(dense.nrows(), dense.ncols(), &entries)
    }

    /// Adopt a row-major (CSR) matrix. The row-major copy is kept as the row
    /// cache, so it is not rebuilt later.
    pub fn from_row_major(csr: SparseRowMat<usize, f64>) -> Result<Self, EstimationError> {
        let symbolic = csr.symbolic();
        let row_ptr = symbolic.row_ptr();
        let col_idx = symbolic.col_idx();
        let values = csr.val();
        let mut entries = Vec::with_capacity(values.len());
        for row in 0..csr.nrows() {
            for idx in row_ptr[row]..row_ptr[row + 1] {
                entries.push((row, col_idx[idx], values[idx]));
            }
        }
        let out = Self::from_triplets(csr.nrows(), csr.ncols(), &entries)?;
        let _ = out.csr_cache.set(Arc::new(csr));
        Ok(out)
    }

    pub fn nnz(&self) -> usize {
        self.matrix.val().len()
    }

    pub fn to_dense(&self) -> Array2<f64> {
        let mut out = Array2::<f64>::zeros((self.matrix.nrows(), self.matrix.ncols()));
        let (symbolic, values) = self.matrix.parts();
        let col_ptr = symbolic.col_ptr();
        let row_idx = symbolic.row_idx();
        for col in 0..self.matrix.ncols() {
            for idx in col_ptr[col]..col_ptr[col + 1] {
                out[[row_idx[idx], col]] += values[idx];
            }
        }
        out
    }

    pub fn to_csr_arc(&self) -> Option<Arc<SparseRowMat<usize, f64>>> {
        if let Some(cached) = self.csr_cache.get() {
            return Some(cached.clone());
        }
        let csr = self.matrix.as_ref().to_row_major().ok()?;
        let arc = Arc::new(csr);
        let _ = self.csr_cache.set(arc.clone());
        Some(arc)
    }

    #[inline]
    fn column_entries(&self, col: usize) -> (&[usize], &[f64]) {
        let (symbolic, values) = self.matrix.parts();
        let col_ptr = symbolic.col_ptr();
        let start = col_ptr[col];
        let end = col_ptr[col + 1];
        (&symbolic.row_idx()[start..end], &values[start..end])
    }
}

impl Deref for SparseDesignMatrix {
    type Target = SparseColMat<usize, f64>;
    fn deref(&self) -> &Self::Target {
        &self.matrix
    }
}

impl AsRef<SparseColMat<usize, f64>> for SparseDesignMatrix {
    fn as_ref(&self) -> &SparseColMat<usize, f64> {
        &self.matrix
    }
}

impl DesignOperator for SparseDesignMatrix {
    fn nrows(&self) -> usize {
        self.matrix.nrows()
    }

    fn ncols(&self) -> usize {
        self.matrix.ncols()
    }

    fn matvec(&self, vector: ArrayView1<'_, f64>) -> Array1<f64> {
        let mut output = Array1::<f64>::zeros(self.matrix.nrows());
        for col in 0..self.matrix.ncols() {
            let x = vector[col];
            if x == 0.0 {
                continue;
            }
            let (rows, values) = self.column_entries(col);
            for (&row, &value) in rows.iter().zip(values) {
                output[row] += value * x;
            }
        }
        output
    }

    fn transpose_matvec(&self, vector: ArrayView1<'_, f64>) -> Array1<f64> {
        let mut output = Array1::<f64>::zeros(self.matrix.ncols());
        for col in 0..self.matrix.ncols() {
            let (rows, values) = self.column_entries(col);
            let mut acc = 0.0;
            for (&row, &value) in rows.iter().zip(values) {
                acc += value * vector[row];
            }
            output[col] = acc;
        }
        output
    }

    fn column_into(&self, col: usize, out: &mut Array1<f64>) {
        out.fill(0.0);
        let (rows, values) = self.column_entries(col);
        for (&row, &value) in rows.iter().zip(values) {
            out[row] += value;
        }
    }

    fn column_sum_of_squares(&self, col: usize) -> f64 {
        let (_, values) = self.column_entries(col);
        let mut acc = KahanSum::default();
        for &v in values {
            acc.add(v * v);
        }
        acc.sum()
    }

    fn weighted_column_sum_of_squares(&self, col: usize, weights: ArrayView1<'_, f64>) -> f64 {
        let (rows, values) = self.column_entries(col);
        let mut acc = KahanSum::default();
        for (&row, &v) in rows.iter().zip(values) {
            acc.add(weights[row] * v * v);
        }
        acc.sum()
    }

    /// Only the rows in the support of column `col` contribute, so this walks
    /// those rows of the cached row-major copy instead of the whole matrix.
    fn weighted_column_gram_into(
        &self,
        col: usize,
        weights: ArrayView1<'_, f64>,
        scratch: &mut Array1<f64>,
        out: &mut Array1<f64>,
    ) {
        let Some(csr) = self.to_csr_arc() else {
            self.column_into(col, scratch);
            scratch.zip_mut_with(&weights, |x, &w| *x *= w);
            out.assign(&self.transpose_matvec(scratch.view()));
            return;
        };
        out.fill(0.0);
        let symbolic = csr.symbolic();
        let row_ptr = symbolic.row_ptr();
        let col_idx = symbolic.col_idx();
        let row_values = csr.val();
        let (rows, values) = self.column_entries(col);
        for (&row, &x_row_col) in rows.iter().zip(values) {
            let scaled = weights[row] * x_row_col;
            if scaled == 0.0 {
                continue;
            }
            for idx in row_ptr[row]..row_ptr[row + 1] {
                out[col_idx[idx]] += row_values[idx] * scaled;
            }
        }
    }
}

/// Unified design matrix representation for dense and sparse workflows.
#[derive(Clone)]
pub enum DesignMatrix {
    Dense(Array2<f64>),
    Sparse(SparseDesignMatrix),
}

impl DesignMatrix {
    pub fn is_sparse(&self) -> bool {
        matches!(self, Self::Sparse(_))
    }

    pub fn to_dense(&self) -> Array2<f64> {
        match self {
            Self::Dense(matrix) => matrix.clone(),
            Self::Sparse(matrix) => matrix.to_dense(),
        }
    }
}

impl DesignOperator for DesignMatrix {
    fn nrows(&self) -> usize {
        match self {
            Self::Dense(matrix) => matrix.nrows(),
            Self::Sparse(matrix) => DesignOperator::nrows(matrix),
        }
    }

    fn ncols(&self) -> usize {
        match self {
            Self::Dense(matrix) => matrix.ncols(),
            Self::Sparse(matrix) => DesignOperator::ncols(matrix),
        }
    }

    fn matvec(&self, vector: ArrayView1<'_, f64>) -> Array1<f64> {
        match self {
            Self::Dense(matrix) => matrix.matvec(vector),
            Self::Sparse(matrix) => matrix.matvec(vector),
        }
    }

    fn transpose_matvec(&self, vector: ArrayView1<'_, f64>) -> Array1<f64> {
        match self {
            Self::Dense(matrix) => matrix.transpose_matvec(vector),
            Self::Sparse(matrix) => matrix.transpose_matvec(vector),
        }
    }

    fn column_into(&self, col: usize, out: &mut Array1<f64>) {
        match self {
            Self::Dense(matrix) => matrix.column_into(col, out),
            Self::Sparse(matrix) => matrix.column_into(col, out),
        }
    }

    fn column_sum_of_squares(&self, col: usize) -> f64 {
        match self {
            Self::Dense(matrix) => matrix.column_sum_of_squares(col),
            Self::Sparse(matrix) => matrix.column_sum_of_squares(col),
        }
    }

    fn weighted_column_sum_of_squares(&self, col: usize, weights: ArrayView1<'_, f64>) -> f64 {
        match self {
            Self::Dense(matrix) => matrix.weighted_column_sum_of_squares(col, weights),
            Self::Sparse(matrix) => matrix.weighted_column_sum_of_squares(col, weights),
        }
    }

    fn weighted_column_gram_into(
        &self,
        col: usize,
        weights: ArrayView1<'_, f64>,
        scratch: &mut Array1<f64>,
        out: &mut Array1<f64>,
    ) {
        match self {
            Self::Dense(matrix) => matrix.weighted_column_gram_into(col, weights, scratch, out),
            Self::Sparse(matrix) => matrix.weighted_column_gram_into(col, weights, scratch, out),
        }
    }
}

impl<'a> From<ArrayView2<'a, f64>> for DesignMatrix {
    fn from(value: ArrayView2<'a, f64>) -> Self {
        Self::Dense(value.to_owned())
    }
}

impl From<Array2<f64>> for DesignMatrix {
    fn from(value: Array2<f64>) -> Self {
        Self::Dense(value)
    }
}

impl From<&Array2<f64>> for DesignMatrix {
    fn from(value: &Array2<f64>) -> Self {
        Self::Dense(value.clone())
    }
}

impl From<SparseDesignMatrix> for DesignMatrix {
    fn from(value: SparseDesignMatrix) -> Self {
        Self::Sparse(value)
    }
}

impl From<SparseColMat<usize, f64>> for DesignMatrix {
    fn from(value: SparseColMat<usize, f64>) -> Self {
        Self::Sparse(SparseDesignMatrix::new(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn fixture() -> Array2<f64> {
        array![
            [1.0, 0.0, 2.0],
            [0.0, 0.0, -1.0],
            [3.0, 0.5, 0.0],
            [0.0, -2.0, 4.0]
        ]
    }

    fn assert_close(a: &Array1<f64>, b: &Array1<f64>) {
        assert_eq!(a.len(), b.len());
        for i in 0..a.len() {
            assert_abs_diff_eq!(a[i], b[i], epsilon = 1e-12);
        }
    }

    #[test]
    fn sparse_backend_matches_dense_backend() {
        let dense = fixture();
        let sparse = SparseDesignMatrix::from_dense(dense.view()).expect("valid triplets");
        assert_eq!(sparse.nnz(), 7);
        assert_eq!(sparse.to_dense(), dense);

        let v = array![0.5, -1.0, 2.0];
        let w = array![1.0, 2.0, -0.5, 0.25];
        assert_close(&sparse.matvec(v.view()), &dense.dot(&v));
        assert_close(&sparse.transpose_matvec(w.view()), &dense.t().dot(&w));

        let weights = array![0.5, 1.5, 2.0, 0.0];
        let mut col_dense = Array1::zeros(4);
        let mut col_sparse = Array1::from_elem(4, 9.0);
        let mut scratch = Array1::zeros(4);
        let mut gram_dense = Array1::zeros(3);
        let mut gram_sparse = Array1::from_elem(3, 9.0);
        for j in 0..3 {
            dense.column_into(j, &mut col_dense);
            sparse.column_into(j, &mut col_sparse);
            assert_close(&col_dense, &col_sparse);
            assert_abs_diff_eq!(
                dense.column_sum_of_squares(j),
                sparse.column_sum_of_squares(j),
                epsilon = 1e-12
            );
            assert_abs_diff_eq!(
                dense.weighted_column_sum_of_squares(j, weights.view()),
                sparse.weighted_column_sum_of_squares(j, weights.view()),
                epsilon = 1e-12
            );
            dense.weighted_column_gram_into(j, weights.view(), &mut scratch, &mut gram_dense);
            sparse.weighted_column_gram_into(j, weights.view(), &mut scratch, &mut gram_sparse);
            assert_close(&gram_dense, &gram_sparse);
        }
    }

    #[test]
    fn weighted_gram_column_matches_explicit_product() {
        let x = fixture();
        let weights = array![0.5, 1.5, 2.0, 1.0];
        let mut weighted = x.clone();
        for (i, mut row) in weighted.rows_mut().into_iter().enumerate() {
            row *= weights[i];
        }
        let gram = x.t().dot(&weighted);

        let design = DesignMatrix::from(x.clone());
        let mut scratch = Array1::zeros(4);
        let mut out = Array1::zeros(3);
        for j in 0..3 {
            design.weighted_column_gram_into(j, weights.view(), &mut scratch, &mut out);
            assert_close(&out, &gram.column(j).to_owned());
            assert_abs_diff_eq!(
                design.weighted_column_sum_of_squares(j, weights.view()),
                gram[[j, j]],
                epsilon = 1e-12
            );
        }
    }

    #[test]
    fn row_major_input_round_trips_through_column_storage() {
        let dense = fixture();
        let csc = SparseDesignMatrix::from_dense(dense.view()).expect("valid triplets");
        let csr = csc.to_csr_arc().expect("row-major conversion");
        let rebuilt = SparseDesignMatrix::from_row_major((*csr).clone()).expect("valid csr");
        assert_eq!(rebuilt.to_dense(), dense);
        assert!(DesignMatrix::from(rebuilt).is_sparse());
    }

    #[test]
    fn out_of_bounds_triplet_is_rejected() {
        let err = SparseDesignMatrix::from_triplets(2, 2, &[(0, 0, 1.0), (5, 1, 2.0)]);
        assert!(matches!(err, Err(EstimationError::SparseConstruction(_))));
    }
}
