//! Compressed-row sparse operators and their action on state vectors.

use ndarray as nd;
use num_complex::Complex64 as C64;
use num_traits::Zero;
use crate::error::{ GrapeError, GrapeResult };

/// Row count above which [`CsrOperator::apply_dual`] splits rows across the
/// rayon pool.
pub const PAR_ROW_MIN: usize = 512;

/// A square complex matrix in compressed-row form.
///
/// Row `i` holds the entries `indptr[i]..indptr[i + 1]` of `indices` (columns)
/// and `data` (values).
#[derive(Clone, Debug, PartialEq)]
pub struct CsrOperator {
    dim: usize,
    indptr: Vec<usize>,
    indices: Vec<usize>,
    data: Vec<C64>,
}

impl CsrOperator {
    /// Create the zero operator.
    pub fn zeros(dim: usize) -> Self {
        Self {
            dim,
            indptr: vec![0; dim + 1],
            indices: Vec::new(),
            data: Vec::new(),
        }
    }

    /// Create from raw compressed-row buffers, checking that they describe a
    /// valid `dim × dim` matrix.
    pub fn from_raw(
        dim: usize,
        indptr: Vec<usize>,
        indices: Vec<usize>,
        data: Vec<C64>,
    ) -> GrapeResult<Self>
    {
        if indptr.len() != dim + 1 {
            return Err(GrapeError::mismatch(
                "row offsets", dim + 1, indptr.len()));
        }
        if indices.len() != data.len() {
            return Err(GrapeError::mismatch(
                "coefficients", indices.len(), data.len()));
        }
        if indptr[0] != 0 {
            return Err(GrapeError::MalformedOperator(
                format!("first row offset must be 0, got {}", indptr[0])));
        }
        if let Some(k) = (0..dim).find(|&k| indptr[k] > indptr[k + 1]) {
            return Err(GrapeError::MalformedOperator(
                format!("row offsets decrease at row {}", k)));
        }
        if indptr[dim] != indices.len() {
            return Err(GrapeError::MalformedOperator(
                format!(
                    "last row offset {} doesn't match {} stored entries",
                    indptr[dim], indices.len(),
                )
            ));
        }
        if let Some(j) = indices.iter().find(|&&j| j >= dim) {
            return Err(GrapeError::MalformedOperator(
                format!("column index {} out of range for dimension {}", j, dim)));
        }
        Ok(Self { dim, indptr, indices, data })
    }

    /// Convert a dense square matrix, dropping entries with modulus at most
    /// `tol`.
    pub fn from_dense(a: &nd::Array2<C64>, tol: f64) -> GrapeResult<Self> {
        let (n, m) = a.dim();
        if n != m {
            return Err(GrapeError::mismatch("square matrix columns", n, m));
        }
        let mut indptr: Vec<usize> = Vec::with_capacity(n + 1);
        let mut indices: Vec<usize> = Vec::new();
        let mut data: Vec<C64> = Vec::new();
        indptr.push(0);
        for row in a.outer_iter() {
            row.iter().enumerate()
                .filter(|(_, x)| x.norm() > tol)
                .for_each(|(j, x)| { indices.push(j); data.push(*x); });
            indptr.push(indices.len());
        }
        Ok(Self { dim: n, indptr, indices, data })
    }

    /// Convert to a dense matrix.
    pub fn to_dense(&self) -> nd::Array2<C64> {
        let mut a: nd::Array2<C64> = nd::Array2::zeros((self.dim, self.dim));
        for i in 0..self.dim {
            for jj in self.indptr[i]..self.indptr[i + 1] {
                a[[i, self.indices[jj]]] += self.data[jj];
            }
        }
        a
    }

    /// Return a copy with every coefficient multiplied by `s`.
    pub fn scaled(&self, s: C64) -> Self {
        Self {
            dim: self.dim,
            indptr: self.indptr.clone(),
            indices: self.indices.clone(),
            data: self.data.iter().map(|x| s * x).collect(),
        }
    }

    pub fn dim(&self) -> usize { self.dim }

    /// Number of stored entries.
    pub fn nnz(&self) -> usize { self.data.len() }

    #[inline]
    fn row_dot(&self, i: usize, x: &nd::ArrayView1<C64>) -> C64 {
        (self.indptr[i]..self.indptr[i + 1])
            .fold(C64::zero(), |acc, jj| acc + self.data[jj] * x[self.indices[jj]])
    }

    /// Compute `pf * A * x` and add it into both `y` and `z`.
    ///
    /// Neither destination is cleared first. Row `i` only ever writes index
    /// `i` of each destination, so rows are split across threads without
    /// synchronization for large dimensions.
    ///
    /// *Panics* if any vector length differs from the operator dimension.
    pub fn apply_dual(
        &self,
        x: nd::ArrayView1<C64>,
        y: nd::ArrayViewMut1<C64>,
        z: nd::ArrayViewMut1<C64>,
        pf: f64,
    ) {
        assert_eq!(x.len(), self.dim, "apply_dual: source length");
        if pf == 0.0 || self.data.is_empty() { return; }
        let zip = nd::Zip::indexed(y).and(z);
        let kernel = |i: usize, yi: &mut C64, zi: &mut C64| {
            let v = self.row_dot(i, &x) * pf;
            *yi += v;
            *zi += v;
        };
        if self.dim >= PAR_ROW_MIN {
            zip.par_for_each(kernel);
        } else {
            zip.for_each(kernel);
        }
    }
}
