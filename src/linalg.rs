use alloc::vec;
use alloc::vec::Vec;
use core::ops::{Index, IndexMut};

use crate::traits::FloatScalar;

/// Errors from linear algebra operations.
///
/// ```
/// use multirate::linalg::{lu_in_place, DenseMat, LinalgError};
///
/// let mut a = DenseMat::from_rows(2, &[1.0_f64, 2.0, 2.0, 4.0]);
/// let mut perm = [0usize; 2];
/// assert_eq!(lu_in_place(&mut a, &mut perm), Err(LinalgError::Singular));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinalgError {
    /// Matrix is singular or nearly singular.
    Singular,
}

impl core::fmt::Display for LinalgError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            LinalgError::Singular => write!(f, "matrix is singular"),
        }
    }
}

/// Square dense matrix with column-major storage.
///
/// Holds the iteration matrix of the implicit stage solver; columns are
/// contiguous so a finite-difference Jacobian is built one column slice
/// at a time.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseMat<T> {
    data: Vec<T>,
    n: usize,
}

impl<T: FloatScalar> DenseMat<T> {
    /// Create an `n × n` zero matrix.
    pub fn zeros(n: usize) -> Self {
        Self {
            data: vec![T::zero(); n * n],
            n,
        }
    }

    /// Create an `n × n` matrix from a row-major flat slice.
    ///
    /// ```
    /// use multirate::linalg::DenseMat;
    /// let m = DenseMat::from_rows(2, &[1.0, 2.0, 3.0, 4.0]);
    /// assert_eq!(m[(0, 1)], 2.0);
    /// assert_eq!(m[(1, 0)], 3.0);
    /// ```
    pub fn from_rows(n: usize, data: &[T]) -> Self {
        assert_eq!(data.len(), n * n, "slice length must be n*n");
        let mut m = Self::zeros(n);
        for i in 0..n {
            for j in 0..n {
                m[(i, j)] = data[i * n + j];
            }
        }
        m
    }

    /// Matrix order (number of rows and columns).
    #[inline]
    pub fn size(&self) -> usize {
        self.n
    }

    /// View column `j` as a mutable slice.
    #[inline]
    pub fn col_mut(&mut self, j: usize) -> &mut [T] {
        &mut self.data[j * self.n..(j + 1) * self.n]
    }
}

impl<T> Index<(usize, usize)> for DenseMat<T> {
    type Output = T;

    #[inline]
    fn index(&self, (i, j): (usize, usize)) -> &T {
        &self.data[j * self.n + i]
    }
}

impl<T> IndexMut<(usize, usize)> for DenseMat<T> {
    #[inline]
    fn index_mut(&mut self, (i, j): (usize, usize)) -> &mut T {
        &mut self.data[j * self.n + i]
    }
}

/// Perform LU decomposition with partial pivoting, in place.
///
/// On return, `a` contains both L and U packed together:
/// - Upper triangle (including diagonal): U
/// - Lower triangle (excluding diagonal): L (diagonal of L is implicitly 1)
///
/// `perm` is filled with the row permutation indices.
pub fn lu_in_place<T: FloatScalar>(
    a: &mut DenseMat<T>,
    perm: &mut [usize],
) -> Result<(), LinalgError> {
    let n = a.size();
    assert_eq!(n, perm.len(), "permutation slice length must match matrix size");

    for (i, p) in perm.iter_mut().enumerate() {
        *p = i;
    }

    for col in 0..n {
        // Partial pivoting: find row with largest magnitude in this column
        let mut max_row = col;
        let mut max_val = a[(col, col)].abs();
        for row in (col + 1)..n {
            let val = a[(row, col)].abs();
            if val > max_val {
                max_val = val;
                max_row = row;
            }
        }

        if max_val < T::epsilon() {
            return Err(LinalgError::Singular);
        }

        if max_row != col {
            perm.swap(col, max_row);
            for j in 0..n {
                let tmp = a[(col, j)];
                a[(col, j)] = a[(max_row, j)];
                a[(max_row, j)] = tmp;
            }
        }

        let pivot = a[(col, col)];
        let inv_pivot = T::one() / pivot;

        // Scale sub-column: a[col+1:n, col] /= pivot
        for i in (col + 1)..n {
            a[(i, col)] = a[(i, col)] * inv_pivot;
        }

        // Rank-1 update: a[col+1:n, j] -= a[col, j] * a[col+1:n, col]
        for j in (col + 1)..n {
            let factor = a[(col, j)];
            for i in (col + 1)..n {
                a[(i, j)] = a[(i, j)] - factor * a[(i, col)];
            }
        }
    }

    Ok(())
}

/// Solve Ax = b given the packed LU decomposition and permutation.
///
/// `lu` is the packed L/U matrix from [`lu_in_place`].
/// `b` (input) and `x` (output) are separate slices of length n.
pub fn lu_solve<T: FloatScalar>(lu: &DenseMat<T>, perm: &[usize], b: &[T], x: &mut [T]) {
    let n = lu.size();

    // Apply permutation and forward substitution (solve Ly = Pb)
    for i in 0..n {
        let mut sum = b[perm[i]];
        for j in 0..i {
            sum = sum - lu[(i, j)] * x[j];
        }
        x[i] = sum;
    }

    // Back substitution (solve Ux = y)
    for i in (0..n).rev() {
        let mut sum = x[i];
        for j in (i + 1)..n {
            sum = sum - lu[(i, j)] * x[j];
        }
        x[i] = sum / lu[(i, i)];
    }
}
