use alloc::vec;
use alloc::vec::Vec;
use core::ops::{Index, IndexMut};

use crate::traits::{FloatScalar, Scalar};

/// Heap-allocated state vector with runtime length.
///
/// The integrator treats the ODE state as an opaque flat vector; all
/// stage updates go through [`linear_combination`] so that a step costs
/// one pass per accumulated term.
///
/// # Examples
///
/// ```
/// use multirate::StateVec;
///
/// let mut y = StateVec::from_slice(&[1.0_f64, 2.0, 3.0]);
/// y.axpy(2.0, &StateVec::from_slice(&[1.0, 1.0, 1.0]));
/// assert_eq!(y.as_slice(), &[3.0, 4.0, 5.0]);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct StateVec<T> {
    pub(crate) data: Vec<T>,
}

impl<T: Scalar> StateVec<T> {
    /// Create a vector from a flat slice.
    ///
    /// ```
    /// use multirate::StateVec;
    /// let v = StateVec::from_slice(&[1.0, 2.0, 3.0]);
    /// assert_eq!(v[0], 1.0);
    /// assert_eq!(v.len(), 3);
    /// ```
    pub fn from_slice(data: &[T]) -> Self {
        Self {
            data: data.to_vec(),
        }
    }

    /// Create a vector from an owned `Vec`.
    pub fn from_vec(data: Vec<T>) -> Self {
        Self { data }
    }

    /// Create a zero vector of length `n`.
    ///
    /// ```
    /// use multirate::StateVec;
    /// let v: StateVec<f64> = StateVec::zeros(4);
    /// assert_eq!(v.len(), 4);
    /// assert_eq!(v[3], 0.0);
    /// ```
    pub fn zeros(n: usize) -> Self {
        Self {
            data: vec![T::zero(); n],
        }
    }

    /// Number of elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the vector is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// View the vector data as a slice.
    #[inline]
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// View the vector data as a mutable slice.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Set every element to `value`.
    pub fn fill(&mut self, value: T) {
        for x in self.data.iter_mut() {
            *x = value;
        }
    }

    /// Copy all elements from `src`.
    ///
    /// Panics if the lengths differ.
    pub fn copy_from(&mut self, src: &Self) {
        assert_eq!(self.len(), src.len(), "vector length mismatch");
        self.data.copy_from_slice(&src.data);
    }

    /// Multiply every element by `c` in place.
    pub fn scale(&mut self, c: T) {
        for x in self.data.iter_mut() {
            *x = c * *x;
        }
    }

    /// In-place `self ← self + a·x`.
    ///
    /// Panics if the lengths differ.
    ///
    /// ```
    /// use multirate::StateVec;
    /// let mut y = StateVec::from_slice(&[1.0_f64, 2.0]);
    /// let x = StateVec::from_slice(&[10.0, 20.0]);
    /// y.axpy(0.5, &x);
    /// assert_eq!(y.as_slice(), &[6.0, 12.0]);
    /// ```
    pub fn axpy(&mut self, a: T, x: &Self) {
        assert_eq!(self.len(), x.len(), "vector length mismatch");
        for i in 0..self.len() {
            self.data[i] = self.data[i] + a * x.data[i];
        }
    }
}

// ── Index ───────────────────────────────────────────────────────────

impl<T> Index<usize> for StateVec<T> {
    type Output = T;

    #[inline]
    fn index(&self, i: usize) -> &T {
        &self.data[i]
    }
}

impl<T> IndexMut<usize> for StateVec<T> {
    #[inline]
    fn index_mut(&mut self, i: usize) -> &mut T {
        &mut self.data[i]
    }
}

// ── Fused kernels ───────────────────────────────────────────────────

/// Fused linear combination `out ← acc·out + Σ cᵢ·vᵢ`.
///
/// A single pass over `out` per term; `acc = 0` discards the prior
/// contents, `acc = 1` accumulates onto them. Panics if any term's
/// length differs from `out`.
///
/// ```
/// use multirate::{linear_combination, StateVec};
///
/// let a = StateVec::from_slice(&[1.0_f64, 0.0]);
/// let b = StateVec::from_slice(&[0.0, 1.0]);
/// let mut out = StateVec::from_slice(&[5.0, 5.0]);
/// linear_combination(0.0, &mut out, [(2.0, &a), (3.0, &b)]);
/// assert_eq!(out.as_slice(), &[2.0, 3.0]);
/// ```
pub fn linear_combination<'a, T, I>(acc: T, out: &mut StateVec<T>, terms: I)
where
    T: FloatScalar + 'a,
    I: IntoIterator<Item = (T, &'a StateVec<T>)>,
{
    if acc.is_zero() {
        out.fill(T::zero());
    } else if !acc.is_one() {
        out.scale(acc);
    }
    for (c, v) in terms {
        assert_eq!(v.len(), out.len(), "vector length mismatch");
        for i in 0..out.len() {
            out.data[i] = out.data[i] + c * v.data[i];
        }
    }
}

/// Weighted root-mean-square norm `sqrt(Σ (vᵢ·wᵢ)² / n)`.
///
/// Returns zero for an empty vector. Panics if the lengths differ.
///
/// ```
/// use multirate::{wrms_norm, StateVec};
///
/// let v = StateVec::from_slice(&[3.0_f64, 4.0]);
/// let w = StateVec::from_slice(&[1.0, 1.0]);
/// assert!((wrms_norm(&v, &w) - 12.5_f64.sqrt()).abs() < 1e-12);
/// ```
pub fn wrms_norm<T: FloatScalar>(v: &StateVec<T>, w: &StateVec<T>) -> T {
    assert_eq!(v.len(), w.len(), "vector length mismatch");
    if v.is_empty() {
        return T::zero();
    }
    let mut sum = T::zero();
    for i in 0..v.len() {
        let p = v.data[i] * w.data[i];
        sum = sum + p * p;
    }
    (sum / T::from(v.len()).unwrap()).sqrt()
}

/// Build reciprocal error weights `wᵢ = 1/(reltol·|yᵢ| + abstol)` in place.
///
/// The caller guarantees `reltol ≥ 0` and `abstol > 0`, so every weight
/// is finite and positive. Panics if the lengths differ.
pub fn error_weights<T: FloatScalar>(y: &StateVec<T>, reltol: T, abstol: T, w: &mut StateVec<T>) {
    assert_eq!(y.len(), w.len(), "vector length mismatch");
    for i in 0..y.len() {
        w.data[i] = T::one() / (reltol * y.data[i].abs() + abstol);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_slice() {
        let v = StateVec::from_slice(&[1.0, 2.0, 3.0]);
        assert_eq!(v.len(), 3);
        assert_eq!(v[0], 1.0);
        assert_eq!(v[2], 3.0);
    }

    #[test]
    fn zeros() {
        let v: StateVec<f64> = StateVec::zeros(4);
        assert_eq!(v.len(), 4);
        for i in 0..4 {
            assert_eq!(v[i], 0.0);
        }
    }

    #[test]
    fn index_mut() {
        let mut v: StateVec<f64> = StateVec::zeros(3);
        v[1] = 42.0;
        assert_eq!(v[1], 42.0);
    }

    #[test]
    fn fill_and_scale() {
        let mut v: StateVec<f64> = StateVec::zeros(3);
        v.fill(2.0);
        v.scale(-1.5);
        assert_eq!(v.as_slice(), &[-3.0, -3.0, -3.0]);
    }

    #[test]
    fn copy_from() {
        let src = StateVec::from_slice(&[1.0, 2.0]);
        let mut dst: StateVec<f64> = StateVec::zeros(2);
        dst.copy_from(&src);
        assert_eq!(dst, src);
    }

    #[test]
    fn axpy() {
        let mut y = StateVec::from_slice(&[1.0_f64, 2.0, 3.0]);
        let x = StateVec::from_slice(&[1.0, 1.0, 1.0]);
        y.axpy(2.0, &x);
        assert_eq!(y.as_slice(), &[3.0, 4.0, 5.0]);
    }

    #[test]
    #[should_panic(expected = "vector length mismatch")]
    fn axpy_length_mismatch() {
        let mut y = StateVec::from_slice(&[1.0_f64, 2.0]);
        let x = StateVec::from_slice(&[1.0, 1.0, 1.0]);
        y.axpy(2.0, &x);
    }

    #[test]
    fn linear_combination_overwrite() {
        let a = StateVec::from_slice(&[1.0_f64, 0.0]);
        let b = StateVec::from_slice(&[0.0, 1.0]);
        let mut out = StateVec::from_slice(&[9.0, 9.0]);
        linear_combination(0.0, &mut out, [(2.0, &a), (3.0, &b)]);
        assert_eq!(out.as_slice(), &[2.0, 3.0]);
    }

    #[test]
    fn linear_combination_accumulate() {
        let a = StateVec::from_slice(&[1.0_f64, 1.0]);
        let mut out = StateVec::from_slice(&[1.0, 2.0]);
        linear_combination(1.0, &mut out, [(10.0, &a)]);
        assert_eq!(out.as_slice(), &[11.0, 12.0]);
    }

    #[test]
    fn linear_combination_rescale_no_terms() {
        let mut out = StateVec::from_slice(&[2.0_f64, 4.0]);
        linear_combination(0.5, &mut out, core::iter::empty());
        assert_eq!(out.as_slice(), &[1.0, 2.0]);
    }

    #[test]
    fn wrms_norm_uniform_weights() {
        let v = StateVec::from_slice(&[3.0_f64, 4.0]);
        let w = StateVec::from_slice(&[1.0, 1.0]);
        // sqrt((9 + 16)/2)
        assert!((wrms_norm(&v, &w) - 12.5_f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn wrms_norm_weighted() {
        let v = StateVec::from_slice(&[2.0_f64, 8.0]);
        let w = StateVec::from_slice(&[0.5, 0.25]);
        // components 1 and 2, sqrt((1 + 4)/2)
        assert!((wrms_norm(&v, &w) - 2.5_f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn error_weights_reciprocal() {
        let y = StateVec::from_slice(&[-2.0_f64, 0.0]);
        let mut w: StateVec<f64> = StateVec::zeros(2);
        error_weights(&y, 0.5, 1.0, &mut w);
        assert!((w[0] - 0.5).abs() < 1e-15);
        assert!((w[1] - 1.0).abs() < 1e-15);
    }
}
