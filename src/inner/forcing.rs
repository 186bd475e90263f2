use alloc::vec::Vec;

use crate::coupling::MriCoupling;
use crate::state::{linear_combination, StateVec};
use crate::traits::FloatScalar;

/// Storage for the polynomial forcing handed to the fast integrator.
///
/// For an explicit-fast stage `i` spanning the normalized width
/// `cdiff = c[i] − c[i−1]`, the slow coupling enters the fast subsystem
/// as a polynomial in the normalized time `θ = (t − tshift)/tscale`:
///
/// ```text
/// p(θ) = forcing[0] + forcing[1]·θ + … + forcing[nmat−1]·θ^{nmat−1}
/// forcing[k] = (1/cdiff) · Σ_{j<i} G[k][i][j] · F[j]
/// ```
///
/// The buffer holds one coefficient vector per coupling matrix plus the
/// time-normalization pair `(tshift, tscale)`. The integrator owns it and
/// rewrites it before every fast evolution; the fast side sees it only
/// through the read-only [`ForcingData`] view.
#[derive(Debug, Clone)]
pub struct ForcingBuffer<T> {
    forcing: Vec<StateVec<T>>,
    tshift: T,
    tscale: T,
}

impl<T: FloatScalar> ForcingBuffer<T> {
    /// Allocate `nmat` forcing vectors of dimension `dim`.
    pub fn new(nmat: usize, dim: usize) -> Self {
        Self {
            forcing: (0..nmat).map(|_| StateVec::zeros(dim)).collect(),
            tshift: T::zero(),
            tscale: T::one(),
        }
    }

    /// Number of forcing vectors (one per coupling matrix).
    #[inline]
    pub fn nmat(&self) -> usize {
        self.forcing.len()
    }

    /// State dimension of each forcing vector.
    #[inline]
    pub fn dim(&self) -> usize {
        self.forcing.first().map_or(0, StateVec::len)
    }

    /// Reallocate every forcing vector for a new state dimension.
    pub fn resize(&mut self, dim: usize) {
        for v in self.forcing.iter_mut() {
            *v = StateVec::zeros(dim);
        }
    }

    /// Set the time-normalization pair: `θ = (t − tshift)/tscale`.
    pub fn set_normalization(&mut self, tshift: T, tscale: T) {
        self.tshift = tshift;
        self.tscale = tscale;
    }

    /// The forcing coefficient vectors.
    #[inline]
    pub fn vectors(&self) -> &[StateVec<T>] {
        &self.forcing
    }

    #[cfg(test)]
    pub(crate) fn vectors_mut(&mut self) -> &mut [StateVec<T>] {
        &mut self.forcing
    }

    /// Build the forcing polynomial for stage `i` of `table` from the
    /// already-computed slow stage derivatives `f[0..i]`.
    ///
    /// `cdiff` is the abscissa gap `c[i] − c[i−1]` and must be nonzero;
    /// the caller guarantees this by only invoking fast stages where the
    /// gap exceeds the classification tolerance.
    pub fn compute(&mut self, table: &MriCoupling<T>, i: usize, cdiff: T, f: &[StateVec<T>]) {
        let rcdiff = T::one() / cdiff;
        for (k, vec) in self.forcing.iter_mut().enumerate() {
            linear_combination(
                T::zero(),
                vec,
                (0..i).map(|j| (rcdiff * table.coeff(k, i, j), &f[j])),
            );
        }
    }

    /// Read-only view handed to [`InnerStepper::evolve`](super::InnerStepper::evolve).
    pub fn data(&self) -> ForcingData<'_, T> {
        ForcingData {
            tshift: self.tshift,
            tscale: self.tscale,
            forcing: &self.forcing,
        }
    }
}

/// Read-only view of the forcing polynomial during one fast evolution.
#[derive(Debug, Clone, Copy)]
pub struct ForcingData<'a, T> {
    tshift: T,
    tscale: T,
    forcing: &'a [StateVec<T>],
}

impl<'a, T: FloatScalar> ForcingData<'a, T> {
    /// Time shift of the normalization `θ = (t − tshift)/tscale`.
    #[inline]
    pub fn tshift(&self) -> T {
        self.tshift
    }

    /// Time scale of the normalization.
    #[inline]
    pub fn tscale(&self) -> T {
        self.tscale
    }

    /// Number of polynomial coefficient vectors.
    #[inline]
    pub fn nmat(&self) -> usize {
        self.forcing.len()
    }

    /// The polynomial coefficient vectors.
    #[inline]
    pub fn vectors(&self) -> &'a [StateVec<T>] {
        self.forcing
    }

    /// Accumulate the forcing polynomial at time `t` onto `f`:
    ///
    /// ```text
    /// f ← f + Σ_m forcing[m]·θ^m,    θ = (t − tshift)/tscale
    /// ```
    ///
    /// A fast integrator's derivative routine calls this once per
    /// evaluation so its dynamics see the slow-scale coupling.
    pub fn add_forcing(&self, t: T, f: &mut StateVec<T>) {
        let tau = (t - self.tshift) / self.tscale;
        let mut taui = T::one();
        linear_combination(
            T::one(),
            f,
            self.forcing.iter().map(|v| {
                let c = taui;
                taui = taui * tau;
                (c, v)
            }),
        );
    }
}
