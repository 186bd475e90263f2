use alloc::vec;
use alloc::vec::Vec;

use crate::inner::RhsError;
use crate::linalg::{lu_in_place, lu_solve, DenseMat};
use crate::state::{wrms_norm, StateVec};
use crate::traits::FloatScalar;

/// Tuning parameters of the modified-Newton stage solver.
#[derive(Debug, Clone, Copy)]
pub struct NewtonSettings<T> {
    /// Maximum correction iterations per stage solve.
    pub max_iters: usize,
    /// Convergence safety coefficient: the iteration stops once the
    /// estimated correction error drops below this fraction of the
    /// integrator tolerances.
    pub tol_coef: T,
    /// Decay factor applied to the convergence-rate estimate between
    /// iterations.
    pub conv_rate_decay: T,
    /// Declare divergence when an update grows by more than this ratio
    /// over the previous one.
    pub divergence_ratio: T,
}

impl Default for NewtonSettings<f64> {
    fn default() -> Self {
        Self {
            max_iters: 3,
            tol_coef: 0.1,
            conv_rate_decay: 0.3,
            divergence_ratio: 2.3,
        }
    }
}

impl Default for NewtonSettings<f32> {
    fn default() -> Self {
        Self {
            max_iters: 3,
            tol_coef: 0.1,
            conv_rate_decay: 0.3,
            divergence_ratio: 2.3,
        }
    }
}

/// Why a stage solve did not produce a solution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NewtonError {
    /// Out of iterations, diverging, or a recoverable residual failure;
    /// a smaller step may converge.
    ConvergenceFail,
    /// The residual function failed unrecoverably.
    ResidualFatal,
    /// The iteration matrix is singular.
    Singular,
}

/// Modified-Newton iteration on a stage residual `G(z) = 0`.
///
/// The Jacobian of `G` is approximated by forward differences and
/// LU-factored once per solve (counted as one setup), then reused for
/// every iteration of that solve. Convergence is judged in the weighted
/// RMS norm of the update, sharpened by a running convergence-rate
/// estimate; an update growing past `divergence_ratio` times its
/// predecessor aborts early.
#[derive(Debug, Clone)]
pub(crate) struct NewtonSolver<T> {
    pub settings: NewtonSettings<T>,
    jac: DenseMat<T>,
    perm: Vec<usize>,
    gz: StateVec<T>,
    gpert: StateVec<T>,
    rhs: StateVec<T>,
    delta: StateVec<T>,
    /// Total correction iterations.
    pub niters: usize,
    /// Total convergence failures.
    pub nconvfails: usize,
    /// Total Jacobian setups (factorizations).
    pub nsetups: usize,
}

impl<T: FloatScalar> NewtonSolver<T> {
    pub fn new(dim: usize, settings: NewtonSettings<T>) -> Self {
        Self {
            settings,
            jac: DenseMat::zeros(dim),
            perm: vec![0; dim],
            gz: StateVec::zeros(dim),
            gpert: StateVec::zeros(dim),
            rhs: StateVec::zeros(dim),
            delta: StateVec::zeros(dim),
            niters: 0,
            nconvfails: 0,
            nsetups: 0,
        }
    }

    /// Reallocate for a new state dimension, keeping settings and
    /// counters.
    pub fn resize(&mut self, dim: usize) {
        self.jac = DenseMat::zeros(dim);
        self.perm = vec![0; dim];
        self.gz = StateVec::zeros(dim);
        self.gpert = StateVec::zeros(dim);
        self.rhs = StateVec::zeros(dim);
        self.delta = StateVec::zeros(dim);
    }

    pub fn reset_counters(&mut self) {
        self.niters = 0;
        self.nconvfails = 0;
        self.nsetups = 0;
    }

    /// Solve `G(z) = 0` starting from the current contents of `z`,
    /// judging updates in the weighted RMS norm with weights `ewt`.
    pub fn solve<G>(
        &mut self,
        mut g: G,
        z: &mut StateVec<T>,
        ewt: &StateVec<T>,
    ) -> Result<(), NewtonError>
    where
        G: FnMut(&StateVec<T>, &mut StateVec<T>) -> Result<(), RhsError>,
    {
        let n = z.len();
        let one = T::one();

        self.eval_residual(&mut g, z)?;
        self.setup_jacobian(&mut g, z)?;

        let mut delp = T::zero();
        let mut crate_est = one;

        for m in 0..self.settings.max_iters {
            // Solve J·δ = −G(z) with the frozen factorization
            for i in 0..n {
                self.rhs[i] = -self.gz[i];
            }
            lu_solve(&self.jac, &self.perm, self.rhs.as_slice(), self.delta.as_mut_slice());
            z.axpy(one, &self.delta);
            self.niters += 1;

            let del = wrms_norm(&self.delta, ewt);
            if m > 0 {
                crate_est = (self.settings.conv_rate_decay * crate_est).max(del / delp);
            }
            let dcon = del * crate_est.min(one) / self.settings.tol_coef;
            if dcon <= one {
                return Ok(());
            }

            if m > 0 && del > self.settings.divergence_ratio * delp {
                self.nconvfails += 1;
                return Err(NewtonError::ConvergenceFail);
            }
            delp = del;

            self.eval_residual(&mut g, z)?;
        }

        self.nconvfails += 1;
        Err(NewtonError::ConvergenceFail)
    }

    fn eval_residual<G>(&mut self, g: &mut G, z: &StateVec<T>) -> Result<(), NewtonError>
    where
        G: FnMut(&StateVec<T>, &mut StateVec<T>) -> Result<(), RhsError>,
    {
        g(z, &mut self.gz).map_err(|e| match e {
            RhsError::Recoverable => {
                self.nconvfails += 1;
                NewtonError::ConvergenceFail
            }
            RhsError::Fatal => NewtonError::ResidualFatal,
        })
    }

    /// Forward-difference Jacobian of `G` at `z`, then LU factorization.
    fn setup_jacobian<G>(&mut self, g: &mut G, z: &mut StateVec<T>) -> Result<(), NewtonError>
    where
        G: FnMut(&StateVec<T>, &mut StateVec<T>) -> Result<(), RhsError>,
    {
        let n = z.len();
        let eps_sqrt = T::epsilon().sqrt();
        let one = T::one();

        for j in 0..n {
            let zj = z[j];
            let hj = eps_sqrt * if zj.abs() > one { zj.abs() } else { one };
            z[j] = zj + hj;
            let pert = g(&*z, &mut self.gpert);
            z[j] = zj;
            pert.map_err(|e| match e {
                RhsError::Recoverable => {
                    self.nconvfails += 1;
                    NewtonError::ConvergenceFail
                }
                RhsError::Fatal => NewtonError::ResidualFatal,
            })?;

            let inv_hj = one / hj;
            let col = self.jac.col_mut(j);
            for i in 0..n {
                col[i] = (self.gpert[i] - self.gz[i]) * inv_hj;
            }
        }

        self.nsetups += 1;
        lu_in_place(&mut self.jac, &mut self.perm).map_err(|_| NewtonError::Singular)
    }
}
