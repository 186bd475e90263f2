//! The multirate integrator: lifecycle, stage dispatch, and the
//! fixed-step evolution loop.
//!
//! [`MriStep`] advances a state vector with a multirate infinitesimal
//! method: each slow stage either evolves the fast subsystem across an
//! abscissa gap under a polynomial forcing, applies a fused explicit
//! update, or solves a diagonally-implicit correction with a modified
//! Newton iteration. The stage sequence is fixed by the coupling table
//! and classified once at construction.
//!
//! The outer step size is fixed ([`MriStep::set_fixed_step`]); no
//! embedded error estimate is formed at this layer, so adaptive outer
//! stepping is rejected by table validation rather than supported badly.

mod newton;
mod predict;


pub use newton::NewtonSettings;
pub use predict::{PredictorMethod, StepHistory};

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt;

use newton::{NewtonError, NewtonSolver};

use crate::coupling::{CouplingError, MriCoupling, StageKind};
use crate::inner::{ForcingBuffer, FullRhsMode, InnerError, InnerStepper, RhsError};
use crate::state::{error_weights, linear_combination, StateVec};
use crate::traits::FloatScalar;

/// Failures of stepping, evolution, and the query surface.
///
/// Recoverable variants ([`is_recoverable`](Self::is_recoverable)) mean
/// the step attempt failed but a smaller step size might succeed; since
/// this integrator never shrinks its own step, they surface to the
/// caller as the retry signal. Everything else aborts the integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepError {
    /// `evolve`/`step` called before [`MriStep::set_fixed_step`].
    FixedStepRequired,
    /// The maximum number of steps was taken before reaching the target
    /// time.
    TooMuchWork,
    /// A right-hand side evaluation failed unrecoverably.
    RhsFailure,
    /// A right-hand side evaluation reported a recoverable failure at a
    /// point where no retry is possible.
    UnrecoverableRhs,
    /// The inner stepper failed to evolve or reset.
    InnerStepFailure,
    /// The pre-inner-evolve hook failed.
    OuterToInnerFailure,
    /// The post-inner-evolve hook failed.
    InnerToOuterFailure,
    /// The stage-postprocessing hook failed.
    PostStageFailure,
    /// The stage-predict hook failed unrecoverably.
    PredictorFailure,
    /// The stage-predict hook asked for a retry at a smaller step.
    PredictorRetry,
    /// The Newton iteration did not converge; a smaller step might.
    ConvergenceFailure,
    /// The Newton iteration matrix is singular.
    SingularMatrix,
    /// A stage type with no implementation was dispatched.
    UnsupportedStage,
    /// Dense output requested before any step completed.
    DenseOutputUnavailable,
    /// Dense output requested outside the last step interval.
    DenseOutputRange,
    /// Dense output supports derivative orders 0 and 1 only.
    InvalidDerivativeOrder,
    /// The operation needs an implicit stage, but the coupling table has
    /// none.
    NotImplicit,
}

impl StepError {
    /// Whether a retry at a smaller step size could succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::PredictorRetry | Self::ConvergenceFailure
        )
    }
}

impl fmt::Display for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FixedStepRequired => write!(f, "a fixed step size must be set before evolving"),
            Self::TooMuchWork => write!(f, "maximum number of steps exceeded"),
            Self::RhsFailure => write!(f, "right-hand side evaluation failed"),
            Self::UnrecoverableRhs => {
                write!(f, "right-hand side failed recoverably where no retry is possible")
            }
            Self::InnerStepFailure => write!(f, "inner stepper failed"),
            Self::OuterToInnerFailure => write!(f, "pre-inner-evolve hook failed"),
            Self::InnerToOuterFailure => write!(f, "post-inner-evolve hook failed"),
            Self::PostStageFailure => write!(f, "stage postprocessing hook failed"),
            Self::PredictorFailure => write!(f, "stage predict hook failed"),
            Self::PredictorRetry => write!(f, "stage predict hook requested a smaller step"),
            Self::ConvergenceFailure => write!(f, "nonlinear solver failed to converge"),
            Self::SingularMatrix => write!(f, "nonlinear iteration matrix is singular"),
            Self::UnsupportedStage => {
                write!(f, "implicit stages spanning a fast interval are unsupported")
            }
            Self::DenseOutputUnavailable => write!(f, "no completed step to interpolate"),
            Self::DenseOutputRange => write!(f, "interpolation time outside the last step"),
            Self::InvalidDerivativeOrder => {
                write!(f, "dense output supports derivative orders 0 and 1")
            }
            Self::NotImplicit => write!(f, "the coupling table has no implicit stage"),
        }
    }
}

/// Absolute tolerance, scalar or per-component.
#[derive(Debug, Clone)]
enum Tolerance<T> {
    Scalar(T),
    Vector(StateVec<T>),
}

/// Per-instance state of the implicit stage path, allocated only when
/// the coupling table contains an implicit stage.
#[derive(Debug, Clone)]
struct ImplicitState<T> {
    /// Stage predictor.
    zpred: StateVec<T>,
    /// Newton correction, so the stage solution is `zpred + zcor`.
    zcor: StateVec<T>,
    /// Known part of the stage residual.
    sdata: StateVec<T>,
    /// Scratch for `zpred + zcor` inside the residual.
    ztmp: StateVec<T>,
    /// Error weights for the convergence test.
    ewt: StateVec<T>,
    newton: NewtonSolver<T>,
    gamma: T,
}

impl<T: FloatScalar> ImplicitState<T> {
    fn new(dim: usize, settings: NewtonSettings<T>) -> Self {
        Self {
            zpred: StateVec::zeros(dim),
            zcor: StateVec::zeros(dim),
            sdata: StateVec::zeros(dim),
            ztmp: StateVec::zeros(dim),
            ewt: StateVec::zeros(dim),
            newton: NewtonSolver::new(dim, settings),
            gamma: T::zero(),
        }
    }

    fn resize(&mut self, dim: usize) {
        self.zpred = StateVec::zeros(dim);
        self.zcor = StateVec::zeros(dim);
        self.sdata = StateVec::zeros(dim);
        self.ztmp = StateVec::zeros(dim);
        self.ewt = StateVec::zeros(dim);
        self.newton.resize(dim);
    }
}

type StageHook<T> = Box<dyn FnMut(T, &mut StateVec<T>) -> Result<(), RhsError>>;
type PreInnerHook<T> = Box<dyn FnMut(T, &[StateVec<T>]) -> Result<(), RhsError>>;
type PostInnerHook<T> = Box<dyn FnMut(T, &StateVec<T>) -> Result<(), RhsError>>;

/// Multirate infinitesimal (MRI) integrator.
///
/// Composes a slow outer method, defined by an [`MriCoupling`] table,
/// with a pluggable fast [`InnerStepper`] evolving on each slow
/// sub-interval. Generic over the scalar type `T`, the slow
/// right-hand side closure `F`, and the inner stepper `S`.
///
/// # Example
///
/// ```
/// use multirate::coupling::mis_kw3;
/// use multirate::{MriStep, RhsError, Rk4Inner, StateVec};
///
/// // Split dy/dt = -y into slow (-0.3 y) and fast (-0.7 y) parts
/// let y0 = StateVec::from_slice(&[1.0_f64]);
/// let inner = Rk4Inner::new(0.002, |_t, y: &StateVec<f64>, f: &mut StateVec<f64>| {
///     f[0] = -0.7 * y[0];
///     Ok::<(), RhsError>(())
/// });
/// let mut mri = MriStep::new(
///     |_t, y: &StateVec<f64>, f: &mut StateVec<f64>| {
///         f[0] = -0.3 * y[0];
///         Ok::<(), RhsError>(())
///     },
///     0.0,
///     &y0,
///     mis_kw3(),
///     inner,
/// )
/// .unwrap();
/// mri.set_fixed_step(0.05);
///
/// let mut yout = StateVec::zeros(1);
/// mri.evolve(1.0, &mut yout).unwrap();
/// assert!((yout[0] - (-1.0_f64).exp()).abs() < 1e-4);
/// ```
pub struct MriStep<T, F, S> {
    fs: F,
    inner: S,
    coupling: MriCoupling<T>,
    /// Stage kinds indexed by stage; entry 0 is never dispatched (stage
    /// 0 is the previous step solution).
    kinds: Vec<StageKind>,

    tn: T,
    tcur: T,
    h: Option<T>,
    hold: T,
    stop_time: Option<T>,
    max_steps: usize,

    yn: StateVec<T>,
    ycur: StateVec<T>,
    /// Full right-hand side `fs + ff` at `(tn, yn)`.
    fcur: StateVec<T>,
    ftemp: StateVec<T>,
    /// Slow stage derivatives, one per stage.
    f: Vec<StateVec<T>>,
    /// Effective RK coefficient row, overwritten per stage.
    rkcoeffs: Vec<T>,
    forcing: ForcingBuffer<T>,
    implicit: Option<ImplicitState<T>>,

    reltol: T,
    abstol: Tolerance<T>,
    predictor: PredictorMethod,
    hist: StepHistory<T>,
    /// Set at construction and by resize/reinit/reset; forces a full RHS
    /// refresh before the next step and the trivial predictor within it.
    first_step: bool,

    pre_inner: Option<PreInnerHook<T>>,
    post_inner: Option<PostInnerHook<T>>,
    stage_predict: Option<StageHook<T>>,
    post_stage: Option<StageHook<T>>,

    nsteps: usize,
    nfs: usize,
}

impl<T, F, S> MriStep<T, F, S>
where
    T: FloatScalar,
    F: FnMut(T, &StateVec<T>, &mut StateVec<T>) -> Result<(), RhsError>,
    S: InnerStepper<T>,
{
    /// Create an integrator for the slow right-hand side `fs` with the
    /// initial condition `(t0, y0)`.
    ///
    /// The coupling table is validated here and every stage classified;
    /// all per-stage and per-matrix arrays are sized immediately, so no
    /// later call can find them missing. The implicit-solve state is
    /// allocated only when the table has an implicit stage.
    pub fn new(
        fs: F,
        t0: T,
        y0: &StateVec<T>,
        coupling: MriCoupling<T>,
        inner: S,
    ) -> Result<Self, CouplingError> {
        coupling.validate(false)?;

        let stages = coupling.stages();
        let dim = y0.len();

        let mut kinds = Vec::with_capacity(stages);
        kinds.push(StageKind::ExplicitNoFast); // stage 0, never dispatched
        for i in 1..stages {
            kinds.push(coupling.classify(i));
        }

        let implicit = coupling
            .is_implicit()
            .then(|| ImplicitState::new(dim, NewtonSettings::default_for()));

        Ok(Self {
            fs,
            inner,
            forcing: ForcingBuffer::new(coupling.nmat(), dim),
            kinds,
            tn: t0,
            tcur: t0,
            h: None,
            hold: T::zero(),
            stop_time: None,
            max_steps: 500,
            yn: y0.clone(),
            ycur: y0.clone(),
            fcur: StateVec::zeros(dim),
            ftemp: StateVec::zeros(dim),
            f: (0..stages).map(|_| StateVec::zeros(dim)).collect(),
            rkcoeffs: alloc::vec![T::zero(); stages],
            implicit,
            reltol: T::from(1e-4).unwrap(),
            abstol: Tolerance::Scalar(T::from(1e-9).unwrap()),
            predictor: PredictorMethod::Trivial,
            hist: StepHistory::new(dim),
            first_step: true,
            pre_inner: None,
            post_inner: None,
            stage_predict: None,
            post_stage: None,
            nsteps: 0,
            nfs: 0,
            coupling,
        })
    }

    // ── Configuration ───────────────────────────────────────────────

    /// Set the (required) outer step size. Negative integrates backward.
    ///
    /// Panics if `h` is zero.
    pub fn set_fixed_step(&mut self, h: T) {
        assert!(!h.is_zero(), "outer step size must be nonzero");
        self.h = Some(h);
    }

    /// Scalar relative and absolute tolerances for the implicit
    /// convergence test. Defaults: `reltol = 1e-4`, `abstol = 1e-9`.
    pub fn set_tolerances(&mut self, reltol: T, abstol: T) {
        self.reltol = reltol;
        self.abstol = Tolerance::Scalar(abstol);
    }

    /// Scalar relative with per-component absolute tolerances.
    ///
    /// Panics if `abstol` does not match the state dimension.
    pub fn set_tolerances_vec(&mut self, reltol: T, abstol: &StateVec<T>) {
        assert_eq!(abstol.len(), self.yn.len(), "tolerance vector length mismatch");
        self.reltol = reltol;
        self.abstol = Tolerance::Vector(abstol.clone());
    }

    /// Select the implicit-stage predictor policy. Default
    /// [`PredictorMethod::Trivial`].
    pub fn set_predictor_method(&mut self, method: PredictorMethod) {
        self.predictor = method;
    }

    /// Maximum steps per `evolve` call. Default 500.
    pub fn set_max_num_steps(&mut self, n: usize) {
        self.max_steps = n;
    }

    /// Never step past `t`; the final step is clamped to land on it.
    pub fn set_stop_time(&mut self, t: T) {
        self.stop_time = Some(t);
    }

    /// Remove a previously set stop time.
    pub fn clear_stop_time(&mut self) {
        self.stop_time = None;
    }

    /// Tune the Newton stage solver. No effect on fully explicit tables.
    pub fn set_newton_settings(&mut self, settings: NewtonSettings<T>) {
        if let Some(imp) = &mut self.implicit {
            imp.newton.settings = settings;
        }
    }

    /// Hook invoked before each fast evolution with the stage start time
    /// and the forcing vectors. Any failure aborts the step.
    pub fn set_pre_inner_hook(
        &mut self,
        hook: impl FnMut(T, &[StateVec<T>]) -> Result<(), RhsError> + 'static,
    ) {
        self.pre_inner = Some(Box::new(hook));
    }

    /// Hook invoked after each fast evolution with the stage time and
    /// solution. Any failure aborts the step.
    pub fn set_post_inner_hook(
        &mut self,
        hook: impl FnMut(T, &StateVec<T>) -> Result<(), RhsError> + 'static,
    ) {
        self.post_inner = Some(Box::new(hook));
    }

    /// Hook refining the implicit-stage predictor in place. A
    /// recoverable failure asks for a smaller step; a fatal one aborts.
    pub fn set_stage_predict_hook(
        &mut self,
        hook: impl FnMut(T, &mut StateVec<T>) -> Result<(), RhsError> + 'static,
    ) {
        self.stage_predict = Some(Box::new(hook));
    }

    /// Hook postprocessing every completed stage solution in place. Any
    /// failure aborts the step; its presence forces an inner reset after
    /// every stage so the fast integrator sees the modified state.
    pub fn set_post_stage_hook(
        &mut self,
        hook: impl FnMut(T, &mut StateVec<T>) -> Result<(), RhsError> + 'static,
    ) {
        self.post_stage = Some(Box::new(hook));
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Change the problem dimension, restarting from `(t0, y0)`.
    ///
    /// The complete replacement set of sized arrays is built before any
    /// field is touched, so the instance is never left with a mix of
    /// old- and new-sized storage. A vector absolute tolerance cannot
    /// survive a dimension change and reverts to the scalar default;
    /// counters are preserved, the step history is not.
    pub fn resize(&mut self, t0: T, y0: &StateVec<T>) {
        let dim = y0.len();
        let stages = self.coupling.stages();

        let yn = y0.clone();
        let ycur = y0.clone();
        let fcur = StateVec::zeros(dim);
        let ftemp = StateVec::zeros(dim);
        let f: Vec<StateVec<T>> = (0..stages).map(|_| StateVec::zeros(dim)).collect();

        self.yn = yn;
        self.ycur = ycur;
        self.fcur = fcur;
        self.ftemp = ftemp;
        self.f = f;
        self.forcing.resize(dim);
        if let Some(imp) = &mut self.implicit {
            imp.resize(dim);
        }
        if let Tolerance::Vector(v) = &self.abstol {
            if v.len() != dim {
                self.abstol = Tolerance::Scalar(T::from(1e-9).unwrap());
            }
        }
        self.hist.resize(dim);
        self.tn = t0;
        self.tcur = t0;
        self.first_step = true;
    }

    /// Restart from `(t0, y0)` at the same dimension, zeroing all
    /// counters.
    ///
    /// Panics if `y0` does not match the current state dimension.
    pub fn reinit(&mut self, t0: T, y0: &StateVec<T>) {
        self.yn.copy_from(y0);
        self.ycur.copy_from(y0);
        self.tn = t0;
        self.tcur = t0;
        self.hold = T::zero();
        self.hist.clear();
        self.first_step = true;
        self.nsteps = 0;
        self.nfs = 0;
        if let Some(imp) = &mut self.implicit {
            imp.newton.reset_counters();
            imp.gamma = T::zero();
        }
    }

    /// Move to `(t, y)` keeping all counters. Idempotent: repeating the
    /// same reset changes nothing further.
    ///
    /// Panics if `y` does not match the current state dimension.
    pub fn reset(&mut self, t: T, y: &StateVec<T>) {
        self.yn.copy_from(y);
        self.ycur.copy_from(y);
        self.tn = t;
        self.tcur = t;
        self.hist.clear();
        self.first_step = true;
    }

    // ── Queries ─────────────────────────────────────────────────────

    /// Time of the last accepted solution.
    #[inline]
    pub fn current_time(&self) -> T {
        self.tn
    }

    /// The last accepted solution.
    #[inline]
    pub fn current_state(&self) -> &StateVec<T> {
        &self.yn
    }

    /// Step-scaled implicit coefficient `γ = h·A[i][i]` of the most
    /// recent implicit stage, zero for fully explicit tables.
    pub fn current_gamma(&self) -> T {
        self.implicit.as_ref().map_or(T::zero(), |imp| imp.gamma)
    }

    /// Size of the last completed step (zero before any step).
    #[inline]
    pub fn last_step(&self) -> T {
        self.hold
    }

    /// The coupling table.
    #[inline]
    pub fn coupling(&self) -> &MriCoupling<T> {
        &self.coupling
    }

    /// Completed steps.
    #[inline]
    pub fn num_steps(&self) -> usize {
        self.nsteps
    }

    /// Slow right-hand side evaluations.
    #[inline]
    pub fn num_rhs_evals(&self) -> usize {
        self.nfs
    }

    /// Newton iterations across all implicit stage solves.
    pub fn num_nonlin_iters(&self) -> usize {
        self.implicit.as_ref().map_or(0, |imp| imp.newton.niters)
    }

    /// Newton convergence failures.
    pub fn num_nonlin_conv_fails(&self) -> usize {
        self.implicit.as_ref().map_or(0, |imp| imp.newton.nconvfails)
    }

    /// Jacobian setups (factorizations).
    pub fn num_lin_setups(&self) -> usize {
        self.implicit.as_ref().map_or(0, |imp| imp.newton.nsetups)
    }

    /// Recover a stage solution from a Newton correction:
    /// `out = zpred + zcor`.
    pub fn compute_state(
        &self,
        zcor: &StateVec<T>,
        out: &mut StateVec<T>,
    ) -> Result<(), StepError> {
        let Some(imp) = self.implicit.as_ref() else {
            return Err(StepError::NotImplicit);
        };
        linear_combination(T::zero(), out, [(T::one(), &imp.zpred), (T::one(), zcor)]);
        Ok(())
    }

    // ── Evolution ───────────────────────────────────────────────────

    /// Advance to `tout`, writing the solution there into `yout` and
    /// returning the time actually reached.
    ///
    /// Steps with the fixed size until the interval containing `tout` is
    /// covered, then fills `yout` by dense output; a stop time clamps
    /// both the stepping and the returned time. Recoverable step
    /// failures surface unchanged: this layer never shrinks its step.
    pub fn evolve(&mut self, tout: T, yout: &mut StateVec<T>) -> Result<T, StepError> {
        let h = self.h.ok_or(StepError::FixedStepRequired)?;
        let tdir = if h > T::zero() { T::one() } else { -T::one() };
        let target = match self.stop_time {
            Some(ts) if (tout - ts) * tdir > T::zero() => ts,
            _ => tout,
        };

        let mut taken = 0usize;
        while (target - self.tn) * tdir > self.time_resolution(h) {
            if taken >= self.max_steps {
                return Err(StepError::TooMuchWork);
            }
            self.advance_one(h)?;
            taken += 1;
        }

        if (tout - self.tn) * tdir > self.time_resolution(h) || !self.hist.is_valid() {
            // Stop time cut the integration short, or no step was needed
            yout.copy_from(&self.yn);
            Ok(self.tn)
        } else {
            self.get_dky(target, 0, yout)?;
            Ok(target)
        }
    }

    /// Take exactly one step, returning the new time.
    pub fn step(&mut self) -> Result<T, StepError> {
        let h = self.h.ok_or(StepError::FixedStepRequired)?;
        self.advance_one(h)?;
        Ok(self.tn)
    }

    /// Evaluate the full right-hand side `f = fs(t, y) + ff(t, y)`.
    ///
    /// `Start` and `End` cache the slow part for reuse as the next
    /// step's stage-0 derivative; `Other` leaves the cache alone.
    pub fn full_rhs(
        &mut self,
        t: T,
        y: &StateVec<T>,
        f: &mut StateVec<T>,
        mode: FullRhsMode,
    ) -> Result<(), StepError> {
        match mode {
            FullRhsMode::Start | FullRhsMode::End => {
                (self.fs)(t, y, &mut self.f[0]).map_err(|_| StepError::RhsFailure)?;
                self.nfs += 1;
                self.inner
                    .full_rhs(t, y, f, FullRhsMode::Other)
                    .map_err(|_| StepError::RhsFailure)?;
                f.axpy(T::one(), &self.f[0]);
            }
            FullRhsMode::Other => {
                (self.fs)(t, y, &mut self.ftemp).map_err(|_| StepError::RhsFailure)?;
                self.nfs += 1;
                self.inner
                    .full_rhs(t, y, f, FullRhsMode::Other)
                    .map_err(|_| StepError::RhsFailure)?;
                f.axpy(T::one(), &self.ftemp);
            }
        }
        Ok(())
    }

    /// Dense output: the `k`-th derivative (`k ≤ 1`) of the solution
    /// polynomial over the last completed step, evaluated at `t`.
    pub fn get_dky(&self, t: T, k: usize, out: &mut StateVec<T>) -> Result<(), StepError> {
        if k > 1 {
            return Err(StepError::InvalidDerivativeOrder);
        }
        if !self.hist.is_valid() {
            return Err(StepError::DenseOutputUnavailable);
        }

        let t0 = self.hist.t_old();
        let t1 = self.hist.t_new();
        let fuzz = T::from(100.0).unwrap() * T::epsilon() * (t0.abs() + t1.abs() + T::one());
        let lo = t0.min(t1) - fuzz;
        let hi = t0.max(t1) + fuzz;
        if t < lo || t > hi {
            return Err(StepError::DenseOutputRange);
        }

        if k == 0 {
            self.hist.eval(t, 3, out);
        } else {
            self.hist.eval_derivative(t, out);
        }
        Ok(())
    }

    // ── Internal step machinery ─────────────────────────────────────

    /// Times closer than this are the same time.
    fn time_resolution(&self, h: T) -> T {
        T::from(100.0).unwrap() * T::epsilon() * (self.tn.abs() + h.abs())
    }

    /// One accepted step: refresh the cached RHS if stale, clamp to the
    /// stop time, run the stage loop, then complete the bookkeeping.
    fn advance_one(&mut self, h: T) -> Result<(), StepError> {
        if self.first_step {
            self.refresh_full_rhs()?;
        }

        let mut hstep = h;
        if let Some(ts) = self.stop_time {
            let tdir = if h > T::zero() { T::one() } else { -T::one() };
            if (self.tn + hstep - ts) * tdir > T::zero() {
                hstep = ts - self.tn;
            }
        }

        self.hist.begin(self.tn, &self.yn, &self.fcur);
        self.take_step(hstep)?;

        self.tn = self.tn + hstep;
        self.yn.copy_from(&self.ycur);
        self.hold = hstep;
        self.nsteps += 1;
        self.first_step = false;

        self.refresh_full_rhs()?;
        self.hist.complete(self.tn, &self.yn, &self.fcur);
        Ok(())
    }

    /// Recompute `F[0] = fs(tn, yn)` and `fcur = fs + ff`.
    fn refresh_full_rhs(&mut self) -> Result<(), StepError> {
        (self.fs)(self.tn, &self.yn, &mut self.f[0]).map_err(|_| StepError::RhsFailure)?;
        self.nfs += 1;
        self.inner
            .full_rhs(self.tn, &self.yn, &mut self.fcur, FullRhsMode::Other)
            .map_err(|_| StepError::RhsFailure)?;
        self.fcur.axpy(T::one(), &self.f[0]);
        Ok(())
    }

    /// The stage loop. `ycur` enters holding the previous solution and
    /// leaves holding the step result; any stage failure aborts the step
    /// with its classified error.
    fn take_step(&mut self, h: T) -> Result<(), StepError> {
        let stages = self.coupling.stages();
        self.ycur.copy_from(&self.yn);

        // Stage 0 is the previous solution; F[0] was cached at step start
        for i in 1..stages {
            self.tcur = self.tn + self.coupling.abscissa(i) * h;

            match self.kinds[i] {
                StageKind::ExplicitFast => self.stage_explicit_fast(i, h)?,
                StageKind::ExplicitNoFast => self.stage_explicit_nofast(i, h),
                StageKind::ImplicitNoFast => self.stage_implicit_nofast(i, h)?,
                StageKind::ImplicitFast => return Err(StepError::UnsupportedStage),
            }

            let postprocessed = if let Some(hook) = &mut self.post_stage {
                hook(self.tcur, &mut self.ycur).map_err(|_| StepError::PostStageFailure)?;
                true
            } else {
                false
            };

            // Keep the fast integrator consistent with any slow-scale
            // correction of the stage solution
            if self.kinds[i] != StageKind::ExplicitFast || postprocessed {
                self.inner
                    .reset(self.tcur, &self.ycur)
                    .map_err(|_| StepError::InnerStepFailure)?;
            }

            if i < stages - 1 {
                (self.fs)(self.tcur, &self.ycur, &mut self.f[i]).map_err(|e| match e {
                    RhsError::Fatal => StepError::RhsFailure,
                    RhsError::Recoverable => StepError::UnrecoverableRhs,
                })?;
                self.nfs += 1;
            }
        }

        Ok(())
    }

    /// Explicit stage with fast evolution: build the forcing polynomial,
    /// then hand the sub-interval to the inner stepper.
    fn stage_explicit_fast(&mut self, i: usize, h: T) -> Result<(), StepError> {
        let t0 = self.tn + self.coupling.abscissa(i - 1) * h;
        let cdiff = self.coupling.abscissa(i) - self.coupling.abscissa(i - 1);

        self.forcing.compute(&self.coupling, i, cdiff, &self.f);
        self.forcing.set_normalization(t0, cdiff * h);

        if let Some(hook) = &mut self.pre_inner {
            hook(t0, self.forcing.vectors()).map_err(|_| StepError::OuterToInnerFailure)?;
        }

        // A recoverable inner failure is tolerated: the fast integrator
        // reached the end time with degraded accuracy, and the outer
        // method has no way to react at fixed step
        match self
            .inner
            .evolve(t0, self.tcur, &mut self.ycur, &self.forcing.data())
        {
            Ok(()) | Err(InnerError::Recoverable) => {}
            Err(InnerError::Fatal) => return Err(StepError::InnerStepFailure),
        }

        if let Some(hook) = &mut self.post_inner {
            hook(self.tcur, &self.ycur).map_err(|_| StepError::InnerToOuterFailure)?;
        }
        Ok(())
    }

    /// Explicit stage with a zero abscissa gap: one fused update with
    /// the effective coefficient row.
    fn stage_explicit_nofast(&mut self, i: usize, h: T) {
        self.coupling.rk_row(i, &mut self.rkcoeffs);
        linear_combination(
            T::one(),
            &mut self.ycur,
            (0..i).map(|j| (h * self.rkcoeffs[j], &self.f[j])),
        );
    }

    /// Diagonally-implicit stage: predict, assemble the residual data,
    /// and run the Newton correction.
    fn stage_implicit_nofast(&mut self, i: usize, h: T) -> Result<(), StepError> {
        self.predict(i, h);

        let tcur = self.tcur;
        if let Some(hook) = &mut self.stage_predict {
            let Some(imp) = self.implicit.as_mut() else {
                return Err(StepError::UnsupportedStage);
            };
            hook(tcur, &mut imp.zpred).map_err(|e| match e {
                RhsError::Fatal => StepError::PredictorFailure,
                RhsError::Recoverable => StepError::PredictorRetry,
            })?;
        }

        self.coupling.rk_row(i, &mut self.rkcoeffs);
        self.update_error_weights();

        let Some(imp) = self.implicit.as_mut() else {
            return Err(StepError::UnsupportedStage);
        };

        let gamma = h * self.rkcoeffs[i];
        imp.gamma = gamma;

        // sdata = ycur − zpred + h·Σ_{j<i} A[j]·F[j]
        linear_combination(
            T::zero(),
            &mut imp.sdata,
            core::iter::once((T::one(), &self.ycur))
                .chain(core::iter::once((-T::one(), &imp.zpred)))
                .chain((0..i).map(|j| (h * self.rkcoeffs[j], &self.f[j]))),
        );

        // Solve G(zc) = zc − γ·fs(tcur, zpred + zc) − sdata = 0
        imp.zcor.fill(T::zero());
        let mut nfs = 0usize;
        let ImplicitState {
            ref zpred,
            ref mut zcor,
            ref sdata,
            ref mut ztmp,
            ref ewt,
            ref mut newton,
            ..
        } = *imp;
        let fs = &mut self.fs;
        let result = newton.solve(
            |z, out| {
                ztmp.copy_from(zpred);
                ztmp.axpy(T::one(), z);
                fs(tcur, ztmp, out)?;
                nfs += 1;
                for idx in 0..out.len() {
                    out[idx] = z[idx] - gamma * out[idx] - sdata[idx];
                }
                Ok(())
            },
            zcor,
            ewt,
        );
        self.nfs += nfs;

        match result {
            Ok(()) => {
                linear_combination(
                    T::zero(),
                    &mut self.ycur,
                    [(T::one(), &*zpred), (T::one(), &*zcor)],
                );
                Ok(())
            }
            Err(NewtonError::ConvergenceFail) => Err(StepError::ConvergenceFailure),
            Err(NewtonError::ResidualFatal) => Err(StepError::RhsFailure),
            Err(NewtonError::Singular) => Err(StepError::SingularMatrix),
        }
    }

    /// Fill `zpred` for implicit stage `i` per the selected policy,
    /// falling back to the previous accepted solution whenever the
    /// policy cannot run.
    fn predict(&mut self, i: usize, h: T) {
        let Some(imp) = self.implicit.as_mut() else {
            return;
        };

        if self.first_step || !self.hist.is_valid() {
            imp.zpred.copy_from(&self.yn);
            return;
        }

        let t_stage = self.tn + self.coupling.abscissa(i) * h;
        let tau_rel = (self.coupling.abscissa(i) * h / self.hold).abs();

        match self.predictor {
            PredictorMethod::Trivial => imp.zpred.copy_from(&self.yn),
            PredictorMethod::MaximumOrder => self.hist.eval(t_stage, 3, &mut imp.zpred),
            PredictorMethod::VariableOrder => {
                let drop = tau_rel.floor().to_usize().unwrap_or(3);
                let degree = 3usize.saturating_sub(drop).max(1);
                self.hist.eval(t_stage, degree, &mut imp.zpred);
            }
            PredictorMethod::CutoffOrder => {
                let degree = if tau_rel <= T::from(0.5).unwrap() { 3 } else { 1 };
                self.hist.eval(t_stage, degree, &mut imp.zpred);
            }
            PredictorMethod::Bootstrap => {
                // Latest prior stage with a nonzero abscissa, preferring
                // the largest abscissa
                let mut jstage = None;
                for j in 0..i {
                    let cj = self.coupling.abscissa(j);
                    if !cj.is_zero()
                        && jstage.map_or(true, |jj| cj >= self.coupling.abscissa(jj))
                    {
                        jstage = Some(j);
                    }
                }
                match jstage {
                    None => imp.zpred.copy_from(&self.yn),
                    Some(j) => {
                        // Quadratic Hermite through (tn, yn) with slopes
                        // fcur at tn and F[j] at tn + hj
                        let hj = h * self.coupling.abscissa(j);
                        let tau = h * self.coupling.abscissa(i);
                        let two = T::one() + T::one();
                        let a2 = tau * tau / (two * hj);
                        let a1 = tau - a2;
                        linear_combination(
                            T::zero(),
                            &mut imp.zpred,
                            [(T::one(), &self.yn), (a1, &self.fcur), (a2, &self.f[j])],
                        );
                    }
                }
            }
        }
    }

    /// Refresh the implicit error weights from the current stage state.
    fn update_error_weights(&mut self) {
        let Some(imp) = self.implicit.as_mut() else {
            return;
        };
        match &self.abstol {
            Tolerance::Scalar(atol) => {
                error_weights(&self.ycur, self.reltol, *atol, &mut imp.ewt);
            }
            Tolerance::Vector(atv) => {
                for idx in 0..self.ycur.len() {
                    imp.ewt[idx] =
                        T::one() / (self.reltol * self.ycur[idx].abs() + atv[idx]);
                }
            }
        }
    }
}

impl<T: FloatScalar> NewtonSettings<T> {
    /// Generic stand-in for the `f32`/`f64` `Default` impls.
    fn default_for() -> Self {
        Self {
            max_iters: 3,
            tol_coef: T::from(0.1).unwrap(),
            conv_rate_decay: T::from(0.3).unwrap(),
            divergence_ratio: T::from(2.3).unwrap(),
        }
    }
}
