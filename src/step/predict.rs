use crate::state::{linear_combination, StateVec};
use crate::traits::FloatScalar;

/// Initial-guess policy for implicit stages.
///
/// All interpolatory policies evaluate the cubic-Hermite record of the
/// last accepted step ([`StepHistory`]); they differ only in how far they
/// trust it as the stage extrapolates past the step end. Whenever the
/// history is not yet populated (first step, or right after a resize,
/// reinit, or reset) every policy falls back to the trivial predictor,
/// the previous accepted solution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PredictorMethod {
    /// Previous accepted solution.
    #[default]
    Trivial,
    /// Full-degree Hermite extrapolation for every stage.
    MaximumOrder,
    /// Hermite degree decreases as the stage extrapolates further past
    /// the previous step.
    VariableOrder,
    /// Full degree for stages within half the previous step, first
    /// order beyond.
    CutoffOrder,
    /// Quadratic Hermite through the previous accepted solution and the
    /// latest prior stage with a nonzero abscissa.
    Bootstrap,
}

/// Cubic-Hermite record of the last accepted step.
///
/// Holds `(t, y, f)` at both ends of the most recent step, where `f` is
/// the full right-hand side `fs + ff`. Serves implicit-stage prediction
/// and dense output; extrapolation past the step end is permitted (that
/// is exactly what the predictor policies do).
#[derive(Debug, Clone)]
pub struct StepHistory<T> {
    t0: T,
    t1: T,
    y0: StateVec<T>,
    y1: StateVec<T>,
    f0: StateVec<T>,
    f1: StateVec<T>,
    valid: bool,
}

impl<T: FloatScalar> StepHistory<T> {
    /// Empty history for state dimension `dim`.
    pub fn new(dim: usize) -> Self {
        Self {
            t0: T::zero(),
            t1: T::zero(),
            y0: StateVec::zeros(dim),
            y1: StateVec::zeros(dim),
            f0: StateVec::zeros(dim),
            f1: StateVec::zeros(dim),
            valid: false,
        }
    }

    /// Whether a completed step has been recorded.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Discard the record.
    pub fn clear(&mut self) {
        self.valid = false;
    }

    /// Reallocate for a new state dimension, discarding the record.
    pub fn resize(&mut self, dim: usize) {
        *self = Self::new(dim);
    }

    /// Start of the recorded interval.
    #[inline]
    pub fn t_old(&self) -> T {
        self.t0
    }

    /// End of the recorded interval.
    #[inline]
    pub fn t_new(&self) -> T {
        self.t1
    }

    /// Width of the recorded interval.
    #[inline]
    pub fn step_size(&self) -> T {
        self.t1 - self.t0
    }

    /// Stash the step's starting point. Invalidates the record until
    /// [`complete`](Self::complete) supplies the matching endpoint, so a
    /// failed step never leaves a half-updated interval behind.
    pub fn begin(&mut self, t: T, y: &StateVec<T>, f: &StateVec<T>) {
        self.valid = false;
        self.t0 = t;
        self.y0.copy_from(y);
        self.f0.copy_from(f);
    }

    /// Record the step's endpoint, making the history valid.
    pub fn complete(&mut self, t: T, y: &StateVec<T>, f: &StateVec<T>) {
        self.t1 = t;
        self.y1.copy_from(y);
        self.f1.copy_from(f);
        self.valid = true;
    }

    /// Evaluate the interpolant at `t` with the given polynomial degree
    /// (capped at 3), writing the result to `out`.
    ///
    /// Degree 0 returns the step endpoint, degree 1 the secant line,
    /// degree 2 a quadratic matching `y0`, `y1`, and `f1`, and degree 3
    /// the full cubic Hermite matching values and derivatives at both
    /// ends. Values of `t` outside the interval extrapolate.
    pub fn eval(&self, t: T, degree: usize, out: &mut StateVec<T>) {
        debug_assert!(self.valid, "history evaluated before a step completed");
        let h = self.t1 - self.t0;
        let s = (t - self.t0) / h;

        match degree {
            0 => out.copy_from(&self.y1),
            1 => {
                // Secant through both endpoints
                linear_combination(
                    T::zero(),
                    out,
                    [(T::one() - s, &self.y0), (s, &self.y1)],
                );
            }
            2 => {
                // a + b·s + c·s² with p(0) = y0, p(1) = y1, p'(1) = h·f1
                let two = T::one() + T::one();
                let s2 = s * s;
                let cb = two * s - s2; // weight of (y1 − y0) from b
                linear_combination(
                    T::zero(),
                    out,
                    [
                        (T::one() - cb, &self.y0),
                        (cb, &self.y1),
                        (h * (s2 - s), &self.f1),
                    ],
                );
            }
            _ => {
                let two = T::one() + T::one();
                let three = two + T::one();
                let s2 = s * s;
                let s3 = s2 * s;

                // Hermite basis: h00 = 2s³ - 3s² + 1, h10 = s³ - 2s² + s
                //                h01 = -2s³ + 3s², h11 = s³ - s²
                let h00 = two * s3 - three * s2 + T::one();
                let h10 = s3 - two * s2 + s;
                let h01 = three * s2 - two * s3;
                let h11 = s3 - s2;

                linear_combination(
                    T::zero(),
                    out,
                    [
                        (h00, &self.y0),
                        (h10 * h, &self.f0),
                        (h01, &self.y1),
                        (h11 * h, &self.f1),
                    ],
                );
            }
        }
    }

    /// Evaluate the first derivative of the full-degree interpolant at
    /// `t`, writing the result to `out`.
    pub fn eval_derivative(&self, t: T, out: &mut StateVec<T>) {
        debug_assert!(self.valid, "history evaluated before a step completed");
        let h = self.t1 - self.t0;
        let s = (t - self.t0) / h;

        let two = T::one() + T::one();
        let three = two + T::one();
        let four = two + two;
        let six = three + three;
        let s2 = s * s;

        // d/dt = (1/h) d/ds of the basis
        // h00' = 6s² - 6s, h10' = 3s² - 4s + 1
        // h01' = -6s² + 6s, h11' = 3s² - 2s
        let dh00 = six * s2 - six * s;
        let dh10 = three * s2 - four * s + T::one();
        let dh01 = six * s - six * s2;
        let dh11 = three * s2 - two * s;

        linear_combination(
            T::zero(),
            out,
            [
                (dh00 / h, &self.y0),
                (dh10, &self.f0),
                (dh01 / h, &self.y1),
                (dh11, &self.f1),
            ],
        );
    }
}
