use crate::state::{linear_combination, StateVec};
use crate::traits::FloatScalar;

use super::{ForcingData, FullRhsMode, InnerError, InnerStepper, RhsError};

/// Bundled fast integrator: classic 4th-order Runge-Kutta with a fixed
/// substep.
///
/// Advances the fast subsystem `y' = ff(t, y) + p(θ)` where `p` is the
/// forcing polynomial supplied by the outer method. Each [`evolve`]
/// covers one slow sub-interval in substeps of at most `hsub`, clamping
/// the final substep to land exactly on the interval end.
///
/// Suitable when the fast dynamics are non-stiff; stiff fast subsystems
/// want a custom [`InnerStepper`] implementation instead.
///
/// [`evolve`]: InnerStepper::evolve
///
/// # Example
///
/// ```
/// use multirate::{ForcingBuffer, InnerStepper, Rk4Inner, RhsError, StateVec};
///
/// // Fast decay y' = -10 y, no slow coupling
/// let mut inner = Rk4Inner::new(0.001, |_t, y: &StateVec<f64>, f: &mut StateVec<f64>| {
///     f[0] = -10.0 * y[0];
///     Ok::<(), RhsError>(())
/// });
/// let forcing = ForcingBuffer::new(0, 1);
/// let mut y = StateVec::from_slice(&[1.0]);
/// inner.evolve(0.0, 0.5, &mut y, &forcing.data()).unwrap();
/// assert!((y[0] - (-5.0_f64).exp()).abs() < 1e-10);
/// ```
#[derive(Debug, Clone)]
pub struct Rk4Inner<T, F> {
    ff: F,
    hsub: T,
    k1: StateVec<T>,
    k2: StateVec<T>,
    k3: StateVec<T>,
    k4: StateVec<T>,
    ytmp: StateVec<T>,
}

impl<T: FloatScalar, F> Rk4Inner<T, F>
where
    F: FnMut(T, &StateVec<T>, &mut StateVec<T>) -> Result<(), RhsError>,
{
    /// Create a stepper with substep size `hsub` and fast derivative `ff`.
    ///
    /// Stage scratch is sized lazily on the first call, and resized if
    /// the state dimension ever changes.
    pub fn new(hsub: T, ff: F) -> Self {
        Self {
            ff,
            hsub,
            k1: StateVec::zeros(0),
            k2: StateVec::zeros(0),
            k3: StateVec::zeros(0),
            k4: StateVec::zeros(0),
            ytmp: StateVec::zeros(0),
        }
    }

    /// The substep size.
    #[inline]
    pub fn substep(&self) -> T {
        self.hsub
    }

    fn ensure_scratch(&mut self, n: usize) {
        if self.k1.len() != n {
            self.k1 = StateVec::zeros(n);
            self.k2 = StateVec::zeros(n);
            self.k3 = StateVec::zeros(n);
            self.k4 = StateVec::zeros(n);
            self.ytmp = StateVec::zeros(n);
        }
    }
}

fn rhs_to_inner(e: RhsError) -> InnerError {
    match e {
        RhsError::Recoverable => InnerError::Recoverable,
        RhsError::Fatal => InnerError::Fatal,
    }
}

impl<T: FloatScalar, F> InnerStepper<T> for Rk4Inner<T, F>
where
    F: FnMut(T, &StateVec<T>, &mut StateVec<T>) -> Result<(), RhsError>,
{
    fn evolve(
        &mut self,
        t0: T,
        tf: T,
        y: &mut StateVec<T>,
        forcing: &ForcingData<'_, T>,
    ) -> Result<(), InnerError> {
        self.ensure_scratch(y.len());

        let half = T::from(0.5).unwrap();
        let sixth = T::from(1.0 / 6.0).unwrap();
        let third = T::from(1.0 / 3.0).unwrap();

        let mut t = t0;
        let tdir = if tf > t0 { T::one() } else { -T::one() };
        let mut h = self.hsub.abs() * tdir;

        loop {
            // Clamp last substep
            if (tdir > T::zero() && t + h > tf) || (tdir < T::zero() && t + h < tf) {
                h = tf - t;
            }

            (self.ff)(t, y, &mut self.k1).map_err(rhs_to_inner)?;
            forcing.add_forcing(t, &mut self.k1);

            self.ytmp.copy_from(y);
            self.ytmp.axpy(half * h, &self.k1);
            (self.ff)(t + half * h, &self.ytmp, &mut self.k2).map_err(rhs_to_inner)?;
            forcing.add_forcing(t + half * h, &mut self.k2);

            self.ytmp.copy_from(y);
            self.ytmp.axpy(half * h, &self.k2);
            (self.ff)(t + half * h, &self.ytmp, &mut self.k3).map_err(rhs_to_inner)?;
            forcing.add_forcing(t + half * h, &mut self.k3);

            self.ytmp.copy_from(y);
            self.ytmp.axpy(h, &self.k3);
            (self.ff)(t + h, &self.ytmp, &mut self.k4).map_err(rhs_to_inner)?;
            forcing.add_forcing(t + h, &mut self.k4);

            linear_combination(
                T::one(),
                y,
                [
                    (h * sixth, &self.k1),
                    (h * third, &self.k2),
                    (h * third, &self.k3),
                    (h * sixth, &self.k4),
                ],
            );
            t = t + h;

            if (tdir > T::zero() && t >= tf) || (tdir < T::zero() && t <= tf) {
                break;
            }
        }

        Ok(())
    }

    fn full_rhs(
        &mut self,
        t: T,
        y: &StateVec<T>,
        f: &mut StateVec<T>,
        _mode: FullRhsMode,
    ) -> Result<(), RhsError> {
        (self.ff)(t, y, f)
    }
}
