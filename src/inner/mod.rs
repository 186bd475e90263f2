//! Fast-timescale (inner) integrator boundary.
//!
//! The slow MRI stages hand each fast sub-interval to a pluggable inner
//! integrator through the [`InnerStepper`] trait. The integrator owns a
//! [`ForcingBuffer`] of polynomial coefficient vectors; the read-only
//! [`ForcingData`] view of that buffer travels into
//! [`evolve`](InnerStepper::evolve) so the fast derivative routine can add
//! the slow-scale coupling via [`ForcingData::add_forcing`] without knowing
//! anything about the outer method.
//!
//! [`Rk4Inner`] is a bundled fixed-substep implementation of the contract,
//! suitable for non-stiff fast subsystems and used throughout the tests.

mod forcing;
mod rk4;

#[cfg(test)]
mod tests;

pub use forcing::{ForcingBuffer, ForcingData};
pub use rk4::Rk4Inner;

use core::fmt;

use crate::state::StateVec;
use crate::traits::FloatScalar;

/// Outcome of a user derivative evaluation or stage hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RhsError {
    /// The evaluation failed but could succeed at a smaller step size.
    Recoverable,
    /// The evaluation failed unrecoverably.
    Fatal,
}

impl fmt::Display for RhsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Recoverable => write!(f, "recoverable right-hand side failure"),
            Self::Fatal => write!(f, "unrecoverable right-hand side failure"),
        }
    }
}

/// Outcome of an inner-stepper operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InnerError {
    /// The fast integrator failed but a smaller slow step might succeed.
    Recoverable,
    /// The fast integrator failed unrecoverably.
    Fatal,
}

impl fmt::Display for InnerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Recoverable => write!(f, "recoverable inner stepper failure"),
            Self::Fatal => write!(f, "unrecoverable inner stepper failure"),
        }
    }
}

/// Context of a full right-hand side evaluation.
///
/// Lets a stateful inner integrator reuse an already-computed derivative:
/// `Start` is the beginning of an integration, `End` follows a completed
/// step, and `Other` forces a fresh evaluation (dense output between
/// steps).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FullRhsMode {
    /// Beginning of an integration.
    Start,
    /// End of a just-completed step.
    End,
    /// Any other evaluation point; do not reuse cached data.
    Other,
}

/// Capability contract for a fast-timescale integrator.
///
/// Two operations are required; `reset` has a default body so that
/// steppers whose state is fully determined by `(t, y)` need not
/// implement it.
///
/// During [`evolve`](Self::evolve) the implementation must add the slow
/// coupling to every derivative evaluation by calling
/// [`ForcingData::add_forcing`] at the evaluation time. The
/// [`full_rhs`](Self::full_rhs) operation evaluates only the raw fast
/// derivative, with no forcing.
pub trait InnerStepper<T: FloatScalar> {
    /// Advance `y` from `t0` to `tf` under the fast dynamics plus the
    /// polynomial forcing in `forcing`.
    fn evolve(
        &mut self,
        t0: T,
        tf: T,
        y: &mut StateVec<T>,
        forcing: &ForcingData<'_, T>,
    ) -> Result<(), InnerError>;

    /// Evaluate the fast derivative `f ← ff(t, y)`.
    fn full_rhs(
        &mut self,
        t: T,
        y: &StateVec<T>,
        f: &mut StateVec<T>,
        mode: FullRhsMode,
    ) -> Result<(), RhsError>;

    /// Move the stepper to the state `(t, y)`.
    ///
    /// Called after any slow stage that modified the solution outside a
    /// fast evolution. The default assumes the stepper carries no state
    /// beyond what `evolve` receives.
    fn reset(&mut self, _t: T, _y: &StateVec<T>) -> Result<(), InnerError> {
        Ok(())
    }
}
