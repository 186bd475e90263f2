//! # multirate
//!
//! Multirate infinitesimal (MRI) ODE time integration, no-std compatible.
//! Splits a system `y' = fs(t, y) + ff(t, y)` into a slow part advanced by
//! an MRI coupling table and a fast part delegated to a pluggable inner
//! integrator, so the expensive slow derivative is evaluated only a few
//! times per outer step while the fast dynamics run at their own
//! resolution.
//!
//! ## Quick start
//!
//! ```
//! use multirate::coupling::mri_gark_erk22a;
//! use multirate::{MriStep, RhsError, Rk4Inner, StateVec};
//!
//! // y' = -0.5 y (slow) + (-5 y) (fast), y(0) = 1
//! let y0 = StateVec::from_slice(&[1.0_f64]);
//! let inner = Rk4Inner::new(0.001, |_t, y: &StateVec<f64>, f: &mut StateVec<f64>| {
//!     f[0] = -5.0 * y[0];
//!     Ok::<(), RhsError>(())
//! });
//! let mut mri = MriStep::new(
//!     |_t, y: &StateVec<f64>, f: &mut StateVec<f64>| {
//!         f[0] = -0.5 * y[0];
//!         Ok::<(), RhsError>(())
//!     },
//!     0.0,
//!     &y0,
//!     mri_gark_erk22a(),
//!     inner,
//! )
//! .unwrap();
//! mri.set_fixed_step(0.01);
//!
//! let mut yout = StateVec::zeros(1);
//! let t = mri.evolve(1.0, &mut yout).unwrap();
//! assert_eq!(t, 1.0);
//! assert!((yout[0] - (-5.5_f64).exp()).abs() < 1e-4);
//! ```
//!
//! ## Modules
//!
//! - [`coupling`] — MRI-GARK coupling tables: the coefficient tensor, stage
//!   classification, structural validation, named third-party tables, and
//!   the MIS construction from a slow Butcher table.
//!
//! - [`inner`] — the fast-timescale boundary: the [`InnerStepper`] trait,
//!   the polynomial [`ForcingBuffer`]/[`ForcingData`] pair that carries the
//!   slow coupling into fast derivative evaluations, and the bundled
//!   fixed-substep [`Rk4Inner`].
//!
//! - [`step`] — the [`MriStep`] integrator: lifecycle (resize, reinit,
//!   reset), stage dispatch, implicit stages via predictor plus modified
//!   Newton, hooks at the slow/fast boundary, dense output, and counters.
//!
//! - [`state`] — [`StateVec`] and the fused vector kernels
//!   ([`linear_combination`], [`wrms_norm`], [`error_weights`]) every stage
//!   update goes through.
//!
//! - [`linalg`] — the dense LU factorization backing the Newton iteration
//!   matrix.
//!
//! - [`traits`] — element trait hierarchy: [`Scalar`] for tableau and
//!   vector elements, [`FloatScalar`] (`Scalar + Float`) for everything
//!   needing `sqrt`, `abs`, and ordered comparisons.
//!
//! ## Cargo features
//!
//! | Feature | Default  | Description |
//! |---------|----------|-------------|
//! | `std`   | yes      | Hardware FPU via system libm |
//! | `libm`  | baseline | Pure-Rust software float fallback for no-std |

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod coupling;
pub mod inner;
pub mod linalg;
pub mod state;
pub mod step;
pub mod traits;

pub use coupling::{CouplingError, MriCoupling, StageKind};
pub use inner::{ForcingBuffer, ForcingData, FullRhsMode, InnerError, InnerStepper, RhsError, Rk4Inner};
pub use state::{error_weights, linear_combination, wrms_norm, StateVec};
pub use step::{MriStep, NewtonSettings, PredictorMethod, StepError, StepHistory};
pub use traits::{FloatScalar, Scalar};
