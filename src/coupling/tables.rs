//! Named coupling tables.
//!
//! Coefficients are stored as `f64` compile-time constants and cast via
//! `T::from(coeff).unwrap()` at construction.

use alloc::vec::Vec;

use crate::traits::FloatScalar;

use super::MriCoupling;

fn cast<T: FloatScalar>(xs: &[f64]) -> Vec<T> {
    xs.iter().map(|&x| T::from(x).unwrap()).collect()
}

/// Explicit third-order multirate infinitesimal step method of Knoth and
/// Wolke (4 stages after padding, all fast).
///
/// Built from the 3-stage slow Butcher table of:
///
/// > O. Knoth and R. Wolke, "Implicit-explicit Runge-Kutta methods for
/// > computing atmospheric reactive flows," *Appl. Numer. Math.*, vol. 28,
/// > pp. 327–341, 1998.
pub fn mis_kw3<T: FloatScalar>() -> MriCoupling<T> {
    const A: [f64; 9] = [
        0.0, 0.0, 0.0, //
        1.0 / 3.0, 0.0, 0.0, //
        -3.0 / 16.0, 15.0 / 16.0, 0.0,
    ];
    const B: [f64; 3] = [1.0 / 6.0, 3.0 / 10.0, 8.0 / 15.0];
    const C: [f64; 3] = [0.0, 1.0 / 3.0, 3.0 / 4.0];

    MriCoupling::from_slow_butcher(&cast::<T>(&A), &cast::<T>(&B), &cast::<T>(&C), 3, 0)
}

/// Explicit second-order MRI-GARK method ERK22a (Sandu 2019).
///
/// Both interior stages evolve the fast subsystem over half the step.
pub fn mri_gark_erk22a<T: FloatScalar>() -> MriCoupling<T> {
    const C: [f64; 3] = [0.0, 0.5, 1.0];
    const G0: [f64; 9] = [
        0.0, 0.0, 0.0, //
        0.5, 0.0, 0.0, //
        -0.5, 1.0, 0.0,
    ];

    MriCoupling::new(1, 3, 2, 0, &cast::<T>(&C), &cast::<T>(&G0))
}

/// Solve-decoupled implicit second-order MRI-GARK method IRK21a (Sandu
/// 2019).
///
/// Stage 1 evolves the fast subsystem across the whole step; stage 2 is a
/// diagonally-implicit correction at the step endpoint (zero abscissa gap),
/// so the implicit solve never overlaps a fast evolution.
pub fn mri_gark_irk21a<T: FloatScalar>() -> MriCoupling<T> {
    const C: [f64; 3] = [0.0, 1.0, 1.0];
    const G0: [f64; 9] = [
        0.0, 0.0, 0.0, //
        1.0, 0.0, 0.0, //
        -0.5, 0.0, 0.5,
    ];

    MriCoupling::new(1, 3, 2, 0, &cast::<T>(&C), &cast::<T>(&G0))
}
