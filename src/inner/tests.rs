use super::*;
use crate::coupling::MriCoupling;
use crate::state::StateVec;

fn decay(rate: f64) -> impl FnMut(f64, &StateVec<f64>, &mut StateVec<f64>) -> Result<(), RhsError> {
    move |_t, y, f| {
        for i in 0..y.len() {
            f[i] = -rate * y[i];
        }
        Ok(())
    }
}

// ── Forcing construction ────────────────────────────────────────────

#[test]
fn forcing_matches_manual_combination() {
    // Single-matrix explicit table: forcing[0] = (1/cdiff)·Σ G[0][i][j]·F[j]
    let c = [0.0, 0.4, 1.0];
    let g = [
        0.0, 0.0, 0.0, //
        0.4, 0.0, 0.0, //
        -0.1, 0.7, 0.0,
    ];
    let table = MriCoupling::<f64>::new(1, 3, 2, 0, &c, &g);
    let f = [
        StateVec::from_slice(&[1.0, -2.0]),
        StateVec::from_slice(&[3.0, 0.5]),
    ];

    let mut buf = ForcingBuffer::new(1, 2);
    let cdiff = 0.6;
    buf.compute(&table, 2, cdiff, &f);

    let v = &buf.vectors()[0];
    for i in 0..2 {
        let expect = (-0.1 * f[0][i] + 0.7 * f[1][i]) / cdiff;
        assert!(
            (v[i] - expect).abs() < 1e-14,
            "component {i}: {} vs {expect}",
            v[i]
        );
    }
}

#[test]
fn forcing_two_matrices() {
    let c = [0.0, 1.0];
    let g = [
        0.0, 0.0, //
        0.5, 0.0, // G0
        0.0, 0.0, //
        -1.0, 0.0, // G1
    ];
    let table = MriCoupling::<f64>::new(2, 2, 1, 0, &c, &g);
    let f = [StateVec::from_slice(&[2.0])];

    let mut buf = ForcingBuffer::new(2, 1);
    buf.compute(&table, 1, 1.0, &f);

    assert!((buf.vectors()[0][0] - 1.0).abs() < 1e-15);
    assert!((buf.vectors()[1][0] - (-2.0)).abs() < 1e-15);
}

#[test]
fn add_forcing_at_shift_adds_constant_term_only() {
    // At t = tshift every power θ^m, m ≥ 1, vanishes
    let mut buf = ForcingBuffer::new(3, 2);
    buf.set_normalization(1.5, 0.25);
    fill_forcing(&mut buf, &[[1.0, 2.0], [10.0, 20.0], [100.0, 200.0]]);

    let mut f = StateVec::from_slice(&[5.0, 7.0]);
    buf.data().add_forcing(1.5, &mut f);
    assert_eq!(f.as_slice(), &[6.0, 9.0]);
}

#[test]
fn add_forcing_at_end_adds_coefficient_sum() {
    // At t = tshift + tscale, θ = 1, so every coefficient contributes fully
    let mut buf = ForcingBuffer::new(3, 2);
    buf.set_normalization(1.5, 0.25);
    fill_forcing(&mut buf, &[[1.0, 2.0], [10.0, 20.0], [100.0, 200.0]]);

    let mut f = StateVec::from_slice(&[5.0, 7.0]);
    buf.data().add_forcing(1.75, &mut f);
    assert_eq!(f.as_slice(), &[116.0, 229.0]);
}

#[test]
fn add_forcing_midpoint_polynomial_value() {
    // θ = 0.5: f + c0 + 0.5 c1 + 0.25 c2
    let mut buf = ForcingBuffer::new(3, 1);
    buf.set_normalization(0.0, 1.0);
    fill_forcing(&mut buf, &[[8.0], [4.0], [16.0]]);

    let mut f = StateVec::from_slice(&[1.0]);
    buf.data().add_forcing(0.5, &mut f);
    assert!((f[0] - 15.0).abs() < 1e-14);
}

#[test]
fn resize_reallocates_vectors() {
    let mut buf: ForcingBuffer<f64> = ForcingBuffer::new(2, 3);
    assert_eq!(buf.dim(), 3);
    buf.resize(5);
    assert_eq!(buf.dim(), 5);
    assert_eq!(buf.nmat(), 2);
    for v in buf.vectors() {
        assert_eq!(v.len(), 5);
    }
}

/// Overwrite the forcing vectors with literal values.
fn fill_forcing<const N: usize>(buf: &mut ForcingBuffer<f64>, values: &[[f64; N]]) {
    assert_eq!(values.len(), buf.nmat());
    for (k, row) in values.iter().enumerate() {
        buf.vectors_mut()[k] = StateVec::from_slice(row);
    }
}

// ── Bundled RK4 inner stepper ───────────────────────────────────────

#[test]
fn rk4_inner_decay_accuracy() {
    let mut inner = Rk4Inner::new(0.01, decay(1.0));
    let forcing: ForcingBuffer<f64> = ForcingBuffer::new(0, 1);
    let mut y = StateVec::from_slice(&[1.0]);
    inner.evolve(0.0, 1.0, &mut y, &forcing.data()).unwrap();
    assert!((y[0] - (-1.0_f64).exp()).abs() < 1e-9);
}

#[test]
fn rk4_inner_harmonic_oscillator() {
    let mut inner = Rk4Inner::new(0.001, |_t, y: &StateVec<f64>, f: &mut StateVec<f64>| {
        f[0] = y[1];
        f[1] = -y[0];
        Ok(())
    });
    let forcing: ForcingBuffer<f64> = ForcingBuffer::new(0, 2);
    let mut y = StateVec::from_slice(&[1.0, 0.0]);
    let tau = core::f64::consts::TAU;
    inner.evolve(0.0, tau, &mut y, &forcing.data()).unwrap();
    assert!((y[0] - 1.0).abs() < 1e-8);
    assert!(y[1].abs() < 1e-8);
}

#[test]
fn rk4_inner_integrates_constant_forcing_exactly() {
    // Zero fast dynamics, constant forcing c: y(tf) = y0 + c·(tf − t0)
    let mut inner = Rk4Inner::new(0.1, |_t, _y: &StateVec<f64>, f: &mut StateVec<f64>| {
        f.fill(0.0);
        Ok(())
    });
    let mut buf = ForcingBuffer::new(1, 1);
    fill_forcing(&mut buf, &[[3.0]]);
    buf.set_normalization(0.0, 0.5);

    let mut y = StateVec::from_slice(&[2.0]);
    inner.evolve(0.0, 0.5, &mut y, &buf.data()).unwrap();
    assert!((y[0] - 3.5).abs() < 1e-13);
}

#[test]
fn rk4_inner_integrates_linear_forcing_exactly() {
    // Forcing c0 + c1·θ over θ ∈ [0, 1]: ∫ = (c0 + c1/2)·tscale, and RK4
    // integrates polynomials of degree ≤ 3 without error
    let mut inner = Rk4Inner::new(0.25, |_t, _y: &StateVec<f64>, f: &mut StateVec<f64>| {
        f.fill(0.0);
        Ok(())
    });
    let mut buf = ForcingBuffer::new(2, 1);
    fill_forcing(&mut buf, &[[2.0], [4.0]]);
    buf.set_normalization(1.0, 1.0);

    let mut y = StateVec::from_slice(&[0.0]);
    inner.evolve(1.0, 2.0, &mut y, &buf.data()).unwrap();
    assert!((y[0] - 4.0).abs() < 1e-13);
}

#[test]
fn rk4_inner_clamps_final_substep() {
    // Substep larger than the interval must not overshoot
    let mut inner = Rk4Inner::new(10.0, decay(1.0));
    let forcing: ForcingBuffer<f64> = ForcingBuffer::new(0, 1);
    let mut y = StateVec::from_slice(&[1.0]);
    inner.evolve(0.0, 0.001, &mut y, &forcing.data()).unwrap();
    // Single RK4 step of h = 0.001
    assert!((y[0] - (-0.001_f64).exp()).abs() < 1e-14);
}

#[test]
fn rk4_inner_backward_evolution() {
    let mut inner = Rk4Inner::new(0.01, decay(1.0));
    let forcing: ForcingBuffer<f64> = ForcingBuffer::new(0, 1);
    let mut y = StateVec::from_slice(&[1.0]);
    inner.evolve(1.0, 0.0, &mut y, &forcing.data()).unwrap();
    assert!((y[0] - 1.0_f64.exp()).abs() < 1e-8);
}

#[test]
fn rk4_inner_propagates_fatal_rhs() {
    let mut inner = Rk4Inner::new(0.1, |_t, _y: &StateVec<f64>, _f: &mut StateVec<f64>| {
        Err(RhsError::Fatal)
    });
    let forcing: ForcingBuffer<f64> = ForcingBuffer::new(0, 1);
    let mut y = StateVec::from_slice(&[1.0]);
    assert_eq!(
        inner.evolve(0.0, 1.0, &mut y, &forcing.data()),
        Err(InnerError::Fatal)
    );
}

#[test]
fn rk4_inner_full_rhs_excludes_forcing() {
    let mut inner = Rk4Inner::new(0.1, decay(2.0));
    let y = StateVec::from_slice(&[3.0]);
    let mut f = StateVec::zeros(1);
    inner.full_rhs(0.0, &y, &mut f, FullRhsMode::Other).unwrap();
    assert!((f[0] - (-6.0)).abs() < 1e-15);
}

#[test]
fn default_reset_is_a_no_op() {
    let mut inner = Rk4Inner::new(0.1, decay(1.0));
    let y = StateVec::from_slice(&[1.0]);
    assert_eq!(inner.reset(0.0, &y), Ok(()));
}
