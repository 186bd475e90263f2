use super::*;

fn table1(c: &[f64], g: &[f64], q: usize) -> MriCoupling<f64> {
    MriCoupling::new(1, c.len(), q, 0, c, g)
}

// ── Named tables ────────────────────────────────────────────────────

#[test]
fn mis_kw3_structure() {
    let t = mis_kw3::<f64>();
    assert_eq!(t.stages(), 4);
    assert_eq!(t.nmat(), 1);
    assert_eq!(t.order(), 3);
    assert!(t.validate(false).is_ok());
    for i in 1..4 {
        assert_eq!(t.classify(i), StageKind::ExplicitFast, "stage {i}");
    }
    assert!(!t.is_implicit());

    let c = t.abscissae();
    assert!((c[1] - 1.0 / 3.0).abs() < 1e-15);
    assert!((c[2] - 0.75).abs() < 1e-15);
    assert_eq!(c[3], 1.0);
}

#[test]
fn erk22a_all_stages_fast() {
    let t = mri_gark_erk22a::<f64>();
    assert!(t.validate(false).is_ok());
    assert_eq!(t.classify(1), StageKind::ExplicitFast);
    assert_eq!(t.classify(2), StageKind::ExplicitFast);
    assert!(!t.is_implicit());
}

#[test]
fn irk21a_has_implicit_final_stage() {
    let t = mri_gark_irk21a::<f64>();
    assert!(t.validate(false).is_ok());
    assert_eq!(t.classify(1), StageKind::ExplicitFast);
    assert_eq!(t.classify(2), StageKind::ImplicitNoFast);
    assert!(t.is_implicit());
}

#[test]
fn named_tables_validate_f32() {
    assert!(mis_kw3::<f32>().validate(false).is_ok());
    assert!(mri_gark_erk22a::<f32>().validate(false).is_ok());
    assert!(mri_gark_irk21a::<f32>().validate(false).is_ok());
}

#[test]
fn coupling_rows_sum_to_abscissa_gaps() {
    let t = mis_kw3::<f64>();
    let c = t.abscissae().to_vec();
    let mut row = vec![0.0; t.stages()];
    for i in 1..t.stages() {
        t.rk_row(i, &mut row);
        let sum: f64 = row.iter().sum();
        assert!(
            (sum - (c[i] - c[i - 1])).abs() < 1e-14,
            "row {i} sums to {sum}, gap is {}",
            c[i] - c[i - 1]
        );
    }
}

#[test]
fn named_tables_effective_weights_sum_to_one() {
    for (name, t) in [
        ("mis_kw3", mis_kw3::<f64>()),
        ("mri_gark_erk22a", mri_gark_erk22a::<f64>()),
        ("mri_gark_irk21a", mri_gark_irk21a::<f64>()),
    ] {
        let mut row = vec![0.0; t.stages()];
        let mut total = 0.0;
        for i in 1..t.stages() {
            t.rk_row(i, &mut row);
            total += row.iter().sum::<f64>();
        }
        assert!(
            (total - 1.0).abs() < 100.0 * f64::EPSILON,
            "{name}: effective weights sum to {total}"
        );
    }
}

// ── Stage classification ────────────────────────────────────────────

#[test]
fn classify_implicit_no_fast() {
    // diag = 0.7 above tolerance, abscissa gap exactly zero
    let t = table1(&[0.0, 1.0, 1.0], &[0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.7], 2);
    assert_eq!(t.classify(2), StageKind::ImplicitNoFast);
}

#[test]
fn classify_explicit_fast() {
    // zero diagonal, abscissa gap 0.3
    let t = table1(&[0.0, 0.3, 1.0], &[0.0; 9], 1);
    assert_eq!(t.classify(1), StageKind::ExplicitFast);
}

#[test]
fn classify_explicit_no_fast() {
    let t = table1(&[0.0, 0.0, 1.0], &[0.0; 9], 1);
    assert_eq!(t.classify(1), StageKind::ExplicitNoFast);
}

#[test]
fn classify_implicit_fast() {
    // nonzero diagonal and a nonzero gap together
    let t = table1(&[0.0, 0.5, 1.0], &[0.0, 0.0, 0.0, 0.25, 0.25, 0.0, 0.0, 0.0, 0.0], 1);
    assert_eq!(t.classify(1), StageKind::ImplicitFast);
}

#[test]
#[should_panic(expected = "stage index")]
fn classify_rejects_stage_zero() {
    mis_kw3::<f64>().classify(0);
}

#[test]
#[should_panic(expected = "stage index")]
fn classify_rejects_out_of_range() {
    let t = mis_kw3::<f64>();
    t.classify(t.stages());
}

// ── Validation rejections ───────────────────────────────────────────

#[test]
fn reject_zero_stages() {
    let t = MriCoupling::<f64>::new(1, 0, 3, 0, &[], &[]);
    assert_eq!(t.validate(false), Err(CouplingError::TooFewStages));
}

#[test]
fn reject_order_below_one() {
    let t = table1(&[0.0, 0.5, 1.0], &[0.0; 9], 0);
    assert_eq!(t.validate(false), Err(CouplingError::OrderTooLow));
}

#[test]
fn embedding_order_checked_only_for_error_estimation() {
    let t = mri_gark_erk22a::<f64>();
    assert_eq!(t.embedded_order(), 0);
    assert!(t.validate(false).is_ok());
    assert_eq!(t.validate(true), Err(CouplingError::EmbeddedOrderTooLow));
}

#[test]
fn reject_upper_triangular_entry() {
    let mut g = [0.0; 9];
    g[1] = 1e-3; // G[0][0][1], above the diagonal
    let t = table1(&[0.0, 0.5, 1.0], &g, 2);
    assert_eq!(t.validate(false), Err(CouplingError::NotLowerTriangular));
}

#[test]
fn reject_implicit_fast_stage() {
    let t = table1(&[0.0, 0.5, 1.0], &[0.0, 0.0, 0.0, 0.25, 0.25, 0.0, 0.0, 0.0, 0.0], 2);
    assert_eq!(t.validate(false), Err(CouplingError::ImplicitFastStage));
}

#[test]
fn reject_unsorted_abscissae() {
    let t = table1(&[0.0, 0.6, 0.4, 1.0], &[0.0; 16], 2);
    assert_eq!(t.validate(false), Err(CouplingError::UnsortedAbscissae));
}

#[test]
fn reject_nonzero_stage_zero_row() {
    let t = table1(&[0.0, 0.5, 1.0], &[0.1, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0], 2);
    assert_eq!(t.validate(false), Err(CouplingError::NonzeroFirstStage));
}

#[test]
fn reject_final_abscissa_not_one() {
    let t = table1(&[0.0, 0.5, 0.9], &[0.0; 9], 2);
    assert_eq!(t.validate(false), Err(CouplingError::FinalAbscissaNotOne));
}

// ── MIS construction ────────────────────────────────────────────────

#[test]
fn mis_construction_pads_non_stiffly_accurate_table() {
    // Knoth-Wolke slow table is not stiffly accurate, so a fourth stage
    // carrying b - A[2] at abscissa one is appended.
    let t = mis_kw3::<f64>();
    assert_eq!(t.stages(), 4);
    assert!((t.coeff(0, 1, 0) - 1.0 / 3.0).abs() < 1e-15);
    assert!((t.coeff(0, 2, 0) - (-25.0 / 48.0)).abs() < 1e-15);
    assert!((t.coeff(0, 2, 1) - 15.0 / 16.0).abs() < 1e-15);
    assert!((t.coeff(0, 3, 0) - 17.0 / 48.0).abs() < 1e-15);
    assert!((t.coeff(0, 3, 1) - (-51.0 / 80.0)).abs() < 1e-15);
    assert!((t.coeff(0, 3, 2) - 8.0 / 15.0).abs() < 1e-15);
}

#[test]
fn mis_construction_skips_padding_when_stiffly_accurate() {
    // Trapezoidal table: b equals the last row of A
    let a = [0.0, 0.0, 0.5, 0.5];
    let b = [0.5, 0.5];
    let c = [0.0, 1.0];
    let t = MriCoupling::<f64>::from_slow_butcher(&a, &b, &c, 2, 0);
    assert_eq!(t.stages(), 2);
    assert_eq!(t.abscissa(1), 1.0);
    assert!((t.coeff(0, 1, 0) - 0.5).abs() < 1e-15);
    assert!((t.coeff(0, 1, 1) - 0.5).abs() < 1e-15);
}

// ── Effective coefficients ──────────────────────────────────────────

#[test]
fn rk_row_single_matrix_is_the_coupling_row() {
    let t = mri_gark_erk22a::<f64>();
    let mut row = [0.0; 3];
    t.rk_row(2, &mut row);
    assert!((row[0] - (-0.5)).abs() < 1e-15);
    assert!((row[1] - 1.0).abs() < 1e-15);
    assert_eq!(row[2], 0.0);
}

#[test]
fn rk_row_scales_higher_matrices() {
    // Two coupling matrices: A[j] = G0[i][j] + G1[i][j]/2
    let g = [
        0.0, 0.0, 0.2, 0.0, // G0
        0.0, 0.0, 0.4, 0.0, // G1
    ];
    let t = MriCoupling::<f64>::new(2, 2, 1, 0, &[0.0, 1.0], &g);
    let mut row = [0.0; 2];
    t.rk_row(1, &mut row);
    assert!((row[0] - 0.4).abs() < 1e-15);
    assert_eq!(row[1], 0.0);
}

// ── Display ─────────────────────────────────────────────────────────

#[test]
fn display_renders_header_and_matrices() {
    let text = format!("{}", mis_kw3::<f64>());
    assert!(text.contains("4 stages"), "got: {text}");
    assert!(text.contains("G[0]:"), "got: {text}");
}
