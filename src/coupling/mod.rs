//! MRI coupling tables — the coefficient data defining a multirate method.
//!
//! A coupling table generalizes a Runge-Kutta tableau: `nmat` lower-triangular
//! coefficient matrices `G[k]` express the slow-stage coupling as a polynomial
//! in normalized time, and the abscissae `c` partition each slow step into the
//! sub-intervals handed to the fast integrator. Tables follow the multirate
//! infinitesimal GARK formulation of:
//!
//! > A. Sandu, "A class of multirate infinitesimal GARK methods," *SIAM J.
//! > Numer. Anal.*, vol. 57, pp. 2300–2327, 2019.
//! > <https://doi.org/10.1137/18M1205492>
//!
//! # Named tables
//!
//! | Table               | Stages | Order | Implicit stages |
//! |---------------------|--------|-------|-----------------|
//! | [`mis_kw3`]         |      4 |     3 | no              |
//! | [`mri_gark_erk22a`] |      3 |     2 | no              |
//! | [`mri_gark_irk21a`] |      3 |     2 | yes             |
//!
//! # Example
//!
//! ```
//! use multirate::coupling::mri_gark_erk22a;
//! use multirate::StageKind;
//!
//! let table = mri_gark_erk22a::<f64>();
//! assert!(table.validate(false).is_ok());
//! assert_eq!(table.stages(), 3);
//! assert_eq!(table.classify(1), StageKind::ExplicitFast);
//! ```

mod tables;

#[cfg(test)]
mod tests;

pub use tables::{mis_kw3, mri_gark_erk22a, mri_gark_irk21a};

use alloc::vec;
use alloc::vec::Vec;
use core::fmt::{self, Write as _};

use crate::traits::FloatScalar;

/// Tolerance for table structure checks: 100 × machine epsilon.
#[inline]
pub(crate) fn table_tol<T: FloatScalar>() -> T {
    T::from(100.0).unwrap() * T::epsilon()
}

/// Reasons a coupling table is rejected by [`MriCoupling::validate`].
///
/// All of these are non-recoverable: the caller must supply a different
/// table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CouplingError {
    /// Fewer than one stage.
    TooFewStages,
    /// Method order below one.
    OrderTooLow,
    /// Embedding order below one while an error estimate was requested.
    EmbeddedOrderTooLow,
    /// A coupling matrix has entries above the diagonal.
    NotLowerTriangular,
    /// Some stage is diagonally implicit and spans a fast interval.
    ImplicitFastStage,
    /// Abscissae are not sorted in non-decreasing order.
    UnsortedAbscissae,
    /// Stage 0 must have a zero abscissa and an all-zero coupling row.
    NonzeroFirstStage,
    /// The final abscissa must equal one.
    FinalAbscissaNotOne,
}

impl fmt::Display for CouplingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooFewStages => write!(f, "coupling table needs at least one stage"),
            Self::OrderTooLow => write!(f, "method order must be at least one"),
            Self::EmbeddedOrderTooLow => {
                write!(f, "embedding order must be at least one for error estimation")
            }
            Self::NotLowerTriangular => {
                write!(f, "coupling matrices must be lower triangular")
            }
            Self::ImplicitFastStage => {
                write!(f, "implicit stages spanning a fast interval are unsupported")
            }
            Self::UnsortedAbscissae => write!(f, "abscissae must be sorted in ascending order"),
            Self::NonzeroFirstStage => {
                write!(f, "stage 0 must have zero abscissa and coupling row")
            }
            Self::FinalAbscissaNotOne => write!(f, "final abscissa must equal one"),
        }
    }
}

/// How a single stage of a multirate method is computed.
///
/// Produced by [`MriCoupling::classify`] from the stage's summed diagonal
/// magnitude and its abscissa gap to the previous stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    /// Explicit stage advanced by evolving the fast subsystem over the
    /// abscissa gap with a polynomial forcing term.
    ExplicitFast,
    /// Explicit stage with a zero abscissa gap; reduces to an ordinary
    /// Runge-Kutta-style fused update.
    ExplicitNoFast,
    /// Diagonally-implicit stage with a zero abscissa gap; solved by a
    /// predictor plus Newton correction.
    ImplicitNoFast,
    /// Diagonally-implicit stage that also spans a fast interval.
    /// Unsupported; tables containing one fail validation.
    ImplicitFast,
}

/// Coefficient table of a multirate infinitesimal method.
///
/// Immutable once built. The tensor `G[k][i][j]` holds `nmat` matrices of
/// `stages × stages` coefficients; matrix `k` carries the `θ^k` term of the
/// polynomial-in-time coupling.
#[derive(Debug, Clone, PartialEq)]
pub struct MriCoupling<T> {
    nmat: usize,
    stages: usize,
    q: usize,
    p: usize,
    c: Vec<T>,
    g: Vec<T>,
}

impl<T: FloatScalar> MriCoupling<T> {
    /// Create a table from raw coefficients.
    ///
    /// `c` has one abscissa per stage and `g` holds the coupling tensor
    /// flattened as `[k][i][j]`, row-major within each matrix. Panics if
    /// the slice lengths do not match `nmat` and `stages`; the semantic
    /// checks live in [`validate`](Self::validate).
    pub fn new(nmat: usize, stages: usize, q: usize, p: usize, c: &[T], g: &[T]) -> Self {
        assert_eq!(c.len(), stages, "abscissae length mismatch");
        assert_eq!(
            g.len(),
            nmat * stages * stages,
            "coupling tensor shape mismatch"
        );
        Self {
            nmat,
            stages,
            q,
            p,
            c: c.to_vec(),
            g: g.to_vec(),
        }
    }

    /// Build a single-matrix coupling from a slow explicit-or-DIRK Butcher
    /// table `(A, b, c)` via the MIS construction:
    ///
    /// > M. Schlegel, O. Knoth, M. Arnold, and R. Wolke, "Multirate
    /// > Runge-Kutta schemes for advection equations," *J. Comput. Appl.
    /// > Math.*, vol. 226, no. 2, pp. 345–357, 2009.
    /// > <https://doi.org/10.1016/j.cam.2008.08.009>
    ///
    /// Row `i` of the coupling is `A[i] − A[i−1]`; unless the table is
    /// stiffly accurate (`b` equals the last row of `A`), a padding stage
    /// `b − A[s−1]` at abscissa one is appended so the final stage lands on
    /// the step endpoint. `a` is row-major `s × s` with `s = c.len()`.
    pub fn from_slow_butcher(a: &[T], b: &[T], c: &[T], q: usize, p: usize) -> Self {
        let s = c.len();
        assert!(s >= 1, "butcher table needs at least one stage");
        assert_eq!(a.len(), s * s, "butcher matrix shape mismatch");
        assert_eq!(b.len(), s, "butcher weights length mismatch");

        let tol = table_tol::<T>();
        let mut padding = false;
        for j in 0..s {
            if (b[j] - a[(s - 1) * s + j]).abs() > tol {
                padding = true;
            }
        }

        let stages = if padding { s + 1 } else { s };
        let mut cc = vec![T::zero(); stages];
        cc[..s].copy_from_slice(c);
        if padding {
            cc[s] = T::one();
        }

        let mut g = vec![T::zero(); stages * stages];
        for i in 1..s {
            for j in 0..s {
                g[i * stages + j] = a[i * s + j] - a[(i - 1) * s + j];
            }
        }
        if padding {
            for j in 0..s {
                g[s * stages + j] = b[j] - a[(s - 1) * s + j];
            }
        }

        Self {
            nmat: 1,
            stages,
            q,
            p,
            c: cc,
            g,
        }
    }

    /// Number of coupling matrices.
    #[inline]
    pub fn nmat(&self) -> usize {
        self.nmat
    }

    /// Number of stages.
    #[inline]
    pub fn stages(&self) -> usize {
        self.stages
    }

    /// Method order.
    #[inline]
    pub fn order(&self) -> usize {
        self.q
    }

    /// Embedding order.
    #[inline]
    pub fn embedded_order(&self) -> usize {
        self.p
    }

    /// Abscissa of stage `i`.
    #[inline]
    pub fn abscissa(&self, i: usize) -> T {
        self.c[i]
    }

    /// All abscissae.
    #[inline]
    pub fn abscissae(&self) -> &[T] {
        &self.c
    }

    /// Coupling coefficient `G[k][i][j]`.
    #[inline]
    pub fn coeff(&self, k: usize, i: usize, j: usize) -> T {
        self.g[(k * self.stages + i) * self.stages + j]
    }

    /// Classify stage `i` from its summed diagonal magnitude and abscissa
    /// gap, both judged against 100 × machine epsilon.
    ///
    /// Panics if `i` is zero (stage 0 is the previous solution, never
    /// executed) or out of range.
    pub fn classify(&self, i: usize) -> StageKind {
        assert!(
            i >= 1 && i < self.stages,
            "stage index must be in 1..stages"
        );
        let tol = table_tol::<T>();

        let mut diag = T::zero();
        for k in 0..self.nmat {
            diag = diag + self.coeff(k, i, i).abs();
        }
        let gap = self.c[i] - self.c[i - 1];

        if diag > tol {
            if gap > tol {
                StageKind::ImplicitFast
            } else {
                StageKind::ImplicitNoFast
            }
        } else if gap > tol {
            StageKind::ExplicitFast
        } else {
            StageKind::ExplicitNoFast
        }
    }

    /// Whether any stage requires an implicit solve.
    pub fn is_implicit(&self) -> bool {
        (1..self.stages).any(|i| {
            matches!(
                self.classify(i),
                StageKind::ImplicitNoFast | StageKind::ImplicitFast
            )
        })
    }

    /// Check the table structure, returning the first defect found.
    ///
    /// `adaptive` enables the embedding-order check; pass `false` for
    /// fixed-step use, where no error estimate is ever formed.
    pub fn validate(&self, adaptive: bool) -> Result<(), CouplingError> {
        let tol = table_tol::<T>();

        if self.stages < 1 {
            return Err(CouplingError::TooFewStages);
        }
        if self.q < 1 {
            return Err(CouplingError::OrderTooLow);
        }
        if adaptive && self.p < 1 {
            return Err(CouplingError::EmbeddedOrderTooLow);
        }

        // Triangularity is judged on the summed magnitude of every
        // above-diagonal entry across all coupling matrices.
        let mut upper = T::zero();
        for k in 0..self.nmat {
            for i in 0..self.stages {
                for j in (i + 1)..self.stages {
                    upper = upper + self.coeff(k, i, j).abs();
                }
            }
        }
        if upper > tol {
            return Err(CouplingError::NotLowerTriangular);
        }

        for i in 1..self.stages {
            if self.classify(i) == StageKind::ImplicitFast {
                return Err(CouplingError::ImplicitFastStage);
            }
        }

        for i in 1..self.stages {
            if self.c[i] - self.c[i - 1] < -tol {
                return Err(CouplingError::UnsortedAbscissae);
            }
        }

        let mut row0 = self.c[0].abs();
        for k in 0..self.nmat {
            for j in 0..self.stages {
                row0 = row0 + self.coeff(k, 0, j).abs();
            }
        }
        if row0 > tol {
            return Err(CouplingError::NonzeroFirstStage);
        }

        if (T::one() - self.c[self.stages - 1]).abs() > tol {
            return Err(CouplingError::FinalAbscissaNotOne);
        }

        Ok(())
    }

    /// Effective Runge-Kutta coefficients for stage `i`:
    /// `out[j] = Σ_k G[k][i][j]/(k+1)` for `j ≤ i`, zero beyond.
    ///
    /// Collapses the polynomial coupling into a single row usable by a
    /// plain fused stage update, valid because `∫₀¹ θ^k dθ = 1/(k+1)`.
    pub fn rk_row(&self, i: usize, out: &mut [T]) {
        assert!(i < self.stages, "stage index out of range");
        assert_eq!(out.len(), self.stages, "coefficient row length mismatch");

        for a in out.iter_mut() {
            *a = T::zero();
        }
        for k in 0..self.nmat {
            let kconst = T::one() / T::from(k + 1).unwrap();
            for j in 0..=i {
                out[j] = out[j] + kconst * self.coeff(k, i, j);
            }
        }
    }
}

// ── Display ─────────────────────────────────────────────────────────

impl<T: FloatScalar + fmt::Display> fmt::Display for MriCoupling<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "MRI coupling: {} stages, {} {}, order {} (embedding {})",
            self.stages,
            self.nmat,
            if self.nmat == 1 { "matrix" } else { "matrices" },
            self.q,
            self.p
        )?;
        write!(f, "  c =")?;
        for i in 0..self.stages {
            write!(f, " {}", self.c[i])?;
        }
        writeln!(f)?;

        for k in 0..self.nmat {
            writeln!(f, "  G[{}]:", k)?;

            // Measure column widths
            let mut widths = vec![0usize; self.stages];
            for j in 0..self.stages {
                for i in 0..self.stages {
                    let w = WriteCounting::count(|wc| write!(wc, "{}", self.coeff(k, i, j)));
                    if w > widths[j] {
                        widths[j] = w;
                    }
                }
            }

            for i in 0..self.stages {
                write!(f, "    │")?;
                for j in 0..self.stages {
                    if j > 0 {
                        write!(f, "  ")?;
                    }
                    write!(f, "{:>width$}", self.coeff(k, i, j), width = widths[j])?;
                }
                writeln!(f, "│")?;
            }
        }
        Ok(())
    }
}

struct WriteCounting {
    count: usize,
}

impl WriteCounting {
    fn count(f: impl FnOnce(&mut Self) -> fmt::Result) -> usize {
        let mut wc = WriteCounting { count: 0 };
        let _ = f(&mut wc);
        wc.count
    }
}

impl fmt::Write for WriteCounting {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.count += s.len();
        Ok(())
    }
}
