//! Dense operator-splitting QP solver.
//!
//! Solves
//!
//! ```text
//! minimize    (1/2) x^T P x + q^T x
//! subject to  l <= A x <= u
//! ```
//!
//! with the ADMM splitting used by operator-splitting QP solvers:
//! alternating a regularized KKT solve with a projection onto the
//! constraint interval, plus dual ascent. Rows with `l = u` (equalities)
//! carry a boosted step weight, and the step weight adapts to the
//! primal/dual residual balance with periodic refactorization.
//!
//! Everything is dense; this backend targets the small staged QPs of an
//! SQP iteration, not large sparse programs.

use nalgebra::{Cholesky, DMatrix, DVector};

/// ADMM parameters.
#[derive(Debug, Clone)]
pub struct AdmmSettings {
    /// Initial step weight rho.
    pub rho: f64,

    /// Equality rows (l = u) use `rho * eq_rho_boost`.
    pub eq_rho_boost: f64,

    /// Diagonal regularization sigma added to P in the KKT system.
    pub sigma: f64,

    /// Over-relaxation parameter alpha.
    pub alpha: f64,

    /// Absolute residual tolerance.
    pub eps_abs: f64,

    /// Relative residual tolerance.
    pub eps_rel: f64,

    /// Iteration cap.
    pub max_iter: usize,

    /// Check residuals every this many iterations.
    pub check_interval: usize,

    /// Consider a rho update every this many iterations (0 = never).
    pub rho_update_interval: usize,
}

impl Default for AdmmSettings {
    fn default() -> Self {
        Self {
            rho: 0.1,
            eq_rho_boost: 1e3,
            sigma: 1e-6,
            alpha: 1.6,
            eps_abs: 1e-9,
            eps_rel: 1e-9,
            max_iter: 100_000,
            check_interval: 25,
            rho_update_interval: 200,
        }
    }
}

/// Outcome of an ADMM run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmmStatus {
    /// Residuals met tolerance.
    Solved,

    /// Iteration cap reached before tolerance.
    MaxIterations,

    /// KKT factorization broke down.
    NumericalError,
}

/// Solution and diagnostics.
#[derive(Debug, Clone)]
pub struct AdmmSolution {
    /// Outcome.
    pub status: AdmmStatus,

    /// Primal solution.
    pub x: DVector<f64>,

    /// Constraint-space iterate (projection of Ax).
    pub z: DVector<f64>,

    /// Dual variables.
    pub y: DVector<f64>,

    /// Iterations used.
    pub iterations: usize,
}

fn inf_norm(v: &DVector<f64>) -> f64 {
    v.iter().map(|x| x.abs()).fold(0.0_f64, f64::max)
}

/// Per-row step weights: boosted on equality rows.
fn rho_vec(rho: f64, boost: f64, l: &DVector<f64>, u: &DVector<f64>) -> DVector<f64> {
    DVector::from_iterator(
        l.len(),
        l.iter()
            .zip(u.iter())
            .map(|(&li, &ui)| if li == ui { rho * boost } else { rho }),
    )
}

/// Factor `P + sigma I + A^T diag(rho) A`.
fn factor_kkt(
    p: &DMatrix<f64>,
    a: &DMatrix<f64>,
    rho: &DVector<f64>,
    sigma: f64,
) -> Option<Cholesky<f64, nalgebra::Dyn>> {
    let n = p.nrows();
    let mut kkt = p.clone();
    for i in 0..n {
        kkt[(i, i)] += sigma;
    }
    // A^T diag(rho) A, accumulated row by row.
    for r in 0..a.nrows() {
        let row = a.row(r);
        for i in 0..n {
            let ri = rho[r] * row[i];
            if ri == 0.0 {
                continue;
            }
            for j in 0..n {
                kkt[(i, j)] += ri * row[j];
            }
        }
    }
    Cholesky::new(kkt)
}

/// Solve the QP `min 1/2 x'Px + q'x  s.t.  l <= Ax <= u`.
///
/// `x0` warm-starts the primal iterate; pass zeros when nothing better
/// is known. `P` must be symmetric positive semidefinite.
pub fn solve_qp(
    p: &DMatrix<f64>,
    q: &DVector<f64>,
    a: &DMatrix<f64>,
    l: &DVector<f64>,
    u: &DVector<f64>,
    x0: &DVector<f64>,
    settings: &AdmmSettings,
) -> AdmmSolution {
    let n = p.nrows();
    let m = a.nrows();
    debug_assert_eq!(p.ncols(), n);
    debug_assert_eq!(q.len(), n);
    debug_assert_eq!(a.ncols(), n);
    debug_assert_eq!(l.len(), m);
    debug_assert_eq!(u.len(), m);

    let mut rho_cur = settings.rho;
    let mut rho = rho_vec(rho_cur, settings.eq_rho_boost, l, u);

    let mut chol = match factor_kkt(p, a, &rho, settings.sigma) {
        Some(c) => c,
        None => {
            return AdmmSolution {
                status: AdmmStatus::NumericalError,
                x: x0.clone(),
                z: DVector::zeros(m),
                y: DVector::zeros(m),
                iterations: 0,
            }
        }
    };

    let mut x = x0.clone();
    let mut z = (a * &x).zip_map(l, f64::max).zip_map(u, f64::min);
    let mut y = DVector::zeros(m);

    for iter in 1..=settings.max_iter {
        // KKT solve: (P + sigma I + A' diag(rho) A) xt =
        //            sigma x - q + A' (diag(rho) z - y)
        let rz_minus_y = z.component_mul(&rho) - &y;
        let rhs = settings.sigma * &x - q + a.transpose() * rz_minus_y;
        let xt = chol.solve(&rhs);
        let zt = a * &xt;

        let x_next = settings.alpha * &xt + (1.0 - settings.alpha) * &x;
        let z_relaxed = settings.alpha * &zt + (1.0 - settings.alpha) * &z;
        let v = &z_relaxed + y.component_div(&rho);
        let z_next = v.zip_map(l, f64::max).zip_map(u, f64::min);
        y += (&z_relaxed - &z_next).component_mul(&rho);
        x = x_next;
        z = z_next;

        if iter % settings.check_interval == 0 || iter == settings.max_iter {
            let ax = a * &x;
            let r_prim = inf_norm(&(&ax - &z));
            let px = p * &x;
            let aty = a.transpose() * &y;
            let r_dual = inf_norm(&(&px + q + &aty));

            let eps_prim = settings.eps_abs
                + settings.eps_rel * inf_norm(&ax).max(inf_norm(&z));
            let eps_dual = settings.eps_abs
                + settings.eps_rel
                    * inf_norm(&px).max(inf_norm(q)).max(inf_norm(&aty));

            if r_prim <= eps_prim && r_dual <= eps_dual {
                return AdmmSolution {
                    status: AdmmStatus::Solved,
                    x,
                    z,
                    y,
                    iterations: iter,
                };
            }

            // Rebalance rho when the residuals drift apart.
            if settings.rho_update_interval > 0 && iter % settings.rho_update_interval == 0 {
                let prim_rel = r_prim / eps_prim.max(1e-30);
                let dual_rel = r_dual / eps_dual.max(1e-30);
                let scale = (prim_rel / dual_rel.max(1e-30)).sqrt();
                if scale > 5.0 || scale < 0.2 {
                    rho_cur = (rho_cur * scale).clamp(1e-6, 1e6);
                    rho = rho_vec(rho_cur, settings.eq_rho_boost, l, u);
                    chol = match factor_kkt(p, a, &rho, settings.sigma) {
                        Some(c) => c,
                        None => {
                            return AdmmSolution {
                                status: AdmmStatus::NumericalError,
                                x,
                                z,
                                y,
                                iterations: iter,
                            }
                        }
                    };
                    log::debug!("admm rho -> {:.3e} at iteration {}", rho_cur, iter);
                }
            }
        }
    }

    AdmmSolution {
        status: AdmmStatus::MaxIterations,
        x,
        z,
        y,
        iterations: settings.max_iter,
    }
}
