//! L1 merit accounting.
//!
//! The merit function is `sum(costs) + mu * sum(violations)`. Each
//! trust-box iteration compares three merits: the cached value at the
//! current iterate, the convex model's value at the QP candidate, and
//! the full nonlinear re-evaluation at the candidate. The ratio of
//! exact to model improvement is the step-acceptance signal.

use crate::model::{ConvexConstraints, ConvexObjective};
use crate::problem::{Constraint, Cost};

#[inline]
pub(crate) fn vec_sum(v: &[f64]) -> f64 {
    v.iter().sum()
}

#[inline]
pub(crate) fn vec_max(v: &[f64]) -> f64 {
    v.iter().copied().fold(f64::NEG_INFINITY, f64::max)
}

/// Nonlinear cost values at `x`, one per cost.
pub fn evaluate_costs(costs: &[Box<dyn Cost>], x: &[f64]) -> Vec<f64> {
    costs.iter().map(|c| c.value(x)).collect()
}

/// Nonlinear constraint violations at `x`, one per constraint.
pub fn evaluate_cnt_viols(cnts: &[Box<dyn Constraint>], x: &[f64]) -> Vec<f64> {
    cnts.iter().map(|c| c.violation(x)).collect()
}

/// Convex-model cost values on an extended variable vector.
pub fn evaluate_model_costs(models: &[ConvexObjective], x_ext: &[f64]) -> Vec<f64> {
    models.iter().map(|m| m.value(x_ext)).collect()
}

/// Convex-model constraint violations on an extended variable vector.
pub fn evaluate_model_cnt_viols(models: &[ConvexConstraints], x_ext: &[f64]) -> Vec<f64> {
    models.iter().map(|m| m.violation(x_ext)).collect()
}

/// Merit comparison for one candidate step.
#[derive(Debug, Clone, Copy)]
pub struct MeritReport {
    /// Merit at the current iterate (cached nonlinear values).
    pub old_merit: f64,

    /// Convex-model merit at the candidate.
    pub model_merit: f64,

    /// Nonlinear merit at the candidate.
    pub new_merit: f64,

    /// `old_merit - model_merit`: what the model promised.
    pub approx_improve: f64,

    /// `old_merit - new_merit`: what actually happened.
    pub exact_improve: f64,

    /// `exact_improve / approx_improve`. Meaningless when the model
    /// improvement is near zero; callers must gate on `approx_improve`
    /// before reading it.
    pub ratio: f64,
}

impl MeritReport {
    /// Assemble the report from per-term value vectors and the penalty
    /// weight.
    pub fn compute(
        old_cost_vals: &[f64],
        old_cnt_viols: &[f64],
        model_cost_vals: &[f64],
        model_cnt_viols: &[f64],
        new_cost_vals: &[f64],
        new_cnt_viols: &[f64],
        merit_error_coeff: f64,
    ) -> Self {
        let old_merit = vec_sum(old_cost_vals) + merit_error_coeff * vec_sum(old_cnt_viols);
        let model_merit = vec_sum(model_cost_vals) + merit_error_coeff * vec_sum(model_cnt_viols);
        let new_merit = vec_sum(new_cost_vals) + merit_error_coeff * vec_sum(new_cnt_viols);
        let approx_improve = old_merit - model_merit;
        let exact_improve = old_merit - new_merit;
        Self {
            old_merit,
            model_merit,
            new_merit,
            approx_improve,
            exact_improve,
            ratio: exact_improve / approx_improve,
        }
    }
}

/// Per-term improvement table, for `verbose` runs. Constraint rows are
/// scaled by the penalty weight so all rows are in merit units. The
/// ratio column is dashed when the model improvement is too small to
/// divide by.
#[allow(clippy::too_many_arguments)]
pub fn print_improvement_table(
    old_cost_vals: &[f64],
    model_cost_vals: &[f64],
    new_cost_vals: &[f64],
    old_cnt_viols: &[f64],
    model_cnt_viols: &[f64],
    new_cnt_viols: &[f64],
    cost_names: &[String],
    cnt_names: &[String],
    merit_error_coeff: f64,
) {
    eprintln!(
        "{:>15} | {:>10} | {:>10} | {:>10} | {:>10}",
        "", "oldexact", "dapprox", "dexact", "ratio"
    );
    eprintln!("{:>15} | COSTS", "");
    for i in 0..old_cost_vals.len() {
        print_row(
            &cost_names[i],
            old_cost_vals[i],
            old_cost_vals[i] - model_cost_vals[i],
            old_cost_vals[i] - new_cost_vals[i],
            1.0,
        );
    }
    if cnt_names.is_empty() {
        return;
    }
    eprintln!("{:>15} | CONSTRAINTS", "");
    for i in 0..old_cnt_viols.len() {
        print_row(
            &cnt_names[i],
            old_cnt_viols[i],
            old_cnt_viols[i] - model_cnt_viols[i],
            old_cnt_viols[i] - new_cnt_viols[i],
            merit_error_coeff,
        );
    }
}

fn print_row(name: &str, old: f64, approx: f64, exact: f64, scale: f64) {
    if approx.abs() > 1e-8 {
        eprintln!(
            "{:>15} | {:>10.3e} | {:>10.3e} | {:>10.3e} | {:>10.3e}",
            name,
            scale * old,
            scale * approx,
            scale * exact,
            exact / approx
        );
    } else {
        eprintln!(
            "{:>15} | {:>10.3e} | {:>10.3e} | {:>10.3e} | {:>10}",
            name,
            scale * old,
            scale * approx,
            scale * exact,
            "------"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_helpers() {
        assert_eq!(vec_sum(&[1.0, 2.0, 3.0]), 6.0);
        assert_eq!(vec_max(&[1.0, 5.0, 3.0]), 5.0);
        assert_eq!(vec_sum(&[]), 0.0);
    }

    #[test]
    fn test_merit_report() {
        // old: 10 + 2*1 = 12; model: 4 + 2*0 = 4; new: 6 + 2*0.5 = 7
        let r = MeritReport::compute(
            &[10.0],
            &[1.0],
            &[4.0],
            &[0.0],
            &[6.0],
            &[0.5],
            2.0,
        );
        assert!((r.old_merit - 12.0).abs() < 1e-15);
        assert!((r.model_merit - 4.0).abs() < 1e-15);
        assert!((r.new_merit - 7.0).abs() < 1e-15);
        assert!((r.approx_improve - 8.0).abs() < 1e-15);
        assert!((r.exact_improve - 5.0).abs() < 1e-15);
        assert!((r.ratio - 0.625).abs() < 1e-15);
    }

    #[test]
    fn test_merit_report_unconstrained() {
        let r = MeritReport::compute(&[9.0], &[], &[1.0], &[], &[1.5], &[], 10.0);
        assert!((r.approx_improve - 8.0).abs() < 1e-15);
        assert!((r.exact_improve - 7.5).abs() < 1e-15);
    }
}
