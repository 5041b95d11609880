//! Folding constraint models into the objective.
//!
//! The L1 exact-penalty reduction: each convexified constraint becomes a
//! convex objective that charges `err_coeff` per unit of violation —
//! absolute value for equality rows, positive part for inequality rows.
//! Both are expressed with nonnegative auxiliary variables and affine
//! rows so a plain QP backend can minimize them.

use crate::model::{ConvexConstraints, ConvexObjective, Model};

/// Convert convexified constraints into penalized convex objectives.
///
/// Output is parallel to the input: one objective per constraint model,
/// each owning the auxiliary variables it created. At an optimum of the
/// penalized subproblem, objective `i` evaluates to `err_coeff` times
/// the model violation of constraint `i`.
pub fn cnts_to_costs(
    cnt_models: &[ConvexConstraints],
    err_coeff: f64,
    model: &mut dyn Model,
) -> Vec<ConvexObjective> {
    let mut out = Vec::with_capacity(cnt_models.len());
    for cnt in cnt_models {
        let mut obj = ConvexObjective::new();
        for aff in &cnt.eqs {
            obj.add_abs(model, aff.clone(), err_coeff);
        }
        for aff in &cnt.ineqs {
            obj.add_hinge(model, aff.clone(), err_coeff);
        }
        out.push(obj);
    }
    out
}
