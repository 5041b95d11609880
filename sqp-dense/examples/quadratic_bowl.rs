//! Minimal unconstrained solve.
//!
//! Minimizes (v - 3)^2 over v in [-10, 10], starting from v = 0.
//! The trust box expands along the accepted steps until the QP can jump
//! straight to the bottom of the bowl.

use anyhow::Result;
use sqp_core::{AffExpr, ConvexObjective, Cost, Model, OptProb, QuadExpr, TrustRegionSqp, Var};
use sqp_dense::DenseModel;

/// `(v - target)^2` with its exact quadratic model.
struct SquareDistCost {
    var: Var,
    target: f64,
}

impl Cost for SquareDistCost {
    fn name(&self) -> &str {
        "square_dist"
    }

    fn value(&self, x: &[f64]) -> f64 {
        let d = x[self.var.index()] - self.target;
        d * d
    }

    fn convex(&self, _x: &[f64], _model: &mut dyn Model) -> ConvexObjective {
        let mut aff = AffExpr::constant(-self.target);
        aff.add_term(1.0, self.var);
        ConvexObjective::from_quad(QuadExpr::square_of(&aff))
    }
}

fn main() -> Result<()> {
    let mut prob = OptProb::new(Box::new(DenseModel::new()));
    let v = prob.add_var("v", -10.0, 10.0);
    prob.add_cost(Box::new(SquareDistCost { var: v, target: 3.0 }));

    let mut solver = TrustRegionSqp::new(prob);
    solver.initialize(&[0.0])?;
    let status = solver.optimize()?;

    println!("status: {}", status);
    println!("v = {:.6}", solver.results().x[0]);
    println!("total cost = {:.6}", solver.results().total_cost);
    println!(
        "func evals: {}, qp solves: {}",
        solver.results().n_func_evals,
        solver.results().n_qp_solves
    );
    Ok(())
}
