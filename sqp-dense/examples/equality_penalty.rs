//! Equality constraint handled by the L1 penalty mechanism.
//!
//! Solves:
//!   minimize    a^2 + b^2
//!   subject to  a + b = 1
//!               (a, b) in [-5, 5]^2
//!
//! Optimal solution: a = b = 0.5. The constraint enters the subproblems
//! as an abs penalty weighted by mu; a converged-but-infeasible iterate
//! would trigger penalty escalation, though this instance reaches
//! feasibility at the initial weight.

use anyhow::Result;
use sqp_core::{
    AffExpr, CntKind, Constraint, ConvexConstraints, ConvexObjective, Cost, Model, OptProb,
    QuadExpr, SqpSettings, TrustRegionSqp, Var,
};
use sqp_dense::DenseModel;

/// `a^2 + b^2` with its exact quadratic model.
struct SumSquaresCost {
    vars: Vec<Var>,
}

impl Cost for SumSquaresCost {
    fn name(&self) -> &str {
        "sum_squares"
    }

    fn value(&self, x: &[f64]) -> f64 {
        self.vars.iter().map(|v| x[v.index()] * x[v.index()]).sum()
    }

    fn convex(&self, _x: &[f64], _model: &mut dyn Model) -> ConvexObjective {
        let mut quad = QuadExpr::new();
        for v in &self.vars {
            quad.add_quad_term(1.0, *v, *v);
        }
        ConvexObjective::from_quad(quad)
    }
}

/// `a + b - 1 = 0`, already affine.
struct SumToOne {
    vars: Vec<Var>,
}

impl Constraint for SumToOne {
    fn name(&self) -> &str {
        "sum_to_one"
    }

    fn kind(&self) -> CntKind {
        CntKind::Eq
    }

    fn values(&self, x: &[f64]) -> Vec<f64> {
        vec![self.vars.iter().map(|v| x[v.index()]).sum::<f64>() - 1.0]
    }

    fn convex(&self, _x: &[f64], _model: &mut dyn Model) -> ConvexConstraints {
        let mut aff = AffExpr::constant(-1.0);
        for v in &self.vars {
            aff.add_term(1.0, *v);
        }
        let mut cc = ConvexConstraints::new();
        cc.add_eq(aff);
        cc
    }
}

fn main() -> Result<()> {
    let mut prob = OptProb::new(Box::new(DenseModel::new()));
    let a = prob.add_var("a", -5.0, 5.0);
    let b = prob.add_var("b", -5.0, 5.0);
    prob.add_cost(Box::new(SumSquaresCost { vars: vec![a, b] }));
    prob.add_constraint(Box::new(SumToOne { vars: vec![a, b] }));

    let mut solver = TrustRegionSqp::with_settings(prob, SqpSettings::verbose());
    solver.initialize(&[0.0, 0.0])?;
    let status = solver.optimize()?;

    println!("status: {}", status);
    let x = &solver.results().x;
    println!("a = {:.6}, b = {:.6}", x[0], x[1]);
    println!("a + b = {:.6} (target 1.0)", x[0] + x[1]);
    println!("{}", solver.results());
    Ok(())
}
