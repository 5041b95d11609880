//! Control-loop tests for the trust-region SQP driver.
//!
//! These run against a scripted convex backend so each decision branch
//! of the acceptance test can be exercised deterministically, without a
//! real QP solver in the loop.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use sqp_core::{
    AffExpr, Cnt, ConvexObjective, Cost, CvxStatus, Model, OptProb, OptStatus, QuadExpr,
    SqpError, TrustRegionSqp, Var,
};

/// What the scripted backend does on each `optimize` call, in order.
#[derive(Clone)]
enum ScriptStep {
    /// Report failure.
    Fail,

    /// Report success with the given decision-variable values
    /// (auxiliaries read as zero).
    Return(Vec<f64>),
}

/// Convex backend that replays a fixed script of solve outcomes.
struct ScriptedModel {
    names: Vec<String>,
    lower: Vec<f64>,
    upper: Vec<f64>,
    live: Vec<bool>,
    values: Vec<f64>,
    num_cnts: usize,
    script: VecDeque<ScriptStep>,
}

impl ScriptedModel {
    fn new(script: Vec<ScriptStep>) -> Self {
        Self {
            names: Vec::new(),
            lower: Vec::new(),
            upper: Vec::new(),
            live: Vec::new(),
            values: Vec::new(),
            num_cnts: 0,
            script: script.into(),
        }
    }
}

impl Model for ScriptedModel {
    fn add_var(&mut self, name: &str, lb: f64, ub: f64) -> Var {
        self.names.push(name.to_string());
        self.lower.push(lb);
        self.upper.push(ub);
        self.live.push(true);
        self.values.push(0.0);
        Var::from_index(self.names.len() - 1)
    }

    fn add_eq_cnt(&mut self, _expr: AffExpr) -> Cnt {
        self.num_cnts += 1;
        Cnt::from_index(self.num_cnts - 1)
    }

    fn add_ineq_cnt(&mut self, _expr: AffExpr) -> Cnt {
        self.num_cnts += 1;
        Cnt::from_index(self.num_cnts - 1)
    }

    fn remove_vars(&mut self, vars: &[Var]) {
        for v in vars {
            self.live[v.index()] = false;
        }
    }

    fn remove_cnts(&mut self, _cnts: &[Cnt]) {}

    fn vars(&self) -> Vec<Var> {
        (0..self.names.len())
            .filter(|&i| self.live[i])
            .map(Var::from_index)
            .collect()
    }

    fn set_var_bounds(&mut self, vars: &[Var], lower: &[f64], upper: &[f64]) {
        for (i, v) in vars.iter().enumerate() {
            self.lower[v.index()] = lower[i];
            self.upper[v.index()] = upper[i];
        }
    }

    fn set_objective(&mut self, _obj: &QuadExpr) {}

    fn update(&mut self) {}

    fn optimize(&mut self) -> CvxStatus {
        match self.script.pop_front() {
            Some(ScriptStep::Fail) => CvxStatus::Failed,
            Some(ScriptStep::Return(xs)) => {
                for v in &mut self.values {
                    *v = 0.0;
                }
                self.values[..xs.len()].copy_from_slice(&xs);
                CvxStatus::Solved
            }
            None => panic!("scripted backend ran out of steps"),
        }
    }

    fn var_values(&self, vars: &[Var]) -> Vec<f64> {
        vars.iter().map(|v| self.values[v.index()]).collect()
    }
}

/// `(v - target)^2`, convexified to first order only: the model about
/// `x0` is the tangent line, so model fidelity degrades with distance
/// and the acceptance test has something real to reject.
struct LinearizedSquare {
    var: Var,
    target: f64,
}

impl Cost for LinearizedSquare {
    fn name(&self) -> &str {
        "linearized_square"
    }

    fn value(&self, x: &[f64]) -> f64 {
        let d = x[self.var.index()] - self.target;
        d * d
    }

    fn convex(&self, x: &[f64], _model: &mut dyn Model) -> ConvexObjective {
        let x0 = x[self.var.index()];
        let f = (x0 - self.target) * (x0 - self.target);
        let g = 2.0 * (x0 - self.target);
        let mut aff = AffExpr::constant(f - g * x0);
        aff.add_term(g, self.var);
        ConvexObjective::from_quad(QuadExpr::from_affine(aff))
    }
}

/// Plain linear cost `v`; its convex model is itself.
struct LinearCost {
    var: Var,
}

impl Cost for LinearCost {
    fn name(&self) -> &str {
        "linear"
    }

    fn value(&self, x: &[f64]) -> f64 {
        x[self.var.index()]
    }

    fn convex(&self, _x: &[f64], _model: &mut dyn Model) -> ConvexObjective {
        ConvexObjective::from_quad(QuadExpr::from_affine(AffExpr::from_var(self.var)))
    }
}

fn one_var_problem(script: Vec<ScriptStep>, lb: f64, ub: f64) -> (OptProb, Var) {
    let mut prob = OptProb::new(Box::new(ScriptedModel::new(script)));
    let v = prob.add_var("v", lb, ub);
    (prob, v)
}

#[test]
fn test_backend_refusal_fails_within_one_step() {
    // The backend refuses the very first subproblem: the whole solve
    // terminates with OptFailed after exactly one QP call.
    let (mut prob, v) = one_var_problem(vec![ScriptStep::Fail], -10.0, 10.0);
    prob.add_cost(Box::new(LinearizedSquare { var: v, target: 3.0 }));

    let mut solver = TrustRegionSqp::new(prob);
    solver.initialize(&[0.0]).unwrap();
    let status = solver.optimize().unwrap();

    assert_eq!(status, OptStatus::OptFailed);
    assert_eq!(solver.results().status, OptStatus::OptFailed);
    assert_eq!(solver.results().n_qp_solves, 1);
}

#[test]
fn test_feasible_start_at_optimum_converges_without_shrink() {
    // Linear cost with the start already at its box-constrained
    // optimum: the first QP reproduces the iterate, the approximate
    // improvement is zero, and the driver converges immediately with
    // the trust box untouched.
    let (mut prob, v) = one_var_problem(vec![ScriptStep::Return(vec![0.0])], 0.0, 10.0);
    prob.add_cost(Box::new(LinearCost { var: v }));

    let mut solver = TrustRegionSqp::new(prob);
    solver.initialize(&[0.0]).unwrap();
    let status = solver.optimize().unwrap();

    assert_eq!(status, OptStatus::Converged);
    assert_eq!(solver.results().n_qp_solves, 1);
    assert_eq!(solver.results().x, vec![0.0]);
    assert!(solver.results().cnt_viols.is_empty());
    // No rejection happened, so the box still has its initial size.
    assert!((solver.trust_box_size() - 0.1).abs() < 1e-12);
}

#[test]
fn test_rejection_shrinks_once_then_accepts() {
    // Start at 0 with cost (v - 3)^2 modeled to first order.
    // First candidate v = 5: the tangent promises a drop of 30 but the
    // true cost only drops by 5, ratio 1/6 < 0.25 -> reject, shrink.
    // Second candidate v = 0.05: ratio ~0.99 -> accept, expand.
    // Third QP reproduces the iterate -> converge.
    let script = vec![
        ScriptStep::Return(vec![5.0]),
        ScriptStep::Return(vec![0.05]),
        ScriptStep::Return(vec![0.05]),
    ];
    let (mut prob, v) = one_var_problem(script, -10.0, 10.0);
    prob.add_cost(Box::new(LinearizedSquare { var: v, target: 3.0 }));

    let mut solver = TrustRegionSqp::new(prob);
    solver.initialize(&[0.0]).unwrap();
    let status = solver.optimize().unwrap();

    assert_eq!(status, OptStatus::Converged);
    assert_eq!(solver.results().x, vec![0.05]);
    assert_eq!(solver.results().n_qp_solves, 3);
    // One shrink (x0.1) then one expand (x1.5): 0.1 * 0.1 * 1.5.
    assert!((solver.trust_box_size() - 0.015).abs() < 1e-12);
    // Accepted step respected the improvement contract.
    let total: f64 = solver.results().cost_vals.iter().sum();
    assert!((total - (0.05f64 - 3.0).powi(2)).abs() < 1e-12);
}

#[test]
fn test_cached_values_match_reeval_after_solve() {
    let script = vec![
        ScriptStep::Return(vec![5.0]),
        ScriptStep::Return(vec![0.05]),
        ScriptStep::Return(vec![0.05]),
    ];
    let (mut prob, v) = one_var_problem(script, -10.0, 10.0);
    prob.add_cost(Box::new(LinearizedSquare { var: v, target: 3.0 }));

    let mut solver = TrustRegionSqp::new(prob);
    solver.initialize(&[0.0]).unwrap();
    solver.optimize().unwrap();

    let x = solver.results().x.clone();
    let cached = solver.results().cost_vals.clone();
    let fresh: Vec<f64> = solver.prob().costs().iter().map(|c| c.value(&x)).collect();
    assert_eq!(cached.len(), fresh.len());
    for (c, f) in cached.iter().zip(fresh.iter()) {
        assert!((c - f).abs() < 1e-12, "cache {} vs fresh {}", c, f);
    }
    assert!((solver.results().total_cost - cached.iter().sum::<f64>()).abs() < 1e-15);
}

#[test]
fn test_trust_box_bounds_sent_to_backend() {
    // With x0 = 0 in [0, 10] and delta = 0.1 the backend must see
    // bounds [0, 0.1] on the decision variable.
    struct Probe {
        inner: ScriptedModel,
        seen: Rc<RefCell<Vec<(f64, f64)>>>,
    }

    impl Model for Probe {
        fn add_var(&mut self, name: &str, lb: f64, ub: f64) -> Var {
            self.inner.add_var(name, lb, ub)
        }

        fn add_eq_cnt(&mut self, expr: AffExpr) -> Cnt {
            self.inner.add_eq_cnt(expr)
        }

        fn add_ineq_cnt(&mut self, expr: AffExpr) -> Cnt {
            self.inner.add_ineq_cnt(expr)
        }

        fn remove_vars(&mut self, vars: &[Var]) {
            self.inner.remove_vars(vars)
        }

        fn remove_cnts(&mut self, cnts: &[Cnt]) {
            self.inner.remove_cnts(cnts)
        }

        fn vars(&self) -> Vec<Var> {
            self.inner.vars()
        }

        fn set_var_bounds(&mut self, vars: &[Var], lower: &[f64], upper: &[f64]) {
            self.seen.borrow_mut().push((lower[0], upper[0]));
            self.inner.set_var_bounds(vars, lower, upper)
        }

        fn set_objective(&mut self, obj: &QuadExpr) {
            self.inner.set_objective(obj)
        }

        fn update(&mut self) {
            self.inner.update()
        }

        fn optimize(&mut self) -> CvxStatus {
            self.inner.optimize()
        }

        fn var_values(&self, vars: &[Var]) -> Vec<f64> {
            self.inner.var_values(vars)
        }
    }

    let seen = Rc::new(RefCell::new(Vec::new()));
    let probe = Probe {
        inner: ScriptedModel::new(vec![ScriptStep::Return(vec![0.0])]),
        seen: Rc::clone(&seen),
    };
    let mut prob = OptProb::new(Box::new(probe));
    let v = prob.add_var("v", 0.0, 10.0);
    prob.add_cost(Box::new(LinearCost { var: v }));

    let mut solver = TrustRegionSqp::new(prob);
    solver.initialize(&[0.0]).unwrap();
    solver.optimize().unwrap();

    let seen = seen.borrow();
    assert_eq!(seen.len(), 1);
    assert!((seen[0].0 - 0.0).abs() < 1e-12);
    assert!((seen[0].1 - 0.1).abs() < 1e-12);
}

#[test]
fn test_callbacks_run_each_iteration_and_at_cleanup() {
    let (mut prob, v) = one_var_problem(vec![ScriptStep::Return(vec![0.0])], 0.0, 10.0);
    prob.add_cost(Box::new(LinearCost { var: v }));

    let hits = Rc::new(RefCell::new(0usize));
    let hits_cb = Rc::clone(&hits);

    let mut solver = TrustRegionSqp::new(prob);
    solver.add_callback(Box::new(move |_prob, _x| {
        *hits_cb.borrow_mut() += 1;
    }));
    solver.initialize(&[0.0]).unwrap();
    solver.optimize().unwrap();

    // One SQP iteration plus the cleanup call.
    assert_eq!(*hits.borrow(), 2);
}

#[test]
fn test_uninitialized_and_mismatched_inputs_are_errors() {
    let (mut prob, v) = one_var_problem(vec![], -1.0, 1.0);
    prob.add_cost(Box::new(LinearCost { var: v }));
    let mut solver = TrustRegionSqp::new(prob);

    assert!(matches!(solver.optimize(), Err(SqpError::NotInitialized)));
    assert!(matches!(
        solver.initialize(&[0.0, 0.0]),
        Err(SqpError::DimensionMismatch {
            expected: 1,
            got: 2
        })
    ));
}

#[test]
fn test_start_outside_bounds_is_projected() {
    // x0 = 25 clamps to the box [0, 10] before the first iteration;
    // the backend then reproduces the projected point.
    let (mut prob, v) = one_var_problem(vec![ScriptStep::Return(vec![10.0])], 0.0, 10.0);
    prob.add_cost(Box::new(LinearizedSquare { var: v, target: 20.0 }));

    let mut solver = TrustRegionSqp::new(prob);
    solver.initialize(&[25.0]).unwrap();
    let status = solver.optimize().unwrap();

    assert_eq!(status, OptStatus::Converged);
    assert_eq!(solver.results().x, vec![10.0]);
}
