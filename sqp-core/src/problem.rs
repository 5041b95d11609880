//! Nonlinear problem container and the cost/constraint capabilities.

use crate::error::{SqpError, SqpResult};
use crate::model::{ConvexConstraints, ConvexObjective, Model, Var};

/// A smooth scalar cost term.
///
/// `convex` must agree with `value` at the linearization point in value
/// and first-order behavior; curvature may differ. The returned model
/// is valid only near `x` and lives for a single SQP iteration.
pub trait Cost {
    /// Stable display name.
    fn name(&self) -> &str;

    /// Evaluate the nonlinear cost at `x` (decision variables only).
    fn value(&self, x: &[f64]) -> f64;

    /// Local convex model about `x`. May create auxiliary variables in
    /// the model to express abs/hinge terms.
    fn convex(&self, x: &[f64], model: &mut dyn Model) -> ConvexObjective;
}

/// Whether a constraint's residuals are driven to zero or merely
/// nonpositive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CntKind {
    /// Residuals enforced as `= 0`; violation is `sum |r|`.
    Eq,

    /// Residuals enforced as `<= 0`; violation is `sum max(r, 0)`.
    Ineq,
}

/// A smooth vector-valued constraint.
pub trait Constraint {
    /// Stable display name.
    fn name(&self) -> &str;

    /// Equality or inequality.
    fn kind(&self) -> CntKind;

    /// Signed residuals at `x`.
    fn values(&self, x: &[f64]) -> Vec<f64>;

    /// Local affine model about `x`.
    fn convex(&self, x: &[f64], model: &mut dyn Model) -> ConvexConstraints;

    /// Scalar L1 violation at `x`, derived from the residuals.
    fn violation(&self, x: &[f64]) -> f64 {
        let vals = self.values(x);
        match self.kind() {
            CntKind::Eq => vals.iter().map(|v| v.abs()).sum(),
            CntKind::Ineq => vals.iter().map(|v| v.max(0.0)).sum(),
        }
    }
}

/// The nonlinear program handed to the optimizer: decision variables
/// with box bounds, cost terms, constraints, and the convex model the
/// subproblems are staged in.
///
/// Decision variables must be created through [`OptProb::add_var`] so
/// they occupy the first slots of the model's pool; the driver relies on
/// that layout when it reads candidate iterates back out of a QP solve.
pub struct OptProb {
    model: Box<dyn Model>,
    vars: Vec<Var>,
    lower: Vec<f64>,
    upper: Vec<f64>,
    costs: Vec<Box<dyn Cost>>,
    cnts: Vec<Box<dyn Constraint>>,
}

impl OptProb {
    /// Create an empty problem staged in the given model.
    pub fn new(model: Box<dyn Model>) -> Self {
        Self {
            model,
            vars: Vec::new(),
            lower: Vec::new(),
            upper: Vec::new(),
            costs: Vec::new(),
            cnts: Vec::new(),
        }
    }

    /// Add a decision variable with bounds `[lb, ub]`.
    pub fn add_var(&mut self, name: &str, lb: f64, ub: f64) -> Var {
        let v = self.model.add_var(name, lb, ub);
        self.vars.push(v);
        self.lower.push(lb);
        self.upper.push(ub);
        v
    }

    /// Append a cost term.
    pub fn add_cost(&mut self, cost: Box<dyn Cost>) {
        self.costs.push(cost);
    }

    /// Append a constraint.
    pub fn add_constraint(&mut self, cnt: Box<dyn Constraint>) {
        self.cnts.push(cnt);
    }

    /// Number of decision variables.
    pub fn num_vars(&self) -> usize {
        self.vars.len()
    }

    /// Decision variables in declaration order.
    pub fn vars(&self) -> &[Var] {
        &self.vars
    }

    /// Element-wise lower bounds.
    pub fn lower_bounds(&self) -> &[f64] {
        &self.lower
    }

    /// Element-wise upper bounds.
    pub fn upper_bounds(&self) -> &[f64] {
        &self.upper
    }

    /// Cost terms.
    pub fn costs(&self) -> &[Box<dyn Cost>] {
        &self.costs
    }

    /// Constraints.
    pub fn constraints(&self) -> &[Box<dyn Constraint>] {
        &self.cnts
    }

    /// The staged convex model.
    pub fn model_mut(&mut self) -> &mut dyn Model {
        self.model.as_mut()
    }

    /// Read-only view of the staged convex model.
    pub fn model(&self) -> &dyn Model {
        self.model.as_ref()
    }

    /// Check dimensions and bound ordering.
    pub fn validate(&self) -> SqpResult<()> {
        let n = self.vars.len();
        if self.lower.len() != n || self.upper.len() != n {
            return Err(SqpError::InvalidProblem(format!(
                "bounds have lengths {}/{}, expected {}",
                self.lower.len(),
                self.upper.len(),
                n
            )));
        }
        for i in 0..n {
            if self.lower[i] > self.upper[i] {
                return Err(SqpError::InvalidProblem(format!(
                    "variable {} has lower bound {} > upper bound {}",
                    i, self.lower[i], self.upper[i]
                )));
            }
        }
        if self.costs.is_empty() && self.cnts.is_empty() {
            return Err(SqpError::InvalidProblem(
                "problem has no costs and no constraints".to_string(),
            ));
        }
        Ok(())
    }

    /// Project a point onto the box bounds. Nonlinear constraints are
    /// left to the merit mechanism; only the linear bounds are enforced.
    pub fn closest_feasible_point(&self, x: &[f64]) -> Vec<f64> {
        x.iter()
            .zip(self.lower.iter().zip(self.upper.iter()))
            .map(|(&xi, (&l, &u))| xi.clamp(l, u))
            .collect()
    }

    /// Convexify every cost about `x`, in cost order.
    pub fn convexify_costs(&mut self, x: &[f64]) -> Vec<ConvexObjective> {
        let Self { model, costs, .. } = self;
        costs.iter().map(|c| c.convex(x, &mut **model)).collect()
    }

    /// Convexify every constraint about `x`, in constraint order.
    pub fn convexify_constraints(&mut self, x: &[f64]) -> Vec<ConvexConstraints> {
        let Self { model, cnts, .. } = self;
        cnts.iter().map(|c| c.convex(x, &mut **model)).collect()
    }

    /// Cost names, in cost order.
    pub fn cost_names(&self) -> Vec<String> {
        self.costs.iter().map(|c| c.name().to_string()).collect()
    }

    /// Constraint names, in constraint order.
    pub fn cnt_names(&self) -> Vec<String> {
        self.cnts.iter().map(|c| c.name().to_string()).collect()
    }
}
