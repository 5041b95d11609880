//! The trust-region SQP driver.
//!
//! Two nested loops: the outer loop escalates the constraint penalty
//! weight until a converged iterate is feasible, the inner loop runs SQP
//! iterations. Each SQP iteration convexifies the problem about the
//! current iterate, folds constraint models into the objective as L1
//! penalties, and runs a trust-box loop that shrinks the box until a
//! step is accepted, the model improvement goes below threshold, or the
//! box underflows.

use std::time::Instant;

use log::{debug, info, warn};

use crate::error::{SqpError, SqpResult};
use crate::expr::QuadExpr;
use crate::model::{scatter_values, ConvexConstraints, ConvexObjective, CvxStatus};
use crate::penalty::cnts_to_costs;
use crate::problem::OptProb;
use crate::settings::SqpSettings;

use super::merit::{self, MeritReport};
use super::{Callback, OptResults, OptStatus};

/// What a single trust-box sweep decided.
enum StepOutcome {
    /// Step accepted, trust box expanded; run another SQP iteration.
    Accepted,

    /// Model improvement below threshold; candidate kept, locally done.
    Converged,

    /// The box shrank below its floor without an acceptable step.
    BoxUnderflow,

    /// The convex backend refused a subproblem.
    Fatal,

    /// Wall-clock budget expired.
    TimeUp,
}

/// Penalty-method sequential quadratic programming inside an adaptive
/// trust box.
///
/// ```no_run
/// # use sqp_core::sqp::TrustRegionSqp;
/// # use sqp_core::problem::OptProb;
/// # fn build_problem() -> OptProb { unimplemented!() }
/// let mut solver = TrustRegionSqp::new(build_problem());
/// solver.initialize(&[0.0, 0.0])?;
/// let status = solver.optimize()?;
/// println!("{}: x = {:?}", status, solver.results().x);
/// # Ok::<(), sqp_core::error::SqpError>(())
/// ```
pub struct TrustRegionSqp {
    prob: OptProb,
    settings: SqpSettings,
    results: OptResults,
    callbacks: Vec<Callback>,

    /// Current penalty weight mu.
    merit_error_coeff: f64,

    /// Current trust box half-width.
    trust_box_size: f64,
}

impl TrustRegionSqp {
    /// Create a driver over the given problem with default settings.
    pub fn new(prob: OptProb) -> Self {
        Self::with_settings(prob, SqpSettings::default())
    }

    /// Create a driver with explicit settings.
    pub fn with_settings(prob: OptProb, settings: SqpSettings) -> Self {
        let merit_error_coeff = settings.merit_error_coeff;
        let trust_box_size = settings.trust_box_size;
        Self {
            prob,
            settings,
            results: OptResults::default(),
            callbacks: Vec::new(),
            merit_error_coeff,
            trust_box_size,
        }
    }

    /// Register an observer called at the start of every SQP iteration
    /// and once at cleanup.
    pub fn add_callback(&mut self, cb: Callback) {
        self.callbacks.push(cb);
    }

    /// Set the starting point. Resets results, counters, and the
    /// penalty/trust state to their configured initial values.
    pub fn initialize(&mut self, x: &[f64]) -> SqpResult<()> {
        let n = self.prob.num_vars();
        if x.len() != n {
            return Err(SqpError::DimensionMismatch {
                expected: n,
                got: x.len(),
            });
        }
        self.results.clear();
        self.results.x = x.to_vec();
        self.merit_error_coeff = self.settings.merit_error_coeff;
        self.trust_box_size = self.settings.trust_box_size;
        Ok(())
    }

    /// Solve results (valid after `optimize`; partial results remain
    /// accessible after terminal failures).
    pub fn results(&self) -> &OptResults {
        &self.results
    }

    /// The problem under optimization.
    pub fn prob(&self) -> &OptProb {
        &self.prob
    }

    /// Driver settings.
    pub fn settings(&self) -> &SqpSettings {
        &self.settings
    }

    /// Current penalty weight (escalates across penalty passes).
    pub fn merit_error_coeff(&self) -> f64 {
        self.merit_error_coeff
    }

    /// Current trust box half-width.
    pub fn trust_box_size(&self) -> f64 {
        self.trust_box_size
    }

    /// Run the optimization to a terminal status.
    ///
    /// Errors are precondition failures only; everything that happens
    /// during the solve maps to a terminal [`OptStatus`].
    pub fn optimize(&mut self) -> SqpResult<OptStatus> {
        if self.results.x.is_empty() {
            return Err(SqpError::NotInitialized);
        }
        self.prob.validate()?;
        if self.results.x.len() != self.prob.num_vars() {
            return Err(SqpError::DimensionMismatch {
                expected: self.prob.num_vars(),
                got: self.results.x.len(),
            });
        }

        let start = Instant::now();
        let cost_names = self.prob.cost_names();
        let cnt_names = self.prob.cnt_names();

        // Nonlinear constraints are the merit mechanism's job; only the
        // box bounds are enforced up front.
        self.results.x = self.prob.closest_feasible_point(&self.results.x);

        for _ in 0..self.settings.max_merit_coeff_increases {
            let status = self.run_sqp_pass(&start, &cost_names, &cnt_names);
            if status != OptStatus::Converged {
                return Ok(self.cleanup(status));
            }

            let feasible = self.results.cnt_viols.is_empty()
                || merit::vec_max(&self.results.cnt_viols) < self.settings.cnt_tolerance;
            if feasible {
                if !self.results.cnt_viols.is_empty() {
                    debug!(
                        "constraints satisfied to tolerance {:.2e}",
                        self.settings.cnt_tolerance
                    );
                }
                return Ok(self.cleanup(OptStatus::Converged));
            }

            debug!(
                "constraints not satisfied, raising penalty coefficient to {:.1e}",
                self.merit_error_coeff * self.settings.merit_coeff_increase_ratio
            );
            self.merit_error_coeff *= self.settings.merit_coeff_increase_ratio;
            // Give the next pass room to move again.
            self.trust_box_size = self.trust_box_size.max(
                self.settings.min_trust_box_size / self.settings.trust_shrink_ratio * 1.5,
            );
        }

        debug!("penalty escalations exhausted without reaching feasibility");
        Ok(self.cleanup(OptStatus::PenaltyIterationLimit))
    }

    /// One pass of the inner SQP loop at the current penalty weight.
    fn run_sqp_pass(
        &mut self,
        start: &Instant,
        cost_names: &[String],
        cnt_names: &[String],
    ) -> OptStatus {
        for iter in 1..=self.settings.max_iter {
            self.call_callbacks();

            if self.time_exhausted(start) {
                info!("time budget exhausted at iteration {}", iter);
                return OptStatus::ScoIterationLimit;
            }

            // First iteration of a solve: seed the nonlinear caches.
            if self.results.cost_vals.is_empty() && self.results.cnt_viols.is_empty() {
                let x = self.results.x.clone();
                self.results.cnt_viols = merit::evaluate_cnt_viols(self.prob.constraints(), &x);
                self.results.cost_vals = merit::evaluate_costs(self.prob.costs(), &x);
                self.results.n_func_evals += 1;
            }

            debug!("sqp iteration {}", iter);

            let x = self.results.x.clone();
            let mut cost_models = self.prob.convexify_costs(&x);
            let cnt_models = self.prob.convexify_constraints(&x);
            let mut cnt_cost_models =
                cnts_to_costs(&cnt_models, self.merit_error_coeff, self.prob.model_mut());
            self.prob.model_mut().update();

            for obj in cost_models.iter_mut().chain(cnt_cost_models.iter_mut()) {
                obj.install_constraints(self.prob.model_mut());
            }
            self.prob.model_mut().update();

            let mut objective = QuadExpr::new();
            for obj in cost_models.iter().chain(cnt_cost_models.iter()) {
                objective.add_quad(&obj.quad);
            }
            self.prob.model_mut().set_objective(&objective);

            let outcome =
                self.trust_loop(&cost_models, &cnt_models, &cnt_cost_models, cost_names, cnt_names, start);

            // This iteration's auxiliaries come back out before the next
            // convexification installs fresh ones.
            for obj in cost_models.iter_mut().chain(cnt_cost_models.iter_mut()) {
                obj.remove_from_model(self.prob.model_mut());
            }
            self.prob.model_mut().update();

            match outcome {
                StepOutcome::Accepted => continue,
                StepOutcome::Converged | StepOutcome::BoxUnderflow => {
                    return OptStatus::Converged;
                }
                StepOutcome::Fatal => return OptStatus::OptFailed,
                StepOutcome::TimeUp => return OptStatus::ScoIterationLimit,
            }
        }

        debug!("iteration limit reached ({} iterations)", self.settings.max_iter);
        OptStatus::ScoIterationLimit
    }

    /// Shrink the trust box until a step is accepted, the model stops
    /// promising improvement, or the box underflows.
    fn trust_loop(
        &mut self,
        cost_models: &[ConvexObjective],
        cnt_models: &[ConvexConstraints],
        cnt_cost_models: &[ConvexObjective],
        cost_names: &[String],
        cnt_names: &[String],
        start: &Instant,
    ) -> StepOutcome {
        while self.trust_box_size >= self.settings.min_trust_box_size {
            if self.time_exhausted(start) {
                return StepOutcome::TimeUp;
            }

            self.set_trust_box_constraints();

            let status = self.prob.model_mut().optimize();
            self.results.n_qp_solves += 1;
            if status != CvxStatus::Solved {
                warn!("convex backend failed ({:?})", status);
                self.persist_failed_model();
                return StepOutcome::Fatal;
            }

            let model_vars = self.prob.model().vars();
            let model_var_vals = self.prob.model().var_values(&model_vars);
            let x_ext = scatter_values(&model_vars, &model_var_vals);

            let model_cost_vals = merit::evaluate_model_costs(cost_models, &x_ext);
            let model_cnt_viols = merit::evaluate_model_cnt_viols(cnt_models, &x_ext);

            // The problem's decision variables occupy the first slots of
            // the model's pool.
            let n = self.prob.num_vars();
            let new_x: Vec<f64> = x_ext[..n].to_vec();

            if log::log_enabled!(log::Level::Debug) && !cnt_cost_models.is_empty() {
                // The penalty objectives track mu times the model
                // violations, up to auxiliary-variable slack.
                let penalty_vals = merit::evaluate_model_costs(cnt_cost_models, &x_ext);
                let scaled: Vec<f64> = model_cnt_viols
                    .iter()
                    .map(|v| v * self.merit_error_coeff)
                    .collect();
                debug!(
                    "penalty objectives {:?} ?= scaled model violations {:?}",
                    penalty_vals, scaled
                );
            }

            let new_cost_vals = merit::evaluate_costs(self.prob.costs(), &new_x);
            let new_cnt_viols = merit::evaluate_cnt_viols(self.prob.constraints(), &new_x);
            self.results.n_func_evals += 1;

            let report = MeritReport::compute(
                &self.results.cost_vals,
                &self.results.cnt_viols,
                &model_cost_vals,
                &model_cnt_viols,
                &new_cost_vals,
                &new_cnt_viols,
                self.merit_error_coeff,
            );

            if self.settings.verbose {
                merit::print_improvement_table(
                    &self.results.cost_vals,
                    &model_cost_vals,
                    &new_cost_vals,
                    &self.results.cnt_viols,
                    &model_cnt_viols,
                    &new_cnt_viols,
                    cost_names,
                    cnt_names,
                    self.merit_error_coeff,
                );
                eprintln!(
                    "{:>15} | {:>10.3e} | {:>10.3e} | {:>10.3e} | {:>10.3e}",
                    "TOTAL",
                    report.old_merit,
                    report.approx_improve,
                    report.exact_improve,
                    report.ratio
                );
            }

            if report.approx_improve < -1e-5 {
                warn!(
                    "approximate merit got worse ({:.3e}); convexification is \
                     inconsistent at zeroth order",
                    report.approx_improve
                );
            }

            if report.approx_improve < self.settings.min_approx_improve {
                debug!(
                    "converged: improvement was small ({:.3e} < {:.3e})",
                    report.approx_improve, self.settings.min_approx_improve
                );
                // Small but valid; the step is kept.
                self.accept_step(new_x, new_cost_vals, new_cnt_viols);
                return StepOutcome::Converged;
            }
            if report.approx_improve / report.old_merit < self.settings.min_approx_improve_frac {
                debug!(
                    "converged: improvement fraction was small ({:.3e} < {:.3e})",
                    report.approx_improve / report.old_merit,
                    self.settings.min_approx_improve_frac
                );
                self.accept_step(new_x, new_cost_vals, new_cnt_viols);
                return StepOutcome::Converged;
            } else if report.exact_improve < 0.0
                || report.ratio < self.settings.improve_ratio_threshold
            {
                self.trust_box_size *= self.settings.trust_shrink_ratio;
                debug!("shrunk trust box to {:.4}", self.trust_box_size);
            } else {
                self.accept_step(new_x, new_cost_vals, new_cnt_viols);
                self.trust_box_size *= self.settings.trust_expand_ratio;
                debug!("expanded trust box to {:.4}", self.trust_box_size);
                return StepOutcome::Accepted;
            }
        }

        debug!("converged: trust box is tiny");
        StepOutcome::BoxUnderflow
    }

    /// Move to the candidate and refresh the nonlinear caches.
    fn accept_step(&mut self, x: Vec<f64>, cost_vals: Vec<f64>, cnt_viols: Vec<f64>) {
        self.results.x = x;
        self.results.cost_vals = cost_vals;
        self.results.cnt_viols = cnt_viols;
    }

    /// Bound each decision variable to the trust box intersected with
    /// its own box bounds. Auxiliaries keep their natural bounds.
    fn set_trust_box_constraints(&mut self) {
        let delta = self.trust_box_size;
        let x = &self.results.x;
        let lb: Vec<f64> = x
            .iter()
            .zip(self.prob.lower_bounds())
            .map(|(&xi, &l)| (xi - delta).max(l))
            .collect();
        let ub: Vec<f64> = x
            .iter()
            .zip(self.prob.upper_bounds())
            .map(|(&xi, &u)| (xi + delta).min(u))
            .collect();
        let vars = self.prob.vars().to_vec();
        self.prob.model_mut().set_var_bounds(&vars, &lb, &ub);
    }

    /// Best-effort dump of the failing model for offline analysis.
    fn persist_failed_model(&self) {
        if let Some(path) = &self.settings.fail_model_path {
            match self.prob.model().write_to_file(path) {
                Ok(()) => warn!("wrote failing model to {}", path.display()),
                Err(e) => warn!("could not write failing model to {}: {}", path.display(), e),
            }
        }
    }

    fn time_exhausted(&self, start: &Instant) -> bool {
        match self.settings.time_limit_ms {
            Some(ms) => start.elapsed().as_millis() as u64 >= ms,
            None => false,
        }
    }

    /// Finalize results and notify observers.
    fn cleanup(&mut self, status: OptStatus) -> OptStatus {
        self.results.status = status;
        self.results.total_cost = merit::vec_sum(&self.results.cost_vals);
        info!(
            "finished: {} (func evals {}, qp solves {})",
            status, self.results.n_func_evals, self.results.n_qp_solves
        );
        self.call_callbacks();
        status
    }

    fn call_callbacks(&mut self) {
        let Self {
            prob,
            results,
            callbacks,
            ..
        } = self;
        for cb in callbacks.iter_mut() {
            cb(prob, &results.x);
        }
    }
}
