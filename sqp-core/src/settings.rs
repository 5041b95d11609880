//! Configuration settings for the trust-region SQP driver.

use std::path::PathBuf;

/// Tunable parameters of the trust-region SQP loop.
///
/// The defaults are the long-standing values for penalty-method SQP on
/// trajectory-scale problems; most callers only ever touch `max_iter`,
/// `cnt_tolerance`, and `verbose`.
#[derive(Debug, Clone)]
pub struct SqpSettings {
    // === Step acceptance ===
    /// Minimum ratio of exact to model merit improvement for a step to
    /// be accepted.
    pub improve_ratio_threshold: f64,

    /// Below this model improvement the iterate is declared locally
    /// converged (the step is still kept).
    pub min_approx_improve: f64,

    /// Same test, relative to the current merit value.
    pub min_approx_improve_frac: f64,

    // === Trust region ===
    /// Terminal trust box half-width; shrinking past this converges.
    pub min_trust_box_size: f64,

    /// Multiplier applied to the box on a rejected step.
    pub trust_shrink_ratio: f64,

    /// Multiplier applied to the box on an accepted step.
    pub trust_expand_ratio: f64,

    /// Initial trust box half-width.
    pub trust_box_size: f64,

    // === Termination ===
    /// Maximum SQP iterations per penalty pass.
    pub max_iter: usize,

    /// Wall-clock budget in milliseconds (None = unlimited). Checked at
    /// iteration and QP-solve boundaries, never mid-solve.
    pub time_limit_ms: Option<u64>,

    // === Constraint penalty ===
    /// Feasibility threshold on the max constraint violation.
    pub cnt_tolerance: f64,

    /// Initial penalty weight on constraint violation.
    pub merit_error_coeff: f64,

    /// Penalty multiplier applied when a converged iterate is still
    /// infeasible.
    pub merit_coeff_increase_ratio: f64,

    /// How many penalty escalations to attempt before giving up.
    pub max_merit_coeff_increases: usize,

    // === Output ===
    /// Print the per-iteration cost/constraint improvement table.
    pub verbose: bool,

    /// Where to dump the model if the QP backend fails (None = don't).
    pub fail_model_path: Option<PathBuf>,
}

impl Default for SqpSettings {
    fn default() -> Self {
        Self {
            improve_ratio_threshold: 0.25,
            min_approx_improve: 1e-4,
            min_approx_improve_frac: f64::NEG_INFINITY,
            min_trust_box_size: 1e-4,
            trust_shrink_ratio: 0.1,
            trust_expand_ratio: 1.5,
            trust_box_size: 0.1,
            max_iter: 50,
            time_limit_ms: None,
            cnt_tolerance: 1e-4,
            merit_error_coeff: 10.0,
            merit_coeff_increase_ratio: 10.0,
            max_merit_coeff_increases: 5,
            verbose: false,
            fail_model_path: None,
        }
    }
}

impl SqpSettings {
    /// Settings with the iteration table enabled.
    pub fn verbose() -> Self {
        let mut s = Self::default();
        s.verbose = true;
        s
    }

    /// Set the wall-clock budget in seconds.
    pub fn with_time_limit(mut self, seconds: f64) -> Self {
        self.time_limit_ms = Some((seconds * 1000.0) as u64);
        self
    }

    /// Set the per-pass iteration cap.
    pub fn with_max_iter(mut self, iters: usize) -> Self {
        self.max_iter = iters;
        self
    }

    /// Set the feasibility threshold.
    pub fn with_cnt_tolerance(mut self, tol: f64) -> Self {
        self.cnt_tolerance = tol;
        self
    }

    /// Set the initial penalty weight.
    pub fn with_merit_error_coeff(mut self, coeff: f64) -> Self {
        self.merit_error_coeff = coeff;
        self
    }
}
