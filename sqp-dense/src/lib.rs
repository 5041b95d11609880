//! Dense QP backend for the trust-region SQP engine.
//!
//! Provides [`DenseModel`], an implementation of the `sqp-core` model
//! capability backed by a dense operator-splitting (ADMM) QP solver.
//! Intended for the small staged subproblems of an SQP iteration and
//! for exercising the engine end-to-end without an external solver.
//!
//! # Example
//!
//! ```ignore
//! use sqp_core::{OptProb, TrustRegionSqp};
//! use sqp_dense::DenseModel;
//!
//! let mut prob = OptProb::new(Box::new(DenseModel::new()));
//! let v = prob.add_var("v", -10.0, 10.0);
//! prob.add_cost(Box::new(MyCost::new(v)));
//!
//! let mut solver = TrustRegionSqp::new(prob);
//! solver.initialize(&[0.0])?;
//! solver.optimize()?;
//! ```

#![warn(clippy::all)]

pub mod admm;
pub mod model;

pub use admm::{solve_qp, AdmmSettings, AdmmSolution, AdmmStatus};
pub use model::DenseModel;
