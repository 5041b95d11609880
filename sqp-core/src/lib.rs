//! Trust-region sequential quadratic programming with an L1 merit
//! function and penalty adjustment.
//!
//! Given a smooth nonlinear program with costs and equality/inequality
//! constraints, the driver repeatedly:
//!
//! 1. asks each cost and constraint for a local convex model about the
//!    current iterate,
//! 2. folds constraint models into the objective as abs/hinge penalties
//!    weighted by the merit coefficient mu,
//! 3. solves the resulting QP inside a trust box,
//! 4. accepts or rejects the step by comparing predicted against actual
//!    merit improvement, expanding or shrinking the box accordingly.
//!
//! If a converged iterate still violates constraints, mu is multiplied
//! and the loop restarts from the current point. The convex subproblems
//! are staged in an abstract [`model::Model`] backend; this crate
//! contains no linear algebra of its own.
//!
//! # Example
//!
//! ```ignore
//! use sqp_core::{OptProb, SqpSettings, TrustRegionSqp};
//!
//! let mut prob = OptProb::new(make_backend());
//! let v = prob.add_var("v", -10.0, 10.0);
//! prob.add_cost(Box::new(MyCost::new(v)));
//!
//! let mut solver = TrustRegionSqp::with_settings(prob, SqpSettings::default());
//! solver.initialize(&[0.0])?;
//! let status = solver.optimize()?;
//! println!("{}", solver.results());
//! ```

#![warn(clippy::all)]

pub mod error;
pub mod expr;
pub mod model;
pub mod penalty;
pub mod problem;
pub mod settings;
pub mod sqp;

pub use error::{SqpError, SqpResult};
pub use expr::{AffExpr, QuadExpr};
pub use model::{scatter_values, Cnt, ConvexConstraints, ConvexObjective, CvxStatus, Model, Var};
pub use problem::{CntKind, Constraint, Cost, OptProb};
pub use settings::SqpSettings;
pub use sqp::{Callback, OptResults, OptStatus, TrustRegionSqp};
