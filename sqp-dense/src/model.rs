//! Dense convex-model backend.
//!
//! [`DenseModel`] implements the `Model` capability over slot pools:
//! variables and rows live in free-listed slots so handles stay stable
//! while per-iteration auxiliaries come and go. `optimize` assembles the
//! staged objective and rows into dense matrices and runs the ADMM
//! solver, warm-starting from the previous solution.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use nalgebra::{DMatrix, DVector};
use sqp_core::{AffExpr, Cnt, CvxStatus, Model, QuadExpr, Var};

use crate::admm::{solve_qp, AdmmSettings, AdmmStatus};

#[derive(Debug)]
struct VarSlot {
    name: String,
    lower: f64,
    upper: f64,
    value: f64,
    live: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowKind {
    Eq,
    Ineq,
}

#[derive(Debug)]
struct RowSlot {
    expr: AffExpr,
    kind: RowKind,
    live: bool,
}

/// Dense QP backend with free-listed variable and row pools.
#[derive(Debug, Default)]
pub struct DenseModel {
    vars: Vec<VarSlot>,
    free_vars: Vec<usize>,
    rows: Vec<RowSlot>,
    free_rows: Vec<usize>,
    objective: QuadExpr,
    settings: AdmmSettings,
}

impl DenseModel {
    /// Backend with default ADMM settings.
    pub fn new() -> Self {
        Self::with_settings(AdmmSettings::default())
    }

    /// Backend with explicit ADMM settings.
    pub fn with_settings(settings: AdmmSettings) -> Self {
        Self {
            vars: Vec::new(),
            free_vars: Vec::new(),
            rows: Vec::new(),
            free_rows: Vec::new(),
            objective: QuadExpr::new(),
            settings,
        }
    }

    /// Live variable count.
    pub fn num_live_vars(&self) -> usize {
        self.vars.iter().filter(|v| v.live).count()
    }

    /// Live row count.
    pub fn num_live_rows(&self) -> usize {
        self.rows.iter().filter(|r| r.live).count()
    }

    /// Total allocated variable slots (live or free).
    pub fn num_var_slots(&self) -> usize {
        self.vars.len()
    }

    fn add_row(&mut self, expr: AffExpr, kind: RowKind) -> Cnt {
        if let Some(slot) = self.free_rows.pop() {
            self.rows[slot] = RowSlot { expr, kind, live: true };
            Cnt::from_index(slot)
        } else {
            self.rows.push(RowSlot { expr, kind, live: true });
            Cnt::from_index(self.rows.len() - 1)
        }
    }

    /// Map live slots to dense columns. Returns per-slot column indices
    /// and the ordered slot list.
    fn column_map(&self) -> (Vec<Option<usize>>, Vec<usize>) {
        let mut col_of = vec![None; self.vars.len()];
        let mut slots = Vec::new();
        for (i, v) in self.vars.iter().enumerate() {
            if v.live {
                col_of[i] = Some(slots.len());
                slots.push(i);
            }
        }
        (col_of, slots)
    }
}

impl Model for DenseModel {
    fn add_var(&mut self, name: &str, lb: f64, ub: f64) -> Var {
        let slot = VarSlot {
            name: name.to_string(),
            lower: lb,
            upper: ub,
            value: 0.0_f64.clamp(lb, ub),
            live: true,
        };
        if let Some(idx) = self.free_vars.pop() {
            self.vars[idx] = slot;
            Var::from_index(idx)
        } else {
            self.vars.push(slot);
            Var::from_index(self.vars.len() - 1)
        }
    }

    fn add_eq_cnt(&mut self, expr: AffExpr) -> Cnt {
        self.add_row(expr, RowKind::Eq)
    }

    fn add_ineq_cnt(&mut self, expr: AffExpr) -> Cnt {
        self.add_row(expr, RowKind::Ineq)
    }

    fn remove_vars(&mut self, vars: &[Var]) {
        for v in vars {
            if self.vars[v.index()].live {
                self.vars[v.index()].live = false;
                self.free_vars.push(v.index());
            }
        }
    }

    fn remove_cnts(&mut self, cnts: &[Cnt]) {
        for c in cnts {
            if self.rows[c.index()].live {
                self.rows[c.index()].live = false;
                self.free_rows.push(c.index());
            }
        }
    }

    fn vars(&self) -> Vec<Var> {
        self.vars
            .iter()
            .enumerate()
            .filter(|(_, v)| v.live)
            .map(|(i, _)| Var::from_index(i))
            .collect()
    }

    fn set_var_bounds(&mut self, vars: &[Var], lower: &[f64], upper: &[f64]) {
        for (i, v) in vars.iter().enumerate() {
            self.vars[v.index()].lower = lower[i];
            self.vars[v.index()].upper = upper[i];
        }
    }

    fn set_objective(&mut self, obj: &QuadExpr) {
        self.objective = obj.clone();
    }

    fn update(&mut self) {}

    fn optimize(&mut self) -> CvxStatus {
        let (col_of, slots) = self.column_map();
        let n = slots.len();
        if n == 0 {
            return CvxStatus::Solved;
        }

        // Objective: 1/2 x'Px + q'x from the staged quadratic. Product
        // terms carry no implicit 1/2, so diagonal entries double.
        let mut p = DMatrix::zeros(n, n);
        let mut q = DVector::zeros(n);
        for k in 0..self.objective.coeffs.len() {
            let c = self.objective.coeffs[k];
            let (i, j) = match (
                col_of[self.objective.vars1[k].index()],
                col_of[self.objective.vars2[k].index()],
            ) {
                (Some(i), Some(j)) => (i, j),
                _ => {
                    log::warn!("objective references a removed variable");
                    return CvxStatus::Failed;
                }
            };
            if i == j {
                p[(i, i)] += 2.0 * c;
            } else {
                p[(i, j)] += c;
                p[(j, i)] += c;
            }
        }
        for (c, v) in self
            .objective
            .affine
            .coeffs
            .iter()
            .zip(self.objective.affine.vars.iter())
        {
            match col_of[v.index()] {
                Some(i) => q[i] += c,
                None => {
                    log::warn!("objective references a removed variable");
                    return CvxStatus::Failed;
                }
            }
        }

        // Rows: staged affine rows first, then one box row per variable.
        let live_rows: Vec<&RowSlot> = self.rows.iter().filter(|r| r.live).collect();
        let m = live_rows.len() + n;
        let mut a = DMatrix::zeros(m, n);
        let mut l = DVector::zeros(m);
        let mut u = DVector::zeros(m);
        for (r, row) in live_rows.iter().enumerate() {
            for (c, v) in row.expr.coeffs.iter().zip(row.expr.vars.iter()) {
                match col_of[v.index()] {
                    Some(i) => a[(r, i)] += c,
                    None => {
                        log::warn!("row references a removed variable");
                        return CvxStatus::Failed;
                    }
                }
            }
            match row.kind {
                RowKind::Eq => {
                    l[r] = -row.expr.constant;
                    u[r] = -row.expr.constant;
                }
                RowKind::Ineq => {
                    l[r] = f64::NEG_INFINITY;
                    u[r] = -row.expr.constant;
                }
            }
        }
        for (i, &slot) in slots.iter().enumerate() {
            let r = live_rows.len() + i;
            a[(r, i)] = 1.0;
            l[r] = self.vars[slot].lower;
            u[r] = self.vars[slot].upper;
        }

        let x0 = DVector::from_iterator(n, slots.iter().map(|&s| self.vars[s].value));

        let sol = solve_qp(&p, &q, &a, &l, &u, &x0, &self.settings);
        match sol.status {
            AdmmStatus::Solved => {
                for (i, &slot) in slots.iter().enumerate() {
                    self.vars[slot].value = sol.x[i];
                }
                CvxStatus::Solved
            }
            AdmmStatus::MaxIterations => {
                log::warn!("admm hit the iteration cap without converging");
                CvxStatus::Failed
            }
            AdmmStatus::NumericalError => {
                log::warn!("admm KKT factorization failed");
                CvxStatus::Failed
            }
        }
    }

    fn var_values(&self, vars: &[Var]) -> Vec<f64> {
        vars.iter().map(|v| self.vars[v.index()].value).collect()
    }

    fn write_to_file(&self, path: &Path) -> std::io::Result<()> {
        let mut f = File::create(path)?;
        writeln!(f, "minimize")?;
        for (c, v) in self
            .objective
            .affine
            .coeffs
            .iter()
            .zip(self.objective.affine.vars.iter())
        {
            writeln!(f, "  {:+} {}", c, self.vars[v.index()].name)?;
        }
        for k in 0..self.objective.coeffs.len() {
            writeln!(
                f,
                "  {:+} {} * {}",
                self.objective.coeffs[k],
                self.vars[self.objective.vars1[k].index()].name,
                self.vars[self.objective.vars2[k].index()].name,
            )?;
        }
        writeln!(f, "subject to")?;
        for (r, row) in self.rows.iter().enumerate().filter(|(_, r)| r.live) {
            let terms: Vec<String> = row
                .expr
                .coeffs
                .iter()
                .zip(row.expr.vars.iter())
                .map(|(c, v)| format!("{:+} {}", c, self.vars[v.index()].name))
                .collect();
            let rel = match row.kind {
                RowKind::Eq => "=",
                RowKind::Ineq => "<=",
            };
            writeln!(f, "  r{}: {} {} {}", r, terms.join(" "), rel, -row.expr.constant)?;
        }
        writeln!(f, "bounds")?;
        for v in self.vars.iter().filter(|v| v.live) {
            writeln!(f, "  {} <= {} <= {}", v.lower, v.name, v.upper)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_reuse_after_removal() {
        let mut m = DenseModel::new();
        let a = m.add_var("a", -1.0, 1.0);
        let b = m.add_var("b", 0.0, f64::INFINITY);
        assert_eq!(m.num_live_vars(), 2);

        m.remove_vars(&[b]);
        assert_eq!(m.num_live_vars(), 1);

        let c = m.add_var("c", 0.0, 2.0);
        // Freed slot gets reused; the pool does not grow.
        assert_eq!(c.index(), b.index());
        assert_eq!(m.num_var_slots(), 2);
        assert_eq!(m.vars(), vec![a, c]);
    }

    #[test]
    fn test_quadratic_bowl_through_model_interface() {
        // min (v - 3)^2, v in [-10, 10].
        let mut m = DenseModel::new();
        let v = m.add_var("v", -10.0, 10.0);

        let mut aff = AffExpr::constant(-3.0);
        aff.add_term(1.0, v);
        m.set_objective(&QuadExpr::square_of(&aff));

        assert_eq!(m.optimize(), CvxStatus::Solved);
        let vals = m.var_values(&[v]);
        assert!((vals[0] - 3.0).abs() < 1e-5, "v = {}", vals[0]);
    }

    #[test]
    fn test_equality_row_through_model_interface() {
        // min a^2 + b^2 s.t. a + b = 1: optimum (0.5, 0.5).
        let mut m = DenseModel::new();
        let a = m.add_var("a", -5.0, 5.0);
        let b = m.add_var("b", -5.0, 5.0);

        let mut obj = QuadExpr::new();
        obj.add_quad_term(1.0, a, a);
        obj.add_quad_term(1.0, b, b);
        m.set_objective(&obj);

        let mut row = AffExpr::constant(-1.0);
        row.add_term(1.0, a);
        row.add_term(1.0, b);
        m.add_eq_cnt(row);

        assert_eq!(m.optimize(), CvxStatus::Solved);
        let vals = m.var_values(&[a, b]);
        assert!((vals[0] - 0.5).abs() < 1e-5);
        assert!((vals[1] - 0.5).abs() < 1e-5);
    }

    #[test]
    fn test_ineq_row_hinge_shape() {
        // min h  s.t.  v - h <= 0, h >= 0, v fixed at 2 via bounds:
        // h must come out at the hinge value 2.
        let mut m = DenseModel::new();
        let v = m.add_var("v", 2.0, 2.0);
        let h = m.add_var("h", 0.0, f64::INFINITY);

        let mut obj = QuadExpr::new();
        obj.affine.add_term(1.0, h);
        m.set_objective(&obj);

        let mut row = AffExpr::new();
        row.add_term(1.0, v);
        row.add_term(-1.0, h);
        m.add_ineq_cnt(row);

        assert_eq!(m.optimize(), CvxStatus::Solved);
        let vals = m.var_values(&[h]);
        assert!((vals[0] - 2.0).abs() < 1e-5, "h = {}", vals[0]);
    }

    #[test]
    fn test_write_to_file_smoke() {
        let mut m = DenseModel::new();
        let v = m.add_var("v", -1.0, 1.0);
        let mut row = AffExpr::constant(-0.5);
        row.add_term(1.0, v);
        m.add_ineq_cnt(row);

        let path = std::env::temp_dir().join("sqp_dense_model_dump.lp");
        m.write_to_file(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("subject to"));
        assert!(text.contains("<= 0.5"));
        let _ = std::fs::remove_file(&path);
    }
}
