//! Black-box scalar minimization
//!
//! Two derivative-light methods drive the tuning loop:
//!
//! - [`Method::NelderMead`]: downhill simplex. Derivative-free, works
//!   without explicit bounds, tolerant of the noisy objectives produced
//!   by live telemetry.
//! - [`Method::BoundedBfgs`]: quasi-Newton with forward-difference
//!   gradients, a backtracking Armijo line search, and projection onto
//!   box bounds.
//!
//! Objective evaluations are expensive (each one perturbs the remote
//! pipeline and waits for it to settle), so both methods run against a
//! shared evaluation budget and a cooperative stop flag, and the best
//! point ever evaluated is returned even when a method halts mid-iteration.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// Standard Nelder-Mead coefficients.
const REFLECTION: f64 = 1.0;
const EXPANSION: f64 = 2.0;
const CONTRACTION: f64 = 0.5;
const SHRINK: f64 = 0.5;

/// Initial simplex displacement for nonzero coordinates (fractional).
const SIMPLEX_NONZERO_DELTA: f64 = 0.05;
/// Initial simplex displacement for zero coordinates (absolute).
const SIMPLEX_ZERO_DELTA: f64 = 0.00025;

/// Relative forward-difference step for gradients.
const FD_STEP: f64 = 1e-6;
/// Armijo sufficient-decrease coefficient.
const ARMIJO_C1: f64 = 1e-4;
/// Line search halvings before giving up on a descent direction.
const MAX_BACKTRACKS: usize = 16;
/// Gradient infinity-norm below which BFGS declares convergence.
const GRAD_TOL: f64 = 1e-6;

/// Minimization method selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Method {
    /// Derivative-free downhill simplex (no bounds required)
    NelderMead,
    /// Quasi-Newton with finite-difference gradients, projected onto bounds
    BoundedBfgs,
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NelderMead => write!(f, "nelder-mead"),
            Self::BoundedBfgs => write!(f, "bounded-bfgs"),
        }
    }
}

/// Stopping criteria shared by both methods.
#[derive(Debug, Clone)]
pub struct Options {
    /// Hard cap on objective evaluations
    pub max_evals: usize,
    /// Coordinate-spread / step-size tolerance
    pub x_tol: f64,
    /// Function-value tolerance
    pub f_tol: f64,
    /// Cooperative stop flag, checked before every evaluation
    pub stop: Option<Arc<AtomicBool>>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            max_evals: 100,
            x_tol: 1e-3,
            f_tol: 1e-4,
            stop: None,
        }
    }
}

/// Why the method returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Converged,
    MaxEvals,
    Stopped,
}

/// Result of a minimization: the best point ever evaluated, regardless of
/// how the method halted.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub x: Vec<f64>,
    pub fx: f64,
    pub evals: usize,
    pub status: Status,
}

/// Minimize `f` starting from `x0`.
///
/// `bounds` applies only to [`Method::BoundedBfgs`]; Nelder-Mead explores
/// unconstrained, matching how it is conventionally driven.
pub fn minimize<F>(
    f: F,
    x0: &[f64],
    bounds: Option<&[(f64, f64)]>,
    method: Method,
    opts: &Options,
) -> Outcome
where
    F: FnMut(&[f64]) -> f64,
{
    let mut ev = Evaluator::new(f, x0, opts);
    let status = match method {
        Method::NelderMead => nelder_mead(&mut ev, x0, opts),
        Method::BoundedBfgs => bounded_bfgs(&mut ev, x0, bounds, opts),
    };
    Outcome {
        x: ev.best_x,
        fx: ev.best_fx,
        evals: ev.evals,
        status,
    }
}

/// Budgeted, stoppable objective wrapper that remembers the best point.
struct Evaluator<F> {
    f: F,
    evals: usize,
    max_evals: usize,
    stop: Option<Arc<AtomicBool>>,
    best_x: Vec<f64>,
    best_fx: f64,
}

impl<F: FnMut(&[f64]) -> f64> Evaluator<F> {
    fn new(f: F, x0: &[f64], opts: &Options) -> Self {
        Self {
            f,
            evals: 0,
            max_evals: opts.max_evals,
            stop: opts.stop.clone(),
            best_x: x0.to_vec(),
            best_fx: f64::INFINITY,
        }
    }

    fn stopped(&self) -> bool {
        self.stop
            .as_ref()
            .is_some_and(|s| s.load(Ordering::Relaxed))
    }

    /// Evaluate, or `None` when the budget is exhausted or a stop was
    /// requested.
    fn call(&mut self, x: &[f64]) -> Option<f64> {
        if self.stopped() || self.evals >= self.max_evals {
            return None;
        }
        self.evals += 1;
        let fx = (self.f)(x);
        if fx < self.best_fx {
            self.best_fx = fx;
            self.best_x = x.to_vec();
        }
        Some(fx)
    }

    fn halt_status(&self) -> Status {
        if self.stopped() {
            Status::Stopped
        } else {
            Status::MaxEvals
        }
    }
}

// ============================================================================
// Nelder-Mead
// ============================================================================

fn nelder_mead<F: FnMut(&[f64]) -> f64>(
    ev: &mut Evaluator<F>,
    x0: &[f64],
    opts: &Options,
) -> Status {
    let n = x0.len();

    // Initial simplex: x0 plus one axis-perturbed point per dimension.
    let mut simplex: Vec<(Vec<f64>, f64)> = Vec::with_capacity(n + 1);
    let Some(f0) = ev.call(x0) else {
        return ev.halt_status();
    };
    simplex.push((x0.to_vec(), f0));
    for i in 0..n {
        let mut xi = x0.to_vec();
        xi[i] = if xi[i] == 0.0 {
            SIMPLEX_ZERO_DELTA
        } else {
            xi[i] * (1.0 + SIMPLEX_NONZERO_DELTA)
        };
        let Some(fi) = ev.call(&xi) else {
            return ev.halt_status();
        };
        simplex.push((xi, fi));
    }

    loop {
        simplex.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        // Convergence: simplex collapsed in both value and extent.
        let f_spread = (simplex[n].1 - simplex[0].1).abs();
        let x_spread = (0..n)
            .map(|d| {
                simplex[1..]
                    .iter()
                    .map(|(x, _)| (x[d] - simplex[0].0[d]).abs())
                    .fold(0.0, f64::max)
            })
            .fold(0.0, f64::max);
        if f_spread <= opts.f_tol && x_spread <= opts.x_tol {
            return Status::Converged;
        }

        // Centroid of all points but the worst.
        let mut centroid = vec![0.0; n];
        for (x, _) in &simplex[..n] {
            for (c, v) in centroid.iter_mut().zip(x) {
                *c += v / n as f64;
            }
        }

        let worst = simplex[n].clone();
        let reflected: Vec<f64> = centroid
            .iter()
            .zip(&worst.0)
            .map(|(c, w)| c + REFLECTION * (c - w))
            .collect();
        let Some(f_r) = ev.call(&reflected) else {
            return ev.halt_status();
        };

        if f_r < simplex[0].1 {
            // Best so far — try expanding further along the same ray.
            let expanded: Vec<f64> = centroid
                .iter()
                .zip(&reflected)
                .map(|(c, r)| c + EXPANSION * (r - c))
                .collect();
            let Some(f_e) = ev.call(&expanded) else {
                return ev.halt_status();
            };
            simplex[n] = if f_e < f_r {
                (expanded, f_e)
            } else {
                (reflected, f_r)
            };
            continue;
        }

        if f_r < simplex[n - 1].1 {
            simplex[n] = (reflected, f_r);
            continue;
        }

        // Contract toward the better of worst/reflected.
        let toward = if f_r < worst.1 { &reflected } else { &worst.0 };
        let contracted: Vec<f64> = centroid
            .iter()
            .zip(toward)
            .map(|(c, t)| c + CONTRACTION * (t - c))
            .collect();
        let Some(f_c) = ev.call(&contracted) else {
            return ev.halt_status();
        };
        if f_c < f_r.min(worst.1) {
            simplex[n] = (contracted, f_c);
            continue;
        }

        // Contraction failed — shrink everything toward the best point.
        let best = simplex[0].0.clone();
        for entry in simplex.iter_mut().skip(1) {
            let shrunk: Vec<f64> = best
                .iter()
                .zip(&entry.0)
                .map(|(b, x)| b + SHRINK * (x - b))
                .collect();
            let Some(f_s) = ev.call(&shrunk) else {
                return ev.halt_status();
            };
            *entry = (shrunk, f_s);
        }
    }
}

// ============================================================================
// Bounded quasi-Newton
// ============================================================================

fn clamp_to(x: &mut [f64], bounds: Option<&[(f64, f64)]>) {
    if let Some(bounds) = bounds {
        for (v, (lo, hi)) in x.iter_mut().zip(bounds) {
            *v = v.clamp(*lo, *hi);
        }
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn inf_norm(a: &[f64]) -> f64 {
    a.iter().fold(0.0, |m, v| m.max(v.abs()))
}

fn identity(n: usize) -> Vec<Vec<f64>> {
    (0..n)
        .map(|i| (0..n).map(|j| f64::from(u8::from(i == j))).collect())
        .collect()
}

/// Forward-difference gradient; switches to a backward step when the
/// forward probe would leave the feasible box.
fn fd_gradient<F: FnMut(&[f64]) -> f64>(
    ev: &mut Evaluator<F>,
    x: &[f64],
    fx: f64,
    bounds: Option<&[(f64, f64)]>,
) -> Option<Vec<f64>> {
    let mut g = vec![0.0; x.len()];
    for i in 0..x.len() {
        let h = FD_STEP * x[i].abs().max(1.0);
        let upper = bounds.map(|b| b[i].1).unwrap_or(f64::INFINITY);
        let (step, sign) = if x[i] + h > upper { (-h, -1.0) } else { (h, 1.0) };

        let mut probe = x.to_vec();
        probe[i] += step;
        let fp = ev.call(&probe)?;
        g[i] = sign * (fp - fx) / h;
    }
    Some(g)
}

/// BFGS inverse-Hessian update: H ← (I − ρsyᵀ) H (I − ρysᵀ) + ρssᵀ.
fn bfgs_update(h: &mut Vec<Vec<f64>>, s: &[f64], y: &[f64], sy: f64) {
    let n = s.len();
    let rho = 1.0 / sy;

    // hy = H·y
    let hy: Vec<f64> = h.iter().map(|row| dot(row, y)).collect();
    let yhy = dot(y, &hy);

    let mut updated = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in 0..n {
            updated[i][j] = h[i][j] - rho * (s[i] * hy[j] + hy[i] * s[j])
                + rho * rho * yhy * s[i] * s[j]
                + rho * s[i] * s[j];
        }
    }
    *h = updated;
}

fn bounded_bfgs<F: FnMut(&[f64]) -> f64>(
    ev: &mut Evaluator<F>,
    x0: &[f64],
    bounds: Option<&[(f64, f64)]>,
    opts: &Options,
) -> Status {
    let n = x0.len();
    let mut x = x0.to_vec();
    clamp_to(&mut x, bounds);

    let Some(mut fx) = ev.call(&x) else {
        return ev.halt_status();
    };
    let Some(mut g) = fd_gradient(ev, &x, fx, bounds) else {
        return ev.halt_status();
    };
    let mut h_inv = identity(n);

    loop {
        if inf_norm(&g) < GRAD_TOL {
            return Status::Converged;
        }

        // Search direction; fall back to steepest descent when the
        // quasi-Newton direction is not a descent direction.
        let mut d: Vec<f64> = h_inv.iter().map(|row| -dot(row, &g)).collect();
        if dot(&d, &g) >= 0.0 {
            h_inv = identity(n);
            d = g.iter().map(|v| -v).collect();
        }
        let slope = dot(&g, &d);

        // Backtracking line search with projection onto the box.
        let mut t = 1.0;
        let mut accepted: Option<(Vec<f64>, f64)> = None;
        for _ in 0..MAX_BACKTRACKS {
            let mut xt: Vec<f64> = x.iter().zip(&d).map(|(xi, di)| xi + t * di).collect();
            clamp_to(&mut xt, bounds);
            let Some(ft) = ev.call(&xt) else {
                return ev.halt_status();
            };
            if ft <= fx + ARMIJO_C1 * t * slope {
                accepted = Some((xt, ft));
                break;
            }
            t *= 0.5;
        }
        let Some((x_new, f_new)) = accepted else {
            // No acceptable step in any tried length — treat as converged
            // to within line-search resolution.
            return Status::Converged;
        };

        let s: Vec<f64> = x_new.iter().zip(&x).map(|(a, b)| a - b).collect();
        if (fx - f_new).abs() <= opts.f_tol && inf_norm(&s) <= opts.x_tol {
            return Status::Converged;
        }

        let Some(g_new) = fd_gradient(ev, &x_new, f_new, bounds) else {
            return ev.halt_status();
        };
        let y: Vec<f64> = g_new.iter().zip(&g).map(|(a, b)| a - b).collect();
        let sy = dot(&s, &y);
        if sy > 1e-12 {
            bfgs_update(&mut h_inv, &s, &y, sy);
        } else {
            // Curvature condition failed (projection or noise); reset.
            h_inv = identity(n);
        }

        x = x_new;
        fx = f_new;
        g = g_new;
    }
}
