//! Limited-memory BFGS for smooth unconstrained problems.

use std::collections::VecDeque;
use tracing::debug;
use wide::f64x4;

/// Armijo sufficient-decrease constant.
const ARMIJO_C1: f64 = 1e-4;
const MAX_BACKTRACKS: usize = 40;
/// Pairs with `s.y` below this are skipped to keep the Hessian estimate positive definite.
const CURVATURE_EPS: f64 = 1e-10;

/// L-BFGS options.
///
/// Same contract as the reference L-BFGS-B solver run without bounds:
/// `tol` plays the role of its `pgtol`/`gtol`, `memory` of its `m`, and
/// `max_iter` counts accepted steps, not function evaluations.
#[derive(Debug, Clone, Copy)]
pub struct Lbfgs {
    pub max_iter: usize,
    /// Stop once `max_i |g_i| < tol`, the infinity norm of the gradient.
    pub tol: f64,
    /// Number of correction pairs kept.
    pub memory: usize,
}

impl Default for Lbfgs {
    fn default() -> Self {
        Self {
            max_iter: 100,
            tol: 1e-4,
            memory: 10,
        }
    }
}

/// Outcome of a minimisation.
#[derive(Debug, Clone)]
pub struct Minimum {
    pub x: Vec<f64>,
    pub value: f64,
    pub iterations: usize,
    pub converged: bool,
}

impl Lbfgs {
    /// Minimises `f`, which returns the objective value and its gradient.
    pub fn minimize<F>(&self, mut f: F, x0: Vec<f64>) -> Minimum
    where
        F: FnMut(&[f64]) -> (f64, Vec<f64>),
    {
        let mut x = x0;
        let (mut fx, mut grad) = f(&x);
        let mut history: VecDeque<(Vec<f64>, Vec<f64>, f64)> = VecDeque::with_capacity(self.memory);

        for iter in 0..self.max_iter {
            if max_abs(&grad) < self.tol {
                return Minimum {
                    x,
                    value: fx,
                    iterations: iter,
                    converged: true,
                };
            }

            let mut direction = two_loop(&grad, &history);
            let mut slope = dot(&grad, &direction);
            if slope >= 0.0 {
                // Not a descent direction; restart from steepest descent.
                history.clear();
                direction = grad.iter().map(|g| -g).collect();
                slope = -dot(&grad, &grad);
            }

            let mut step = if history.is_empty() {
                1.0 / dot(&grad, &grad).sqrt().max(1.0)
            } else {
                1.0
            };

            let mut accepted = None;
            for _ in 0..MAX_BACKTRACKS {
                let mut candidate = x.clone();
                axpy(step, &direction, &mut candidate);
                let (f_new, g_new) = f(&candidate);
                if f_new.is_finite() && f_new <= fx + ARMIJO_C1 * step * slope {
                    accepted = Some((candidate, f_new, g_new));
                    break;
                }
                step *= 0.5;
            }

            let Some((x_new, f_new, g_new)) = accepted else {
                debug!(iter, "line search stalled");
                return Minimum {
                    x,
                    value: fx,
                    iterations: iter,
                    converged: false,
                };
            };

            let s: Vec<f64> = x_new.iter().zip(&x).map(|(a, b)| a - b).collect();
            let y: Vec<f64> = g_new.iter().zip(&grad).map(|(a, b)| a - b).collect();
            let sy = dot(&s, &y);
            if sy > CURVATURE_EPS {
                if history.len() == self.memory {
                    history.pop_front();
                }
                history.push_back((s, y, 1.0 / sy));
            }

            debug!(iter, value = f_new, "l-bfgs step");
            x = x_new;
            fx = f_new;
            grad = g_new;
        }

        let converged = max_abs(&grad) < self.tol;
        Minimum {
            x,
            value: fx,
            iterations: self.max_iter,
            converged,
        }
    }
}

/// Two-loop recursion: approximates `-H^-1 grad` from the stored pairs.
fn two_loop(grad: &[f64], history: &VecDeque<(Vec<f64>, Vec<f64>, f64)>) -> Vec<f64> {
    let mut q: Vec<f64> = grad.iter().map(|g| -g).collect();
    let mut alphas = Vec::with_capacity(history.len());

    for (s, y, rho) in history.iter().rev() {
        let alpha = rho * dot(s, &q);
        axpy(-alpha, y, &mut q);
        alphas.push(alpha);
    }

    if let Some((s, y, _)) = history.back() {
        let gamma = dot(s, y) / dot(y, y);
        q.iter_mut().for_each(|v| *v *= gamma);
    }

    for ((s, y, rho), alpha) in history.iter().zip(alphas.into_iter().rev()) {
        let beta = rho * dot(y, &q);
        axpy(alpha - beta, s, &mut q);
    }
    q
}

fn max_abs(v: &[f64]) -> f64 {
    v.iter().fold(0.0, |m, x| m.max(x.abs()))
}

/// Dot product of two equal-length slices.
pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    let chunks_a = a.chunks_exact(4);
    let chunks_b = b.chunks_exact(4);
    let tail: f64 = chunks_a
        .remainder()
        .iter()
        .zip(chunks_b.remainder())
        .map(|(x, y)| x * y)
        .sum();

    let mut acc = f64x4::splat(0.0);
    for (ca, cb) in chunks_a.zip(chunks_b) {
        acc += f64x4::from([ca[0], ca[1], ca[2], ca[3]]) * f64x4::from([cb[0], cb[1], cb[2], cb[3]]);
    }
    acc.reduce_add() + tail
}

/// `y += alpha * x`
pub fn axpy(alpha: f64, x: &[f64], y: &mut [f64]) {
    debug_assert_eq!(x.len(), y.len());
    let scale = f64x4::splat(alpha);
    let mut chunks_y = y.chunks_exact_mut(4);
    let mut chunks_x = x.chunks_exact(4);
    for (cy, cx) in (&mut chunks_y).zip(&mut chunks_x) {
        let sum = f64x4::from([cy[0], cy[1], cy[2], cy[3]])
            + scale * f64x4::from([cx[0], cx[1], cx[2], cx[3]]);
        cy.copy_from_slice(&sum.to_array());
    }
    for (vy, vx) in chunks_y.into_remainder().iter_mut().zip(chunks_x.remainder()) {
        *vy += alpha * vx;
    }
}
