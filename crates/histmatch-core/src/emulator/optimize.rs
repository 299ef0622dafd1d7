//! Derivative-free minimization (Nelder–Mead downhill simplex).

/// Settings for [`nelder_mead`].
#[derive(Debug, Clone, Copy)]
pub struct SimplexOptions {
    /// Offset of each initial vertex from the start point along one axis.
    pub initial_step: f64,
    pub max_iterations: usize,
    /// Converged once the spread of vertex values falls below
    /// `tolerance * (1 + |best|)`.
    pub tolerance: f64,
}

impl Default for SimplexOptions {
    fn default() -> Self {
        Self {
            initial_step: 0.5,
            max_iterations: 2000,
            tolerance: 1e-10,
        }
    }
}

/// Best point found by the optimizer.
#[derive(Debug, Clone)]
pub struct Minimum {
    pub x: Vec<f64>,
    pub value: f64,
    pub iterations: usize,
    pub converged: bool,
}

const REFLECT: f64 = 1.0;
const EXPAND: f64 = 2.0;
const CONTRACT: f64 = 0.5;
const SHRINK: f64 = 0.5;

/// Minimize `f` starting from `x0`.
///
/// `f` may return `f64::INFINITY` to mark infeasible points; NaN is treated
/// the same way.
pub fn nelder_mead<F>(mut f: F, x0: &[f64], options: SimplexOptions) -> Minimum
where
    F: FnMut(&[f64]) -> f64,
{
    let mut eval = |x: &[f64]| {
        let v = f(x);
        if v.is_nan() { f64::INFINITY } else { v }
    };

    let n = x0.len();
    let mut simplex: Vec<Vec<f64>> = Vec::with_capacity(n + 1);
    simplex.push(x0.to_vec());
    for i in 0..n {
        let mut x = x0.to_vec();
        x[i] += options.initial_step;
        simplex.push(x);
    }
    let mut values: Vec<f64> = simplex.iter().map(|x| eval(x)).collect();

    let mut iterations = 0;
    let mut converged = false;

    while iterations < options.max_iterations {
        let mut order: Vec<usize> = (0..=n).collect();
        order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
        simplex = order.iter().map(|&i| simplex[i].clone()).collect();
        values = order.iter().map(|&i| values[i]).collect();

        let best = values[0];
        let worst = values[n];
        if best.is_finite() && worst - best <= options.tolerance * (1.0 + best.abs()) {
            converged = true;
            break;
        }
        iterations += 1;

        let centroid: Vec<f64> = (0..n)
            .map(|d| simplex[..n].iter().map(|x| x[d]).sum::<f64>() / n as f64)
            .collect();
        let towards = |from: &[f64], coeff: f64| -> Vec<f64> {
            centroid
                .iter()
                .zip(from)
                .map(|(&c, &x)| c + coeff * (x - c))
                .collect()
        };

        let reflected = towards(&simplex[n], -REFLECT);
        let f_reflected = eval(&reflected);

        if f_reflected < values[0] {
            let expanded = towards(&reflected, EXPAND);
            let f_expanded = eval(&expanded);
            if f_expanded < f_reflected {
                simplex[n] = expanded;
                values[n] = f_expanded;
            } else {
                simplex[n] = reflected;
                values[n] = f_reflected;
            }
            continue;
        }

        if f_reflected < values[n - 1] {
            simplex[n] = reflected;
            values[n] = f_reflected;
            continue;
        }

        let (contracted, bound) = if f_reflected < values[n] {
            (towards(&reflected, CONTRACT), f_reflected)
        } else {
            (towards(&simplex[n], CONTRACT), values[n])
        };
        let f_contracted = eval(&contracted);
        if f_contracted < bound {
            simplex[n] = contracted;
            values[n] = f_contracted;
            continue;
        }

        let anchor = simplex[0].clone();
        for i in 1..=n {
            for (x, &a) in simplex[i].iter_mut().zip(&anchor) {
                *x = a + SHRINK * (*x - a);
            }
            values[i] = eval(&simplex[i]);
        }
    }

    let best = (0..=n)
        .min_by(|&a, &b| values[a].total_cmp(&values[b]))
        .unwrap_or(0);
    Minimum {
        x: simplex[best].clone(),
        value: values[best],
        iterations,
        converged,
    }
}
