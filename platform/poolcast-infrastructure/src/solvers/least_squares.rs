use super::linalg::{
    cholesky, cholesky_solve, cross, design_arrays, gram, inverse_from_cholesky, median, to_rows,
};
use ndarray::{Array1, Array2};
use poolcast_domain::repositories::regression::{DesignMatrix, RobustOptions};
use poolcast_domain::value_objects::artifact::{CoefficientTable, LinearFit};
use serde_json::json;

const GLM_MAX_ITER: usize = 25;
const GLM_TOLERANCE: f64 = 1e-10;
/// Consistency constant turning a MAD into a normal-theory scale.
const MAD_SCALE: f64 = 0.6745;

struct WeightedSolution {
    beta: Array1<f64>,
    xtwx_inv: Array2<f64>,
}

fn weighted_solve(
    x: &Array2<f64>,
    y: &Array1<f64>,
    weights: Option<&Array1<f64>>,
) -> Result<WeightedSolution, String> {
    let l = cholesky(&gram(x, weights)).map_err(|err| format!("normal equations: {err}"))?;
    let beta = cholesky_solve(&l, &cross(x, y, weights));
    Ok(WeightedSolution {
        beta,
        xtwx_inv: inverse_from_cholesky(&l),
    })
}

fn require_dof(design: &DesignMatrix) -> Result<usize, String> {
    let (n, p) = (design.n_rows(), design.n_cols());
    if n <= p {
        return Err(format!("need more rows than coefficients (rows={n}, coefficients={p})"));
    }
    Ok(n - p)
}

fn table(design: &DesignMatrix, beta: &Array1<f64>, covariance: Array2<f64>) -> Result<CoefficientTable, String> {
    CoefficientTable::new(
        design.coefficient_names.clone(),
        beta.to_vec(),
        to_rows(&covariance),
        design.n_rows(),
    )
}

/// Ordinary least squares through the normal equations.
pub fn ols(design: &DesignMatrix) -> Result<LinearFit, String> {
    let dof = require_dof(design)?;
    let (x, y) = design_arrays(design)?;
    let solution = weighted_solve(&x, &y, None)?;
    let residuals = &y - &x.dot(&solution.beta);
    let rss = residuals.dot(&residuals);
    let sigma2 = rss / dof as f64;
    let mean_y = y.mean().unwrap_or(0.0);
    let tss: f64 = y.iter().map(|v| (v - mean_y).powi(2)).sum();

    Ok(LinearFit {
        coefficients: table(design, &solution.beta, solution.xtwx_inv * sigma2)?,
        diagnostics: json!({
            "rss": rss,
            "sigma": sigma2.sqrt(),
            "r_squared": if tss > 0.0 { Some(1.0 - rss / tss) } else { None },
            "dof": dof,
            "dropped_rows": design.dropped_rows,
        }),
    })
}

/// Huber M-estimation by iteratively reweighted least squares with a MAD scale.
pub fn robust(design: &DesignMatrix, options: &RobustOptions) -> Result<LinearFit, String> {
    let dof = require_dof(design)?;
    let (x, y) = design_arrays(design)?;
    let n = y.len();

    let mut solution = weighted_solve(&x, &y, None)?;
    let mut weights = Array1::<f64>::ones(n);
    let mut scale = 0.0;
    let mut iterations = 0;
    let mut converged = false;

    while iterations < options.max_iter {
        iterations += 1;
        let residuals = &y - &x.dot(&solution.beta);
        let mut abs_dev: Vec<f64> = {
            let mut r = residuals.to_vec();
            let center = median(&mut r);
            residuals.iter().map(|v| (v - center).abs()).collect()
        };
        scale = median(&mut abs_dev) / MAD_SCALE;
        if !(scale > 0.0) {
            converged = true;
            break;
        }
        weights = residuals.mapv(|r| {
            let u = (r / scale).abs();
            if u <= options.tuning {
                1.0
            } else {
                options.tuning / u
            }
        });
        let next = weighted_solve(&x, &y, Some(&weights))?;
        let shift = (&next.beta - &solution.beta)
            .iter()
            .fold(0.0f64, |acc, v| acc.max(v.abs()));
        let size = next.beta.iter().fold(1.0f64, |acc, v| acc.max(v.abs()));
        solution = next;
        if shift <= options.tolerance * size {
            converged = true;
            break;
        }
    }

    let residuals = &y - &x.dot(&solution.beta);
    let weighted_rss: f64 = residuals
        .iter()
        .zip(weights.iter())
        .map(|(r, w)| w * r * r)
        .sum();
    let sigma2 = weighted_rss / dof as f64;
    let downweighted = weights.iter().filter(|w| **w < 1.0).count();

    Ok(LinearFit {
        coefficients: table(design, &solution.beta, solution.xtwx_inv * sigma2)?,
        diagnostics: json!({
            "norm": "huber",
            "tuning": options.tuning,
            "scale": scale,
            "iterations": iterations,
            "converged": converged,
            "downweighted_rows": downweighted,
            "dropped_rows": design.dropped_rows,
        }),
    })
}

/// Gaussian-family GLM with identity link, fitted by IRLS.
pub fn glm_gaussian(design: &DesignMatrix) -> Result<LinearFit, String> {
    let dof = require_dof(design)?;
    let (x, y) = design_arrays(design)?;
    let n = y.len() as f64;

    // Identity link: working response is y and working weights are 1 on every pass.
    let weights = Array1::<f64>::ones(y.len());
    let mut solution = weighted_solve(&x, &y, Some(&weights))?;
    let mut deviance = f64::INFINITY;
    let mut iterations = 0;
    let mut converged = false;
    while iterations < GLM_MAX_ITER {
        iterations += 1;
        let mu = x.dot(&solution.beta);
        let residuals = &y - &mu;
        let next_deviance = residuals.dot(&residuals);
        if (deviance - next_deviance).abs() <= GLM_TOLERANCE * (next_deviance.abs() + 0.1) {
            deviance = next_deviance;
            converged = true;
            break;
        }
        deviance = next_deviance;
        // z = eta + (y - mu) * g'(mu), with g'(mu) = 1
        let working = &mu + &residuals;
        solution = weighted_solve(&x, &working, Some(&weights))?;
    }

    let dispersion = deviance / dof as f64;
    let p = design.n_cols() as f64;
    let log_likelihood = -0.5 * n * ((2.0 * std::f64::consts::PI * deviance / n).ln() + 1.0);
    let aic = -2.0 * log_likelihood + 2.0 * (p + 1.0);

    Ok(LinearFit {
        coefficients: table(design, &solution.beta, solution.xtwx_inv * dispersion)?,
        diagnostics: json!({
            "family": "gaussian",
            "link": "identity",
            "deviance": deviance,
            "dispersion": dispersion,
            "aic": aic,
            "iterations": iterations,
            "converged": converged,
            "dropped_rows": design.dropped_rows,
        }),
    })
}
