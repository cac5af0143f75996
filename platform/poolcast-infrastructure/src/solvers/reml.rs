use super::levels::Levels;
use super::linalg::{cholesky, cholesky_solve, design_arrays, inverse_from_cholesky};
use ndarray::{s, Array1, Array2};
use poolcast_domain::repositories::regression::{DesignMatrix, MixedEffectsOptions};

const VARIANCE_FLOOR: f64 = 1e-10;

#[derive(Debug, Clone)]
pub(crate) struct RemlFit {
    pub beta: Vec<f64>,
    pub beta_cov: Array2<f64>,
    pub group_effects: Vec<f64>,
    pub entity_effects: Vec<f64>,
    pub sigma2: f64,
    pub tau2_group: f64,
    pub tau2_entity: f64,
    pub iterations: usize,
    pub converged: bool,
}

struct MmeSolution {
    solution: Array1<f64>,
    inverse: Array2<f64>,
    rhs: Array1<f64>,
}

/// Two nested random intercepts fitted by EM-REML on Henderson's mixed-model equations.
pub(crate) fn fit(
    design: &DesignMatrix,
    groups: &Levels,
    entities: &Levels,
    options: &MixedEffectsOptions,
) -> Result<RemlFit, String> {
    let (x, y) = design_arrays(design)?;
    let (n, p) = (x.nrows(), x.ncols());
    if n <= p {
        return Err(format!("need more rows than fixed effects (rows={n}, fixed={p})"));
    }
    let (qg, qe) = (groups.len(), entities.len());

    let y_mean = y.mean().unwrap_or(0.0);
    let y_var = (y.iter().map(|v| (v - y_mean).powi(2)).sum::<f64>() / n as f64).max(VARIANCE_FLOOR);
    let mut sigma2 = 0.5 * y_var;
    let mut tau2_group = 0.25 * y_var;
    let mut tau2_entity = 0.25 * y_var;
    let yty = y.dot(&y);

    let mut iterations = 0;
    let mut converged = false;
    while iterations < options.max_iter {
        iterations += 1;
        let mme = solve_mme(&x, &y, groups, entities, sigma2, tau2_group, tau2_entity)?;
        let ug = mme.solution.slice(s![p..p + qg]);
        let ue = mme.solution.slice(s![p + qg..]);
        let trace_g: f64 = (p..p + qg).map(|i| mme.inverse[[i, i]]).sum();
        let trace_e: f64 = (p + qg..p + qg + qe).map(|i| mme.inverse[[i, i]]).sum();

        let next_tau_g = ((ug.dot(&ug) + sigma2 * trace_g) / qg as f64).max(VARIANCE_FLOOR);
        let next_tau_e = ((ue.dot(&ue) + sigma2 * trace_e) / qe as f64).max(VARIANCE_FLOOR);
        let next_sigma2 = ((yty - mme.solution.dot(&mme.rhs)) / (n - p) as f64).max(VARIANCE_FLOOR);

        let change = [
            (next_sigma2, sigma2),
            (next_tau_g, tau2_group),
            (next_tau_e, tau2_entity),
        ]
        .iter()
        .map(|(new, old)| (new - old).abs() / old.max(VARIANCE_FLOOR))
        .fold(0.0f64, f64::max);

        sigma2 = next_sigma2;
        tau2_group = next_tau_g;
        tau2_entity = next_tau_e;
        if change < options.tolerance {
            converged = true;
            break;
        }
    }

    let mme = solve_mme(&x, &y, groups, entities, sigma2, tau2_group, tau2_entity)?;
    let beta_cov = mme.inverse.slice(s![..p, ..p]).to_owned() * sigma2;
    Ok(RemlFit {
        beta: mme.solution.slice(s![..p]).to_vec(),
        beta_cov,
        group_effects: mme.solution.slice(s![p..p + qg]).to_vec(),
        entity_effects: mme.solution.slice(s![p + qg..]).to_vec(),
        sigma2,
        tau2_group,
        tau2_entity,
        iterations,
        converged,
    })
}

/// `[X'X X'Z; Z'X Z'Z + sigma2 G^-1] [b; u] = [X'y; Z'y]` with `Z = [Z_group | Z_entity]`.
fn solve_mme(
    x: &Array2<f64>,
    y: &Array1<f64>,
    groups: &Levels,
    entities: &Levels,
    sigma2: f64,
    tau2_group: f64,
    tau2_entity: f64,
) -> Result<MmeSolution, String> {
    let (n, p) = (x.nrows(), x.ncols());
    let (qg, qe) = (groups.len(), entities.len());
    let m = p + qg + qe;
    let mut c = Array2::<f64>::zeros((m, m));
    let mut rhs = Array1::<f64>::zeros(m);

    c.slice_mut(s![..p, ..p]).assign(&x.t().dot(x));
    rhs.slice_mut(s![..p]).assign(&x.t().dot(y));
    for i in 0..n {
        let g = p + groups.index[i];
        let e = p + qg + entities.index[i];
        for j in 0..p {
            c[[j, g]] += x[[i, j]];
            c[[j, e]] += x[[i, j]];
        }
        c[[g, g]] += 1.0;
        c[[e, e]] += 1.0;
        c[[g, e]] += 1.0;
        rhs[g] += y[i];
        rhs[e] += y[i];
    }
    for i in 0..m {
        for j in 0..i {
            c[[i, j]] = c[[j, i]];
        }
    }
    for k in 0..qg {
        c[[p + k, p + k]] += sigma2 / tau2_group;
    }
    for k in 0..qe {
        c[[p + qg + k, p + qg + k]] += sigma2 / tau2_entity;
    }

    let l = cholesky(&c).map_err(|err| format!("mixed-model equations: {err}"))?;
    Ok(MmeSolution {
        solution: cholesky_solve(&l, &rhs),
        inverse: inverse_from_cholesky(&l),
        rhs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use poolcast_domain::value_objects::artifact::INTERCEPT;

    fn design() -> DesignMatrix {
        let mut x = Vec::new();
        let mut y = Vec::new();
        let mut entity_ids = Vec::new();
        let mut groups = Vec::new();
        let entity_shift = [("A", "G1", 2.0), ("B", "G1", 1.0), ("C", "G2", -1.0), ("D", "G2", -2.0)];
        for (k, (entity, group, shift)) in entity_shift.iter().enumerate() {
            for t in 0..25 {
                let xi = ((t * 3 + k) as f64 * 0.41).cos();
                x.push(vec![1.0, xi]);
                y.push(10.0 + 1.5 * xi + shift + 0.05 * ((t % 5) as f64 - 2.0));
                entity_ids.push(entity.to_string());
                groups.push(group.to_string());
            }
        }
        DesignMatrix {
            coefficient_names: vec![INTERCEPT.to_string(), "x".to_string()],
            x,
            y,
            entity_ids,
            groups,
            dropped_rows: 0,
        }
    }

    #[test]
    fn reml_recovers_fixed_slope_and_orders_random_effects() {
        let d = design();
        let groups = Levels::groups(&d);
        let entities = Levels::nested_entities(&d);
        let fit = fit(&d, &groups, &entities, &MixedEffectsOptions::default()).unwrap();

        assert!((fit.beta[1] - 1.5).abs() < 0.05);
        assert!(fit.iterations <= MixedEffectsOptions::default().max_iter);
        assert!(fit.beta_cov[[1, 1]] > 0.0);
        let total: Vec<f64> = (0..4)
            .map(|k| {
                let g = if k < 2 { 0 } else { 1 };
                fit.group_effects[g] + fit.entity_effects[k]
            })
            .collect();
        assert!(total[0] > total[1] && total[1] > total[2] && total[2] > total[3]);
    }

    #[test]
    fn iteration_cap_is_respected() {
        let d = design();
        let options = MixedEffectsOptions {
            max_iter: 2,
            tolerance: 0.0,
        };
        let fit = fit(&d, &Levels::groups(&d), &Levels::nested_entities(&d), &options).unwrap();
        assert_eq!(fit.iterations, 2);
        assert!(!fit.converged);
    }
}
