use super::levels::Levels;
use super::linalg::{backward_substitute, cholesky, cholesky_solve, cross, design_arrays, gram};
use ndarray::{Array1, Array2};
use poolcast_domain::repositories::regression::{DesignMatrix, Priors, SamplingBudget};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Gamma, StandardNormal};

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Noise {
    Gaussian,
    /// Student-t observation noise as a per-row precision mixture.
    StudentT { df: f64 },
}

pub(crate) struct GibbsSpec<'a> {
    pub design: &'a DesignMatrix,
    pub priors: &'a Priors,
    pub budget: &'a SamplingBudget,
    pub noise: Noise,
    pub effects: Vec<Levels>,
}

#[derive(Debug, Clone)]
pub(crate) struct Posterior {
    pub beta_mean: Vec<f64>,
    pub beta_cov: Vec<Vec<f64>>,
    pub sigma2_mean: f64,
    pub tau2_means: Vec<f64>,
    /// Posterior-mean random intercepts, one vector per effect, in the order given.
    pub effect_means: Vec<Vec<f64>>,
    /// Gelman-Rubin statistic per coefficient; `None` with a single chain.
    pub rhat: Vec<Option<f64>>,
    pub draws: usize,
}

struct ChainDraws {
    beta: Vec<Vec<f64>>,
    sigma2_sum: f64,
    tau2_sums: Vec<f64>,
    effect_sums: Vec<Vec<f64>>,
}

fn chain_seed(seed: u64, chain: usize) -> u64 {
    // splitmix64 finaliser
    let mut z = seed.wrapping_add((chain as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15));
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

fn draw_gamma(rng: &mut StdRng, shape: f64, rate: f64) -> Result<f64, String> {
    if !(shape > 0.0 && rate > 0.0 && rate.is_finite()) {
        return Err(format!("invalid gamma parameters shape={shape} rate={rate}"));
    }
    let gamma = Gamma::new(shape, 1.0 / rate).map_err(|err| format!("gamma: {err}"))?;
    Ok(gamma.sample(rng))
}

fn draw_inv_gamma(rng: &mut StdRng, shape: f64, rate: f64) -> Result<f64, String> {
    let g = draw_gamma(rng, shape, rate)?;
    if !(g > 0.0) {
        return Err("inverse-gamma draw underflowed".to_string());
    }
    Ok(1.0 / g)
}

fn standard_normal(rng: &mut StdRng) -> f64 {
    rng.sample(StandardNormal)
}

pub(crate) fn sample(spec: &GibbsSpec<'_>) -> Result<Posterior, String> {
    let budget = spec.budget;
    if budget.chains == 0 || budget.iterations == 0 {
        return Err("sampling budget needs at least one chain and one iteration".to_string());
    }
    let (x, y) = design_arrays(spec.design)?;
    for effect in &spec.effects {
        if effect.index.len() != y.len() {
            return Err("random-effect index does not cover every row".to_string());
        }
    }

    let chains = (0..budget.chains)
        .map(|chain| run_chain(spec, &x, &y, chain_seed(budget.seed, chain)))
        .collect::<Result<Vec<_>, String>>()?;

    Ok(summarize_chains(spec, chains))
}

fn run_chain(
    spec: &GibbsSpec<'_>,
    x: &Array2<f64>,
    y: &Array1<f64>,
    seed: u64,
) -> Result<ChainDraws, String> {
    let priors = spec.priors;
    let (n, p) = (x.nrows(), x.ncols());
    let mut rng = StdRng::seed_from_u64(seed);

    let y_mean = y.mean().unwrap_or(0.0);
    let y_var = y.iter().map(|v| (v - y_mean).powi(2)).sum::<f64>() / n.max(1) as f64;
    let mut sigma2 = y_var.max(1e-6);
    let mut omega = Array1::<f64>::ones(n);
    let mut lambda = 1.0;
    let mut effects: Vec<Vec<f64>> = spec.effects.iter().map(|e| vec![0.0; e.len()]).collect();
    let mut tau2: Vec<f64> = vec![sigma2; spec.effects.len()];

    let slope_precision = 1.0 / priors.slope_scale.powi(2);
    let intercept_precision = 1.0 / priors.intercept_scale.powi(2);
    let budget = spec.budget;
    let total = budget.warmup + budget.iterations;

    let mut draws = ChainDraws {
        beta: Vec::with_capacity(budget.iterations),
        sigma2_sum: 0.0,
        tau2_sums: vec![0.0; spec.effects.len()],
        effect_sums: effects.iter().map(|e| vec![0.0; e.len()]).collect(),
    };

    for step in 0..total {
        // coefficients | effects, noise
        let offsets = effect_offsets(spec, &effects, n, None);
        let target = y - &offsets;
        let weights = omega.mapv(|w| w / sigma2);
        let mut precision = gram(x, Some(&weights));
        precision[[0, 0]] += lambda * intercept_precision;
        for j in 1..p {
            precision[[j, j]] += slope_precision;
        }
        let l = cholesky(&precision).map_err(|err| format!("coefficient posterior: {err}"))?;
        let mean = cholesky_solve(&l, &cross(x, &target, Some(&weights)));
        let z = Array1::from_shape_fn(p, |_| standard_normal(&mut rng));
        let beta = mean + backward_substitute(&l, &z);
        let fitted = x.dot(&beta);

        // random intercepts | coefficients, other effects
        for (k, levels) in spec.effects.iter().enumerate() {
            let others = effect_offsets(spec, &effects, n, Some(k));
            let mut weight_sum = vec![0.0; levels.len()];
            let mut resid_sum = vec![0.0; levels.len()];
            for i in 0..n {
                let level = levels.index[i];
                weight_sum[level] += omega[i];
                resid_sum[level] += omega[i] * (y[i] - fitted[i] - others[i]);
            }
            for level in 0..levels.len() {
                let prec = weight_sum[level] / sigma2 + 1.0 / tau2[k];
                let m = (resid_sum[level] / sigma2) / prec;
                effects[k][level] = m + standard_normal(&mut rng) / prec.sqrt();
            }
            let ss: f64 = effects[k].iter().map(|u| u * u).sum();
            tau2[k] = draw_inv_gamma(
                &mut rng,
                priors.variance_shape + 0.5 * levels.len() as f64,
                priors.variance_rate + 0.5 * ss,
            )?;
        }

        // noise variance and observation weights
        let offsets = effect_offsets(spec, &effects, n, None);
        let residuals = y - &fitted - &offsets;
        let weighted_ss: f64 = residuals
            .iter()
            .zip(omega.iter())
            .map(|(e, w)| w * e * e)
            .sum();
        sigma2 = draw_inv_gamma(
            &mut rng,
            priors.variance_shape + 0.5 * n as f64,
            priors.variance_rate + 0.5 * weighted_ss,
        )?;
        if let Noise::StudentT { df } = spec.noise {
            for i in 0..n {
                omega[i] = draw_gamma(
                    &mut rng,
                    0.5 * (df + 1.0),
                    0.5 * (df + residuals[i] * residuals[i] / sigma2),
                )?;
            }
        }

        // intercept prior scale mixture
        lambda = draw_gamma(
            &mut rng,
            0.5 * (priors.intercept_df + 1.0),
            0.5 * (priors.intercept_df + beta[0] * beta[0] * intercept_precision),
        )?;

        if step >= budget.warmup {
            draws.beta.push(beta.to_vec());
            draws.sigma2_sum += sigma2;
            for (k, effect) in effects.iter().enumerate() {
                draws.tau2_sums[k] += tau2[k];
                for (sum, u) in draws.effect_sums[k].iter_mut().zip(effect) {
                    *sum += u;
                }
            }
        }
    }

    Ok(draws)
}

fn effect_offsets(spec: &GibbsSpec<'_>, effects: &[Vec<f64>], n: usize, skip: Option<usize>) -> Array1<f64> {
    let mut offsets = Array1::<f64>::zeros(n);
    for (k, levels) in spec.effects.iter().enumerate() {
        if skip == Some(k) {
            continue;
        }
        for i in 0..n {
            offsets[i] += effects[k][levels.index[i]];
        }
    }
    offsets
}

fn summarize_chains(spec: &GibbsSpec<'_>, chains: Vec<ChainDraws>) -> Posterior {
    let p = spec.design.n_cols();
    let all: Vec<&Vec<f64>> = chains.iter().flat_map(|c| c.beta.iter()).collect();
    let total = all.len().max(1) as f64;

    let mut beta_mean = vec![0.0; p];
    for draw in &all {
        for j in 0..p {
            beta_mean[j] += draw[j] / total;
        }
    }
    let mut beta_cov = vec![vec![0.0; p]; p];
    if all.len() > 1 {
        let denom = (all.len() - 1) as f64;
        for draw in &all {
            for i in 0..p {
                for j in 0..p {
                    beta_cov[i][j] += (draw[i] - beta_mean[i]) * (draw[j] - beta_mean[j]) / denom;
                }
            }
        }
    }

    let sigma2_mean = chains.iter().map(|c| c.sigma2_sum).sum::<f64>() / total;
    let tau2_means = (0..spec.effects.len())
        .map(|k| chains.iter().map(|c| c.tau2_sums[k]).sum::<f64>() / total)
        .collect();
    let effect_means = spec
        .effects
        .iter()
        .enumerate()
        .map(|(k, levels)| {
            (0..levels.len())
                .map(|level| chains.iter().map(|c| c.effect_sums[k][level]).sum::<f64>() / total)
                .collect()
        })
        .collect();
    let rhat = (0..p).map(|j| gelman_rubin(&chains, j)).collect();

    Posterior {
        beta_mean,
        beta_cov,
        sigma2_mean,
        tau2_means,
        effect_means,
        rhat,
        draws: all.len(),
    }
}

fn gelman_rubin(chains: &[ChainDraws], param: usize) -> Option<f64> {
    let m = chains.len();
    let n = chains.iter().map(|c| c.beta.len()).min()?;
    if m < 2 || n < 2 {
        return None;
    }
    let mut means = Vec::with_capacity(m);
    let mut within = 0.0;
    for chain in chains {
        let values: Vec<f64> = chain.beta[..n].iter().map(|d| d[param]).collect();
        let mean = values.iter().sum::<f64>() / n as f64;
        within += values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
        means.push(mean);
    }
    within /= m as f64;
    if !(within > 0.0) {
        return None;
    }
    let grand = means.iter().sum::<f64>() / m as f64;
    let between_over_n = means.iter().map(|v| (v - grand).powi(2)).sum::<f64>() / (m - 1) as f64;
    let pooled = (n as f64 - 1.0) / n as f64 * within + between_over_n;
    let rhat = (pooled / within).sqrt();
    rhat.is_finite().then_some(rhat)
}
