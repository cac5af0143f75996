use ndarray::{Array1, Array2};
use poolcast_domain::repositories::regression::DesignMatrix;

pub(crate) fn design_arrays(design: &DesignMatrix) -> Result<(Array2<f64>, Array1<f64>), String> {
    let n = design.n_rows();
    let p = design.n_cols();
    let flat: Vec<f64> = design.x.iter().flatten().copied().collect();
    let x = Array2::from_shape_vec((n, p), flat)
        .map_err(|err| format!("design matrix is not {n}x{p}: {err}"))?;
    Ok((x, Array1::from_vec(design.y.clone())))
}

/// `X' diag(w) X`, or `X'X` without weights.
pub(crate) fn gram(x: &Array2<f64>, weights: Option<&Array1<f64>>) -> Array2<f64> {
    match weights {
        None => x.t().dot(x),
        Some(w) => {
            let mut xw = x.clone();
            for (mut row, wi) in xw.rows_mut().into_iter().zip(w.iter()) {
                row *= *wi;
            }
            x.t().dot(&xw)
        }
    }
}

pub(crate) fn cross(x: &Array2<f64>, y: &Array1<f64>, weights: Option<&Array1<f64>>) -> Array1<f64> {
    match weights {
        None => x.t().dot(y),
        Some(w) => x.t().dot(&(y * w)),
    }
}

/// Lower-triangular `L` with `A = L L'`.
pub(crate) fn cholesky(a: &Array2<f64>) -> Result<Array2<f64>, String> {
    let n = a.nrows();
    if a.ncols() != n {
        return Err(format!("cholesky needs a square matrix, got {}x{}", n, a.ncols()));
    }
    let mut l = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let mut sum = 0.0;
            for k in 0..j {
                sum += l[[i, k]] * l[[j, k]];
            }
            if i == j {
                let diag = a[[i, i]] - sum;
                if !(diag > 1e-12 * a[[i, i]].abs().max(1.0)) {
                    return Err("matrix is singular or not positive definite".to_string());
                }
                l[[i, j]] = diag.sqrt();
            } else {
                l[[i, j]] = (a[[i, j]] - sum) / l[[j, j]];
            }
        }
    }
    Ok(l)
}

/// Solves `L z = b`.
pub(crate) fn forward_substitute(l: &Array2<f64>, b: &Array1<f64>) -> Array1<f64> {
    let n = l.nrows();
    let mut z = Array1::<f64>::zeros(n);
    for i in 0..n {
        let mut sum = 0.0;
        for j in 0..i {
            sum += l[[i, j]] * z[j];
        }
        z[i] = (b[i] - sum) / l[[i, i]];
    }
    z
}

/// Solves `L' x = z`.
pub(crate) fn backward_substitute(l: &Array2<f64>, z: &Array1<f64>) -> Array1<f64> {
    let n = l.nrows();
    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let mut sum = 0.0;
        for j in (i + 1)..n {
            sum += l[[j, i]] * x[j];
        }
        x[i] = (z[i] - sum) / l[[i, i]];
    }
    x
}

pub(crate) fn cholesky_solve(l: &Array2<f64>, b: &Array1<f64>) -> Array1<f64> {
    backward_substitute(l, &forward_substitute(l, b))
}

pub(crate) fn inverse_from_cholesky(l: &Array2<f64>) -> Array2<f64> {
    let n = l.nrows();
    let mut inv = Array2::<f64>::zeros((n, n));
    for col in 0..n {
        let mut e = Array1::<f64>::zeros(n);
        e[col] = 1.0;
        let solved = cholesky_solve(l, &e);
        inv.column_mut(col).assign(&solved);
    }
    inv
}

pub(crate) fn to_rows(a: &Array2<f64>) -> Vec<Vec<f64>> {
    a.rows().into_iter().map(|row| row.to_vec()).collect()
}

pub(crate) fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        0.5 * (values[mid - 1] + values[mid])
    } else {
        values[mid]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn cholesky_round_trips_an_spd_matrix() {
        let a = array![[4.0, 2.0], [2.0, 3.0]];
        let l = cholesky(&a).unwrap();
        let back = l.dot(&l.t());
        assert!((&back - &a).iter().all(|v| v.abs() < 1e-12));

        let inv = inverse_from_cholesky(&l);
        let eye = a.dot(&inv);
        assert!((eye[[0, 0]] - 1.0).abs() < 1e-12 && eye[[0, 1]].abs() < 1e-12);
    }

    #[test]
    fn cholesky_rejects_singular_matrices() {
        assert!(cholesky(&array![[1.0, 1.0], [1.0, 1.0]]).is_err());
    }

    #[test]
    fn weighted_gram_scales_rows() {
        let x = array![[1.0, 2.0], [1.0, 3.0]];
        let w = array![2.0, 0.0];
        assert_eq!(gram(&x, Some(&w)), array![[2.0, 4.0], [4.0, 8.0]]);
    }

    #[test]
    fn median_handles_even_lengths() {
        assert_eq!(median(&mut [3.0, 1.0, 2.0, 10.0]), 2.5);
    }
}
