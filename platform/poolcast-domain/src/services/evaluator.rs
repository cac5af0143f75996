use crate::entities::evaluation::EvaluationResult;
use crate::services::stats::{mean, sample_std, sign};

/// Regression and directional metrics over the pairs where both sides are present.
pub fn evaluate(predictions: Option<&[Option<f64>]>, actuals: &[Option<f64>]) -> EvaluationResult {
    let Some(predictions) = predictions else {
        return EvaluationResult::undefined();
    };
    let (pred, act): (Vec<f64>, Vec<f64>) = predictions
        .iter()
        .zip(actuals)
        .filter_map(|(p, a)| match (p, a) {
            (Some(p), Some(a)) if p.is_finite() && a.is_finite() => Some((*p, *a)),
            _ => None,
        })
        .unzip();
    let n = pred.len();
    if n == 0 {
        return EvaluationResult::undefined();
    }

    let errors: Vec<f64> = pred.iter().zip(&act).map(|(p, a)| p - a).collect();
    let sse: f64 = errors.iter().map(|e| e * e).sum();
    let rmse = (sse / n as f64).sqrt();
    let mae = errors.iter().map(|e| e.abs()).sum::<f64>() / n as f64;

    EvaluationResult {
        rmse: Some(rmse).filter(|v| v.is_finite()),
        mae: Some(mae).filter(|v| v.is_finite()),
        r2: r_squared(sse, &act),
        mape: mape(&pred, &act),
        directional_accuracy: directional_accuracy(&pred, &act),
        information_ratio: information_ratio(&pred, &act),
        n_predictions: Some(n),
    }
}

fn r_squared(sse: f64, actuals: &[f64]) -> Option<f64> {
    let m = mean(actuals)?;
    let sst: f64 = actuals.iter().map(|a| (a - m).powi(2)).sum();
    if sst == 0.0 {
        return None;
    }
    let r2 = 1.0 - sse / sst;
    r2.is_finite().then_some(r2)
}

fn mape(pred: &[f64], act: &[f64]) -> Option<f64> {
    let ratios: Vec<f64> = pred
        .iter()
        .zip(act)
        .filter(|(_, a)| **a != 0.0)
        .map(|(p, a)| (p - a).abs() / a.abs())
        .collect();
    mean(&ratios).map(|m| m * 100.0)
}

fn directional_accuracy(pred: &[f64], act: &[f64]) -> Option<f64> {
    if pred.len() < 2 {
        return None;
    }
    let steps = pred.len() - 1;
    let matches = (1..pred.len())
        .filter(|&t| sign(act[t] - act[t - 1]) == sign(pred[t] - pred[t - 1]))
        .count();
    Some(matches as f64 / steps as f64)
}

fn information_ratio(pred: &[f64], act: &[f64]) -> Option<f64> {
    let relative: Vec<f64> = pred
        .iter()
        .zip(act)
        .filter(|(_, a)| **a != 0.0)
        .map(|(p, a)| (p - a) / a.abs())
        .collect();
    let std = sample_std(&relative)?;
    if std == 0.0 {
        return None;
    }
    let ir = mean(&relative)? / std;
    ir.is_finite().then_some(ir)
}
