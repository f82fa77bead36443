use crate::pairs::StrategyError;
use log::warn;
use serde::Serialize;

/// Critical values for the ADF test with a constant term (large-sample).
pub const ADF_CRIT_1PCT: f64 = -3.43;
pub const ADF_CRIT_5PCT: f64 = -2.86;
pub const ADF_CRIT_10PCT: f64 = -2.57;

const EPS: f64 = 1e-12;

/// Sample mean and standard deviation (ddof = 1). None for an empty slice; a
/// single observation reports std 0.0.
pub fn mean_std(values: &[f64]) -> Option<(f64, f64)> {
    let n = values.len();
    if n == 0 {
        return None;
    }
    let mean = values.iter().sum::<f64>() / n as f64;
    if n == 1 {
        return Some((mean, 0.0));
    }
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
    Some((mean, var.sqrt()))
}

/// OLS slope of `a` regressed on `b`, normalized to a positive hedge ratio.
///
/// Returns 0.0 when the series are too short or `b` has no variance; a
/// negative slope is flipped to its magnitude since the spread construction
/// only needs the hedge size.
pub fn ols_beta(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    if n < 2 {
        return 0.0;
    }
    let mean_a = a[..n].iter().sum::<f64>() / n as f64;
    let mean_b = b[..n].iter().sum::<f64>() / n as f64;
    let mut cov = 0.0;
    let mut var_b = 0.0;
    for i in 0..n {
        let db = b[i] - mean_b;
        cov += (a[i] - mean_a) * db;
        var_b += db * db;
    }
    if var_b.abs() < EPS {
        return 0.0;
    }
    let beta = cov / var_b;
    if beta < 0.0 {
        warn!(
            "negative hedge ratio {:.4} from OLS, using magnitude",
            beta
        );
        return beta.abs();
    }
    beta
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct AdfResult {
    pub test_statistic: f64,
    pub p_value: f64,
    pub critical_value_1pct: f64,
    pub critical_value_5pct: f64,
    pub critical_value_10pct: f64,
}

/// Simplified Augmented Dickey-Fuller test with zero lags.
///
/// Regresses the first difference on a constant and the lagged level; the
/// t-statistic of the lag coefficient is bucketed against fixed critical
/// values rather than interpolated.
pub fn adf_test(series: &[f64]) -> Result<AdfResult, StrategyError> {
    if series.len() < 3 {
        return Err(StrategyError::InsufficientObservations {
            needed: 3,
            got: series.len(),
        });
    }

    let n = series.len() - 1;
    let y_lag: Vec<f64> = series[..n].to_vec();
    let dy: Vec<f64> = series.windows(2).map(|w| w[1] - w[0]).collect();

    let mean_lag = y_lag.iter().sum::<f64>() / n as f64;
    let mean_dy = dy.iter().sum::<f64>() / n as f64;
    let mut sxx = 0.0;
    let mut sxy = 0.0;
    for i in 0..n {
        let dx = y_lag[i] - mean_lag;
        sxx += dx * dx;
        sxy += dx * (dy[i] - mean_dy);
    }
    if sxx.abs() < EPS {
        return Err(StrategyError::DegenerateSeries);
    }

    let b = sxy / sxx;
    let a = mean_dy - b * mean_lag;

    let sse: f64 = (0..n)
        .map(|i| {
            let resid = dy[i] - a - b * y_lag[i];
            resid * resid
        })
        .sum();
    // two estimated parameters
    let dof = n as f64 - 2.0;
    let t_stat = if dof <= 0.0 {
        0.0
    } else {
        let se = (sse / dof / sxx).sqrt();
        if se < EPS {
            if b < 0.0 {
                f64::NEG_INFINITY
            } else {
                0.0
            }
        } else {
            b / se
        }
    };

    Ok(AdfResult {
        test_statistic: t_stat,
        p_value: bucket_p_value(t_stat),
        critical_value_1pct: ADF_CRIT_1PCT,
        critical_value_5pct: ADF_CRIT_5PCT,
        critical_value_10pct: ADF_CRIT_10PCT,
    })
}

fn bucket_p_value(t_stat: f64) -> f64 {
    if t_stat < ADF_CRIT_1PCT {
        0.01
    } else if t_stat < ADF_CRIT_5PCT {
        0.05
    } else if t_stat < ADF_CRIT_10PCT {
        0.10
    } else {
        0.50
    }
}
