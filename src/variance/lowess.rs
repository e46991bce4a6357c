//! Robust locally weighted scatterplot smoothing and the interpolated trend
//! curves built on it

use crate::error::{Result, VoomError};
use crate::stats::median;

/// Smoother settings
#[derive(Debug, Clone, Copy)]
pub struct LowessParams {
    /// Fraction of points in each local neighbourhood
    pub span: f64,
    /// Robustifying iterations after the initial fit
    pub iterations: usize,
    /// Points closer than `delta_fraction * range(x)` reuse interpolation
    pub delta_fraction: f64,
}

impl Default for LowessParams {
    fn default() -> Self {
        Self {
            span: 0.5,
            iterations: 3,
            delta_fraction: 0.01,
        }
    }
}

/// Lowess fit of `y` on `x`.
///
/// `x` must be sorted ascending. Returns the smoothed value at every `x`.
pub fn lowess(x: &[f64], y: &[f64], span: f64, iterations: usize, delta: f64) -> Vec<f64> {
    let n = x.len();
    if n == 0 {
        return Vec::new();
    }
    if n == 1 {
        return vec![y[0]];
    }

    // Neighbourhood size is truncated, not rounded
    let ns = ((span * n as f64 + 1e-7).floor() as usize).clamp(2, n);
    let range = x[n - 1] - x[0];
    let mut robustness = vec![1.0; n];
    let mut fitted = vec![0.0; n];
    let mut residuals = vec![0.0; n];

    for iter in 0..=iterations {
        let mut nleft = 0;
        let mut nright = ns - 1;
        let mut last: Option<usize> = None;
        let mut i = 0;

        loop {
            // Slide the neighbourhood window towards x[i]
            while nright < n - 1 && x[i] - x[nleft] > x[nright + 1] - x[i] {
                nleft += 1;
                nright += 1;
            }

            fitted[i] = local_fit(x, y, i, nleft, nright, &robustness, range).unwrap_or(y[i]);

            if let Some(prev) = last {
                if prev + 1 < i {
                    let denom = x[i] - x[prev];
                    for j in (prev + 1)..i {
                        let alpha = (x[j] - x[prev]) / denom;
                        fitted[j] = alpha * fitted[i] + (1.0 - alpha) * fitted[prev];
                    }
                }
            }

            let mut prev = i;
            let cut = x[prev] + delta;
            let mut next = prev + 1;
            while next < n {
                if x[next] > cut {
                    break;
                }
                if x[next] == x[prev] {
                    fitted[next] = fitted[prev];
                    prev = next;
                }
                next += 1;
            }
            last = Some(prev);
            if prev >= n - 1 {
                break;
            }
            i = (prev + 1).max(next - 1);
        }

        for j in 0..n {
            residuals[j] = y[j] - fitted[j];
        }
        if iter == iterations {
            break;
        }

        let abs_res: Vec<f64> = residuals.iter().map(|r| r.abs()).collect();
        let scale = abs_res.iter().sum::<f64>() / n as f64;
        let cmad = 6.0 * median(&abs_res);
        if cmad < 1e-7 * scale || cmad == 0.0 {
            break;
        }
        let (c9, c1) = (0.999 * cmad, 0.001 * cmad);
        for (w, &r) in robustness.iter_mut().zip(&abs_res) {
            *w = if r <= c1 {
                1.0
            } else if r > c9 {
                0.0
            } else {
                let u = r / cmad;
                (1.0 - u * u).powi(2)
            };
        }
    }

    fitted
}

/// Tricube-weighted local linear fit at `x[i]` over `x[nleft..=nright]`
fn local_fit(
    x: &[f64],
    y: &[f64],
    i: usize,
    nleft: usize,
    nright: usize,
    robustness: &[f64],
    range: f64,
) -> Option<f64> {
    let n = x.len();
    let xs = x[i];
    let h = (xs - x[nleft]).max(x[nright] - xs);
    let h9 = 0.999 * h;
    let h1 = 0.001 * h;

    let mut weights = vec![0.0; n];
    let mut total = 0.0;
    let mut j = nleft;
    let mut nrt = nleft;
    while j < n {
        let r = (x[j] - xs).abs();
        if r <= h9 {
            let w = if r <= h1 {
                1.0
            } else {
                let q = r / h;
                (1.0 - q * q * q).powi(3)
            };
            weights[j] = w * robustness[j];
            total += weights[j];
        } else if x[j] > xs {
            break;
        }
        nrt = j;
        j += 1;
    }

    if total <= 0.0 {
        return None;
    }
    for w in &mut weights[nleft..=nrt] {
        *w /= total;
    }

    if h > 0.0 {
        let a: f64 = (nleft..=nrt).map(|j| weights[j] * x[j]).sum();
        let mut b = xs - a;
        let c: f64 = (nleft..=nrt).map(|j| weights[j] * (x[j] - a).powi(2)).sum();
        if c.sqrt() > 0.001 * range {
            b /= c;
            for j in nleft..=nrt {
                weights[j] *= b * (x[j] - a) + 1.0;
            }
        }
    }

    Some((nleft..=nrt).map(|j| weights[j] * y[j]).sum())
}

/// Smoothed trend with linear interpolation between fitted points and
/// constant extrapolation beyond the ends
#[derive(Debug, Clone)]
pub struct TrendCurve {
    x: Vec<f64>,
    y: Vec<f64>,
}

impl TrendCurve {
    /// Fit a lowess trend through unordered `(x, y)` points
    pub fn fit(x: &[f64], y: &[f64], params: &LowessParams) -> Result<Self> {
        if x.len() != y.len() {
            return Err(VoomError::DimensionMismatch {
                expected: format!("{} trend responses", x.len()),
                got: format!("{}", y.len()),
            });
        }

        let mut points: Vec<(f64, f64)> = x
            .iter()
            .zip(y)
            .filter(|(a, b)| a.is_finite() && b.is_finite())
            .map(|(&a, &b)| (a, b))
            .collect();
        if points.len() < 2 {
            return Err(VoomError::degenerate(
                "trend fit",
                format!("{} finite points, need at least 2", points.len()),
            ));
        }
        points.sort_by(|a, b| a.0.total_cmp(&b.0));

        let xs: Vec<f64> = points.iter().map(|p| p.0).collect();
        let ys: Vec<f64> = points.iter().map(|p| p.1).collect();
        let delta = params.delta_fraction * (xs[xs.len() - 1] - xs[0]);
        let smoothed = lowess(&xs, &ys, params.span, params.iterations, delta);

        // Tied x positions collapse to the mean fitted value
        let mut curve_x: Vec<f64> = Vec::with_capacity(xs.len());
        let mut curve_y: Vec<f64> = Vec::with_capacity(xs.len());
        let mut start = 0;
        while start < xs.len() {
            let mut end = start + 1;
            while end < xs.len() && xs[end] == xs[start] {
                end += 1;
            }
            curve_x.push(xs[start]);
            curve_y.push(smoothed[start..end].iter().sum::<f64>() / (end - start) as f64);
            start = end;
        }

        log::debug!(
            "Trend fitted through {} points ({} distinct x), span {}, {} iterations",
            xs.len(),
            curve_x.len(),
            params.span,
            params.iterations
        );
        Ok(Self { x: curve_x, y: curve_y })
    }

    pub fn x(&self) -> &[f64] {
        &self.x
    }

    pub fn y(&self) -> &[f64] {
        &self.y
    }

    /// Value of the trend at `at`
    pub fn predict(&self, at: f64) -> f64 {
        let n = self.x.len();
        if at.is_nan() {
            return f64::NAN;
        }
        if at <= self.x[0] {
            return self.y[0];
        }
        if at >= self.x[n - 1] {
            return self.y[n - 1];
        }
        // First index with x > at; at least 1 and at most n - 1 here
        let hi = self.x.partition_point(|&v| v <= at);
        let lo = hi - 1;
        let t = (at - self.x[lo]) / (self.x[hi] - self.x[lo]);
        self.y[lo] + t * (self.y[hi] - self.y[lo])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lowess_reproduces_line() {
        let x: Vec<f64> = (0..50).map(|i| i as f64 / 5.0).collect();
        let y: Vec<f64> = x.iter().map(|v| 2.0 - 0.3 * v).collect();
        let fit = lowess(&x, &y, 0.5, 3, 0.0);
        for (f, t) in fit.iter().zip(&y) {
            assert!((f - t).abs() < 1e-10);
        }
    }

    #[test]
    fn test_lowess_resists_outlier() {
        let x: Vec<f64> = (0..40).map(|i| i as f64).collect();
        let mut y: Vec<f64> = x.iter().map(|v| 1.0 + 0.01 * (v * 1.7).sin()).collect();
        y[20] = 3.0;
        let plain = lowess(&x, &y, 0.5, 0, 0.0);
        let robust = lowess(&x, &y, 0.5, 3, 0.0);
        assert!((robust[20] - 1.0).abs() < (plain[20] - 1.0).abs());
        assert!((robust[5] - 1.0).abs() < 0.05);
    }

    #[test]
    fn test_lowess_neighbourhood_is_truncated() {
        // 0.45 * 7 and 0.5 * 7 both give three neighbours
        let x: Vec<f64> = (1..=7).map(|i| i as f64).collect();
        let y = vec![0.0, 3.0, 0.5, 4.0, 1.0, 2.5, 0.2];
        let narrow = lowess(&x, &y, 0.45, 0, 0.0);
        let half = lowess(&x, &y, 0.5, 0, 0.0);
        for (a, b) in narrow.iter().zip(&half) {
            assert!((a - b).abs() < 1e-12);
        }
        // One more neighbour changes the fit
        let wider = lowess(&x, &y, 4.0 / 7.0, 0, 0.0);
        assert!(wider.iter().zip(&half).any(|(a, b)| (a - b).abs() > 1e-6));
    }

    #[test]
    fn test_lowess_delta_interpolates() {
        let x: Vec<f64> = (0..100).map(|i| i as f64 / 10.0).collect();
        let y: Vec<f64> = x.iter().map(|v| v * 0.5 + 1.0).collect();
        let fit = lowess(&x, &y, 0.3, 0, 0.5);
        for (f, t) in fit.iter().zip(&y) {
            assert!((f - t).abs() < 1e-9);
        }
    }

    #[test]
    fn test_trend_curve_interpolation() {
        let x = vec![3.0, 1.0, 2.0, 4.0, 5.0];
        let y = vec![3.0, 1.0, 2.0, 4.0, 5.0];
        let curve = TrendCurve::fit(&x, &y, &LowessParams::default()).unwrap();
        assert_eq!(curve.x(), &[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert!((curve.predict(2.5) - 2.5).abs() < 1e-9);
        // Constant beyond the ends
        assert!((curve.predict(-10.0) - 1.0).abs() < 1e-9);
        assert!((curve.predict(10.0) - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_trend_curve_ties_are_averaged() {
        let x = vec![1.0, 1.0, 2.0];
        let y = vec![0.0, 2.0, 3.0];
        let curve = TrendCurve::fit(&x, &y, &LowessParams { iterations: 0, ..Default::default() }).unwrap();
        assert_eq!(curve.x().len(), 2);
    }

    #[test]
    fn test_trend_curve_needs_points() {
        let err = TrendCurve::fit(&[1.0], &[1.0], &LowessParams::default()).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NumericDegeneracy);
    }
}
