//! Peak model fitting for focus curves
//!
//! A Lorentzian plus constant offset is fitted with Levenberg-Marquardt.
//! When the fit diverges or lands outside the samples neighbouring the
//! maximum, the vertex of a parabola through the three central samples is
//! used instead.

/// Lorentzian peak on a constant background
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeakFit {
    pub amplitude: f64,
    pub center: f64,
    /// Half width at half maximum
    pub gamma: f64,
    pub offset: f64,
}

impl PeakFit {
    pub fn evaluate(&self, x: f64) -> f64 {
        let d = x - self.center;
        let g2 = self.gamma * self.gamma;
        self.amplitude * g2 / (d * d + g2) + self.offset
    }
}

/// Chosen peak location for a window of samples
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeakEstimate {
    pub center: f64,
    /// The Lorentzian when it was accepted
    pub model: Option<PeakFit>,
}

const MAX_ITERATIONS: usize = 200;

/// Fit a Lorentzian plus constant to the samples
///
/// Needs at least four samples; returns `None` if the solution is not finite.
pub fn fit_lorentzian(xs: &[f64], ys: &[f64]) -> Option<PeakFit> {
    let n = xs.len();
    if n < 4 || ys.len() != n {
        return None;
    }

    // Work in normalised x so the normal equations stay well conditioned
    let x_mean = xs.iter().sum::<f64>() / n as f64;
    let scale = xs
        .iter()
        .map(|x| (x - x_mean).abs())
        .fold(0.0_f64, f64::max);
    if scale <= 0.0 {
        return None;
    }
    let us: Vec<f64> = xs.iter().map(|x| (x - x_mean) / scale).collect();

    let (imax, y_max) = ys
        .iter()
        .copied()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |best, (i, y)| if y > best.1 { (i, y) } else { best });
    let y_min = ys.iter().copied().fold(f64::INFINITY, f64::min);

    // [amplitude, center, gamma, offset]
    let mut p = [y_max - y_min, us[imax], 2.0 / (n as f64 - 1.0), y_min];
    let mut sse = sum_squares(&us, ys, &p);
    let mut lambda = 1e-3;

    for _ in 0..MAX_ITERATIONS {
        let mut jtj = [[0.0; 4]; 4];
        let mut jtr = [0.0; 4];
        for (&u, &y) in us.iter().zip(ys) {
            let (value, grad) = model_with_gradient(u, &p);
            let r = y - value;
            for i in 0..4 {
                jtr[i] += grad[i] * r;
                for j in 0..4 {
                    jtj[i][j] += grad[i] * grad[j];
                }
            }
        }

        let mut a = jtj;
        for (i, row) in a.iter_mut().enumerate() {
            row[i] += lambda * jtj[i][i].max(1e-12);
        }

        let Some(delta) = solve4(a, jtr) else {
            lambda *= 10.0;
            if lambda > 1e12 {
                break;
            }
            continue;
        };

        let mut candidate = p;
        for i in 0..4 {
            candidate[i] += delta[i];
        }
        let candidate_sse = sum_squares(&us, ys, &candidate);

        if candidate_sse.is_finite() && candidate_sse < sse {
            let improvement = sse - candidate_sse;
            p = candidate;
            sse = candidate_sse;
            lambda = (lambda / 10.0).max(1e-12);
            if improvement <= 1e-12 * sse.max(1e-300) {
                break;
            }
        } else {
            lambda *= 10.0;
            if lambda > 1e12 {
                break;
            }
        }
    }

    let fit = PeakFit {
        amplitude: p[0],
        center: x_mean + p[1] * scale,
        gamma: p[2].abs() * scale,
        offset: p[3],
    };
    let finite = [fit.amplitude, fit.center, fit.gamma, fit.offset]
        .iter()
        .all(|v| v.is_finite());
    (finite && fit.gamma > 0.0).then_some(fit)
}

fn model_with_gradient(u: f64, p: &[f64; 4]) -> (f64, [f64; 4]) {
    let [a, u0, g, c] = *p;
    let d = u - u0;
    let g2 = g * g;
    let q = d * d + g2;
    let lorentz = g2 / q;
    let q2 = q * q;
    (
        a * lorentz + c,
        [
            lorentz,
            a * g2 * 2.0 * d / q2,
            a * 2.0 * g * d * d / q2,
            1.0,
        ],
    )
}

fn sum_squares(us: &[f64], ys: &[f64], p: &[f64; 4]) -> f64 {
    us.iter()
        .zip(ys)
        .map(|(&u, &y)| {
            let r = y - model_with_gradient(u, p).0;
            r * r
        })
        .sum()
}

/// Gaussian elimination with partial pivoting
fn solve4(mut a: [[f64; 4]; 4], mut b: [f64; 4]) -> Option<[f64; 4]> {
    for col in 0..4 {
        let pivot = (col..4).max_by(|&i, &j| {
            a[i][col]
                .abs()
                .partial_cmp(&a[j][col].abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })?;
        if a[pivot][col].abs() < 1e-300 {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);

        for row in col + 1..4 {
            let factor = a[row][col] / a[col][col];
            for k in col..4 {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = [0.0; 4];
    for row in (0..4).rev() {
        let mut sum = b[row];
        for k in row + 1..4 {
            sum -= a[row][k] * x[k];
        }
        x[row] = sum / a[row][row];
    }
    x.iter().all(|v| v.is_finite()).then_some(x)
}

/// Vertex of the parabola through three points, if it opens downward
pub fn parabola_vertex(xs: [f64; 3], ys: [f64; 3]) -> Option<f64> {
    let [x0, x1, x2] = xs;
    let [y0, y1, y2] = ys;

    let denom = (x0 - x1) * (x0 - x2) * (x1 - x2);
    if denom.abs() < 1e-12 {
        return None;
    }
    let a = (x2 * (y1 - y0) + x1 * (y0 - y2) + x0 * (y2 - y1)) / denom;
    let b = (x2 * x2 * (y0 - y1) + x1 * x1 * (y2 - y0) + x0 * x0 * (y1 - y2)) / denom;

    if a >= 0.0 {
        return None;
    }
    let vertex = -b / (2.0 * a);
    vertex.is_finite().then_some(vertex)
}

/// Locate the peak of a window of samples around its maximum
///
/// `imax` indexes the maximum within the window and must not be at either
/// end. The result always lies between the samples neighbouring `imax`.
pub fn fit_peak(xs: &[f64], ys: &[f64], imax: usize) -> PeakEstimate {
    let fallback = PeakEstimate {
        center: xs[imax],
        model: None,
    };
    if imax == 0 || imax + 1 >= xs.len() {
        return fallback;
    }
    let (lo, hi) = (xs[imax - 1], xs[imax + 1]);

    if let Some(model) = fit_lorentzian(xs, ys) {
        if model.amplitude > 0.0 && model.center >= lo && model.center <= hi {
            return PeakEstimate {
                center: model.center,
                model: Some(model),
            };
        }
        tracing::debug!(
            "Lorentzian fit rejected (center {:.2}, amplitude {:.3}), using parabola",
            model.center,
            model.amplitude
        );
    }

    match parabola_vertex(
        [xs[imax - 1], xs[imax], xs[imax + 1]],
        [ys[imax - 1], ys[imax], ys[imax + 1]],
    ) {
        Some(center) if center >= lo && center <= hi => PeakEstimate {
            center,
            model: None,
        },
        _ => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lorentzian_recovers_parameters() {
        let truth = PeakFit {
            amplitude: 5.0,
            center: 4210.0,
            gamma: 120.0,
            offset: 1.5,
        };
        let xs: Vec<f64> = (0..9).map(|i| 4000.0 + 50.0 * i as f64).collect();
        let ys: Vec<f64> = xs.iter().map(|&x| truth.evaluate(x)).collect();

        let fit = fit_lorentzian(&xs, &ys).unwrap();
        assert!((fit.center - truth.center).abs() < 1.0, "center {}", fit.center);
        assert!((fit.amplitude - truth.amplitude).abs() < 0.05);
        assert!((fit.offset - truth.offset).abs() < 0.05);
    }

    #[test]
    fn test_fit_needs_four_samples() {
        assert!(fit_lorentzian(&[1.0, 2.0, 3.0], &[1.0, 3.0, 1.0]).is_none());
    }

    #[test]
    fn test_parabola_vertex() {
        let vertex = parabola_vertex([30.0, 40.0, 50.0], [3.0, 9.0, 4.0]).unwrap();
        assert!((vertex - (40.0 + 10.0 / 22.0)).abs() < 1e-9);
        // Opens upward: no maximum
        assert!(parabola_vertex([0.0, 1.0, 2.0], [1.0, 0.0, 1.0]).is_none());
    }

    #[test]
    fn test_fit_peak_stays_between_neighbours() {
        let xs = [20.0, 30.0, 40.0, 50.0, 60.0];
        let ys = [2.0, 3.0, 9.0, 4.0, 2.0];
        let estimate = fit_peak(&xs, &ys, 2);
        assert!(estimate.center >= 30.0 && estimate.center <= 50.0, "{}", estimate.center);
    }

    #[test]
    fn test_fit_peak_flat_window_uses_sample() {
        let xs = [1.0, 2.0, 3.0];
        let ys = [5.0, 5.0, 5.0];
        assert_eq!(fit_peak(&xs, &ys, 1).center, 2.0);
    }
}
