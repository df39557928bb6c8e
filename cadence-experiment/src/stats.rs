//! Significance of a variant against the rest of its group.

use crate::metrics::VariantMetrics;

/// Standard normal cumulative distribution.
pub fn normal_cdf(z: f64) -> f64 {
    0.5 * (1.0 + erf(z / std::f64::consts::SQRT_2))
}

// Abramowitz & Stegun 7.1.26, absolute error below 1.5e-7.
fn erf(x: f64) -> f64 {
    const A1: f64 = 0.254_829_592;
    const A2: f64 = -0.284_496_736;
    const A3: f64 = 1.421_413_741;
    const A4: f64 = -1.453_152_027;
    const A5: f64 = 1.061_405_429;
    const P: f64 = 0.327_591_1;

    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + P * x);
    let poly = ((((A5 * t + A4) * t + A3) * t + A2) * t + A1) * t;
    sign * (1.0 - poly * (-x * x).exp())
}

/// One-sided two-proportion z-test of `successes/trials` being greater than
/// `rest_successes/rest_trials`, reported as Φ(z).
///
/// Zero trials give 0. A degenerate pooled variance gives 0.5.
pub fn confidence(successes: u64, trials: u64, rest_successes: u64, rest_trials: u64) -> f64 {
    if trials == 0 {
        return 0.0;
    }
    if rest_trials == 0 {
        return 0.5;
    }

    let (n1, n2) = (trials as f64, rest_trials as f64);
    let p1 = successes as f64 / n1;
    let p2 = rest_successes as f64 / n2;
    let pooled = (successes + rest_successes) as f64 / (n1 + n2);
    let variance = pooled * (1.0 - pooled) * (1.0 / n1 + 1.0 / n2);
    if variance <= 0.0 {
        return 0.5;
    }

    normal_cdf((p1 - p2) / variance.sqrt())
}

/// Significance of one variant.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub index: usize,
    pub variant: String,
    pub rsvp_rate: f64,
    pub confidence: f64,
    pub significant: bool,
}

/// Winner rule parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecisionRule {
    pub confidence_threshold: f64,
    pub min_margin: f64,
}

/// Score every variant against the pooled rest of the group.
pub fn evaluate(metrics: &[VariantMetrics], threshold: f64) -> Vec<Evaluation> {
    let total_sends: u64 = metrics.iter().map(|m| m.sends).sum();
    let total_rsvps: u64 = metrics.iter().map(|m| m.rsvps).sum();

    metrics
        .iter()
        .enumerate()
        .map(|(index, m)| {
            let confidence = confidence(
                m.rsvps,
                m.sends,
                total_rsvps - m.rsvps,
                total_sends - m.sends,
            );
            Evaluation {
                index,
                variant: m.variant.clone(),
                rsvp_rate: m.rsvp_rate(),
                confidence,
                significant: confidence > threshold,
            }
        })
        .collect()
}

/// Index of the winning variant, if any.
///
/// The top rsvp rate must be significant and, when there is a runner-up,
/// lead it by more than `min_margin`.
pub fn pick_winner(metrics: &[VariantMetrics], rule: DecisionRule) -> Option<usize> {
    let mut ranked = evaluate(metrics, rule.confidence_threshold);
    ranked.sort_by(|a, b| b.rsvp_rate.total_cmp(&a.rsvp_rate));

    let top = ranked.first().filter(|e| e.significant)?;
    let Some(runner_up) = ranked.get(1) else {
        return Some(top.index);
    };

    (top.rsvp_rate - runner_up.rsvp_rate > rule.min_margin).then_some(top.index)
}
