/// Exponential Moving Average over the whole of `values` (oldest first).
///
/// Seeded with the first value, then blended forward with
/// α = 2 / (period + 1):
///
///   ema₀ = values[0]
///   emaₙ = α·valuesₙ + (1 − α)·emaₙ₋₁
///
/// Callers pass the trailing window they care about, usually exactly
/// `period` values. Returns `None` if `values` holds fewer than `period`
/// values or `period` is zero.
pub fn ema(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }

    let alpha = 2.0 / (period as f64 + 1.0);
    let (&seed, rest) = values.split_first()?;
    Some(
        rest.iter()
            .fold(seed, |acc, &v| alpha * v + (1.0 - alpha) * acc),
    )
}
