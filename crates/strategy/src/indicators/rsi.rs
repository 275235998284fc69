/// RSI (Relative Strength Index) with simple averages.
///
/// Average gain and average loss are plain means over the trailing `period`
/// bar-to-bar changes of `closes` (oldest first). No Wilder smoothing.
///
/// Returns `None` if there are fewer than `period + 1` values or `period` is
/// zero. Returns exactly `100.0` when the average loss is zero.
pub fn rsi(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period + 1 {
        return None;
    }

    let tail = &closes[closes.len() - (period + 1)..];
    let (gain_sum, loss_sum) = tail
        .windows(2)
        .map(|w| w[1] - w[0])
        .fold((0.0, 0.0), |(g, l), change| {
            if change > 0.0 {
                (g + change, l)
            } else {
                (g, l - change)
            }
        });

    let avg_gain = gain_sum / period as f64;
    let avg_loss = loss_sum / period as f64;

    if avg_loss == 0.0 {
        return Some(100.0);
    }

    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}
