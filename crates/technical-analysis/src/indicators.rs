use signal_core::Bar;

/// Return val if it is finite, otherwise return default.
#[inline]
pub fn finite_or(val: f64, default: f64) -> f64 {
    if val.is_finite() {
        val
    } else {
        default
    }
}

/// Simple Moving Average
pub fn sma(data: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || data.len() < period {
        return vec![];
    }

    let mut result = Vec::with_capacity(data.len() - period + 1);
    for i in period - 1..data.len() {
        let sum: f64 = data[i + 1 - period..=i].iter().sum();
        result.push(finite_or(sum / period as f64, 0.0));
    }
    result
}

/// Exponential Moving Average
pub fn ema(data: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || data.is_empty() {
        return vec![];
    }

    let mut result = Vec::with_capacity(data.len());
    let multiplier = 2.0 / (period as f64 + 1.0);

    // Not enough data for a full SMA seed -- return partial SMA
    if data.len() < period {
        let avg = data.iter().sum::<f64>() / data.len() as f64;
        return vec![finite_or(avg, 0.0)];
    }

    // Seed: SMA over the first `period` elements
    let sma_seed: f64 = data[..period].iter().sum::<f64>() / period as f64;
    let sma_seed = finite_or(sma_seed, 0.0);

    // Fill the first `period` slots with the SMA so the output length
    // matches the input length (the frame builder relies on this).
    for _ in 0..period {
        result.push(sma_seed);
    }

    for i in period..data.len() {
        let prev_ema = result[i - 1];
        let ema_val = (data[i] - prev_ema) * multiplier + prev_ema;
        result.push(finite_or(ema_val, prev_ema));
    }

    result
}

/// Relative Strength Index (Wilder smoothing)
pub fn rsi(data: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || data.len() < period + 1 {
        return vec![];
    }

    let mut gains = Vec::new();
    let mut losses = Vec::new();

    for i in 1..data.len() {
        let change = data[i] - data[i - 1];
        if change > 0.0 {
            gains.push(change);
            losses.push(0.0);
        } else {
            gains.push(0.0);
            losses.push(change.abs());
        }
    }

    let mut avg_gain = gains[..period].iter().sum::<f64>() / period as f64;
    let mut avg_loss = losses[..period].iter().sum::<f64>() / period as f64;

    let mut rsi_values = Vec::with_capacity(data.len() - period);

    for i in period..gains.len() {
        avg_gain = (avg_gain * (period - 1) as f64 + gains[i]) / period as f64;
        avg_loss = (avg_loss * (period - 1) as f64 + losses[i]) / period as f64;

        let rs = if avg_loss == 0.0 {
            100.0
        } else {
            avg_gain / avg_loss
        };

        let rsi = 100.0 - (100.0 / (1.0 + rs));
        rsi_values.push(finite_or(rsi, 50.0));
    }

    rsi_values
}

/// Average True Range (Wilder smoothing)
pub fn atr(bars: &[Bar], period: usize) -> Vec<f64> {
    if period == 0 || bars.len() < period + 1 {
        return vec![];
    }

    let mut true_ranges = Vec::new();

    for i in 1..bars.len() {
        let high_low = bars[i].high - bars[i].low;
        let high_close = (bars[i].high - bars[i - 1].close).abs();
        let low_close = (bars[i].low - bars[i - 1].close).abs();

        let tr = high_low.max(high_close).max(low_close);
        true_ranges.push(tr);
    }

    let mut atr_values = Vec::new();
    let mut atr = true_ranges[..period].iter().sum::<f64>() / period as f64;
    atr = finite_or(atr, 0.0);
    atr_values.push(atr);

    for tr in &true_ranges[period..] {
        atr = (atr * (period - 1) as f64 + tr) / period as f64;
        atr_values.push(finite_or(atr, 0.0));
    }

    atr_values
}

/// Bollinger Bands
pub struct BollingerBands {
    pub upper: Vec<f64>,
    pub middle: Vec<f64>,
    pub lower: Vec<f64>,
}

pub fn bollinger_bands(data: &[f64], period: usize, std_dev: f64) -> BollingerBands {
    if period == 0 || data.len() < period {
        return BollingerBands {
            upper: vec![],
            middle: vec![],
            lower: vec![],
        };
    }

    let middle = sma(data, period);
    let mut upper = Vec::with_capacity(middle.len());
    let mut lower = Vec::with_capacity(middle.len());

    for i in period - 1..data.len() {
        let slice = &data[i + 1 - period..=i];
        let mean = middle[i + 1 - period];
        let variance: f64 = slice.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / period as f64;
        let std = variance.sqrt();

        upper.push(finite_or(mean + std_dev * std, mean));
        lower.push(finite_or(mean - std_dev * std, mean));
    }

    BollingerBands {
        upper,
        middle,
        lower,
    }
}

/// Money Flow Index: volume-weighted RSI over typical price
pub fn mfi(bars: &[Bar], period: usize) -> Vec<f64> {
    if period == 0 || bars.len() < period + 1 {
        return vec![];
    }

    let typical: Vec<f64> = bars
        .iter()
        .map(|b| (b.high + b.low + b.close) / 3.0)
        .collect();

    let mut pos_flow = Vec::with_capacity(bars.len() - 1);
    let mut neg_flow = Vec::with_capacity(bars.len() - 1);

    for i in 1..bars.len() {
        let raw = typical[i] * bars[i].volume;
        if typical[i] > typical[i - 1] {
            pos_flow.push(raw);
            neg_flow.push(0.0);
        } else if typical[i] < typical[i - 1] {
            pos_flow.push(0.0);
            neg_flow.push(raw);
        } else {
            pos_flow.push(0.0);
            neg_flow.push(0.0);
        }
    }

    let mut mfi_values = Vec::new();
    for i in period - 1..pos_flow.len() {
        let pos: f64 = pos_flow[i + 1 - period..=i].iter().sum();
        let neg: f64 = neg_flow[i + 1 - period..=i].iter().sum();

        let mfi = if neg == 0.0 {
            100.0
        } else {
            100.0 - (100.0 / (1.0 + pos / neg))
        };
        mfi_values.push(finite_or(mfi, 50.0));
    }

    mfi_values
}

/// Average Directional Index (ADX) — measures trend strength (0-100)
pub struct AdxResult {
    pub adx: Vec<f64>,
    pub plus_di: Vec<f64>,
    pub minus_di: Vec<f64>,
}

pub fn adx(bars: &[Bar], period: usize) -> AdxResult {
    if period == 0 || bars.len() < period * 2 + 1 {
        return AdxResult {
            adx: vec![],
            plus_di: vec![],
            minus_di: vec![],
        };
    }

    let mut plus_dm = Vec::with_capacity(bars.len() - 1);
    let mut minus_dm = Vec::with_capacity(bars.len() - 1);
    let mut true_range = Vec::with_capacity(bars.len() - 1);

    for i in 1..bars.len() {
        let up_move = bars[i].high - bars[i - 1].high;
        let down_move = bars[i - 1].low - bars[i].low;

        plus_dm.push(if up_move > down_move && up_move > 0.0 {
            up_move
        } else {
            0.0
        });
        minus_dm.push(if down_move > up_move && down_move > 0.0 {
            down_move
        } else {
            0.0
        });

        let hl = bars[i].high - bars[i].low;
        let hc = (bars[i].high - bars[i - 1].close).abs();
        let lc = (bars[i].low - bars[i - 1].close).abs();
        true_range.push(hl.max(hc).max(lc));
    }

    // Wilder's smoothing
    let mut smoothed_plus_dm = plus_dm[..period].iter().sum::<f64>();
    let mut smoothed_minus_dm = minus_dm[..period].iter().sum::<f64>();
    let mut smoothed_tr = true_range[..period].iter().sum::<f64>();

    let mut plus_di_values = Vec::new();
    let mut minus_di_values = Vec::new();
    let mut dx_values = Vec::new();

    for i in period..plus_dm.len() {
        smoothed_plus_dm = smoothed_plus_dm - smoothed_plus_dm / period as f64 + plus_dm[i];
        smoothed_minus_dm = smoothed_minus_dm - smoothed_minus_dm / period as f64 + minus_dm[i];
        smoothed_tr = smoothed_tr - smoothed_tr / period as f64 + true_range[i];

        let pdi = if smoothed_tr > 0.0 {
            100.0 * smoothed_plus_dm / smoothed_tr
        } else {
            0.0
        };
        let mdi = if smoothed_tr > 0.0 {
            100.0 * smoothed_minus_dm / smoothed_tr
        } else {
            0.0
        };

        plus_di_values.push(pdi);
        minus_di_values.push(mdi);

        let di_sum = pdi + mdi;
        let dx = if di_sum > 0.0 {
            100.0 * (pdi - mdi).abs() / di_sum
        } else {
            0.0
        };
        dx_values.push(dx);
    }

    if dx_values.len() < period {
        return AdxResult {
            adx: vec![],
            plus_di: plus_di_values,
            minus_di: minus_di_values,
        };
    }

    let mut adx_values = Vec::new();
    let mut adx_val = dx_values[..period].iter().sum::<f64>() / period as f64;
    adx_val = finite_or(adx_val, 0.0);
    adx_values.push(adx_val);

    for dx in &dx_values[period..] {
        adx_val = (adx_val * (period - 1) as f64 + dx) / period as f64;
        adx_values.push(finite_or(adx_val, 0.0));
    }

    AdxResult {
        adx: adx_values,
        plus_di: plus_di_values,
        minus_di: minus_di_values,
    }
}

/// Keltner Channels (EMA +/- ATR × multiplier)
pub struct KeltnerChannels {
    pub upper: Vec<f64>,
    pub middle: Vec<f64>,
    pub lower: Vec<f64>,
}

pub fn keltner_channels(
    bars: &[Bar],
    ema_period: usize,
    atr_period: usize,
    multiplier: f64,
) -> KeltnerChannels {
    if bars.len() < ema_period.max(atr_period + 1) {
        return KeltnerChannels {
            upper: vec![],
            middle: vec![],
            lower: vec![],
        };
    }

    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let middle = ema(&closes, ema_period);
    let atr_values = atr(bars, atr_period);

    // ATR starts at bar index atr_period; EMA spans the full series
    let offset = bars.len() - atr_values.len();
    let mut upper = Vec::new();
    let mut lower = Vec::new();

    for (atr_idx, atr_val) in atr_values.iter().enumerate() {
        let mid_val = middle[offset + atr_idx];
        upper.push(mid_val + multiplier * atr_val);
        lower.push(mid_val - multiplier * atr_val);
    }

    let trimmed_middle = middle[offset..].to_vec();

    KeltnerChannels {
        upper,
        middle: trimmed_middle,
        lower,
    }
}

/// Chandelier Exit (long): rolling highest high minus ATR multiple.
/// Used as the trailing runner exit once a signal is past TP1.
pub fn chandelier_exit_long(bars: &[Bar], period: usize, multiplier: f64) -> Vec<f64> {
    if period == 0 || bars.len() < period + 1 {
        return vec![];
    }

    let atr_values = atr(bars, period);
    let offset = bars.len() - atr_values.len();

    let mut result = Vec::with_capacity(atr_values.len());
    for (k, atr_val) in atr_values.iter().enumerate() {
        let i = offset + k;
        let start = i + 1 - period;
        let highest = bars[start..=i]
            .iter()
            .map(|b| b.high)
            .fold(f64::NEG_INFINITY, f64::max);
        result.push(finite_or(highest - multiplier * atr_val, highest));
    }
    result
}

/// Right-align a partial series against a bar count, padding warmup with None.
fn pad_left(values: Vec<f64>, n: usize) -> Vec<Option<f64>> {
    let pad = n.saturating_sub(values.len());
    let mut out = vec![None; pad];
    out.extend(values.into_iter().map(Some));
    out.truncate(n);
    out
}

/// Derived indicator columns aligned 1:1 with the source bars.
///
/// Warmup slots are `None`; downstream filters treat a missing reading as
/// "filter bypassed", never as "filter failed".
#[derive(Debug, Clone, Default)]
pub struct IndicatorFrame {
    pub ema_20: Vec<Option<f64>>,
    pub ema_50: Vec<Option<f64>>,
    pub rsi_14: Vec<Option<f64>>,
    pub atr_14: Vec<Option<f64>>,
    pub atr_sma_20: Vec<Option<f64>>,
    pub bb_lower: Vec<Option<f64>>,
    pub mfi_14: Vec<Option<f64>>,
    pub adx_14: Vec<Option<f64>>,
    pub keltner_upper: Vec<Option<f64>>,
    pub vol_sma_20: Vec<Option<f64>>,
    pub chandelier_exit_long: Vec<Option<f64>>,
}

impl IndicatorFrame {
    pub fn compute(bars: &[Bar]) -> Self {
        let n = bars.len();
        if n == 0 {
            return Self::default();
        }

        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let volumes: Vec<f64> = bars.iter().map(|b| b.volume).collect();

        let atr_14 = atr(bars, 14);
        let atr_sma_20 = sma(&atr_14, 20);

        Self {
            ema_20: pad_left(ema(&closes, 20), n),
            ema_50: pad_left(ema(&closes, 50), n),
            rsi_14: pad_left(rsi(&closes, 14), n),
            atr_sma_20: pad_left(atr_sma_20, n),
            atr_14: pad_left(atr_14, n),
            bb_lower: pad_left(bollinger_bands(&closes, 20, 2.0).lower, n),
            mfi_14: pad_left(mfi(bars, 14), n),
            adx_14: pad_left(adx(bars, 14).adx, n),
            keltner_upper: pad_left(keltner_channels(bars, 20, 14, 2.0).upper, n),
            vol_sma_20: pad_left(sma(&volumes, 20), n),
            chandelier_exit_long: pad_left(chandelier_exit_long(bars, 22, 3.0), n),
        }
    }

    pub fn len(&self) -> usize {
        self.ema_50.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ema_50.is_empty()
    }
}
