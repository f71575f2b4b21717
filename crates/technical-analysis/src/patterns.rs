use signal_core::Bar;

pub const HAMMER_LOWER_WICK_RATIO: f64 = 2.0;
pub const HAMMER_UPPER_WICK_RATIO: f64 = 0.5;
pub const MARUBOZU_BODY_RATIO: f64 = 0.95;

/// Pre-computed per-candle properties shared by the shape detectors
#[derive(Debug, Clone, Default)]
pub struct CandleColumns {
    pub body: Vec<f64>,
    pub upper_wick: Vec<f64>,
    pub lower_wick: Vec<f64>,
    pub range: Vec<f64>,
    pub body_pct: Vec<f64>,
    pub is_green: Vec<bool>,
    pub is_red: Vec<bool>,
}

impl CandleColumns {
    pub fn compute(bars: &[Bar]) -> Self {
        let n = bars.len();
        let mut cols = Self {
            body: Vec::with_capacity(n),
            upper_wick: Vec::with_capacity(n),
            lower_wick: Vec::with_capacity(n),
            range: Vec::with_capacity(n),
            body_pct: Vec::with_capacity(n),
            is_green: Vec::with_capacity(n),
            is_red: Vec::with_capacity(n),
        };

        for b in bars {
            let body = (b.close - b.open).abs();
            let range = b.high - b.low;
            cols.body.push(body);
            cols.upper_wick.push(b.high - b.close.max(b.open));
            cols.lower_wick.push(b.close.min(b.open) - b.low);
            cols.range.push(range);
            cols.body_pct
                .push(if range > 0.0 { body / range } else { 0.0 });
            cols.is_green.push(b.close > b.open);
            cols.is_red.push(b.close < b.open);
        }

        cols
    }

    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}

/// Lower Wick >= 2.0 * Body, Upper Wick <= 0.5 * Body
pub fn hammer_shape(cols: &CandleColumns) -> Vec<bool> {
    (0..cols.len())
        .map(|i| {
            cols.lower_wick[i] >= HAMMER_LOWER_WICK_RATIO * cols.body[i]
                && cols.upper_wick[i] <= HAMMER_UPPER_WICK_RATIO * cols.body[i]
        })
        .collect()
}

/// Small body, long upper wick, negligible lower wick
pub fn inverted_hammer_shape(cols: &CandleColumns) -> Vec<bool> {
    (0..cols.len())
        .map(|i| {
            cols.body_pct[i] < 0.3
                && cols.lower_wick[i] < cols.range[i] * 0.1
                && cols.upper_wick[i] >= 2.0 * cols.body[i]
        })
        .collect()
}

/// Open ~ Close ~ High with a long lower shadow
pub fn dragonfly_doji_shape(cols: &CandleColumns) -> Vec<bool> {
    (0..cols.len())
        .map(|i| {
            cols.upper_wick[i] < cols.range[i] * 0.1
                && cols.body[i] < cols.range[i] * 0.1
                && cols.lower_wick[i] > cols.body[i] * 2.0
        })
        .collect()
}

/// Opens at the session low, large bullish body
pub fn belt_hold_shape(bars: &[Bar], cols: &CandleColumns) -> Vec<bool> {
    (0..cols.len())
        .map(|i| {
            let open_at_low = (bars[i].open - bars[i].low) <= bars[i].low * 0.001;
            open_at_low && cols.body[i] > cols.range[i] * 0.6 && cols.is_green[i]
        })
        .collect()
}

/// Body > 0.95 of range, range expanded past 2 ATR when ATR is known
pub fn marubozu_shape(cols: &CandleColumns, atr_14: &[Option<f64>]) -> Vec<bool> {
    (0..cols.len())
        .map(|i| {
            let range_expanded = match atr_14.get(i).copied().flatten() {
                Some(atr) => cols.range[i] > 2.0 * atr,
                None => true,
            };
            cols.body_pct[i] > MARUBOZU_BODY_RATIO && range_expanded && cols.is_green[i]
        })
        .collect()
}

/// Current green, previous red, body envelops the previous body
pub fn bullish_engulfing_shape(bars: &[Bar], cols: &CandleColumns) -> Vec<bool> {
    (0..cols.len())
        .map(|i| {
            i >= 1
                && cols.is_green[i]
                && cols.is_red[i - 1]
                && bars[i].open <= bars[i - 1].close
                && bars[i].close > bars[i - 1].open
        })
        .collect()
}

/// Color-flip exit: current red engulfing the previous green body
pub fn bearish_engulfing_shape(bars: &[Bar], cols: &CandleColumns) -> Vec<bool> {
    (0..cols.len())
        .map(|i| {
            i >= 1
                && cols.is_red[i]
                && cols.is_green[i - 1]
                && bars[i].open >= bars[i - 1].close
                && bars[i].close < bars[i - 1].open
        })
        .collect()
}

/// Small green candle fully inside the previous red body
pub fn harami_shape(bars: &[Bar], cols: &CandleColumns) -> Vec<bool> {
    (0..cols.len())
        .map(|i| {
            if i < 1 || !cols.is_red[i - 1] || !cols.is_green[i] {
                return false;
            }
            let prev_high = bars[i - 1].open.max(bars[i - 1].close);
            let prev_low = bars[i - 1].open.min(bars[i - 1].close);
            let inside = bars[i].open > prev_low
                && bars[i].open < prev_high
                && bars[i].close > prev_low
                && bars[i].close < prev_high;
            inside && cols.body[i] < cols.body[i - 1] * 0.5
        })
        .collect()
}

pub struct KickerShapes {
    pub kicker: Vec<bool>,
    /// Stronger sub-type: today's low gaps fully above yesterday's high
    pub true_gap: Vec<bool>,
}

/// Gap-up reversal after a red candle, with an ATR-significant move
pub fn kicker_shape(bars: &[Bar], cols: &CandleColumns, atr_14: &[Option<f64>]) -> KickerShapes {
    let n = cols.len();
    let mut kicker = vec![false; n];
    let mut true_gap = vec![false; n];

    for i in 1..n {
        if !cols.is_red[i - 1] || !cols.is_green[i] {
            continue;
        }
        let gap_up = bars[i].open > bars[i - 1].open;
        let significant = match atr_14.get(i).copied().flatten() {
            Some(atr) => (bars[i].close - bars[i - 1].close) > atr,
            None => true,
        };
        if gap_up && significant {
            kicker[i] = true;
            true_gap[i] = bars[i].low > bars[i - 1].high;
        }
    }

    KickerShapes { kicker, true_gap }
}

pub struct MorningStarShapes {
    pub morning_star: Vec<bool>,
    pub abandoned_baby: Vec<bool>,
    /// Conviction score in [0, 1]; zero where no pattern
    pub strength: Vec<f64>,
}

/// Three-candle reversal: large red, small-body star gapping down, large
/// green closing past the midpoint of the first body (50% penetration gate).
pub fn morning_star_shape(
    bars: &[Bar],
    cols: &CandleColumns,
    atr_14: &[Option<f64>],
    rsi_14: &[Option<f64>],
) -> MorningStarShapes {
    let n = cols.len();
    let mut morning_star = vec![false; n];
    let mut abandoned_baby = vec![false; n];
    let mut strength = vec![0.0; n];

    for i in 2..n {
        let t2 = i - 2;
        let t1 = i - 1;

        // t-2 must be a large red candle (body above ATR when known)
        let has_size = match atr_14.get(t2).copied().flatten() {
            Some(atr) => cols.body[t2] > atr,
            None => cols.body[t2] > 0.0,
        };
        if !cols.is_red[t2] || !has_size {
            continue;
        }

        // t-1: spinning top / doji gapping down
        let is_star = cols.body[t1] < cols.range[t1] * 0.3;
        let is_gap_down = bars[t1].open <= bars[t2].close;
        if !is_star || !is_gap_down {
            continue;
        }

        // t: green with 50% penetration of the t-2 body
        let t2_mid = (bars[t2].open + bars[t2].close) / 2.0;
        if !cols.is_green[i] || bars[i].close <= t2_mid {
            continue;
        }

        morning_star[i] = true;

        let gap_1 = bars[t2].low > bars[t1].high;
        let gap_2 = bars[t1].high < bars[i].low;
        abandoned_baby[i] = gap_1 && gap_2;

        let volume_escalation =
            bars[i].volume > bars[t1].volume && bars[t1].volume > bars[t2].volume;

        let rsi_oversold = [t2, t1, i].iter().any(|&k| {
            rsi_14
                .get(k)
                .copied()
                .flatten()
                .map(|r| r < 35.0)
                .unwrap_or(true)
        });

        let mut score: f64 = 0.3;
        if volume_escalation {
            score += 0.2;
        }
        if abandoned_baby[i] {
            score += 0.3;
        }
        if rsi_oversold {
            score += 0.2;
        }
        strength[i] = score.min(1.0);
    }

    MorningStarShapes {
        morning_star,
        abandoned_baby,
        strength,
    }
}

/// Large red candle, then a green open below the prior close that reclaims
/// more than half the red body without closing above its open
pub fn piercing_line_shape(bars: &[Bar], cols: &CandleColumns) -> Vec<bool> {
    (0..cols.len())
        .map(|i| {
            if i < 1 || !cols.is_red[i - 1] || !cols.is_green[i] {
                return false;
            }
            let prev_dominant = cols.body_pct[i - 1] > 0.6;
            let prev_mid = (bars[i - 1].open + bars[i - 1].close) / 2.0;
            prev_dominant
                && bars[i].open < bars[i - 1].close
                && bars[i].close > prev_mid
                && bars[i].close < bars[i - 1].open
        })
        .collect()
}

/// Red, harami green inside it, then green confirmation above the red's open
pub fn three_inside_up_shape(bars: &[Bar], cols: &CandleColumns) -> Vec<bool> {
    (0..cols.len())
        .map(|i| {
            if i < 2 || !cols.is_red[i - 2] || !cols.is_green[i - 1] || !cols.is_green[i] {
                return false;
            }
            let t2_high = bars[i - 2].open.max(bars[i - 2].close);
            let t2_low = bars[i - 2].open.min(bars[i - 2].close);
            let t1_inside = bars[i - 1].open > t2_low
                && bars[i - 1].open < t2_high
                && bars[i - 1].close > t2_low
                && bars[i - 1].close < t2_high;
            t1_inside && bars[i].close > bars[i - 2].open
        })
        .collect()
}

/// Three greens, each opening inside the previous body and closing near its high
pub fn three_white_soldiers_shape(bars: &[Bar], cols: &CandleColumns) -> Vec<bool> {
    (0..cols.len())
        .map(|i| {
            if i < 2 || !cols.is_green[i] || !cols.is_green[i - 1] || !cols.is_green[i - 2] {
                return false;
            }
            let open_in_body_1 =
                bars[i].open > bars[i - 1].open && bars[i].open < bars[i - 1].close;
            let open_in_body_2 =
                bars[i - 1].open > bars[i - 2].open && bars[i - 1].open < bars[i - 2].close;
            let strong_close = |k: usize| cols.upper_wick[k] < cols.body[k] * 0.2;
            open_in_body_1
                && open_in_body_2
                && strong_close(i)
                && strong_close(i - 1)
                && strong_close(i - 2)
        })
        .collect()
}

/// Five-candle continuation: trend candle, three small candles held inside its
/// range, then a breakout close above the trend candle's high
pub fn rising_three_methods_shape(bars: &[Bar], cols: &CandleColumns) -> Vec<bool> {
    (0..cols.len())
        .map(|i| {
            if i < 4 || !cols.is_green[i - 4] || !cols.is_green[i] {
                return false;
            }
            let t4 = i - 4;
            let within = |k: usize| bars[k].high <= bars[t4].high && bars[k].low >= bars[t4].low;
            if !(within(i - 3) && within(i - 2) && within(i - 1)) {
                return false;
            }
            let breakout = bars[i].close > bars[t4].high;
            let avg_consol_body = (cols.body[i - 3] + cols.body[i - 2] + cols.body[i - 1]) / 3.0;
            breakout
                && cols.body[t4] > avg_consol_body * 1.5
                && cols.body[i] > avg_consol_body * 1.5
        })
        .collect()
}

/// Matching lows within 0.1% and a green current candle; trend context is
/// applied by the analyzer
pub fn tweezer_bottoms_shape(bars: &[Bar], cols: &CandleColumns) -> Vec<bool> {
    (0..cols.len())
        .map(|i| {
            if i < 1 || !cols.is_green[i] {
                return false;
            }
            let avg_low = (bars[i].low + bars[i - 1].low) / 2.0;
            if avg_low <= 0.0 {
                return false;
            }
            (bars[i].low - bars[i - 1].low).abs() / avg_low <= 0.001
        })
        .collect()
}
