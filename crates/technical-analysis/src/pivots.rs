use signal_core::{Bar, Pivot, PivotKind};

#[derive(Clone, Copy, PartialEq)]
enum Trend {
    Undetermined,
    Up,
    Down,
}

/// Identify structural pivots (peaks and valleys) with a single forward pass.
///
/// ZigZag state machine: each bar either extends the current leg's extreme,
/// or confirms a reversal once the counter-move from the last extreme reaches
/// `pct_threshold`, emitting that extreme as a pivot. The trailing extreme is
/// emitted as a provisional final pivot. O(N) time, one visit per bar.
pub fn find_pivots(bars: &[Bar], pct_threshold: f64) -> Vec<Pivot> {
    if bars.is_empty() {
        return vec![];
    }

    let mut pivots: Vec<Pivot> = Vec::new();

    let mut trend = Trend::Undetermined;
    let mut last_high_idx = 0usize;
    let mut last_high_val = bars[0].high;
    let mut last_low_idx = 0usize;
    let mut last_low_val = bars[0].low;

    for (i, bar) in bars.iter().enumerate().skip(1) {
        let current_high = bar.high;
        let current_low = bar.low;

        match trend {
            Trend::Undetermined => {
                // Waiting for the first significant move
                if current_high > last_high_val {
                    last_high_idx = i;
                    last_high_val = current_high;
                }
                if current_low < last_low_val {
                    last_low_idx = i;
                    last_low_val = current_low;
                }

                let up_pct = if bars[0].low > 0.0 {
                    (last_high_val - bars[0].low) / bars[0].low
                } else {
                    0.0
                };
                let down_pct = if bars[0].high > 0.0 {
                    (bars[0].high - last_low_val) / bars[0].high
                } else {
                    0.0
                };

                if up_pct >= pct_threshold {
                    // First move is up - mark the initial low as a valley
                    pivots.push(Pivot {
                        timestamp: bars[0].timestamp,
                        price: bars[0].low,
                        kind: PivotKind::Valley,
                        index: 0,
                    });
                    trend = Trend::Up;
                } else if down_pct >= pct_threshold {
                    // First move is down - mark the initial high as a peak
                    pivots.push(Pivot {
                        timestamp: bars[0].timestamp,
                        price: bars[0].high,
                        kind: PivotKind::Peak,
                        index: 0,
                    });
                    trend = Trend::Down;
                }
            }
            Trend::Up => {
                if current_high > last_high_val {
                    last_high_idx = i;
                    last_high_val = current_high;
                } else if last_high_val > 0.0 {
                    let drop_pct = (last_high_val - current_low) / last_high_val;
                    if drop_pct >= pct_threshold {
                        pivots.push(Pivot {
                            timestamp: bars[last_high_idx].timestamp,
                            price: last_high_val,
                            kind: PivotKind::Peak,
                            index: last_high_idx,
                        });
                        trend = Trend::Down;
                        last_low_idx = i;
                        last_low_val = current_low;
                    }
                }
            }
            Trend::Down => {
                if current_low < last_low_val {
                    last_low_idx = i;
                    last_low_val = current_low;
                } else if last_low_val > 0.0 {
                    let rise_pct = (current_high - last_low_val) / last_low_val;
                    if rise_pct >= pct_threshold {
                        pivots.push(Pivot {
                            timestamp: bars[last_low_idx].timestamp,
                            price: last_low_val,
                            kind: PivotKind::Valley,
                            index: last_low_idx,
                        });
                        trend = Trend::Up;
                        last_high_idx = i;
                        last_high_val = current_high;
                    }
                }
            }
        }
    }

    // Trailing extreme becomes a provisional final pivot
    if !pivots.is_empty() {
        match trend {
            Trend::Up => pivots.push(Pivot {
                timestamp: bars[last_high_idx].timestamp,
                price: last_high_val,
                kind: PivotKind::Peak,
                index: last_high_idx,
            }),
            Trend::Down => pivots.push(Pivot {
                timestamp: bars[last_low_idx].timestamp,
                price: last_low_val,
                kind: PivotKind::Valley,
                index: last_low_idx,
            }),
            Trend::Undetermined => {}
        }
    }

    pivots
}

fn perpendicular_distance(px: f64, py: f64, x1: f64, y1: f64, x2: f64, y2: f64) -> f64 {
    let dx = x2 - x1;
    let dy = y2 - y1;

    let line_len_sq = dx * dx + dy * dy;
    if line_len_sq == 0.0 {
        return ((px - x1).powi(2) + (py - y1).powi(2)).sqrt();
    }

    (dy * px - dx * py + x2 * y1 - y2 * x1).abs() / line_len_sq.sqrt()
}

#[derive(Clone, Copy)]
struct Segment {
    start: usize,
    end: usize,
    max_dist: f64,
    max_idx: usize,
}

fn scan_segment(prices: &[f64], start: usize, end: usize) -> Segment {
    let mut max_dist = 0.0;
    let mut max_idx = start + 1;
    for i in start + 1..end {
        let dist = perpendicular_distance(
            i as f64,
            prices[i],
            start as f64,
            prices[start],
            end as f64,
            prices[end],
        );
        if dist > max_dist {
            max_dist = dist;
            max_idx = i;
        }
    }
    Segment {
        start,
        end,
        max_dist,
        max_idx,
    }
}

/// Reduce a series to at most `max_points` perceptually important points
/// (iterative Douglas-Peucker). Not used for signal detection, only for
/// compact visual summaries of long series.
pub fn fast_pip(bars: &[Bar], max_points: usize) -> Vec<Pivot> {
    if bars.is_empty() {
        return vec![];
    }

    let prices: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let n = prices.len();

    let mut selected = vec![false; n];
    if n <= max_points {
        selected.iter_mut().for_each(|s| *s = true);
    } else {
        selected[0] = true;
        selected[n - 1] = true;

        let mut segments = vec![scan_segment(&prices, 0, n - 1)];
        let mut points_selected = 2usize;

        while points_selected < max_points && !segments.is_empty() {
            // Pull the segment with the largest distance
            let mut best = 0usize;
            for s in 1..segments.len() {
                if segments[s].max_dist > segments[best].max_dist {
                    best = s;
                }
            }
            let seg = segments.swap_remove(best);

            selected[seg.max_idx] = true;
            points_selected += 1;

            if seg.max_idx - seg.start > 1 {
                segments.push(scan_segment(&prices, seg.start, seg.max_idx));
            }
            if seg.end - seg.max_idx > 1 {
                segments.push(scan_segment(&prices, seg.max_idx, seg.end));
            }
        }
    }

    let chosen: Vec<usize> = (0..n).filter(|&i| selected[i]).collect();

    // Classify each PIP as peak or valley against its selected neighbors
    let mut pips = Vec::with_capacity(chosen.len());
    for (pos, &idx) in chosen.iter().enumerate() {
        let price = prices[idx];
        let kind = if chosen.len() == 1 {
            PivotKind::Peak
        } else if pos == 0 {
            if price > prices[chosen[1]] {
                PivotKind::Peak
            } else {
                PivotKind::Valley
            }
        } else if pos == chosen.len() - 1 {
            if price > prices[chosen[pos - 1]] {
                PivotKind::Peak
            } else {
                PivotKind::Valley
            }
        } else {
            let prev = prices[chosen[pos - 1]];
            let next = prices[chosen[pos + 1]];
            if price > prev && price > next {
                PivotKind::Peak
            } else if price < prev && price < next {
                PivotKind::Valley
            } else if price > prev {
                PivotKind::Peak
            } else {
                PivotKind::Valley
            }
        };

        pips.push(Pivot {
            timestamp: bars[idx].timestamp,
            price,
            kind,
            index: idx,
        });
    }

    pips
}
