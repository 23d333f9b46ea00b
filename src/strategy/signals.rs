use crate::indicators::{columns, IndicatorSnapshot};
use crate::models::Signal;

/// `a` moved from below `b` to at-or-above `b` between `index - 1` and `index`
pub fn crossover(snapshot: &IndicatorSnapshot, a: &str, b: &str, index: usize) -> bool {
    match pair(snapshot, a, b, index) {
        Some(((a_prev, b_prev), (a_now, b_now))) => a_prev < b_prev && a_now >= b_now,
        None => false,
    }
}

/// `a` moved from above `b` to at-or-below `b` between `index - 1` and `index`
pub fn crossunder(snapshot: &IndicatorSnapshot, a: &str, b: &str, index: usize) -> bool {
    match pair(snapshot, a, b, index) {
        Some(((a_prev, b_prev), (a_now, b_now))) => a_prev > b_prev && a_now <= b_now,
        None => false,
    }
}

#[allow(clippy::type_complexity)]
fn pair(
    snapshot: &IndicatorSnapshot,
    a: &str,
    b: &str,
    index: usize,
) -> Option<((f64, f64), (f64, f64))> {
    let prev = index.checked_sub(1)?;
    Some((
        (snapshot.value(a, prev)?, snapshot.value(b, prev)?),
        (snapshot.value(a, index)?, snapshot.value(b, index)?),
    ))
}

/// Entry: RSI crosses up through its MA and OBV crosses up through the lower band on the same bar
pub fn entry_at(snapshot: &IndicatorSnapshot, index: usize) -> bool {
    let Some(prev) = index.checked_sub(1) else {
        return false;
    };
    snapshot.value(columns::LOWER_BAND, prev).is_some()
        && crossover(snapshot, columns::RSI, columns::RSI_MA, index)
        && crossover(snapshot, columns::OBV, columns::LOWER_BAND, index)
}

/// Exit: close below the fast MA, or OBV crossing down through the upper band
pub fn exit_at(snapshot: &IndicatorSnapshot, index: usize) -> bool {
    let below_fast_ma = match (
        snapshot.value(columns::CLOSE, index),
        snapshot.value(columns::LC_MA1, index),
    ) {
        (Some(close), Some(ma)) => close < ma,
        _ => false,
    };
    if below_fast_ma {
        return true;
    }

    let Some(prev) = index.checked_sub(1) else {
        return false;
    };
    snapshot.value(columns::UPPER_BAND, prev).is_some()
        && crossunder(snapshot, columns::OBV, columns::UPPER_BAND, index)
}

/// Signal for row `index` given whether a position is currently held
pub fn signal_at(snapshot: &IndicatorSnapshot, index: usize, position_open: bool) -> Signal {
    if index == 0 || index >= snapshot.len() {
        return Signal::Hold;
    }
    if !position_open && entry_at(snapshot, index) {
        Signal::Buy
    } else if position_open && exit_at(snapshot, index) {
        Signal::Sell
    } else {
        Signal::Hold
    }
}

/// Signal on the most recent bar; fewer than two rows is always a hold
pub fn indicator_signal(snapshot: &IndicatorSnapshot, position_open: bool) -> Signal {
    match snapshot.len() {
        0 | 1 => Signal::Hold,
        n => signal_at(snapshot, n - 1, position_open),
    }
}
