use primitive_types::U256;

use super::Block;

/// Average milliseconds between consecutive blocks of `window` (ascending by
/// index). Pairs starting at genesis are skipped since its timestamp is fixed.
/// With no usable pair, falls back to the time since the last block.
pub fn average_mine_time(window: &[Block], now: u64) -> u64 {
    let mut total: i128 = 0;
    let mut pairs: i128 = 0;
    for pair in window.windows(2) {
        let (older, newer) = (&pair[0], &pair[1]);
        if older.index == 0 {
            continue;
        }
        total += newer.timestamp as i128 - older.timestamp as i128;
        pairs += 1;
    }

    if pairs == 0 {
        return window
            .last()
            .map(|head| now.saturating_sub(head.timestamp))
            .unwrap_or(0);
    }
    (total / pairs).unsigned_abs() as u64
}

/// One proportional step per period: lower the target by a tenth when blocks
/// come faster than `target_ms`, raise it otherwise. Never leaves `1..=U256::MAX`.
pub fn retarget(difficulty: U256, average_ms: u64, target_ms: u64) -> U256 {
    let step = (difficulty / 10).max(U256::one());
    if average_ms < target_ms {
        difficulty.saturating_sub(step).max(U256::one())
    } else {
        difficulty.saturating_add(step)
    }
}
