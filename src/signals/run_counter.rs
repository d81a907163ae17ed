use crate::types::Candle;

/// Extra candles requested when rebuilding a run after a restart.
pub const RESYNC_MARGIN: usize = 10;

/// Length of the current streak of consecutive confirmed long candles.
///
/// Updated in O(1) per confirmed candle. After a restart the count is rebuilt
/// once from recent history (see [`RunCounter::resync`]).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunCounter {
    count: u32,
    synced: bool,
}

impl RunCounter {
    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn is_synced(&self) -> bool {
        self.synced
    }

    /// Fold one confirmed candle into the streak and return the new length.
    pub fn observe(&mut self, candle: &Candle) -> u32 {
        if candle.is_long() {
            self.count = self.count.saturating_add(1);
        } else {
            self.count = 0;
        }
        self.count
    }

    /// Rebuild the streak from `history` (oldest first), considering only
    /// candles that start strictly before `before_start`.
    pub fn resync(&mut self, history: &[Candle], before_start: i64) -> u32 {
        self.count = trailing_run(
            history
                .iter()
                .filter(|c| c.confirmed && c.start_time < before_start),
        );
        self.synced = true;
        self.count
    }
}

/// Length of the trailing streak of long candles.
fn trailing_run<'a>(candles: impl DoubleEndedIterator<Item = &'a Candle>) -> u32 {
    candles.rev().take_while(|c| c.is_long()).count() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(start: i64, open: f64, close: f64) -> Candle {
        Candle {
            symbol: "BTCUSDT".into(),
            start_time: start,
            end_time: start + 59_999,
            open,
            high: open.max(close),
            low: open.min(close),
            close,
            volume: 1.0,
            confirmed: true,
        }
    }

    #[test]
    fn long_increments_anything_else_resets() {
        let mut run = RunCounter::default();
        assert_eq!(run.observe(&candle(0, 1.0, 2.0)), 1);
        assert_eq!(run.observe(&candle(60_000, 2.0, 3.0)), 2);
        assert_eq!(run.observe(&candle(120_000, 3.0, 3.0)), 0);
        assert_eq!(run.observe(&candle(180_000, 3.0, 4.0)), 1);
    }

    #[test]
    fn resync_counts_trailing_longs_before_current() {
        let history = vec![
            candle(0, 2.0, 1.0),
            candle(60_000, 1.0, 2.0),
            candle(120_000, 2.0, 3.0),
            candle(180_000, 3.0, 4.0),
            // the current candle, already stored
            candle(240_000, 4.0, 5.0),
        ];
        let mut run = RunCounter::default();
        assert!(!run.is_synced());
        assert_eq!(run.resync(&history, 240_000), 3);
        assert!(run.is_synced());
        assert_eq!(run.observe(&history[4]), 4);
    }

    #[test]
    fn resync_on_empty_history_is_zero() {
        let mut run = RunCounter::default();
        assert_eq!(run.resync(&[], 0), 0);
        assert!(run.is_synced());
    }
}
