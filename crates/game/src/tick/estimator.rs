use std::collections::VecDeque;

use super::Tick;

/// Number of correction samples averaged by the estimator.
pub const TICK_ERROR_WINDOW: usize = 20;

/// Ticks subtracted from the estimated server tick before draining buffered packets.
pub const JITTER_COMPENSATION_TICKS: u16 = 3;

/// Fixed-window integer moving average.
#[derive(Debug, Clone)]
pub struct MovingAverage {
    samples: VecDeque<i32>,
    window: usize,
    sum: i64,
}

impl MovingAverage {
    pub fn new(window: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(window),
            window: window.max(1),
            sum: 0,
        }
    }

    pub fn insert(&mut self, value: i32) {
        if self.samples.len() >= self.window {
            if let Some(old) = self.samples.pop_front() {
                self.sum -= i64::from(old);
            }
        }
        self.samples.push_back(value);
        self.sum += i64::from(value);
    }

    pub fn average(&self) -> i32 {
        if self.samples.is_empty() {
            return 0;
        }
        (self.sum / self.samples.len() as i64) as i32
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
struct TickPrediction {
    server_tick: Tick,
    tick_error: i32,
}

/// Client-side estimate of the server's current tick.
///
/// Every input packet carries the tick the client believes the server is at.
/// The server answers with the signed error of that guess; summing it with
/// the error the client was already compensating for at send time gives one
/// sample of the true offset.
#[derive(Debug)]
pub struct ClockEstimator {
    average_tick_error: MovingAverage,
    predictions: VecDeque<TickPrediction>,
    max_predictions: usize,
    jitter_compensation: u16,
}

impl ClockEstimator {
    pub fn new(max_predictions: usize) -> Self {
        Self {
            average_tick_error: MovingAverage::new(TICK_ERROR_WINDOW),
            predictions: VecDeque::with_capacity(max_predictions),
            max_predictions: max_predictions.max(1),
            jitter_compensation: JITTER_COMPENSATION_TICKS,
        }
    }

    pub fn with_jitter_compensation(mut self, ticks: u16) -> Self {
        self.jitter_compensation = ticks;
        self
    }

    pub fn average_tick_error(&self) -> i32 {
        self.average_tick_error.average()
    }

    pub fn estimate_server_tick(&self, local_tick: Tick) -> Tick {
        local_tick.wrapping_sub(self.average_tick_error.average() as u16)
    }

    /// Turns an estimated server tick into the tick up to which buffered packets are handled.
    pub fn adjust_server_tick(&self, tick: Tick) -> Tick {
        tick.wrapping_sub(self.jitter_compensation)
    }

    pub fn record_prediction(&mut self, server_tick: Tick) {
        while self.predictions.len() >= self.max_predictions {
            self.predictions.pop_front();
        }

        self.predictions.push_back(TickPrediction {
            server_tick,
            tick_error: self.average_tick_error.average(),
        });
    }

    /// Returns false when no prediction matches `server_tick`; the correction is dropped.
    pub fn handle_correction(&mut self, server_tick: Tick, tick_error: i32) -> bool {
        let Some(index) = self
            .predictions
            .iter()
            .position(|p| p.server_tick == server_tick)
        else {
            log::warn!(
                "no tick prediction for server tick {} (error {}), correction dropped",
                server_tick,
                tick_error
            );
            return false;
        };

        let prediction = self.predictions[index];
        self.predictions.drain(..=index);

        let corrected = prediction.tick_error + tick_error;
        self.average_tick_error.insert(corrected);

        log::debug!(
            "tick correction for {}: {} -> average {}",
            server_tick,
            corrected,
            self.average_tick_error.average()
        );

        true
    }

    pub fn pending_predictions(&self) -> usize {
        self.predictions.len()
    }

    pub fn reset(&mut self) {
        self.average_tick_error = MovingAverage::new(TICK_ERROR_WINDOW);
        self.predictions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn moving_average_window() {
        let mut avg = MovingAverage::new(3);
        assert_eq!(avg.average(), 0);

        avg.insert(3);
        avg.insert(6);
        assert_eq!(avg.average(), 4);

        avg.insert(9);
        avg.insert(12);
        assert_eq!(avg.len(), 3);
        assert_eq!(avg.average(), 9);
    }

    #[test]
    fn estimate_follows_corrections() {
        let mut estimator = ClockEstimator::new(120);
        assert_eq!(estimator.estimate_server_tick(100), 100);

        estimator.record_prediction(100);
        assert!(estimator.handle_correction(100, 5));
        assert_eq!(estimator.average_tick_error(), 5);
        assert_eq!(estimator.estimate_server_tick(101), 96);

        // Sent while already compensating by 5, server reports it is now exact.
        estimator.record_prediction(96);
        assert!(estimator.handle_correction(96, 0));
        assert_eq!(estimator.average_tick_error(), 5);
    }

    #[test]
    fn estimate_wraps_below_zero() {
        let mut estimator = ClockEstimator::new(8);
        estimator.record_prediction(2);
        estimator.handle_correction(2, 10);
        assert_eq!(estimator.estimate_server_tick(4), 65530);
    }

    #[test]
    fn unmatched_correction_dropped() {
        let mut estimator = ClockEstimator::new(8);
        estimator.record_prediction(10);

        assert!(!estimator.handle_correction(11, 50));
        assert_eq!(estimator.average_tick_error(), 0);
        assert_eq!(estimator.pending_predictions(), 1);
    }

    #[test]
    fn matched_correction_discards_older() {
        let mut estimator = ClockEstimator::new(8);
        estimator.record_prediction(10);
        estimator.record_prediction(11);
        estimator.record_prediction(12);

        assert!(estimator.handle_correction(11, 1));
        assert_eq!(estimator.pending_predictions(), 1);
        assert!(!estimator.handle_correction(10, 1));
    }

    #[test]
    fn predictions_capped() {
        let mut estimator = ClockEstimator::new(4);
        for tick in 0..10 {
            estimator.record_prediction(tick);
        }
        assert_eq!(estimator.pending_predictions(), 4);
        assert!(!estimator.handle_correction(5, 0));
        assert!(estimator.handle_correction(6, 0));
    }

    #[test]
    fn adjust_applies_jitter_compensation() {
        let estimator = ClockEstimator::new(8).with_jitter_compensation(3);
        assert_eq!(estimator.adjust_server_tick(10), 7);
        assert_eq!(estimator.adjust_server_tick(1), 65534);
    }
}
