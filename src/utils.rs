use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Rolling frame-rate estimate for diagnostic logging
#[derive(Debug)]
pub struct FpsMeter {
    window: VecDeque<Duration>,
    window_len: usize,
    total: Duration,
    frames: u64,
    last_tick: Instant,
    last_report: Instant,
    report_every: Duration,
}

impl FpsMeter {
    /// `window_len` frame intervals feed the rolling rate; at least one.
    pub fn new(window_len: usize, report_every: Duration) -> Self {
        let now = Instant::now();
        Self {
            window: VecDeque::with_capacity(window_len.max(1)),
            window_len: window_len.max(1),
            total: Duration::ZERO,
            frames: 0,
            last_tick: now,
            last_report: now,
            report_every,
        }
    }

    /// Record one frame. Returns the rolling rate when a report is due.
    pub fn tick(&mut self) -> Option<f64> {
        let now = Instant::now();
        self.record(now.duration_since(self.last_tick));
        self.last_tick = now;

        if now.duration_since(self.last_report) >= self.report_every {
            self.last_report = now;
            Some(self.current_fps())
        } else {
            None
        }
    }

    fn record(&mut self, interval: Duration) {
        if self.window.len() == self.window_len {
            self.window.pop_front();
        }
        self.window.push_back(interval);
        self.total += interval;
        self.frames += 1;
    }

    pub fn current_fps(&self) -> f64 {
        rate(self.window.iter().sum(), self.window.len() as u64)
    }

    pub fn average_fps(&self) -> f64 {
        rate(self.total, self.frames)
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }
}

fn rate(elapsed: Duration, frames: u64) -> f64 {
    let secs = elapsed.as_secs_f64();
    if frames == 0 || secs <= 0.0 {
        0.0
    } else {
        frames as f64 / secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rolling_rate_uses_recent_window() {
        let mut meter = FpsMeter::new(2, Duration::from_secs(60));
        meter.record(Duration::from_millis(500));
        meter.record(Duration::from_millis(100));
        meter.record(Duration::from_millis(100));
        assert!((meter.current_fps() - 10.0).abs() < 1e-9);
        assert!((meter.average_fps() - 3.0 / 0.7).abs() < 1e-9);
        assert_eq!(meter.frames(), 3);
    }

    #[test]
    fn empty_meter_reports_zero() {
        let meter = FpsMeter::new(10, Duration::from_secs(1));
        assert_eq!(meter.current_fps(), 0.0);
        assert_eq!(meter.average_fps(), 0.0);
    }

    #[test]
    fn reports_only_when_due() {
        let mut meter = FpsMeter::new(10, Duration::from_secs(3600));
        assert!(meter.tick().is_none());

        let mut eager = FpsMeter::new(10, Duration::ZERO);
        assert!(eager.tick().is_some());
    }
}
