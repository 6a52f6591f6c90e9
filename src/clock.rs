// src/clock.rs
//! Step timing for the world stepper and the real-time loop.
//!
//! - **StepClock**: step counter, simulated time and rolling wall-clock step
//!   statistics (average over the last 120 steps, min/max since start).
//! - **Pacer**: fixed-period deadlines with a catch-up limit, so a long stall
//!   does not trigger a burst of back-to-back steps afterwards.

use crate::math::Real;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

const HISTORY: usize = 120;

/// Step counter plus wall-clock statistics.
#[derive(Debug, Clone)]
pub struct StepClock {
    time_step: Real,
    step: u64,
    last_ms: f64,
    min_ms: f64,
    max_ms: f64,
    history: VecDeque<f64>,
    history_sum: f64,
}

impl StepClock {
    pub fn new(time_step: Real) -> Self {
        Self {
            time_step,
            step: 0,
            last_ms: 0.0,
            min_ms: f64::MAX,
            max_ms: 0.0,
            history: VecDeque::with_capacity(HISTORY),
            history_sum: 0.0,
        }
    }

    #[inline(always)]
    pub fn step(&self) -> u64 {
        self.step
    }

    #[inline(always)]
    pub fn time_step(&self) -> Real {
        self.time_step
    }

    /// Simulated seconds; `step * dt` stays exact where a running sum drifts.
    #[inline(always)]
    pub fn time(&self) -> Real {
        self.step as Real * self.time_step
    }

    #[inline(always)]
    pub fn begin(&self) -> Instant {
        Instant::now()
    }

    /// Close a step started at `started`; returns the new step index.
    pub fn finish(&mut self, started: Instant) -> u64 {
        let ms = started.elapsed().as_secs_f64() * 1000.0;
        self.record(ms);
        self.step += 1;
        self.step
    }

    fn record(&mut self, ms: f64) {
        self.last_ms = ms;
        self.min_ms = self.min_ms.min(ms);
        self.max_ms = self.max_ms.max(ms);
        self.history.push_back(ms);
        self.history_sum += ms;
        if self.history.len() > HISTORY {
            if let Some(old) = self.history.pop_front() {
                self.history_sum -= old;
            }
        }
    }

    #[inline(always)]
    pub fn last_step_ms(&self) -> f64 {
        self.last_ms
    }

    pub fn average_step_ms(&self) -> f64 {
        if self.history.is_empty() {
            0.0
        } else {
            self.history_sum / self.history.len() as f64
        }
    }

    pub fn min_step_ms(&self) -> f64 {
        if self.history.is_empty() {
            0.0
        } else {
            self.min_ms
        }
    }

    #[inline(always)]
    pub fn max_step_ms(&self) -> f64 {
        self.max_ms
    }
}

/// Fixed-period deadline tracker.
#[derive(Debug, Clone)]
pub struct Pacer {
    period: Duration,
    next: Instant,
    /// Deadlines further behind than this are dropped instead of caught up.
    max_lag: Duration,
}

impl Pacer {
    pub fn new(period: Duration) -> Self {
        Self { period, next: Instant::now() + period, max_lag: period * 5 }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Sleep until the next deadline. Returns how far past it we already
    /// were, if the step overran its period.
    pub fn wait(&mut self) -> Option<Duration> {
        let now = Instant::now();
        if now < self.next {
            std::thread::sleep(self.next - now);
            self.next += self.period;
            return None;
        }
        let late = now - self.next;
        self.next = if late > self.max_lag { now + self.period } else { self.next + self.period };
        Some(late)
    }
}
