//! Adaptive per-host throttling.
//!
//! Keeps a per-host delay that starts at `start_delay`, tracks observed
//! latency with exponential smoothing, and converges the delay toward
//! `latency / target_concurrency`, bounded by `max_delay`. Slow hosts
//! are backed off; fast hosts approach the target concurrency.

use std::time::Duration;

use dashmap::DashMap;

use crate::settings::AutoThrottleSettings;

const SMOOTHING: f64 = 0.7;

#[derive(Debug, Clone, Copy)]
struct HostState {
    delay: f64,
    latency: Option<f64>,
}

/// Latency-tracking throttler, keyed by host.
pub struct AutoThrottler {
    start_delay: f64,
    max_delay: f64,
    target_concurrency: f64,
    hosts: DashMap<String, HostState>,
}

impl AutoThrottler {
    /// `default_target` is used when the settings leave
    /// `target_concurrency` unset; callers derive it from the global
    /// concurrency.
    pub fn new(settings: &AutoThrottleSettings, default_target: f64) -> Self {
        Self {
            start_delay: settings.start_delay_secs,
            max_delay: settings.max_delay_secs,
            target_concurrency: settings.target_concurrency.unwrap_or(default_target).max(0.01),
            hosts: DashMap::new(),
        }
    }

    /// Sleep for the host's current delay.
    pub async fn wait(&self, host: &str) {
        let delay = self
            .hosts
            .get(host)
            .map(|state| state.delay)
            .unwrap_or(self.start_delay);
        if delay > 0.0 {
            tokio::time::sleep(Duration::from_secs_f64(delay)).await;
        }
    }

    /// Record an observed request latency and recalculate the delay.
    pub fn record_latency(&self, host: &str, latency: Duration) {
        let observed = latency.as_secs_f64();
        let mut state = self.hosts.entry(host.to_string()).or_insert(HostState {
            delay: self.start_delay,
            latency: None,
        });
        let smoothed = match state.latency {
            Some(previous) => SMOOTHING * previous + (1.0 - SMOOTHING) * observed,
            None => observed,
        };
        state.latency = Some(smoothed);
        let target_delay = smoothed / self.target_concurrency;
        state.delay = target_delay.clamp(0.0, self.max_delay);
        tracing::debug!(host, latency = smoothed, delay = state.delay, "auto-throttle");
    }

    /// Current delay for a host, mainly for tests and debugging.
    pub fn current_delay(&self, host: &str) -> f64 {
        self.hosts
            .get(host)
            .map(|state| state.delay)
            .unwrap_or(self.start_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn throttler(target: f64) -> AutoThrottler {
        let settings = AutoThrottleSettings {
            target_concurrency: Some(target),
            start_delay_secs: 0.25,
            max_delay_secs: 10.0,
        };
        AutoThrottler::new(&settings, 4.0)
    }

    #[test]
    fn starts_at_start_delay() {
        let t = throttler(2.0);
        assert!((t.current_delay("h") - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn slow_responses_increase_delay() {
        let t = throttler(1.0);
        t.record_latency("h", Duration::from_secs_f64(2.0));
        assert!(t.current_delay("h") > 1.0);
    }

    #[test]
    fn fast_responses_decrease_delay() {
        let t = throttler(10.0);
        t.record_latency("h", Duration::from_secs_f64(0.01));
        assert!(t.current_delay("h") < 0.25);
    }

    #[test]
    fn delay_is_capped() {
        let t = throttler(0.1);
        for _ in 0..5 {
            t.record_latency("h", Duration::from_secs_f64(60.0));
        }
        assert!(t.current_delay("h") <= 10.0);
    }

    #[test]
    fn hosts_are_independent() {
        let t = throttler(1.0);
        t.record_latency("slow", Duration::from_secs_f64(5.0));
        assert!((t.current_delay("fast") - 0.25).abs() < f64::EPSILON);
    }
}
