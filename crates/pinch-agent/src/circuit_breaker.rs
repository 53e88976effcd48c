//! Sliding-window anomaly detector (§4.7.4). Four independent counters
//! — message flood, permission violation, spending exceeded, boundary
//! probe — each pruned to its own window so memory stays bounded.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::config::CircuitBreakerThresholds;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BreakerTrigger {
    MessageFlood,
    PermissionViolation,
    SpendingExceeded,
    BoundaryProbe,
}

impl BreakerTrigger {
    fn window(self, thresholds: &CircuitBreakerThresholds) -> Duration {
        match self {
            BreakerTrigger::MessageFlood => thresholds.flood_window,
            BreakerTrigger::PermissionViolation => thresholds.permission_violation_window,
            BreakerTrigger::SpendingExceeded => thresholds.spending_exceeded_window,
            BreakerTrigger::BoundaryProbe => thresholds.boundary_probe_window,
        }
    }

    fn threshold(self, thresholds: &CircuitBreakerThresholds) -> u32 {
        match self {
            BreakerTrigger::MessageFlood => thresholds.flood_count,
            BreakerTrigger::PermissionViolation => thresholds.permission_violation_count,
            BreakerTrigger::SpendingExceeded => thresholds.spending_exceeded_count,
            BreakerTrigger::BoundaryProbe => thresholds.boundary_probe_count,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            BreakerTrigger::MessageFlood => "message_flood",
            BreakerTrigger::PermissionViolation => "permission_violation",
            BreakerTrigger::SpendingExceeded => "spending_exceeded",
            BreakerTrigger::BoundaryProbe => "boundary_probe",
        }
    }
}

/// The outcome of evaluating one trigger after recording an event.
pub struct BreakerTrip {
    pub trigger: BreakerTrigger,
    pub count: usize,
    pub threshold: u32,
    pub window: Duration,
}

/// Per-connection circuit breaker state. One instance tracks all four
/// counters for a single connection.
#[derive(Default)]
pub struct CircuitBreaker {
    events: HashMap<BreakerTrigger, Vec<DateTime<Utc>>>,
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one occurrence of `trigger` and evaluate whether it now
    /// breaches its threshold. Events older than the longest window
    /// are pruned to bound memory.
    pub fn record(&mut self, trigger: BreakerTrigger, thresholds: &CircuitBreakerThresholds) -> Option<BreakerTrip> {
        let now = Utc::now();
        let window = trigger.window(thresholds);
        let entry = self.events.entry(trigger).or_default();
        entry.push(now);
        let cutoff = now - chrono::Duration::from_std(window).unwrap_or_default();
        entry.retain(|t| *t >= cutoff);

        let threshold = trigger.threshold(thresholds);
        if entry.len() as u32 >= threshold {
            Some(BreakerTrip {
                trigger,
                count: entry.len(),
                threshold,
                window,
            })
        } else {
            None
        }
    }
}
