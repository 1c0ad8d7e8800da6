//! Per-provider health and circuit-breaker state
//!
//! Mutated only by the router after each call attempt; read by the selection
//! algorithm before every dispatch. Entries are keyed per provider so
//! unrelated providers never contend.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct ProviderHealth {
    consecutive_failures: u32,
    circuit_open_until: Option<Instant>,
}

/// Snapshot of one provider's health, for the health surface
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub provider_id: String,
    pub consecutive_failures: u32,
    pub circuit_open: bool,
}

/// Shared health book for the whole provider chain
pub struct HealthBook {
    threshold: u32,
    cooldown: Duration,
    entries: Mutex<HashMap<String, ProviderHealth>>,
}

impl HealthBook {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold,
            cooldown,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Is this provider's circuit currently open?
    pub fn is_open(&self, provider_id: &str) -> bool {
        let map = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        map.get(provider_id)
            .and_then(|h| h.circuit_open_until)
            .is_some_and(|until| Instant::now() < until)
    }

    /// Record a successful call: failures reset, circuit closes
    pub fn record_success(&self, provider_id: &str) {
        let mut map = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let entry = map.entry(provider_id.to_string()).or_default();
        entry.consecutive_failures = 0;
        entry.circuit_open_until = None;
    }

    /// Record an exhausted-retries failure. Returns true when this failure
    /// opened the circuit.
    pub fn record_failure(&self, provider_id: &str) -> bool {
        let mut map = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let entry = map.entry(provider_id.to_string()).or_default();
        entry.consecutive_failures += 1;
        if entry.consecutive_failures >= self.threshold && entry.circuit_open_until.is_none() {
            entry.circuit_open_until = Some(Instant::now() + self.cooldown);
            return true;
        }
        // Re-arm an expired cooldown if failures keep coming
        if entry.consecutive_failures >= self.threshold {
            let now = Instant::now();
            if entry
                .circuit_open_until
                .is_some_and(|until| until <= now)
            {
                entry.circuit_open_until = Some(now + self.cooldown);
                return true;
            }
        }
        false
    }

    /// Current failure streak (tests and observability)
    pub fn consecutive_failures(&self, provider_id: &str) -> u32 {
        let map = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        map.get(provider_id)
            .map(|h| h.consecutive_failures)
            .unwrap_or(0)
    }

    /// Health snapshot for every provider seen so far
    pub fn snapshot(&self) -> Vec<HealthSnapshot> {
        let map = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let mut out: Vec<HealthSnapshot> = map
            .iter()
            .map(|(id, h)| HealthSnapshot {
                provider_id: id.clone(),
                consecutive_failures: h.consecutive_failures,
                circuit_open: h.circuit_open_until.is_some_and(|until| now < until),
            })
            .collect();
        out.sort_by(|a, b| a.provider_id.cmp(&b.provider_id));
        out
    }
}
