//! Prometheus metrics
//!
//! Counters are registered into the registry served on `/metrics`.

use prometheus::{IntCounterVec, Opts, Registry};

/// Operator counters
#[derive(Debug, Clone)]
pub struct Metrics {
    /// Reconciliation passes by outcome
    reconciles: IntCounterVec,
    /// Drain steps taken on upgrading nodes
    drain_actions: IntCounterVec,
}

impl Metrics {
    /// Creates the counters and registers them with `registry`.
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let reconciles = IntCounterVec::new(
            Opts::new("onload_reconcile_total", "Reconciliation passes by outcome"),
            &["outcome"],
        )?;
        let drain_actions = IntCounterVec::new(
            Opts::new("onload_drain_actions_total", "Drain steps taken on upgrading nodes"),
            &["action"],
        )?;
        registry.register(Box::new(reconciles.clone()))?;
        registry.register(Box::new(drain_actions.clone()))?;
        Ok(Self { reconciles, drain_actions })
    }

    /// Counts one reconciliation pass.
    pub fn record_reconcile(&self, outcome: &str) {
        self.reconciles.with_label_values(&[outcome]).inc();
    }

    /// Counts one drain step.
    pub fn record_drain_action(&self, action: &str) {
        self.drain_actions.with_label_values(&[action]).inc();
    }

    #[cfg(test)]
    pub fn reconcile_count(&self, outcome: &str) -> u64 {
        self.reconciles.with_label_values(&[outcome]).get()
    }

    #[cfg(test)]
    pub fn drain_action_count(&self, action: &str) -> u64 {
        self.drain_actions.with_label_values(&[action]).get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_are_exported() {
        let registry = Registry::new();
        let metrics = Metrics::new(&registry).expect("register metrics");

        metrics.record_reconcile("done");
        metrics.record_reconcile("done");
        metrics.record_drain_action("evict");

        assert_eq!(metrics.reconcile_count("done"), 2);
        assert_eq!(metrics.drain_action_count("evict"), 1);

        let names: Vec<String> = registry.gather().iter().map(|f| f.name().to_string()).collect();
        assert!(names.contains(&"onload_reconcile_total".to_string()));
        assert!(names.contains(&"onload_drain_actions_total".to_string()));
    }

    #[test]
    fn test_double_registration_fails() {
        let registry = Registry::new();
        Metrics::new(&registry).expect("first registration");
        assert!(Metrics::new(&registry).is_err());
    }
}
