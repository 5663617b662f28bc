//! Placement metrics
//!
//! Counters for planning outcomes, ledger reservations and affinity conflicts, kept
//! in a private prometheus registry so several managers can coexist in one process.

use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

use crate::error::{CumulusError, CumulusResult};

/// Outcome label of a placement attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlacementOutcome {
    Placed,
    NoCapacity,
    Failed,
}

impl PlacementOutcome {
    fn as_str(self) -> &'static str {
        match self {
            PlacementOutcome::Placed => "placed",
            PlacementOutcome::NoCapacity => "no_capacity",
            PlacementOutcome::Failed => "failed",
        }
    }
}

pub struct PlacementMetrics {
    registry: Registry,
    placements: IntCounterVec,
    reservations: IntCounterVec,
    affinity_conflicts: IntCounter,
}

impl std::fmt::Debug for PlacementMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlacementMetrics").finish_non_exhaustive()
    }
}

fn metrics_error(e: prometheus::Error) -> CumulusError {
    CumulusError::internal(format!("metrics registration failed: {}", e))
}

impl PlacementMetrics {
    pub fn new() -> CumulusResult<Self> {
        let registry = Registry::new();

        let placements = IntCounterVec::new(
            Opts::new(
                "cumulus_placements_total",
                "Placement attempts by planner and outcome",
            ),
            &["planner", "outcome"],
        )
        .map_err(metrics_error)?;
        let reservations = IntCounterVec::new(
            Opts::new(
                "cumulus_reservations_total",
                "Ledger reservations by mode and outcome",
            ),
            &["mode", "outcome"],
        )
        .map_err(metrics_error)?;
        let affinity_conflicts = IntCounter::new(
            "cumulus_affinity_conflicts_total",
            "Placements rejected by affinity rules",
        )
        .map_err(metrics_error)?;

        registry
            .register(Box::new(placements.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(reservations.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(affinity_conflicts.clone()))
            .map_err(metrics_error)?;

        Ok(Self {
            registry,
            placements,
            reservations,
            affinity_conflicts,
        })
    }

    pub fn record_placement(&self, planner: &str, outcome: PlacementOutcome) {
        self.placements
            .with_label_values(&[planner, outcome.as_str()])
            .inc();
    }

    pub fn record_reservation(&self, from_last_host: bool, granted: bool) {
        let mode = if from_last_host { "sticky" } else { "fresh" };
        let outcome = if granted { "granted" } else { "rejected" };
        self.reservations.with_label_values(&[mode, outcome]).inc();
    }

    pub fn record_affinity_conflict(&self) {
        self.affinity_conflicts.inc();
    }

    pub fn placements(&self, planner: &str, outcome: PlacementOutcome) -> u64 {
        self.placements
            .with_label_values(&[planner, outcome.as_str()])
            .get()
    }

    pub fn reservations(&self, from_last_host: bool, granted: bool) -> u64 {
        let mode = if from_last_host { "sticky" } else { "fresh" };
        let outcome = if granted { "granted" } else { "rejected" };
        self.reservations.with_label_values(&[mode, outcome]).get()
    }

    pub fn affinity_conflicts(&self) -> u64 {
        self.affinity_conflicts.get()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render all counters in the prometheus text exposition format
    pub fn gather_text(&self) -> CumulusResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metrics_error)?;
        String::from_utf8(buffer).map_err(|e| CumulusError::serialization("metrics text", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_are_labelled() {
        let metrics = PlacementMetrics::new().unwrap();
        metrics.record_placement("first-fit", PlacementOutcome::Placed);
        metrics.record_placement("first-fit", PlacementOutcome::Placed);
        metrics.record_reservation(true, false);
        metrics.record_affinity_conflict();

        assert_eq!(metrics.placements("first-fit", PlacementOutcome::Placed), 2);
        assert_eq!(metrics.placements("random", PlacementOutcome::Placed), 0);
        assert_eq!(metrics.reservations(true, false), 1);
        assert_eq!(metrics.affinity_conflicts(), 1);

        let text = metrics.gather_text().unwrap();
        assert!(text.contains("cumulus_placements_total"));
        assert!(text.contains("planner=\"first-fit\""));
    }
}
