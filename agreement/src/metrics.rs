use commonware_runtime::Metrics as RuntimeMetrics;
use prometheus_client::metrics::{counter::Counter, gauge::Gauge};

/// Metrics for the [crate::Engine].
#[derive(Default)]
pub struct Metrics {
    /// Number of committees installed
    pub committees: Counter,
    /// Number of lifecycle transitions applied
    pub transitions: Counter,
    /// Number of votes accepted
    pub votes_accepted: Counter,
    /// Number of votes rejected
    pub votes_rejected: Counter,
    /// Number of rounds that reached a decision
    pub finalized: Counter,
    /// Number of voters that missed a deadline
    pub timeouts: Counter,
    /// Latest finalized fast height
    pub height: Gauge,
}

impl Metrics {
    /// Create and return a new set of metrics, registered with the given context.
    pub fn init<E: RuntimeMetrics>(context: &E) -> Self {
        let metrics = Self::default();
        context.register(
            "committees",
            "Number of committees installed",
            metrics.committees.clone(),
        );
        context.register(
            "transitions",
            "Number of lifecycle transitions applied",
            metrics.transitions.clone(),
        );
        context.register(
            "votes_accepted",
            "Number of votes accepted",
            metrics.votes_accepted.clone(),
        );
        context.register(
            "votes_rejected",
            "Number of votes rejected",
            metrics.votes_rejected.clone(),
        );
        context.register(
            "finalized",
            "Number of rounds that reached a decision",
            metrics.finalized.clone(),
        );
        context.register(
            "timeouts",
            "Number of voters that missed a deadline",
            metrics.timeouts.clone(),
        );
        context.register(
            "height",
            "Latest finalized fast height",
            metrics.height.clone(),
        );
        metrics
    }
}
