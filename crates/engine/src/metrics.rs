use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref WORKFLOWS_SUBMITTED_TOTAL: IntCounter = IntCounter::new(
        "mailflow_workflows_submitted_total",
        "Total number of submitted workflows."
    )
    .unwrap();
    pub static ref STEPS_EXECUTED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("mailflow_steps_executed_total", "Total number of executed steps."),
        &["step_type"]
    )
    .unwrap();
    pub static ref EMAILS_SENT_TOTAL: IntCounter =
        IntCounter::new("mailflow_emails_sent_total", "Total number of emails handed to the transport.")
            .unwrap();
    pub static ref EVENTS_RECEIVED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("mailflow_events_received_total", "Total number of engagement events received."),
        &["kind"]
    )
    .unwrap();
    pub static ref WORKFLOW_FAILURES_TOTAL: IntCounter = IntCounter::new(
        "mailflow_workflow_failures_total",
        "Total number of workflow runs that ended in an error."
    )
    .unwrap();
}

/// Register all collectors with `REGISTRY`. Safe to call more than once.
pub fn register_metrics() {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(WORKFLOWS_SUBMITTED_TOTAL.clone()),
        Box::new(STEPS_EXECUTED_TOTAL.clone()),
        Box::new(EMAILS_SENT_TOTAL.clone()),
        Box::new(EVENTS_RECEIVED_TOTAL.clone()),
        Box::new(WORKFLOW_FAILURES_TOTAL.clone()),
    ];
    for collector in collectors {
        if let Err(e) = REGISTRY.register(collector) {
            if !matches!(e, prometheus::Error::AlreadyReg) {
                tracing::warn!("Failed to register metric: {}", e);
            }
        }
    }
}

// Gather metrics for exposition
pub fn gather_metrics() -> crate::Result<String> {
    let mut buffer = vec![];
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| crate::Error::Internal(format!("Failed to encode metrics: {}", e)))?;
    String::from_utf8(buffer)
        .map_err(|e| crate::Error::Internal(format!("Metrics are not valid UTF-8: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_includes_registered_counters() {
        register_metrics();
        register_metrics();
        WORKFLOWS_SUBMITTED_TOTAL.inc();
        STEPS_EXECUTED_TOTAL.with_label_values(&["email"]).inc();

        let text = gather_metrics().unwrap();
        assert!(text.contains("mailflow_workflows_submitted_total"));
        assert!(text.contains("step_type=\"email\""));
    }
}
