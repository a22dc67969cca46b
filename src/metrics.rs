use crate::models::{JobStatus, Platform};
use tracing::trace;

// Trace-based counters; the Prometheus endpoint renders the recorder separately.

pub fn inc_requests(route: &'static str) {
    trace!(target = "flipscout.metrics", route = route, "requests_total_inc");
}

pub fn stage_elapsed(stage: &'static str, elapsed_ms: u128) {
    trace!(
        target = "flipscout.metrics",
        stage = stage,
        elapsed_ms = elapsed_ms as u64,
        "stage_elapsed"
    );
}

pub fn job_finished(status: JobStatus, elapsed_ms: u128) {
    trace!(
        target = "flipscout.metrics",
        status = ?status,
        elapsed_ms = elapsed_ms as u64,
        "jobs_finished_inc"
    );
}

pub fn opportunity_saved(platform: Platform) {
    trace!(
        target = "flipscout.metrics",
        platform = platform.as_str(),
        "opportunities_saved_inc"
    );
}
