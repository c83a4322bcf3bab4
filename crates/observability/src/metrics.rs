//! Job and pipeline metrics emitted through the `metrics` facade.
//!
//! An exporter is the operator's choice; nothing here installs one.

use metrics::{counter, histogram};

/// Record a job state transition.
pub fn job_status_changed(status: &str) {
    counter!("docsmith_jobs_total", "status" => status.to_string()).increment(1);
}

/// Record total pipeline duration for one job.
pub fn job_duration(duration_ms: u64) {
    histogram!("docsmith_job_duration_ms").record(duration_ms as f64);
}

/// Record per-stage duration.
pub fn stage_duration(stage: &str, duration_ms: u64) {
    histogram!("docsmith_stage_duration_ms", "stage" => stage.to_string())
        .record(duration_ms as f64);
}

/// Record a broker redelivery.
pub fn redelivery() {
    counter!("docsmith_redeliveries_total").increment(1);
}

/// Record a model call with its reported token usage.
pub fn model_call(input_tokens: u64, output_tokens: u64) {
    counter!("docsmith_model_calls_total").increment(1);
    counter!("docsmith_model_input_tokens_total").increment(input_tokens);
    counter!("docsmith_model_output_tokens_total").increment(output_tokens);
}
