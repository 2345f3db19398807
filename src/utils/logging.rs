use log::warn;

/// Reports a dropped request against a hard per-kind budget.
pub fn warn_capacity_exceeded(resource: &str, limit: u32) {
    warn!("{resource} budget of {limit} exhausted; request ignored");
}
