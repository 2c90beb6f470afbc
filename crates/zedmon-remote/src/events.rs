use tracing::{info, warn};

/// Out-of-band events the mediator surfaces to its embedder: logpoint
/// output, non-fatal warnings, and the request to drop any cached call-stack
/// view after a snapshot or state load.
pub trait EventSink: Send {
    /// A logpoint fired; `line` is the rendered format string.
    fn log_line(&self, line: &str);

    fn warning(&self, message: &str);

    /// Memory or registers changed wholesale; any derived view is stale.
    fn clear_call_stack(&self) {}
}

/// Default sink: forward everything to `tracing`.
pub struct TracingSink;

impl EventSink for TracingSink {
    fn log_line(&self, line: &str) {
        info!(target: "logpoint", "{line}");
    }

    fn warning(&self, message: &str) {
        warn!("{message}");
    }
}
