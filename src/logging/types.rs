//! The [`Log`] trait shared by the orchestrator, the task registry and plugins.

/// Abstraction over logging backends.
///
/// [`Logger`](super::logger::Logger) forwards to `tracing`; tests substitute
/// `MockLog` to assert on specific messages.
#[cfg_attr(test, mockall::automock)]
pub trait Log: Send + Sync {
    /// Log a stage header (major section).
    fn stage(&self, msg: &str);
    /// Log an informational message.
    fn info(&self, msg: &str);
    /// Log a debug message (may be suppressed on console).
    fn debug(&self, msg: &str);
    /// Log a warning message.
    fn warn(&self, msg: &str);
    /// Log an error message.
    fn error(&self, msg: &str);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_log_records_expected_warning() {
        let mut log = MockLog::new();
        log.expect_warn()
            .withf(|msg| msg.contains("apt"))
            .times(1)
            .return_const(());
        let log_ref: &dyn Log = &log;
        log_ref.warn("apt lock held");
    }
}
