//! Logging Setup
//!
//! Convenience `tracing-subscriber` initialization for hosts and demos.
//! `RUST_LOG` wins when set; otherwise everything under `duet_core` logs
//! at the given level.

/// Initialize logging with the specified level.
///
/// # Panics
///
/// Panics if a global subscriber is already installed. Use [`try_init`]
/// where that can happen, e.g. in tests.
pub fn init(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("duet_core={level}")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();
}

/// Like [`init`] but quietly does nothing when a subscriber already exists
pub fn try_init(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("duet_core={level}")));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .try_init();
}
