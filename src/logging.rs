//! Tracing subscriber setup.
//!
//! `RUST_LOG` takes precedence over `[logging] level`. Output goes to
//! stderr so command output on stdout stays machine-readable.

use tracing_subscriber::EnvFilter;

/// Install the global fmt subscriber. Calling it twice is a no-op.
pub fn init(level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Shorten user text for log lines, appending `...` when cut.
pub fn preview(text: &str, max_chars: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}
