//! Tracing setup for applications embedding the loop

use tracing_subscriber::EnvFilter;

/// Install a formatted tracing subscriber
///
/// `RUST_LOG` wins when set; otherwise `info`, or `debug` when verbose.
/// Returns false when a global subscriber was already installed.
pub fn init_tracing(verbose: bool) -> bool {
    let fallback = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_harmless() {
        let _ = init_tracing(false);
        assert!(!init_tracing(true));
    }
}
