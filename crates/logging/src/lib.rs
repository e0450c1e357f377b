//! ACN Logging
//!
//! Tracing setup shared by the node binary and the integration tests.
//! The defaults keep the libp2p host internals quieter than the node's
//! own modules; setting `RUST_LOG` overrides everything.

use tracing_subscriber::EnvFilter;

/// Filter applied when `RUST_LOG` is not set.
///
/// The swarm, multistream negotiation and Kademlia emit a lot at debug;
/// a verbose node run wants ACN's routing decisions, not theirs.
fn default_filter(verbose: bool) -> &'static str {
    if verbose {
        "debug,libp2p=info,multistream_select=info,yamux=info"
    } else {
        "info,libp2p=warn"
    }
}

/// Initialize logging for a binary.
///
/// # Panics
///
/// Panics when a subscriber is already installed; use [`try_init`] to
/// handle that case.
pub fn init(verbose: bool) {
    try_init(verbose).expect("failed to initialize logging");
}

/// Fallible variant of [`init`].
pub fn try_init(verbose: bool) -> Result<(), String> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter(verbose)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| e.to_string())
}

/// Initialize logging for tests (captures output for the test
/// framework). Safe to call from every test; only the first call takes
/// effect.
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(default_filter(true)))
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_quiets_libp2p() {
        let filter = default_filter(false);
        assert!(filter.starts_with("info"));
        assert!(filter.contains("libp2p=warn"));
    }

    #[test]
    fn test_verbose_filter_enables_debug() {
        assert!(default_filter(true).starts_with("debug"));
    }

    #[test]
    fn test_filters_parse() {
        for verbose in [false, true] {
            EnvFilter::try_new(default_filter(verbose)).expect("filter must parse");
        }
    }
}
