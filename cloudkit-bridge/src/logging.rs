//! Subscriber setup for the binaries.
//!
//! The library only emits `tracing` events. Processes embedding it call
//! [`init_logging`] once; `RUST_LOG` wins over the configured filter.

use tracing_subscriber::EnvFilter;

/// Install a global fmt subscriber.
///
/// Returns `false` if a subscriber was already installed (for example by
/// the host application), in which case nothing changes.
pub fn init_logging(default_filter: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_a_no_op() {
        // Whichever call comes first in this process wins.
        let _ = init_logging("debug");
        assert!(!init_logging("info"));
    }
}
