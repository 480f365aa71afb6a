//! Process-wide tracing setup shared by every binary.

pub mod tracing;

/// Install the JSON tracing subscriber.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init() {
    tracing::init(tracing::DEFAULT_DIRECTIVE);
}
