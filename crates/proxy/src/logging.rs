//! Log output setup.
//!
//! The library itself only emits `tracing` events; binaries decide where they go.

use tracing::Level;
use tracing::subscriber::SetGlobalDefaultError;
use tracing_subscriber::FmtSubscriber;

/// Installs a formatting subscriber for events at `max_level` and above as the global
/// default. Fails if a global subscriber was already set.
pub fn init(max_level: Level) -> Result<(), SetGlobalDefaultError> {
    let subscriber = FmtSubscriber::builder().with_max_level(max_level).with_target(true).finish();
    tracing::subscriber::set_global_default(subscriber)
}
