//! Clock context trait for the traffic engine.

use async_trait::async_trait;
use std::time::Duration;

/// The authoritative simulation clock.
///
/// The engine itself never reads time on its own; whoever drives the
/// simulation samples `now()` once per tick and hands it down.
///
/// # Implementations
///
/// - **Wall clock**: `TokioContext` - wraps `tokio::time`
/// - **Simulation**: `SimContext` (in `trafnet_sim`) - virtual time advanced by the harness
#[async_trait]
pub trait TrafficContext: Send + Sync + 'static {
    /// Returns the time elapsed since the context was created.
    fn now(&self) -> Duration;

    /// Suspends until `duration` has passed.
    ///
    /// In simulation this advances the virtual clock instead of waiting.
    async fn sleep(&self, duration: Duration);

    /// Returns the context's seed (0 when not seeded).
    fn seed(&self) -> u64;

    /// Convenience: `now()` in seconds.
    fn now_secs(&self) -> f64 {
        self.now().as_secs_f64()
    }
}
