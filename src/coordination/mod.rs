//! Coordination primitives shared across venue adapters and the runtime.
//!
//! - [`circuit_breaker`]: per-API-key cooldown pool for rate-limited venues.
//! - [`shutdown`]: structured graceful shutdown sequencing.

pub mod circuit_breaker;
pub mod shutdown;

pub use circuit_breaker::{KeyPool, SharedKeyPool, MIN_COOLDOWN};
pub use shutdown::{
    install_signal_handlers, GracefulShutdown, ShutdownConfig, ShutdownError, ShutdownPhase,
    ShutdownSignal, ShutdownToken,
};
