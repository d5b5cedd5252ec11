//! The watchdog control loop and its waiting primitives.

pub mod backoff;
pub mod monitor;
pub mod shutdown;

pub use backoff::{poll_until, Fibonacci, WaitOutcome};
pub use monitor::{MonitorExit, Watchdog};
pub use shutdown::{NeverShutdown, ShutdownFlag, ShutdownSignal, StoreShutdownSignal};
