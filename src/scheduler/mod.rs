//! Long-running background workers.
//!
//! Both loops share the configured polling interval and a cancellation
//! token; cancellation is observed within one tick. Per-service failures are
//! logged and swallowed so one bad upstream cannot starve either loop.

pub mod check_scheduler;
pub mod route_poller;

pub use check_scheduler::{run_check_tick, spawn_check_scheduler};
pub use route_poller::spawn_route_poller;
