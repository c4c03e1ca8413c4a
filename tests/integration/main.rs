//! Link registry scenario tests.
//!
//! Each test drives a real `LinkRegistry` through the mock links, dialers
//! and controllers in `infra`. Tests run on a paused tokio clock, so timers
//! elapse as soon as every task is idle.
//!
//!   cargo test --test integration

mod infra;
pub use infra::*;

mod dedup;
mod notify;
