//! Link registry — decides which links should exist, dials them, arbitrates
//! duplicates, and keeps the controllers informed.
//!
//! Two concurrency domains:
//!   - live link maps (`by_key`, `by_id`) behind a read/write lock, touched by
//!     transport callbacks on any task;
//!   - destinations and the retry heap, owned by a single actor task that
//!     drains one command queue.

mod actor;
mod events;
mod gc;
mod heap;
mod notify;
mod registry;
mod state;

pub use heap::{RetryEntry, RetryHeap};
pub use registry::{ApplyOutcome, LinkRegistry, RegistryEnv};
pub use state::{LinkDest, LinkState, LinkStatus};

use meshlink_core::wire::DEFAULT_BINDING;

/// Composite link key: `"{dialer_binding}->{protocol}:{dest}->{listener_binding}"`.
///
/// Empty bindings become `default`. With a legacy controller present every
/// binding is `default`, since old controllers can't tell bindings apart.
pub fn link_key(
    dialer_binding: &str,
    protocol: &str,
    dest: &str,
    listener_binding: &str,
    legacy: bool,
) -> String {
    let dialer_binding = if dialer_binding.is_empty() || legacy {
        DEFAULT_BINDING
    } else {
        dialer_binding
    };
    let listener_binding = if listener_binding.is_empty() || legacy {
        DEFAULT_BINDING
    } else {
        listener_binding
    };
    format!("{dialer_binding}->{protocol}:{dest}->{listener_binding}")
}
