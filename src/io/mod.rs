//! I/O utilities for connectable
//!
//! The relay copies bytes between an intercepted client and its backend in
//! both directions, half-closing each side as its source finishes.

mod copy;

pub use copy::{relay, relay_with_buffer, RelayResult, DEFAULT_BUFFER_SIZE};
