//! dynalloc-transport — carries broker messages over TCP.
//!
//! Each connection carries one request and its responses:
//!
//! ```text
//! client ──request[\0]──▶ read_message (poll loop, size bound)
//!                           │
//!                           ▼
//!                  RequestHandler::handle
//!                           │
//! client ◀──resp\0 resp\0── write_message (poll loop, retry bound)
//! ```
//!
//! [`MessageEngine`] owns the accept loop and exposes `start`,
//! `request_stop` and `await_stopped`.

pub mod error;
pub mod listener;
pub mod wire;

pub use error::{TransportError, TransportResult};
pub use listener::{MessageEngine, REQUEST_TOO_LARGE};
pub use wire::{WireConfig, discard_pending, read_message, write_message};
