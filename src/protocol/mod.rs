//! Control socket protocol.
//!
//! A client sends a `Request` and receives exactly one `Response`, both as
//! length-prefixed JSON frames:
//! ```text
//! [4 bytes: length (big-endian u32)][JSON payload]
//! ```
//! A connection may carry any number of request/response pairs.

mod request;
mod response;
mod wire;

pub use request::Request;
pub use response::{ErrorResponse, Response};
pub use wire::{read_message, write_message, Framing, DEFAULT_MAX_MESSAGE_SIZE};
