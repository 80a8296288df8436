//! HTTP/1.1 message types exchanged between the transport and handlers.
//!
//! - [`Method`] and [`StatusCode`]: request method and response status.
//! - [`Headers`]: order-preserving, case-insensitive header list.
//! - [`Request`]: a framed inbound request with its absolute URL.
//! - [`Response`]: an outbound response and its wire serialization.

pub mod headers;
pub mod method;
pub mod request;
pub mod response;
pub mod status;

pub use headers::Headers;
pub use method::Method;
pub use request::{Request, RequestError};
pub use response::Response;
pub use status::StatusCode;
