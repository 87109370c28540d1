//! Middleware for the Koperasi API
//!
//! Request tracing with a per-request id and response security headers.

mod security;
mod tracing;

pub use self::security::{hsts_header, security_headers};
pub use self::tracing::{request_tracing, REQUEST_ID_HEADER};
