//! Backend Integration
//!
//! The transport seam ([`ChatBackend`]), the HTTP implementation, and the
//! registry that tracks spawned request tasks.

pub mod http;
pub mod registry;
pub mod traits;

pub use http::HttpBackend;
pub use registry::TaskRegistry;
pub use traits::{ChatBackend, SendRequest};
