//! Outbound clients used by the handlers.

mod upstream;

pub use upstream::{API_SECRET_HEADER, UpstreamClient, UpstreamResponse};
