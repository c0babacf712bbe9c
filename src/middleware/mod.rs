//! HTTP middleware for authentication, admission control, and observability.
//!
//! # Architecture
//!
//! ```text
//! Request → Request ID → Trace → CORS → Auth → Rate Limiter → Handler → Response
//!               ↓                  ↓       ↓          ↓
//!        X-Request-Id header  preflight  403      429 Too Many
//! ```
//!
//! # Security Considerations
//!
//! - Frontend secret comparison uses constant-time equality to prevent timing attacks
//! - Authentication runs before admission control, so bad credentials never
//!   consume quota and always get the same 403
//! - Client addresses come from the TCP peer unless it is a configured trusted proxy
//! - Rate limiter state is bounded: idle clients are evicted

pub mod auth;
pub mod ip;
pub mod rate_limit;
pub mod request_id;
pub mod sliding_window;

pub use auth::{FRONTEND_SECRET_HEADER, FrontendSecretAuth};
pub use ip::{UNKNOWN_IP, client_address, peer_addr};
pub use rate_limit::{CidrRange, RateLimitError, RateLimitLayer, TrustedProxyConfig};
pub use request_id::{REQUEST_ID_HEADER, RequestId, RequestIdLayer};
pub use sliding_window::{KeyedLimiter, NotAdmitted, SlidingWindowLimiter};
