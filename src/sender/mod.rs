//! Outbound delivery: an HTTP sender (auth, rate limiting, connection pooling) wrapped by a batch
//! sender (accumulation, JSON/gzip encoding).

pub mod batch;
pub mod http;

pub use batch::BatchSender;
pub use http::HttpSender;
