pub mod retry;

pub use retry::{RetryConfig, retry_http_call};
