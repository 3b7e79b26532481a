pub mod retry;

pub use retry::{is_http_retryable, RetryPolicy};
