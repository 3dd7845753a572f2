pub mod eta;
pub mod progress;
pub mod retry;

pub use eta::{Eta, EtaEvent, EtaOptions, EtaSnapshot, EtaStatus};
pub use progress::{format_bytes, format_duration, format_speed};
pub use retry::{is_retryable, retry_with_config, RetryConfig};
