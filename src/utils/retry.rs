use std::future::Future;
use std::time::Duration;
use reqwest::StatusCode;
use tokio::time::sleep;
use tracing::warn;
use crate::config::DEFAULT_RETRIES;
use crate::dav::TransportError;

/// 重试配置, 指数退避
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub should_retry: Box<dyn Fn(&TransportError) -> bool + Send + Sync>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_RETRIES,
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
            should_retry: Box::new(is_retryable),
        }
    }
}

impl RetryConfig {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let delay = self.initial_delay.as_secs_f64() * self.multiplier.powf(attempt as f64);
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }
}

/// Upload retry policy.
///
/// 507 (insufficient storage) is permanent. 423 (locked) is usually a
/// concurrent preview job and always worth another try. Otherwise retry
/// network errors and server errors, PUT being idempotent.
pub fn is_retryable(error: &TransportError) -> bool {
    match error.status_code() {
        Some(StatusCode::INSUFFICIENT_STORAGE) => false,
        Some(StatusCode::LOCKED) => true,
        Some(status) => status.is_server_error(),
        None => error.is_network_error(),
    }
}

/// 执行带重试的操作
pub async fn retry_with_config<F, Fut, T>(
    config: &RetryConfig,
    mut operation: F,
) -> Result<T, TransportError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TransportError>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(error) => {
                if attempt >= config.max_retries || !(config.should_retry)(&error) {
                    return Err(error);
                }

                let delay = config.delay(attempt);
                warn!(attempt = attempt + 1, delay_ms = delay.as_millis() as u64, error = %error, "request failed, retrying");
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
