use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

pub(crate) const RATE_LIMIT_MAX_RETRIES: usize = 3;
pub(crate) const RATE_LIMIT_BASE_DELAY: Duration = Duration::from_secs(1);
pub(crate) const RATE_LIMIT_MAX_DELAY: Duration = Duration::from_secs(8);

pub(crate) fn is_rate_limited(status: StatusCode, body: &str) -> bool {
    if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::SERVICE_UNAVAILABLE {
        return true;
    }
    let lower = body.to_lowercase();
    lower.contains("rate limit")
        || lower.contains("too many requests")
        || lower.contains("unusual traffic")
}

pub(crate) fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get("retry-after")?.to_str().ok()?.trim();
    value.parse::<u64>().ok().map(Duration::from_secs)
}

pub(crate) async fn wait_with_backoff(
    service: &str,
    attempt: usize,
    delay: Duration,
    retry_after: Option<Duration>,
) -> Duration {
    let wait = match retry_after {
        Some(retry_after) if retry_after > delay => retry_after.min(RATE_LIMIT_MAX_DELAY),
        _ => delay,
    };
    warn!(
        "{} rate limited; retrying in {:.1}s (attempt {}/{})",
        service,
        wait.as_secs_f32(),
        attempt,
        RATE_LIMIT_MAX_RETRIES
    );
    sleep(wait).await;
    next_delay(delay)
}

pub(crate) fn next_delay(current: Duration) -> Duration {
    current
        .saturating_mul(2)
        .max(RATE_LIMIT_BASE_DELAY)
        .min(RATE_LIMIT_MAX_DELAY)
}
