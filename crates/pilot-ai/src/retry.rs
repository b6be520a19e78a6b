use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};

const BASE_DELAY_MS: u64 = 200;
const MAX_DELAY_MS: u64 = 10_000;

static REQUEST_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Retry schedule for provider calls: capped exponential backoff, optional
/// jitter, a wall-clock budget, and Retry-After floors.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub budget_ms: u64,
    pub jitter: bool,
}

impl RetryPolicy {
    pub fn retryable_status(status: u16) -> bool {
        matches!(status, 408 | 409 | 425 | 429) || status >= 500
    }

    pub fn retryable_transport_error(error: &reqwest::Error) -> bool {
        error.is_timeout() || error.is_connect() || error.is_request() || error.is_body()
    }

    /// Delay to sleep after a failed `attempt` (0-based), honoring a
    /// Retry-After floor when the provider sent one.
    pub fn delay_ms(&self, attempt: usize, retry_after_ms: Option<u64>) -> u64 {
        let exp = 1_u64 << attempt.min(6);
        let mut delay = BASE_DELAY_MS.saturating_mul(exp).min(MAX_DELAY_MS);
        if self.jitter && delay > 1 {
            delay -= jitter_below(delay / 2);
        }
        match retry_after_ms {
            Some(floor) => delay.max(floor),
            None => delay,
        }
    }

    /// A delay is taken only while the total retry budget can absorb it; a
    /// zero budget means unbounded.
    pub fn allows(&self, elapsed_ms: u64, delay_ms: u64) -> bool {
        self.budget_ms == 0 || elapsed_ms.saturating_add(delay_ms) <= self.budget_ms
    }
}

// Cheap deterministic spread; cryptographic quality is irrelevant here.
fn jitter_below(width: u64) -> u64 {
    static JITTER_SEED: AtomicU64 = AtomicU64::new(0x9E37_79B9);
    if width == 0 {
        return 0;
    }
    let seed = JITTER_SEED.fetch_add(0x9E37_79B9_7F4A_7C15, Ordering::Relaxed);
    seed.rotate_left(13) % width.saturating_add(1)
}

/// Reads a Retry-After header as milliseconds, accepting both delta-seconds
/// and HTTP-date forms.
pub fn parse_retry_after_ms(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    let raw = headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(seconds) = raw.parse::<u64>() {
        return Some(seconds.saturating_mul(1_000));
    }

    let retry_at = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
    let remaining = retry_at.signed_duration_since(Utc::now()).num_milliseconds();
    u64::try_from(remaining.max(0)).ok()
}

/// Mints a per-request id carried on provider calls for log correlation.
pub fn new_request_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let count = REQUEST_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("pilot-ai-{millis}-{count}")
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use reqwest::header::{HeaderMap, HeaderValue};

    use super::{new_request_id, parse_retry_after_ms, RetryPolicy};

    fn policy(jitter: bool) -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            budget_ms: 30_000,
            jitter,
        }
    }

    #[test]
    fn unit_retryable_status_selection() {
        for status in [408, 409, 425, 429, 500, 503, 599] {
            assert!(RetryPolicy::retryable_status(status), "status {status}");
        }
        for status in [200, 400, 401, 404, 422] {
            assert!(!RetryPolicy::retryable_status(status), "status {status}");
        }
    }

    #[test]
    fn unit_delay_doubles_per_attempt_and_caps() {
        let policy = policy(false);
        assert_eq!(policy.delay_ms(0, None), 200);
        assert_eq!(policy.delay_ms(1, None), 400);
        assert_eq!(policy.delay_ms(2, None), 800);
        // 200 << 6 overshoots the cap; later attempts stay pinned there.
        assert_eq!(policy.delay_ms(6, None), 10_000);
        assert_eq!(policy.delay_ms(40, None), 10_000);
    }

    #[test]
    fn unit_jittered_delay_stays_in_upper_half_band() {
        let policy = policy(true);
        for attempt in 0..4 {
            let base = 200_u64 << attempt;
            for _ in 0..32 {
                let delay = policy.delay_ms(attempt, None);
                assert!(
                    delay >= base - base / 2,
                    "delay {delay} below band for attempt {attempt}"
                );
                assert!(delay <= base, "delay {delay} above base for attempt {attempt}");
            }
        }
    }

    #[test]
    fn regression_retry_after_acts_as_floor_not_replacement() {
        let policy = policy(false);
        assert_eq!(policy.delay_ms(2, Some(100)), 800);
        assert_eq!(policy.delay_ms(0, Some(1_500)), 1_500);
    }

    #[test]
    fn unit_budget_allows_respects_zero_and_bounded_budgets() {
        let unbounded = RetryPolicy {
            max_retries: 2,
            budget_ms: 0,
            jitter: false,
        };
        assert!(unbounded.allows(u64::MAX - 1, 100));

        let bounded = RetryPolicy {
            max_retries: 2,
            budget_ms: 100,
            jitter: false,
        };
        assert!(bounded.allows(50, 50));
        assert!(!bounded.allows(50, 60));
    }

    #[test]
    fn unit_parse_retry_after_ms_accepts_seconds_and_rejects_garbage() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("3"));
        assert_eq!(parse_retry_after_ms(&headers), Some(3_000));

        headers.insert("retry-after", HeaderValue::from_static("not-a-number"));
        assert_eq!(parse_retry_after_ms(&headers), None);

        headers.insert("retry-after", HeaderValue::from_static("  "));
        assert_eq!(parse_retry_after_ms(&headers), None);
    }

    #[test]
    fn functional_parse_retry_after_ms_accepts_http_dates() {
        let mut headers = HeaderMap::new();
        let raw = (Utc::now() + Duration::seconds(2))
            .to_rfc2822()
            .replace("+0000", "GMT");
        headers.insert(
            "retry-after",
            HeaderValue::from_str(raw.as_str()).expect("retry-after date"),
        );
        let delay = parse_retry_after_ms(&headers).expect("delay from date");
        assert!((500..=2_500).contains(&delay), "got {delay}");

        let past = (Utc::now() - Duration::seconds(30))
            .to_rfc2822()
            .replace("+0000", "GMT");
        headers.insert(
            "retry-after",
            HeaderValue::from_str(past.as_str()).expect("retry-after date"),
        );
        assert_eq!(parse_retry_after_ms(&headers), Some(0));
    }

    #[test]
    fn unit_request_ids_are_unique_and_prefixed() {
        let a = new_request_id();
        let b = new_request_id();
        assert_ne!(a, b);
        assert!(a.starts_with("pilot-ai-"));
    }
}
