//! Retry Policy
//!
//! Decides which statuses are retried and how long to wait between attempts.

use crate::error::ResponsesError;
use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Default number of retries after the first attempt
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Default backoff base
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(200);

/// Default backoff ceiling
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Default jitter (fraction of the computed delay)
pub const DEFAULT_RANDOMIZATION_FACTOR: f64 = 0.1;

type StatusPredicate = dyn Fn(StatusCode) -> bool + Send + Sync;

/// Retry policy shared by every request a sender issues
#[derive(Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt (total attempts = max_retries + 1)
    pub max_retries: u32,

    /// Delay before the first retry; doubles on each further retry
    pub base_delay: Duration,

    /// Upper bound on any single delay, including Retry-After waits
    pub max_delay: Duration,

    /// Jitter factor; 0.0 makes delays deterministic
    pub randomization_factor: f64,

    retry_on: Arc<StatusPredicate>,
}

impl RetryPolicy {
    /// Create a policy with the default settings
    pub fn new() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            randomization_factor: DEFAULT_RANDOMIZATION_FACTOR,
            retry_on: Arc::new(default_retry_predicate),
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_randomization_factor(mut self, factor: f64) -> Self {
        self.randomization_factor = factor.clamp(0.0, 1.0);
        self
    }

    /// Replace the status predicate (default: 429 and any 5xx)
    pub fn with_retry_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(StatusCode) -> bool + Send + Sync + 'static,
    {
        self.retry_on = Arc::new(predicate);
        self
    }

    /// Total attempts allowed for one logical request
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Whether a received status should be retried
    pub fn should_retry_status(&self, status: StatusCode) -> bool {
        (self.retry_on)(status)
    }

    /// Fresh per-request retry state
    pub fn start(&self) -> RetryState {
        let backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.base_delay)
            .with_multiplier(2.0)
            .with_randomization_factor(self.randomization_factor)
            .with_max_interval(self.max_delay)
            .with_max_elapsed_time(None)
            .build();

        RetryState {
            attempt: 0,
            max_attempts: self.max_attempts(),
            max_delay: self.max_delay,
            last_error: None,
            backoff,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("randomization_factor", &self.randomization_factor)
            .finish_non_exhaustive()
    }
}

/// Retry on 429 Too Many Requests and on any server error
pub fn default_retry_predicate(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Attempt counter and last error for one logical request
pub struct RetryState {
    attempt: u32,
    max_attempts: u32,
    max_delay: Duration,
    last_error: Option<ResponsesError>,
    backoff: ExponentialBackoff,
}

impl RetryState {
    /// Attempts started so far
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Retries performed so far
    pub fn retries(&self) -> u32 {
        self.attempt.saturating_sub(1)
    }

    /// Begin the next attempt; returns its zero-based index
    pub fn begin_attempt(&mut self) -> u32 {
        let index = self.attempt;
        self.attempt += 1;
        index
    }

    pub fn has_budget(&self) -> bool {
        self.attempt < self.max_attempts
    }

    pub fn record_failure(&mut self, error: ResponsesError) {
        self.last_error = Some(error);
    }

    pub fn last_error(&self) -> Option<&ResponsesError> {
        self.last_error.as_ref()
    }

    /// Delay before the next attempt, preferring a server-supplied hint
    pub fn next_delay(&mut self, server_hint: Option<Duration>) -> Duration {
        let computed = self.backoff.next_backoff().unwrap_or(self.max_delay);
        server_hint.unwrap_or(computed).min(self.max_delay)
    }

    /// Consume the state into the error surfaced once the budget is spent
    pub fn into_error(self) -> ResponsesError {
        let source = self
            .last_error
            .unwrap_or_else(|| ResponsesError::Internal("retry loop ended without an error".into()));

        ResponsesError::Network {
            attempts: self.attempt,
            source: Box::new(source),
        }
    }
}

impl fmt::Debug for RetryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryState")
            .field("attempt", &self.attempt)
            .field("max_attempts", &self.max_attempts)
            .field("last_error", &self.last_error)
            .finish_non_exhaustive()
    }
}

/// Parse the Retry-After header of a throttled response
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_duration_string)
}

/// Parse "30", "30s", "500ms", "5m", "1h" or compound "1m30s"
pub fn parse_duration_string(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(secs) = s.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    if let Some(ms) = s.strip_suffix("ms") {
        return ms.parse::<u64>().ok().map(Duration::from_millis);
    }

    let mut total = Duration::ZERO;
    let mut number = String::new();
    for c in s.chars() {
        if c.is_ascii_digit() || c == '.' {
            number.push(c);
            continue;
        }

        let value: f64 = number.parse().ok()?;
        number.clear();
        let unit = match c {
            'h' => 3600.0,
            'm' => 60.0,
            's' => 1.0,
            _ => return None,
        };
        // Header is server-controlled; out-of-range values are rejected
        let part = Duration::try_from_secs_f64(value * unit).ok()?;
        total = total.checked_add(part)?;
    }

    // Trailing digits without a unit
    if !number.is_empty() {
        return None;
    }

    Some(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deterministic() -> RetryPolicy {
        RetryPolicy::new().with_randomization_factor(0.0)
    }

    #[test]
    fn test_default_predicate() {
        let policy = RetryPolicy::new();
        assert!(policy.should_retry_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(policy.should_retry_status(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(policy.should_retry_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!policy.should_retry_status(StatusCode::BAD_REQUEST));
        assert!(!policy.should_retry_status(StatusCode::UNAUTHORIZED));
        assert!(!policy.should_retry_status(StatusCode::OK));
    }

    #[test]
    fn test_custom_predicate() {
        let policy = RetryPolicy::new().with_retry_predicate(|s| s == StatusCode::CONFLICT);
        assert!(policy.should_retry_status(StatusCode::CONFLICT));
        assert!(!policy.should_retry_status(StatusCode::SERVICE_UNAVAILABLE));
    }

    #[test]
    fn test_backoff_doubles() {
        let mut state = deterministic().start();
        assert_eq!(state.next_delay(None), Duration::from_millis(200));
        assert_eq!(state.next_delay(None), Duration::from_millis(400));
        assert_eq!(state.next_delay(None), Duration::from_millis(800));
    }

    #[test]
    fn test_backoff_capped() {
        let mut state = deterministic()
            .with_max_delay(Duration::from_millis(300))
            .start();
        assert_eq!(state.next_delay(None), Duration::from_millis(200));
        assert_eq!(state.next_delay(None), Duration::from_millis(300));
        assert_eq!(
            state.next_delay(Some(Duration::from_secs(60))),
            Duration::from_millis(300)
        );
    }

    #[test]
    fn test_budget() {
        let mut state = RetryPolicy::new().with_max_retries(2).start();
        let mut started = 0;
        while state.has_budget() {
            state.begin_attempt();
            state.record_failure(ResponsesError::Transport("refused".into()));
            started += 1;
        }
        assert_eq!(started, 3);
        assert_eq!(state.retries(), 2);

        match state.into_error() {
            ResponsesError::Network { attempts, source } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*source, ResponsesError::Transport(_)));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_parse_duration_string() {
        assert_eq!(parse_duration_string("5"), Some(Duration::from_secs(5)));
        assert_eq!(parse_duration_string("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration_string("5m"), Some(Duration::from_secs(300)));
        assert_eq!(parse_duration_string("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration_string("1m30s"), Some(Duration::from_secs(90)));
        assert_eq!(
            parse_duration_string("500ms"),
            Some(Duration::from_millis(500))
        );
        assert_eq!(parse_duration_string("soon"), None);
        assert_eq!(parse_duration_string("1.5s"), Some(Duration::from_millis(1500)));
        assert_eq!(parse_duration_string(""), None);
    }

    #[test]
    fn test_oversized_duration_rejected() {
        assert_eq!(parse_duration_string("99999999999999999999999s"), None);
        assert_eq!(
            parse_duration_string("18446744073709551615s18446744073709551615s"),
            None
        );
        assert_eq!(parse_duration_string("99999999999999999999999ms"), None);
    }

    #[test]
    fn test_retry_after_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(retry_after(&headers), None);

        headers.insert(RETRY_AFTER, "2".parse().unwrap());
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(2)));
    }
}
