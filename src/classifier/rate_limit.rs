use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Cool-down applied after the free moderation endpoint answers 429.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(60);

/// The instant until which free-tier moderation calls are suppressed.
#[derive(Debug, Default)]
pub struct RateLimitState {
    until: Mutex<Option<Instant>>,
}

impl RateLimitState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self, now: Instant) -> bool {
        self.remaining(now).is_some()
    }

    /// Time left in the cool-down window.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        let until = *self.until.lock().unwrap_or_else(|p| p.into_inner());
        until.filter(|until| *until > now).map(|until| until - now)
    }

    pub fn activate_until(&self, instant: Instant) {
        *self.until.lock().unwrap_or_else(|p| p.into_inner()) = Some(instant);
    }

    pub fn clear(&self) {
        *self.until.lock().unwrap_or_else(|p| p.into_inner()) = None;
    }
}

/// Seconds from a `Retry-After` header, falling back to the default cool-down.
/// HTTP-date values are not honoured.
pub fn parse_retry_after(header: Option<&str>) -> Duration {
    header
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_COOLDOWN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window() {
        let state = RateLimitState::new();
        let now = Instant::now();
        assert!(!state.is_active(now));

        state.activate_until(now + Duration::from_secs(30));
        assert!(state.is_active(now));
        assert_eq!(state.remaining(now), Some(Duration::from_secs(30)));
        assert!(!state.is_active(now + Duration::from_secs(30)));

        state.activate_until(now + Duration::from_secs(30));
        state.clear();
        assert!(!state.is_active(now));
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after(Some("12")), Duration::from_secs(12));
        assert_eq!(parse_retry_after(Some(" 7 ")), Duration::from_secs(7));
        assert_eq!(parse_retry_after(Some("Wed, 21 Oct 2015 07:28:00 GMT")), DEFAULT_COOLDOWN);
        assert_eq!(parse_retry_after(None), DEFAULT_COOLDOWN);
    }
}
