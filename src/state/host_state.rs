use crate::config::PolitenessConfig;
use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};

/// Tracks the politeness state of one host
///
/// Times are monotonic `Instant`s so eligibility checks are immune to wall
/// clock jumps; `HostRecord` is the wall-clock form that goes to the store.
#[derive(Debug, Clone, PartialEq)]
pub struct HostState {
    /// Politeness key (`host[:port]`)
    pub host: String,

    /// When the most recent fetch to this host started
    pub last_fetch_start: Option<Instant>,

    /// Crawl-delay declared by robots.txt (or the fallback floor)
    pub robots_delay: Option<Duration>,

    /// Adaptive backoff from transient errors; zero while healthy
    pub error_backoff: Duration,

    /// Adaptive backoff from HTTP 429; zero while healthy
    pub rate_limit_backoff: Duration,

    pub consecutive_errors: u32,

    /// Fetches started against this host, including restored history
    pub pages_fetched: u64,

    /// A fetch to this host is currently running
    pub in_flight: bool,

    /// Host is cooling down after too many consecutive errors
    pub dormant_until: Option<Instant>,
}

impl HostState {
    /// Creates a fresh state for a host seen for the first time
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            last_fetch_start: None,
            robots_delay: None,
            error_backoff: Duration::ZERO,
            rate_limit_backoff: Duration::ZERO,
            consecutive_errors: 0,
            pages_fetched: 0,
            in_flight: false,
            dormant_until: None,
        }
    }

    /// Effective delay between fetch starts: the largest of the configured
    /// default, the robots crawl-delay and both backoff components
    pub fn effective_delay(&self, default_delay: Duration) -> Duration {
        default_delay
            .max(self.robots_delay.unwrap_or(Duration::ZERO))
            .max(self.error_backoff)
            .max(self.rate_limit_backoff)
    }

    /// Earliest instant at which the next fetch may start
    ///
    /// Returns None while a fetch is in flight: completion, not time, is what
    /// makes the host eligible again.
    pub fn next_eligible_time(&self, default_delay: Duration, now: Instant) -> Option<Instant> {
        if self.in_flight {
            return None;
        }

        let mut eligible = match self.last_fetch_start {
            Some(last) => last + self.effective_delay(default_delay),
            None => now,
        };

        if let Some(until) = self.dormant_until {
            eligible = eligible.max(until);
        }

        Some(eligible)
    }

    /// Checks whether a fetch may start now
    pub fn can_fetch(&self, default_delay: Duration, now: Instant) -> bool {
        self.next_eligible_time(default_delay, now)
            .map(|at| at <= now)
            .unwrap_or(false)
    }

    /// Returns true if the host is in its error cooldown window
    pub fn is_dormant(&self, now: Instant) -> bool {
        self.dormant_until.map(|until| now < until).unwrap_or(false)
    }

    /// Records that a fetch started
    pub fn record_fetch_start(&mut self, now: Instant) {
        self.last_fetch_start = Some(now);
        self.in_flight = true;
        self.pages_fetched += 1;
    }

    /// Records a healthy outcome; both backoffs return to their floor
    pub fn record_success(&mut self) {
        self.in_flight = false;
        self.consecutive_errors = 0;
        self.error_backoff = Duration::ZERO;
        self.rate_limit_backoff = Duration::ZERO;
        self.dormant_until = None;
    }

    /// Records a transient error and grows the error backoff
    ///
    /// Returns true if this error sent the host into dormancy.
    pub fn record_error(&mut self, config: &PolitenessConfig, now: Instant) -> bool {
        self.in_flight = false;
        self.error_backoff = grow(
            self.error_backoff,
            config.default_delay(),
            config.backoff_multiplier,
            config.max_backoff(),
        );
        self.count_error(config, now)
    }

    /// Records an HTTP 429 and grows the rate-limit backoff
    ///
    /// A server-supplied `Retry-After` is a floor for the new backoff and may
    /// exceed the configured ceiling. Returns true if the host went dormant.
    pub fn record_rate_limited(
        &mut self,
        config: &PolitenessConfig,
        retry_after: Option<Duration>,
        now: Instant,
    ) -> bool {
        self.in_flight = false;
        let grown = grow(
            self.rate_limit_backoff,
            config.default_delay(),
            config.rate_limit_multiplier,
            config.max_backoff(),
        );
        self.rate_limit_backoff = grown.max(retry_after.unwrap_or(Duration::ZERO));
        self.count_error(config, now)
    }

    /// Releases the in-flight slot without judging the host
    pub fn release(&mut self) {
        self.in_flight = false;
    }

    fn count_error(&mut self, config: &PolitenessConfig, now: Instant) -> bool {
        self.consecutive_errors += 1;
        if self.consecutive_errors >= config.dormant_threshold {
            self.dormant_until = Some(now + config.dormant_cooldown());
            self.consecutive_errors = 0;
            true
        } else {
            false
        }
    }

    /// Converts to the wall-clock form kept in the store
    pub fn to_record(&self, now: Instant, wall_now: DateTime<Utc>) -> HostRecord {
        let to_wall = |at: Instant| -> DateTime<Utc> {
            if at >= now {
                chrono::Duration::from_std(at - now)
                    .map(|ahead| wall_now + ahead)
                    .unwrap_or(wall_now)
            } else {
                chrono::Duration::from_std(now - at)
                    .map(|behind| wall_now - behind)
                    .unwrap_or(wall_now)
            }
        };

        HostRecord {
            host: self.host.clone(),
            pages_fetched: self.pages_fetched,
            consecutive_errors: self.consecutive_errors,
            error_backoff_ms: self.error_backoff.as_millis() as u64,
            rate_limit_backoff_ms: self.rate_limit_backoff.as_millis() as u64,
            robots_delay_ms: self.robots_delay.map(|d| d.as_millis() as u64),
            last_fetch_at: self.last_fetch_start.map(to_wall),
            dormant_until: self.dormant_until.filter(|until| *until > now).map(to_wall),
        }
    }

    /// Rebuilds a state from its stored form
    ///
    /// Wall-clock times in the past become instants in the past (where the
    /// monotonic clock allows it); an expired dormancy is dropped.
    pub fn from_record(record: &HostRecord, now: Instant, wall_now: DateTime<Utc>) -> Self {
        let last_fetch_start = record.last_fetch_at.and_then(|at| {
            let behind = (wall_now - at).to_std().unwrap_or(Duration::ZERO);
            now.checked_sub(behind)
        });
        let dormant_until = record
            .dormant_until
            .and_then(|until| (until - wall_now).to_std().ok())
            .map(|ahead| now + ahead);

        Self {
            host: record.host.clone(),
            last_fetch_start,
            robots_delay: record.robots_delay_ms.map(Duration::from_millis),
            error_backoff: Duration::from_millis(record.error_backoff_ms),
            rate_limit_backoff: Duration::from_millis(record.rate_limit_backoff_ms),
            consecutive_errors: record.consecutive_errors,
            pages_fetched: record.pages_fetched,
            in_flight: false,
            dormant_until,
        }
    }
}

/// Multiplies a backoff by `factor`, starting from `base` and capped at `ceiling`
fn grow(current: Duration, base: Duration, factor: f64, ceiling: Duration) -> Duration {
    let start = if current.is_zero() { base } else { current };
    let next = start.mul_f64(factor.max(1.0));
    next.min(ceiling)
}

/// Host state as persisted in the `host_states` table
#[derive(Debug, Clone, PartialEq)]
pub struct HostRecord {
    pub host: String,
    pub pages_fetched: u64,
    pub consecutive_errors: u32,
    pub error_backoff_ms: u64,
    pub rate_limit_backoff_ms: u64,
    pub robots_delay_ms: Option<u64>,
    pub last_fetch_at: Option<DateTime<Utc>>,
    pub dormant_until: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_config() -> PolitenessConfig {
        PolitenessConfig {
            default_delay_ms: 1000,
            backoff_multiplier: 2.0,
            rate_limit_multiplier: 4.0,
            max_backoff_ms: 10_000,
            dormant_threshold: 3,
            dormant_cooldown_secs: 60,
            host_table_capacity: 16,
        }
    }

    #[test]
    fn test_new_host_state() {
        let state = HostState::new("example.com");
        assert_eq!(state.host, "example.com");
        assert_eq!(state.pages_fetched, 0);
        assert!(state.last_fetch_start.is_none());
        assert!(!state.in_flight);
    }

    #[test]
    fn test_can_fetch_initially() {
        let state = HostState::new("example.com");
        assert!(state.can_fetch(Duration::from_secs(1), Instant::now()));
    }

    #[test]
    fn test_not_eligible_while_in_flight() {
        let mut state = HostState::new("example.com");
        let now = Instant::now();
        state.record_fetch_start(now);

        let much_later = now + Duration::from_secs(3600);
        assert!(state.next_eligible_time(Duration::from_secs(1), much_later).is_none());
        assert!(!state.can_fetch(Duration::from_secs(1), much_later));
    }

    #[test]
    fn test_respects_delay_after_completion() {
        let mut state = HostState::new("example.com");
        let now = Instant::now();
        state.record_fetch_start(now);
        state.record_success();

        let delay = Duration::from_millis(1000);
        assert!(!state.can_fetch(delay, now + Duration::from_millis(500)));
        assert!(state.can_fetch(delay, now + Duration::from_millis(1000)));
        assert_eq!(
            state.next_eligible_time(delay, now),
            Some(now + Duration::from_millis(1000))
        );
    }

    #[test]
    fn test_effective_delay_is_maximum() {
        let mut state = HostState::new("example.com");
        let default = Duration::from_secs(1);
        assert_eq!(state.effective_delay(default), default);

        state.robots_delay = Some(Duration::from_secs(5));
        assert_eq!(state.effective_delay(default), Duration::from_secs(5));

        state.error_backoff = Duration::from_secs(8);
        assert_eq!(state.effective_delay(default), Duration::from_secs(8));

        state.rate_limit_backoff = Duration::from_secs(2);
        assert_eq!(state.effective_delay(default), Duration::from_secs(8));
    }

    #[test]
    fn test_error_backoff_doubles_to_ceiling() {
        let config = PolitenessConfig {
            dormant_threshold: 100,
            ..create_test_config()
        };
        let mut state = HostState::new("example.com");
        let now = Instant::now();

        let mut seen = Vec::new();
        for _ in 0..6 {
            state.record_fetch_start(now);
            state.record_error(&config, now);
            seen.push(state.error_backoff.as_millis());
        }

        assert_eq!(seen, vec![2000, 4000, 8000, 10_000, 10_000, 10_000]);
    }

    #[test]
    fn test_success_resets_backoff() {
        let config = create_test_config();
        let mut state = HostState::new("example.com");
        let now = Instant::now();

        state.record_fetch_start(now);
        state.record_error(&config, now);
        state.record_fetch_start(now);
        state.record_rate_limited(&config, None, now);
        assert_eq!(state.consecutive_errors, 2);

        state.record_fetch_start(now);
        state.record_success();

        assert_eq!(state.consecutive_errors, 0);
        assert_eq!(state.error_backoff, Duration::ZERO);
        assert_eq!(state.rate_limit_backoff, Duration::ZERO);
        assert_eq!(state.effective_delay(config.default_delay()), config.default_delay());
    }

    #[test]
    fn test_rate_limit_honours_retry_after() {
        let config = create_test_config();
        let mut state = HostState::new("example.com");
        let now = Instant::now();

        state.record_fetch_start(now);
        state.record_rate_limited(&config, Some(Duration::from_secs(30)), now);

        // 30s beats both the 4s multiplier step and the 10s ceiling
        assert_eq!(state.rate_limit_backoff, Duration::from_secs(30));
    }

    #[test]
    fn test_dormant_after_threshold() {
        let config = create_test_config();
        let mut state = HostState::new("example.com");
        let now = Instant::now();

        assert!(!state.record_error(&config, now));
        assert!(!state.record_error(&config, now));
        assert!(state.record_error(&config, now));

        assert!(state.is_dormant(now));
        assert_eq!(state.consecutive_errors, 0);
        assert!(!state.can_fetch(config.default_delay(), now + Duration::from_secs(59)));
        assert!(state.can_fetch(config.default_delay(), now + Duration::from_secs(60)));
    }

    #[test]
    fn test_release_keeps_counters() {
        let config = create_test_config();
        let mut state = HostState::new("example.com");
        let now = Instant::now();

        state.record_error(&config, now);
        state.record_fetch_start(now);
        state.release();

        assert!(!state.in_flight);
        assert_eq!(state.consecutive_errors, 1);
    }

    #[test]
    fn test_record_round_trip_preserves_counts() {
        let config = create_test_config();
        let mut state = HostState::new("example.com:8080");
        let now = Instant::now();
        let wall = Utc::now();

        state.record_fetch_start(now);
        state.record_error(&config, now);
        state.robots_delay = Some(Duration::from_secs(3));

        let record = state.to_record(now, wall);
        assert_eq!(record.pages_fetched, 1);
        assert_eq!(record.error_backoff_ms, 2000);
        assert_eq!(record.last_fetch_at, Some(wall));

        let restored = HostState::from_record(&record, now, wall);
        assert_eq!(restored.pages_fetched, 1);
        assert_eq!(restored.consecutive_errors, 1);
        assert_eq!(restored.error_backoff, Duration::from_secs(2));
        assert_eq!(restored.robots_delay, Some(Duration::from_secs(3)));
        assert!(!restored.in_flight);
    }

    #[test]
    fn test_expired_dormancy_dropped_on_restore() {
        let wall = Utc::now();
        let record = HostRecord {
            host: "example.com".to_string(),
            pages_fetched: 12,
            consecutive_errors: 0,
            error_backoff_ms: 0,
            rate_limit_backoff_ms: 0,
            robots_delay_ms: None,
            last_fetch_at: None,
            dormant_until: Some(wall - chrono::Duration::minutes(5)),
        };

        let restored = HostState::from_record(&record, Instant::now(), wall);
        assert!(restored.dormant_until.is_none());
        assert_eq!(restored.pages_fetched, 12);
    }
}
