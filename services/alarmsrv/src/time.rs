//! Time provider abstraction
//!
//! Event creation, closing and debounce decisions read the clock through
//! this trait so tests can pin and advance time.

use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::RwLock;

/// Time provider trait for event timestamps
pub trait TimeProvider: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;

    /// Milliseconds since Unix epoch
    fn now_millis(&self) -> i64 {
        self.now().timestamp_millis()
    }
}

/// System time provider using the local clock
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemTimeProvider;

impl TimeProvider for SystemTimeProvider {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Settable time provider for deterministic tests and scenario replay
#[derive(Debug)]
pub struct FixedTimeProvider {
    current: RwLock<DateTime<Utc>>,
}

impl FixedTimeProvider {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self {
            current: RwLock::new(at),
        }
    }

    /// Start at a Unix timestamp in milliseconds (epoch if out of range)
    pub fn from_millis(timestamp_ms: i64) -> Self {
        let at = Utc
            .timestamp_millis_opt(timestamp_ms)
            .single()
            .unwrap_or_default();
        Self::new(at)
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.current.write() = at;
    }

    /// Move the clock forward, saturating at the latest representable time
    pub fn advance(&self, by: Duration) {
        let mut current = self.current.write();
        *current = current
            .checked_add_signed(by)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
    }
}

impl TimeProvider for FixedTimeProvider {
    fn now(&self) -> DateTime<Utc> {
        *self.current.read()
    }
}

/// Convert an hour count (possibly fractional) into a duration
///
/// Saturates at `Duration::MAX`.
pub fn hours(hours: f64) -> Duration {
    if !hours.is_finite() || hours <= 0.0 {
        return Duration::zero();
    }
    Duration::try_milliseconds((hours * 3_600_000.0).round() as i64).unwrap_or(Duration::MAX)
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;

    #[test]
    fn test_system_time_provider() {
        let provider = SystemTimeProvider;
        let time1 = provider.now();
        std::thread::sleep(std::time::Duration::from_millis(10));
        let time2 = provider.now();

        assert!(time2 >= time1);
    }

    #[test]
    fn test_fixed_time_provider() {
        let fixed_time = 1_700_000_000_000_i64;
        let provider = FixedTimeProvider::from_millis(fixed_time);

        assert_eq!(provider.now_millis(), fixed_time);
        assert_eq!(provider.now_millis(), fixed_time);

        provider.advance(Duration::hours(2));
        assert_eq!(provider.now_millis(), fixed_time + 2 * 3_600_000);
    }

    #[test]
    fn test_hours_conversion() {
        assert_eq!(hours(1.5), Duration::minutes(90));
        assert_eq!(hours(0.0), Duration::zero());
        assert_eq!(hours(-3.0), Duration::zero());
        assert_eq!(hours(f64::NAN), Duration::zero());
        assert_eq!(hours(1e300), Duration::MAX);
    }

    #[test]
    fn test_advance_saturates() {
        let provider = FixedTimeProvider::from_millis(0);
        provider.advance(hours(1e13));
        assert_eq!(provider.now(), DateTime::<Utc>::MAX_UTC);
    }
}
