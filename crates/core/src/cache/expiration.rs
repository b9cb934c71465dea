//! Expiration strategies evaluated when a cached entry is read.

use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};

use crate::Error;

/// Decides whether a stored entry is still usable at `now`.
pub trait Expiration: Send + Sync + fmt::Debug {
    /// `expires_at` is the header-derived expiry recorded with the entry.
    fn is_expired(&self, created_at: DateTime<Utc>, expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool;
}

/// Honors the expiry computed from `Cache-Control`/`Expires` when the
/// response was built. Entries without one never expire.
#[derive(Debug, Clone, Copy, Default)]
pub struct ByHeader;

impl Expiration for ByHeader {
    fn is_expired(&self, _created_at: DateTime<Utc>, expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        expires_at.is_some_and(|t| now > t)
    }
}

/// Entries live for a fixed time after they were created.
#[derive(Debug, Clone, Copy)]
pub struct ByDuration {
    ttl: TimeDelta,
}

impl ByDuration {
    pub fn new(ttl: std::time::Duration) -> Result<Self, Error> {
        if ttl.is_zero() {
            return Err(Error::InvalidExpiration("duration must be positive".into()));
        }
        let ttl = TimeDelta::from_std(ttl).map_err(|e| Error::InvalidExpiration(e.to_string()))?;
        Ok(Self { ttl })
    }
}

impl Expiration for ByDuration {
    fn is_expired(&self, created_at: DateTime<Utc>, _expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        match created_at.checked_add_signed(self.ttl) {
            Some(deadline) => now > deadline,
            None => false,
        }
    }
}

/// Every entry expires at one fixed instant.
#[derive(Debug, Clone, Copy)]
pub struct ByDate {
    at: DateTime<Utc>,
}

impl ByDate {
    /// Fails for instants that are not in the future.
    pub fn new(at: DateTime<Utc>) -> Result<Self, Error> {
        if at <= Utc::now() {
            return Err(Error::InvalidExpiration(format!("{at} is not in the future")));
        }
        Ok(Self { at })
    }
}

impl Expiration for ByDate {
    fn is_expired(&self, _created_at: DateTime<Utc>, _expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        now > self.at
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Never;

impl Expiration for Never {
    fn is_expired(&self, _: DateTime<Utc>, _: Option<DateTime<Utc>>, _: DateTime<Utc>) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_by_duration_boundary() {
        let strategy = ByDuration::new(Duration::from_secs(60)).unwrap();
        let created = Utc::now();
        let ttl = TimeDelta::seconds(60);
        let ns = TimeDelta::nanoseconds(1);

        assert!(!strategy.is_expired(created, None, created + ttl - ns));
        assert!(!strategy.is_expired(created, None, created + ttl));
        assert!(strategy.is_expired(created, None, created + ttl + ns));
    }

    #[test]
    fn test_by_duration_rejects_zero() {
        assert!(matches!(ByDuration::new(Duration::ZERO), Err(Error::InvalidExpiration(_))));
    }

    #[test]
    fn test_by_date() {
        let at = Utc::now() + TimeDelta::hours(1);
        let strategy = ByDate::new(at).unwrap();
        let created = Utc::now();
        assert!(!strategy.is_expired(created, None, at - TimeDelta::nanoseconds(1)));
        assert!(strategy.is_expired(created, None, at + TimeDelta::nanoseconds(1)));
    }

    #[test]
    fn test_by_date_rejects_past() {
        assert!(ByDate::new(Utc::now() - TimeDelta::seconds(1)).is_err());
        assert!(ByDate::new(DateTime::<Utc>::UNIX_EPOCH).is_err());
    }

    #[test]
    fn test_by_header() {
        let now = Utc::now();
        assert!(!ByHeader.is_expired(now, None, now + TimeDelta::days(365)));
        assert!(!ByHeader.is_expired(now, Some(now + TimeDelta::seconds(5)), now));
        assert!(ByHeader.is_expired(now, Some(now - TimeDelta::seconds(5)), now));
    }

    #[test]
    fn test_never() {
        let now = Utc::now();
        assert!(!Never.is_expired(now, Some(DateTime::<Utc>::MIN_UTC), now + TimeDelta::days(10_000)));
    }
}
