//! # Expiration Sentinels
//!
//! Purpose: Model the per-write expiry choice, including the two sentinels
//! callers rely on: "use the configured default" and "never expire".
//!
//! ## Usage Notes
//!
//! - A zero `Duration` converts to [`Expiration::Default`].
//! - `Expiration::from_secs(-1)` (or any negative count) is [`Expiration::Never`].
//! - The store only accepts whole seconds, so `resolve` rounds partial
//!   seconds up; a 300ms expiry still lives for one second.
//! - Stores keep deadlines in milliseconds, so anything past
//!   [`MAX_EXPIRATION_SECS`] is rejected by the client before any I/O.

use std::time::Duration;

/// Use the client's configured default expiration.
pub const DEFAULT: Expiration = Expiration::Default;

/// Store without expiration.
pub const FOREVER: Expiration = Expiration::Never;

/// Longest expiry whose millisecond deadline still fits in an `i64`.
pub const MAX_EXPIRATION_SECS: u64 = (i64::MAX / 1000) as u64;

/// Expiry requested for a single write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Expiration {
    /// Substitute the client's default expiration.
    #[default]
    Default,
    /// Keep the entry until it is deleted or evicted.
    Never,
    /// Expire after the given duration.
    After(Duration),
}

impl Expiration {
    /// Builds an expiration from a signed second count.
    ///
    /// `0` maps to `Default`, negative values map to `Never`.
    pub fn from_secs(secs: i64) -> Self {
        match secs {
            0 => Expiration::Default,
            s if s < 0 => Expiration::Never,
            s => Expiration::After(Duration::from_secs(s as u64)),
        }
    }

    /// Resolves to a whole-second expiry, or `None` for "no expiry".
    ///
    /// `default` is the client's configured default; a zero default means
    /// `Default` writes are stored without expiry.
    pub fn resolve(self, default: Duration) -> Option<u64> {
        let ttl = match self {
            Expiration::Default => default,
            Expiration::Never => return None,
            Expiration::After(ttl) => ttl,
        };
        if ttl.is_zero() {
            return None;
        }
        let secs = ttl.as_secs();
        if ttl.subsec_nanos() > 0 {
            Some(secs.saturating_add(1))
        } else {
            Some(secs)
        }
    }
}

impl From<Duration> for Expiration {
    fn from(ttl: Duration) -> Self {
        if ttl.is_zero() {
            Expiration::Default
        } else {
            Expiration::After(ttl)
        }
    }
}

/// TTL state of an existing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// Key exists without expiration.
    NoExpiry,
    /// Key expires after the provided duration.
    ExpiresIn(Duration),
}

impl Ttl {
    /// Seconds until expiry, `-1` when the key never expires.
    pub fn as_secs(&self) -> i64 {
        match self {
            Ttl::NoExpiry => -1,
            Ttl::ExpiresIn(remaining) => remaining.as_secs() as i64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: Duration = Duration::from_secs(3600);

    #[test]
    fn sentinels_from_secs() {
        assert_eq!(Expiration::from_secs(0), DEFAULT);
        assert_eq!(Expiration::from_secs(-1), FOREVER);
        assert_eq!(
            Expiration::from_secs(30),
            Expiration::After(Duration::from_secs(30))
        );
    }

    #[test]
    fn zero_duration_means_default() {
        assert_eq!(Expiration::from(Duration::ZERO), Expiration::Default);
    }

    #[test]
    fn default_uses_configured_value() {
        assert_eq!(DEFAULT.resolve(HOUR), Some(3600));
        assert_eq!(DEFAULT.resolve(Duration::ZERO), None);
    }

    #[test]
    fn forever_ignores_default() {
        assert_eq!(FOREVER.resolve(HOUR), None);
    }

    #[test]
    fn partial_seconds_round_up() {
        let exp = Expiration::After(Duration::from_millis(300));
        assert_eq!(exp.resolve(HOUR), Some(1));
        let exp = Expiration::After(Duration::from_millis(2500));
        assert_eq!(exp.resolve(HOUR), Some(3));
    }

    #[test]
    fn huge_durations_saturate() {
        assert_eq!(Expiration::After(Duration::MAX).resolve(HOUR), Some(u64::MAX));
        let exp = Expiration::After(Duration::from_secs(MAX_EXPIRATION_SECS));
        assert_eq!(exp.resolve(HOUR), Some(MAX_EXPIRATION_SECS));
    }

    #[test]
    fn ttl_seconds() {
        assert_eq!(Ttl::NoExpiry.as_secs(), -1);
        assert_eq!(Ttl::ExpiresIn(Duration::from_secs(9)).as_secs(), 9);
    }
}
