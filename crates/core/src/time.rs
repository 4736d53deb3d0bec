//! Wall-clock access for lesson completion stamps.

use chrono::{DateTime, Duration, Utc};

/// Where `completed_at` values come from.
///
/// `System` reads the real clock; `Fixed` always answers the same instant,
/// which keeps completion stamps comparable in tests.
#[derive(Debug, Clone, Copy, Default)]
pub enum Clock {
    #[default]
    System,
    Fixed(DateTime<Utc>),
}

impl Clock {
    #[must_use]
    pub fn fixed(at: DateTime<Utc>) -> Self {
        Self::Fixed(at)
    }

    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        match self {
            Clock::System => Utc::now(),
            Clock::Fixed(at) => *at,
        }
    }
}

/// 2023-11-14T22:13:20Z, in seconds since the Unix epoch.
const REFERENCE_SECS: i64 = 1_700_000_000;

/// A stable instant for tests and demo data.
#[must_use]
pub fn fixed_now() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH + Duration::seconds(REFERENCE_SECS)
}
