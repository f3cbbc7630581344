//! Clock port
//!
//! Token lifetimes are wall-clock times set by the carrier, so everything
//! that judges token validity reads time through this trait instead of
//! calling `Utc::now()` directly.

use chrono::{DateTime, Utc};

/// Source of wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
