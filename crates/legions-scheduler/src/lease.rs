//! Run lease: at most one send loop at a time per database.
//!
//! A second `legions run` while the lease is held fails fast. A lease left
//! behind by a crashed run is taken over once its TTL has passed. A live run
//! renews its lease before every dispatch, so the TTL bounds the gap between
//! two sends, not the length of the run.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};

use legions_core::error::Result;

use crate::persistence::OutreachDb;

/// Ten years; longer TTLs are clamped.
const MAX_TTL_SECS: u64 = 10 * 365 * 86_400;

/// Identity written into the lease: `user@host:pid`.
pub fn holder_identity() -> String {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown-host".into());
    format!("{}@{}:{}", whoami::username(), host, std::process::id())
}

/// Held lease. Released on drop.
pub struct RunLease<'a> {
    db: &'a OutreachDb,
    holder: String,
    ttl: chrono::Duration,
    /// Expiry in Unix microseconds.
    expires_at: AtomicI64,
}

impl<'a> RunLease<'a> {
    /// Acquire the lease or fail with `LeaseHeld`.
    pub fn acquire(db: &'a OutreachDb, ttl_secs: u64) -> Result<Self> {
        Self::acquire_as(db, holder_identity(), ttl_secs, Utc::now())
    }

    pub fn acquire_as(
        db: &'a OutreachDb,
        holder: String,
        ttl_secs: u64,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let ttl = chrono::Duration::seconds(ttl_secs.min(MAX_TTL_SECS) as i64);
        let row = db.try_acquire_lease(&holder, now, ttl)?;
        tracing::debug!("🔒 Run lease acquired by {holder} until {}", row.expires_at);
        Ok(Self {
            db,
            holder,
            ttl,
            expires_at: AtomicI64::new(row.expires_at.timestamp_micros()),
        })
    }

    /// Extend the lease to `now + ttl`. Fails with `LeaseLost` when another
    /// run has taken it over; the caller must stop sending.
    pub fn renew(&self, now: DateTime<Utc>) -> Result<()> {
        let row = self.db.renew_lease(&self.holder, now, self.ttl)?;
        self.expires_at.store(row.expires_at.timestamp_micros(), Ordering::Relaxed);
        tracing::trace!("🔒 Run lease renewed until {}", row.expires_at);
        Ok(())
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_micros(self.expires_at.load(Ordering::Relaxed)).unwrap_or_default()
    }
}

impl Drop for RunLease<'_> {
    fn drop(&mut self) {
        match self.db.release_lease(&self.holder) {
            Ok(true) => tracing::debug!("🔓 Run lease released by {}", self.holder),
            Ok(false) => tracing::warn!("⚠️ Run lease of {} was already taken over", self.holder),
            Err(e) => tracing::warn!("⚠️ Failed to release run lease: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use legions_core::error::LegionsError;

    #[test]
    fn test_second_run_is_refused() {
        let db = OutreachDb::open_in_memory().unwrap();
        let now = Utc::now();
        let first = RunLease::acquire_as(&db, "ann@box:10".into(), 600, now).unwrap();
        assert_eq!(first.holder(), "ann@box:10");

        let second = RunLease::acquire_as(&db, "ann@box:11".into(), 600, now);
        assert!(matches!(second, Err(LegionsError::LeaseHeld { .. })));
    }

    #[test]
    fn test_drop_releases() {
        let db = OutreachDb::open_in_memory().unwrap();
        let now = Utc::now();
        {
            let _lease = RunLease::acquire_as(&db, "ann@box:10".into(), 600, now).unwrap();
            assert!(db.current_lease().unwrap().is_some());
        }
        assert!(db.current_lease().unwrap().is_none());
        assert!(RunLease::acquire_as(&db, "bob@box:12".into(), 600, now).is_ok());
    }

    #[test]
    fn test_stale_lease_taken_over() {
        let db = OutreachDb::open_in_memory().unwrap();
        let now = Utc::now();
        let stale = RunLease::acquire_as(&db, "ann@box:10".into(), 60, now).unwrap();
        let fresh =
            RunLease::acquire_as(&db, "bob@box:12".into(), 60, now + chrono::Duration::seconds(61))
                .unwrap();
        assert_eq!(fresh.holder(), "bob@box:12");
        // The stale guard must not release the new holder's lease.
        drop(stale);
        assert_eq!(db.current_lease().unwrap().unwrap().holder, "bob@box:12");
    }

    #[test]
    fn test_renewal_keeps_a_long_run_exclusive() {
        use chrono::TimeZone;
        let db = OutreachDb::open_in_memory().unwrap();
        let now = Utc.with_ymd_and_hms(2026, 3, 4, 9, 0, 0).unwrap();
        let long_run = RunLease::acquire_as(&db, "cron@h:1".into(), 3600, now).unwrap();

        // Still sending after 50 minutes.
        long_run.renew(now + chrono::Duration::minutes(50)).unwrap();
        assert_eq!(long_run.expires_at(), now + chrono::Duration::minutes(110));

        let next_tick = RunLease::acquire_as(&db, "cron@h:2".into(), 3600, now + chrono::Duration::seconds(3601));
        assert!(matches!(next_tick, Err(LegionsError::LeaseHeld { .. })));
        assert_eq!(db.current_lease().unwrap().unwrap().holder, "cron@h:1");
    }

    #[test]
    fn test_renew_after_takeover_fails() {
        let db = OutreachDb::open_in_memory().unwrap();
        let now = Utc::now();
        let stalled = RunLease::acquire_as(&db, "cron@h:1".into(), 60, now).unwrap();
        let _next = RunLease::acquire_as(&db, "cron@h:2".into(), 60, now + chrono::Duration::seconds(61)).unwrap();

        let err = stalled.renew(now + chrono::Duration::seconds(62)).unwrap_err();
        assert!(matches!(err, LegionsError::LeaseLost { ref holder } if holder == "cron@h:2"));
    }

    #[test]
    fn test_holder_identity_shape() {
        let id = holder_identity();
        assert!(id.contains('@'));
        assert!(id.ends_with(&format!(":{}", std::process::id())));
    }
}
